use std::collections::HashMap;

use spirv as spv;

use crate::{Meta, SpirBlock, SpirConstant, SpirFunction, SpirType, SpirVariable};

/// Imported extended instruction sets
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum ExtensionKind {
    GlslStd450,
    Unknown,
}

/// What kind of entity an id names
///
/// Each id resolves in at most one of the per-kind tables of [Module].
#[derive(PartialEq, Eq, Debug, Copy, Clone, Default)]
pub enum IdEntry {
    #[default]
    None,
    Type,
    Variable,
    Constant,
    Function,
    Block,
    Undef,
    Extension,
}

/// A fully parsed SPIR-V shader module
///
/// Entities live in per-kind tables keyed by their id; `ids` tags which table
/// an id resolves in. Backends mutate the module in place, allocating new ids
/// with [Module::increase_bound_by].
#[derive(PartialEq, Debug, Clone)]
pub struct Module {
    pub ids: Vec<IdEntry>,
    pub types: HashMap<u32, SpirType>,
    pub variables: HashMap<u32, SpirVariable>,
    pub constants: HashMap<u32, SpirConstant>,
    pub functions: HashMap<u32, SpirFunction>,
    pub blocks: HashMap<u32, SpirBlock>,
    /// OpUndef id to type id
    pub undefs: HashMap<u32, u32>,
    pub extensions: HashMap<u32, ExtensionKind>,
    pub meta: HashMap<u32, Meta>,

    /// Function id of the entry point
    pub entry_point: u32,
    pub entry_point_name: String,
    pub execution_model: spv::ExecutionModel,
    /// Mask of declared execution modes, indexed by mode value
    pub execution_mode_flags: u64,
    pub workgroup_size: [u32; 3],
    /// Ids listed in the OpEntryPoint interface
    pub entry_interface: Vec<u32>,
    /// Module scope variable ids
    pub global_variables: Vec<u32>,
}

impl Module {
    pub fn new(bound: u32) -> Module {
        Module {
            ids: vec![IdEntry::None; bound as usize],
            types: HashMap::new(),
            variables: HashMap::new(),
            constants: HashMap::new(),
            functions: HashMap::new(),
            blocks: HashMap::new(),
            undefs: HashMap::new(),
            extensions: HashMap::new(),
            meta: HashMap::new(),
            entry_point: 0,
            entry_point_name: String::new(),
            execution_model: spv::ExecutionModel::GLCompute,
            execution_mode_flags: 0,
            workgroup_size: [1, 1, 1],
            entry_interface: Vec::new(),
            global_variables: Vec::new(),
        }
    }

    pub fn bound(&self) -> u32 {
        self.ids.len() as u32
    }

    /// Allocate a run of fresh ids and return the first
    pub fn increase_bound_by(&mut self, count: u32) -> u32 {
        let first = self.bound();
        self.ids
            .resize(self.ids.len() + count as usize, IdEntry::None);
        first
    }

    pub fn id_kind(&self, id: u32) -> IdEntry {
        self.ids.get(id as usize).copied().unwrap_or(IdEntry::None)
    }

    fn tag(&mut self, id: u32, kind: IdEntry) {
        if id as usize >= self.ids.len() {
            self.ids.resize(id as usize + 1, IdEntry::None);
        }
        self.ids[id as usize] = kind;
    }

    pub fn set_type(&mut self, id: u32, ty: SpirType) {
        self.tag(id, IdEntry::Type);
        self.types.insert(id, ty);
    }

    pub fn set_variable(&mut self, id: u32, var: SpirVariable) {
        self.tag(id, IdEntry::Variable);
        self.variables.insert(id, var);
    }

    pub fn set_constant(&mut self, id: u32, constant: SpirConstant) {
        self.tag(id, IdEntry::Constant);
        self.constants.insert(id, constant);
    }

    pub fn set_function(&mut self, id: u32, function: SpirFunction) {
        self.tag(id, IdEntry::Function);
        self.functions.insert(id, function);
    }

    pub fn set_block(&mut self, id: u32, block: SpirBlock) {
        self.tag(id, IdEntry::Block);
        self.blocks.insert(id, block);
    }

    pub fn set_undef(&mut self, id: u32, type_id: u32) {
        self.tag(id, IdEntry::Undef);
        self.undefs.insert(id, type_id);
    }

    pub fn set_extension(&mut self, id: u32, kind: ExtensionKind) {
        self.tag(id, IdEntry::Extension);
        self.extensions.insert(id, kind);
    }

    pub fn get_type(&self, id: u32) -> &SpirType {
        self.types.get(&id).expect("id is not a type")
    }

    pub fn get_type_mut(&mut self, id: u32) -> &mut SpirType {
        self.types.get_mut(&id).expect("id is not a type")
    }

    pub fn get_variable(&self, id: u32) -> &SpirVariable {
        self.variables.get(&id).expect("id is not a variable")
    }

    pub fn get_variable_mut(&mut self, id: u32) -> &mut SpirVariable {
        self.variables.get_mut(&id).expect("id is not a variable")
    }

    pub fn get_constant(&self, id: u32) -> &SpirConstant {
        self.constants.get(&id).expect("id is not a constant")
    }

    pub fn get_constant_mut(&mut self, id: u32) -> &mut SpirConstant {
        self.constants.get_mut(&id).expect("id is not a constant")
    }

    pub fn get_function(&self, id: u32) -> &SpirFunction {
        self.functions.get(&id).expect("id is not a function")
    }

    pub fn get_function_mut(&mut self, id: u32) -> &mut SpirFunction {
        self.functions.get_mut(&id).expect("id is not a function")
    }

    pub fn get_block(&self, id: u32) -> &SpirBlock {
        self.blocks.get(&id).expect("id is not a block")
    }

    pub fn get_block_mut(&mut self, id: u32) -> &mut SpirBlock {
        self.blocks.get_mut(&id).expect("id is not a block")
    }

    pub fn try_get_variable(&self, id: u32) -> Option<&SpirVariable> {
        self.variables.get(&id)
    }

    pub fn try_get_constant(&self, id: u32) -> Option<&SpirConstant> {
        self.constants.get(&id)
    }

    pub fn try_get_type(&self, id: u32) -> Option<&SpirType> {
        self.types.get(&id)
    }

    /// Metadata for an id, creating an empty record on first access
    pub fn meta_mut(&mut self, id: u32) -> &mut Meta {
        self.meta.entry(id).or_default()
    }

    pub fn meta(&self, id: u32) -> Option<&Meta> {
        self.meta.get(&id)
    }

    pub fn has_decoration(&self, id: u32, decoration: spv::Decoration) -> bool {
        self.meta(id)
            .map_or(false, |m| m.decoration.has(decoration))
    }

    pub fn has_member_decoration(&self, id: u32, index: u32, decoration: spv::Decoration) -> bool {
        self.meta(id)
            .and_then(|m| m.member(index))
            .map_or(false, |d| d.has(decoration))
    }

    /// Debug name of an id, or a generated placeholder when unnamed
    pub fn get_name(&self, id: u32) -> String {
        match self.meta(id) {
            Some(m) if !m.decoration.alias.is_empty() => m.decoration.alias.clone(),
            _ => format!("_{}", id),
        }
    }

    pub fn set_name(&mut self, id: u32, name: impl Into<String>) {
        self.meta_mut(id).decoration.alias = name.into();
    }

    pub fn get_member_name(&self, type_id: u32, index: u32) -> String {
        match self.meta(type_id).and_then(|m| m.member(index)) {
            Some(d) if !d.alias.is_empty() => d.alias.clone(),
            _ => format!("_m{}", index),
        }
    }

    pub fn set_member_name(&mut self, type_id: u32, index: u32, name: impl Into<String>) {
        self.meta_mut(type_id).member_mut(index).alias = name.into();
    }

    pub fn has_execution_mode(&self, mode: spv::ExecutionMode) -> bool {
        self.execution_mode_flags & (1u64 << mode as u32) != 0
    }

    /// Type of the value an id evaluates to
    ///
    /// Only ids that survive in the module tables are resolvable; expression
    /// ids minted during emission are tracked by the backend itself.
    pub fn try_get_value_type(&self, id: u32) -> Option<u32> {
        match self.id_kind(id) {
            IdEntry::Variable => Some(self.get_variable(id).basetype),
            IdEntry::Constant => Some(self.get_constant(id).constant_type),
            IdEntry::Undef => self.undefs.get(&id).copied(),
            _ => None,
        }
    }
}
