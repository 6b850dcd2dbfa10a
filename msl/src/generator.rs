//! Generate MSL source from a parsed SPIR-V module
//!
//! Emission runs over the module after the rewrite passes have reshaped it to
//! satisfy Metal semantics. Some facts are only discovered mid-emission (for
//! example a storage image turning out to be written to), in which case the
//! pass sets `force_recompile` and the driver restarts emission with the
//! refined decorations.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use smelt_ir::{spv, BaseType, IdEntry, Module, SpirType};

use crate::names::*;
use crate::preprocess::{preprocess_op_codes, SpvFuncImpl};
use crate::{CompileError, CompilerOptions, MslResourceBinding, MslVertexAttr, UNKNOWN_LOCATION};

mod common;
mod custom_functions;
mod extended;
mod instructions;

pub(crate) use common::CachedExpr;
pub(crate) use instructions::is_atomic_opcode;

/// Compiles one SPIR-V module to MSL source
///
/// A compiler owns its module and mutates it; construct one instance per
/// module and per thread.
pub struct Compiler {
    pub(crate) module: Module,
    pub(crate) options: CompilerOptions,

    pub(crate) vtx_attrs: Vec<MslVertexAttr>,
    pub(crate) vtx_attrs_by_location: HashMap<u32, usize>,
    pub(crate) resource_bindings: Vec<MslResourceBinding>,

    // Rewrite results that persist across emission passes
    pub(crate) spv_function_implementations: BTreeSet<SpvFuncImpl>,
    pub(crate) non_stage_in_input_var_ids: BTreeMap<u32, u32>,
    pub(crate) struct_member_padding: HashMap<(u32, u32), u32>,
    pub(crate) packed_types: HashSet<u32>,
    pub(crate) packed_members: HashSet<(u32, u32)>,
    pub(crate) function_global_vars: HashMap<u32, BTreeSet<u32>>,
    pub(crate) stage_in_var_id: u32,
    pub(crate) stage_out_var_id: u32,
    pub(crate) stage_uniforms_var_id: u32,
    pub(crate) qual_pos_var_name: String,
    pub(crate) needs_vertex_idx_arg: bool,
    pub(crate) needs_instance_idx_arg: bool,
    pub(crate) accessed_variables: HashSet<u32>,
    pub(crate) active_input_builtins: u64,
    pub(crate) active_output_builtins: u64,
    pub(crate) pragma_lines: BTreeSet<String>,
    pub(crate) header_lines: Vec<String>,

    // Emission state cleared at the start of every pass
    pub(crate) buffer: String,
    pub(crate) indent: u32,
    pub(crate) exprs: HashMap<u32, CachedExpr>,
    pub(crate) invalid_expressions: HashSet<u32>,
    /// Survives across passes so a restarted emission pins the offending
    /// expressions from the start
    pub(crate) forced_temporaries: HashSet<u32>,
    pub(crate) emitted_functions: HashSet<u32>,
    pub(crate) next_buffer_index: u32,
    pub(crate) next_texture_index: u32,
    pub(crate) next_sampler_index: u32,
    pub(crate) processing_entry_point: bool,
    pub(crate) current_function: u32,
    pub(crate) force_recompile: bool,
    pub(crate) previous_instruction_opcode: Option<spv::Op>,
}

impl Compiler {
    pub fn new(module: Module, options: CompilerOptions) -> Compiler {
        Compiler {
            module,
            options,
            vtx_attrs: Vec::new(),
            vtx_attrs_by_location: HashMap::new(),
            resource_bindings: Vec::new(),
            spv_function_implementations: BTreeSet::new(),
            non_stage_in_input_var_ids: BTreeMap::new(),
            struct_member_padding: HashMap::new(),
            packed_types: HashSet::new(),
            packed_members: HashSet::new(),
            function_global_vars: HashMap::new(),
            stage_in_var_id: 0,
            stage_out_var_id: 0,
            stage_uniforms_var_id: 0,
            qual_pos_var_name: String::new(),
            needs_vertex_idx_arg: false,
            needs_instance_idx_arg: false,
            accessed_variables: HashSet::new(),
            active_input_builtins: 0,
            active_output_builtins: 0,
            pragma_lines: BTreeSet::new(),
            header_lines: Vec::new(),
            buffer: String::new(),
            indent: 0,
            exprs: HashMap::new(),
            invalid_expressions: HashSet::new(),
            forced_temporaries: HashSet::new(),
            emitted_functions: HashSet::new(),
            next_buffer_index: 0,
            next_texture_index: 0,
            next_sampler_index: 0,
            processing_entry_point: false,
            current_function: 0,
            force_recompile: false,
            previous_instruction_opcode: None,
        }
    }

    /// Provide the vertex attribute layout the application binds with
    pub fn set_vertex_attributes(&mut self, attrs: Vec<MslVertexAttr>) {
        self.vtx_attrs_by_location = attrs
            .iter()
            .enumerate()
            .map(|(index, attr)| (attr.location, index))
            .collect();
        self.vtx_attrs = attrs;
    }

    /// Provide the resource binding layout the application binds with
    pub fn set_resource_bindings(&mut self, bindings: Vec<MslResourceBinding>) {
        self.resource_bindings = bindings;
    }

    /// Attribute records with `used_by_shader` reflecting the compiled shader
    pub fn vertex_attributes(&self) -> &[MslVertexAttr] {
        &self.vtx_attrs
    }

    /// Binding records with `used_by_shader` reflecting the compiled shader
    pub fn bindings(&self) -> &[MslResourceBinding] {
        &self.resource_bindings
    }

    /// Compile the module to MSL source
    ///
    /// Runs the rewrite passes once, then iterates emission until the output
    /// settles. Decorations refined mid-pass restart emission; more than three
    /// passes means the refinement is not converging.
    pub fn compile(&mut self) -> Result<String, CompileError> {
        self.replace_illegal_names();

        self.non_stage_in_input_var_ids.clear();
        self.struct_member_padding.clear();

        self.update_active_interface();
        self.fixup_image_load_store_access();

        // Decide which helper functions and pragmas the output needs
        let preproc = preprocess_op_codes(&self.module);
        self.spv_function_implementations = preproc.function_implementations;
        if preproc.suppress_missing_prototypes {
            self.add_pragma_line("#pragma clang diagnostic ignored \"-Wmissing-prototypes\"");
        }
        if preproc.uses_atomics {
            self.add_header_line("#include <metal_atomic>");
            self.add_pragma_line("#pragma clang diagnostic ignored \"-Wunused-variable\"");
        }

        // Create structs to hold input, output and uniform variables
        self.qual_pos_var_name.clear();
        self.stage_in_var_id = self.add_interface_block(spv::StorageClass::Input)?;
        self.stage_out_var_id = self.add_interface_block(spv::StorageClass::Output)?;
        self.stage_uniforms_var_id = self.add_interface_block(spv::StorageClass::UniformConstant)?;

        // Convert the use of global variables to recursively-passed function
        // parameters
        self.localize_global_variables();
        self.extract_global_variables_from_functions();

        // Mark any non-stage-in structs to be tightly packed
        self.mark_packable_structs();

        // Metal does not allow dynamic array lengths
        if self.options.resolve_specialized_array_lengths {
            self.resolve_specialized_array_lengths();
        }

        let mut pass_count = 0;
        loop {
            if pass_count >= 3 {
                return Err(CompileError::CompilationOverflow);
            }

            self.reset();

            // Start auto-assigned bindings at zero on every pass
            self.next_buffer_index = 0;
            self.next_texture_index = 0;
            self.next_sampler_index = 0;

            self.emit_header();
            self.emit_specialization_constants()?;
            self.emit_resources()?;
            self.emit_custom_functions();
            self.emit_function(self.module.entry_point)?;

            pass_count += 1;
            if !self.force_recompile {
                break;
            }
        }

        Ok(std::mem::take(&mut self.buffer))
    }

    /// Clear all state scoped to a single emission pass; forced temporaries
    /// deliberately survive so the next pass materializes them early
    fn reset(&mut self) {
        self.buffer.clear();
        self.indent = 0;
        self.exprs.clear();
        self.invalid_expressions.clear();
        self.emitted_functions.clear();
        self.processing_entry_point = false;
        self.current_function = 0;
        self.force_recompile = false;
        self.previous_instruction_opcode = None;
    }

    // ------------------------------------------------------------------
    // Output buffer

    pub(crate) fn statement(&mut self, line: impl AsRef<str>) {
        let line = line.as_ref();
        if !line.is_empty() {
            for _ in 0..self.indent {
                self.buffer.push_str("    ");
            }
            self.buffer.push_str(line);
        }
        self.buffer.push('\n');
    }

    pub(crate) fn begin_scope(&mut self) {
        self.statement("{");
        self.indent += 1;
    }

    pub(crate) fn end_scope(&mut self) {
        self.indent -= 1;
        self.statement("}");
    }

    pub(crate) fn end_scope_decl(&mut self) {
        self.indent -= 1;
        self.statement("};");
    }

    pub(crate) fn add_pragma_line(&mut self, line: &str) {
        self.pragma_lines.insert(String::from(line));
    }

    pub(crate) fn add_header_line(&mut self, line: &str) {
        let line = String::from(line);
        if !self.header_lines.contains(&line) {
            self.header_lines.push(line);
        }
    }

    fn emit_header(&mut self) {
        for pragma in self.pragma_lines.clone() {
            self.statement(pragma);
        }
        if !self.pragma_lines.is_empty() {
            self.statement("");
        }

        self.statement("#include <metal_stdlib>");
        self.statement("#include <simd/simd.h>");

        for header in self.header_lines.clone() {
            self.statement(header);
        }

        self.statement("");
        self.statement("using namespace metal;");
        self.statement("");
    }

    // ------------------------------------------------------------------
    // Active interface analysis

    /// Record which variables and built-ins reachable code touches
    fn update_active_interface(&mut self) {
        self.accessed_variables.clear();
        self.active_input_builtins = 0;
        self.active_output_builtins = 0;

        let mut visited = HashSet::new();
        let mut accessed = HashSet::new();
        self.collect_accessed_variables(self.module.entry_point, &mut visited, &mut accessed);

        let mut activated = Vec::new();
        for var_id in &accessed {
            let var = self.module.get_variable(*var_id);
            let storage = var.storage;
            if let Some(meta) = self.module.meta(*var_id) {
                if let Some(builtin) = meta.decoration.builtin_type {
                    activated.push((builtin, storage));
                }
            }

            // A block variable activates the built-ins of its members
            let ty = self.module.get_type(var.basetype);
            if ty.basetype == BaseType::Struct {
                if let Some(meta) = self.module.meta(ty.self_id) {
                    for member in &meta.members {
                        if let Some(builtin) = member.builtin_type {
                            activated.push((builtin, storage));
                        }
                    }
                }
            }
        }
        for (builtin, storage) in activated {
            self.activate_builtin(builtin, storage);
        }

        self.accessed_variables = accessed;
    }

    /// Start storage images out with no known access; the emitter widens the
    /// decorations as reads and writes are discovered
    fn fixup_image_load_store_access(&mut self) {
        for id in 0..self.module.bound() {
            if self.module.id_kind(id) != IdEntry::Variable {
                continue;
            }
            let type_id = self.module.get_variable(id).basetype;
            let ty = self.module.get_type(type_id);
            if ty.basetype != BaseType::Image || ty.image.sampled != 2 {
                continue;
            }
            let has_access = self.module.has_decoration(id, spv::Decoration::NonWritable)
                || self.module.has_decoration(id, spv::Decoration::NonReadable);
            if !has_access {
                let dec = &mut self.module.meta_mut(id).decoration;
                dec.set_flag(spv::Decoration::NonWritable);
                dec.set_flag(spv::Decoration::NonReadable);
            }
        }
    }

    fn activate_builtin(&mut self, builtin: spv::BuiltIn, storage: spv::StorageClass) {
        let bit = 1u64 << builtin as u32;
        match storage {
            spv::StorageClass::Input => self.active_input_builtins |= bit,
            spv::StorageClass::Output => self.active_output_builtins |= bit,
            _ => {}
        }
    }

    fn collect_accessed_variables(
        &self,
        func_id: u32,
        visited: &mut HashSet<u32>,
        accessed: &mut HashSet<u32>,
    ) {
        if !visited.insert(func_id) {
            return;
        }

        let func = self.module.get_function(func_id);
        for block_id in &func.blocks {
            let block = self.module.get_block(*block_id);
            for instruction in &block.ops {
                let ops = &instruction.operands;
                let mut note = |id: u32| {
                    if self.module.id_kind(id) == IdEntry::Variable {
                        accessed.insert(id);
                    }
                };
                match instruction.opcode() {
                    Some(spv::Op::Load) | Some(spv::Op::AccessChain)
                    | Some(spv::Op::InBoundsAccessChain) => {
                        if ops.len() > 2 {
                            note(ops[2]);
                        }
                    }
                    Some(spv::Op::Store) | Some(spv::Op::AtomicStore) => {
                        if !ops.is_empty() {
                            note(ops[0]);
                        }
                    }
                    Some(spv::Op::CopyMemory) => {
                        if ops.len() > 1 {
                            note(ops[0]);
                            note(ops[1]);
                        }
                    }
                    Some(spv::Op::FunctionCall) => {
                        for arg in ops.iter().skip(3) {
                            note(*arg);
                        }
                    }
                    _ => {
                        // Atomics and image ops address their resource through
                        // a pointer in the standard slot
                        if instruction
                            .opcode()
                            .map_or(false, instructions::is_atomic_opcode)
                            && ops.len() > 2
                        {
                            note(ops[2]);
                        }
                    }
                }
            }
        }

        for block_id in &func.blocks {
            let block = self.module.get_block(*block_id);
            for instruction in &block.ops {
                if instruction.opcode() == Some(spv::Op::FunctionCall) {
                    self.collect_accessed_variables(instruction.operands[2], visited, accessed);
                }
            }
        }
    }

    pub(crate) fn has_active_builtin(&self, builtin: spv::BuiltIn, storage: spv::StorageClass) -> bool {
        let bit = 1u64 << builtin as u32;
        match storage {
            spv::StorageClass::Input => self.active_input_builtins & bit != 0,
            spv::StorageClass::Output => self.active_output_builtins & bit != 0,
            _ => false,
        }
    }

    /// Whether a variable takes part in the entry point interface
    pub(crate) fn interface_variable_exists_in_entry_point(&self, id: u32) -> bool {
        self.module.entry_interface.contains(&id)
    }

    pub(crate) fn is_builtin_variable(&self, id: u32) -> bool {
        self.module.has_decoration(id, spv::Decoration::BuiltIn)
    }

    /// Variables that reachable code never touches, or inactive built-ins, are
    /// hidden from the generated source
    pub(crate) fn is_hidden_variable(&self, id: u32, include_builtins: bool) -> bool {
        if self.is_builtin_variable(id) && !include_builtins {
            return true;
        }

        let storage = self.module.get_variable(id).storage;
        matches!(
            storage,
            spv::StorageClass::Input
                | spv::StorageClass::Output
                | spv::StorageClass::Uniform
                | spv::StorageClass::UniformConstant
                | spv::StorageClass::PushConstant
                | spv::StorageClass::StorageBuffer
        ) && !self.accessed_variables.contains(&id)
    }

    // ------------------------------------------------------------------
    // Names

    /// Name of an id; inside the entry function flattened interface entities
    /// resolve through their rewritten qualified reference
    pub(crate) fn to_name(&self, id: u32) -> String {
        if self.current_function == self.module.entry_point {
            if let Some(meta) = self.module.meta(id) {
                if !meta.decoration.qualified_alias.is_empty() {
                    return meta.decoration.qualified_alias.clone();
                }
            }
        }
        self.module.get_name(id)
    }

    pub(crate) fn to_member_name(&self, type_id: u32, index: u32) -> String {
        self.module.get_member_name(type_id, index)
    }

    /// Name combining the struct and member names, except for built-ins which
    /// keep their unique canonical name
    pub(crate) fn to_qualified_member_name(&self, struct_type: &SpirType, index: u32) -> String {
        if let Some(builtin) = self.member_builtin(struct_type.self_id, index) {
            return self.builtin_to_msl(builtin, struct_type.storage);
        }

        let mbr_name = self.to_member_name(struct_type.self_id, index);
        let stripped = mbr_name.trim_start_matches('_');
        format!("{}_{}", self.module.get_name(struct_type.self_id), stripped)
    }

    pub(crate) fn member_builtin(&self, type_id: u32, index: u32) -> Option<spv::BuiltIn> {
        let member = self.module.meta(type_id)?.member(index)?;
        if member.has(spv::Decoration::BuiltIn) {
            member.builtin_type
        } else {
            None
        }
    }

    pub(crate) fn entry_point_name(&self) -> String {
        self.module.get_name(self.module.entry_point)
    }

    // ------------------------------------------------------------------
    // Specialization constants

    fn emit_specialization_constants(&mut self) -> Result<(), CompileError> {
        let mut spec_const_ids = Vec::new();
        let mut workgroup_size_id = 0;
        for id in 0..self.module.bound() {
            if self.module.id_kind(id) != IdEntry::Constant {
                continue;
            }
            if !self.module.get_constant(id).specialization {
                continue;
            }
            if self.module.meta(id).and_then(|m| m.decoration.builtin_type)
                == Some(spv::BuiltIn::WorkgroupSize)
            {
                workgroup_size_id = id;
            } else {
                spec_const_ids.push(id);
            }
        }

        for id in &spec_const_ids {
            let constant = self.module.get_constant(*id).clone();
            let ty = self.module.get_type(constant.constant_type).clone();
            let sc_type_name = self.type_to_msl(&ty, 0)?;
            let sc_name = self.to_name(*id);
            let spec_id = self
                .module
                .meta(*id)
                .map_or(0, |m| m.decoration.spec_id);

            if ty.is_scalar() {
                // Only scalar, non-composite values can be function constants
                let sc_tmp_name = format!("{}_tmp", sc_name);
                self.statement(format!(
                    "constant {} {} [[function_constant({})]];",
                    sc_type_name, sc_tmp_name, spec_id
                ));
                let default = self.constant_expression(*id)?;
                self.statement(format!(
                    "constant {} {} = is_function_constant_defined({}) ? {} : {};",
                    sc_type_name, sc_name, sc_tmp_name, sc_tmp_name, default
                ));
            } else {
                // Composite specialization constants are built from their
                // scalar components
                let value = self.constant_expression(*id)?;
                self.statement(format!("constant {} {} = {};", sc_type_name, sc_name, value));
            }
        }

        if workgroup_size_id != 0 {
            let value = self.constant_expression(workgroup_size_id)?;
            self.statement(format!("constant uint3 gl_WorkGroupSize = {};", value));
        }

        if !spec_const_ids.is_empty() || workgroup_size_id != 0 {
            self.statement("");
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Resources

    /// Undefined values are not allowed at global scope in MSL; declare them
    /// as zero-filled constants
    fn declare_undefined_values(&mut self) -> Result<(), CompileError> {
        let mut emitted = false;
        for id in 0..self.module.bound() {
            if self.module.id_kind(id) != IdEntry::Undef {
                continue;
            }
            let type_id = self.module.undefs[&id];
            let ty = self.module.get_type(type_id).clone();
            let type_name = self.type_to_msl(&ty, 0)?;
            let array = self.type_to_array_msl(&ty);
            let name = self.to_name(id);
            self.statement(format!("constant {} {}{} = {{}};", type_name, name, array));
            emitted = true;
        }

        if emitted {
            self.statement("");
        }
        Ok(())
    }

    fn emit_resources(&mut self) -> Result<(), CompileError> {
        // Output non-interface structs. These include local function structs
        // and structs nested within uniform and read-write buffers.
        let mut declared_structs = HashSet::new();
        for id in 0..self.module.bound() {
            if self.module.id_kind(id) != IdEntry::Type {
                continue;
            }
            let ty = self.module.get_type(id);

            let is_struct = ty.basetype == BaseType::Struct && ty.array.is_empty();
            let is_block = self.module.has_decoration(ty.self_id, spv::Decoration::Block)
                || self
                    .module
                    .has_decoration(ty.self_id, spv::Decoration::BufferBlock);
            let is_basic_struct = is_struct && !ty.pointer && !is_block;

            let is_interface = matches!(
                ty.storage,
                spv::StorageClass::Input
                    | spv::StorageClass::Output
                    | spv::StorageClass::UniformConstant
            );
            let is_non_interface_block = is_struct && ty.pointer && is_block && !is_interface;

            if !(is_basic_struct || is_non_interface_block) {
                continue;
            }

            // Emit each declarable struct only once, through its first alias
            let struct_id = ty.self_id;
            if !declared_structs.insert(struct_id) {
                continue;
            }

            if self.is_packed_type(struct_id) {
                self.align_struct(struct_id)?;
            }

            self.emit_struct(struct_id)?;
        }

        self.declare_undefined_values()?;

        // Output interface structs
        self.emit_interface_block(self.stage_in_var_id)?;
        for var_id in self.non_stage_in_input_var_ids.values().copied().collect::<Vec<_>>() {
            self.emit_interface_block(var_id)?;
        }
        self.emit_interface_block(self.stage_out_var_id)?;
        self.emit_interface_block(self.stage_uniforms_var_id)?;

        Ok(())
    }

    fn emit_interface_block(&mut self, ib_var_id: u32) -> Result<(), CompileError> {
        if ib_var_id == 0 {
            return Ok(());
        }

        let type_id = self.module.get_variable(ib_var_id).basetype;
        let struct_id = self.module.get_type(type_id).self_id;
        let member_count = self.module.get_type(struct_id).member_types.len();
        if member_count > 0 {
            self.emit_struct(struct_id)?;
        }
        Ok(())
    }

    fn emit_struct(&mut self, struct_id: u32) -> Result<(), CompileError> {
        let name = self.module.get_name(struct_id);
        self.statement(format!("struct {}", name));
        self.begin_scope();

        let member_types = self.module.get_type(struct_id).member_types.clone();
        for (index, member_type_id) in member_types.iter().enumerate() {
            self.emit_struct_member(struct_id, *member_type_id, index as u32)?;
        }

        self.end_scope_decl();
        self.statement("");
        Ok(())
    }

    /// Emit one member, inserting padding and packing to keep the memory
    /// layout the SPIR-V declared
    fn emit_struct_member(
        &mut self,
        struct_id: u32,
        member_type_id: u32,
        index: u32,
    ) -> Result<(), CompileError> {
        let pad_len = self
            .struct_member_padding
            .get(&(struct_id, index))
            .copied()
            .unwrap_or(0);
        if pad_len > 0 {
            self.statement(format!("char pad{}[{}];", index, pad_len));
        }

        let member_type = self.module.get_type(member_type_id).clone();
        let pack_prefix = if self.is_packed_member(struct_id, index) {
            "packed_"
        } else {
            ""
        };

        let type_name = self.type_to_msl(&member_type, 0)?;
        let member_name = self.to_member_name(struct_id, index);
        let qualifier = self.member_attribute_qualifier(struct_id, index);
        let array = self.type_to_array_msl(&member_type);

        self.statement(format!(
            "{}{} {}{}{};",
            pack_prefix, type_name, member_name, qualifier, array
        ));
        Ok(())
    }

    /// MSL function attribute qualifier for an interface struct member,
    /// depending on shader stage, data direction and built-in role
    fn member_attribute_qualifier(&self, struct_id: u32, index: u32) -> String {
        let storage = self.module.get_type(struct_id).storage;
        let execution = self.module.execution_model;
        let builtin = self.member_builtin(struct_id, index);

        // Vertex function inputs
        if execution == spv::ExecutionModel::Vertex && storage == spv::StorageClass::Input {
            if let Some(builtin) = builtin {
                return match builtin {
                    spv::BuiltIn::VertexId
                    | spv::BuiltIn::VertexIndex
                    | spv::BuiltIn::InstanceId
                    | spv::BuiltIn::InstanceIndex => {
                        format!(" [[{}]]", self.builtin_qualifier(builtin))
                    }
                    _ => String::new(),
                };
            }
            let locn = self.get_ordered_member_location(struct_id, index);
            if locn != UNKNOWN_LOCATION {
                return format!(" [[attribute({})]]", locn);
            }
        }

        // Vertex function outputs
        if execution == spv::ExecutionModel::Vertex && storage == spv::StorageClass::Output {
            if let Some(builtin) = builtin {
                return match builtin {
                    spv::BuiltIn::PointSize => {
                        // Only mark the point size builtin when the app really
                        // renders points; Metal rejects it for other
                        // topologies
                        if self.options.enable_point_size_builtin {
                            format!(" [[{}]]", self.builtin_qualifier(builtin))
                        } else {
                            String::new()
                        }
                    }
                    spv::BuiltIn::Position
                    | spv::BuiltIn::Layer
                    | spv::BuiltIn::ClipDistance => {
                        format!(" [[{}]]", self.builtin_qualifier(builtin))
                    }
                    _ => String::new(),
                };
            }
            let locn = self.get_ordered_member_location(struct_id, index);
            if locn != UNKNOWN_LOCATION {
                return format!(" [[user(locn{})]]", locn);
            }
        }

        // Fragment function inputs
        if execution == spv::ExecutionModel::Fragment && storage == spv::StorageClass::Input {
            if let Some(builtin) = builtin {
                return match builtin {
                    spv::BuiltIn::FrontFacing
                    | spv::BuiltIn::PointCoord
                    | spv::BuiltIn::FragCoord
                    | spv::BuiltIn::SampleId
                    | spv::BuiltIn::SampleMask
                    | spv::BuiltIn::Layer => {
                        format!(" [[{}]]", self.builtin_qualifier(builtin))
                    }
                    _ => String::new(),
                };
            }
            let locn = self.get_ordered_member_location(struct_id, index);
            if locn != UNKNOWN_LOCATION {
                return format!(" [[user(locn{})]]", locn);
            }
        }

        // Fragment function outputs
        if execution == spv::ExecutionModel::Fragment && storage == spv::StorageClass::Output {
            if let Some(builtin) = builtin {
                return match builtin {
                    spv::BuiltIn::SampleMask | spv::BuiltIn::FragDepth => {
                        format!(" [[{}]]", self.builtin_qualifier(builtin))
                    }
                    _ => String::new(),
                };
            }
            let locn = self.get_ordered_member_location(struct_id, index);
            if locn != UNKNOWN_LOCATION {
                return format!(" [[color({})]]", locn);
            }
        }

        // Compute function inputs
        if execution == spv::ExecutionModel::GLCompute && storage == spv::StorageClass::Input {
            if let Some(builtin) = builtin {
                return match builtin {
                    spv::BuiltIn::GlobalInvocationId
                    | spv::BuiltIn::WorkgroupId
                    | spv::BuiltIn::NumWorkgroups
                    | spv::BuiltIn::LocalInvocationId
                    | spv::BuiltIn::LocalInvocationIndex => {
                        format!(" [[{}]]", self.builtin_qualifier(builtin))
                    }
                    _ => String::new(),
                };
            }
        }

        String::new()
    }

    /// Location of a member, assuming location order when undecorated
    fn get_ordered_member_location(&self, type_id: u32, index: u32) -> u32 {
        if let Some(member) = self.module.meta(type_id).and_then(|m| m.member(index)) {
            if member.has(spv::Decoration::Location) {
                return member.location;
            }
        }
        index
    }

    // ------------------------------------------------------------------
    // Functions

    /// Emit a function, recursively emitting the functions it calls first so
    /// the single-file output needs no forward declarations
    pub(crate) fn emit_function(&mut self, func_id: u32) -> Result<(), CompileError> {
        if !self.emitted_functions.insert(func_id) {
            return Ok(());
        }

        let block_ids = self.module.get_function(func_id).blocks.clone();
        for block_id in &block_ids {
            let calls: Vec<u32> = self
                .module
                .get_block(*block_id)
                .ops
                .iter()
                .filter(|i| i.opcode() == Some(spv::Op::FunctionCall))
                .map(|i| i.operands[2])
                .collect();
            for callee in calls {
                self.emit_function(callee)?;
            }
        }

        let previous_function = self.current_function;
        self.current_function = func_id;
        self.emit_function_prototype(func_id)?;
        self.begin_scope();

        // Declare block scope variables up front
        let local_variables = self.module.get_function(func_id).local_variables.clone();
        for var_id in local_variables {
            self.emit_local_variable(var_id)?;
        }

        let entry_block = self
            .module
            .get_function(func_id)
            .blocks
            .first()
            .copied()
            .ok_or_else(|| CompileError::InvalidOpcodeArg(String::from("function has no body")))?;
        let mut frames = Vec::new();
        self.emit_block_chain(entry_block, &mut frames)?;

        self.end_scope();
        self.statement("");
        self.current_function = previous_function;
        Ok(())
    }

    fn emit_local_variable(&mut self, var_id: u32) -> Result<(), CompileError> {
        let var = self.module.get_variable(var_id).clone();
        let ty = self.module.get_type(var.basetype).clone();
        let mut type_name = self.type_to_msl(&ty, 0)?;
        // Relocated workgroup variables keep their threadgroup residency
        if ty.storage == spv::StorageClass::Workgroup {
            type_name = format!("threadgroup {}", type_name);
        }
        let array = self.type_to_array_msl(&ty);
        let name = self.module.get_name(var_id);

        if var_id == self.stage_out_var_id {
            // The output interface block starts zero initialized
            self.statement(format!("{} {}{} = {{}};", type_name, name, array));
        } else if var.initializer != 0
            && self.module.id_kind(var.initializer) == IdEntry::Constant
        {
            let init = self.constant_expression(var.initializer)?;
            self.statement(format!("{} {}{} = {};", type_name, name, array, init));
        } else {
            self.statement(format!("{} {}{};", type_name, name, array));
        }
        Ok(())
    }

    /// Emit the declaration line of a function, expanding Metal specific
    /// return value and arguments for the entry point
    fn emit_function_prototype(&mut self, func_id: u32) -> Result<(), CompileError> {
        self.processing_entry_point = func_id == self.module.entry_point;

        let func = self.module.get_function(func_id).clone();
        let mut decl = self.func_type_decl(func.return_type)?;
        decl.push(' ');
        decl.push_str(&self.module.get_name(func_id));
        decl.push('(');

        let mut args = Vec::new();
        if self.processing_entry_point {
            let entry_args = self.entry_point_args()?;
            if !entry_args.is_empty() {
                args.push(entry_args);
            }
        }

        for arg in &func.arguments {
            let address_space = match self.module.try_get_variable(arg.id) {
                Some(var) => self.get_argument_address_space(var.self_id),
                None => String::from("thread"),
            };

            let mut arg_decl = format!("{} {}", address_space, self.argument_decl(arg)?);

            // Manufacture automatic sampler arg for SampledImage texture
            let arg_type = self.module.get_type(arg.type_id);
            if arg_type.basetype == BaseType::SampledImage
                && arg_type.image.dim != spv::Dim::DimBuffer
            {
                arg_decl.push_str(&format!(
                    ", thread const sampler& {}",
                    self.to_sampler_expression(arg.id)?
                ));
            }

            args.push(arg_decl);
        }

        decl.push_str(&args.join(", "));
        decl.push(')');
        self.statement(decl);
        Ok(())
    }

    /// Return type spelling, with the entry kind keyword prefixed for the
    /// entry point
    fn func_type_decl(&mut self, return_type: u32) -> Result<String, CompileError> {
        let ty = self.module.get_type(return_type).clone();
        let mut return_name = self.type_to_msl(&ty, 0)?;
        if !self.processing_entry_point {
            return Ok(return_name);
        }

        // An outgoing interface block overrides the entry point return type
        if self.stage_out_var_id != 0 {
            let out_type_id = self.module.get_variable(self.stage_out_var_id).basetype;
            let out_type = self.module.get_type(out_type_id).clone();
            return_name = self.type_to_msl(&out_type, 0)?;
        }

        let entry_type = match self.module.execution_model {
            spv::ExecutionModel::Vertex => "vertex",
            spv::ExecutionModel::Fragment => {
                if self
                    .module
                    .has_execution_mode(spv::ExecutionMode::EarlyFragmentTests)
                {
                    "fragment [[ early_fragment_tests ]]"
                } else {
                    "fragment"
                }
            }
            spv::ExecutionModel::GLCompute | spv::ExecutionModel::Kernel => "kernel",
            _ => "unknown",
        };

        Ok(format!("{} {}", entry_type, return_name))
    }

    /// Address space for a function argument
    ///
    /// Read-only uniform-style structs live in the constant space, writable
    /// buffers in device, everything else is thread local.
    fn get_argument_address_space(&self, var_id: u32) -> String {
        let var = self.module.get_variable(var_id);
        let ty = self.module.get_type(var.basetype);

        if ty.basetype == BaseType::Struct {
            match ty.storage {
                spv::StorageClass::StorageBuffer => return String::from("device"),
                spv::StorageClass::Uniform
                | spv::StorageClass::UniformConstant
                | spv::StorageClass::PushConstant => {
                    let writable = self
                        .module
                        .has_decoration(ty.self_id, spv::Decoration::BufferBlock)
                        && !self
                            .module
                            .has_decoration(var.self_id, spv::Decoration::NonWritable);
                    return String::from(if writable { "device" } else { "constant" });
                }
                _ => {}
            }
        }

        String::from("thread")
    }

    /// Declaration of one non-entry function argument
    fn argument_decl(&mut self, arg: &smelt_ir::FunctionParameter) -> Result<String, CompileError> {
        let var = self.module.get_variable(arg.id).clone();
        let ty = self.module.get_type(arg.type_id).clone();
        let constref = !arg.alias_global_variable && !ty.pointer;

        let pointer = ty.storage == spv::StorageClass::UniformConstant;

        let mut decl = String::new();
        if constref {
            decl.push_str("const ");
        }

        if let Some(builtin) = self
            .module
            .meta(arg.id)
            .and_then(|m| m.decoration.builtin_type)
        {
            decl.push_str(self.builtin_type_decl(builtin));
        } else {
            decl.push_str(&self.type_to_msl(&ty, arg.id)?);
        }

        if ty.is_array() {
            decl.push('*');
        } else if !pointer {
            decl.push('&');
        }

        decl.push(' ');
        decl.push_str(&self.module.get_name(var.self_id));

        Ok(decl)
    }

    /// Compose the Metal specific argument list of the entry point
    fn entry_point_args(&mut self) -> Result<String, CompileError> {
        let mut ep_args: Vec<String> = Vec::new();

        // Stage-in structure, unless every input diverted elsewhere
        if self.stage_in_var_id != 0 {
            let var = self.module.get_variable(self.stage_in_var_id).clone();
            let ty = self.module.get_type(var.basetype).clone();
            if !self.module.get_type(ty.self_id).member_types.is_empty() {
                let type_name = self.type_to_msl(&ty, 0)?;
                ep_args.push(format!(
                    "{} {} [[stage_in]]",
                    type_name,
                    self.module.get_name(var.self_id)
                ));
            }
        }

        // Non-stage-in vertex attribute structures
        for (buffer_index, var_id) in self.non_stage_in_input_var_ids.clone() {
            let var = self.module.get_variable(var_id).clone();
            let ty = self.module.get_type(var.basetype).clone();
            let type_name = self.type_to_msl(&ty, 0)?;
            ep_args.push(format!(
                "device {}* {} [[buffer({})]]",
                type_name,
                self.module.get_name(var.self_id),
                buffer_index
            ));
        }

        // Uniforms and other bound resources
        for id in 0..self.module.bound() {
            if self.module.id_kind(id) != IdEntry::Variable {
                continue;
            }
            let var = self.module.get_variable(id).clone();
            let ty = self.module.get_type(var.basetype).clone();

            let is_uniform_kind = matches!(
                var.storage,
                spv::StorageClass::Uniform
                    | spv::StorageClass::UniformConstant
                    | spv::StorageClass::PushConstant
                    | spv::StorageClass::StorageBuffer
            );

            if is_uniform_kind && !self.is_hidden_variable(id, false) {
                match ty.basetype {
                    BaseType::Struct => {
                        let member_count = self
                            .module
                            .get_type(ty.self_id)
                            .member_types
                            .len();
                        if member_count == 0 {
                            continue;
                        }
                        let space = self.get_argument_address_space(id);
                        let type_name = self.type_to_msl(&ty, 0)?;
                        let index = self.get_metal_resource_index(id, BaseType::Struct);
                        ep_args.push(format!(
                            "{} {}& {} [[buffer({})]]",
                            space,
                            type_name,
                            self.module.get_name(id),
                            index
                        ));
                    }
                    BaseType::Sampler => {
                        let type_name = self.type_to_msl(&ty, 0)?;
                        let index = self.get_metal_resource_index(id, BaseType::Sampler);
                        ep_args.push(format!(
                            "{} {} [[sampler({})]]",
                            type_name,
                            self.module.get_name(id),
                            index
                        ));
                    }
                    BaseType::Image => {
                        let type_name = self.type_to_msl(&ty, id)?;
                        let index = self.get_metal_resource_index(id, BaseType::Image);
                        ep_args.push(format!(
                            "{} {} [[texture({})]]",
                            type_name,
                            self.module.get_name(id),
                            index
                        ));
                    }
                    BaseType::SampledImage => {
                        let type_name = self.type_to_msl(&ty, id)?;
                        let index = self.get_metal_resource_index(id, BaseType::Image);
                        let mut arg = format!(
                            "{} {} [[texture({})]]",
                            type_name,
                            self.module.get_name(id),
                            index
                        );
                        if ty.image.dim != spv::Dim::DimBuffer {
                            let sampler_index =
                                self.get_metal_resource_index(id, BaseType::Sampler);
                            arg.push_str(&format!(
                                ", sampler {} [[sampler({})]]",
                                self.to_sampler_expression(id)?,
                                sampler_index
                            ));
                        }
                        ep_args.push(arg);
                    }
                    _ => {}
                }
            }

            // Built-in inputs consumed directly by the shader
            if var.storage == spv::StorageClass::Input && self.is_builtin_variable(id) {
                if let Some(builtin) = self
                    .module
                    .meta(id)
                    .and_then(|m| m.decoration.builtin_type)
                {
                    ep_args.push(format!(
                        "{} {} [[{}]]",
                        self.builtin_type_decl(builtin),
                        self.builtin_to_msl(builtin, spv::StorageClass::Input),
                        self.builtin_qualifier(builtin)
                    ));
                }
            }
        }

        // Vertex and instance index built-ins demanded by secondary input
        // buffers
        if self.needs_vertex_idx_arg {
            ep_args.push(self.built_in_func_arg(spv::BuiltIn::VertexIndex));
        }
        if self.needs_instance_idx_arg {
            ep_args.push(self.built_in_func_arg(spv::BuiltIn::InstanceIndex));
        }

        Ok(ep_args.join(", "))
    }

    fn built_in_func_arg(&self, builtin: spv::BuiltIn) -> String {
        format!(
            "{} {} [[{}]]",
            self.builtin_type_decl(builtin),
            self.builtin_to_msl(builtin, spv::StorageClass::Input),
            self.builtin_qualifier(builtin)
        )
    }

    /// Metal resource index for a variable, from the binding table when the
    /// application supplied one, auto-assigned otherwise
    pub(crate) fn get_metal_resource_index(&mut self, var_id: u32, basetype: BaseType) -> u32 {
        let var = self.module.get_variable(var_id);
        let is_push_constant = var.storage == spv::StorageClass::PushConstant;
        let (desc_set, binding) = match self.module.meta(var_id) {
            _ if is_push_constant => {
                (crate::PUSH_CONSTANT_DESCRIPTOR_SET, crate::PUSH_CONSTANT_BINDING)
            }
            Some(meta) => (meta.decoration.set, meta.decoration.binding),
            None => (0, 0),
        };

        let stage = self.module.execution_model;
        for record in &mut self.resource_bindings {
            if record.stage == stage && record.desc_set == desc_set && record.binding == binding {
                record.used_by_shader = true;
                return match basetype {
                    BaseType::Struct => record.msl_buffer,
                    BaseType::Image => record.msl_texture,
                    BaseType::Sampler => record.msl_sampler,
                    _ => 0,
                };
            }
        }

        // No binding specified: revert to incrementing resource indices
        match basetype {
            BaseType::Struct => {
                let index = self.next_buffer_index;
                self.next_buffer_index += 1;
                index
            }
            BaseType::Image => {
                let index = self.next_texture_index;
                self.next_texture_index += 1;
                index
            }
            BaseType::Sampler => {
                let index = self.next_sampler_index;
                self.next_sampler_index += 1;
                index
            }
            _ => 0,
        }
    }

    /// Adjustments applied to the position output at the end of the entry
    /// point of a vertex function
    pub(crate) fn emit_fixup(&mut self) {
        if self.module.execution_model != spv::ExecutionModel::Vertex
            || self.stage_out_var_id == 0
            || self.qual_pos_var_name.is_empty()
        {
            return;
        }

        let pos = self.qual_pos_var_name.clone();
        if self.options.vertex.fixup_clipspace {
            self.statement(format!("{0}.z = ({0}.z + {0}.w) * 0.5;", pos));
        }
        if self.options.vertex.flip_vert_y {
            self.statement(format!("{0}.y = -({0}.y);", pos));
        }
    }

    // ------------------------------------------------------------------
    // Type printer

    /// MSL spelling of a type
    ///
    /// The optional id names the object whose declaration the type is printed
    /// for; image access qualifiers depend on how that object is used.
    pub(crate) fn type_to_msl(&self, ty: &SpirType, id: u32) -> Result<String, CompileError> {
        let mut type_name = match ty.basetype {
            BaseType::Struct => return Ok(self.module.get_name(ty.self_id)),
            BaseType::Image | BaseType::SampledImage => return self.image_type_msl(ty, id),
            BaseType::Sampler => return Ok(String::from("sampler")),
            BaseType::Void => return Ok(String::from("void")),
            BaseType::AtomicCounter => return Ok(String::from("atomic_uint")),

            BaseType::Boolean => String::from("bool"),
            BaseType::Char => String::from("char"),
            BaseType::Int => String::from(if ty.width == 16 { "short" } else { "int" }),
            BaseType::UInt => String::from(if ty.width == 16 { "ushort" } else { "uint" }),
            BaseType::Int64 => String::from("long"),
            BaseType::UInt64 => String::from("size_t"),
            BaseType::Float => String::from(if ty.width == 16 { "half" } else { "float" }),
            BaseType::Double => String::from("double"),
            BaseType::Unknown => {
                return Err(CompileError::UnsupportedType(String::from(
                    "type has no Metal spelling",
                )))
            }
        };

        if ty.columns > 1 {
            type_name.push_str(&format!("{}x", ty.columns));
        }
        if ty.vecsize > 1 {
            type_name.push_str(&ty.vecsize.to_string());
        }

        Ok(type_name)
    }

    /// MSL spelling of an image type
    fn image_type_msl(&self, ty: &SpirType, id: u32) -> Result<String, CompileError> {
        // Bypass pointers because we need the real image record
        let img_type = self.module.get_type(ty.self_id).image;

        let mut name = String::from(if img_type.depth {
            match img_type.dim {
                spv::Dim::Dim1D => "depth1d_unsupported_by_metal",
                spv::Dim::Dim2D => {
                    if img_type.ms {
                        "depth2d_ms"
                    } else if img_type.arrayed {
                        "depth2d_array"
                    } else {
                        "depth2d"
                    }
                }
                spv::Dim::Dim3D => "depth3d_unsupported_by_metal",
                spv::Dim::DimCube => {
                    if img_type.arrayed {
                        "depthcube_array"
                    } else {
                        "depthcube"
                    }
                }
                _ => "unknown_depth_texture_type",
            }
        } else {
            match img_type.dim {
                spv::Dim::Dim1D => {
                    if img_type.arrayed {
                        "texture1d_array"
                    } else {
                        "texture1d"
                    }
                }
                spv::Dim::DimBuffer | spv::Dim::Dim2D => {
                    if img_type.ms {
                        "texture2d_ms"
                    } else if img_type.arrayed {
                        "texture2d_array"
                    } else {
                        "texture2d"
                    }
                }
                spv::Dim::Dim3D => "texture3d",
                spv::Dim::DimCube => {
                    if img_type.arrayed {
                        "texturecube_array"
                    } else {
                        "texturecube"
                    }
                }
                _ => "unknown_texture_type",
            }
        });

        // Append the pixel type
        name.push('<');
        let sampled = self.module.get_type(img_type.sampled_type).clone();
        name.push_str(&self.type_to_msl(&sampled, 0)?);

        // For storage images, append the access qualifier. Kernel modules may
        // supply it directly; otherwise it reflects how the shader reads or
        // writes the image.
        if ty.basetype == BaseType::Image && ty.image.sampled == 2 {
            match img_type.access {
                Some(spv::AccessQualifier::ReadOnly) => name.push_str(", access::read"),
                Some(spv::AccessQualifier::WriteOnly) => name.push_str(", access::write"),
                Some(spv::AccessQualifier::ReadWrite) => name.push_str(", access::read_write"),
                None => {
                    let var_id = self.maybe_get_backing_variable(id);
                    if let Some(var_id) = var_id {
                        if !self
                            .module
                            .has_decoration(var_id, spv::Decoration::NonWritable)
                        {
                            name.push_str(", access::");
                            if !self
                                .module
                                .has_decoration(var_id, spv::Decoration::NonReadable)
                            {
                                name.push_str("read_");
                            }
                            name.push_str("write");
                        }
                    }
                }
            }
        }

        name.push('>');
        Ok(name)
    }

    /// Array suffix of a declaration
    pub(crate) fn type_to_array_msl(&self, ty: &SpirType) -> String {
        let mut suffix = String::new();
        for length in ty.array.iter().rev() {
            suffix.push_str(&format!("[{}]", (*length).max(1)));
        }
        suffix
    }

    /// Cast spelling for a bit-preserving conversion, empty when the plain
    /// constructor already preserves bits
    pub(crate) fn bitcast_msl_op(&self, out_ty: &SpirType, in_ty: &SpirType) -> Result<String, CompileError> {
        use BaseType::*;
        let same_width_int = matches!(
            (out_ty.basetype, in_ty.basetype),
            (UInt, Int) | (Int, UInt) | (UInt64, Int64) | (Int64, UInt64)
        );
        if same_width_int {
            return self.type_to_msl(out_ty, 0);
        }

        let reinterpret = matches!(
            (out_ty.basetype, in_ty.basetype),
            (UInt, Float)
                | (Int, Float)
                | (Float, UInt)
                | (Float, Int)
                | (Int64, Double)
                | (UInt64, Double)
                | (Double, Int64)
                | (Double, UInt64)
        );
        if reinterpret {
            return Ok(format!("as_type<{}>", self.type_to_msl(out_ty, 0)?));
        }

        Ok(String::new())
    }

    // ------------------------------------------------------------------
    // Built-ins

    /// GLSL style name of a built-in; output built-ins are qualified with the
    /// stage out block inside the entry function
    pub(crate) fn builtin_to_msl(&self, builtin: spv::BuiltIn, _storage: spv::StorageClass) -> String {
        let base = match builtin {
            spv::BuiltIn::VertexId => "gl_VertexID",
            spv::BuiltIn::InstanceId => "gl_InstanceID",
            spv::BuiltIn::VertexIndex => "gl_VertexIndex",
            spv::BuiltIn::InstanceIndex => "gl_InstanceIndex",
            spv::BuiltIn::Position => "gl_Position",
            spv::BuiltIn::PointSize => "gl_PointSize",
            spv::BuiltIn::ClipDistance => "gl_ClipDistance",
            spv::BuiltIn::CullDistance => "gl_CullDistance",
            spv::BuiltIn::Layer => "gl_Layer",
            spv::BuiltIn::FragDepth => "gl_FragDepth",
            spv::BuiltIn::FragCoord => "gl_FragCoord",
            spv::BuiltIn::PointCoord => "gl_PointCoord",
            spv::BuiltIn::FrontFacing => "gl_FrontFacing",
            spv::BuiltIn::SampleId => "gl_SampleID",
            spv::BuiltIn::SampleMask => "gl_SampleMask",
            spv::BuiltIn::GlobalInvocationId => "gl_GlobalInvocationID",
            spv::BuiltIn::WorkgroupId => "gl_WorkGroupID",
            spv::BuiltIn::NumWorkgroups => "gl_NumWorkGroups",
            spv::BuiltIn::LocalInvocationId => "gl_LocalInvocationID",
            spv::BuiltIn::LocalInvocationIndex => "gl_LocalInvocationIndex",
            spv::BuiltIn::WorkgroupSize => "gl_WorkGroupSize",
            _ => "gl_unsupported_builtin",
        };

        // When used in the entry function, output built-ins live in the
        // output struct
        let is_stage_output = matches!(
            builtin,
            spv::BuiltIn::Position
                | spv::BuiltIn::PointSize
                | spv::BuiltIn::ClipDistance
                | spv::BuiltIn::CullDistance
                | spv::BuiltIn::Layer
                | spv::BuiltIn::FragDepth
        );
        if is_stage_output && self.current_function == self.module.entry_point {
            return format!("{}.{}", STAGE_OUT_VAR_NAME, base);
        }

        String::from(base)
    }

    /// MSL attribute qualifier of a built-in
    pub(crate) fn builtin_qualifier(&self, builtin: spv::BuiltIn) -> &'static str {
        match builtin {
            // Vertex function in
            spv::BuiltIn::VertexId | spv::BuiltIn::VertexIndex => "vertex_id",
            spv::BuiltIn::InstanceId | spv::BuiltIn::InstanceIndex => "instance_id",

            // Vertex function out
            spv::BuiltIn::ClipDistance => "clip_distance",
            spv::BuiltIn::PointSize => "point_size",
            spv::BuiltIn::Position => "position",
            spv::BuiltIn::Layer => "render_target_array_index",

            // Fragment function in
            spv::BuiltIn::FrontFacing => "front_facing",
            spv::BuiltIn::PointCoord => "point_coord",
            spv::BuiltIn::FragCoord => "position",
            spv::BuiltIn::SampleId => "sample_id",
            spv::BuiltIn::SampleMask => "sample_mask",

            // Fragment function out
            spv::BuiltIn::FragDepth => {
                if self.module.has_execution_mode(spv::ExecutionMode::DepthGreater) {
                    "depth(greater)"
                } else if self.module.has_execution_mode(spv::ExecutionMode::DepthLess) {
                    "depth(less)"
                } else {
                    "depth(any)"
                }
            }

            // Compute function in
            spv::BuiltIn::GlobalInvocationId => "thread_position_in_grid",
            spv::BuiltIn::WorkgroupId => "threadgroup_position_in_grid",
            spv::BuiltIn::NumWorkgroups => "threadgroups_per_grid",
            spv::BuiltIn::LocalInvocationId => "thread_position_in_threadgroup",
            spv::BuiltIn::LocalInvocationIndex => "thread_index_in_threadgroup",

            _ => "unsupported-built-in",
        }
    }

    /// MSL type of a built-in
    pub(crate) fn builtin_type_decl(&self, builtin: spv::BuiltIn) -> &'static str {
        match builtin {
            spv::BuiltIn::VertexId
            | spv::BuiltIn::VertexIndex
            | spv::BuiltIn::InstanceId
            | spv::BuiltIn::InstanceIndex => "uint",

            spv::BuiltIn::ClipDistance | spv::BuiltIn::PointSize => "float",
            spv::BuiltIn::Position => "float4",
            spv::BuiltIn::Layer => "uint",

            spv::BuiltIn::FrontFacing => "bool",
            spv::BuiltIn::PointCoord => "float2",
            spv::BuiltIn::FragCoord => "float4",
            spv::BuiltIn::SampleId | spv::BuiltIn::SampleMask => "uint",

            spv::BuiltIn::GlobalInvocationId
            | spv::BuiltIn::LocalInvocationId
            | spv::BuiltIn::NumWorkgroups
            | spv::BuiltIn::WorkgroupId => "uint3",
            spv::BuiltIn::LocalInvocationIndex => "uint",

            _ => "unsupported-built-in-type",
        }
    }
}
