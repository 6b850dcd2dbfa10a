//! Synthesis of the stage_in / stage_out interface structs
//!
//! Vulkan-style interface variables are flattened into per-stage structs and
//! every original reference is redirected through a rewritten qualified name.
//! Vertex matrix and array inputs cannot live in stage_in and divert into
//! secondary per-buffer structs indexed with the vertex or instance id.

use smelt_ir::{spv, BaseType, IdEntry, SpirType, SpirVariable, Terminator};

use crate::generator::Compiler;
use crate::names::*;
use crate::{CompileError, UNKNOWN_LOCATION};

impl Compiler {
    /// Add an interface struct for a storage class and return the id of the
    /// new block variable, or zero if no variable qualified
    pub(crate) fn add_interface_block(
        &mut self,
        storage: spv::StorageClass,
    ) -> Result<u32, CompileError> {
        // Accumulate the variables that should appear in the interface struct
        let incl_builtins = storage == spv::StorageClass::Output;
        let mut vars = Vec::new();
        for id in 0..self.module.bound() {
            if self.module.id_kind(id) != IdEntry::Variable {
                continue;
            }
            let var = self.module.get_variable(id);
            if var.storage != storage {
                continue;
            }
            let type_is_pointer = self.module.get_type(var.basetype).pointer;
            if type_is_pointer
                && self.interface_variable_exists_in_entry_point(id)
                && !self.is_hidden_variable(id, incl_builtins)
            {
                vars.push(id);
            }
        }

        if vars.is_empty() {
            return Ok(0);
        }

        // Add a new typed variable for this interface structure
        let next_id = self.module.increase_bound_by(2);
        let ib_type_id = next_id;
        let ib_var_id = next_id + 1;

        let mut ib_type = SpirType::new(ib_type_id);
        ib_type.basetype = BaseType::Struct;
        ib_type.storage = storage;
        self.module.set_type(ib_type_id, ib_type);
        self.module
            .meta_mut(ib_type_id)
            .decoration
            .set_flag(spv::Decoration::Block);

        self.module
            .set_variable(ib_var_id, SpirVariable::new(ib_var_id, ib_type_id, storage));

        let ib_var_ref = match storage {
            spv::StorageClass::Input => STAGE_IN_VAR_NAME,
            spv::StorageClass::Output => {
                // The entry function owns the output block and returns it from
                // every block that performs a function return
                let entry_point = self.module.entry_point;
                self.module
                    .get_function_mut(entry_point)
                    .add_local_variable(ib_var_id);
                let block_ids = self.module.get_function(entry_point).blocks.clone();
                for block_id in block_ids {
                    let block = self.module.get_block_mut(block_id);
                    if block.terminator == Terminator::Return {
                        block.return_value = ib_var_id;
                    }
                }
                STAGE_OUT_VAR_NAME
            }
            spv::StorageClass::UniformConstant => {
                self.accessed_variables.insert(ib_var_id);
                STAGE_UNIFORM_VAR_NAME
            }
            _ => "",
        };

        let struct_name = format!("{}_{}", self.entry_point_name(), ib_var_ref);
        self.module.set_name(ib_type_id, struct_name);
        self.module.set_name(ib_var_id, ib_var_ref);

        for var_id in vars {
            let var = self.module.get_variable(var_id).clone();
            let type_id = var.basetype;
            let var_type = self.module.get_type(type_id).clone();

            if var_type.basetype == BaseType::Struct {
                // Flatten the members of a block into the interface struct
                let member_types = self.module.get_type(type_id).member_types.clone();
                for (mbr_idx, mbr_type_id) in member_types.iter().enumerate() {
                    let mbr_idx = mbr_idx as u32;
                    let builtin = self.member_builtin(var_type.self_id, mbr_idx);

                    let mbr_type = self.module.get_type(*mbr_type_id).clone();
                    if self.should_move_to_input_buffer(&mbr_type, builtin.is_some(), storage)? {
                        self.move_member_to_input_buffer(&var_type, mbr_idx);
                        continue;
                    }

                    let active = match builtin {
                        Some(builtin) => self.has_active_builtin(builtin, storage),
                        None => true,
                    };
                    if !active {
                        continue;
                    }

                    // Add a reference to the member to the interface struct
                    let ib_mbr_idx = self.module.get_type(ib_type_id).member_types.len() as u32;
                    self.module
                        .get_type_mut(ib_type_id)
                        .member_types
                        .push(*mbr_type_id);

                    let mbr_name = ensure_valid_name(
                        self.to_qualified_member_name(&var_type, mbr_idx),
                        "m",
                    );
                    self.module
                        .set_member_name(ib_type_id, ib_mbr_idx, mbr_name.clone());

                    // Redirect references to the member through the flattened
                    // name
                    let qual_var_name = format!("{}.{}", ib_var_ref, mbr_name);
                    self.module
                        .meta_mut(var_type.self_id)
                        .member_mut(mbr_idx)
                        .qualified_alias = qual_var_name.clone();

                    // Copy the location over, either from the member or
                    // incrementally from a location on the block itself
                    let member_location = self
                        .module
                        .meta(var_type.self_id)
                        .and_then(|m| m.member(mbr_idx))
                        .filter(|d| d.has(spv::Decoration::Location))
                        .map(|d| d.location);
                    let block_location = self
                        .module
                        .meta(var_id)
                        .filter(|m| m.decoration.has(spv::Decoration::Location))
                        .map(|m| m.decoration.location + mbr_idx);
                    if let Some(locn) = member_location.or(block_location) {
                        let member = self.module.meta_mut(ib_type_id).member_mut(ib_mbr_idx);
                        member.set_flag(spv::Decoration::Location);
                        member.location = locn;
                        self.mark_location_as_used_by_shader(locn, storage);
                    }

                    if let Some(builtin) = builtin {
                        let member = self.module.meta_mut(ib_type_id).member_mut(ib_mbr_idx);
                        member.set_flag(spv::Decoration::BuiltIn);
                        member.builtin_type = Some(builtin);
                        if builtin == spv::BuiltIn::Position {
                            self.qual_pos_var_name = qual_var_name;
                        }
                    }
                }
            } else if matches!(
                var_type.basetype,
                BaseType::Boolean
                    | BaseType::Char
                    | BaseType::Int
                    | BaseType::UInt
                    | BaseType::Int64
                    | BaseType::UInt64
                    | BaseType::Float
                    | BaseType::Double
            ) {
                let is_builtin = self.is_builtin_variable(var_id);
                let builtin = self
                    .module
                    .meta(var_id)
                    .and_then(|m| m.decoration.builtin_type);

                if self.should_move_to_input_buffer(&var_type, is_builtin, storage)? {
                    self.move_to_input_buffer(var_id);
                    continue;
                }

                let active = if is_builtin {
                    builtin.map_or(false, |b| self.has_active_builtin(b, storage))
                } else {
                    true
                };
                if !active {
                    continue;
                }

                // Add a reference to the variable type to the interface struct
                let ib_mbr_idx = self.module.get_type(ib_type_id).member_types.len() as u32;
                self.module
                    .get_type_mut(ib_type_id)
                    .member_types
                    .push(type_id);

                let base_name = if is_builtin {
                    builtin.map_or_else(
                        || self.module.get_name(var_id),
                        |b| self.builtin_to_msl(b, storage),
                    )
                } else {
                    self.module.get_name(var_id)
                };
                let mbr_name = ensure_valid_name(base_name, "m");
                self.module
                    .set_member_name(ib_type_id, ib_mbr_idx, mbr_name.clone());

                // Redirect references to the variable through the flattened
                // name
                let qual_var_name = format!("{}.{}", ib_var_ref, mbr_name);
                self.module.meta_mut(var_id).decoration.qualified_alias = qual_var_name.clone();

                if let Some(locn) = self
                    .module
                    .meta(var_id)
                    .filter(|m| m.decoration.has(spv::Decoration::Location))
                    .map(|m| m.decoration.location)
                {
                    let member = self.module.meta_mut(ib_type_id).member_mut(ib_mbr_idx);
                    member.set_flag(spv::Decoration::Location);
                    member.location = locn;
                    self.mark_location_as_used_by_shader(locn, storage);
                }

                if let Some(builtin) = builtin.filter(|_| is_builtin) {
                    let member = self.module.meta_mut(ib_type_id).member_mut(ib_mbr_idx);
                    member.set_flag(spv::Decoration::BuiltIn);
                    member.builtin_type = Some(builtin);
                    if builtin == spv::BuiltIn::Position {
                        self.qual_pos_var_name = qual_var_name;
                    }
                }
            }
        }

        // Sort the members of the structure by their locations. Metal matches
        // vertex inputs against attributes better when they are sorted in
        // reverse order.
        let reverse = storage == spv::StorageClass::Input;
        self.sort_members_by_location(ib_type_id, reverse);

        Ok(ib_var_id)
    }

    /// Whether a value must leave the interface block for a secondary input
    /// buffer; matrices and arrays are only representable there, and only for
    /// vertex inputs
    fn should_move_to_input_buffer(
        &self,
        ty: &SpirType,
        is_builtin: bool,
        storage: spv::StorageClass,
    ) -> Result<bool, CompileError> {
        if (!ty.is_matrix() && !ty.is_array()) || is_builtin {
            return Ok(false);
        }

        match (self.module.execution_model, storage) {
            (spv::ExecutionModel::Vertex, spv::StorageClass::Input) => Ok(true),
            (spv::ExecutionModel::Vertex, spv::StorageClass::Output) => {
                Err(CompileError::InvalidInterface(String::from(
                    "the vertex function output structure may not include a matrix or array",
                )))
            }
            (spv::ExecutionModel::Fragment, spv::StorageClass::Input) => {
                Err(CompileError::InvalidInterface(String::from(
                    "the fragment function stage_in structure may not include a matrix or array",
                )))
            }
            (spv::ExecutionModel::Fragment, spv::StorageClass::Output) => {
                Err(CompileError::InvalidInterface(String::from(
                    "the fragment function output structure may not include a matrix or array",
                )))
            }
            _ => Ok(false),
        }
    }

    /// Divert a whole variable into the secondary input buffer for its
    /// attribute location
    fn move_to_input_buffer(&mut self, var_id: u32) {
        if !self.module.has_decoration(var_id, spv::Decoration::Location) {
            return;
        }

        let mbr_type_id = self.module.get_variable(var_id).basetype;
        let mbr_name = ensure_valid_name(self.module.get_name(var_id), "m");
        let mbr_locn = self
            .module
            .meta(var_id)
            .map_or(0, |m| m.decoration.location);
        let qual_name = self.add_input_buffer_block_member(mbr_type_id, mbr_name, mbr_locn);
        self.module.meta_mut(var_id).decoration.qualified_alias = qual_name;
    }

    /// Divert one member of an input block into the secondary input buffer
    /// for its attribute location
    fn move_member_to_input_buffer(&mut self, var_type: &SpirType, index: u32) {
        let struct_id = var_type.self_id;
        let has_location = self
            .module
            .meta(struct_id)
            .and_then(|m| m.member(index))
            .map_or(false, |d| d.has(spv::Decoration::Location));
        if !has_location {
            return;
        }

        let mbr_type_id = var_type.member_types[index as usize];
        let mbr_name = ensure_valid_name(self.to_qualified_member_name(var_type, index), "m");
        let mbr_locn = self
            .module
            .meta(struct_id)
            .and_then(|m| m.member(index))
            .map_or(0, |d| d.location);
        let qual_name = self.add_input_buffer_block_member(mbr_type_id, mbr_name, mbr_locn);
        self.module
            .meta_mut(struct_id)
            .member_mut(index)
            .qualified_alias = qual_name;
    }

    /// Add a member to the input buffer block backing the Metal buffer bound
    /// at the attribute's location, returning the rewritten reference
    fn add_input_buffer_block_member(
        &mut self,
        mbr_type_id: u32,
        mbr_name: String,
        mbr_locn: u32,
    ) -> String {
        self.mark_location_as_used_by_shader(mbr_locn, spv::StorageClass::Input);

        let attr = match self.vtx_attrs_by_location.get(&mbr_locn) {
            Some(index) => self.vtx_attrs[*index].clone(),
            // No attribute record: the member is silently omitted
            None => return String::new(),
        };

        if attr.per_instance {
            self.needs_instance_idx_arg = true;
        } else {
            self.needs_vertex_idx_arg = true;
        }

        // The variable that is the block struct. Record the stride of the
        // struct in its offset decoration.
        let ib_var_id = self.input_buffer_block_var_id(attr.msl_buffer);
        let ib_type_id = self.module.get_variable(ib_var_id).basetype;
        {
            let dec = &mut self.module.meta_mut(ib_type_id).decoration;
            dec.set_flag(spv::Decoration::Offset);
            dec.offset = attr.msl_stride;
        }

        // Add a reference to the member type to the buffer struct
        let ib_mbr_idx = self.module.get_type(ib_type_id).member_types.len() as u32;
        self.module
            .get_type_mut(ib_type_id)
            .member_types
            .push(mbr_type_id);
        self.module
            .set_member_name(ib_type_id, ib_mbr_idx, mbr_name.clone());

        // Set the Metal buffer and offset, and mark that no attribute
        // location applies
        let member = self.module.meta_mut(ib_type_id).member_mut(ib_mbr_idx);
        member.set_flag(spv::Decoration::Binding);
        member.binding = attr.msl_buffer;
        member.set_flag(spv::Decoration::Offset);
        member.offset = attr.msl_offset;
        member.set_flag(spv::Decoration::Location);
        member.location = UNKNOWN_LOCATION;

        // The rewritten reference indexes the buffer with the vertex or
        // instance id
        let idx_var_name = self.builtin_to_msl(
            if attr.per_instance {
                spv::BuiltIn::InstanceIndex
            } else {
                spv::BuiltIn::VertexIndex
            },
            spv::StorageClass::Input,
        );
        format!(
            "{}[{}].{}",
            self.module.get_name(ib_var_id),
            idx_var_name,
            mbr_name
        )
    }

    /// Id of the input block for a Metal buffer index, lazily creating the
    /// block variable and type on first use
    fn input_buffer_block_var_id(&mut self, msl_buffer: u32) -> u32 {
        if let Some(existing) = self.non_stage_in_input_var_ids.get(&msl_buffer) {
            return *existing;
        }

        let next_id = self.module.increase_bound_by(2);
        let ib_type_id = next_id;
        let ib_var_id = next_id + 1;

        let mut ib_type = SpirType::new(ib_type_id);
        ib_type.basetype = BaseType::Struct;
        ib_type.storage = spv::StorageClass::Input;
        self.module.set_type(ib_type_id, ib_type);
        self.module
            .meta_mut(ib_type_id)
            .decoration
            .set_flag(spv::Decoration::Block);

        self.module.set_variable(
            ib_var_id,
            SpirVariable::new(ib_var_id, ib_type_id, spv::StorageClass::Input),
        );

        let ib_var_name = format!("{}{}", STAGE_IN_VAR_NAME, msl_buffer);
        let struct_name = format!("{}_{}", self.entry_point_name(), ib_var_name);
        self.module.set_name(ib_var_id, ib_var_name);
        self.module.set_name(ib_type_id, struct_name);

        self.non_stage_in_input_var_ids.insert(msl_buffer, ib_var_id);
        ib_var_id
    }

    /// Mark the vertex attribute at a location as consumed by the shader
    fn mark_location_as_used_by_shader(&mut self, location: u32, storage: spv::StorageClass) {
        if self.module.execution_model != spv::ExecutionModel::Vertex
            || storage != spv::StorageClass::Input
        {
            return;
        }
        if let Some(index) = self.vtx_attrs_by_location.get(&location) {
            self.vtx_attrs[*index].used_by_shader = true;
        }
    }
}
