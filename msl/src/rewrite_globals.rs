//! Rewrites that relocate global state into function scope
//!
//! Metal has no module scope mutable state and no implicit access to shader
//! resources from helper functions, so globals are localized into the entry
//! function and threaded through call signatures as parameters.

use std::collections::{BTreeSet, HashSet};

use smelt_ir::{spv, BaseType, IdEntry, SpirVariable};

use crate::generator::Compiler;
use crate::names::{sanitize_reserved, RESERVED_FUNCTION_NAMES, RESERVED_KEYWORDS};

impl Compiler {
    /// Rename symbols that collide with MSL keywords or the Metal standard
    /// library
    pub(crate) fn replace_illegal_names(&mut self) {
        for id in 0..self.module.bound() {
            match self.module.id_kind(id) {
                IdEntry::Variable => {
                    let dec = &mut self.module.meta_mut(id).decoration;
                    sanitize_reserved(&mut dec.alias, RESERVED_KEYWORDS);
                }
                IdEntry::Function => {
                    let dec = &mut self.module.meta_mut(id).decoration;
                    sanitize_reserved(&mut dec.alias, RESERVED_FUNCTION_NAMES);
                }
                IdEntry::Type => {
                    for member in &mut self.module.meta_mut(id).members {
                        sanitize_reserved(&mut member.alias, RESERVED_KEYWORDS);
                    }
                }
                _ => {}
            }
        }

        // Keep the recorded entry point name in sync with the rename
        let mut name = self.module.entry_point_name.clone();
        sanitize_reserved(&mut name, RESERVED_FUNCTION_NAMES);
        self.module.entry_point_name = name.clone();
        let entry_point = self.module.entry_point;
        self.module.set_name(entry_point, name);
    }

    /// Move Private and Workgroup globals into the entry function;
    /// non-constant variables cannot have global scope in Metal
    pub(crate) fn localize_global_variables(&mut self) {
        let entry_point = self.module.entry_point;
        let mut remaining = Vec::new();
        for var_id in self.module.global_variables.clone() {
            let storage = self.module.get_variable(var_id).storage;
            if storage == spv::StorageClass::Private || storage == spv::StorageClass::Workgroup {
                self.module.get_variable_mut(var_id).storage = spv::StorageClass::Function;
                self.module
                    .get_function_mut(entry_point)
                    .add_local_variable(var_id);
            } else {
                remaining.push(var_id);
            }
        }
        self.module.global_variables = remaining;
    }

    /// Metal does not allow dynamic array lengths; turn off specialization of
    /// any constants that size an array
    pub(crate) fn resolve_specialized_array_lengths(&mut self) {
        for id in 0..self.module.bound() {
            if self.module.id_kind(id) != IdEntry::Constant {
                continue;
            }
            let constant = self.module.get_constant_mut(id);
            if constant.is_used_as_array_length {
                constant.specialization = false;
            }
        }
    }

    /// For any global variable accessed directly by a function, extract that
    /// variable and add it as an argument to that function
    pub(crate) fn extract_global_variables_from_functions(&mut self) {
        // Uniforms and shader inputs
        let mut global_var_ids = HashSet::new();
        for id in 0..self.module.bound() {
            if self.module.id_kind(id) != IdEntry::Variable {
                continue;
            }
            if matches!(
                self.module.get_variable(id).storage,
                spv::StorageClass::Input
                    | spv::StorageClass::Uniform
                    | spv::StorageClass::UniformConstant
                    | spv::StorageClass::PushConstant
                    | spv::StorageClass::StorageBuffer
            ) {
                global_var_ids.insert(id);
            }
        }

        // Local vars that are declared in the main function and accessed
        // directly by a helper function
        let entry_point = self.module.entry_point;
        for var_id in &self.module.get_function(entry_point).local_variables {
            global_var_ids.insert(*var_id);
        }

        let mut processed = HashSet::new();
        let mut added = BTreeSet::new();
        self.extract_global_variables_from_function(
            entry_point,
            &mut added,
            &global_var_ids,
            &mut processed,
        );
    }

    fn extract_global_variables_from_function(
        &mut self,
        func_id: u32,
        added_arg_ids: &mut BTreeSet<u32>,
        global_var_ids: &HashSet<u32>,
        processed_func_ids: &mut HashSet<u32>,
    ) {
        // Avoid processing a function more than once
        if processed_func_ids.contains(&func_id) {
            *added_arg_ids = self.function_global_vars[&func_id].clone();
            return;
        }
        processed_func_ids.insert(func_id);

        // Recursively establish global args added to functions on which we
        // depend
        let block_ids = self.module.get_function(func_id).blocks.clone();
        for block_id in &block_ids {
            let instructions = self.module.get_block(*block_id).ops.clone();
            for instruction in &instructions {
                let ops = &instruction.operands;
                match instruction.opcode() {
                    Some(spv::Op::Load)
                    | Some(spv::Op::AccessChain)
                    | Some(spv::Op::InBoundsAccessChain) => {
                        if ops.len() > 2 && global_var_ids.contains(&ops[2]) {
                            added_arg_ids.insert(ops[2]);
                        }
                    }
                    Some(spv::Op::Store) | Some(spv::Op::AtomicStore) => {
                        if !ops.is_empty() && global_var_ids.contains(&ops[0]) {
                            added_arg_ids.insert(ops[0]);
                        }
                    }
                    Some(spv::Op::FunctionCall) => {
                        // First see if any of the function call args are
                        // globals
                        for arg_id in ops.iter().skip(3) {
                            if global_var_ids.contains(arg_id) {
                                added_arg_ids.insert(*arg_id);
                            }
                        }

                        // Then recurse into the function itself to extract
                        // globals used internally in the function
                        let mut inner_func_args = BTreeSet::new();
                        self.extract_global_variables_from_function(
                            ops[2],
                            &mut inner_func_args,
                            global_var_ids,
                            processed_func_ids,
                        );
                        added_arg_ids.extend(inner_func_args);
                    }
                    Some(opcode) if crate::generator::is_atomic_opcode(opcode) => {
                        if ops.len() > 2 && global_var_ids.contains(&ops[2]) {
                            added_arg_ids.insert(ops[2]);
                        }
                    }
                    _ => {}
                }
            }
        }

        self.function_global_vars
            .insert(func_id, added_arg_ids.clone());

        // Add the global variables as arguments to the function
        if func_id != self.module.entry_point {
            let mut next_id = self.module.increase_bound_by(added_arg_ids.len() as u32);
            for arg_id in added_arg_ids.iter() {
                let type_id = self.module.get_variable(*arg_id).basetype;
                self.module
                    .get_function_mut(func_id)
                    .add_parameter(type_id, next_id, true);

                let mut var = SpirVariable::new(next_id, type_id, spv::StorageClass::Function);
                var.basevariable = *arg_id;
                self.module.set_variable(next_id, var);

                // Ensure the existing variable has a usable name and give the
                // new one the same meta info so both resolve identically
                let name = crate::names::ensure_valid_name(self.module.get_name(*arg_id), "v");
                self.module.set_name(*arg_id, name);
                let meta = self.module.meta(*arg_id).cloned().unwrap_or_default();
                *self.module.meta_mut(next_id) = meta;

                next_id += 1;
            }
        }
    }

    /// Mark every struct reachable from a buffer-like variable for tight
    /// packing
    pub(crate) fn mark_packable_structs(&mut self) {
        for id in 0..self.module.bound() {
            if self.module.id_kind(id) != IdEntry::Variable {
                continue;
            }
            let var = self.module.get_variable(id);
            if var.storage == spv::StorageClass::Function || self.is_hidden_variable(id, false) {
                continue;
            }

            let type_id = var.basetype;
            let ty = self.module.get_type(type_id);
            let is_buffer_block = self.module.has_decoration(ty.self_id, spv::Decoration::Block)
                || self
                    .module
                    .has_decoration(ty.self_id, spv::Decoration::BufferBlock);
            if ty.pointer
                && matches!(
                    ty.storage,
                    spv::StorageClass::Uniform
                        | spv::StorageClass::UniformConstant
                        | spv::StorageClass::PushConstant
                        | spv::StorageClass::StorageBuffer
                )
                && is_buffer_block
            {
                self.mark_as_packable(type_id);
            }
        }
    }

    /// Mark a struct and any structs nested within it as packable
    fn mark_as_packable(&mut self, type_id: u32) {
        // If this is not the base type (a pointer or array), tunnel down
        let parent_type = self.module.get_type(type_id).parent_type;
        if parent_type != 0 {
            self.mark_as_packable(parent_type);
            return;
        }

        if self.module.get_type(type_id).basetype != BaseType::Struct {
            return;
        }

        let struct_id = self.module.get_type(type_id).self_id;
        if !self.packed_types_insert(struct_id) {
            return;
        }

        let member_types = self.module.get_type(type_id).member_types.clone();
        for member_type_id in member_types {
            self.mark_as_packable(member_type_id);
            let alias = self.module.get_type(member_type_id).type_alias;
            if alias != 0 {
                self.mark_as_packable(alias);
            }
        }
    }
}
