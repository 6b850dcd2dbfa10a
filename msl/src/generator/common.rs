//! The common instruction emitter
//!
//! Handles the instruction subset whose lowering is shared by all C-family
//! shading targets: expression formation with forwarding, access chains,
//! arithmetic, composites, structured control flow, calls and texture
//! sampling. The MSL-specific dispatch defers here for everything it does not
//! override.

use num_traits::FromPrimitive;
use smelt_ir::{spv, BaseType, IdEntry, Instruction, MergeKind, SpirType, Terminator};

use super::Compiler;
use crate::preprocess::SpvFuncImpl;
use crate::CompileError;

/// A value expression minted during emission
#[derive(Debug, Clone)]
pub(crate) struct CachedExpr {
    pub text: String,
    pub result_type: u32,
    /// Inline expression not yet pinned to a named temporary
    pub forwarded: bool,
    /// Variable ids whose mutation invalidates this expression
    pub deps: Vec<u32>,
    /// Variable the expression ultimately addresses, 0 when none
    pub base_variable: u32,
    /// Loaded from a row-major matrix and needs conversion on use
    pub need_transpose: bool,
    /// Composition must parenthesize this expression
    pub needs_parens: bool,
}

/// Structured control flow construct the emitter is currently inside
#[derive(Debug, Copy, Clone)]
pub(crate) enum Frame {
    Selection { merge: u32 },
    Loop { merge: u32, cont: u32, header: u32 },
}

impl Compiler {
    // ------------------------------------------------------------------
    // Expressions

    pub(crate) fn expression_type_id(&self, id: u32) -> Result<u32, CompileError> {
        if let Some(expr) = self.exprs.get(&id) {
            return Ok(expr.result_type);
        }
        self.module
            .try_get_value_type(id)
            .ok_or_else(|| CompileError::InvalidOpcodeArg(format!("id {} has no type", id)))
    }

    pub(crate) fn expression_type(&self, id: u32) -> Result<SpirType, CompileError> {
        Ok(self.module.get_type(self.expression_type_id(id)?).clone())
    }

    /// Variable ids the expression for `id` reads through
    pub(crate) fn expression_deps(&self, id: u32) -> Vec<u32> {
        if self.module.id_kind(id) == IdEntry::Variable {
            return vec![id];
        }
        self.exprs.get(&id).map(|e| e.deps.clone()).unwrap_or_default()
    }

    /// Variable ultimately backing an expression, if any
    pub(crate) fn maybe_get_backing_variable(&self, id: u32) -> Option<u32> {
        if self.module.id_kind(id) == IdEntry::Variable {
            let var = self.module.get_variable(id);
            if var.basevariable != 0 {
                return Some(var.basevariable);
            }
            return Some(id);
        }
        match self.exprs.get(&id) {
            Some(expr) if expr.base_variable != 0 => {
                if self.module.id_kind(expr.base_variable) == IdEntry::Variable {
                    let var = self.module.get_variable(expr.base_variable);
                    if var.basevariable != 0 {
                        return Some(var.basevariable);
                    }
                }
                Some(expr.base_variable)
            }
            _ => None,
        }
    }

    /// Textual expression for an id, converting row-major values on use
    ///
    /// Using an expression a store has invalidated means the forwarding
    /// decision was wrong; pin it to a temporary and restart emission.
    pub(crate) fn to_expression(&mut self, id: u32) -> Result<String, CompileError> {
        if self.invalid_expressions.contains(&id) {
            self.forced_temporaries.insert(id);
            self.force_recompile = true;
        }

        if let Some(expr) = self.exprs.get(&id).cloned() {
            if expr.need_transpose {
                let ty = self.module.get_type(expr.result_type).clone();
                return self.convert_row_major_matrix(expr.text, &ty);
            }
            return Ok(expr.text);
        }

        match self.module.id_kind(id) {
            IdEntry::Variable => {
                let builtin = self
                    .module
                    .meta(id)
                    .filter(|m| m.decoration.has(spv::Decoration::BuiltIn))
                    .and_then(|m| m.decoration.builtin_type);
                // The qualified alias of flattened interface variables wins
                // over the canonical builtin name inside the entry function
                if self.current_function == self.module.entry_point {
                    if let Some(meta) = self.module.meta(id) {
                        if !meta.decoration.qualified_alias.is_empty() {
                            return Ok(meta.decoration.qualified_alias.clone());
                        }
                    }
                }
                match builtin {
                    Some(builtin) => {
                        Ok(self.builtin_to_msl(builtin, self.module.get_variable(id).storage))
                    }
                    None => Ok(self.to_name(id)),
                }
            }
            IdEntry::Constant => {
                let constant = self.module.get_constant(id);
                if constant.specialization {
                    Ok(self.to_name(id))
                } else {
                    self.constant_expression(id)
                }
            }
            IdEntry::Undef => Ok(self.to_name(id)),
            _ => Err(CompileError::InvalidOpcodeArg(format!(
                "id {} is not a value",
                id
            ))),
        }
    }

    /// Expression wrapped in parentheses when composition requires it
    pub(crate) fn to_enclosed_expression(&mut self, id: u32) -> Result<String, CompileError> {
        let needs_parens = self.exprs.get(&id).map_or(false, |e| e.needs_parens && e.forwarded);
        let text = self.to_expression(id)?;
        if needs_parens {
            Ok(format!("({})", text))
        } else {
            Ok(text)
        }
    }

    pub(crate) fn should_forward(&self, id: u32) -> bool {
        !self.forced_temporaries.contains(&id)
    }

    pub(crate) fn declare_temporary(&mut self, result_type: u32, id: u32) -> Result<String, CompileError> {
        let ty = self.module.get_type(result_type).clone();
        let type_name = self.type_to_msl(&ty, 0)?;
        let array = self.type_to_array_msl(&ty);
        Ok(format!("{} {}{} = ", type_name, self.to_name(id), array))
    }

    /// Bind a computed expression to its result id, either inline or through
    /// a named temporary
    pub(crate) fn emit_op(
        &mut self,
        result_type: u32,
        id: u32,
        rhs: String,
        forward: bool,
        needs_parens: bool,
        deps: Vec<u32>,
    ) -> Result<(), CompileError> {
        if forward && !self.forced_temporaries.contains(&id) {
            self.exprs.insert(
                id,
                CachedExpr {
                    text: rhs,
                    result_type,
                    forwarded: true,
                    deps,
                    base_variable: 0,
                    need_transpose: false,
                    needs_parens,
                },
            );
        } else {
            let decl = self.declare_temporary(result_type, id)?;
            self.statement(format!("{}{};", decl, rhs));
            let name = self.to_name(id);
            self.exprs.insert(
                id,
                CachedExpr {
                    text: name,
                    result_type,
                    forwarded: false,
                    deps: Vec::new(),
                    base_variable: 0,
                    need_transpose: false,
                    needs_parens: false,
                },
            );
        }
        Ok(())
    }

    /// Mark every forwarded expression reading a variable as stale after a
    /// write to it; a later use forces a temporary and a recompile
    pub(crate) fn invalidate_expressions_reading(&mut self, var_id: u32) {
        let stale: Vec<u32> = self
            .exprs
            .iter()
            .filter(|(_, e)| e.forwarded && e.deps.contains(&var_id))
            .map(|(id, _)| *id)
            .collect();
        self.invalid_expressions.extend(stale);
    }

    /// Mark every forwarded expression reading any variable as stale, after
    /// an operation that may write through arbitrary memory
    pub(crate) fn invalidate_all_dependent_expressions(&mut self) {
        let stale: Vec<u32> = self
            .exprs
            .iter()
            .filter(|(_, e)| e.forwarded && !e.deps.is_empty())
            .map(|(id, _)| *id)
            .collect();
        self.invalid_expressions.extend(stale);
    }

    // ------------------------------------------------------------------
    // Constants

    pub(crate) fn constant_expression(&mut self, id: u32) -> Result<String, CompileError> {
        let constant = self.module.get_constant(id).clone();
        let ty = self.module.get_type(constant.constant_type).clone();

        if !constant.subconstants.is_empty() {
            let mut parts = Vec::new();
            for sub in &constant.subconstants {
                let sub_constant = self.module.get_constant(*sub);
                if sub_constant.specialization {
                    parts.push(self.to_name(*sub));
                } else {
                    parts.push(self.constant_expression(*sub)?);
                }
            }

            // Arrays and structures use initializer lists, vectors and
            // matrices their constructor
            return if ty.is_array() || ty.basetype == BaseType::Struct {
                Ok(format!("{{ {} }}", parts.join(", ")))
            } else {
                Ok(format!("{}({})", self.type_to_msl(&ty, 0)?, parts.join(", ")))
            };
        }

        Ok(match ty.basetype {
            BaseType::Boolean => String::from(if constant.scalar_bool() { "true" } else { "false" }),
            BaseType::UInt => format!("{}u", constant.scalar()),
            BaseType::Int | BaseType::Char => format!("{}", constant.scalar_i32()),
            BaseType::UInt64 => format!("{}ul", constant.scalar_u64()),
            BaseType::Int64 => format!("{}l", constant.scalar_i64()),
            BaseType::Float => format_float(constant.scalar_f32()),
            BaseType::Double => format_double(constant.scalar_f64()),
            _ => {
                return Err(CompileError::UnsupportedType(String::from(
                    "constant of a non-scalar type",
                )))
            }
        })
    }

    // ------------------------------------------------------------------
    // Row-major matrix conversion

    /// Register the helper converting a row-major matrix of this shape,
    /// restarting emission when the demand appears mid-pass
    pub(crate) fn add_convert_row_major_matrix_function(
        &mut self,
        cols: u32,
        rows: u32,
    ) -> Result<(), CompileError> {
        // A square matrix converts through transpose()
        if cols == rows {
            return Ok(());
        }

        let spv_func = match (cols, rows) {
            (2, 3) => SpvFuncImpl::RowMajor2x3,
            (2, 4) => SpvFuncImpl::RowMajor2x4,
            (3, 2) => SpvFuncImpl::RowMajor3x2,
            (3, 4) => SpvFuncImpl::RowMajor3x4,
            (4, 2) => SpvFuncImpl::RowMajor4x2,
            (4, 3) => SpvFuncImpl::RowMajor4x3,
            _ => {
                return Err(CompileError::UnsupportedType(format!(
                    "could not convert row-major matrix {}x{}",
                    cols, rows
                )))
            }
        };

        if self.spv_function_implementations.insert(spv_func) {
            self.add_pragma_line("#pragma clang diagnostic ignored \"-Wmissing-prototypes\"");
            self.force_recompile = true;
        }
        Ok(())
    }

    /// Wrap an expression in the call converting its row-major content to
    /// column-major
    pub(crate) fn convert_row_major_matrix(
        &mut self,
        expr: String,
        ty: &SpirType,
    ) -> Result<String, CompileError> {
        self.add_convert_row_major_matrix_function(ty.columns, ty.vecsize)?;
        if ty.columns == ty.vecsize {
            Ok(format!("transpose({})", expr))
        } else {
            Ok(format!(
                "spvConvertFromRowMajor{}x{}({})",
                ty.columns, ty.vecsize, expr
            ))
        }
    }

    // ------------------------------------------------------------------
    // Emission helpers shared by the opcode tables

    pub(crate) fn emit_unary_op(
        &mut self,
        result_type: u32,
        id: u32,
        op0: u32,
        op: &str,
    ) -> Result<(), CompileError> {
        let forward = self.should_forward(op0);
        let deps = self.expression_deps(op0);
        let rhs = format!("{}{}", op, self.to_enclosed_expression(op0)?);
        self.emit_op(result_type, id, rhs, forward, true, deps)
    }

    pub(crate) fn emit_binary_op(
        &mut self,
        result_type: u32,
        id: u32,
        op0: u32,
        op1: u32,
        op: &str,
    ) -> Result<(), CompileError> {
        let forward = self.should_forward(op0) && self.should_forward(op1);
        let mut deps = self.expression_deps(op0);
        deps.extend(self.expression_deps(op1));
        let rhs = format!(
            "{} {} {}",
            self.to_enclosed_expression(op0)?,
            op,
            self.to_enclosed_expression(op1)?
        );
        self.emit_op(result_type, id, rhs, forward, true, deps)
    }

    pub(crate) fn emit_unary_func_op(
        &mut self,
        result_type: u32,
        id: u32,
        op0: u32,
        op: &str,
    ) -> Result<(), CompileError> {
        let forward = self.should_forward(op0);
        let deps = self.expression_deps(op0);
        let rhs = format!("{}({})", op, self.to_expression(op0)?);
        self.emit_op(result_type, id, rhs, forward, false, deps)
    }

    pub(crate) fn emit_binary_func_op(
        &mut self,
        result_type: u32,
        id: u32,
        op0: u32,
        op1: u32,
        op: &str,
    ) -> Result<(), CompileError> {
        let forward = self.should_forward(op0) && self.should_forward(op1);
        let mut deps = self.expression_deps(op0);
        deps.extend(self.expression_deps(op1));
        let rhs = format!("{}({}, {})", op, self.to_expression(op0)?, self.to_expression(op1)?);
        self.emit_op(result_type, id, rhs, forward, false, deps)
    }

    pub(crate) fn emit_trinary_func_op(
        &mut self,
        result_type: u32,
        id: u32,
        op0: u32,
        op1: u32,
        op2: u32,
        op: &str,
    ) -> Result<(), CompileError> {
        let forward =
            self.should_forward(op0) && self.should_forward(op1) && self.should_forward(op2);
        let mut deps = self.expression_deps(op0);
        deps.extend(self.expression_deps(op1));
        deps.extend(self.expression_deps(op2));
        let rhs = format!(
            "{}({}, {}, {})",
            op,
            self.to_expression(op0)?,
            self.to_expression(op1)?,
            self.to_expression(op2)?
        );
        self.emit_op(result_type, id, rhs, forward, false, deps)
    }

    pub(crate) fn emit_quaternary_func_op(
        &mut self,
        result_type: u32,
        id: u32,
        op0: u32,
        op1: u32,
        op2: u32,
        op3: u32,
        op: &str,
    ) -> Result<(), CompileError> {
        let forward = self.should_forward(op0)
            && self.should_forward(op1)
            && self.should_forward(op2)
            && self.should_forward(op3);
        let mut deps = self.expression_deps(op0);
        deps.extend(self.expression_deps(op1));
        deps.extend(self.expression_deps(op2));
        deps.extend(self.expression_deps(op3));
        let rhs = format!(
            "{}({}, {}, {}, {})",
            op,
            self.to_expression(op0)?,
            self.to_expression(op1)?,
            self.to_expression(op2)?,
            self.to_expression(op3)?
        );
        self.emit_op(result_type, id, rhs, forward, false, deps)
    }

    // ------------------------------------------------------------------
    // Access chains

    pub(crate) fn emit_access_chain(
        &mut self,
        result_type: u32,
        id: u32,
        base: u32,
        indices: &[u32],
    ) -> Result<(), CompileError> {
        let mut expr = self.to_expression(base)?;
        let mut deps = self.expression_deps(base);
        let base_variable = self.maybe_get_backing_variable(base).unwrap_or(0);
        let mut need_transpose = false;

        // The chain walks the pointee, not the pointer record
        let mut current_type_id = self.expression_type_id(base)?;
        let base_ty = self.module.get_type(current_type_id);
        if base_ty.pointer {
            current_type_id = base_ty.parent_type;
        }

        for index in indices {
            let ty = self.module.get_type(current_type_id).clone();

            if ty.is_array() {
                expr.push_str(&format!("[{}]", self.to_expression(*index)?));
                deps.extend(self.expression_deps(*index));
                current_type_id = ty.parent_type;
            } else if ty.basetype == BaseType::Struct {
                let member = match self.module.try_get_constant(*index) {
                    Some(constant) => constant.scalar(),
                    None => {
                        return Err(CompileError::InvalidOpcodeArg(String::from(
                            "a struct access requires a constant member index",
                        )))
                    }
                };

                // Members relocated by interface flattening replace the whole
                // accumulated reference
                let qualified = self
                    .module
                    .meta(ty.self_id)
                    .and_then(|m| m.member(member))
                    .map(|d| d.qualified_alias.clone())
                    .unwrap_or_default();
                if !qualified.is_empty() && self.current_function == self.module.entry_point {
                    expr = qualified;
                } else {
                    expr.push('.');
                    expr.push_str(&self.to_member_name(ty.self_id, member));
                }

                if self
                    .module
                    .has_member_decoration(ty.self_id, member, spv::Decoration::RowMajor)
                {
                    need_transpose = true;
                }

                current_type_id = ty.member_types[member as usize];
            } else if ty.is_matrix() {
                expr.push_str(&format!("[{}]", self.to_expression(*index)?));
                deps.extend(self.expression_deps(*index));
                current_type_id = ty.parent_type;
            } else if ty.vecsize > 1 {
                match self.module.try_get_constant(*index) {
                    Some(constant) => {
                        let component = match constant.scalar() {
                            0 => ".x",
                            1 => ".y",
                            2 => ".z",
                            3 => ".w",
                            other => {
                                return Err(CompileError::InvalidOpcodeArg(format!(
                                    "the value ({}) is not a valid component index, \
                                     which must be one of 0, 1, 2, or 3",
                                    other
                                )))
                            }
                        };
                        expr.push_str(component);
                    }
                    None => {
                        expr.push_str(&format!("[{}]", self.to_expression(*index)?));
                        deps.extend(self.expression_deps(*index));
                    }
                }
                current_type_id = ty.parent_type;
            } else {
                return Err(CompileError::InvalidOpcodeArg(String::from(
                    "access chain walks into a non-composite type",
                )));
            }
        }

        self.exprs.insert(
            id,
            CachedExpr {
                text: expr,
                result_type,
                forwarded: true,
                deps,
                base_variable,
                need_transpose,
                needs_parens: false,
            },
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Common instruction dispatch

    /// Emit an instruction of the shared C-family subset
    pub(crate) fn emit_instruction_common(
        &mut self,
        instruction: &Instruction,
    ) -> Result<(), CompileError> {
        let opcode = instruction.opcode().ok_or_else(|| {
            CompileError::UnsupportedOp(format!("opcode {}", instruction.op))
        })?;
        let ops = &instruction.operands;

        match opcode {
            spv::Op::Load => {
                let ptr = ops[2];
                if self.invalid_expressions.contains(&ptr) {
                    self.forced_temporaries.insert(ptr);
                    self.force_recompile = true;
                }
                let forward = self.should_forward(ptr);
                let text = match self.exprs.get(&ptr).cloned() {
                    // Forward the chain text unconverted and carry the
                    // row-major marker on the load itself
                    Some(expr) => expr.text,
                    None => self.to_expression(ptr)?,
                };
                let need_transpose = self
                    .exprs
                    .get(&ptr)
                    .map_or(false, |e| e.need_transpose);
                let deps = self.expression_deps(ptr);
                let base_variable = self.maybe_get_backing_variable(ptr).unwrap_or(0);

                if forward {
                    self.exprs.insert(
                        ops[1],
                        CachedExpr {
                            text,
                            result_type: ops[0],
                            forwarded: true,
                            deps,
                            base_variable,
                            need_transpose,
                            needs_parens: false,
                        },
                    );
                } else {
                    self.emit_op(ops[0], ops[1], text, false, false, deps)?;
                    if let Some(expr) = self.exprs.get_mut(&ops[1]) {
                        expr.base_variable = base_variable;
                    }
                }
            }

            spv::Op::Store => {
                self.emit_store(ops[0], ops[1])?;
            }

            spv::Op::CopyMemory => {
                let rhs = self.to_expression(ops[1])?;
                let lhs = self.to_expression(ops[0])?;
                self.statement(format!("{} = {};", lhs, rhs));
                if let Some(var) = self.maybe_get_backing_variable(ops[0]) {
                    self.invalidate_expressions_reading(var);
                }
            }

            spv::Op::CopyObject => {
                let forward = self.should_forward(ops[2]);
                let deps = self.expression_deps(ops[2]);
                let rhs = self.to_expression(ops[2])?;
                self.emit_op(ops[0], ops[1], rhs, forward, false, deps)?;
            }

            spv::Op::AccessChain | spv::Op::InBoundsAccessChain => {
                self.emit_access_chain(ops[0], ops[1], ops[2], &ops[3..])?;
            }

            spv::Op::FunctionCall => {
                self.emit_function_call(ops[0], ops[1], ops[2], &ops[3..])?;
            }

            // Arithmetic
            spv::Op::IAdd | spv::Op::FAdd => self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "+")?,
            spv::Op::ISub | spv::Op::FSub => self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "-")?,
            spv::Op::IMul
            | spv::Op::FMul
            | spv::Op::MatrixTimesScalar
            | spv::Op::VectorTimesScalar
            | spv::Op::MatrixTimesMatrix => {
                self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "*")?
            }
            spv::Op::UDiv | spv::Op::SDiv | spv::Op::FDiv => {
                self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "/")?
            }
            spv::Op::UMod | spv::Op::SRem => self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "%")?,
            spv::Op::FRem => self.emit_binary_func_op(ops[0], ops[1], ops[2], ops[3], "fmod")?,
            spv::Op::FMod => self.emit_binary_func_op(ops[0], ops[1], ops[2], ops[3], "mod")?,
            spv::Op::SNegate | spv::Op::FNegate => self.emit_unary_op(ops[0], ops[1], ops[2], "-")?,

            // Bits
            spv::Op::ShiftLeftLogical => self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "<<")?,
            spv::Op::ShiftRightLogical | spv::Op::ShiftRightArithmetic => {
                self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], ">>")?
            }
            spv::Op::BitwiseAnd => self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "&")?,
            spv::Op::BitwiseOr => self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "|")?,
            spv::Op::BitwiseXor => self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "^")?,
            spv::Op::Not => self.emit_unary_op(ops[0], ops[1], ops[2], "~")?,

            // Logical
            spv::Op::LogicalAnd => self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "&&")?,
            spv::Op::LogicalOr => self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "||")?,
            spv::Op::LogicalNot => self.emit_unary_op(ops[0], ops[1], ops[2], "!")?,

            spv::Op::Select => {
                let forward = self.should_forward(ops[2])
                    && self.should_forward(ops[3])
                    && self.should_forward(ops[4]);
                let mut deps = self.expression_deps(ops[2]);
                deps.extend(self.expression_deps(ops[3]));
                deps.extend(self.expression_deps(ops[4]));
                let cond_type = self.expression_type(ops[2])?;
                let rhs = if cond_type.vecsize > 1 {
                    // Metal select takes the false value first
                    format!(
                        "select({}, {}, {})",
                        self.to_expression(ops[4])?,
                        self.to_expression(ops[3])?,
                        self.to_expression(ops[2])?
                    )
                } else {
                    format!(
                        "{} ? {} : {}",
                        self.to_enclosed_expression(ops[2])?,
                        self.to_enclosed_expression(ops[3])?,
                        self.to_enclosed_expression(ops[4])?
                    )
                };
                let needs_parens = cond_type.vecsize == 1;
                self.emit_op(ops[0], ops[1], rhs, forward, needs_parens, deps)?;
            }

            spv::Op::Dot => self.emit_binary_func_op(ops[0], ops[1], ops[2], ops[3], "dot")?,
            spv::Op::Transpose => self.emit_unary_func_op(ops[0], ops[1], ops[2], "transpose")?,

            // Conversions
            spv::Op::ConvertFToU
            | spv::Op::ConvertFToS
            | spv::Op::ConvertSToF
            | spv::Op::ConvertUToF
            | spv::Op::UConvert
            | spv::Op::SConvert
            | spv::Op::FConvert => {
                let ty = self.module.get_type(ops[0]).clone();
                let name = self.type_to_msl(&ty, 0)?;
                self.emit_unary_func_op(ops[0], ops[1], ops[2], &name)?;
            }

            spv::Op::Bitcast => {
                let out_ty = self.module.get_type(ops[0]).clone();
                let in_ty = self.expression_type(ops[2])?;
                let op = self.bitcast_msl_op(&out_ty, &in_ty)?;
                if op.is_empty() {
                    let name = self.type_to_msl(&out_ty, 0)?;
                    self.emit_unary_func_op(ops[0], ops[1], ops[2], &name)?;
                } else {
                    self.emit_unary_func_op(ops[0], ops[1], ops[2], &op)?;
                }
            }

            // Composites
            spv::Op::CompositeConstruct => {
                let ty = self.module.get_type(ops[0]).clone();
                let mut parts = Vec::new();
                let mut deps = Vec::new();
                let mut forward = true;
                for arg in &ops[2..] {
                    forward = forward && self.should_forward(*arg);
                    deps.extend(self.expression_deps(*arg));
                    parts.push(self.to_expression(*arg)?);
                }
                let rhs = if ty.is_array() || ty.basetype == BaseType::Struct {
                    format!("{{ {} }}", parts.join(", "))
                } else {
                    format!("{}({})", self.type_to_msl(&ty, 0)?, parts.join(", "))
                };
                self.emit_op(ops[0], ops[1], rhs, forward, false, deps)?;
            }

            spv::Op::CompositeExtract => {
                let forward = self.should_forward(ops[2]);
                let deps = self.expression_deps(ops[2]);
                let mut expr = self.to_enclosed_expression(ops[2])?;
                let mut current_type_id = self.expression_type_id(ops[2])?;
                for literal in &ops[3..] {
                    let ty = self.module.get_type(current_type_id).clone();
                    if ty.is_array() {
                        expr.push_str(&format!("[{}]", literal));
                        current_type_id = ty.parent_type;
                    } else if ty.basetype == BaseType::Struct {
                        expr.push('.');
                        expr.push_str(&self.to_member_name(ty.self_id, *literal));
                        current_type_id = ty.member_types[*literal as usize];
                    } else if ty.is_matrix() {
                        expr.push_str(&format!("[{}]", literal));
                        current_type_id = ty.parent_type;
                    } else {
                        let component = match *literal {
                            0 => ".x",
                            1 => ".y",
                            2 => ".z",
                            3 => ".w",
                            _ => {
                                return Err(CompileError::InvalidOpcodeArg(String::from(
                                    "composite extract component out of range",
                                )))
                            }
                        };
                        expr.push_str(component);
                        current_type_id = ty.parent_type;
                    }
                }
                self.emit_op(ops[0], ops[1], expr, forward, false, deps)?;
            }

            spv::Op::CompositeInsert => {
                // Copy the composite into a temporary, overwrite the element,
                // and let the temporary stand for the result
                self.forced_temporaries.insert(ops[1]);
                let composite = self.to_expression(ops[3])?;
                self.emit_op(ops[0], ops[1], composite, false, false, Vec::new())?;
                let mut lhs = self.to_name(ops[1]);
                let mut current_type_id = ops[0];
                for literal in &ops[4..] {
                    let ty = self.module.get_type(current_type_id).clone();
                    if ty.is_array() || ty.is_matrix() {
                        lhs.push_str(&format!("[{}]", literal));
                        current_type_id = ty.parent_type;
                    } else if ty.basetype == BaseType::Struct {
                        lhs.push('.');
                        lhs.push_str(&self.to_member_name(ty.self_id, *literal));
                        current_type_id = ty.member_types[*literal as usize];
                    } else {
                        lhs.push_str(match *literal {
                            0 => ".x",
                            1 => ".y",
                            2 => ".z",
                            _ => ".w",
                        });
                        current_type_id = ty.parent_type;
                    }
                }
                let object = self.to_expression(ops[2])?;
                self.statement(format!("{} = {};", lhs, object));
            }

            spv::Op::VectorShuffle => {
                self.emit_vector_shuffle(ops[0], ops[1], ops[2], ops[3], &ops[4..])?;
            }

            spv::Op::VectorExtractDynamic => {
                let forward = self.should_forward(ops[2]) && self.should_forward(ops[3]);
                let mut deps = self.expression_deps(ops[2]);
                deps.extend(self.expression_deps(ops[3]));
                let rhs = format!(
                    "{}[{}]",
                    self.to_enclosed_expression(ops[2])?,
                    self.to_expression(ops[3])?
                );
                self.emit_op(ops[0], ops[1], rhs, forward, false, deps)?;
            }

            spv::Op::ExtInst => {
                self.emit_ext_inst(instruction)?;
            }

            spv::Op::SampledImage => {
                // The image stands for the combined object; remember which
                // sampler joined it
                let image_expr = self.to_expression(ops[2])?;
                let base_variable = self.maybe_get_backing_variable(ops[2]).unwrap_or(0);
                self.exprs.insert(
                    ops[1],
                    CachedExpr {
                        text: image_expr,
                        result_type: ops[0],
                        forwarded: true,
                        deps: self.expression_deps(ops[2]),
                        base_variable,
                        need_transpose: false,
                        needs_parens: false,
                    },
                );
                self.module.meta_mut(ops[1]).sampler = ops[3];
            }

            spv::Op::Image => {
                let rhs = self.to_expression(ops[2])?;
                let deps = self.expression_deps(ops[2]);
                let base_variable = self.maybe_get_backing_variable(ops[2]).unwrap_or(0);
                self.exprs.insert(
                    ops[1],
                    CachedExpr {
                        text: rhs,
                        result_type: ops[0],
                        forwarded: true,
                        deps,
                        base_variable,
                        need_transpose: false,
                        needs_parens: false,
                    },
                );
            }

            spv::Op::ImageSampleImplicitLod
            | spv::Op::ImageSampleExplicitLod
            | spv::Op::ImageSampleDrefImplicitLod
            | spv::Op::ImageSampleDrefExplicitLod
            | spv::Op::ImageSampleProjImplicitLod
            | spv::Op::ImageSampleProjExplicitLod
            | spv::Op::ImageSampleProjDrefImplicitLod
            | spv::Op::ImageSampleProjDrefExplicitLod
            | spv::Op::ImageFetch
            | spv::Op::ImageGather
            | spv::Op::ImageDrefGather => {
                self.emit_texture_op(instruction)?;
            }

            spv::Op::ArrayLength => {
                return Err(CompileError::UnsupportedOp(String::from(
                    "OpArrayLength is not representable in MSL",
                )));
            }

            spv::Op::Nop => {}

            other => {
                return Err(CompileError::UnsupportedOp(format!("{:?}", other)));
            }
        }

        Ok(())
    }

    /// Plain stores; the MSL layer has already peeled off the special cases
    pub(crate) fn emit_store(&mut self, id_lhs: u32, id_rhs: u32) -> Result<(), CompileError> {
        let rhs = self.to_expression(id_rhs)?;
        let lhs = self.to_expression(id_lhs)?;
        self.statement(format!("{} = {};", lhs, rhs));
        if let Some(var) = self.maybe_get_backing_variable(id_lhs) {
            self.invalidate_expressions_reading(var);
        }
        Ok(())
    }

    fn emit_vector_shuffle(
        &mut self,
        result_type: u32,
        id: u32,
        vec0: u32,
        vec1: u32,
        components: &[u32],
    ) -> Result<(), CompileError> {
        let vec0_type = self.expression_type(vec0)?;
        let vec0_size = vec0_type.vecsize;
        let single_source = components
            .iter()
            .all(|component| *component < vec0_size);

        if single_source {
            // A shuffle of one vector is a swizzle
            let mut swizzle = String::from(".");
            for component in components {
                swizzle.push(match *component {
                    0 => 'x',
                    1 => 'y',
                    2 => 'z',
                    _ => 'w',
                });
            }
            let forward = self.should_forward(vec0);
            let deps = self.expression_deps(vec0);
            let rhs = format!("{}{}", self.to_enclosed_expression(vec0)?, swizzle);
            self.emit_op(result_type, id, rhs, forward, false, deps)?;
        } else {
            // Shuffles mixing two vectors construct the result through a
            // named temporary
            let ty = self.module.get_type(result_type).clone();
            let mut parts = Vec::new();
            for component in components {
                if *component < vec0_size {
                    parts.push(format!(
                        "{}{}",
                        self.to_enclosed_expression(vec0)?,
                        component_swizzle(*component)
                    ));
                } else {
                    parts.push(format!(
                        "{}{}",
                        self.to_enclosed_expression(vec1)?,
                        component_swizzle(*component - vec0_size)
                    ));
                }
            }
            let rhs = format!("{}({})", self.type_to_msl(&ty, 0)?, parts.join(", "));
            self.forced_temporaries.insert(id);
            self.emit_op(result_type, id, rhs, false, false, Vec::new())?;
        }
        Ok(())
    }

    fn emit_function_call(
        &mut self,
        result_type: u32,
        id: u32,
        func_id: u32,
        args: &[u32],
    ) -> Result<(), CompileError> {
        let mut arglist = Vec::new();
        for arg in args {
            arglist.push(self.to_func_call_arg(*arg)?);
        }

        // Globals threaded through the signature are appended by name; the
        // pass-through parameters carry the same alias on both sides
        let callee_args = self.module.get_function(func_id).arguments.clone();
        for parameter in callee_args.iter().skip(args.len()) {
            if parameter.alias_global_variable {
                arglist.push(self.to_func_call_arg(parameter.id)?);
            }
        }

        let call = format!("{}({})", self.module.get_name(func_id), arglist.join(", "));

        let is_void = self.module.get_type(result_type).basetype == BaseType::Void;
        if is_void {
            self.statement(format!("{};", call));
        } else {
            self.forced_temporaries.insert(id);
            self.emit_op(result_type, id, call, false, false, Vec::new())?;
        }

        // The callee may have written through any argument, so nothing
        // forwarded across the call can stay pending
        self.invalidate_all_dependent_expressions();
        Ok(())
    }

    /// Expression for an id used as a call argument; sampled image arguments
    /// bring their sampler along
    pub(crate) fn to_func_call_arg(&mut self, id: u32) -> Result<String, CompileError> {
        let mut arg = self.to_expression(id)?;

        if self.module.id_kind(id) == IdEntry::Variable {
            let type_id = self.module.get_variable(id).basetype;
            let ty = self.module.get_type(type_id);
            if ty.basetype == BaseType::SampledImage && ty.image.dim != spv::Dim::DimBuffer {
                let sampler = self.to_sampler_expression(id)?;
                arg.push_str(&format!(", {}", sampler));
            }
        }

        Ok(arg)
    }

    /// Sampler joined to a sampled image, or the derived sampler name for
    /// images that never met one
    pub(crate) fn to_sampler_expression(&mut self, id: u32) -> Result<String, CompileError> {
        let samp_id = self.module.meta(id).map_or(0, |m| m.sampler);
        if samp_id != 0 {
            self.to_expression(samp_id)
        } else {
            Ok(format!("{}{}", self.to_expression(id)?, crate::names::SAMPLER_NAME_SUFFIX))
        }
    }

    // ------------------------------------------------------------------
    // Extended instruction sets

    fn emit_ext_inst(&mut self, instruction: &Instruction) -> Result<(), CompileError> {
        let ops = &instruction.operands;
        let set = ops[2];
        if self.module.extensions.get(&set) != Some(&smelt_ir::ExtensionKind::GlslStd450) {
            return Err(CompileError::UnsupportedOp(String::from(
                "unknown extended instruction set",
            )));
        }

        let glsl_op = spv::GLOp::from_u32(ops[3]).ok_or_else(|| {
            CompileError::UnsupportedOp(format!("GLSL.std.450 opcode {}", ops[3]))
        })?;

        self.emit_glsl_op(ops[0], ops[1], glsl_op, &ops[4..])
    }

    /// The GLSL.std.450 subset whose lowering is target independent
    pub(crate) fn emit_glsl_op_common(
        &mut self,
        result_type: u32,
        id: u32,
        op: spv::GLOp,
        args: &[u32],
    ) -> Result<(), CompileError> {
        use spv::GLOp;

        let unary = |name: &'static str| -> Option<&'static str> { Some(name) };

        let name = match op {
            GLOp::Round => unary("round"),
            GLOp::Trunc => unary("trunc"),
            GLOp::FAbs | GLOp::SAbs => unary("abs"),
            GLOp::FSign | GLOp::SSign => unary("sign"),
            GLOp::Floor => unary("floor"),
            GLOp::Ceil => unary("ceil"),
            GLOp::Fract => unary("fract"),
            GLOp::Radians => unary("radians"),
            GLOp::Degrees => unary("degrees"),
            GLOp::Sin => unary("sin"),
            GLOp::Cos => unary("cos"),
            GLOp::Tan => unary("tan"),
            GLOp::Asin => unary("asin"),
            GLOp::Acos => unary("acos"),
            GLOp::Atan => unary("atan"),
            GLOp::Sinh => unary("sinh"),
            GLOp::Cosh => unary("cosh"),
            GLOp::Tanh => unary("tanh"),
            GLOp::Asinh => unary("asinh"),
            GLOp::Acosh => unary("acosh"),
            GLOp::Atanh => unary("atanh"),
            GLOp::Exp => unary("exp"),
            GLOp::Log => unary("log"),
            GLOp::Exp2 => unary("exp2"),
            GLOp::Log2 => unary("log2"),
            GLOp::Sqrt => unary("sqrt"),
            GLOp::Determinant => unary("determinant"),
            GLOp::Normalize => unary("normalize"),
            GLOp::Length => unary("length"),
            GLOp::FindILsb => unary("findLSB"),
            _ => None,
        };
        if let Some(name) = name {
            return self.emit_unary_func_op(result_type, id, args[0], name);
        }

        let binary = match op {
            GLOp::Pow => Some("pow"),
            GLOp::FMin | GLOp::UMin | GLOp::SMin | GLOp::NMin => Some("min"),
            GLOp::FMax | GLOp::UMax | GLOp::SMax | GLOp::NMax => Some("max"),
            GLOp::Step => Some("step"),
            GLOp::Distance => Some("distance"),
            GLOp::Cross => Some("cross"),
            GLOp::Reflect => Some("reflect"),
            GLOp::Ldexp => Some("ldexp"),
            _ => None,
        };
        if let Some(name) = binary {
            return self.emit_binary_func_op(result_type, id, args[0], args[1], name);
        }

        let trinary = match op {
            GLOp::FClamp | GLOp::UClamp | GLOp::SClamp | GLOp::NClamp => Some("clamp"),
            GLOp::FMix | GLOp::IMix => Some("mix"),
            GLOp::SmoothStep => Some("smoothstep"),
            GLOp::Fma => Some("fma"),
            GLOp::Refract => Some("refract"),
            GLOp::FaceForward => Some("faceforward"),
            _ => None,
        };
        if let Some(name) = trinary {
            return self.emit_trinary_func_op(result_type, id, args[0], args[1], args[2], name);
        }

        Err(CompileError::UnsupportedOp(format!("GLSL.std.450 {:?}", op)))
    }

    // ------------------------------------------------------------------
    // Texture sampling

    /// Emit one of the sampling and gathering image operations
    pub(crate) fn emit_texture_op(&mut self, instruction: &Instruction) -> Result<(), CompileError> {
        let opcode = instruction.opcode().ok_or_else(|| {
            CompileError::UnsupportedOp(format!("opcode {}", instruction.op))
        })?;
        let ops = &instruction.operands;

        let is_fetch = matches!(opcode, spv::Op::ImageFetch | spv::Op::ImageRead);
        let is_gather = matches!(opcode, spv::Op::ImageGather | spv::Op::ImageDrefGather);
        let is_proj = matches!(
            opcode,
            spv::Op::ImageSampleProjImplicitLod
                | spv::Op::ImageSampleProjExplicitLod
                | spv::Op::ImageSampleProjDrefImplicitLod
                | spv::Op::ImageSampleProjDrefExplicitLod
        );
        let has_dref = matches!(
            opcode,
            spv::Op::ImageSampleDrefImplicitLod
                | spv::Op::ImageSampleDrefExplicitLod
                | spv::Op::ImageSampleProjDrefImplicitLod
                | spv::Op::ImageSampleProjDrefExplicitLod
                | spv::Op::ImageDrefGather
        );

        let result_type = ops[0];
        let id = ops[1];
        let img = ops[2];
        let coord = ops[3];

        let mut dref = 0;
        let mut comp = 0;
        let mut fixed = 4;
        if has_dref {
            dref = ops[fixed];
            fixed += 1;
        } else if is_gather {
            comp = ops[fixed];
            fixed += 1;
        }

        // Decode the image operand mask
        let mut bias = 0;
        let mut lod = 0;
        let mut grad_x = 0;
        let mut grad_y = 0;
        let mut coffset = 0;
        let mut offset = 0;
        let mut sample = 0;
        if ops.len() > fixed {
            let flags = spv::ImageOperands::from_bits_truncate(ops[fixed]);
            let mut cursor = fixed + 1;
            let mut next = |count: usize| {
                let value = ops.get(cursor).copied().unwrap_or(0);
                cursor += count;
                value
            };
            if flags.contains(spv::ImageOperands::BIAS) {
                bias = next(1);
            }
            if flags.contains(spv::ImageOperands::LOD) {
                lod = next(1);
            }
            if flags.contains(spv::ImageOperands::GRAD) {
                grad_x = next(1);
                grad_y = next(1);
            }
            if flags.contains(spv::ImageOperands::CONST_OFFSET) {
                coffset = next(1);
            }
            if flags.contains(spv::ImageOperands::OFFSET) {
                offset = next(1);
            }
            if flags.contains(spv::ImageOperands::CONST_OFFSETS) {
                next(1);
            }
            if flags.contains(spv::ImageOperands::SAMPLE) {
                sample = next(1);
            }
        }

        let img_type_id = self.expression_type_id(img)?;
        let img_type = self.module.get_type(img_type_id).clone();

        let fname = self.texture_op_name(img, is_fetch, is_gather, has_dref)?;
        let mut forward = true;
        let fargs = self.texture_op_args(
            img, &img_type, is_fetch, is_proj, coord, dref, grad_x, grad_y, lod, coffset, offset,
            bias, comp, sample, &mut forward,
        )?;

        let rhs = format!("{}({})", fname, fargs);
        let deps = self.expression_deps(img);
        self.emit_op(result_type, id, rhs, forward, false, deps)
    }

    /// Texture function name for the image and sampling flavor
    fn texture_op_name(
        &mut self,
        img: u32,
        is_fetch: bool,
        is_gather: bool,
        has_dref: bool,
    ) -> Result<String, CompileError> {
        let mut fname = self.to_expression(img)?;
        fname.push('.');

        if is_fetch {
            fname.push_str("read");
        } else if is_gather {
            fname.push_str("gather");
        } else {
            fname.push_str("sample");
        }

        if has_dref {
            fname.push_str("_compare");
        }

        Ok(fname)
    }

    /// Argument list of a texture function, swizzling and rounding the
    /// coordinates to the shape Metal expects for the image dimensionality
    #[allow(clippy::too_many_arguments)]
    fn texture_op_args(
        &mut self,
        img: u32,
        img_type: &SpirType,
        is_fetch: bool,
        is_proj: bool,
        coord: u32,
        dref: u32,
        grad_x: u32,
        grad_y: u32,
        lod: u32,
        coffset: u32,
        offset: u32,
        bias: u32,
        comp: u32,
        sample: u32,
        forward: &mut bool,
    ) -> Result<String, CompileError> {
        let image = self.module.get_type(img_type.self_id).image;

        let mut farg_str = String::new();
        if !is_fetch {
            farg_str = self.to_sampler_expression(img)?;
        }

        *forward = self.should_forward(coord);
        let coord_expr = self.to_enclosed_expression(coord)?;
        let coord_type = self.expression_type(coord)?;
        let coord_is_fp = matches!(coord_type.basetype, BaseType::Float | BaseType::Double);

        let mut tex_coords = coord_expr.clone();
        let mut alt_coord = "";
        let mut is_cube_fetch = false;

        match image.dim {
            spv::Dim::Dim1D => {
                if coord_type.vecsize > 1 {
                    tex_coords.push_str(".x");
                }
                if is_fetch {
                    tex_coords = format!("uint({})", round_fp_tex_coords(&tex_coords, coord_is_fp));
                }
                alt_coord = ".y";
            }
            spv::Dim::DimBuffer => {
                if coord_type.vecsize > 1 {
                    tex_coords.push_str(".x");
                }
                if is_fetch {
                    // Metal texel buffers are addressed as 2D textures
                    tex_coords =
                        format!("uint2({}, 0)", round_fp_tex_coords(&tex_coords, coord_is_fp));
                }
                alt_coord = ".y";
            }
            spv::Dim::Dim2D => {
                if coord_type.vecsize > 2 {
                    tex_coords.push_str(".xy");
                }
                if is_fetch {
                    tex_coords = format!("uint2({})", round_fp_tex_coords(&tex_coords, coord_is_fp));
                }
                alt_coord = ".z";
            }
            spv::Dim::Dim3D => {
                if coord_type.vecsize > 3 {
                    tex_coords.push_str(".xyz");
                }
                if is_fetch {
                    tex_coords = format!("uint3({})", round_fp_tex_coords(&tex_coords, coord_is_fp));
                }
                alt_coord = ".w";
            }
            spv::Dim::DimCube => {
                if is_fetch {
                    is_cube_fetch = true;
                    tex_coords.push_str(".xy");
                    tex_coords = format!("uint2({})", round_fp_tex_coords(&tex_coords, coord_is_fp));
                } else if coord_type.vecsize > 3 {
                    tex_coords.push_str(".xyz");
                }
                alt_coord = ".w";
            }
            _ => {}
        }

        // Use the alternate coordinate as the projection divisor
        if is_proj {
            tex_coords.push_str(&format!(" / {}{}", coord_expr, alt_coord));
        }

        if !farg_str.is_empty() {
            farg_str.push_str(", ");
        }
        farg_str.push_str(&tex_coords);

        // A cube fetch names the face explicitly
        if is_cube_fetch {
            farg_str.push_str(&format!(
                ", uint({})",
                round_fp_tex_coords(&format!("{}.z", coord_expr), coord_is_fp)
            ));
        }

        // Arrays pass the layer from the alternate coordinate
        if image.arrayed {
            farg_str.push_str(&format!(
                ", uint({})",
                round_fp_tex_coords(&format!("{}{}", coord_expr, alt_coord), coord_is_fp)
            ));
        }

        if dref != 0 {
            *forward = *forward && self.should_forward(dref);
            farg_str.push_str(", ");
            farg_str.push_str(&self.to_expression(dref)?);
        }

        if bias != 0 {
            *forward = *forward && self.should_forward(bias);
            farg_str.push_str(&format!(", bias({})", self.to_expression(bias)?));
        }

        if lod != 0 {
            *forward = *forward && self.should_forward(lod);
            if is_fetch {
                farg_str.push_str(&format!(", {}", self.to_expression(lod)?));
            } else {
                farg_str.push_str(&format!(", level({})", self.to_expression(lod)?));
            }
        }

        if grad_x != 0 || grad_y != 0 {
            *forward = *forward && self.should_forward(grad_x) && self.should_forward(grad_y);
            let grad_opt = match image.dim {
                spv::Dim::Dim2D => "2d",
                spv::Dim::Dim3D => "3d",
                spv::Dim::DimCube => "cube",
                _ => "unsupported_gradient_dimension",
            };
            farg_str.push_str(&format!(
                ", gradient{}({}, {})",
                grad_opt,
                self.to_expression(grad_x)?,
                self.to_expression(grad_y)?
            ));
        }

        let offset_id = if coffset != 0 { coffset } else { offset };
        if offset_id != 0 {
            *forward = *forward && self.should_forward(offset_id);
            let mut offset_expr = self.to_expression(offset_id)?;
            match image.dim {
                spv::Dim::Dim2D => {
                    if coord_type.vecsize > 2 {
                        offset_expr.push_str(".xy");
                    }
                    farg_str.push_str(&format!(", {}", offset_expr));
                }
                spv::Dim::Dim3D => {
                    if coord_type.vecsize > 3 {
                        offset_expr.push_str(".xyz");
                    }
                    farg_str.push_str(&format!(", {}", offset_expr));
                }
                _ => {}
            }
        }

        if comp != 0 {
            *forward = *forward && self.should_forward(comp);
            let comp_arg = self.to_component_argument(comp)?;
            farg_str.push_str(&format!(", {}", comp_arg));
        }

        if sample != 0 {
            farg_str.push_str(&format!(", {}", self.to_expression(sample)?));
        }

        Ok(farg_str)
    }

    /// Gather component selector; must be a constant in 0..=3
    fn to_component_argument(&self, id: u32) -> Result<&'static str, CompileError> {
        let constant = match self.module.try_get_constant(id) {
            Some(constant) => constant,
            None => {
                return Err(CompileError::InvalidOpcodeArg(format!(
                    "id {} is not an OpConstant",
                    id
                )))
            }
        };
        match constant.scalar() {
            0 => Ok("component::x"),
            1 => Ok("component::y"),
            2 => Ok("component::z"),
            3 => Ok("component::w"),
            other => Err(CompileError::InvalidOpcodeArg(format!(
                "the value ({}) of the component is not a valid component index, \
                 which must be one of 0, 1, 2, or 3",
                other
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Control flow

    /// Emit a chain of basic blocks as structured statements
    pub(crate) fn emit_block_chain(
        &mut self,
        start: u32,
        frames: &mut Vec<Frame>,
    ) -> Result<(), CompileError> {
        let mut block_id = start;
        loop {
            let block = self.module.get_block(block_id).clone();

            if block.merge == MergeKind::Loop {
                self.statement("for (;;)");
                self.begin_scope();
                frames.push(Frame::Loop {
                    merge: block.merge_block,
                    cont: block.continue_block,
                    header: block_id,
                });

                for instruction in &block.ops {
                    self.emit_instruction(instruction)?;
                }

                match block.terminator {
                    Terminator::Select => {
                        if block.false_block == block.merge_block {
                            let cond = self.to_enclosed_expression(block.condition)?;
                            self.statement(format!("if (!{}) break;", cond));
                            self.emit_block_chain(block.true_block, frames)?;
                        } else if block.true_block == block.merge_block {
                            let cond = self.to_enclosed_expression(block.condition)?;
                            self.statement(format!("if ({}) break;", cond));
                            self.emit_block_chain(block.false_block, frames)?;
                        } else {
                            return Err(CompileError::UnsupportedOp(String::from(
                                "irregular loop header",
                            )));
                        }
                    }
                    Terminator::Direct => {
                        self.emit_block_chain(block.next_block, frames)?;
                    }
                    _ => {
                        return Err(CompileError::UnsupportedOp(String::from(
                            "irregular loop header terminator",
                        )))
                    }
                }

                // A detached continue block runs at the bottom of each
                // iteration
                if block.continue_block != block_id
                    && block.continue_block != block.merge_block
                {
                    let cont = self.module.get_block(block.continue_block).clone();
                    for instruction in &cont.ops {
                        self.emit_instruction(instruction)?;
                    }
                }

                frames.pop();
                self.end_scope();
                block_id = block.merge_block;
                continue;
            }

            for instruction in &block.ops {
                self.emit_instruction(instruction)?;
            }

            match block.terminator {
                Terminator::Return => {
                    if self.processing_entry_point {
                        self.emit_fixup();
                    }
                    if block.return_value != 0 {
                        let value = self.to_expression(block.return_value)?;
                        self.statement(format!("return {};", value));
                    } else if !frames.is_empty() {
                        self.statement("return;");
                    }
                    return Ok(());
                }

                Terminator::Kill => {
                    self.statement("discard_fragment();");
                    return Ok(());
                }

                Terminator::Unreachable => return Ok(()),

                Terminator::Direct => {
                    match branch_action(block.next_block, frames) {
                        BranchAction::Fallthrough => return Ok(()),
                        BranchAction::Break => {
                            self.statement("break;");
                            return Ok(());
                        }
                        BranchAction::Continue => {
                            self.statement("continue;");
                            return Ok(());
                        }
                        BranchAction::Chain => {
                            block_id = block.next_block;
                            continue;
                        }
                    }
                }

                Terminator::Select => {
                    if block.merge == MergeKind::Selection {
                        let cond = self.to_expression(block.condition)?;
                        self.statement(format!("if ({})", cond));
                        self.begin_scope();
                        frames.push(Frame::Selection {
                            merge: block.merge_block,
                        });
                        self.emit_block_chain(block.true_block, frames)?;
                        frames.pop();
                        self.end_scope();

                        if block.false_block != block.merge_block {
                            self.statement("else");
                            self.begin_scope();
                            frames.push(Frame::Selection {
                                merge: block.merge_block,
                            });
                            self.emit_block_chain(block.false_block, frames)?;
                            frames.pop();
                            self.end_scope();
                        }

                        block_id = block.merge_block;
                        continue;
                    }

                    // A conditional branch without a merge must resolve into
                    // the surrounding construct
                    let true_action = branch_action(block.true_block, frames);
                    let false_action = branch_action(block.false_block, frames);
                    match (true_action, false_action) {
                        (BranchAction::Chain, action) if action != BranchAction::Chain => {
                            let cond = self.to_enclosed_expression(block.condition)?;
                            self.statement(format!("if (!{})", cond));
                            self.begin_scope();
                            self.emit_branch_action(action);
                            self.end_scope();
                            block_id = block.true_block;
                            continue;
                        }
                        (action, BranchAction::Chain) if action != BranchAction::Chain => {
                            let cond = self.to_enclosed_expression(block.condition)?;
                            self.statement(format!("if ({})", cond));
                            self.begin_scope();
                            self.emit_branch_action(action);
                            self.end_scope();
                            block_id = block.false_block;
                            continue;
                        }
                        _ => {
                            return Err(CompileError::UnsupportedOp(String::from(
                                "irreducible conditional branch",
                            )))
                        }
                    }
                }

                Terminator::MultiSelect => {
                    let selector = self.to_expression(block.condition)?;
                    self.statement(format!("switch ({})", selector));
                    self.begin_scope();
                    frames.push(Frame::Selection {
                        merge: block.merge_block,
                    });

                    for (value, target) in &block.cases {
                        self.statement(format!("case {}:", value));
                        self.begin_scope();
                        self.emit_block_chain(*target, frames)?;
                        self.statement("break;");
                        self.end_scope();
                    }

                    if block.default_block != block.merge_block {
                        self.statement("default:");
                        self.begin_scope();
                        self.emit_block_chain(block.default_block, frames)?;
                        self.statement("break;");
                        self.end_scope();
                    }

                    frames.pop();
                    self.end_scope();
                    block_id = block.merge_block;
                    continue;
                }

                Terminator::Unknown => {
                    return Err(CompileError::UnsupportedOp(String::from(
                        "block has no terminator",
                    )))
                }
            }
        }
    }

    fn emit_branch_action(&mut self, action: BranchAction) {
        match action {
            BranchAction::Break => self.statement("break;"),
            BranchAction::Continue => self.statement("continue;"),
            BranchAction::Fallthrough | BranchAction::Chain => {}
        }
    }
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
enum BranchAction {
    /// Target is where the innermost construct resumes; stop emitting
    Fallthrough,
    Break,
    Continue,
    /// Target is an ordinary successor; keep emitting
    Chain,
}

/// Resolve a branch target against the surrounding structured constructs
fn branch_action(target: u32, frames: &[Frame]) -> BranchAction {
    if let Some(innermost) = frames.last() {
        match innermost {
            Frame::Selection { merge } if *merge == target => return BranchAction::Fallthrough,
            Frame::Loop { merge, cont, header } => {
                if *merge == target {
                    return BranchAction::Break;
                }
                if *cont == target || *header == target {
                    return BranchAction::Fallthrough;
                }
            }
            _ => {}
        }
    }

    for frame in frames.iter().rev() {
        match frame {
            Frame::Selection { merge } if *merge == target => return BranchAction::Fallthrough,
            Frame::Loop { merge, cont, header } => {
                if *merge == target {
                    return BranchAction::Break;
                }
                if *cont == target || *header == target {
                    return BranchAction::Continue;
                }
            }
            _ => {}
        }
    }

    BranchAction::Chain
}

fn component_swizzle(component: u32) -> &'static str {
    match component {
        0 => ".x",
        1 => ".y",
        2 => ".z",
        _ => ".w",
    }
}

fn round_fp_tex_coords(tex_coords: &str, coord_is_fp: bool) -> String {
    if coord_is_fp {
        format!("round({})", tex_coords)
    } else {
        String::from(tex_coords)
    }
}

/// Scalar literal formatting; Rust's float formatting is locale independent,
/// which stands in for the classic-locale scope the text format requires
pub(crate) fn format_float(value: f32) -> String {
    if value.is_infinite() || value.is_nan() {
        // Surface the issue with line context rather than failing the build
        // of every shader that carries an unusual constant
        log::warn!("emitting non-finite float constant");
        return String::from(if value.is_nan() {
            "(0.0 / 0.0)"
        } else if value > 0.0 {
            "(1.0 / 0.0)"
        } else {
            "(-1.0 / 0.0)"
        });
    }
    let formatted = format!("{:?}", value);
    if formatted.contains('.') || formatted.contains('e') {
        formatted
    } else {
        format!("{}.0", formatted)
    }
}

pub(crate) fn format_double(value: f64) -> String {
    if value.is_infinite() || value.is_nan() {
        log::warn!("emitting non-finite double constant");
        return String::from(if value.is_nan() {
            "(0.0 / 0.0)"
        } else if value > 0.0 {
            "(1.0 / 0.0)"
        } else {
            "(-1.0 / 0.0)"
        });
    }
    let formatted = format!("{:?}", value);
    if formatted.contains('.') || formatted.contains('e') {
        formatted
    } else {
        format!("{}.0", formatted)
    }
}
