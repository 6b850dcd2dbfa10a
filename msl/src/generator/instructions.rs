//! MSL-specific instruction lowering
//!
//! Everything not handled here falls through to the common emitter.

use smelt_ir::{spv, BaseType, IdEntry, Instruction};

use super::Compiler;
use crate::CompileError;

/// Value operand of an atomic function
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
enum AtomicOperand {
    None,
    Id(u32),
    Literal(u32),
}

pub(crate) fn is_atomic_opcode(opcode: spv::Op) -> bool {
    matches!(
        opcode,
        spv::Op::AtomicExchange
            | spv::Op::AtomicCompareExchange
            | spv::Op::AtomicCompareExchangeWeak
            | spv::Op::AtomicLoad
            | spv::Op::AtomicStore
            | spv::Op::AtomicIIncrement
            | spv::Op::AtomicIDecrement
            | spv::Op::AtomicIAdd
            | spv::Op::AtomicISub
            | spv::Op::AtomicSMin
            | spv::Op::AtomicUMin
            | spv::Op::AtomicSMax
            | spv::Op::AtomicUMax
            | spv::Op::AtomicAnd
            | spv::Op::AtomicOr
            | spv::Op::AtomicXor
    )
}

impl Compiler {
    /// Emit a single instruction, routing MSL-specific syntax here and the
    /// common subset to the shared emitter
    pub(crate) fn emit_instruction(&mut self, instruction: &Instruction) -> Result<(), CompileError> {
        let opcode = match instruction.opcode() {
            Some(opcode) => opcode,
            None => {
                return Err(CompileError::UnsupportedOp(format!(
                    "opcode {}",
                    instruction.op
                )))
            }
        };
        let ops = &instruction.operands;

        match opcode {
            // Comparisons
            spv::Op::IEqual | spv::Op::LogicalEqual | spv::Op::FOrdEqual => {
                self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "==")?
            }
            spv::Op::INotEqual | spv::Op::LogicalNotEqual | spv::Op::FOrdNotEqual => {
                self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "!=")?
            }
            spv::Op::UGreaterThan | spv::Op::SGreaterThan | spv::Op::FOrdGreaterThan => {
                self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], ">")?
            }
            spv::Op::UGreaterThanEqual
            | spv::Op::SGreaterThanEqual
            | spv::Op::FOrdGreaterThanEqual => {
                self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], ">=")?
            }
            spv::Op::ULessThan | spv::Op::SLessThan | spv::Op::FOrdLessThan => {
                self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "<")?
            }
            spv::Op::ULessThanEqual | spv::Op::SLessThanEqual | spv::Op::FOrdLessThanEqual => {
                self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "<=")?
            }

            // Derivatives
            spv::Op::DPdx | spv::Op::DPdxFine | spv::Op::DPdxCoarse => {
                self.emit_unary_func_op(ops[0], ops[1], ops[2], "dfdx")?
            }
            spv::Op::DPdy | spv::Op::DPdyFine | spv::Op::DPdyCoarse => {
                self.emit_unary_func_op(ops[0], ops[1], ops[2], "dfdy")?
            }

            // Bitfield
            spv::Op::BitFieldInsert => {
                self.emit_quaternary_func_op(ops[0], ops[1], ops[2], ops[3], ops[4], ops[5], "insert_bits")?
            }
            spv::Op::BitFieldSExtract | spv::Op::BitFieldUExtract => {
                self.emit_trinary_func_op(ops[0], ops[1], ops[2], ops[3], ops[4], "extract_bits")?
            }
            spv::Op::BitReverse => self.emit_unary_func_op(ops[0], ops[1], ops[2], "reverse_bits")?,
            spv::Op::BitCount => self.emit_unary_func_op(ops[0], ops[1], ops[2], "popcount")?,

            // Atomics
            spv::Op::AtomicExchange => {
                let (result_type, id, ptr, val) = (ops[0], ops[1], ops[2], ops[5]);
                self.emit_atomic_func_op(
                    result_type,
                    id,
                    "atomic_exchange_explicit",
                    false,
                    ptr,
                    AtomicOperand::Id(val),
                    false,
                    0,
                )?;
            }

            spv::Op::AtomicCompareExchange | spv::Op::AtomicCompareExchangeWeak => {
                let (result_type, id, ptr, val, comp) = (ops[0], ops[1], ops[2], ops[6], ops[7]);
                self.emit_atomic_func_op(
                    result_type,
                    id,
                    "atomic_compare_exchange_weak_explicit",
                    true,
                    ptr,
                    AtomicOperand::Id(comp),
                    true,
                    val,
                )?;
            }

            spv::Op::AtomicLoad => {
                let (result_type, id, ptr) = (ops[0], ops[1], ops[2]);
                self.emit_atomic_func_op(
                    result_type,
                    id,
                    "atomic_load_explicit",
                    false,
                    ptr,
                    AtomicOperand::None,
                    false,
                    0,
                )?;
            }

            spv::Op::AtomicStore => {
                // The pointer operand feeds all three roles here; the base
                // emitter resolves the value type behind it
                let result_type = self.expression_type_id(ops[0])?;
                let id = ops[0];
                let ptr = ops[0];
                let val = ops[3];
                self.emit_atomic_func_op(
                    result_type,
                    id,
                    "atomic_store_explicit",
                    false,
                    ptr,
                    AtomicOperand::Id(val),
                    false,
                    0,
                )?;
            }

            spv::Op::AtomicIIncrement => {
                self.emit_atomic_fetch_op(ops, "atomic_fetch_add_explicit", AtomicOperand::Literal(1))?;
            }
            spv::Op::AtomicIDecrement => {
                self.emit_atomic_fetch_op(ops, "atomic_fetch_sub_explicit", AtomicOperand::Literal(1))?;
            }
            spv::Op::AtomicIAdd => {
                self.emit_atomic_fetch_op(ops, "atomic_fetch_add_explicit", AtomicOperand::Id(ops[5]))?;
            }
            spv::Op::AtomicISub => {
                self.emit_atomic_fetch_op(ops, "atomic_fetch_sub_explicit", AtomicOperand::Id(ops[5]))?;
            }
            spv::Op::AtomicSMin | spv::Op::AtomicUMin => {
                self.emit_atomic_fetch_op(ops, "atomic_fetch_min_explicit", AtomicOperand::Id(ops[5]))?;
            }
            spv::Op::AtomicSMax | spv::Op::AtomicUMax => {
                self.emit_atomic_fetch_op(ops, "atomic_fetch_max_explicit", AtomicOperand::Id(ops[5]))?;
            }
            spv::Op::AtomicAnd => {
                self.emit_atomic_fetch_op(ops, "atomic_fetch_and_explicit", AtomicOperand::Id(ops[5]))?;
            }
            spv::Op::AtomicOr => {
                self.emit_atomic_fetch_op(ops, "atomic_fetch_or_explicit", AtomicOperand::Id(ops[5]))?;
            }
            spv::Op::AtomicXor => {
                self.emit_atomic_fetch_op(ops, "atomic_fetch_xor_explicit", AtomicOperand::Id(ops[5]))?;
            }

            // Images: reads are fetches in Metal
            spv::Op::ImageRead => {
                // Mark that this shader reads from this image
                if let Some(var_id) = self.maybe_get_backing_variable(ops[2]) {
                    if self.module.has_decoration(var_id, spv::Decoration::NonReadable) {
                        self.module
                            .meta_mut(var_id)
                            .decoration
                            .clear_flag(spv::Decoration::NonReadable);
                        self.force_recompile = true;
                    }
                }
                self.emit_texture_op(instruction)?;
            }

            spv::Op::ImageWrite => {
                self.emit_image_write(instruction)?;
            }

            spv::Op::ImageQuerySize | spv::Op::ImageQuerySizeLod => {
                self.emit_image_query_size(instruction, opcode == spv::Op::ImageQuerySizeLod)?;
            }

            spv::Op::ImageQueryLevels => {
                let forward = self.should_forward(ops[2]);
                let deps = self.expression_deps(ops[2]);
                let rslt_type = self.module.get_type(ops[0]).clone();
                let rhs = format!(
                    "{}({}.get_num_mip_levels())",
                    self.type_to_msl(&rslt_type, 0)?,
                    self.to_expression(ops[2])?
                );
                self.emit_op(ops[0], ops[1], rhs, forward, false, deps)?;
            }

            spv::Op::ImageQuerySamples => {
                let forward = self.should_forward(ops[2]);
                let deps = self.expression_deps(ops[2]);
                let rslt_type = self.module.get_type(ops[0]).clone();
                let rhs = format!(
                    "{}({}.get_num_samples())",
                    self.type_to_msl(&rslt_type, 0)?,
                    self.to_expression(ops[2])?
                );
                self.emit_op(ops[0], ops[1], rhs, forward, false, deps)?;
            }

            // Casting
            spv::Op::QuantizeToF16 => {
                let ty = self.module.get_type(ops[0]).clone();
                let arg = self.to_expression(ops[2])?;
                let rhs = match ty.vecsize {
                    1 => format!("float(half({}))", arg),
                    2 => format!("float2(half2({}))", arg),
                    3 => format!("float3(half3({}))", arg),
                    4 => format!("float4(half4({}))", arg),
                    _ => {
                        return Err(CompileError::InvalidOpcodeArg(String::from(
                            "illegal argument to OpQuantizeToF16",
                        )))
                    }
                };
                let forward = self.should_forward(ops[2]);
                let deps = self.expression_deps(ops[2]);
                self.emit_op(ops[0], ops[1], rhs, forward, false, deps)?;
            }

            spv::Op::Store => {
                if self.maybe_emit_input_struct_assignment(ops[0], ops[1])? {
                    // Expanded member by member
                } else if self.maybe_emit_array_assignment(ops[0], ops[1])? {
                    // Lowered to the array copy helper
                } else {
                    self.emit_store(ops[0], ops[1])?;
                }
            }

            // Compute barriers
            spv::Op::MemoryBarrier => {
                self.emit_barrier(0, ops[0], ops[1]);
            }

            spv::Op::ControlBarrier => {
                // A memory barrier is a control barrier in MSL, so one that
                // was just emitted covers this instruction too
                if self.previous_instruction_opcode != Some(spv::Op::MemoryBarrier) {
                    self.emit_barrier(ops[0], ops[1], ops[2]);
                }
            }

            spv::Op::VectorTimesMatrix | spv::Op::MatrixTimesVector => {
                // A transposed square matrix multiplies in flipped order
                // instead of spelling out the transpose
                let mtx_id = ops[if opcode == spv::Op::MatrixTimesVector { 2 } else { 3 }];
                let mtx_type = self.expression_type(mtx_id)?;
                let needs_swap = self
                    .exprs
                    .get(&mtx_id)
                    .map_or(false, |e| e.need_transpose)
                    && mtx_type.columns == mtx_type.vecsize;

                if needs_swap {
                    if let Some(expr) = self.exprs.get_mut(&mtx_id) {
                        expr.need_transpose = false;
                    }
                    self.emit_binary_op(ops[0], ops[1], ops[3], ops[2], "*")?;
                    if let Some(expr) = self.exprs.get_mut(&mtx_id) {
                        expr.need_transpose = true;
                    }
                } else {
                    self.emit_binary_op(ops[0], ops[1], ops[2], ops[3], "*")?;
                }
            }

            _ => self.emit_instruction_common(instruction)?,
        }

        self.previous_instruction_opcode = Some(opcode);
        Ok(())
    }

    fn emit_atomic_fetch_op(
        &mut self,
        ops: &[u32],
        op: &str,
        val: AtomicOperand,
    ) -> Result<(), CompileError> {
        let (result_type, id, ptr) = (ops[0], ops[1], ops[2]);
        self.emit_atomic_func_op(result_type, id, op, false, ptr, val, false, 0)
    }

    /// Emit one of the atomic functions; in MSL they operate on pointers and
    /// only the relaxed memory order exists
    #[allow(clippy::too_many_arguments)]
    fn emit_atomic_func_op(
        &mut self,
        result_type: u32,
        result_id: u32,
        op: &str,
        has_mem_order_2: bool,
        obj: u32,
        op1: AtomicOperand,
        op1_is_pointer: bool,
        op2: u32,
    ) -> Result<(), CompileError> {
        self.forced_temporaries.insert(result_id);

        let obj_type = self.expression_type(obj)?;
        let mut exp = format!(
            "{}((volatile device atomic_{}*)&({})",
            op,
            self.type_to_msl(&obj_type, 0)?,
            self.to_expression(obj)?
        );

        match op1 {
            AtomicOperand::Id(op1) if op1_is_pointer => {
                // The comparator is passed by address, so it needs a named
                // location of its own
                let op2_type = self.expression_type_id(op2)?;
                let decl = self.declare_temporary(op2_type, op1)?;
                let comparator = self.to_expression(op1)?;
                self.statement(format!("{}{};", decl, comparator));
                exp.push_str(&format!(", &({})", self.to_name(op1)));
            }
            AtomicOperand::Id(op1) => {
                exp.push_str(&format!(", {}", self.to_expression(op1)?));
            }
            AtomicOperand::Literal(value) => {
                // Operand manufactured for increment and decrement
                exp.push_str(&format!(", {}", value));
                if obj_type.basetype == BaseType::UInt {
                    exp.push('u');
                }
            }
            AtomicOperand::None => {}
        }

        if op2 != 0 {
            exp.push_str(&format!(", {}", self.to_expression(op2)?));
        }

        exp.push_str(&format!(", {}", self.get_memory_order()));
        if has_mem_order_2 {
            exp.push_str(&format!(", {}", self.get_memory_order()));
        }
        exp.push(')');

        self.emit_op(result_type, result_id, exp, false, false, Vec::new())?;

        // Any value read through an atomic-capable variable may be stale now
        self.invalidate_all_dependent_expressions();
        Ok(())
    }

    /// Metal only supports the relaxed memory order
    fn get_memory_order(&self) -> &'static str {
        "memory_order_relaxed"
    }

    fn emit_image_write(&mut self, instruction: &Instruction) -> Result<(), CompileError> {
        let ops = &instruction.operands;
        let img_id = ops[0];
        let coord_id = ops[1];
        let texel_id = ops[2];

        // Ensure this image is marked as written to, and force a recompile so
        // the image type is printed with write access
        if let Some(var_id) = self.maybe_get_backing_variable(img_id) {
            if self.module.has_decoration(var_id, spv::Decoration::NonWritable) {
                self.module
                    .meta_mut(var_id)
                    .decoration
                    .clear_flag(spv::Decoration::NonWritable);
                self.force_recompile = true;
            }
        }

        // Optional level of detail through the image operand mask
        let mut lod = 0;
        if ops.len() > 3 {
            let flags = spv::ImageOperands::from_bits_truncate(ops[3]);
            let mut cursor = 4;
            if flags.contains(spv::ImageOperands::BIAS) {
                cursor += 1;
            }
            if flags.contains(spv::ImageOperands::LOD) {
                lod = ops.get(cursor).copied().unwrap_or(0);
            }
        }

        let img_type_id = self.expression_type_id(img_id)?;
        let img_type = self.module.get_type(img_type_id).clone();
        let image = self.module.get_type(img_type.self_id).image;

        let img_exp = self.to_expression(img_id)?;
        let texel_exp = self.to_expression(texel_id)?;

        // Coordinates take the same uint shape as a fetch
        let coord_type = self.expression_type(coord_id)?;
        let coord_exp = self.to_enclosed_expression(coord_id)?;
        let coord_is_fp = matches!(coord_type.basetype, BaseType::Float | BaseType::Double);
        let rounded = |expr: &str| -> String {
            if coord_is_fp {
                format!("round({})", expr)
            } else {
                String::from(expr)
            }
        };

        let mut args = match image.dim {
            spv::Dim::Dim1D => format!(
                "uint({})",
                rounded(&if coord_type.vecsize > 1 {
                    format!("{}.x", coord_exp)
                } else {
                    coord_exp.clone()
                })
            ),
            spv::Dim::Dim2D | spv::Dim::DimCube => format!(
                "uint2({})",
                rounded(&if coord_type.vecsize > 2 {
                    format!("{}.xy", coord_exp)
                } else {
                    coord_exp.clone()
                })
            ),
            spv::Dim::Dim3D => format!(
                "uint3({})",
                rounded(&if coord_type.vecsize > 3 {
                    format!("{}.xyz", coord_exp)
                } else {
                    coord_exp.clone()
                })
            ),
            _ => coord_exp.clone(),
        };

        if image.arrayed {
            let layer_coord = match image.dim {
                spv::Dim::Dim1D => ".y",
                spv::Dim::Dim2D => ".z",
                _ => ".w",
            };
            args.push_str(&format!(
                ", uint({})",
                rounded(&format!("{}{}", coord_exp, layer_coord))
            ));
        }

        if lod != 0 {
            args.push_str(&format!(", {}", self.to_expression(lod)?));
        }

        self.statement(format!("{}.write({}, {});", img_exp, texel_exp, args));

        if let Some(var_id) = self.maybe_get_backing_variable(img_id) {
            self.invalidate_expressions_reading(var_id);
        }
        Ok(())
    }

    /// Expand a size query into the per-dimension getters of the image type
    fn emit_image_query_size(
        &mut self,
        instruction: &Instruction,
        has_lod: bool,
    ) -> Result<(), CompileError> {
        let ops = &instruction.operands;
        let rslt_type = self.module.get_type(ops[0]).clone();
        let id = ops[1];
        let img_id = ops[2];

        let img_type_id = self.expression_type_id(img_id)?;
        let img_type = self.module.get_type(img_type_id).clone();
        if img_type.basetype != BaseType::Image {
            return Err(CompileError::InvalidOpcodeArg(String::from(
                "invalid type for OpImageQuerySize",
            )));
        }
        let image = self.module.get_type(img_type.self_id).image;

        let img_exp = self.to_expression(img_id)?;

        // A level-zero index adds nothing
        let mut lod = String::new();
        if has_lod {
            let decl_lod = self.to_expression(ops[3])?;
            if decl_lod != "0" {
                lod = decl_lod;
            }
        }

        let mut expr = format!("{}(", self.type_to_msl(&rslt_type, 0)?);
        expr.push_str(&format!("{}.get_width({})", img_exp, lod));

        if matches!(image.dim, spv::Dim::Dim2D | spv::Dim::DimCube | spv::Dim::Dim3D) {
            expr.push_str(&format!(", {}.get_height({})", img_exp, lod));
        }
        if image.dim == spv::Dim::Dim3D {
            expr.push_str(&format!(", {}.get_depth({})", img_exp, lod));
        }
        if image.arrayed {
            expr.push_str(&format!(", {}.get_array_size()", img_exp));
        }
        expr.push(')');

        let forward = self.should_forward(img_id);
        let deps = self.expression_deps(img_id);
        self.emit_op(ops[0], id, expr, forward, false, deps)
    }

    /// The flattened stage_in struct cannot be assigned wholesale; expand a
    /// struct copy from an input variable member by member
    fn maybe_emit_input_struct_assignment(
        &mut self,
        id_lhs: u32,
        id_rhs: u32,
    ) -> Result<bool, CompileError> {
        // We only care about assignments of an entire struct
        let type_id = match self.expression_type_id(id_rhs) {
            Ok(type_id) => type_id,
            Err(_) => return Ok(false),
        };
        let ty = self.module.get_type(type_id).clone();
        if ty.basetype != BaseType::Struct || ty.is_array() {
            return Ok(false);
        }

        // We only care about assignments from input variables
        let rhs_var = match self.maybe_get_backing_variable(id_rhs) {
            Some(var) => var,
            None => return Ok(false),
        };
        if self.module.get_variable(rhs_var).storage != spv::StorageClass::Input {
            return Ok(false);
        }

        // The input pointer type carries the rewritten member references
        let rhs_type_id = self.module.get_variable(rhs_var).basetype;
        let rhs_struct_id = self.module.get_type(rhs_type_id).self_id;

        let lhs_name = self.to_expression(id_lhs)?;
        let rhs_name = self.to_expression(id_rhs)?;

        for index in 0..ty.member_types.len() as u32 {
            let member_name = self.to_member_name(ty.self_id, index);
            let qualified = self
                .module
                .meta(rhs_struct_id)
                .and_then(|m| m.member(index))
                .map(|d| d.qualified_alias.clone())
                .unwrap_or_default();

            let rhs_member = if qualified.is_empty() {
                format!("{}.{}", rhs_name, member_name)
            } else {
                qualified
            };

            self.statement(format!("{}.{} = {};", lhs_name, member_name, rhs_member));
        }

        if let Some(var) = self.maybe_get_backing_variable(id_lhs) {
            self.invalidate_expressions_reading(var);
        }
        Ok(true)
    }

    /// Arrays cannot be copied by assignment in MSL; the store becomes a call
    /// to the copy helper
    fn maybe_emit_array_assignment(
        &mut self,
        id_lhs: u32,
        id_rhs: u32,
    ) -> Result<bool, CompileError> {
        // Assignment from an array initializer is fine
        if self.module.id_kind(id_rhs) == IdEntry::Constant {
            return Ok(false);
        }

        let ty = match self.expression_type(id_rhs) {
            Ok(ty) => ty,
            Err(_) => return Ok(false),
        };
        if !ty.is_array() {
            return Ok(false);
        }

        let lhs = self.to_expression(id_lhs)?;
        let rhs = self.to_expression(id_rhs)?;
        self.statement(format!(
            "spvArrayCopy({}, {}, {});",
            lhs,
            rhs,
            ty.outer_array_length()
        ));

        if let Some(var) = self.maybe_get_backing_variable(id_lhs) {
            self.invalidate_expressions_reading(var);
        }
        Ok(true)
    }

    /// Emit a threadgroup barrier with flags matching the memory semantics
    fn emit_barrier(&mut self, id_exe_scope: u32, id_mem_scope: u32, id_mem_sem: u32) {
        if !matches!(
            self.module.execution_model,
            spv::ExecutionModel::GLCompute | spv::ExecutionModel::Kernel
        ) {
            return;
        }

        let mem_sem = self
            .module
            .try_get_constant(id_mem_sem)
            .map_or(0, |c| c.scalar());
        let semantics = spv::MemorySemantics::from_bits_truncate(mem_sem);

        let mut bar_stmt = String::from("threadgroup_barrier(mem_flags::");
        if semantics.contains(spv::MemorySemantics::CROSS_WORKGROUP_MEMORY) {
            bar_stmt.push_str("mem_device");
        } else if semantics.intersects(
            spv::MemorySemantics::SUBGROUP_MEMORY
                | spv::MemorySemantics::WORKGROUP_MEMORY
                | spv::MemorySemantics::ATOMIC_COUNTER_MEMORY,
        ) {
            bar_stmt.push_str("mem_threadgroup");
        } else if semantics.contains(spv::MemorySemantics::IMAGE_MEMORY) {
            bar_stmt.push_str("mem_texture");
        } else {
            bar_stmt.push_str("mem_none");
        }

        if self.options.is_ios && self.options.supports_msl_version(2, 0) {
            // Take the wider of the two scopes, which is the smaller value
            let exe_scope = self
                .module
                .try_get_constant(id_exe_scope)
                .map_or(spv::Scope::Invocation as u32, |c| c.scalar());
            let mem_scope = self
                .module
                .try_get_constant(id_mem_scope)
                .map_or(spv::Scope::Invocation as u32, |c| c.scalar());
            let scope = exe_scope.min(mem_scope);

            bar_stmt.push_str(", ");
            bar_stmt.push_str(if scope <= spv::Scope::Device as u32 {
                "memory_scope_device"
            } else if scope == spv::Scope::Subgroup as u32
                || scope == spv::Scope::Invocation as u32
            {
                "memory_scope_simdgroup"
            } else {
                "memory_scope_threadgroup"
            });
        }

        bar_stmt.push_str(");");
        self.statement(bar_stmt);
    }
}
