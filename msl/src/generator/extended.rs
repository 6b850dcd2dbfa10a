//! GLSL.std.450 extended instructions with MSL-specific spellings
//!
//! Opcodes without an override fall through to the common lowering. Pack and
//! unpack operations with no Metal equivalent emit clearly named unsupported
//! identifiers so the downstream compiler reports them with line context.

use smelt_ir::spv;

use super::Compiler;
use crate::CompileError;

impl Compiler {
    pub(crate) fn emit_glsl_op(
        &mut self,
        result_type: u32,
        id: u32,
        op: spv::GLOp,
        args: &[u32],
    ) -> Result<(), CompileError> {
        use spv::GLOp;

        match op {
            GLOp::Atan2 => self.emit_binary_func_op(result_type, id, args[0], args[1], "atan2"),
            GLOp::InverseSqrt => self.emit_unary_func_op(result_type, id, args[0], "rsqrt"),
            GLOp::RoundEven => self.emit_unary_func_op(result_type, id, args[0], "rint"),

            GLOp::FindSMsb => self.emit_unary_func_op(result_type, id, args[0], "findSMSB"),
            GLOp::FindUMsb => self.emit_unary_func_op(result_type, id, args[0], "findUMSB"),

            GLOp::PackSnorm4x8 => {
                self.emit_unary_func_op(result_type, id, args[0], "pack_float_to_snorm4x8")
            }
            GLOp::PackUnorm4x8 => {
                self.emit_unary_func_op(result_type, id, args[0], "pack_float_to_unorm4x8")
            }
            GLOp::PackSnorm2x16 => {
                self.emit_unary_func_op(result_type, id, args[0], "pack_float_to_snorm2x16")
            }
            GLOp::PackUnorm2x16 => {
                self.emit_unary_func_op(result_type, id, args[0], "pack_float_to_unorm2x16")
            }
            GLOp::PackHalf2x16 => {
                log::warn!("PackHalf2x16 has no Metal equivalent");
                self.emit_unary_func_op(result_type, id, args[0], "unsupported_GLSLstd450PackHalf2x16")
            }

            GLOp::UnpackSnorm4x8 => {
                self.emit_unary_func_op(result_type, id, args[0], "unpack_snorm4x8_to_float")
            }
            GLOp::UnpackUnorm4x8 => {
                self.emit_unary_func_op(result_type, id, args[0], "unpack_unorm4x8_to_float")
            }
            GLOp::UnpackSnorm2x16 => {
                self.emit_unary_func_op(result_type, id, args[0], "unpack_snorm2x16_to_float")
            }
            GLOp::UnpackUnorm2x16 => {
                self.emit_unary_func_op(result_type, id, args[0], "unpack_unorm2x16_to_float")
            }
            GLOp::UnpackHalf2x16 => {
                log::warn!("UnpackHalf2x16 has no Metal equivalent");
                self.emit_unary_func_op(result_type, id, args[0], "unsupported_GLSLstd450UnpackHalf2x16")
            }

            GLOp::PackDouble2x32 => {
                log::warn!("PackDouble2x32 has no Metal equivalent");
                self.emit_unary_func_op(result_type, id, args[0], "unsupported_GLSLstd450PackDouble2x32")
            }
            GLOp::UnpackDouble2x32 => {
                log::warn!("UnpackDouble2x32 has no Metal equivalent");
                self.emit_unary_func_op(result_type, id, args[0], "unsupported_GLSLstd450UnpackDouble2x32")
            }

            GLOp::MatrixInverse => {
                let columns = self.module.get_type(result_type).columns;
                match columns {
                    2 => self.emit_unary_func_op(result_type, id, args[0], "spvInverse2x2"),
                    3 => self.emit_unary_func_op(result_type, id, args[0], "spvInverse3x3"),
                    4 => self.emit_unary_func_op(result_type, id, args[0], "spvInverse4x4"),
                    _ => Err(CompileError::InvalidOpcodeArg(format!(
                        "matrix inverse of a {} column matrix",
                        columns
                    ))),
                }
            }

            _ => self.emit_glsl_op_common(result_type, id, op, args),
        }
    }
}
