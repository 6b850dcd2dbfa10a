//! Bodies of the helper functions injected into the generated source

use super::Compiler;
use crate::preprocess::SpvFuncImpl;

impl Compiler {
    /// Emit the implementation of every helper the pre-processor or the
    /// emitter demanded
    pub(crate) fn emit_custom_functions(&mut self) {
        for spv_func in self.spv_function_implementations.clone() {
            match spv_func {
                SpvFuncImpl::Mod => {
                    self.statement("// Implementation of the GLSL mod() function, which is slightly different than Metal fmod()");
                    self.statement("template<typename Tx, typename Ty>");
                    self.statement("Tx mod(Tx x, Ty y)");
                    self.begin_scope();
                    self.statement("return x - y * floor(x / y);");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::Radians => {
                    self.statement("// Implementation of the GLSL radians() function");
                    self.statement("template<typename T>");
                    self.statement("T radians(T d)");
                    self.begin_scope();
                    self.statement("return d * 0.01745329251;");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::Degrees => {
                    self.statement("// Implementation of the GLSL degrees() function");
                    self.statement("template<typename T>");
                    self.statement("T degrees(T r)");
                    self.begin_scope();
                    self.statement("return r * 57.2957795131;");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::FindILsb => {
                    self.statement("// Implementation of the GLSL findLSB() function");
                    self.statement("template<typename T>");
                    self.statement("T findLSB(T x)");
                    self.begin_scope();
                    self.statement("return select(ctz(x), T(-1), x == T(0));");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::FindUMsb => {
                    self.statement("// Implementation of the unsigned GLSL findMSB() function");
                    self.statement("template<typename T>");
                    self.statement("T findUMSB(T x)");
                    self.begin_scope();
                    self.statement("return select(clz(T(0)) - (clz(x) + T(1)), T(-1), x == T(0));");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::FindSMsb => {
                    self.statement("// Implementation of the signed GLSL findMSB() function");
                    self.statement("template<typename T>");
                    self.statement("T findSMSB(T x)");
                    self.begin_scope();
                    self.statement("T v = select(x, T(-1) - x, x < T(0));");
                    self.statement("return select(clz(T(0)) - (clz(v) + T(1)), T(-1), v == T(0));");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::ArrayCopy => {
                    self.statement("// Implementation of an array copy function to cover GLSL's ability to copy an array via assignment.");
                    self.statement("template<typename T>");
                    self.statement("void spvArrayCopy(thread T* dst, thread const T* src, uint count)");
                    self.begin_scope();
                    self.statement("for (uint i = 0; i < count; *dst++ = *src++, i++);");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::Inverse2x2 => {
                    self.emit_inverse_preamble();
                    self.statement("float2x2 spvInverse2x2(float2x2 m)");
                    self.begin_scope();
                    self.statement("float2x2 adj;\t// The adjoint matrix (inverse after dividing by determinant)");
                    self.statement("");
                    self.statement("// Create the transpose of the cofactors, as the classical adjoint of the matrix.");
                    self.statement("adj[0][0] =  m[1][1];");
                    self.statement("adj[0][1] = -m[0][1];");
                    self.statement("");
                    self.statement("adj[1][0] = -m[1][0];");
                    self.statement("adj[1][1] =  m[0][0];");
                    self.statement("");
                    self.statement("// Calculate the determinant as a combination of the cofactors of the first row.");
                    self.statement("float det = (adj[0][0] * m[0][0]) + (adj[0][1] * m[1][0]);");
                    self.statement("");
                    self.statement("// Divide the classical adjoint matrix by the determinant.");
                    self.statement("// If determinant is zero, matrix is not invertable, so leave it unchanged.");
                    self.statement("return (det != 0.0f) ? (adj * (1.0f / det)) : m;");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::Inverse3x3 => {
                    self.emit_det2x2();
                    self.emit_inverse_preamble();
                    self.statement("float3x3 spvInverse3x3(float3x3 m)");
                    self.begin_scope();
                    self.statement("float3x3 adj;\t// The adjoint matrix (inverse after dividing by determinant)");
                    self.statement("");
                    self.statement("// Create the transpose of the cofactors, as the classical adjoint of the matrix.");
                    self.statement("adj[0][0] =  spvDet2x2(m[1][1], m[1][2], m[2][1], m[2][2]);");
                    self.statement("adj[0][1] = -spvDet2x2(m[0][1], m[0][2], m[2][1], m[2][2]);");
                    self.statement("adj[0][2] =  spvDet2x2(m[0][1], m[0][2], m[1][1], m[1][2]);");
                    self.statement("");
                    self.statement("adj[1][0] = -spvDet2x2(m[1][0], m[1][2], m[2][0], m[2][2]);");
                    self.statement("adj[1][1] =  spvDet2x2(m[0][0], m[0][2], m[2][0], m[2][2]);");
                    self.statement("adj[1][2] = -spvDet2x2(m[0][0], m[0][2], m[1][0], m[1][2]);");
                    self.statement("");
                    self.statement("adj[2][0] =  spvDet2x2(m[1][0], m[1][1], m[2][0], m[2][1]);");
                    self.statement("adj[2][1] = -spvDet2x2(m[0][0], m[0][1], m[2][0], m[2][1]);");
                    self.statement("adj[2][2] =  spvDet2x2(m[0][0], m[0][1], m[1][0], m[1][1]);");
                    self.statement("");
                    self.statement("// Calculate the determinant as a combination of the cofactors of the first row.");
                    self.statement("float det = (adj[0][0] * m[0][0]) + (adj[0][1] * m[1][0]) + (adj[0][2] * m[2][0]);");
                    self.statement("");
                    self.statement("// Divide the classical adjoint matrix by the determinant.");
                    self.statement("// If determinant is zero, matrix is not invertable, so leave it unchanged.");
                    self.statement("return (det != 0.0f) ? (adj * (1.0f / det)) : m;");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::Inverse4x4 => {
                    self.emit_det2x2();
                    self.statement("// Returns the determinant of a 3x3 matrix.");
                    self.statement("inline float spvDet3x3(float a1, float a2, float a3, float b1, float b2, float b3, float c1, float c2, float c3)");
                    self.begin_scope();
                    self.statement("return a1 * spvDet2x2(b2, b3, c2, c3) - b1 * spvDet2x2(a2, a3, c2, c3) + c1 * spvDet2x2(a2, a3, b2, b3);");
                    self.end_scope();
                    self.statement("");
                    self.emit_inverse_preamble();
                    self.statement("float4x4 spvInverse4x4(float4x4 m)");
                    self.begin_scope();
                    self.statement("float4x4 adj;\t// The adjoint matrix (inverse after dividing by determinant)");
                    self.statement("");
                    self.statement("// Create the transpose of the cofactors, as the classical adjoint of the matrix.");
                    self.statement("adj[0][0] =  spvDet3x3(m[1][1], m[1][2], m[1][3], m[2][1], m[2][2], m[2][3], m[3][1], m[3][2], m[3][3]);");
                    self.statement("adj[0][1] = -spvDet3x3(m[0][1], m[0][2], m[0][3], m[2][1], m[2][2], m[2][3], m[3][1], m[3][2], m[3][3]);");
                    self.statement("adj[0][2] =  spvDet3x3(m[0][1], m[0][2], m[0][3], m[1][1], m[1][2], m[1][3], m[3][1], m[3][2], m[3][3]);");
                    self.statement("adj[0][3] = -spvDet3x3(m[0][1], m[0][2], m[0][3], m[1][1], m[1][2], m[1][3], m[2][1], m[2][2], m[2][3]);");
                    self.statement("");
                    self.statement("adj[1][0] = -spvDet3x3(m[1][0], m[1][2], m[1][3], m[2][0], m[2][2], m[2][3], m[3][0], m[3][2], m[3][3]);");
                    self.statement("adj[1][1] =  spvDet3x3(m[0][0], m[0][2], m[0][3], m[2][0], m[2][2], m[2][3], m[3][0], m[3][2], m[3][3]);");
                    self.statement("adj[1][2] = -spvDet3x3(m[0][0], m[0][2], m[0][3], m[1][0], m[1][2], m[1][3], m[3][0], m[3][2], m[3][3]);");
                    self.statement("adj[1][3] =  spvDet3x3(m[0][0], m[0][2], m[0][3], m[1][0], m[1][2], m[1][3], m[2][0], m[2][2], m[2][3]);");
                    self.statement("");
                    self.statement("adj[2][0] =  spvDet3x3(m[1][0], m[1][1], m[1][3], m[2][0], m[2][1], m[2][3], m[3][0], m[3][1], m[3][3]);");
                    self.statement("adj[2][1] = -spvDet3x3(m[0][0], m[0][1], m[0][3], m[2][0], m[2][1], m[2][3], m[3][0], m[3][1], m[3][3]);");
                    self.statement("adj[2][2] =  spvDet3x3(m[0][0], m[0][1], m[0][3], m[1][0], m[1][1], m[1][3], m[3][0], m[3][1], m[3][3]);");
                    self.statement("adj[2][3] = -spvDet3x3(m[0][0], m[0][1], m[0][3], m[1][0], m[1][1], m[1][3], m[2][0], m[2][1], m[2][3]);");
                    self.statement("");
                    self.statement("adj[3][0] = -spvDet3x3(m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2], m[3][0], m[3][1], m[3][2]);");
                    self.statement("adj[3][1] =  spvDet3x3(m[0][0], m[0][1], m[0][2], m[2][0], m[2][1], m[2][2], m[3][0], m[3][1], m[3][2]);");
                    self.statement("adj[3][2] = -spvDet3x3(m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[3][0], m[3][1], m[3][2]);");
                    self.statement("adj[3][3] =  spvDet3x3(m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2]);");
                    self.statement("");
                    self.statement("// Calculate the determinant as a combination of the cofactors of the first row.");
                    self.statement("float det = (adj[0][0] * m[0][0]) + (adj[0][1] * m[1][0]) + (adj[0][2] * m[2][0]) + (adj[0][3] * m[3][0]);");
                    self.statement("");
                    self.statement("// Divide the classical adjoint matrix by the determinant.");
                    self.statement("// If determinant is zero, matrix is not invertable, so leave it unchanged.");
                    self.statement("return (det != 0.0f) ? (adj * (1.0f / det)) : m;");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::RowMajor2x3 => {
                    self.emit_row_major_preamble();
                    self.statement("float2x3 spvConvertFromRowMajor2x3(float2x3 m)");
                    self.begin_scope();
                    self.statement("return float2x3(float3(m[0][0], m[0][2], m[1][1]), float3(m[0][1], m[1][0], m[1][2]));");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::RowMajor2x4 => {
                    self.emit_row_major_preamble();
                    self.statement("float2x4 spvConvertFromRowMajor2x4(float2x4 m)");
                    self.begin_scope();
                    self.statement("return float2x4(float4(m[0][0], m[0][2], m[1][0], m[1][2]), float4(m[0][1], m[0][3], m[1][1], m[1][3]));");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::RowMajor3x2 => {
                    self.emit_row_major_preamble();
                    self.statement("float3x2 spvConvertFromRowMajor3x2(float3x2 m)");
                    self.begin_scope();
                    self.statement("return float3x2(float2(m[0][0], m[1][1]), float2(m[0][1], m[2][0]), float2(m[1][0], m[2][1]));");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::RowMajor3x4 => {
                    self.emit_row_major_preamble();
                    self.statement("float3x4 spvConvertFromRowMajor3x4(float3x4 m)");
                    self.begin_scope();
                    self.statement("return float3x4(float4(m[0][0], m[0][3], m[1][2], m[2][1]), float4(m[0][1], m[1][0], m[1][3], m[2][2]), float4(m[0][2], m[1][1], m[2][0], m[2][3]));");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::RowMajor4x2 => {
                    self.emit_row_major_preamble();
                    self.statement("float4x2 spvConvertFromRowMajor4x2(float4x2 m)");
                    self.begin_scope();
                    self.statement("return float4x2(float2(m[0][0], m[2][0]), float2(m[0][1], m[2][1]), float2(m[1][0], m[3][0]), float2(m[1][1], m[3][1]));");
                    self.end_scope();
                    self.statement("");
                }

                SpvFuncImpl::RowMajor4x3 => {
                    self.emit_row_major_preamble();
                    self.statement("float4x3 spvConvertFromRowMajor4x3(float4x3 m)");
                    self.begin_scope();
                    self.statement("return float4x3(float3(m[0][0], m[1][1], m[2][2]), float3(m[0][1], m[1][2], m[3][0]), float3(m[0][2], m[2][0], m[3][1]), float3(m[1][0], m[2][1], m[3][2]));");
                    self.end_scope();
                    self.statement("");
                }
            }
        }
    }

    fn emit_det2x2(&mut self) {
        self.statement("// Returns the determinant of a 2x2 matrix.");
        self.statement("inline float spvDet2x2(float a1, float a2, float b1, float b2)");
        self.begin_scope();
        self.statement("return a1 * b2 - b1 * a2;");
        self.end_scope();
        self.statement("");
    }

    fn emit_inverse_preamble(&mut self) {
        self.statement("// Returns the inverse of a matrix, by using the algorithm of calculating the classical");
        self.statement("// adjoint and dividing by the determinant. The contents of the matrix are changed.");
    }

    fn emit_row_major_preamble(&mut self) {
        self.statement("// Implementation of a conversion of matrix content from RowMajor to ColumnMajor organization.");
    }
}
