//! # Smelt - MSL Backend
//!
//! This library contains the logic to convert a parsed SPIR-V module into
//! Metal Shading Language source.
//!
//! We assume the generated code will be built with the Metal toolchain in its
//! default configuration; diagnostics the single-file layout would trigger are
//! suppressed with pragmas in the generated source.

mod generator;
mod interface;
mod layout;
mod names;
mod preprocess;
mod rewrite_globals;

pub use generator::Compiler;

use thiserror::Error;

/// Index placed in the descriptor set field of bindings that map the push
/// constant buffer
pub const PUSH_CONSTANT_DESCRIPTOR_SET: u32 = !0;

/// Index placed in the binding field of bindings that map the push constant
/// buffer
pub const PUSH_CONSTANT_BINDING: u32 = 0;

/// Location value marking an interface member with no vertex attribute
pub(crate) const UNKNOWN_LOCATION: u32 = !0;

/// Matches a vertex shader input at `location` to the Metal buffer layout the
/// application binds it with
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct MslVertexAttr {
    pub location: u32,
    pub msl_buffer: u32,
    pub msl_offset: u32,
    pub msl_stride: u32,
    pub per_instance: bool,
    /// Set during compilation when the shader consumes this attribute
    pub used_by_shader: bool,
}

impl Default for MslVertexAttr {
    fn default() -> Self {
        MslVertexAttr {
            location: 0,
            msl_buffer: 0,
            msl_offset: 0,
            msl_stride: 0,
            per_instance: false,
            used_by_shader: false,
        }
    }
}

/// Maps a Vulkan descriptor binding to the Metal resource indices the
/// application binds it with
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct MslResourceBinding {
    pub stage: spirv::ExecutionModel,
    pub desc_set: u32,
    pub binding: u32,
    pub msl_buffer: u32,
    pub msl_texture: u32,
    pub msl_sampler: u32,
    /// Set during compilation when the shader consumes this binding
    pub used_by_shader: bool,
}

impl Default for MslResourceBinding {
    fn default() -> Self {
        MslResourceBinding {
            stage: spirv::ExecutionModel::Vertex,
            desc_set: 0,
            binding: 0,
            msl_buffer: 0,
            msl_texture: 0,
            msl_sampler: 0,
            used_by_shader: false,
        }
    }
}

/// Vertex stage fixups applied to the position output
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub struct VertexOptions {
    /// Rewrite the z range from [-1, 1] to the [0, 1] Metal expects
    pub fixup_clipspace: bool,
    /// Negate the y output for upper-left origin rasterization
    pub flip_vert_y: bool,
}

/// Configuration for a compilation run
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct CompilerOptions {
    /// Turn specialization constants used as array lengths into fixed values
    pub resolve_specialized_array_lengths: bool,
    /// Emit the point size builtin in the vertex output struct
    pub enable_point_size_builtin: bool,
    pub is_ios: bool,
    /// Target language version encoded with [CompilerOptions::make_msl_version]
    pub msl_version: u32,
    pub vertex: VertexOptions,
}

impl CompilerOptions {
    pub const fn make_msl_version(major: u32, minor: u32, patch: u32) -> u32 {
        major * 10000 + minor * 100 + patch
    }

    pub fn supports_msl_version(&self, major: u32, minor: u32) -> bool {
        self.msl_version >= CompilerOptions::make_msl_version(major, minor, 0)
    }
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            resolve_specialized_array_lengths: true,
            enable_point_size_builtin: true,
            is_ios: false,
            msl_version: CompilerOptions::make_msl_version(1, 2, 0),
            vertex: VertexOptions::default(),
        }
    }
}

/// Error result when compilation fails
///
/// All errors abort the compile; partially generated source is discarded.
#[derive(PartialEq, Eq, Debug, Clone, Error)]
pub enum CompileError {
    /// A matrix or array reached an interface that cannot hold one
    #[error("{0}")]
    InvalidInterface(String),

    /// An instruction operand does not satisfy the constraints of its opcode
    #[error("{0}")]
    InvalidOpcodeArg(String),

    /// A type has no Metal spelling
    #[error("{0}")]
    UnsupportedType(String),

    /// An instruction the common emitter has no lowering for
    #[error("unsupported instruction: {0}")]
    UnsupportedOp(String),

    /// Size or alignment was queried for a type with no memory layout
    #[error("querying size or alignment of an opaque type")]
    QueryOpaqueLayout,

    /// The emit loop failed to settle
    #[error("over 3 compilation loops detected, must be a bug")]
    CompilationOverflow,
}
