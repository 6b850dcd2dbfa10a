//! # Smelt
//!
//! A cross-compiler translating SPIR-V shader modules into Metal Shading
//! Language source.

mod compile;

pub use compile::{compile, CompileArgs, CompiledShader, SmeltError};

pub use smelt_ir as ir;
pub use smelt_msl as msl;
pub use smelt_msl::{CompilerOptions, MslResourceBinding, MslVertexAttr, VertexOptions};
