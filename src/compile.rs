use smelt_msl::{Compiler, CompilerOptions, MslResourceBinding, MslVertexAttr};
use thiserror::Error;

/// Error for [compile()]
#[derive(PartialEq, Debug, Clone, Error)]
pub enum SmeltError {
    #[error("parse: {0}")]
    Parse(#[from] smelt_ir::ParseError),

    #[error("metal generate: {0}")]
    Generate(#[from] smelt_msl::CompileError),
}

/// Arguments for [compile()]
pub struct CompileArgs<'a> {
    words: &'a [u32],
    options: CompilerOptions,
    vertex_attributes: Vec<MslVertexAttr>,
    resource_bindings: Vec<MslResourceBinding>,
}

impl<'a> CompileArgs<'a> {
    /// Create new args for a SPIR-V module
    pub fn new(words: &'a [u32]) -> Self {
        CompileArgs {
            words,
            options: CompilerOptions::default(),
            vertex_attributes: Vec::new(),
            resource_bindings: Vec::new(),
        }
    }

    /// Set the backend configuration
    pub fn options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Provide the vertex attribute layout of the application
    pub fn vertex_attributes(mut self, attrs: Vec<MslVertexAttr>) -> Self {
        self.vertex_attributes = attrs;
        self
    }

    /// Provide the resource binding layout of the application
    pub fn resource_bindings(mut self, bindings: Vec<MslResourceBinding>) -> Self {
        self.resource_bindings = bindings;
        self
    }
}

/// Output of a compiled shader module
pub struct CompiledShader {
    /// Generated MSL source
    pub source: String,

    /// Attribute records with usage reflected back from compilation
    pub vertex_attributes: Vec<MslVertexAttr>,

    /// Binding records with usage reflected back from compilation
    pub resource_bindings: Vec<MslResourceBinding>,
}

/// Invoke the compiler to build a SPIR-V word stream into MSL source
pub fn compile(args: CompileArgs) -> Result<CompiledShader, SmeltError> {
    let module = smelt_ir::parse_words(args.words)?;

    let mut compiler = Compiler::new(module, args.options);
    compiler.set_vertex_attributes(args.vertex_attributes);
    compiler.set_resource_bindings(args.resource_bindings);

    let source = compiler.compile()?;

    Ok(CompiledShader {
        source,
        vertex_attributes: compiler.vertex_attributes().to_vec(),
        resource_bindings: compiler.bindings().to_vec(),
    })
}
