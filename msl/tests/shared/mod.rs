//! Helpers to assemble SPIR-V test modules and run the compiler over them

use rspirv::binary::Assemble;
use rspirv::dr::Builder;
use rspirv::spirv;

use smelt_msl::{Compiler, CompilerOptions, MslResourceBinding, MslVertexAttr};

/// A builder preloaded with the boilerplate every shader module carries
pub fn module_builder() -> Builder {
    let mut b = Builder::new();
    b.capability(spirv::Capability::Shader);
    b.memory_model(spirv::AddressingModel::Logical, spirv::MemoryModel::GLSL450);
    b
}

pub fn assemble(b: Builder) -> Vec<u32> {
    b.module().assemble()
}

#[track_caller]
pub fn compile_words(words: &[u32]) -> String {
    compile_words_with(words, CompilerOptions::default(), Vec::new(), Vec::new()).0
}

#[track_caller]
pub fn compile_words_with(
    words: &[u32],
    options: CompilerOptions,
    attrs: Vec<MslVertexAttr>,
    bindings: Vec<MslResourceBinding>,
) -> (String, Vec<MslVertexAttr>, Vec<MslResourceBinding>) {
    let module = match smelt_ir::parse_words(words) {
        Ok(module) => module,
        Err(err) => panic!("parse failed: {}", err),
    };

    let mut compiler = Compiler::new(module, options);
    compiler.set_vertex_attributes(attrs);
    compiler.set_resource_bindings(bindings);

    match compiler.compile() {
        Ok(source) => (
            source,
            compiler.vertex_attributes().to_vec(),
            compiler.bindings().to_vec(),
        ),
        Err(err) => panic!("compile failed: {}", err),
    }
}

#[track_caller]
pub fn expect_compile_fail(words: &[u32]) -> smelt_msl::CompileError {
    let module = match smelt_ir::parse_words(words) {
        Ok(module) => module,
        Err(err) => panic!("parse failed: {}", err),
    };

    let mut compiler = Compiler::new(module, CompilerOptions::default());
    match compiler.compile() {
        Ok(source) => panic!("expected compilation to fail, got:\n{}", source),
        Err(err) => err,
    }
}

/// Assert that the output contains a line, with leading indentation ignored
#[track_caller]
pub fn assert_has_line(source: &str, expected: &str) {
    assert!(
        source.lines().any(|line| line.trim_start() == expected),
        "expected line {:?} in generated source:\n{}",
        expected,
        source
    );
}

#[track_caller]
pub fn assert_contains(source: &str, expected: &str) {
    assert!(
        source.contains(expected),
        "expected {:?} in generated source:\n{}",
        expected,
        source
    );
}

/// A vertex shader reading one float4 attribute and forwarding it to the
/// position output
pub fn vertex_passthrough() -> Vec<u32> {
    let mut b = module_builder();

    let void = b.type_void();
    let f32_t = b.type_float(32);
    let v4 = b.type_vector(f32_t, 4);
    let ptr_in = b.type_pointer(None, spirv::StorageClass::Input, v4);
    let ptr_out = b.type_pointer(None, spirv::StorageClass::Output, v4);

    let a_pos = b.variable(ptr_in, None, spirv::StorageClass::Input, None);
    b.name(a_pos, "a_pos");
    b.decorate(
        a_pos,
        spirv::Decoration::Location,
        [rspirv::dr::Operand::LiteralBit32(0)],
    );

    let gl_pos = b.variable(ptr_out, None, spirv::StorageClass::Output, None);
    b.decorate(
        gl_pos,
        spirv::Decoration::BuiltIn,
        [rspirv::dr::Operand::BuiltIn(spirv::BuiltIn::Position)],
    );

    let fn_ty = b.type_function(void, vec![]);
    let main_fn = b
        .begin_function(void, None, spirv::FunctionControl::NONE, fn_ty)
        .unwrap();
    b.begin_block(None).unwrap();
    let loaded = b.load(v4, None, a_pos, None, vec![]).unwrap();
    b.store(gl_pos, loaded, None, vec![]).unwrap();
    b.ret().unwrap();
    b.end_function().unwrap();

    b.entry_point(
        spirv::ExecutionModel::Vertex,
        main_fn,
        "main",
        vec![a_pos, gl_pos],
    );

    assemble(b)
}

/// A compute kernel with a single-member storage buffer, handing the pieces
/// back for the body
pub struct KernelScaffold {
    pub builder: Builder,
    pub u32_t: u32,
    pub counter_chain: u32,
    pub main_fn: u32,
}

/// Start a compute kernel owning a storage buffer `counters` with one uint
/// member `c`, positioned inside the entry block
pub fn kernel_with_counter() -> KernelScaffold {
    let mut b = module_builder();

    let void = b.type_void();
    let u32_t = b.type_int(32, 0);
    let i32_t = b.type_int(32, 1);

    let ssbo = b.type_struct(vec![u32_t]);
    b.name(ssbo, "ssbo_t");
    b.member_name(ssbo, 0, "c");
    b.decorate(ssbo, spirv::Decoration::BufferBlock, []);
    b.member_decorate(
        ssbo,
        0,
        spirv::Decoration::Offset,
        [rspirv::dr::Operand::LiteralBit32(0)],
    );

    let ptr_ssbo = b.type_pointer(None, spirv::StorageClass::Uniform, ssbo);
    let counters = b.variable(ptr_ssbo, None, spirv::StorageClass::Uniform, None);
    b.name(counters, "counters");
    b.decorate(
        counters,
        spirv::Decoration::DescriptorSet,
        [rspirv::dr::Operand::LiteralBit32(0)],
    );
    b.decorate(
        counters,
        spirv::Decoration::Binding,
        [rspirv::dr::Operand::LiteralBit32(0)],
    );

    let c0 = b.constant_bit32(i32_t, 0);

    let fn_ty = b.type_function(void, vec![]);
    let main_fn = b
        .begin_function(void, None, spirv::FunctionControl::NONE, fn_ty)
        .unwrap();
    b.begin_block(None).unwrap();

    let ptr_u32 = b.type_pointer(None, spirv::StorageClass::Uniform, u32_t);
    let counter_chain = b.access_chain(ptr_u32, None, counters, vec![c0]).unwrap();

    KernelScaffold {
        builder: b,
        u32_t,
        counter_chain,
        main_fn,
    }
}

/// Close the open function of a kernel scaffold and declare its entry point
pub fn finish_kernel(mut scaffold: KernelScaffold, interface: Vec<u32>) -> Vec<u32> {
    let b = &mut scaffold.builder;
    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(
        spirv::ExecutionModel::GLCompute,
        scaffold.main_fn,
        "main",
        interface,
    );
    b.execution_mode(scaffold.main_fn, spirv::ExecutionMode::LocalSize, vec![1, 1, 1]);
    assemble(scaffold.builder)
}
