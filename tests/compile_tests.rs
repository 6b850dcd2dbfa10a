use rspirv::binary::Assemble;
use rspirv::dr::Operand;
use rspirv::spirv;

use smelt::{compile, CompileArgs, MslVertexAttr, SmeltError};

fn passthrough_vertex_words() -> Vec<u32> {
    let mut b = rspirv::dr::Builder::new();
    b.capability(spirv::Capability::Shader);
    b.memory_model(spirv::AddressingModel::Logical, spirv::MemoryModel::GLSL450);

    let void = b.type_void();
    let f32_t = b.type_float(32);
    let v4 = b.type_vector(f32_t, 4);
    let ptr_in = b.type_pointer(None, spirv::StorageClass::Input, v4);
    let ptr_out = b.type_pointer(None, spirv::StorageClass::Output, v4);

    let a_pos = b.variable(ptr_in, None, spirv::StorageClass::Input, None);
    b.name(a_pos, "a_pos");
    b.decorate(a_pos, spirv::Decoration::Location, [Operand::LiteralBit32(0)]);
    let gl_pos = b.variable(ptr_out, None, spirv::StorageClass::Output, None);
    b.decorate(
        gl_pos,
        spirv::Decoration::BuiltIn,
        [Operand::BuiltIn(spirv::BuiltIn::Position)],
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

    b.module().assemble()
}

#[test]
fn compile_produces_msl_and_reflects_usage() {
    let words = passthrough_vertex_words();

    let attrs = vec![
        MslVertexAttr {
            location: 0,
            ..MslVertexAttr::default()
        },
        MslVertexAttr {
            location: 9,
            ..MslVertexAttr::default()
        },
    ];

    let compiled = compile(CompileArgs::new(&words).vertex_attributes(attrs)).unwrap();

    assert!(compiled.source.starts_with("#include <metal_stdlib>"));
    assert!(compiled.source.contains("vertex main0_out main0"));

    // Only the attribute the shader consumes is marked used
    assert!(compiled.vertex_attributes[0].used_by_shader);
    assert!(!compiled.vertex_attributes[1].used_by_shader);
}

#[test]
fn compile_surfaces_parse_errors() {
    let result = compile(CompileArgs::new(&[0xdead_beef, 0, 0, 8, 0]));
    assert!(matches!(result, Err(SmeltError::Parse(_))));
}
