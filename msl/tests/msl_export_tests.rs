mod shared;
use shared::*;

use rspirv::dr::Operand;
use rspirv::spirv;
use smelt_msl::{CompileError, CompilerOptions, MslResourceBinding, MslVertexAttr};

#[test]
fn check_vertex_passthrough() {
    let words = vertex_passthrough();
    let msl = compile_words(&words);

    assert_eq!(
        msl,
        "\
#include <metal_stdlib>
#include <simd/simd.h>

using namespace metal;

struct main0_in
{
    float4 a_pos [[attribute(0)]];
};

struct main0_out
{
    float4 gl_Position [[position]];
};

vertex main0_out main0(main0_in in [[stage_in]])
{
    main0_out out = {};
    out.gl_Position = in.a_pos;
    return out;
}

"
    );
}

#[test]
fn check_vertex_matrix_attribute_moves_to_buffer() {
    let mut b = module_builder();

    let void = b.type_void();
    let f32_t = b.type_float(32);
    let v4 = b.type_vector(f32_t, 4);
    let m4 = b.type_matrix(v4, 4);
    let ptr_in = b.type_pointer(None, spirv::StorageClass::Input, m4);
    let ptr_out = b.type_pointer(None, spirv::StorageClass::Output, v4);

    let a_mvp = b.variable(ptr_in, None, spirv::StorageClass::Input, None);
    b.name(a_mvp, "a_mvp");
    b.decorate(a_mvp, spirv::Decoration::Location, [Operand::LiteralBit32(1)]);

    let gl_pos = b.variable(ptr_out, None, spirv::StorageClass::Output, None);
    b.decorate(
        gl_pos,
        spirv::Decoration::BuiltIn,
        [Operand::BuiltIn(spirv::BuiltIn::Position)],
    );

    let one = b.constant_bit32(f32_t, 1.0f32.to_bits());

    let fn_ty = b.type_function(void, vec![]);
    let main_fn = b
        .begin_function(void, None, spirv::FunctionControl::NONE, fn_ty)
        .unwrap();
    b.begin_block(None).unwrap();
    let mvp = b.load(m4, None, a_mvp, None, vec![]).unwrap();
    let unit = b.composite_construct(v4, None, vec![one, one, one, one]).unwrap();
    let pos = b.matrix_times_vector(v4, None, mvp, unit).unwrap();
    b.store(gl_pos, pos, None, vec![]).unwrap();
    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(
        spirv::ExecutionModel::Vertex,
        main_fn,
        "main",
        vec![a_mvp, gl_pos],
    );

    let attrs = vec![MslVertexAttr {
        location: 1,
        msl_buffer: 0,
        msl_offset: 0,
        msl_stride: 64,
        per_instance: false,
        used_by_shader: false,
    }];

    let (msl, attrs_out, _) =
        compile_words_with(&assemble(b), CompilerOptions::default(), attrs, Vec::new());

    // The matrix is diverted to a secondary buffer indexed by vertex id
    assert_contains(&msl, "struct main0_in0");
    assert_has_line(&msl, "float4x4 a_mvp;");
    assert_contains(
        &msl,
        "vertex main0_out main0(device main0_in0* in0 [[buffer(0)]], uint gl_VertexIndex [[vertex_id]])",
    );
    assert_has_line(
        &msl,
        "out.gl_Position = in0[gl_VertexIndex].a_mvp * float4(1.0, 1.0, 1.0, 1.0);",
    );

    // The stage_in struct is gone entirely
    assert!(!msl.contains("[[stage_in]]"), "{}", msl);

    assert!(attrs_out[0].used_by_shader);
}

fn vertex_with_uniform_block() -> Vec<u32> {
    let mut b = module_builder();

    let void = b.type_void();
    let f32_t = b.type_float(32);
    let v3 = b.type_vector(f32_t, 3);
    let v4 = b.type_vector(f32_t, 4);
    let m3 = b.type_matrix(v3, 3);
    let i32_t = b.type_int(32, 1);

    let block = b.type_struct(vec![v3, f32_t, m3]);
    b.name(block, "params_t");
    b.member_name(block, 0, "a");
    b.member_name(block, 1, "b");
    b.member_name(block, 2, "m");
    b.decorate(block, spirv::Decoration::Block, []);
    b.member_decorate(block, 0, spirv::Decoration::Offset, [Operand::LiteralBit32(0)]);
    b.member_decorate(block, 1, spirv::Decoration::Offset, [Operand::LiteralBit32(12)]);
    b.member_decorate(block, 2, spirv::Decoration::Offset, [Operand::LiteralBit32(16)]);
    b.member_decorate(block, 2, spirv::Decoration::ColMajor, []);
    b.member_decorate(
        block,
        2,
        spirv::Decoration::MatrixStride,
        [Operand::LiteralBit32(16)],
    );

    let ptr_block = b.type_pointer(None, spirv::StorageClass::Uniform, block);
    let params = b.variable(ptr_block, None, spirv::StorageClass::Uniform, None);
    b.name(params, "params");
    b.decorate(
        params,
        spirv::Decoration::DescriptorSet,
        [Operand::LiteralBit32(0)],
    );
    b.decorate(params, spirv::Decoration::Binding, [Operand::LiteralBit32(0)]);

    let ptr_out = b.type_pointer(None, spirv::StorageClass::Output, v4);
    let gl_pos = b.variable(ptr_out, None, spirv::StorageClass::Output, None);
    b.decorate(
        gl_pos,
        spirv::Decoration::BuiltIn,
        [Operand::BuiltIn(spirv::BuiltIn::Position)],
    );

    let c1 = b.constant_bit32(i32_t, 1);
    let one = b.constant_bit32(f32_t, 1.0f32.to_bits());

    let fn_ty = b.type_function(void, vec![]);
    let main_fn = b
        .begin_function(void, None, spirv::FunctionControl::NONE, fn_ty)
        .unwrap();
    b.begin_block(None).unwrap();
    let ptr_f32 = b.type_pointer(None, spirv::StorageClass::Uniform, f32_t);
    let chain = b.access_chain(ptr_f32, None, params, vec![c1]).unwrap();
    let value = b.load(f32_t, None, chain, None, vec![]).unwrap();
    let pos = b
        .composite_construct(v4, None, vec![value, value, value, one])
        .unwrap();
    b.store(gl_pos, pos, None, vec![]).unwrap();
    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(spirv::ExecutionModel::Vertex, main_fn, "main", vec![gl_pos]);

    assemble(b)
}

#[test]
fn check_uniform_block_packing() {
    let words = vertex_with_uniform_block();
    let msl = compile_words(&words);

    // The vec3 at offset 0 must pack so the float lands at offset 12, and the
    // matrix at 16 needs no padding after it
    assert_contains(
        &msl,
        "\
struct params_t
{
    packed_float3 a;
    float b;
    float3x3 m;
};
",
    );

    assert_contains(
        &msl,
        "vertex main0_out main0(constant params_t& params [[buffer(0)]])",
    );
    assert_has_line(
        &msl,
        "out.gl_Position = float4(params.b, params.b, params.b, 1.0);",
    );
}

#[test]
fn check_atomic_increment_in_compute() {
    let mut scaffold = kernel_with_counter();
    let b = &mut scaffold.builder;

    let u32_t = scaffold.u32_t;
    let chain = scaffold.counter_chain;
    let scope = b.constant_bit32(u32_t, spirv::Scope::Device as u32);
    let semantics = b.constant_bit32(u32_t, 0);
    let one = b.constant_bit32(u32_t, 1);
    b.atomic_i_add(u32_t, None, chain, scope, semantics, one)
        .unwrap();

    let words = finish_kernel(scaffold, vec![]);
    let msl = compile_words(&words);

    assert_contains(&msl, "#include <metal_atomic>");
    assert_contains(
        &msl,
        "#pragma clang diagnostic ignored \"-Wunused-variable\"",
    );
    assert_contains(&msl, "kernel void main0(device ssbo_t& counters [[buffer(0)]])");

    // The atomic must land in a named temporary
    assert_contains(
        &msl,
        "= atomic_fetch_add_explicit((volatile device atomic_uint*)&(counters.c), 1u, memory_order_relaxed);",
    );
    assert_contains(&msl, "uint _");
}

#[test]
fn check_atomic_store_pointer_operand_reuse() {
    // OpAtomicStore emits through the same path as the other atomics, reusing
    // the pointer operand as the result id; the temporary it declares borrows
    // the value type behind the pointer
    let mut scaffold = kernel_with_counter();
    let b = &mut scaffold.builder;

    let u32_t = scaffold.u32_t;
    let chain = scaffold.counter_chain;
    let scope = b.constant_bit32(u32_t, spirv::Scope::Device as u32);
    let semantics = b.constant_bit32(u32_t, 0);
    let five = b.constant_bit32(u32_t, 5);
    b.atomic_store(chain, scope, semantics, five).unwrap();

    let words = finish_kernel(scaffold, vec![]);
    let msl = compile_words(&words);

    assert_contains(
        &msl,
        "= atomic_store_explicit((volatile device atomic_uint*)&(counters.c), 5u, memory_order_relaxed);",
    );
    assert_contains(&msl, "uint _");
}

#[test]
fn check_control_barrier_after_memory_barrier_elided() {
    let mut scaffold = kernel_with_counter();
    let b = &mut scaffold.builder;

    let u32_t = scaffold.u32_t;
    let workgroup = b.constant_bit32(u32_t, spirv::Scope::Workgroup as u32);
    // AcquireRelease | WorkgroupMemory
    let semantics = b.constant_bit32(u32_t, 0x108);
    b.memory_barrier(workgroup, semantics).unwrap();
    b.control_barrier(workgroup, workgroup, semantics).unwrap();

    let words = finish_kernel(scaffold, vec![]);
    let msl = compile_words(&words);

    assert_eq!(
        msl.matches("threadgroup_barrier(mem_flags::mem_threadgroup);")
            .count(),
        1,
        "{}",
        msl
    );
}

#[test]
fn check_lone_control_barrier_emitted() {
    let mut scaffold = kernel_with_counter();
    let b = &mut scaffold.builder;

    let u32_t = scaffold.u32_t;
    let workgroup = b.constant_bit32(u32_t, spirv::Scope::Workgroup as u32);
    let semantics = b.constant_bit32(u32_t, 0x108);
    b.control_barrier(workgroup, workgroup, semantics).unwrap();

    let words = finish_kernel(scaffold, vec![]);
    let msl = compile_words(&words);

    assert_has_line(&msl, "threadgroup_barrier(mem_flags::mem_threadgroup);");
}

#[test]
fn check_vertex_position_fixups() {
    let words = vertex_passthrough();

    let mut options = CompilerOptions::default();
    options.vertex.flip_vert_y = true;
    let (msl, _, _) = compile_words_with(&words, options, Vec::new(), Vec::new());
    assert_has_line(&msl, "out.gl_Position.y = -(out.gl_Position.y);");
    let flip_at = msl.find("out.gl_Position.y = -").unwrap();
    let return_at = msl.find("return out;").unwrap();
    assert!(flip_at < return_at);

    let mut options = CompilerOptions::default();
    options.vertex.fixup_clipspace = true;
    let (msl, _, _) = compile_words_with(&words, options, Vec::new(), Vec::new());
    assert_has_line(
        &msl,
        "out.gl_Position.z = (out.gl_Position.z + out.gl_Position.w) * 0.5;",
    );
}

#[test]
fn check_quantize_to_f16() {
    let mut b = module_builder();

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
    let quantized = b.quantize_to_f16(v4, None, loaded).unwrap();
    b.store(gl_pos, quantized, None, vec![]).unwrap();
    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(
        spirv::ExecutionModel::Vertex,
        main_fn,
        "main",
        vec![a_pos, gl_pos],
    );

    let msl = compile_words(&assemble(b));
    assert_has_line(&msl, "out.gl_Position = float4(half4(in.a_pos));");
}

#[test]
fn check_reserved_names_are_renamed() {
    let mut b = module_builder();

    let void = b.type_void();
    let f32_t = b.type_float(32);
    let v4 = b.type_vector(f32_t, 4);
    let ptr_in = b.type_pointer(None, spirv::StorageClass::Input, v4);
    let ptr_out = b.type_pointer(None, spirv::StorageClass::Output, v4);

    let attr = b.variable(ptr_in, None, spirv::StorageClass::Input, None);
    b.name(attr, "bias");
    b.decorate(attr, spirv::Decoration::Location, [Operand::LiteralBit32(0)]);
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
    let loaded = b.load(v4, None, attr, None, vec![]).unwrap();
    b.store(gl_pos, loaded, None, vec![]).unwrap();
    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(
        spirv::ExecutionModel::Vertex,
        main_fn,
        "main",
        vec![attr, gl_pos],
    );

    let msl = compile_words(&assemble(b));

    assert_has_line(&msl, "float4 bias0 [[attribute(0)]];");
    assert_has_line(&msl, "out.gl_Position = in.bias0;");
    // The entry point cannot keep the name of the C++ entry symbol
    assert_contains(&msl, "vertex main0_out main0(");
}

#[test]
fn check_matrix_in_fragment_input_rejected() {
    let mut b = module_builder();

    let void = b.type_void();
    let f32_t = b.type_float(32);
    let v4 = b.type_vector(f32_t, 4);
    let m4 = b.type_matrix(v4, 4);
    let i32_t = b.type_int(32, 1);
    let ptr_in = b.type_pointer(None, spirv::StorageClass::Input, m4);
    let ptr_out = b.type_pointer(None, spirv::StorageClass::Output, v4);

    let interp = b.variable(ptr_in, None, spirv::StorageClass::Input, None);
    b.name(interp, "interp_matrix");
    b.decorate(interp, spirv::Decoration::Location, [Operand::LiteralBit32(0)]);
    let color = b.variable(ptr_out, None, spirv::StorageClass::Output, None);
    b.name(color, "frag_color");
    b.decorate(color, spirv::Decoration::Location, [Operand::LiteralBit32(0)]);

    let c0 = b.constant_bit32(i32_t, 0);

    let fn_ty = b.type_function(void, vec![]);
    let main_fn = b
        .begin_function(void, None, spirv::FunctionControl::NONE, fn_ty)
        .unwrap();
    b.begin_block(None).unwrap();
    let ptr_col = b.type_pointer(None, spirv::StorageClass::Input, v4);
    let chain = b.access_chain(ptr_col, None, interp, vec![c0]).unwrap();
    let column = b.load(v4, None, chain, None, vec![]).unwrap();
    b.store(color, column, None, vec![]).unwrap();
    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(
        spirv::ExecutionModel::Fragment,
        main_fn,
        "main",
        vec![interp, color],
    );
    b.execution_mode(main_fn, spirv::ExecutionMode::OriginUpperLeft, vec![]);

    let err = expect_compile_fail(&assemble(b));
    assert!(matches!(err, CompileError::InvalidInterface(_)), "{:?}", err);
}

#[test]
fn check_fragment_output_color_attribute() {
    let mut b = module_builder();

    let void = b.type_void();
    let f32_t = b.type_float(32);
    let v4 = b.type_vector(f32_t, 4);
    let ptr_out = b.type_pointer(None, spirv::StorageClass::Output, v4);

    let color = b.variable(ptr_out, None, spirv::StorageClass::Output, None);
    b.name(color, "frag_color");
    b.decorate(color, spirv::Decoration::Location, [Operand::LiteralBit32(0)]);

    let half = b.constant_bit32(f32_t, 0.5f32.to_bits());
    let one = b.constant_bit32(f32_t, 1.0f32.to_bits());

    let fn_ty = b.type_function(void, vec![]);
    let main_fn = b
        .begin_function(void, None, spirv::FunctionControl::NONE, fn_ty)
        .unwrap();
    b.begin_block(None).unwrap();
    let value = b
        .composite_construct(v4, None, vec![half, half, half, one])
        .unwrap();
    b.store(color, value, None, vec![]).unwrap();
    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(spirv::ExecutionModel::Fragment, main_fn, "main", vec![color]);
    b.execution_mode(main_fn, spirv::ExecutionMode::OriginUpperLeft, vec![]);

    let msl = compile_words(&assemble(b));

    assert_has_line(&msl, "float4 frag_color [[color(0)]];");
    assert_contains(&msl, "fragment main0_out main0()");
    assert_has_line(&msl, "out.frag_color = float4(0.5, 0.5, 0.5, 1.0);");
}

#[test]
fn check_storage_image_access_refined_by_recompile() {
    let mut b = module_builder();

    let void = b.type_void();
    let f32_t = b.type_float(32);
    let i32_t = b.type_int(32, 1);
    let v4 = b.type_vector(f32_t, 4);
    let i2 = b.type_vector(i32_t, 2);

    let img_ty = b.type_image(
        f32_t,
        spirv::Dim::Dim2D,
        0,
        0,
        0,
        2,
        spirv::ImageFormat::Rgba32f,
        None,
    );
    let ptr_img = b.type_pointer(None, spirv::StorageClass::UniformConstant, img_ty);
    let img = b.variable(ptr_img, None, spirv::StorageClass::UniformConstant, None);
    b.name(img, "img");
    b.decorate(img, spirv::Decoration::DescriptorSet, [Operand::LiteralBit32(0)]);
    b.decorate(img, spirv::Decoration::Binding, [Operand::LiteralBit32(0)]);

    let ssbo = b.type_struct(vec![f32_t]);
    b.name(ssbo, "readback_t");
    b.member_name(ssbo, 0, "r");
    b.decorate(ssbo, spirv::Decoration::BufferBlock, []);
    b.member_decorate(ssbo, 0, spirv::Decoration::Offset, [Operand::LiteralBit32(0)]);
    let ptr_ssbo = b.type_pointer(None, spirv::StorageClass::Uniform, ssbo);
    let readback = b.variable(ptr_ssbo, None, spirv::StorageClass::Uniform, None);
    b.name(readback, "readback");
    b.decorate(
        readback,
        spirv::Decoration::DescriptorSet,
        [Operand::LiteralBit32(0)],
    );
    b.decorate(readback, spirv::Decoration::Binding, [Operand::LiteralBit32(1)]);

    let c0 = b.constant_bit32(i32_t, 0);
    let zero_f = b.constant_bit32(f32_t, 0.0f32.to_bits());
    let coord = b.constant_composite(i2, vec![c0, c0]);
    let texel = b.constant_composite(v4, vec![zero_f, zero_f, zero_f, zero_f]);

    let fn_ty = b.type_function(void, vec![]);
    let main_fn = b
        .begin_function(void, None, spirv::FunctionControl::NONE, fn_ty)
        .unwrap();
    b.begin_block(None).unwrap();

    let loaded = b.load(img_ty, None, img, None, vec![]).unwrap();
    let fetched = b.image_read(v4, None, loaded, coord, None, vec![]).unwrap();
    let red = b.composite_extract(f32_t, None, fetched, vec![0]).unwrap();
    let ptr_f32 = b.type_pointer(None, spirv::StorageClass::Uniform, f32_t);
    let chain = b.access_chain(ptr_f32, None, readback, vec![c0]).unwrap();
    b.store(chain, red, None, vec![]).unwrap();

    let loaded_again = b.load(img_ty, None, img, None, vec![]).unwrap();
    b.image_write(loaded_again, coord, texel, None, vec![]).unwrap();

    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(spirv::ExecutionModel::GLCompute, main_fn, "main", vec![]);
    b.execution_mode(main_fn, spirv::ExecutionMode::LocalSize, vec![1, 1, 1]);

    let msl = compile_words(&assemble(b));

    // Both access directions were discovered mid-emission and survived the
    // restart
    assert_contains(&msl, "texture2d<float, access::read_write> img [[texture(0)]]");
    assert_has_line(&msl, "readback.r = img.read(uint2(int2(0, 0))).x;");
    assert_has_line(&msl, "img.write(float4(0.0, 0.0, 0.0, 0.0), uint2(int2(0, 0)));");
}

#[test]
fn check_image_query_size() {
    let mut b = module_builder();

    let void = b.type_void();
    let f32_t = b.type_float(32);
    let u32_t = b.type_int(32, 0);
    let i32_t = b.type_int(32, 1);
    let u2 = b.type_vector(u32_t, 2);

    let img_ty = b.type_image(
        f32_t,
        spirv::Dim::Dim2D,
        0,
        0,
        0,
        2,
        spirv::ImageFormat::Rgba32f,
        None,
    );
    let ptr_img = b.type_pointer(None, spirv::StorageClass::UniformConstant, img_ty);
    let img = b.variable(ptr_img, None, spirv::StorageClass::UniformConstant, None);
    b.name(img, "img");

    let ssbo = b.type_struct(vec![u32_t]);
    b.name(ssbo, "dims_t");
    b.member_name(ssbo, 0, "w");
    b.decorate(ssbo, spirv::Decoration::BufferBlock, []);
    b.member_decorate(ssbo, 0, spirv::Decoration::Offset, [Operand::LiteralBit32(0)]);
    let ptr_ssbo = b.type_pointer(None, spirv::StorageClass::Uniform, ssbo);
    let dims = b.variable(ptr_ssbo, None, spirv::StorageClass::Uniform, None);
    b.name(dims, "dims");

    let c0 = b.constant_bit32(i32_t, 0);

    let fn_ty = b.type_function(void, vec![]);
    let main_fn = b
        .begin_function(void, None, spirv::FunctionControl::NONE, fn_ty)
        .unwrap();
    b.begin_block(None).unwrap();
    let loaded = b.load(img_ty, None, img, None, vec![]).unwrap();
    let size = b.image_query_size(u2, None, loaded).unwrap();
    let width = b.composite_extract(u32_t, None, size, vec![0]).unwrap();
    let ptr_u32 = b.type_pointer(None, spirv::StorageClass::Uniform, u32_t);
    let chain = b.access_chain(ptr_u32, None, dims, vec![c0]).unwrap();
    b.store(chain, width, None, vec![]).unwrap();
    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(spirv::ExecutionModel::GLCompute, main_fn, "main", vec![]);
    b.execution_mode(main_fn, spirv::ExecutionMode::LocalSize, vec![1, 1, 1]);

    let msl = compile_words(&assemble(b));

    assert_has_line(&msl, "dims.w = uint2(img.get_width(), img.get_height()).x;");
}

#[test]
fn check_helper_function_receives_globals_as_arguments() {
    let mut b = module_builder();

    let void = b.type_void();
    let f32_t = b.type_float(32);
    let i32_t = b.type_int(32, 1);

    let block = b.type_struct(vec![f32_t]);
    b.name(block, "params_t");
    b.member_name(block, 0, "b");
    b.decorate(block, spirv::Decoration::Block, []);
    b.member_decorate(block, 0, spirv::Decoration::Offset, [Operand::LiteralBit32(0)]);
    let ptr_block = b.type_pointer(None, spirv::StorageClass::Uniform, block);
    let params = b.variable(ptr_block, None, spirv::StorageClass::Uniform, None);
    b.name(params, "params");

    let ssbo = b.type_struct(vec![f32_t]);
    b.name(ssbo, "result_t");
    b.member_name(ssbo, 0, "value");
    b.decorate(ssbo, spirv::Decoration::BufferBlock, []);
    b.member_decorate(ssbo, 0, spirv::Decoration::Offset, [Operand::LiteralBit32(0)]);
    let ptr_ssbo = b.type_pointer(None, spirv::StorageClass::Uniform, ssbo);
    let result = b.variable(ptr_ssbo, None, spirv::StorageClass::Uniform, None);
    b.name(result, "result");

    let c0 = b.constant_bit32(i32_t, 0);
    let ptr_f32 = b.type_pointer(None, spirv::StorageClass::Uniform, f32_t);

    // float helper() { return params.b; }
    let helper_ty = b.type_function(f32_t, vec![]);
    let helper_fn = b
        .begin_function(f32_t, None, spirv::FunctionControl::NONE, helper_ty)
        .unwrap();
    b.name(helper_fn, "fetch_param");
    b.begin_block(None).unwrap();
    let chain = b.access_chain(ptr_f32, None, params, vec![c0]).unwrap();
    let value = b.load(f32_t, None, chain, None, vec![]).unwrap();
    b.ret_value(value).unwrap();
    b.end_function().unwrap();

    let fn_ty = b.type_function(void, vec![]);
    let main_fn = b
        .begin_function(void, None, spirv::FunctionControl::NONE, fn_ty)
        .unwrap();
    b.begin_block(None).unwrap();
    let fetched = b.function_call(f32_t, None, helper_fn, vec![]).unwrap();
    let out_chain = b.access_chain(ptr_f32, None, result, vec![c0]).unwrap();
    b.store(out_chain, fetched, None, vec![]).unwrap();
    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(spirv::ExecutionModel::GLCompute, main_fn, "main", vec![]);
    b.execution_mode(main_fn, spirv::ExecutionMode::LocalSize, vec![1, 1, 1]);

    let msl = compile_words(&assemble(b));

    // The helper picks up the uniform block as a pass-through parameter and
    // is defined before the entry point
    assert_contains(&msl, "float fetch_param(constant params_t& params)");
    assert_has_line(&msl, "return params.b;");
    assert_contains(&msl, "fetch_param(params);");
    assert_contains(
        &msl,
        "#pragma clang diagnostic ignored \"-Wmissing-prototypes\"",
    );

    let helper_at = msl.find("float fetch_param").unwrap();
    let entry_at = msl.find("kernel void main0").unwrap();
    assert!(helper_at < entry_at);
}

#[test]
fn check_specialization_constants_emit_function_constants() {
    let mut b = module_builder();

    let void = b.type_void();
    let f32_t = b.type_float(32);
    let v4 = b.type_vector(f32_t, 4);
    let ptr_out = b.type_pointer(None, spirv::StorageClass::Output, v4);

    let gl_pos = b.variable(ptr_out, None, spirv::StorageClass::Output, None);
    b.decorate(
        gl_pos,
        spirv::Decoration::BuiltIn,
        [Operand::BuiltIn(spirv::BuiltIn::Position)],
    );

    let scale = b.spec_constant_bit32(f32_t, 3.5f32.to_bits());
    b.name(scale, "scale");
    b.decorate(scale, spirv::Decoration::SpecId, [Operand::LiteralBit32(7)]);

    let fn_ty = b.type_function(void, vec![]);
    let main_fn = b
        .begin_function(void, None, spirv::FunctionControl::NONE, fn_ty)
        .unwrap();
    b.begin_block(None).unwrap();
    let pos = b
        .composite_construct(v4, None, vec![scale, scale, scale, scale])
        .unwrap();
    b.store(gl_pos, pos, None, vec![]).unwrap();
    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(spirv::ExecutionModel::Vertex, main_fn, "main", vec![gl_pos]);

    let msl = compile_words(&assemble(b));

    assert_has_line(&msl, "constant float scale_tmp [[function_constant(7)]];");
    assert_has_line(
        &msl,
        "constant float scale = is_function_constant_defined(scale_tmp) ? scale_tmp : 3.5;",
    );
    assert_has_line(
        &msl,
        "out.gl_Position = float4(scale, scale, scale, scale);",
    );
}

#[test]
fn check_auto_assigned_resource_indices_do_not_collide() {
    let mut b = module_builder();

    let void = b.type_void();
    let f32_t = b.type_float(32);
    let i32_t = b.type_int(32, 1);

    let mut make_block = |b: &mut rspirv::dr::Builder, name: &str| {
        let block = b.type_struct(vec![f32_t]);
        b.name(block, format!("{}_t", name));
        b.member_name(block, 0, "v");
        b.decorate(block, spirv::Decoration::Block, []);
        b.member_decorate(block, 0, spirv::Decoration::Offset, [Operand::LiteralBit32(0)]);
        let ptr = b.type_pointer(None, spirv::StorageClass::Uniform, block);
        let var = b.variable(ptr, None, spirv::StorageClass::Uniform, None);
        b.name(var, name);
        var
    };

    let first = make_block(&mut b, "alpha");
    let second = make_block(&mut b, "beta");

    let ssbo = b.type_struct(vec![f32_t]);
    b.name(ssbo, "sum_t");
    b.member_name(ssbo, 0, "total");
    b.decorate(ssbo, spirv::Decoration::BufferBlock, []);
    b.member_decorate(ssbo, 0, spirv::Decoration::Offset, [Operand::LiteralBit32(0)]);
    let ptr_ssbo = b.type_pointer(None, spirv::StorageClass::Uniform, ssbo);
    let sum = b.variable(ptr_ssbo, None, spirv::StorageClass::Uniform, None);
    b.name(sum, "sum");

    let c0 = b.constant_bit32(i32_t, 0);
    let ptr_f32 = b.type_pointer(None, spirv::StorageClass::Uniform, f32_t);

    let fn_ty = b.type_function(void, vec![]);
    let main_fn = b
        .begin_function(void, None, spirv::FunctionControl::NONE, fn_ty)
        .unwrap();
    b.begin_block(None).unwrap();
    let chain_a = b.access_chain(ptr_f32, None, first, vec![c0]).unwrap();
    let a = b.load(f32_t, None, chain_a, None, vec![]).unwrap();
    let chain_b = b.access_chain(ptr_f32, None, second, vec![c0]).unwrap();
    let bv = b.load(f32_t, None, chain_b, None, vec![]).unwrap();
    let total = b.f_add(f32_t, None, a, bv).unwrap();
    let out_chain = b.access_chain(ptr_f32, None, sum, vec![c0]).unwrap();
    b.store(out_chain, total, None, vec![]).unwrap();
    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(spirv::ExecutionModel::GLCompute, main_fn, "main", vec![]);
    b.execution_mode(main_fn, spirv::ExecutionMode::LocalSize, vec![1, 1, 1]);

    let msl = compile_words(&assemble(b));

    assert_contains(&msl, "constant alpha_t& alpha [[buffer(0)]]");
    assert_contains(&msl, "constant beta_t& beta [[buffer(1)]]");
    assert_contains(&msl, "device sum_t& sum [[buffer(2)]]");
    assert_has_line(&msl, "sum.total = alpha.v + beta.v;");
}

#[test]
fn check_resource_binding_table_is_consulted() {
    let mut scaffold = kernel_with_counter();
    let b = &mut scaffold.builder;

    let u32_t = scaffold.u32_t;
    let chain = scaffold.counter_chain;
    let one = b.constant_bit32(u32_t, 1);
    let loaded = b.load(u32_t, None, chain, None, vec![]).unwrap();
    let bumped = b.i_add(u32_t, None, loaded, one).unwrap();
    b.store(chain, bumped, None, vec![]).unwrap();

    let words = finish_kernel(scaffold, vec![]);

    let bindings = vec![MslResourceBinding {
        stage: spirv::ExecutionModel::GLCompute,
        desc_set: 0,
        binding: 0,
        msl_buffer: 7,
        msl_texture: 0,
        msl_sampler: 0,
        used_by_shader: false,
    }];

    let (msl, _, bindings_out) =
        compile_words_with(&words, CompilerOptions::default(), Vec::new(), bindings);

    assert_contains(&msl, "device ssbo_t& counters [[buffer(7)]]");
    assert_has_line(&msl, "counters.c = counters.c + 1u;");
    assert!(bindings_out[0].used_by_shader);
}
