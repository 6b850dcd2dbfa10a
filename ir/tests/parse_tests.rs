use rspirv::binary::Assemble;
use rspirv::dr::Operand;
use rspirv::spirv;

use smelt_ir::{parse_words, BaseType, IdEntry, Terminator};

fn build_vertex_module() -> Vec<u32> {
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
    b.decorate(a_pos, spirv::Decoration::Location, [Operand::LiteralBit32(3)]);

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
fn parse_builds_the_id_tables() {
    let module = parse_words(&build_vertex_module()).unwrap();

    assert_eq!(module.execution_model, spirv::ExecutionModel::Vertex);
    assert_eq!(module.entry_point_name, "main");
    assert_eq!(module.entry_interface.len(), 2);
    assert_eq!(module.global_variables.len(), 2);

    // The entry point resolves to a function with a single returning block
    assert_eq!(module.id_kind(module.entry_point), IdEntry::Function);
    let func = module.get_function(module.entry_point);
    assert_eq!(func.blocks.len(), 1);
    let block = module.get_block(func.blocks[0]);
    assert_eq!(block.terminator, Terminator::Return);
    assert_eq!(block.ops.len(), 2);
}

#[test]
fn parse_resolves_types_through_pointers() {
    let module = parse_words(&build_vertex_module()).unwrap();

    let a_pos = *module
        .global_variables
        .iter()
        .find(|id| module.get_name(**id) == "a_pos")
        .unwrap();

    let var = module.get_variable(a_pos);
    assert_eq!(var.storage, spirv::StorageClass::Input);

    // The pointer record copies the pointee shape
    let ty = module.get_type(var.basetype);
    assert!(ty.pointer);
    assert_eq!(ty.basetype, BaseType::Float);
    assert_eq!(ty.vecsize, 4);

    // Decorations with operands land in their field
    let meta = module.meta(a_pos).unwrap();
    assert!(meta.decoration.has(spirv::Decoration::Location));
    assert_eq!(meta.decoration.location, 3);
}

#[test]
fn parse_marks_array_length_constants() {
    let mut b = rspirv::dr::Builder::new();
    b.capability(spirv::Capability::Shader);
    b.memory_model(spirv::AddressingModel::Logical, spirv::MemoryModel::GLSL450);

    let void = b.type_void();
    let u32_t = b.type_int(32, 0);
    let len = b.constant_bit32(u32_t, 4);
    let arr = b.type_array(u32_t, len);

    let ptr = b.type_pointer(None, spirv::StorageClass::Private, arr);
    let var = b.variable(ptr, None, spirv::StorageClass::Private, None);

    let fn_ty = b.type_function(void, vec![]);
    let main_fn = b
        .begin_function(void, None, spirv::FunctionControl::NONE, fn_ty)
        .unwrap();
    b.begin_block(None).unwrap();
    b.ret().unwrap();
    b.end_function().unwrap();
    b.entry_point(spirv::ExecutionModel::GLCompute, main_fn, "main", vec![]);
    b.execution_mode(main_fn, spirv::ExecutionMode::LocalSize, vec![1, 1, 1]);

    let module = parse_words(&b.module().assemble()).unwrap();

    assert!(module.get_constant(len).is_used_as_array_length);
    let ty = module.get_type(module.get_variable(var).basetype);
    assert_eq!(ty.array, vec![4]);
}
