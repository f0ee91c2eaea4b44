use rspirv::binary::Assemble;
use rspirv::dr::Operand;
use rspirv::spirv::{Decoration, Dim, ExecutionModel, GLOp, ImageFormat, Op, SelectionControl, StorageClass};

use crate::error::CompilerError;
use crate::ir::{BaseType, ConstantValue, ExtInstSet};
use crate::loader::{instruction_words, load_words};
use crate::test_util::ShaderBuilder;

#[test]
fn assembled_words_round_trip_entry_point() {
    let mut s = ShaderBuilder::new(ExecutionModel::GLCompute);
    let main = s.begin_main();
    s.end_void_function();
    s.b.entry_point(ExecutionModel::GLCompute, main, "main", []);
    s.b.execution_mode(main, rspirv::spirv::ExecutionMode::LocalSize, [16, 4, 1]);
    let words = s.b.module().assemble();

    let ir = load_words(&words).unwrap();
    let ep = ir.entry_point().unwrap();
    assert_eq!(ep.id, main);
    assert_eq!(ep.name, "main");
    assert_eq!(ep.model, ExecutionModel::GLCompute);
    assert_eq!(ep.workgroup_size, [16, 4, 1]);
    assert!(ir.bound() > main);
}

#[test]
fn garbage_is_an_invalid_module() {
    match load_words(&[0xdead_beef, 1, 2, 3]) {
        Err(CompilerError::InvalidModule(_)) => {}
        other => panic!("expected an invalid module error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn names_and_decorations_are_recorded() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let color = s.input(s.float4, "vColor", 3);
    s.b.decorate(color, Decoration::Flat, std::iter::empty::<Operand>());
    let (float, float4) = (s.float, s.float4);
    let (block, ubo) = s.buffer_block(
        StorageClass::Uniform,
        "Globals",
        "globals",
        &[(float4, "tint", 0), (float, "time", 16)],
        5,
    );
    let main = s.begin_main();
    s.end_void_function();
    let ir = s.finish(main);

    assert_eq!(ir.name(color), "vColor");
    assert_eq!(ir.get_decoration(color, Decoration::Location), 3);
    assert!(ir.has_decoration(color, Decoration::Flat));
    assert_eq!(ir.get_decoration(ubo, Decoration::Binding), 5);
    assert!(ir.has_decoration(block, Decoration::Block));
    assert_eq!(ir.member_name(block, 1), "time");
    assert_eq!(ir.get_member_decoration(block, 1, Decoration::Offset), 16);

    let var = ir.get_variable(ubo).unwrap();
    assert_eq!(var.storage, StorageClass::Uniform);
    let (data_id, data) = ir.variable_data_type(ubo).unwrap();
    assert_eq!(data_id, block);
    assert!(data.is_struct());
    assert_eq!(data.member_types, vec![float4, float]);
}

#[test]
fn scalar_and_composite_constants() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let half = s.float_const(0.5);
    let minus_one = s.int_const(-1);
    let pair = s.b.constant_composite(s.float2, [half, half]);
    let yes = s.b.constant_true(s.bool_ty);
    let main = s.begin_main();
    s.end_void_function();
    let ir = s.finish(main);

    match ir.get_constant(half).unwrap().value {
        ConstantValue::Scalar(bits) => assert_eq!(bits as u32, 0.5f32.to_bits()),
        ref other => panic!("unexpected {:?}", other),
    }
    assert_eq!(ir.constant_u32(minus_one).unwrap(), u32::MAX);
    match &ir.get_constant(pair).unwrap().value {
        ConstantValue::Composite(parts) => assert_eq!(parts, &vec![half, half]),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(ir.get_constant(yes).unwrap().value, ConstantValue::Bool(true)));
}

#[test]
fn image_types_keep_their_shape() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let image = s.b.type_image(s.float, Dim::DimCube, 1, 1, 0, 1, ImageFormat::Unknown, None);
    let sampled = s.b.type_sampled_image(image);
    let main = s.begin_main();
    s.end_void_function();
    let ir = s.finish(main);

    let ty = ir.get_type(image).unwrap();
    assert_eq!(ty.basetype, BaseType::Image);
    let info = ty.image.as_ref().unwrap();
    assert_eq!(info.dim, Dim::DimCube);
    assert!(info.depth);
    assert!(info.arrayed);
    assert!(!info.ms);
    assert_eq!(info.sampled, 1);
    assert_eq!(ir.get_type(sampled).unwrap().basetype, BaseType::SampledImage);
}

#[test]
fn function_blocks_keep_merge_and_terminator() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let value = s.input(s.float, "vValue", 0);
    let zero = s.float_const(0.0);
    let local_ptr = s.pointer(StorageClass::Function, s.float);
    let main = s.begin_main();
    let tmp = s.b.variable(local_ptr, None, StorageClass::Function, None);
    let (then_label, merge) = (s.b.id(), s.b.id());
    let x = s.load(s.float, value);
    let cond = s.b.f_ord_less_than(s.bool_ty, None, x, zero).unwrap();
    s.b.selection_merge(merge, SelectionControl::NONE).unwrap();
    s.b.branch_conditional(cond, then_label, merge, []).unwrap();
    s.b.begin_block(Some(then_label)).unwrap();
    let flipped = s
        .b
        .ext_inst(s.float, None, s.glsl, GLOp::FAbs as u32, vec![Operand::IdRef(x)])
        .unwrap();
    s.store(tmp, flipped);
    s.b.branch(merge).unwrap();
    s.b.begin_block(Some(merge)).unwrap();
    let (glsl, float) = (s.glsl, s.float);
    s.end_void_function();
    let ir = s.finish(main);

    let f = ir.get_function(main).unwrap();
    assert_eq!(f.local_variables, vec![tmp]);
    assert_eq!(f.blocks.len(), 3);

    let entry = &f.blocks[0];
    assert_eq!(entry.merge().map(|m| m.op), Some(Op::SelectionMerge));
    assert_eq!(entry.terminator().map(|t| t.op), Some(Op::BranchConditional));
    assert_eq!(entry.body().len(), 2);
    assert!(entry.body().iter().all(|i| i.op != Op::Variable));

    let then_block = &f.blocks[1];
    assert_eq!(then_block.label, then_label);
    assert!(then_block.merge().is_none());
    let ext = &then_block.body()[0];
    assert_eq!(ext.op, Op::ExtInst);
    assert_eq!(ext.ops, vec![float, flipped, glsl, GLOp::FAbs as u32, x]);
    assert_eq!(ir.ext_inst_set(glsl), Some(ExtInstSet::GlslStd450));
    assert_eq!(ir.type_of(flipped), Some(float));
}

#[test]
fn instruction_words_flatten_operands() {
    let inst = rspirv::dr::Instruction::new(
        Op::Store,
        None,
        None,
        vec![
            Operand::IdRef(7),
            Operand::IdRef(9),
            Operand::MemoryAccess(rspirv::spirv::MemoryAccess::ALIGNED),
            Operand::LiteralBit32(16),
        ],
    );
    assert_eq!(instruction_words(&inst), vec![7, 9, 2, 16]);
}
