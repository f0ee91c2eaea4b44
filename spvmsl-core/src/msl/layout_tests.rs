use rspirv::dr::Operand;
use rspirv::spirv::{Decoration, ExecutionModel, StorageClass, Word};

use crate::ir::Ir;
use crate::test_util::{assert_lines, compile_ok, ShaderBuilder};

use super::layout::{
    align_struct, declared_struct_size, is_member_packable, member_alignment, member_size, members_by_offset,
};

/// Load a compute module holding one storage block with the given members.
fn block_module(members: impl FnOnce(&mut ShaderBuilder) -> Vec<(Word, &'static str, u32)>) -> (Ir, Word) {
    let mut s = ShaderBuilder::new(ExecutionModel::GLCompute);
    let members = members(&mut s);
    let (block, _) = s.buffer_block(StorageClass::StorageBuffer, "Block", "block", &members, 0);
    let main = s.begin_main();
    s.end_void_function();
    (s.finish(main), block)
}

fn float_array(s: &mut ShaderBuilder, length: u32, stride: u32) -> Word {
    let len = s.uint_const(length);
    let array = s.b.type_array(s.float, len);
    s.b.decorate(array, Decoration::ArrayStride, [Operand::LiteralBit32(stride)]);
    array
}

#[test]
fn tight_float3_is_packed() {
    let (mut ir, block) = block_module(|s| vec![(s.float3, "a", 0), (s.float, "b", 12)]);
    assert!(is_member_packable(&ir, block, 0, Some(12)).unwrap());
    assert_eq!(member_size(&ir, block, 0).unwrap(), 16);

    align_struct(&mut ir, block).unwrap();
    assert!(ir.is_member_packed(block, 0));
    assert!(!ir.is_member_packed(block, 1));
    assert_eq!(member_size(&ir, block, 0).unwrap(), 12);
    assert_eq!(member_alignment(&ir, block, 0).unwrap(), 4);
    assert_eq!(declared_struct_size(&ir, block).unwrap(), 16);
}

#[test]
fn float3_with_room_keeps_metal_layout() {
    let (mut ir, block) = block_module(|s| vec![(s.float3, "a", 0), (s.float, "b", 16)]);
    align_struct(&mut ir, block).unwrap();
    assert!(!ir.is_member_packed(block, 0));
    assert_eq!(member_size(&ir, block, 0).unwrap(), 16);
    assert_eq!(member_alignment(&ir, block, 0).unwrap(), 16);
}

#[test]
fn loose_offsets_get_padding() {
    let (mut ir, block) = block_module(|s| vec![(s.float, "a", 0), (s.float, "b", 16)]);
    align_struct(&mut ir, block).unwrap();
    let padding = |ir: &Ir, index| ir.member_decorations(block, index).map(|d| d.padding).unwrap_or(0);
    assert_eq!(padding(&ir, 0), 0);
    assert_eq!(padding(&ir, 1), 12);

    // Repeated alignment reaches the same answer.
    align_struct(&mut ir, block).unwrap();
    assert_eq!(padding(&ir, 1), 12);
}

#[test]
fn scalar_array_with_vec4_stride_is_packed() {
    let (mut ir, block) = block_module(|s| {
        let array = float_array(s, 4, 16);
        vec![(array, "weights", 0)]
    });
    assert!(is_member_packable(&ir, block, 0, None).unwrap());
    align_struct(&mut ir, block).unwrap();
    assert_eq!(member_alignment(&ir, block, 0).unwrap(), 16);
    assert_eq!(member_size(&ir, block, 0).unwrap(), 64);
}

#[test]
fn scalar_array_with_natural_stride_is_left_alone() {
    let (ir, block) = block_module(|s| {
        let array = float_array(s, 4, 4);
        vec![(array, "weights", 0)]
    });
    assert!(!is_member_packable(&ir, block, 0, None).unwrap());
    assert_eq!(member_size(&ir, block, 0).unwrap(), 16);
}

#[test]
fn members_are_ordered_by_offset() {
    let (ir, block) = block_module(|s| vec![(s.float4, "late", 32), (s.float, "early", 0), (s.float2, "mid", 8)]);
    assert_eq!(members_by_offset(&ir, block).unwrap(), vec![1, 2, 0]);
    assert_eq!(declared_struct_size(&ir, block).unwrap(), 48);
}

#[test]
fn packed_and_padded_members_in_output() {
    let mut s = ShaderBuilder::new(ExecutionModel::GLCompute);
    let (_, params) = s.buffer_block(
        StorageClass::StorageBuffer,
        "Params",
        "params",
        &[(s.float3, "dir", 0), (s.float, "scale", 12), (s.float, "weight", 32)],
        0,
    );
    let float_ptr = s.pointer(StorageClass::StorageBuffer, s.float);
    let two = s.int_const(2);
    let main = s.begin_main();
    let chain = s.b.access_chain(float_ptr, None, params, [two]).unwrap();
    let weight = s.load(s.float, chain);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(
        &msl,
        &[
            "struct Params",
            "packed_float3 dir;",
            "float scale;",
            "char _m2_pad[16];",
            "float weight;",
            &format!("float _{} = params.weight;", weight),
        ],
    );
}

#[test]
fn reserved_member_name_is_suffixed() {
    let mut s = ShaderBuilder::new(ExecutionModel::GLCompute);
    let (_, params) = s.buffer_block(StorageClass::StorageBuffer, "Params", "params", &[(s.float, "bias", 0)], 0);
    let float_ptr = s.pointer(StorageClass::StorageBuffer, s.float);
    let zero = s.int_const(0);
    let main = s.begin_main();
    let chain = s.b.access_chain(float_ptr, None, params, [zero]).unwrap();
    let bias = s.load(s.float, chain);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(&msl, &["float bias0;", &format!("float _{} = params.bias0;", bias)]);
    assert!(!msl.contains("float bias;"), "{}", msl);
}
