use rspirv::dr::Operand;
use rspirv::spirv::{Dim, ExecutionModel, GLOp, ImageFormat};

use crate::options::Options;
use crate::test_util::{assert_lines, compile_ok, ShaderBuilder};

use super::helpers::HelperTag;
use super::{Session, PRAGMA_MISSING_PROTOTYPES};

#[test]
fn array_copy_pulls_in_shallower_copies() {
    let mut session = Session::default();
    assert!(session.add_helper(HelperTag::ArrayCopy(3)));
    assert!(session.has_helper(HelperTag::ArrayCopy(1)));
    assert!(session.has_helper(HelperTag::ArrayCopy(2)));
    assert!(!session.add_helper(HelperTag::ArrayCopy(2)));
}

#[test]
fn helpers_iterate_in_catalog_order() {
    let mut session = Session::default();
    session.add_helper(HelperTag::TextureSwizzle);
    session.add_helper(HelperTag::Inverse2x2);
    session.add_helper(HelperTag::Mod);
    let order: Vec<HelperTag> = session.helpers().collect();
    assert_eq!(order, vec![HelperTag::Mod, HelperTag::Inverse2x2, HelperTag::TextureSwizzle]);
}

#[test]
fn shape_lookups() {
    assert_eq!(HelperTag::row_major(3, 4), Some(HelperTag::RowMajor3x4));
    assert_eq!(HelperTag::row_major(4, 4), None);
    assert_eq!(HelperTag::inverse(3), Some(HelperTag::Inverse3x3));
    assert_eq!(HelperTag::inverse(5), None);
}

#[test]
fn radians_helper_precedes_entry_point() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let angle = s.input(s.float, "vAngle", 0);
    let out = s.output(s.float, "outValue", 0);
    let main = s.begin_main();
    let a = s.load(s.float, angle);
    let r = s
        .b
        .ext_inst(s.float, None, s.glsl, GLOp::Radians as u32, vec![Operand::IdRef(a)])
        .unwrap();
    s.store(out, r);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert!(msl.starts_with(PRAGMA_MISSING_PROTOTYPES), "{}", msl);
    let helper = msl.find("T radians(T d)").expect("radians helper");
    let entry = msl.find("fragment main0_out main0").expect("entry point");
    assert!(helper < entry);
    assert_lines(&msl, &[&format!("float _{} = radians(_{});", r, a)]);
}

#[test]
fn matrix_inverse_brings_determinants() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let mat4 = s.b.type_matrix(s.float4, 4);
    let column = s.input(s.float4, "vColumn", 0);
    let out = s.output(s.float4, "FragColor", 0);
    let main = s.begin_main();
    let c = s.load(s.float4, column);
    let m = s.b.composite_construct(mat4, None, [c, c, c, c]).unwrap();
    let inv = s
        .b
        .ext_inst(mat4, None, s.glsl, GLOp::MatrixInverse as u32, vec![Operand::IdRef(m)])
        .unwrap();
    let v = s.b.matrix_times_vector(s.float4, None, inv, c).unwrap();
    s.store(out, v);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert!(msl.contains("inline float spvDet2x2("), "{}", msl);
    assert!(msl.contains("float4x4 spvInverse4x4(float4x4 m)"), "{}", msl);
    assert_lines(&msl, &[&format!("float4x4 _{} = spvInverse4x4(_{});", inv, m)]);
}

#[test]
fn texel_buffer_coordinates_use_configured_width() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let image = s.b.type_image(s.float, Dim::DimBuffer, 0, 0, 0, 1, ImageFormat::Unknown, None);
    let texels = s.resource(image, "texels", 0);
    let out = s.output(s.float4, "FragColor", 0);
    let five = s.int_const(5);
    let main = s.begin_main();
    let handle = s.load(image, texels);
    let texel = s
        .b
        .image_fetch(s.float4, None, handle, five, None, std::iter::empty::<Operand>())
        .unwrap();
    s.store(out, texel);
    s.end_void_function();

    let options = Options {
        texel_buffer_texture_width: 1024,
        ..Options::default()
    };
    let msl = s.compile(main, options).unwrap();
    assert!(msl.contains("uint2 spvTexelBufferCoord(uint tc)"), "{}", msl);
    assert_lines(
        &msl,
        &[
            "return uint2(tc % 1024, tc / 1024);",
            &format!("float4 _{} = texels.read(spvTexelBufferCoord(5));", texel),
        ],
    );
}
