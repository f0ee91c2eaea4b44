use rspirv::dr::Operand;
use rspirv::spirv::{BuiltIn, Decoration, Dim, ExecutionModel, ImageFormat};

use crate::error::CompilerError;
use crate::options::{Options, VertexAttr, VertexFormat};
use crate::test_util::{assert_lines, compile_ok, ShaderBuilder};

fn uint8_attribute(location: u32) -> VertexAttr {
    VertexAttr {
        location,
        format: VertexFormat::Uint8,
        ..VertexAttr::default()
    }
}

#[test]
fn fragment_inputs_carry_interpolation() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let a = s.input(s.float4, "vA", 0);
    s.b.decorate(a, Decoration::Flat, std::iter::empty::<Operand>());
    let b = s.input(s.float2, "vB", 1);
    s.b.decorate(b, Decoration::NoPerspective, std::iter::empty::<Operand>());
    let c = s.input(s.float, "vC", 2);
    s.b.decorate(c, Decoration::Centroid, std::iter::empty::<Operand>());
    let out = s.output(s.float4, "FragColor", 0);
    let main = s.begin_main();
    let va = s.load(s.float4, a);
    s.load(s.float2, b);
    s.load(s.float, c);
    s.store(out, va);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(
        &msl,
        &[
            "float4 vA [[user(locn0), flat]];",
            "float2 vB [[user(locn1), center_no_perspective]];",
            "float vC [[user(locn2), centroid_perspective]];",
        ],
    );
}

#[test]
fn outputs_are_ordered_by_location() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let second = s.output(s.float4, "second", 1);
    let first = s.output(s.float4, "first", 0);
    let zero = s.float_const(0.0);
    let black = s.b.constant_composite(s.float4, [zero, zero, zero, zero]);
    let main = s.begin_main();
    s.store(second, black);
    s.store(first, black);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(
        &msl,
        &[
            "float4 first [[color(0)]];",
            "float4 second [[color(1)]];",
            "out.second = float4(0.0);",
            "out.first = float4(0.0);",
        ],
    );
    assert!(msl.find("float4 first [[color(0)]];").unwrap() < msl.find("float4 second [[color(1)]];").unwrap());
}

#[test]
fn narrow_fragment_output_is_padded() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let uv = s.input(s.float2, "vUV", 0);
    let out = s.output(s.float2, "outUV", 0);
    let main = s.begin_main();
    let v = s.load(s.float2, uv);
    s.store(out, v);
    s.end_void_function();

    let options = Options {
        pad_fragment_output_components: true,
        ..Options::default()
    };
    let msl = s.compile(main, options).unwrap();
    assert_lines(&msl, &["float4 outUV [[color(0)]];", "float2 outUV;"]);
}

#[test]
fn vertex_attribute_retyped_to_host_format() {
    let mut s = ShaderBuilder::new(ExecutionModel::Vertex);
    let int4 = s.b.type_vector(s.int, 4);
    let idx = s.input(int4, "aIdx", 0);
    let position = s.builtin_output(s.float4, BuiltIn::Position);
    let main = s.begin_main();
    let v = s.load(int4, idx);
    let f = s.b.convert_s_to_f(s.float4, None, v).unwrap();
    s.store(position, f);
    s.end_void_function();

    let options = Options {
        vertex_attributes: vec![uint8_attribute(0)],
        ..Options::default()
    };
    let msl = s.compile(main, options).unwrap();
    assert_lines(
        &msl,
        &[
            "uint4 aIdx [[attribute(0)]];",
            &format!("int4 _{} = int4(in.aIdx);", v),
            &format!("float4 _{} = float4(_{});", f, v),
        ],
    );
}

#[test]
fn float_attribute_with_integer_format_is_rejected() {
    let mut s = ShaderBuilder::new(ExecutionModel::Vertex);
    let pos = s.input(s.float4, "aPos", 0);
    let position = s.builtin_output(s.float4, BuiltIn::Position);
    let main = s.begin_main();
    let v = s.load(s.float4, pos);
    s.store(position, v);
    s.end_void_function();

    let options = Options {
        vertex_attributes: vec![VertexAttr {
            location: 0,
            format: VertexFormat::Uint16,
            ..VertexAttr::default()
        }],
        ..Options::default()
    };
    match s.compile(main, options) {
        Err(CompilerError::UnsupportedConstruct(message)) => assert!(message.contains("type mismatch")),
        other => panic!("expected a mismatch error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn matrix_input_is_split_into_columns() {
    let mut s = ShaderBuilder::new(ExecutionModel::Vertex);
    let mat2 = s.b.type_matrix(s.float2, 2);
    let m = s.input(mat2, "aMat", 2);
    let position = s.builtin_output(s.float4, BuiltIn::Position);
    let zero = s.float_const(0.0);
    let main = s.begin_main();
    let value = s.load(mat2, m);
    let column = s.b.composite_extract(s.float2, None, value, [1]).unwrap();
    let pos = s.b.composite_construct(s.float4, None, [column, zero, zero]).unwrap();
    s.store(position, pos);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(
        &msl,
        &[
            "float2 aMat_0 [[attribute(2)]];",
            "float2 aMat_1 [[attribute(3)]];",
            "float2x2 aMat;",
            &format!("float2 _{} = _{}[1];", column, value),
        ],
    );
}

#[test]
fn compute_builtins_become_arguments() {
    let mut s = ShaderBuilder::new(ExecutionModel::GLCompute);
    let uint3 = s.b.type_vector(s.uint, 3);
    let gid = s.builtin_input(uint3, BuiltIn::GlobalInvocationId);
    let main = s.begin_main();
    s.load(uint3, gid);
    s.end_void_function();

    let msl = compile_ok(s, main);
    let prototype = msl
        .lines()
        .find(|l| l.starts_with("kernel void main0("))
        .unwrap_or_else(|| panic!("no kernel prototype in:\n{}", msl));
    assert!(prototype.contains("uint3 "), "{}", prototype);
    assert!(prototype.contains(" [[thread_position_in_grid]]"), "{}", prototype);
}

#[test]
fn located_outputs_precede_builtins() {
    let mut s = ShaderBuilder::new(ExecutionModel::Vertex);
    let c = s.output(s.float4, "c", 3);
    let a = s.output(s.float4, "a", 0);
    let b = s.output(s.float4, "b", 1);
    let position = s.builtin_output(s.float4, BuiltIn::Position);
    let zero = s.float_const(0.0);
    let origin = s.b.constant_composite(s.float4, [zero, zero, zero, zero]);
    let main = s.begin_main();
    for var in [position, c, a, b] {
        s.store(var, origin);
    }
    s.end_void_function();

    let msl = compile_ok(s, main);
    let members = [
        "float4 a [[user(locn0)]];",
        "float4 b [[user(locn1)]];",
        "float4 c [[user(locn3)]];",
        "float4 gl_Position [[position]];",
    ];
    assert_lines(&msl, &members);
    let offsets: Vec<usize> = members.iter().map(|m| msl.find(m).unwrap()).collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]), "{}", msl);
}

#[test]
fn matrix_output_is_split_into_columns() {
    let mut s = ShaderBuilder::new(ExecutionModel::Vertex);
    let mat2 = s.b.type_matrix(s.float2, 2);
    let m = s.output(mat2, "vMat", 1);
    let position = s.builtin_output(s.float4, BuiltIn::Position);
    let (zero, one) = (s.float_const(0.0), s.float_const(1.0));
    let x_axis = s.b.constant_composite(s.float2, [one, zero]);
    let y_axis = s.b.constant_composite(s.float2, [zero, one]);
    let identity = s.b.constant_composite(mat2, [x_axis, y_axis]);
    let origin = s.b.constant_composite(s.float4, [zero, zero, zero, one]);
    let main = s.begin_main();
    s.store(m, identity);
    s.store(position, origin);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(
        &msl,
        &[
            "float2 vMat_0 [[user(locn1)]];",
            "float2 vMat_1 [[user(locn2)]];",
            "float2x2 vMat;",
            "out.vMat_0 = vMat[0];",
            "out.vMat_1 = vMat[1];",
        ],
    );
    let copy = msl.find("out.vMat_1 = vMat[1];").unwrap();
    assert!(copy < msl.find("return out;").unwrap(), "{}", msl);
}

#[test]
fn subpass_read_adds_frag_coord() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let image = s.b.type_image(s.float, Dim::DimSubpassData, 0, 0, 0, 2, ImageFormat::Unknown, None);
    let attachment = s.resource(image, "uInput", 0);
    s.b.decorate(attachment, Decoration::InputAttachmentIndex, [Operand::LiteralBit32(0)]);
    let int2 = s.b.type_vector(s.int, 2);
    let zero = s.int_const(0);
    let origin = s.b.constant_composite(int2, [zero, zero]);
    let out = s.output(s.float4, "FragColor", 0);
    let main = s.begin_main();
    let handle = s.load(image, attachment);
    let texel = s
        .b
        .image_read(s.float4, None, handle, origin, None, std::iter::empty::<Operand>())
        .unwrap();
    s.store(out, texel);
    s.end_void_function();

    let msl = compile_ok(s, main);
    let prototype = msl
        .lines()
        .find(|l| l.starts_with("fragment main0_out main0("))
        .unwrap_or_else(|| panic!("no fragment prototype in:\n{}", msl));
    assert!(prototype.contains("texture2d<float> uInput [[texture(0)]]"), "{}", prototype);
    assert!(prototype.contains("float4 gl_FragCoord [[position]]"), "{}", prototype);
    assert_lines(
        &msl,
        &[&format!("float4 _{} = uInput.read(uint2(gl_FragCoord.xy), 0);", texel)],
    );
}
