use rspirv::dr::Operand;
use rspirv::spirv::{
    BuiltIn, Dim, ExecutionModel, GLOp, ImageFormat, LoopControl, SelectionControl, StorageClass,
};

use crate::error::CompilerError;
use crate::options::{make_msl_version, Options, Platform};
use crate::test_util::{assert_lines, compile_ok, ShaderBuilder};

#[test]
fn passthrough_fragment() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let color = s.input(s.float4, "vColor", 0);
    let frag = s.output(s.float4, "FragColor", 0);
    let main = s.begin_main();
    let v = s.load(s.float4, color);
    s.store(frag, v);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert!(msl.starts_with("#include <metal_stdlib>"));
    assert_lines(
        &msl,
        &[
            "using namespace metal;",
            "float4 FragColor [[color(0)]];",
            "float4 vColor [[user(locn0)]];",
            "fragment main0_out main0(main0_in in [[stage_in]])",
            "main0_out out = {};",
            &format!("float4 _{} = in.vColor;", v),
            &format!("out.FragColor = _{};", v),
            "return out;",
        ],
    );
}

#[test]
fn glsl_function_and_negate() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let normal = s.input(s.float3, "vNormal", 0);
    let out = s.output(s.float3, "outNormal", 0);
    let main = s.begin_main();
    let n = s.load(s.float3, normal);
    let nn = s
        .b
        .ext_inst(s.float3, None, s.glsl, GLOp::Normalize as u32, vec![Operand::IdRef(n)])
        .unwrap();
    let neg = s.b.f_negate(s.float3, None, nn).unwrap();
    s.store(out, neg);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(
        &msl,
        &[
            &format!("float3 _{} = normalize(_{});", nn, n),
            &format!("float3 _{} = -_{};", neg, nn),
            &format!("out.outNormal = _{};", neg),
        ],
    );
}

#[test]
fn unordered_compare_is_true_for_nan() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let a_in = s.input(s.float, "vA", 0);
    let b_in = s.input(s.float, "vB", 1);
    let out = s.output(s.float, "outValue", 0);
    let (one, zero) = (s.float_const(1.0), s.float_const(0.0));
    let main = s.begin_main();
    let a = s.load(s.float, a_in);
    let b = s.load(s.float, b_in);
    let lt = s.b.f_unord_less_than(s.bool_ty, None, a, b).unwrap();
    let ordered = s.b.f_ord_greater_than_equal(s.bool_ty, None, a, b).unwrap();
    let both = s.b.logical_and(s.bool_ty, None, lt, ordered).unwrap();
    let v = s.b.select(s.float, None, both, one, zero).unwrap();
    s.store(out, v);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(
        &msl,
        &[
            &format!("bool _{} = (isnan(_{a}) || isnan(_{b}) || (_{a} < _{b}));", lt, a = a, b = b),
            &format!("bool _{} = (_{} >= _{});", ordered, a, b),
        ],
    );
}

#[test]
fn integer_compare_casts_to_the_opcode_signedness() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let x_in = s.input(s.uint, "vX", 0);
    let y_in = s.input(s.uint, "vY", 1);
    let i_in = s.input(s.int, "vI", 2);
    for var in [x_in, y_in, i_in] {
        s.b.decorate(var, rspirv::spirv::Decoration::Flat, std::iter::empty::<Operand>());
    }
    let out = s.output(s.float, "outValue", 0);
    let (one, zero) = (s.float_const(1.0), s.float_const(0.0));
    let main = s.begin_main();
    let x = s.load(s.uint, x_in);
    let y = s.load(s.uint, y_in);
    let i = s.load(s.int, i_in);
    let signed_lt = s.b.s_less_than(s.bool_ty, None, x, y).unwrap();
    let unsigned_gt = s.b.u_greater_than(s.bool_ty, None, i, x).unwrap();
    let same = s.b.u_less_than(s.bool_ty, None, x, y).unwrap();
    let any = s.b.logical_or(s.bool_ty, None, signed_lt, unsigned_gt).unwrap();
    let all = s.b.logical_and(s.bool_ty, None, any, same).unwrap();
    let v = s.b.select(s.float, None, all, one, zero).unwrap();
    s.store(out, v);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(
        &msl,
        &[
            &format!("bool _{} = (int(_{}) < int(_{}));", signed_lt, x, y),
            &format!("bool _{} = (uint(_{}) > _{});", unsigned_gt, i, x),
            &format!("bool _{} = (_{} < _{});", same, x, y),
        ],
    );
}

#[test]
fn fmod_pulls_in_mod_helper() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let value = s.input(s.float, "vValue", 0);
    let out = s.output(s.float, "outValue", 0);
    let main = s.begin_main();
    let two = s.float_const(2.0);
    let v = s.load(s.float, value);
    let m = s.b.f_mod(s.float, None, v, two).unwrap();
    s.store(out, m);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert!(msl.contains("Tx mod(Tx x, Ty y)"), "{}", msl);
    assert_lines(&msl, &[&format!("float _{} = mod(_{}, 2.0);", m, v)]);
}

#[test]
fn vector_shuffle_picks_single_source_swizzle() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let color = s.input(s.float4, "vColor", 0);
    let out = s.output(s.float4, "FragColor", 0);
    let main = s.begin_main();
    let c = s.load(s.float4, color);
    let bgra = s.b.vector_shuffle(s.float4, None, c, c, [2, 1, 0, 3]).unwrap();
    s.store(out, bgra);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(&msl, &[&format!("float4 _{} = _{}.zyxw;", bgra, c)]);
}

#[test]
fn phi_becomes_hoisted_assignments() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let value = s.input(s.float, "vValue", 0);
    let out = s.output(s.float, "outValue", 0);
    let half = s.float_const(0.5);
    let one = s.float_const(1.0);
    let zero = s.float_const(0.0);
    let main = s.begin_main();
    let (then_label, else_label, merge) = (s.b.id(), s.b.id(), s.b.id());

    let x = s.load(s.float, value);
    let cond = s.b.f_ord_greater_than(s.bool_ty, None, x, half).unwrap();
    s.b.selection_merge(merge, SelectionControl::NONE).unwrap();
    s.b.branch_conditional(cond, then_label, else_label, []).unwrap();

    s.b.begin_block(Some(then_label)).unwrap();
    s.b.branch(merge).unwrap();
    s.b.begin_block(Some(else_label)).unwrap();
    s.b.branch(merge).unwrap();

    s.b.begin_block(Some(merge)).unwrap();
    let p = s.b.phi(s.float, None, [(one, then_label), (zero, else_label)]).unwrap();
    s.store(out, p);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(
        &msl,
        &[
            &format!("float _{};", p),
            &format!("bool _{} = (_{} > 0.5);", cond, x),
            &format!("if (_{})", cond),
            &format!("_{} = 1.0;", p),
            "else",
            &format!("_{} = 0.0;", p),
            &format!("out.outValue = _{};", p),
        ],
    );
}

#[test]
fn loop_with_continue_block() {
    let mut s = ShaderBuilder::new(ExecutionModel::GLCompute);
    let zero = s.int_const(0);
    let one = s.int_const(1);
    let four = s.int_const(4);
    let main = s.begin_main();
    let entry = s.entry;
    let (header, body, cont, merge) = (s.b.id(), s.b.id(), s.b.id(), s.b.id());
    let next = s.b.id();
    s.b.branch(header).unwrap();

    s.b.begin_block(Some(header)).unwrap();
    let i = s.b.phi(s.int, None, [(zero, entry), (next, cont)]).unwrap();
    let cond = s.b.s_less_than(s.bool_ty, None, i, four).unwrap();
    s.b.loop_merge(merge, cont, LoopControl::NONE, []).unwrap();
    s.b.branch_conditional(cond, body, merge, []).unwrap();

    s.b.begin_block(Some(body)).unwrap();
    s.b.branch(cont).unwrap();

    s.b.begin_block(Some(cont)).unwrap();
    s.b.i_add(s.int, Some(next), i, one).unwrap();
    s.b.branch(header).unwrap();

    s.b.begin_block(Some(merge)).unwrap();
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(
        &msl,
        &[
            "kernel void main0()",
            &format!("int _{};", i),
            &format!("int _{};", next),
            &format!("_{} = 0;", i),
            "for (;;)",
            &format!("bool _{} = (_{} < 4);", cond, i),
            &format!("if (!_{})", cond),
            "break;",
            &format!("_{} = (_{} + 1);", next, i),
            &format!("_{} = _{};", i, next),
            "continue;",
        ],
    );
}

#[test]
fn uniform_matrix_times_vector() {
    let mut s = ShaderBuilder::new(ExecutionModel::Vertex);
    let mat4 = s.b.type_matrix(s.float4, 4);
    let pos = s.input(s.float4, "aPos", 0);
    let position = s.builtin_output(s.float4, BuiltIn::Position);
    let (block, ubo) = s.buffer_block(StorageClass::Uniform, "UBO", "ubo", &[(mat4, "mvp", 0)], 0);
    s.b.member_decorate(block, 0, rspirv::spirv::Decoration::ColMajor, []);
    s.b.member_decorate(block, 0, rspirv::spirv::Decoration::MatrixStride, [Operand::LiteralBit32(16)]);
    let mat_ptr = s.pointer(StorageClass::Uniform, mat4);
    let zero = s.int_const(0);
    let main = s.begin_main();
    let chain = s.b.access_chain(mat_ptr, None, ubo, [zero]).unwrap();
    let m = s.load(mat4, chain);
    let p = s.load(s.float4, pos);
    let r = s.b.matrix_times_vector(s.float4, None, m, p).unwrap();
    s.store(position, r);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert!(msl.contains("constant UBO& ubo [[buffer(0)]]"), "{}", msl);
    assert!(msl.contains("float4 gl_Position [[position]];"), "{}", msl);
    assert_lines(
        &msl,
        &[
            "float4x4 mvp;",
            &format!("float4x4 _{} = ubo.mvp;", m),
            &format!("float4 _{} = (_{} * _{});", r, m, p),
            &format!("out.gl_Position = _{};", r),
        ],
    );
}

#[test]
fn atomic_add_on_storage_buffer() {
    let mut s = ShaderBuilder::new(ExecutionModel::GLCompute);
    let (_, ssbo) = s.buffer_block(StorageClass::StorageBuffer, "SSBO", "ssbo", &[(s.uint, "counter", 0)], 0);
    let uint_ptr = s.pointer(StorageClass::StorageBuffer, s.uint);
    let zero = s.int_const(0);
    let device = s.uint_const(1);
    let relaxed = s.uint_const(0);
    let one = s.uint_const(1);
    let main = s.begin_main();
    let chain = s.b.access_chain(uint_ptr, None, ssbo, [zero]).unwrap();
    let old = s.b.atomic_i_add(s.uint, None, chain, device, relaxed, one).unwrap();
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert!(msl.contains("device SSBO& ssbo [[buffer(0)]]"), "{}", msl);
    assert_lines(
        &msl,
        &[&format!(
            "uint _{} = atomic_fetch_add_explicit((volatile device atomic_uint*)&ssbo.counter, 1u, memory_order_relaxed);",
            old
        )],
    );
}

#[test]
fn sample_combined_image_sampler() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let image = s.b.type_image(s.float, Dim::Dim2D, 0, 0, 0, 1, ImageFormat::Unknown, None);
    let sampled = s.b.type_sampled_image(image);
    let tex = s.resource(sampled, "tex", 0);
    let uv = s.input(s.float2, "vUV", 0);
    let out = s.output(s.float4, "FragColor", 0);
    let main = s.begin_main();
    let handle = s.load(sampled, tex);
    let coord = s.load(s.float2, uv);
    let texel = s
        .b
        .image_sample_implicit_lod(s.float4, None, handle, coord, None, std::iter::empty::<Operand>())
        .unwrap();
    s.store(out, texel);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert!(msl.contains("texture2d<float> tex [[texture(0)]]"), "{}", msl);
    assert!(msl.contains("sampler texSmplr [[sampler(0)]]"), "{}", msl);
    assert_lines(&msl, &[&format!("float4 _{} = tex.sample(texSmplr, _{});", texel, coord)]);
}

#[test]
fn compare_exchange_weak_is_rejected() {
    let mut s = ShaderBuilder::new(ExecutionModel::GLCompute);
    let (_, ssbo) = s.buffer_block(StorageClass::StorageBuffer, "SSBO", "ssbo", &[(s.uint, "value", 0)], 0);
    let uint_ptr = s.pointer(StorageClass::StorageBuffer, s.uint);
    let zero = s.int_const(0);
    let device = s.uint_const(1);
    let relaxed = s.uint_const(0);
    let one = s.uint_const(1);
    let main = s.begin_main();
    let chain = s.b.access_chain(uint_ptr, None, ssbo, [zero]).unwrap();
    s.b.atomic_compare_exchange_weak(s.uint, None, chain, device, relaxed, relaxed, one, relaxed)
        .unwrap();
    s.end_void_function();

    match s.compile(main, Options::default()) {
        Err(CompilerError::UnsupportedConstruct(message)) => assert!(message.contains("AtomicCompareExchangeWeak")),
        other => panic!("expected an unsupported error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn barriers_only_in_compute() {
    let mut s = ShaderBuilder::new(ExecutionModel::GLCompute);
    let workgroup = s.uint_const(2);
    let semantics = s.uint_const(0x100 | 0x8);
    let main = s.begin_main();
    s.b.control_barrier(workgroup, workgroup, semantics).unwrap();
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(&msl, &["threadgroup_barrier(mem_flags::mem_threadgroup);"]);

    let mut s = ShaderBuilder::new(ExecutionModel::GLCompute);
    let workgroup = s.uint_const(2);
    let semantics = s.uint_const(0x100 | 0x8);
    let main = s.begin_main();
    s.b.control_barrier(workgroup, workgroup, semantics).unwrap();
    s.end_void_function();
    let options = Options {
        platform: Platform::Ios,
        msl_version: make_msl_version(2, 0, 0),
        ..Options::default()
    };
    let msl = s.compile(main, options).unwrap();
    assert_lines(
        &msl,
        &["threadgroup_barrier(mem_flags::mem_threadgroup, memory_scope_threadgroup);"],
    );
}

fn spec_constant_fragment() -> (ShaderBuilder, u32) {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let color = s.input(s.float4, "vColor", 0);
    let out = s.output(s.float4, "FragColor", 0);
    let scale = s.b.spec_constant_bit32(s.float, 2.0f32.to_bits());
    s.b.name(scale, "scale");
    s.b.decorate(scale, rspirv::spirv::Decoration::SpecId, [Operand::LiteralBit32(3)]);
    let main = s.begin_main();
    let v = s.load(s.float4, color);
    let scaled = s.b.vector_times_scalar(s.float4, None, v, scale).unwrap();
    s.store(out, scaled);
    s.end_void_function();
    (s, main)
}

#[test]
fn spec_constant_becomes_function_constant() {
    let (s, main) = spec_constant_fragment();
    let msl = compile_ok(s, main);
    assert_lines(
        &msl,
        &[
            "constant float scale_tmp [[function_constant(3)]];",
            "constant float scale = is_function_constant_defined(scale_tmp) ? scale_tmp : 2.0;",
        ],
    );
}

#[test]
fn spec_constant_falls_back_to_macro_before_msl_1_2() {
    let (s, main) = spec_constant_fragment();
    let options = Options {
        msl_version: make_msl_version(1, 1, 0),
        ..Options::default()
    };
    let msl = s.compile(main, options).unwrap();
    assert_lines(
        &msl,
        &[
            "#ifndef SPIRV_CROSS_CONSTANT_ID_3",
            "#define SPIRV_CROSS_CONSTANT_ID_3 2.0",
            "constant float scale = SPIRV_CROSS_CONSTANT_ID_3;",
        ],
    );
}
