//! End-to-end runs from SPIR-V words to MSL text.

use rspirv::dr::Operand;
use rspirv::spirv::{BuiltIn, Dim, ExecutionModel, ImageFormat, StorageClass};

use crate::compile_words;
use crate::error::CompilerError;
use crate::loader::load_words;
use crate::msl::CompilerMsl;
use crate::options::Options;
use crate::test_util::{assert_lines, ShaderBuilder};

const OPTIONS_JSON: &str = r#"{
    "msl_version": 20000,
    "resource_bindings": [
        { "stage": "vertex", "desc_set": 0, "binding": 0, "msl_buffer": 3 },
        { "stage": "fragment", "desc_set": 0, "binding": 0, "msl_buffer": 7 }
    ],
    "vertex_attributes": [
        { "location": 0, "msl_buffer": 1, "msl_stride": 16 },
        { "location": 5, "msl_buffer": 2 }
    ]
}"#;

/// `gl_Position = aPos + ubo.offset;`
fn offset_vertex_shader() -> Vec<u32> {
    let mut s = ShaderBuilder::new(ExecutionModel::Vertex);
    let pos = s.input(s.float4, "aPos", 0);
    let (_, ubo) = s.buffer_block(StorageClass::Uniform, "UBO", "ubo", &[(s.float4, "offset", 0)], 0);
    let position = s.builtin_output(s.float4, BuiltIn::Position);
    let member_ptr = s.pointer(StorageClass::Uniform, s.float4);
    let zero = s.int_const(0);
    let main = s.begin_main();
    let p = s.load(s.float4, pos);
    let chain = s.b.access_chain(member_ptr, None, ubo, [zero]).unwrap();
    let offset = s.load(s.float4, chain);
    let sum = s.b.f_add(s.float4, None, p, offset).unwrap();
    s.store(position, sum);
    s.end_void_function();
    s.assemble(main)
}

fn prototype(msl: &str) -> &str {
    msl.lines()
        .find(|l| l.starts_with("vertex "))
        .unwrap_or_else(|| panic!("no vertex prototype in:\n{}", msl))
}

#[test]
fn vertex_shader_with_binding_table() {
    let options: Options = serde_json::from_str(OPTIONS_JSON).unwrap();
    let msl = compile_words(&offset_vertex_shader(), options).unwrap();

    assert!(msl.contains("#include <metal_stdlib>"), "{}", msl);
    assert_lines(&msl, &["struct UBO", "float4 offset;", "float4 aPos [[attribute(0)]];"]);
    let prototype = prototype(&msl);
    assert!(prototype.starts_with("vertex main0_out main0("), "{}", prototype);
    assert!(prototype.contains("main0_in in [[stage_in]]"), "{}", prototype);
    assert!(prototype.contains("constant UBO& ubo [[buffer(3)]]"), "{}", prototype);
    assert!(msl.contains("[[position]]"), "{}", msl);
}

#[test]
fn reflection_marks_what_the_shader_used() {
    let options: Options = serde_json::from_str(OPTIONS_JSON).unwrap();
    let ir = load_words(&offset_vertex_shader()).unwrap();
    let mut compiler = CompilerMsl::new(ir, options);
    compiler.compile().unwrap();

    let attrs = compiler.vertex_attributes();
    assert!(attrs.iter().find(|a| a.location == 0).unwrap().used_by_shader);
    assert!(!attrs.iter().find(|a| a.location == 5).unwrap().used_by_shader);

    let bindings = compiler.resource_bindings();
    let vertex = bindings.iter().find(|b| b.stage == ExecutionModel::Vertex).unwrap();
    let fragment = bindings.iter().find(|b| b.stage == ExecutionModel::Fragment).unwrap();
    assert!(vertex.used_by_shader);
    assert!(!fragment.used_by_shader);
    assert!(!compiler.is_rasterization_disabled());
    assert!(!compiler.needs_aux_buffer());
}

#[test]
fn disabled_rasterization_returns_void() {
    let options = Options {
        disable_rasterization: true,
        ..Options::default()
    };
    let ir = load_words(&offset_vertex_shader()).unwrap();
    let mut compiler = CompilerMsl::new(ir, options);
    let msl = compiler.compile().unwrap();

    assert!(compiler.is_rasterization_disabled());
    assert!(prototype(&msl).starts_with("vertex void main0("), "{}", msl);
}

#[test]
fn compiling_twice_gives_the_same_text() {
    let words = offset_vertex_shader();
    let first = compile_words(&words, Options::default()).unwrap();
    let second = compile_words(&words, Options::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn truncated_module_is_rejected() {
    let words = offset_vertex_shader();
    match compile_words(&words[..3], Options::default()) {
        Err(CompilerError::InvalidModule(message)) => assert!(message.contains("SPIR-V"), "{}", message),
        other => panic!("expected an invalid module error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn captured_vertex_output_goes_to_device_buffer() {
    let options = Options {
        capture_output_to_buffer: true,
        ..Options::default()
    };
    let ir = load_words(&offset_vertex_shader()).unwrap();
    let mut compiler = CompilerMsl::new(ir, options);
    let msl = compiler.compile().unwrap();

    assert!(compiler.is_rasterization_disabled());
    let prototype = prototype(&msl);
    assert!(prototype.starts_with("vertex void main0("), "{}", prototype);
    for arg in [
        "uint gl_VertexIndex [[vertex_id]]",
        "uint gl_BaseVertex [[base_vertex]]",
        "uint gl_InstanceIndex [[instance_id]]",
        "uint gl_BaseInstance [[base_instance]]",
        "device main0_out* spvOut [[buffer(28)]]",
        "device uint* spvIndirectParams [[buffer(29)]]",
    ] {
        assert!(prototype.contains(arg), "missing `{}` in {}", arg, prototype);
    }
    assert_lines(
        &msl,
        &["device main0_out& out = spvOut[(gl_InstanceIndex - gl_BaseInstance) * spvIndirectParams[0] + gl_VertexIndex - gl_BaseVertex];"],
    );
    assert!(!msl.contains("main0_out out = {};"), "{}", msl);
    assert!(!msl.contains("return out;"), "{}", msl);
}

#[test]
fn swizzled_sampling_reads_the_aux_buffer() {
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

    let options = Options {
        swizzle_texture_samples: true,
        aux_buffer_index: 5,
        ..Options::default()
    };
    let mut compiler = CompilerMsl::new(s.finish(main), options);
    let msl = compiler.compile().unwrap();

    assert!(compiler.needs_aux_buffer());
    assert!(msl.contains("spvAux& spvAuxBuffer [[buffer(5)]]"), "{}", msl);
    assert_lines(
        &msl,
        &[
            "struct spvAux",
            "constant uint32_t& texSwzl = spvAuxBuffer.swizzleConst[0];",
            &format!("float4 _{} = spvTextureSwizzle(tex.sample(texSmplr, _{}), texSwzl);", texel, coord),
        ],
    );
}
