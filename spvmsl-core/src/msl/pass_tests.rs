use rspirv::dr::Operand;
use rspirv::spirv::{Decoration, Dim, ExecutionModel, ImageFormat};

use crate::error::CompilerError;
use crate::msl::CompilerMsl;
use crate::options::Options;
use crate::test_util::{assert_lines, ShaderBuilder};

fn passthrough() -> CompilerMsl {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let color = s.input(s.float4, "vColor", 0);
    let frag = s.output(s.float4, "FragColor", 0);
    let main = s.begin_main();
    let v = s.load(s.float4, color);
    s.store(frag, v);
    s.end_void_function();
    CompilerMsl::new(s.finish(main), Options::default())
}

/// Compute shader writing to a storage image declared `NonWritable`.
fn image_write_despite_decoration() -> CompilerMsl {
    let mut s = ShaderBuilder::new(ExecutionModel::GLCompute);
    let image = s.b.type_image(s.float, Dim::Dim2D, 0, 0, 0, 2, ImageFormat::Rgba8, None);
    let img = s.resource(image, "img", 0);
    s.b.decorate(img, Decoration::NonWritable, std::iter::empty::<Operand>());
    s.b.decorate(img, Decoration::NonReadable, std::iter::empty::<Operand>());
    let int2 = s.b.type_vector(s.int, 2);
    let zero = s.int_const(0);
    let coord = s.b.constant_composite(int2, [zero, zero]);
    let one = s.float_const(1.0);
    let white = s.b.constant_composite(s.float4, [one, one, one, one]);
    let main = s.begin_main();
    let handle = s.load(image, img);
    s.b.image_write(handle, coord, white, None, std::iter::empty::<Operand>())
        .unwrap();
    s.end_void_function();
    CompilerMsl::new(s.finish(main), Options::default())
}

#[test]
fn simple_shader_needs_one_pass() {
    let mut compiler = passthrough();
    compiler.compile().unwrap();
    assert_eq!(compiler.pass_count(), 1);
}

#[test]
fn cleared_access_decoration_forces_second_pass() {
    let mut compiler = image_write_despite_decoration();
    let msl = compiler.compile().unwrap();
    assert_eq!(compiler.pass_count(), 2);
    assert!(msl.contains("texture2d<float, access::write> img [[texture(0)]]"), "{}", msl);
    assert_lines(&msl, &["img.write(float4(1.0), uint2(int2(0)));"]);
}

#[test]
fn endless_recompiles_hit_the_pass_bound() {
    let mut compiler = passthrough();
    let result = compiler.compile_passes(&mut |state| state.request_recompile());
    match result {
        Err(CompilerError::InternalInvariantViolation(message)) => {
            assert!(message.contains("Over 3 compilation loops"), "{}", message)
        }
        other => panic!("expected the pass bound to trip, got {:?}", other.map(|_| ())),
    }
    assert_eq!(compiler.pass_count(), 3);
}

#[test]
fn recompiling_is_deterministic() {
    let mut compiler = image_write_despite_decoration();
    let first = compiler.compile().unwrap();
    let second = compiler.compile().unwrap();
    assert_eq!(first, second);
    // Decorations cleared by the first run stay cleared.
    assert_eq!(compiler.pass_count(), 1);
}
