use rspirv::spirv::{ExecutionModel, FunctionControl, StorageClass};

use crate::error::CompilerError;
use crate::options::Options;
use crate::test_util::{assert_lines, compile_ok, ShaderBuilder};

#[test]
fn private_global_is_threaded_into_callee() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let private_ptr = s.pointer(StorageClass::Private, s.float);
    let counter = s.b.variable(private_ptr, None, StorageClass::Private, None);
    s.b.name(counter, "counter");
    let value = s.input(s.float, "vValue", 0);
    let out = s.output(s.float, "outValue", 0);

    let fn_type = s.b.type_function(s.float, std::iter::empty::<u32>());
    let bump = s
        .b
        .begin_function(s.float, None, FunctionControl::NONE, fn_type)
        .unwrap();
    s.b.name(bump, "bump");
    s.b.begin_block(None).unwrap();
    let c = s.load(s.float, counter);
    let v = s.load(s.float, value);
    let sum = s.b.f_add(s.float, None, c, v).unwrap();
    s.store(counter, sum);
    s.b.ret_value(sum).unwrap();
    s.b.end_function().unwrap();

    let main = s.begin_main();
    let r = s.b.function_call(s.float, None, bump, std::iter::empty::<u32>()).unwrap();
    s.store(out, r);
    s.end_void_function();

    let msl = compile_ok(s, main);
    let prototype = msl
        .lines()
        .find(|l| l.starts_with("float bump("))
        .unwrap_or_else(|| panic!("no prototype for bump in:\n{}", msl));
    assert!(prototype.contains("thread float& counter"), "{}", prototype);
    assert!(prototype.contains("thread float& vValue"), "{}", prototype);
    assert_lines(
        &msl,
        &[
            "float counter;",
            &format!("float _{} = (_{} + _{});", sum, c, v),
            &format!("counter = _{};", sum),
            &format!("return _{};", sum),
            &format!("float _{} = bump(counter, in.vValue);", r),
        ],
    );
    // Callees are emitted ahead of their callers.
    assert!(msl.find("float bump(").unwrap() < msl.find("fragment main0_out main0(").unwrap());
}

#[test]
fn read_only_private_array_becomes_lookup_table() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let four = s.uint_const(4);
    let array = s.b.type_array(s.float, four);
    let values: Vec<u32> = [1.0, 2.0, 3.0, 4.0].iter().map(|&v| s.float_const(v)).collect();
    let init = s.b.constant_composite(array, values);
    let array_ptr = s.pointer(StorageClass::Private, array);
    let lut = s.b.variable(array_ptr, None, StorageClass::Private, Some(init));
    s.b.name(lut, "lut");
    let out = s.output(s.float, "outValue", 0);
    let float_ptr = s.pointer(StorageClass::Private, s.float);
    let two = s.int_const(2);
    let main = s.begin_main();
    let chain = s.b.access_chain(float_ptr, None, lut, [two]).unwrap();
    let x = s.load(s.float, chain);
    s.store(out, x);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(
        &msl,
        &[
            "constant float lut[4] = { 1.0, 2.0, 3.0, 4.0 };",
            &format!("float _{} = lut[2];", x),
        ],
    );
    // Not redeclared inside the entry point.
    assert!(!msl.lines().any(|l| l.trim().starts_with("float lut[4]")), "{}", msl);
}

#[test]
fn workgroup_variable_moves_into_kernel() {
    let mut s = ShaderBuilder::new(ExecutionModel::GLCompute);
    let size = s.uint_const(64);
    let array = s.b.type_array(s.float, size);
    let array_ptr = s.pointer(StorageClass::Workgroup, array);
    let tile = s.b.variable(array_ptr, None, StorageClass::Workgroup, None);
    s.b.name(tile, "tile");
    let float_ptr = s.pointer(StorageClass::Workgroup, s.float);
    let zero = s.int_const(0);
    let one = s.float_const(1.0);
    let main = s.begin_main();
    let chain = s.b.access_chain(float_ptr, None, tile, [zero]).unwrap();
    s.store(chain, one);
    s.end_void_function();

    let msl = compile_ok(s, main);
    assert_lines(&msl, &["kernel void main0()", "threadgroup float tile[64];", "tile[0] = 1.0;"]);
}

#[test]
fn resource_is_threaded_only_along_the_chain_that_reads_it() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let float = s.float;
    let (_, ubo) = s.buffer_block(StorageClass::Uniform, "Params", "params", &[(float, "scale", 0)], 0);
    let member_ptr = s.pointer(StorageClass::Uniform, float);
    let zero = s.int_const(0);
    let one = s.float_const(1.0);
    let out = s.output(float, "outValue", 0);
    let fn_type = s.b.type_function(float, std::iter::empty::<u32>());

    let define = |s: &mut ShaderBuilder, name: &str, body: &dyn Fn(&mut ShaderBuilder) -> u32| {
        let f = s
            .b
            .begin_function(float, None, FunctionControl::NONE, fn_type)
            .unwrap();
        s.b.name(f, name);
        s.b.begin_block(None).unwrap();
        let value = body(s);
        s.b.ret_value(value).unwrap();
        s.b.end_function().unwrap();
        f
    };

    let leaf = define(&mut s, "leaf", &|s: &mut ShaderBuilder| {
        let chain = s.b.access_chain(member_ptr, None, ubo, [zero]).unwrap();
        s.load(float, chain)
    });
    let middle = define(&mut s, "middle", &|s: &mut ShaderBuilder| {
        s.b.function_call(float, None, leaf, std::iter::empty::<u32>()).unwrap()
    });
    let sibling = define(&mut s, "sibling", &|_: &mut ShaderBuilder| one);

    let main = s.begin_main();
    let a = s.b.function_call(float, None, middle, std::iter::empty::<u32>()).unwrap();
    let b = s.b.function_call(float, None, sibling, std::iter::empty::<u32>()).unwrap();
    let sum = s.b.f_add(float, None, a, b).unwrap();
    s.store(out, sum);
    s.end_void_function();

    let msl = compile_ok(s, main);
    let prototype = |name: &str| {
        msl.lines()
            .find(|l| l.starts_with(&format!("float {}(", name)))
            .unwrap_or_else(|| panic!("no prototype for {} in:\n{}", name, msl))
            .to_string()
    };
    assert!(prototype("leaf").contains("Params& params"), "{}", msl);
    assert!(prototype("middle").contains("Params& params"), "{}", msl);
    assert_eq!(prototype("sibling"), "float sibling()");
    assert!(msl.contains("leaf(params)"), "{}", msl);
    assert!(msl.contains("middle(params)"), "{}", msl);
    assert!(msl.contains("sibling()"), "{}", msl);
}

fn assert_recursion_rejected(s: ShaderBuilder, main: u32) {
    match s.compile(main, Options::default()) {
        Err(CompilerError::UnsupportedConstruct(message)) => assert!(message.contains("recursive"), "{}", message),
        other => panic!("expected recursion to be rejected, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn self_recursive_function_is_rejected() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let float = s.float;
    let out = s.output(float, "outValue", 0);
    let fn_type = s.b.type_function(float, std::iter::empty::<u32>());

    let spin = s.b.begin_function(float, None, FunctionControl::NONE, fn_type).unwrap();
    s.b.name(spin, "spin");
    s.b.begin_block(None).unwrap();
    let again = s.b.function_call(float, None, spin, std::iter::empty::<u32>()).unwrap();
    s.b.ret_value(again).unwrap();
    s.b.end_function().unwrap();

    let main = s.begin_main();
    let v = s.b.function_call(float, None, spin, std::iter::empty::<u32>()).unwrap();
    s.store(out, v);
    s.end_void_function();

    assert_recursion_rejected(s, main);
}

#[test]
fn mutual_recursion_is_rejected() {
    let mut s = ShaderBuilder::new(ExecutionModel::Fragment);
    let float = s.float;
    let out = s.output(float, "outValue", 0);
    let fn_type = s.b.type_function(float, std::iter::empty::<u32>());
    let (ping, pong) = (s.b.id(), s.b.id());

    for (this, other, name) in [(ping, pong, "ping"), (pong, ping, "pong")] {
        s.b.begin_function(float, Some(this), FunctionControl::NONE, fn_type).unwrap();
        s.b.name(this, name);
        s.b.begin_block(None).unwrap();
        let v = s.b.function_call(float, None, other, std::iter::empty::<u32>()).unwrap();
        s.b.ret_value(v).unwrap();
        s.b.end_function().unwrap();
    }

    let main = s.begin_main();
    let v = s.b.function_call(float, None, ping, std::iter::empty::<u32>()).unwrap();
    s.store(out, v);
    s.end_void_function();

    assert_recursion_rejected(s, main);
}
