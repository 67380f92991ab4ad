//! Runtime behavior: failure values, `??` recovery, pipelines, blocks, and
//! scope lookups, all driven through prepared modules.

use comp::{CountingTracer, Decimal, Engine, Loader, Scopes, Value, generate};
use pretty_assertions::assert_eq;

fn num(n: i64) -> Value {
    Value::Number(Decimal::from_i64(n))
}

fn eval(source: &str, name: &str) -> Value {
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();
    loader.evaluate(module, name)
}

#[test]
fn division_by_zero_fails_at_runtime() {
    let result = eval("x = 1 / 0", "x");
    assert!(result.is_fail());
    assert_eq!(result.field("type"), Some(&Value::text("fail.div_zero")));
    let message = result.field("message").unwrap();
    assert_eq!(*message, Value::text("division by zero"));
}

#[test]
fn fallback_recovers_from_failures() {
    assert_eq!(eval("r = bogus ?? 42", "r"), num(42));
    // No failure: the primary value wins.
    assert_eq!(eval("r = 7 ?? 42", "r"), num(7));
    // The fallback arm may itself fail.
    let double = eval("r = bogus ?? worse", "r");
    assert!(double.is_fail());
}

#[test]
fn failures_bypass_intermediate_frames_to_the_nearest_handler() {
    // The failing lookup happens inside a block body, two frames below the
    // fallback. It must bypass the pipeline frame and land in the handler.
    let source = "f = :( )(bogus + 1)\nr = [1 |f] ?? 9";
    assert_eq!(eval(source, "r"), num(9));

    // Without a handler the failure is the result.
    let source = "f = :( )(bogus + 1)\nr = [1 |f]";
    assert!(eval(source, "r").is_fail());
}

#[test]
fn pipelines_thread_piped_input() {
    let source = "add = :(n ~num)($in + n)\ndouble = :( )($in * 2)\nr = [3 |add (n=4) |double]";
    assert_eq!(eval(source, "r"), num(14));
}

#[test]
fn blocks_read_arguments_and_input() {
    let source = "scale = :(by ~num = 10)($in * by)\nr = [6 |scale]\ns = [6 |scale (by=2)]";
    assert_eq!(eval(source, "r"), num(60));
    assert_eq!(eval(source, "s"), num(12));
}

#[test]
fn argument_morphing_rejects_bad_calls() {
    let source = "add = :(n ~num)($in + n)\nr = [3 |add (n=\"seven\")]";
    let result = eval(source, "r");
    assert!(result.is_fail());
    assert_eq!(result.field("type"), Some(&Value::text("fail.type")));
}

#[test]
fn struct_literals_see_their_earlier_fields() {
    let result = eval("r = (a=1 b=a+1 c=b*2)", "r");
    assert_eq!(result.field("b"), Some(&num(2)));
    assert_eq!(result.field("c"), Some(&num(4)));
}

#[test]
fn let_bindings_are_locals_not_fields() {
    let result = eval("r = (!let t=3 x=t+1)", "r");
    let fields = result.as_struct_fields().unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(result.field("x"), Some(&num(4)));
}

#[test]
fn overloads_dispatch_on_argument_shape() {
    let source = "\
pick = :(n ~num)(\"number\")
pick = :(t ~text)(\"text\")
a = pick(n=5)
b = pick(t=\"hi\")
";
    assert_eq!(eval(source, "a"), Value::text("number"));
    assert_eq!(eval(source, "b"), Value::text("text"));
}

#[test]
fn shapes_invoke_as_constructors() {
    let source = "point = ~(x ~num y ~num)\np = point(x=1 y=2)";
    let result = eval(source, "p");
    assert_eq!(result.field("x"), Some(&num(1)));
    assert_eq!(result.field("y"), Some(&num(2)));
}

#[test]
fn missing_names_produce_missing_failures() {
    let result = eval("r = nowhere", "r");
    assert!(result.is_fail());
    assert_eq!(result.field("type"), Some(&Value::text("fail.missing")));
}

#[test]
fn logic_and_comparison_evaluate_through_tags() {
    assert_eq!(eval("r = (1 < 2) && (3 == 3)", "r").to_string(), "#bool.true");
    assert_eq!(eval("r = !!(1 > 2)", "r").to_string(), "#bool.true");
    // Logic on non-booleans is a type failure.
    assert!(eval("r = 1 && 2", "r").is_fail());
}

#[test]
fn frame_accounting_is_visible_to_tracers() {
    let loader = Loader::new(vec![]);
    let module = loader
        .load_source("main", "f = :( )($in + 1)\nr = [1 |f |f |f]")
        .unwrap();
    let def = loader.find_definition(module, "r").unwrap();
    let resolved = def.resolved.borrow().clone().unwrap();
    let program = generate(&resolved).unwrap();

    let mut engine = Engine::with_tracer(&loader, CountingTracer::default());
    let result = engine.run(program, Scopes::module_level(module));
    assert_eq!(result, num(4));
    // One root push plus one per block invocation; every push popped.
    assert_eq!(engine.tracer().pushes, 4);
    assert_eq!(engine.tracer().pops, 4);
    assert!(engine.tracer().instructions > 0);
}

#[test]
fn deep_pipelines_do_not_recurse_on_the_host_stack() {
    // 200 chained stages would blow a recursive evaluator's stack long
    // before the engine's frame limit.
    let mut source = String::from("inc = :( )($in + 1)\nr = [0");
    for _ in 0..200 {
        source.push_str(" |inc");
    }
    source.push(']');
    assert_eq!(eval(&source, "r"), num(200));
}
