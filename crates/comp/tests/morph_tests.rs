//! Morphing semantics end to end: the three operator modes through source
//! programs, plus the idempotence and intersection properties on the API.

use comp::{Decimal, FieldKey, Loader, MorphMode, Value, morph, strong_morph, weak_morph};
use pretty_assertions::assert_eq;

fn num(n: i64) -> Value {
    Value::Number(Decimal::from_i64(n))
}

fn eval(source: &str, name: &str) -> Value {
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();
    loader.evaluate(module, name)
}

const POINT: &str = "point = ~(x ~num y ~num)\n";

#[test]
fn normal_morph_keeps_extras() {
    let result = eval(&format!("{POINT}r = (x=1 y=2 z=3) ~point"), "r");
    let names: Vec<&str> = result
        .as_struct_fields()
        .unwrap()
        .iter()
        .filter_map(|(k, _)| k.as_name())
        .collect();
    assert_eq!(names, vec!["x", "y", "z"]);
}

#[test]
fn strong_morph_rejects_extras() {
    let result = eval(&format!("{POINT}r = (x=1 y=2 z=3) ~*point"), "r");
    assert!(result.is_fail());
    let ok = eval(&format!("{POINT}r = (x=1 y=2) ~*point"), "r");
    assert!(!ok.is_fail());
}

#[test]
fn weak_morph_is_the_intersection() {
    let result = eval(&format!("{POINT}r = (x=1 y=2 z=3) ~?point"), "r");
    let names: Vec<&str> = result
        .as_struct_fields()
        .unwrap()
        .iter()
        .filter_map(|(k, _)| k.as_name())
        .collect();
    assert_eq!(names, vec!["x", "y"]);
}

#[test]
fn positional_fields_adopt_declared_names() {
    let result = eval(&format!("{POINT}r = (5 7) ~point"), "r");
    assert_eq!(result.field("x"), Some(&num(5)));
    assert_eq!(result.field("y"), Some(&num(7)));
}

#[test]
fn defaults_apply_and_required_fields_fail() {
    let source = "conf = ~(host ~text port ~num = 80)\nr = (host=\"h\") ~conf\nbad = (port=8080) ~conf";
    assert_eq!(eval(source, "r").field("port"), Some(&num(80)));
    assert!(eval(source, "bad").is_fail());
}

#[test]
fn primitive_morphs_unwrap_wrapped_scalars() {
    assert_eq!(eval("r = (5) ~num", "r"), num(5));
    assert_eq!(eval("r = 5 ~num", "r"), num(5));
    assert!(eval("r = \"five\" ~num", "r").is_fail());
    // ~struct rejects promoted scalars but accepts real structs.
    assert!(eval("r = 5 ~struct", "r").is_fail());
    assert!(!eval("r = (5) ~struct", "r").is_fail());
}

#[test]
fn tag_shapes_match_failures() {
    // A #fail-constrained morph accepts any failure value and rejects others.
    let source = "r = (1 / 0) ?? ((9 9) ~#fail)";
    // 1/0 fails, the handler morphs a non-failure against #fail: also fails.
    assert!(eval(source, "r").is_fail());

    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", "x = 1 / 0").unwrap();
    let failure = loader.evaluate(module, "x");
    let fail_shape = comp::ShapeRef::Tag(loader.builtins().fail.clone());
    assert!(morph(&failure, &fail_shape).success());
    // The specific sub-tag also matches; a sibling does not.
    let div_shape = comp::ShapeRef::Tag(loader.builtins().fail_div_zero.clone());
    assert!(morph(&failure, &div_shape).success());
    let missing_shape = comp::ShapeRef::Tag(loader.builtins().fail_missing.clone());
    assert!(!morph(&failure, &missing_shape).success());
}

#[test]
fn unions_pick_the_best_scoring_variant() {
    let source = "either = ~((x ~num y ~num) | num)\na = (x=1 y=2) ~either\nb = 5 ~either";
    assert_eq!(eval(source, "a").field("x"), Some(&num(1)));
    assert_eq!(eval(source, "b"), num(5));
}

#[test]
fn block_morphing_types_a_raw_block() {
    let source = "f = :( )($in)\nr = [(1 2) |typed]\ntyped = :( )($in)";
    // Morph a raw block against a block shape through the API.
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();
    let block = loader.evaluate(module, "f.i000");
    assert!(matches!(block, Value::Block(comp::BlockValue::Raw(_))));

    let block_shape = comp::ShapeRef::Block(std::rc::Rc::new(comp::BlockShape { fields: vec![] }));
    let typed = morph(&block, &block_shape);
    assert!(typed.success());
    assert!(matches!(typed.value, Some(Value::Block(comp::BlockValue::Typed(_)))));

    // Blocks do not morph against non-block shapes.
    let not_block = morph(&block, &comp::ShapeRef::Primitive(comp::PrimitiveShape::Num));
    assert!(!not_block.success());
}

#[test]
fn normal_morph_is_idempotent() {
    let value = Value::struct_from(vec![
        (FieldKey::unnamed(), num(5)),
        (FieldKey::unnamed(), num(7)),
        (FieldKey::name("extra"), Value::text("kept")),
    ]);
    let shape = comp::ShapeRef::anonymous(vec![
        comp::FieldDef { name: Some("x".into()), constraint: None, default: None },
        comp::FieldDef { name: Some("y".into()), constraint: None, default: None },
    ]);
    let first = morph(&value, &shape);
    let first_value = first.value.clone().unwrap();
    let second = morph(&first_value, &shape);
    assert_eq!(first.score(), second.score());
    assert_eq!(second.value.unwrap(), first_value);
}

#[test]
fn strong_succeeds_exactly_when_normal_leaves_no_extras() {
    let shape = comp::ShapeRef::anonymous(vec![comp::FieldDef {
        name: Some("x".into()),
        constraint: None,
        default: None,
    }]);
    let clean = Value::struct_from(vec![(FieldKey::name("x"), num(1))]);
    let extra = Value::struct_from(vec![
        (FieldKey::name("x"), num(1)),
        (FieldKey::name("y"), num(2)),
    ]);
    assert!(morph(&clean, &shape).success() && strong_morph(&clean, &shape).success());
    assert!(morph(&extra, &shape).success() && !strong_morph(&extra, &shape).success());
}

#[test]
fn weak_result_only_contains_shared_names() {
    let shape = comp::ShapeRef::anonymous(vec![
        comp::FieldDef { name: Some("user".into()), constraint: None, default: None },
        comp::FieldDef { name: Some("session".into()), constraint: None, default: None },
    ]);
    let value = Value::struct_from(vec![
        (FieldKey::name("user"), Value::text("alice")),
        (FieldKey::name("admin"), Value::text("secret")),
        (FieldKey::unnamed(), num(1)),
    ]);
    let result = weak_morph(&value, &shape).value.unwrap();
    let names: Vec<&str> = result
        .as_struct_fields()
        .unwrap()
        .iter()
        .filter_map(|(k, _)| k.as_name())
        .collect();
    assert_eq!(names, vec!["user"]);
}

#[test]
fn morph_modes_parse_from_their_operators() {
    assert_eq!("~".parse::<MorphMode>().unwrap(), MorphMode::Normal);
    assert_eq!("~*".parse::<MorphMode>().unwrap(), MorphMode::Strong);
    assert_eq!("~?".parse::<MorphMode>().unwrap(), MorphMode::Weak);
}
