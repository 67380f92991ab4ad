//! Folding behavior across whole modules: constants, spreads, shapes, and
//! the agreement between folded values and executed instructions.

use comp::{Decimal, Engine, FieldKey, Loader, Scopes, Value, generate};
use pretty_assertions::assert_eq;

fn num(n: i64) -> Value {
    Value::Number(Decimal::from_i64(n))
}

#[test]
fn arithmetic_folds_to_a_constant() {
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", "x = 1 + 2").unwrap();
    let def = loader.find_definition(module, "x").unwrap();
    assert_eq!(def.folded.get(), Some(&num(3)));
}

#[test]
fn folding_matches_execution() {
    // For every folded definition, running its compiled instructions with
    // empty input returns the same value.
    let source = "a = 2 * 3 + 4\nb = -5\nc = (x=1 y=\"two\")\nd = 1 < 2";
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();

    for name in ["a", "b", "c", "d"] {
        let def = loader.find_definition(module, name).unwrap();
        let folded = def.folded.get().cloned().unwrap();
        let resolved = def.resolved.borrow().clone().unwrap();
        let program = generate(&resolved).unwrap();
        let mut engine = Engine::new(&loader);
        let executed = engine.run(program, Scopes::module_level(module));
        assert_eq!(executed, folded, "definition {name}");
    }
}

#[test]
fn spread_of_a_constant_struct_merges_in_order() {
    let source = "p = (x=1 y=2)\nq = (..p z=3)";
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();
    let q = loader.find_definition(module, "q").unwrap();
    let folded = q.folded.get().unwrap();

    let fields = folded.as_struct_fields().unwrap();
    let names: Vec<&str> = fields.iter().filter_map(|(k, _)| k.as_name()).collect();
    assert_eq!(names, vec!["x", "y", "z"]);
    assert_eq!(folded.field("x"), Some(&num(1)));
    assert_eq!(folded.field("z"), Some(&num(3)));
}

#[test]
fn division_by_zero_does_not_fold() {
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", "x = 1 / 0").unwrap();
    let def = loader.find_definition(module, "x").unwrap();
    assert!(def.folded.get().is_none());
}

#[test]
fn references_to_folded_definitions_substitute() {
    let source = "base = 10\nderived = base * base + 1";
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();
    let derived = loader.find_definition(module, "derived").unwrap();
    assert_eq!(derived.folded.get(), Some(&num(101)));
}

#[test]
fn cyclic_definitions_leave_both_unfolded() {
    // a and b reference each other; folding must terminate and neither gets
    // a constant.
    let source = "a = b + 1\nb = a + 1";
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();
    assert!(loader.find_definition(module, "a").unwrap().folded.get().is_none());
    assert!(loader.find_definition(module, "b").unwrap().folded.get().is_none());
}

#[test]
fn shape_definitions_fold_to_shape_values() {
    let source = "point = ~(x ~num y ~num = 7)";
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();
    let def = loader.find_definition(module, "point").unwrap();
    match def.folded.get() {
        Some(Value::Shape(_)) => {}
        other => panic!("expected a shape constant, got {other:?}"),
    }
}

#[test]
fn tag_literals_fold_to_tag_constants() {
    let source = "tag.status = (ok error)\nflag = #status.ok\nyes = #true";
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();
    let flag = loader.find_definition(module, "flag").unwrap();
    match flag.folded.get() {
        Some(Value::Tag(tag)) => assert_eq!(tag.full_name(), "status.ok"),
        other => panic!("expected a tag constant, got {other:?}"),
    }
    let yes = loader.find_definition(module, "yes").unwrap();
    match yes.folded.get() {
        Some(Value::Tag(tag)) => assert_eq!(tag.full_name(), "bool.true"),
        other => panic!("expected #bool.true, got {other:?}"),
    }
}

#[test]
fn struct_constants_preserve_positional_identity() {
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", "s = (1 2 named=3)").unwrap();
    let folded = loader
        .find_definition(module, "s")
        .unwrap()
        .folded
        .get()
        .cloned()
        .unwrap();
    let fields = folded.as_struct_fields().unwrap();
    assert_eq!(fields.len(), 3);
    assert!(matches!(fields[0].0, FieldKey::Unnamed(_)));
    assert!(matches!(fields[1].0, FieldKey::Unnamed(_)));
    // The two positional keys are distinct occurrences.
    assert!(!fields[0].0.matches(&fields[1].0));
}
