//! The module pipeline end to end: imports, namespaces, ambiguity, pure
//! evaluation, docs, and COP serialization.

use std::path::PathBuf;

use comp::{BuildError, Decimal, Loader, Value, parse_module, unparse};
use pretty_assertions::assert_eq;

fn num(n: i64) -> Value {
    Value::Number(Decimal::from_i64(n))
}

/// Creates a fresh temp directory with the given `.comp` files.
fn write_modules(tag: &str, files: &[(&str, &str)]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("comp-module-tests-{tag}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    for (name, content) in files {
        std::fs::write(dir.join(format!("{name}.comp")), content).unwrap();
    }
    dir
}

#[test]
fn imports_resolve_through_their_prefix() {
    let dir = write_modules(
        "imports",
        &[
            ("util", "base = 10\nhalf = :( )($in / 2)"),
            ("main", "!import util (\"./util\")\ntotal = util.base + 4\nalso = base + 1"),
        ],
    );
    let loader = Loader::new(vec![dir.clone()]);
    let module = loader.load_resource("main").unwrap();

    let total = loader.find_definition(module, "total").unwrap();
    assert_eq!(total.folded.get(), Some(&num(14)));
    // The unprefixed suffix works too when unambiguous.
    let also = loader.find_definition(module, "also").unwrap();
    assert_eq!(also.folded.get(), Some(&num(11)));
}

#[test]
fn import_cycles_are_tolerated() {
    let dir = write_modules(
        "cycles",
        &[
            ("a", "!import b (\"./b\")\nx = 1"),
            ("b", "!import a (\"./a\")\ny = x + 1"),
        ],
    );
    let loader = Loader::new(vec![dir]);
    let a = loader.load_resource("a").unwrap();
    assert_eq!(
        loader.find_definition(a, "x").unwrap().folded.get(),
        Some(&num(1))
    );
    // b resolved x against the half-prepared a and still folded once a's
    // definitions existed.
    let b = loader.import_target(a, "b").unwrap();
    let y = loader.find_definition(b, "y").unwrap();
    assert!(y.resolved.borrow().is_some());
}

#[test]
fn local_definitions_shadow_imports() {
    let dir = write_modules(
        "shadow",
        &[
            ("util", "base = 10"),
            ("main", "!import util (\"./util\")\nbase = 99\nr = base"),
        ],
    );
    let loader = Loader::new(vec![dir]);
    let module = loader.load_resource("main").unwrap();
    assert_eq!(
        loader.find_definition(module, "r").unwrap().folded.get(),
        Some(&num(99))
    );
}

#[test]
fn ambiguous_suffixes_error_only_when_referenced() {
    // Two non-callable definitions share the suffix `port`: loading is fine.
    let loader = Loader::new(vec![]);
    assert!(loader.load_source("ok", "a.port = 80\nb.port = 8080").is_ok());

    // Referencing the suffix is the build error, naming both candidates.
    let loader = Loader::new(vec![]);
    match loader.load_source("bad", "a.port = 80\nb.port = 8080\nr = port + 1") {
        Err(BuildError::AmbiguousReference { name, candidates }) => {
            assert_eq!(name, "port");
            assert_eq!(candidates.len(), 2);
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }
}

#[test]
fn fully_qualified_names_cut_through_ambiguity() {
    let loader = Loader::new(vec![]);
    let module = loader
        .load_source("main", "a.port = 80\nb.port = 8080\nr = a.port + 1")
        .unwrap();
    assert_eq!(
        loader.find_definition(module, "r").unwrap().folded.get(),
        Some(&num(81))
    );
}

#[test]
fn pure_pipelines_fold_at_compile_time() {
    let source = "\
add = :(!pure n ~num)($in + n)
double = :(!pure)($in * 2)
r = [3 |add (n=4) |double]
";
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();

    // Pure evaluation reduced the pipeline to a constant at build time.
    let r = loader.find_definition(module, "r").unwrap();
    assert_eq!(r.folded.get(), Some(&num(14)));
    // And running it agrees.
    assert_eq!(loader.evaluate(module, "r"), num(14));
}

#[test]
fn impure_suffixes_stay_in_the_pipeline() {
    // The first stage is pure and folds; the later stage references an
    // unfoldable definition, so it must remain.
    let source = "\
add = :(!pure n ~num)($in + n)
shift = :(n ~num)($in + n + outside)
outside = 1 / 0
r = [3 |add (n=4) |shift (n=1)]
";
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();
    let r = loader.find_definition(module, "r").unwrap();
    assert!(r.folded.get().is_none());
    // Running it hits the division failure at the impure stage.
    assert!(loader.evaluate(module, "r").is_fail());
}

#[test]
fn pure_failures_leave_the_site_unfolded() {
    let source = "boom = :(!pure)($in / 0)\nr = [1 |boom]";
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();
    let r = loader.find_definition(module, "r").unwrap();
    assert!(r.folded.get().is_none());
    assert!(loader.evaluate(module, "r").is_fail());
}

#[test]
fn pkg_bindings_must_be_constant() {
    let loader = Loader::new(vec![]);
    let module = loader
        .load_source("main", "pkg.name = \"demo\"\npkg.version = 3")
        .unwrap();
    let cell = loader.module(module);
    let pkg = &cell.borrow().pkg;
    assert_eq!(pkg.get("name"), Some(&Value::text("demo")));
    assert_eq!(pkg.get("version"), Some(&num(3)));

    let loader = Loader::new(vec![]);
    assert!(matches!(
        loader.load_source("bad", "pkg.broken = nowhere"),
        Err(BuildError::InvalidModuleAssignment { .. })
    ));
}

#[test]
fn docs_are_collected_from_the_scanner() {
    let source = "--- The demo module ---\nx = 1 -- trailing note";
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();
    let cell = loader.module(module);
    let docs = &cell.borrow().docs;
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].content, "The demo module");
}

#[test]
fn block_overloads_auto_suffix_and_share_a_namespace_entry() {
    let source = "f = :(n ~num)(n)\nf = :(t ~text)(t)";
    let loader = Loader::new(vec![]);
    let module = loader.load_source("main", source).unwrap();
    assert!(loader.find_definition(module, "f.i000").is_some());
    assert!(loader.find_definition(module, "f.i001").is_some());
    assert!(matches!(
        loader.namespace_binding(module, "f"),
        Some(comp::Binding::Overloads(_))
    ));
}

#[test]
fn unparse_round_trips_a_whole_module() {
    let source = "\
tag.status = (ok error (timeout parse))
point = ~(x ~num y ~num = 7)
add = :(!pure n ~num)($in + n)
p = (x=1 y=2)
q = (..p z=3)
r = [3 |add (n=4)]
s = bogus ?? 42
";
    let first = parse_module(source).unwrap();
    let text = unparse(&first);
    let second = parse_module(&text).unwrap();
    assert_eq!(first, second);
}

#[test]
fn cop_trees_serialize_to_json() {
    let cop = parse_module("x = 1 + foo.bar").unwrap();
    let json = serde_json::to_value(&cop).unwrap();
    assert_eq!(json["tag"], "mod.define");
    let field = &json["kids"][0];
    assert_eq!(field["tag"], "mod.namefield");
    assert_eq!(field["kids"][1]["op"], "+");
}
