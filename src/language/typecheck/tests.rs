use super::{check_program, CallTarget, CheckedProgram, ConstValue};
use crate::language::{
    ast::NodeIdGen,
    errors::{Diagnostic, Diagnostics},
    parser::parse_module,
    types::{IntKind, ModulePath, QualName, Type},
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn check_sources(files: &[(&str, &str)]) -> Result<CheckedProgram, Vec<Diagnostic>> {
    let mut ids = NodeIdGen::new();
    let modules = files
        .iter()
        .map(|(path, source)| parse_module(PathBuf::from(path), source, &mut ids).expect("parse"))
        .collect();
    check_program(modules, ids).map_err(Diagnostics::into_sorted)
}

fn check_source(source: &str) -> Result<CheckedProgram, Vec<Diagnostic>> {
    check_sources(&[("app/main.kl", source)])
}

fn messages(source: &str) -> Vec<String> {
    match check_source(source) {
        Ok(_) => panic!("expected diagnostics"),
        Err(diagnostics) => diagnostics.into_iter().map(|d| d.message).collect(),
    }
}

fn assert_ok(source: &str) -> CheckedProgram {
    match check_source(source) {
        Ok(program) => program,
        Err(diagnostics) => panic!("unexpected diagnostics: {diagnostics:#?}"),
    }
}

fn root(name: &str) -> QualName {
    ModulePath::root("app").qualify(name)
}

#[test]
fn exhaustive_enum_match_checks() {
    assert_ok(
        "enum E { A(i32), None }\n\
         fn f(e: E) -> i32 { match e { .A(v) => v, .None => 0 } }",
    );
    let errors = messages(
        "enum E { A(i32), None }\n\
         fn f(e: E) -> i32 { match e { .A(v) => v } }",
    );
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("non-exhaustive"), "{errors:?}");
    assert!(errors[0].contains("`None`"), "{errors:?}");
}

#[test]
fn duplicate_and_unreachable_arms_are_rejected() {
    let errors = messages(
        "enum E { A, B }\n\
         fn f(e: E) -> i32 { match e { E.A => 1, .A => 2, .B => 3 } }",
    );
    assert_eq!(errors, vec!["unreachable match arm: this pattern is already covered".to_string()]);

    let errors = messages("fn f(x: i32) -> i32 { match x { _ => 1, 2 => 3 } }");
    assert!(errors[0].contains("earlier arm already matches"), "{errors:?}");
}

#[test]
fn unit_variants_can_be_matched_by_bare_name() {
    let program = assert_ok(
        "enum Color { Red, Green }\n\
         fn f(c: Color) -> i32 { match c { Red => 1, Green => 2 } }",
    );
    assert_eq!(program.resolutions.variants.len(), 2);
}

#[test]
fn scalar_matches_need_a_catch_all() {
    let errors = messages("fn f(s: string) -> i32 { match s { \"a\" => 1 } }");
    assert!(errors[0].contains("non-exhaustive"), "{errors:?}");
    let errors = messages("fn f(b: bool) -> i32 { match b { true => 1 } }");
    assert!(errors[0].contains("`false`"), "{errors:?}");
    assert_ok("fn f(b: bool) -> i32 { match b { true => 1, false => 0 } }");
    assert_ok("fn f(d: i32[0..=1]) -> i32 { match d { 0 => 10, 1 => 20 } }");
}

#[test]
fn generic_function_instantiates_once_per_type() {
    let program = assert_ok(
        "fn id[T](x: T) -> T { x }\n\
         fn main() -> i64 { let b = id(true); let c = id(2); id(1) }",
    );
    let instances: Vec<&str> = program
        .functions
        .keys()
        .filter(|name| name.name.starts_with("id["))
        .map(|name| name.name.as_str())
        .collect();
    assert_eq!(instances, vec!["id[T=bool]", "id[T=i64]"]);
    let targets: Vec<&CallTarget> = program
        .resolutions
        .calls
        .values()
        .filter(|target| matches!(target, CallTarget::Function(name) if name.name == "id[T=i64]"))
        .collect();
    assert_eq!(targets.len(), 2);
}

#[test]
fn generic_parameters_must_be_inferable() {
    let errors = messages("fn make[T]() -> i32 { 0 }\nfn main() -> i32 { make() }");
    assert!(errors[0].contains("cannot infer type parameter `T`"), "{errors:?}");
    assert_ok("fn make[T]() -> i32 { 0 }\nfn main() -> i32 { make[bool]() }");
}

#[test]
fn unbounded_instantiation_is_reported() {
    let errors = messages(
        "fn grow[T](x: T) -> i64 { let xs: List[T] = list(); grow(xs) }\n\
         fn main() -> i64 { grow(1) }",
    );
    assert!(
        errors.iter().any(|e| e.contains("recursive instantiation of `grow`")),
        "{errors:?}"
    );
}

#[test]
fn generic_types_are_inferred_from_literals_and_context() {
    let program = assert_ok(
        "struct Pair[T] { a: T, b: T }\n\
         fn main() -> i32 {\n\
             let p = Pair { a: 1, b: 2 };\n\
             let o: Option[i32] = Option.Some(5);\n\
             let n: Option[i32] = Option.None;\n\
             match o { .Some(v) => v, .None => 0 }\n\
         }",
    );
    let pair = root("Pair[T=i64]");
    assert!(program.signatures.structs.contains_key(&pair));
    let option = ModulePath::new("core", vec!["prelude".to_string()]).qualify("Option[T=i32]");
    assert!(program.signatures.enums.contains_key(&option));
}

#[test]
fn let_without_type_or_value_keeps_checking() {
    let errors = messages("fn main() { let x; let y: i32 = true; }");
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("`let x` needs a type annotation or an initializer"));
    assert!(errors[1].contains("mismatched types: expected `i32`, found `bool`"));
}

#[test]
fn same_named_private_functions_stay_separate() {
    let a = ("app/a.kl", "fn helper() -> i32 { 1 }\npub fn run_a() -> i32 { helper() }");
    let b = ("app/b.kl", "fn helper() -> i32 { 2 }\npub fn run_b() -> i32 { helper() }");
    let program = check_sources(&[a, b]).expect("same-module calls resolve");
    let a_helper = ModulePath::new("app", vec!["a".to_string()]).qualify("helper");
    let b_helper = ModulePath::new("app", vec!["b".to_string()]).qualify("helper");
    assert!(program.functions.contains_key(&a_helper));
    assert!(program.functions.contains_key(&b_helper));

    let c = ("app/c.kl", "fn go() -> i32 { helper() }");
    let errors = check_sources(&[a, b, c]).expect_err("unqualified call from a third module");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "cannot find function `helper` in this scope");
    assert_eq!(errors[0].path, PathBuf::from("app/c.kl"));
}

#[test]
fn qualified_calls_respect_visibility() {
    let util = (
        "app/util.kl",
        "pub fn twice(x: i32) -> i32 { x * 2 }\nfn secret() -> i32 { 0 }",
    );
    let ok = (
        "app/main.kl",
        "import util;\nimport util::{twice as double};\nfn main() -> i32 { util::twice(1) + double(2) }",
    );
    check_sources(&[util, ok]).expect("public calls resolve");

    let bad = ("app/main.kl", "import util;\nfn main() -> i32 { util::secret() }");
    let errors = check_sources(&[util, bad]).expect_err("private call");
    assert_eq!(errors[0].message, "function `secret` is private to `app::util`");
}

#[test]
fn private_fields_are_hidden_outside_their_module() {
    let geo = (
        "app/geo.kl",
        "pub struct Point { pub x: i32, y: i32 }\npub fn origin() -> Point { Point { x: 0, y: 0 } }",
    );
    let main = (
        "app/main.kl",
        "import geo;\nfn main() -> i32 { let p = geo::origin(); p.x + p.y }",
    );
    let errors = check_sources(&[geo, main]).expect_err("private field read");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "field `y` of struct `Point` is private");
}

#[test]
fn struct_literals_need_every_field_once() {
    let errors = messages(
        "struct P { x: i32, y: i32 }\n\
         fn f() -> P { P { x: 1, x: 2, z: 3 } }",
    );
    assert_eq!(
        errors,
        vec![
            "missing field(s) `y` in initializer of `P`".to_string(),
            "field `x` is specified more than once".to_string(),
            "struct `P` has no field named `z`".to_string(),
        ]
    );
}

#[test]
fn integer_casts_are_exact_at_the_boundaries() {
    assert_ok("fn f() -> i32 { 2147483647 as i32 }");
    let errors = messages("fn f() -> i32 { -9223372036854775808 as i32 }");
    assert!(errors[0].contains("out of range"), "{errors:?}");
    let errors = messages("fn f() -> u8 { -1 as u8 }");
    assert!(errors[0].contains("out of range"), "{errors:?}");
    let errors = messages("fn f() -> u64 { -1 as u64 }");
    assert!(errors[0].contains("out of range"), "{errors:?}");
}

#[test]
fn range_types_check_literals_and_need_casts() {
    assert_ok("type Digit = i32[0..=9];\nfn f(x: i32) -> Digit { let d: Digit = 7; x as Digit }");
    let errors = messages("fn f() -> i32[0..=9] { 12 }");
    assert_eq!(errors, vec!["literal `12` does not fit in `i32[0..=9]`".to_string()]);
    let errors = messages("fn f(x: i32) -> i32[0..=9] { x }");
    assert!(errors[0].contains("mismatched types"), "{errors:?}");
    assert_ok("fn f(d: i32[0..=9]) -> i32 { d + 1 }");
}

#[test]
fn constants_evaluate_with_exact_widths() {
    let program = assert_ok(
        "const BASE: u8 = 200;\n\
         const SHIFTED: i32 = 1 << 30;\n\
         const PICK: i64 = if BASE > 100 { 1 } else { 2 };\n\
         fn f() -> i64 { PICK }",
    );
    assert_eq!(program.consts[&root("BASE")].value, ConstValue::Int(200));
    assert_eq!(program.consts[&root("SHIFTED")].value, ConstValue::Int(1 << 30));
    assert_eq!(program.consts[&root("PICK")].ty, Type::Int(IntKind::I64));

    let errors = messages("const X: u8 = 200 + 100;");
    assert!(errors[0].contains("overflow"), "{errors:?}");
    let errors = messages("const X: i32 = 1 / 0;");
    assert_eq!(errors, vec!["division by zero in constant expression".to_string()]);
    let errors = messages("const X: i32 = 1 << 32;");
    assert!(errors[0].contains("shift count `32` is out of range"), "{errors:?}");
    let errors = messages("const X: i8 = -128 / -1;");
    assert!(errors[0].contains("overflow"), "{errors:?}");
}

#[test]
fn constant_cycles_are_reported() {
    let errors = messages("const A: i32 = B + 1;\nconst B: i32 = A;");
    assert!(
        errors
            .iter()
            .any(|e| e.starts_with("cycle detected while evaluating constant")),
        "{errors:?}"
    );
}

#[test]
fn untyped_literals_default_to_i64() {
    let program = assert_ok("fn f() { let x = 5; let y: u8 = 3; }");
    let mut types: Vec<Type> = program.resolutions.let_types.values().cloned().collect();
    types.sort_by_key(|ty| ty.to_string());
    assert_eq!(types, vec![Type::Int(IntKind::I64), Type::Int(IntKind::U8)]);
}

#[test]
fn intrinsics_need_mutable_local_receivers() {
    assert_ok(
        "fn f() -> i64 { let mut xs: List[i32] = list(); xs.push(1); let s = \"ab\"; xs.len() + s.len() }",
    );
    let errors = messages("fn f() { let xs: List[i32] = list(); xs.push(1); }");
    assert!(errors[0].contains("cannot mutate immutable variable `xs`"), "{errors:?}");
    let errors = messages("fn f() { let xs = list(); }");
    assert!(errors[0].contains("cannot infer the element type of `list()`"), "{errors:?}");
}

#[test]
fn operators_need_matching_types() {
    let errors = messages("fn f(a: i32, b: i64) -> bool { a < b }");
    assert!(errors[0].contains("mismatched operand types for `<`"), "{errors:?}");
    let errors = messages("fn f(a: i32) -> bool { a && true }");
    assert!(errors[0].contains("expected `bool`, found `i32`"), "{errors:?}");
    assert_ok("fn f(a: string, b: string) -> bool { a == b || a != b }");
}

#[test]
fn control_flow_misuse_is_diagnosed() {
    let errors = messages("fn f() -> i32 { break; }");
    assert_eq!(
        errors,
        vec![
            "function `f` must return a value of type `i32`".to_string(),
            "`break` outside of a loop".to_string(),
        ]
    );
    let errors = messages("fn f() { let x = 1; x = 2; }");
    assert!(errors[0].contains("cannot assign twice to immutable variable `x`"));
    assert_ok("fn f(c: bool) -> i32 { if c { return 1; } else { return 2; } }");
}

#[test]
fn trait_impls_must_match_the_trait() {
    assert_ok(
        "trait Area { fn area(s: Self) -> i32; }\n\
         struct Sq { side: i32 }\n\
         impl Area for Sq { fn area(s: Sq) -> i32 { s.side * s.side } }\n\
         fn f() -> i32 { Sq.area(Sq { side: 3 }) }",
    );
    let errors = messages(
        "trait Area { fn area(s: Self) -> i32; }\n\
         struct Sq { side: i32 }\n\
         impl Area for Sq { fn perimeter(s: Sq) -> i32 { 0 } }",
    );
    assert!(errors.iter().any(|e| e.contains("missing method `area`")), "{errors:?}");
    assert!(
        errors.iter().any(|e| e.contains("`perimeter` is not a member of trait `Area`")),
        "{errors:?}"
    );
}

#[test]
fn functions_are_not_values() {
    let errors = messages("fn g() {}\nfn f() { let h = g; }");
    assert!(errors[0].contains("`g` is a function, not a value"), "{errors:?}");
}

#[test]
fn negation_needs_a_signed_operand() {
    assert_ok("fn f(x: i8) -> i8 { -x }");
    let errors = messages("fn f() { let x: u8 = 1; let y = -x; }");
    assert_eq!(errors, vec!["cannot negate unsigned type `u8`".to_string()]);
    let errors = messages("fn f(d: u32[0..=9]) -> u32 { -d }");
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].starts_with("cannot negate unsigned type"), "{errors:?}");
}

#[test]
fn constant_errors_skip_body_checking() {
    let errors = messages("const A: i32 = 1 / 0;\nfn f() -> i32 { true }");
    assert_eq!(errors, vec!["division by zero in constant expression".to_string()]);
}
