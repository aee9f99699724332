use keel_lang::{
    language::{
        build::{compile, SourceFile},
        errors::CompileError,
        ir::{BinOp, Instr, IrFunction, Terminator},
    },
    target::BuildOptions,
};
use pretty_assertions::assert_eq;
use std::path::Path;

fn files(sources: &[(&str, &str)]) -> Vec<SourceFile> {
    sources
        .iter()
        .map(|(path, source)| SourceFile::new(*path, *source))
        .collect()
}

fn messages(error: &CompileError) -> Vec<String> {
    error
        .diagnostics()
        .iter()
        .map(|diagnostic| diagnostic.message.clone())
        .collect()
}

fn count(function: &IrFunction, predicate: impl Fn(&Instr) -> bool) -> usize {
    function
        .blocks
        .iter()
        .flat_map(|block| block.instrs.iter())
        .filter(|instr| predicate(instr))
        .count()
}

#[test]
fn struct_layout_precedes_its_users() {
    let sources = files(&[(
        "app/main.kl",
        "struct Point { x: i32, y: i32 }\n\
         fn main() -> i32 { let p = Point { x: 3, y: 4 }; p.x * p.y }",
    )]);
    let compilation = compile(&sources, &BuildOptions::program("app")).expect("compiles");
    let main = &compilation.ir.functions["app::main"];
    assert_eq!(count(main, |i| matches!(i, Instr::MakeStruct { .. })), 1);
    assert_eq!(count(main, |i| matches!(i, Instr::FieldGet { .. })), 2);

    let c = &compilation.c_source;
    let layout = c.find("struct ks_app_3a_3aPoint {").expect("struct layout");
    let user = c.find("static int32_t kf_app_3a_3amain(void)").expect("function");
    assert!(layout < user);
}

#[test]
fn enum_matches_test_the_tag_once_and_must_be_exhaustive() {
    let complete = files(&[(
        "app/main.kl",
        "enum E { A(i32), None }\n\
         fn f(e: E) -> i32 { match e { .A(v) => v, .None => 0 } }",
    )]);
    let compilation = compile(&complete, &BuildOptions::default()).expect("compiles");
    let f = &compilation.ir.functions["app::f"];
    assert_eq!(count(f, |i| matches!(i, Instr::Tag { .. })), 1);
    assert_eq!(count(f, |i| matches!(i, Instr::Binary { op: BinOp::Eq, .. })), 2);

    let missing = files(&[(
        "app/main.kl",
        "enum E { A(i32), None }\n\
         fn f(e: E) -> i32 { match e { .A(v) => v } }",
    )]);
    let error = compile(&missing, &BuildOptions::default()).unwrap_err();
    let messages = messages(&error);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("None"), "{messages:?}");
}

#[test]
fn short_circuit_never_reaches_the_right_side() {
    let sources = files(&[(
        "app/main.kl",
        "fn rhs() -> bool { panic(\"rhs was called\"); true }\n\
         fn main() -> bool { false && rhs() }",
    )]);
    let compilation = compile(&sources, &BuildOptions::program("app")).expect("compiles");
    let main = &compilation.ir.functions["app::main"];
    let Terminator::Branch { cond, .. } = &main.blocks[0].terminator else {
        panic!("expected a conditional branch out of the entry block");
    };
    assert_eq!(cond.to_string(), "false");
    assert!(!main.blocks[0]
        .instrs
        .iter()
        .any(|instr| matches!(instr, Instr::Call { .. })));
}

#[test]
fn generic_functions_instantiate_per_type() {
    let sources = files(&[(
        "app/main.kl",
        "fn id[T](x: T) -> T { x }\n\
         fn main() -> i64 { if id(true) { id(1) } else { id(2) } }",
    )]);
    let compilation = compile(&sources, &BuildOptions::program("app")).expect("compiles");
    let mut instances: Vec<&str> = compilation
        .ir
        .functions
        .keys()
        .map(String::as_str)
        .filter(|name| name.starts_with("app::id["))
        .collect();
    instances.sort();
    assert_eq!(instances, vec!["app::id[T=bool]", "app::id[T=i64]"]);
    assert_eq!(compilation.c_source.matches("static int64_t kf_app_3a_3aid_5bT_3di64_5d(int64_t p0) {").count(), 1);
}

#[test]
fn incomplete_lets_are_diagnosed_and_checking_continues() {
    let sources = files(&[("app/main.kl", "fn main() -> i32 { let x; let y: i32 = true; 0 }")]);
    let error = compile(&sources, &BuildOptions::program("app")).unwrap_err();
    let messages = messages(&error);
    assert_eq!(messages.len(), 2, "{messages:?}");
    assert!(messages[0].contains("`let x`"));
    assert!(messages[1].contains("mismatched types"));
}

#[test]
fn private_functions_with_the_same_name_do_not_collide() {
    let a = ("app/a.kl", "fn helper() -> i32 { 1 }\npub fn run_a() -> i32 { helper() }");
    let b = ("app/b.kl", "fn helper() -> i32 { 2 }\npub fn run_b() -> i32 { helper() }");
    let main = (
        "app/main.kl",
        "import a;\nimport b;\nfn main() -> i32 { a::run_a() * 10 + b::run_b() }",
    );
    let compilation = compile(&files(&[a, b, main]), &BuildOptions::program("app")).expect("compiles");
    assert!(compilation.c_source.contains("kf_app_3a_3aa_3a_3ahelper"));
    assert!(compilation.c_source.contains("kf_app_3a_3ab_3a_3ahelper"));

    let stranger = ("app/c.kl", "fn go() -> i32 { helper() }");
    let error = compile(&files(&[a, b, stranger]), &BuildOptions::default()).unwrap_err();
    let diagnostics = error.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].path, Path::new("app/c.kl"));
    assert!(diagnostics[0].message.contains("`helper`"));
}

#[test]
fn by_value_cycles_fail_layout_with_every_member() {
    let sources = files(&[(
        "app/main.kl",
        "struct A { b: B }\nstruct B { a: A }\nstruct Fine { items: List[A] }",
    )]);
    match compile(&sources, &BuildOptions::default()) {
        Err(CompileError::Layout(error)) => {
            assert_eq!(error.cycles, vec![vec!["app::A".to_string(), "app::B".to_string()]]);
            let message = error.to_string();
            assert!(message.contains("app::A") && message.contains("app::B"));
        }
        other => panic!("expected a layout error, found {other:?}"),
    }
}

#[test]
fn failed_phases_stop_before_body_checking() {
    let unresolved = files(&[("app/main.kl", "import nowhere;\nfn main() -> i32 { true }")]);
    let error = compile(&unresolved, &BuildOptions::program("app")).unwrap_err();
    assert_eq!(messages(&error), vec!["unknown module `nowhere`".to_string()]);

    let bad_const = files(&[(
        "app/main.kl",
        "const A: i32 = 1 / 0;\nfn main() -> i32 { true }",
    )]);
    let error = compile(&bad_const, &BuildOptions::program("app")).unwrap_err();
    assert_eq!(
        messages(&error),
        vec!["division by zero in constant expression".to_string()]
    );
}
