//! Compiles emitted C with the host `cc` and runs it. Every test returns early
//! when no C compiler is installed.

use keel_lang::{
    language::build::{compile, SourceFile},
    target::{BuildOptions, EmitMode},
};
use std::{
    fs,
    path::PathBuf,
    process::{Command, Output},
};

fn have_cc() -> bool {
    Command::new("cc")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

fn build_and_run(name: &str, source: &str, mode: EmitMode) -> Output {
    let files = vec![SourceFile::new("app/main.kl", source)];
    let options = BuildOptions::program("app").with_mode(mode);
    let compilation = match compile(&files, &options) {
        Ok(compilation) => compilation,
        Err(error) => panic!("{name} failed to compile: {error}: {:#?}", error.diagnostics()),
    };

    let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("native").join(name);
    fs::create_dir_all(&dir).expect("create artifact dir");
    let c_path = dir.join("main.c");
    let exe_path = dir.join("main");
    fs::write(&c_path, &compilation.c_source).expect("write C source");

    let cc = Command::new("cc")
        .args(["-std=c11", "-O1", "-o"])
        .arg(&exe_path)
        .arg(&c_path)
        .output()
        .expect("run cc");
    assert!(
        cc.status.success(),
        "cc rejected {name}:\n{}\n{}",
        String::from_utf8_lossy(&cc.stderr),
        compilation.c_source
    );
    Command::new(&exe_path).output().expect("run compiled program")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn prints_struct_results() {
    if !have_cc() {
        return;
    }
    let output = build_and_run(
        "structs",
        "struct Point { x: i32, y: i32 }\n\
         fn main() -> i32 { let p = Point { x: 3, y: 4 }; p.x * p.y }",
        EmitMode::Program,
    );
    assert!(output.status.success());
    assert_eq!(stdout(&output), "12\n");
}

#[test]
fn matches_dispatch_on_variants() {
    if !have_cc() {
        return;
    }
    let output = build_and_run(
        "enums",
        "enum Shape { Square(i32), Empty }\n\
         fn area(s: Shape) -> i32 { match s { .Square(side) => side * side, .Empty => 0 } }\n\
         fn main() -> i32 { area(Shape.Square(5)) + area(Shape.Empty) }",
        EmitMode::Program,
    );
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "25\n");
}

#[test]
fn short_circuit_skips_the_failing_side() {
    if !have_cc() {
        return;
    }
    let output = build_and_run(
        "short_circuit",
        "fn rhs() -> bool { panic(\"rhs was called\"); true }\n\
         fn main() -> bool { false && rhs() }",
        EmitMode::Program,
    );
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "false\n");
    assert!(!stderr(&output).contains("rhs was called"));
}

#[test]
fn generic_instances_run_independently() {
    if !have_cc() {
        return;
    }
    let output = build_and_run(
        "generics",
        "fn id[T](x: T) -> T { x }\n\
         fn main() -> i64 { if id(true) { id(41) + 1 } else { 0 } }",
        EmitMode::Program,
    );
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "42\n");
}

#[test]
fn tool_mode_exits_with_the_truncated_result() {
    if !have_cc() {
        return;
    }
    let output = build_and_run("tool", "fn main() -> i32 { 300 }", EmitMode::Tool);
    assert_eq!(output.status.code(), Some(44));
    assert!(output.stdout.is_empty());
}

#[test]
fn loops_lists_and_strings_work_together() {
    if !have_cc() {
        return;
    }
    let output = build_and_run(
        "lists",
        "fn main() -> i64 {\n\
             let mut xs: List[i64] = list();\n\
             let mut i: i64 = 0;\n\
             while i < 5 { xs.push(i * i); i = i + 1; }\n\
             xs.set(0, 100);\n\
             let mut total: i64 = 0;\n\
             let mut j: i64 = 0;\n\
             while j < xs.len() {\n\
                 if xs.get(j) == 9 { j = j + 1; continue; }\n\
                 total = total + xs.get(j);\n\
                 j = j + 1;\n\
             }\n\
             let s = \"ab\";\n\
             let t = s.concat(\"cd\");\n\
             print(t);\n\
             total + t.len()\n\
         }",
        EmitMode::Program,
    );
    assert!(output.status.success(), "{}", stderr(&output));
    // 100 + 1 + 4 + 16 (9 skipped) + 4 bytes of "abcd"
    assert_eq!(stdout(&output), "abcd\n125\n");
}

#[test]
fn runtime_failures_abort_with_a_message() {
    if !have_cc() {
        return;
    }
    let output = build_and_run(
        "division",
        "fn div(a: i32, b: i32) -> i32 { a / b }\n\
         fn main() -> i32 { div(1, 0) }",
        EmitMode::Program,
    );
    assert_eq!(output.status.code(), Some(101));
    assert!(stderr(&output).contains("division by zero"));

    let output = build_and_run(
        "range",
        "fn narrow(x: i64) -> i32[0..=9] { x as i32[0..=9] }\n\
         fn main() -> i32 { narrow(12) as i32 }",
        EmitMode::Program,
    );
    assert_eq!(output.status.code(), Some(101));
    assert!(stderr(&output).contains("out of range"));
}

#[test]
fn constants_fold_to_literals() {
    if !have_cc() {
        return;
    }
    let output = build_and_run(
        "consts",
        "const SHIFT: i32 = 4;\n\
         const LIMIT: i32 = (1 << SHIFT) - 1;\n\
         fn main() -> u8 { let x: i32 = LIMIT; x as u8 }",
        EmitMode::Program,
    );
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "15\n");
}
