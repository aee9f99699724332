//! Declarations every module can call without importing them.

use std::path::PathBuf;

pub const PRELUDE_PACKAGE: &str = "core";
pub const PRELUDE_MODULE: &str = "prelude";

pub const PRELUDE_SOURCE: &str = r#"
pub enum Option[T] {
    Some(T),
    None,
}

pub fn min[T](a: T, b: T) -> T {
    if a < b { a } else { b }
}

pub fn max[T](a: T, b: T) -> T {
    if a < b { b } else { a }
}
"#;

pub fn prelude_path() -> PathBuf {
    PathBuf::from(format!("{PRELUDE_PACKAGE}/{PRELUDE_MODULE}.kl"))
}

/// Functions resolved after every module lookup has failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// `print(v)` for integers, bool and string; writes `v` and a newline.
    Print,
    /// `assert(cond)` aborts when `cond` is false.
    Assert,
    /// `panic(message)` aborts with `message`.
    Panic,
    /// `list()` creates an empty list; the element type comes from context.
    List,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        match name {
            "print" => Some(Builtin::Print),
            "assert" => Some(Builtin::Assert),
            "panic" => Some(Builtin::Panic),
            "list" => Some(Builtin::List),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Assert => "assert",
            Builtin::Panic => "panic",
            Builtin::List => "list",
        }
    }
}
