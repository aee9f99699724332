use crate::language::span::{LineIndex, Span};
use miette::SourceSpan;
use std::{
    fmt,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn into_diagnostic(self, path: &Path) -> Diagnostic {
        let mut diagnostic = Diagnostic::new(path, self.span, self.message);
        diagnostic.help = self.help;
        diagnostic
    }
}

#[derive(Clone, Debug)]
pub struct SyntaxErrors {
    pub errors: Vec<SyntaxError>,
}

impl SyntaxErrors {
    pub fn new(errors: Vec<SyntaxError>) -> Self {
        Self { errors }
    }
}

/// A user-facing problem at one source location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub span: Span,
    pub message: String,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(path: &Path, span: Span, message: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            span,
            message: message.into(),
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn source_span(&self) -> SourceSpan {
        self.span.into()
    }

    /// `file:line:col: message`, resolved against the file's text.
    pub fn render_plain(&self, source: &str) -> String {
        let (line, column) = LineIndex::new(source).line_col(self.span.start.min(source.len()));
        format!(
            "{}:{}:{}: {}",
            self.path.display(),
            line,
            column,
            self.message
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}: {}", self.path.display(), self.span.start, self.message)
    }
}

/// Accumulates diagnostics for one phase of a compilation.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn error(&mut self, path: &Path, span: Span, message: impl Into<String>) {
        self.push(Diagnostic::new(path, span, message));
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        self.items.extend(other);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Sorted by file then position; identical reports collapse into one.
    pub fn into_sorted(mut self) -> Vec<Diagnostic> {
        self.items.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then(a.span.start.cmp(&b.span.start))
                .then(a.span.end.cmp(&b.span.end))
                .then(a.message.cmp(&b.message))
        });
        self.items.dedup();
        self.items
    }
}

/// A checker/lowering contract violation. Never caused by user input alone.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("internal compiler error: {message}")]
pub struct InternalError {
    pub message: String,
}

impl InternalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Aggregates that contain each other by value and therefore have no layout.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{}", describe_cycles(.cycles))]
pub struct LayoutError {
    /// Every cyclic set, members sorted by qualified name.
    pub cycles: Vec<Vec<String>>,
}

fn describe_cycles(cycles: &[Vec<String>]) -> String {
    let rendered: Vec<String> = cycles
        .iter()
        .map(|members| format!("{{{}}}", members.join(", ")))
        .collect();
    format!(
        "types contain themselves by value and cannot be laid out: {}",
        rendered.join("; ")
    )
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{} syntax error(s)", .0.len())]
    Syntax(Vec<Diagnostic>),
    #[error("{} error(s) found", .0.len())]
    Diagnostics(Vec<Diagnostic>),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl CompileError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Syntax(items) | CompileError::Diagnostics(items) => items,
            CompileError::Layout(_) | CompileError::Internal(_) => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bag_sorts_by_file_then_position_and_dedups() {
        let mut bag = Diagnostics::new();
        bag.error(Path::new("b.kl"), Span::new(1, 2), "late file");
        bag.error(Path::new("a.kl"), Span::new(9, 10), "second");
        bag.error(Path::new("a.kl"), Span::new(3, 4), "first");
        bag.error(Path::new("a.kl"), Span::new(3, 4), "first");
        let sorted = bag.into_sorted();
        let messages: Vec<&str> = sorted.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "late file"]);
    }

    #[test]
    fn renders_line_and_column() {
        let diagnostic = Diagnostic::new(Path::new("app/main.kl"), Span::new(10, 11), "boom");
        assert_eq!(
            diagnostic.render_plain("fn a() {}\nfn b() {}"),
            "app/main.kl:2:1: boom"
        );
    }

    #[test]
    fn layout_error_lists_every_member() {
        let error = LayoutError {
            cycles: vec![vec!["app::A".into(), "app::B".into()]],
        };
        assert!(error.to_string().contains("{app::A, app::B}"));
    }
}
