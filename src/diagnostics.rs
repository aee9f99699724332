use crate::language::{
    build::SourceFile,
    errors::{CompileError, Diagnostic},
};
use miette::{Diagnostic as MietteDiagnostic, NamedSource, Report, SourceSpan};
use std::path::Path;
use thiserror::Error;

/// A checker or parser diagnostic bound to the text of its file.
#[derive(Debug, Error, MietteDiagnostic, Clone)]
#[error("{message}")]
pub struct SourceDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("{label}")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
    label: String,
}

impl SourceDiagnostic {
    pub fn new(src: NamedSource<String>, diagnostic: &Diagnostic) -> Self {
        Self {
            src,
            span: diagnostic.source_span(),
            help: diagnostic.help.clone(),
            message: diagnostic.message.clone(),
            label: "here".to_string(),
        }
    }
}

/// Renders each diagnostic as a miette report. Diagnostics whose file is not
/// among `files` fall back to the plain `path@offset: message` form.
pub fn render_diagnostics(files: &[SourceFile], diagnostics: &[Diagnostic]) -> Vec<String> {
    diagnostics
        .iter()
        .map(|diagnostic| match find_source(files, &diagnostic.path) {
            Some(file) => {
                let src = NamedSource::new(file.path.display().to_string(), file.source.clone());
                format!("{:?}", Report::new(SourceDiagnostic::new(src, diagnostic)))
            }
            None => diagnostic.to_string(),
        })
        .collect()
}

pub fn report_compile_error(files: &[SourceFile], error: &CompileError) {
    match error {
        CompileError::Syntax(diagnostics) | CompileError::Diagnostics(diagnostics) => {
            for rendered in render_diagnostics(files, diagnostics) {
                eprintln!("{rendered}");
            }
            eprintln!("error: {error}");
        }
        CompileError::Layout(_) | CompileError::Internal(_) => eprintln!("error: {error}"),
    }
}

pub fn report_io_error(path: &Path, error: &std::io::Error) {
    eprintln!("Failed to access {}: {}", path.display(), error);
}

fn find_source<'a>(files: &'a [SourceFile], path: &Path) -> Option<&'a SourceFile> {
    files.iter().find(|file| file.path == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::span::Span;

    #[test]
    fn reports_carry_message_and_help() {
        let files = vec![SourceFile::new("app/main.kl", "fn main() -> i32 { true }")];
        let diagnostic = Diagnostic::new(Path::new("app/main.kl"), Span::new(19, 23), "mismatched types")
            .with_help("expected `i32`");
        let rendered = render_diagnostics(&files, &[diagnostic]);
        assert_eq!(rendered.len(), 1);
        assert!(rendered[0].contains("mismatched types"));
        assert!(rendered[0].contains("expected `i32`"));
        assert!(rendered[0].contains("app/main.kl"));
    }

    #[test]
    fn unknown_files_render_plainly() {
        let diagnostic = Diagnostic::new(Path::new("app"), Span::default(), "no entry function");
        let rendered = render_diagnostics(&[], &[diagnostic]);
        assert_eq!(rendered, vec!["app@0: no entry function".to_string()]);
    }
}
