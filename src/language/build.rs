//! The compilation pipeline: parse every file, check the whole program, lower
//! it to IR and render C. Each stage only runs when the previous one produced
//! no diagnostics.

use crate::{
    language::{
        ast::NodeIdGen,
        emit::emit_c,
        errors::{CompileError, Diagnostic, Diagnostics},
        ir::IrProgram,
        lower::lower_program,
        parser::parse_module,
        resolve::module_path_for,
        span::Span,
        typecheck::{check_program, CheckedProgram},
        types::{ModulePath, QualName},
    },
    target::BuildOptions,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info_span};

pub const SOURCE_EXTENSION: &str = "kl";

/// One source file. `path` is relative to the source root, so `app/util.kl`
/// is module `util` of package `app`.
#[derive(Clone, Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    pub source: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug)]
pub struct Compilation {
    pub checked: CheckedProgram,
    pub ir: IrProgram,
    pub c_source: String,
}

pub fn compile(files: &[SourceFile], options: &BuildOptions) -> Result<Compilation, CompileError> {
    let checked = check_sources(files)?;

    let entry = match &options.entry_package {
        Some(package) => Some(find_entry(files, &checked, package, &options.entry_function)?),
        None => None,
    };

    let ir = info_span!("pipeline.lower").in_scope(|| lower_program(&checked, entry.as_ref()))?;
    let c_source = info_span!("pipeline.emit", mode = %options.mode).in_scope(|| emit_c(&ir, options.mode))?;
    Ok(Compilation {
        checked,
        ir,
        c_source,
    })
}

/// Runs parsing and checking only.
pub fn check_sources(files: &[SourceFile]) -> Result<CheckedProgram, CompileError> {
    let mut ids = NodeIdGen::new();
    let modules = info_span!("pipeline.parse", files = files.len()).in_scope(|| {
        let mut modules = Vec::with_capacity(files.len());
        let mut diagnostics = Diagnostics::new();
        for file in files {
            match parse_module(file.path.clone(), &file.source, &mut ids) {
                Ok(module) => modules.push(module),
                Err(errors) => diagnostics.extend(
                    errors
                        .errors
                        .into_iter()
                        .map(|error| error.into_diagnostic(&file.path)),
                ),
            }
        }
        if diagnostics.is_empty() {
            Ok(modules)
        } else {
            Err(CompileError::Syntax(diagnostics.into_sorted()))
        }
    })?;

    info_span!("pipeline.check", modules = modules.len()).in_scope(|| {
        let checked = check_program(modules, ids)
            .map_err(|diagnostics| CompileError::Diagnostics(diagnostics.into_sorted()))?;
        debug!(
            functions = checked.functions.len(),
            consts = checked.consts.len(),
            "program checked"
        );
        Ok(checked)
    })
}

/// The entry function lives in the root module of `package`, takes no
/// parameters and is not generic.
fn find_entry(
    files: &[SourceFile],
    checked: &CheckedProgram,
    package: &str,
    function: &str,
) -> Result<QualName, CompileError> {
    let root = ModulePath::root(package);
    let name = root.qualify(function);
    let file = files
        .iter()
        .find(|file| module_path_for(&file.path) == root)
        .map(|file| file.path.clone())
        .unwrap_or_else(|| PathBuf::from(package));

    let diagnostic = match checked.functions.get(&name) {
        Some(entry) if entry.def.params.is_empty() => return Ok(name),
        Some(entry) => Diagnostic::new(
            &entry.file,
            entry.def.span,
            format!("entry function `{name}` must not take parameters"),
        ),
        None => Diagnostic::new(
            &file,
            Span::default(),
            format!("no entry function `{function}` in the root module of package `{package}`"),
        )
        .with_help(format!("add `fn {function}() -> i32 {{ ... }}` to {}", file.display())),
    };
    Err(CompileError::Diagnostics(vec![diagnostic]))
}

/// Collects every `.kl` file below `root`, with paths relative to `root`, in
/// path order.
pub fn load_sources(root: &Path) -> io::Result<Vec<SourceFile>> {
    let mut paths = Vec::new();
    collect_paths(root, &mut paths)?;
    paths.sort();
    paths
        .into_iter()
        .map(|path| {
            let source = fs::read_to_string(&path)?;
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            Ok(SourceFile::new(relative, source))
        })
        .collect()
}

fn collect_paths(dir: &Path, paths: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_paths(&path, paths)?;
        } else if path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION) {
            paths.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::EmitMode;

    fn files(sources: &[(&str, &str)]) -> Vec<SourceFile> {
        sources
            .iter()
            .map(|(path, source)| SourceFile::new(*path, *source))
            .collect()
    }

    #[test]
    fn compiles_a_program_to_c() {
        let sources = files(&[("app/main.kl", "fn main() -> i32 { 40 + 2 }")]);
        let compilation = compile(&sources, &BuildOptions::program("app")).expect("compiles");
        assert!(compilation.ir.entry.is_some());
        assert!(compilation.c_source.contains("int main(void)"));
        assert!(compilation.c_source.contains("kf_app_3a_3amain"));
    }

    #[test]
    fn syntax_errors_stop_the_pipeline() {
        let sources = files(&[
            ("app/main.kl", "fn main() -> i32 { 1 }"),
            ("app/broken.kl", "fn broken( { }"),
        ]);
        let error = compile(&sources, &BuildOptions::program("app")).unwrap_err();
        assert!(matches!(error, CompileError::Syntax(_)), "{error:?}");
        assert!(error
            .diagnostics()
            .iter()
            .all(|diagnostic| diagnostic.path == Path::new("app/broken.kl")));
    }

    #[test]
    fn type_errors_are_reported_in_file_order() {
        let sources = files(&[
            ("app/main.kl", "fn main() -> i32 { true }"),
            ("app/a.kl", "fn f() -> bool { 1 }"),
        ]);
        let error = compile(&sources, &BuildOptions::program("app")).unwrap_err();
        let paths: Vec<&Path> = error
            .diagnostics()
            .iter()
            .map(|diagnostic| diagnostic.path.as_path())
            .collect();
        assert_eq!(paths.first(), Some(&Path::new("app/a.kl")));
        assert_eq!(paths.last(), Some(&Path::new("app/main.kl")));
    }

    #[test]
    fn missing_entry_is_a_diagnostic() {
        let sources = files(&[("app/main.kl", "fn start() -> i32 { 0 }")]);
        let error = compile(&sources, &BuildOptions::program("app")).unwrap_err();
        let diagnostics = error.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("no entry function `main`"));

        let sources = files(&[("app/main.kl", "fn main(x: i32) -> i32 { x }")]);
        let error = compile(&sources, &BuildOptions::program("app")).unwrap_err();
        assert!(error.diagnostics()[0].message.contains("must not take parameters"));
    }

    #[test]
    fn libraries_compile_without_an_entry() {
        let sources = files(&[("lib/util.kl", "pub fn twice(x: i64) -> i64 { x * 2 }")]);
        let compilation = compile(&sources, &BuildOptions::default()).expect("compiles");
        assert!(compilation.ir.entry.is_none());
        assert!(!compilation.c_source.contains("int main(void)"));
    }

    #[test]
    fn tool_mode_reaches_the_emitter() {
        let sources = files(&[("app/main.kl", "fn main() -> i32 { 3 }")]);
        let options = BuildOptions::program("app").with_mode(EmitMode::Tool);
        let compilation = compile(&sources, &options).expect("compiles");
        assert!(compilation.c_source.contains("return (int)((uint64_t)result & 0xFF);"));
    }
}
