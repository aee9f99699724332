//! Module identities, import tables and the visibility rule shared by every
//! later lookup.

use crate::language::{
    ast::{Import, ImportKind, Item, Module, Visibility},
    errors::{Diagnostic, Diagnostics},
    span::Span,
    types::{ModulePath, QualName},
};
use std::{
    collections::{BTreeMap, HashMap},
    path::{Component, Path},
};

const ROOT_FILE_STEMS: [&str; 3] = ["main", "lib", "mod"];

/// Maps `pkg/a/b.kl` to package `pkg`, module `a::b`. `main`, `lib` and `mod`
/// files stand for their directory.
pub fn module_path_for(path: &Path) -> ModulePath {
    let mut parts: Vec<String> = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if let Some(last) = parts.last_mut() {
        if let Some(stem) = Path::new(last.as_str()).file_stem() {
            *last = stem.to_string_lossy().into_owned();
        }
    }
    if parts.len() > 1 && parts.last().is_some_and(|s| ROOT_FILE_STEMS.contains(&s.as_str())) {
        parts.pop();
    }
    let mut parts = parts.into_iter();
    let package = parts.next().unwrap_or_else(|| "main".to_string());
    ModulePath::new(package, parts.collect())
}

/// Whether an entity owned by `owner` with `visibility` can be named from `from`.
pub fn can_access(from: &ModulePath, owner: &ModulePath, visibility: Visibility) -> bool {
    visibility.is_public() || from == owner
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Namespace {
    Function,
    Type,
    Const,
    Trait,
}

impl Namespace {
    fn describe(self) -> &'static str {
        match self {
            Namespace::Function => "function",
            Namespace::Type => "type",
            Namespace::Const => "constant",
            Namespace::Trait => "trait",
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeclInfo {
    pub visibility: Visibility,
    pub span: Span,
}

/// Top-level names a module declares, per namespace.
#[derive(Clone, Debug, Default)]
pub struct ModuleDecls {
    pub functions: BTreeMap<String, DeclInfo>,
    /// Structs, enums and type aliases share one namespace.
    pub types: BTreeMap<String, DeclInfo>,
    pub consts: BTreeMap<String, DeclInfo>,
    pub traits: BTreeMap<String, DeclInfo>,
}

impl ModuleDecls {
    pub fn lookup(&self, namespace: Namespace, name: &str) -> Option<&DeclInfo> {
        match namespace {
            Namespace::Function => self.functions.get(name),
            Namespace::Type => self.types.get(name),
            Namespace::Const => self.consts.get(name),
            Namespace::Trait => self.traits.get(name),
        }
    }

    fn table_mut(&mut self, namespace: Namespace) -> &mut BTreeMap<String, DeclInfo> {
        match namespace {
            Namespace::Function => &mut self.functions,
            Namespace::Type => &mut self.types,
            Namespace::Const => &mut self.consts,
            Namespace::Trait => &mut self.traits,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModuleIndex {
    modules: HashMap<ModulePath, ModuleDecls>,
}

impl ModuleIndex {
    pub fn build<'a>(
        modules: impl IntoIterator<Item = (&'a ModulePath, &'a Module)>,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let mut index = ModuleIndex::default();
        for (module_path, module) in modules {
            let decls = index.modules.entry(module_path.clone()).or_default();
            for item in &module.items {
                let (namespace, name, visibility, span) = match item {
                    Item::Struct(def) => (Namespace::Type, &def.name, def.visibility, def.span),
                    Item::Enum(def) => (Namespace::Type, &def.name, def.visibility, def.span),
                    Item::TypeAlias(def) => (Namespace::Type, &def.name, def.visibility, def.span),
                    Item::Function(def) => {
                        (Namespace::Function, &def.name, def.visibility, def.span)
                    }
                    Item::Const(def) => (Namespace::Const, &def.name, def.visibility, def.span),
                    Item::Trait(def) => (Namespace::Trait, &def.name, def.visibility, def.span),
                    Item::Impl(_) => continue,
                };
                let table = decls.table_mut(namespace);
                if table.contains_key(name) {
                    diagnostics.error(
                        &module.path,
                        span,
                        format!(
                            "duplicate definition of {} `{}` in `{}`",
                            namespace.describe(),
                            name,
                            module_path
                        ),
                    );
                    continue;
                }
                table.insert(name.clone(), DeclInfo { visibility, span });
            }
        }
        index
    }

    pub fn contains(&self, module: &ModulePath) -> bool {
        self.modules.contains_key(module)
    }

    pub fn get(&self, module: &ModulePath) -> Option<&ModuleDecls> {
        self.modules.get(module)
    }

    pub fn lookup(&self, module: &ModulePath, namespace: Namespace, name: &str) -> Option<&DeclInfo> {
        self.modules.get(module)?.lookup(namespace, name)
    }

    /// Resolves written module segments relative to the current package first,
    /// then as an absolute `package::module` path.
    pub fn resolve_module(&self, current: &ModulePath, segments: &[String]) -> Option<ModulePath> {
        if segments.is_empty() {
            return None;
        }
        let relative = ModulePath::new(current.package.clone(), segments.to_vec());
        if self.contains(&relative) {
            return Some(relative);
        }
        let absolute = ModulePath::new(segments[0].clone(), segments[1..].to_vec());
        self.contains(&absolute).then_some(absolute)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportTarget {
    Function(QualName),
    Type(QualName),
}

/// Per-file view of its imports.
#[derive(Clone, Debug, Default)]
pub struct ImportScope {
    pub aliases: HashMap<String, ModulePath>,
    pub names: HashMap<String, ImportTarget>,
}

impl ImportScope {
    pub fn alias(&self, name: &str) -> Option<&ModulePath> {
        self.aliases.get(name)
    }

    pub fn named_function(&self, name: &str) -> Option<&QualName> {
        match self.names.get(name)? {
            ImportTarget::Function(target) => Some(target),
            ImportTarget::Type(_) => None,
        }
    }

    pub fn named_type(&self, name: &str) -> Option<&QualName> {
        match self.names.get(name)? {
            ImportTarget::Type(target) => Some(target),
            ImportTarget::Function(_) => None,
        }
    }

    fn is_bound(&self, local: &str) -> bool {
        self.aliases.contains_key(local) || self.names.contains_key(local)
    }
}

pub fn build_import_scope(
    current: &ModulePath,
    module: &Module,
    index: &ModuleIndex,
    diagnostics: &mut Diagnostics,
) -> ImportScope {
    let mut scope = ImportScope::default();
    for import in &module.imports {
        resolve_import(current, module, import, index, &mut scope, diagnostics);
    }
    scope
}

fn resolve_import(
    current: &ModulePath,
    module: &Module,
    import: &Import,
    index: &ModuleIndex,
    scope: &mut ImportScope,
    diagnostics: &mut Diagnostics,
) {
    let file = module.path.as_path();
    let Some(target) = index.resolve_module(current, &import.path.segments) else {
        diagnostics.error(file, import.span, format!("unknown module `{}`", import.path));
        return;
    };

    match &import.kind {
        ImportKind::Module { alias } => {
            let local = alias
                .clone()
                .or_else(|| import.path.segments.last().cloned())
                .unwrap_or_default();
            if scope.is_bound(&local) {
                diagnostics.error(
                    file,
                    import.span,
                    format!("import alias `{local}` is already defined"),
                );
                return;
            }
            scope.aliases.insert(local, target);
        }
        ImportKind::Named(selectors) => {
            let Some(decls) = index.get(&target) else {
                return;
            };
            for selector in selectors {
                let local = selector.local_name().to_string();
                if scope.is_bound(&local) {
                    diagnostics.error(file, selector.span, format!("duplicate import `{local}`"));
                    continue;
                }
                let function = decls.lookup(Namespace::Function, &selector.name);
                let ty = decls.lookup(Namespace::Type, &selector.name);
                let (binding, info) = match (function, ty) {
                    (Some(_), Some(_)) => {
                        diagnostics.push(
                            Diagnostic::new(
                                file,
                                selector.span,
                                format!(
                                    "`{}` is ambiguous: `{}` has both a function and a type with that name",
                                    selector.name, target
                                ),
                            )
                            .with_help("import the module and qualify the name instead"),
                        );
                        continue;
                    }
                    (Some(info), None) => {
                        (ImportTarget::Function(target.qualify(&selector.name)), info)
                    }
                    (None, Some(info)) => (ImportTarget::Type(target.qualify(&selector.name)), info),
                    (None, None) => {
                        diagnostics.error(
                            file,
                            selector.span,
                            format!("`{}` has no function or type named `{}`", target, selector.name),
                        );
                        continue;
                    }
                };
                if !can_access(current, &target, info.visibility) {
                    diagnostics.error(
                        file,
                        selector.span,
                        format!("`{}` is private to `{}`", selector.name, target),
                    );
                    continue;
                }
                scope.names.insert(local, binding);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{ast::NodeIdGen, parser::parse_module};
    use std::path::PathBuf;

    fn modules(files: &[(&str, &str)]) -> Vec<(ModulePath, Module)> {
        let mut ids = NodeIdGen::new();
        files
            .iter()
            .map(|(path, source)| {
                let module = parse_module(PathBuf::from(path), source, &mut ids).expect("parse");
                (module_path_for(Path::new(path)), module)
            })
            .collect()
    }

    fn scope_for(files: &[(&str, &str)], which: usize) -> (ImportScope, Vec<String>) {
        let parsed = modules(files);
        let mut diagnostics = Diagnostics::new();
        let index = ModuleIndex::build(parsed.iter().map(|(p, m)| (p, m)), &mut diagnostics);
        let (path, module) = &parsed[which];
        let scope = build_import_scope(path, module, &index, &mut diagnostics);
        let messages = diagnostics
            .into_sorted()
            .into_iter()
            .map(|d| d.message)
            .collect();
        (scope, messages)
    }

    #[test]
    fn maps_files_to_modules() {
        assert_eq!(module_path_for(Path::new("app/main.kl")), ModulePath::root("app"));
        assert_eq!(module_path_for(Path::new("app/lib.kl")), ModulePath::root("app"));
        assert_eq!(
            module_path_for(Path::new("app/geo/shapes.kl")),
            ModulePath::new("app", vec!["geo".into(), "shapes".into()])
        );
        assert_eq!(
            module_path_for(Path::new("app/geo/mod.kl")),
            ModulePath::new("app", vec!["geo".into()])
        );
    }

    #[test]
    fn visibility_allows_owner_or_public() {
        let a = ModulePath::new("app", vec!["a".into()]);
        let b = ModulePath::new("app", vec!["b".into()]);
        assert!(can_access(&a, &a, Visibility::Private));
        assert!(!can_access(&b, &a, Visibility::Private));
        assert!(can_access(&b, &a, Visibility::Public));
    }

    #[test]
    fn binds_aliases_and_named_imports() {
        let (scope, errors) = scope_for(
            &[
                (
                    "app/main.kl",
                    "import geo;\nimport geo as g;\nimport geo::{Point, area as size};\nfn main() {}",
                ),
                ("app/geo.kl", "pub struct Point { x: i32 }\npub fn area() -> i32 { 0 }"),
            ],
            0,
        );
        assert!(errors.is_empty(), "{errors:?}");
        let geo = ModulePath::new("app", vec!["geo".into()]);
        assert_eq!(scope.alias("geo"), Some(&geo));
        assert_eq!(scope.alias("g"), Some(&geo));
        assert_eq!(scope.named_type("Point"), Some(&geo.qualify("Point")));
        assert_eq!(scope.named_function("size"), Some(&geo.qualify("area")));
    }

    #[test]
    fn resolves_other_packages_absolutely() {
        let (scope, errors) = scope_for(
            &[
                ("app/main.kl", "import util::text;\nfn main() {}"),
                ("util/text.kl", "pub fn upper() {}"),
            ],
            0,
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(
            scope.alias("text"),
            Some(&ModulePath::new("util", vec!["text".into()]))
        );
    }

    #[test]
    fn reports_bad_imports_and_drops_bindings() {
        let (scope, errors) = scope_for(
            &[
                (
                    "app/main.kl",
                    "import missing;\nimport geo;\nimport shapes as geo;\nimport geo::{Both, hidden, nothing};\nfn main() {}",
                ),
                (
                    "app/geo.kl",
                    "pub struct Both { x: i32 }\npub fn Both() {}\nfn hidden() {}",
                ),
                ("app/shapes.kl", "pub fn f() {}"),
            ],
            0,
        );
        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors[0].contains("unknown module `missing`"));
        assert!(errors[1].contains("import alias `geo` is already defined"));
        assert!(errors[2].contains("ambiguous"));
        assert!(errors[3].contains("`hidden` is private"));
        assert!(errors[4].contains("no function or type named `nothing`"));
        assert!(scope.names.is_empty());
    }

    #[test]
    fn duplicate_definitions_are_reported() {
        let parsed = modules(&[("app/main.kl", "struct A {}\nenum A { X }\nfn f() {}\nfn f() {}")]);
        let mut diagnostics = Diagnostics::new();
        ModuleIndex::build(parsed.iter().map(|(p, m)| (p, m)), &mut diagnostics);
        assert_eq!(diagnostics.len(), 2);
    }
}
