use super::{
    consts::{type_admits, ConstState},
    generics::Instantiation,
    CheckedConst, CheckedFunction, CheckedProgram, FieldSig, FunctionSig, ParamSig, Resolutions,
    SignatureTables, StructSig,
};
use crate::language::{
    ast::*,
    errors::{Diagnostic, Diagnostics},
    parser::parse_module,
    prelude::{prelude_path, PRELUDE_MODULE, PRELUDE_PACKAGE, PRELUDE_SOURCE},
    resolve::{
        build_import_scope, can_access, module_path_for, ImportScope, ModuleIndex, Namespace,
    },
    span::Span,
    types::{IntKind, ModulePath, Mutability, QualName, Type, TypeAnnotation, TypeExpr},
};
use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
    rc::Rc,
};
use tracing::debug;

/// Checks every module and returns the concrete, monomorphized program, or every
/// diagnostic found.
pub fn check_program(modules: Vec<Module>, ids: NodeIdGen) -> Result<CheckedProgram, Diagnostics> {
    let mut checker = Checker::new(ids);
    checker.run(modules);
    checker.finish()
}

pub(super) struct ModuleCtx {
    pub path: ModulePath,
    pub file: PathBuf,
    pub imports: ImportScope,
}

pub(super) type ModuleRef = Rc<ModuleCtx>;

#[derive(Clone)]
pub(super) struct FunctionDecl {
    pub module: ModuleRef,
    pub def: FunctionDef,
    /// Target of the enclosing `impl` block, bound to `Self`.
    pub self_type: Option<Type>,
}

#[derive(Clone)]
pub(super) struct StructDecl {
    pub module: ModuleRef,
    pub def: StructDef,
}

#[derive(Clone)]
pub(super) struct EnumDecl {
    pub module: ModuleRef,
    pub def: EnumDef,
}

#[derive(Clone)]
pub(super) struct AliasDecl {
    pub module: ModuleRef,
    pub def: TypeAliasDef,
}

#[derive(Clone)]
pub(super) struct ConstDecl {
    pub module: ModuleRef,
    pub def: ConstDef,
}

#[derive(Clone)]
pub(super) struct TraitDecl {
    pub module: ModuleRef,
    pub def: TraitDef,
}

struct ImplDecl {
    module: ModuleRef,
    block: ImplBlock,
}

enum AliasState {
    InProgress,
    Done(Type),
}

pub(super) enum Lookup {
    Found(QualName),
    Private(QualName),
    UnknownModule(String),
    Missing,
}

/// What a path in expression position names when it names a type.
pub(super) enum TypeRef {
    Concrete(Type),
    GenericStruct(QualName),
    GenericEnum(QualName),
}

#[derive(Clone)]
pub(super) struct Local {
    pub ty: Type,
    pub mutability: Mutability,
}

pub(super) struct FnEnv {
    pub module: ModuleRef,
    pub ret: Type,
    pub type_env: HashMap<String, Type>,
    pub loop_depth: usize,
    scopes: Vec<HashMap<String, Local>>,
}

impl FnEnv {
    fn new(module: ModuleRef, ret: Type, type_env: HashMap<String, Type>) -> Self {
        Self {
            module,
            ret,
            type_env,
            loop_depth: 0,
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        if self.scopes.is_empty() {
            self.scopes.push(HashMap::new());
        }
    }

    pub fn declare(&mut self, name: &str, ty: Type, mutability: Mutability) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), Local { ty, mutability });
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Local> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn file(&self) -> &Path {
        &self.module.file
    }
}

pub(super) struct Checker {
    pub(super) index: ModuleIndex,
    pub(super) function_decls: HashMap<QualName, FunctionDecl>,
    pub(super) struct_decls: HashMap<QualName, StructDecl>,
    pub(super) enum_decls: HashMap<QualName, EnumDecl>,
    pub(super) alias_decls: HashMap<QualName, AliasDecl>,
    pub(super) const_decls: HashMap<QualName, ConstDecl>,
    pub(super) trait_decls: HashMap<QualName, TraitDecl>,
    alias_state: HashMap<QualName, AliasState>,
    pub(super) const_state: HashMap<QualName, ConstState>,
    pub(super) signatures: SignatureTables,
    pub(super) resolutions: Resolutions,
    pub(super) diagnostics: Diagnostics,
    pub(super) ids: NodeIdGen,
    pub(super) worklist: VecDeque<Instantiation>,
    /// Nominal instantiations whose fields are being resolved.
    pub(super) in_progress: HashSet<QualName>,
    /// Instantiations of generic types over type parameters; used only to match
    /// signatures, never laid out.
    pub(super) type_patterns: HashMap<QualName, (QualName, Vec<Type>)>,
    pub(super) type_depth: usize,
    pub(super) current_depth: usize,
    checked: BTreeMap<QualName, CheckedFunction>,
}

impl Checker {
    fn new(ids: NodeIdGen) -> Self {
        Self {
            index: ModuleIndex::default(),
            function_decls: HashMap::new(),
            struct_decls: HashMap::new(),
            enum_decls: HashMap::new(),
            alias_decls: HashMap::new(),
            const_decls: HashMap::new(),
            trait_decls: HashMap::new(),
            alias_state: HashMap::new(),
            const_state: HashMap::new(),
            signatures: SignatureTables::default(),
            resolutions: Resolutions::default(),
            diagnostics: Diagnostics::new(),
            ids,
            worklist: VecDeque::new(),
            in_progress: HashSet::new(),
            type_patterns: HashMap::new(),
            type_depth: 0,
            current_depth: 0,
            checked: BTreeMap::new(),
        }
    }

    fn run(&mut self, mut modules: Vec<Module>) {
        match parse_module(prelude_path(), PRELUDE_SOURCE, &mut self.ids) {
            Ok(prelude) => modules.push(prelude),
            Err(errors) => {
                for error in errors.errors {
                    self.diagnostics.push(error.into_diagnostic(&prelude_path()));
                }
            }
        }

        let paths: Vec<ModulePath> = modules.iter().map(|m| module_path_for(&m.path)).collect();
        self.index = ModuleIndex::build(paths.iter().zip(modules.iter()), &mut self.diagnostics);

        let mut impls = Vec::new();
        for (path, module) in paths.into_iter().zip(modules) {
            let imports = build_import_scope(&path, &module, &self.index, &mut self.diagnostics);
            let ctx = Rc::new(ModuleCtx {
                path,
                file: module.path.clone(),
                imports,
            });
            self.collect_items(&ctx, module.items, &mut impls);
        }
        if self.phase_failed("resolve") {
            return;
        }

        self.collect_signatures();
        self.collect_impls(impls);
        if self.phase_failed("signatures") {
            return;
        }

        self.evaluate_consts();
        if self.phase_failed("consts") {
            return;
        }

        self.check_bodies();
        self.drain_instantiations();
    }

    /// Later phases only run over a program the earlier ones accepted.
    fn phase_failed(&self, phase: &str) -> bool {
        if self.diagnostics.is_empty() {
            return false;
        }
        debug!(phase, errors = self.diagnostics.len(), "stopping after failed phase");
        true
    }

    fn finish(self) -> Result<CheckedProgram, Diagnostics> {
        if !self.diagnostics.is_empty() {
            return Err(self.diagnostics);
        }
        let consts = self
            .const_state
            .into_iter()
            .filter_map(|(name, state)| match state {
                ConstState::Done(ty, value) => Some((
                    name.clone(),
                    CheckedConst {
                        name,
                        ty,
                        value,
                    },
                )),
                ConstState::InProgress => None,
            })
            .collect();
        Ok(CheckedProgram {
            functions: self.checked,
            signatures: self.signatures,
            consts,
            resolutions: self.resolutions,
        })
    }

    pub(super) fn error(&mut self, file: &Path, span: Span, message: impl Into<String>) {
        self.diagnostics.error(file, span, message);
    }

    pub(super) fn error_with_help(
        &mut self,
        file: &Path,
        span: Span,
        message: impl Into<String>,
        help: impl Into<String>,
    ) {
        self.diagnostics
            .push(Diagnostic::new(file, span, message).with_help(help));
    }

    fn collect_items(&mut self, ctx: &ModuleRef, items: Vec<Item>, impls: &mut Vec<ImplDecl>) {
        for item in items {
            match item {
                Item::Function(def) => {
                    let name = ctx.path.qualify(&def.name);
                    self.function_decls.entry(name).or_insert(FunctionDecl {
                        module: ctx.clone(),
                        def,
                        self_type: None,
                    });
                }
                Item::Struct(def) => {
                    let name = ctx.path.qualify(&def.name);
                    if self.enum_decls.contains_key(&name) || self.alias_decls.contains_key(&name) {
                        continue;
                    }
                    self.struct_decls.entry(name).or_insert(StructDecl {
                        module: ctx.clone(),
                        def,
                    });
                }
                Item::Enum(def) => {
                    let name = ctx.path.qualify(&def.name);
                    if self.struct_decls.contains_key(&name) || self.alias_decls.contains_key(&name) {
                        continue;
                    }
                    self.enum_decls.entry(name).or_insert(EnumDecl {
                        module: ctx.clone(),
                        def,
                    });
                }
                Item::TypeAlias(def) => {
                    let name = ctx.path.qualify(&def.name);
                    if self.struct_decls.contains_key(&name) || self.enum_decls.contains_key(&name) {
                        continue;
                    }
                    self.alias_decls.entry(name).or_insert(AliasDecl {
                        module: ctx.clone(),
                        def,
                    });
                }
                Item::Const(def) => {
                    let name = ctx.path.qualify(&def.name);
                    self.const_decls.entry(name).or_insert(ConstDecl {
                        module: ctx.clone(),
                        def,
                    });
                }
                Item::Trait(def) => {
                    let name = ctx.path.qualify(&def.name);
                    self.trait_decls.entry(name).or_insert(TraitDecl {
                        module: ctx.clone(),
                        def,
                    });
                }
                Item::Impl(block) => impls.push(ImplDecl {
                    module: ctx.clone(),
                    block,
                }),
            }
        }
    }

    fn collect_signatures(&mut self) {
        let mut structs: Vec<QualName> = self
            .struct_decls
            .iter()
            .filter(|(_, decl)| decl.def.type_params.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        structs.sort();
        for name in structs {
            self.build_struct_sig(&name, name.clone(), &HashMap::new(), None);
        }

        let mut enums: Vec<QualName> = self
            .enum_decls
            .iter()
            .filter(|(_, decl)| decl.def.type_params.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        enums.sort();
        for name in enums {
            self.build_enum_sig(&name, name.clone(), &HashMap::new(), None);
        }

        let mut functions: Vec<QualName> = self
            .function_decls
            .iter()
            .filter(|(_, decl)| decl.def.type_params.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        functions.sort();
        for name in functions {
            self.build_function_sig(&name);
        }
    }

    pub(super) fn build_struct_sig(
        &mut self,
        decl_name: &QualName,
        sig_name: QualName,
        env: &HashMap<String, Type>,
        generic: Option<(QualName, Vec<Type>)>,
    ) {
        let Some(decl) = self.struct_decls.get(decl_name).cloned() else {
            return;
        };
        let mut fields = Vec::new();
        let mut seen = HashSet::new();
        for field in &decl.def.fields {
            if !seen.insert(field.name.clone()) {
                self.error(
                    &decl.module.file,
                    field.span,
                    format!("field `{}` is declared more than once", field.name),
                );
                continue;
            }
            let ty = self.resolve_type(&decl.module, &field.ty, env);
            fields.push(FieldSig {
                name: field.name.clone(),
                ty,
                visibility: field.visibility,
            });
        }
        let (generic_base, type_args) = generic.unzip();
        self.signatures.structs.insert(
            sig_name.clone(),
            StructSig {
                name: sig_name,
                fields,
                owner: decl.module.path.clone(),
                visibility: decl.def.visibility,
                generic_base,
                type_args: type_args.unwrap_or_default(),
            },
        );
    }

    pub(super) fn build_enum_sig(
        &mut self,
        decl_name: &QualName,
        sig_name: QualName,
        env: &HashMap<String, Type>,
        generic: Option<(QualName, Vec<Type>)>,
    ) {
        let Some(decl) = self.enum_decls.get(decl_name).cloned() else {
            return;
        };
        let mut variants = Vec::new();
        let mut index = HashMap::new();
        for variant in &decl.def.variants {
            if index.contains_key(&variant.name) {
                self.error(
                    &decl.module.file,
                    variant.span,
                    format!("variant `{}` is declared more than once", variant.name),
                );
                continue;
            }
            if variant.fields.len() > 1 {
                self.error_with_help(
                    &decl.module.file,
                    variant.span,
                    format!(
                        "variant `{}` declares {} payload types; variants carry at most one value",
                        variant.name,
                        variant.fields.len()
                    ),
                    "wrap the values in a struct",
                );
            }
            let payload = variant
                .fields
                .first()
                .map(|ann| self.resolve_type(&decl.module, ann, env));
            index.insert(variant.name.clone(), variants.len());
            variants.push(super::VariantSig {
                name: variant.name.clone(),
                payload,
            });
        }
        let (generic_base, type_args) = generic.unzip();
        self.signatures.enums.insert(
            sig_name.clone(),
            super::EnumSig {
                name: sig_name,
                variants,
                index,
                owner: decl.module.path.clone(),
                visibility: decl.def.visibility,
                generic_base,
                type_args: type_args.unwrap_or_default(),
            },
        );
    }

    pub(super) fn build_function_sig(&mut self, name: &QualName) -> Option<FunctionSig> {
        let decl = self.function_decls.get(name).cloned()?;
        let mut env = HashMap::new();
        if let Some(self_type) = &decl.self_type {
            env.insert("Self".to_string(), self_type.clone());
        }
        let mut params = Vec::new();
        let mut seen = HashSet::new();
        for param in &decl.def.params {
            if !seen.insert(param.name.clone()) {
                self.error(
                    &decl.module.file,
                    param.span,
                    format!("parameter `{}` is declared more than once", param.name),
                );
            }
            let ty = self.resolve_type(&decl.module, &param.ty, &env);
            params.push(ParamSig {
                name: param.name.clone(),
                ty,
                mutability: param.mutability,
            });
        }
        let ret = match &decl.def.ret {
            Some(ann) => self.resolve_type(&decl.module, ann, &env),
            None => Type::Unit,
        };
        let sig = FunctionSig {
            name: name.clone(),
            params,
            ret,
            owner: decl.module.path.clone(),
            visibility: decl.def.visibility,
            span: decl.def.span,
        };
        self.signatures.functions.insert(name.clone(), sig.clone());
        Some(sig)
    }

    fn collect_impls(&mut self, impls: Vec<ImplDecl>) {
        for imp in impls {
            let target = self.resolve_type(&imp.module, &imp.block.target, &HashMap::new());
            let type_name = match &target {
                Type::Poison => continue,
                Type::Struct(q) | Type::Enum(q) if q.module == imp.module.path => {
                    let generic = self
                        .signatures
                        .structs
                        .get(q)
                        .map(|sig| sig.generic_base.is_some())
                        .or_else(|| self.signatures.enums.get(q).map(|sig| sig.generic_base.is_some()))
                        .unwrap_or(false);
                    if generic {
                        self.error(
                            &imp.module.file,
                            imp.block.target.span,
                            "impl blocks for instantiated generic types are not supported",
                        );
                        continue;
                    }
                    q.name.clone()
                }
                other => {
                    self.error(
                        &imp.module.file,
                        imp.block.target.span,
                        format!(
                            "impl blocks must target a struct or enum declared in this module, found `{other}`"
                        ),
                    );
                    continue;
                }
            };

            let mut method_names = Vec::new();
            for method in imp.block.methods {
                if !method.type_params.is_empty() {
                    self.error(
                        &imp.module.file,
                        method.span,
                        format!("method `{}` cannot declare type parameters", method.name),
                    );
                    continue;
                }
                let qual = imp
                    .module
                    .path
                    .qualify(format!("{}.{}", type_name, method.name));
                if self.function_decls.contains_key(&qual) {
                    self.error(
                        &imp.module.file,
                        method.span,
                        format!("duplicate method `{}` for `{}`", method.name, type_name),
                    );
                    continue;
                }
                method_names.push((method.name.clone(), method.span));
                self.function_decls.insert(
                    qual.clone(),
                    FunctionDecl {
                        module: imp.module.clone(),
                        def: method,
                        self_type: Some(target.clone()),
                    },
                );
                self.build_function_sig(&qual);
            }

            if let Some(trait_expr) = &imp.block.trait_name {
                self.check_trait_impl(&imp.module, trait_expr, &target, &type_name, &method_names, imp.block.span);
            }
        }
    }

    fn check_trait_impl(
        &mut self,
        module: &ModuleRef,
        trait_expr: &TypeExpr,
        target: &Type,
        type_name: &str,
        methods: &[(String, Span)],
        span: Span,
    ) {
        let TypeExpr::Named { path, .. } = trait_expr else {
            self.error(&module.file, span, "expected a trait name");
            return;
        };
        let lookup = self.lookup_name(module, path, Namespace::Trait, false);
        let Some(trait_name) = self.report_lookup(&module.file, span, lookup, "trait", &path.join("::")) else {
            return;
        };
        let Some(decl) = self.trait_decls.get(&trait_name).cloned() else {
            return;
        };
        let env = HashMap::from([("Self".to_string(), target.clone())]);
        let mut required = HashSet::new();
        for method in &decl.def.methods {
            required.insert(method.name.clone());
            let qual = module.path.qualify(format!("{}.{}", type_name, method.name));
            let Some(actual) = self.signatures.functions.get(&qual).cloned() else {
                self.error(
                    &module.file,
                    span,
                    format!(
                        "missing method `{}` required by trait `{}`",
                        method.name, decl.def.name
                    ),
                );
                continue;
            };
            let params: Vec<Type> = method
                .params
                .iter()
                .map(|param| self.resolve_type(&decl.module, &param.ty, &env))
                .collect();
            let ret = match &method.ret {
                Some(ann) => self.resolve_type(&decl.module, ann, &env),
                None => Type::Unit,
            };
            let matches = params.len() == actual.params.len()
                && params
                    .iter()
                    .zip(&actual.params)
                    .all(|(expected, found)| *expected == found.ty)
                && ret == actual.ret;
            if !matches {
                let rendered: Vec<String> = params.iter().map(ToString::to_string).collect();
                self.error(
                    &module.file,
                    actual.span,
                    format!(
                        "method `{}` does not match trait `{}`: expected `fn({}) -> {}`",
                        method.name,
                        decl.def.name,
                        rendered.join(", "),
                        ret
                    ),
                );
            }
        }
        for (name, method_span) in methods {
            if !required.contains(name) {
                self.error(
                    &module.file,
                    *method_span,
                    format!("method `{}` is not a member of trait `{}`", name, decl.def.name),
                );
            }
        }
    }

    fn evaluate_consts(&mut self) {
        let mut names: Vec<QualName> = self.const_decls.keys().cloned().collect();
        names.sort();
        for name in names {
            self.const_value(&name, None);
        }
    }

    fn check_bodies(&mut self) {
        let mut names: Vec<QualName> = self
            .function_decls
            .iter()
            .filter(|(_, decl)| decl.def.type_params.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        self.current_depth = 0;
        for name in names {
            self.check_function(&name);
        }
    }

    fn drain_instantiations(&mut self) {
        while let Some(item) = self.worklist.pop_front() {
            self.current_depth = item.depth;
            self.check_function(&item.name);
        }
    }

    fn check_function(&mut self, name: &QualName) {
        let Some(decl) = self.function_decls.get(name).cloned() else {
            return;
        };
        let Some(sig) = self.signatures.functions.get(name).cloned() else {
            return;
        };
        let mut type_env = HashMap::new();
        if let Some(self_type) = &decl.self_type {
            type_env.insert("Self".to_string(), self_type.clone());
        }
        let mut env = FnEnv::new(decl.module.clone(), sig.ret.clone(), type_env);
        for param in &sig.params {
            env.declare(&param.name, param.ty.clone(), param.mutability);
        }

        let body_ty = self.check_block(&mut env, &decl.def.body, Some(&sig.ret));
        match &decl.def.body.tail {
            Some(tail) => {
                self.expect_type(&decl.module.file, tail, &body_ty, &sig.ret);
            }
            None => {
                if !matches!(sig.ret, Type::Unit | Type::Poison) && !block_diverges(&decl.def.body) {
                    self.error_with_help(
                        &decl.module.file,
                        decl.def.span,
                        format!(
                            "function `{}` must return a value of type `{}`",
                            decl.def.name, sig.ret
                        ),
                        "end the body with a tail expression or a `return`",
                    );
                }
            }
        }

        debug!(function = %name, depth = self.current_depth, "checked function");
        self.checked.insert(
            name.clone(),
            CheckedFunction {
                name: name.clone(),
                module: decl.module.path.clone(),
                file: decl.module.file.clone(),
                def: decl.def,
            },
        );
    }

    // ----- name and type resolution -------------------------------------------------

    pub(super) fn resolve_qualifier(&self, module: &ModuleCtx, segments: &[String]) -> Option<ModulePath> {
        let (first, rest) = segments.split_first()?;
        if let Some(aliased) = module.imports.alias(first) {
            let mut target = aliased.clone();
            for segment in rest {
                target = target.child(segment.clone());
            }
            return self.index.contains(&target).then_some(target);
        }
        self.index.resolve_module(&module.path, segments)
    }

    /// Current module, named imports, then the package root module; the prelude
    /// last when `include_prelude` is set.
    pub(super) fn lookup_name(
        &self,
        module: &ModuleCtx,
        path: &[String],
        namespace: Namespace,
        include_prelude: bool,
    ) -> Lookup {
        let Some((name, qualifier)) = path.split_last() else {
            return Lookup::Missing;
        };
        if !qualifier.is_empty() {
            let Some(target) = self.resolve_qualifier(module, qualifier) else {
                return Lookup::UnknownModule(qualifier.join("::"));
            };
            return match self.index.lookup(&target, namespace, name) {
                Some(info) if can_access(&module.path, &target, info.visibility) => {
                    Lookup::Found(target.qualify(name))
                }
                Some(_) => Lookup::Private(target.qualify(name)),
                None => Lookup::Missing,
            };
        }

        if self.index.lookup(&module.path, namespace, name).is_some() {
            return Lookup::Found(module.path.qualify(name));
        }
        let imported = match namespace {
            Namespace::Function => module.imports.named_function(name),
            Namespace::Type => module.imports.named_type(name),
            Namespace::Const | Namespace::Trait => None,
        };
        if let Some(target) = imported {
            return Lookup::Found(target.clone());
        }
        let mut private = None;
        let root = module.path.package_root();
        if root != module.path {
            if let Some(info) = self.index.lookup(&root, namespace, name) {
                if can_access(&module.path, &root, info.visibility) {
                    return Lookup::Found(root.qualify(name));
                }
                private = Some(root.qualify(name));
            }
        }
        if include_prelude {
            if let Some(found) = self.lookup_prelude(namespace, name) {
                return Lookup::Found(found);
            }
        }
        match private {
            Some(name) => Lookup::Private(name),
            None => Lookup::Missing,
        }
    }

    pub(super) fn lookup_prelude(&self, namespace: Namespace, name: &str) -> Option<QualName> {
        let prelude = ModulePath::new(PRELUDE_PACKAGE, vec![PRELUDE_MODULE.to_string()]);
        let info = self.index.lookup(&prelude, namespace, name)?;
        info.visibility.is_public().then(|| prelude.qualify(name))
    }

    pub(super) fn report_lookup(
        &mut self,
        file: &Path,
        span: Span,
        lookup: Lookup,
        kind: &str,
        written: &str,
    ) -> Option<QualName> {
        match lookup {
            Lookup::Found(name) => Some(name),
            Lookup::Private(name) => {
                self.error(
                    file,
                    span,
                    format!("{kind} `{}` is private to `{}`", name.name, name.module),
                );
                None
            }
            Lookup::UnknownModule(module) => {
                self.error(file, span, format!("unknown module `{module}`"));
                None
            }
            Lookup::Missing => {
                self.error(file, span, format!("cannot find {kind} `{written}` in this scope"));
                None
            }
        }
    }

    pub(super) fn resolve_type(
        &mut self,
        module: &ModuleRef,
        ann: &TypeAnnotation,
        env: &HashMap<String, Type>,
    ) -> Type {
        match &ann.ty {
            TypeExpr::Unit => Type::Unit,
            TypeExpr::Resolved(ty) => ty.clone(),
            TypeExpr::Range { base, min, max } => {
                let kind = match self.resolve_type(module, base, env) {
                    Type::Int(kind) => kind,
                    Type::Poison => return Type::Poison,
                    other => {
                        self.error(
                            &module.file,
                            ann.span,
                            format!("range types need an integer base type, found `{other}`"),
                        );
                        return Type::Poison;
                    }
                };
                let base_ty = Type::Int(kind);
                let (_, low) = self.eval_const_expr(module, min, Some(&base_ty));
                let (_, high) = self.eval_const_expr(module, max, Some(&base_ty));
                match (low, high) {
                    (super::ConstValue::Int(min), super::ConstValue::Int(max)) => {
                        if min > max {
                            self.error(
                                &module.file,
                                ann.span,
                                format!("range type `{kind}[{min}..={max}]` is empty"),
                            );
                            return Type::Poison;
                        }
                        Type::Range {
                            base: kind,
                            min,
                            max,
                        }
                    }
                    _ => Type::Poison,
                }
            }
            TypeExpr::Named { path, args } => {
                self.resolve_named_type(module, path, args, env, ann.span)
            }
        }
    }

    fn resolve_named_type(
        &mut self,
        module: &ModuleRef,
        path: &[String],
        args: &[TypeAnnotation],
        env: &HashMap<String, Type>,
        span: Span,
    ) -> Type {
        if let [name] = path {
            if args.is_empty() {
                if let Some(ty) = env.get(name) {
                    return ty.clone();
                }
                if let Some(kind) = IntKind::from_name(name) {
                    return Type::Int(kind);
                }
                match name.as_str() {
                    "bool" => return Type::Bool,
                    "string" => return Type::Str,
                    "unit" => return Type::Unit,
                    _ => {}
                }
            }
            if name == "List" {
                if args.len() != 1 {
                    self.error(&module.file, span, "`List` takes exactly one type argument");
                    return Type::Poison;
                }
                let elem = self.resolve_type(module, &args[0], env);
                if elem.is_poison() {
                    return Type::Poison;
                }
                return Type::List(Box::new(elem));
            }
        }

        let resolved: Vec<Type> = args
            .iter()
            .map(|arg| self.resolve_type(module, arg, env))
            .collect();
        let lookup = self.lookup_name(module, path, Namespace::Type, true);
        let Some(name) = self.report_lookup(&module.file, span, lookup, "type", &path.join("::")) else {
            return Type::Poison;
        };
        self.nominal_type(&name, resolved, &module.file, span)
    }

    /// The type a declared nominal name denotes once given `args`.
    pub(super) fn nominal_type(&mut self, name: &QualName, args: Vec<Type>, file: &Path, span: Span) -> Type {
        if self.alias_decls.contains_key(name) {
            if !args.is_empty() {
                self.error(file, span, format!("type alias `{}` takes no type arguments", name.name));
                return Type::Poison;
            }
            return self.alias_type(name);
        }
        let params = self.nominal_params(name);
        let Some(params) = params else {
            return Type::Poison;
        };
        if params.is_empty() {
            if !args.is_empty() {
                self.error(file, span, format!("type `{}` is not generic", name.name));
                return Type::Poison;
            }
            return if self.enum_decls.contains_key(name) {
                Type::Enum(name.clone())
            } else {
                Type::Struct(name.clone())
            };
        }
        if args.is_empty() {
            self.error_with_help(
                file,
                span,
                format!("missing type arguments for `{}`", name.name),
                format!("write `{}[{}]`", name.name, params.join(", ")),
            );
            return Type::Poison;
        }
        self.instantiate_nominal(name, args, file, span)
    }

    pub(super) fn nominal_params(&self, name: &QualName) -> Option<Vec<String>> {
        if let Some(decl) = self.struct_decls.get(name) {
            return Some(decl.def.type_params.clone());
        }
        self.enum_decls
            .get(name)
            .map(|decl| decl.def.type_params.clone())
    }

    fn alias_type(&mut self, name: &QualName) -> Type {
        match self.alias_state.get(name) {
            Some(AliasState::Done(ty)) => return ty.clone(),
            Some(AliasState::InProgress) => {
                if let Some(decl) = self.alias_decls.get(name).cloned() {
                    self.error(
                        &decl.module.file,
                        decl.def.span,
                        format!("type alias `{}` refers to itself", decl.def.name),
                    );
                }
                return Type::Poison;
            }
            None => {}
        }
        let Some(decl) = self.alias_decls.get(name).cloned() else {
            return Type::Poison;
        };
        self.alias_state.insert(name.clone(), AliasState::InProgress);
        let ty = self.resolve_type(&decl.module, &decl.def.ty, &HashMap::new());
        self.alias_state.insert(name.clone(), AliasState::Done(ty.clone()));
        ty
    }

    /// Resolves a path in expression position as a type, if it names one.
    pub(super) fn resolve_type_path(&mut self, env: &FnEnv, path: &PathExpr, span: Span) -> Option<TypeRef> {
        if path.is_simple() && path.type_args.is_empty() {
            if let Some(ty) = env.type_env.get(path.last()) {
                return Some(TypeRef::Concrete(ty.clone()));
            }
        }
        let name = match self.lookup_name(&env.module, &path.segments, Namespace::Type, true) {
            Lookup::Found(name) => name,
            Lookup::Private(name) => {
                self.error(
                    env.file(),
                    span,
                    format!("type `{}` is private to `{}`", name.name, name.module),
                );
                return Some(TypeRef::Concrete(Type::Poison));
            }
            Lookup::UnknownModule(_) | Lookup::Missing => return None,
        };
        let generic = self
            .nominal_params(&name)
            .is_some_and(|params| !params.is_empty());
        if generic && path.type_args.is_empty() {
            return Some(if self.enum_decls.contains_key(&name) {
                TypeRef::GenericEnum(name)
            } else {
                TypeRef::GenericStruct(name)
            });
        }
        let module = env.module.clone();
        let args: Vec<Type> = path
            .type_args
            .iter()
            .map(|arg| self.resolve_type(&module, arg, &env.type_env))
            .collect();
        Some(TypeRef::Concrete(self.nominal_type(&name, args, env.file(), span)))
    }

    // ----- statements ---------------------------------------------------------------

    pub(super) fn check_block(&mut self, env: &mut FnEnv, block: &Block, expected: Option<&Type>) -> Type {
        env.push_scope();
        for stmt in &block.statements {
            self.check_statement(env, stmt);
        }
        let ty = match &block.tail {
            Some(tail) => self.check_expression(env, tail, expected),
            None => Type::Unit,
        };
        env.pop_scope();
        ty
    }

    fn check_statement(&mut self, env: &mut FnEnv, stmt: &Statement) {
        match stmt {
            Statement::Let(let_stmt) => self.check_let(env, let_stmt),
            Statement::Assign(assign) => {
                let Some(local) = env.lookup(&assign.target).cloned() else {
                    self.error(
                        env.file(),
                        assign.span,
                        format!("cannot find variable `{}` in this scope", assign.target),
                    );
                    self.check_discarded(env, &assign.value);
                    return;
                };
                if !local.mutability.is_mutable() {
                    self.error_with_help(
                        env.file(),
                        assign.span,
                        format!("cannot assign twice to immutable variable `{}`", assign.target),
                        format!("declare it with `let mut {}`", assign.target),
                    );
                }
                let ty = self.check_expression(env, &assign.value, Some(&local.ty));
                self.expect_type(&env.module.file, &assign.value, &ty, &local.ty);
            }
            Statement::FieldAssign(assign) => self.check_field_assign(env, assign),
            Statement::Expr(expr) => self.check_discarded(env, expr),
            Statement::Return(ret) => {
                let expected = env.ret.clone();
                match &ret.value {
                    Some(value) => {
                        let ty = self.check_expression(env, value, Some(&expected));
                        self.expect_type(&env.module.file, value, &ty, &expected);
                    }
                    None => {
                        if !matches!(expected, Type::Unit | Type::Poison) {
                            self.error(
                                env.file(),
                                ret.span,
                                format!("missing return value: expected `{expected}`"),
                            );
                        }
                    }
                }
            }
            Statement::If(if_expr) => {
                self.check_if(env, if_expr, None);
                self.coerce_if(&env.module.file.clone(), if_expr, &Type::Int(IntKind::I64));
            }
            Statement::While(stmt) => {
                let cond = self.check_expression(env, &stmt.condition, Some(&Type::Bool));
                self.expect_type(&env.module.file, &stmt.condition, &cond, &Type::Bool);
                env.loop_depth += 1;
                self.check_block(env, &stmt.body, None);
                env.loop_depth -= 1;
                self.coerce_block(&env.module.file.clone(), &stmt.body, &Type::Int(IntKind::I64));
            }
            Statement::Break(span) => {
                if env.loop_depth == 0 {
                    self.error(env.file(), *span, "`break` outside of a loop");
                }
            }
            Statement::Continue(span) => {
                if env.loop_depth == 0 {
                    self.error(env.file(), *span, "`continue` outside of a loop");
                }
            }
            Statement::Block(block) => {
                self.check_block(env, block, None);
                self.coerce_block(&env.module.file.clone(), block, &Type::Int(IntKind::I64));
            }
        }
    }

    /// Checks an expression whose value is dropped; untyped literals become `i64`.
    fn check_discarded(&mut self, env: &mut FnEnv, expr: &Expr) {
        let ty = self.check_expression(env, expr, None);
        if matches!(ty, Type::UntypedInt) {
            self.coerce_untyped(&env.module.file.clone(), expr, &Type::Int(IntKind::I64));
        }
    }

    fn check_let(&mut self, env: &mut FnEnv, stmt: &LetStmt) {
        let module = env.module.clone();
        let declared = stmt
            .ty
            .as_ref()
            .map(|ann| self.resolve_type(&module, ann, &env.type_env));
        let ty = match (declared, &stmt.value) {
            (Some(declared), Some(value)) => {
                let actual = self.check_expression(env, value, Some(&declared));
                self.expect_type(&module.file, value, &actual, &declared);
                declared
            }
            (Some(declared), None) => declared,
            (None, Some(value)) => {
                let actual = self.check_expression(env, value, None);
                if matches!(actual, Type::UntypedInt) {
                    let target = Type::Int(IntKind::I64);
                    self.coerce_untyped(&module.file, value, &target);
                    target
                } else {
                    actual
                }
            }
            (None, None) => {
                self.error_with_help(
                    &module.file,
                    stmt.span,
                    format!("`let {}` needs a type annotation or an initializer", stmt.name),
                    format!("write `let {}: <type> = <value>;`", stmt.name),
                );
                Type::Poison
            }
        };
        self.resolutions.let_types.insert(stmt.id, ty.clone());
        env.declare(&stmt.name, ty, stmt.mutability);
    }

    fn check_field_assign(&mut self, env: &mut FnEnv, assign: &FieldAssignStmt) {
        let Some(local) = env.lookup(&assign.base).cloned() else {
            self.error(
                env.file(),
                assign.span,
                format!("cannot find variable `{}` in this scope", assign.base),
            );
            self.check_discarded(env, &assign.value);
            return;
        };
        if !local.mutability.is_mutable() {
            self.error_with_help(
                env.file(),
                assign.span,
                format!("cannot assign to a field of immutable variable `{}`", assign.base),
                format!("declare it with `let mut {}`", assign.base),
            );
        }
        let mut current = local.ty.clone();
        for field in &assign.fields {
            current = match self.field_type(env, &current, field, assign.span) {
                Some(ty) => ty,
                None => Type::Poison,
            };
        }
        let ty = self.check_expression(env, &assign.value, Some(&current));
        self.expect_type(&env.module.file, &assign.value, &ty, &current);
    }

    /// Type of `base.field`, enforcing field visibility.
    pub(super) fn field_type(&mut self, env: &FnEnv, base: &Type, field: &str, span: Span) -> Option<Type> {
        let name = match base {
            Type::Struct(name) => name,
            Type::Poison => return None,
            other => {
                self.error(env.file(), span, format!("type `{other}` has no field `{field}`"));
                return None;
            }
        };
        let sig = self.signatures.structs.get(name)?;
        let owner = sig.owner.clone();
        let found = sig
            .field(field)
            .map(|(_, field_sig)| (field_sig.ty.clone(), field_sig.visibility));
        let Some((ty, visibility)) = found else {
            let message = format!("struct `{}` has no field `{}`", name.name, field);
            self.error(env.file(), span, message);
            return None;
        };
        if !can_access(&env.module.path, &owner, visibility) {
            let message = format!("field `{}` of struct `{}` is private", field, name.name);
            self.error(env.file(), span, message);
        }
        Some(ty)
    }

    // ----- expressions --------------------------------------------------------------

    pub(super) fn check_expression(&mut self, env: &mut FnEnv, expr: &Expr, expected: Option<&Type>) -> Type {
        let ty = self.check_expression_kind(env, expr, expected);
        self.resolutions.expr_types.insert(expr.id, ty.clone());
        ty
    }

    fn check_expression_kind(&mut self, env: &mut FnEnv, expr: &Expr, expected: Option<&Type>) -> Type {
        match &expr.kind {
            ExprKind::Literal(literal) => self.check_literal(env, expr, literal, expected),
            ExprKind::Path(path) => self.check_path(env, expr, path),
            ExprKind::Unary { op, expr: inner } => self.check_unary(env, *op, inner, expected),
            ExprKind::Binary { op, left, right } => {
                self.check_binary(env, expr, *op, left, right, expected)
            }
            ExprKind::Cast { expr: inner, ty } => self.check_cast(env, inner, ty),
            ExprKind::Call { callee, args } => self.check_call(env, expr, callee, args, expected),
            ExprKind::Member {
                base,
                name,
                name_span,
            } => self.check_member(env, expr, base, name, *name_span, expected),
            ExprKind::StructLiteral { path, fields } => {
                self.check_struct_literal(env, expr, path, fields, expected)
            }
            ExprKind::Match(match_expr) => self.check_match(env, expr, match_expr, expected),
            ExprKind::If(if_expr) => self.check_if(env, if_expr, expected),
            ExprKind::Block(block) => self.check_block(env, block, expected),
        }
    }

    fn check_literal(&mut self, env: &FnEnv, expr: &Expr, literal: &Literal, expected: Option<&Type>) -> Type {
        match literal {
            Literal::Bool(_) => Type::Bool,
            Literal::String(_) => Type::Str,
            Literal::Int(value) => match expected {
                Some(target @ (Type::Int(_) | Type::Range { .. })) => {
                    if !type_admits(target, *value) {
                        self.error(
                            env.file(),
                            expr.span,
                            format!("literal `{value}` does not fit in `{target}`"),
                        );
                    }
                    target.clone()
                }
                _ => {
                    if !IntKind::I64.contains(*value) && !IntKind::U64.contains(*value) {
                        self.error(
                            env.file(),
                            expr.span,
                            format!("literal `{value}` does not fit in any integer type"),
                        );
                        return Type::Poison;
                    }
                    Type::UntypedInt
                }
            },
        }
    }

    fn check_path(&mut self, env: &mut FnEnv, expr: &Expr, path: &PathExpr) -> Type {
        if path.is_simple() {
            if let Some(local) = env.lookup(path.last()) {
                return local.ty.clone();
            }
        }
        match self.lookup_name(&env.module, &path.segments, Namespace::Const, false) {
            Lookup::Found(name) => {
                let (ty, _) = self.const_value(&name, Some((env.file(), expr.span)));
                self.resolutions.const_refs.insert(expr.id, name);
                return ty;
            }
            Lookup::Private(name) => {
                self.error(
                    env.file(),
                    expr.span,
                    format!("constant `{}` is private to `{}`", name.name, name.module),
                );
                return Type::Poison;
            }
            Lookup::UnknownModule(module) => {
                self.error(env.file(), expr.span, format!("unknown module `{module}`"));
                return Type::Poison;
            }
            Lookup::Missing => {}
        }
        if matches!(
            self.lookup_name(&env.module, &path.segments, Namespace::Function, true),
            Lookup::Found(_)
        ) {
            self.error_with_help(
                env.file(),
                expr.span,
                format!("`{path}` is a function, not a value"),
                format!("call it: `{path}(...)`"),
            );
            return Type::Poison;
        }
        self.error(
            env.file(),
            expr.span,
            format!("cannot find value `{path}` in this scope"),
        );
        Type::Poison
    }

    fn check_unary(&mut self, env: &mut FnEnv, op: UnaryOp, inner: &Expr, expected: Option<&Type>) -> Type {
        match op {
            UnaryOp::Not => {
                let ty = self.check_expression(env, inner, Some(&Type::Bool));
                self.expect_type(&env.module.file, inner, &ty, &Type::Bool);
                Type::Bool
            }
            UnaryOp::Neg | UnaryOp::BitNot => {
                let hint = expected.filter(|ty| ty.is_integral()).map(Type::decay);
                let ty = self.check_expression(env, inner, hint.as_ref());
                match ty {
                    Type::UntypedInt => Type::UntypedInt,
                    Type::Poison => Type::Poison,
                    ty if op == UnaryOp::Neg && matches!(ty.decay(), Type::Int(kind) if !kind.is_signed()) => {
                        self.error(
                            env.file(),
                            inner.span,
                            format!("cannot negate unsigned type `{ty}`"),
                        );
                        Type::Poison
                    }
                    ty if ty.is_integral() => ty.decay(),
                    other => {
                        self.error(
                            env.file(),
                            inner.span,
                            format!("cannot apply unary `{}` to `{}`", op.symbol(), other),
                        );
                        Type::Poison
                    }
                }
            }
        }
    }

    fn check_binary(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        expected: Option<&Type>,
    ) -> Type {
        if op.is_logical() {
            for side in [left, right] {
                let ty = self.check_expression(env, side, Some(&Type::Bool));
                self.expect_type(&env.module.file, side, &ty, &Type::Bool);
            }
            return Type::Bool;
        }

        if op.is_comparison() {
            let l = self.check_expression(env, left, None);
            let r = self.check_expression(env, right, None);
            let mut operand = self.unify_operands(env, expr, op, left, &l, right, &r);
            if matches!(operand, Type::UntypedInt) {
                operand = Type::Int(IntKind::I64);
                let file = env.module.file.clone();
                self.coerce_untyped(&file, left, &operand);
                self.coerce_untyped(&file, right, &operand);
            }
            let allowed = if op.is_equality() {
                operand.is_integral() || matches!(operand, Type::Bool | Type::Str)
            } else {
                operand.is_integral()
            };
            if !allowed && !operand.is_poison() {
                self.error(
                    env.file(),
                    expr.span,
                    format!("`{}` is not supported for values of type `{}`", op.symbol(), operand),
                );
            }
            return Type::Bool;
        }

        let hint = expected.filter(|ty| ty.is_integral()).map(Type::decay);
        let l = self.check_expression(env, left, hint.as_ref());
        let r = self.check_expression(env, right, hint.as_ref());
        let operand = self.unify_operands(env, expr, op, left, &l, right, &r);
        match operand {
            Type::Poison => Type::Poison,
            Type::UntypedInt => Type::UntypedInt,
            ty if ty.is_integral() => ty,
            other => {
                self.error(
                    env.file(),
                    expr.span,
                    format!("`{}` requires integer operands, found `{}`", op.symbol(), other),
                );
                Type::Poison
            }
        }
    }

    /// Common operand type; untyped literals adopt the other side's type and
    /// range types decay to their base.
    #[allow(clippy::too_many_arguments)]
    fn unify_operands(
        &mut self,
        env: &FnEnv,
        expr: &Expr,
        op: BinaryOp,
        left: &Expr,
        l: &Type,
        right: &Expr,
        r: &Type,
    ) -> Type {
        if l.is_poison() || r.is_poison() {
            return Type::Poison;
        }
        let file = env.module.file.clone();
        match (l, r) {
            (Type::UntypedInt, Type::UntypedInt) => Type::UntypedInt,
            (Type::UntypedInt, other) if other.is_integral() => {
                let target = other.decay();
                self.coerce_untyped(&file, left, &target);
                target
            }
            (other, Type::UntypedInt) if other.is_integral() => {
                let target = other.decay();
                self.coerce_untyped(&file, right, &target);
                target
            }
            (a, b) if a.decay() == b.decay() => a.decay(),
            (a, b) => {
                self.error(
                    &file,
                    expr.span,
                    format!("mismatched operand types for `{}`: `{}` and `{}`", op.symbol(), a, b),
                );
                Type::Poison
            }
        }
    }

    fn check_cast(&mut self, env: &mut FnEnv, inner: &Expr, ann: &TypeAnnotation) -> Type {
        let module = env.module.clone();
        let target = self.resolve_type(&module, ann, &env.type_env);
        let source = self.check_expression(env, inner, None);
        if target.is_poison() {
            return Type::Poison;
        }
        if !matches!(target, Type::Int(_) | Type::Range { .. }) {
            self.error(
                &module.file,
                ann.span,
                format!("cannot cast to `{target}`; only integer casts are supported"),
            );
            return Type::Poison;
        }
        if source.is_poison() {
            return target;
        }
        if !source.is_integral() {
            self.error(
                &module.file,
                inner.span,
                format!("cannot cast `{source}` to `{target}`"),
            );
            return target;
        }
        if self.is_constant_expr(inner) {
            let (_, value) = self.eval_const_expr(&module, inner, None);
            if let super::ConstValue::Int(value) = value {
                if !type_admits(&target, value) {
                    self.error(
                        &module.file,
                        inner.span,
                        format!("cast of `{value}` to `{target}` is out of range"),
                    );
                }
            }
        }
        if matches!(source, Type::UntypedInt) {
            self.coerce_untyped(&module.file, inner, &Type::Int(IntKind::I64));
        }
        target
    }

    /// Whether `expr`, already checked, consists only of integer literals,
    /// constant references and operators over them.
    fn is_constant_expr(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Literal(Literal::Int(_)) => true,
            ExprKind::Path(_) => self.resolutions.const_refs.contains_key(&expr.id),
            ExprKind::Unary { expr: inner, .. } => self.is_constant_expr(inner),
            ExprKind::Binary { op, left, right } => {
                !op.is_logical() && self.is_constant_expr(left) && self.is_constant_expr(right)
            }
            ExprKind::Cast { expr: inner, .. } => self.is_constant_expr(inner),
            _ => false,
        }
    }

    fn check_struct_literal(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        path: &PathExpr,
        fields: &[StructLiteralField],
        expected: Option<&Type>,
    ) -> Type {
        let mut prechecked: HashMap<String, Type> = HashMap::new();
        let ty = self.struct_literal_type(env, expr, path, fields, expected, &mut prechecked);
        let name = match &ty {
            Type::Struct(name) => name.clone(),
            Type::Poison => {
                for field in fields {
                    if !prechecked.contains_key(&field.name) {
                        self.check_discarded(env, &field.value);
                    }
                }
                return Type::Poison;
            }
            other => {
                self.error(
                    env.file(),
                    expr.span,
                    format!("`{other}` is not a struct and cannot be built with a literal"),
                );
                return Type::Poison;
            }
        };
        let Some(sig) = self.signatures.structs.get(&name).cloned() else {
            return Type::Poison;
        };

        let mut seen = HashSet::new();
        for field in fields {
            let duplicate = !seen.insert(field.name.clone());
            if duplicate {
                self.error(
                    env.file(),
                    field.span,
                    format!("field `{}` is specified more than once", field.name),
                );
            }
            match sig.field(&field.name) {
                Some((_, field_sig)) => {
                    if !can_access(&env.module.path, &sig.owner, field_sig.visibility) {
                        self.error(
                            env.file(),
                            field.span,
                            format!("field `{}` of struct `{}` is private", field.name, name.name),
                        );
                    }
                    let actual = match prechecked.get(&field.name) {
                        Some(ty) if !duplicate => ty.clone(),
                        _ => self.check_expression(env, &field.value, Some(&field_sig.ty)),
                    };
                    self.expect_type(&env.module.file, &field.value, &actual, &field_sig.ty);
                }
                None => {
                    self.error(
                        env.file(),
                        field.span,
                        format!("struct `{}` has no field named `{}`", name.name, field.name),
                    );
                    self.check_discarded(env, &field.value);
                }
            }
        }
        let missing: Vec<String> = sig
            .fields
            .iter()
            .filter(|field| !seen.contains(&field.name))
            .map(|field| format!("`{}`", field.name))
            .collect();
        if !missing.is_empty() {
            self.error(
                env.file(),
                expr.span,
                format!("missing field(s) {} in initializer of `{}`", missing.join(", "), name.name),
            );
        }
        self.resolutions.struct_literals.insert(expr.id, name.clone());
        Type::Struct(name)
    }

    fn struct_literal_type(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        path: &PathExpr,
        fields: &[StructLiteralField],
        expected: Option<&Type>,
        prechecked: &mut HashMap<String, Type>,
    ) -> Type {
        match self.resolve_type_path(env, path, expr.span) {
            Some(TypeRef::Concrete(ty)) => ty,
            Some(TypeRef::GenericEnum(name)) => {
                self.error_with_help(
                    env.file(),
                    expr.span,
                    format!("`{}` is an enum, not a struct", name.name),
                    format!("construct it with `{}.Variant(...)`", name.name),
                );
                Type::Poison
            }
            Some(TypeRef::GenericStruct(base)) => {
                if let Some(Type::Struct(name)) = expected {
                    let matches_base = self
                        .signatures
                        .structs
                        .get(name)
                        .is_some_and(|sig| sig.generic_base.as_ref() == Some(&base));
                    if matches_base {
                        return Type::Struct(name.clone());
                    }
                }
                self.infer_struct_literal(env, expr, &base, fields, prechecked)
            }
            None => {
                self.error(
                    env.file(),
                    expr.span,
                    format!("cannot find struct `{path}` in this scope"),
                );
                Type::Poison
            }
        }
    }

    fn check_if(&mut self, env: &mut FnEnv, if_expr: &IfExpr, expected: Option<&Type>) -> Type {
        let cond = self.check_expression(env, &if_expr.condition, Some(&Type::Bool));
        self.expect_type(&env.module.file, &if_expr.condition, &cond, &Type::Bool);
        let then_ty = self.check_block(env, &if_expr.then_branch, expected);
        let Some(else_branch) = &if_expr.else_branch else {
            self.coerce_block(&env.module.file.clone(), &if_expr.then_branch, &Type::Int(IntKind::I64));
            return Type::Unit;
        };
        let (else_ty, else_diverges) = match else_branch {
            ElseBranch::Block(block) => (self.check_block(env, block, expected), block_diverges(block)),
            ElseBranch::ElseIf(nested) => (self.check_if(env, nested, expected), if_diverges(nested)),
        };
        let branches = [
            (then_ty, block_diverges(&if_expr.then_branch)),
            (else_ty, else_diverges),
        ];
        let joined = self.join_types(env, if_expr.span, &branches, expected, "`if` and `else`");
        if joined.is_integral() && !matches!(joined, Type::UntypedInt) {
            self.coerce_if(&env.module.file.clone(), if_expr, &joined);
        }
        joined
    }

    /// Result type of a set of branches; diverging branches do not take part.
    pub(super) fn join_types(
        &mut self,
        env: &FnEnv,
        span: Span,
        branches: &[(Type, bool)],
        expected: Option<&Type>,
        what: &str,
    ) -> Type {
        let live: Vec<&Type> = branches
            .iter()
            .filter(|(_, diverges)| !diverges)
            .map(|(ty, _)| ty)
            .collect();
        if live.iter().any(|ty| ty.is_poison()) {
            return Type::Poison;
        }
        let Some(first) = live.iter().find(|ty| !matches!(ty, Type::UntypedInt)) else {
            return if live.is_empty() {
                expected.cloned().unwrap_or(Type::Unit)
            } else {
                Type::UntypedInt
            };
        };
        let first = (*first).clone();
        for ty in &live {
            let compatible = match ty {
                Type::UntypedInt => first.is_integral(),
                other => **other == first,
            };
            if !compatible {
                self.error(
                    env.file(),
                    span,
                    format!("{what} have incompatible types: `{first}` and `{ty}`"),
                );
                return Type::Poison;
            }
        }
        first
    }

    /// Checks `actual` against `expected`, settling untyped literals on the way.
    pub(super) fn expect_type(&mut self, file: &Path, expr: &Expr, actual: &Type, expected: &Type) -> bool {
        if actual.is_poison() || expected.is_poison() {
            return false;
        }
        if actual == expected {
            return true;
        }
        if matches!(actual, Type::UntypedInt) && expected.is_integral() {
            self.coerce_untyped(file, expr, expected);
            return true;
        }
        if let (Type::Range { base, .. }, Type::Int(kind)) = (actual, expected) {
            if base == kind {
                return true;
            }
        }
        if matches!(expected, Type::Range { .. }) && actual.is_integral() {
            self.error_with_help(
                file,
                expr.span,
                format!("mismatched types: expected `{expected}`, found `{actual}`"),
                format!("convert with a range check: `value as {expected}`"),
            );
            return false;
        }
        self.error(
            file,
            expr.span,
            format!("mismatched types: expected `{expected}`, found `{actual}`"),
        );
        false
    }

    /// Rewrites the recorded types of an untyped integer subtree to `target`,
    /// checking every literal against it.
    pub(super) fn coerce_untyped(&mut self, file: &Path, expr: &Expr, target: &Type) {
        if !matches!(self.resolutions.expr_types.get(&expr.id), Some(Type::UntypedInt)) {
            return;
        }
        self.resolutions.expr_types.insert(expr.id, target.clone());
        match &expr.kind {
            ExprKind::Literal(Literal::Int(value)) => {
                if !type_admits(target, *value) {
                    self.error(
                        file,
                        expr.span,
                        format!("literal `{value}` does not fit in `{target}`"),
                    );
                }
            }
            ExprKind::Unary { expr: inner, .. } => self.coerce_untyped(file, inner, target),
            ExprKind::Binary { op, left, right } if !op.is_comparison() && !op.is_logical() => {
                self.coerce_untyped(file, left, target);
                self.coerce_untyped(file, right, target);
            }
            ExprKind::If(if_expr) => self.coerce_if(file, if_expr, target),
            ExprKind::Block(block) => self.coerce_block(file, block, target),
            ExprKind::Match(match_expr) => {
                for arm in &match_expr.arms {
                    self.coerce_untyped(file, &arm.body, target);
                }
            }
            _ => {}
        }
    }

    pub(super) fn coerce_block(&mut self, file: &Path, block: &Block, target: &Type) {
        if let Some(tail) = &block.tail {
            self.coerce_untyped(file, tail, target);
        }
    }

    fn coerce_if(&mut self, file: &Path, if_expr: &IfExpr, target: &Type) {
        self.coerce_block(file, &if_expr.then_branch, target);
        match &if_expr.else_branch {
            Some(ElseBranch::Block(block)) => self.coerce_block(file, block, target),
            Some(ElseBranch::ElseIf(nested)) => self.coerce_if(file, nested, target),
            None => {}
        }
    }
}

/// Whether control never reaches the end of `block`.
pub(super) fn block_diverges(block: &Block) -> bool {
    block.statements.iter().any(statement_diverges)
}

fn statement_diverges(stmt: &Statement) -> bool {
    match stmt {
        Statement::Return(_) => true,
        Statement::If(if_expr) => if_diverges(if_expr),
        Statement::Block(block) => block_diverges(block),
        Statement::Expr(expr) => expr_diverges(expr),
        _ => false,
    }
}

pub(super) fn if_diverges(if_expr: &IfExpr) -> bool {
    block_diverges(&if_expr.then_branch)
        && match &if_expr.else_branch {
            Some(ElseBranch::Block(block)) => block_diverges(block),
            Some(ElseBranch::ElseIf(nested)) => if_diverges(nested),
            None => false,
        }
}

pub(super) fn expr_diverges(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Block(block) => block_diverges(block),
        ExprKind::If(if_expr) => if_diverges(if_expr),
        ExprKind::Match(match_expr) => {
            !match_expr.arms.is_empty() && match_expr.arms.iter().all(|arm| expr_diverges(&arm.body))
        }
        _ => false,
    }
}
