//! Monomorphization: every generic function or type is checked and emitted once
//! per distinct set of type arguments, under a name derived from those arguments.

use super::checker::{Checker, FnEnv, FunctionDecl};
use crate::language::{
    ast::*,
    span::Span,
    types::{IntKind, QualName, Type, TypeAnnotation},
};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
};
use tracing::debug;

/// Nesting limit for instantiations triggered by other instantiations.
pub const MAX_INSTANTIATION_DEPTH: usize = 64;

/// A function instantiation waiting for its body to be checked.
pub(super) struct Instantiation {
    pub name: QualName,
    pub depth: usize,
}

/// `T=i64,U=app::geo::Point`; nominal arguments are fully qualified.
pub(super) fn instantiation_key(params: &[String], args: &[Type]) -> String {
    params
        .iter()
        .zip(args)
        .map(|(param, arg)| format!("{param}={}", arg.canonical()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Type parameters bound while matching argument types against a signature.
#[derive(Default)]
pub(super) struct Bindings {
    pub subst: HashMap<String, Type>,
    /// Parameters seen only against untyped integer literals.
    pub untyped: HashSet<String>,
}

impl Bindings {
    fn finish(&mut self, params: &[String]) -> Result<Vec<Type>, String> {
        for param in params {
            if !self.subst.contains_key(param) && self.untyped.contains(param) {
                self.subst.insert(param.clone(), Type::Int(IntKind::I64));
            }
        }
        params
            .iter()
            .map(|param| self.subst.get(param).cloned().ok_or_else(|| param.clone()))
            .collect()
    }
}

impl Checker {
    pub(super) fn check_generic_call(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        base: &QualName,
        explicit: &[TypeAnnotation],
        args: &[Expr],
        expected: Option<&Type>,
    ) -> Type {
        let Some(decl) = self.function_decls.get(base).cloned() else {
            return Type::Poison;
        };
        let params = decl.def.type_params.clone();
        let mut bindings = Bindings::default();

        if !explicit.is_empty() {
            if explicit.len() != params.len() {
                self.error(
                    env.file(),
                    expr.span,
                    format!(
                        "function `{}` takes {} type argument(s), found {}",
                        decl.def.name,
                        params.len(),
                        explicit.len()
                    ),
                );
                self.check_arguments_loosely(env, args);
                return Type::Poison;
            }
            let module = env.module.clone();
            for (param, ann) in params.iter().zip(explicit) {
                let ty = self.resolve_type(&module, ann, &env.type_env);
                bindings.subst.insert(param.clone(), ty);
            }
        }

        let pattern_env: HashMap<String, Type> = params
            .iter()
            .map(|param| (param.clone(), Type::Param(param.clone())))
            .collect();
        let param_patterns: Vec<Type> = decl
            .def
            .params
            .iter()
            .map(|param| self.resolve_type(&decl.module, &param.ty, &pattern_env))
            .collect();
        let ret_pattern = match &decl.def.ret {
            Some(ann) => self.resolve_type(&decl.module, ann, &pattern_env),
            None => Type::Unit,
        };

        if args.len() != param_patterns.len() {
            self.error(
                env.file(),
                expr.span,
                format!(
                    "function `{}` expects {} argument(s), found {}",
                    decl.def.name,
                    param_patterns.len(),
                    args.len()
                ),
            );
            self.check_arguments_loosely(env, args);
            return Type::Poison;
        }

        let file = env.module.file.clone();
        let mut arg_types = Vec::with_capacity(args.len());
        for (arg, pattern) in args.iter().zip(&param_patterns) {
            let hint = self.subst_type(pattern, &bindings.subst, &file, arg.span);
            let hint = (!self.has_params(&hint)).then_some(hint);
            let ty = self.check_expression(env, arg, hint.as_ref());
            self.unify(pattern, &ty, &mut bindings);
            arg_types.push(ty);
        }
        if let Some(expected) = expected {
            self.unify(&ret_pattern, expected, &mut bindings);
        }

        let resolved = match bindings.finish(&params) {
            Ok(resolved) => resolved,
            Err(param) => {
                self.error_with_help(
                    env.file(),
                    expr.span,
                    format!("cannot infer type parameter `{param}` of `{}`", decl.def.name),
                    format!(
                        "pass the type arguments explicitly: `{}[{}](...)`",
                        decl.def.name,
                        params.join(", ")
                    ),
                );
                return Type::Poison;
            }
        };
        if resolved.iter().any(Type::contains_poison) {
            return Type::Poison;
        }

        for ((arg, pattern), actual) in args.iter().zip(&param_patterns).zip(&arg_types) {
            let concrete = self.subst_type(pattern, &bindings.subst, &file, arg.span);
            self.expect_type(&file, arg, actual, &concrete);
        }

        let Some(instance) = self.instantiate_function(base, &decl, &resolved, &file, expr.span) else {
            return Type::Poison;
        };
        self.resolutions
            .calls
            .insert(expr.id, super::CallTarget::Function(instance));
        self.subst_type(&ret_pattern, &bindings.subst, &file, expr.span)
    }

    /// Checks arguments of a call that already failed, so their own errors still
    /// surface.
    pub(super) fn check_arguments_loosely(&mut self, env: &mut FnEnv, args: &[Expr]) {
        for arg in args {
            let ty = self.check_expression(env, arg, None);
            if matches!(ty, Type::UntypedInt) {
                self.coerce_untyped(&env.module.file.clone(), arg, &Type::Int(IntKind::I64));
            }
        }
    }

    fn instantiate_function(
        &mut self,
        base: &QualName,
        decl: &FunctionDecl,
        args: &[Type],
        file: &Path,
        span: Span,
    ) -> Option<QualName> {
        let params = &decl.def.type_params;
        let name = base.with_name(format!("{}[{}]", base.name, instantiation_key(params, args)));
        if self.signatures.functions.contains_key(&name) {
            return Some(name);
        }
        let depth = self.current_depth + 1;
        if depth > MAX_INSTANTIATION_DEPTH {
            self.error(
                file,
                span,
                format!(
                    "recursive instantiation of `{}` exceeds the depth limit of {}",
                    base.name, MAX_INSTANTIATION_DEPTH
                ),
            );
            return None;
        }

        let subst: HashMap<String, Type> = params.iter().cloned().zip(args.iter().cloned()).collect();
        let mut def = decl.def.clone();
        def.type_params.clear();
        def.name = name.name.clone();
        Refresher {
            ids: &mut self.ids,
            subst: &subst,
        }
        .function(&mut def);

        self.function_decls.insert(
            name.clone(),
            FunctionDecl {
                module: decl.module.clone(),
                def,
                self_type: None,
            },
        );
        self.build_function_sig(&name);
        self.worklist.push_back(Instantiation {
            name: name.clone(),
            depth,
        });
        debug!(function = %name, depth, "queued instantiation");
        Some(name)
    }

    /// Instantiates a generic struct or enum. Arguments that still mention type
    /// parameters produce a signature pattern, which is never laid out.
    pub(super) fn instantiate_nominal(&mut self, base: &QualName, args: Vec<Type>, file: &Path, span: Span) -> Type {
        let is_enum = self.enum_decls.contains_key(base);
        let Some(params) = self.nominal_params(base) else {
            return Type::Poison;
        };
        if args.len() != params.len() {
            self.error(
                file,
                span,
                format!(
                    "`{}` takes {} type argument(s), found {}",
                    base.name,
                    params.len(),
                    args.len()
                ),
            );
            return Type::Poison;
        }
        if args.iter().any(Type::contains_poison) {
            return Type::Poison;
        }

        let name = base.with_name(format!("{}[{}]", base.name, instantiation_key(&params, &args)));
        let ty = if is_enum {
            Type::Enum(name.clone())
        } else {
            Type::Struct(name.clone())
        };
        if args.iter().any(|arg| self.has_params(arg)) {
            self.type_patterns.insert(name, (base.clone(), args));
            return ty;
        }
        let known = if is_enum {
            self.signatures.enums.contains_key(&name)
        } else {
            self.signatures.structs.contains_key(&name)
        };
        // A type being instantiated may name itself through a field; by-value
        // cycles are rejected by the layout pass.
        if known || self.in_progress.contains(&name) {
            return ty;
        }
        if self.type_depth >= MAX_INSTANTIATION_DEPTH {
            self.error(
                file,
                span,
                format!(
                    "recursive instantiation of `{}` exceeds the depth limit of {}",
                    base.name, MAX_INSTANTIATION_DEPTH
                ),
            );
            return Type::Poison;
        }

        let subst: HashMap<String, Type> = params.iter().cloned().zip(args.iter().cloned()).collect();
        self.in_progress.insert(name.clone());
        self.type_depth += 1;
        if is_enum {
            self.build_enum_sig(base, name.clone(), &subst, Some((base.clone(), args)));
        } else {
            self.build_struct_sig(base, name.clone(), &subst, Some((base.clone(), args)));
        }
        self.type_depth -= 1;
        self.in_progress.remove(&name);
        debug!(ty = %name, "instantiated type");
        ty
    }

    pub(super) fn has_params(&self, ty: &Type) -> bool {
        match ty {
            Type::Param(_) => true,
            Type::List(inner) => self.has_params(inner),
            Type::Struct(name) | Type::Enum(name) => self.type_patterns.contains_key(name),
            _ => false,
        }
    }

    /// Replaces bound parameters in `ty`, instantiating nominal patterns whose
    /// arguments become concrete.
    pub(super) fn subst_type(&mut self, ty: &Type, subst: &HashMap<String, Type>, file: &Path, span: Span) -> Type {
        match ty {
            Type::Param(name) => subst.get(name).cloned().unwrap_or_else(|| ty.clone()),
            Type::List(inner) => Type::List(Box::new(self.subst_type(inner, subst, file, span))),
            Type::Struct(name) | Type::Enum(name) => {
                let Some((base, args)) = self.type_patterns.get(name).cloned() else {
                    return ty.clone();
                };
                let args: Vec<Type> = args
                    .iter()
                    .map(|arg| self.subst_type(arg, subst, file, span))
                    .collect();
                self.instantiate_nominal(&base, args, file, span)
            }
            other => other.clone(),
        }
    }

    /// Binds parameters in `pattern` from the matching parts of `actual`; the first
    /// binding of a parameter wins.
    pub(super) fn unify(&self, pattern: &Type, actual: &Type, bindings: &mut Bindings) {
        match (pattern, actual) {
            (Type::Param(name), Type::UntypedInt) => {
                bindings.untyped.insert(name.clone());
            }
            (Type::Param(_), Type::Poison) => {}
            (Type::Param(name), actual) => {
                bindings
                    .subst
                    .entry(name.clone())
                    .or_insert_with(|| actual.clone());
            }
            (Type::List(pattern), Type::List(actual)) => self.unify(pattern, actual, bindings),
            (Type::Struct(pattern), Type::Struct(actual)) | (Type::Enum(pattern), Type::Enum(actual)) => {
                let Some((base, pattern_args)) = self.type_patterns.get(pattern) else {
                    return;
                };
                let actual_args = self
                    .signatures
                    .structs
                    .get(actual)
                    .filter(|sig| sig.generic_base.as_ref() == Some(base))
                    .map(|sig| &sig.type_args)
                    .or_else(|| {
                        self.signatures
                            .enums
                            .get(actual)
                            .filter(|sig| sig.generic_base.as_ref() == Some(base))
                            .map(|sig| &sig.type_args)
                    });
                if let Some(actual_args) = actual_args {
                    for (pattern, actual) in pattern_args.iter().zip(actual_args) {
                        self.unify(pattern, actual, bindings);
                    }
                }
            }
            _ => {}
        }
    }

    /// Resolves the instantiation of a generic struct from the field values of a
    /// literal such as `Pair { a: 1, b: 2 }`.
    pub(super) fn infer_struct_literal(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        base: &QualName,
        fields: &[StructLiteralField],
        prechecked: &mut HashMap<String, Type>,
    ) -> Type {
        let Some(decl) = self.struct_decls.get(base).cloned() else {
            return Type::Poison;
        };
        let params = decl.def.type_params.clone();
        let pattern_env: HashMap<String, Type> = params
            .iter()
            .map(|param| (param.clone(), Type::Param(param.clone())))
            .collect();
        let mut bindings = Bindings::default();
        for field in fields {
            let Some(declared) = decl.def.fields.iter().find(|f| f.name == field.name) else {
                continue;
            };
            if prechecked.contains_key(&field.name) {
                continue;
            }
            let pattern = self.resolve_type(&decl.module, &declared.ty, &pattern_env);
            let hint = (!self.has_params(&pattern)).then(|| pattern.clone());
            let ty = self.check_expression(env, &field.value, hint.as_ref());
            self.unify(&pattern, &ty, &mut bindings);
            prechecked.insert(field.name.clone(), ty);
        }
        match bindings.finish(&params) {
            Ok(args) => self.instantiate_nominal(base, args, &env.module.file.clone(), expr.span),
            Err(param) => {
                self.error_with_help(
                    env.file(),
                    expr.span,
                    format!("cannot infer type parameter `{param}` of `{}`", base.name),
                    format!("write the type arguments: `{}[{}] {{ ... }}`", base.name, params.join(", ")),
                );
                Type::Poison
            }
        }
    }

    /// Resolves the instantiation of a generic enum at a variant construction site
    /// from the expected type or the payload. Returns the payload type when the
    /// payload had to be checked to decide.
    pub(super) fn infer_enum_instance(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        base: &QualName,
        variant: &str,
        payload: Option<&Expr>,
        expected: Option<&Type>,
    ) -> (Type, Option<Type>) {
        if let Some(Type::Enum(name)) = expected {
            let matches_base = self
                .signatures
                .enums
                .get(name)
                .is_some_and(|sig| sig.generic_base.as_ref() == Some(base));
            if matches_base {
                return (Type::Enum(name.clone()), None);
            }
        }
        let Some(decl) = self.enum_decls.get(base).cloned() else {
            return (Type::Poison, None);
        };
        let params = decl.def.type_params.clone();
        let pattern_env: HashMap<String, Type> = params
            .iter()
            .map(|param| (param.clone(), Type::Param(param.clone())))
            .collect();
        let mut bindings = Bindings::default();
        let declared = decl
            .def
            .variants
            .iter()
            .find(|v| v.name == variant)
            .and_then(|v| v.fields.first().cloned());
        let mut payload_ty = None;
        if let (Some(declared), Some(payload)) = (declared, payload) {
            let pattern = self.resolve_type(&decl.module, &declared, &pattern_env);
            let ty = self.check_expression(env, payload, None);
            self.unify(&pattern, &ty, &mut bindings);
            payload_ty = Some(ty);
        }
        let ty = match bindings.finish(&params) {
            Ok(args) => self.instantiate_nominal(base, args, &env.module.file.clone(), expr.span),
            Err(param) => {
                self.error_with_help(
                    env.file(),
                    expr.span,
                    format!("cannot infer type parameter `{param}` of `{}`", base.name),
                    format!(
                        "annotate the expected type or write `{}[{}].{}`",
                        base.name,
                        params.join(", "),
                        variant
                    ),
                );
                Type::Poison
            }
        };
        (ty, payload_ty)
    }
}

/// Renumbers every node of a cloned declaration and substitutes its type
/// parameters, so the clone gets its own resolution entries.
struct Refresher<'a> {
    ids: &'a mut NodeIdGen,
    subst: &'a HashMap<String, Type>,
}

impl Refresher<'_> {
    fn function(&mut self, def: &mut FunctionDef) {
        for param in &mut def.params {
            self.annotation(&mut param.ty);
        }
        if let Some(ret) = &mut def.ret {
            self.annotation(ret);
        }
        self.block(&mut def.body);
    }

    fn annotation(&mut self, ann: &mut TypeAnnotation) {
        *ann = ann.substitute(self.subst);
    }

    fn path(&mut self, path: &mut PathExpr) {
        for arg in &mut path.type_args {
            self.annotation(arg);
        }
    }

    fn block(&mut self, block: &mut Block) {
        for stmt in &mut block.statements {
            self.statement(stmt);
        }
        if let Some(tail) = &mut block.tail {
            self.expr(tail);
        }
    }

    fn statement(&mut self, stmt: &mut Statement) {
        match stmt {
            Statement::Let(let_stmt) => {
                let_stmt.id = self.ids.fresh();
                if let Some(ty) = &mut let_stmt.ty {
                    self.annotation(ty);
                }
                if let Some(value) = &mut let_stmt.value {
                    self.expr(value);
                }
            }
            Statement::Assign(assign) => self.expr(&mut assign.value),
            Statement::FieldAssign(assign) => self.expr(&mut assign.value),
            Statement::Expr(expr) => self.expr(expr),
            Statement::Return(ret) => {
                if let Some(value) = &mut ret.value {
                    self.expr(value);
                }
            }
            Statement::If(if_expr) => self.if_expr(if_expr),
            Statement::While(stmt) => {
                self.expr(&mut stmt.condition);
                self.block(&mut stmt.body);
            }
            Statement::Break(_) | Statement::Continue(_) => {}
            Statement::Block(block) => self.block(block),
        }
    }

    fn if_expr(&mut self, if_expr: &mut IfExpr) {
        self.expr(&mut if_expr.condition);
        self.block(&mut if_expr.then_branch);
        match &mut if_expr.else_branch {
            Some(ElseBranch::Block(block)) => self.block(block),
            Some(ElseBranch::ElseIf(nested)) => self.if_expr(nested),
            None => {}
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        expr.id = self.ids.fresh();
        match &mut expr.kind {
            ExprKind::Path(path) => self.path(path),
            ExprKind::Literal(_) => {}
            ExprKind::Unary { expr: inner, .. } => self.expr(inner),
            ExprKind::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Cast { expr: inner, ty } => {
                self.expr(inner);
                self.annotation(ty);
            }
            ExprKind::Call { callee, args } => {
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::Member { base, .. } => self.expr(base),
            ExprKind::StructLiteral { path, fields } => {
                self.path(path);
                for field in fields {
                    self.expr(&mut field.value);
                }
            }
            ExprKind::Match(match_expr) => {
                self.expr(&mut match_expr.scrutinee);
                for arm in &mut match_expr.arms {
                    self.pattern(&mut arm.pattern);
                    self.expr(&mut arm.body);
                }
            }
            ExprKind::If(if_expr) => self.if_expr(if_expr),
            ExprKind::Block(block) => self.block(block),
        }
    }

    fn pattern(&mut self, pattern: &mut Pattern) {
        pattern.id = self.ids.fresh();
        if let PatternKind::Variant {
            enum_path, fields, ..
        } = &mut pattern.kind
        {
            if let Some(path) = enum_path {
                self.path(path);
            }
            for field in fields {
                self.pattern(field);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::types::ModulePath;

    #[test]
    fn keys_qualify_nominal_arguments() {
        let point = ModulePath::new("app", vec!["geo".into()]).qualify("Point");
        let key = instantiation_key(
            &["T".to_string(), "U".to_string()],
            &[Type::Int(IntKind::I64), Type::Struct(point)],
        );
        assert_eq!(key, "T=i64,U=app::geo::Point");
    }

    #[test]
    fn untyped_only_bindings_default_to_i64() {
        let mut bindings = Bindings::default();
        bindings.untyped.insert("T".to_string());
        let args = bindings.finish(&["T".to_string()]);
        assert_eq!(args, Ok(vec![Type::Int(IntKind::I64)]));

        let mut empty = Bindings::default();
        assert_eq!(empty.finish(&["U".to_string()]), Err("U".to_string()));
    }
}
