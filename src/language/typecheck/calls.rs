use super::{
    checker::{Checker, FnEnv, Lookup, TypeRef},
    CallTarget, FunctionSig, Intrinsic, VariantRef,
};
use crate::language::{
    ast::{Expr, ExprKind, PathExpr},
    prelude::Builtin,
    resolve::{can_access, Namespace},
    span::Span,
    types::{IntKind, QualName, Type},
};

impl Checker {
    pub(super) fn check_call(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        callee: &Expr,
        args: &[Expr],
        expected: Option<&Type>,
    ) -> Type {
        match &callee.kind {
            ExprKind::Member {
                base,
                name,
                name_span,
            } => self.check_member_call(env, expr, base, name, *name_span, args, expected),
            ExprKind::Path(path) => self.check_path_call(env, expr, callee, path, args, expected),
            _ => {
                self.error(env.file(), callee.span, "expression is not callable");
                self.check_arguments_loosely(env, args);
                Type::Poison
            }
        }
    }

    fn check_path_call(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        callee: &Expr,
        path: &PathExpr,
        args: &[Expr],
        expected: Option<&Type>,
    ) -> Type {
        if path.is_simple() {
            let name = path.last();
            if env.lookup(name).is_some() {
                self.error(env.file(), callee.span, format!("`{name}` is not a function"));
                self.check_arguments_loosely(env, args);
                return Type::Poison;
            }
            let private = match self.lookup_name(&env.module, &path.segments, Namespace::Function, false) {
                Lookup::Found(target) => {
                    return self.check_function_call(env, expr, &target, path, args, expected);
                }
                Lookup::Private(target) => Some(target),
                Lookup::UnknownModule(_) | Lookup::Missing => None,
            };
            if let Some(builtin) = Builtin::from_name(name) {
                if !path.type_args.is_empty() {
                    self.error(
                        env.file(),
                        callee.span,
                        format!("`{name}` does not take type arguments"),
                    );
                }
                return self.check_builtin_call(env, expr, builtin, args, expected);
            }
            if let Some(target) = self.lookup_prelude(Namespace::Function, name) {
                return self.check_function_call(env, expr, &target, path, args, expected);
            }
            match private {
                Some(target) => self.error(
                    env.file(),
                    callee.span,
                    format!("function `{}` is private to `{}`", target.name, target.module),
                ),
                None => self.error(
                    env.file(),
                    callee.span,
                    format!("cannot find function `{name}` in this scope"),
                ),
            }
            self.check_arguments_loosely(env, args);
            return Type::Poison;
        }

        let lookup = self.lookup_name(&env.module, &path.segments, Namespace::Function, false);
        let written = path.to_string();
        match self.report_lookup(&env.module.file.clone(), callee.span, lookup, "function", &written) {
            Some(target) => self.check_function_call(env, expr, &target, path, args, expected),
            None => {
                self.check_arguments_loosely(env, args);
                Type::Poison
            }
        }
    }

    fn check_function_call(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        target: &QualName,
        path: &PathExpr,
        args: &[Expr],
        expected: Option<&Type>,
    ) -> Type {
        let generic = self
            .function_decls
            .get(target)
            .is_some_and(|decl| !decl.def.type_params.is_empty());
        if generic {
            return self.check_generic_call(env, expr, target, &path.type_args, args, expected);
        }
        if !path.type_args.is_empty() {
            self.error(
                env.file(),
                expr.span,
                format!("function `{}` is not generic", target.name),
            );
        }
        let Some(sig) = self.signatures.functions.get(target).cloned() else {
            self.check_arguments_loosely(env, args);
            return Type::Poison;
        };
        self.check_arguments(env, expr.span, &sig, args);
        self.resolutions
            .calls
            .insert(expr.id, CallTarget::Function(target.clone()));
        sig.ret
    }

    fn check_arguments(&mut self, env: &mut FnEnv, span: Span, sig: &FunctionSig, args: &[Expr]) {
        if args.len() != sig.params.len() {
            self.error(
                env.file(),
                span,
                format!(
                    "function `{}` expects {} argument(s), found {}",
                    sig.name.name,
                    sig.params.len(),
                    args.len()
                ),
            );
            self.check_arguments_loosely(env, args);
            return;
        }
        for (arg, param) in args.iter().zip(&sig.params) {
            let ty = self.check_expression(env, arg, Some(&param.ty));
            self.expect_type(&env.module.file.clone(), arg, &ty, &param.ty);
        }
    }

    fn check_builtin_call(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        builtin: Builtin,
        args: &[Expr],
        expected: Option<&Type>,
    ) -> Type {
        let arity = if builtin == Builtin::List { 0 } else { 1 };
        if args.len() != arity {
            self.error(
                env.file(),
                expr.span,
                format!(
                    "`{}` expects {} argument(s), found {}",
                    builtin.name(),
                    arity,
                    args.len()
                ),
            );
            self.check_arguments_loosely(env, args);
            return Type::Poison;
        }
        self.resolutions
            .calls
            .insert(expr.id, CallTarget::Builtin(builtin));
        let file = env.module.file.clone();
        match builtin {
            Builtin::Print => {
                let ty = self.check_expression(env, &args[0], None);
                match ty {
                    Type::UntypedInt => self.coerce_untyped(&file, &args[0], &Type::Int(IntKind::I64)),
                    ty if ty.is_integral() || matches!(ty, Type::Bool | Type::Str | Type::Poison) => {}
                    other => self.error(
                        &file,
                        args[0].span,
                        format!("`print` accepts integers, bool and string, found `{other}`"),
                    ),
                }
                Type::Unit
            }
            Builtin::Assert => {
                let ty = self.check_expression(env, &args[0], Some(&Type::Bool));
                self.expect_type(&file, &args[0], &ty, &Type::Bool);
                Type::Unit
            }
            Builtin::Panic => {
                let ty = self.check_expression(env, &args[0], Some(&Type::Str));
                self.expect_type(&file, &args[0], &ty, &Type::Str);
                Type::Unit
            }
            Builtin::List => match expected {
                Some(list @ Type::List(_)) => list.clone(),
                Some(Type::Poison) => Type::Poison,
                _ => {
                    self.error_with_help(
                        &file,
                        expr.span,
                        "cannot infer the element type of `list()`",
                        "annotate the binding, e.g. `let xs: List[i32] = list();`",
                    );
                    Type::Poison
                }
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_member_call(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        base: &Expr,
        name: &str,
        name_span: Span,
        args: &[Expr],
        expected: Option<&Type>,
    ) -> Type {
        if let ExprKind::Path(path) = &base.kind {
            let local = path.is_simple().then(|| env.lookup(path.last()).cloned()).flatten();
            if let Some(local) = local {
                self.resolutions.expr_types.insert(base.id, local.ty.clone());
                return self.check_intrinsic(env, expr, path.last(), &local, name, name_span, args);
            }
            if let Some(type_ref) = self.resolve_type_path(env, path, base.span) {
                return self.check_type_member_call(env, expr, type_ref, name, name_span, args, expected);
            }
        }

        let receiver = self.check_expression(env, base, None);
        match receiver {
            Type::Poison => {}
            Type::List(_) | Type::Str => self.error_with_help(
                env.file(),
                base.span,
                format!("method `{name}` needs a local variable as its receiver"),
                "bind the value with `let` first",
            ),
            other => self.error(
                env.file(),
                name_span,
                format!("no method named `{name}` on type `{other}`"),
            ),
        }
        self.check_arguments_loosely(env, args);
        Type::Poison
    }

    #[allow(clippy::too_many_arguments)]
    fn check_type_member_call(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        type_ref: TypeRef,
        name: &str,
        name_span: Span,
        args: &[Expr],
        expected: Option<&Type>,
    ) -> Type {
        match type_ref {
            TypeRef::Concrete(Type::Poison) => {
                self.check_arguments_loosely(env, args);
                Type::Poison
            }
            TypeRef::Concrete(Type::Enum(enum_name)) => {
                let has_variant = self
                    .signatures
                    .enums
                    .get(&enum_name)
                    .is_some_and(|sig| sig.variant(name).is_some());
                if has_variant {
                    return self.construct_variant(env, expr, &enum_name, name, name_span, Some(args), None);
                }
                self.check_static_method(env, expr, &enum_name, name, name_span, args)
            }
            TypeRef::Concrete(Type::Struct(struct_name)) => {
                self.check_static_method(env, expr, &struct_name, name, name_span, args)
            }
            TypeRef::GenericEnum(base) => {
                let (ty, payload) =
                    self.infer_enum_instance(env, expr, &base, name, args.first(), expected);
                match ty {
                    Type::Enum(enum_name) => {
                        self.construct_variant(env, expr, &enum_name, name, name_span, Some(args), payload)
                    }
                    _ => {
                        if payload.is_none() {
                            self.check_arguments_loosely(env, args);
                        }
                        Type::Poison
                    }
                }
            }
            TypeRef::GenericStruct(base) => {
                self.error(
                    env.file(),
                    name_span,
                    format!("generic struct `{}` has no associated functions", base.name),
                );
                self.check_arguments_loosely(env, args);
                Type::Poison
            }
            TypeRef::Concrete(other) => {
                self.error(
                    env.file(),
                    name_span,
                    format!("type `{other}` has no associated function `{name}`"),
                );
                self.check_arguments_loosely(env, args);
                Type::Poison
            }
        }
    }

    /// `Type.method(args)` for a method declared in an `impl` block.
    fn check_static_method(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        owner: &QualName,
        name: &str,
        name_span: Span,
        args: &[Expr],
    ) -> Type {
        let method = owner.with_name(format!("{}.{}", owner.name, name));
        let Some(sig) = self.signatures.functions.get(&method).cloned() else {
            let kind = if self.signatures.enums.contains_key(owner) {
                "variant or method"
            } else {
                "method"
            };
            self.error(
                env.file(),
                name_span,
                format!("no {kind} named `{name}` on `{}`", owner.name),
            );
            self.check_arguments_loosely(env, args);
            return Type::Poison;
        };
        if !can_access(&env.module.path, &sig.owner, sig.visibility) {
            self.error(
                env.file(),
                name_span,
                format!("method `{}.{}` is private to `{}`", owner.name, name, sig.owner),
            );
        }
        self.check_arguments(env, expr.span, &sig, args);
        self.resolutions
            .calls
            .insert(expr.id, CallTarget::Function(method));
        sig.ret
    }

    /// Builds `Enum.Variant` or `Enum.Variant(payload)`; `args` is `None` for the
    /// bare member form.
    #[allow(clippy::too_many_arguments)]
    fn construct_variant(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        enum_name: &QualName,
        variant: &str,
        name_span: Span,
        args: Option<&[Expr]>,
        prechecked_payload: Option<Type>,
    ) -> Type {
        let Some(sig) = self.signatures.enums.get(enum_name).cloned() else {
            return Type::Poison;
        };
        let Some((index, variant_sig)) = sig.variant(variant) else {
            self.error(
                env.file(),
                name_span,
                format!("enum `{}` has no variant `{}`", enum_name.name, variant),
            );
            if let Some(args) = args {
                self.check_arguments_loosely(env, args);
            }
            return Type::Poison;
        };
        let file = env.module.file.clone();
        let given = args.unwrap_or_default();
        match &variant_sig.payload {
            Some(payload) if given.len() == 1 => {
                let actual = match prechecked_payload {
                    Some(ty) => ty,
                    None => self.check_expression(env, &given[0], Some(payload)),
                };
                self.expect_type(&file, &given[0], &actual, payload);
            }
            Some(_) => {
                self.error(
                    &file,
                    expr.span,
                    format!(
                        "variant `{}.{}` expects 1 value, found {}",
                        enum_name.name,
                        variant,
                        given.len()
                    ),
                );
                self.check_arguments_loosely(env, given);
            }
            None if given.is_empty() => {}
            None => {
                self.error(
                    &file,
                    expr.span,
                    format!("variant `{}.{}` takes no values", enum_name.name, variant),
                );
                self.check_arguments_loosely(env, given);
            }
        }
        self.resolutions.variants.insert(
            expr.id,
            VariantRef {
                enum_name: enum_name.clone(),
                index,
            },
        );
        Type::Enum(enum_name.clone())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_intrinsic(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        receiver: &str,
        local: &super::checker::Local,
        name: &str,
        name_span: Span,
        args: &[Expr],
    ) -> Type {
        let index = Type::Int(IntKind::I64);
        let (intrinsic, params, ret) = match (&local.ty, name) {
            (Type::List(elem), "push") => (Intrinsic::ListPush, vec![(**elem).clone()], Type::Unit),
            (Type::List(_), "len") => (Intrinsic::ListLen, vec![], index.clone()),
            (Type::List(elem), "get") => (Intrinsic::ListGet, vec![index.clone()], (**elem).clone()),
            (Type::List(elem), "set") => (
                Intrinsic::ListSet,
                vec![index.clone(), (**elem).clone()],
                Type::Unit,
            ),
            (Type::Str, "len") => (Intrinsic::StrLen, vec![], index.clone()),
            (Type::Str, "concat") => (Intrinsic::StrConcat, vec![Type::Str], Type::Str),
            (Type::Str, "byte_at") => (Intrinsic::StrByteAt, vec![index.clone()], Type::Int(IntKind::U8)),
            (Type::Poison, _) => {
                self.check_arguments_loosely(env, args);
                return Type::Poison;
            }
            (Type::Struct(owner) | Type::Enum(owner), _) => {
                let owner = owner.clone();
                self.error_with_help(
                    env.file(),
                    name_span,
                    format!("no method named `{name}` on type `{}`", local.ty),
                    format!("call it through the type: `{}.{}({}, ...)`", owner.name, name, receiver),
                );
                self.check_arguments_loosely(env, args);
                return Type::Poison;
            }
            (other, _) => {
                self.error(
                    env.file(),
                    name_span,
                    format!("no method named `{name}` on type `{other}`"),
                );
                self.check_arguments_loosely(env, args);
                return Type::Poison;
            }
        };

        if intrinsic.mutates_receiver() && !local.mutability.is_mutable() {
            self.error_with_help(
                env.file(),
                expr.span,
                format!("cannot mutate immutable variable `{receiver}`"),
                format!("declare it with `let mut {receiver}`"),
            );
        }
        if args.len() != params.len() {
            self.error(
                env.file(),
                expr.span,
                format!(
                    "method `{}` expects {} argument(s), found {}",
                    name,
                    params.len(),
                    args.len()
                ),
            );
            self.check_arguments_loosely(env, args);
            return Type::Poison;
        }
        let file = env.module.file.clone();
        for (arg, param) in args.iter().zip(&params) {
            let ty = self.check_expression(env, arg, Some(param));
            self.expect_type(&file, arg, &ty, param);
        }
        self.resolutions.intrinsics.insert(expr.id, intrinsic);
        ret
    }

    /// `base.name` outside a call: a payloadless variant or a field read.
    pub(super) fn check_member(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        base: &Expr,
        name: &str,
        name_span: Span,
        expected: Option<&Type>,
    ) -> Type {
        if let ExprKind::Path(path) = &base.kind {
            let is_local = path.is_simple() && env.lookup(path.last()).is_some();
            if !is_local {
                if let Some(type_ref) = self.resolve_type_path(env, path, base.span) {
                    return match type_ref {
                        TypeRef::Concrete(Type::Poison) => Type::Poison,
                        TypeRef::Concrete(Type::Enum(enum_name)) => {
                            self.construct_variant(env, expr, &enum_name, name, name_span, None, None)
                        }
                        TypeRef::GenericEnum(generic) => {
                            match self.infer_enum_instance(env, expr, &generic, name, None, expected) {
                                (Type::Enum(enum_name), _) => self
                                    .construct_variant(env, expr, &enum_name, name, name_span, None, None),
                                _ => Type::Poison,
                            }
                        }
                        TypeRef::Concrete(other) => {
                            self.error_with_help(
                                env.file(),
                                name_span,
                                format!("`{other}` has no associated value `{name}`"),
                                format!("associated functions must be called: `{other}.{name}(...)`"),
                            );
                            Type::Poison
                        }
                        TypeRef::GenericStruct(generic) => {
                            self.error(
                                env.file(),
                                name_span,
                                format!("`{}` has no associated value `{name}`", generic.name),
                            );
                            Type::Poison
                        }
                    };
                }
            }
        }

        let base_ty = self.check_expression(env, base, None);
        self.field_type(env, &base_ty, name, name_span)
            .unwrap_or(Type::Poison)
    }
}
