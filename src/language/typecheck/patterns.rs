use super::{
    checker::{expr_diverges, Checker, FnEnv, Lookup},
    consts::type_admits,
    EnumSig, VariantRef,
};
use crate::language::{
    ast::{Expr, MatchExpr, Pattern, PatternKind},
    resolve::Namespace,
    span::Span,
    types::{IntKind, Mutability, QualName, Type},
};
use std::collections::HashSet;

/// What kind of value a `match` inspects.
enum Scrutinee {
    Enum(EnumSig),
    Int(Type),
    Bool,
    Str,
    Invalid,
}

#[derive(Default)]
struct Coverage {
    variants: HashSet<usize>,
    ints: HashSet<i128>,
    strings: HashSet<String>,
    bools: HashSet<bool>,
    catch_all: bool,
}

impl Checker {
    pub(super) fn check_match(
        &mut self,
        env: &mut FnEnv,
        expr: &Expr,
        match_expr: &MatchExpr,
        expected: Option<&Type>,
    ) -> Type {
        let file = env.module.file.clone();
        let mut scrutinee_ty = self.check_expression(env, &match_expr.scrutinee, None);
        if matches!(scrutinee_ty, Type::UntypedInt) {
            scrutinee_ty = Type::Int(IntKind::I64);
            self.coerce_untyped(&file, &match_expr.scrutinee, &scrutinee_ty);
        }
        let scrutinee = match &scrutinee_ty {
            Type::Enum(name) => match self.signatures.enums.get(name) {
                Some(sig) => Scrutinee::Enum(sig.clone()),
                None => Scrutinee::Invalid,
            },
            Type::Int(_) | Type::Range { .. } => Scrutinee::Int(scrutinee_ty.clone()),
            Type::Bool => Scrutinee::Bool,
            Type::Str => Scrutinee::Str,
            Type::Poison => Scrutinee::Invalid,
            other => {
                self.error(
                    &file,
                    match_expr.scrutinee.span,
                    format!("cannot match on values of type `{other}`"),
                );
                Scrutinee::Invalid
            }
        };

        let mut coverage = Coverage::default();
        let mut arms = Vec::with_capacity(match_expr.arms.len());
        for arm in &match_expr.arms {
            if coverage.catch_all {
                self.error(
                    &file,
                    arm.pattern.span,
                    "unreachable match arm: an earlier arm already matches every value",
                );
            }
            env.push_scope();
            self.check_pattern(env, &arm.pattern, &scrutinee, &scrutinee_ty, &mut coverage);
            let ty = self.check_expression(env, &arm.body, expected);
            env.pop_scope();
            arms.push((ty, expr_diverges(&arm.body)));
        }

        self.check_exhaustive(&file, expr.span, &scrutinee, &coverage);

        let joined = self.join_types(env, expr.span, &arms, expected, "match arms");
        if joined.is_integral() && !matches!(joined, Type::UntypedInt) {
            for arm in &match_expr.arms {
                self.coerce_untyped(&file, &arm.body, &joined);
            }
        }
        joined
    }

    fn check_pattern(
        &mut self,
        env: &mut FnEnv,
        pattern: &Pattern,
        scrutinee: &Scrutinee,
        scrutinee_ty: &Type,
        coverage: &mut Coverage,
    ) {
        let file = env.module.file.clone();
        match (&pattern.kind, scrutinee) {
            (_, Scrutinee::Invalid) => {
                if let PatternKind::Bind(name) = &pattern.kind {
                    env.declare(name, Type::Poison, Mutability::Immutable);
                }
            }
            (PatternKind::Wildcard, _) => coverage.catch_all = true,
            (PatternKind::Bind(name), Scrutinee::Enum(sig)) if is_unit_variant(sig, name) => {
                let Some((index, _)) = sig.variant(name) else {
                    return;
                };
                self.record_variant(&file, pattern, &sig.name, index, coverage);
            }
            (PatternKind::Bind(name), _) => {
                coverage.catch_all = true;
                self.resolutions
                    .expr_types
                    .insert(pattern.id, scrutinee_ty.clone());
                env.declare(name, scrutinee_ty.clone(), Mutability::Immutable);
            }
            (PatternKind::Int(value), Scrutinee::Int(ty)) => {
                if !type_admits(ty, *value) {
                    self.error(
                        &file,
                        pattern.span,
                        format!("pattern `{value}` can never match a value of type `{ty}`"),
                    );
                }
                if !coverage.ints.insert(*value) {
                    self.duplicate_arm(&file, pattern.span);
                }
            }
            (PatternKind::Bool(value), Scrutinee::Bool) => {
                if !coverage.bools.insert(*value) {
                    self.duplicate_arm(&file, pattern.span);
                }
            }
            (PatternKind::String(value), Scrutinee::Str) => {
                if !coverage.strings.insert(value.clone()) {
                    self.duplicate_arm(&file, pattern.span);
                }
            }
            (
                PatternKind::Variant {
                    enum_path,
                    variant,
                    fields,
                },
                Scrutinee::Enum(sig),
            ) => {
                if let Some(path) = enum_path {
                    if !self.pattern_path_matches(env, path, sig) {
                        self.error(
                            &file,
                            pattern.span,
                            format!(
                                "pattern names `{path}` but the value has type `{}`",
                                sig.name.name
                            ),
                        );
                        return;
                    }
                }
                let Some((index, variant_sig)) = sig.variant(variant) else {
                    self.error(
                        &file,
                        pattern.span,
                        format!("enum `{}` has no variant `{}`", sig.name.name, variant),
                    );
                    return;
                };
                let payload = variant_sig.payload.clone();
                match (&payload, fields.as_slice()) {
                    (Some(payload), [field]) => self.check_payload_pattern(env, field, payload),
                    (None, []) => {}
                    (Some(_), []) => {
                        self.error(
                            &file,
                            pattern.span,
                            format!(
                                "variant `{}.{}` carries a value; bind it or use `_`",
                                sig.name.name, variant
                            ),
                        );
                    }
                    (Some(_), _) => {
                        self.error(
                            &file,
                            pattern.span,
                            format!(
                                "variant `{}.{}` carries 1 value, found {} sub-patterns",
                                sig.name.name,
                                variant,
                                fields.len()
                            ),
                        );
                    }
                    (None, _) => {
                        self.error(
                            &file,
                            pattern.span,
                            format!("variant `{}.{}` carries no value", sig.name.name, variant),
                        );
                    }
                }
                self.record_variant(&file, pattern, &sig.name, index, coverage);
            }
            (_, scrutinee) => {
                let found = match scrutinee {
                    Scrutinee::Enum(sig) => sig.name.name.clone(),
                    _ => scrutinee_ty.to_string(),
                };
                self.error(
                    &file,
                    pattern.span,
                    format!("pattern does not match values of type `{found}`"),
                );
            }
        }
    }

    fn check_payload_pattern(&mut self, env: &mut FnEnv, field: &Pattern, payload: &Type) {
        match &field.kind {
            PatternKind::Wildcard => {}
            PatternKind::Bind(name) => {
                self.resolutions.expr_types.insert(field.id, payload.clone());
                env.declare(name, payload.clone(), Mutability::Immutable);
            }
            _ => {
                self.error_with_help(
                    env.file(),
                    field.span,
                    "only bindings and `_` are allowed inside variant patterns",
                    "bind the payload and match on it in the arm body",
                );
            }
        }
    }

    fn record_variant(
        &mut self,
        file: &std::path::Path,
        pattern: &Pattern,
        enum_name: &QualName,
        index: usize,
        coverage: &mut Coverage,
    ) {
        if !coverage.variants.insert(index) {
            self.duplicate_arm(file, pattern.span);
        }
        self.resolutions.variants.insert(
            pattern.id,
            VariantRef {
                enum_name: enum_name.clone(),
                index,
            },
        );
    }

    fn duplicate_arm(&mut self, file: &std::path::Path, span: Span) {
        self.error(file, span, "unreachable match arm: this pattern is already covered");
    }

    /// Whether the enum named in a pattern is the scrutinee's enum or the generic
    /// declaration it was instantiated from.
    fn pattern_path_matches(&mut self, env: &FnEnv, path: &crate::language::ast::PathExpr, sig: &EnumSig) -> bool {
        if path.is_simple() && path.last() == "Self" {
            return matches!(env.type_env.get("Self"), Some(Type::Enum(name)) if *name == sig.name);
        }
        match self.lookup_name(&env.module, &path.segments, Namespace::Type, true) {
            Lookup::Found(name) => {
                name == sig.name || sig.generic_base.as_ref() == Some(&name)
            }
            _ => false,
        }
    }

    fn check_exhaustive(&mut self, file: &std::path::Path, span: Span, scrutinee: &Scrutinee, coverage: &Coverage) {
        if coverage.catch_all {
            return;
        }
        match scrutinee {
            Scrutinee::Enum(sig) => {
                let missing: Vec<String> = sig
                    .variants
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| !coverage.variants.contains(index))
                    .map(|(_, variant)| format!("`{}`", variant.name))
                    .collect();
                if !missing.is_empty() {
                    self.error(
                        file,
                        span,
                        format!("non-exhaustive match: missing variant(s) {}", missing.join(", ")),
                    );
                }
            }
            Scrutinee::Bool => {
                let missing: Vec<&str> = [true, false]
                    .into_iter()
                    .filter(|value| !coverage.bools.contains(value))
                    .map(|value| if value { "`true`" } else { "`false`" })
                    .collect();
                if !missing.is_empty() {
                    self.error(
                        file,
                        span,
                        format!("non-exhaustive match: missing {}", missing.join(", ")),
                    );
                }
            }
            Scrutinee::Int(Type::Range { min, max, .. })
                if max - min < 256 && (*min..=*max).all(|value| coverage.ints.contains(&value)) => {}
            Scrutinee::Int(_) | Scrutinee::Str => {
                self.error_with_help(
                    file,
                    span,
                    "non-exhaustive match: not every value is covered",
                    "add a `_` arm",
                );
            }
            Scrutinee::Invalid => {}
        }
    }
}

fn is_unit_variant(sig: &EnumSig, name: &str) -> bool {
    sig.variant(name)
        .is_some_and(|(_, variant)| variant.payload.is_none())
}
