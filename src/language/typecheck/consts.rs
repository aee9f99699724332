use super::checker::{Checker, ModuleRef};
use crate::language::{
    ast::{BinaryOp, ElseBranch, Expr, ExprKind, IfExpr, Literal, UnaryOp},
    resolve::Namespace,
    span::Span,
    types::{IntKind, QualName, Type},
};
use std::{collections::HashMap, path::Path};
use thiserror::Error;
use tracing::debug;

/// Value of a compile-time constant. Integers are held in `i128`, which covers
/// every supported integer type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConstValue {
    /// Evaluation failed and the failure has been reported.
    Bad,
    Int(i128),
    Bool(bool),
    Str(String),
}

pub(super) enum ConstState {
    InProgress,
    Done(Type, ConstValue),
}

#[derive(Debug, Error, PartialEq, Eq)]
enum ConstError {
    #[error("arithmetic overflow in constant expression: result does not fit in `{0}`")]
    Overflow(IntKind),
    #[error("division by zero in constant expression")]
    DivisionByZero,
    #[error("remainder by zero in constant expression")]
    RemainderByZero,
    #[error("overflow in constant expression: `{0}` minimum divided by -1")]
    SignedDivisionOverflow(IntKind),
    #[error("shift count `{count}` is out of range for `{kind}`")]
    ShiftOutOfRange { count: i128, kind: IntKind },
}

/// Whether an integer value inhabits `ty`; `UntypedInt` defaults to `i64`.
pub(super) fn type_admits(ty: &Type, value: i128) -> bool {
    match ty {
        Type::Int(kind) => kind.contains(value),
        Type::Range { min, max, .. } => *min <= value && value <= *max,
        Type::UntypedInt => IntKind::I64.contains(value),
        _ => true,
    }
}

fn apply_int(op: BinaryOp, a: i128, b: i128, kind: IntKind) -> Result<i128, ConstError> {
    let shift_count = |count: i128| {
        if count < 0 || count >= i128::from(kind.bits()) {
            Err(ConstError::ShiftOutOfRange { count, kind })
        } else {
            Ok(count as u32)
        }
    };
    let result = match op {
        BinaryOp::Add => a.checked_add(b).ok_or(ConstError::Overflow(kind))?,
        BinaryOp::Sub => a.checked_sub(b).ok_or(ConstError::Overflow(kind))?,
        BinaryOp::Mul => a.checked_mul(b).ok_or(ConstError::Overflow(kind))?,
        BinaryOp::Div | BinaryOp::Rem => {
            if b == 0 {
                return Err(if op == BinaryOp::Div {
                    ConstError::DivisionByZero
                } else {
                    ConstError::RemainderByZero
                });
            }
            if kind.is_signed() && a == kind.min() && b == -1 {
                return Err(ConstError::SignedDivisionOverflow(kind));
            }
            if op == BinaryOp::Div {
                a / b
            } else {
                a % b
            }
        }
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        // Left shifts must not move set bits out of the type.
        BinaryOp::Shl => {
            let count = shift_count(b)?;
            a.checked_mul(1i128 << count).ok_or(ConstError::Overflow(kind))?
        }
        BinaryOp::Shr => a >> shift_count(b)?,
        _ => unreachable!("comparison and logical operators are handled by the caller"),
    };
    if kind.contains(result) {
        Ok(result)
    } else {
        Err(ConstError::Overflow(kind))
    }
}

impl Checker {
    /// Type and value of a declared constant, evaluating it on first use.
    pub(super) fn const_value(&mut self, name: &QualName, site: Option<(&Path, Span)>) -> (Type, ConstValue) {
        match self.const_state.get(name) {
            Some(ConstState::Done(ty, value)) => return (ty.clone(), value.clone()),
            Some(ConstState::InProgress) => {
                let (file, span) = match (site, self.const_decls.get(name)) {
                    (Some((file, span)), _) => (file.to_path_buf(), span),
                    (None, Some(decl)) => (decl.module.file.clone(), decl.def.span),
                    (None, None) => return (Type::Poison, ConstValue::Bad),
                };
                self.error(
                    &file,
                    span,
                    format!("cycle detected while evaluating constant `{}`", name.name),
                );
                return (Type::Poison, ConstValue::Bad);
            }
            None => {}
        }
        let Some(decl) = self.const_decls.get(name).cloned() else {
            return (Type::Poison, ConstValue::Bad);
        };
        self.const_state.insert(name.clone(), ConstState::InProgress);

        let declared = decl
            .def
            .ty
            .as_ref()
            .map(|ann| self.resolve_type(&decl.module, ann, &HashMap::new()));
        let (ty, value) = self.eval_const_expr(&decl.module, &decl.def.value, declared.as_ref());
        let (ty, value) = match declared {
            Some(Type::Poison) => (Type::Poison, ConstValue::Bad),
            Some(declared) => self.settle_const(&decl.module, &decl.def.value, &declared, ty, value),
            None if ty.is_poison() => (Type::Poison, ConstValue::Bad),
            None => {
                let ty = if matches!(ty, Type::UntypedInt) {
                    Type::Int(IntKind::I64)
                } else {
                    ty
                };
                self.settle_const(&decl.module, &decl.def.value, &ty.clone(), ty, value)
            }
        };
        if !matches!(ty, Type::Int(_) | Type::Range { .. } | Type::Bool | Type::Str | Type::Poison) {
            self.error(
                &decl.module.file,
                decl.def.span,
                format!("constants must have integer, bool or string type, found `{ty}`"),
            );
        }
        if let ConstValue::Int(value) = value {
            debug!(constant = %name, value = %value, "evaluated constant");
        }
        self.const_state
            .insert(name.clone(), ConstState::Done(ty.clone(), value.clone()));
        (ty, value)
    }

    fn settle_const(
        &mut self,
        module: &ModuleRef,
        expr: &Expr,
        declared: &Type,
        actual: Type,
        value: ConstValue,
    ) -> (Type, ConstValue) {
        if actual.is_poison() || value == ConstValue::Bad {
            return (declared.clone(), ConstValue::Bad);
        }
        let compatible = actual == *declared
            || (matches!(actual, Type::UntypedInt) && declared.is_integral())
            || matches!((&actual, declared), (Type::Range { base, .. }, Type::Int(kind)) if base == kind);
        if !compatible {
            self.error(
                &module.file,
                expr.span,
                format!("mismatched types: expected `{declared}`, found `{actual}`"),
            );
            return (declared.clone(), ConstValue::Bad);
        }
        if let ConstValue::Int(v) = value {
            if !type_admits(declared, v) {
                self.error(
                    &module.file,
                    expr.span,
                    format!("constant value `{v}` does not fit in `{declared}`"),
                );
                return (declared.clone(), ConstValue::Bad);
            }
        }
        (declared.clone(), value)
    }

    /// Evaluates `expr` in the context of `module`. Errors are reported and yield
    /// [`ConstValue::Bad`].
    pub(super) fn eval_const_expr(
        &mut self,
        module: &ModuleRef,
        expr: &Expr,
        expected: Option<&Type>,
    ) -> (Type, ConstValue) {
        match &expr.kind {
            ExprKind::Literal(Literal::Int(value)) => match expected.filter(|ty| ty.is_integral()) {
                Some(target) => {
                    if type_admits(target, *value) {
                        (target.clone(), ConstValue::Int(*value))
                    } else {
                        self.error(
                            &module.file,
                            expr.span,
                            format!("literal `{value}` does not fit in `{target}`"),
                        );
                        (Type::Poison, ConstValue::Bad)
                    }
                }
                None => (Type::UntypedInt, ConstValue::Int(*value)),
            },
            ExprKind::Literal(Literal::Bool(value)) => (Type::Bool, ConstValue::Bool(*value)),
            ExprKind::Literal(Literal::String(value)) => (Type::Str, ConstValue::Str(value.clone())),
            ExprKind::Path(path) => {
                let lookup = self.lookup_name(module, &path.segments, Namespace::Const, false);
                match self.report_lookup(&module.file, expr.span, lookup, "constant", &path.to_string()) {
                    Some(name) => self.const_value(&name, Some((&module.file, expr.span))),
                    None => (Type::Poison, ConstValue::Bad),
                }
            }
            ExprKind::Unary { op, expr: inner } => self.eval_const_unary(module, expr, *op, inner, expected),
            ExprKind::Binary { op, left, right } => {
                self.eval_const_binary(module, expr, *op, left, right, expected)
            }
            ExprKind::Cast { expr: inner, ty } => {
                let target = self.resolve_type(module, ty, &HashMap::new());
                let (_, value) = self.eval_const_expr(module, inner, None);
                match value {
                    ConstValue::Bad => (target, ConstValue::Bad),
                    ConstValue::Int(value) if target.is_integral() => {
                        if type_admits(&target, value) {
                            (target, ConstValue::Int(value))
                        } else {
                            self.error(
                                &module.file,
                                expr.span,
                                format!("cast of `{value}` to `{target}` is out of range"),
                            );
                            (target, ConstValue::Bad)
                        }
                    }
                    _ => {
                        self.error(
                            &module.file,
                            expr.span,
                            "only integer casts are allowed in constant expressions",
                        );
                        (Type::Poison, ConstValue::Bad)
                    }
                }
            }
            ExprKind::If(if_expr) => self.eval_const_if(module, if_expr, expected),
            ExprKind::Block(block) if block.statements.is_empty() => match &block.tail {
                Some(tail) => self.eval_const_expr(module, tail, expected),
                None => self.not_constant(module, expr.span),
            },
            _ => self.not_constant(module, expr.span),
        }
    }

    fn not_constant(&mut self, module: &ModuleRef, span: Span) -> (Type, ConstValue) {
        self.error(&module.file, span, "expression is not a constant");
        (Type::Poison, ConstValue::Bad)
    }

    fn eval_const_if(&mut self, module: &ModuleRef, if_expr: &IfExpr, expected: Option<&Type>) -> (Type, ConstValue) {
        let (_, condition) = self.eval_const_expr(module, &if_expr.condition, Some(&Type::Bool));
        let taken = match condition {
            ConstValue::Bool(taken) => taken,
            ConstValue::Bad => return (Type::Poison, ConstValue::Bad),
            _ => {
                self.error(
                    &module.file,
                    if_expr.condition.span,
                    "condition of a constant `if` must be a bool",
                );
                return (Type::Poison, ConstValue::Bad);
            }
        };
        if taken {
            return match (&if_expr.then_branch.tail, if_expr.then_branch.statements.is_empty()) {
                (Some(tail), true) => self.eval_const_expr(module, tail, expected),
                _ => self.not_constant(module, if_expr.then_branch.span),
            };
        }
        match &if_expr.else_branch {
            Some(ElseBranch::Block(block)) => match (&block.tail, block.statements.is_empty()) {
                (Some(tail), true) => self.eval_const_expr(module, tail, expected),
                _ => self.not_constant(module, block.span),
            },
            Some(ElseBranch::ElseIf(nested)) => self.eval_const_if(module, nested, expected),
            None => {
                self.error(
                    &module.file,
                    if_expr.span,
                    "`if` in a constant expression needs an `else` branch",
                );
                (Type::Poison, ConstValue::Bad)
            }
        }
    }

    fn eval_const_unary(
        &mut self,
        module: &ModuleRef,
        expr: &Expr,
        op: UnaryOp,
        inner: &Expr,
        expected: Option<&Type>,
    ) -> (Type, ConstValue) {
        if op == UnaryOp::Not {
            return match self.eval_const_expr(module, inner, Some(&Type::Bool)) {
                (_, ConstValue::Bool(value)) => (Type::Bool, ConstValue::Bool(!value)),
                (_, ConstValue::Bad) => (Type::Bool, ConstValue::Bad),
                (ty, _) => {
                    self.error(
                        &module.file,
                        expr.span,
                        format!("cannot apply unary `!` to `{ty}`"),
                    );
                    (Type::Poison, ConstValue::Bad)
                }
            };
        }
        let hint = expected.filter(|ty| ty.is_integral()).map(Type::decay);
        let (ty, value) = self.eval_const_expr(module, inner, hint.as_ref());
        let value = match value {
            ConstValue::Int(value) => value,
            ConstValue::Bad => return (ty, ConstValue::Bad),
            _ => {
                self.error(
                    &module.file,
                    expr.span,
                    format!("cannot apply unary `{}` to `{}`", op.symbol(), ty),
                );
                return (Type::Poison, ConstValue::Bad);
            }
        };
        let ty = ty.decay();
        let kind = ty.int_kind().unwrap_or(IntKind::I64);
        let result = match op {
            UnaryOp::Neg => -value,
            _ if kind.is_signed() => !value,
            _ => kind.max() - value,
        };
        if !kind.contains(result) {
            self.error(&module.file, expr.span, ConstError::Overflow(kind).to_string());
            return (ty, ConstValue::Bad);
        }
        (ty, ConstValue::Int(result))
    }

    fn eval_const_binary(
        &mut self,
        module: &ModuleRef,
        expr: &Expr,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        expected: Option<&Type>,
    ) -> (Type, ConstValue) {
        if op.is_logical() {
            let (_, lhs) = self.eval_const_expr(module, left, Some(&Type::Bool));
            let lhs = match lhs {
                ConstValue::Bool(value) => value,
                ConstValue::Bad => return (Type::Bool, ConstValue::Bad),
                _ => return self.bad_operands(module, expr, op, "bool"),
            };
            // Short-circuit like the runtime does.
            if (op == BinaryOp::And && !lhs) || (op == BinaryOp::Or && lhs) {
                return (Type::Bool, ConstValue::Bool(lhs));
            }
            return match self.eval_const_expr(module, right, Some(&Type::Bool)) {
                (_, ConstValue::Bool(rhs)) => (Type::Bool, ConstValue::Bool(rhs)),
                (_, ConstValue::Bad) => (Type::Bool, ConstValue::Bad),
                _ => self.bad_operands(module, expr, op, "bool"),
            };
        }

        let hint = if op.is_comparison() {
            None
        } else {
            expected.filter(|ty| ty.is_integral()).map(Type::decay)
        };
        let (lt, lv) = self.eval_const_expr(module, left, hint.as_ref());
        let (rt, rv) = self.eval_const_expr(module, right, hint.as_ref());
        if lv == ConstValue::Bad || rv == ConstValue::Bad {
            let ty = if op.is_comparison() { Type::Bool } else { lt.decay() };
            return (ty, ConstValue::Bad);
        }

        let operand = match (&lt, &rt) {
            (Type::UntypedInt, Type::UntypedInt) => Type::UntypedInt,
            (Type::UntypedInt, other) | (other, Type::UntypedInt) if other.is_integral() => {
                let target = other.decay();
                let untyped = if matches!(lt, Type::UntypedInt) { &lv } else { &rv };
                if let ConstValue::Int(value) = untyped {
                    if !type_admits(&target, *value) {
                        self.error(
                            &module.file,
                            expr.span,
                            format!("literal `{value}` does not fit in `{target}`"),
                        );
                        return (target, ConstValue::Bad);
                    }
                }
                target
            }
            (a, b) if a.decay() == b.decay() => a.decay(),
            (a, b) => {
                self.error(
                    &module.file,
                    expr.span,
                    format!("mismatched operand types for `{}`: `{}` and `{}`", op.symbol(), a, b),
                );
                return (Type::Poison, ConstValue::Bad);
            }
        };

        match (lv, rv) {
            (ConstValue::Int(a), ConstValue::Int(b)) => {
                if op.is_comparison() {
                    let result = match op {
                        BinaryOp::Eq => a == b,
                        BinaryOp::NotEq => a != b,
                        BinaryOp::Lt => a < b,
                        BinaryOp::LtEq => a <= b,
                        BinaryOp::Gt => a > b,
                        _ => a >= b,
                    };
                    return (Type::Bool, ConstValue::Bool(result));
                }
                let kind = operand.int_kind().unwrap_or(IntKind::I64);
                match apply_int(op, a, b, kind) {
                    Ok(value) => (operand, ConstValue::Int(value)),
                    Err(error) => {
                        self.error(&module.file, expr.span, error.to_string());
                        (operand, ConstValue::Bad)
                    }
                }
            }
            (ConstValue::Bool(a), ConstValue::Bool(b)) if op.is_equality() => {
                (Type::Bool, ConstValue::Bool((a == b) == (op == BinaryOp::Eq)))
            }
            (ConstValue::Str(a), ConstValue::Str(b)) if op.is_equality() => {
                (Type::Bool, ConstValue::Bool((a == b) == (op == BinaryOp::Eq)))
            }
            _ => {
                let found = operand.to_string();
                self.bad_operands(module, expr, op, &found)
            }
        }
    }

    fn bad_operands(&mut self, module: &ModuleRef, expr: &Expr, op: BinaryOp, found: &str) -> (Type, ConstValue) {
        self.error(
            &module.file,
            expr.span,
            format!("operator `{}` is not supported for `{}` in constant expressions", op.symbol(), found),
        );
        (Type::Poison, ConstValue::Bad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shifts_stay_within_the_type() {
        assert_eq!(apply_int(BinaryOp::Shl, 1, 7, IntKind::U8), Ok(128));
        assert_eq!(
            apply_int(BinaryOp::Shl, 1, 8, IntKind::U8),
            Err(ConstError::ShiftOutOfRange {
                count: 8,
                kind: IntKind::U8
            })
        );
        assert_eq!(
            apply_int(BinaryOp::Shl, 3, 7, IntKind::U8),
            Err(ConstError::Overflow(IntKind::U8))
        );
        assert_eq!(apply_int(BinaryOp::Shr, -8, 1, IntKind::I32), Ok(-4));
    }

    #[test]
    fn division_edge_cases() {
        assert_eq!(apply_int(BinaryOp::Div, -7, 2, IntKind::I32), Ok(-3));
        assert_eq!(apply_int(BinaryOp::Rem, -7, 2, IntKind::I32), Ok(-1));
        assert_eq!(
            apply_int(BinaryOp::Div, 1, 0, IntKind::I32),
            Err(ConstError::DivisionByZero)
        );
        assert_eq!(
            apply_int(BinaryOp::Rem, 1, 0, IntKind::I32),
            Err(ConstError::RemainderByZero)
        );
        assert_eq!(
            apply_int(BinaryOp::Div, i128::from(i8::MIN), -1, IntKind::I8),
            Err(ConstError::SignedDivisionOverflow(IntKind::I8))
        );
    }

    #[test]
    fn results_are_checked_against_the_kind() {
        assert_eq!(
            apply_int(BinaryOp::Add, 200, 100, IntKind::U8),
            Err(ConstError::Overflow(IntKind::U8))
        );
        assert_eq!(
            apply_int(BinaryOp::Sub, 0, 1, IntKind::U32),
            Err(ConstError::Overflow(IntKind::U32))
        );
        assert_eq!(apply_int(BinaryOp::Mul, -3, 4, IntKind::I16), Ok(-12));
    }

    #[test]
    fn range_types_admit_their_bounds() {
        let ty = Type::Range {
            base: IntKind::I32,
            min: 0,
            max: 9,
        };
        assert!(type_admits(&ty, 0));
        assert!(type_admits(&ty, 9));
        assert!(!type_admits(&ty, 10));
        assert!(!type_admits(&Type::UntypedInt, i128::from(u64::MAX)));
    }
}
