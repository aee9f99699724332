use super::{ir_type, FnLowering};
use crate::language::{
    ast::{Expr, MatchExpr, Pattern, PatternKind},
    errors::InternalError,
    ir::{BinOp, BlockId, Constant, Instr, IrType, Operand, Terminator},
    types::IntKind,
};

/// How one arm is selected by the decision chain.
enum Test {
    Always,
    Equals(Operand),
}

impl FnLowering<'_> {
    /// Evaluates the scrutinee once (and its tag once for enums), then tests the
    /// arms in order. The last fallthrough goes to a catch-all arm or the join.
    pub(super) fn lower_match(&mut self, expr: &Expr, match_expr: &MatchExpr) -> Result<Operand, InternalError> {
        let scrutinee_ty = self.type_of(&match_expr.scrutinee)?;
        let scrutinee = self.lower_expr(&match_expr.scrutinee)?;
        let discriminant = match &scrutinee_ty {
            IrType::Enum(_) => {
                let dest = self.new_temp(IrType::Int(IntKind::I32));
                self.emit(Instr::Tag {
                    dest,
                    value: scrutinee.clone(),
                });
                Operand::Temp(dest)
            }
            _ => scrutinee.clone(),
        };
        let compare_ty = match &scrutinee_ty {
            IrType::Enum(_) => IrType::Int(IntKind::I32),
            other => other.clone(),
        };

        let result = self.result_slot(expr)?;
        let join = self.new_block();
        let mut arms: Vec<(BlockId, usize)> = Vec::with_capacity(match_expr.arms.len());
        let mut exhausted = false;
        for (position, arm) in match_expr.arms.iter().enumerate() {
            let arm_block = self.new_block();
            arms.push((arm_block, position));
            match self.arm_test(&arm.pattern, &scrutinee_ty)? {
                Test::Always => {
                    self.terminate(Terminator::Jump(arm_block));
                    exhausted = true;
                    break;
                }
                Test::Equals(expected) => {
                    let cond = self.new_temp(IrType::Bool);
                    self.emit(Instr::Binary {
                        dest: cond,
                        op: BinOp::Eq,
                        lhs: discriminant.clone(),
                        rhs: expected,
                        ty: compare_ty.clone(),
                    });
                    let next = self.new_block();
                    self.terminate(Terminator::Branch {
                        cond: Operand::Temp(cond),
                        then_block: arm_block,
                        else_block: next,
                    });
                    self.switch_to(next);
                }
            }
        }
        if !exhausted {
            self.terminate(Terminator::Jump(join));
        }

        for (arm_block, position) in arms {
            let arm = &match_expr.arms[position];
            self.switch_to(arm_block);
            self.push_scope();
            self.bind_pattern(&arm.pattern, &scrutinee, &scrutinee_ty)?;
            let value = self.lower_expr(&arm.body);
            self.pop_scope();
            let value = value?;
            self.store_result(result, value);
            self.terminate(Terminator::Jump(join));
        }

        self.switch_to(join);
        Ok(match result {
            Some(slot) => self.load(slot),
            None => Operand::unit(),
        })
    }

    fn arm_test(&self, pattern: &Pattern, scrutinee_ty: &IrType) -> Result<Test, InternalError> {
        if let Some(variant) = self.program.resolutions.variants.get(&pattern.id) {
            return Ok(Test::Equals(Operand::Const(Constant::Int {
                value: variant.index as i128,
                kind: IntKind::I32,
            })));
        }
        Ok(match (&pattern.kind, scrutinee_ty) {
            (PatternKind::Wildcard | PatternKind::Bind(_), _) => Test::Always,
            (PatternKind::Int(value), IrType::Int(kind)) => Test::Equals(Operand::Const(Constant::Int {
                value: *value,
                kind: *kind,
            })),
            (PatternKind::Bool(value), IrType::Bool) => Test::Equals(Operand::bool(*value)),
            (PatternKind::String(value), IrType::Str) => {
                Test::Equals(Operand::Const(Constant::Str(value.clone())))
            }
            (_, ty) => {
                return Err(InternalError::new(format!(
                    "pattern does not apply to a scrutinee of type `{ty}`"
                )));
            }
        })
    }

    /// Introduces the names an arm's pattern binds.
    fn bind_pattern(&mut self, pattern: &Pattern, scrutinee: &Operand, scrutinee_ty: &IrType) -> Result<(), InternalError> {
        let program = self.program;
        let variant = program.resolutions.variants.get(&pattern.id);
        match (&pattern.kind, variant) {
            (PatternKind::Bind(name), None) => {
                let slot = self.new_slot(scrutinee_ty.clone());
                self.emit(Instr::Store {
                    slot,
                    value: scrutinee.clone(),
                });
                self.declare(name, slot);
            }
            (PatternKind::Variant { variant, fields, .. }, Some(resolved)) => {
                for (field, sub) in fields.iter().enumerate() {
                    let PatternKind::Bind(name) = &sub.kind else {
                        continue;
                    };
                    let ty = program
                        .resolutions
                        .type_of(sub.id)
                        .ok_or_else(|| InternalError::new(format!("payload binding `{name}` has no type")))?;
                    let dest = self.new_temp(ir_type(ty)?);
                    self.emit(Instr::Payload {
                        dest,
                        value: scrutinee.clone(),
                        enum_name: resolved.enum_name.to_string(),
                        variant: variant.clone(),
                        index: resolved.index,
                        field,
                    });
                    let slot = self.new_slot(ir_type(ty)?);
                    self.emit(Instr::Store {
                        slot,
                        value: Operand::Temp(dest),
                    });
                    self.declare(name, slot);
                }
            }
            _ => {}
        }
        Ok(())
    }
}
