//! Lowers a checked program into the block-structured IR.
//!
//! Lowering trusts the checker: every node it visits must carry the resolutions
//! recorded for it. A missing entry is a contract violation and surfaces as an
//! [`InternalError`] instead of being guessed around.

mod matching;
#[cfg(test)]
mod tests;

use crate::language::{
    ast::{
        BinaryOp, Block, ElseBranch, Expr, ExprKind, FieldAssignStmt, IfExpr, LetStmt, Literal,
        Statement, StructLiteralField, UnaryOp,
    },
    errors::InternalError,
    ir::{
        BinOp, BlockId, Constant, EntryPoint, FieldRef, Instr, IrBlock, IrEnum, IrFunction,
        IrProgram, IrStruct, IrType, IrVariant, Operand, RuntimeCall, SlotId, TempId, Terminator,
    },
    prelude::Builtin,
    typecheck::{CallTarget, CheckedFunction, CheckedProgram, ConstValue, Intrinsic},
    types::{IntKind, QualName, Type},
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Lowers every checked function. `entry` names the function the generated
/// program starts from, if any.
pub fn lower_program(program: &CheckedProgram, entry: Option<&QualName>) -> Result<IrProgram, InternalError> {
    let mut ir = IrProgram::default();
    for (name, sig) in &program.signatures.structs {
        let fields = sig
            .fields
            .iter()
            .map(|field| Ok((field.name.clone(), ir_type(&field.ty)?)))
            .collect::<Result<Vec<_>, InternalError>>()?;
        ir.structs.insert(
            name.to_string(),
            IrStruct {
                name: name.to_string(),
                fields,
            },
        );
    }
    for (name, sig) in &program.signatures.enums {
        let variants = sig
            .variants
            .iter()
            .map(|variant| {
                Ok(IrVariant {
                    name: variant.name.clone(),
                    payload: variant.payload.as_ref().map(ir_type).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, InternalError>>()?;
        ir.enums.insert(
            name.to_string(),
            IrEnum {
                name: name.to_string(),
                variants,
            },
        );
    }

    for (name, function) in &program.functions {
        let lowered = FnLowering::new(program, &ir.structs, name)?.lower(function)?;
        lowered.verify()?;
        debug!(
            function = %name,
            blocks = lowered.blocks.len(),
            temps = lowered.temps.len(),
            "lowered function"
        );
        ir.functions.insert(lowered.name.clone(), lowered);
    }

    if let Some(entry) = entry {
        let function = ir
            .functions
            .get(&entry.to_string())
            .ok_or_else(|| InternalError::new(format!("entry function `{entry}` was not lowered")))?;
        ir.entry = Some(EntryPoint {
            function: function.name.clone(),
            ret: function.ret.clone(),
        });
    }
    Ok(ir)
}

/// Storage type of a checked type. Range types are stored as their base integer
/// and literals nothing constrained default to `i64`.
pub fn ir_type(ty: &Type) -> Result<IrType, InternalError> {
    Ok(match ty {
        Type::Unit => IrType::Unit,
        Type::Bool => IrType::Bool,
        Type::Int(kind) | Type::Range { base: kind, .. } => IrType::Int(*kind),
        Type::UntypedInt => IrType::Int(IntKind::I64),
        Type::Str => IrType::Str,
        Type::Struct(name) => IrType::Struct(name.to_string()),
        Type::Enum(name) => IrType::Enum(name.to_string()),
        Type::List(elem) => IrType::List(Box::new(ir_type(elem)?)),
        Type::Poison | Type::Param(_) => {
            return Err(InternalError::new(format!("type `{ty}` reached lowering")));
        }
    })
}

struct PendingBlock {
    id: BlockId,
    instrs: Vec<Instr>,
    terminator: Option<Terminator>,
}

struct LoopControl {
    continue_block: BlockId,
    break_block: BlockId,
}

/// Lowering state for one function.
struct FnLowering<'a> {
    program: &'a CheckedProgram,
    structs: &'a BTreeMap<String, IrStruct>,
    name: String,
    params: Vec<IrType>,
    ret: IrType,
    slots: Vec<IrType>,
    temps: Vec<IrType>,
    blocks: Vec<PendingBlock>,
    current: BlockId,
    scopes: Vec<HashMap<String, SlotId>>,
    loops: Vec<LoopControl>,
}

impl<'a> FnLowering<'a> {
    fn new(
        program: &'a CheckedProgram,
        structs: &'a BTreeMap<String, IrStruct>,
        name: &QualName,
    ) -> Result<Self, InternalError> {
        let sig = program
            .signatures
            .functions
            .get(name)
            .ok_or_else(|| InternalError::new(format!("no signature for `{name}`")))?;
        let params = sig
            .params
            .iter()
            .map(|param| ir_type(&param.ty))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            program,
            structs,
            name: name.to_string(),
            params,
            ret: ir_type(&sig.ret)?,
            slots: Vec::new(),
            temps: Vec::new(),
            blocks: Vec::new(),
            current: BlockId(0),
            scopes: Vec::new(),
            loops: Vec::new(),
        })
    }

    fn lower(mut self, function: &CheckedFunction) -> Result<IrFunction, InternalError> {
        let entry = self.new_block();
        self.switch_to(entry);
        self.push_scope();
        for (index, param) in function.def.params.iter().enumerate() {
            let slot = self.new_slot(self.params[index].clone());
            self.emit(Instr::Store {
                slot,
                value: Operand::Param(index),
            });
            self.declare(&param.name, slot);
        }

        let value = self.lower_block(&function.def.body)?;
        if function.def.body.tail.is_some() || self.ret == IrType::Unit {
            self.terminate(Terminator::Return(value));
        } else {
            self.terminate(Terminator::Unreachable);
        }
        self.pop_scope();
        self.finish()
    }

    /// Drops blocks control cannot reach and checks that the rest are terminated.
    fn finish(self) -> Result<IrFunction, InternalError> {
        let index: HashMap<BlockId, usize> = self
            .blocks
            .iter()
            .enumerate()
            .map(|(position, block)| (block.id, position))
            .collect();
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from([BlockId(0)]);
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            let block = index
                .get(&id)
                .map(|position| &self.blocks[*position])
                .ok_or_else(|| InternalError::new(format!("`{}` jumps to missing block {id}", self.name)))?;
            if let Some(terminator) = &block.terminator {
                queue.extend(terminator.targets());
            }
        }

        let mut blocks = Vec::with_capacity(reachable.len());
        for block in self.blocks {
            if !reachable.contains(&block.id) {
                continue;
            }
            let terminator = block.terminator.ok_or_else(|| {
                InternalError::new(format!("block {} of `{}` has no terminator", block.id, self.name))
            })?;
            blocks.push(IrBlock {
                id: block.id,
                instrs: block.instrs,
                terminator,
            });
        }
        Ok(IrFunction {
            name: self.name,
            params: self.params,
            ret: self.ret,
            slots: self.slots,
            temps: self.temps,
            blocks,
        })
    }

    // ----- builder ------------------------------------------------------------------

    fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(PendingBlock {
            id,
            instrs: Vec::new(),
            terminator: None,
        });
        id
    }

    fn switch_to(&mut self, id: BlockId) {
        self.current = id;
    }

    fn current_block(&mut self) -> &mut PendingBlock {
        let position = self.current.0 as usize;
        &mut self.blocks[position]
    }

    fn emit(&mut self, instr: Instr) {
        self.current_block().instrs.push(instr);
    }

    fn terminate(&mut self, terminator: Terminator) {
        let block = self.current_block();
        if block.terminator.is_none() {
            block.terminator = Some(terminator);
        }
    }

    /// Ends the current block and continues in a fresh one nothing jumps to.
    fn terminate_and_continue(&mut self, terminator: Terminator) {
        self.terminate(terminator);
        let dead = self.new_block();
        self.switch_to(dead);
    }

    fn new_temp(&mut self, ty: IrType) -> TempId {
        self.temps.push(ty);
        TempId(self.temps.len() as u32 - 1)
    }

    fn new_slot(&mut self, ty: IrType) -> SlotId {
        self.slots.push(ty);
        SlotId(self.slots.len() as u32 - 1)
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, slot: SlotId) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), slot);
        }
    }

    fn lookup(&self, name: &str) -> Option<SlotId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn local(&self, name: &str) -> Result<SlotId, InternalError> {
        self.lookup(name)
            .ok_or_else(|| InternalError::new(format!("unbound local `{name}` in `{}`", self.name)))
    }

    fn slot_type(&self, slot: SlotId) -> IrType {
        self.slots[slot.0 as usize].clone()
    }

    fn load(&mut self, slot: SlotId) -> Operand {
        let dest = self.new_temp(self.slot_type(slot));
        self.emit(Instr::Load { dest, slot });
        Operand::Temp(dest)
    }

    fn checked_type(&self, expr: &Expr) -> Result<&'a Type, InternalError> {
        self.program
            .resolutions
            .type_of(expr.id)
            .ok_or_else(|| InternalError::new(format!("expression {} has no recorded type", expr.id)))
    }

    fn type_of(&self, expr: &Expr) -> Result<IrType, InternalError> {
        ir_type(self.checked_type(expr)?)
    }

    fn field_ref(&self, struct_name: &str, field: &str) -> Result<(FieldRef, IrType), InternalError> {
        let layout = self
            .structs
            .get(struct_name)
            .ok_or_else(|| InternalError::new(format!("unknown struct `{struct_name}`")))?;
        layout
            .fields
            .iter()
            .position(|(name, _)| name == field)
            .map(|index| {
                (
                    FieldRef {
                        struct_name: struct_name.to_string(),
                        index,
                    },
                    layout.fields[index].1.clone(),
                )
            })
            .ok_or_else(|| InternalError::new(format!("struct `{struct_name}` has no field `{field}`")))
    }

    // ----- statements ---------------------------------------------------------------

    fn lower_block(&mut self, block: &Block) -> Result<Operand, InternalError> {
        self.push_scope();
        for stmt in &block.statements {
            self.lower_statement(stmt)?;
        }
        let value = match &block.tail {
            Some(tail) => self.lower_expr(tail)?,
            None => Operand::unit(),
        };
        self.pop_scope();
        Ok(value)
    }

    fn lower_statement(&mut self, stmt: &Statement) -> Result<(), InternalError> {
        match stmt {
            Statement::Let(let_stmt) => self.lower_let(let_stmt),
            Statement::Assign(assign) => {
                let value = self.lower_expr(&assign.value)?;
                let slot = self.local(&assign.target)?;
                self.emit(Instr::Store { slot, value });
                Ok(())
            }
            Statement::FieldAssign(assign) => self.lower_field_assign(assign),
            Statement::Expr(expr) => self.lower_expr(expr).map(drop),
            Statement::Return(ret) => {
                let value = match &ret.value {
                    Some(value) => self.lower_expr(value)?,
                    None => Operand::unit(),
                };
                self.terminate_and_continue(Terminator::Return(value));
                Ok(())
            }
            Statement::If(if_expr) => self.lower_if(if_expr, None).map(drop),
            Statement::While(stmt) => {
                let cond_block = self.new_block();
                let body_block = self.new_block();
                let end_block = self.new_block();
                self.terminate(Terminator::Jump(cond_block));

                self.switch_to(cond_block);
                let cond = self.lower_expr(&stmt.condition)?;
                self.terminate(Terminator::Branch {
                    cond,
                    then_block: body_block,
                    else_block: end_block,
                });

                self.switch_to(body_block);
                self.loops.push(LoopControl {
                    continue_block: cond_block,
                    break_block: end_block,
                });
                let body = self.lower_block(&stmt.body);
                self.loops.pop();
                body?;
                self.terminate(Terminator::Jump(cond_block));
                self.switch_to(end_block);
                Ok(())
            }
            Statement::Break(_) | Statement::Continue(_) => {
                let control = self
                    .loops
                    .last()
                    .ok_or_else(|| InternalError::new(format!("loop control outside a loop in `{}`", self.name)))?;
                let target = if matches!(stmt, Statement::Break(_)) {
                    control.break_block
                } else {
                    control.continue_block
                };
                self.terminate_and_continue(Terminator::Jump(target));
                Ok(())
            }
            Statement::Block(block) => self.lower_block(block).map(drop),
        }
    }

    fn lower_let(&mut self, stmt: &LetStmt) -> Result<(), InternalError> {
        let program = self.program;
        let ty = program
            .resolutions
            .let_types
            .get(&stmt.id)
            .ok_or_else(|| InternalError::new(format!("`let {}` has no recorded type", stmt.name)))?;
        let slot = self.new_slot(ir_type(ty)?);
        if let Some(value) = &stmt.value {
            let value = self.lower_expr(value)?;
            self.emit(Instr::Store { slot, value });
        }
        self.declare(&stmt.name, slot);
        Ok(())
    }

    fn lower_field_assign(&mut self, assign: &FieldAssignStmt) -> Result<(), InternalError> {
        let value = self.lower_expr(&assign.value)?;
        let slot = self.local(&assign.base)?;
        let mut current = self.slot_type(slot);
        let mut path = Vec::with_capacity(assign.fields.len());
        for field in &assign.fields {
            let IrType::Struct(struct_name) = &current else {
                return Err(InternalError::new(format!(
                    "field assignment through non-struct type `{current}`"
                )));
            };
            let (field_ref, field_ty) = self.field_ref(struct_name, field)?;
            path.push(field_ref);
            current = field_ty;
        }
        self.emit(Instr::FieldStore { slot, path, value });
        Ok(())
    }

    /// Lowers `if` to a branch diamond. When `result` is given, both arms store
    /// into a shared slot which the join block reads.
    fn lower_if(&mut self, if_expr: &IfExpr, result: Option<SlotId>) -> Result<Operand, InternalError> {
        let cond = self.lower_expr(&if_expr.condition)?;
        let then_block = self.new_block();
        let join = self.new_block();
        let else_block = match if_expr.else_branch {
            Some(_) => self.new_block(),
            None => join,
        };
        self.terminate(Terminator::Branch {
            cond,
            then_block,
            else_block,
        });

        self.switch_to(then_block);
        let value = self.lower_block(&if_expr.then_branch)?;
        self.store_result(result, value);
        self.terminate(Terminator::Jump(join));

        if let Some(else_branch) = &if_expr.else_branch {
            self.switch_to(else_block);
            match else_branch {
                ElseBranch::Block(block) => {
                    let value = self.lower_block(block)?;
                    self.store_result(result, value);
                }
                ElseBranch::ElseIf(nested) => {
                    self.lower_if(nested, result)?;
                }
            }
            self.terminate(Terminator::Jump(join));
        }

        self.switch_to(join);
        Ok(match result {
            Some(slot) => self.load(slot),
            None => Operand::unit(),
        })
    }

    fn store_result(&mut self, result: Option<SlotId>, value: Operand) {
        if let Some(slot) = result {
            self.emit(Instr::Store { slot, value });
        }
    }

    /// Slot receiving the value of a branching expression, unless it is `unit`.
    fn result_slot(&mut self, expr: &Expr) -> Result<Option<SlotId>, InternalError> {
        let ty = self.type_of(expr)?;
        Ok((ty != IrType::Unit).then(|| self.new_slot(ty)))
    }

    // ----- expressions --------------------------------------------------------------

    fn lower_expr(&mut self, expr: &Expr) -> Result<Operand, InternalError> {
        let program = self.program;
        match &expr.kind {
            ExprKind::Literal(literal) => self.lower_literal(expr, literal),
            ExprKind::Path(path) => {
                if path.is_simple() {
                    if let Some(slot) = self.lookup(path.last()) {
                        return Ok(self.load(slot));
                    }
                }
                let name = program
                    .resolutions
                    .const_refs
                    .get(&expr.id)
                    .ok_or_else(|| InternalError::new(format!("unresolved value `{path}`")))?;
                self.const_operand(name)
            }
            ExprKind::Unary { op, expr: inner } => {
                let operand = self.lower_expr(inner)?;
                if let (UnaryOp::Neg, Operand::Const(Constant::Int { value, kind })) = (op, &operand) {
                    return Ok(Operand::Const(Constant::Int {
                        value: -value,
                        kind: *kind,
                    }));
                }
                let dest = self.new_temp(self.type_of(expr)?);
                self.emit(Instr::Unary {
                    dest,
                    op: *op,
                    operand,
                });
                Ok(Operand::Temp(dest))
            }
            ExprKind::Binary { op, left, right } if op.is_logical() => {
                self.lower_short_circuit(*op, left, right)
            }
            ExprKind::Binary { op, left, right } => {
                let operand_ty = self.type_of(left)?;
                let lhs = self.lower_expr(left)?;
                let rhs = self.lower_expr(right)?;
                let dest = self.new_temp(self.type_of(expr)?);
                self.emit(Instr::Binary {
                    dest,
                    op: bin_op(*op)?,
                    lhs,
                    rhs,
                    ty: operand_ty,
                });
                Ok(Operand::Temp(dest))
            }
            ExprKind::Cast { expr: inner, .. } => self.lower_cast(expr, inner),
            ExprKind::Call { callee, args } => self.lower_call(expr, callee, args),
            ExprKind::Member { base, name, .. } => {
                if let Some(variant) = program.resolutions.variants.get(&expr.id) {
                    let dest = self.new_temp(IrType::Enum(variant.enum_name.to_string()));
                    self.emit(Instr::MakeVariant {
                        dest,
                        enum_name: variant.enum_name.to_string(),
                        variant: variant.index,
                        payload: None,
                    });
                    return Ok(Operand::Temp(dest));
                }
                let IrType::Struct(struct_name) = self.type_of(base)? else {
                    return Err(InternalError::new(format!("field `{name}` read from a non-struct value")));
                };
                let value = self.lower_expr(base)?;
                let (field, field_ty) = self.field_ref(&struct_name, name)?;
                let dest = self.new_temp(field_ty);
                self.emit(Instr::FieldGet {
                    dest,
                    base: value,
                    field,
                });
                Ok(Operand::Temp(dest))
            }
            ExprKind::StructLiteral { fields, .. } => self.lower_struct_literal(expr, fields),
            ExprKind::Match(match_expr) => self.lower_match(expr, match_expr),
            ExprKind::If(if_expr) => {
                let result = self.result_slot(expr)?;
                self.lower_if(if_expr, result)
            }
            ExprKind::Block(block) => self.lower_block(block),
        }
    }

    fn lower_literal(&mut self, expr: &Expr, literal: &Literal) -> Result<Operand, InternalError> {
        Ok(Operand::Const(match literal {
            Literal::Bool(value) => Constant::Bool(*value),
            Literal::String(value) => Constant::Str(value.clone()),
            Literal::Int(value) => match self.type_of(expr)? {
                IrType::Int(kind) => Constant::Int { value: *value, kind },
                other => {
                    return Err(InternalError::new(format!(
                        "integer literal typed as `{other}`"
                    )));
                }
            },
        }))
    }

    fn const_operand(&self, name: &QualName) -> Result<Operand, InternalError> {
        let constant = self
            .program
            .consts
            .get(name)
            .ok_or_else(|| InternalError::new(format!("constant `{name}` was not evaluated")))?;
        Ok(Operand::Const(match (&constant.value, ir_type(&constant.ty)?) {
            (ConstValue::Int(value), IrType::Int(kind)) => Constant::Int { value: *value, kind },
            (ConstValue::Bool(value), _) => Constant::Bool(*value),
            (ConstValue::Str(value), _) => Constant::Str(value.clone()),
            _ => {
                return Err(InternalError::new(format!(
                    "constant `{name}` has no usable value"
                )));
            }
        }))
    }

    /// `a && b` and `a || b` as branches; `b` is only evaluated when it decides
    /// the result.
    fn lower_short_circuit(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Operand, InternalError> {
        let result = self.new_slot(IrType::Bool);
        let lhs = self.lower_expr(left)?;
        let rhs_block = self.new_block();
        let short_block = self.new_block();
        let join = self.new_block();
        let (then_block, else_block, short_value) = match op {
            BinaryOp::And => (rhs_block, short_block, false),
            _ => (short_block, rhs_block, true),
        };
        self.terminate(Terminator::Branch {
            cond: lhs,
            then_block,
            else_block,
        });

        self.switch_to(short_block);
        self.emit(Instr::Store {
            slot: result,
            value: Operand::bool(short_value),
        });
        self.terminate(Terminator::Jump(join));

        self.switch_to(rhs_block);
        let rhs = self.lower_expr(right)?;
        self.emit(Instr::Store {
            slot: result,
            value: rhs,
        });
        self.terminate(Terminator::Jump(join));

        self.switch_to(join);
        Ok(self.load(result))
    }

    fn lower_cast(&mut self, expr: &Expr, inner: &Expr) -> Result<Operand, InternalError> {
        let target = self.checked_type(expr)?;
        let IrType::Int(from) = self.type_of(inner)? else {
            return Err(InternalError::new("cast from a non-integer value"));
        };
        let value = self.lower_expr(inner)?;
        if let Type::Range { min, max, .. } = target {
            self.emit(Instr::RangeCheck {
                value: value.clone(),
                kind: from,
                min: *min,
                max: *max,
            });
        }
        let IrType::Int(to) = ir_type(target)? else {
            return Err(InternalError::new(format!("cast to non-integer type `{target}`")));
        };
        if from == to {
            return Ok(value);
        }
        let dest = self.new_temp(IrType::Int(to));
        self.emit(Instr::Cast {
            dest,
            value,
            from,
            to,
        });
        Ok(Operand::Temp(dest))
    }

    fn lower_call(&mut self, expr: &Expr, callee: &Expr, args: &[Expr]) -> Result<Operand, InternalError> {
        let program = self.program;
        let resolutions = &program.resolutions;
        if let Some(intrinsic) = resolutions.intrinsics.get(&expr.id).copied() {
            return self.lower_intrinsic(expr, callee, intrinsic, args);
        }
        if let Some(variant) = resolutions.variants.get(&expr.id) {
            let payload = match args.first() {
                Some(arg) => Some(self.lower_expr(arg)?),
                None => None,
            };
            let dest = self.new_temp(IrType::Enum(variant.enum_name.to_string()));
            self.emit(Instr::MakeVariant {
                dest,
                enum_name: variant.enum_name.to_string(),
                variant: variant.index,
                payload,
            });
            return Ok(Operand::Temp(dest));
        }
        let target = resolutions
            .calls
            .get(&expr.id)
            .ok_or_else(|| InternalError::new(format!("call {} has no resolved target", expr.id)))?;

        match target {
            CallTarget::Function(name) => {
                let args = args
                    .iter()
                    .map(|arg| self.lower_expr(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let dest = self.new_temp(self.type_of(expr)?);
                self.emit(Instr::Call {
                    dest,
                    function: name.to_string(),
                    args,
                });
                Ok(Operand::Temp(dest))
            }
            CallTarget::Builtin(Builtin::List) => {
                let IrType::List(elem) = self.type_of(expr)? else {
                    return Err(InternalError::new("`list()` without a list type"));
                };
                let dest = self.new_temp(IrType::List(elem.clone()));
                self.emit(Instr::ListNew { dest, elem: *elem });
                Ok(Operand::Temp(dest))
            }
            CallTarget::Builtin(builtin) => {
                let call = match builtin {
                    Builtin::Print => RuntimeCall::Print,
                    Builtin::Assert => RuntimeCall::Assert,
                    _ => RuntimeCall::Panic,
                };
                let arg = args
                    .first()
                    .ok_or_else(|| InternalError::new(format!("`{}` without an argument", builtin.name())))?;
                let ty = self.type_of(arg)?;
                let value = self.lower_expr(arg)?;
                self.emit(Instr::Runtime {
                    call,
                    arg: value,
                    ty,
                });
                Ok(Operand::unit())
            }
        }
    }

    fn lower_intrinsic(
        &mut self,
        expr: &Expr,
        callee: &Expr,
        op: Intrinsic,
        args: &[Expr],
    ) -> Result<Operand, InternalError> {
        let receiver = match &callee.kind {
            ExprKind::Member { base, .. } => match &base.kind {
                ExprKind::Path(path) if path.is_simple() => self.local(path.last())?,
                _ => return Err(InternalError::new("intrinsic receiver is not a local")),
            },
            _ => return Err(InternalError::new("intrinsic call without a receiver")),
        };
        let elem = match self.slot_type(receiver) {
            IrType::List(elem) => Some(*elem),
            _ => None,
        };
        let args = args
            .iter()
            .map(|arg| self.lower_expr(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let dest = self.new_temp(self.type_of(expr)?);
        self.emit(Instr::Intrinsic {
            dest,
            op,
            receiver,
            args,
            elem,
        });
        Ok(Operand::Temp(dest))
    }

    /// Field values are evaluated in source order, then arranged in declaration
    /// order for construction.
    fn lower_struct_literal(&mut self, expr: &Expr, fields: &[StructLiteralField]) -> Result<Operand, InternalError> {
        let name = self
            .program
            .resolutions
            .struct_literals
            .get(&expr.id)
            .ok_or_else(|| InternalError::new(format!("struct literal {} is unresolved", expr.id)))?
            .to_string();
        let mut values: HashMap<&str, Operand> = HashMap::new();
        for field in fields {
            let value = self.lower_expr(&field.value)?;
            values.insert(field.name.as_str(), value);
        }
        let layout = self
            .structs
            .get(&name)
            .ok_or_else(|| InternalError::new(format!("unknown struct `{name}`")))?;
        let ordered = layout
            .fields
            .iter()
            .map(|(field, _)| {
                values
                    .remove(field.as_str())
                    .ok_or_else(|| InternalError::new(format!("field `{field}` of `{name}` is not initialized")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let dest = self.new_temp(IrType::Struct(name.clone()));
        self.emit(Instr::MakeStruct {
            dest,
            name,
            fields: ordered,
        });
        Ok(Operand::Temp(dest))
    }
}

fn bin_op(op: BinaryOp) -> Result<BinOp, InternalError> {
    Ok(match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Rem => BinOp::Rem,
        BinaryOp::BitAnd => BinOp::BitAnd,
        BinaryOp::BitOr => BinOp::BitOr,
        BinaryOp::BitXor => BinOp::BitXor,
        BinaryOp::Shl => BinOp::Shl,
        BinaryOp::Shr => BinOp::Shr,
        BinaryOp::Eq => BinOp::Eq,
        BinaryOp::NotEq => BinOp::Ne,
        BinaryOp::Lt => BinOp::Lt,
        BinaryOp::LtEq => BinOp::Le,
        BinaryOp::Gt => BinOp::Gt,
        BinaryOp::GtEq => BinOp::Ge,
        BinaryOp::And | BinaryOp::Or => {
            return Err(InternalError::new("logical operator reached eager lowering"));
        }
    })
}
