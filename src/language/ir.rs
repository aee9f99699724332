//! Block-structured intermediate form produced by lowering and consumed by the
//! C emitter. Aggregates stay symbolic here; physical layout is the emitter's
//! business.

use crate::language::{
    ast::UnaryOp,
    errors::InternalError,
    typecheck::Intrinsic,
    types::IntKind,
};
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Storage type of a slot, temporary or aggregate member. Range types are
/// represented by their base integer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IrType {
    Unit,
    Bool,
    Int(IntKind),
    Str,
    Struct(String),
    Enum(String),
    List(Box<IrType>),
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Unit => f.write_str("unit"),
            IrType::Bool => f.write_str("bool"),
            IrType::Int(kind) => write!(f, "{kind}"),
            IrType::Str => f.write_str("string"),
            IrType::Struct(name) => write!(f, "struct {name}"),
            IrType::Enum(name) => write!(f, "enum {name}"),
            IrType::List(elem) => write!(f, "List[{elem}]"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Constant {
    Unit,
    Bool(bool),
    Int { value: i128, kind: IntKind },
    Str(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Unit => f.write_str("()"),
            Constant::Bool(value) => write!(f, "{value}"),
            Constant::Int { value, kind } => write!(f, "{value}{kind}"),
            Constant::Str(value) => write!(f, "{value:?}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Param(usize),
    Temp(TempId),
    Const(Constant),
}

impl Operand {
    pub fn unit() -> Self {
        Operand::Const(Constant::Unit)
    }

    pub fn bool(value: bool) -> Self {
        Operand::Const(Constant::Bool(value))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Param(index) => write!(f, "p{index}"),
            Operand::Temp(temp) => write!(f, "{temp}"),
            Operand::Const(constant) => write!(f, "{constant}"),
        }
    }
}

/// Eager binary operators. `&&` and `||` never reach the IR; they lower to branches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

/// Runtime services the emitted program links against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeCall {
    Print,
    Assert,
    Panic,
}

impl RuntimeCall {
    pub fn name(self) -> &'static str {
        match self {
            RuntimeCall::Print => "print",
            RuntimeCall::Assert => "assert",
            RuntimeCall::Panic => "panic",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    Load {
        dest: TempId,
        slot: SlotId,
    },
    Store {
        slot: SlotId,
        value: Operand,
    },
    /// Writes `slot.f1.f2... = value`; `path` holds field indices.
    FieldStore {
        slot: SlotId,
        path: Vec<FieldRef>,
        value: Operand,
    },
    Unary {
        dest: TempId,
        op: UnaryOp,
        operand: Operand,
    },
    Binary {
        dest: TempId,
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
        /// Type of both operands.
        ty: IrType,
    },
    Cast {
        dest: TempId,
        value: Operand,
        from: IntKind,
        to: IntKind,
    },
    /// Aborts unless `min <= value <= max`.
    RangeCheck {
        value: Operand,
        kind: IntKind,
        min: i128,
        max: i128,
    },
    Call {
        dest: TempId,
        function: String,
        args: Vec<Operand>,
    },
    Runtime {
        call: RuntimeCall,
        arg: Operand,
        ty: IrType,
    },
    MakeStruct {
        dest: TempId,
        name: String,
        fields: Vec<Operand>,
    },
    FieldGet {
        dest: TempId,
        base: Operand,
        field: FieldRef,
    },
    MakeVariant {
        dest: TempId,
        enum_name: String,
        variant: usize,
        payload: Option<Operand>,
    },
    Tag {
        dest: TempId,
        value: Operand,
    },
    Payload {
        dest: TempId,
        value: Operand,
        enum_name: String,
        variant: String,
        index: usize,
        field: usize,
    },
    ListNew {
        dest: TempId,
        elem: IrType,
    },
    /// A `List`/`string` method applied to the value held in `receiver`.
    Intrinsic {
        dest: TempId,
        op: Intrinsic,
        receiver: SlotId,
        args: Vec<Operand>,
        elem: Option<IrType>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldRef {
    pub struct_name: String,
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
    Return(Operand),
    Jump(BlockId),
    Branch {
        cond: Operand,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// End of a block control can never reach, such as the code after an
    /// exhaustive `match` whose arms all return.
    Unreachable,
}

impl Terminator {
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(target) => vec![*target],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Return(_) | Terminator::Unreachable => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrBlock {
    pub id: BlockId,
    pub instrs: Vec<Instr>,
    pub terminator: Terminator,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret: IrType,
    pub slots: Vec<IrType>,
    pub temps: Vec<IrType>,
    /// The first block is the entry.
    pub blocks: Vec<IrBlock>,
}

impl IrFunction {
    pub fn block(&self, id: BlockId) -> Option<&IrBlock> {
        self.blocks.iter().find(|block| block.id == id)
    }

    /// Every terminator must name a block of this function.
    pub fn verify(&self) -> Result<(), InternalError> {
        if self.blocks.is_empty() {
            return Err(InternalError::new(format!("function `{}` has no blocks", self.name)));
        }
        let known: HashSet<BlockId> = self.blocks.iter().map(|block| block.id).collect();
        if known.len() != self.blocks.len() {
            return Err(InternalError::new(format!(
                "function `{}` defines a block twice",
                self.name
            )));
        }
        for block in &self.blocks {
            for target in block.terminator.targets() {
                if !known.contains(&target) {
                    return Err(InternalError::new(format!(
                        "block {} of `{}` jumps to missing block {}",
                        block.id, self.name, target
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrStruct {
    pub name: String,
    pub fields: Vec<(String, IrType)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrVariant {
    pub name: String,
    pub payload: Option<IrType>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrEnum {
    pub name: String,
    pub variants: Vec<IrVariant>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub function: String,
    pub ret: IrType,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IrProgram {
    pub functions: BTreeMap<String, IrFunction>,
    pub structs: BTreeMap<String, IrStruct>,
    pub enums: BTreeMap<String, IrEnum>,
    pub entry: Option<EntryPoint>,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Load { dest, slot } => write!(f, "{dest} = load {slot}"),
            Instr::Store { slot, value } => write!(f, "store {slot}, {value}"),
            Instr::FieldStore { slot, path, value } => {
                let fields: Vec<String> = path.iter().map(|field| field.index.to_string()).collect();
                write!(f, "store {slot}.{}, {value}", fields.join("."))
            }
            Instr::Unary { dest, op, operand } => write!(f, "{dest} = {}{operand}", op.symbol()),
            Instr::Binary {
                dest,
                op,
                lhs,
                rhs,
                ty,
            } => write!(f, "{dest} = {lhs} {} {rhs} : {ty}", op.symbol()),
            Instr::Cast {
                dest,
                value,
                from,
                to,
            } => write!(f, "{dest} = cast {value} {from} -> {to}"),
            Instr::RangeCheck {
                value,
                kind,
                min,
                max,
            } => write!(f, "range_check {value} : {kind}[{min}..={max}]"),
            Instr::Call {
                dest,
                function,
                args,
            } => write!(f, "{dest} = call {function}({})", join(args)),
            Instr::Runtime { call, arg, ty } => write!(f, "{}({arg} : {ty})", call.name()),
            Instr::MakeStruct { dest, name, fields } => {
                write!(f, "{dest} = struct {name} {{ {} }}", join(fields))
            }
            Instr::FieldGet { dest, base, field } => write!(f, "{dest} = {base}.{}", field.index),
            Instr::MakeVariant {
                dest,
                enum_name,
                variant,
                payload,
            } => match payload {
                Some(payload) => write!(f, "{dest} = variant {enum_name}#{variant}({payload})"),
                None => write!(f, "{dest} = variant {enum_name}#{variant}"),
            },
            Instr::Tag { dest, value } => write!(f, "{dest} = tag {value}"),
            Instr::Payload {
                dest,
                value,
                variant,
                field,
                ..
            } => write!(f, "{dest} = payload {value}.{variant}.{field}"),
            Instr::ListNew { dest, elem } => write!(f, "{dest} = list[{elem}]"),
            Instr::Intrinsic {
                dest,
                op,
                receiver,
                args,
                ..
            } => write!(f, "{dest} = {op:?} {receiver}({})", join(args)),
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Return(value) => write!(f, "return {value}"),
            Terminator::Jump(target) => write!(f, "jump {target}"),
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => write!(f, "branch {cond}, {then_block}, {else_block}"),
            Terminator::Unreachable => f.write_str("unreachable"),
        }
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .enumerate()
            .map(|(index, ty)| format!("p{index}: {ty}"))
            .collect();
        writeln!(f, "fn {}({}) -> {} {{", self.name, params.join(", "), self.ret)?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.id)?;
            for instr in &block.instrs {
                writeln!(f, "    {instr}")?;
            }
            writeln!(f, "    {}", block.terminator)?;
        }
        f.write_str("}")
    }
}

impl fmt::Display for IrProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for function in self.functions.values() {
            writeln!(f, "{function}")?;
        }
        Ok(())
    }
}

fn join(operands: &[Operand]) -> String {
    operands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(blocks: Vec<IrBlock>) -> IrFunction {
        IrFunction {
            name: "app::f".to_string(),
            params: Vec::new(),
            ret: IrType::Unit,
            slots: Vec::new(),
            temps: Vec::new(),
            blocks,
        }
    }

    #[test]
    fn verify_rejects_dangling_targets() {
        let broken = function(vec![IrBlock {
            id: BlockId(0),
            instrs: Vec::new(),
            terminator: Terminator::Jump(BlockId(7)),
        }]);
        let error = broken.verify().unwrap_err();
        assert!(error.message.contains("missing block bb7"));

        let fine = function(vec![
            IrBlock {
                id: BlockId(0),
                instrs: Vec::new(),
                terminator: Terminator::Jump(BlockId(1)),
            },
            IrBlock {
                id: BlockId(1),
                instrs: Vec::new(),
                terminator: Terminator::Return(Operand::unit()),
            },
        ]);
        assert!(fine.verify().is_ok());
    }

    #[test]
    fn renders_readable_listing() {
        let f = function(vec![IrBlock {
            id: BlockId(0),
            instrs: vec![Instr::Binary {
                dest: TempId(0),
                op: BinOp::Add,
                lhs: Operand::Param(0),
                rhs: Operand::Const(Constant::Int {
                    value: 1,
                    kind: IntKind::I32,
                }),
                ty: IrType::Int(IntKind::I32),
            }],
            terminator: Terminator::Return(Operand::Temp(TempId(0))),
        }]);
        let text = f.to_string();
        assert!(text.contains("t0 = p0 + 1i32 : i32"));
        assert!(text.contains("return t0"));
    }
}
