//! C99 backend. Every function, struct and enum becomes one C definition with a
//! mangled, collision-free symbol; control flow is rendered with labels and
//! `goto`, one label per IR block.

mod layout;
mod runtime;
#[cfg(test)]
mod tests;

pub use layout::{layout_order, Nominal};

use crate::{
    language::{
        ast::UnaryOp,
        errors::{CompileError, InternalError},
        ir::{
            BinOp, Constant, EntryPoint, Instr, IrEnum, IrFunction, IrProgram, IrStruct, IrType,
            Operand, RuntimeCall, TempId, Terminator,
        },
        typecheck::Intrinsic,
        types::IntKind,
    },
    target::EmitMode,
};
use tracing::debug;

/// Renders `program` as a single self-contained C translation unit.
pub fn emit_c(program: &IrProgram, mode: EmitMode) -> Result<String, CompileError> {
    let order = layout_order(program)?;
    let mut out = CWriter::default();
    out.raw(runtime::RUNTIME_PRELUDE);

    if !order.is_empty() {
        out.blank();
        for nominal in &order {
            let symbol = nominal_symbol(nominal);
            out.line(0, format!("typedef struct {symbol} {symbol};"));
        }
    }
    for nominal in &order {
        out.blank();
        match nominal {
            Nominal::Struct(name) => {
                let layout = program
                    .structs
                    .get(name)
                    .ok_or_else(|| InternalError::new(format!("struct `{name}` has no layout")))?;
                emit_struct(&mut out, layout);
            }
            Nominal::Enum(name) => {
                let layout = program
                    .enums
                    .get(name)
                    .ok_or_else(|| InternalError::new(format!("enum `{name}` has no layout")))?;
                emit_enum(&mut out, layout);
            }
        }
    }

    if !program.functions.is_empty() {
        out.blank();
        for function in program.functions.values() {
            out.line(0, format!("{};", prototype(function)));
        }
    }
    for function in program.functions.values() {
        out.blank();
        FunctionEmitter::new(function, &mut out).emit()?;
    }
    if let Some(entry) = &program.entry {
        out.blank();
        emit_main(&mut out, entry, mode);
    }

    debug!(
        functions = program.functions.len(),
        aggregates = order.len(),
        ?mode,
        "emitted C translation unit"
    );
    Ok(out.finish())
}

#[derive(Default)]
struct CWriter {
    text: String,
}

impl CWriter {
    fn raw(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn blank(&mut self) {
        self.text.push('\n');
    }

    fn line(&mut self, indent: usize, text: impl AsRef<str>) {
        for _ in 0..indent {
            self.text.push_str("    ");
        }
        self.text.push_str(text.as_ref());
        self.text.push('\n');
    }

    fn finish(self) -> String {
        self.text
    }
}

/// Escapes every byte outside `[A-Za-z0-9]` as `_xx`. Since `_` itself is
/// escaped, distinct names can never map to the same identifier.
pub fn mangle(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{byte:02x}"));
        }
    }
    out
}

pub fn function_symbol(name: &str) -> String {
    format!("kf_{}", mangle(name))
}

pub fn struct_symbol(name: &str) -> String {
    format!("ks_{}", mangle(name))
}

pub fn enum_symbol(name: &str) -> String {
    format!("ke_{}", mangle(name))
}

fn nominal_symbol(nominal: &Nominal) -> String {
    match nominal {
        Nominal::Struct(name) => struct_symbol(name),
        Nominal::Enum(name) => enum_symbol(name),
    }
}

/// Renders `value` as the body of a C string literal. A `\x` escape followed by
/// a hex digit closes the literal and reopens it so the digit is not absorbed.
pub fn escape_c_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut after_hex_escape = false;
    for byte in value.bytes() {
        if after_hex_escape && byte.is_ascii_hexdigit() {
            out.push_str("\" \"");
        }
        after_hex_escape = false;
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(byte as char),
            _ => {
                out.push_str(&format!("\\x{byte:02x}"));
                after_hex_escape = true;
            }
        }
    }
    out.push('"');
    out
}

fn int_type(kind: IntKind) -> &'static str {
    match kind {
        IntKind::I8 => "int8_t",
        IntKind::I16 => "int16_t",
        IntKind::I32 => "int32_t",
        IntKind::I64 => "int64_t",
        IntKind::U8 => "uint8_t",
        IntKind::U16 => "uint16_t",
        IntKind::U32 => "uint32_t",
        IntKind::U64 => "uint64_t",
    }
}

/// Unsigned type wide enough that arithmetic on it neither promotes to `int`
/// nor overflows in a way C leaves undefined.
fn wrapping_type(kind: IntKind) -> &'static str {
    if kind.bits() <= 32 {
        "uint32_t"
    } else {
        "uint64_t"
    }
}

fn c_type(ty: &IrType) -> String {
    match ty {
        IrType::Unit => "kl_unit".to_string(),
        IrType::Bool => "bool".to_string(),
        IrType::Int(kind) => int_type(*kind).to_string(),
        IrType::Str => "kl_str".to_string(),
        IrType::Struct(name) => struct_symbol(name),
        IrType::Enum(name) => enum_symbol(name),
        IrType::List(_) => "kl_list".to_string(),
    }
}

fn int_literal(value: i128, kind: IntKind) -> String {
    match kind {
        IntKind::I64 if value == i64::MIN as i128 => "INT64_MIN".to_string(),
        IntKind::I64 => format!("INT64_C({value})"),
        IntKind::U64 => format!("UINT64_C({value})"),
        _ => format!("(({}){value})", int_type(kind)),
    }
}

fn constant(value: &Constant) -> String {
    match value {
        Constant::Unit => "0".to_string(),
        Constant::Bool(value) => value.to_string(),
        Constant::Int { value, kind } => int_literal(*value, *kind),
        Constant::Str(text) => format!("((kl_str){{ {}, {} }})", escape_c_string(text), text.len()),
    }
}

fn operand(value: &Operand) -> String {
    match value {
        Operand::Param(index) => format!("p{index}"),
        Operand::Temp(temp) => temp.to_string(),
        Operand::Const(value) => constant(value),
    }
}

fn emit_struct(out: &mut CWriter, layout: &IrStruct) {
    out.line(0, format!("struct {} {{", struct_symbol(&layout.name)));
    if layout.fields.is_empty() {
        out.line(1, "char _unused;");
    }
    for (index, (name, ty)) in layout.fields.iter().enumerate() {
        out.line(1, format!("{} f{index}; /* {name} */", c_type(ty)));
    }
    out.line(0, "};");
}

fn emit_enum(out: &mut CWriter, layout: &IrEnum) {
    out.line(0, format!("struct {} {{", enum_symbol(&layout.name)));
    out.line(1, "int32_t tag;");
    out.line(1, "union {");
    if layout.variants.is_empty() {
        out.line(2, "char _unused;");
    }
    for (index, variant) in layout.variants.iter().enumerate() {
        let body = match &variant.payload {
            Some(ty) => format!("{} f0;", c_type(ty)),
            None => "char _unused;".to_string(),
        };
        out.line(2, format!("struct {{ {body} }} v{index}; /* {} */", variant.name));
    }
    out.line(1, "} u;");
    out.line(0, "};");
}

fn prototype(function: &IrFunction) -> String {
    let params = if function.params.is_empty() {
        "void".to_string()
    } else {
        function
            .params
            .iter()
            .enumerate()
            .map(|(index, ty)| format!("{} p{index}", c_type(ty)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "static {} {}({params})",
        c_type(&function.ret),
        function_symbol(&function.name)
    )
}

/// Program mode prints the result and exits with 0; tool mode turns the result
/// into the process exit status.
fn emit_main(out: &mut CWriter, entry: &EntryPoint, mode: EmitMode) {
    out.line(0, "int main(void) {");
    out.line(
        1,
        format!("{} result = {}();", c_type(&entry.ret), function_symbol(&entry.function)),
    );
    match mode {
        EmitMode::Program => {
            match &entry.ret {
                IrType::Int(kind) if kind.is_signed() => out.line(1, "kl_print_i64((int64_t)result);"),
                IrType::Int(_) => out.line(1, "kl_print_u64((uint64_t)result);"),
                IrType::Bool => out.line(1, "kl_print_bool(result);"),
                IrType::Str => out.line(1, "kl_print_str(result);"),
                _ => out.line(1, "(void)result;"),
            }
            out.line(1, "return 0;");
        }
        EmitMode::Tool => match &entry.ret {
            IrType::Int(_) => out.line(1, "return (int)((uint64_t)result & 0xFF);"),
            IrType::Bool => out.line(1, "return result ? 1 : 0;"),
            _ => {
                out.line(1, "(void)result;");
                out.line(1, "return 0;");
            }
        },
    }
    out.line(0, "}");
}

struct FunctionEmitter<'a> {
    function: &'a IrFunction,
    out: &'a mut CWriter,
}

impl<'a> FunctionEmitter<'a> {
    fn new(function: &'a IrFunction, out: &'a mut CWriter) -> Self {
        Self { function, out }
    }

    fn emit(mut self) -> Result<(), InternalError> {
        self.out.line(0, format!("{} {{", prototype(self.function)));
        for (index, ty) in self.function.slots.iter().enumerate() {
            self.out.line(1, format!("{} s{index} = {{0}};", c_type(ty)));
        }
        for (index, ty) in self.function.temps.iter().enumerate() {
            self.out.line(1, format!("{} t{index} = {{0}};", c_type(ty)));
        }
        let function = self.function;
        for block in &function.blocks {
            self.out.line(0, format!("{}:", block.id));
            for instr in &block.instrs {
                self.instr(instr)?;
            }
            self.terminator(&block.terminator);
        }
        self.out.line(0, "}");
        Ok(())
    }

    fn stmt(&mut self, text: impl AsRef<str>) {
        self.out.line(1, text);
    }

    fn fail(&mut self, message: &str) {
        let text = format!("kl_fail({});", escape_c_string(message));
        self.stmt(text);
    }

    fn error(&self, message: impl std::fmt::Display) -> InternalError {
        InternalError::new(format!("in `{}`: {message}", self.function.name))
    }

    fn instr(&mut self, instr: &Instr) -> Result<(), InternalError> {
        match instr {
            Instr::Load { dest, slot } => self.stmt(format!("{dest} = {slot};")),
            Instr::Store { slot, value } => self.stmt(format!("{slot} = {};", operand(value))),
            Instr::FieldStore { slot, path, value } => {
                let mut target = slot.to_string();
                for field in path {
                    target.push_str(&format!(".f{}", field.index));
                }
                self.stmt(format!("{target} = {};", operand(value)));
            }
            Instr::Unary { dest, op, operand: value } => {
                let value = operand(value);
                let text = match (op, self.temp_type(*dest)?) {
                    (UnaryOp::Not, _) => format!("{dest} = !{value};"),
                    (UnaryOp::Neg, IrType::Int(kind)) => format!(
                        "{dest} = ({})(({wide})0 - ({wide}){value});",
                        int_type(*kind),
                        wide = wrapping_type(*kind)
                    ),
                    (UnaryOp::BitNot, IrType::Int(kind)) => {
                        format!("{dest} = ({})~{value};", int_type(*kind))
                    }
                    (op, ty) => {
                        return Err(self.error(format!("`{}` does not apply to `{ty}`", op.symbol())));
                    }
                };
                self.stmt(text);
            }
            Instr::Binary {
                dest,
                op,
                lhs,
                rhs,
                ty,
            } => self.binary(*dest, *op, &operand(lhs), &operand(rhs), ty)?,
            Instr::Cast { dest, value, to, .. } => {
                self.stmt(format!("{dest} = ({}){};", int_type(*to), operand(value)));
            }
            Instr::RangeCheck {
                value,
                kind,
                min,
                max,
            } => self.range_check(&operand(value), *kind, *min, *max),
            Instr::Call {
                dest,
                function,
                args,
            } => {
                let args: Vec<String> = args.iter().map(operand).collect();
                self.stmt(format!("{dest} = {}({});", function_symbol(function), args.join(", ")));
            }
            Instr::Runtime { call, arg, ty } => self.runtime(*call, &operand(arg), ty)?,
            Instr::MakeStruct { dest, name, fields } => {
                let fields = if fields.is_empty() {
                    "0".to_string()
                } else {
                    fields.iter().map(operand).collect::<Vec<_>>().join(", ")
                };
                self.stmt(format!("{dest} = ({}){{ {fields} }};", struct_symbol(name)));
            }
            Instr::FieldGet { dest, base, field } => {
                self.stmt(format!("{dest} = {}.f{};", operand(base), field.index));
            }
            Instr::MakeVariant {
                dest,
                enum_name,
                variant,
                payload,
            } => {
                let symbol = enum_symbol(enum_name);
                let text = match payload {
                    Some(payload) => format!(
                        "{dest} = ({symbol}){{ .tag = {variant}, .u.v{variant} = {{ {} }} }};",
                        operand(payload)
                    ),
                    None => format!("{dest} = ({symbol}){{ .tag = {variant} }};"),
                };
                self.stmt(text);
            }
            Instr::Tag { dest, value } => self.stmt(format!("{dest} = {}.tag;", operand(value))),
            Instr::Payload {
                dest,
                value,
                index,
                field,
                ..
            } => self.stmt(format!("{dest} = {}.u.v{index}.f{field};", operand(value))),
            Instr::ListNew { dest, elem } => {
                self.stmt(format!("{dest} = kl_list_new((int64_t)sizeof({}));", c_type(elem)));
            }
            Instr::Intrinsic {
                dest,
                op,
                receiver,
                args,
                elem,
            } => {
                let args: Vec<String> = args.iter().map(operand).collect();
                let arg = |index: usize| {
                    args.get(index)
                        .cloned()
                        .ok_or_else(|| self.error(format!("{op:?} is missing argument {index}")))
                };
                let elem = || {
                    elem.as_ref()
                        .map(c_type)
                        .ok_or_else(|| self.error(format!("{op:?} on a receiver that is not a list")))
                };
                let lines = match op {
                    Intrinsic::ListPush => vec![
                        format!(
                            "{{ {} kl_elem = {}; kl_list_push({receiver}, &kl_elem); }}",
                            elem()?,
                            arg(0)?
                        ),
                        format!("{dest} = 0;"),
                    ],
                    Intrinsic::ListLen => vec![format!("{dest} = {receiver}->len;")],
                    Intrinsic::ListGet => vec![format!(
                        "{dest} = *({} *)kl_list_at({receiver}, {});",
                        elem()?,
                        arg(0)?
                    )],
                    Intrinsic::ListSet => vec![
                        format!(
                            "*({} *)kl_list_at({receiver}, {}) = {};",
                            elem()?,
                            arg(0)?,
                            arg(1)?
                        ),
                        format!("{dest} = 0;"),
                    ],
                    Intrinsic::StrLen => vec![format!("{dest} = {receiver}.len;")],
                    Intrinsic::StrConcat => vec![format!("{dest} = kl_str_concat({receiver}, {});", arg(0)?)],
                    Intrinsic::StrByteAt => vec![format!("{dest} = kl_str_byte_at({receiver}, {});", arg(0)?)],
                };
                for line in lines {
                    self.stmt(line);
                }
            }
        }
        Ok(())
    }

    fn binary(
        &mut self,
        dest: TempId,
        op: BinOp,
        lhs: &str,
        rhs: &str,
        ty: &IrType,
    ) -> Result<(), InternalError> {
        let symbol = op.symbol();
        match ty {
            IrType::Str => match op {
                BinOp::Eq => self.stmt(format!("{dest} = kl_str_eq({lhs}, {rhs});")),
                BinOp::Ne => self.stmt(format!("{dest} = !kl_str_eq({lhs}, {rhs});")),
                _ => return Err(self.error(format!("`{symbol}` does not apply to strings"))),
            },
            IrType::Bool | IrType::Unit
                if op.is_comparison() || matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) =>
            {
                self.stmt(format!("{dest} = {lhs} {symbol} {rhs};"));
            }
            IrType::Int(_) if op.is_comparison() => self.stmt(format!("{dest} = {lhs} {symbol} {rhs};")),
            IrType::Int(kind) => {
                let c = int_type(*kind);
                let wide = wrapping_type(*kind);
                match op {
                    BinOp::Add | BinOp::Sub | BinOp::Mul => {
                        self.stmt(format!("{dest} = ({c})(({wide}){lhs} {symbol} ({wide}){rhs});"));
                    }
                    BinOp::Div | BinOp::Rem => {
                        self.stmt(format!("if ({rhs} == 0) {{"));
                        self.out.line(2, "kl_fail(\"division by zero\");");
                        self.stmt("}");
                        if kind.is_signed() {
                            self.stmt(format!(
                                "if ({rhs} == -1 && {lhs} == {}) {{",
                                int_literal((*kind).min(), *kind)
                            ));
                            self.out.line(2, "kl_fail(\"integer overflow in division\");");
                            self.stmt("}");
                        }
                        self.stmt(format!("{dest} = ({c})({lhs} {symbol} {rhs});"));
                    }
                    BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                        self.stmt(format!("{dest} = ({c})({lhs} {symbol} {rhs});"));
                    }
                    BinOp::Shl | BinOp::Shr => {
                        self.stmt(format!("if ((uint64_t){rhs} >= {}) {{", kind.bits()));
                        self.out.line(2, "kl_fail(\"shift amount out of range\");");
                        self.stmt("}");
                        if op == BinOp::Shl {
                            self.stmt(format!("{dest} = ({c})(({wide}){lhs} << {rhs});"));
                        } else {
                            self.stmt(format!("{dest} = ({c})({lhs} >> {rhs});"));
                        }
                    }
                    _ => return Err(self.error(format!("unexpected comparison `{symbol}`"))),
                }
            }
            other => return Err(self.error(format!("`{symbol}` does not apply to `{other}`"))),
        }
        Ok(())
    }

    /// Tests only the bounds the source kind does not already guarantee. A
    /// range that lies entirely outside the kind can never be satisfied.
    fn range_check(&mut self, value: &str, kind: IntKind, min: i128, max: i128) {
        let message = format!("value out of range {min}..={max}");
        if min > kind.max() || max < kind.min() {
            self.fail(&message);
            return;
        }
        let mut conditions = Vec::new();
        if min > kind.min() {
            conditions.push(format!("{value} < {}", int_literal(min, kind)));
        }
        if max < kind.max() {
            conditions.push(format!("{value} > {}", int_literal(max, kind)));
        }
        if conditions.is_empty() {
            return;
        }
        self.stmt(format!("if ({}) {{", conditions.join(" || ")));
        self.out
            .line(2, format!("kl_fail({});", escape_c_string(&message)));
        self.stmt("}");
    }

    fn runtime(&mut self, call: RuntimeCall, arg: &str, ty: &IrType) -> Result<(), InternalError> {
        let text = match (call, ty) {
            (RuntimeCall::Print, IrType::Int(kind)) if kind.is_signed() => {
                format!("kl_print_i64((int64_t){arg});")
            }
            (RuntimeCall::Print, IrType::Int(_)) => format!("kl_print_u64((uint64_t){arg});"),
            (RuntimeCall::Print, IrType::Bool) => format!("kl_print_bool({arg});"),
            (RuntimeCall::Print, IrType::Str) => format!("kl_print_str({arg});"),
            (RuntimeCall::Assert, IrType::Bool) => format!("kl_assert({arg});"),
            (RuntimeCall::Panic, IrType::Str) => format!("kl_panic({arg});"),
            (call, ty) => {
                return Err(self.error(format!("`{}` cannot take a value of type `{ty}`", call.name())));
            }
        };
        self.stmt(text);
        Ok(())
    }

    fn terminator(&mut self, terminator: &Terminator) {
        let text = match terminator {
            Terminator::Return(value) => format!("return {};", operand(value)),
            Terminator::Jump(target) => format!("goto {target};"),
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => format!("if ({}) goto {then_block}; else goto {else_block};", operand(cond)),
            Terminator::Unreachable => "kl_fail(\"entered unreachable code\");".to_string(),
        };
        self.stmt(text);
    }

    fn temp_type(&self, temp: TempId) -> Result<&'a IrType, InternalError> {
        self.function
            .temps
            .get(temp.0 as usize)
            .ok_or_else(|| self.error(format!("unknown temporary {temp}")))
    }
}
