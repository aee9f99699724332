use super::{emit_c, escape_c_string, function_symbol, layout_order, mangle, Nominal};
use crate::{
    language::{
        errors::CompileError,
        ir::{
            BlockId, Constant, EntryPoint, IrBlock, IrEnum, IrFunction, IrProgram, IrStruct,
            IrType, IrVariant, Operand, Terminator,
        },
        types::IntKind,
    },
    target::EmitMode,
};
use pretty_assertions::assert_eq;

fn returning(name: &str, ret: IrType, value: Operand, terminator: Option<Terminator>) -> IrFunction {
    IrFunction {
        name: name.to_string(),
        params: Vec::new(),
        ret,
        slots: Vec::new(),
        temps: Vec::new(),
        blocks: vec![IrBlock {
            id: BlockId(0),
            instrs: Vec::new(),
            terminator: terminator.unwrap_or(Terminator::Return(value)),
        }],
    }
}

fn structure(name: &str, fields: &[(&str, IrType)]) -> IrStruct {
    IrStruct {
        name: name.to_string(),
        fields: fields
            .iter()
            .map(|(field, ty)| (field.to_string(), ty.clone()))
            .collect(),
    }
}

fn program_with_entry(ret: IrType, value: Operand) -> IrProgram {
    let mut program = IrProgram::default();
    program.functions.insert(
        "app::main".to_string(),
        returning("app::main", ret.clone(), value, None),
    );
    program.entry = Some(EntryPoint {
        function: "app::main".to_string(),
        ret,
    });
    program
}

fn int(value: i128, kind: IntKind) -> Operand {
    Operand::Const(Constant::Int { value, kind })
}

#[test]
fn mangling_keeps_distinct_names_distinct() {
    assert_eq!(mangle("app::main"), "app_3a_3amain");
    assert_eq!(mangle("id[T=i64]"), "id_5bT_3di64_5d");
    let names = ["a_b", "a::b", "a_3ab", "a.b", "ab"];
    let mangled: std::collections::HashSet<String> = names.iter().map(|name| mangle(name)).collect();
    assert_eq!(mangled.len(), names.len());
    assert!(function_symbol("app::Point.len").starts_with("kf_"));
}

#[test]
fn string_literals_are_escaped() {
    assert_eq!(escape_c_string("plain"), "\"plain\"");
    assert_eq!(escape_c_string("a\"b\\c"), "\"a\\\"b\\\\c\"");
    assert_eq!(escape_c_string("line\n\ttab\r"), "\"line\\n\\ttab\\r\"");
    assert_eq!(escape_c_string("\u{1}x"), "\"\\x01x\"");
    // A hex digit after `\x01` would otherwise extend the escape.
    assert_eq!(escape_c_string("\u{1}a"), "\"\\x01\" \"a\"");
    assert_eq!(escape_c_string("é"), "\"\\xc3\\xa9\"");
}

#[test]
fn aggregates_are_ordered_by_containment() {
    let mut program = IrProgram::default();
    program.structs.insert(
        "app::Outer".to_string(),
        structure("app::Outer", &[("inner", IrType::Struct("app::Inner".into()))]),
    );
    program.structs.insert(
        "app::Inner".to_string(),
        structure(
            "app::Inner",
            &[
                ("shape", IrType::Enum("app::Shape".into())),
                ("more", IrType::List(Box::new(IrType::Struct("app::Outer".into())))),
            ],
        ),
    );
    program.enums.insert(
        "app::Shape".to_string(),
        IrEnum {
            name: "app::Shape".to_string(),
            variants: vec![
                IrVariant {
                    name: "Dot".to_string(),
                    payload: None,
                },
                IrVariant {
                    name: "Size".to_string(),
                    payload: Some(IrType::Int(IntKind::I32)),
                },
            ],
        },
    );
    let order = layout_order(&program).expect("acyclic");
    assert_eq!(
        order,
        vec![
            Nominal::Enum("app::Shape".to_string()),
            Nominal::Struct("app::Inner".to_string()),
            Nominal::Struct("app::Outer".to_string()),
        ]
    );

    let c = emit_c(&program, EmitMode::Program).expect("emits");
    let shape = c.find("struct ke_app_3a_3aShape {").expect("enum definition");
    let inner = c.find("struct ks_app_3a_3aInner {").expect("inner definition");
    let outer = c.find("struct ks_app_3a_3aOuter {").expect("outer definition");
    assert!(shape < inner && inner < outer);
    assert!(c.contains("struct { int32_t f0; } v1; /* Size */"));
}

#[test]
fn layout_cycles_name_every_member() {
    let mut program = IrProgram::default();
    program.structs.insert(
        "app::A".to_string(),
        structure("app::A", &[("b", IrType::Struct("app::B".into()))]),
    );
    program.structs.insert(
        "app::B".to_string(),
        structure("app::B", &[("a", IrType::Struct("app::A".into()))]),
    );
    program.structs.insert(
        "app::Me".to_string(),
        structure("app::Me", &[("me", IrType::Struct("app::Me".into()))]),
    );
    program.structs.insert(
        "app::Holder".to_string(),
        structure("app::Holder", &[("a", IrType::Struct("app::A".into()))]),
    );
    let error = layout_order(&program).unwrap_err();
    assert_eq!(
        error.cycles,
        vec![
            vec!["app::A".to_string(), "app::B".to_string()],
            vec!["app::Me".to_string()],
        ]
    );
    assert!(matches!(
        emit_c(&program, EmitMode::Program),
        Err(CompileError::Layout(_))
    ));
}

#[test]
fn empty_aggregates_stay_valid_c() {
    let mut program = IrProgram::default();
    program
        .structs
        .insert("app::Empty".to_string(), structure("app::Empty", &[]));
    let c = emit_c(&program, EmitMode::Program).expect("emits");
    assert!(c.contains("struct ks_app_3a_3aEmpty {\n    char _unused;\n};"));
}

#[test]
fn program_mode_prints_the_result() {
    let program = program_with_entry(IrType::Int(IntKind::I32), int(42, IntKind::I32));
    let c = emit_c(&program, EmitMode::Program).expect("emits");
    assert!(c.contains("int32_t result = kf_app_3a_3amain();"));
    assert!(c.contains("kl_print_i64((int64_t)result);"));
    assert!(c.contains("return ((int32_t)42);"));

    let program = program_with_entry(IrType::Unit, Operand::unit());
    let c = emit_c(&program, EmitMode::Program).expect("emits");
    let main = &c[c.find("int main(void)").expect("main")..];
    assert!(!main.contains("kl_print"));
}

#[test]
fn tool_mode_returns_the_low_byte() {
    let program = program_with_entry(IrType::Int(IntKind::I64), int(300, IntKind::I64));
    let c = emit_c(&program, EmitMode::Tool).expect("emits");
    let main = &c[c.find("int main(void)").expect("main")..];
    assert!(main.contains("return (int)((uint64_t)result & 0xFF);"));
    assert!(!main.contains("kl_print"));

    let program = program_with_entry(IrType::Bool, Operand::bool(true));
    let c = emit_c(&program, EmitMode::Tool).expect("emits");
    assert!(c.contains("return result ? 1 : 0;"));
}

#[test]
fn libraries_have_no_main() {
    let mut program = IrProgram::default();
    program.functions.insert(
        "app::helper".to_string(),
        returning("app::helper", IrType::Unit, Operand::unit(), None),
    );
    let c = emit_c(&program, EmitMode::Program).expect("emits");
    assert!(c.contains("static kl_unit kf_app_3a_3ahelper(void);"));
    assert!(!c.contains("int main(void)"));
}

#[test]
fn unreachable_blocks_abort() {
    let mut program = IrProgram::default();
    program.functions.insert(
        "app::never".to_string(),
        returning(
            "app::never",
            IrType::Int(IntKind::I32),
            Operand::unit(),
            Some(Terminator::Unreachable),
        ),
    );
    let c = emit_c(&program, EmitMode::Program).expect("emits");
    assert!(c.contains("kl_fail(\"entered unreachable code\");"));
}

#[test]
fn extreme_constants_are_valid_c() {
    let program = program_with_entry(IrType::Int(IntKind::I64), int(i64::MIN as i128, IntKind::I64));
    let c = emit_c(&program, EmitMode::Program).expect("emits");
    assert!(c.contains("return INT64_MIN;"));

    let program = program_with_entry(IrType::Int(IntKind::U64), int(u64::MAX as i128, IntKind::U64));
    let c = emit_c(&program, EmitMode::Program).expect("emits");
    assert!(c.contains("return UINT64_C(18446744073709551615);"));
    assert!(c.contains("kl_print_u64((uint64_t)result);"));
}

#[test]
fn checked_programs_emit_runtime_guards() {
    use crate::language::{
        ast::NodeIdGen, lower::lower_program, parser::parse_module, typecheck::check_program,
        types::ModulePath,
    };
    use std::path::PathBuf;

    let source = "fn narrow(x: i64) -> i32[0..=9] { x as i32[0..=9] }\n\
                  fn div(a: i32, b: i32) -> i32 { a / b }\n\
                  fn main() -> i32 { let n = narrow(3); div(n as i32, 1) }";
    let mut ids = NodeIdGen::new();
    let module = parse_module(PathBuf::from("app/main.kl"), source, &mut ids).expect("parse");
    let checked = check_program(vec![module], ids).expect("checks");
    let entry = ModulePath::root("app").qualify("main");
    let ir = lower_program(&checked, Some(&entry)).expect("lowers");
    let c = emit_c(&ir, EmitMode::Program).expect("emits");

    assert!(c.contains("INT64_C(0)"), "{c}");
    assert!(c.contains("INT64_C(9)"), "{c}");
    assert!(c.contains("kl_fail(\"division by zero\");"));
    assert!(c.contains("kl_fail(\"integer overflow in division\");"));
    let prototype = c.find("static int32_t kf_app_3a_3adiv(int32_t p0, int32_t p1);").expect("prototype");
    let body = c.find("static int32_t kf_app_3a_3adiv(int32_t p0, int32_t p1) {").expect("body");
    assert!(prototype < body);
}
