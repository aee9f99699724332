use super::lower_program;
use crate::language::{
    ast::NodeIdGen,
    ir::{BinOp, Constant, Instr, IrFunction, IrProgram, IrType, Operand, Terminator},
    parser::parse_module,
    typecheck::{check_program, CheckedProgram},
    types::{IntKind, ModulePath},
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn check_source(source: &str) -> CheckedProgram {
    let mut ids = NodeIdGen::new();
    let module = parse_module(PathBuf::from("app/main.kl"), source, &mut ids).expect("parse");
    match check_program(vec![module], ids) {
        Ok(program) => program,
        Err(diagnostics) => panic!("unexpected diagnostics: {:#?}", diagnostics.into_sorted()),
    }
}

fn lower_source(source: &str) -> IrProgram {
    lower_program(&check_source(source), None).expect("lowering succeeds")
}

fn function<'a>(ir: &'a IrProgram, name: &str) -> &'a IrFunction {
    ir.functions
        .get(&format!("app::{name}"))
        .unwrap_or_else(|| panic!("no function `{name}` in {:?}", ir.functions.keys().collect::<Vec<_>>()))
}

fn instrs(function: &IrFunction) -> impl Iterator<Item = &Instr> {
    function.blocks.iter().flat_map(|block| block.instrs.iter())
}

fn count(function: &IrFunction, predicate: impl Fn(&Instr) -> bool) -> usize {
    instrs(function).filter(|instr| predicate(instr)).count()
}

#[test]
fn structs_lower_to_aggregate_instructions() {
    let ir = lower_source(
        "struct Point { x: i32, y: i32 }\n\
         fn sum() -> i32 { let p = Point { y: 2, x: 1 }; p.x + p.y }",
    );
    let sum = function(&ir, "sum");
    assert_eq!(count(sum, |i| matches!(i, Instr::MakeStruct { .. })), 1);
    assert_eq!(count(sum, |i| matches!(i, Instr::FieldGet { .. })), 2);
    let fields = instrs(sum)
        .find_map(|instr| match instr {
            Instr::MakeStruct { fields, .. } => Some(fields.clone()),
            _ => None,
        })
        .expect("struct construction");
    let int = |value| {
        Operand::Const(Constant::Int {
            value,
            kind: IntKind::I32,
        })
    };
    assert_eq!(fields, vec![int(1), int(2)]);
    assert!(ir.structs.contains_key("app::Point"));
}

#[test]
fn enum_match_reads_the_tag_once() {
    let ir = lower_source(
        "enum E { A(i32), None }\n\
         fn f(e: E) -> i32 { match e { .A(v) => v, .None => 0 } }",
    );
    let f = function(&ir, "f");
    assert_eq!(count(f, |i| matches!(i, Instr::Tag { .. })), 1);
    assert_eq!(
        count(f, |i| matches!(i, Instr::Binary { op: BinOp::Eq, .. })),
        2
    );
    assert_eq!(count(f, |i| matches!(i, Instr::Payload { field: 0, .. })), 1);
}

#[test]
fn logical_and_never_evaluates_the_right_side_eagerly() {
    let ir = lower_source(
        "fn rhs() -> bool { panic(\"rhs was called\"); true }\n\
         fn f() -> bool { false && rhs() }",
    );
    let f = function(&ir, "f");
    let entry = &f.blocks[0];
    assert!(!entry.instrs.iter().any(|i| matches!(i, Instr::Call { .. })));
    let Terminator::Branch {
        cond,
        then_block,
        else_block,
    } = &entry.terminator
    else {
        panic!("expected a branch, found {}", entry.terminator);
    };
    assert_eq!(*cond, Operand::bool(false));
    let calls_rhs = |id| {
        f.block(id)
            .expect("target exists")
            .instrs
            .iter()
            .any(|i| matches!(i, Instr::Call { function, .. } if function == "app::rhs"))
    };
    assert!(calls_rhs(*then_block));
    assert!(!calls_rhs(*else_block));
}

#[test]
fn generic_instances_are_lowered_separately() {
    let ir = lower_source(
        "fn id[T](x: T) -> T { x }\n\
         fn main() -> i64 { let b = id(true); let c = id(5); id(1) }",
    );
    assert_eq!(function(&ir, "id[T=bool]").params, vec![IrType::Bool]);
    assert_eq!(function(&ir, "id[T=i64]").params, vec![IrType::Int(IntKind::I64)]);
    let instances = ir.functions.keys().filter(|name| name.starts_with("app::id[")).count();
    assert_eq!(instances, 2);
}

#[test]
fn parameters_are_stored_into_slots_at_entry() {
    let ir = lower_source("fn add(a: i32, b: i32) -> i32 { a + b }");
    let add = function(&ir, "add");
    let entry = &add.blocks[0];
    assert!(matches!(
        &entry.instrs[0],
        Instr::Store { value: Operand::Param(0), .. }
    ));
    assert!(matches!(
        &entry.instrs[1],
        Instr::Store { value: Operand::Param(1), .. }
    ));
    assert_eq!(add.slots.len(), 2);
}

#[test]
fn loops_and_branches_produce_well_formed_blocks() {
    let ir = lower_source(
        "fn walk(n: i32) -> i32 {\n\
             let mut i: i32 = 0;\n\
             let mut total: i32 = 0;\n\
             while i < n {\n\
                 i = i + 1;\n\
                 if i == 3 { continue; }\n\
                 if i > 8 { break; }\n\
                 total = total + i;\n\
             }\n\
             match total { 0 => 1, _ => total }\n\
         }",
    );
    let walk = function(&ir, "walk");
    walk.verify().expect("well formed");
    for block in &walk.blocks {
        for target in block.terminator.targets() {
            assert!(walk.block(target).is_some(), "{target} is missing");
        }
    }
    let returns = walk
        .blocks
        .iter()
        .filter(|block| matches!(block.terminator, Terminator::Return(_)))
        .count();
    assert_eq!(returns, 1);
}

#[test]
fn code_after_return_is_dropped() {
    let ir = lower_source("fn f() -> i32 { return 1; }");
    let f = function(&ir, "f");
    assert_eq!(f.blocks.len(), 1);

    let ir = lower_source("fn g(c: bool) -> i32 { if c { return 1; } else { return 2; } }");
    let g = function(&ir, "g");
    assert!(g
        .blocks
        .iter()
        .all(|block| matches!(block.terminator, Terminator::Return(_) | Terminator::Branch { .. })));
}

#[test]
fn range_casts_check_their_bounds() {
    let ir = lower_source("fn f(x: i64) -> i32[0..=9] { x as i32[0..=9] }");
    let f = function(&ir, "f");
    assert_eq!(
        count(f, |i| matches!(
            i,
            Instr::RangeCheck {
                kind: IntKind::I64,
                min: 0,
                max: 9,
                ..
            }
        )),
        1
    );
    assert_eq!(
        count(f, |i| matches!(
            i,
            Instr::Cast {
                from: IntKind::I64,
                to: IntKind::I32,
                ..
            }
        )),
        1
    );
}

#[test]
fn list_intrinsics_work_on_receiver_slots() {
    let ir = lower_source(
        "fn f() -> i64 { let mut xs: List[i32] = list(); xs.push(4); xs.len() }",
    );
    let f = function(&ir, "f");
    assert_eq!(count(f, |i| matches!(i, Instr::ListNew { elem: IrType::Int(IntKind::I32), .. })), 1);
    assert_eq!(count(f, |i| matches!(i, Instr::Intrinsic { .. })), 2);
}

#[test]
fn entry_point_is_recorded() {
    let program = check_source("fn main() -> i32 { 7 }");
    let entry = ModulePath::root("app").qualify("main");
    let ir = lower_program(&program, Some(&entry)).expect("lowering succeeds");
    let entry = ir.entry.expect("entry point");
    assert_eq!(entry.function, "app::main");
    assert_eq!(entry.ret, IrType::Int(IntKind::I32));
}

#[test]
fn missing_resolutions_are_internal_errors() {
    let mut program = check_source("fn g() -> i32 { 1 }\nfn f() -> i32 { g() }");
    program.resolutions.calls.clear();
    let error = lower_program(&program, None).unwrap_err();
    assert!(error.message.contains("has no resolved target"), "{error}");
}
