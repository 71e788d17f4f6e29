//! Generated interpreter tests.
//!
//! These build the dispatch loop of the toy machine in `common` and run bytecode through it
//! with the reference evaluator.

mod common;

use common::*;
use jitweave::{ir::Terminator, prelude::*};

fn node_named(ir: &MethodIr<OperandStack>, name: &str) -> NodeId {
    ir.nodes()
        .find(|n| n.name == name)
        .map(|n| n.id)
        .unwrap_or_else(|| panic!("no node named {name}"))
}

#[test]
fn arithmetic_program_returns_six() -> Result<()> {
    let ir = build_interpreter(toy_registry()?)?;
    let program = [PUSH_CONSTANT, 3, PUSH_CONSTANT, 5, ADD, PUSH_CONSTANT, 2, SUB, RETURN];

    let outcome = interpret(&ir, &program, 0)?;
    assert_eq!(outcome.value, Some(6));
    assert!(outcome.traps.is_empty());
    // one dispatch per instruction
    assert_eq!(outcome.visits_of(node_named(&ir, "fetch")), 6);
    assert_eq!(outcome.visits_of(node_named(&ir, "push_constant")), 3);
    Ok(())
}

#[test]
fn unknown_opcode_traps_once() -> Result<()> {
    let ir = build_interpreter(small_registry()?)?;
    let outcome = interpret(&ir, &[9], 0)?;

    assert_eq!(outcome.traps, vec![9]);
    assert_eq!(outcome.value, Some(-1));
    assert_eq!(outcome.visits_of(node_named(&ir, "unknown_opcode")), 1);
    for name in ["push_constant", "add", "return"] {
        assert_eq!(outcome.visits_of(node_named(&ir, name)), 0, "{name} ran");
    }
    Ok(())
}

#[test]
fn unknown_opcode_after_valid_prefix() -> Result<()> {
    let ir = build_interpreter(small_registry()?)?;
    let outcome = interpret(&ir, &[0, 4, 9, 2], 0)?;

    assert_eq!(outcome.traps, vec![9]);
    assert_eq!(outcome.visits_of(node_named(&ir, "push_constant")), 1);
    assert_eq!(outcome.visits_of(node_named(&ir, "return")), 0);
    Ok(())
}

#[test]
fn switch_cases_follow_opcode_order() -> Result<()> {
    let ir = build_interpreter(toy_registry()?)?;
    let fetch = ir.node(node_named(&ir, "fetch")).expect("fetch node");
    let Terminator::Switch { cases, default, .. } = &fetch.terminator else {
        panic!("fetch does not end in a switch: {:?}", fetch.terminator);
    };

    let values: Vec<i64> = cases.iter().map(|c| c.value).collect();
    assert_eq!(values, (1..=9).collect::<Vec<_>>());
    assert_eq!(*default, node_named(&ir, "unknown_opcode"));
    Ok(())
}

#[test]
fn conditional_jumps_move_the_program_counter() -> Result<()> {
    let ir = build_interpreter(toy_registry()?)?;
    // arg ? 20 : 10
    let program = [
        LOAD_ARG,
        JUMP_IF,
        6,
        PUSH_CONSTANT,
        10,
        JUMP,
        4,
        PUSH_CONSTANT,
        20,
        RETURN,
    ];

    assert_eq!(interpret(&ir, &program, 0)?.value, Some(10));
    assert_eq!(interpret(&ir, &program, 5)?.value, Some(20));
    Ok(())
}

#[test]
fn halt_leaves_the_loop_with_exit_value() -> Result<()> {
    let ir = build_interpreter(toy_registry()?)?;
    let outcome = interpret(&ir, &[PUSH_CONSTANT, 1, HALT], 0)?;
    assert_eq!(outcome.value, Some(-1));
    assert!(outcome.traps.is_empty());
    assert_eq!(outcome.visits_of(node_named(&ir, "break")), 1);
    Ok(())
}

#[test]
fn backward_jump_loops() -> Result<()> {
    let ir = build_interpreter(toy_registry()?)?;
    // 0: push 1; 2: jump_if -2 back to 0, forever
    let program = [PUSH_CONSTANT, 1, JUMP_IF, 0xFE];
    let mut eval = Evaluator::new().with_step_limit(10_000);
    let code = eval.memory_mut().alloc_bytes(&program);
    let stack = eval.memory_mut().alloc(8);
    let err = eval.run(&ir, &[code, stack, 0]).unwrap_err();
    assert!(matches!(err, Error::Evaluation(_)));
    Ok(())
}

#[test]
fn backward_jump_loops_until_zero() -> Result<()> {
    let ir = build_interpreter(toy_registry()?)?;
    for n in [0, 3] {
        let outcome = interpret(&ir, &COUNTDOWN, n)?;
        assert_eq!(outcome.value, Some(0));
        assert_eq!(outcome.visits_of(node_named(&ir, "sub")), n as usize);
    }
    Ok(())
}

#[test]
fn continuing_handlers_return_to_loop_header() -> Result<()> {
    let ir = build_interpreter(toy_registry()?)?;
    let header = node_named(&ir, "loop");
    for name in ["push_constant", "add", "dup"] {
        let case = ir.node(node_named(&ir, name)).expect("case node");
        assert_eq!(case.terminator, Terminator::Goto(header), "{name}");
    }
    // returning handlers are closed by the handler itself
    let ret = ir.node(node_named(&ir, "return")).expect("case node");
    assert!(matches!(ret.terminator, Terminator::Return(Some(_))));
    Ok(())
}
