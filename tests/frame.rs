//! Compiled methods over a frame of operand stack plus locals.

mod common;

use common::*;
use jitweave::prelude::*;

/// `local0 = arg ? 20 : 10; return local0 + 1`, joining at offset 13.
const LOCAL_DIAMOND: [u8; 19] = [
    LOAD_ARG,
    JUMP_IF,
    8,
    PUSH_CONSTANT,
    10,
    POP_LOCAL,
    0,
    JUMP,
    6,
    PUSH_CONSTANT,
    20,
    POP_LOCAL,
    0,
    PUSH_LOCAL,
    0,
    PUSH_CONSTANT,
    1,
    ADD,
    RETURN,
];

#[test]
fn locals_merge_at_join() -> Result<()> {
    let ir = compile_frame_method("locals", &LOCAL_DIAMOND)?;
    let join = ir.node_at_offset(13).expect("join node");
    assert_eq!(join.predecessors.len(), 2);

    // the stack is empty at the join, so only the locals are reloaded
    let slots: Vec<_> = ["locals_0", "locals_1"]
        .iter()
        .map(|name| ir.slots().lookup(name).expect("merge slot"))
        .collect();
    let loaded: Vec<_> = join
        .ops
        .iter()
        .filter_map(|op| match op {
            Op::Load { slot, .. } => Some(*slot),
            _ => None,
        })
        .collect();
    assert_eq!(loaded, slots);

    let taken = Evaluator::new().run(&ir, &[1])?;
    assert_eq!(taken.value, Some(21));
    assert_eq!(taken.visits_of(join.id), 1);
    assert_eq!(Evaluator::new().run(&ir, &[0])?.value, Some(11));
    Ok(())
}

#[test]
fn locals_survive_a_loop() -> Result<()> {
    // local1 = 0; while arg { local1 = local1 + 2; arg = arg - 1 }; return local1
    let program = [
        LOAD_ARG,
        DUP,
        JUMP_IF,
        5,
        PUSH_LOCAL,
        1,
        RETURN,
        PUSH_LOCAL,
        1,
        PUSH_CONSTANT,
        2,
        ADD,
        POP_LOCAL,
        1,
        PUSH_CONSTANT,
        1,
        SUB,
        JUMP,
        -16i8 as u8,
    ];
    let ir = compile_frame_method("doubler", &program)?;
    for n in [0, 1, 4] {
        assert_eq!(Evaluator::new().run(&ir, &[n])?.value, Some(2 * n));
    }
    Ok(())
}

#[test]
fn stack_depth_mismatch_names_both_parts() {
    // the fallthrough arm reaches offset 5 with one more value than the taken arm
    let program = [
        LOAD_ARG,
        JUMP_IF,
        4,
        PUSH_CONSTANT,
        1,
        PUSH_CONSTANT,
        2,
        RETURN,
    ];
    let err = compile_frame_method("uneven", &program).unwrap_err();
    match err {
        Error::ShapeMismatch { current, target, .. } => {
            assert!(current.contains("locals: array Int64[2]"), "{current}");
            assert_ne!(current, target);
        }
        other => panic!("expected a shape mismatch, got {other}"),
    }
}
