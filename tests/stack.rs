//! Operand stack layout tests.
//!
//! Pushes and pops a memory-backed operand stack in every growth direction and adjustment
//! order, and checks through the evaluator that a pop returns the value of the matching push
//! while leaving the cells below it untouched.

use std::{cell::RefCell, rc::Rc};

use jitweave::prelude::*;
use proptest::prelude::*;

const CAPACITY: i64 = 32;

fn layouts() -> [StackConfig; 4] {
    let config = StackConfig::new(IrType::Int64);
    [
        config.grows_up(true).pre_adjust(false),
        config.grows_up(true).pre_adjust(true),
        config.grows_up(false).pre_adjust(false),
        config.grows_up(false).pre_adjust(true),
    ]
}

/// Builds a method that pushes `rest` then `value`, pops once, pops `rest` back off and reports
/// every popped value to the host function `observe`. It returns the final stack register.
fn push_pop_method(config: StackConfig, rest: &[i64], value: i64) -> Result<MethodIr<OperandStack>> {
    let mut graph = MethodGraph::new("push_pop", IrType::Address, 16, false);
    let area = graph.define_parameter("area", IrType::Address)?;
    let observe = graph.declare_function("observe", IrType::NoType, &[IrType::Int64])?;
    let entry = graph.entry();

    let (stack, end) = {
        let mut b = graph.emitter(entry)?;
        let sp = VmRegister::new(&mut b, "sp", IrType::Address, 8)?;
        let start = b.load(area)?;
        let start = if config.grows_up {
            start
        } else {
            let top = b.const_i64(CAPACITY - 1);
            b.index_at(IrType::Int64, start, top)?
        };
        sp.store(&mut b, start)?;

        let mut stack = OperandStack::new(sp.clone(), config)?;
        for &v in rest {
            let v = b.const_i64(v);
            stack.push(&mut b, v)?;
        }
        let v = b.const_i64(value);
        stack.push(&mut b, v)?;
        let popped = stack.pop(&mut b)?;
        b.call(observe, &[popped])?;
        for _ in rest {
            let popped = stack.pop(&mut b)?;
            b.call(observe, &[popped])?;
        }
        let end = sp.load(&mut b)?;
        (stack, end)
    };
    graph.set_entry_state(stack)?;
    graph.ret(entry, Some(end))?;
    graph.finish()
}

fn run(config: StackConfig, rest: &[i64], value: i64) -> Result<(Vec<i64>, i64, i64)> {
    let ir = push_pop_method(config, rest, value)?;
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut eval = Evaluator::new();
    let sink = Rc::clone(&seen);
    eval.define_host("observe", move |_, args| {
        sink.borrow_mut().push(args[0]);
        Ok(None)
    });
    let area = eval.memory_mut().alloc((CAPACITY * 8) as usize);
    let start = if config.grows_up {
        area
    } else {
        area + (CAPACITY - 1) * 8
    };
    let outcome = eval.run(&ir, &[area])?;
    let end = outcome.value.expect("register value");
    let seen = seen.borrow().clone();
    Ok((seen, start, end))
}

#[test]
fn pop_returns_pushed_value_in_every_layout() -> Result<()> {
    for config in layouts() {
        let (seen, start, end) = run(config, &[1, 2, 3], 42)?;
        assert_eq!(seen, vec![42, 3, 2, 1], "{config:?}");
        assert_eq!(start, end, "{config:?}");
    }
    Ok(())
}

/// Commits a backed stack and locals array twice, then returns the committed stack top.
fn commit_twice_method() -> Result<MethodIr<FrameState<SimulatedStack, SimulatedArray>>> {
    let mut graph = MethodGraph::new("commit_twice", IrType::Address, 16, false);
    let frame = graph.define_parameter("frame", IrType::Address)?;
    let locals = graph.define_parameter("locals", IrType::Address)?;
    let entry = graph.entry();

    let (state, end) = {
        let mut b = graph.emitter(entry)?;
        let sp = VmRegister::backed(&mut b, "sp", IrType::Address, 8, frame, 0)?;
        let stack = SimulatedStack::backed(&mut b, "stack", IrType::Int64, sp.clone())?;
        let base = VmRegister::new(&mut b, "locals_base", IrType::Address, 8)?;
        let start = b.load(locals)?;
        base.store(&mut b, start)?;
        let array = SimulatedArray::backed(&mut b, "locals", IrType::Int64, 2, base)?;

        let mut state = FrameState::new(stack, array);
        for v in [5, 7] {
            let v = b.const_i64(v);
            state.push(&mut b, v)?;
        }
        state.pop_local(&mut b, 1)?;
        let nine = b.const_i64(9);
        state.locals.set_const(&mut b, 0, nine)?;

        state.commit(&mut b)?;
        state.commit(&mut b)?;
        let end = sp.load(&mut b)?;
        (state, end)
    };
    graph.set_entry_state(state)?;
    graph.ret(entry, Some(end))?;
    graph.finish()
}

#[test]
fn repeated_commit_writes_the_same_memory() -> Result<()> {
    let ir = commit_twice_method()?;
    let mut eval = Evaluator::new();
    let frame = eval.memory_mut().alloc(8);
    let stack = eval.memory_mut().alloc(4 * 8);
    let locals = eval.memory_mut().alloc(2 * 8);
    eval.memory_mut().write(frame, IrType::Address, stack)?;

    let outcome = eval.run(&ir, &[frame, locals])?;
    let memory = eval.memory();
    // one element left on the stack, the top moved past it exactly once
    assert_eq!(outcome.value, Some(stack + 8));
    assert_eq!(memory.read(frame, IrType::Address)?, stack + 8);
    assert_eq!(memory.read(stack, IrType::Int64)?, 5);
    assert_eq!(memory.read(locals, IrType::Int64)?, 9);
    assert_eq!(memory.read(locals + 8, IrType::Int64)?, 7);
    Ok(())
}

proptest! {
    #[test]
    fn push_pop_inverse(
        rest in prop::collection::vec(any::<i64>(), 0..16),
        value in any::<i64>(),
        layout in 0usize..4,
    ) {
        let config = layouts()[layout];
        let (seen, start, end) = run(config, &rest, value).unwrap();

        let mut expected = vec![value];
        expected.extend(rest.iter().rev());
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(start, end);
    }
}
