//! A toy stack machine shared by the integration tests.
//!
//! | Opcode | Mnemonic | Size | Effect |
//! |--------|----------|------|--------|
//! | `0x01` | `PUSH_CONSTANT imm8` | 2 | push the sign-extended immediate |
//! | `0x02` | `ADD` | 1 | pop b, pop a, push a + b |
//! | `0x03` | `SUB` | 1 | pop b, pop a, push a - b |
//! | `0x04` | `RETURN` | 1 | pop and return |
//! | `0x05` | `JUMP_IF rel8` | 2 | pop; jump if non-zero |
//! | `0x06` | `JUMP rel8` | 2 | jump |
//! | `0x07` | `LOAD_ARG` | 1 | push the parameter `arg` |
//! | `0x08` | `HALT` | 1 | stop with the exit value |
//! | `0x09` | `DUP` | 1 | push a copy of the top |
//! | `0x0A` | `PUSH_LOCAL imm8` | 2 | push local `imm8` (frame registry only) |
//! | `0x0B` | `POP_LOCAL imm8` | 2 | pop into local `imm8` (frame registry only) |
//!
//! Jumps are relative to the offset of their own opcode.

#![allow(dead_code)]

use jitweave::prelude::*;

pub const PUSH_CONSTANT: u8 = 0x01;
pub const ADD: u8 = 0x02;
pub const SUB: u8 = 0x03;
pub const RETURN: u8 = 0x04;
pub const JUMP_IF: u8 = 0x05;
pub const JUMP: u8 = 0x06;
pub const LOAD_ARG: u8 = 0x07;
pub const HALT: u8 = 0x08;
pub const DUP: u8 = 0x09;
pub const PUSH_LOCAL: u8 = 0x0A;
pub const POP_LOCAL: u8 = 0x0B;

/// Counts `arg` down to zero and returns it; the counter lives on the stack across the back
/// edge from offset 8 to the loop head at offset 1, the body starts at offset 5.
pub const COUNTDOWN: [u8; 10] = [
    LOAD_ARG,
    DUP,
    JUMP_IF,
    3,
    RETURN,
    PUSH_CONSTANT,
    1,
    SUB,
    JUMP,
    -7i8 as u8,
];

/// Compiled frame: a symbolic operand stack and two symbolic locals.
pub type Frame = FrameState<SimulatedStack, SimulatedArray>;

fn push_constant<S: VmStack + MachineState>(rt: &mut dyn Runtime<S>, node: NodeId) -> Result<Signal> {
    let value = rt.fetch_immediate(node, ImmediateWidth::W8, 1)?;
    {
        let (mut b, stack) = rt.graph_mut().parts(node)?;
        stack.push(&mut b, value)?;
    }
    rt.default_fallthrough(node, 2)?;
    Ok(Signal::Continue)
}

fn binary<S: VmStack + MachineState>(
    rt: &mut dyn Runtime<S>,
    node: NodeId,
    op: BinaryOp,
) -> Result<Signal> {
    {
        let (mut b, stack) = rt.graph_mut().parts(node)?;
        let right = stack.pop(&mut b)?;
        let left = stack.pop(&mut b)?;
        let result = b.binary(op, left, right)?;
        stack.push(&mut b, result)?;
    }
    rt.default_fallthrough(node, 1)?;
    Ok(Signal::Continue)
}

fn ret<S: VmStack + MachineState>(rt: &mut dyn Runtime<S>, node: NodeId) -> Result<Signal> {
    let value = {
        let (mut b, stack) = rt.graph_mut().parts(node)?;
        stack.pop(&mut b)?
    };
    rt.exit(node, Some(value))?;
    Ok(Signal::Returned)
}

fn jump_if<S: VmStack + MachineState>(rt: &mut dyn Runtime<S>, node: NodeId) -> Result<Signal> {
    let target = rt.fetch_immediate(node, ImmediateWidth::W8, 1)?;
    let condition = {
        let (mut b, stack) = rt.graph_mut().parts(node)?;
        stack.pop(&mut b)?
    };
    rt.jump_if_or_fallthrough(node, condition, target, 2, false)?;
    Ok(Signal::Continue)
}

fn jump<S: VmStack + MachineState>(rt: &mut dyn Runtime<S>, node: NodeId) -> Result<Signal> {
    let target = rt.fetch_immediate(node, ImmediateWidth::W8, 1)?;
    rt.jump(node, target, false)?;
    Ok(Signal::Continue)
}

fn load_arg<S: VmStack + MachineState>(rt: &mut dyn Runtime<S>, node: NodeId) -> Result<Signal> {
    let slot = rt.graph().slots().lookup("arg").ok_or_else(|| Error::ContractViolation {
        message: "LOAD_ARG needs a parameter named 'arg'".to_string(),
        file: file!(),
        line: line!(),
    })?;
    {
        let (mut b, stack) = rt.graph_mut().parts(node)?;
        let value = b.load(slot)?;
        stack.push(&mut b, value)?;
    }
    rt.default_fallthrough(node, 1)?;
    Ok(Signal::Continue)
}

fn dup<S: VmStack + MachineState>(rt: &mut dyn Runtime<S>, node: NodeId) -> Result<Signal> {
    {
        let (mut b, stack) = rt.graph_mut().parts(node)?;
        stack.dup(&mut b)?;
    }
    rt.default_fallthrough(node, 1)?;
    Ok(Signal::Continue)
}

fn local_index(rt: &mut dyn Runtime<Frame>, node: NodeId) -> Result<i32> {
    let index = rt.fetch_immediate(node, ImmediateWidth::W8, 1)?;
    let index = rt.graph().values().constant_i64(index).ok_or_else(|| Error::ContractViolation {
        message: "local index must be a constant".to_string(),
        file: file!(),
        line: line!(),
    })?;
    Ok(index as i32)
}

fn push_local(rt: &mut dyn Runtime<Frame>, node: NodeId) -> Result<Signal> {
    let index = local_index(rt, node)?;
    {
        let (mut b, frame) = rt.graph_mut().parts(node)?;
        frame.push_local(&mut b, index)?;
    }
    rt.default_fallthrough(node, 2)?;
    Ok(Signal::Continue)
}

fn pop_local(rt: &mut dyn Runtime<Frame>, node: NodeId) -> Result<Signal> {
    let index = local_index(rt, node)?;
    {
        let (mut b, frame) = rt.graph_mut().parts(node)?;
        frame.pop_local(&mut b, index)?;
    }
    rt.default_fallthrough(node, 2)?;
    Ok(Signal::Continue)
}

fn halt<S: VmStack + MachineState>(rt: &mut dyn Runtime<S>, node: NodeId) -> Result<Signal> {
    rt.halt(node)?;
    Ok(Signal::Returned)
}

/// Registry with every opcode of the toy machine.
pub fn toy_registry<S>() -> Result<HandlerRegistry<S>>
where
    S: VmStack + MachineState + 'static,
{
    let mut registry = HandlerRegistry::new();
    registry.register(i64::from(PUSH_CONSTANT), "push_constant", push_constant::<S>)?;
    registry.register(i64::from(ADD), "add", |rt, node| {
        binary(rt, node, BinaryOp::Add)
    })?;
    registry.register(i64::from(SUB), "sub", |rt, node| {
        binary(rt, node, BinaryOp::Sub)
    })?;
    registry.register(i64::from(RETURN), "return", ret::<S>)?;
    registry.register(i64::from(JUMP_IF), "jump_if", jump_if::<S>)?;
    registry.register(i64::from(JUMP), "jump", jump::<S>)?;
    registry.register(i64::from(LOAD_ARG), "load_arg", load_arg::<S>)?;
    registry.register(i64::from(HALT), "halt", halt::<S>)?;
    registry.register(i64::from(DUP), "dup", dup::<S>)?;
    Ok(registry)
}

/// [`toy_registry`] plus the local variable opcodes, over a [`Frame`].
pub fn frame_registry() -> Result<HandlerRegistry<Frame>> {
    let mut registry = toy_registry::<Frame>()?;
    registry.register(i64::from(PUSH_LOCAL), "push_local", push_local)?;
    registry.register(i64::from(POP_LOCAL), "pop_local", pop_local)?;
    Ok(registry)
}

/// Registry handling only the opcodes `0`, `1` and `2`.
pub fn small_registry<S>() -> Result<HandlerRegistry<S>>
where
    S: VmStack + MachineState + 'static,
{
    let mut registry = HandlerRegistry::new();
    registry.register(0, "push_constant", push_constant::<S>)?;
    registry.register(1, "add", |rt, node| {
        binary(rt, node, BinaryOp::Add)
    })?;
    registry.register(2, "return", ret::<S>)?;
    Ok(registry)
}

/// Interpreter over a memory operand stack, taking the `(code, stack)` start addresses and the
/// value of `arg`.
pub fn build_interpreter(registry: HandlerRegistry<OperandStack>) -> Result<MethodIr<OperandStack>> {
    let mut builder = DispatchLoopBuilder::new(
        "interpret",
        IrType::Int64,
        std::sync::Arc::new(registry),
        DispatchConfig::default(),
    );
    let code = builder.define_parameter("code", IrType::Address)?;
    let stack = builder.define_parameter("stack", IrType::Address)?;
    builder.define_parameter("arg", IrType::Int64)?;
    builder.build(|b| {
        let pc = VmRegister::new(b, "pc", IrType::Address, 1)?;
        let start = b.load(code)?;
        pc.store(b, start)?;

        let sp = VmRegister::new(b, "sp", IrType::Address, 8)?;
        let base = b.load(stack)?;
        sp.store(b, base)?;
        let state = OperandStack::new(sp, StackConfig::new(IrType::Int64))?;
        Ok(Prologue { state, pc, code })
    })
}

/// Runs `bytecodes` through an interpreter built by [`build_interpreter`].
pub fn interpret(ir: &MethodIr<OperandStack>, bytecodes: &[u8], arg: i64) -> Result<Outcome> {
    let mut eval = Evaluator::new();
    let code = eval.memory_mut().alloc_bytes(bytecodes);
    let stack = eval.memory_mut().alloc(64 * 8);
    eval.run(ir, &[code, stack, arg])
}

/// Compiles `bytecodes` with a symbolic operand stack.
pub fn compile_method(
    name: &str,
    bytecodes: &[u8],
    with_arg: bool,
) -> Result<MethodIr<SimulatedStack>> {
    let registry = std::sync::Arc::new(toy_registry()?);
    let mut ctor = GraphConstructor::new(
        name,
        IrType::Int64,
        bytecodes,
        registry,
        BuildConfig::default(),
    );
    if with_arg {
        ctor.define_parameter("arg", IrType::Int64)?;
    }
    ctor.build(|_| Ok(SimulatedStack::new("stack", IrType::Int64)))
}

/// Compiles `bytecodes` over a [`Frame`] whose two locals start out as zero.
pub fn compile_frame_method(name: &str, bytecodes: &[u8]) -> Result<MethodIr<Frame>> {
    let mut ctor = GraphConstructor::new(
        name,
        IrType::Int64,
        bytecodes,
        std::sync::Arc::new(frame_registry()?),
        BuildConfig::default(),
    );
    ctor.define_parameter("arg", IrType::Int64)?;
    ctor.build(|b| {
        let zero = b.const_i64(0);
        Ok(FrameState::new(
            SimulatedStack::new("stack", IrType::Int64),
            SimulatedArray::new("locals", IrType::Int64, 2, zero),
        ))
    })
}
