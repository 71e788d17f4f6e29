//! Benchmarks for graph construction.
//!
//! Measures:
//! - Generating an interpreter dispatch loop over a small handler set
//! - Compiling a long straight-line method with a symbolic stack
//! - Evaluating the generated interpreter on a short program

extern crate jitweave;

use criterion::{criterion_group, criterion_main, Criterion};
use jitweave::prelude::*;
use std::{hint::black_box, sync::Arc};

const PUSH: u8 = 0;
const ADD: u8 = 1;
const RET: u8 = 2;

fn registry<S: VmStack + MachineState + 'static>() -> HandlerRegistry<S> {
    let mut registry = HandlerRegistry::new();
    registry
        .register(i64::from(PUSH), "push", |rt, node| {
            let value = rt.fetch_immediate(node, ImmediateWidth::W8, 1)?;
            {
                let (mut b, stack) = rt.graph_mut().parts(node)?;
                stack.push(&mut b, value)?;
            }
            rt.default_fallthrough(node, 2)?;
            Ok(Signal::Continue)
        })
        .unwrap();
    registry
        .register(i64::from(ADD), "add", |rt, node| {
            {
                let (mut b, stack) = rt.graph_mut().parts(node)?;
                let right = stack.pop(&mut b)?;
                let left = stack.pop(&mut b)?;
                let sum = b.add(left, right)?;
                stack.push(&mut b, sum)?;
            }
            rt.default_fallthrough(node, 1)?;
            Ok(Signal::Continue)
        })
        .unwrap();
    registry
        .register(i64::from(RET), "ret", |rt, node| {
            let value = {
                let (mut b, stack) = rt.graph_mut().parts(node)?;
                stack.pop(&mut b)?
            };
            rt.exit(node, Some(value))?;
            Ok(Signal::Returned)
        })
        .unwrap();
    registry
}

fn interpreter(registry: Arc<HandlerRegistry<OperandStack>>) -> MethodIr<OperandStack> {
    let mut builder = DispatchLoopBuilder::new(
        "interpret",
        IrType::Int64,
        registry,
        DispatchConfig::default(),
    );
    let code = builder.define_parameter("code", IrType::Address).unwrap();
    let stack = builder.define_parameter("stack", IrType::Address).unwrap();
    builder
        .build(|b| {
            let pc = VmRegister::new(b, "pc", IrType::Address, 1)?;
            let start = b.load(code)?;
            pc.store(b, start)?;
            let sp = VmRegister::new(b, "sp", IrType::Address, 8)?;
            let base = b.load(stack)?;
            sp.store(b, base)?;
            let state = OperandStack::new(sp, StackConfig::new(IrType::Int64))?;
            Ok(Prologue { state, pc, code })
        })
        .unwrap()
}

/// Benchmark generating the interpreter.
fn bench_dispatch_loop(c: &mut Criterion) {
    let registry = Arc::new(registry::<OperandStack>());

    c.bench_function("dispatch_loop_build", |b| {
        b.iter(|| black_box(interpreter(Arc::clone(&registry))));
    });
}

/// Benchmark compiling 256 pushes folded by 255 adds.
fn bench_compile_straight_line(c: &mut Criterion) {
    let registry = Arc::new(registry::<SimulatedStack>());
    let mut program = Vec::new();
    for i in 0..256u32 {
        program.extend_from_slice(&[PUSH, (i % 100) as u8]);
    }
    program.extend(std::iter::repeat(ADD).take(255));
    program.push(RET);

    c.bench_function("compile_straight_line", |b| {
        b.iter(|| {
            let ctor = GraphConstructor::new(
                "sum",
                IrType::Int64,
                black_box(&program),
                Arc::clone(&registry),
                BuildConfig::default(),
            );
            let ir = ctor
                .build(|_| Ok(SimulatedStack::new("stack", IrType::Int64)))
                .unwrap();
            black_box(ir)
        });
    });
}

/// Benchmark running a short program through the generated interpreter.
fn bench_interpret(c: &mut Criterion) {
    let ir = interpreter(Arc::new(registry::<OperandStack>()));
    let program = [PUSH, 3, PUSH, 5, ADD, PUSH, 2, ADD, RET];

    c.bench_function("interpret_short_program", |b| {
        b.iter(|| {
            let mut eval = Evaluator::new();
            let code = eval.memory_mut().alloc_bytes(black_box(&program));
            let stack = eval.memory_mut().alloc(16 * 8);
            black_box(eval.run(&ir, &[code, stack]).unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_dispatch_loop,
    bench_compile_straight_line,
    bench_interpret
);
criterion_main!(benches);
