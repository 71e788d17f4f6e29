//! Interpreter generation.
//!
//! [`DispatchLoopBuilder`] turns a [`HandlerRegistry`] into the IR of an interpreter function.
//! The generated function has this shape:
//!
//! ```text
//!   entry ──► loop ──(keep_going == 0)──► break ──► return exit value
//!              ▲  │
//!              │  ▼
//!              │ fetch: opcode = *pc
//!              │  │ switch opcode
//!              │  ├──► case 0 ─┐
//!              │  ├──► case 1 ─┤
//!              │  ├──► ...    ─┤
//!              └──┴────────────┘
//!                 └──► unknown_opcode: trap, keep_going = 0 ──► break
//! ```
//!
//! Every case is populated once by its handler. Control transfers performed by a handler move
//! the program counter register and continue at the loop header; nothing of the bytecode being
//! interpreted is known while building.

use std::sync::Arc;

use tracing::debug;

use crate::{
    graph::{MethodGraph, NodeId},
    ir::{BinaryOp, Emitter, FunctionId, IrType, MethodIr, SlotId, SwitchCase, ValueId},
    runtime::{FrameKind, HandlerRegistry, ImmediateWidth, Runtime, Signal},
    state::{MachineState, VmRegister},
    Result,
};

/// Configuration of a generated interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Width of the opcodes in the instruction stream
    pub opcode_width: ImmediateWidth,
    /// Value returned when the loop ends through `halt` or an unknown opcode
    pub exit_value: i64,
    /// Upper bound on the number of builder nodes
    pub max_nodes: usize,
    /// Whether every emitted operation is logged at `trace` level
    pub trace: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            opcode_width: ImmediateWidth::W8,
            exit_value: -1,
            max_nodes: 4096,
            trace: false,
        }
    }
}

impl DispatchConfig {
    /// Sets the opcode width.
    #[must_use]
    pub fn opcode_width(mut self, width: ImmediateWidth) -> Self {
        self.opcode_width = width;
        self
    }

    /// Sets the value returned by the `break` exit.
    #[must_use]
    pub fn exit_value(mut self, value: i64) -> Self {
        self.exit_value = value;
        self
    }

    /// Sets the node limit.
    #[must_use]
    pub fn max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Enables per-operation tracing.
    #[must_use]
    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}

/// Result of the interpreter prologue.
#[derive(Debug)]
pub struct Prologue<S> {
    /// Machine state at the loop header
    pub state: S,
    /// Program counter register, addressing the current opcode
    pub pc: VmRegister,
    /// Slot holding the start address of the instruction stream, the base of absolute jumps
    pub code: SlotId,
}

/// Builds the fetch, decode and execute loop of an interpreter.
#[derive(Debug)]
pub struct DispatchLoopBuilder<S> {
    graph: MethodGraph<S>,
    registry: Arc<HandlerRegistry<S>>,
    config: DispatchConfig,
    return_type: IrType,
}

impl<S: MachineState> DispatchLoopBuilder<S> {
    /// Creates a builder for the interpreter function `name`.
    #[must_use]
    pub fn new(
        name: &str,
        return_type: IrType,
        registry: Arc<HandlerRegistry<S>>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            graph: MethodGraph::new(name, return_type, config.max_nodes, config.trace),
            registry,
            config,
            return_type,
        }
    }

    /// Declares the next parameter of the interpreter function.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken.
    pub fn define_parameter(&mut self, name: &str, ty: IrType) -> Result<SlotId> {
        self.graph.define_parameter(name, ty)
    }

    /// Declares an external function handlers may call.
    ///
    /// # Errors
    ///
    /// Returns an error on a conflicting redeclaration.
    pub fn declare_function(
        &mut self,
        name: &str,
        returns: IrType,
        params: &[IrType],
    ) -> Result<FunctionId> {
        self.graph.declare_function(name, returns, params)
    }

    /// Generates the interpreter.
    ///
    /// `prologue` runs in the entry node. It sets up the program counter and returns the
    /// machine state the loop starts with.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by the prologue, a handler or graph validation. No IR is
    /// produced in that case.
    pub fn build<F>(self, prologue: F) -> Result<MethodIr<S>>
    where
        F: FnOnce(&mut Emitter<'_>) -> Result<Prologue<S>>,
    {
        let Self {
            mut graph,
            registry,
            config,
            return_type,
        } = self;

        let entry = graph.entry();
        let (Prologue { state, pc, code }, keep_going) = {
            let mut b = graph.emitter(entry)?;
            let prologue = prologue(&mut b)?;
            let keep_going = b.slot("keep_going", IrType::Int32)?;
            let one = b.const_i32(1);
            b.store(keep_going, one)?;
            (prologue, keep_going)
        };
        graph.set_entry_state(state)?;

        let header = graph.create_node("loop")?;
        let fetch = graph.create_node("fetch")?;
        let exit = graph.create_node("break")?;
        graph.goto(entry, header)?;

        graph.visit(header)?;
        let running = {
            let mut b = graph.emitter(header)?;
            b.load(keep_going)?
        };
        graph.branch(header, running, fetch, exit)?;

        graph.visit(fetch)?;
        let opcode = {
            let mut b = graph.emitter(fetch)?;
            let at = pc.load(&mut b)?;
            let raw = b.load_at(config.opcode_width.ir_type(), at)?;
            let wide = b.convert_to(IrType::Int64, raw)?;
            if config.opcode_width == ImmediateWidth::W64 {
                wide
            } else {
                let mask = b.const_i64(config.opcode_width.mask());
                b.binary(BinaryOp::And, wide, mask)?
            }
        };

        let mut cases = Vec::with_capacity(registry.len());
        for op in registry.opcodes() {
            let name = registry.name_of(op).unwrap_or("handler");
            let node = graph.create_node(name)?;
            cases.push(SwitchCase::new(op, node));
        }
        let unknown = graph.create_node("unknown_opcode")?;
        graph.switch(fetch, opcode, cases.clone(), unknown)?;

        let mut rt = DispatchRuntime {
            graph,
            pc,
            code,
            keep_going,
            header,
        };

        for case in &cases {
            let Some(handler) = registry.lookup(case.value) else {
                continue;
            };
            debug!(opcode = case.value, handler = handler.name(), node = %case.target, "generating handler");
            let watermark = rt.graph.node_count();
            rt.graph.visit(case.target)?;
            let signal = handler.invoke(&mut rt, case.target)?;
            rt.close_tails(case.target, watermark, signal, handler.name())?;
        }

        let mut graph = rt.graph;
        graph.visit(unknown)?;
        {
            let mut b = graph.emitter(unknown)?;
            b.trap(opcode)?;
            let zero = b.const_i32(0);
            b.store(keep_going, zero)?;
        }
        graph.goto(unknown, exit)?;

        graph.visit(exit)?;
        let result = if return_type == IrType::NoType {
            None
        } else {
            let mut b = graph.emitter(exit)?;
            let value = b.const_i64(config.exit_value);
            Some(b.convert_to(return_type, value)?)
        };
        graph.ret(exit, result)?;

        graph.finish()
    }
}

/// Runtime seen by handlers while an interpreter is generated.
struct DispatchRuntime<S> {
    graph: MethodGraph<S>,
    pc: VmRegister,
    code: SlotId,
    keep_going: SlotId,
    header: NodeId,
}

impl<S: MachineState> DispatchRuntime<S> {
    /// Continues every node a handler left open at the loop header.
    fn close_tails(
        &mut self,
        node: NodeId,
        watermark: usize,
        signal: Signal,
        handler: &str,
    ) -> Result<()> {
        let created = (watermark..self.graph.node_count()).map(NodeId::new);
        for id in std::iter::once(node).chain(created) {
            if !self.graph.is_visited(id) || !self.graph.node(id)?.is_open() {
                continue;
            }
            if signal == Signal::Returned {
                return Err(contract_violation!(
                    "handler '{}' reported a return but left {} open",
                    handler,
                    id
                ));
            }
            self.graph.goto(id, self.header)?;
        }
        Ok(())
    }
}

impl<S: MachineState> Runtime<S> for DispatchRuntime<S> {
    fn frame_kind(&self) -> FrameKind {
        FrameKind::Interpreted
    }

    fn graph(&self) -> &MethodGraph<S> {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut MethodGraph<S> {
        &mut self.graph
    }

    fn current_offset(&self) -> Option<u32> {
        None
    }

    fn fetch_immediate(
        &mut self,
        node: NodeId,
        width: ImmediateWidth,
        delta: i64,
    ) -> Result<ValueId> {
        let mut b = self.graph.emitter(node)?;
        let at = self.pc.load(&mut b)?;
        let delta = b.const_i64(delta);
        let addr = b.index_at(IrType::Int8, at, delta)?;
        b.load_at(width.ir_type(), addr)
    }

    fn default_fallthrough(&mut self, node: NodeId, size: u32) -> Result<()> {
        {
            let mut b = self.graph.emitter(node)?;
            self.pc.adjust(&mut b, i64::from(size))?;
        }
        self.graph.goto(node, self.header)
    }

    fn jump(&mut self, node: NodeId, target: ValueId, absolute: bool) -> Result<()> {
        {
            let mut b = self.graph.emitter(node)?;
            if absolute {
                let start = b.load(self.code)?;
                let target = b.convert_to(IrType::Int64, target)?;
                let moved = b.index_at(IrType::Int8, start, target)?;
                self.pc.store(&mut b, moved)?;
            } else {
                self.pc.adjust_by(&mut b, target)?;
            }
        }
        self.graph.goto(node, self.header)
    }

    fn jump_if_or_fallthrough(
        &mut self,
        node: NodeId,
        condition: ValueId,
        target: ValueId,
        size: u32,
        absolute: bool,
    ) -> Result<()> {
        let taken = self.graph.create_node("taken")?;
        let fallthrough = self.graph.create_node("not_taken")?;
        self.graph.branch(node, condition, taken, fallthrough)?;

        self.graph.visit(taken)?;
        self.jump(taken, target, absolute)?;
        self.graph.visit(fallthrough)?;
        self.default_fallthrough(fallthrough, size)
    }

    fn halt(&mut self, node: NodeId) -> Result<()> {
        {
            let mut b = self.graph.emitter(node)?;
            let zero = b.const_i32(0);
            b.store(self.keep_going, zero)?;
        }
        self.graph.goto(node, self.header)
    }
}
