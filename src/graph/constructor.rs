//! Compiled-method construction from an instruction stream.
//!
//! [`GraphConstructor`] walks the reachable instructions of one method starting at offset `0`.
//! Each offset pulled from the worklist gets its builder node visited and the handler of its
//! opcode invoked. Handlers name their successors through the [`Runtime`] surface, which
//! creates the node for every target offset on first reference and queues the offset, so every
//! reachable offset is translated exactly once no matter how many edges lead to it.
//!
//! Because the instruction stream is available while building, immediates become IR constants
//! and every branch target is resolved to a node at build time.

use std::sync::Arc;

use tracing::debug;

use crate::{
    graph::{MethodGraph, NodeId, OffsetWorklist},
    ir::{ConstValue, Emitter, FunctionId, IrType, MethodIr, SlotId, ValueId},
    runtime::{read_immediate, read_opcode, FrameKind, HandlerRegistry, ImmediateWidth, Runtime},
    state::MachineState,
    Error, Result,
};

/// Configuration of a compiled-method build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildConfig {
    /// Width of the opcodes in the instruction stream
    pub opcode_width: ImmediateWidth,
    /// Upper bound on the number of builder nodes
    pub max_nodes: usize,
    /// Whether every emitted operation is logged at `trace` level
    pub trace: bool,
    /// Value returned by `halt`
    pub exit_value: i64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            opcode_width: ImmediateWidth::W8,
            max_nodes: 4096,
            trace: false,
            exit_value: -1,
        }
    }
}

impl BuildConfig {
    /// Sets the opcode width.
    #[must_use]
    pub fn opcode_width(mut self, width: ImmediateWidth) -> Self {
        self.opcode_width = width;
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

    /// Sets the value returned by `halt`.
    #[must_use]
    pub fn exit_value(mut self, value: i64) -> Self {
        self.exit_value = value;
        self
    }
}

/// Builds the IR of one method from its instruction stream.
///
/// # Examples
///
/// ```rust,ignore
/// let registry = Arc::new(toy_registry()?);
/// let ctor = GraphConstructor::new("sum", IrType::Int64, &bytecodes, registry, BuildConfig::default());
/// let ir = ctor.build(|_| Ok(SimulatedStack::new("stack", IrType::Int64)))?;
/// ```
#[derive(Debug)]
pub struct GraphConstructor<'a, S> {
    bytecodes: &'a [u8],
    graph: MethodGraph<S>,
    registry: Arc<HandlerRegistry<S>>,
    worklist: OffsetWorklist,
    config: BuildConfig,
    current: Option<u32>,
}

impl<'a, S: MachineState> GraphConstructor<'a, S> {
    /// Creates a constructor for the method `name` over `bytecodes`.
    #[must_use]
    pub fn new(
        name: &str,
        return_type: IrType,
        bytecodes: &'a [u8],
        registry: Arc<HandlerRegistry<S>>,
        config: BuildConfig,
    ) -> Self {
        Self {
            bytecodes,
            graph: MethodGraph::new(name, return_type, config.max_nodes, config.trace),
            registry,
            worklist: OffsetWorklist::new(bytecodes.len()),
            config,
            current: None,
        }
    }

    /// Declares the next parameter of the method.
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

    /// Translates every instruction reachable from offset `0`.
    ///
    /// `prologue` runs in the entry node and returns the machine state the first instruction
    /// starts with.
    ///
    /// # Errors
    ///
    /// Returns the first construction failure or contract violation. In particular an opcode
    /// without handler fails with [`Error::UnknownOpcode`]. No IR is produced in that case.
    pub fn build<F>(mut self, prologue: F) -> Result<MethodIr<S>>
    where
        F: FnOnce(&mut Emitter<'_>) -> Result<S>,
    {
        let entry = self.graph.entry();
        let state = {
            let mut b = self.graph.emitter(entry)?;
            prologue(&mut b)?
        };
        self.graph.set_entry_state(state)?;

        let first = self.target_node(0)?;
        self.graph.goto(entry, first)?;

        let registry = Arc::clone(&self.registry);
        while let Some(offset) = self.worklist.next() {
            let opcode = read_opcode(self.bytecodes, offset, self.config.opcode_width)?;
            let handler = registry
                .lookup(opcode)
                .ok_or(Error::UnknownOpcode { opcode, offset })?;

            let node = self.graph.node_for_offset(offset)?;
            debug!(offset, opcode, handler = handler.name(), node = %node, "translating instruction");

            let watermark = self.graph.node_count();
            self.graph.visit(node)?;
            self.current = Some(offset);
            handler.invoke(&mut self, node)?;
            self.current = None;
            self.ensure_closed(node, watermark, handler.name())?;
        }

        debug!(
            method = self.graph.name(),
            offsets = self.worklist.visited_count(),
            "worklist drained"
        );
        self.graph.finish()
    }

    /// Fails if a handler left any node it populated open.
    fn ensure_closed(&self, node: NodeId, watermark: usize, handler: &str) -> Result<()> {
        let created = (watermark..self.graph.node_count()).map(NodeId::new);
        for id in std::iter::once(node).chain(created) {
            if self.graph.is_visited(id) && self.graph.node(id)?.is_open() {
                return Err(contract_violation!(
                    "handler '{}' left {} open; compiled handlers must transfer control explicitly",
                    handler,
                    id
                ));
            }
        }
        Ok(())
    }

    fn current(&self) -> Result<u32> {
        self.current
            .ok_or_else(|| contract_violation!("no instruction is being translated"))
    }

    /// Node for the instruction at `offset`, queued for translation.
    fn target_node(&mut self, offset: i64) -> Result<NodeId> {
        let len = self.bytecodes.len();
        let target = u32::try_from(offset)
            .ok()
            .filter(|&t| (t as usize) < len)
            .ok_or(Error::OffsetOutOfBounds { offset, len })?;
        self.worklist.queue(target)?;
        self.graph.node_for_offset(target)
    }

    fn resolve(&mut self, target: ValueId, absolute: bool) -> Result<NodeId> {
        let value = self.graph.values().constant_i64(target).ok_or_else(|| {
            contract_violation!("jump target {} is not a constant in a compiled method", target)
        })?;
        let offset = if absolute {
            value
        } else {
            i64::from(self.current()?) + value
        };
        self.target_node(offset)
    }
}

impl<S: MachineState> Runtime<S> for GraphConstructor<'_, S> {
    fn frame_kind(&self) -> FrameKind {
        FrameKind::Compiled
    }

    fn graph(&self) -> &MethodGraph<S> {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut MethodGraph<S> {
        &mut self.graph
    }

    fn current_offset(&self) -> Option<u32> {
        self.current
    }

    fn fetch_immediate(
        &mut self,
        node: NodeId,
        width: ImmediateWidth,
        delta: i64,
    ) -> Result<ValueId> {
        let offset = i64::from(self.current()?) + delta;
        let raw = read_immediate(self.bytecodes, offset, width)?;
        let value = ConstValue::integer(width.ir_type(), raw)
            .ok_or_else(|| contract_violation!("{} is not an integer type", width.ir_type()))?;
        let mut b = self.graph.emitter(node)?;
        Ok(b.constant(value))
    }

    fn default_fallthrough(&mut self, node: NodeId, size: u32) -> Result<()> {
        let next = self.target_node(i64::from(self.current()?) + i64::from(size))?;
        self.graph.goto(node, next)
    }

    fn jump(&mut self, node: NodeId, target: ValueId, absolute: bool) -> Result<()> {
        let target = self.resolve(target, absolute)?;
        self.graph.goto(node, target)
    }

    fn jump_if_or_fallthrough(
        &mut self,
        node: NodeId,
        condition: ValueId,
        target: ValueId,
        size: u32,
        absolute: bool,
    ) -> Result<()> {
        let taken = self.resolve(target, absolute)?;
        let next = self.target_node(i64::from(self.current()?) + i64::from(size))?;
        if taken == next {
            return self.graph.goto(node, next);
        }
        self.graph.branch(node, condition, taken, next)
    }

    fn halt(&mut self, node: NodeId) -> Result<()> {
        let return_type = self.graph.return_type();
        let value = if return_type == IrType::NoType {
            None
        } else {
            let mut b = self.graph.emitter(node)?;
            let value = b.const_i64(self.config.exit_value);
            Some(b.convert_to(return_type, value)?)
        };
        self.graph.ret(node, value)
    }
}
