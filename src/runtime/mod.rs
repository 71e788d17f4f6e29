//! The surface handlers program against.
//!
//! An opcode handler is written once and used by two very different builders:
//!
//! - [`crate::graph::GraphConstructor`] compiles one method. The instruction stream is known
//!   at build time, immediates become constants and every branch target becomes a builder node.
//! - [`DispatchLoopBuilder`] generates the interpreter. The instruction stream is only known at
//!   run time, immediates are loaded through the program counter register and control transfers
//!   update that register before returning to the dispatch loop.
//!
//! Both implement [`Runtime`], and handlers only ever see `&mut dyn Runtime<S>` plus the node
//! they populate. The node is always passed explicitly; a handler that opens nested control flow
//! (see [`if_then_else`]) continues in the node that helper returns.
//!
//! # Handler Contract
//!
//! A handler emits the operations for one instruction into the node it is given and then
//! decides how control continues:
//!
//! - [`Runtime::default_fallthrough`] continues with the next instruction
//! - [`Runtime::jump`] and [`Runtime::jump_if_or_fallthrough`] transfer control
//! - [`Runtime::exit`] returns from the method
//! - [`Runtime::halt`] stops execution with the configured exit value
//!
//! The returned [`Signal`] reports whether the handler left the method. In the interpreter an
//! open node left behind by a handler returning [`Signal::Continue`] is continued at the loop
//! header, which tests the loop condition again; in a compiled method every node must be
//! closed explicitly.

mod calls;
mod dispatch;
mod registry;
mod stream;

pub use calls::{emit_call, CallSite, Transition};
pub use dispatch::{DispatchConfig, DispatchLoopBuilder, Prologue};
pub use registry::{Handler, HandlerFn, HandlerRegistry};
pub use stream::{read_immediate, read_opcode, ImmediateWidth};

use strum::{Display, EnumIter};

use crate::{
    graph::{MethodGraph, NodeId},
    ir::ValueId,
    state::MachineState,
    Result,
};

/// Outcome reported by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Execution continues after the instruction
    Continue,
    /// The handler emitted a return; no fallthrough is added
    Returned,
}

/// Kind of frame executing a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum FrameKind {
    /// Executed by the generated interpreter; state lives in memory
    Interpreted,
    /// Executed as compiled code; state may live in IR values
    Compiled,
}

/// Build-time environment a handler runs in.
pub trait Runtime<S: MachineState> {
    /// Whether the code being built runs as an interpreter or as a compiled method.
    fn frame_kind(&self) -> FrameKind;

    /// The graph under construction.
    fn graph(&self) -> &MethodGraph<S>;

    /// The graph under construction.
    fn graph_mut(&mut self) -> &mut MethodGraph<S>;

    /// Offset of the instruction being translated, known only when compiling a method.
    fn current_offset(&self) -> Option<u32>;

    /// Reads the immediate of `width` located `delta` bytes after the current opcode.
    ///
    /// # Errors
    ///
    /// Returns an error if the immediate lies outside the stream or cannot be emitted.
    fn fetch_immediate(&mut self, node: NodeId, width: ImmediateWidth, delta: i64)
        -> Result<ValueId>;

    /// Continues with the instruction `size` bytes after the current one.
    ///
    /// # Errors
    ///
    /// Returns an error if the next instruction lies outside the stream.
    fn default_fallthrough(&mut self, node: NodeId, size: u32) -> Result<()>;

    /// Transfers control to `target`, an offset from the start of the stream when `absolute`
    /// and from the current instruction otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is invalid. A compiled method requires a constant target.
    fn jump(&mut self, node: NodeId, target: ValueId, absolute: bool) -> Result<()>;

    /// Transfers control to `target` if `condition` is non-zero, else continues with the
    /// instruction `size` bytes after the current one.
    ///
    /// # Errors
    ///
    /// Returns an error if either destination is invalid.
    fn jump_if_or_fallthrough(
        &mut self,
        node: NodeId,
        condition: ValueId,
        target: ValueId,
        size: u32,
        absolute: bool,
    ) -> Result<()>;

    /// Returns `value` from the method.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is already terminated.
    fn exit(&mut self, node: NodeId, value: Option<ValueId>) -> Result<()> {
        self.graph_mut().ret(node, value)
    }

    /// Stops execution, returning the configured exit value.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is already terminated.
    fn halt(&mut self, node: NodeId) -> Result<()>;
}

/// Builds a two-armed conditional starting in `node`.
///
/// `then_arm` runs in a fresh node taken when `condition` is non-zero, `else_arm` (if any) in
/// a node taken otherwise. Arms left open continue in a common merge node, which is returned
/// already visited. `None` means neither arm reaches the merge node.
///
/// # Errors
///
/// Returns an error if an arm fails or the states of the arms cannot be merged.
pub fn if_then_else<S: MachineState>(
    rt: &mut dyn Runtime<S>,
    node: NodeId,
    condition: ValueId,
    then_arm: &mut dyn FnMut(&mut dyn Runtime<S>, NodeId) -> Result<()>,
    else_arm: Option<&mut dyn FnMut(&mut dyn Runtime<S>, NodeId) -> Result<()>>,
) -> Result<Option<NodeId>> {
    let graph = rt.graph_mut();
    let then_node = graph.create_node("then")?;
    let merge = graph.create_node("merge")?;
    let else_node = match else_arm {
        Some(_) => graph.create_node("else")?,
        None => merge,
    };
    graph.branch(node, condition, then_node, else_node)?;

    graph.visit(then_node)?;
    then_arm(&mut *rt, then_node)?;
    if rt.graph().node(then_node)?.is_open() {
        rt.graph_mut().goto(then_node, merge)?;
    }

    if let Some(else_arm) = else_arm {
        rt.graph_mut().visit(else_node)?;
        else_arm(&mut *rt, else_node)?;
        if rt.graph().node(else_node)?.is_open() {
            rt.graph_mut().goto(else_node, merge)?;
        }
    }

    if rt.graph().node(merge)?.predecessors().is_empty() {
        return Ok(None);
    }
    rt.graph_mut().visit(merge)?;
    Ok(Some(merge))
}
