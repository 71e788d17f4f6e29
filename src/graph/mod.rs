//! Control-flow graph construction.
//!
//! This module owns the builder nodes of a compilation unit and the machinery that wires them
//! together while keeping the simulated machine state consistent across every edge.
//!
//! # Key Components
//!
//! - [`MethodGraph`] - Node arena, edge wiring and merge reconciliation
//! - [`BuilderNode`] - A node under construction with its operations and states
//! - [`OffsetWorklist`] - The exactly-once queue of bytecode offsets
//! - [`GraphConstructor`] - Drives handlers over an instruction stream to compile a method
//!
//! # Node Lifecycle
//!
//! Nodes are allocated on first reference, either explicitly through
//! [`MethodGraph::create_node`] or for a bytecode offset through
//! [`MethodGraph::node_for_offset`]. The first edge into a node establishes its entry state.
//! Visiting the node hands its handler a working copy of that state, and the node is appended
//! to the graph order exactly once. Emitting after the node was terminated is rejected.
//!
//! # Examples
//!
//! ```rust,ignore
//! use jitweave::prelude::*;
//!
//! let mut graph = MethodGraph::new("answer", IrType::Int64, 16, false);
//! graph.set_entry_state(SimulatedStack::new("stack", IrType::Int64))?;
//! let entry = graph.entry();
//! let value = graph.emitter(entry)?.const_i64(42);
//! graph.ret(entry, Some(value))?;
//! let ir = graph.finish()?;
//! ```

mod constructor;
mod method;
mod node;
mod worklist;

pub use constructor::{BuildConfig, GraphConstructor};
pub use method::MethodGraph;
pub use node::{edges_of, BuilderNode, Edge, EdgeKind, NodeFlags, NodeId};
pub use worklist::{OffsetState, OffsetWorklist};
