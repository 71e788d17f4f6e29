//! Builder nodes and their identifiers.
//!
//! A builder node is one basic-block-like unit of the graph under construction. It owns its
//! operations, its terminator and, once reached, the simulated machine state valid at its entry
//! together with the working copy handlers mutate while emitting.

use std::fmt;

use bitflags::bitflags;

use crate::ir::{Op, Terminator, ValueId};

/// Index of a builder node in the node arena.
///
/// Node identifiers are stable for the lifetime of a compilation unit; forward references to
/// nodes that are not populated yet are plain identifiers.
///
/// # Examples
///
/// ```rust
/// use jitweave::graph::NodeId;
///
/// let node = NodeId::new(4);
/// assert_eq!(node.index(), 4);
/// assert_eq!(node.to_string(), "n4");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a node identifier from an arena index.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the arena index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(node: NodeId) -> Self {
        node.0
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Lifecycle and role flags of a builder node
    pub struct NodeFlags: u8 {
        /// Method entry node
        const ENTRY = 0x01;
        /// Node not tied to a bytecode offset (dispatch scaffolding, if/then/else arms)
        const INTERNAL = 0x02;
        /// The node's operations have been produced
        const VISITED = 0x04;
        /// The node has been appended to the graph order
        const APPENDED = 0x08;
    }
}

/// The kind of a control-flow edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Unconditional transfer or the not-taken side of a conditional
    Fallthrough,
    /// Taken side of a conditional branch
    Taken,
    /// Switch case with the matched selector value
    Case(i64),
    /// Default target of a switch
    Default,
}

/// An outgoing edge of a builder node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Target node
    pub target: NodeId,
    /// How control reaches the target
    pub kind: EdgeKind,
}

/// Edges leaving a node with the given terminator, in terminator order.
#[must_use]
pub fn edges_of(terminator: &Terminator) -> Vec<Edge> {
    match terminator {
        Terminator::Open | Terminator::Return(_) => vec![],
        Terminator::Goto(target) => vec![Edge {
            target: *target,
            kind: EdgeKind::Fallthrough,
        }],
        Terminator::IfNotZero {
            taken, fallthrough, ..
        } => vec![
            Edge {
                target: *taken,
                kind: EdgeKind::Taken,
            },
            Edge {
                target: *fallthrough,
                kind: EdgeKind::Fallthrough,
            },
        ],
        Terminator::Switch { cases, default, .. } => cases
            .iter()
            .map(|case| Edge {
                target: case.target,
                kind: EdgeKind::Case(case.value),
            })
            .chain(std::iter::once(Edge {
                target: *default,
                kind: EdgeKind::Default,
            }))
            .collect(),
    }
}

/// A node of the graph under construction.
#[derive(Debug)]
pub struct BuilderNode<S> {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) offset: Option<u32>,
    pub(crate) ops: Vec<Op>,
    pub(crate) terminator: Terminator,
    pub(crate) predecessors: Vec<NodeId>,
    pub(crate) entry_state: Option<S>,
    pub(crate) state: Option<S>,
    pub(crate) flags: NodeFlags,
}

impl<S> BuilderNode<S> {
    pub(crate) fn new(id: NodeId, name: String, offset: Option<u32>, flags: NodeFlags) -> Self {
        Self {
            id,
            name,
            offset,
            ops: Vec::new(),
            terminator: Terminator::Open,
            predecessors: Vec::new(),
            entry_state: None,
            state: None,
            flags,
        }
    }

    /// Node identifier.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytecode offset the node was created for.
    #[must_use]
    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    /// Operations emitted so far.
    #[must_use]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// The node's terminator, [`Terminator::Open`] while still being built.
    #[must_use]
    pub fn terminator(&self) -> &Terminator {
        &self.terminator
    }

    /// Nodes that branch here, one entry per linked edge.
    #[must_use]
    pub fn predecessors(&self) -> &[NodeId] {
        &self.predecessors
    }

    /// Outgoing edges.
    #[must_use]
    pub fn edges(&self) -> Vec<Edge> {
        edges_of(&self.terminator)
    }

    /// The state valid at node entry, once established by a predecessor.
    #[must_use]
    pub fn entry_state(&self) -> Option<&S> {
        self.entry_state.as_ref()
    }

    /// The working state handlers mutate, present once the node is visited.
    #[must_use]
    pub fn state(&self) -> Option<&S> {
        self.state.as_ref()
    }

    /// Lifecycle flags.
    #[must_use]
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// Returns `true` while operations may still be appended.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.terminator.is_open()
    }

    /// Values read by the node's operations and terminator.
    #[must_use]
    pub fn uses(&self) -> Vec<ValueId> {
        let mut uses: Vec<ValueId> = self.ops.iter().flat_map(Op::uses).collect();
        uses.extend(self.terminator.uses());
        uses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::SwitchCase;

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId::new(7).to_string(), "n7");
        assert_eq!(format!("{:?}", NodeId::new(7)), "NodeId(7)");
        assert_eq!(usize::from(NodeId::new(3)), 3);
    }

    #[test]
    fn test_edges_of_switch() {
        let term = Terminator::Switch {
            selector: ValueId::new(0),
            cases: vec![SwitchCase::new(5, NodeId::new(1))],
            default: NodeId::new(2),
        };
        let edges = edges_of(&term);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].kind, EdgeKind::Case(5));
        assert_eq!(edges[1].kind, EdgeKind::Default);
    }

    #[test]
    fn test_new_node_is_open() {
        let node: BuilderNode<()> =
            BuilderNode::new(NodeId::new(0), "entry".into(), None, NodeFlags::ENTRY);
        assert!(node.is_open());
        assert!(node.flags().contains(NodeFlags::ENTRY));
        assert!(node.edges().is_empty());
    }
}
