//! The finished IR of one method.
//!
//! [`MethodIr`] is what graph construction hands to a code generator: the nodes in the order
//! they were appended, each with its operations, terminator, predecessors and the simulated
//! machine state valid at its entry, plus the value, slot and function tables those refer to.
//! Nothing in it points back into the builder.

use std::fmt::Write;

use crate::{
    graph::{edges_of, Edge, EdgeKind, NodeId},
    ir::{FunctionTable, IrType, Op, SlotTable, Terminator, ValueTable},
};

/// A finished node.
#[derive(Debug)]
pub struct IrNode<S> {
    /// Node identifier
    pub id: NodeId,
    /// Diagnostic name
    pub name: String,
    /// Bytecode offset the node was created for
    pub offset: Option<u32>,
    /// Straight-line operations
    pub ops: Vec<Op>,
    /// Control transfer ending the node
    pub terminator: Terminator,
    /// Predecessor nodes, one entry per incoming edge
    pub predecessors: Vec<NodeId>,
    /// Simulated machine state at node entry after all merges
    pub state: Option<S>,
}

impl<S> IrNode<S> {
    /// Outgoing edges.
    #[must_use]
    pub fn edges(&self) -> Vec<Edge> {
        edges_of(&self.terminator)
    }
}

/// IR of one compiled method or interpreter function.
#[derive(Debug)]
pub struct MethodIr<S> {
    pub(crate) name: String,
    pub(crate) return_type: IrType,
    pub(crate) values: ValueTable,
    pub(crate) slots: SlotTable,
    pub(crate) functions: FunctionTable,
    pub(crate) nodes: Vec<IrNode<S>>,
    pub(crate) order: Vec<NodeId>,
    pub(crate) entry: NodeId,
}

impl<S> MethodIr<S> {
    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared return type.
    #[must_use]
    pub fn return_type(&self) -> IrType {
        self.return_type
    }

    /// The entry node.
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Node identifiers in append order.
    #[must_use]
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&IrNode<S>> {
        self.nodes.get(id.index())
    }

    /// Iterates over the nodes in append order.
    pub fn nodes(&self) -> impl Iterator<Item = &IrNode<S>> {
        self.order.iter().filter_map(|id| self.nodes.get(id.index()))
    }

    /// Finds the node created for a bytecode offset.
    #[must_use]
    pub fn node_at_offset(&self, offset: u32) -> Option<&IrNode<S>> {
        self.nodes().find(|n| n.offset == Some(offset))
    }

    /// All values.
    #[must_use]
    pub fn values(&self) -> &ValueTable {
        &self.values
    }

    /// All named slots.
    #[must_use]
    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// All declared functions.
    #[must_use]
    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Renders the graph in Graphviz DOT format.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut dot = String::new();

        dot.push_str("digraph IR {\n");
        let _ = writeln!(dot, "    label=\"{}\";", escape_label(&self.name));
        dot.push_str("    labelloc=t;\n");
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n\n");

        for node in self.nodes() {
            let mut label = format!("{} {}", node.id, escape_label(&node.name));
            if let Some(offset) = node.offset {
                let _ = write!(label, " @{offset}");
            }
            label.push_str("\\l");
            for op in &node.ops {
                let _ = write!(label, "{}\\l", escape_label(&op.to_string()));
            }
            let _ = write!(label, "{}\\l", escape_label(&node.terminator.to_string()));

            let style = if node.id == self.entry {
                ", style=filled, fillcolor=lightgreen"
            } else {
                ""
            };
            let _ = writeln!(dot, "    {} [label=\"{label}\"{style}];", node.id);
        }

        dot.push('\n');
        for node in self.nodes() {
            for edge in node.edges() {
                let label = match edge.kind {
                    EdgeKind::Fallthrough => String::new(),
                    EdgeKind::Taken => "T".to_string(),
                    EdgeKind::Case(value) => value.to_string(),
                    EdgeKind::Default => "default".to_string(),
                };
                let _ = writeln!(dot, "    {} -> {} [label=\"{label}\"];", node.id, edge.target);
            }
        }

        dot.push_str("}\n");
        dot
    }
}

fn escape_label(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' | '\\' | '<' | '>' | '{' | '}' | '|' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            _ => escaped.push(c),
        }
    }
    escaped
}
