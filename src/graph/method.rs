//! The node arena of one compilation unit.
//!
//! [`MethodGraph`] owns every builder node of a method together with the value, slot and
//! function tables, and it is the only place where control-flow edges are created. Creating an
//! edge is also where simulated machine states are reconciled:
//!
//! 1. The first predecessor reaching a node establishes the node's entry state as a copy of its
//!    own state, stores its values into the common merge slots and re-binds the copy to loads of
//!    those slots at the head of the successor.
//! 2. Every further predecessor checks that its slot identities match the established entry
//!    state and stores its own values into the same merge slots.
//!
//! Because every incoming edge stores before it transfers control, the loads at the head of a
//! join observe the values of whichever predecessor was taken, including loop back edges that
//! are wired after the loop body was built.
//!
//! Nodes are addressed by [`NodeId`]; nodes for bytecode offsets are created on first
//! reference, so forward branches simply name a node that will be populated later. Validity of
//! every reference is checked once by [`MethodGraph::finish`].

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{
    graph::{BuilderNode, NodeFlags, NodeId},
    ir::{
        Emitter, FunctionId, FunctionTable, IrNode, IrType, MethodIr, SlotId, SlotTable,
        SwitchCase, Terminator, ValueId, ValueTable,
    },
    state::MachineState,
    Error, Result,
};

/// Node arena and edge wiring for one method.
#[derive(Debug)]
pub struct MethodGraph<S> {
    name: String,
    return_type: IrType,
    values: ValueTable,
    slots: SlotTable,
    functions: FunctionTable,
    nodes: Vec<BuilderNode<S>>,
    by_offset: FxHashMap<u32, NodeId>,
    order: Vec<NodeId>,
    entry: NodeId,
    max_nodes: usize,
    trace: bool,
}

impl<S: MachineState> MethodGraph<S> {
    /// Creates a graph holding only the entry node.
    ///
    /// # Arguments
    ///
    /// * `name` - Method name used in diagnostics
    /// * `return_type` - Declared return type
    /// * `max_nodes` - Upper bound on the number of builder nodes
    /// * `trace` - Whether every emitted operation is logged at `trace` level
    #[must_use]
    pub fn new(name: &str, return_type: IrType, max_nodes: usize, trace: bool) -> Self {
        let entry = NodeId::new(0);
        let node = BuilderNode::new(
            entry,
            "entry".to_string(),
            None,
            NodeFlags::ENTRY | NodeFlags::INTERNAL | NodeFlags::APPENDED,
        );

        Self {
            name: name.to_string(),
            return_type,
            values: ValueTable::new(),
            slots: SlotTable::new(),
            functions: FunctionTable::new(),
            nodes: vec![node],
            by_offset: FxHashMap::default(),
            order: vec![entry],
            entry,
            max_nodes: max_nodes.max(1),
            trace,
        }
    }

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

    /// Number of allocated nodes, appended or not.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes in append order.
    #[must_use]
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// All values created so far.
    #[must_use]
    pub fn values(&self) -> &ValueTable {
        &self.values
    }

    /// All named slots.
    #[must_use]
    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Declares the next parameter of the method.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken.
    pub fn define_parameter(&mut self, name: &str, ty: IrType) -> Result<SlotId> {
        self.slots.define_parameter(name, ty)
    }

    /// Declares an external function callable from the method.
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
        self.functions.declare(name, returns, params)
    }

    /// Looks up a node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] for an unknown identifier.
    pub fn node(&self, id: NodeId) -> Result<&BuilderNode<S>> {
        self.nodes.get(id.index()).ok_or(Error::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut BuilderNode<S>> {
        self.nodes.get_mut(id.index()).ok_or(Error::NodeNotFound(id))
    }

    fn allocate(&mut self, name: String, offset: Option<u32>, flags: NodeFlags) -> Result<NodeId> {
        if self.nodes.len() >= self.max_nodes {
            return Err(Error::NodeLimit(self.max_nodes));
        }
        let id = NodeId::new(self.nodes.len());
        debug!(method = %self.name, node = %id, name = %name, "allocated builder node");
        self.nodes.push(BuilderNode::new(id, name, offset, flags));
        Ok(id)
    }

    /// Creates a node that does not correspond to a bytecode offset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeLimit`] if the graph is full.
    pub fn create_node(&mut self, name: &str) -> Result<NodeId> {
        self.allocate(name.to_string(), None, NodeFlags::INTERNAL)
    }

    /// Returns the node for `offset`, creating it on first reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeLimit`] if the graph is full.
    pub fn node_for_offset(&mut self, offset: u32) -> Result<NodeId> {
        if let Some(&id) = self.by_offset.get(&offset) {
            return Ok(id);
        }
        let id = self.allocate(format!("bc{offset}"), Some(offset), NodeFlags::empty())?;
        self.by_offset.insert(offset, id);
        Ok(id)
    }

    /// Returns the node for `offset` if one was created.
    #[must_use]
    pub fn lookup_offset(&self, offset: u32) -> Option<NodeId> {
        self.by_offset.get(&offset).copied()
    }

    /// Hands out an emitter for an open node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist or is already terminated.
    pub fn emitter(&mut self, node: NodeId) -> Result<Emitter<'_>> {
        let trace = self.trace;
        let n = self.nodes.get_mut(node.index()).ok_or(Error::NodeNotFound(node))?;
        if !n.terminator.is_open() {
            return Err(contract_violation!(
                "{} ({}) is terminated, no further operations may be emitted",
                node,
                n.name
            ));
        }
        Ok(Emitter::new(
            node,
            &mut self.values,
            &mut self.slots,
            &mut self.functions,
            &mut n.ops,
            trace,
        ))
    }

    /// Hands out an emitter together with the working state of a visited, open node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist, is terminated or was not visited.
    pub fn parts(&mut self, node: NodeId) -> Result<(Emitter<'_>, &mut S)> {
        let trace = self.trace;
        let n = self.nodes.get_mut(node.index()).ok_or(Error::NodeNotFound(node))?;
        if !n.terminator.is_open() {
            return Err(contract_violation!(
                "{} ({}) is terminated, no further operations may be emitted",
                node,
                n.name
            ));
        }
        let BuilderNode {
            ops, state, name, ..
        } = n;
        let state = state
            .as_mut()
            .ok_or_else(|| contract_violation!("{} ({}) has not been visited", node, name))?;
        let emitter = Emitter::new(
            node,
            &mut self.values,
            &mut self.slots,
            &mut self.functions,
            ops,
            trace,
        );
        Ok((emitter, state))
    }

    /// The working state of a visited node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist or was not visited.
    pub fn state_mut(&mut self, node: NodeId) -> Result<&mut S> {
        let n = self.node_mut(node)?;
        n.state
            .as_mut()
            .ok_or_else(|| contract_violation!("{} has not been visited", node))
    }

    /// Installs the initial state of the entry node and marks it visited.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry node already has a state.
    pub fn set_entry_state(&mut self, state: S) -> Result<()> {
        let entry = self.entry;
        let node = self.node_mut(entry)?;
        if node.entry_state.is_some() {
            return Err(contract_violation!("entry state installed twice"));
        }
        node.entry_state = Some(state.make_copy());
        node.state = Some(state);
        node.flags |= NodeFlags::VISITED;
        Ok(())
    }

    /// Starts populating `node`: its working state becomes a copy of the established entry
    /// state and the node is appended to the graph order.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if the node was visited before or no predecessor
    /// established its entry state.
    pub fn visit(&mut self, node: NodeId) -> Result<()> {
        let n = self.node_mut(node)?;
        if n.flags.contains(NodeFlags::VISITED) {
            return Err(contract_violation!("{} ({}) visited twice", node, n.name));
        }
        let working = n
            .entry_state
            .as_ref()
            .map(MachineState::make_copy)
            .ok_or_else(|| contract_violation!("{} reached without an established state", node))?;
        n.state = Some(working);
        n.flags |= NodeFlags::VISITED;
        self.append(node)
    }

    /// Returns `true` once `node` was visited.
    #[must_use]
    pub fn is_visited(&self, node: NodeId) -> bool {
        self.nodes
            .get(node.index())
            .is_some_and(|n| n.flags.contains(NodeFlags::VISITED))
    }

    /// Appends `node` to the graph order. Appending twice has no effect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeNotFound`] for an unknown identifier.
    pub fn append(&mut self, node: NodeId) -> Result<()> {
        let n = self.node_mut(node)?;
        if n.flags.contains(NodeFlags::APPENDED) {
            return Ok(());
        }
        n.flags |= NodeFlags::APPENDED;
        self.order.push(node);
        Ok(())
    }

    /// Ends `node` with an unconditional transfer to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not open or the states cannot be merged.
    pub fn goto(&mut self, node: NodeId, target: NodeId) -> Result<()> {
        self.terminate(node, Terminator::Goto(target))
    }

    /// Ends `node` with a branch to `taken` if `condition` is non-zero, else to `fallthrough`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not open or the states cannot be merged.
    pub fn branch(
        &mut self,
        node: NodeId,
        condition: ValueId,
        taken: NodeId,
        fallthrough: NodeId,
    ) -> Result<()> {
        self.check_value(condition)?;
        self.terminate(
            node,
            Terminator::IfNotZero {
                condition,
                taken,
                fallthrough,
            },
        )
    }

    /// Ends `node` with a multi-way branch over `selector`.
    ///
    /// # Errors
    ///
    /// Returns an error if a case value repeats, the node is not open or the states cannot be
    /// merged.
    pub fn switch(
        &mut self,
        node: NodeId,
        selector: ValueId,
        cases: Vec<SwitchCase>,
        default: NodeId,
    ) -> Result<()> {
        self.check_value(selector)?;
        for (i, case) in cases.iter().enumerate() {
            if cases[..i].iter().any(|c| c.value == case.value) {
                return Err(contract_violation!(
                    "switch in {} lists case {} twice",
                    node,
                    case.value
                ));
            }
        }
        self.terminate(
            node,
            Terminator::Switch {
                selector,
                cases,
                default,
            },
        )
    }

    /// Ends `node` by leaving the method.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not open or the value does not exist.
    pub fn ret(&mut self, node: NodeId, value: Option<ValueId>) -> Result<()> {
        if let Some(value) = value {
            self.check_value(value)?;
        }
        self.terminate(node, Terminator::Return(value))
    }

    fn check_value(&self, value: ValueId) -> Result<()> {
        if self.values.get(value).is_none() {
            return Err(contract_violation!("value {} does not exist", value));
        }
        Ok(())
    }

    fn terminate(&mut self, node: NodeId, terminator: Terminator) -> Result<()> {
        let n = self.node(node)?;
        if !n.is_open() {
            return Err(contract_violation!(
                "{} ({}) is already terminated by '{}'",
                node,
                n.name,
                n.terminator
            ));
        }

        let mut linked: Vec<NodeId> = Vec::new();
        for target in terminator.successors() {
            if !linked.contains(&target) {
                self.link(node, target)?;
                linked.push(target);
            }
        }

        self.node_mut(node)?.terminator = terminator;
        Ok(())
    }

    fn link(&mut self, pred: NodeId, succ: NodeId) -> Result<()> {
        if self.node(succ)?.flags.contains(NodeFlags::ENTRY) {
            return Err(contract_violation!(
                "{} branches to the entry node, which cannot be a branch target",
                pred
            ));
        }
        let pred_state = self
            .node_mut(pred)?
            .state
            .take()
            .ok_or_else(|| contract_violation!("{} branches to {} before being visited", pred, succ))?;

        let result = self.reconcile(pred, &pred_state, succ);
        self.nodes[pred.index()].state = Some(pred_state);
        result?;

        self.nodes[succ.index()].predecessors.push(pred);
        Ok(())
    }

    fn reconcile(&mut self, pred: NodeId, pred_state: &S, succ: NodeId) -> Result<()> {
        match self.nodes[succ.index()].entry_state.take() {
            Some(target) => {
                let result = self.merge_existing(pred, pred_state, succ, &target);
                self.nodes[succ.index()].entry_state = Some(target);
                result
            }
            None => {
                let entry = self.establish(pred, pred_state, succ)?;
                self.nodes[succ.index()].entry_state = Some(entry);
                Ok(())
            }
        }
    }

    fn merge_existing(&mut self, pred: NodeId, pred_state: &S, succ: NodeId, target: &S) -> Result<()> {
        let (current, expected) = (pred_state.shape(), target.shape());
        if current != expected {
            return Err(Error::ShapeMismatch {
                node: succ,
                current: current.to_string(),
                target: expected.to_string(),
            });
        }
        let mut b = self.emitter(pred)?;
        pred_state.merge_into(target, &mut b)
    }

    fn establish(&mut self, pred: NodeId, pred_state: &S, succ: NodeId) -> Result<S> {
        let target = &self.nodes[succ.index()];
        if !target.ops.is_empty() {
            return Err(contract_violation!(
                "{} ({}) received operations before its entry state was established",
                succ,
                target.name
            ));
        }

        let mut entry = pred_state.make_copy();
        {
            let mut b = self.emitter(pred)?;
            pred_state.merge_into(&entry, &mut b)?;
        }
        let mut b = self.emitter(succ)?;
        entry.bind_entry(&mut b)?;
        Ok(entry)
    }

    /// Validates the graph and converts it into the finished IR.
    ///
    /// Switch cases marked as falling through whose target was left open are first closed
    /// with a transfer to the next case. Afterwards every appended node must be terminated and
    /// every edge must lead to an appended node.
    ///
    /// # Errors
    ///
    /// Returns a contract violation naming the first open node or dangling edge.
    pub fn finish(mut self) -> Result<MethodIr<S>> {
        self.close_fallthrough_cases()?;

        for &id in &self.order {
            let node = &self.nodes[id.index()];
            if node.is_open() {
                return Err(contract_violation!(
                    "{} ({}) was never terminated",
                    id,
                    node.name
                ));
            }
            for target in node.terminator.successors() {
                let built = self
                    .nodes
                    .get(target.index())
                    .ok_or(Error::NodeNotFound(target))?
                    .flags
                    .contains(NodeFlags::APPENDED);
                if !built {
                    return Err(contract_violation!(
                        "{} branches to {} which was never built",
                        id,
                        target
                    ));
                }
            }
        }

        debug!(
            method = %self.name,
            nodes = self.order.len(),
            values = self.values.len(),
            "finished method graph"
        );

        let nodes = self
            .nodes
            .into_iter()
            .map(|n| IrNode {
                id: n.id,
                name: n.name,
                offset: n.offset,
                ops: n.ops,
                terminator: n.terminator,
                predecessors: n.predecessors,
                state: n.entry_state,
            })
            .collect();

        Ok(MethodIr {
            name: self.name,
            return_type: self.return_type,
            values: self.values,
            slots: self.slots,
            functions: self.functions,
            nodes,
            order: self.order,
            entry: self.entry,
        })
    }

    fn close_fallthrough_cases(&mut self) -> Result<()> {
        let mut pending = Vec::new();
        for node in &self.nodes {
            if let Terminator::Switch { cases, default, .. } = &node.terminator {
                for (i, case) in cases.iter().enumerate() {
                    if case.falls_through {
                        let next = cases.get(i + 1).map_or(*default, |c| c.target);
                        pending.push((case.target, next));
                    }
                }
            }
        }
        for (target, next) in pending {
            let n = self.node(target)?;
            if n.is_open() && n.flags.contains(NodeFlags::VISITED) {
                self.goto(target, next)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{SimulatedStack, VmStack};

    fn graph() -> MethodGraph<SimulatedStack> {
        let mut graph = MethodGraph::new("test", IrType::Int64, 64, false);
        graph
            .set_entry_state(SimulatedStack::new("stack", IrType::Int64))
            .unwrap();
        graph
    }

    #[test]
    fn test_first_edge_establishes_entry_state() {
        let mut graph = graph();
        let entry = graph.entry();
        let next = graph.node_for_offset(0).unwrap();
        {
            let (mut b, stack) = graph.parts(entry).unwrap();
            let v = b.const_i64(5);
            stack.push(&mut b, v).unwrap();
        }
        graph.goto(entry, next).unwrap();

        let node = graph.node(next).unwrap();
        assert_eq!(node.predecessors(), &[entry]);
        assert_eq!(node.entry_state().and_then(VmStack::depth), Some(1));
        assert_eq!(node.ops().len(), 1);
    }

    #[test]
    fn test_join_rejects_shape_mismatch() {
        let mut graph = graph();
        let entry = graph.entry();
        let left = graph.create_node("left").unwrap();
        let right = graph.create_node("right").unwrap();
        let join = graph.create_node("join").unwrap();

        let cond = {
            let mut b = graph.emitter(entry).unwrap();
            let slot = b.slot("c", IrType::Int32).unwrap();
            b.load(slot).unwrap()
        };
        graph.branch(entry, cond, left, right).unwrap();
        graph.visit(left).unwrap();
        graph.visit(right).unwrap();
        {
            let (mut b, stack) = graph.parts(left).unwrap();
            let v = b.const_i64(1);
            stack.push(&mut b, v).unwrap();
        }
        graph.goto(left, join).unwrap();
        let err = graph.goto(right, join).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { node, .. } if node == join));
    }

    #[test]
    fn test_offset_nodes_are_unique() {
        let mut graph = graph();
        let a = graph.node_for_offset(4).unwrap();
        let b = graph.node_for_offset(4).unwrap();
        assert_eq!(a, b);
        assert_eq!(graph.lookup_offset(4), Some(a));
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_node_limit() {
        let mut graph: MethodGraph<SimulatedStack> = MethodGraph::new("tiny", IrType::NoType, 2, false);
        graph.create_node("one").unwrap();
        assert!(matches!(graph.create_node("two"), Err(Error::NodeLimit(2))));
    }

    #[test]
    fn test_finish_rejects_open_and_dangling() {
        let graph = graph();
        assert!(graph.finish().is_err());

        let mut graph = self::graph();
        let entry = graph.entry();
        let orphan = graph.create_node("never_built").unwrap();
        graph.goto(entry, orphan).unwrap();
        assert!(graph.finish().is_err());
    }

    #[test]
    fn test_emission_after_terminator_rejected() {
        let mut graph = graph();
        let entry = graph.entry();
        graph.ret(entry, None).unwrap();
        assert!(graph.emitter(entry).is_err());
        assert!(graph.ret(entry, None).is_err());
        let ir = graph.finish().unwrap();
        assert_eq!(ir.node_count(), 1);
    }
}
