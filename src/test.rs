//! Shared helpers for unit tests.

use crate::{
    graph::NodeId,
    ir::{Emitter, FunctionTable, Op, SlotTable, ValueTable},
};

/// Detached value, slot and operation tables standing in for one builder node.
pub(crate) struct ScratchNode {
    pub values: ValueTable,
    pub slots: SlotTable,
    pub functions: FunctionTable,
    pub ops: Vec<Op>,
}

impl ScratchNode {
    pub fn new() -> Self {
        Self {
            values: ValueTable::new(),
            slots: SlotTable::new(),
            functions: FunctionTable::new(),
            ops: Vec::new(),
        }
    }

    pub fn emitter(&mut self) -> Emitter<'_> {
        Emitter::new(
            NodeId::new(0),
            &mut self.values,
            &mut self.slots,
            &mut self.functions,
            &mut self.ops,
            false,
        )
    }

    /// Rendered operations, one per line.
    pub fn listing(&self) -> Vec<String> {
        self.ops.iter().map(ToString::to_string).collect()
    }
}
