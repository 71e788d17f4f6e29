//! Indexed operand arrays (local variables).
//!
//! Both array variants accept a run-time index value. The `*_const` methods of [`VmArray`]
//! materialize a constant index and forward to the value-indexed form, so a variant only has to
//! recognise constant indices if it can do better with them.

use crate::{
    ir::{Emitter, IrType, ValueId},
    state::{ensure_same_shape, MachineState, StateShape, VmRegister},
    Result,
};

/// Capability shared by all operand array variants.
pub trait VmArray {
    /// Reads the cell at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range or cannot be handled by the variant.
    fn get(&mut self, b: &mut Emitter<'_>, index: ValueId) -> Result<ValueId>;

    /// Writes `value` into the cell at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range or cannot be handled by the variant.
    fn set(&mut self, b: &mut Emitter<'_>, index: ValueId, value: ValueId) -> Result<()>;

    /// Copies the cell at `src` into the cell at `dst`.
    ///
    /// # Errors
    ///
    /// Returns an error if either index is invalid.
    fn move_value(&mut self, b: &mut Emitter<'_>, dst: ValueId, src: ValueId) -> Result<()> {
        let value = self.get(b, src)?;
        self.set(b, dst, value)
    }

    /// [`VmArray::get`] with a constant index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is invalid.
    fn get_const(&mut self, b: &mut Emitter<'_>, index: i32) -> Result<ValueId> {
        let index = b.const_i32(index);
        self.get(b, index)
    }

    /// [`VmArray::set`] with a constant index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is invalid.
    fn set_const(&mut self, b: &mut Emitter<'_>, index: i32, value: ValueId) -> Result<()> {
        let index = b.const_i32(index);
        self.set(b, index, value)
    }

    /// [`VmArray::move_value`] with constant indices.
    ///
    /// # Errors
    ///
    /// Returns an error if either index is invalid.
    fn move_const(&mut self, b: &mut Emitter<'_>, dst: i32, src: i32) -> Result<()> {
        let dst = b.const_i32(dst);
        let src = b.const_i32(src);
        self.move_value(b, dst, src)
    }
}

/// Array living in memory at the address held by a base register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandArray {
    base: VmRegister,
    element: IrType,
}

impl OperandArray {
    /// Creates an array of `element` cells starting at the address in `base`.
    #[must_use]
    pub fn new(base: VmRegister, element: IrType) -> Self {
        Self { base, element }
    }

    /// The base register.
    #[must_use]
    pub fn base(&self) -> &VmRegister {
        &self.base
    }

    fn address(&self, b: &mut Emitter<'_>, index: ValueId) -> Result<ValueId> {
        let base = self.base.load(b)?;
        b.index_at(self.element, base, index)
    }
}

impl VmArray for OperandArray {
    fn get(&mut self, b: &mut Emitter<'_>, index: ValueId) -> Result<ValueId> {
        let addr = self.address(b, index)?;
        b.load_at(self.element, addr)
    }

    fn set(&mut self, b: &mut Emitter<'_>, index: ValueId, value: ValueId) -> Result<()> {
        let addr = self.address(b, index)?;
        b.store_at(self.element, addr, value)
    }
}

impl MachineState for OperandArray {
    fn commit(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        self.base.commit(b)
    }

    fn reload(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        self.base.reload(b)
    }

    fn make_copy(&self) -> Self {
        self.clone()
    }

    fn merge_into(&self, target: &Self, b: &mut Emitter<'_>) -> Result<()> {
        ensure_same_shape(self, target, b)
    }

    fn shape(&self) -> StateShape {
        StateShape::Array {
            name: self.base.name().to_string(),
            element: self.element,
            len: None,
        }
    }

    fn is_memory_backed(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::Op, test::ScratchNode};

    #[test]
    fn test_move_reads_then_writes() {
        let mut scratch = ScratchNode::new();
        let mut b = scratch.emitter();
        let base = VmRegister::new(&mut b, "locals", IrType::Address, 8).unwrap();
        let mut locals = OperandArray::new(base, IrType::Int64);
        locals.move_const(&mut b, 1, 0).unwrap();
        drop(b);

        let load = scratch
            .ops
            .iter()
            .position(|op| matches!(op, Op::LoadAt { .. }));
        let store = scratch
            .ops
            .iter()
            .position(|op| matches!(op, Op::StoreAt { .. }));
        assert!(load.unwrap() < store.unwrap());
    }

    #[test]
    fn test_runtime_index() {
        let mut scratch = ScratchNode::new();
        let mut b = scratch.emitter();
        let base = VmRegister::new(&mut b, "locals", IrType::Address, 8).unwrap();
        let which = b.slot("which", IrType::Int32).unwrap();
        let mut locals = OperandArray::new(base, IrType::Int64);
        let index = b.load(which).unwrap();
        let value = locals.get(&mut b, index).unwrap();
        assert_eq!(b.type_of(value), IrType::Int64);
        drop(b);
        assert!(scratch
            .ops
            .iter()
            .any(|op| matches!(op, Op::IndexAt { elem: IrType::Int64, .. })));
    }
}
