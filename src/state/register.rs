//! Virtual machine registers.
//!
//! A register lives in a named slot of the compilation unit so that every state copy and every
//! path sees the same location. A register may additionally mirror a field in memory, given as a
//! slot holding a base address plus a byte offset (e.g. the `sp` field of an interpreter frame
//! structure). Commit writes the slot out to that field, reload reads it back.

use crate::{
    ir::{Emitter, IrType, SlotId, ValueId},
    state::{ensure_same_shape, MachineState, StateShape},
    Result,
};

/// Memory location mirrored by a register: `*(base + offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBacking {
    /// Slot holding the base address
    pub base: SlotId,
    /// Byte offset from the base address
    pub offset: i64,
}

/// A named virtual machine register.
///
/// `adjust` moves the register by whole elements of `element_size` bytes, which is how stack
/// and program counter registers advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRegister {
    name: String,
    slot: SlotId,
    ty: IrType,
    element_size: i64,
    backing: Option<RegisterBacking>,
}

impl VmRegister {
    /// Creates a register held only in a named slot.
    ///
    /// # Arguments
    ///
    /// * `b` - Emitter used to intern the slot
    /// * `name` - Slot name, shared by all copies
    /// * `ty` - Register type, usually `Address`
    /// * `element_size` - Byte distance moved by one unit of [`VmRegister::adjust`]
    ///
    /// # Errors
    ///
    /// Returns an error if the slot already exists with a different type.
    pub fn new(b: &mut Emitter<'_>, name: &str, ty: IrType, element_size: usize) -> Result<Self> {
        let slot = b.slot(name, ty)?;
        Ok(Self {
            name: name.to_string(),
            slot,
            ty,
            element_size: element_size as i64,
            backing: None,
        })
    }

    /// Creates a register mirroring `*(base + offset)` and loads its initial value.
    ///
    /// # Errors
    ///
    /// Returns an error if a slot conflicts or the initial load cannot be emitted.
    pub fn backed(
        b: &mut Emitter<'_>,
        name: &str,
        ty: IrType,
        element_size: usize,
        base: SlotId,
        offset: i64,
    ) -> Result<Self> {
        let mut register = Self::new(b, name, ty, element_size)?;
        register.backing = Some(RegisterBacking { base, offset });
        register.reload(b)?;
        Ok(register)
    }

    /// Register name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot holding the register.
    #[must_use]
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Register type.
    #[must_use]
    pub fn ty(&self) -> IrType {
        self.ty
    }

    /// Byte size of one adjustment unit.
    #[must_use]
    pub fn element_size(&self) -> i64 {
        self.element_size
    }

    /// Memory mirror, if any.
    #[must_use]
    pub fn backing(&self) -> Option<RegisterBacking> {
        self.backing
    }

    /// Emits a read of the register.
    ///
    /// # Errors
    ///
    /// Returns an error if the load cannot be emitted.
    pub fn load(&self, b: &mut Emitter<'_>) -> Result<ValueId> {
        b.load(self.slot)
    }

    /// Emits a write of `value` into the register.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not exist.
    pub fn store(&self, b: &mut Emitter<'_>, value: ValueId) -> Result<()> {
        let value = b.convert_to(self.ty, value)?;
        b.store(self.slot, value)
    }

    /// Moves the register by `elements` whole elements.
    ///
    /// # Errors
    ///
    /// Returns an error if an emitted operation is rejected.
    pub fn adjust(&self, b: &mut Emitter<'_>, elements: i64) -> Result<()> {
        if elements == 0 {
            return Ok(());
        }
        let current = self.load(b)?;
        let delta = b.const_i64(elements * self.element_size);
        let moved = b.add(current, delta)?;
        self.store(b, moved)
    }

    /// Moves the register by a run-time number of elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the amount does not exist.
    pub fn adjust_by(&self, b: &mut Emitter<'_>, elements: ValueId) -> Result<()> {
        let current = self.load(b)?;
        let amount = b.convert_to(IrType::Int64, elements)?;
        let size = b.const_i64(self.element_size);
        let delta = b.mul(amount, size)?;
        let moved = b.add(current, delta)?;
        self.store(b, moved)
    }

    fn backing_address(&self, b: &mut Emitter<'_>, backing: RegisterBacking) -> Result<ValueId> {
        let base = b.load(backing.base)?;
        let offset = b.const_i64(backing.offset);
        b.index_at(IrType::Int8, base, offset)
    }
}

impl MachineState for VmRegister {
    fn commit(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        let Some(backing) = self.backing else {
            return Ok(());
        };
        let addr = self.backing_address(b, backing)?;
        let value = self.load(b)?;
        b.store_at(self.ty, addr, value)
    }

    fn reload(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        let Some(backing) = self.backing else {
            return Ok(());
        };
        let addr = self.backing_address(b, backing)?;
        let value = b.load_at(self.ty, addr)?;
        b.store(self.slot, value)
    }

    fn make_copy(&self) -> Self {
        self.clone()
    }

    fn merge_into(&self, target: &Self, b: &mut Emitter<'_>) -> Result<()> {
        // Every copy refers to the same slot, the value is already in place.
        ensure_same_shape(self, target, b)
    }

    fn shape(&self) -> StateShape {
        StateShape::Register {
            name: self.name.clone(),
        }
    }

    fn is_memory_backed(&self) -> bool {
        self.backing.is_some()
    }
}
