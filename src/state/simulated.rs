//! Symbolic operand stacks and arrays.
//!
//! The symbolic variants keep the value of every cell as an IR value handle at build time, so
//! pushing, popping and reading constant-indexed locals emits no operations at all. This is what
//! a compiled method uses: the interpreter's memory stack disappears and values flow directly
//! between operations.
//!
//! Cells only exist in memory when explicitly committed, e.g. before calling code that expects
//! the interpreter's memory layout. A symbolic state can be given a backing for that purpose: a
//! stack mirrors its cells at increasing addresses from the stack base and keeps a top register
//! up to date, an array mirrors its cells at the address held by a base register.
//!
//! At join points the cells are reconciled through merge slots named `<name>_<index>`.

use crate::{
    ir::{Emitter, IrType, SlotId, ValueId},
    state::{
        ensure_same_shape, merge_slot_name, MachineState, StateShape, VmArray, VmRegister, VmStack,
    },
    Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct StackBacking {
    top: VmRegister,
    base: SlotId,
}

/// Operand stack tracked symbolically at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedStack {
    name: String,
    element: IrType,
    cells: Vec<ValueId>,
    backing: Option<StackBacking>,
}

impl SimulatedStack {
    /// Creates an empty stack without memory backing.
    #[must_use]
    pub fn new(name: &str, element: IrType) -> Self {
        Self {
            name: name.to_string(),
            element,
            cells: Vec::new(),
            backing: None,
        }
    }

    /// Creates an empty stack mirrored to memory starting at the current value of `top`.
    ///
    /// The base address is captured into the slot `<name>_base` so that commits and reloads
    /// can address cells by depth. The stack grows towards higher addresses in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if `top` does not move by whole elements or a slot conflicts.
    pub fn backed(b: &mut Emitter<'_>, name: &str, element: IrType, top: VmRegister) -> Result<Self> {
        if top.element_size() != element.size() as i64 {
            return Err(contract_violation!(
                "register '{}' moves by {} bytes, stack elements are {}",
                top.name(),
                top.element_size(),
                element
            ));
        }
        let base = b.slot(&format!("{name}_base"), IrType::Address)?;
        let current = top.load(b)?;
        b.store(base, current)?;
        Ok(Self {
            name: name.to_string(),
            element,
            cells: Vec::new(),
            backing: Some(StackBacking { top, base }),
        })
    }

    /// Stack name, prefix of its merge slots.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The values currently on the stack, bottom first.
    #[must_use]
    pub fn cells(&self) -> &[ValueId] {
        &self.cells
    }

    fn underflow(&self, wanted: usize) -> crate::Error {
        contract_violation!(
            "stack '{}' holds {} elements, {} required",
            self.name,
            self.cells.len(),
            wanted
        )
    }

    fn cell_address(&self, b: &mut Emitter<'_>, base: SlotId, index: usize) -> Result<ValueId> {
        let base = b.load(base)?;
        let index = b.const_i64(index as i64);
        b.index_at(self.element, base, index)
    }
}

impl VmStack for SimulatedStack {
    fn push(&mut self, b: &mut Emitter<'_>, value: ValueId) -> Result<()> {
        let value = b.convert_to(self.element, value)?;
        self.cells.push(value);
        Ok(())
    }

    fn pop(&mut self, _b: &mut Emitter<'_>) -> Result<ValueId> {
        self.cells.pop().ok_or_else(|| self.underflow(1))
    }

    fn pick(&mut self, _b: &mut Emitter<'_>, depth: usize) -> Result<ValueId> {
        let len = self.cells.len();
        if depth >= len {
            return Err(self.underflow(depth + 1));
        }
        Ok(self.cells[len - 1 - depth])
    }

    fn discard(&mut self, _b: &mut Emitter<'_>, count: usize) -> Result<()> {
        let len = self.cells.len();
        if count > len {
            return Err(self.underflow(count));
        }
        self.cells.truncate(len - count);
        Ok(())
    }

    fn depth(&self) -> Option<usize> {
        Some(self.cells.len())
    }

    fn adjust_depth(&mut self, b: &mut Emitter<'_>, delta: isize) -> Result<()> {
        let len = self.cells.len() as isize;
        if len + delta < 0 {
            return Err(self.underflow(delta.unsigned_abs()));
        }
        let placeholder = b.const_i64(0);
        let placeholder = b.convert_to(self.element, placeholder)?;
        self.cells.resize((len + delta) as usize, placeholder);
        Ok(())
    }
}

impl MachineState for SimulatedStack {
    fn commit(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        let Some(backing) = &self.backing else {
            return Ok(());
        };
        for (index, &value) in self.cells.iter().enumerate() {
            let addr = self.cell_address(b, backing.base, index)?;
            b.store_at(self.element, addr, value)?;
        }
        let mut top = backing.top.clone();
        let end = self.cell_address(b, backing.base, self.cells.len())?;
        top.store(b, end)?;
        top.commit(b)
    }

    fn reload(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        let Some(backing) = self.backing.clone() else {
            return Ok(());
        };
        let mut top = backing.top;
        top.reload(b)?;
        for index in 0..self.cells.len() {
            let addr = self.cell_address(b, backing.base, index)?;
            self.cells[index] = b.load_at(self.element, addr)?;
        }
        Ok(())
    }

    fn make_copy(&self) -> Self {
        self.clone()
    }

    fn merge_into(&self, target: &Self, b: &mut Emitter<'_>) -> Result<()> {
        ensure_same_shape(self, target, b)?;
        for (index, &value) in self.cells.iter().enumerate() {
            let slot = b.slot(&merge_slot_name(&self.name, index), self.element)?;
            b.store(slot, value)?;
        }
        Ok(())
    }

    fn shape(&self) -> StateShape {
        StateShape::Stack {
            name: self.name.clone(),
            element: self.element,
            depth: Some(self.cells.len()),
        }
    }

    fn is_memory_backed(&self) -> bool {
        self.backing.is_some()
    }

    fn bind_entry(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        for index in 0..self.cells.len() {
            let slot = b.slot(&merge_slot_name(&self.name, index), self.element)?;
            self.cells[index] = b.load(slot)?;
        }
        Ok(())
    }
}

/// Fixed-size array tracked symbolically at build time.
///
/// Constant indices resolve at build time. A run-time index is only possible with memory
/// backing: the cells are committed, the access goes through memory and, for writes, the cells
/// are reloaded afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedArray {
    name: String,
    element: IrType,
    cells: Vec<ValueId>,
    base: Option<VmRegister>,
}

impl SimulatedArray {
    /// Creates an array of `len` cells, all holding `init`.
    #[must_use]
    pub fn new(name: &str, element: IrType, len: usize, init: ValueId) -> Self {
        Self {
            name: name.to_string(),
            element,
            cells: vec![init; len],
            base: None,
        }
    }

    /// Creates an array of `len` cells mirrored at the address in `base`, loading the initial
    /// contents from memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial loads cannot be emitted.
    pub fn backed(
        b: &mut Emitter<'_>,
        name: &str,
        element: IrType,
        len: usize,
        base: VmRegister,
    ) -> Result<Self> {
        let zero = b.const_i64(0);
        let zero = b.convert_to(element, zero)?;
        let mut array = Self {
            name: name.to_string(),
            element,
            cells: vec![zero; len],
            base: Some(base),
        };
        array.reload(b)?;
        Ok(array)
    }

    /// Array name, prefix of its merge slots.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` for a zero-sized array.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn constant_index(&self, b: &Emitter<'_>, index: ValueId) -> Result<Option<usize>> {
        let Some(value) = b.constant_of(index) else {
            return Ok(None);
        };
        match usize::try_from(value) {
            Ok(i) if i < self.cells.len() => Ok(Some(i)),
            _ => Err(contract_violation!(
                "index {} out of range for array '{}' of {} cells",
                value,
                self.name,
                self.cells.len()
            )),
        }
    }

    fn memory_address(&self, b: &mut Emitter<'_>, index: ValueId) -> Result<ValueId> {
        let Some(base) = &self.base else {
            return Err(contract_violation!(
                "array '{}' has no memory backing for run-time index {}",
                self.name,
                index
            ));
        };
        let base = base.load(b)?;
        b.index_at(self.element, base, index)
    }
}

impl VmArray for SimulatedArray {
    fn get(&mut self, b: &mut Emitter<'_>, index: ValueId) -> Result<ValueId> {
        if let Some(i) = self.constant_index(b, index)? {
            return Ok(self.cells[i]);
        }
        let addr = self.memory_address(b, index)?;
        self.commit(b)?;
        b.load_at(self.element, addr)
    }

    fn set(&mut self, b: &mut Emitter<'_>, index: ValueId, value: ValueId) -> Result<()> {
        let value = b.convert_to(self.element, value)?;
        if let Some(i) = self.constant_index(b, index)? {
            self.cells[i] = value;
            return Ok(());
        }
        let addr = self.memory_address(b, index)?;
        self.commit(b)?;
        b.store_at(self.element, addr, value)?;
        self.reload(b)
    }
}

impl MachineState for SimulatedArray {
    fn commit(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        let Some(base) = &self.base else {
            return Ok(());
        };
        for (index, &value) in self.cells.iter().enumerate() {
            let start = base.load(b)?;
            let offset = b.const_i64(index as i64);
            let addr = b.index_at(self.element, start, offset)?;
            b.store_at(self.element, addr, value)?;
        }
        Ok(())
    }

    fn reload(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        let Some(base) = &self.base else {
            return Ok(());
        };
        for index in 0..self.cells.len() {
            let start = base.load(b)?;
            let offset = b.const_i64(index as i64);
            let addr = b.index_at(self.element, start, offset)?;
            self.cells[index] = b.load_at(self.element, addr)?;
        }
        Ok(())
    }

    fn make_copy(&self) -> Self {
        self.clone()
    }

    fn merge_into(&self, target: &Self, b: &mut Emitter<'_>) -> Result<()> {
        ensure_same_shape(self, target, b)?;
        for (index, &value) in self.cells.iter().enumerate() {
            let slot = b.slot(&merge_slot_name(&self.name, index), self.element)?;
            b.store(slot, value)?;
        }
        Ok(())
    }

    fn shape(&self) -> StateShape {
        StateShape::Array {
            name: self.name.clone(),
            element: self.element,
            len: Some(self.cells.len()),
        }
    }

    fn is_memory_backed(&self) -> bool {
        self.base.is_some()
    }

    fn bind_entry(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        for index in 0..self.cells.len() {
            let slot = b.slot(&merge_slot_name(&self.name, index), self.element)?;
            self.cells[index] = b.load(slot)?;
        }
        Ok(())
    }
}
