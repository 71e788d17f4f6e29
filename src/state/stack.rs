//! Memory-backed operand stacks.
//!
//! [`OperandStack`] models the operand stack of an interpreter: the cells live in memory and a
//! top-of-stack register addresses them. Two independent configuration axes decide how the
//! register relates to the cells:
//!
//! - **Growth direction**: pushing moves the register towards higher (`grows_up`) or lower
//!   addresses.
//! - **Adjustment order**: with `pre_adjust` the register is moved before a push writes and
//!   therefore always addresses the topmost element; without it the register addresses the next
//!   free cell and is moved after the write.
//!
//! The element read by `top` is thus at offset `0` when pre-adjusting, and at `-1` (growing up)
//! or `+1` (growing down) element otherwise.

use crate::{
    ir::{Emitter, IrType, ValueId},
    state::{ensure_same_shape, MachineState, StateShape, VmRegister},
    Result,
};

/// Capability shared by all operand stack variants.
pub trait VmStack {
    /// Pushes `value`, converted to the stack's element type.
    ///
    /// # Errors
    ///
    /// Returns an error if an emitted operation is rejected.
    fn push(&mut self, b: &mut Emitter<'_>, value: ValueId) -> Result<()>;

    /// Removes and returns the topmost element.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack is statically known to be empty.
    fn pop(&mut self, b: &mut Emitter<'_>) -> Result<ValueId>;

    /// Returns the topmost element without removing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack is statically known to be empty.
    fn top(&mut self, b: &mut Emitter<'_>) -> Result<ValueId> {
        self.pick(b, 0)
    }

    /// Returns the element `depth` positions below the top (`0` is the top).
    ///
    /// # Errors
    ///
    /// Returns an error if the stack is statically known to hold fewer elements.
    fn pick(&mut self, b: &mut Emitter<'_>, depth: usize) -> Result<ValueId>;

    /// Drops `count` elements without reading them.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack is statically known to hold fewer elements.
    fn discard(&mut self, b: &mut Emitter<'_>, count: usize) -> Result<()>;

    /// Pushes a copy of the topmost element.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack is statically known to be empty.
    fn dup(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        let value = self.top(b)?;
        self.push(b, value)
    }

    /// Statically known number of elements, `None` if the depth only exists at run time.
    #[must_use]
    fn depth(&self) -> Option<usize>;

    /// Changes the simulated element count after code outside this state pushed or popped
    /// elements in memory. The contents of added cells are undefined until the next reload.
    ///
    /// # Errors
    ///
    /// Returns an error if the count would become negative.
    fn adjust_depth(&mut self, b: &mut Emitter<'_>, delta: isize) -> Result<()>;
}

/// Layout of a memory-backed operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackConfig {
    /// Type of each cell
    pub element: IrType,
    /// Whether pushing moves towards higher addresses
    pub grows_up: bool,
    /// Whether the register is moved before a push writes
    pub pre_adjust: bool,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            element: IrType::Int64,
            grows_up: true,
            pre_adjust: false,
        }
    }
}

impl StackConfig {
    /// Creates a configuration for `element` cells growing up with post-adjustment.
    #[must_use]
    pub fn new(element: IrType) -> Self {
        Self {
            element,
            ..Self::default()
        }
    }

    /// Sets the growth direction.
    #[must_use]
    pub fn grows_up(mut self, grows_up: bool) -> Self {
        self.grows_up = grows_up;
        self
    }

    /// Sets the adjustment order.
    #[must_use]
    pub fn pre_adjust(mut self, pre_adjust: bool) -> Self {
        self.pre_adjust = pre_adjust;
        self
    }

    /// Register movement of one push, in elements.
    #[must_use]
    pub const fn step(&self) -> i64 {
        if self.grows_up {
            1
        } else {
            -1
        }
    }

    /// Element offset of the topmost cell relative to the register.
    #[must_use]
    pub const fn top_offset(&self) -> i64 {
        if self.pre_adjust {
            0
        } else {
            -self.step()
        }
    }
}

/// Operand stack living in memory, addressed by a top-of-stack register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandStack {
    register: VmRegister,
    config: StackConfig,
}

impl OperandStack {
    /// Creates a stack over `register`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ContractViolation`] if the register does not move by whole
    /// elements of the configured type.
    pub fn new(register: VmRegister, config: StackConfig) -> Result<Self> {
        if register.element_size() != config.element.size() as i64 {
            return Err(contract_violation!(
                "register '{}' moves by {} bytes, stack elements are {}",
                register.name(),
                register.element_size(),
                config.element
            ));
        }
        Ok(Self { register, config })
    }

    /// The top-of-stack register.
    #[must_use]
    pub fn register(&self) -> &VmRegister {
        &self.register
    }

    /// Stack layout.
    #[must_use]
    pub fn config(&self) -> StackConfig {
        self.config
    }
}

impl VmStack for OperandStack {
    fn push(&mut self, b: &mut Emitter<'_>, value: ValueId) -> Result<()> {
        let mut addr = self.register.load(b)?;
        self.register.adjust(b, self.config.step())?;
        if self.config.pre_adjust {
            addr = self.register.load(b)?;
        }
        b.store_at(self.config.element, addr, value)
    }

    fn pop(&mut self, b: &mut Emitter<'_>) -> Result<ValueId> {
        let mut addr = self.register.load(b)?;
        self.register.adjust(b, -self.config.step())?;
        if !self.config.pre_adjust {
            addr = self.register.load(b)?;
        }
        b.load_at(self.config.element, addr)
    }

    fn pick(&mut self, b: &mut Emitter<'_>, depth: usize) -> Result<ValueId> {
        let offset = self.config.top_offset() - depth as i64 * self.config.step();
        let top = self.register.load(b)?;
        let offset = b.const_i64(offset);
        let addr = b.index_at(self.config.element, top, offset)?;
        b.load_at(self.config.element, addr)
    }

    fn discard(&mut self, b: &mut Emitter<'_>, count: usize) -> Result<()> {
        self.register.adjust(b, -(count as i64) * self.config.step())
    }

    fn depth(&self) -> Option<usize> {
        None
    }

    fn adjust_depth(&mut self, _b: &mut Emitter<'_>, _delta: isize) -> Result<()> {
        // The depth is implied by the register, which reload refreshes.
        Ok(())
    }
}

impl MachineState for OperandStack {
    fn commit(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        self.register.commit(b)
    }

    fn reload(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        self.register.reload(b)
    }

    fn make_copy(&self) -> Self {
        self.clone()
    }

    fn merge_into(&self, target: &Self, b: &mut Emitter<'_>) -> Result<()> {
        ensure_same_shape(self, target, b)?;
        self.register.merge_into(&target.register, b)
    }

    fn shape(&self) -> StateShape {
        StateShape::Stack {
            name: self.register.name().to_string(),
            element: self.config.element,
            depth: None,
        }
    }

    fn is_memory_backed(&self) -> bool {
        true
    }
}
