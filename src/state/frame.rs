//! Frame states combining an operand stack with local variables.
//!
//! A method frame usually needs more than one kind of slot: the operand stack the bytecodes
//! push and pop, and the locals array they load and store. [`FrameState`] holds one of each and
//! implements the state contract by applying every operation to the stack first and the locals
//! second. Merge slots stay distinct because each part keeps its own name.

use crate::{
    ir::{Emitter, ValueId},
    state::{ensure_same_shape, MachineState, StateShape, VmArray, VmStack},
    Result,
};

/// An operand stack and a locals array forming one machine state.
///
/// The frame is itself a [`VmStack`] forwarding to its stack, so handlers written against the
/// stack capability work on frames unchanged. Locals are reached through [`FrameState::locals`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameState<S, L> {
    /// The operand stack
    pub stack: S,
    /// The local variables
    pub locals: L,
}

impl<S, L> FrameState<S, L>
where
    S: VmStack + MachineState,
    L: VmArray + MachineState,
{
    /// Combines `stack` and `locals` into one state.
    #[must_use]
    pub fn new(stack: S, locals: L) -> Self {
        Self { stack, locals }
    }

    /// Pops the stack top into local `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack is empty or the index is invalid.
    pub fn pop_local(&mut self, b: &mut Emitter<'_>, index: i32) -> Result<()> {
        let value = self.stack.pop(b)?;
        self.locals.set_const(b, index, value)
    }

    /// Pushes the value of local `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is invalid.
    pub fn push_local(&mut self, b: &mut Emitter<'_>, index: i32) -> Result<()> {
        let value = self.locals.get_const(b, index)?;
        self.stack.push(b, value)
    }
}

impl<S: VmStack, L> VmStack for FrameState<S, L> {
    fn push(&mut self, b: &mut Emitter<'_>, value: ValueId) -> Result<()> {
        self.stack.push(b, value)
    }

    fn pop(&mut self, b: &mut Emitter<'_>) -> Result<ValueId> {
        self.stack.pop(b)
    }

    fn pick(&mut self, b: &mut Emitter<'_>, depth: usize) -> Result<ValueId> {
        self.stack.pick(b, depth)
    }

    fn discard(&mut self, b: &mut Emitter<'_>, count: usize) -> Result<()> {
        self.stack.discard(b, count)
    }

    fn depth(&self) -> Option<usize> {
        self.stack.depth()
    }

    fn adjust_depth(&mut self, b: &mut Emitter<'_>, delta: isize) -> Result<()> {
        self.stack.adjust_depth(b, delta)
    }
}

impl<S, L> MachineState for FrameState<S, L>
where
    S: MachineState,
    L: MachineState,
{
    fn commit(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        self.stack.commit(b)?;
        self.locals.commit(b)
    }

    fn reload(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        self.stack.reload(b)?;
        self.locals.reload(b)
    }

    fn make_copy(&self) -> Self {
        Self {
            stack: self.stack.make_copy(),
            locals: self.locals.make_copy(),
        }
    }

    fn merge_into(&self, target: &Self, b: &mut Emitter<'_>) -> Result<()> {
        // a mismatch reports both parts
        ensure_same_shape(self, target, b)?;
        self.stack.merge_into(&target.stack, b)?;
        self.locals.merge_into(&target.locals, b)
    }

    fn shape(&self) -> StateShape {
        StateShape::Composite(vec![self.stack.shape(), self.locals.shape()])
    }

    fn bind_entry(&mut self, b: &mut Emitter<'_>) -> Result<()> {
        self.stack.bind_entry(b)?;
        self.locals.bind_entry(b)
    }

    /// Only the operand stack carries call arguments.
    fn is_memory_backed(&self) -> bool {
        self.stack.is_memory_backed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{IrType, Op},
        state::{SimulatedArray, SimulatedStack},
        test::ScratchNode,
    };

    fn frame(b: &mut Emitter<'_>) -> FrameState<SimulatedStack, SimulatedArray> {
        let zero = b.const_i64(0);
        FrameState::new(
            SimulatedStack::new("stack", IrType::Int64),
            SimulatedArray::new("locals", IrType::Int64, 2, zero),
        )
    }

    #[test]
    fn test_locals_move_through_the_stack() {
        let mut scratch = ScratchNode::new();
        let mut b = scratch.emitter();
        let mut state = frame(&mut b);
        let seven = b.const_i64(7);
        state.push(&mut b, seven).unwrap();
        state.pop_local(&mut b, 1).unwrap();
        assert_eq!(state.depth(), Some(0));

        state.push_local(&mut b, 1).unwrap();
        assert_eq!(state.pop(&mut b).unwrap(), seven);
        assert!(state.pop(&mut b).is_err());
    }

    #[test]
    fn test_shape_covers_both_parts() {
        let mut scratch = ScratchNode::new();
        let mut b = scratch.emitter();
        let mut state = frame(&mut b);
        assert_eq!(
            state.shape().to_string(),
            "{stack: Int64[0], locals: array Int64[2]}"
        );

        let copy = state.make_copy();
        let one = b.const_i64(1);
        state.push(&mut b, one).unwrap();
        let err = state.merge_into(&copy, &mut b).unwrap_err();
        assert!(matches!(err, crate::Error::ShapeMismatch { .. }));
        assert!(!state.is_memory_backed());
    }

    #[test]
    fn test_merge_stores_every_part() {
        let mut scratch = ScratchNode::new();
        let mut b = scratch.emitter();
        let mut state = frame(&mut b);
        let one = b.const_i64(1);
        state.push(&mut b, one).unwrap();
        let target = state.make_copy();
        state.merge_into(&target, &mut b).unwrap();
        drop(b);

        let stores = scratch
            .ops
            .iter()
            .filter(|op| matches!(op, Op::Store { .. }))
            .count();
        // one stack cell and two locals
        assert_eq!(stores, 3);
    }
}
