//! Simulated machine state.
//!
//! A simulated machine state tracks, at one program point, which IR value occupies each
//! symbolic slot of the virtual machine being compiled: operand stack cells, local variable
//! array cells and registers such as the program counter. Every builder node carries one entry
//! state; handlers work on a copy of it while emitting the node's operations.
//!
//! # The State Contract
//!
//! All variants implement [`MachineState`]:
//!
//! - [`MachineState::commit`] writes every symbolic slot out to its backing memory
//! - [`MachineState::reload`] re-reads backing memory into fresh values
//! - [`MachineState::make_copy`] produces an independent copy for a successor
//! - [`MachineState::merge_into`] makes a predecessor store its values into the common slots
//!   of an already established successor state
//!
//! Merge reconciliation replaces phi nodes: every predecessor of a join stores its values into
//! slots whose names are shared by all copies of the state, and the join reads those slots once
//! at entry (see [`MachineState::bind_entry`]). The stored slot identities must agree on every
//! incoming path, which is checked through [`MachineState::shape`].
//!
//! # Variants
//!
//! | Type | Storage | Merge |
//! |------|---------|-------|
//! | [`VmRegister`] | named slot, optionally mirrored to memory | same slot on all paths |
//! | [`OperandStack`] | memory addressed by a top-of-stack register | register slot |
//! | [`SimulatedStack`] | symbolic cells, optional memory mirror | per-depth merge slots |
//! | [`OperandArray`] | memory addressed by a base register | register slot |
//! | [`SimulatedArray`] | symbolic cells, optional memory mirror | per-index merge slots |
//! | [`FrameState`] | an operand stack plus a locals array | the slots of both parts |

mod array;
mod frame;
mod register;
mod simulated;
mod stack;

pub use array::{OperandArray, VmArray};
pub use frame::FrameState;
pub use register::{RegisterBacking, VmRegister};
pub use simulated::{SimulatedArray, SimulatedStack};
pub use stack::{OperandStack, StackConfig, VmStack};

use std::fmt;

use crate::{ir::Emitter, ir::IrType, Result};

/// The four-operation contract every simulated machine state implements.
///
/// All operations emit into the node of the emitter they are given, which is the node the
/// state currently describes.
pub trait MachineState: fmt::Debug + Sized {
    /// Writes every symbolic slot out to its backing memory.
    ///
    /// Purely symbolic states without backing do nothing. Calling `commit` twice without an
    /// intervening mutation writes the same values again.
    ///
    /// # Errors
    ///
    /// Returns an error if an emitted operation is rejected.
    fn commit(&mut self, b: &mut Emitter<'_>) -> Result<()>;

    /// Re-reads slot contents from backing memory into fresh values.
    ///
    /// Used after an opaque operation such as a call may have changed memory. Purely symbolic
    /// states do nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if an emitted operation is rejected.
    fn reload(&mut self, b: &mut Emitter<'_>) -> Result<()>;

    /// Produces an independent copy of this state.
    ///
    /// Register descriptors are shared by value, the simulated slot contents are copied.
    #[must_use]
    fn make_copy(&self) -> Self;

    /// Stores the values of this (predecessor) state into the common slots of `target`.
    ///
    /// The stores are emitted into the predecessor's node. After every predecessor of a node
    /// merged into its entry state, reading a slot in the node observes the value computed by
    /// whichever predecessor control came from.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ShapeMismatch`] if `target` describes different slot identities.
    fn merge_into(&self, target: &Self, b: &mut Emitter<'_>) -> Result<()>;

    /// Describes the slot identities of this state.
    ///
    /// Two states can be merged if and only if their shapes are equal.
    #[must_use]
    fn shape(&self) -> StateShape;

    /// Re-binds the cells of a freshly established entry state to loads of the common merge
    /// slots, emitted at the head of the node the state belongs to.
    ///
    /// States whose slots already are named locals or memory do nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if an emitted operation is rejected.
    fn bind_entry(&mut self, _b: &mut Emitter<'_>) -> Result<()> {
        Ok(())
    }

    /// Returns `true` if [`MachineState::commit`] makes the slot contents readable from memory.
    ///
    /// Calls passing their arguments through memory are only possible on such states.
    fn is_memory_backed(&self) -> bool;
}

/// Comparable description of the slot identities held by a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateShape {
    /// A single named register
    Register {
        /// Register name
        name: String,
    },
    /// An operand stack; `depth` is `None` when the depth only exists in memory
    Stack {
        /// Stack name
        name: String,
        /// Element type
        element: IrType,
        /// Statically known depth
        depth: Option<usize>,
    },
    /// An indexed array; `len` is `None` for memory arrays of unknown size
    Array {
        /// Array name
        name: String,
        /// Element type
        element: IrType,
        /// Statically known length
        len: Option<usize>,
    },
    /// Several states combined, in declaration order
    Composite(Vec<StateShape>),
}

impl fmt::Display for StateShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateShape::Register { name } => write!(f, "reg {name}"),
            StateShape::Stack {
                name,
                element,
                depth: Some(depth),
            } => write!(f, "{name}: {element}[{depth}]"),
            StateShape::Stack {
                name,
                element,
                depth: None,
            } => write!(f, "{name}: {element}[*]"),
            StateShape::Array {
                name,
                element,
                len: Some(len),
            } => write!(f, "{name}: array {element}[{len}]"),
            StateShape::Array {
                name,
                element,
                len: None,
            } => write!(f, "{name}: array {element}[*]"),
            StateShape::Composite(parts) => {
                write!(f, "{{")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Fails with [`crate::Error::ShapeMismatch`] if `current` and `target` differ.
///
/// # Errors
///
/// Returns the mismatch, naming the node the merge was emitted into.
pub fn ensure_same_shape<S: MachineState>(current: &S, target: &S, b: &Emitter<'_>) -> Result<()> {
    let (current, target) = (current.shape(), target.shape());
    if current != target {
        return Err(crate::Error::ShapeMismatch {
            node: b.node(),
            current: current.to_string(),
            target: target.to_string(),
        });
    }
    Ok(())
}

/// Name of the merge slot for cell `index` of the state called `name`.
pub(crate) fn merge_slot_name(name: &str, index: usize) -> String {
    format!("{name}_{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_display() {
        let shape = StateShape::Composite(vec![
            StateShape::Stack {
                name: "stack".into(),
                element: IrType::Int64,
                depth: Some(2),
            },
            StateShape::Register { name: "pc".into() },
        ]);
        assert_eq!(shape.to_string(), "{stack: Int64[2], reg pc}");
    }
}
