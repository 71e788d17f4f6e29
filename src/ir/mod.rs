//! The intermediate representation produced by graph construction.
//!
//! Operations are appended to builder nodes through an [`Emitter`] and refer to immutable
//! [`ValueId`] handles. Named storage (registers, merge slots, parameters) is addressed through
//! [`SlotId`], external functions through [`FunctionId`]. A finished method is a [`MethodIr`],
//! which [`eval::Evaluator`] can execute for testing.

mod emitter;
pub mod eval;
mod method;
mod ops;
mod symbols;
mod types;
mod value;

pub use emitter::Emitter;
pub use method::{IrNode, MethodIr};
pub use ops::{BinaryOp, Op, SwitchCase, Terminator};
pub use symbols::{FunctionDecl, FunctionId, FunctionTable, Slot, SlotId, SlotTable};
pub use types::IrType;
pub use value::{ConstValue, Value, ValueDef, ValueId, ValueTable};
