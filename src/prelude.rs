//! # jitweave Prelude
//!
//! The types needed to write opcode handlers and drive both builders. Import this module to get
//! quick access to them:
//!
//! ```rust,ignore
//! use jitweave::prelude::*;
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all jitweave operations
pub use crate::Error;

/// The result type used throughout jitweave
pub use crate::Result;

// ================================================================================================
// IR
// ================================================================================================

pub use crate::ir::{
    eval::{Evaluator, Memory, Outcome},
    BinaryOp, ConstValue, Emitter, FunctionId, IrType, MethodIr, Op, SlotId, Terminator, ValueId,
};

// ================================================================================================
// Machine State
// ================================================================================================

pub use crate::state::{
    FrameState, MachineState, OperandArray, OperandStack, SimulatedArray, SimulatedStack,
    StackConfig, StateShape, VmArray, VmRegister, VmStack,
};

// ================================================================================================
// Graph Construction
// ================================================================================================

pub use crate::graph::{BuildConfig, GraphConstructor, MethodGraph, NodeId};

pub use crate::runtime::{
    emit_call, if_then_else, CallSite, DispatchConfig, DispatchLoopBuilder, FrameKind,
    HandlerRegistry, ImmediateWidth, Prologue, Runtime, Signal, Transition,
};

// ================================================================================================
// Record/Replay and Batch Compilation
// ================================================================================================

pub use crate::record::{Record, Recorder, ReplayReader};

pub use crate::batch::{compile, compile_all, CodeCache, MethodSource};
