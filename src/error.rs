use thiserror::Error;

use crate::graph::NodeId;

macro_rules! contract_violation {
    // Single string version
    ($msg:expr) => {
        crate::Error::ContractViolation {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::ContractViolation {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Graph construction distinguishes two classes of failure. Contract violations indicate a bug
/// in the code authoring the IR (a handler leaving inconsistent stack shapes behind, an opcode
/// registered twice, a protocol ID reused) and abort the build immediately. Construction
/// failures indicate that the instruction stream itself could not be turned into a graph (an
/// opcode without handler, a branch target outside the stream). Both surface from the top-level
/// `build` call as `Err`, and no partial graph is returned.
///
/// An unrecognized opcode reaching an interpreter's dispatch switch at run time is *not* an
/// error of this type: the generated code traps, which is a property of the generated program.
///
/// # Error Categories
///
/// ## Contract Violations
/// - [`Error::ContractViolation`] - Generic misuse of the builder API
/// - [`Error::ShapeMismatch`] - Merge between states with different slot identities
/// - [`Error::DuplicateOpcode`] - Opcode registered twice in a handler registry
/// - [`Error::DuplicateId`] - Record/replay ID defined twice
///
/// ## Construction Failures
/// - [`Error::UnknownOpcode`] - No handler registered for a decoded opcode
/// - [`Error::OffsetOutOfBounds`] - Read or branch outside the instruction stream
/// - [`Error::NodeNotFound`] - Node index not present in the arena
/// - [`Error::NodeLimit`] - Configured node limit exceeded
///
/// ## Evaluation and Protocol Errors
/// - [`Error::Evaluation`] - Reference evaluator failure
/// - [`Error::Record`] - Malformed record/replay line
#[derive(Error, Debug)]
pub enum Error {
    /// The builder API was used in a way that violates its contract.
    ///
    /// Includes the source location where the violation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated contract
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Contract violation - {file}:{line}: {message}")]
    ContractViolation {
        /// The message to be printed for the violation
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A predecessor state was merged into a successor state with different slot identities.
    ///
    /// The shapes are rendered for diagnostics, e.g. `stack[3]` versus `stack[2]`.
    #[error("Merge into {node} failed: predecessor shape {current} does not match {target}")]
    ShapeMismatch {
        /// Node at which the mismatch was detected
        node: NodeId,
        /// Shape of the predecessor state
        current: String,
        /// Shape of the established successor state
        target: String,
    },

    /// An opcode was registered twice in the same handler registry.
    #[error("Opcode {opcode} is already handled by '{existing}', cannot register '{name}'")]
    DuplicateOpcode {
        /// The opcode value
        opcode: i64,
        /// Name of the handler already registered
        existing: String,
        /// Name of the rejected handler
        name: String,
    },

    /// A record/replay ID was defined twice within one session.
    #[error("Protocol ID {0} is already defined")]
    DuplicateId(u32),

    /// The byte at `offset` decodes to an opcode without a registered handler.
    #[error("No handler for opcode {opcode} at offset {offset}")]
    UnknownOpcode {
        /// Decoded opcode value
        opcode: i64,
        /// Offset of the opcode in the instruction stream
        offset: u32,
    },

    /// A read or branch target fell outside the instruction stream.
    #[error("Offset {offset} is outside the instruction stream of {len} bytes")]
    OffsetOutOfBounds {
        /// The offending offset
        offset: i64,
        /// Length of the instruction stream
        len: usize,
    },

    /// A node index did not resolve in the node arena.
    #[error("Builder node {0} does not exist")]
    NodeNotFound(NodeId),

    /// The graph grew past the configured node limit.
    #[error("Builder node limit of {0} exceeded")]
    NodeLimit(usize),

    /// The reference evaluator could not complete.
    #[error("Evaluation failed - {0}")]
    Evaluation(String),

    /// A record/replay line could not be parsed or referenced an undefined ID.
    #[error("Malformed record at line {line}: {message}")]
    Record {
        /// One-based line number
        line: usize,
        /// Description of the problem
        message: String,
    },
}
