//! Operations and node terminators.
//!
//! Builder nodes hold a straight-line list of [`Op`]s followed by exactly one [`Terminator`].
//! Operations are in `dest = op(operands)` form; control transfer only happens through the
//! terminator, which is what makes successor edges explicit and enumerable.
//!
//! # Field Documentation
//!
//! - `dest`: The value produced by the operation
//! - `left`, `right`: Binary operands
//! - `operand`: Unary operand
//! - `slot`: Named slot for `Load`/`Store`
//! - `addr`: Address for memory operations
//! - `base`, `index`, `elem`: Address arithmetic
//! - `value`: A value being stored

#![allow(missing_docs)]

use std::fmt;

use strum::Display;

use crate::{
    graph::NodeId,
    ir::{FunctionId, IrType, SlotId, ValueId},
};

/// Two-operand arithmetic, bitwise and comparison operators.
///
/// Comparisons produce an `Int32` holding `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    #[strum(serialize = "shl")]
    ShiftL,
    #[strum(serialize = "shr")]
    ShiftR,
    #[strum(serialize = "eq")]
    EqualTo,
    #[strum(serialize = "ne")]
    NotEqualTo,
    #[strum(serialize = "lt")]
    LessThan,
    #[strum(serialize = "gt")]
    GreaterThan,
}

impl BinaryOp {
    /// Returns `true` for the comparison operators.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::EqualTo | BinaryOp::NotEqualTo | BinaryOp::LessThan | BinaryOp::GreaterThan
        )
    }
}

/// A single straight-line operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// `dest = left <op> right`
    Binary {
        op: BinaryOp,
        dest: ValueId,
        left: ValueId,
        right: ValueId,
    },
    /// `dest = -operand`
    Negate { dest: ValueId, operand: ValueId },
    /// `dest = (ty) operand`
    ConvertTo {
        dest: ValueId,
        ty: IrType,
        operand: ValueId,
    },
    /// `dest = slot`
    Load { dest: ValueId, slot: SlotId },
    /// `slot = value`
    Store { slot: SlotId, value: ValueId },
    /// `dest = *(ty *) addr`
    LoadAt {
        dest: ValueId,
        ty: IrType,
        addr: ValueId,
    },
    /// `*(ty *) addr = value`
    StoreAt {
        ty: IrType,
        addr: ValueId,
        value: ValueId,
    },
    /// `dest = base + index * sizeof(elem)`
    IndexAt {
        dest: ValueId,
        elem: IrType,
        base: ValueId,
        index: ValueId,
    },
    /// `dest = function(args...)`
    Call {
        dest: Option<ValueId>,
        function: FunctionId,
        args: Vec<ValueId>,
    },
    /// Diagnostic trap raised with `code`; execution continues with the terminator.
    Trap { code: ValueId },
}

impl Op {
    /// The value defined by this operation, if any.
    #[must_use]
    pub fn dest(&self) -> Option<ValueId> {
        match self {
            Op::Binary { dest, .. }
            | Op::Negate { dest, .. }
            | Op::ConvertTo { dest, .. }
            | Op::Load { dest, .. }
            | Op::LoadAt { dest, .. }
            | Op::IndexAt { dest, .. } => Some(*dest),
            Op::Call { dest, .. } => *dest,
            Op::Store { .. } | Op::StoreAt { .. } | Op::Trap { .. } => None,
        }
    }

    /// All values read by this operation.
    #[must_use]
    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            Op::Binary { left, right, .. } => vec![*left, *right],
            Op::Negate { operand, .. } | Op::ConvertTo { operand, .. } => vec![*operand],
            Op::Load { .. } => vec![],
            Op::Store { value, .. } => vec![*value],
            Op::LoadAt { addr, .. } => vec![*addr],
            Op::StoreAt { addr, value, .. } => vec![*addr, *value],
            Op::IndexAt { base, index, .. } => vec![*base, *index],
            Op::Call { args, .. } => args.clone(),
            Op::Trap { code } => vec![*code],
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Binary {
                op,
                dest,
                left,
                right,
            } => write!(f, "{dest} = {op} {left}, {right}"),
            Op::Negate { dest, operand } => write!(f, "{dest} = neg {operand}"),
            Op::ConvertTo { dest, ty, operand } => write!(f, "{dest} = conv.{ty} {operand}"),
            Op::Load { dest, slot } => write!(f, "{dest} = load {slot}"),
            Op::Store { slot, value } => write!(f, "store {slot}, {value}"),
            Op::LoadAt { dest, ty, addr } => write!(f, "{dest} = loadat.{ty} [{addr}]"),
            Op::StoreAt { ty, addr, value } => write!(f, "storeat.{ty} [{addr}], {value}"),
            Op::IndexAt {
                dest,
                elem,
                base,
                index,
            } => write!(f, "{dest} = indexat.{elem} {base}, {index}"),
            Op::Call {
                dest,
                function,
                args,
            } => {
                let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                match dest {
                    Some(dest) => write!(f, "{dest} = call f{} ({})", function.index(), args.join(", ")),
                    None => write!(f, "call f{} ({})", function.index(), args.join(", ")),
                }
            }
            Op::Trap { code } => write!(f, "trap {code}"),
        }
    }
}

/// One arm of a multi-way branch.
///
/// A case whose target is left open after construction and that has `falls_through` set
/// continues into the target of the next case (the last case continues into the default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchCase {
    /// Selector value matched by this case
    pub value: i64,
    /// Node executed when the selector matches
    pub target: NodeId,
    /// Whether the case continues into the next case when its target does not branch away
    pub falls_through: bool,
}

impl SwitchCase {
    /// Creates a case that does not fall through.
    #[must_use]
    pub const fn new(value: i64, target: NodeId) -> Self {
        Self {
            value,
            target,
            falls_through: false,
        }
    }
}

/// The control transfer ending a builder node.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Terminator {
    /// Not terminated yet; operations may still be appended
    #[default]
    Open,
    /// Unconditional transfer
    Goto(NodeId),
    /// Branch to `taken` if `condition` is non-zero, otherwise to `fallthrough`
    IfNotZero {
        condition: ValueId,
        taken: NodeId,
        fallthrough: NodeId,
    },
    /// Multi-way branch over `selector`
    Switch {
        selector: ValueId,
        cases: Vec<SwitchCase>,
        default: NodeId,
    },
    /// Leaves the method, optionally with a value
    Return(Option<ValueId>),
}

impl Terminator {
    /// Returns `true` while operations may still be appended.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Terminator::Open)
    }

    /// Successor nodes in edge order, duplicates included.
    #[must_use]
    pub fn successors(&self) -> Vec<NodeId> {
        match self {
            Terminator::Open | Terminator::Return(_) => vec![],
            Terminator::Goto(target) => vec![*target],
            Terminator::IfNotZero {
                taken, fallthrough, ..
            } => vec![*taken, *fallthrough],
            Terminator::Switch { cases, default, .. } => {
                let mut targets: Vec<NodeId> = cases.iter().map(|c| c.target).collect();
                targets.push(*default);
                targets
            }
        }
    }

    /// Values read by the terminator.
    #[must_use]
    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            Terminator::IfNotZero { condition, .. } => vec![*condition],
            Terminator::Switch { selector, .. } => vec![*selector],
            Terminator::Return(Some(value)) => vec![*value],
            _ => vec![],
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Open => write!(f, "<open>"),
            Terminator::Goto(target) => write!(f, "goto {target}"),
            Terminator::IfNotZero {
                condition,
                taken,
                fallthrough,
            } => write!(f, "if {condition} goto {taken} else {fallthrough}"),
            Terminator::Switch {
                selector,
                cases,
                default,
            } => {
                write!(f, "switch {selector} [")?;
                for case in cases {
                    write!(f, "{} -> {}", case.value, case.target)?;
                    if case.falls_through {
                        write!(f, " (ft)")?;
                    }
                    write!(f, ", ")?;
                }
                write!(f, "default -> {default}]")
            }
            Terminator::Return(Some(value)) => write!(f, "return {value}"),
            Terminator::Return(None) => write!(f, "return"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dest_and_uses() {
        let op = Op::Binary {
            op: BinaryOp::Add,
            dest: ValueId::new(2),
            left: ValueId::new(0),
            right: ValueId::new(1),
        };
        assert_eq!(op.dest(), Some(ValueId::new(2)));
        assert_eq!(op.uses(), vec![ValueId::new(0), ValueId::new(1)]);
        assert_eq!(op.to_string(), "v2 = add v0, v1");

        let store = Op::Store {
            slot: SlotId::new(0),
            value: ValueId::new(4),
        };
        assert_eq!(store.dest(), None);
    }

    #[test]
    fn test_switch_successors() {
        let term = Terminator::Switch {
            selector: ValueId::new(0),
            cases: vec![
                SwitchCase::new(0, NodeId::new(1)),
                SwitchCase::new(1, NodeId::new(2)),
            ],
            default: NodeId::new(3),
        };
        assert_eq!(
            term.successors(),
            vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)]
        );
        assert!(!term.is_open());
        assert!(Terminator::default().is_open());
    }
}
