//! Value handles and the value table.
//!
//! Every quantity an operation produces or consumes is referenced through a [`ValueId`], an
//! index into the [`ValueTable`] of the compilation unit. Values are created once and never
//! mutated, so the same handle may sit in any number of state slots at the same time. A value is
//! either a compile-time constant (no operation emitted) or the result of exactly one operation
//! in one builder node.

use std::fmt;

use crate::{graph::NodeId, ir::IrType};

/// Handle to an immutable IR value.
///
/// The handle is unique within one compilation unit but carries no meaning across units.
///
/// # Examples
///
/// ```rust
/// use jitweave::ir::ValueId;
///
/// let id = ValueId::new(3);
/// assert_eq!(id.index(), 3);
/// assert_eq!(format!("{id}"), "v3");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(usize);

impl ValueId {
    /// Creates a new value handle from a table index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the index into the value table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    /// 8-bit integer
    I8(i8),
    /// 16-bit integer
    I16(i16),
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// Raw address
    Address(i64),
}

impl ConstValue {
    /// The IR type of this constant.
    #[must_use]
    pub const fn ty(&self) -> IrType {
        match self {
            ConstValue::I8(_) => IrType::Int8,
            ConstValue::I16(_) => IrType::Int16,
            ConstValue::I32(_) => IrType::Int32,
            ConstValue::I64(_) => IrType::Int64,
            ConstValue::F32(_) => IrType::Float,
            ConstValue::F64(_) => IrType::Double,
            ConstValue::Address(_) => IrType::Address,
        }
    }

    /// Integer value of this constant, `None` for floating point constants.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match *self {
            ConstValue::I8(v) => Some(v as i64),
            ConstValue::I16(v) => Some(v as i64),
            ConstValue::I32(v) => Some(v as i64),
            ConstValue::I64(v) | ConstValue::Address(v) => Some(v),
            ConstValue::F32(_) | ConstValue::F64(_) => None,
        }
    }

    /// Raw 64-bit representation as used by the evaluator: sign-extended integers and the
    /// IEEE bit pattern of an `f64` for both float widths.
    #[must_use]
    pub fn to_bits(&self) -> i64 {
        match *self {
            ConstValue::F32(v) => f64::from(v).to_bits() as i64,
            ConstValue::F64(v) => v.to_bits() as i64,
            _ => self.as_i64().unwrap_or_default(),
        }
    }

    /// Builds an integer constant of type `ty` from `value`, truncating to the type's width.
    ///
    /// Returns `None` for `NoType` and floating point types.
    #[must_use]
    pub fn integer(ty: IrType, value: i64) -> Option<Self> {
        match ty {
            IrType::Int8 => Some(ConstValue::I8(value as i8)),
            IrType::Int16 => Some(ConstValue::I16(value as i16)),
            IrType::Int32 => Some(ConstValue::I32(value as i32)),
            IrType::Int64 => Some(ConstValue::I64(value)),
            IrType::Address => Some(ConstValue::Address(value)),
            IrType::NoType | IrType::Float | IrType::Double => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::I8(v) => write!(f, "{v}i8"),
            ConstValue::I16(v) => write!(f, "{v}i16"),
            ConstValue::I32(v) => write!(f, "{v}i32"),
            ConstValue::I64(v) => write!(f, "{v}i64"),
            ConstValue::F32(v) => write!(f, "{v}f32"),
            ConstValue::F64(v) => write!(f, "{v}f64"),
            ConstValue::Address(v) => write!(f, "{v:#x}"),
        }
    }
}

/// How a value came into existence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueDef {
    /// A constant, available everywhere without an operation
    Const(ConstValue),
    /// Result of an operation emitted into `node`
    Computed {
        /// Node holding the producing operation
        node: NodeId,
    },
}

/// Metadata of a single value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Value {
    /// Data type of the value
    pub ty: IrType,
    /// Producer of the value
    pub def: ValueDef,
}

impl Value {
    /// Returns the constant if this value is one.
    #[must_use]
    pub const fn constant(&self) -> Option<ConstValue> {
        match self.def {
            ValueDef::Const(c) => Some(c),
            ValueDef::Computed { .. } => None,
        }
    }
}

/// Append-only storage of all values of a compilation unit.
#[derive(Debug, Clone, Default)]
pub struct ValueTable {
    values: Vec<Value>,
}

impl ValueTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value and returns its handle.
    pub fn push(&mut self, value: Value) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(value);
        id
    }

    /// Looks up a value.
    #[must_use]
    pub fn get(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id.index())
    }

    /// Type of `id`, `NoType` for unknown handles.
    #[must_use]
    pub fn type_of(&self, id: ValueId) -> IrType {
        self.get(id).map_or(IrType::NoType, |v| v.ty)
    }

    /// Integer constant behind `id`, if it is one.
    #[must_use]
    pub fn constant_i64(&self, id: ValueId) -> Option<i64> {
        self.get(id)
            .and_then(Value::constant)
            .and_then(|c| c.as_i64())
    }

    /// Number of values created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no value was created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over all values with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (ValueId, &Value)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (ValueId::new(i), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_lookup() {
        let mut table = ValueTable::new();
        let c = table.push(Value {
            ty: IrType::Int32,
            def: ValueDef::Const(ConstValue::I32(-7)),
        });
        let computed = table.push(Value {
            ty: IrType::Int32,
            def: ValueDef::Computed {
                node: NodeId::new(0),
            },
        });

        assert_eq!(table.constant_i64(c), Some(-7));
        assert_eq!(table.constant_i64(computed), None);
        assert_eq!(table.type_of(computed), IrType::Int32);
        assert_eq!(table.type_of(ValueId::new(99)), IrType::NoType);
    }

    #[test]
    fn test_integer_truncates() {
        assert_eq!(ConstValue::integer(IrType::Int8, 300), Some(ConstValue::I8(44)));
        assert_eq!(ConstValue::integer(IrType::Double, 1), None);
        assert_eq!(ConstValue::F64(1.5).to_bits(), 1.5f64.to_bits() as i64);
    }
}
