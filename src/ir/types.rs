//! Data types carried by IR values.
//!
//! The builder layer works with a deliberately small type lattice: fixed-width integers,
//! two floating point widths and an untyped address. Address arithmetic is expressed through
//! [`crate::ir::Op::IndexAt`] with an explicit element type, so pointer types never need to be
//! tracked on values.

use strum::{Display, EnumIter};

/// The data type of an IR value or storage location.
///
/// # Examples
///
/// ```rust
/// use jitweave::ir::IrType;
///
/// assert_eq!(IrType::Int16.size(), 2);
/// assert!(IrType::Address.is_integer());
/// assert!(IrType::Double.is_float());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum IrType {
    /// No value, used for calls without result
    NoType,
    /// 8-bit signed integer
    Int8,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 32-bit IEEE float
    Float,
    /// 64-bit IEEE float
    Double,
    /// Untyped machine address
    Address,
}

impl IrType {
    /// Size of a value of this type in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            IrType::NoType => 0,
            IrType::Int8 => 1,
            IrType::Int16 => 2,
            IrType::Int32 | IrType::Float => 4,
            IrType::Int64 | IrType::Double | IrType::Address => 8,
        }
    }

    /// Returns `true` for integer and address types.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            IrType::Int8 | IrType::Int16 | IrType::Int32 | IrType::Int64 | IrType::Address
        )
    }

    /// Returns `true` for `Float` and `Double`.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, IrType::Float | IrType::Double)
    }

    /// Result type of a binary arithmetic operation on `self` and `other`.
    ///
    /// Addresses dominate integers (pointer arithmetic), doubles dominate floats and wider
    /// integers dominate narrower ones.
    #[must_use]
    pub fn widen(self, other: IrType) -> IrType {
        if self == other {
            return self;
        }
        if self == IrType::Address || other == IrType::Address {
            return IrType::Address;
        }
        if self.is_float() || other.is_float() {
            if self == IrType::Double || other == IrType::Double {
                return IrType::Double;
            }
            return IrType::Float;
        }
        if self.size() >= other.size() {
            self
        } else {
            other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_sizes_cover_all_types() {
        for ty in IrType::iter() {
            let expected = match ty {
                IrType::NoType => 0,
                IrType::Int8 => 1,
                IrType::Int16 => 2,
                IrType::Int32 | IrType::Float => 4,
                _ => 8,
            };
            assert_eq!(ty.size(), expected, "{ty}");
        }
    }

    #[test]
    fn test_widen() {
        assert_eq!(IrType::Int8.widen(IrType::Int32), IrType::Int32);
        assert_eq!(IrType::Int64.widen(IrType::Address), IrType::Address);
        assert_eq!(IrType::Float.widen(IrType::Int64), IrType::Float);
        assert_eq!(IrType::Float.widen(IrType::Double), IrType::Double);
    }
}
