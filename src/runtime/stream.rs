//! Raw instruction stream access.
//!
//! Opcodes and immediates are stored little-endian. Immediates are signed; opcodes are read
//! unsigned so that an 8-bit opcode space covers `0..=255`.

use strum::{Display, EnumIter};

use crate::{ir::IrType, Error, Result};

/// Width of an immediate operand or opcode in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ImmediateWidth {
    /// One byte
    W8,
    /// Two bytes
    W16,
    /// Four bytes
    W32,
    /// Eight bytes
    W64,
}

impl ImmediateWidth {
    /// Number of bytes occupied in the stream.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            ImmediateWidth::W8 => 1,
            ImmediateWidth::W16 => 2,
            ImmediateWidth::W32 => 4,
            ImmediateWidth::W64 => 8,
        }
    }

    /// Integer type a value of this width is materialized as.
    #[must_use]
    pub const fn ir_type(self) -> IrType {
        match self {
            ImmediateWidth::W8 => IrType::Int8,
            ImmediateWidth::W16 => IrType::Int16,
            ImmediateWidth::W32 => IrType::Int32,
            ImmediateWidth::W64 => IrType::Int64,
        }
    }

    /// Mask selecting the bits of an unsigned value of this width.
    #[must_use]
    pub const fn mask(self) -> i64 {
        match self {
            ImmediateWidth::W8 => 0xff,
            ImmediateWidth::W16 => 0xffff,
            ImmediateWidth::W32 => 0xffff_ffff,
            ImmediateWidth::W64 => -1,
        }
    }
}

fn read_bytes(data: &[u8], offset: i64, width: ImmediateWidth) -> Result<[u8; 8]> {
    let out_of_bounds = || Error::OffsetOutOfBounds {
        offset,
        len: data.len(),
    };
    let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
    let end = start.checked_add(width.bytes()).ok_or_else(out_of_bounds)?;
    let slice = data.get(start..end).ok_or_else(out_of_bounds)?;

    let mut buffer = [0u8; 8];
    buffer[..slice.len()].copy_from_slice(slice);
    Ok(buffer)
}

/// Reads a signed little-endian immediate of `width` at `offset`.
///
/// # Errors
///
/// Returns [`Error::OffsetOutOfBounds`] if the immediate does not lie fully inside `data`.
pub fn read_immediate(data: &[u8], offset: i64, width: ImmediateWidth) -> Result<i64> {
    let buffer = read_bytes(data, offset, width)?;
    Ok(match width {
        ImmediateWidth::W8 => i64::from(buffer[0] as i8),
        ImmediateWidth::W16 => i64::from(i16::from_le_bytes([buffer[0], buffer[1]])),
        ImmediateWidth::W32 => i64::from(i32::from_le_bytes([
            buffer[0], buffer[1], buffer[2], buffer[3],
        ])),
        ImmediateWidth::W64 => i64::from_le_bytes(buffer),
    })
}

/// Reads an unsigned little-endian opcode of `width` at `offset`.
///
/// # Errors
///
/// Returns [`Error::OffsetOutOfBounds`] if the opcode does not lie fully inside `data`.
pub fn read_opcode(data: &[u8], offset: u32, width: ImmediateWidth) -> Result<i64> {
    let buffer = read_bytes(data, i64::from(offset), width)?;
    Ok(i64::from_le_bytes(buffer) & width.mask())
}
