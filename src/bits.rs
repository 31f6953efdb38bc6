//! Bit-level field extraction.
//!
//! Bits are numbered big-endian, within and across bytes, as in CCSDS 133.0-B: bit 0 is
//! the most significant bit of the first byte of the buffer. None of the functions here
//! require byte alignment.
use serde::Serialize;

use crate::schema::{ByteOrder, DataKind};
use crate::{Error, Result};

/// A single decoded scalar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Uint(u64),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
}

impl Value {
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::Bool(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Uint(v) => i64::try_from(*v).ok(),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Numeric view of the value. Byte and string values have none.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Uint(v) => Some(*v as f64),
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(v) => Some(f64::from(u8::from(*v))),
            Value::Bytes(_) | Value::Str(_) => None,
        }
    }
}

fn check_range(buf: &[u8], offset: u64, width: u64) -> Result<()> {
    let available = buf.len() as u64 * 8;
    match offset.checked_add(width) {
        Some(end) if end <= available => Ok(()),
        _ => Err(Error::Range {
            offset,
            width,
            available,
        }),
    }
}

/// Read `width` bits starting at bit `offset` as an unsigned big-endian integer.
///
/// # Errors
/// [Error::InvalidWidth] if `width` is not 1 to 64, [Error::Range] if the range does not
/// fit in `buf`.
pub fn read_bits(buf: &[u8], offset: u64, width: u32) -> Result<u64> {
    if width == 0 || width > 64 {
        return Err(Error::InvalidWidth {
            kind: DataKind::Uint,
            width: u64::from(width),
        });
    }
    check_range(buf, offset, u64::from(width))?;

    let end = offset + u64::from(width);
    #[allow(clippy::cast_possible_truncation)]
    let (first, last) = ((offset / 8) as usize, ((end - 1) / 8) as usize);

    // At most 9 bytes are touched (64 bits starting mid-byte), which fits a u128.
    let acc = buf[first..=last]
        .iter()
        .fold(0u128, |acc, b| (acc << 8) | u128::from(*b));
    let total = ((last - first + 1) * 8) as u64;
    let shift = total - (offset - first as u64 * 8) - u64::from(width);
    let mask = if width == 64 {
        u128::from(u64::MAX)
    } else {
        (1u128 << width) - 1
    };

    Ok(((acc >> shift) & mask) as u64)
}

/// Write the low `width` bits of `value` at bit `offset`, leaving all other bits
/// untouched. This is the inverse of [read_bits].
///
/// # Errors
/// Same as [read_bits].
pub fn write_bits(buf: &mut [u8], offset: u64, width: u32, value: u64) -> Result<()> {
    if width == 0 || width > 64 {
        return Err(Error::InvalidWidth {
            kind: DataKind::Uint,
            width: u64::from(width),
        });
    }
    check_range(buf, offset, u64::from(width))?;

    for i in 0..u64::from(width) {
        let bit = (value >> (u64::from(width) - 1 - i)) & 1;
        let pos = offset + i;
        #[allow(clippy::cast_possible_truncation)]
        let byte = &mut buf[(pos / 8) as usize];
        let mask = 0x80u8 >> (pos % 8);
        if bit == 1 {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }
    Ok(())
}

/// Interpret the low `width` bits of `raw` as a two's-complement integer.
#[must_use]
pub fn sign_extend(raw: u64, width: u32) -> i64 {
    if width == 0 || width >= 64 {
        return raw as i64;
    }
    let shift = 64 - width;
    ((raw << shift) as i64) >> shift
}

/// Reverse the order of the `width / 8` low bytes of `raw`.
fn swap_bytes(raw: u64, width: u32) -> u64 {
    raw.swap_bytes() >> (64 - width)
}

/// Read `width / 8` bytes starting at any bit offset.
///
/// # Errors
/// [Error::InvalidWidth] if `width` is not a multiple of 8, [Error::Range] if the range
/// does not fit in `buf`.
pub fn read_bytes(buf: &[u8], offset: u64, width: u64) -> Result<Vec<u8>> {
    if width % 8 != 0 {
        return Err(Error::InvalidWidth {
            kind: DataKind::Bytes,
            width,
        });
    }
    check_range(buf, offset, width)?;

    if offset % 8 == 0 {
        let start = usize::try_from(offset / 8).unwrap_or(usize::MAX);
        let len = usize::try_from(width / 8).unwrap_or(usize::MAX);
        return Ok(buf[start..start + len].to_vec());
    }
    (0..width / 8)
        .map(|i| read_bits(buf, offset + i * 8, 8).map(|b| b as u8))
        .collect()
}

/// Extract a typed value of `kind` from `width` bits starting at bit `offset`.
///
/// Integers may be 1 to 64 bits wide and signed integers are sign-extended from their
/// declared width. Floats must be exactly 32 or 64 bits. Byte and string values may be
/// any multiple of 8 bits. [ByteOrder::Little] only applies to numeric values whose width
/// is a multiple of 8.
///
/// # Errors
/// [Error::InvalidWidth] for a width the kind does not support, [Error::Range] if the range
/// does not fit in `buf`.
///
/// # Examples
/// ```
/// use ccsds_tlm::bits::{extract, Value};
/// use ccsds_tlm::schema::{ByteOrder, DataKind};
///
/// // 0b1111_1100 -> the leading 4 bits are -1 as a 4 bit signed integer
/// let v = extract(&[0xfc], 0, 4, DataKind::Int, ByteOrder::Big).unwrap();
/// assert_eq!(v, Value::Int(-1));
/// ```
pub fn extract(
    buf: &[u8],
    offset: u64,
    width: u64,
    kind: DataKind,
    order: ByteOrder,
) -> Result<Value> {
    let invalid = || Error::InvalidWidth { kind, width };

    if matches!(kind, DataKind::Bytes | DataKind::Str) {
        let bytes = read_bytes(buf, offset, width).map_err(|err| match err {
            Error::InvalidWidth { .. } => invalid(),
            other => other,
        })?;
        return Ok(match kind {
            DataKind::Str => Value::Str(
                String::from_utf8_lossy(&bytes)
                    .trim_end_matches('\0')
                    .to_string(),
            ),
            _ => Value::Bytes(bytes),
        });
    }

    let bits = u32::try_from(width)
        .ok()
        .filter(|w| (1..=64).contains(w))
        .ok_or_else(invalid)?;
    let little = order == ByteOrder::Little;
    if little && bits % 8 != 0 {
        return Err(invalid());
    }
    let raw = read_bits(buf, offset, bits)?;
    let raw = if little { swap_bytes(raw, bits) } else { raw };

    match kind {
        DataKind::Uint | DataKind::Fill => Ok(Value::Uint(raw)),
        DataKind::Int => Ok(Value::Int(sign_extend(raw, bits))),
        DataKind::Bool => Ok(Value::Bool(raw != 0)),
        #[allow(clippy::cast_possible_truncation)]
        DataKind::Float => match bits {
            32 => Ok(Value::Float(f64::from(f32::from_bits(raw as u32)))),
            64 => Ok(Value::Float(f64::from_bits(raw))),
            _ => Err(invalid()),
        },
        DataKind::Bytes | DataKind::Str => unreachable!("handled above"),
    }
}
