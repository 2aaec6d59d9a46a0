//! Value envelope carried by 1c messages.
//!
//! A proposal travels as `<byteLength><><decimal>` where `<decimal>` is the
//! proposal bytes read as one little-endian unsigned integer. The length
//! prefix restores high-order zero bytes that the integer form drops.

use thiserror::Error;

pub const ENVELOPE_SEPARATOR: &str = "<>";

/// Largest proposal, in bytes, an envelope may declare.
pub const MAX_VALUE_LEN: usize = 1 << 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueCodecError {
    #[error("missing `<>` separator")]
    MissingSeparator,

    #[error("invalid length prefix {0:?}")]
    InvalidLength(String),

    #[error("invalid integer body {0:?}")]
    InvalidDigits(String),

    #[error("integer needs {needed} bytes but envelope declares {length}")]
    Overflow { length: usize, needed: usize },

    #[error("envelope declares {length} bytes, limit is {max}")]
    TooLong { length: usize, max: usize },
}

pub fn encode_value(value: &[u8]) -> String {
    format!("{}{}{}", value.len(), ENVELOPE_SEPARATOR, le_bytes_to_decimal(value))
}

pub fn decode_value(envelope: &str) -> Result<Vec<u8>, ValueCodecError> {
    let (length, digits) = envelope
        .split_once(ENVELOPE_SEPARATOR)
        .ok_or(ValueCodecError::MissingSeparator)?;
    let length: usize = length
        .parse()
        .map_err(|_| ValueCodecError::InvalidLength(length.to_string()))?;
    if length > MAX_VALUE_LEN {
        return Err(ValueCodecError::TooLong { length, max: MAX_VALUE_LEN });
    }
    // 256^n < 10^(3n), so a body with more than 3n digits cannot fit n bytes
    if digits.len() > length.saturating_mul(3).max(1) {
        return Err(ValueCodecError::InvalidDigits(format!("{} digits", digits.len())));
    }

    let mut bytes = decimal_to_le_bytes(digits)?;
    if bytes.len() > length {
        return Err(ValueCodecError::Overflow { length, needed: bytes.len() });
    }
    bytes.resize(length, 0);
    Ok(bytes)
}

/// Base-256 little-endian to base-10, by repeated long division.
fn le_bytes_to_decimal(bytes: &[u8]) -> String {
    let mut big_endian: Vec<u8> = bytes.iter().rev().copied().skip_while(|b| *b == 0).collect();
    if big_endian.is_empty() {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while !big_endian.is_empty() {
        let mut remainder: u32 = 0;
        let mut quotient = Vec::with_capacity(big_endian.len());
        for &byte in &big_endian {
            let acc = (remainder << 8) | u32::from(byte);
            let q = acc / 10;
            remainder = acc % 10;
            if !(quotient.is_empty() && q == 0) {
                quotient.push(q as u8);
            }
        }
        digits.push(b'0' + remainder as u8);
        big_endian = quotient;
    }

    digits.iter().rev().map(|d| *d as char).collect()
}

fn decimal_to_le_bytes(digits: &str) -> Result<Vec<u8>, ValueCodecError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValueCodecError::InvalidDigits(digits.to_string()));
    }

    let mut little_endian: Vec<u8> = Vec::new();
    for digit in digits.bytes() {
        let mut carry = u32::from(digit - b'0');
        for byte in little_endian.iter_mut() {
            let acc = u32::from(*byte) * 10 + carry;
            *byte = (acc & 0xff) as u8;
            carry = acc >> 8;
        }
        if carry > 0 {
            little_endian.push(carry as u8);
        }
    }
    Ok(little_endian)
}
