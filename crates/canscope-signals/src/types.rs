//! Core types for signal layout

use serde::{Deserialize, Serialize};

/// Bit layout of a signal inside the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Intel layout: start bit is the least significant bit
    #[default]
    LittleEndian,
    /// Motorola layout: start bit is the most significant bit (sawtooth numbering)
    BigEndian,
}

/// How the raw bits are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Unsigned,
    /// Two's complement
    Signed,
    /// IEEE 754 single precision, 32 bits
    Float32,
    /// IEEE 754 double precision, 64 bits
    Float64,
}

impl ValueType {
    pub fn is_float(&self) -> bool {
        matches!(self, ValueType::Float32 | ValueType::Float64)
    }

    /// Bit length required by float types
    pub fn required_length(&self) -> Option<u16> {
        match self {
            ValueType::Float32 => Some(32),
            ValueType::Float64 => Some(64),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValueType::Unsigned => "unsigned",
            ValueType::Signed => "signed",
            ValueType::Float32 => "float32",
            ValueType::Float64 => "float64",
        };
        f.write_str(s)
    }
}
