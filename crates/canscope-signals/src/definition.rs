//! Message and signal definitions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::precision::precision_from_scale;
use crate::types::{ByteOrder, ValueType};

/// Layout and scaling of a single signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    pub name: String,

    /// Start bit (LSB for little-endian, MSB for big-endian)
    pub start_bit: u16,

    /// Bit length (1..=64)
    pub length: u16,

    #[serde(default)]
    pub byte_order: ByteOrder,

    #[serde(default)]
    pub value_type: ValueType,

    /// Scale factor: physical = raw * scale + offset
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Offset: physical = raw * scale + offset
    #[serde(default)]
    pub offset: f64,

    #[serde(default)]
    pub unit: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Initial physical value (used for freshly created TX rows)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<f64>,

    /// Raw value → label
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub choices: BTreeMap<u64, String>,

    /// Explicit precision override (decimal places)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
}

fn default_scale() -> f64 {
    1.0
}

impl SignalDefinition {
    fn with_type(name: impl Into<String>, start_bit: u16, length: u16, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            start_bit,
            length,
            byte_order: ByteOrder::LittleEndian,
            value_type,
            scale: 1.0,
            offset: 0.0,
            unit: String::new(),
            min: None,
            max: None,
            initial: None,
            choices: BTreeMap::new(),
            precision: None,
        }
    }

    pub fn unsigned(name: impl Into<String>, start_bit: u16, length: u16) -> Self {
        Self::with_type(name, start_bit, length, ValueType::Unsigned)
    }

    pub fn signed(name: impl Into<String>, start_bit: u16, length: u16) -> Self {
        Self::with_type(name, start_bit, length, ValueType::Signed)
    }

    pub fn float32(name: impl Into<String>, start_bit: u16) -> Self {
        Self::with_type(name, start_bit, 32, ValueType::Float32).with_precision(3)
    }

    pub fn scaled(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    pub fn big_endian(mut self) -> Self {
        self.byte_order = ByteOrder::BigEndian;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_initial(mut self, initial: f64) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn with_choice(mut self, raw: u64, label: impl Into<String>) -> Self {
        self.choices.insert(raw, label.into());
        self
    }

    pub fn with_precision(mut self, precision: u8) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Decimal places used when formatting the physical value
    pub fn decimals(&self) -> u8 {
        self.precision.unwrap_or_else(|| {
            let offset_precision = if self.offset == 0.0 {
                0
            } else {
                precision_from_scale(self.offset.abs())
            };
            precision_from_scale(self.scale).max(offset_precision)
        })
    }

    pub fn has_choices(&self) -> bool {
        !self.choices.is_empty()
    }
}

/// A message: identifier plus the signals packed into its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDefinition {
    pub id: u32,
    pub name: String,
    /// Payload length in bytes
    pub length: u8,
    /// Nominal cycle time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_time_ms: Option<u32>,
    #[serde(default)]
    pub signals: Vec<SignalDefinition>,
}

impl MessageDefinition {
    pub fn new(id: u32, name: impl Into<String>, length: u8) -> Self {
        Self {
            id,
            name: name.into(),
            length,
            cycle_time_ms: None,
            signals: Vec::new(),
        }
    }

    pub fn with_cycle_time(mut self, cycle_time_ms: u32) -> Self {
        self.cycle_time_ms = Some(cycle_time_ms);
        self
    }

    pub fn with_signal(mut self, signal: SignalDefinition) -> Self {
        self.signals.push(signal);
        self
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDefinition> {
        self.signals.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimals() {
        assert_eq!(SignalDefinition::unsigned("a", 0, 8).decimals(), 0);
        assert_eq!(
            SignalDefinition::unsigned("a", 0, 8).scaled(0.1, 0.0).decimals(),
            1
        );
        assert_eq!(
            SignalDefinition::unsigned("a", 0, 8).scaled(1.0, -40.0).decimals(),
            0
        );
        assert_eq!(
            SignalDefinition::unsigned("a", 0, 8).scaled(1.0, 0.5).decimals(),
            1
        );
        assert_eq!(SignalDefinition::float32("f", 0).decimals(), 3);
    }

    #[test]
    fn test_message_builder() {
        let msg = MessageDefinition::new(0x200, "Body", 4)
            .with_cycle_time(50)
            .with_signal(SignalDefinition::unsigned("Door", 0, 1));
        assert_eq!(msg.cycle_time_ms, Some(50));
        assert!(msg.signal("Door").is_some());
        assert!(msg.signal("Window").is_none());
    }
}
