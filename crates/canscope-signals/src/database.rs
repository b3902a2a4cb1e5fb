//! Signal database - the container for message definitions
//!
//! Provides lookup by identifier and symbol, and payload conversion.

use std::collections::HashMap;

use canscope_core::{DecodedSignal, SignalCodec, SignalValue};
use parking_lot::RwLock;
use tracing::trace;

use crate::bits;
use crate::definition::{MessageDefinition, SignalDefinition};
use crate::error::{ConvError, ConvResult};
use crate::precision::round_to_precision;
use crate::types::ValueType;

/// Thread-safe store of message definitions
#[derive(Debug, Default)]
pub struct SignalDatabase {
    /// Identifier → definition
    messages: RwLock<HashMap<u32, MessageDefinition>>,
    /// Symbol → identifier
    name_index: RwLock<HashMap<String, u32>>,
}

impl SignalDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a message definition
    pub fn register(&self, message: MessageDefinition) {
        let mut names = self.name_index.write();
        let mut messages = self.messages.write();
        if let Some(old) = messages.get(&message.id) {
            names.remove(&old.name);
        }
        names.insert(message.name.clone(), message.id);
        messages.insert(message.id, message);
    }

    /// Remove a message definition
    pub fn remove(&self, id: u32) -> Option<MessageDefinition> {
        let removed = self.messages.write().remove(&id);
        if let Some(ref msg) = removed {
            self.name_index.write().remove(&msg.name);
        }
        removed
    }

    pub fn get(&self, id: u32) -> Option<MessageDefinition> {
        self.messages.read().get(&id).cloned()
    }

    /// Look up an identifier by message symbol
    pub fn id_by_symbol(&self, symbol: &str) -> Option<u32> {
        self.name_index.read().get(symbol).copied()
    }

    /// All (symbol, identifier) pairs sorted by symbol
    pub fn symbols(&self) -> Vec<(String, u32)> {
        let mut out: Vec<(String, u32)> = self
            .name_index
            .read()
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Decode every signal of a message
    ///
    /// Signals that do not fit into a short payload are left out rather than
    /// failing the whole message.
    pub fn decode_message(&self, id: u32, payload: &[u8]) -> ConvResult<Vec<DecodedSignal>> {
        let messages = self.messages.read();
        let msg = messages.get(&id).ok_or(ConvError::UnknownMessage(id))?;

        let mut out = Vec::with_capacity(msg.signals.len());
        for def in &msg.signals {
            match decode_signal(def, payload) {
                Ok(value) => out.push(DecodedSignal::new(&def.name, value, &def.unit)),
                Err(e) => trace!(id = format!("0x{:X}", id), error = %e, "Signal skipped"),
            }
        }
        Ok(out)
    }

    /// Encode physical values into a payload of the message's length
    ///
    /// Signals missing from `values` take their initial value, or raw zero.
    pub fn encode_message(&self, id: u32, values: &HashMap<String, f64>) -> ConvResult<Vec<u8>> {
        let messages = self.messages.read();
        let msg = messages.get(&id).ok_or(ConvError::UnknownMessage(id))?;

        if let Some(unknown) = values.keys().find(|name| msg.signal(name).is_none()) {
            return Err(ConvError::UnknownSignal {
                id,
                signal: unknown.clone(),
            });
        }

        let mut payload = vec![0u8; msg.length as usize];
        for def in &msg.signals {
            let physical = values
                .get(&def.name)
                .copied()
                .or(def.initial)
                .unwrap_or(def.offset);
            encode_signal(def, physical, &mut payload)?;
        }
        Ok(payload)
    }
}

fn check_layout(def: &SignalDefinition) -> ConvResult<()> {
    if def.length == 0 || def.length > 64 {
        return Err(ConvError::InvalidSignal {
            signal: def.name.clone(),
            reason: format!("bit length {} not in 1..=64", def.length),
        });
    }
    if let Some(required) = def.value_type.required_length() {
        if def.length != required {
            return Err(ConvError::InvalidSignal {
                signal: def.name.clone(),
                reason: format!("{} needs {} bits", def.value_type, required),
            });
        }
    }
    if def.scale == 0.0 {
        return Err(ConvError::InvalidSignal {
            signal: def.name.clone(),
            reason: "scale must not be zero".to_string(),
        });
    }
    Ok(())
}

/// Decode one signal from a payload
pub fn decode_signal(def: &SignalDefinition, payload: &[u8]) -> ConvResult<SignalValue> {
    check_layout(def)?;

    let needed = bits::bytes_needed(def.start_bit, def.length, def.byte_order);
    if payload.len() < needed {
        return Err(ConvError::PayloadTooShort {
            signal: def.name.clone(),
            needed,
            actual: payload.len(),
        });
    }

    let raw = bits::extract(payload, def.start_bit, def.length, def.byte_order);

    if let Some(label) = def.choices.get(&raw) {
        return Ok(SignalValue::Text(label.clone()));
    }

    let numeric = match def.value_type {
        ValueType::Unsigned => raw as f64,
        ValueType::Signed => bits::sign_extend(raw, def.length) as f64,
        ValueType::Float32 => f32::from_bits(raw as u32) as f64,
        ValueType::Float64 => f64::from_bits(raw),
    };

    let decimals = def.decimals();
    let physical = round_to_precision(numeric * def.scale + def.offset, decimals);
    Ok(SignalValue::Number {
        value: physical,
        decimals,
    })
}

/// Encode one physical value into the payload in place
pub fn encode_signal(def: &SignalDefinition, physical: f64, payload: &mut [u8]) -> ConvResult<()> {
    check_layout(def)?;

    if let (Some(min), Some(max)) = (def.min, def.max) {
        if physical < min || physical > max {
            return Err(ConvError::ValueOutOfRange {
                value: physical,
                min,
                max,
            });
        }
    }

    let needed = bits::bytes_needed(def.start_bit, def.length, def.byte_order);
    if payload.len() < needed {
        return Err(ConvError::PayloadTooShort {
            signal: def.name.clone(),
            needed,
            actual: payload.len(),
        });
    }

    let scaled = (physical - def.offset) / def.scale;
    let raw = match def.value_type {
        ValueType::Float32 => (scaled as f32).to_bits() as u64,
        ValueType::Float64 => scaled.to_bits(),
        ValueType::Unsigned => {
            let max = if def.length == 64 {
                u64::MAX as f64
            } else {
                ((1u64 << def.length) - 1) as f64
            };
            let raw = scaled.round();
            if raw < 0.0 || raw > max {
                return Err(out_of_range(def, physical, 0.0, max));
            }
            raw as u64
        }
        ValueType::Signed => {
            let half = 2f64.powi(def.length as i32 - 1);
            let raw = scaled.round();
            if raw < -half || raw > half - 1.0 {
                return Err(out_of_range(def, physical, -half, half - 1.0));
            }
            (raw as i64) as u64
        }
    };

    bits::insert(payload, def.start_bit, def.length, def.byte_order, raw);
    Ok(())
}

fn out_of_range(def: &SignalDefinition, physical: f64, raw_min: f64, raw_max: f64) -> ConvError {
    ConvError::ValueOutOfRange {
        value: physical,
        min: raw_min * def.scale + def.offset,
        max: raw_max * def.scale + def.offset,
    }
}

impl SignalCodec for SignalDatabase {
    fn decode(&self, id: u32, payload: &[u8]) -> Vec<DecodedSignal> {
        self.decode_message(id, payload).unwrap_or_default()
    }

    fn encode(&self, id: u32, values: &HashMap<String, f64>) -> Option<Vec<u8>> {
        match self.encode_message(id, values) {
            Ok(payload) => Some(payload),
            Err(e) => {
                trace!(id = format!("0x{:X}", id), error = %e, "Encode failed");
                None
            }
        }
    }

    fn symbol_for(&self, id: u32) -> String {
        self.messages
            .read()
            .get(&id)
            .map(|m| m.name.clone())
            .unwrap_or_default()
    }

    fn message_info(&self, id: u32) -> Option<(u8, Option<u32>)> {
        self.messages
            .read()
            .get(&id)
            .map(|m| (m.length, m.cycle_time_ms))
    }

    fn signals_for(&self, id: u32) -> Vec<DecodedSignal> {
        let messages = self.messages.read();
        let Some(msg) = messages.get(&id) else {
            return Vec::new();
        };
        msg.signals
            .iter()
            .map(|def| {
                let value = def.initial.unwrap_or(def.offset);
                DecodedSignal::new(
                    &def.name,
                    SignalValue::Number {
                        value,
                        decimals: def.decimals(),
                    },
                    &def.unit,
                )
            })
            .collect()
    }
}
