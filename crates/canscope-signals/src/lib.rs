//! canscope-signals - Signal database for frame payloads
//!
//! Decodes raw frame payloads into physical signal values and encodes them
//! back, implementing the [`SignalCodec`](canscope_core::SignalCodec)
//! contract the pipeline consumes.
//!
//! Definitions are registered programmatically; loading definition files is
//! left to whoever owns the database.
//!
//! # Quick Start
//!
//! ```rust
//! use canscope_core::SignalCodec;
//! use canscope_signals::{MessageDefinition, SignalDatabase, SignalDefinition};
//!
//! let db = SignalDatabase::new();
//! db.register(
//!     MessageDefinition::new(0x100, "EngineData", 8)
//!         .with_cycle_time(100)
//!         .with_signal(SignalDefinition::unsigned("EngineSpeed", 0, 16).scaled(0.25, 0.0).with_unit("rpm"))
//!         .with_signal(SignalDefinition::unsigned("CoolantTemp", 16, 8).scaled(1.0, -40.0).with_unit("°C")),
//! );
//!
//! let signals = db.decode(0x100, &[0xB8, 0x0B, 0x84, 0, 0, 0, 0, 0]);
//! assert_eq!(signals[0].display_value(), "750.00");
//! assert_eq!(signals[1].display_value(), "92");
//! ```

pub mod bits;
pub mod database;
pub mod definition;
pub mod error;
pub mod precision;
pub mod types;

pub use database::SignalDatabase;
pub use definition::{MessageDefinition, SignalDefinition};
pub use error::{ConvError, ConvResult};
pub use precision::{precision_from_scale, round_for_scale};
pub use types::{ByteOrder, ValueType};
