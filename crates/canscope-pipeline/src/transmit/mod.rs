//! Cyclic transmission
//!
//! The [`TxTable`] is the editable side: rows are changed freely and each
//! change requests a new immutable [`TxSnapshot`]. The [`Transmitter`]
//! thread only ever reads snapshots, so the two never share a lock.

mod table;
mod transmitter;

pub use table::{TxItem, TxRow, TxSignal, TxSnapshot, TxTable};
pub use transmitter::Transmitter;
