//! Rolling signal plots
//!
//! The [`PlotStore`] keeps one time-bounded [`PlotBuffer`] per plotted
//! signal. Display series are downsampled with [`lttb`] once they grow past
//! the display cap.

mod buffer;
mod lttb;
mod store;

pub use buffer::{PlotBuffer, Series, SignalKey};
pub use lttb::lttb;
pub use store::PlotStore;
