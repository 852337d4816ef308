//! Configuration section definitions.

mod output;
mod watch;

pub use output::OutputConfig;
pub use watch::{REFRESH_RATE_RANGE, WatchConfig};
