//! Command-line interface module.

mod args;
pub mod convert;
pub mod inspect;
pub mod watch;

pub use args::{Cli, Commands};
