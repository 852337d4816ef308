//! Core types shared across the codebase.

mod role;
mod state;

pub use role::Role;
pub use state::{is_shutdown, register_shutdown, setup_shutdown_handler};
