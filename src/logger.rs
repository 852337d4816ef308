//! Logging utilities with colored, timestamped output.
//!
//! This module provides:
//! - `log!` macro for formatted terminal output with colored prefixes
//! - `debug!` macro for output that only appears with `--verbose`
//! - `status_success` / `status_error` for conversion results
//!
//! Every line is prefixed with a local `[HH:MM:SS.mmm]` timestamp.
//!
//! # Example
//!
//! ```ignore
//! log!("watch"; "paint source set to {}", path.display());
//! status_success("paint refreshed");
//! status_error("spec map failed", &err.to_string());
//! ```

use owo_colors::OwoColorize;
use std::{
    io::{Write, stdout},
    sync::atomic::{AtomicBool, Ordering},
};

/// Global verbose flag (set by --verbose CLI argument)
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Set verbose mode globally
pub fn set_verbose(v: bool) {
    VERBOSE.store(v, Ordering::SeqCst);
}

/// Check if verbose mode is enabled
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}

// ============================================================================
// Log Macro
// ============================================================================

/// Log a message with a colored module prefix
///
/// # Usage
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Log a debug message (only shown when --verbose is enabled)
///
/// # Usage
/// ```ignore
/// debug!("module"; "debug info: {}", value);
/// ```
#[macro_export]
macro_rules! debug {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::is_verbose() {
            $crate::logger::log($module, &format!($($arg)*))
        }
    }};
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Log a message with a colored module prefix.
///
/// Write errors are ignored: logging never fails the caller.
#[inline]
pub fn log(module: &str, message: &str) {
    let module_lower = module.to_ascii_lowercase();
    let prefix = colorize_prefix(module, &module_lower);
    let timestamp = timestamp().dimmed().to_string();

    let mut stdout = stdout().lock();
    writeln!(stdout, "{timestamp} {prefix} {message}").ok();
    stdout.flush().ok();
}

/// Apply color to a module prefix based on module type
#[inline]
fn colorize_prefix(module: &str, module_lower: &str) -> String {
    let prefix = format!("[{module}]");
    match module_lower {
        "paint" => prefix.bright_blue().bold().to_string(),
        "spec" => prefix.bright_magenta().bold().to_string(),
        "watch" => prefix.bright_green().bold().to_string(),
        "error" => prefix.bright_red().bold().to_string(),
        _ => prefix.bright_yellow().bold().to_string(),
    }
}

/// Current local time formatted as `[HH:MM:SS.mmm]`.
fn timestamp() -> String {
    format!("[{}]", chrono::Local::now().format("%H:%M:%S%.3f"))
}

// ============================================================================
// Conversion status lines
// ============================================================================

/// Print a success line (✓ prefix, green).
pub fn status_success(message: &str) {
    status_line(&format!("{}", "✓".green()), message);
}

/// Print an error line (✗ prefix, red) with optional detail.
pub fn status_error(summary: &str, detail: &str) {
    let message = if detail.is_empty() {
        summary.to_string()
    } else {
        format!("{summary}: {detail}")
    };
    status_line(&format!("{}", "✗".red()), &message);
}

/// Print a warning line (⚠ prefix, yellow).
pub fn status_warning(detail: &str) {
    status_line(&format!("{}", "⚠".yellow()), detail);
}

fn status_line(symbol: &str, message: &str) {
    let timestamp = timestamp().dimmed().to_string();
    let mut stdout = stdout().lock();
    writeln!(stdout, "{timestamp} {symbol} {message}").ok();
    stdout.flush().ok();
}

// ============================================================================
// Tests
// ============================================================================
