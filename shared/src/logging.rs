//! Shared logging utilities for consistent tracing across components

use crate::types::Role;
use chrono::{DateTime, Utc};
use tracing::{error, info};

/// Build the filter directive for a base level
pub fn filter_directive(log_level: Option<&str>) -> String {
    let base_level = log_level.unwrap_or("info");
    format!("switchctl={base_level},shared={base_level}")
}

/// Initialize the tracing subscriber
///
/// `RUST_LOG` wins over `log_level` when it is set. Calling this twice is
/// harmless; the second subscriber is ignored.
pub fn init_tracing(log_level: Option<&str>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(log_level)));

    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Macro for role-aware info logging
#[macro_export]
macro_rules! switch_info {
    ($role:expr, $($arg:tt)*) => {
        tracing::info!(
            role = %$role,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for role-aware warning logging
#[macro_export]
macro_rules! switch_warn {
    ($role:expr, $($arg:tt)*) => {
        tracing::warn!(
            role = %$role,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for role-aware error logging
#[macro_export]
macro_rules! switch_error {
    ($role:expr, $($arg:tt)*) => {
        tracing::error!(
            role = %$role,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for role-aware debug logging
#[macro_export]
macro_rules! switch_debug {
    ($role:expr, $($arg:tt)*) => {
        tracing::debug!(
            role = %$role,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Contextual logging helper for startup messages
pub fn log_startup(role: Role, details: &str) {
    info!(
        role = %role,
        timestamp = format_timestamp(),
        "Starting {}",
        details
    );
}

/// Contextual logging helper for shutdown messages
pub fn log_shutdown(role: Role, reason: &str) {
    info!(
        role = %role,
        timestamp = format_timestamp(),
        "Shutting down: {}",
        reason
    );
}

/// Contextual logging helper for error conditions
pub fn log_error(role: Role, context: &str, error: &dyn std::fmt::Display) {
    error!(
        role = %role,
        timestamp = format_timestamp(),
        error = %error,
        "{} failed: {}",
        context,
        error
    );
}

/// Contextual logging helper for success conditions
pub fn log_success(role: Role, message: &str) {
    info!(
        role = %role,
        timestamp = format_timestamp(),
        "{}",
        message
    );
}
