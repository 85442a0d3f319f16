use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::protocol::messages::Usage;

/// Map a config log level to an `EnvFilter` directive.
///
/// - "DISABLED" -> `None`
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
#[must_use]
pub fn filter_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Install a `fmt` subscriber filtered at the configured log level.
///
/// Returns `false` when logging is disabled or another global subscriber is
/// already installed.
pub fn init_tracing(log_level: &str) -> bool {
    let Some(directive) = filter_directive(log_level) else {
        return false;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok()
}

/// Log token usage for a completed message at INFO level.
pub fn log_message_usage(model: &str, usage: &Usage, duration: Duration) {
    tracing::info!(
        model = model,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        total_tokens = usage.input_tokens.saturating_add(usage.output_tokens),
        duration_seconds = duration.as_secs_f64(),
        "message completed"
    );
}
