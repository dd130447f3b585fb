pub mod token_counter;

use crate::turn::AssembledMessage;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// `json` switches the formatter to one JSON object per line.
pub fn init_tracing(log_level: &str, json: bool) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Log usage and stage timings for a finalized turn.
pub fn log_turn_complete(message: &AssembledMessage) {
    let metrics = &message.pipeline_metrics;
    token_counter::log_turn_usage(
        message.model_used.as_deref().unwrap_or("unknown"),
        &metrics.usage,
        std::time::Duration::from_millis(metrics.elapsed_ms),
    );
    tracing::debug!(
        message_id = %message.id,
        tool_calls = message.tool_calls.len(),
        tool_rounds = metrics.tool_rounds,
        stage_durations_ms = ?metrics.stage_durations_ms.0,
        "turn stage timings"
    );
}
