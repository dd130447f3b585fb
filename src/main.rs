use std::io::Write;
use std::sync::Arc;

use turnstream::config::{load_config, AppConfig};
use turnstream::error::TurnFailure;
use turnstream::observability::init_tracing;
use turnstream::turn::{AssembledMessage, TurnController, TurnOutcome, TurnSink};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

struct Args {
    config_path: String,
    message: String,
}

fn parse_args() -> Result<Args, String> {
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config_path = args
                    .next()
                    .ok_or_else(|| "--config requires a path".to_string())?;
            }
            _ => words.push(arg),
        }
    }
    if words.is_empty() {
        return Err("usage: turnstream [--config <path>] <message...>".to_string());
    }
    Ok(Args {
        config_path,
        message: words.join(" "),
    })
}

/// Prints session titles to stderr; the message itself is printed by `main`.
struct ConsoleSink;

impl TurnSink for ConsoleSink {
    fn message_finalized(&self, message: &AssembledMessage) {
        tracing::debug!(message_id = %message.id, "message received");
    }

    fn turn_failed(&self, failure: &TurnFailure) {
        tracing::debug!(class = ?failure.class, raw = %failure.raw, "turn failure received");
    }

    fn title_updated(&self, title: &str) {
        eprintln!("== {title} ==");
    }
}

fn main() {
    let args = parse_args().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(2);
    });

    let config = load_config(&args.config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level, config.features.log_json);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    let code = runtime.block_on(run(config, args.message));
    std::process::exit(code);
}

async fn run(config: AppConfig, message: String) -> i32 {
    let controller = match TurnController::from_config(&config, Arc::new(ConsoleSink)) {
        Ok(controller) => Arc::new(controller),
        Err(err) => {
            eprintln!("Failed to start: {err}");
            return 1;
        }
    };

    let mut stages = controller.subscribe_stage();
    let watcher = tokio::spawn(async move {
        while stages.changed().await.is_ok() {
            let stage = *stages.borrow_and_update();
            if let Some(stage) = stage {
                eprintln!("[{stage}]");
            }
        }
    });

    tracing::info!(
        endpoint = %config.endpoint.url,
        session_id = %controller.session_id(),
        animation = %controller.display().animation(),
        "sending turn"
    );

    let outcome = tokio::select! {
        outcome = controller.send(&message) => outcome,
        _ = tokio::signal::ctrl_c() => {
            controller.cancel();
            TurnOutcome::Cancelled
        }
    };
    watcher.abort();

    match outcome {
        TurnOutcome::Completed(message) => {
            let mut stdout = std::io::stdout().lock();
            if let Some(thinking) = message.thinking_trace.as_deref() {
                let _ = writeln!(stdout, "<thinking>\n{thinking}\n</thinking>\n");
            }
            for call in &message.tool_calls {
                let _ = writeln!(stdout, "[tool {} {:?}] {}", call.name, call.status, call.arguments);
            }
            let _ = writeln!(stdout, "{}", message.visible_content);
            0
        }
        TurnOutcome::Failed(failure) => {
            eprintln!("Error: {}", failure.message);
            1
        }
        TurnOutcome::Cancelled | TurnOutcome::Superseded => {
            eprintln!("Cancelled");
            130
        }
    }
}
