use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,hyper=warn,hyper_util=warn,reqwest=warn,tungstenite=warn";
const LOG_FILE: &str = "controlroom.log";

pub struct LoggingHandle {
    pub guard: WorkerGuard,
}

/// First non-empty of `CONTROLROOM_LOG_FILTER`, `RUST_LOG`, default.
fn filter_directive(own: Option<String>, rust_log: Option<String>) -> String {
    own.filter(|value| !value.trim().is_empty())
        .or_else(|| rust_log.filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

fn wants_pretty(format: Option<&str>) -> bool {
    format.is_some_and(|format| format.eq_ignore_ascii_case("pretty"))
}

/// Log to `<log_dir>/controlroom.log` only; the terminal belongs to the UI.
pub fn init_logging(log_dir: &Path) -> anyhow::Result<LoggingHandle> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE);

    let directive = filter_directive(
        std::env::var("CONTROLROOM_LOG_FILTER").ok(),
        std::env::var("RUST_LOG").ok(),
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let pretty = wants_pretty(std::env::var("CONTROLROOM_LOG_FORMAT").ok().as_deref());

    let registry = tracing_subscriber::registry().with(filter);
    if pretty {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()?;
    }

    let format_name = if pretty { "pretty" } else { "json" };
    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_path.display(),
        format = format_name,
        filter = %directive,
        pid = std::process::id(),
    );

    Ok(LoggingHandle { guard })
}
