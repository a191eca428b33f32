use std::env;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::{MakeWriter, fmt};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, Logging};

fn get_rust_log(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN",
        LevelFilter::INFO => "INFO",
        LevelFilter::DEBUG => "INFO,memofs=DEBUG",
        LevelFilter::TRACE => "INFO,memofs=TRACE",
    }
}

/// Installs a global subscriber that writes memofs logs to stdout.
///
/// This considers the `RUST_LOG` environment variable and defaults it to the level specified in
/// the configuration.
///
/// Returns `false` if a global subscriber was already installed, in which case the existing one
/// is kept.
pub fn init_logging(config: &Logging) -> bool {
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| get_rust_log(config.level).to_string());

    let layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true);

    let fmt_layer = match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Simplified => layer.compact().with_ansi(false).boxed(),
        LogFormat::Json => return init_json_logging(&rust_log, std::io::stdout),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(EnvFilter::new(&rust_log)))
        .try_init()
        .is_ok()
}

/// Installs a subscriber writing one JSON object per event.
pub fn init_json_logging<W>(env_filter: &str, make_writer: W) -> bool
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(env_filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(make_writer)
        .finish()
        .try_init()
        .is_ok()
}
