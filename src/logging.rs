use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

const LOG_ENV: &str = "REGIONAL_SYNC_LOG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Pick the filter directive: `REGIONAL_SYNC_LOG`, then `RUST_LOG`, then `default_level`.
pub fn resolve_filter(
    custom: Option<&str>,
    rust_log: Option<&str>,
    default_level: &str,
) -> EnvFilter {
    let non_blank = |d: &&str| !d.trim().is_empty();
    let directive = custom
        .filter(non_blank)
        .or(rust_log.filter(non_blank))
        .unwrap_or(default_level);

    EnvFilter::try_new(directive).unwrap_or_else(|err| {
        eprintln!("invalid log directive '{directive}' ({err}); falling back to {default_level}");
        EnvFilter::new(default_level)
    })
}

/// Install the global subscriber. Logs go to stderr so stdout stays for command output.
///
/// Calling it twice returns an error from `try_init`.
pub fn init_tracing(default_level: &str, format: LogFormat) -> Result<()> {
    let custom = std::env::var(LOG_ENV).ok();
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = resolve_filter(custom.as_deref(), rust_log.as_deref(), default_level);

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .with_target(false)
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
