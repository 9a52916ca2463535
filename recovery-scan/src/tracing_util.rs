use anyhow::Result;
use std::str::FromStr;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Output formats for logging messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Standard, human readable format.
    Raw,
    /// JSON, machine readable format.
    Json,
}

/// Initialize tracing and enable logging messages according to these options.
///
/// Logs go to `stderr`, `stdout` is reserved for the scan report.
pub fn init(level_filter: LevelFilter, format: Format) -> Result<()> {
    let is_terminal = atty::is(atty::Stream::Stderr);
    let terminal_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(is_terminal)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    let env_filtered = env_filter(level_filter)?;

    let final_terminal_layer = match format {
        Format::Json => terminal_layer.json().with_filter(env_filtered).boxed(),
        Format::Raw => terminal_layer.with_filter(env_filtered).boxed(),
    };

    tracing_subscriber::registry()
        .with(final_terminal_layer)
        .try_init()?;

    tracing::debug!(%level_filter, "Initialized tracing");

    Ok(())
}

/// This function controls which crate's logs actually get logged and from which level.
fn env_filter(level_filter: LevelFilter) -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env()
        .add_directive(Directive::from_str(&format!(
            "recovery_scan={}",
            &level_filter
        ))?)
        .add_directive(Directive::from_str(&format!(
            "electrum_pool={}",
            &level_filter
        ))?)
        .add_directive(Directive::from_str("electrum_client=warn")?))
}
