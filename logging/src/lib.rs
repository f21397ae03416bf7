#![cfg_attr(test, allow(clippy::unwrap_used))]

mod err_with_sources;

use anyhow::{Context, Result};
use tracing::subscriber::DefaultGuard;
use tracing_log::LogTracer;
use tracing_subscriber::{filter::ParseError, util::SubscriberInitExt, EnvFilter};

pub use err_with_sources::{err_with_src, ErrorWithSources};

/// Registers the global subscriber for a NetHawk binary.
///
/// `RUST_LOG` always wins. Without it, `--debug` enables debug logs for
/// everything, `--verbose` enables debug logs for our own crates, and the
/// default only shows info and up.
pub fn setup_global_subscriber(verbose: bool, debug: bool) -> Result<()> {
    let directives = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => directives,
        _ if debug => "debug".to_owned(),
        _ if verbose => "info,nethawk=debug".to_owned(),
        _ => "info".to_owned(),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(try_filter(&directives).context("Failed to parse log directives")?)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Could not set global default subscriber")?;
    LogTracer::init().context("Failed to init LogTracer")?;

    Ok(())
}

/// Constructs an opinionated [`EnvFilter`] with some crates already silenced.
///
/// A catch-all directive like `debug` floods the output with connection-pool
/// chatter from `hyper`, `reqwest` and the MongoDB driver. Prepending these
/// directives keeps a plain `debug` useful; restating a crate with a lower
/// filter re-enables it.
pub fn try_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    const IRRELEVANT_CRATES: &str = "hyper_util=warn,hyper=warn,reqwest=warn,rustls=warn,mongodb=warn,hickory_proto=warn";

    if directives.is_empty() {
        return EnvFilter::try_new(IRRELEVANT_CRATES);
    }

    EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))
}

/// Initialises a logger to be used in tests.
pub fn test(directives: &str) -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}
