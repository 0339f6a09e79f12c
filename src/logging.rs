//! Tracing subscriber setup for the binary.
//!
//! `RUST_LOG` takes precedence; otherwise the filter is
//! [`DEFAULT_FILTER`], or [`VERBOSE_FILTER`] with `--verbose`. Events go to
//! stderr so that command output on stdout stays machine-readable.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "rag_qa=info,tower_http=info";
pub const VERBOSE_FILTER: &str = "rag_qa=debug,tower_http=debug";

pub fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {e}"))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    Ok(())
}
