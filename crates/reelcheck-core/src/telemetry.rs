//! Log output for the `reelcheck` binary.
//!
//! Harness events and captured subprocess output share one subscriber.
//! Child output is logged at DEBUG under [`SUBPROCESS_TARGET`], so
//! `RUST_LOG=reelcheck::subprocess=debug` shows pipeline chatter alone.
//! Everything is written to stderr; stdout carries only the run summary.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Tracing target for captured subprocess output lines.
pub const SUBPROCESS_TARGET: &str = "reelcheck::subprocess";

/// Install the process-wide subscriber.
///
/// `RUST_LOG` wins when set; otherwise events at `level` and above are
/// shown. `json` switches to one JSON object per line. Only the first call
/// in a process installs anything.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let (plain, structured) = if json {
        let layer = fmt::layer().json().with_target(false);
        (None, Some(layer.with_writer(std::io::stderr)))
    } else {
        let layer = fmt::layer().with_target(false);
        (Some(layer.with_writer(std::io::stderr)), None)
    };

    // A second call finds a subscriber already set; that is fine.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .try_init();
}
