use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes logging with `tracing`.
///
/// Uses `INFO` by default; `LIBRARIAN_LOG` takes precedence over
/// `RUST_LOG` when both are set, and `-v`/`-vv`/`-vvv` raises verbosity
/// without needing either variable.
pub fn init(verbosity: Option<LevelFilter>) {
    let env_filter = EnvFilter::try_from_env("LIBRARIAN_LOG").unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(verbosity.unwrap_or(LevelFilter::INFO).into())
            .from_env_lossy()
    });

    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish()
        .init();
}
