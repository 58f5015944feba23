use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Install the global subscriber: `RUST_LOG` filters (default `info`),
/// `RUST_LOG_MODE=json` switches from pretty to JSON output.
pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(filter);
    let fmt = tracing_subscriber::fmt::layer().with_thread_names(true);

    if std::env::var("RUST_LOG_MODE").as_deref() == Ok("json") {
        registry.with(fmt.json().with_target(false)).init();
    } else {
        registry.with(fmt.pretty().with_target(true)).init();
    }
}
