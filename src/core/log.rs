use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// Installs the global subscriber for the `cbstore` binary.
///
/// `RUST_LOG` takes precedence; otherwise `verbose` enables debug output for
/// this crate only.
pub fn init_logging(verbose: bool) {
    let (level_filter, level) = if verbose {
        (LevelFilter::DEBUG, "cbstore=debug")
    } else {
        (LevelFilter::WARN, "warn")
    };
    let store_filter = Targets::new()
        .with_target("cbstore", level_filter)
        .with_default(LevelFilter::WARN);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().pretty().without_time().with_writer(std::io::stderr))
        .with(store_filter)
        .with(env_filter)
        .init();
}
