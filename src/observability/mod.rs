//! Logging setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` filters as usual; when unset, `LOG_LEVEL` picks the default
/// level for this crate. `LOG_FORMAT=json` switches to line-oriented JSON
/// for log aggregation, anything else stays human-readable.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
        EnvFilter::new(format!("dfsish={level}"))
    });
    let registry = tracing_subscriber::registry().with(filter);

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| is_json(&v));
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_ansi(true))
            .init();
    }
}

fn is_json(format: &str) -> bool {
    format.eq_ignore_ascii_case("json")
}
