//! Structured logging setup for the engine, using the `tracing` ecosystem.
//!
//! This mirrors how host applications wire up `tracing-subscriber`: formatted output with
//! file/line context, honoring `RUST_LOG` where set and falling back to `info`.

use tracing_subscriber::{EnvFilter, Layer, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global tracing subscriber with formatted output.
///
/// Safe to call once at process startup, before constructing an [`crate::engine::Engine`].
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true)
                .with_level(true)
                .with_filter(filter),
        )
        .init();
}
