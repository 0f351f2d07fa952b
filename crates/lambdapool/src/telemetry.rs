//! Structured logging setup shared by the CLI and the agent binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Set to `json` to emit one JSON object per event.
pub const ENV_LOG_FORMAT: &str = "LAMBDAPOOL_LOG_FORMAT";

/// Installs the global subscriber, writing to stderr.
///
/// `RUST_LOG` overrides `default_filter`. Output is JSON when `force_json` is
/// set or `LAMBDAPOOL_LOG_FORMAT=json`. Calling this twice is a no-op.
pub fn init_tracing(default_filter: &str, force_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let json = force_json || wants_json(std::env::var(ENV_LOG_FORMAT).ok().as_deref());
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn wants_json(format: Option<&str>) -> bool {
    format.is_some_and(|format| format.trim().eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_format_is_opt_in() {
        assert!(wants_json(Some("json")));
        assert!(wants_json(Some(" JSON ")));
        assert!(!wants_json(Some("text")));
        assert!(!wants_json(None));
    }

    #[test]
    fn second_init_is_harmless() {
        init_tracing("warn", false);
        init_tracing("warn", true);
    }
}
