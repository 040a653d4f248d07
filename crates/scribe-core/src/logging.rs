//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `filter` is an `EnvFilter` directive string (e.g. `"info"` or
/// `"scribe_server=debug,info"`); the `SCRIBE_LOG` environment variable
/// overrides it when set. With `json` the subscriber emits one JSON object
/// per line for log shipping.
///
/// Safe to call once per process; later calls are ignored.
pub fn init_tracing(filter: &str, json: bool) {
    let filter = EnvFilter::try_from_env("SCRIBE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing("info", false);
        // A second call must not panic.
        init_tracing("debug", true);
    }
}
