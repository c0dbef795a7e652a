//! Tracing setup shared by every binary and test harness in the workspace.

use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` is used
/// (for example `"services=debug,remote=info"`). Calling this twice returns an
/// error instead of replacing the first subscriber.
pub fn init_tracing(default_directive: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_rejected() {
        assert!(init_tracing("info").is_ok());
        assert!(init_tracing("debug").is_err());
        tracing::info!("tracing initialised");
    }
}
