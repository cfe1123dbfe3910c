//! Tracing initialization.
//!
//! Console logging through the `tracing` ecosystem. The filter comes from
//! `RUST_LOG` when set and defaults to `info`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// Safe to call more than once: only the first call installs a subscriber,
/// later calls are no-ops. Embedding services that bring their own
/// subscriber can simply skip this.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}
