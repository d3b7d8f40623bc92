//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_level`.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_thread_names(true)
        .try_init()
        .is_err()
    {
        tracing::debug!("global tracing subscriber already initialized, skipping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing("debug");
        init_tracing("info");
    }
}
