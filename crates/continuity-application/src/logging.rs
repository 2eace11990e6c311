use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"warn"` or `"continuity_application=debug"`).
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing("warn");
        init_tracing("debug");
        tracing::debug!("still running");
    }
}
