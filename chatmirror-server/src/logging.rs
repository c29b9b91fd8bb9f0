use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "chatmirror_server=debug,chatmirror_core=info";

/// Installs the global fmt subscriber. `RUST_LOG` takes precedence over the
/// default filter. Calling this more than once leaves the first subscriber in place.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("still logging");
    }
}
