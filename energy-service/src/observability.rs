use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. `RUST_LOG` adds to the default of
/// `info` for this crate and the client library.
pub fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["energy_service=info", "energy_client=info"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
