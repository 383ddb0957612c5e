use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set, plus `fusion_backfill=info`.
pub fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(
        "fusion_backfill=info"
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
    );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
