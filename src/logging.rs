use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

pub fn setup_tracing(verbosity_level: u8) {
    let filter = match verbosity_level {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(filter.into())
                .from_env_lossy(),
        )
        .init();
}
