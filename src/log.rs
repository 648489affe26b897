use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Level picked by `-v` count, or `None` to keep the configured one.
pub fn verbosity(count: u8) -> Option<Level> {
    match count {
        0 => None,
        1 => Some(Level::INFO),
        2 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

pub fn directives(level: &str) -> String {
    format!("rtp2ivf={level},ivfwriter={level},webrtc=error")
}

/// `RUST_LOG` wins over the filter built from config and flags.
pub fn set(env_filter: String) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(env_filter)))
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true)
        .init();
}
