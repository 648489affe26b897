use std::path::PathBuf;

use tracing::{debug, error, warn};

pub async fn shutdown_signal() {
    let str = wait_for_stop_signal().await;
    debug!("Received signal: {}", str);
}

/// Waits for SIGTERM or SIGINT.
#[cfg(unix)]
async fn wait_for_stop_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut interrupt) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(terminate), Ok(interrupt)) => (terminate, interrupt),
            (Err(err), _) | (_, Err(err)) => {
                warn!("cannot install signal handlers: {}, falling back to ctrl-c", err);
                return ctrl_c().await;
            }
        };

    tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "CTRL_C",
        Err(err) => {
            // Without any handler the only way out is the process being killed.
            error!("cannot listen for ctrl-c: {}", err);
            std::future::pending().await
        }
    }
}

/// Read `{name}.toml` (or `path`), then `/etc/{name}/{name}.toml`, else defaults.
pub fn load<T>(name: String, path: Option<PathBuf>) -> T
where
    T: serde::de::DeserializeOwned + std::default::Default,
{
    use std::fs::read_to_string;
    let result = read_to_string(path.unwrap_or(PathBuf::from(format!("{name}.toml"))))
        .or(read_to_string(format!("/etc/{name}/{name}.toml")))
        .unwrap_or("".to_string());
    match toml::from_str(result.as_str()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("config load error: {}", err);
            Default::default()
        }
    }
}
