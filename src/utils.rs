// System
use std::thread;

// Third Party
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use tokio::sync::oneshot;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

/// The namespace watched when none is given on the command line.
pub const DEFAULT_NAMESPACE: &str = "kube-system";
/// Kubeconfig location tried before falling back to the client's own inference.
pub const DEFAULT_KUBECONFIG: &str = "~/.kube/config";

/// Installs a fmt subscriber writing to stderr, so stdout only carries service lines.
/// `RUST_LOG` wins over the given default level.
pub fn init_tracing(crate_name: &str, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(crate_name, level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn default_directive(crate_name: &str, level: Level) -> String {
    format!(
        "{}={}",
        crate_name.replace('-', "_"),
        level.to_string().to_lowercase()
    )
}

/// Listens for SIGINT and SIGTERM on a dedicated thread. The returned receiver completes with
/// the number of the first signal delivered.
pub fn setup_exit_hooks() -> Result<oneshot::Receiver<i32>, anyhow::Error> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let (tx, rx) = oneshot::channel();
    thread::Builder::new()
        .name("exit-hooks".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                debug!("Received signal {}", signal);
                // The receiver is gone if main already returned.
                let _ = tx.send(signal);
            }
        })?;
    Ok(rx)
}
