//! Graceful shutdown on SIGINT or SIGTERM.

use tokio::signal::unix::SignalKind;

/// Resolves once SIGINT or SIGTERM is received. Registering a signal
/// listener per call is safe: tokio dispatches to every outstanding
/// listener of a given kind, so there's no need for a shared relay here
/// since the server only awaits this once.
pub async fn wait() {
    let mut sig_int =
        tokio::signal::unix::signal(SignalKind::interrupt()).expect("failed to register SIGINT");
    let mut sig_term =
        tokio::signal::unix::signal(SignalKind::terminate()).expect("failed to register SIGTERM");

    tokio::select! {
        _ = sig_int.recv() => tracing::warn!(signal = "SIGINT", "shutting down"),
        _ = sig_term.recv() => tracing::warn!(signal = "SIGTERM", "shutting down"),
    }
}
