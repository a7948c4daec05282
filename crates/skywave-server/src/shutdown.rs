/// Resolves once the process is asked to stop. Wired into axum's
/// graceful shutdown; the workers are torn down by `main` after the
/// listener drains.
pub async fn shutdown_signal() {
    let signal = wait_for_signal().await;
    tracing::info!(signal, "shutdown requested");
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let terminate = async {
        match sigterm.as_mut() {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = ?e, "ctrl-c handler unavailable; running until killed");
                std::future::pending::<()>().await;
            }
            "interrupt"
        }
        _ = terminate => "terminate",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?e, "ctrl-c handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
    "interrupt"
}
