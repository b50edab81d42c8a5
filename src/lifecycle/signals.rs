//! OS signal handling.
//!
//! # Responsibilities
//! - SIGTERM/SIGINT → graceful shutdown
//! - SIGHUP → definition reload, never shutdown

use tokio::sync::broadcast;

use crate::definitions::{ReloadReason, ReloadTrigger};

/// Resolve when the process is asked to stop.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

/// Request a reload on every SIGHUP until shutdown.
pub async fn reload_on_sighup(trigger: ReloadTrigger, mut shutdown: broadcast::Receiver<()>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "SIGHUP reload unavailable");
                let _ = shutdown.recv().await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    tracing::info!("SIGHUP received");
                    trigger.request(ReloadReason::Signal);
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = trigger;
        let _ = shutdown.recv().await;
    }
}
