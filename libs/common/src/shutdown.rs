//! Graceful shutdown utilities
//!
//! Signal handling for the gateway: SIGINT/SIGTERM are turned into a
//! cancellation of the shared [`CancellationToken`].

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Signal that ended the wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix)
///
/// - On Unix: Ctrl+C (SIGINT) or SIGTERM
/// - On Windows: Ctrl+C only
pub async fn wait_for_shutdown() -> ShutdownSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Service will only respond to Ctrl+C",
                    e
                );
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
            _ = async {
                if let Some(mut sig) = term_signal {
                    sig.recv().await;
                } else {
                    // Only Ctrl+C can end the wait
                    std::future::pending::<()>().await
                }
            } => ShutdownSignal::Terminate,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        ShutdownSignal::Interrupt
    }
}

/// Wait until either a signal arrives or `token` is cancelled elsewhere
///
/// Returns the signal when shutdown was requested from outside, `None` when
/// the token was cancelled internally (e.g. by a fatal polling error).
/// The token is cancelled in both cases.
pub async fn shutdown_on_signal(token: CancellationToken) -> Option<ShutdownSignal> {
    let received = tokio::select! {
        sig = wait_for_shutdown() => Some(sig),
        () = token.cancelled() => None,
    };

    if let Some(sig) = received {
        info!("Shutdown signal received: {:?}", sig);
    }
    token.cancel();
    received
}
