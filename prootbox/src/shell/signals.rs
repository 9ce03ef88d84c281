use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Turn the first SIGINT or SIGTERM into `token.cancel()`.
///
/// Both handlers are installed before this returns, so a signal that arrives
/// right after is already caught. Installing them replaces the default
/// "terminate" disposition, and the launcher survives the interrupt long
/// enough to stop the child and clean up. Must be called from within the
/// runtime. Abort the returned task once the run is over.
pub fn forward_interrupts(token: CancellationToken) -> JoinHandle<()> {
    let mut interrupt = listen(SignalKind::interrupt(), "SIGINT");
    let mut terminate = listen(SignalKind::terminate(), "SIGTERM");

    tokio::spawn(async move {
        let reason = tokio::select! {
            _ = recv(&mut interrupt) => "SIGINT",
            _ = recv(&mut terminate) => "SIGTERM",
            _ = token.cancelled() => return,
        };

        tracing::info!("Received {}, stopping sandbox", reason);
        token.cancel();
    })
}

fn listen(kind: SignalKind, name: &str) -> Option<Signal> {
    signal(kind)
        .inspect_err(|e| tracing::warn!("Failed to listen for {}: {}", name, e))
        .ok()
}

/// Completes on the next delivery; never, without a listener.
async fn recv(listener: &mut Option<Signal>) {
    if let Some(listener) = listener
        && listener.recv().await.is_some()
    {
        return;
    }
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_forwarder_stops_when_token_is_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let handle = forward_interrupts(token.clone());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("forwarder exits")
            .unwrap();
    }

    #[tokio::test]
    async fn test_signal_right_after_install_cancels_token() {
        let token = CancellationToken::new();
        let handle = forward_interrupts(token.clone());

        // No yield in between: the forwarding task has not been polled yet.
        // SAFETY: signalling our own process.
        unsafe {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }

        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("SIGTERM should cancel the token");
        handle.await.unwrap();
    }
}
