//! Graceful shutdown coordination: a process-wide signal that every
//! in-flight tool request's cancellation token is derived from.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Coordinates graceful shutdown across the running server.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    notify: Arc<Notify>,
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Creates a coordinator with a fresh root cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self { notify: Arc::new(Notify::new()), token: CancellationToken::new() }
    }

    /// The root token; every tool request derives a child from this.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Triggers shutdown: cancels the root token and wakes any waiter.
    pub fn shutdown(&self) {
        info!("shutdown triggered");
        self.token.cancel();
        self.notify.notify_waiters();
    }

    /// Resolves once [`Self::shutdown`] has been called.
    pub async fn wait_for_shutdown(&self) {
        self.notify.notified().await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns a task that waits for SIGTERM/SIGINT (Ctrl+C/Ctrl+Break on
/// Windows) and triggers shutdown on the returned coordinator.
#[must_use]
pub fn install_signal_handlers() -> ShutdownCoordinator {
    let coordinator = ShutdownCoordinator::new();
    let coordinator_clone = coordinator.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
                _ = sigint.recv() => info!("received SIGINT, initiating graceful shutdown"),
            }
        }

        #[cfg(windows)]
        {
            use tokio::signal::windows;

            let mut ctrl_c = windows::ctrl_c().expect("failed to install Ctrl+C handler");
            let mut ctrl_break = windows::ctrl_break().expect("failed to install Ctrl+Break handler");

            tokio::select! {
                _ = ctrl_c.recv() => info!("received Ctrl+C, initiating graceful shutdown"),
                _ = ctrl_break.recv() => info!("received Ctrl+Break, initiating graceful shutdown"),
            }
        }

        coordinator_clone.shutdown();
    });

    coordinator
}
