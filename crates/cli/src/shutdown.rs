use std::sync::{Arc, OnceLock};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Turns the first SIGINT/SIGTERM into a graceful stop of the running task.
/// A second signal while the task drains exits the process immediately.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    cancel_token: CancellationToken,
    received: Arc<OnceLock<ShutdownSignal>>,
}

impl ShutdownCoordinator {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            cancel_token,
            received: Arc::new(OnceLock::new()),
        }
    }

    pub fn register_handlers(&self) {
        let this = self.clone();

        tokio::spawn(async move {
            let mut signals = Signals::install();

            let first = signals.next().await;
            info!(signal = ?first, "Shutdown requested, stopping the task");
            this.request_shutdown(first);

            let second = signals.next().await;
            warn!(signal = ?second, "Second signal received, exiting without a clean stop");
            std::process::exit(ExitCode::from(second).as_i32());
        });
    }

    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        let _ = self.received.set(signal);
        self.cancel_token.cancel();
    }

    pub fn requested(&self) -> Option<ShutdownSignal> {
        self.received.get().copied()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

struct Signals {
    #[cfg(unix)]
    terminate: Option<signal::unix::Signal>,
}

impl Signals {
    #[cfg(unix)]
    fn install() -> Self {
        let terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(|e| error!(error = %e, "Failed to install SIGTERM handler"))
            .ok();
        Self { terminate }
    }

    #[cfg(not(unix))]
    fn install() -> Self {
        Self {}
    }

    async fn next(&mut self) -> ShutdownSignal {
        let interrupt = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match self.terminate.as_mut() {
                Some(sigterm) => {
                    sigterm.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = interrupt => ShutdownSignal::Interrupt,
            _ = terminate => ShutdownSignal::Terminate,
        }
    }
}

/// Exit codes for the CLI application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    Interrupted = 130,
    Terminated = 143,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<ShutdownSignal> for ExitCode {
    fn from(signal: ShutdownSignal) -> Self {
        match signal {
            ShutdownSignal::Interrupt => ExitCode::Interrupted,
            ShutdownSignal::Terminate => ExitCode::Terminated,
        }
    }
}
