//! Process shutdown: signal handling and the bounded grace period.

use std::time::Duration;

use futures_util::future::join_all;
use tokio::{
    signal::{
        ctrl_c,
        unix::{signal, SignalKind},
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels `token` on SIGTERM or Ctrl-C.
pub fn listen(token: CancellationToken) -> eyre::Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = ctrl_c() => info!("Received Ctrl-C"),
            _ = token.cancelled() => return,
        }

        info!("Received shutdown signal!");
        token.cancel();
    }))
}

/// How the running tasks ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Every task returned on its own.
    Graceful,
    /// The grace period elapsed and the remaining tasks were aborted.
    Forced,
}

/// Handle to the spawned processor tasks.
#[derive(Debug)]
pub struct RunHandle {
    handles: Vec<JoinHandle<()>>,
}

impl RunHandle {
    pub fn new(handles: Vec<JoinHandle<()>>) -> Self {
        Self { handles }
    }

    /// Waits for the tasks to finish. Once `token` is cancelled they get `grace`
    /// to wind down before being aborted.
    pub async fn wait_for_shutdown(self, token: &CancellationToken, grace: Duration) -> Exit {
        let aborts: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();

        let mut joined = std::pin::pin!(join_all(self.handles));

        let finished = tokio::select! {
            results = &mut joined => Some(results),
            _ = token.cancelled() => None,
        };

        let results = match finished {
            Some(results) => results,
            None => {
                info!(?grace, "Waiting for processors to finish in-flight work");

                match tokio::time::timeout(grace, &mut joined).await {
                    Ok(results) => results,
                    Err(_) => {
                        warn!("Grace period elapsed, aborting processors");
                        for abort in aborts {
                            abort.abort();
                        }
                        return Exit::Forced;
                    }
                }
            }
        };

        for result in results {
            if let Err(error) = result {
                warn!(%error, "Processor task panicked");
            }
        }

        Exit::Graceful
    }
}
