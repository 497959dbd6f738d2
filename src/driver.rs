//! Poll loop that owns one processor.
//!
//! Each driver cycles through `Running → Polling → Processing → Running` until its
//! shutdown token is cancelled, then passes through `Stopping` to `Stopped`.
//!
//! - A failed poll is logged and retried after a fixed back-off. A batch in
//!   which a message failed on broker unavailability backs off the same way.
//! - Messages in a batch are processed one after another; a failure is logged and
//!   leaves that message on the queue without affecting the rest of the batch.
//! - A message is deleted only after it was processed successfully. A failed
//!   delete is logged and never retried: the broker will redeliver and the
//!   handlers tolerate duplicates.
//! - Cancellation is observed between iterations and while waiting for
//!   messages; an in-flight batch always runs to completion.

use std::{sync::Arc, time::Duration};

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use url::Url;

use crate::{
    error::Error,
    queue::{QueueClient, ReceiveOptions, ReceivedMessage},
    trigger::TriggerProcessor,
};

/// Delay after a failed poll before polling again.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Handles a single received message.
pub trait MessageProcessor: Send + Sync + 'static {
    fn process<'a>(&'a self, message: &'a ReceivedMessage) -> BoxFuture<'a, Result<(), Error>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    Polling,
    Processing { batch: usize },
    Stopping,
    Stopped,
}

/// Where a driver gets its messages from.
pub enum Intake {
    /// Long-poll a queue; processed messages are deleted from it.
    Queue {
        client: Arc<dyn QueueClient>,
        queue: Url,
        options: ReceiveOptions,
    },
    /// Manufacture one trigger per interval. Nothing is deleted.
    Synthetic { interval: Duration },
}

impl Intake {
    fn describe(&self) -> String {
        match self {
            Self::Queue { queue, .. } => queue.to_string(),
            Self::Synthetic { interval } => format!("synthetic every {interval:?}"),
        }
    }
}

/// Outcome of one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Failures caused by broker unavailability rather than the message itself.
    pub transient: usize,
}

pub struct Driver {
    name: String,
    intake: Intake,
    processor: Arc<dyn MessageProcessor>,
    error_backoff: Duration,
    state: watch::Sender<DriverState>,
}

#[bon::bon]
impl Driver {
    #[builder]
    pub fn new(
        #[builder(into)] name: String,
        intake: Intake,
        processor: Arc<dyn MessageProcessor>,
        #[builder(default = DEFAULT_ERROR_BACKOFF)] error_backoff: Duration,
    ) -> Self {
        let (state, _) = watch::channel(DriverState::Running);
        Self {
            name,
            intake,
            processor,
            error_backoff,
            state,
        }
    }
}

impl Driver {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn intake(&self) -> &Intake {
        &self.intake
    }

    /// Observes state transitions.
    pub fn subscribe(&self) -> watch::Receiver<DriverState> {
        self.state.subscribe()
    }

    fn transition(&self, next: DriverState) {
        trace!(state = ?next, "Driver state transition");
        self.state.send_replace(next);
    }

    async fn poll(&self, first: bool) -> Result<Vec<ReceivedMessage>, Error> {
        match &self.intake {
            Intake::Queue {
                client,
                queue,
                options,
            } => client.receive(queue, *options).await,
            Intake::Synthetic { interval } => {
                if !first {
                    tokio::time::sleep(*interval).await;
                }
                Ok(vec![TriggerProcessor::synthesize()?])
            }
        }
    }

    async fn acknowledge(&self, message: &ReceivedMessage) {
        let Intake::Queue { client, queue, .. } = &self.intake else {
            return;
        };

        match client.delete(queue, &message.receipt_handle).await {
            Ok(()) => debug!("Deleted message"),
            Err(error) => warn!(
                %error,
                detail = ?error.detail(),
                "Failed to delete message, it may be delivered again"
            ),
        }
    }

    /// Processes every message in `batch`, one at a time.
    pub async fn process_batch(&self, batch: Vec<ReceivedMessage>) -> BatchReport {
        let mut report = BatchReport::default();

        for message in batch {
            let span = info_span!(
                "message",
                message.id = %message.message_id,
                receive_count = message.receive_count
            );

            async {
                match self.processor.process(&message).await {
                    Ok(()) => {
                        self.acknowledge(&message).await;
                        report.succeeded += 1;
                    }
                    Err(error) => {
                        error!(
                            %error,
                            detail = ?error.detail(),
                            transient = error.is_transient(),
                            "Failed to process message, leaving it for redelivery"
                        );
                        report.failed += 1;
                        if error.is_transient() {
                            report.transient += 1;
                        }
                    }
                }
            }
            .instrument(span)
            .await;
        }

        report
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let span = info_span!("processor", processor.name = %self.name);

        async {
            info!(intake = %self.intake.describe(), "Starting processor");

            let mut first = true;

            loop {
                self.transition(DriverState::Running);

                if shutdown.is_cancelled() {
                    break;
                }

                self.transition(DriverState::Polling);

                let polled = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    polled = self.poll(first) => polled,
                };
                first = false;

                let batch = match polled {
                    Ok(batch) => batch,
                    Err(error) => {
                        error!(
                            %error,
                            detail = ?error.detail(),
                            backoff = ?self.error_backoff,
                            "Failed to poll for messages"
                        );

                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(self.error_backoff) => continue,
                        }
                    }
                };

                if batch.is_empty() {
                    trace!("No messages received");
                    continue;
                }

                self.transition(DriverState::Processing { batch: batch.len() });

                let report = self.process_batch(batch).await;
                debug!(
                    succeeded = report.succeeded,
                    failed = report.failed,
                    transient = report.transient,
                    "Processed batch"
                );

                if report.transient > 0 {
                    warn!(
                        backoff = ?self.error_backoff,
                        "Broker unavailable while processing batch, backing off"
                    );

                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }

            self.transition(DriverState::Stopping);
            info!("Processor stopping");
            self.transition(DriverState::Stopped);
        }
        .instrument(span)
        .await
    }
}
