//! In-memory implementation of the queue client.
//!
//! Behaves like a single SQS region: visibility timeouts hide received messages,
//! every receipt handle invalidates the previous one, and queues with a redrive
//! policy move a message to their dead-letter queue once it has been received
//! `max_receive_count` times without being deleted. Primarily used for testing
//! and local development.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use futures_util::future::BoxFuture;
use tokio::{sync::Notify, time::Instant};
use url::Url;
use uuid::Uuid;

use crate::error::Error;

use super::{check_size, QueueClient, ReceiveOptions, ReceivedMessage, SendReceipt};

/// Moves messages to `dead_letter_queue` after `max_receive_count` receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedrivePolicy {
    pub dead_letter_queue: Url,
    pub max_receive_count: u32,
}

/// Point-in-time view of a message held by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub message_id: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    pub receive_count: u32,
}

struct StoredMessage {
    message_id: String,
    body: String,
    attributes: HashMap<String, String>,
    receive_count: u32,
    visible_at: Instant,
    receipt_handle: Option<String>,
}

#[derive(Default)]
struct QueueState {
    messages: Vec<StoredMessage>,
    redrive: Option<RedrivePolicy>,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<Url, QueueState>>,
    arrivals: Notify,
    receipts: AtomicU64,
    unavailable: AtomicBool,
}

/// Thread-safe in-memory broker. Clones share the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Creates a broker with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<Url, QueueState>> {
        self.inner
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a queue. Creating an existing queue is a no-op.
    pub fn create_queue(&self, queue: &Url) {
        self.queues().entry(queue.clone()).or_default();
    }

    /// Creates a queue whose unacknowledged messages are redriven to a
    /// dead-letter queue. The dead-letter queue is created if missing.
    pub fn create_queue_with_redrive(&self, queue: &Url, redrive: RedrivePolicy) {
        let mut queues = self.queues();
        queues.entry(redrive.dead_letter_queue.clone()).or_default();
        queues.entry(queue.clone()).or_default().redrive = Some(redrive);
    }

    /// Simulates broker unavailability: while set, receive and send fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// All messages currently held by `queue`, visible or not.
    pub fn peek(&self, queue: &Url) -> Vec<QueuedMessage> {
        self.queues()
            .get(queue)
            .map(|state| {
                state
                    .messages
                    .iter()
                    .map(|m| QueuedMessage {
                        message_id: m.message_id.clone(),
                        body: m.body.clone(),
                        attributes: m.attributes.clone(),
                        receive_count: m.receive_count,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of messages held by `queue`.
    pub fn depth(&self, queue: &Url) -> usize {
        self.queues()
            .get(queue)
            .map(|state| state.messages.len())
            .unwrap_or(0)
    }

    fn is_unavailable(&self) -> bool {
        self.inner.unavailable.load(Ordering::SeqCst)
    }

    fn next_receipt(&self, message_id: &str) -> String {
        let n = self.inner.receipts.fetch_add(1, Ordering::Relaxed);
        format!("{message_id}:{n}")
    }

    /// One non-blocking receive attempt. Returns the messages handed out and the
    /// instant at which the next hidden message becomes visible, if any.
    fn try_receive(
        &self,
        queue: &Url,
        options: ReceiveOptions,
        now: Instant,
    ) -> Result<(Vec<ReceivedMessage>, Option<Instant>), Error> {
        let mut queues = self.queues();

        let redrive = queues
            .get(queue)
            .ok_or_else(|| Error::queue_not_found(queue))?
            .redrive
            .clone();

        let max = usize::try_from(options.max_messages.max(1)).unwrap_or(1);
        let visibility = Duration::from_secs(u64::try_from(options.visibility_timeout).unwrap_or(0));

        let mut received = Vec::new();
        let mut dead = Vec::new();
        let mut next_visible: Option<Instant> = None;

        let Some(state) = queues.get_mut(queue) else {
            return Err(Error::queue_not_found(queue));
        };

        let mut i = 0;
        while i < state.messages.len() {
            let message = &mut state.messages[i];

            if message.visible_at > now {
                next_visible = Some(match next_visible {
                    Some(at) => at.min(message.visible_at),
                    None => message.visible_at,
                });
                i += 1;
                continue;
            }

            if let Some(policy) = &redrive {
                if message.receive_count >= policy.max_receive_count {
                    dead.push(state.messages.remove(i));
                    continue;
                }
            }

            if received.len() >= max {
                i += 1;
                continue;
            }

            message.receive_count += 1;
            message.visible_at = now + visibility;

            let receipt_handle = self.next_receipt(&message.message_id);
            message.receipt_handle = Some(receipt_handle.clone());

            received.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                receipt_handle,
                body: message.body.clone(),
                attributes: message.attributes.clone(),
                receive_count: message.receive_count,
            });

            if !visibility.is_zero() {
                next_visible = Some(match next_visible {
                    Some(at) => at.min(message.visible_at),
                    None => message.visible_at,
                });
            }

            i += 1;
        }

        if let Some(policy) = redrive {
            if !dead.is_empty() {
                let dlq = queues.entry(policy.dead_letter_queue).or_default();
                for mut message in dead {
                    tracing::debug!(
                        message.id = %message.message_id,
                        receive_count = message.receive_count,
                        "Redriving message to dead-letter queue"
                    );
                    message.receive_count = 0;
                    message.visible_at = now;
                    message.receipt_handle = None;
                    dlq.messages.push(message);
                }
                self.inner.arrivals.notify_waiters();
            }
        }

        Ok((received, next_visible))
    }
}

impl QueueClient for InMemoryBroker {
    fn receive<'a>(
        &'a self,
        queue: &'a Url,
        options: ReceiveOptions,
    ) -> BoxFuture<'a, Result<Vec<ReceivedMessage>, Error>> {
        Box::pin(async move {
            let wait = Duration::from_secs(u64::try_from(options.wait_seconds).unwrap_or(0));
            let deadline = Instant::now() + wait;

            loop {
                if self.is_unavailable() {
                    return Err(Error::receive(queue, eyre::eyre!("broker unavailable")));
                }

                // Registered before checking so a concurrent send cannot be missed.
                let arrival = self.inner.arrivals.notified();

                let now = Instant::now();
                let (received, next_visible) = self.try_receive(queue, options, now)?;

                if !received.is_empty() || now >= deadline {
                    return Ok(received);
                }

                let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));

                let _ = tokio::time::timeout_at(wake_at, arrival).await;
            }
        })
    }

    fn send<'a>(
        &'a self,
        queue: &'a Url,
        body: String,
        attributes: HashMap<String, String>,
    ) -> BoxFuture<'a, Result<SendReceipt, Error>> {
        Box::pin(async move {
            check_size(&body, &attributes)?;

            if self.is_unavailable() {
                return Err(Error::delivery(queue, eyre::eyre!("broker unavailable")));
            }

            let message_id = Uuid::now_v7().to_string();

            {
                let mut queues = self.queues();
                let state = queues
                    .get_mut(queue)
                    .ok_or_else(|| Error::queue_not_found(queue))?;

                state.messages.push(StoredMessage {
                    message_id: message_id.clone(),
                    body,
                    attributes,
                    receive_count: 0,
                    visible_at: Instant::now(),
                    receipt_handle: None,
                });
            }

            self.inner.arrivals.notify_waiters();

            Ok(SendReceipt { message_id })
        })
    }

    fn delete<'a>(
        &'a self,
        queue: &'a Url,
        receipt_handle: &'a str,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let mut queues = self.queues();
            let state = queues
                .get_mut(queue)
                .ok_or_else(|| Error::queue_not_found(queue))?;

            let position = state
                .messages
                .iter()
                .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
                .ok_or_else(|| {
                    Error::delete(
                        queue,
                        eyre::eyre!("receipt handle {receipt_handle} is stale or unknown"),
                    )
                })?;

            state.messages.remove(position);

            Ok(())
        })
    }
}
