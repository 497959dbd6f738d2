//! Queue client abstraction over a durable, at-least-once message broker.
//!
//! The contract mirrors SQS:
//! - `receive` long-polls for up to `wait_seconds`, returns at most
//!   `max_messages`, and hides returned messages for `visibility_timeout`
//!   seconds. Nothing prevents the same message from reaching two receivers
//!   after a visibility timeout race, so consumers must tolerate duplicates.
//! - `send` enqueues a body with string attributes.
//! - `delete` acknowledges a message by receipt handle. A stale handle fails
//!   with [`Error::Delete`]; callers log it and move on.
//!
//! Retries are the broker's job: a message that is not deleted becomes visible
//! again, and after the queue's max receive count it is redriven to the
//! dead-letter queue.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use url::Url;

use crate::error::Error;

pub mod memory;
pub mod sqs;

/// Maximum body plus attributes size accepted by the broker.
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// Parameters for a single receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    pub max_messages: i32,
    pub wait_seconds: i32,
    pub visibility_timeout: i32,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_seconds: 20,
            visibility_timeout: 30,
        }
    }
}

/// A message handed out by a receive call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    /// Number of times the broker has handed this message out, including this one.
    pub receive_count: u32,
}

/// Acknowledgment returned by a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
}

pub trait QueueClient: Send + Sync + 'static {
    /// Long-polls `queue` for messages.
    fn receive<'a>(
        &'a self,
        queue: &'a Url,
        options: ReceiveOptions,
    ) -> BoxFuture<'a, Result<Vec<ReceivedMessage>, Error>>;

    /// Sends a message body with string attributes.
    fn send<'a>(
        &'a self,
        queue: &'a Url,
        body: String,
        attributes: HashMap<String, String>,
    ) -> BoxFuture<'a, Result<SendReceipt, Error>>;

    /// Acknowledges a message so it is never redelivered.
    fn delete<'a>(&'a self, queue: &'a Url, receipt_handle: &'a str)
        -> BoxFuture<'a, Result<(), Error>>;
}

/// Rejects payloads the broker would refuse.
pub(crate) fn check_size(body: &str, attributes: &HashMap<String, String>) -> Result<(), Error> {
    let size = body.len()
        + attributes
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum::<usize>();

    if size > MAX_MESSAGE_SIZE {
        return Err(Error::PayloadTooLarge {
            size,
            limit: MAX_MESSAGE_SIZE,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_size() {
        let attributes = HashMap::from([("jobId".to_owned(), "J1".to_owned())]);

        assert!(check_size("{}", &attributes).is_ok());

        let body = "x".repeat(MAX_MESSAGE_SIZE);
        match check_size(&body, &attributes) {
            Err(Error::PayloadTooLarge { size, limit }) => {
                assert_eq!(size, MAX_MESSAGE_SIZE + 7);
                assert_eq!(limit, MAX_MESSAGE_SIZE);
            }
            other => panic!("Expected PayloadTooLarge, got {other:?}"),
        }
    }
}
