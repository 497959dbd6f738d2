//! Trigger processor: turns one trigger message into zero or one work message.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use serde_json::json;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::{
    correlation::JobId,
    driver::MessageProcessor,
    error::Error,
    job::Job,
    message::{TriggerBody, WorkMessage, DEFAULT_JOB_TYPE},
    queue::{QueueClient, ReceivedMessage},
};

/// Attribute naming the trigger message a work message was derived from.
pub const TRIGGER_MESSAGE_ID_ATTRIBUTE: &str = "triggerMessageId";

pub struct TriggerProcessor {
    client: Arc<dyn QueueClient>,
    work_queue: Url,
}

impl TriggerProcessor {
    pub fn new(client: Arc<dyn QueueClient>, work_queue: Url) -> Self {
        Self { client, work_queue }
    }

    pub fn work_queue(&self) -> &Url {
        &self.work_queue
    }

    /// Builds a trigger message for standalone mode. The message is new on every
    /// call, so each one produces a distinct job.
    pub fn synthesize() -> Result<ReceivedMessage, Error> {
        let body = serde_json::to_string(&TriggerBody::standalone(Utc::now()))?;

        Ok(ReceivedMessage {
            message_id: format!("standalone-{}", Uuid::now_v7()),
            receipt_handle: String::new(),
            body,
            attributes: Default::default(),
            receive_count: 1,
        })
    }

    /// Derives the job for a trigger.
    ///
    /// A `jobId` already present in the body wins; otherwise the ID is derived
    /// from the broker message ID so redelivery yields the same job.
    pub fn job_for(trigger: &TriggerBody, raw: serde_json::Value, message_id: &str) -> Job {
        let job_id = match trigger.job_id.as_deref() {
            Some(id) if !id.is_empty() => JobId::from(id),
            _ => JobId::derive(message_id, trigger.timestamp),
        };

        Job {
            job_id,
            job_type: trigger
                .job_type
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_JOB_TYPE.to_owned()),
            timestamp: Utc::now(),
            payload: json!({ "originalTrigger": raw }),
            trigger_message_id: Some(message_id.to_owned()),
        }
    }

    /// Processes one trigger message. Send failures propagate so the message is
    /// left on the queue.
    pub async fn process(&self, message: &ReceivedMessage) -> Result<Job, Error> {
        let (trigger, raw) = TriggerBody::parse(&message.body)?;

        let job = Self::job_for(&trigger, raw, &message.message_id);

        debug!(
            job.id = %job.job_id,
            trigger = %trigger.trigger,
            "Derived job from trigger"
        );

        if !trigger.wants_background_job() {
            info!(job.id = %job.job_id, "Background job not requested");
            return Ok(job);
        }

        let work = WorkMessage::from_job(&job);
        let body = serde_json::to_string(&work)?;

        let mut attributes = work.attributes();
        attributes.insert(
            TRIGGER_MESSAGE_ID_ATTRIBUTE.to_owned(),
            message.message_id.clone(),
        );

        let receipt = self
            .client
            .send(&self.work_queue, body, attributes)
            .await?;

        info!(
            job.id = %job.job_id,
            job_type = %job.job_type,
            work.message_id = %receipt.message_id,
            "Enqueued background job"
        );

        Ok(job)
    }
}

impl MessageProcessor for TriggerProcessor {
    fn process<'a>(&'a self, message: &'a ReceivedMessage) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move { TriggerProcessor::process(self, message).await.map(|_| ()) })
    }
}

#[cfg(test)]
mod tests {
    use crate::queue::memory::InMemoryBroker;
    use crate::queue::ReceiveOptions;

    use super::*;

    fn setup() -> (InMemoryBroker, TriggerProcessor, Url) {
        let broker = InMemoryBroker::new();
        let work = Url::parse("memory://queues/work").unwrap();
        broker.create_queue(&work);
        let processor = TriggerProcessor::new(Arc::new(broker.clone()), work.clone());
        (broker, processor, work)
    }

    fn message(id: &str, body: &str) -> ReceivedMessage {
        ReceivedMessage {
            message_id: id.to_owned(),
            receipt_handle: format!("{id}-receipt"),
            body: body.to_owned(),
            attributes: Default::default(),
            receive_count: 1,
        }
    }

    #[tokio::test]
    async fn test_flag_absent_enqueues_one_work_message() {
        let (broker, processor, work) = setup();

        let job = processor
            .process(&message(
                "m-1",
                r#"{"trigger":"api_call","timestamp":"2025-01-01T00:00:00Z"}"#,
            ))
            .await
            .unwrap();

        let queued = broker.peek(&work);
        assert_eq!(queued.len(), 1);

        let sent: WorkMessage = serde_json::from_str(&queued[0].body).unwrap();
        assert_eq!(sent.job_id, job.job_id);
        assert_eq!(sent.job_type, DEFAULT_JOB_TYPE);
        assert_eq!(queued[0].attributes["jobId"], job.job_id.as_str());
        assert_eq!(queued[0].attributes["jobType"], DEFAULT_JOB_TYPE);
        assert_eq!(queued[0].attributes[TRIGGER_MESSAGE_ID_ATTRIBUTE], "m-1");
    }

    #[tokio::test]
    async fn test_flag_false_enqueues_nothing() {
        let (broker, processor, work) = setup();

        processor
            .process(&message(
                "m-1",
                r#"{"trigger":"api_call","timestamp":"2025-01-01T00:00:00Z","triggerBackgroundJob":false}"#,
            ))
            .await
            .unwrap();

        assert_eq!(broker.depth(&work), 0);
    }

    #[tokio::test]
    async fn test_redelivery_reuses_job_id() {
        let (broker, processor, work) = setup();
        let body = r#"{"trigger":"api_call","timestamp":"2025-01-01T00:00:00Z"}"#;

        let first = processor.process(&message("m-1", body)).await.unwrap();
        let second = processor.process(&message("m-1", body)).await.unwrap();
        assert_eq!(first.job_id, second.job_id);

        let explicit = processor
            .process(&message(
                "m-2",
                r#"{"trigger":"api_call","timestamp":"2025-01-01T00:00:00Z","jobId":"J-explicit"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(explicit.job_id.as_str(), "J-explicit");

        assert_eq!(broker.depth(&work), 3);
    }

    #[tokio::test]
    async fn test_malformed_trigger_is_rejected() {
        let (broker, processor, work) = setup();

        let result = processor.process(&message("m-1", "{not json")).await;
        assert!(matches!(result, Err(Error::MalformedPayload { .. })));
        assert_eq!(broker.depth(&work), 0);
    }

    #[tokio::test]
    async fn test_send_failure_propagates() {
        let (broker, processor, _work) = setup();
        broker.set_unavailable(true);

        let result = processor
            .process(&message(
                "m-1",
                r#"{"trigger":"api_call","timestamp":"2025-01-01T00:00:00Z"}"#,
            ))
            .await;
        assert!(matches!(result, Err(Error::Delivery { .. })));
    }

    #[tokio::test]
    async fn test_synthesized_triggers_are_distinct() {
        let (broker, processor, work) = setup();

        let first = processor
            .process(&TriggerProcessor::synthesize().unwrap())
            .await
            .unwrap();
        let second = processor
            .process(&TriggerProcessor::synthesize().unwrap())
            .await
            .unwrap();

        assert_ne!(first.job_id, second.job_id);

        let received = broker
            .receive(
                &work,
                ReceiveOptions {
                    max_messages: 10,
                    wait_seconds: 0,
                    visibility_timeout: 30,
                },
            )
            .await
            .unwrap();
        assert_eq!(received.len(), 2);

        let sent: WorkMessage = serde_json::from_str(&received[0].body).unwrap();
        assert_eq!(
            sent.data["originalTrigger"]["trigger"],
            crate::message::STANDALONE_TRIGGER
        );
        assert_eq!(sent.data["originalTrigger"]["triggerBackgroundJob"], true);
    }
}
