//! Background processor: runs the job body for each work message and records
//! the job lifecycle in the job's own log destination.

use std::{panic::AssertUnwindSafe, sync::Arc};

use chrono::Utc;
use futures_util::{future::BoxFuture, FutureExt};
use tracing::{debug, warn};

use crate::{
    correlation::JobId,
    driver::MessageProcessor,
    error::Error,
    job::{Job, JobHandler},
    logs::{CorrelatedLogger, LogSink},
    message::{WorkBody, DEFAULT_JOB_TYPE, JOB_ID_ATTRIBUTE, JOB_TYPE_ATTRIBUTE},
    queue::ReceivedMessage,
    trigger::TRIGGER_MESSAGE_ID_ATTRIBUTE,
};

pub struct BackgroundProcessor {
    sink: Arc<dyn LogSink>,
    log_group: String,
    handler: Arc<dyn JobHandler>,
}

/// Job ID from the body, then the message attribute, then a fresh one.
fn resolve_job_id(body: &WorkBody, message: &ReceivedMessage) -> JobId {
    let from_body = body.job_id.as_deref().filter(|id| !id.is_empty());
    let from_attribute = message
        .attributes
        .get(JOB_ID_ATTRIBUTE)
        .map(String::as_str)
        .filter(|id| !id.is_empty());

    match from_body.or(from_attribute) {
        Some(id) => JobId::from(id),
        None => {
            let id = JobId::generate();
            warn!(
                message.id = %message.message_id,
                job.id = %id,
                "Work message has no job ID, minted a new one"
            );
            id
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job handler panicked".to_owned()
    }
}

impl BackgroundProcessor {
    pub fn new(
        sink: Arc<dyn LogSink>,
        log_group: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self {
            sink,
            log_group: log_group.into(),
            handler,
        }
    }

    /// Builds the job described by a work message.
    pub fn job_for(body: WorkBody, message: &ReceivedMessage) -> Job {
        let job_id = resolve_job_id(&body, message);

        let job_type = body
            .job_type
            .filter(|t| !t.is_empty())
            .or_else(|| message.attributes.get(JOB_TYPE_ATTRIBUTE).cloned())
            .unwrap_or_else(|| DEFAULT_JOB_TYPE.to_owned());

        Job {
            job_id,
            job_type,
            timestamp: body.timestamp.unwrap_or_else(Utc::now),
            payload: body.data,
            trigger_message_id: message.attributes.get(TRIGGER_MESSAGE_ID_ATTRIBUTE).cloned(),
        }
    }

    /// Processes one work message.
    ///
    /// On success the job has completed and the caller may delete the message.
    /// On failure exactly one ERROR record has been written for the job and the
    /// message must be left for redelivery.
    pub async fn process(&self, message: &ReceivedMessage) -> Result<Job, Error> {
        let body = WorkBody::parse(&message.body)?;
        let job = Self::job_for(body, message);

        if message.receive_count > 1 {
            debug!(
                job.id = %job.job_id,
                receive_count = message.receive_count,
                "Processing redelivered work message"
            );
        }

        let log = CorrelatedLogger::new(
            Arc::clone(&self.sink),
            self.log_group.clone(),
            job.job_id.clone(),
        );

        log.ensure_destination().await;

        log.info(format!(
            "Background job {} started (type {})",
            job.job_id, job.job_type
        ))
        .await;
        log.info(format!("Job data: {}", job.payload)).await;
        log.info(format!("Processing job of type {}", job.job_type))
            .await;

        let outcome = AssertUnwindSafe(self.handler.run(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::handler(job.job_id.as_str(), panic_message(&*panic))));

        match outcome {
            Ok(()) => {
                log.info(format!("Background job {} completed", job.job_id))
                    .await;
                Ok(job)
            }
            Err(error) => {
                log.error(format!("Background job {} failed: {error}", job.job_id))
                    .await;
                Err(error)
            }
        }
    }
}

impl MessageProcessor for BackgroundProcessor {
    fn process<'a>(&'a self, message: &'a ReceivedMessage) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move { BackgroundProcessor::process(self, message).await.map(|_| ()) })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        job::PassThrough,
        logs::{memory::InMemoryLogSink, Level},
    };

    fn message(body: &str, attributes: HashMap<String, String>) -> ReceivedMessage {
        ReceivedMessage {
            message_id: "w-1".to_owned(),
            receipt_handle: "w-1-receipt".to_owned(),
            body: body.to_owned(),
            attributes,
            receive_count: 1,
        }
    }


    #[tokio::test]
    async fn test_lifecycle_records() {
        let sink = InMemoryLogSink::new();
        let processor = BackgroundProcessor::new(
            Arc::new(sink.clone()),
            "/jobs",
            Arc::new(PassThrough::default()),
        );

        let job = processor
            .process(&message(
                r#"{"jobId":"J1","jobType":"t","timestamp":"2025-01-01T00:00:00Z","data":{"k":"v"}}"#,
                HashMap::new(),
            ))
            .await
            .unwrap();
        assert_eq!(job.job_id.as_str(), "J1");
        assert_eq!(job.job_type, "t");

        let records = sink.job_records(&JobId::from("J1"));
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.level == Level::Info));
        assert!(records[0].message.contains("started"));
        assert!(records[1].message.contains(r#"{"k":"v"}"#));
        assert!(records[2].message.contains("Processing"));
        assert!(records[3].message.contains("completed"));
    }

    #[tokio::test]
    async fn test_job_id_fallbacks() {
        let from_attribute = BackgroundProcessor::job_for(
            WorkBody::parse(r#"{"data":{}}"#).unwrap(),
            &message(
                "{}",
                HashMap::from([(JOB_ID_ATTRIBUTE.to_owned(), "J-attr".to_owned())]),
            ),
        );
        assert_eq!(from_attribute.job_id.as_str(), "J-attr");
        assert_eq!(from_attribute.job_type, DEFAULT_JOB_TYPE);

        let minted = BackgroundProcessor::job_for(
            WorkBody::parse(r#"{"jobId":""}"#).unwrap(),
            &message("{}", HashMap::new()),
        );
        assert!(!minted.job_id.as_str().is_empty());
    }

    #[tokio::test]
    async fn test_handler_panic_is_a_failure() {
        let sink = InMemoryLogSink::new();
        let handler = |_: &Job| -> Result<(), Error> { panic!("exploded") };
        let processor =
            BackgroundProcessor::new(Arc::new(sink.clone()), "/jobs", Arc::new(handler));

        let result = processor
            .process(&message(r#"{"jobId":"J9","data":{}}"#, HashMap::new()))
            .await;

        match result {
            Err(Error::Handler { job_id, message }) => {
                assert_eq!(job_id, "J9");
                assert_eq!(message, "exploded");
            }
            other => panic!("Expected Handler error, got {other:?}"),
        }

        let errors: Vec<_> = sink
            .job_records(&JobId::from("J9"))
            .into_iter()
            .filter(|r| r.level == Level::Error)
            .collect();
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_log_sink_failure_does_not_fail_job() {
        let sink = InMemoryLogSink::new();
        sink.set_failing(true);
        let processor = BackgroundProcessor::new(
            Arc::new(sink.clone()),
            "/jobs",
            Arc::new(PassThrough::default()),
        );

        let result = processor
            .process(&message(r#"{"jobId":"J3","data":{}}"#, HashMap::new()))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_work_message() {
        let sink = InMemoryLogSink::new();
        let processor = BackgroundProcessor::new(
            Arc::new(sink.clone()),
            "/jobs",
            Arc::new(PassThrough::default()),
        );

        let result = processor.process(&message("[1,2,3]", HashMap::new())).await;
        assert!(matches!(result, Err(Error::MalformedPayload { .. })));
        assert!(sink.destinations().is_empty());
    }
}
