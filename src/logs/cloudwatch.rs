//! CloudWatch Logs implementation of the log sink.
//!
//! Destinations map onto log streams inside a log group. Each record is written
//! as one JSON-encoded log event.

use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use futures_util::future::BoxFuture;

use crate::error::Error;

use super::{Destination, LogRecord, LogSink};

#[derive(Clone)]
pub struct CloudWatchLogSink {
    client: aws_sdk_cloudwatchlogs::Client,
}

impl CloudWatchLogSink {
    /// Creates a new sink with the provided client.
    pub fn new(client: aws_sdk_cloudwatchlogs::Client) -> Self {
        Self { client }
    }

    /// Builds a sink from shared AWS configuration.
    pub fn from_conf(config: &aws_config::SdkConfig) -> Self {
        Self::new(aws_sdk_cloudwatchlogs::Client::new(config))
    }
}

fn to_event(destination: &Destination, record: &LogRecord) -> Result<InputLogEvent, Error> {
    let message =
        serde_json::to_string(record).map_err(|e| Error::log_sink(destination.to_string(), e))?;

    InputLogEvent::builder()
        .timestamp(record.timestamp.timestamp_millis())
        .message(message)
        .build()
        .map_err(|e| Error::log_sink(destination.to_string(), e))
}

impl LogSink for CloudWatchLogSink {
    fn create_destination<'a>(
        &'a self,
        destination: &'a Destination,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let result = self
                .client
                .create_log_stream()
                .log_group_name(&destination.group)
                .log_stream_name(&destination.name)
                .send()
                .await;

            match result {
                Ok(_) => Ok(()),
                Err(e)
                    if e.as_service_error()
                        .is_some_and(|e| e.is_resource_already_exists_exception()) =>
                {
                    tracing::debug!(%destination, "Log stream already exists");
                    Ok(())
                }
                Err(e) => Err(Error::log_sink(destination.to_string(), e)),
            }
        })
    }

    fn append<'a>(
        &'a self,
        destination: &'a Destination,
        records: Vec<LogRecord>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            if records.is_empty() {
                return Ok(());
            }

            let events = records
                .iter()
                .map(|record| to_event(destination, record))
                .collect::<Result<Vec<_>, _>>()?;

            self.client
                .put_log_events()
                .log_group_name(&destination.group)
                .log_stream_name(&destination.name)
                .set_log_events(Some(events))
                .send()
                .await
                .map_err(|e| Error::log_sink(destination.to_string(), e))?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{correlation::JobId, logs::Level};

    #[test]
    fn test_event_carries_json_record() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let job_id = JobId::from("J1");
        let destination = Destination::for_job("/jobs", &job_id, at);
        let record = LogRecord {
            job_id,
            level: Level::Error,
            message: "boom".to_owned(),
            timestamp: at,
            correlation_id: None,
        };

        let event = to_event(&destination, &record).unwrap();
        assert_eq!(event.timestamp, at.timestamp_millis());

        let decoded: serde_json::Value = serde_json::from_str(&event.message).unwrap();
        assert_eq!(
            decoded,
            serde_json::json!({
                "jobId": "J1",
                "level": "ERROR",
                "message": "boom",
                "timestamp": "2025-01-01T00:00:00Z"
            })
        );
    }
}
