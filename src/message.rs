//! Wire formats carried over the queues.
//!
//! Two message shapes flow through the pipeline:
//!
//! 1. [`TriggerBody`]: published by an external source onto the input queue.
//! 2. [`WorkMessage`]: produced by the trigger processor onto the work queue and
//!    consumed by the background processor.
//!
//! Both are JSON objects with camelCase keys. Unknown keys on a trigger are
//! preserved so that the original trigger can be forwarded verbatim.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{correlation::JobId, error::Error, job::Job};

/// Message attribute carrying the job type.
pub const JOB_TYPE_ATTRIBUTE: &str = "jobType";
/// Message attribute carrying the job ID.
pub const JOB_ID_ATTRIBUTE: &str = "jobId";

/// Job type used when a trigger does not name one.
pub const DEFAULT_JOB_TYPE: &str = "background_processing";

/// Trigger name stamped on messages synthesized in standalone mode.
pub const STANDALONE_TRIGGER: &str = "standalone_poll";

/// Body of a message on the input queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBody {
    pub trigger: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_background_job: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Set by producers that already assigned a job; reused on redelivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
}

impl TriggerBody {
    /// Parses a raw body, returning the typed view alongside the original JSON
    /// object so that unknown keys survive forwarding.
    pub fn parse(body: &str) -> Result<(Self, Value), Error> {
        let raw: Value = serde_json::from_str(body)?;

        if !raw.is_object() {
            return Err(Error::malformed("trigger body must be a JSON object"));
        }

        let parsed = serde_json::from_value(raw.clone())?;

        Ok((parsed, raw))
    }

    /// Absent means "yes".
    pub fn wants_background_job(&self) -> bool {
        self.trigger_background_job.unwrap_or(true)
    }

    /// The trigger synthesized on each standalone poll cycle.
    pub fn standalone(now: DateTime<Utc>) -> Self {
        Self {
            trigger: STANDALONE_TRIGGER.to_owned(),
            timestamp: now,
            trigger_background_job: Some(true),
            data: Some(serde_json::json!({ "mode": "standalone" })),
            job_id: None,
            job_type: None,
        }
    }
}

/// Body of a message on the work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkMessage {
    pub job_id: JobId,
    pub job_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl WorkMessage {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            job_type: job.job_type.clone(),
            timestamp: job.timestamp,
            data: job.payload.clone(),
        }
    }

    /// Attributes that accompany the body for filterable consumption.
    pub fn attributes(&self) -> HashMap<String, String> {
        HashMap::from([
            (JOB_TYPE_ATTRIBUTE.to_owned(), self.job_type.clone()),
            (JOB_ID_ATTRIBUTE.to_owned(), self.job_id.to_string()),
        ])
    }
}

/// Lenient view of a work message body.
///
/// Producers are not trusted to fill every field; the background processor
/// resolves missing ones itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkBody {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Value,
}

impl WorkBody {
    pub fn parse(body: &str) -> Result<Self, Error> {
        let raw: Value = serde_json::from_str(body)?;

        if !raw.is_object() {
            return Err(Error::malformed("work body must be a JSON object"));
        }

        Ok(serde_json::from_value(raw)?)
    }
}
