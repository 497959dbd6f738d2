//! Per-job correlated logging.
//!
//! Every job gets its own log destination, named from the UTC date and the job
//! ID, inside a configured group. A [`CorrelatedLogger`] creates that destination
//! lazily on first write and appends [`LogRecord`]s to it.
//!
//! Failures of the log sink never reach the job: they are reported on the process
//! diagnostic channel (`tracing`) and otherwise ignored.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tokio::sync::OnceCell;

use crate::{correlation::JobId, error::Error};

pub mod cloudwatch;
pub mod memory;

/// Prefix shared by every job log destination.
pub const DESTINATION_PREFIX: &str = "job-streams";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Level {
    Info,
    Error,
}

/// A structured entry in a job's log destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub job_id: JobId,
    pub level: Level,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Named log destination within a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub group: String,
    pub name: String,
}

impl Destination {
    /// `job-streams/<YYYY-MM-DD>/<jobId>` under `group`.
    pub fn for_job(group: impl Into<String>, job_id: &JobId, created_at: DateTime<Utc>) -> Self {
        Self {
            group: group.into(),
            name: format!(
                "{DESTINATION_PREFIX}/{}/{job_id}",
                created_at.format("%Y-%m-%d")
            ),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)
    }
}

/// A structured log store addressable by named destinations.
pub trait LogSink: Send + Sync + 'static {
    /// Creates `destination`. Creating one that already exists succeeds.
    fn create_destination<'a>(
        &'a self,
        destination: &'a Destination,
    ) -> BoxFuture<'a, Result<(), Error>>;

    /// Appends records in order.
    fn append<'a>(
        &'a self,
        destination: &'a Destination,
        records: Vec<LogRecord>,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

/// Writes a single job's records to its own destination.
pub struct CorrelatedLogger {
    sink: Arc<dyn LogSink>,
    job_id: JobId,
    destination: Destination,
    created: OnceCell<()>,
}

impl CorrelatedLogger {
    pub fn new(sink: Arc<dyn LogSink>, group: impl Into<String>, job_id: JobId) -> Self {
        let destination = Destination::for_job(group, &job_id, Utc::now());
        Self {
            sink,
            job_id,
            destination,
            created: OnceCell::new(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Ensures the destination exists. Failures are reported and retried on the
    /// next write.
    pub async fn ensure_destination(&self) -> bool {
        let result = self
            .created
            .get_or_try_init(|| self.sink.create_destination(&self.destination))
            .await;

        match result {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(
                    job.id = %self.job_id,
                    destination = %self.destination,
                    %error,
                    detail = ?error.detail(),
                    "Failed to create job log destination"
                );
                false
            }
        }
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.write(Level::Info, message.into()).await
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.write(Level::Error, message.into()).await
    }

    async fn write(&self, level: Level, message: String) {
        match level {
            Level::Info => tracing::info!(job.id = %self.job_id, "{message}"),
            Level::Error => tracing::error!(job.id = %self.job_id, "{message}"),
        }

        if !self.ensure_destination().await {
            return;
        }

        let record = LogRecord {
            job_id: self.job_id.clone(),
            level,
            message,
            timestamp: Utc::now(),
            correlation_id: Some(self.job_id.to_string()),
        };

        if let Err(error) = self.sink.append(&self.destination, vec![record]).await {
            tracing::warn!(
                job.id = %self.job_id,
                destination = %self.destination,
                %error,
                detail = ?error.detail(),
                "Failed to write job log record"
            );
        }
    }
}
