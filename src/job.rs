use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::{correlation::JobId, error::Error};

/// A unit of work derived from a trigger message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: JobId,
    pub job_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    /// Broker identifier of the originating trigger message, when known.
    pub trigger_message_id: Option<String>,
}

/// The body of a job, supplied by the embedding application.
///
/// The pipeline never inspects what a handler computes; it only records whether
/// the handler succeeded. Handlers must tolerate being invoked more than once for
/// the same job since delivery is at-least-once.
pub trait JobHandler: Send + Sync + 'static {
    fn run<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<(), Error>>;
}

impl<F> JobHandler for F
where
    F: Fn(&Job) -> Result<(), Error> + Send + Sync + 'static,
{
    fn run<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move { self(job) })
    }
}

/// Default job body: optionally waits to stand in for real work, then succeeds.
#[derive(Debug, Clone, Default)]
pub struct PassThrough {
    simulated_work: Duration,
}

impl PassThrough {
    pub fn new(simulated_work: Duration) -> Self {
        Self { simulated_work }
    }
}

impl JobHandler for PassThrough {
    fn run<'a>(&'a self, _job: &'a Job) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            if !self.simulated_work.is_zero() {
                tokio::time::sleep(self.simulated_work).await;
            }
            Ok(())
        })
    }
}
