//! In-memory log sink for tests and local development.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

use futures_util::future::BoxFuture;

use crate::{correlation::JobId, error::Error};

use super::{Destination, LogRecord, LogSink};

#[derive(Default)]
struct Stream {
    records: Mutex<Vec<LogRecord>>,
    create_calls: AtomicUsize,
}

/// Thread-safe in-memory log sink. Clones share the same destinations.
#[derive(Clone, Default)]
pub struct InMemoryLogSink {
    streams: Arc<papaya::HashMap<Destination, Arc<Stream>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self, destination: &Destination) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::log_sink(
                destination.to_string(),
                eyre::eyre!("log sink unavailable"),
            ));
        }
        Ok(())
    }

    /// Every destination created so far.
    pub fn destinations(&self) -> Vec<Destination> {
        let guard = self.streams.guard();
        self.streams.keys(&guard).cloned().collect()
    }

    /// The destination created for `job_id`, whatever day it was created on.
    pub fn destination_for(&self, job_id: &JobId) -> Option<Destination> {
        self.destinations()
            .into_iter()
            .find(|d| d.name.rsplit('/').next() == Some(job_id.as_str()))
    }

    /// Records appended for `job_id`, in order.
    pub fn job_records(&self, job_id: &JobId) -> Vec<LogRecord> {
        self.destination_for(job_id)
            .map(|destination| self.records(&destination))
            .unwrap_or_default()
    }

    /// Records appended to `destination`, in order.
    pub fn records(&self, destination: &Destination) -> Vec<LogRecord> {
        let guard = self.streams.guard();
        self.streams
            .get(destination, &guard)
            .map(|stream| {
                stream
                    .records
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
            .unwrap_or_default()
    }

    /// Number of successful `create_destination` calls for `destination`.
    pub fn create_calls(&self, destination: &Destination) -> usize {
        let guard = self.streams.guard();
        self.streams
            .get(destination, &guard)
            .map(|stream| stream.create_calls.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl LogSink for InMemoryLogSink {
    fn create_destination<'a>(
        &'a self,
        destination: &'a Destination,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            self.check(destination)?;

            let map = self.streams.pin();
            let stream = map.get_or_insert_with(destination.clone(), || Arc::new(Stream::default()));
            stream.create_calls.fetch_add(1, Ordering::SeqCst);

            Ok(())
        })
    }

    fn append<'a>(
        &'a self,
        destination: &'a Destination,
        records: Vec<LogRecord>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            self.check(destination)?;

            let stream = {
                let guard = self.streams.guard();
                self.streams.get(destination, &guard).cloned()
            };

            let stream = stream.ok_or_else(|| {
                Error::log_sink(
                    destination.to_string(),
                    eyre::eyre!("destination does not exist"),
                )
            })?;

            stream
                .records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(records);

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::logs::Level;

    fn destination() -> Destination {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Destination::for_job("/jobs", &JobId::from("J1"), at)
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let sink = InMemoryLogSink::new();
        let destination = destination();

        sink.create_destination(&destination).await.unwrap();
        sink.create_destination(&destination).await.unwrap();

        assert_eq!(sink.create_calls(&destination), 2);
        assert_eq!(sink.destinations(), vec![destination]);
    }

    #[tokio::test]
    async fn test_append_requires_destination() {
        let sink = InMemoryLogSink::new();
        let destination = destination();

        let record = LogRecord {
            job_id: JobId::from("J1"),
            level: Level::Info,
            message: "hello".to_owned(),
            timestamp: Utc::now(),
            correlation_id: None,
        };

        assert!(matches!(
            sink.append(&destination, vec![record.clone()]).await,
            Err(Error::LogSink { .. })
        ));

        sink.create_destination(&destination).await.unwrap();
        sink.append(&destination, vec![record.clone()])
            .await
            .unwrap();

        assert_eq!(sink.records(&destination), vec![record]);
    }

    #[tokio::test]
    async fn test_lookup_by_job_id() {
        let sink = InMemoryLogSink::new();
        let destination = destination();
        let other = Destination::for_job("/jobs", &JobId::from("J10"), Utc::now());

        sink.create_destination(&destination).await.unwrap();
        sink.create_destination(&other).await.unwrap();

        let record = LogRecord {
            job_id: JobId::from("J1"),
            level: Level::Info,
            message: "hello".to_owned(),
            timestamp: Utc::now(),
            correlation_id: None,
        };
        sink.append(&destination, vec![record.clone()])
            .await
            .unwrap();

        assert_eq!(sink.destination_for(&JobId::from("J1")), Some(destination));
        assert_eq!(sink.job_records(&JobId::from("J1")), vec![record]);
        assert!(sink.job_records(&JobId::from("J10")).is_empty());
        assert_eq!(sink.destination_for(&JobId::from("J2")), None);
    }
}
