use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Malformed payload: {message}"))]
    MalformedPayload { message: String },

    #[snafu(display("Failed to receive from queue {queue}"))]
    Receive {
        queue: String,
        #[snafu(source(false))]
        source: eyre::Report,
    },

    #[snafu(display("Failed to deliver message to queue {queue}"))]
    Delivery {
        queue: String,
        #[snafu(source(false))]
        source: eyre::Report,
    },

    #[snafu(display("Payload too large: {size} bytes exceeds the {limit} byte limit"))]
    PayloadTooLarge { size: usize, limit: usize },

    #[snafu(display("Failed to delete message from queue {queue}"))]
    Delete {
        queue: String,
        #[snafu(source(false))]
        source: eyre::Report,
    },

    #[snafu(display("Queue not found: {queue}"))]
    QueueNotFound { queue: String },

    #[snafu(display("Log sink error for destination {destination}"))]
    LogSink {
        destination: String,
        #[snafu(source(false))]
        source: eyre::Report,
    },

    #[snafu(display("Job {job_id} failed: {message}"))]
    Handler { job_id: String, message: String },

    #[snafu(display("Invalid configuration: {message}"))]
    Config { message: String },
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedPayload {
            message: e.to_string(),
        }
    }
}

impl Error {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            message: message.into(),
        }
    }

    pub fn receive(queue: impl ToString, e: impl Into<eyre::Report>) -> Self {
        Self::Receive {
            queue: queue.to_string(),
            source: e.into(),
        }
    }

    pub fn delivery(queue: impl ToString, e: impl Into<eyre::Report>) -> Self {
        Self::Delivery {
            queue: queue.to_string(),
            source: e.into(),
        }
    }

    pub fn delete(queue: impl ToString, e: impl Into<eyre::Report>) -> Self {
        Self::Delete {
            queue: queue.to_string(),
            source: e.into(),
        }
    }

    pub fn queue_not_found(queue: impl ToString) -> Self {
        Self::QueueNotFound {
            queue: queue.to_string(),
        }
    }

    pub fn log_sink(destination: impl Into<String>, e: impl Into<eyre::Report>) -> Self {
        Self::LogSink {
            destination: destination.into(),
            source: e.into(),
        }
    }

    pub fn handler(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            job_id: job_id.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Broker unavailability. The caller should back off and retry rather than
    /// treat the failure as belonging to a single message.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Receive { .. } | Self::Delivery { .. })
    }

    /// Upstream failure detail, if any, for diagnostics.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Receive { source, .. }
            | Self::Delivery { source, .. }
            | Self::Delete { source, .. }
            | Self::LogSink { source, .. } => Some(format!("{source:#}")),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::receive("q", eyre::eyre!("timeout")).is_transient());
        assert!(Error::delivery("q", eyre::eyre!("refused")).is_transient());
        assert!(!Error::malformed("bad json").is_transient());
        assert!(!Error::delete("q", eyre::eyre!("stale")).is_transient());
        assert!(!Error::handler("J1", "boom").is_transient());
    }

    #[test]
    fn test_detail_includes_source() {
        let err = Error::delivery("work", eyre::eyre!("connection refused"));
        assert_eq!(err.to_string(), "Failed to deliver message to queue work");
        assert_eq!(err.detail().as_deref(), Some("connection refused"));
        assert_eq!(Error::malformed("x").detail(), None);
    }
}
