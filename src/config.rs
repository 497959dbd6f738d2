use std::time::Duration;

use serde::Deserialize;
use strum::{Display, EnumString};
use url::Url;

use crate::{error::Error, queue::ReceiveOptions};

pub const ENV_PREFIX: &str = "JOBRELAY_";

/// Longest visibility timeout the broker accepts, in seconds.
pub const MAX_VISIBILITY_TIMEOUT: i32 = 43_200;

/// Which processors a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Trigger,
    Background,
    #[default]
    All,
}

impl Role {
    pub fn runs_trigger(self) -> bool {
        matches!(self, Self::Trigger | Self::All)
    }

    pub fn runs_background(self) -> bool {
        matches!(self, Self::Background | Self::All)
    }
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_log_group_name() -> String {
    "/jobrelay/background-jobs".to_owned()
}

fn default_trigger_batch_size() -> i32 {
    10
}

fn default_background_batch_size() -> i32 {
    5
}

fn default_wait_time_seconds() -> i32 {
    20
}

fn default_trigger_visibility_timeout() -> i32 {
    30
}

fn default_background_visibility_timeout() -> i32 {
    300
}

fn default_error_backoff_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_seconds() -> u64 {
    30
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub role: Role,
    /// Absent selects standalone mode for the trigger processor.
    pub input_queue_url: Option<Url>,
    pub work_queue_url: Option<Url>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_log_group_name")]
    pub log_group_name: String,
    #[serde(default = "default_trigger_batch_size")]
    pub trigger_batch_size: i32,
    #[serde(default = "default_background_batch_size")]
    pub background_batch_size: i32,
    #[serde(default = "default_wait_time_seconds")]
    pub wait_time_seconds: i32,
    #[serde(default = "default_trigger_visibility_timeout")]
    pub trigger_visibility_timeout: i32,
    #[serde(default = "default_background_visibility_timeout")]
    pub background_visibility_timeout: i32,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Overrides the AWS endpoint, e.g. for a local SQS-compatible broker.
    pub endpoint_url: Option<Url>,
    #[serde(default)]
    pub simulated_work_ms: u64,
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        Ok(envy::prefixed(ENV_PREFIX).from_env::<Self>()?)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .map_err(|e| Error::config(e.to_string()))
    }

    /// Checks that every queue the configured role needs is present.
    pub fn validate(&self) -> Result<(), Error> {
        if self.work_queue_url.is_none() {
            return Err(Error::config(format!(
                "{ENV_PREFIX}WORK_QUEUE_URL is required for role {}",
                self.role
            )));
        }

        for (name, value) in [
            ("TRIGGER_BATCH_SIZE", self.trigger_batch_size),
            ("BACKGROUND_BATCH_SIZE", self.background_batch_size),
        ] {
            if !(1..=10).contains(&value) {
                return Err(Error::config(format!(
                    "{ENV_PREFIX}{name} must be between 1 and 10, got {value}"
                )));
            }
        }

        if !(0..=20).contains(&self.wait_time_seconds) {
            return Err(Error::config(format!(
                "{ENV_PREFIX}WAIT_TIME_SECONDS must be between 0 and 20, got {}",
                self.wait_time_seconds
            )));
        }

        for (name, value) in [
            ("TRIGGER_VISIBILITY_TIMEOUT", self.trigger_visibility_timeout),
            ("BACKGROUND_VISIBILITY_TIMEOUT", self.background_visibility_timeout),
        ] {
            if !(0..=MAX_VISIBILITY_TIMEOUT).contains(&value) {
                return Err(Error::config(format!(
                    "{ENV_PREFIX}{name} must be between 0 and {MAX_VISIBILITY_TIMEOUT}, got {value}"
                )));
            }
        }

        if self.role.runs_trigger() && self.is_standalone() && self.poll_interval_ms == 0 {
            return Err(Error::config(format!(
                "{ENV_PREFIX}POLL_INTERVAL_MS must be positive in standalone mode"
            )));
        }

        Ok(())
    }

    pub fn is_standalone(&self) -> bool {
        self.input_queue_url.is_none()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn simulated_work(&self) -> Duration {
        Duration::from_millis(self.simulated_work_ms)
    }

    pub fn trigger_receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.trigger_batch_size,
            wait_seconds: self.wait_time_seconds,
            visibility_timeout: self.trigger_visibility_timeout,
        }
    }

    pub fn background_receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.background_batch_size,
            wait_seconds: self.wait_time_seconds,
            visibility_timeout: self.background_visibility_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::default(),
            input_queue_url: None,
            work_queue_url: None,
            poll_interval_ms: default_poll_interval_ms(),
            log_group_name: default_log_group_name(),
            trigger_batch_size: default_trigger_batch_size(),
            background_batch_size: default_background_batch_size(),
            wait_time_seconds: default_wait_time_seconds(),
            trigger_visibility_timeout: default_trigger_visibility_timeout(),
            background_visibility_timeout: default_background_visibility_timeout(),
            error_backoff_ms: default_error_backoff_ms(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            endpoint_url: None,
            simulated_work_ms: 0,
        }
    }
}
