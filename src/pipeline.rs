//! Wires processors to their intakes according to the configuration.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    background::BackgroundProcessor,
    config::Config,
    driver::{Driver, Intake},
    error::Error,
    job::JobHandler,
    logs::LogSink,
    queue::QueueClient,
    shutdown::{Exit, RunHandle},
    trigger::TriggerProcessor,
};

/// External collaborators the pipeline depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub queues: Arc<dyn QueueClient>,
    pub logs: Arc<dyn LogSink>,
    pub handler: Arc<dyn JobHandler>,
}

/// Builds one driver per processor the configured role runs.
pub fn assemble(config: &Config, collaborators: &Collaborators) -> Result<Vec<Driver>, Error> {
    config.validate()?;

    let work_queue = config
        .work_queue_url
        .clone()
        .ok_or_else(|| Error::config("work queue URL is required"))?;

    let mut drivers = Vec::new();

    if config.role.runs_trigger() {
        let intake = match &config.input_queue_url {
            Some(queue) => Intake::Queue {
                client: Arc::clone(&collaborators.queues),
                queue: queue.clone(),
                options: config.trigger_receive_options(),
            },
            None => {
                info!(
                    interval = ?config.poll_interval(),
                    "No input queue configured, trigger processor runs standalone"
                );
                Intake::Synthetic {
                    interval: config.poll_interval(),
                }
            }
        };

        drivers.push(
            Driver::builder()
                .name("trigger")
                .intake(intake)
                .processor(Arc::new(TriggerProcessor::new(
                    Arc::clone(&collaborators.queues),
                    work_queue.clone(),
                )))
                .error_backoff(config.error_backoff())
                .build(),
        );
    }

    if config.role.runs_background() {
        drivers.push(
            Driver::builder()
                .name("background")
                .intake(Intake::Queue {
                    client: Arc::clone(&collaborators.queues),
                    queue: work_queue,
                    options: config.background_receive_options(),
                })
                .processor(Arc::new(BackgroundProcessor::new(
                    Arc::clone(&collaborators.logs),
                    config.log_group_name.clone(),
                    Arc::clone(&collaborators.handler),
                )))
                .error_backoff(config.error_backoff())
                .build(),
        );
    }

    Ok(drivers)
}

/// Spawns every driver and waits until `shutdown` is cancelled and the drivers
/// have stopped, or the grace period runs out.
pub async fn serve(drivers: Vec<Driver>, shutdown: CancellationToken, config: &Config) -> Exit {
    let handles = drivers
        .into_iter()
        .map(|driver| tokio::spawn(driver.run(shutdown.child_token())))
        .collect();

    RunHandle::new(handles)
        .wait_for_shutdown(&shutdown, config.shutdown_grace())
        .await
}
