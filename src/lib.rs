use std::sync::Arc;

use aws_config::BehaviorVersion;
use config::Config;
use job::{JobHandler, PassThrough};
use logs::cloudwatch::CloudWatchLogSink;
use pipeline::Collaborators;
use queue::sqs::SqsQueueClient;
use shutdown::Exit;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

pub mod background;
pub mod config;
pub mod correlation;
pub mod driver;
pub mod error;
pub mod job;
pub mod logs;
pub mod message;
pub mod pipeline;
pub mod queue;
pub mod shutdown;
pub mod trigger;

fn init_tracing() -> eyre::Result<()> {
    let filter = EnvFilter::builder()
        .with_env_var("JOBRELAY_LOG")
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(filter)
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(filter)
        .finish()
        .try_init()?;

    Ok(())
}

async fn sdk_config(config: &Config) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let Some(endpoint) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint.as_str());
    }

    loader.load().await
}

/// Returns a builder for the pipeline process.
///
/// Without a `config` the configuration is read from the environment; without a
/// `handler` jobs run the [`PassThrough`] body.
#[bon::builder(finish_fn = start)]
pub async fn run(config: Option<Config>, handler: Option<Arc<dyn JobHandler>>) -> eyre::Result<()> {
    init_tracing()?;

    let config = match config {
        Some(config) => config,
        None => Config::load()?,
    };

    config.validate()?;

    let sdk_config = sdk_config(&config).await;

    let collaborators = Collaborators {
        queues: Arc::new(SqsQueueClient::from_conf(&sdk_config)),
        logs: Arc::new(CloudWatchLogSink::from_conf(&sdk_config)),
        handler: handler.unwrap_or_else(|| {
            Arc::new(PassThrough::new(config.simulated_work())) as Arc<dyn JobHandler>
        }),
    };

    let drivers = pipeline::assemble(&config, &collaborators)?;

    info!(role = %config.role, processors = drivers.len(), "Starting pipeline");

    let token = CancellationToken::new();
    let signals = shutdown::listen(token.clone())?;

    let exit = pipeline::serve(drivers, token.clone(), &config).await;

    token.cancel();
    signals.abort();

    match exit {
        Exit::Graceful => {
            info!("Pipeline stopped");
            Ok(())
        }
        Exit::Forced => Err(eyre::eyre!(
            "processors did not stop within {:?}",
            config.shutdown_grace()
        )),
    }
}
