use std::time::Duration;

use anyhow::{Context, Result};
use mammoth_durable::{Bootstrap, ExecutionContext, StartWorkflowOptions};
use mammoth_worker::{registry, AppConfig, HELLO_WORLD};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Execution and decision timeout of the workflow started at boot
const WORKFLOW_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mammoth_worker=info,mammoth_durable=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("mammoth-worker starting...");

    let config = AppConfig::from_env().context("Failed to read configuration")?;
    tracing::info!(
        domain = %config.service.domain,
        service_name = %config.service.service_name,
        endpoint = %config.service.endpoint,
        task_list = %config.task_list,
        worker_id = %config.worker_id,
        "Configuration loaded"
    );

    let bootstrap = Bootstrap::connect(config.service.clone())
        .context("Failed to connect to the workflow engine")?
        .with_feature_flags(config.feature_flags);

    let registry = registry().context("Failed to register handlers")?;
    let worker = bootstrap.worker(registry, config.worker_config());
    worker.start().await.context("Failed to start worker")?;

    if config.start_workflow {
        let options = StartWorkflowOptions::new(
            format!("helloworld_{}", Uuid::now_v7()),
            config.task_list.clone(),
            WORKFLOW_TIMEOUT,
            WORKFLOW_TIMEOUT,
        );
        let handle = bootstrap
            .client()
            .start_workflow(
                &ExecutionContext::background(),
                &options,
                HELLO_WORLD,
                config.workflow_input.as_str(),
            )
            .await
            .context("Failed to start workflow")?;
        tracing::info!(%handle, "Started hello_world workflow");
    }

    tracing::info!("Worker ready, waiting for shutdown signal...");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Received shutdown signal");
    worker.stop().await;

    tracing::info!("Worker shutdown complete");
    Ok(())
}
