//! The sample worker against the in-memory engine

use std::time::Duration;

use mammoth_durable::error::ConnectionError;
use mammoth_durable::service::WorkflowStatus;
use mammoth_durable::worker::{WorkerConfig, WorkerError, WorkerState};
use mammoth_durable::{
    Bootstrap, ConfigurationError, ExecutionContext, ServiceConfig, StartWorkflowOptions,
};
use mammoth_worker::{registry, AppConfig, HELLO_WORLD, TASK_LIST};
use serde_json::json;

fn bootstrap() -> Bootstrap {
    Bootstrap::connect(ServiceConfig::default()).expect("in-memory engine")
}

fn options(id: &str) -> StartWorkflowOptions {
    StartWorkflowOptions::new(
        id,
        TASK_LIST,
        Duration::from_secs(300),
        Duration::from_secs(300),
    )
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_hello_world_completes_with_echo() {
    let bootstrap = bootstrap();
    let worker = bootstrap.worker(registry().unwrap(), bootstrap.worker_config(TASK_LIST));
    worker.start().await.unwrap();

    let client = bootstrap.client();
    let ctx = ExecutionContext::background();
    let handle = client
        .start_workflow(&ctx, &options("run-1"), HELLO_WORLD, "amar")
        .await
        .unwrap();
    assert_eq!(handle.workflow_id, "run-1");

    let info = client
        .get_workflow_result(
            &ctx.with_timeout(Duration::from_secs(120)),
            &handle,
            Duration::from_millis(200),
        )
        .await
        .unwrap();

    assert_eq!(info.status, WorkflowStatus::Completed);
    assert_eq!(info.result, Some(json!("Processed activity: amar")));
    assert_eq!(info.workflow_type, HELLO_WORLD);

    worker.stop().await;
    assert_eq!(worker.state(), WorkerState::Stopped);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_activity_follows_workflow_task_list() {
    let config = AppConfig::from_lookup(|var| match var {
        "MAMMOTH_TASK_LIST" => Some("echo".to_string()),
        _ => None,
    })
    .unwrap();
    let bootstrap = Bootstrap::connect(config.service.clone()).unwrap();
    let worker = bootstrap.worker(registry().unwrap(), config.worker_config());
    worker.start().await.unwrap();

    let client = bootstrap.client();
    let ctx = ExecutionContext::background();
    let options = StartWorkflowOptions::new(
        "run-echo",
        "echo",
        Duration::from_secs(300),
        Duration::from_secs(300),
    );
    let handle = client
        .start_workflow(&ctx, &options, HELLO_WORLD, "amar")
        .await
        .unwrap();

    let info = client
        .get_workflow_result(
            &ctx.with_timeout(Duration::from_secs(120)),
            &handle,
            Duration::from_millis(200),
        )
        .await
        .unwrap();
    assert_eq!(info.status, WorkflowStatus::Completed);
    assert_eq!(info.result, Some(json!("Processed activity: amar")));

    worker.stop().await;
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_env_config_drives_worker() {
    let config = AppConfig::from_lookup(|var| match var {
        "MAMMOTH_WORKER_ID" => Some("sample-worker".to_string()),
        "MAMMOTH_MAX_CONCURRENT_ACTIVITIES" => Some("2".to_string()),
        _ => None,
    })
    .unwrap();
    let bootstrap = Bootstrap::connect(config.service.clone()).unwrap();
    let worker = bootstrap.worker(registry().unwrap(), config.worker_config());

    worker.start().await.unwrap();
    assert_eq!(worker.identity(), "sample-worker");
    assert_eq!(worker.config().max_concurrent_activity_tasks, 2);
    worker.stop().await;
}

#[test_log::test(tokio::test)]
async fn test_second_start_fails_deterministically() {
    let bootstrap = bootstrap();
    let worker = bootstrap.worker(registry().unwrap(), bootstrap.worker_config(TASK_LIST));
    worker.start().await.unwrap();

    for _ in 0..2 {
        assert!(matches!(
            worker.start().await,
            Err(WorkerError::Configuration(ConfigurationError::AlreadyBound))
        ));
    }
    assert_eq!(worker.state(), WorkerState::Polling);
    worker.stop().await;
}

#[test_log::test(tokio::test)]
async fn test_unknown_domain_is_fatal() {
    let bootstrap = bootstrap();
    let worker = bootstrap.worker(registry().unwrap(), WorkerConfig::new("missing", TASK_LIST));

    let err = worker.start().await.unwrap_err();
    assert!(matches!(
        err,
        WorkerError::Connection(ConnectionError::DomainNotFound(_))
    ));
    assert_eq!(worker.state(), WorkerState::Failed);
}

#[test]
fn test_unsupported_endpoint_is_fatal() {
    let config = ServiceConfig::new("cadence-test", "cadence-frontend", "tchannel://127.0.0.1:7833");
    assert!(matches!(
        Bootstrap::connect(config),
        Err(ConnectionError::UnsupportedTransport(_))
    ));
}
