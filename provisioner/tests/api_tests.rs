//! HTTP API served on an ephemeral port, backed by the in-memory runtime.

use provisioner::api::{router, ApiError, EnvironmentResponse, HealthResponse, MAX_BODY_BYTES};
use provisioner::{ProvisionConfig, Provisioner};
use reqwest::StatusCode;
use runtime::fakes::{MemoryRuntime, Operation, ScriptedExec};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn serve(runtime: Arc<MemoryRuntime>) -> SocketAddr {
    let provisioner = Provisioner::new(runtime, ProvisionConfig::default()).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(Arc::new(provisioner)))
            .await
            .unwrap();
    });
    addr
}

fn scripted_runtime() -> Arc<MemoryRuntime> {
    let runtime = Arc::new(MemoryRuntime::new());
    runtime.script_exec("postgres:10.15", ScriptedExec::success());
    runtime.script_exec(
        "cyberark/conjur",
        ScriptedExec::success().with_stdout("api-key-123\n"),
    );
    runtime
}

/// Poll `condition` for up to five seconds.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

async fn post_with_timeout(
    addr: SocketAddr,
    timeout: Duration,
) -> reqwest::Result<reqwest::Response> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap()
        .post(format!("http://{}/conjur", addr))
        .send()
        .await
}

#[tokio::test]
async fn test_index() {
    let addr = serve(scripted_runtime()).await;
    let response = reqwest::get(format!("http://{}/", addr)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "Welcome!\n");
}

#[tokio::test]
async fn test_create_environment() {
    let runtime = scripted_runtime();
    let addr = serve(runtime.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/conjur", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let environment: EnvironmentResponse = response.json().await.unwrap();
    assert_eq!(environment.admin_api_key, "api-key-123");
    assert!(!environment.host_port.is_empty());
    assert_eq!(runtime.networks(), vec![environment.id]);
}

#[tokio::test]
async fn test_create_environment_with_json_body() {
    let addr = serve(scripted_runtime()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/conjur", addr))
        .json(&serde_json::json!({ "account": "ignored" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let runtime = scripted_runtime();
    let addr = serve(runtime.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/conjur", addr))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let error: ApiError = response.json().await.unwrap();
    assert_eq!(error.code, 422);
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_provision_failure_is_500() {
    let runtime = scripted_runtime();
    runtime.fail_on(Operation::CreateNetwork);
    let addr = serve(runtime).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/conjur", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.text().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let runtime = scripted_runtime();
    let addr = serve(runtime.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/conjur", addr))
        .body(vec![b' '; MAX_BODY_BYTES + 1])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn test_client_timeout_does_not_interrupt_run() {
    let runtime = scripted_runtime();
    runtime.script_exec(
        "cyberark/conjur",
        ScriptedExec::success()
            .with_stdout("api-key-123\n")
            .with_delay(Duration::from_secs(1)),
    );
    let addr = serve(runtime.clone()).await;

    let response = post_with_timeout(addr, Duration::from_millis(200)).await;
    assert!(response.unwrap_err().is_timeout());

    // The bootstrap still runs to completion and its exit status is read.
    let finished = eventually(|| {
        runtime
            .calls()
            .iter()
            .filter(|call| call.starts_with("exec_inspect"))
            .count()
            == 2
    })
    .await;
    assert!(finished);
    assert_eq!(runtime.networks().len(), 1);
    assert_eq!(runtime.containers().len(), 2);
}

#[tokio::test]
async fn test_client_timeout_still_cleans_up_failed_run() {
    let runtime = scripted_runtime();
    runtime.script_exec(
        "cyberark/conjur",
        ScriptedExec::exit(1)
            .with_stderr("account exists\n")
            .with_delay(Duration::from_secs(1)),
    );
    let addr = serve(runtime.clone()).await;

    let response = post_with_timeout(addr, Duration::from_millis(200)).await;
    assert!(response.is_err());

    let released =
        eventually(|| runtime.networks().is_empty() && runtime.containers().is_empty()).await;
    assert!(released, "resources left behind: {:?}", runtime.calls());
    assert!(runtime
        .calls()
        .iter()
        .any(|call| call.starts_with("remove_network")));
}

#[tokio::test]
async fn test_show_environment_echoes_id() {
    let addr = serve(scripted_runtime()).await;

    let response = reqwest::get(format!("http://{}/conjur/1700000000-abcdefgh", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let environment: EnvironmentResponse = response.json().await.unwrap();
    assert_eq!(environment.id, "1700000000-abcdefgh");
    assert!(environment.admin_api_key.is_empty());
}

#[tokio::test]
async fn test_health_reports_runtime() {
    let runtime = scripted_runtime();
    let addr = serve(runtime.clone()).await;

    let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = response.json().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.runtime, "memory");

    runtime.fail_on(Operation::Ping);
    let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
