//! Tests against a real Docker daemon.
//!
//! These need a reachable Docker Engine and network access to pull images,
//! so they are ignored by default:
//!
//! ```text
//! cargo test -p provisioner --test docker_tests -- --ignored
//! ```

use provisioner::exec::{execute, shell};
use provisioner::{launch, ProvisionConfig, Provisioner};
use runtime::{ContainerRuntime, ContainerSpec, DockerRuntime};
use serial_test::serial;
use std::sync::Arc;
use std::time::{Duration, Instant};

const EXEC_IMAGE: &str = "alpine:3.19";

async fn docker() -> Arc<DockerRuntime> {
    Arc::new(
        DockerRuntime::with_default_config()
            .await
            .expect("Docker daemon should be reachable"),
    )
}

/// A long-running alpine container to exec into.
async fn sleeper(runtime: &DockerRuntime) -> String {
    let spec = ContainerSpec::new(EXEC_IMAGE).with_cmd(["sleep", "300"]);
    launch(runtime, &spec).await.unwrap().id
}

fn cmd(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_exec_exit_codes() {
    let runtime = docker().await;
    let container = sleeper(&runtime).await;

    let ok = execute(runtime.as_ref(), &container, &cmd(&["true"]), None).await;
    let failed = execute(runtime.as_ref(), &container, &cmd(&["false"]), None).await;
    runtime.remove_container(&container).await.unwrap();

    assert_eq!(ok.unwrap().exit_code, 0);
    assert_eq!(failed.unwrap().exit_code, 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_exec_demultiplexes_output() {
    let runtime = docker().await;
    let container = sleeper(&runtime).await;

    let result = execute(
        runtime.as_ref(),
        &container,
        &shell("printf 'to stdout'; printf 'to stderr' 1>&2; printf ' again'"),
        None,
    )
    .await;
    runtime.remove_container(&container).await.unwrap();

    let result = result.unwrap();
    assert_eq!(result.stdout, "to stdout again");
    assert_eq!(result.stderr, "to stderr");
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_exec_deadline_is_prompt() {
    let runtime = docker().await;
    let container = sleeper(&runtime).await;

    let started = Instant::now();
    let result = execute(
        runtime.as_ref(),
        &container,
        &cmd(&["sleep", "10"]),
        Some(Duration::from_millis(1)),
    )
    .await;
    let elapsed = started.elapsed();
    runtime.remove_container(&container).await.unwrap();

    assert!(result.unwrap_err().is_deadline_exceeded());
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_provision_and_teardown() {
    let runtime = docker().await;
    let config = ProvisionConfig::default()
        .with_readiness_deadline(Duration::from_secs(60))
        .with_bootstrap_deadline(Duration::from_secs(180));
    let provisioner = Provisioner::new(runtime.clone(), config).unwrap();

    let environment = provisioner.provision().await.unwrap();
    assert!(!environment.admin_api_key().is_empty());
    assert_eq!(
        environment.admin_api_key(),
        environment.admin_api_key().trim()
    );
    assert!(environment.host_port().parse::<u16>().is_ok());

    let failures = provisioner.teardown(&environment).await;
    assert!(failures.is_empty());
    assert!(runtime
        .inspect_container(&environment.application().id)
        .await
        .is_err());
}
