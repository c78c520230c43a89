//! In-memory container runtime (testing only)
//!
//! `MemoryRuntime` satisfies the `ContainerRuntime` contract without a
//! container engine. It tracks live networks and containers, records every
//! call, lets tests inject failures per operation, and plays back scripted
//! exec output.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::provider::{ContainerRuntime, ExecStream, RuntimeError, RuntimeResult};
use crate::types::{
    ContainerRef, ContainerSpec, ExecFrame, ExecStatus, NetworkEndpoint, NetworkOptions,
    PortBinding,
};

/// Runtime operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateNetwork,
    RemoveNetwork,
    PullImage,
    CreateContainer,
    StartContainer,
    InspectContainer,
    RemoveContainer,
    ExecCreate,
    ExecAttach,
    ExecInspect,
    Ping,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Operation::CreateNetwork => "create_network",
            Operation::RemoveNetwork => "remove_network",
            Operation::PullImage => "pull_image",
            Operation::CreateContainer => "create_container",
            Operation::StartContainer => "start_container",
            Operation::InspectContainer => "inspect_container",
            Operation::RemoveContainer => "remove_container",
            Operation::ExecCreate => "exec_create",
            Operation::ExecAttach => "exec_attach",
            Operation::ExecInspect => "exec_inspect",
            Operation::Ping => "ping",
        }
    }
}

/// What an exec prints, how long it takes, and how it exits.
#[derive(Debug, Clone)]
pub struct ScriptedExec {
    pub frames: Vec<ExecFrame>,
    pub exit_code: i64,
    pub delay: Duration,
}

impl ScriptedExec {
    pub fn exit(exit_code: i64) -> Self {
        Self {
            frames: Vec::new(),
            exit_code,
            delay: Duration::ZERO,
        }
    }

    pub fn success() -> Self {
        Self::exit(0)
    }

    pub fn with_stdout(mut self, data: &str) -> Self {
        self.frames.push(ExecFrame::stdout(data.to_string()));
        self
    }

    pub fn with_stderr(mut self, data: &str) -> Self {
        self.frames.push(ExecFrame::stderr(data.to_string()));
        self
    }

    /// Wait this long before emitting any output.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug)]
struct FakeContainer {
    spec: ContainerSpec,
    running: bool,
    ports: HashMap<String, Vec<PortBinding>>,
    ip_address: String,
}

#[derive(Debug)]
struct FakeExec {
    container_id: String,
    script: ScriptedExec,
}

#[derive(Debug, Default)]
struct State {
    networks: BTreeMap<String, NetworkOptions>,
    containers: BTreeMap<String, FakeContainer>,
    execs: HashMap<String, FakeExec>,
    scripts: HashMap<String, ScriptedExec>,
    failures: HashMap<Operation, Option<String>>,
    pulled: HashSet<String>,
    calls: Vec<String>,
    exec_commands: Vec<Vec<String>>,
    next_id: u64,
    next_port: u16,
}

/// In-memory `ContainerRuntime`.
#[derive(Debug)]
pub struct MemoryRuntime {
    state: Mutex<State>,
    // One clone per exec stream still held by a caller.
    attached: Arc<()>,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_port: 32768,
                ..State::default()
            }),
            attached: Arc::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call to `operation` fail.
    pub fn fail_on(&self, operation: Operation) {
        self.state().failures.insert(operation, None);
    }

    /// Make `operation` fail only when its target (network name, image, or
    /// the image of the container it acts on) contains `target`.
    pub fn fail_on_target(&self, operation: Operation, target: &str) {
        self.state()
            .failures
            .insert(operation, Some(target.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Script every exec run in containers created from `image`.
    pub fn script_exec(&self, image: &str, script: ScriptedExec) {
        self.state().scripts.insert(image.to_string(), script);
    }

    pub fn networks(&self) -> Vec<String> {
        self.state().networks.keys().cloned().collect()
    }

    /// Ids of containers that exist (running or not).
    pub fn containers(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    /// Specs of the live containers created from `image`.
    pub fn containers_for_image(&self, image: &str) -> Vec<ContainerSpec> {
        self.state()
            .containers
            .values()
            .filter(|container| container.spec.image == image)
            .map(|container| container.spec.clone())
            .collect()
    }

    /// Every call made so far, as `operation target`.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn exec_commands(&self) -> Vec<Vec<String>> {
        self.state().exec_commands.clone()
    }

    /// Exec output streams handed out and not yet dropped.
    pub fn open_exec_streams(&self) -> usize {
        Arc::strong_count(&self.attached) - 1
    }

    pub fn pulled_images(&self) -> Vec<String> {
        let mut images: Vec<_> = self.state().pulled.iter().cloned().collect();
        images.sort();
        images
    }
}

impl State {
    fn record(&mut self, operation: Operation, target: &str) -> RuntimeResult<()> {
        self.calls.push(format!("{} {}", operation.name(), target));
        match self.failures.get(&operation) {
            Some(None) => Err(RuntimeError::Injected {
                operation: operation.name(),
            }),
            Some(Some(filter)) if target.contains(filter.as_str()) => Err(RuntimeError::Injected {
                operation: operation.name(),
            }),
            _ => Ok(()),
        }
    }

    fn container(&self, id: &str) -> RuntimeResult<&FakeContainer> {
        self.containers.get(id).ok_or_else(|| RuntimeError::NotFound {
            kind: "container",
            name: id.to_string(),
        })
    }

    /// Target string used for failure matching on container operations.
    fn container_target(&self, id: &str) -> String {
        match self.containers.get(id) {
            Some(container) => format!("{} {}", id, container.spec.image),
            None => id.to_string(),
        }
    }

    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{:012x}", prefix, self.next_id)
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn create_network(&self, name: &str, options: &NetworkOptions) -> RuntimeResult<()> {
        let mut state = self.state();
        state.record(Operation::CreateNetwork, name)?;
        if options.check_duplicate && state.networks.contains_key(name) {
            return Err(RuntimeError::Conflict {
                kind: "network",
                name: name.to_string(),
            });
        }
        state.networks.insert(name.to_string(), options.clone());
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> RuntimeResult<()> {
        let mut state = self.state();
        state.record(Operation::RemoveNetwork, name)?;
        if !state.networks.contains_key(name) {
            return Err(RuntimeError::NotFound {
                kind: "network",
                name: name.to_string(),
            });
        }
        let attached = state.containers.values().any(|container| {
            container
                .spec
                .network
                .as_ref()
                .is_some_and(|attachment| attachment.network == name)
        });
        if attached {
            return Err(RuntimeError::InUse {
                kind: "network",
                name: name.to_string(),
            });
        }
        state.networks.remove(name);
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        let mut state = self.state();
        state.record(Operation::PullImage, image)?;
        state.pulled.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut state = self.state();
        state.record(Operation::CreateContainer, &spec.image)?;
        if !state.pulled.contains(&spec.image) {
            return Err(RuntimeError::NotFound {
                kind: "image",
                name: spec.image.clone(),
            });
        }
        if let Some(attachment) = &spec.network {
            if !state.networks.contains_key(&attachment.network) {
                return Err(RuntimeError::NotFound {
                    kind: "network",
                    name: attachment.network.clone(),
                });
            }
        }

        let id = state.allocate_id("c");
        let mut ports = HashMap::new();
        for (port, bindings) in &spec.port_bindings {
            let mut resolved = Vec::new();
            for binding in bindings {
                let host_port = match binding.host_port.as_deref() {
                    Some(port) if !port.is_empty() => port.to_string(),
                    _ => {
                        let port = state.next_port;
                        state.next_port += 1;
                        port.to_string()
                    }
                };
                resolved.push(PortBinding {
                    host_ip: Some(binding.host_ip.clone().unwrap_or_else(|| "0.0.0.0".to_string())),
                    host_port: Some(host_port),
                });
            }
            ports.insert(port.clone(), resolved);
        }
        let ip_address = format!("172.18.0.{}", state.containers.len() + 2);

        state.containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                running: false,
                ports,
                ip_address,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        let mut state = self.state();
        let target = state.container_target(id);
        state.record(Operation::StartContainer, &target)?;
        match state.containers.get_mut(id) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(RuntimeError::NotFound {
                kind: "container",
                name: id.to_string(),
            }),
        }
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerRef> {
        let mut state = self.state();
        let target = state.container_target(id);
        state.record(Operation::InspectContainer, &target)?;
        let container = state.container(id)?;

        let mut networks = HashMap::new();
        if let Some(attachment) = &container.spec.network {
            networks.insert(
                attachment.network.clone(),
                NetworkEndpoint {
                    ip_address: Some(container.ip_address.clone()),
                    aliases: attachment.aliases.clone(),
                },
            );
        }

        // Unstarted containers have no published ports.
        let ports = if container.running {
            container.ports.clone()
        } else {
            HashMap::new()
        };

        Ok(ContainerRef {
            id: id.to_string(),
            name: format!("/{}", container.spec.name.as_deref().unwrap_or(id)),
            image: container.spec.image.clone(),
            ports,
            networks,
        })
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        let mut state = self.state();
        let target = state.container_target(id);
        state.record(Operation::RemoveContainer, &target)?;
        match state.containers.remove(id) {
            Some(_) => {
                state.execs.retain(|_, exec| exec.container_id != id);
                Ok(())
            }
            None => Err(RuntimeError::NotFound {
                kind: "container",
                name: id.to_string(),
            }),
        }
    }

    async fn exec_create(&self, container_id: &str, cmd: &[String]) -> RuntimeResult<String> {
        let mut state = self.state();
        let target = state.container_target(container_id);
        state.record(Operation::ExecCreate, &target)?;
        let container = state.container(container_id)?;
        if !container.running {
            return Err(RuntimeError::Conflict {
                kind: "exec",
                name: format!("container {} is not running", container_id),
            });
        }
        let script = state
            .scripts
            .get(&container.spec.image)
            .cloned()
            .unwrap_or_else(ScriptedExec::success);

        let exec_id = state.allocate_id("e");
        state.exec_commands.push(cmd.to_vec());
        state.execs.insert(
            exec_id.clone(),
            FakeExec {
                container_id: container_id.to_string(),
                script,
            },
        );
        Ok(exec_id)
    }

    async fn exec_attach(&self, exec_id: &str) -> RuntimeResult<ExecStream> {
        let mut state = self.state();
        state.record(Operation::ExecAttach, exec_id)?;
        let exec = state.execs.get(exec_id).ok_or_else(|| RuntimeError::NotFound {
            kind: "exec",
            name: exec_id.to_string(),
        })?;

        let frames = exec.script.frames.clone();
        let delay = exec.script.delay;
        let attached = self.attached.clone();
        let stream = futures::stream::once(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            futures::stream::iter(frames.into_iter().map(Ok))
        })
        .flatten()
        .map(move |frame| {
            let _ = &attached;
            frame
        });
        Ok(stream.boxed())
    }

    async fn exec_inspect(&self, exec_id: &str) -> RuntimeResult<ExecStatus> {
        let mut state = self.state();
        state.record(Operation::ExecInspect, exec_id)?;
        let exec = state.execs.get(exec_id).ok_or_else(|| RuntimeError::NotFound {
            kind: "exec",
            name: exec_id.to_string(),
        })?;
        Ok(ExecStatus {
            running: false,
            exit_code: Some(exec.script.exit_code),
        })
    }

    async fn ping(&self) -> RuntimeResult<()> {
        self.state().record(Operation::Ping, "")
    }

    fn runtime_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NetworkAttachment, StreamChannel};
    use tokio_test::{assert_err, assert_ok};

    async fn started(runtime: &MemoryRuntime, spec: &ContainerSpec) -> String {
        runtime.pull_image(&spec.image).await.unwrap();
        let id = runtime.create_container(spec).await.unwrap();
        runtime.start_container(&id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_network_lifecycle() {
        let runtime = MemoryRuntime::new();
        assert_ok!(runtime.create_network("net", &NetworkOptions::attachable()).await);
        assert!(matches!(
            runtime.create_network("net", &NetworkOptions::attachable()).await,
            Err(RuntimeError::Conflict { .. })
        ));
        assert_eq!(runtime.networks(), vec!["net"]);

        assert_ok!(runtime.remove_network("net").await);
        assert!(runtime.networks().is_empty());
        assert!(matches!(
            runtime.remove_network("net").await,
            Err(RuntimeError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_network_in_use_until_container_removed() {
        let runtime = MemoryRuntime::new();
        runtime
            .create_network("net", &NetworkOptions::attachable())
            .await
            .unwrap();
        let spec = ContainerSpec::new("postgres:10.15")
            .with_network(NetworkAttachment::new("net", "database"));
        let id = started(&runtime, &spec).await;

        assert!(matches!(
            runtime.remove_network("net").await,
            Err(RuntimeError::InUse { .. })
        ));
        assert_ok!(runtime.remove_container(&id).await);
        assert_ok!(runtime.remove_network("net").await);
    }

    #[tokio::test]
    async fn test_create_requires_pulled_image() {
        let runtime = MemoryRuntime::new();
        let result = runtime.create_container(&ContainerSpec::new("alpine")).await;
        assert!(matches!(result, Err(RuntimeError::NotFound { kind: "image", .. })));
    }

    #[tokio::test]
    async fn test_ports_assigned_on_start() {
        let runtime = MemoryRuntime::new();
        let spec = ContainerSpec::new("cyberark/conjur").with_port("80", PortBinding::any());
        runtime.pull_image(&spec.image).await.unwrap();
        let id = runtime.create_container(&spec).await.unwrap();

        let before = runtime.inspect_container(&id).await.unwrap();
        assert_eq!(before.host_port("80"), None);

        runtime.start_container(&id).await.unwrap();
        let after = runtime.inspect_container(&id).await.unwrap();
        assert_eq!(after.host_port("80"), Some("32768"));
    }

    #[tokio::test]
    async fn test_failure_injection_by_target() {
        let runtime = MemoryRuntime::new();
        runtime.fail_on_target(Operation::PullImage, "conjur");

        assert_ok!(runtime.pull_image("postgres:10.15").await);
        assert_err!(runtime.pull_image("cyberark/conjur").await);

        runtime.clear_failures();
        assert_ok!(runtime.pull_image("cyberark/conjur").await);
        assert_eq!(
            runtime.calls(),
            vec![
                "pull_image postgres:10.15",
                "pull_image cyberark/conjur",
                "pull_image cyberark/conjur",
            ]
        );
    }

    #[tokio::test]
    async fn test_scripted_exec() {
        let runtime = MemoryRuntime::new();
        runtime.script_exec(
            "alpine",
            ScriptedExec::exit(3).with_stdout("out").with_stderr("err"),
        );
        let id = started(&runtime, &ContainerSpec::new("alpine")).await;

        let exec_id = runtime.exec_create(&id, &["sh".to_string()]).await.unwrap();
        let frames: Vec<_> = runtime
            .exec_attach(&exec_id)
            .await
            .unwrap()
            .map(|frame| frame.unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].channel, StreamChannel::Stdout);
        assert_eq!(frames[1].channel, StreamChannel::Stderr);

        let status = runtime.exec_inspect(&exec_id).await.unwrap();
        assert_eq!(status.exit_code, Some(3));
        assert_eq!(runtime.exec_commands(), vec![vec!["sh".to_string()]]);
    }

    #[tokio::test]
    async fn test_open_exec_streams_tracks_drops() {
        let runtime = MemoryRuntime::new();
        let id = started(&runtime, &ContainerSpec::new("alpine")).await;
        let exec_id = runtime.exec_create(&id, &["true".to_string()]).await.unwrap();

        let stream = runtime.exec_attach(&exec_id).await.unwrap();
        assert_eq!(runtime.open_exec_streams(), 1);
        drop(stream);
        assert_eq!(runtime.open_exec_streams(), 0);
    }

    #[tokio::test]
    async fn test_exec_requires_running_container() {
        let runtime = MemoryRuntime::new();
        runtime.pull_image("alpine").await.unwrap();
        let id = runtime
            .create_container(&ContainerSpec::new("alpine"))
            .await
            .unwrap();
        assert_err!(runtime.exec_create(&id, &["true".to_string()]).await);
    }
}
