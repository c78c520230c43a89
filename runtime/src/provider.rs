use crate::types::{ContainerRef, ContainerSpec, ExecFrame, ExecStatus, NetworkOptions};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[cfg(feature = "docker")]
    #[error("Docker API error: {0}")]
    Api(#[from] bollard::errors::Error),

    #[error("Not found: {kind} '{name}'")]
    NotFound { kind: &'static str, name: String },

    #[error("Conflict: {kind} '{name}' already exists")]
    Conflict { kind: &'static str, name: String },

    #[error("{kind} '{name}' is still in use")]
    InUse { kind: &'static str, name: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Exec stream error: {message}")]
    Stream { message: String },

    #[error("Runtime response is missing '{field}'")]
    MissingField { field: &'static str },

    #[error("Injected failure in {operation}")]
    Injected { operation: &'static str },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Live output of an exec, one channel-tagged frame at a time.
pub type ExecStream = BoxStream<'static, RuntimeResult<ExecFrame>>;

/// The operations the provisioner needs from a container engine.
///
/// Implementations must be shareable across tasks; the provisioner holds
/// one behind an `Arc` for the lifetime of the process.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_network(&self, name: &str, options: &NetworkOptions) -> RuntimeResult<()>;

    async fn remove_network(&self, name: &str) -> RuntimeResult<()>;

    /// Pull an image. Already-present images are not an error.
    async fn pull_image(&self, image: &str) -> RuntimeResult<()>;

    /// Create (but do not start) a container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerRef>;

    /// Forcefully remove a container, running or not.
    async fn remove_container(&self, id: &str) -> RuntimeResult<()>;

    /// Register a command to run inside `container_id` with stdout and
    /// stderr attached, returning the exec id.
    async fn exec_create(&self, container_id: &str, cmd: &[String]) -> RuntimeResult<String>;

    /// Start the exec and attach to its multiplexed output.
    async fn exec_attach(&self, exec_id: &str) -> RuntimeResult<ExecStream>;

    async fn exec_inspect(&self, exec_id: &str) -> RuntimeResult<ExecStatus>;

    async fn ping(&self) -> RuntimeResult<()>;

    fn runtime_name(&self) -> &'static str;
}
