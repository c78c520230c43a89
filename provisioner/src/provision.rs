//! The provisioning workflow.
//!
//! One run creates, in order: a network, the database container, the
//! application container. Each creation pushes its inverse onto a
//! [`CompensationStack`]; if any later step fails the stack is unwound
//! newest-first and the original error is returned. A run dropped before it
//! finishes still releases what it created, on a background task.

use crate::config::ProvisionConfig;
use crate::exec::{self, ExecError, ExecResult};
use crate::launcher::{self, LaunchError};
use crate::token::{self, EntropyError};
use chrono::Utc;
use runtime::{
    ContainerRef, ContainerRuntime, ContainerSpec, NetworkAttachment, NetworkOptions,
    PortBinding, RuntimeError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Label put on every resource of an environment, valued with its id.
pub const ENVIRONMENT_LABEL: &str = "conjur-sandbox.environment";

const READINESS_SCRIPT: &str = r#"
until pg_isready
do
    echo "."
    sleep 1
done
"#;

fn bootstrap_script(account: &str) -> String {
    format!(
        r#"
conjurctl wait 1>&2;
conjurctl account create {} | grep "^API key for admin:" | sed "s/^API key for admin: //"
"#,
        account
    )
}

/// Commands run inside containers during provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    DatabaseReadiness,
    Bootstrap,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::DatabaseReadiness => write!(f, "database readiness check"),
            Step::Bootstrap => write!(f, "application bootstrap"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Invalid provisioning configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to create network '{network}': {source}")]
    Network {
        network: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Container launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("{step} failed: {source}")]
    Exec {
        step: Step,
        #[source]
        source: ExecError,
    },

    #[error("{step} exited with status {exit_code}: {stderr}")]
    CommandFailed {
        step: Step,
        exit_code: i64,
        stderr: String,
    },

    #[error(transparent)]
    Entropy(#[from] EntropyError),

    #[error("Bootstrap did not print an admin API key")]
    MissingCredential,

    #[error("Application port {port} has no host binding")]
    MissingHostPort { port: String },
}

impl ProvisionError {
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ProvisionError::Exec { source, .. } if source.is_deadline_exceeded())
    }
}

/// A resource to release if a later step fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    RemoveNetwork { name: String },
    RemoveContainer { id: String, role: &'static str },
}

impl std::fmt::Display for Compensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compensation::RemoveNetwork { name } => write!(f, "remove network {}", name),
            Compensation::RemoveContainer { id, role } => {
                write!(f, "remove {} container {}", role, id)
            }
        }
    }
}

/// Compensating actions in creation order.
#[derive(Debug, Default)]
pub struct CompensationStack {
    actions: Vec<Compensation>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Compensation) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Forget every action; the resources now outlive this stack.
    pub fn disarm(&mut self) {
        self.actions.clear();
    }

    /// Run every action, newest first. Failures are logged and returned,
    /// never retried.
    pub async fn unwind(
        &mut self,
        runtime: &dyn ContainerRuntime,
    ) -> Vec<(Compensation, RuntimeError)> {
        let mut failures = Vec::new();
        while let Some(action) = self.actions.pop() {
            let result = match &action {
                Compensation::RemoveNetwork { name } => runtime.remove_network(name).await,
                Compensation::RemoveContainer { id, .. } => runtime.remove_container(id).await,
            };
            match result {
                Ok(()) => debug!("Cleanup: {}", action),
                Err(err) => {
                    warn!("Cleanup failed to {}: {}", action, err);
                    failures.push((action, err));
                }
            }
        }
        failures
    }
}

/// Holds a run's compensations while it is in flight. Dropped with actions
/// still on the stack, it unwinds them on a spawned task.
struct CleanupGuard {
    runtime: Arc<dyn ContainerRuntime>,
    stack: CompensationStack,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.stack.is_empty() {
            return;
        }
        let mut stack = std::mem::take(&mut self.stack);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "Provisioning abandoned; releasing {} resource(s)",
                    stack.len()
                );
                let runtime = self.runtime.clone();
                handle.spawn(async move {
                    let failures = stack.unwind(runtime.as_ref()).await;
                    if !failures.is_empty() {
                        warn!(
                            "{} cleanup action(s) failed after abandoned run",
                            failures.len()
                        );
                    }
                });
            }
            Err(_) => error!(
                "Provisioning abandoned outside a runtime; {} resource(s) left behind",
                stack.len()
            ),
        }
    }
}

/// A fully provisioned environment. Only [`Provisioner::provision`] builds
/// one, and only when every step succeeded.
#[derive(Clone)]
pub struct Environment {
    id: String,
    admin_api_key: String,
    application: ContainerRef,
    database: ContainerRef,
    host_port: String,
}

impl Environment {
    /// Run identifier; also the name of the environment's network.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn admin_api_key(&self) -> &str {
        &self.admin_api_key
    }

    pub fn application(&self) -> &ContainerRef {
        &self.application
    }

    pub fn database(&self) -> &ContainerRef {
        &self.database
    }

    /// Host port the application is reachable on.
    pub fn host_port(&self) -> &str {
        &self.host_port
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.id)
            .field("admin_api_key", &"<redacted>")
            .field("application", &self.application.id)
            .field("database", &self.database.id)
            .field("host_port", &self.host_port)
            .finish()
    }
}

/// Time-ordered run identifier with a random suffix so runs started in the
/// same second do not share a network name.
pub fn run_id() -> Result<String, EntropyError> {
    let suffix = token::random_url_safe_string(6)?;
    Ok(format!("{}-{}", Utc::now().timestamp(), suffix))
}

pub struct Provisioner {
    runtime: Arc<dyn ContainerRuntime>,
    config: ProvisionConfig,
}

impl Provisioner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: ProvisionConfig,
    ) -> Result<Self, ProvisionError> {
        config
            .validate()
            .map_err(|message| ProvisionError::InvalidConfig { message })?;
        Ok(Self { runtime, config })
    }

    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Bring up a new environment, or release everything this run created
    /// and return the first error.
    #[instrument(skip(self), fields(runtime = self.runtime.runtime_name()))]
    pub async fn provision(&self) -> Result<Environment, ProvisionError> {
        let id = run_id()?;
        let mut undo = CleanupGuard {
            runtime: self.runtime.clone(),
            stack: CompensationStack::new(),
        };

        match self.run(&id, &mut undo.stack).await {
            Ok(environment) => {
                undo.stack.disarm();
                info!(
                    "Provisioned environment {} on host port {}",
                    environment.id, environment.host_port
                );
                Ok(environment)
            }
            Err(err) => {
                error!("Provisioning {} failed: {}", id, err);
                let failures = undo.stack.unwind(self.runtime.as_ref()).await;
                if !failures.is_empty() {
                    warn!(
                        "{} cleanup action(s) failed for environment {}",
                        failures.len(),
                        id
                    );
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        id: &str,
        undo: &mut CompensationStack,
    ) -> Result<Environment, ProvisionError> {
        let runtime = self.runtime.as_ref();
        let config = &self.config;

        let network = NetworkOptions::attachable().with_label(ENVIRONMENT_LABEL, id);
        runtime
            .create_network(id, &network)
            .await
            .map_err(|source| ProvisionError::Network {
                network: id.to_string(),
                source,
            })?;
        undo.push(Compensation::RemoveNetwork {
            name: id.to_string(),
        });
        debug!("Created network {}", id);

        let database_spec = ContainerSpec::new(&config.database_image)
            .with_env("POSTGRES_HOST_AUTH_METHOD", "trust")
            .with_network(NetworkAttachment::new(id, &config.database_alias))
            .with_label(ENVIRONMENT_LABEL, id);
        let database = launcher::launch(runtime, &database_spec).await?;
        undo.push(Compensation::RemoveContainer {
            id: database.id.clone(),
            role: "database",
        });

        self.run_step(
            Step::DatabaseReadiness,
            &database.id,
            &exec::shell(READINESS_SCRIPT),
            config.readiness_deadline,
        )
        .await?;

        let data_key = token::random_url_safe_string(config.data_key_bytes)?;

        let application_spec = ContainerSpec::new(&config.application_image)
            .with_cmd(config.application_command.iter().cloned())
            .with_env("POSTGRES_HOST_AUTH_METHOD", "trust")
            .with_env("DATABASE_URL", &config.database_url())
            .with_env("CONJUR_DATA_KEY", &data_key)
            .with_env("CONJUR_AUTHENTICATORS", "")
            .with_network(NetworkAttachment::new(id, &config.application_alias))
            .with_port(&config.application_port, PortBinding::any())
            .with_label(ENVIRONMENT_LABEL, id);
        let application = launcher::launch(runtime, &application_spec).await?;
        undo.push(Compensation::RemoveContainer {
            id: application.id.clone(),
            role: "application",
        });

        let bootstrap = self
            .run_step(
                Step::Bootstrap,
                &application.id,
                &exec::shell(&bootstrap_script(&config.account)),
                config.bootstrap_deadline,
            )
            .await?;

        let admin_api_key = bootstrap.stdout.trim().to_string();
        if admin_api_key.is_empty() {
            return Err(ProvisionError::MissingCredential);
        }

        let host_port = application
            .host_port(&config.application_port)
            .ok_or_else(|| ProvisionError::MissingHostPort {
                port: config.application_port.clone(),
            })?
            .to_string();

        Ok(Environment {
            id: id.to_string(),
            admin_api_key,
            application,
            database,
            host_port,
        })
    }

    async fn run_step(
        &self,
        step: Step,
        container_id: &str,
        command: &[String],
        deadline: Duration,
    ) -> Result<ExecResult, ProvisionError> {
        debug!("Running {} in {}", step, container_id);
        let result = exec::execute(self.runtime.as_ref(), container_id, command, Some(deadline))
            .await
            .map_err(|source| ProvisionError::Exec { step, source })?;

        if !result.success() {
            return Err(ProvisionError::CommandFailed {
                step,
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }

    /// Remove an environment's containers and network, newest first.
    /// Returns the actions that failed.
    pub async fn teardown(&self, environment: &Environment) -> Vec<(Compensation, RuntimeError)> {
        let mut stack = CompensationStack::new();
        stack.push(Compensation::RemoveNetwork {
            name: environment.id.clone(),
        });
        stack.push(Compensation::RemoveContainer {
            id: environment.database.id.clone(),
            role: "database",
        });
        stack.push(Compensation::RemoveContainer {
            id: environment.application.id.clone(),
            role: "application",
        });
        info!("Tearing down environment {}", environment.id);
        stack.unwind(self.runtime.as_ref()).await
    }
}
