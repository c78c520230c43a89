//! Ephemeral Conjur test environments.
//!
//! A [`Provisioner`] creates a private network, starts Postgres and Conjur
//! on it, waits for both to become ready, and hands back an [`Environment`]
//! with the admin API key and the host port Conjur is published on. Any
//! failure part way through removes what the run had created.
//!
//! ```no_run
//! use provisioner::{Provisioner, ProvisionConfig};
//! use runtime::DockerRuntime;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = Arc::new(DockerRuntime::with_default_config().await?);
//! let provisioner = Provisioner::new(runtime, ProvisionConfig::default())?;
//!
//! let environment = provisioner.provision().await?;
//! println!("Conjur on port {}", environment.host_port());
//!
//! provisioner.teardown(&environment).await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod exec;
pub mod launcher;
pub mod provision;
pub mod token;

pub use config::ProvisionConfig;
pub use exec::{execute, ExecError, ExecResult};
pub use launcher::{launch, LaunchError};
pub use provision::{
    Compensation, CompensationStack, Environment, ProvisionError, Provisioner, Step,
};
pub use token::{random_bytes, random_url_safe_string, EntropyError};
