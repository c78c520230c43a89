pub mod config;
#[cfg(feature = "docker")]
pub mod docker;
pub mod fakes;
pub mod provider;
pub mod types;

pub use config::{DockerConfig, DockerEndpoint};
pub use provider::{ContainerRuntime, ExecStream, RuntimeError, RuntimeResult};
pub use types::{
    port_key, ContainerRef, ContainerSpec, ExecFrame, ExecStatus, NetworkAttachment,
    NetworkEndpoint, NetworkOptions, PortBinding, StreamChannel,
};

#[cfg(feature = "docker")]
pub use docker::DockerRuntime;

pub mod prelude {
    pub use crate::config::*;
    pub use crate::provider::*;
    pub use crate::types::*;

    #[cfg(feature = "docker")]
    pub use crate::docker::*;
}
