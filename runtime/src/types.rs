use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Options for creating a user-defined network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOptions {
    pub attachable: bool,
    pub check_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl NetworkOptions {
    /// An attachable bridge network that refuses to shadow an existing name.
    pub fn attachable() -> Self {
        Self {
            attachable: true,
            check_duplicate: true,
            driver: None,
            labels: HashMap::new(),
        }
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self::attachable()
    }
}

/// Where a container joins a network and the names it answers to there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub network: String,
    pub aliases: Vec<String>,
}

impl NetworkAttachment {
    pub fn new(network: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            aliases: vec![alias.into()],
        }
    }
}

/// A host side binding for a container port. Empty fields let the runtime
/// pick (any interface, any free port).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<String>,
}

impl PortBinding {
    /// Bind on all interfaces to a host-assigned port.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn host_port(port: impl Into<String>) -> Self {
        Self {
            host_ip: None,
            host_port: Some(port.into()),
        }
    }
}

/// Normalize a container port to the `<port>/<proto>` key the runtime uses.
/// A bare port number is TCP.
pub fn port_key(port: &str) -> String {
    if port.contains('/') {
        port.to_string()
    } else {
        format!("{}/tcp", port)
    }
}

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkAttachment>,
    /// Keyed by `port_key` form, e.g. `80/tcp`.
    #[serde(default)]
    pub port_bindings: HashMap<String, Vec<PortBinding>>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: None,
            cmd: None,
            env: Vec::new(),
            network: None,
            port_bindings: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = Some(cmd.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{}={}", key, value));
        self
    }

    pub fn with_network(mut self, attachment: NetworkAttachment) -> Self {
        self.network = Some(attachment);
        self
    }

    pub fn with_port(mut self, container_port: &str, binding: PortBinding) -> Self {
        self.port_bindings
            .entry(port_key(container_port))
            .or_default()
            .push(binding);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A container's address on one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Runtime metadata of a started container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Published ports, keyed by `port_key` form.
    #[serde(default)]
    pub ports: HashMap<String, Vec<PortBinding>>,
    /// Attached networks, keyed by network name.
    #[serde(default)]
    pub networks: HashMap<String, NetworkEndpoint>,
}

impl ContainerRef {
    /// The first host port bound to `container_port`, if any.
    pub fn host_port(&self, container_port: &str) -> Option<&str> {
        self.ports
            .get(&port_key(container_port))?
            .iter()
            .find_map(|binding| binding.host_port.as_deref())
            .filter(|port| !port.is_empty())
    }

    pub fn ip_address(&self, network: &str) -> Option<&str> {
        self.networks.get(network)?.ip_address.as_deref()
    }
}

/// Which output of an exec a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamChannel {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamChannel::Stdout => write!(f, "stdout"),
            StreamChannel::Stderr => write!(f, "stderr"),
        }
    }
}

/// One chunk of exec output tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecFrame {
    pub channel: StreamChannel,
    pub data: Bytes,
}

impl ExecFrame {
    pub fn stdout(data: impl Into<Bytes>) -> Self {
        Self {
            channel: StreamChannel::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<Bytes>) -> Self {
        Self {
            channel: StreamChannel::Stderr,
            data: data.into(),
        }
    }
}

/// Terminal state of an exec as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecStatus {
    pub running: bool,
    pub exit_code: Option<i64>,
}
