use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How to reach the Docker Engine API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DockerEndpoint {
    /// Platform defaults (the local socket or named pipe, honouring `DOCKER_HOST`).
    Local,
    /// A unix socket at the given path.
    Unix(String),
    /// A TCP endpoint such as `tcp://10.0.0.2:2375` or `http://localhost:2375`.
    Http(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    pub endpoint: DockerEndpoint,
    pub timeout: Duration,
    pub negotiate_version: bool,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            endpoint: DockerEndpoint::Local,
            timeout: Duration::from_secs(120),
            negotiate_version: true,
        }
    }
}

impl DockerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from the `DOCKER_HOST` environment variable.
    pub fn from_env() -> Self {
        let host = std::env::var("DOCKER_HOST").ok();
        Self::default().with_endpoint(Self::endpoint_from_host(host.as_deref()))
    }

    pub fn endpoint_from_host(host: Option<&str>) -> DockerEndpoint {
        match host.map(str::trim) {
            None | Some("") => DockerEndpoint::Local,
            Some(host) => {
                if let Some(path) = host.strip_prefix("unix://") {
                    DockerEndpoint::Unix(path.to_string())
                } else if host.starts_with("tcp://")
                    || host.starts_with("http://")
                    || host.starts_with("https://")
                {
                    DockerEndpoint::Http(host.to_string())
                } else {
                    DockerEndpoint::Local
                }
            }
        }
    }

    pub fn with_endpoint(mut self, endpoint: DockerEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_version_negotiation(mut self, negotiate: bool) -> Self {
        self.negotiate_version = negotiate;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        match &self.endpoint {
            DockerEndpoint::Local => {}
            DockerEndpoint::Unix(path) => {
                if path.is_empty() {
                    return Err("Unix socket path cannot be empty".to_string());
                }
                if !path.starts_with('/') {
                    return Err("Unix socket path must be absolute".to_string());
                }
            }
            DockerEndpoint::Http(url) => {
                if !url.starts_with("tcp://")
                    && !url.starts_with("http://")
                    && !url.starts_with("https://")
                {
                    return Err(
                        "Docker host must start with tcp://, http:// or https://".to_string()
                    );
                }
            }
        }

        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}
