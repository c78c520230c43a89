use crate::config::{DockerConfig, DockerEndpoint};
use crate::provider::{ContainerRuntime, ExecStream, RuntimeError, RuntimeResult};
use crate::types::{
    ContainerRef, ContainerSpec, ExecFrame, ExecStatus, NetworkEndpoint, NetworkOptions,
    PortBinding,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{self, EndpointSettings, HostConfig};
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use tracing::{debug, info};

/// Docker Engine API client.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    config: DockerConfig,
}

impl DockerRuntime {
    pub async fn connect(config: DockerConfig) -> RuntimeResult<Self> {
        config
            .validate()
            .map_err(|message| RuntimeError::InvalidConfig { message })?;

        let timeout_secs = config.timeout.as_secs();
        let docker = match &config.endpoint {
            DockerEndpoint::Local => {
                Docker::connect_with_local_defaults()?.with_timeout(config.timeout)
            }
            #[cfg(unix)]
            DockerEndpoint::Unix(path) => {
                Docker::connect_with_unix(path, timeout_secs, bollard::API_DEFAULT_VERSION)?
            }
            #[cfg(not(unix))]
            DockerEndpoint::Unix(_) => {
                return Err(RuntimeError::InvalidConfig {
                    message: "Unix sockets are not supported on this platform".to_string(),
                })
            }
            DockerEndpoint::Http(url) => {
                Docker::connect_with_http(url, timeout_secs, bollard::API_DEFAULT_VERSION)?
            }
        };

        let docker = if config.negotiate_version {
            docker.negotiate_version().await?
        } else {
            docker
        };

        info!("Connected to Docker endpoint {:?}", config.endpoint);
        Ok(Self { docker, config })
    }

    pub async fn with_default_config() -> RuntimeResult<Self> {
        Self::connect(DockerConfig::from_env()).await
    }

    pub fn config(&self) -> &DockerConfig {
        &self.config
    }

    fn convert_port_bindings(
        bindings: &HashMap<String, Vec<PortBinding>>,
    ) -> HashMap<String, Option<Vec<models::PortBinding>>> {
        bindings
            .iter()
            .map(|(port, bindings)| {
                let converted = bindings
                    .iter()
                    .map(|binding| models::PortBinding {
                        host_ip: binding.host_ip.clone(),
                        host_port: binding.host_port.clone(),
                    })
                    .collect();
                (port.clone(), Some(converted))
            })
            .collect()
    }

    fn convert_inspect(
        response: models::ContainerInspectResponse,
    ) -> RuntimeResult<ContainerRef> {
        let id = response.id.ok_or(RuntimeError::MissingField { field: "Id" })?;
        let image = response
            .config
            .and_then(|config| config.image)
            .or(response.image)
            .unwrap_or_default();
        let settings = response.network_settings.unwrap_or_default();

        let ports = settings
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|(port, bindings)| {
                let bindings = bindings
                    .unwrap_or_default()
                    .into_iter()
                    .map(|binding| PortBinding {
                        host_ip: binding.host_ip,
                        host_port: binding.host_port,
                    })
                    .collect();
                (port, bindings)
            })
            .collect();

        let networks = settings
            .networks
            .unwrap_or_default()
            .into_iter()
            .map(|(name, endpoint)| {
                let endpoint = NetworkEndpoint {
                    ip_address: endpoint.ip_address.filter(|ip| !ip.is_empty()),
                    aliases: endpoint.aliases.unwrap_or_default(),
                };
                (name, endpoint)
            })
            .collect();

        Ok(ContainerRef {
            id,
            name: response.name.unwrap_or_default(),
            image,
            ports,
            networks,
        })
    }
}

/// Split `registry:5000/repo:tag` into repository and tag. Untagged
/// references get `latest`; digest references keep an empty tag.
pub fn split_image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let last_segment = image.rfind('/').map_or(0, |slash| slash + 1);
    match image[last_segment..].rfind(':') {
        Some(colon) => {
            let colon = last_segment + colon;
            (&image[..colon], &image[colon + 1..])
        }
        None => (image, "latest"),
    }
}

/// Map a Docker API error to a typed variant where the status code says
/// what went wrong.
fn classify(err: bollard::errors::Error, kind: &'static str, name: &str) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound {
            kind,
            name: name.to_string(),
        },
        bollard::errors::Error::DockerResponseServerError {
            status_code: 403, ..
        } => RuntimeError::InUse {
            kind,
            name: name.to_string(),
        },
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409, ..
        } => RuntimeError::Conflict {
            kind,
            name: name.to_string(),
        },
        other => RuntimeError::Api(other),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_network(&self, name: &str, options: &NetworkOptions) -> RuntimeResult<()> {
        let request = CreateNetworkOptions {
            name: name.to_string(),
            check_duplicate: options.check_duplicate,
            attachable: options.attachable,
            driver: options
                .driver
                .clone()
                .unwrap_or_else(|| "bridge".to_string()),
            labels: options.labels.clone(),
            ..Default::default()
        };

        self.docker
            .create_network(request)
            .await
            .map_err(|e| classify(e, "network", name))?;
        debug!("Created network {}", name);
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> RuntimeResult<()> {
        self.docker
            .remove_network(name)
            .await
            .map_err(|e| classify(e, "network", name))?;
        debug!("Removed network {}", name);
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        let (repository, tag) = split_image_reference(image);
        let options = CreateImageOptions {
            from_image: repository.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let progress: Vec<_> = self
            .docker
            .create_image(Some(options), None, None)
            .map_err(|e| classify(e, "image", image))
            .try_collect()
            .await?;

        if let Some(status) = progress.last().and_then(|info| info.status.as_deref()) {
            debug!("Pulled {}: {}", image, status);
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .port_bindings
            .keys()
            .map(|port| (port.clone(), HashMap::new()))
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(Self::convert_port_bindings(&spec.port_bindings)),
            ..Default::default()
        };

        let networking_config = spec.network.as_ref().map(|attachment| {
            let endpoint = EndpointSettings {
                aliases: Some(attachment.aliases.clone()),
                ..Default::default()
            };
            NetworkingConfig {
                endpoints_config: HashMap::from([(attachment.network.clone(), endpoint)]),
            }
        });

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.cmd.clone(),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            networking_config,
            ..Default::default()
        };

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| classify(e, "image", &spec.image))?;
        for warning in &response.warnings {
            debug!("Container {} warning: {}", response.id, warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, "container", id))
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerRef> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| classify(e, "container", id))?;
        Self::convert_inspect(response)
    }

    async fn remove_container(&self, id: &str) -> RuntimeResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| classify(e, "container", id))?;
        debug!("Removed container {}", id);
        Ok(())
    }

    async fn exec_create(&self, container_id: &str, cmd: &[String]) -> RuntimeResult<String> {
        let options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(cmd.to_vec()),
            ..Default::default()
        };
        let response = self
            .docker
            .create_exec(container_id, options)
            .await
            .map_err(|e| classify(e, "container", container_id))?;
        Ok(response.id)
    }

    async fn exec_attach(&self, exec_id: &str) -> RuntimeResult<ExecStream> {
        let results = self
            .docker
            .start_exec(exec_id, None::<StartExecOptions>)
            .await
            .map_err(|e| classify(e, "exec", exec_id))?;

        match results {
            StartExecResults::Attached { output, .. } => {
                let frames = output.filter_map(|item| async move {
                    match item {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            Some(Ok(ExecFrame::stdout(message)))
                        }
                        Ok(LogOutput::StdErr { message }) => Some(Ok(ExecFrame::stderr(message))),
                        Ok(LogOutput::StdIn { .. }) => None,
                        Err(e) => Some(Err(RuntimeError::Api(e))),
                    }
                });
                Ok(frames.boxed())
            }
            StartExecResults::Detached => Err(RuntimeError::Stream {
                message: format!("exec {} started detached", exec_id),
            }),
        }
    }

    async fn exec_inspect(&self, exec_id: &str) -> RuntimeResult<ExecStatus> {
        let response = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| classify(e, "exec", exec_id))?;
        Ok(ExecStatus {
            running: response.running.unwrap_or(false),
            exit_code: response.exit_code,
        })
    }

    async fn ping(&self) -> RuntimeResult<()> {
        self.docker.ping().await?;
        Ok(())
    }

    fn runtime_name(&self) -> &'static str {
        "docker"
    }
}
