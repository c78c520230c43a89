use runtime::{ContainerRef, ContainerRuntime, ContainerSpec, RuntimeError};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// A container could not be brought up. Each variant names the step that
/// failed and carries the runtime's error.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Failed to pull image '{image}': {source}")]
    Pull {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to create container from '{image}': {source}")]
    Create {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to start container {id} ('{image}'): {source}")]
    Start {
        image: String,
        id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to inspect container {id} ('{image}'): {source}")]
    Inspect {
        image: String,
        id: String,
        #[source]
        source: RuntimeError,
    },
}

impl LaunchError {
    pub fn image(&self) -> &str {
        match self {
            LaunchError::Pull { image, .. }
            | LaunchError::Create { image, .. }
            | LaunchError::Start { image, .. }
            | LaunchError::Inspect { image, .. } => image,
        }
    }
}

/// Pull, create, start and inspect a container.
///
/// If the container was created but a later step fails, it is removed
/// before the error is returned; removal errors are only logged.
#[instrument(skip(runtime, spec), fields(image = %spec.image))]
pub async fn launch(
    runtime: &dyn ContainerRuntime,
    spec: &ContainerSpec,
) -> Result<ContainerRef, LaunchError> {
    let image = spec.image.clone();

    debug!("Pulling image {}", image);
    runtime
        .pull_image(&spec.image)
        .await
        .map_err(|source| LaunchError::Pull {
            image: image.clone(),
            source,
        })?;

    let id = runtime
        .create_container(spec)
        .await
        .map_err(|source| LaunchError::Create {
            image: image.clone(),
            source,
        })?;

    let started = match runtime.start_container(&id).await {
        Ok(()) => runtime
            .inspect_container(&id)
            .await
            .map_err(|source| LaunchError::Inspect {
                image: image.clone(),
                id: id.clone(),
                source,
            }),
        Err(source) => Err(LaunchError::Start {
            image: image.clone(),
            id: id.clone(),
            source,
        }),
    };

    match started {
        Ok(container) => {
            info!("Started container {} from {}", container.id, image);
            Ok(container)
        }
        Err(err) => {
            if let Err(cleanup) = runtime.remove_container(&id).await {
                warn!("Failed to remove unstarted container {}: {}", id, cleanup);
            }
            Err(err)
        }
    }
}
