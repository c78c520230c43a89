//! API request handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, info};

use super::types::*;
use crate::provision::Provisioner;

pub type AppState = Arc<Provisioner>;

pub async fn index() -> &'static str {
    "Welcome!\n"
}

pub async fn health(State(provisioner): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let runtime = provisioner.runtime();
    let (status, text) = match runtime.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(err) => {
            error!("Runtime {} is unreachable: {}", runtime.runtime_name(), err);
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };
    (
        status,
        Json(HealthResponse {
            status: text.to_string(),
            runtime: runtime.runtime_name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `POST /conjur`. The body is optional, but when present it must be JSON.
///
/// The run happens on its own task, so a client that disconnects does not
/// stop it halfway.
pub async fn create_environment(State(provisioner): State<AppState>, body: Bytes) -> Response {
    if !body.is_empty() {
        if let Err(err) = serde_json::from_slice::<serde_json::Value>(&body) {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ApiError {
                    code: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
                    text: err.to_string(),
                }),
            )
                .into_response();
        }
    }

    let run = tokio::spawn(async move { provisioner.provision().await });
    match run.await {
        Ok(Ok(environment)) => {
            info!("Created environment {}", environment.id());
            (
                StatusCode::CREATED,
                Json(EnvironmentResponse::from(&environment)),
            )
                .into_response()
        }
        Ok(Err(err)) => {
            error!("Failed to create environment: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(err) => {
            error!("Provisioning task failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /conjur/:id`. There is no registry, so only the id is echoed back.
pub async fn show_environment(Path(id): Path<String>) -> Json<EnvironmentResponse> {
    Json(EnvironmentResponse::unknown(id))
}
