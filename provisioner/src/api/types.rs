//! API request/response types

use serde::{Deserialize, Serialize};

use crate::provision::Environment;

/// Wire shape of an environment. The container handles stay server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentResponse {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "AdminAPIKey")]
    pub admin_api_key: String,
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

impl EnvironmentResponse {
    /// An environment known only by id; nothing else is stored.
    pub fn unknown(id: String) -> Self {
        Self {
            id,
            admin_api_key: String::new(),
            host_port: String::new(),
        }
    }
}

impl From<&Environment> for EnvironmentResponse {
    fn from(environment: &Environment) -> Self {
        Self {
            id: environment.id().to_string(),
            admin_api_key: environment.admin_api_key().to_string(),
            host_port: environment.host_port().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub runtime: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub code: u16,
    pub text: String,
}
