use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to launch for each environment and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    pub database_image: String,
    pub database_alias: String,
    pub application_image: String,
    pub application_command: Vec<String>,
    pub application_alias: String,
    /// Container port the application listens on; published to a
    /// host-assigned port.
    pub application_port: String,
    /// Account created by the bootstrap; its admin API key is returned.
    pub account: String,
    pub readiness_deadline: Duration,
    pub bootstrap_deadline: Duration,
    pub data_key_bytes: usize,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            database_image: "postgres:10.15".to_string(),
            database_alias: "database".to_string(),
            application_image: "cyberark/conjur".to_string(),
            application_command: vec!["server".to_string()],
            application_alias: "conjur".to_string(),
            application_port: "80".to_string(),
            account: "demo".to_string(),
            readiness_deadline: Duration::from_secs(5),
            bootstrap_deadline: Duration::from_secs(5),
            data_key_bytes: 32,
        }
    }
}

impl ProvisionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database_image(mut self, image: impl Into<String>) -> Self {
        self.database_image = image.into();
        self
    }

    pub fn with_application_image(mut self, image: impl Into<String>) -> Self {
        self.application_image = image.into();
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    pub fn with_readiness_deadline(mut self, deadline: Duration) -> Self {
        self.readiness_deadline = deadline;
        self
    }

    pub fn with_bootstrap_deadline(mut self, deadline: Duration) -> Self {
        self.bootstrap_deadline = deadline;
        self
    }

    /// `DATABASE_URL` as seen from inside the application container.
    pub fn database_url(&self) -> String {
        format!("postgres://postgres@{}/postgres", self.database_alias)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database_image.is_empty() || self.application_image.is_empty() {
            return Err("Images cannot be empty".to_string());
        }

        if self.database_alias.is_empty() || self.application_alias.is_empty() {
            return Err("Network aliases cannot be empty".to_string());
        }

        if self.database_alias == self.application_alias {
            return Err("Database and application aliases must differ".to_string());
        }

        if self.application_port.parse::<u16>().map_or(true, |port| port == 0) {
            return Err(format!(
                "Application port '{}' is not a valid port number",
                self.application_port
            ));
        }

        // The account name is interpolated into the bootstrap shell script.
        if self.account.is_empty()
            || !self
                .account
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(
                "Account must be non-empty and contain only letters, digits, '-' or '_'"
                    .to_string(),
            );
        }

        if self.data_key_bytes == 0 {
            return Err("Data key length must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProvisionConfig::default();
        assert_eq!(config.database_image, "postgres:10.15");
        assert_eq!(config.application_image, "cyberark/conjur");
        assert_eq!(config.readiness_deadline, Duration::from_secs(5));
        assert_eq!(config.bootstrap_deadline, Duration::from_secs(5));
        assert_eq!(config.database_url(), "postgres://postgres@database/postgres");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ProvisionConfig::new()
            .with_database_image("postgres:15")
            .with_application_image("cyberark/conjur:1.21")
            .with_account("ci")
            .with_readiness_deadline(Duration::from_secs(30))
            .with_bootstrap_deadline(Duration::from_secs(90));

        assert_eq!(config.database_image, "postgres:15");
        assert_eq!(config.application_image, "cyberark/conjur:1.21");
        assert_eq!(config.account, "ci");
        assert_eq!(config.readiness_deadline, Duration::from_secs(30));
        assert_eq!(config.bootstrap_deadline, Duration::from_secs(90));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ProvisionConfig::default();

        config.account = "demo; rm -rf /".to_string();
        assert!(config.validate().is_err());

        config.account = "demo".to_string();
        config.application_port = "http".to_string();
        assert!(config.validate().is_err());

        config.application_port = "0".to_string();
        assert!(config.validate().is_err());

        config.application_port = "80".to_string();
        config.application_alias = "database".to_string();
        assert!(config.validate().is_err());

        config.application_alias = "conjur".to_string();
        config.database_image = String::new();
        assert!(config.validate().is_err());
    }
}
