use clap::{Args, Parser, Subcommand, ValueEnum};
use provisioner::api::{EnvironmentResponse, Server};
use provisioner::{Compensation, CompensationStack, ProvisionConfig, Provisioner};
use runtime::{DockerConfig, DockerRuntime};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "provisioner")]
#[command(about = "Provision throwaway Conjur + Postgres environments on Docker")]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
    /// Docker endpoint (unix://, tcp:// or http://); platform default if unset
    #[arg(long, global = true, env = "DOCKER_HOST")]
    docker_host: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, env = "PROVISIONER_BIND", default_value = "0.0.0.0:8000")]
        bind: SocketAddr,
        #[command(flatten)]
        provision: ProvisionArgs,
    },
    /// Provision one environment and print it as JSON
    Provision {
        #[command(flatten)]
        provision: ProvisionArgs,
        /// Remove the environment again after printing it
        #[arg(long)]
        teardown: bool,
    },
    /// Remove containers and a network left behind by an environment
    Teardown {
        /// Environment id (its network name)
        #[arg(long)]
        id: String,
        /// Application container id
        #[arg(long)]
        application: Option<String>,
        /// Database container id
        #[arg(long)]
        database: Option<String>,
    },
}

#[derive(Args)]
struct ProvisionArgs {
    /// Database image
    #[arg(long, default_value = "postgres:10.15")]
    database_image: String,
    /// Conjur image
    #[arg(long, default_value = "cyberark/conjur")]
    application_image: String,
    /// Conjur account to create
    #[arg(long, default_value = "demo")]
    account: String,
    /// Seconds to wait for the database to accept connections
    #[arg(long, default_value = "5")]
    readiness_timeout: u64,
    /// Seconds to wait for Conjur to start and create the account
    #[arg(long, default_value = "5")]
    bootstrap_timeout: u64,
}

impl ProvisionArgs {
    fn to_config(&self) -> ProvisionConfig {
        ProvisionConfig::new()
            .with_database_image(&self.database_image)
            .with_application_image(&self.application_image)
            .with_account(&self.account)
            .with_readiness_deadline(Duration::from_secs(self.readiness_timeout))
            .with_bootstrap_deadline(Duration::from_secs(self.bootstrap_timeout))
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stdout)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let docker_config =
        DockerConfig::new().with_endpoint(DockerConfig::endpoint_from_host(cli.docker_host.as_deref()));
    let runtime = Arc::new(DockerRuntime::connect(docker_config).await?);

    match cli.command {
        Commands::Serve { bind, provision } => {
            let provisioner = Provisioner::new(runtime, provision.to_config())?;
            Server::new(provisioner, bind).run().await?;
        }
        Commands::Provision {
            provision,
            teardown,
        } => {
            let provisioner = Provisioner::new(runtime, provision.to_config())?;
            let environment = provisioner.provision().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&EnvironmentResponse::from(&environment))?
            );

            if teardown {
                let failures = provisioner.teardown(&environment).await;
                report_teardown(environment.id(), failures.len());
            }
        }
        Commands::Teardown {
            id,
            application,
            database,
        } => {
            let mut stack = CompensationStack::new();
            stack.push(Compensation::RemoveNetwork { name: id.clone() });
            if let Some(database) = database {
                stack.push(Compensation::RemoveContainer {
                    id: database,
                    role: "database",
                });
            }
            if let Some(application) = application {
                stack.push(Compensation::RemoveContainer {
                    id: application,
                    role: "application",
                });
            }
            let failures = stack.unwind(runtime.as_ref()).await;
            report_teardown(&id, failures.len());
        }
    }

    Ok(())
}

fn report_teardown(id: &str, failures: usize) {
    if failures == 0 {
        info!("Removed environment {}", id);
    } else {
        error!("{} resource(s) of environment {} could not be removed", failures, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_flags() {
        let cli = Cli::try_parse_from([
            "provisioner",
            "teardown",
            "--id",
            "1700000000-abcdefgh",
            "--application",
            "app-id",
            "--database",
            "db-id",
        ])
        .unwrap();

        match cli.command {
            Commands::Teardown {
                id,
                application,
                database,
            } => {
                assert_eq!(id, "1700000000-abcdefgh");
                assert_eq!(application.as_deref(), Some("app-id"));
                assert_eq!(database.as_deref(), Some("db-id"));
            }
            _ => panic!("expected teardown"),
        }
    }

    #[test]
    fn test_teardown_requires_id() {
        assert!(Cli::try_parse_from(["provisioner", "teardown", "--application", "app-id"]).is_err());
    }
}
