mod cache;
mod call;
mod tools;

use std::time::Duration;

use ferroquant_agent::{AnalyticsConfig, AnalyticsService, EnvelopeBuilder, SCHEMA_VERSION};
use ferroquant_core::{EnvCredentials, Envelope, EnvelopeError};
use ferroquant_store::StoreConfig;
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<Envelope<Value>, CliError> {
    match &cli.command {
        Command::Tools => tools::list(),
        Command::Schema(args) => tools::schema(args),
        Command::Call(args) => {
            let input = call::read_input(args)?;
            let service = start(cli).await?;
            let envelope = service.call(&args.tool, input).await;
            service.shutdown().await;
            Ok(envelope)
        }
        Command::Cache(args) => {
            let service = start(cli).await?;
            let envelope = cache::run(args, &service).await;
            service.shutdown().await;
            envelope
        }
    }
}

async fn start(cli: &Cli) -> Result<AnalyticsService, CliError> {
    let config = configure(cli, AnalyticsConfig::from_env()?);
    Ok(AnalyticsService::start(config, &EnvCredentials).await?)
}

/// Command-line flags take precedence over `FERROQUANT_*` variables.
fn configure(cli: &Cli, mut config: AnalyticsConfig) -> AnalyticsConfig {
    if let Some(deadline_ms) = cli.deadline_ms {
        config.deadline = Duration::from_millis(deadline_ms);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_per_request = Duration::from_millis(timeout_ms);
    }
    if let Some(db_path) = &cli.db_path {
        config.store = StoreConfig::at(db_path.clone());
    }
    if cli.no_cache {
        config.store = StoreConfig::in_memory();
    }
    config
}

/// Envelope for commands answered without running a tool.
fn local_envelope(data: Value, errors: Vec<EnvelopeError>) -> Result<Envelope<Value>, CliError> {
    Ok(EnvelopeBuilder::new(SCHEMA_VERSION)
        .with_data(data)
        .with_errors(errors)
        .build()?)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn flags_override_environment_config() {
        let cli = Cli::try_parse_from([
            "ferroquant",
            "tools",
            "--deadline-ms",
            "750",
            "--timeout-ms",
            "250",
            "--no-cache",
        ])
        .unwrap();

        let config = configure(&cli, AnalyticsConfig::default());

        assert_eq!(config.deadline, Duration::from_millis(750));
        assert_eq!(config.timeout_per_request, Duration::from_millis(250));
        assert_eq!(config.store, StoreConfig::in_memory());
    }

    #[test]
    fn unset_flags_keep_config() {
        let cli = Cli::try_parse_from(["ferroquant", "tools"]).unwrap();
        let base = AnalyticsConfig {
            deadline: Duration::from_secs(5),
            ..AnalyticsConfig::default()
        };

        assert_eq!(configure(&cli, base.clone()), base);
    }
}
