//! # kpo
//!
//! Offline driver for the Kyverno policy operator's exception flows.
//!
//! - `kpo render`: print the engine PolicyExceptions a manifest directory yields
//! - `kpo reconcile`: converge a persistent state directory with the manifests
//! - `kpo config`: print the effective configuration

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use kpo_exceptions::config::parse_kind_list;
use kpo_exceptions::OperatorConfig;

/// Translate policy exceptions into Kyverno PolicyExceptions.
#[derive(Parser)]
#[command(name = "kpo", version, about)]
struct Cli {
    /// Operator config file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "kpo.toml")]
    config: PathBuf,

    /// Namespace the generated PolicyExceptions are written to.
    #[arg(long, global = true)]
    destination_namespace: Option<String>,

    /// Background mode of written PolicyExceptions (`true` or `false`).
    #[arg(long, global = true, action = ArgAction::Set, value_name = "BOOL")]
    background_mode: Option<bool>,

    /// Maximum requeue jitter, in percent of the requeue interval.
    #[arg(long, global = true)]
    max_jitter_percent: Option<u8>,

    /// Base interval between periodic re-checks, in seconds.
    #[arg(long, global = true)]
    requeue_interval_secs: Option<u64>,

    /// Kinds the chart-operator bypass exception covers (comma-separated, repeatable).
    #[arg(long, global = true)]
    chart_operator_exception_kinds: Vec<String>,

    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

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
    /// Print the PolicyExceptions generated from a manifest directory.
    Render {
        /// Directory of YAML manifests.
        #[arg(long)]
        manifests: PathBuf,
    },
    /// Reconcile a manifest directory into a persistent state directory.
    Reconcile {
        /// Directory of YAML manifests.
        #[arg(long)]
        manifests: PathBuf,
        /// Directory holding the stored objects between runs.
        #[arg(long)]
        state: PathBuf,
    },
    /// Print the effective configuration.
    Config,
}

impl Cli {
    /// Config file values with command-line overrides applied.
    fn operator_config(&self) -> anyhow::Result<OperatorConfig> {
        let mut config = OperatorConfig::load_or_default(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))?;

        if let Some(namespace) = &self.destination_namespace {
            config.destination_namespace = namespace.clone();
        }
        if let Some(background) = self.background_mode {
            config.background_mode = background;
        }
        if let Some(percent) = self.max_jitter_percent {
            config.max_jitter_percent = percent;
        }
        if let Some(secs) = self.requeue_interval_secs {
            config.requeue_interval_secs = secs;
        }
        if !self.chart_operator_exception_kinds.is_empty() {
            config.bypass.exception_kinds = parse_kind_list(&self.chart_operator_exception_kinds);
        }
        Ok(config)
    }
}

fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    // Logs go to stderr so rendered YAML on stdout stays clean.
    let filter = EnvFilter::from_default_env()
        .add_directive("kpo_exceptions=info".parse()?)
        .add_directive("kpo=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;
    let config = cli.operator_config()?;

    match &cli.command {
        Commands::Config => commands::config::execute(&config),
        Commands::Render { manifests } => {
            config.validate()?;
            commands::render::execute(&config, manifests).await
        }
        Commands::Reconcile { manifests, state } => {
            config.validate()?;
            commands::reconcile::execute(&config, manifests, state).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("kpo.toml");
        std::fs::write(&file, "destination_namespace = \"from-file\"\nmax_jitter_percent = 5\n").unwrap();

        let cli = Cli::parse_from([
            "kpo",
            "--config",
            file.to_str().unwrap(),
            "--chart-operator-exception-kinds",
            "Deployment,Service",
            "--chart-operator-exception-kinds",
            "ConfigMap",
            "render",
            "--manifests",
            "m",
            "--destination-namespace",
            "from-flag",
        ]);
        let config = cli.operator_config().unwrap();

        assert_eq!(config.destination_namespace, "from-flag");
        assert_eq!(config.max_jitter_percent, 5);
        assert_eq!(
            config.bypass.exception_kinds,
            vec!["Deployment", "Service", "ConfigMap"]
        );
        assert!(!config.background_mode);
    }

    #[test]
    fn background_mode_flag_can_turn_it_off() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("kpo.toml");
        std::fs::write(&file, "background_mode = true\n").unwrap();
        let path = file.to_str().unwrap();

        let cli = Cli::parse_from(["kpo", "--config", path, "config"]);
        assert!(cli.operator_config().unwrap().background_mode);

        let cli = Cli::parse_from(["kpo", "--config", path, "--background-mode=false", "config"]);
        assert!(!cli.operator_config().unwrap().background_mode);

        let cli = Cli::parse_from(["kpo", "--config", path, "config", "--background-mode", "true"]);
        assert!(cli.operator_config().unwrap().background_mode);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
