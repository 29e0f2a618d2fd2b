//! StackForge CLI
//!
//! Deploys and manages spot-first GPU stacks.
//!
//! # Usage
//!
//! ```bash
//! stackforge ml-dev
//! stackforge ml-prod --type full --env production --region us-west-2
//! stackforge ml-prod --validate
//! stackforge ml-prod --dry-run --output json
//! stackforge ml-prod --status
//! stackforge ml-prod --logs
//! stackforge ml-prod --rollback
//! stackforge ml-prod --destroy
//! ```
//!
//! Exit codes: 0 success, 1 general error, 2 configuration error,
//! 3 provider error, 4 validation error, 5 rollback error.

use clap::{ArgGroup, Parser, ValueEnum};
use stackforge_common::SandboxCloud;
use stackforge_orchestrator::{
    DeploymentContext, DeploymentType, Environment, FileStateStore, Orchestrator, OrchestratorBuilder,
};
use stackforge_vars::{names, register_deployment_variables, validators, Scope, VariableStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod output;

use config::CliConfig;
use error::CliError;
use output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "stackforge")]
#[command(author = "StackForge")]
#[command(version)]
#[command(about = "Spot-first GPU stack deployment", long_about = None)]
#[command(group(
    ArgGroup::new("action")
        .args(["dry_run", "validate", "rollback", "destroy", "status", "logs"])
        .multiple(false)
))]
struct Cli {
    /// Stack name (3-30 chars, starts with a letter, letters, digits and hyphens)
    stack_name: String,

    /// Resource plan to deploy
    #[arg(long = "type", value_enum, default_value = "spot")]
    stack_type: StackType,

    /// Primary region
    #[arg(long, env = "STACKFORGE_REGION")]
    region: Option<String>,

    /// Provider profile
    #[arg(long, env = "STACKFORGE_PROFILE", default_value = "sandbox")]
    profile: String,

    /// Target environment
    #[arg(long = "env", env = "STACKFORGE_ENV", default_value = "development")]
    environment: String,

    /// Show the resource plan without creating anything
    #[arg(long)]
    dry_run: bool,

    /// Validate inputs and print the plan
    #[arg(long)]
    validate: bool,

    /// Roll back every live resource of the stack
    #[arg(long)]
    rollback: bool,

    /// Tear the stack down
    #[arg(long)]
    destroy: bool,

    /// Show the persisted stack state
    #[arg(long)]
    status: bool,

    /// Show phase changes, checkpoints and errors
    #[arg(long)]
    logs: bool,

    /// Config file
    #[arg(long, env = "STACKFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short)]
    verbose: bool,

    /// Output format
    #[arg(long, short, value_enum, default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StackType {
    Spot,
    Alb,
    Cdn,
    Full,
}

impl From<StackType> for DeploymentType {
    fn from(t: StackType) -> Self {
        match t {
            StackType::Spot => DeploymentType::Spot,
            StackType::Alb => DeploymentType::Alb,
            StackType::Cdn => DeploymentType::Cdn,
            StackType::Full => DeploymentType::Full,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let stack_name = cli.stack_name.clone();
    if let Err(e) = run(cli).await {
        output::print_error(&e, &stack_name);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if !validators::is_valid_stack_name(&cli.stack_name) {
        return Err(CliError::InvalidArgument(format!(
            "invalid stack name '{}': 3-30 chars, starting with a letter, letters, digits and hyphens only",
            cli.stack_name
        )));
    }

    let config = CliConfig::load(cli.config.as_deref())?;
    let variables = Arc::new(VariableStore::new());
    register_deployment_variables(&variables)?;
    config.apply(&variables)?;

    let orchestrator = build_orchestrator(&cli.profile, &config, Arc::clone(&variables))?;
    let name = cli.stack_name.as_str();
    let format = cli.output;

    if cli.status {
        let record = orchestrator.status(name).await?;
        return output::print_status(&record, format);
    }
    if cli.logs {
        let entries = orchestrator.logs(name).await?;
        return output::print_logs(&entries, format);
    }
    if cli.rollback {
        let report = orchestrator.rollback_stack(name).await?;
        return output::print_report(name, "rolled back", &report, format);
    }
    if cli.destroy {
        let report = orchestrator.destroy_stack(name).await?;
        return output::print_report(name, "destroyed", &report, format);
    }

    let ctx = deployment_context(&cli, &config, &variables)?;
    if cli.validate {
        let plan = orchestrator.plan(&ctx)?;
        return output::print_plan(name, &plan.resources, format);
    }

    let (ctx, cancel) = ctx.with_dry_run(cli.dry_run).cancellable();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let outcome = orchestrator.deploy(&ctx).await?;
    output::print_deployment(&outcome, format)
}

/// Provider adapters by profile name
fn build_orchestrator(
    profile: &str,
    config: &CliConfig,
    variables: Arc<VariableStore>,
) -> Result<Orchestrator, CliError> {
    let builder = match profile {
        "sandbox" => OrchestratorBuilder::sandbox(Arc::new(SandboxCloud::with_defaults())),
        other => return Err(CliError::UnknownProfile(other.to_string())),
    };

    Ok(builder
        .store(Arc::new(FileStateStore::new(&config.orchestrator.state_dir)))
        .variables(variables)
        .config(config.orchestrator.clone())
        .build()?)
}

/// Flags land at stack scope on top of the config file's global values
fn deployment_context(cli: &Cli, config: &CliConfig, variables: &VariableStore) -> Result<DeploymentContext, CliError> {
    let environment: Environment = cli.environment.parse()?;
    let deployment_type = DeploymentType::from(cli.stack_type);

    variables.set(names::STACK_NAME, cli.stack_name.as_str(), Scope::Stack)?;
    variables.set(names::ENVIRONMENT, environment.as_str(), Scope::Stack)?;
    variables.set(names::DEPLOYMENT_TYPE, deployment_type.as_str(), Scope::Stack)?;
    if let Some(region) = &cli.region {
        variables.set(names::REGION, region.as_str(), Scope::Stack)?;
    }

    let ctx = DeploymentContext::from_variables(variables)?
        .with_profile(cli.profile.as_str())
        .with_auto_cleanup(config.orchestrator.auto_cleanup(environment));
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "stackforge",
            "ml-prod",
            "--type",
            "full",
            "--env",
            "production",
            "--region",
            "us-west-2",
            "--output",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.stack_name, "ml-prod");
        assert_eq!(cli.stack_type, StackType::Full);
        assert_eq!(cli.region.as_deref(), Some("us-west-2"));
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_actions_are_exclusive() {
        let err = Cli::try_parse_from(["stackforge", "ml-prod", "--destroy", "--status"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(Cli::try_parse_from(["stackforge", "ml-prod", "--type", "gpu"]).is_err());
    }

    #[test]
    fn test_context_from_flags() {
        let cli = Cli::try_parse_from(["stackforge", "ml-prod", "--type", "alb", "--env", "prod"]).unwrap();
        let config = CliConfig::parse("[variables]\nregion = \"eu-west-1\"\nfleet_size = 3\n").unwrap();
        let variables = VariableStore::new();
        register_deployment_variables(&variables).unwrap();
        config.apply(&variables).unwrap();

        let ctx = deployment_context(&cli, &config, &variables).unwrap();
        assert_eq!(ctx.stack_name, "ml-prod");
        assert_eq!(ctx.environment, Environment::Production);
        assert_eq!(ctx.deployment_type, DeploymentType::Alb);
        assert_eq!(ctx.region, "eu-west-1");
        assert_eq!(ctx.fleet_size, 3);
        assert!(!ctx.auto_cleanup);
    }

    #[test]
    fn test_unknown_profile() {
        let err = build_orchestrator("aws", &CliConfig::default(), Arc::new(VariableStore::new())).err();
        assert!(matches!(err, Some(CliError::UnknownProfile(_))));
    }

    #[tokio::test]
    async fn test_deploy_then_status_and_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().display().to_string().replace('\\', "/");
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            format!(
                "[orchestrator]\nstate_dir = \"{}\"\n[orchestrator.retry]\nbase_delay_ms = 1\n",
                state_dir
            ),
        )
        .unwrap();
        let config_arg = config_path.display().to_string();

        let deploy = Cli::try_parse_from(["stackforge", "ml-dev", "--config", config_arg.as_str()]).unwrap();
        run(deploy).await.unwrap();

        let status = Cli::try_parse_from(["stackforge", "ml-dev", "--status", "--config", config_arg.as_str()]).unwrap();
        run(status).await.unwrap();

        let destroy = Cli::try_parse_from(["stackforge", "ml-dev", "--destroy", "--config", config_arg.as_str()]).unwrap();
        run(destroy).await.unwrap();

        let missing = Cli::try_parse_from(["stackforge", "ml-qa", "--status", "--config", config_arg.as_str()]).unwrap();
        assert_eq!(run(missing).await.unwrap_err().exit_code(), 2);
    }
}
