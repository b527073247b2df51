//! AppForge CLI
//!
//! Validate, deploy and inspect generated projects from the command line.

use appforge::config::{self, Config, SandboxBackend};
use appforge::deploy::{Deployer, HttpRemoteTarget};
use appforge::metrics::InMemoryMetrics;
use appforge::project::ProjectState;
use appforge::sandbox::create_sandbox;
use appforge::validation::Validator;
use appforge::{Error, Result, VERSION};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "appforge",
    author = "AppForge Contributors",
    version = VERSION,
    about = "AppForge - Sandboxed validation and deployment of generated apps",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a project and record its checksum
    Validate {
        /// Project directory
        dir: PathBuf,
        /// Sandbox backend (overrides config)
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
        /// Run this command instead of build/typecheck/test
        #[arg(long)]
        command: Option<String>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Deploy a validated project
    Deploy {
        /// Project directory
        dir: PathBuf,
        /// App name
        #[arg(long, short)]
        name: String,
        /// App description
        #[arg(long, short, default_value = "")]
        description: String,
        /// Deploy over an app created by someone else
        #[arg(long)]
        force: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the lifecycle state of a project
    State {
        /// Project directory
        dir: PathBuf,
        /// Print the raw state document
        #[arg(long)]
        json: bool,
    },

    /// Run a command inside a sandbox rooted at a project
    Exec {
        /// Project directory
        dir: PathBuf,
        /// Sandbox backend (overrides config)
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
        /// Command timeout, e.g. "30s" or "5m"
        #[arg(long, default_value = "5m", value_parser = humantime_serde::re::humantime::parse_duration)]
        timeout: Duration,
        /// Shell command
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Print a default configuration file
    InitConfig {
        /// Write to this path instead of stdout (.json or .toml)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Check the effective configuration for problems
    CheckConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Local,
    Container,
}

impl From<BackendArg> for SandboxBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Local => SandboxBackend::Local,
            BackendArg::Container => SandboxBackend::Container,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    // Ctrl-C cancels whatever is running
    let ctx = CancellationToken::new();
    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_ctx.cancel();
        }
    });

    match run(cli, &ctx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(&e),
    }
}

async fn run(cli: Cli, ctx: &CancellationToken) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate {
            dir,
            backend,
            command,
            json,
        } => validate(ctx, config, &dir, backend, command, json).await,
        Commands::Deploy {
            dir,
            name,
            description,
            force,
            json,
        } => deploy(ctx, &config, &dir, &name, &description, force, json).await,
        Commands::State { dir, json } => show_state(&dir, json),
        Commands::Exec {
            dir,
            backend,
            timeout,
            command,
        } => exec(ctx, config, &dir, backend, timeout, &command.join(" ")).await,
        Commands::InitConfig { output } => init_config(output.as_deref()),
        Commands::CheckConfig => check_config(&config),
    }
}

/// Print `err` with a hint; caller mistakes exit with 2, everything else 1
fn report_error(err: &Error) -> ExitCode {
    eprintln!("{} {}", style("✗").red().bold(), err);

    let hint = if err.is_security_violation() {
        Some("paths must be relative and stay inside the project")
    } else if err.is_state_error() {
        Some("run `appforge validate <dir>` and try again")
    } else if err.is_retryable() {
        Some("this looks transient; retrying may succeed")
    } else {
        None
    };
    if let Some(hint) = hint {
        eprintln!("  {}", style(hint).dim());
    }

    if err.is_client_error() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("appforge=info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = config::load_config_from_path(path)?;
            config::apply_env_overrides(&mut config);
            Ok(config)
        }
        None => Config::from_env(),
    }
}

async fn validate(
    ctx: &CancellationToken,
    mut config: Config,
    dir: &Path,
    backend: Option<BackendArg>,
    command: Option<String>,
    json: bool,
) -> Result<()> {
    if let Some(backend) = backend {
        config.sandbox.backend = backend.into();
    }
    if command.is_some() {
        config.validation.custom_command = command;
    }

    let metrics = Arc::new(InMemoryMetrics::new());
    let validator = Validator::from_config(&config).with_metrics(metrics.clone());
    let result = validator.validate_with(ctx, dir).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for line in &result.progress_log {
            println!("  {}", style(line).dim());
        }
        println!();
        if result.success {
            println!("{} {}", style("✓").green().bold(), style(&result.message).green());
        } else {
            println!("{} {}", style("✗").red().bold(), style(&result.message).red());
            if let Some(details) = &result.details {
                println!("  exit code: {}", details.exit_code);
                if !details.stdout.trim().is_empty() {
                    println!("\n{}\n{}", style("stdout:").bold(), details.stdout.trim_end());
                }
                if !details.stderr.trim().is_empty() {
                    println!("\n{}\n{}", style("stderr:").bold(), details.stderr.trim_end());
                }
            }
        }
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn deploy(
    ctx: &CancellationToken,
    config: &Config,
    dir: &Path,
    name: &str,
    description: &str,
    force: bool,
    json: bool,
) -> Result<()> {
    let remote = Arc::new(HttpRemoteTarget::from_config(&config.remote)?);
    let metrics = Arc::new(InMemoryMetrics::new());
    let deployer = Deployer::new(remote, &config.deploy).with_metrics(metrics.clone());

    let result = deployer
        .deploy_with(ctx, dir, name, description, force)
        .await;
    let snapshot = metrics.snapshot();

    let result = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{} {}", style("✓").green().bold(), style(&result.message).green());
        if let Some(url) = &result.app_url {
            println!("  url: {}", style(url).cyan());
        }
        println!(
            "  deployed at {} after {} attempt(s)",
            result.deployed_at.to_rfc3339(),
            snapshot.deploy_attempts
        );
    }
    Ok(())
}

fn show_state(dir: &Path, json: bool) -> Result<()> {
    match ProjectState::load_existing(dir)? {
        Some(state) if json => println!("{}", state.to_json()?),
        Some(state) => println!("{} {}", style("state:").bold(), state),
        None if json => println!("{}", ProjectState::Scaffolded.to_json()?),
        None => println!(
            "{} {}",
            style("state:").bold(),
            style("scaffolded (no state file)").dim()
        ),
    }
    Ok(())
}

async fn exec(
    ctx: &CancellationToken,
    mut config: Config,
    dir: &Path,
    backend: Option<BackendArg>,
    timeout: Duration,
    command: &str,
) -> Result<()> {
    if let Some(backend) = backend {
        config.sandbox.backend = backend.into();
    }

    let sandbox = create_sandbox(&config.sandbox, dir, None).await?;
    if config.sandbox.backend == SandboxBackend::Container {
        if let Err(e) = sandbox.refresh_from_host(ctx, dir, ".").await {
            let _ = sandbox.close().await;
            return Err(e);
        }
    }

    let outcome = sandbox.exec_with_timeout(ctx, command, timeout).await;
    if let Err(e) = sandbox.close().await {
        warn!(error = %e, "Failed to close sandbox");
    }
    let result = outcome?;

    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    if !result.success() {
        std::process::exit(result.exit_code.clamp(1, 255) as i32);
    }
    Ok(())
}

fn init_config(output: Option<&Path>) -> Result<()> {
    let config = Config::default();
    match output {
        Some(path) => {
            if path.exists() {
                return Err(Error::Config(format!(
                    "{} already exists; remove it first",
                    path.display()
                )));
            }
            config::save_config(&config, path)?;
            println!("{} Wrote {}", style("✓").green().bold(), path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    let result = config::validate_config(config);
    println!("{} {}", style("config:").bold(), config::config_path().display());

    for issue in &result.errors {
        println!("{} {}: {}", style("✗").red().bold(), issue.path, issue.message);
        if let Some(suggestion) = &issue.suggestion {
            println!("  {}", style(suggestion).dim());
        }
    }
    for issue in &result.warnings {
        println!("{} {}: {}", style("!").yellow().bold(), issue.path, issue.message);
        if let Some(suggestion) = &issue.suggestion {
            println!("  {}", style(suggestion).dim());
        }
    }

    if result.valid {
        println!("{} Configuration is valid", style("✓").green().bold());
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} configuration error(s)",
            result.errors.len()
        )))
    }
}
