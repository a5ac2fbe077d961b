mod config;
mod contract;
mod credentials;
mod fsutil;
mod gpg;
mod mirror;
mod provision;
mod system;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{Architecture, Config, Pocket, Release};
use crate::mirror::SizeEstimate;
use crate::provision::{mask_token, ConfigureOptions, ConfigureOutcome, Provisioner};
use crate::system::HostSystem;

const DEFAULT_CONFIG_PATH: &str = "/etc/pop-mirror/config.yaml";

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "pop-mirror",
    version,
    about = "Provision an air-gapped mirror of entitlement-gated package repositories"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange the contract token and write credentials, keys and the mirror list.
    Configure {
        /// Contract token; falls back to the environment variable named by
        /// `contract_token_env`.
        #[arg(long)]
        token: Option<String>,
        /// Reuse an existing provisioning directory.
        #[arg(long)]
        reconfigure: bool,
        /// Estimate the mirror size before writing the mirror list.
        #[arg(long)]
        estimate: bool,
        /// Do not ask for confirmation after the estimate.
        #[arg(short, long)]
        yes: bool,
    },
    /// Estimate the mirror size from persisted contract data.
    Estimate,
    /// Check the generated files; exits non-zero on failure.
    Verify,
    /// Report disk usage of the mirror tree.
    Usage,
}

/// Command-line values that take precedence over the configuration file.
#[derive(Args, Debug, Default)]
struct Overrides {
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    release: Option<Release>,
    #[arg(long = "arch", value_delimiter = ',', global = true)]
    architectures: Vec<Architecture>,
    #[arg(long, value_delimiter = ',', global = true)]
    entitlements: Vec<String>,
    #[arg(long, global = true)]
    include_source: bool,
    #[arg(long, global = true)]
    mirror_host: Option<String>,
    #[arg(long, global = true)]
    mirror_port: Option<u16>,
    #[arg(long, global = true)]
    mirror_standard_repos: bool,
    #[arg(long, value_delimiter = ',', global = true)]
    mirror_components: Vec<String>,
    #[arg(long, value_delimiter = ',', global = true)]
    mirror_pockets: Vec<Pocket>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(base_dir) = self.base_dir {
            config.base_dir = base_dir;
        }
        if let Some(release) = self.release {
            config.release = release;
        }
        if !self.architectures.is_empty() {
            config.architectures = self.architectures;
        }
        if !self.entitlements.is_empty() {
            config.entitlements = self.entitlements;
        }
        config.include_source |= self.include_source;
        if let Some(host) = self.mirror_host {
            config.mirror.host = Some(host);
        }
        if let Some(port) = self.mirror_port {
            config.mirror.port = port;
        }
        config.mirror.standard_repos |= self.mirror_standard_repos;
        if !self.mirror_components.is_empty() {
            config.mirror.components = self.mirror_components;
        }
        if !self.mirror_pockets.is_empty() {
            config.mirror.pockets = self.mirror_pockets;
        }
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Explicit `--config` must exist; the default location is optional.
fn resolve_config(path: Option<&Path>, overrides: Overrides) -> Result<Config> {
    let mut config = match path {
        Some(path) => config::load_config(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            config::load_config(DEFAULT_CONFIG_PATH)?
        }
        None => Config::default(),
    };
    overrides.apply(&mut config);
    config::validate_config(&config)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_estimate(estimate: &SizeEstimate) {
    println!("\nMirror size estimate:");
    println!("  Total size:      {}", estimate.readable);
    println!("  Total packages:  {}", estimate.packages);
    println!("\nRepositories to be mirrored:");
    for line in &estimate.repo_lines {
        println!("  {line}");
    }
}

/// Print the estimate and read a y/n answer from stdin.
fn confirm_estimate(estimate: &SizeEstimate) -> Result<bool> {
    print_estimate(estimate);
    print!("\nContinue with mirror setup? (y/n) ");
    std::io::stdout().flush().context("failed to flush stdout")?;

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let config = Arc::new(resolve_config(cli.config.as_deref(), cli.overrides)?);
    tracing::info!(
        release = %config.release,
        architectures = ?config.effective_architectures(),
        entitlements = ?config.entitlements,
        mirror_host = config.mirror.host.as_deref().unwrap_or("-"),
        "starting pop-mirror"
    );

    let provisioner = Provisioner::new(Arc::clone(&config), Arc::new(HostSystem));

    match cli.command {
        Command::Configure {
            token,
            reconfigure,
            estimate,
            yes,
        } => {
            let token = token.or_else(|| std::env::var(&config.contract_token_env).ok());
            if let Some(token) = &token {
                tracing::info!(token = %mask_token(token), "using contract token");
            }
            let opts = ConfigureOptions {
                reconfigure,
                estimate,
            };
            let confirm = |estimate: &SizeEstimate| {
                if yes {
                    print_estimate(estimate);
                    Ok(true)
                } else {
                    confirm_estimate(estimate)
                }
            };

            match provisioner.configure(token.as_deref(), opts, confirm).await? {
                ConfigureOutcome::Aborted => {
                    println!("Setup aborted.");
                }
                ConfigureOutcome::Completed {
                    mirror_list,
                    estimate,
                    verified,
                } => {
                    println!(
                        "Mirror list written to {} ({} entitlement repositories)",
                        provisioner.paths().mirror_list.display(),
                        mirror_list.repo_paths.len()
                    );
                    if let Some(estimate) = estimate {
                        println!(
                            "Estimated download: {} across {} packages",
                            estimate.readable, estimate.packages
                        );
                    }
                    if !verified {
                        tracing::warn!("post-configuration checks failed; run `pop-mirror verify`");
                    }
                }
            }
        }
        Command::Estimate => {
            let estimate = provisioner.estimate().await?;
            print_estimate(&estimate);
        }
        Command::Verify => {
            let result = provisioner.verify();
            println!("auth file:    {}", if result.auth_file { "ok" } else { "FAILED" });
            println!("mirror list:  {}", if result.mirror_list { "ok" } else { "FAILED" });
            println!("GPG keys:     {}", if result.gpg_keys { "ok" } else { "FAILED" });
            if !result.passed() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Usage => {
            let usage = provisioner.disk_usage();
            println!("Mirror path:  {}", provisioner.paths().mirror_tree().display());
            println!("Total size:   {}", usage.readable);
            println!("Files:        {}", usage.files);
            println!("Directories:  {}", usage.dirs);
        }
    }

    Ok(ExitCode::SUCCESS)
}
