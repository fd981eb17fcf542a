//! `decker` CLI: deploy and destroy declarative application stacks.
//!
//! ```text
//! decker deploy
//! decker deploy --dry-run
//! decker destroy --confirm
//! decker config validate
//! ```
//!
//! The target (production or sandbox) comes from `decker.yml`; sandboxes
//! are addressed by their slug.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use decker::commands::{Deploy, DeploySandbox, Destroy, DestroySandbox};
use decker::compose;
use decker::config::{self, Config, DatabaseKind};
use decker::context::Context;
use decker::events::{DeployState, Observer, RolloutProgress, StepPhase};
use decker::manifests::{self, ManifestInputs};
use decker::naming::{self, Target};
use decker::telemetry::{get_subscriber, init_subscriber};

#[derive(Parser, Debug)]
#[command(
    name = "decker",
    version,
    about = "Deploy apps from a decker.yml config",
    long_about = "decker — declarative cloud deployments\n\n\
        Describe compute, databases, services and app processes in\n\
        decker.yml; decker provisions the infrastructure, installs a\n\
        lightweight cluster, builds the image and rolls everything out."
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, value_name = "FILE", default_value = "decker.yml")]
    file: PathBuf,

    /// Stream remote and build logs to stderr
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision infrastructure and roll the stack out
    Deploy {
        /// Render manifests without touching any infrastructure
        #[arg(long)]
        dry_run: bool,
        /// Sandbox slug to reuse (default: a fresh one per deploy)
        #[arg(long, value_name = "SLUG")]
        slug: Option<String>,
    },
    /// Tear the stack down
    Destroy {
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        confirm: bool,
        /// Sandbox slug to destroy (required for sandbox targets)
        #[arg(long, value_name = "SLUG")]
        slug: Option<String>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Parse and validate decker.yml, reporting problems
    Validate,
}

// ── Spinner observer ─────────────────────────────────

/// Braille dots — clean, modern feel.
const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

struct SpinnerObserver {
    current: Mutex<Option<ProgressBar>>,
    verbose: bool,
}

impl SpinnerObserver {
    fn new(verbose: bool) -> Self {
        Self {
            current: Mutex::new(None),
            verbose,
        }
    }

    fn spinner(message: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .tick_chars(TICK_CHARS)
                .template("{spinner:.cyan} {msg}")
                .expect("invalid spinner template"),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(80));
        pb
    }

    fn finish(&self, symbol: &str, label: &str) {
        if let Some(pb) = self.current.lock().unwrap().take() {
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("  {msg}")
                    .expect("invalid template"),
            );
            pb.finish_with_message(format!("{} {}", symbol, label));
        }
    }
}

impl Observer for SpinnerObserver {
    fn on_step(&self, label: &str, phase: StepPhase, detail: Option<&str>) {
        match phase {
            StepPhase::InProgress => {
                let mut current = self.current.lock().unwrap();
                match (&*current, detail) {
                    (Some(pb), Some(detail)) => pb.set_message(format!("{}: {}", label, detail)),
                    (Some(_), None) => {}
                    (None, _) => *current = Some(Self::spinner(label)),
                }
            }
            StepPhase::Done => self.finish("✓", label),
            StepPhase::Error => self.finish("✗", label),
        }
    }

    fn on_state_change(&self, state: DeployState) {
        println!("state: {}", state);
    }

    fn on_rollout_progress(&self, progress: &RolloutProgress) {
        if let Some(pb) = self.current.lock().unwrap().as_ref() {
            pb.set_message(format!(
                "rollout: {} {}/{} ready",
                progress.workload, progress.ready, progress.desired
            ));
        }
    }

    fn on_log(&self, category: &str, line: &str) {
        if self.verbose {
            eprintln!("[{}] {}", category, line);
        }
    }
}

// ── Entry point ──────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_subscriber(get_subscriber("decker".into(), "warn".into()));

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { command: ConfigCommands::Validate } => {
            match config::from_file(&cli.file) {
                Ok(config) => {
                    println!("✓ {} is valid ({} target)", cli.file.display(), match config.target {
                        Target::Production => "production",
                        Target::Sandbox => "sandbox",
                    });
                    Ok(())
                }
                Err(err) => {
                    eprintln!("✗ {}", err);
                    std::process::exit(1);
                }
            }
        }
        Commands::Deploy { dry_run, slug } => {
            let config = config::from_file(&cli.file)?;
            if dry_run {
                return render_dry_run(&config, slug.as_deref());
            }
            let observer = SpinnerObserver::new(cli.verbose);
            match config.target {
                Target::Production => {
                    let mut ctx = Context::new(config, None, &observer).await?;
                    Deploy::run(&mut ctx).await?;
                    println!("deployed: {}", ctx.server_ip()?);
                }
                Target::Sandbox => {
                    let slug = slug.unwrap_or_else(naming::generate_slug);
                    println!("sandbox slug: {}", slug);
                    let mut ctx = Context::new(config, Some(slug), &observer).await?;
                    DeploySandbox::run(&mut ctx).await?;
                    println!("running: {}", ctx.server_ip()?);
                }
            }
            Ok(())
        }
        Commands::Destroy { confirm, slug } => {
            let config = config::from_file(&cli.file)?;
            if !confirm {
                let prompt = format!("Destroy everything for {:?}?", config.name);
                let confirmed = dialoguer::Confirm::new()
                    .with_prompt(prompt)
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("aborted");
                    return Ok(());
                }
            }
            let observer = SpinnerObserver::new(cli.verbose);
            match config.target {
                Target::Production => {
                    let mut ctx = Context::new(config, None, &observer).await?;
                    Destroy::run(&mut ctx).await?;
                }
                Target::Sandbox => {
                    let slug = slug.ok_or_else(|| {
                        anyhow::anyhow!("destroying a sandbox requires --slug")
                    })?;
                    let mut ctx = Context::new(config, Some(slug), &observer).await?;
                    DestroySandbox::run(&mut ctx).await?;
                }
            }
            println!("destroyed");
            Ok(())
        }
    }
}

/// Print what a deploy would install, with placeholders for values that
/// only exist once infrastructure is up.
fn render_dry_run(config: &Config, slug: Option<&str>) -> anyhow::Result<()> {
    let slug_owned;
    let slug = match (config.target, slug) {
        (Target::Sandbox, None) => {
            slug_owned = naming::generate_slug();
            Some(slug_owned.as_str())
        }
        (_, s) => s,
    };
    let prefix = naming::prefix(&config.name, config.target, slug)?;

    let mut passwords = HashMap::new();
    if config.databases.contains_key(&DatabaseKind::Postgres) {
        let configured = config.databases[&DatabaseKind::Postgres].password.clone();
        passwords.insert(
            DatabaseKind::Postgres,
            configured.unwrap_or_else(|| "generated-at-deploy".to_string()),
        );
    }
    let app_image = config.app.as_ref().map(|_| format!("{}:latest", prefix));

    let rendered = match config.target {
        Target::Production => manifests::generate(
            config,
            &prefix,
            &ManifestInputs {
                database_passwords: passwords,
                app_image,
                ..Default::default()
            },
        )?,
        Target::Sandbox => compose::generate(
            config,
            &compose::ComposeInputs {
                app_image,
                database_passwords: passwords,
            },
        )?,
    };
    println!("{}", rendered);
    Ok(())
}
