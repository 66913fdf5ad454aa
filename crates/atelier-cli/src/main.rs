mod commands;

use atelier_core::{CoreError, Orchestrator, OrchestratorConfig};
use atelier_engine::DockerEngine;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_STORE_ERROR, EXIT_VALIDATION_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "atelier",
    version,
    about = "Manage GPU-backed creative-AI studio containers"
)]
struct Cli {
    /// Path to the orchestrator config file.
    #[arg(long, default_value = "~/.config/atelier/config.json")]
    config: String,

    /// Record store directory (overrides the config file).
    #[arg(long)]
    store: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a new environment from an image.
    Create {
        /// Environment name.
        name: String,
        /// Image reference to back the environment; pulled when missing.
        #[arg(long)]
        image: String,
        /// Host content root (models/input/output/extensions live under it).
        #[arg(long)]
        content: PathBuf,
        /// Path to a JSON mount specification; defaults to binding the
        /// well-known content directories.
        #[arg(long)]
        mounts: Option<PathBuf>,
        /// Arguments appended to the image entrypoint.
        #[arg(long)]
        command: Option<String>,
        /// Host port the studio runtime is published on.
        #[arg(long)]
        port: Option<u16>,
        /// Request GPU device access.
        #[arg(long, default_value_t = false)]
        gpu: bool,
        /// Container runtime name, e.g. "nvidia".
        #[arg(long)]
        runtime: Option<String>,
        /// Folder tag; may be repeated.
        #[arg(long = "folder")]
        folders: Vec<String>,
    },
    /// Duplicate an environment from a commit of its container.
    Duplicate {
        /// Source environment (id, id prefix, or name).
        source: String,
        /// Name for the duplicate.
        name: String,
        /// Host content root; defaults to the source's.
        #[arg(long)]
        content: Option<PathBuf>,
        /// Path to a JSON mount specification; defaults to the source's.
        #[arg(long)]
        mounts: Option<PathBuf>,
        /// Folder tag; may be repeated.
        #[arg(long = "folder")]
        folders: Vec<String>,
    },
    /// List environments.
    List {
        /// Only environments carrying this folder tag.
        #[arg(long)]
        folder: Option<String>,
        /// Include soft-deleted environments.
        #[arg(long, default_value_t = false)]
        deleted: bool,
    },
    /// Inspect one environment.
    Inspect {
        /// Environment (id, id prefix, or name).
        env: String,
    },
    /// Start an environment, provisioning it on first activation.
    Activate {
        /// Environment (id, id prefix, or name).
        env: String,
        /// Leave other running environments running.
        #[arg(long, default_value_t = false)]
        allow_multiple: bool,
    },
    /// Stop an environment.
    Deactivate {
        /// Environment (id, id prefix, or name).
        env: String,
    },
    /// Soft-delete an environment; a second delete removes it permanently.
    Delete {
        /// Environment (id, id prefix, or name).
        env: String,
    },
    /// Hard-delete the oldest soft-deleted environments beyond the
    /// retention bound.
    Prune,
    /// Rename an environment.
    Rename {
        /// Environment (id, id prefix, or name).
        env: String,
        /// New name.
        new_name: String,
    },
    /// Replace an environment's folder tags.
    Folders {
        /// Environment (id, id prefix, or name).
        env: String,
        /// Folder tags to set; none clears them.
        tags: Vec<String>,
    },
    /// Pull an image, reporting overall progress.
    Pull {
        /// Image reference.
        reference: String,
    },
    /// Follow the engine's container and image lifecycle events.
    Events,
    /// Follow an environment's container logs.
    Logs {
        /// Environment (id, id prefix, or name).
        env: String,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ATELIER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    if let Commands::Completions { shell } = &cli.command {
        return finish(commands::completions::run::<Cli>(*shell));
    }

    let mut config = match OrchestratorConfig::load(&expand_tilde(&cli.config)) {
        Ok(config) => config,
        Err(err) => return finish(Err(err)),
    };
    if let Some(store) = &cli.store {
        config.store_dir = expand_tilde(store);
    }

    let engine = match DockerEngine::connect() {
        Ok(engine) => Arc::new(engine),
        Err(err) => return finish(Err(err.into())),
    };
    let orchestrator = Orchestrator::new(engine, config);
    let json = cli.json;

    let result = match cli.command {
        Commands::Create {
            name,
            image,
            content,
            mounts,
            command,
            port,
            gpu,
            runtime,
            folders,
        } => {
            commands::create::run(
                &orchestrator,
                &name,
                &image,
                &content,
                mounts.as_deref(),
                commands::create::CreateOpts {
                    command,
                    port,
                    gpu,
                    runtime,
                    folders,
                },
                json,
            )
            .await
        }
        Commands::Duplicate {
            source,
            name,
            content,
            mounts,
            folders,
        } => {
            commands::duplicate::run(
                &orchestrator,
                &source,
                &name,
                content.as_deref(),
                mounts.as_deref(),
                folders,
                json,
            )
            .await
        }
        Commands::List { folder, deleted } => {
            commands::list::run(&orchestrator, folder.as_deref(), deleted, json).await
        }
        Commands::Inspect { env } => commands::inspect::run(&orchestrator, &env, json).await,
        Commands::Activate {
            env,
            allow_multiple,
        } => commands::activate::run(&orchestrator, &env, allow_multiple, json).await,
        Commands::Deactivate { env } => {
            commands::deactivate::run(&orchestrator, &env, json).await
        }
        Commands::Delete { env } => commands::delete::run(&orchestrator, &env, json).await,
        Commands::Prune => commands::prune::run(&orchestrator, json).await,
        Commands::Rename { env, new_name } => {
            commands::rename::run(&orchestrator, &env, &new_name, json).await
        }
        Commands::Folders { env, tags } => {
            commands::folders::run(&orchestrator, &env, tags, json).await
        }
        Commands::Pull { reference } => commands::pull::run(&orchestrator, &reference, json).await,
        Commands::Events => commands::events::run(&orchestrator, json).await,
        Commands::Logs { env } => commands::logs::run(&orchestrator, &env, json).await,
        Commands::Completions { .. } => unreachable!("handled before engine setup"),
    };
    finish(result)
}

fn finish(result: Result<u8, CoreError>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &CoreError) -> u8 {
    match err {
        CoreError::Validation(_) => EXIT_VALIDATION_ERROR,
        CoreError::Store(_) => EXIT_STORE_ERROR,
        _ => EXIT_FAILURE,
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
