//! Arbor CLI - load, validate and run behavior trees.
//!
//! Single binary that provides:
//! - `arbor validate` - build a tree definition and report problems
//! - `arbor tick` - tick a tree by hand and print each status
//! - `arbor run` - drive a tree with the scheduler until it stops
//! - `arbor export` - print the resolved definition
//! - `arbor init` - write a default `.arbor/config.yaml`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use arbor_bt::{Registry, TreeBuilder, TreeDefinition};
use arbor_runtime::{
    EventLog, ExecutionManager, RuntimeConfig, SchedulerMode, SchedulerState, TickOutcome,
};

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Behavior tree runtime", version)]
struct Cli {
    /// Project root directory (for .arbor/config.yaml)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a tree definition and report structural or configuration errors
    Validate {
        /// Tree definition (.json, .yaml or .yml)
        file: PathBuf,
    },

    /// Tick a tree by hand
    Tick {
        file: PathBuf,

        /// Number of ticks
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u64,

        /// Stop early once the root succeeds or fails
        #[arg(long)]
        until_terminal: bool,
    },

    /// Run a tree with the scheduler
    Run {
        file: PathBuf,

        /// Scheduling mode (defaults to the config)
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Tick period in interval mode
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Stop after this many ticks
        #[arg(long)]
        max_ticks: Option<u64>,

        /// Keep ticking after the root succeeds or fails
        #[arg(long)]
        keep_running: bool,

        /// Append execution events to this JSONL file
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Print the definition of the built tree, subtrees inlined
    Export {
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },

    /// Write a default .arbor/config.yaml
    Init,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Auto,
    Interval,
}

impl From<ModeArg> for SchedulerMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => SchedulerMode::Auto,
            ModeArg::Interval => SchedulerMode::Interval,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let project_root = match cli.project {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = RuntimeConfig::load_from_project(&project_root)?;

    match cli.command {
        Commands::Validate { file } => validate(&file, &config),
        Commands::Tick {
            file,
            count,
            until_terminal,
        } => tick(&file, config, count, until_terminal).await,
        Commands::Run {
            file,
            mode,
            interval_ms,
            max_ticks,
            keep_running,
            events,
        } => {
            let mut config = config;
            if let Some(mode) = mode {
                config.scheduler.mode = mode.into();
            }
            if let Some(interval_ms) = interval_ms {
                config.scheduler.interval_ms = interval_ms;
            }
            if max_ticks.is_some() {
                config.scheduler.max_ticks = max_ticks;
            }
            if keep_running {
                config.scheduler.stop_on_terminal = false;
            }
            run(&file, config, events).await
        }
        Commands::Export { file, format } => export(&file, &config, format),
        Commands::Init => init_project(&project_root),
    }
}

fn load(file: &Path) -> Result<TreeDefinition> {
    TreeDefinition::load(file).with_context(|| format!("Failed to load {}", file.display()))
}

fn validate(file: &Path, config: &RuntimeConfig) -> Result<()> {
    let def = load(file)?;
    let registry = Registry::builtin();
    let tree = TreeBuilder::new(&registry)
        .with_options(config.build_options())
        .build(&def)
        .with_context(|| format!("{} does not build", file.display()))?;

    println!(
        "{}: tree `{}` ok ({} nodes, {} subtrees)",
        file.display(),
        tree.tree_id(),
        tree.len(),
        def.subtrees.len()
    );
    Ok(())
}

async fn tick(file: &Path, config: RuntimeConfig, count: u64, until_terminal: bool) -> Result<()> {
    let def = load(file)?;
    let manager = ExecutionManager::new(Arc::new(Registry::builtin()), config);
    let handle = manager.create(&def)?;

    for _ in 0..count {
        match handle.tick().await? {
            TickOutcome::Ticked { tick, status } => {
                let tip = handle.lock().await.tree().tip().id().to_string();
                println!("tick {tick:>4}  {status:<8} tip={tip}");
                if until_terminal && status.is_terminal() {
                    break;
                }
            }
            TickOutcome::Paused => {
                println!("paused by the debugger");
                break;
            }
        }
    }

    println!("{}", handle.snapshot().await.to_json_pretty()?);
    Ok(())
}

async fn run(file: &Path, config: RuntimeConfig, events: Option<PathBuf>) -> Result<()> {
    let def = load(file)?;
    let options = config.start_options();
    let manager = ExecutionManager::new(Arc::new(Registry::builtin()), config);

    let recorder = events.map(|path| {
        let log = EventLog::new(path);
        let receiver = manager.subscribe();
        tokio::spawn(async move { log.record(receiver).await })
    });

    let handle = manager.create(&def)?;
    tracing::info!(execution_id = %handle.id(), tree_id = %handle.tree_id(), "running tree");
    handle.start(options)?;

    tokio::select! {
        _ = handle.scheduler().wait() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping");
            handle.scheduler().stop();
            handle.scheduler().wait().await;
        }
    }

    let status = handle.scheduler().status();
    let snapshot = handle.snapshot().await;
    println!("{}", snapshot.to_json_pretty()?);
    println!(
        "scheduler {} after {} ticks",
        status.state, status.ticks_executed
    );

    // Dropping every sender closes the bus so the recorder can finish.
    drop(handle);
    drop(manager);
    if let Some(recorder) = recorder {
        recorder.await??;
    }

    if status.state == SchedulerState::Error {
        anyhow::bail!(
            "execution failed: {}",
            status.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

fn export(file: &Path, config: &RuntimeConfig, format: Format) -> Result<()> {
    let def = load(file)?;
    let registry = Registry::builtin();
    let tree = TreeBuilder::new(&registry)
        .with_options(config.build_options())
        .build(&def)?;
    let exported = tree.to_definition();
    let text = match format {
        Format::Json => exported.to_json_pretty()?,
        Format::Yaml => exported.to_yaml()?,
    };
    println!("{text}");
    Ok(())
}

fn init_project(project_root: &Path) -> Result<()> {
    let dir = project_root.join(".arbor");
    let path = dir.join("config.yaml");
    if path.exists() {
        println!("{} already exists", path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&dir)?;
    let config = RuntimeConfig {
        version: Some("1".to_string()),
        ..RuntimeConfig::default()
    };
    std::fs::write(&path, serde_yaml::to_string(&config)?)?;

    tracing::info!(path = %path.display(), "wrote default config");
    println!("Initialized arbor project at {}", project_root.display());
    Ok(())
}
