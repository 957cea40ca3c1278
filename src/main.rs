use std::{env, fs, path::PathBuf, process};

use anyhow::bail;
use botic::{
    bot::BotDefinition,
    config::{DEFAULT_ROOT, Settings},
    logger::init_tracing,
    registry::BotRegistry,
    storage::{JsonFileStorage, SessionSnapshot},
    sweeper::ExpiryScheduler,
};
use clap::{Args, Parser, Subcommand};
use schemars::schema_for;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "botic",
    about = "Scripted dialogue bots over chat channels",
    version = "0.1.0"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine
    Run(RunArgs),

    /// Emit JSON-Schema for bot definition and state files
    Schema,

    /// Initialize a fresh layout
    Init,

    /// Manage bot definitions
    Bot(BotArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Seconds between expiry sweeps
    #[arg(long)]
    sweep_interval: Option<u64>,

    /// Milliseconds between consecutive replies of one turn
    #[arg(long)]
    pacing_step: Option<u64>,

    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Args, Debug)]
struct BotArgs {
    #[command(subcommand)]
    command: BotCommands,
}

#[derive(Subcommand, Debug)]
enum BotCommands {
    Validate { file: PathBuf },
    Deploy { file: PathBuf },
}

/// Resolve the botic root directory from the environment or use default.
pub fn resolve_root_dir() -> PathBuf {
    if let Ok(path) = env::var("BOTIC_ROOT") {
        PathBuf::from(path)
    } else {
        PathBuf::from(DEFAULT_ROOT)
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = resolve_root_dir();

    match cli.command.unwrap_or(Commands::Run(RunArgs {
        sweep_interval: None,
        pacing_step: None,
        log_level: None,
    })) {
        Commands::Run(args) => run(root, args).await,
        Commands::Schema => {
            let out_dir = root.join("schemas");
            fs::create_dir_all(&out_dir)?;

            let bot_schema = serde_json::to_string_pretty(&schema_for!(BotDefinition))?;
            fs::write(out_dir.join("bot.schema.json"), bot_schema)?;
            let state_schema = serde_json::to_string_pretty(&schema_for!(SessionSnapshot))?;
            fs::write(out_dir.join("session-snapshot.schema.json"), state_schema)?;

            println!("Schemas written to {}", out_dir.display());
            Ok(())
        }
        Commands::Init => {
            for sub in ["bots", "state", "logs", "config", "schemas"] {
                fs::create_dir_all(root.join(sub))?;
            }
            println!("Initialized botic layout at {}", root.display());
            Ok(())
        }
        Commands::Bot(bot_args) => match bot_args.command {
            BotCommands::Validate { file } => {
                validate_definition_file(&file)?;
                Ok(())
            }
            BotCommands::Deploy { file } => {
                validate_definition_file(&file)?;
                let bots_dir = root.join("bots");
                fs::create_dir_all(&bots_dir)?;
                let Some(file_name) = file.file_name() else {
                    bail!("Not a file: {}", file.display());
                };
                let dest = bots_dir.join(file_name);
                fs::copy(&file, &dest)?;
                println!("✅ Deployed to {}", dest.display());
                Ok(())
            }
        },
    }
}

fn validate_definition_file(file: &PathBuf) -> anyhow::Result<()> {
    if !file.exists() {
        bail!("File does not exist: {}", file.display());
    }
    let definition = BotDefinition::from_file(file)?;
    let problems = definition.validate();
    if problems.is_empty() {
        println!("✅ Bot definition `{}` is valid.", definition.id);
    } else {
        println!("Bot definition `{}` loaded with warnings:", definition.id);
        for problem in problems {
            println!("  - {}", problem);
        }
    }
    Ok(())
}

async fn run(root: PathBuf, args: RunArgs) -> anyhow::Result<()> {
    let mut settings = Settings::load(&root.join("config").join(".env"));
    if let Some(sweep_interval) = args.sweep_interval {
        settings.sweep_interval_secs = sweep_interval;
    }
    if let Some(pacing_step) = args.pacing_step {
        settings.pacing_step_ms = pacing_step;
    }
    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }

    if !root.exists() {
        bail!(
            "Root directory `{}` does not exist. Please run `botic init` first.",
            root.display()
        );
    }

    let log_dir = root.join("logs");
    fs::create_dir_all(&log_dir)?;
    init_tracing(&settings.log_level, Some(&log_dir))?;

    info!("botic starting up…");

    let storage = JsonFileStorage::new(root.join("state"));
    let scheduler = ExpiryScheduler::new(settings.sweep_interval());
    let registry = BotRegistry::with_pacing(scheduler.clone(), storage, settings.pacing_step());

    let count = registry.load_dir(&root.join("bots")).await?;
    scheduler.start();

    println!("botic running with {count} bots; press Ctrl-C to exit");
    info!("botic running with {} bots", count);

    tokio::signal::ctrl_c().await?;

    println!("\nShutting down…");
    info!("botic shutting down");

    registry.shutdown().await;

    process::exit(0);
}
