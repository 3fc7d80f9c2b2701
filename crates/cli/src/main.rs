use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::commands::{RecommendCommand, SimulateCommand, SnapshotsCommand, TrainCommand};
use cli::{exit_code, load_config};
use colored::*;
use common::{init_structured_logging, LoggingConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "recsys")]
#[command(about = "NMF recommender: train on interaction logs, serve rankings")]
#[command(version)]
struct Cli {
    /// TOML файл конфигурации; RECSYS_* переменные окружения имеют приоритет
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Обучить модель и сохранить snapshot
    Train(TrainCommand),
    /// Рекомендации для пользователя
    Recommend(RecommendCommand),
    /// Сгенерировать синтетический лог
    Simulate(SimulateCommand),
    /// Управление snapshot'ами
    Snapshots(SnapshotsCommand),
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init_structured_logging(LoggingConfig::from_env()) {
        eprintln!("failed to initialise logging: {e}");
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(exit_code(&e));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Train(cmd) => cmd.execute(config).await,
        Commands::Recommend(cmd) => cmd.execute(config).await,
        Commands::Simulate(cmd) => cmd.execute(config).await,
        Commands::Snapshots(cmd) => cmd.execute(config).await,
    }
}
