use anyhow::Result;
use clap::Args;
use colored::*;
use recommender::{simulate_interactions, write_csv, RecommenderConfig, SimulationConfig};
use std::path::PathBuf;

/// Сгенерировать синтетический лог поведения пользователей
#[derive(Debug, Args)]
pub struct SimulateCommand {
    #[arg(long, default_value_t = 1000)]
    users: u64,

    #[arg(long, default_value_t = 500)]
    items: u64,

    #[arg(long, default_value_t = 10_000)]
    interactions: usize,

    /// Доля положительных сигналов
    #[arg(long, default_value_t = 0.05)]
    positive_rate: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Куда писать CSV (по умолчанию data_path из конфигурации)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl SimulateCommand {
    pub async fn execute(self, config: RecommenderConfig) -> Result<()> {
        let simulation = SimulationConfig {
            num_users: self.users,
            num_items: self.items,
            num_interactions: self.interactions,
            positive_rate: self.positive_rate,
            seed: self.seed,
        };
        let output = self.output.unwrap_or(config.data_path);

        let records = simulate_interactions(&simulation)?;
        write_csv(&records, &output)?;

        let positives = records.iter().filter(|r| r.interaction > 0.0).count();
        println!(
            "{} Wrote {} interactions ({} positive) to {}",
            "✓".green(),
            records.len(),
            positives,
            output.display()
        );
        Ok(())
    }
}
