use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use recommender::{train_from_path, RecommenderConfig, SnapshotManager};
use std::path::PathBuf;
use tracing::info;

/// Обучить модель на логе взаимодействий и сохранить snapshot
#[derive(Debug, Args)]
pub struct TrainCommand {
    /// CSV лог (по умолчанию data_path из конфигурации)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Ранг факторизации k
    #[arg(short = 'k', long)]
    components: Option<usize>,

    /// Не сохранять snapshot
    #[arg(long)]
    no_snapshot: bool,

    /// Сколько snapshot'ов оставить после сохранения
    #[arg(long)]
    keep: Option<usize>,

    /// Вывести метаданные модели в JSON
    #[arg(long)]
    json: bool,
}

impl TrainCommand {
    pub async fn execute(self, mut config: RecommenderConfig) -> Result<()> {
        if let Some(data) = self.data {
            config.data_path = data;
        }
        if let Some(k) = self.components {
            config.n_components = k;
        }
        if let Some(keep) = self.keep {
            config.keep_snapshots = keep;
        }
        config.validate()?;

        let training = config.training_config();
        let data_path = config.data_path.clone();
        let generation = tokio::task::spawn_blocking(move || train_from_path(&data_path, &training))
            .await
            .context("training task panicked")??;

        let meta = generation.metadata();
        if self.json {
            println!("{}", serde_json::to_string_pretty(meta)?);
        } else {
            println!("{} Model trained", "✓".green());
            println!("  generation:           {}", meta.generation_id.to_string().cyan());
            println!("  users × items:        {} × {}", meta.num_users, meta.num_items);
            println!("  components:           {}", meta.n_components);
            println!(
                "  reconstruction error: {:.6} ({} iterations{})",
                meta.reconstruction_error,
                meta.n_iter,
                if meta.converged { "" } else { ", not converged" }
            );
        }

        if self.no_snapshot {
            return Ok(());
        }

        let manager = SnapshotManager::new(&config.snapshot_dir)?;
        let path = manager.save(&generation)?;
        let deleted = manager.cleanup(config.keep_snapshots)?;
        info!(deleted, keep = config.keep_snapshots, "Old snapshots cleaned up");

        if !self.json {
            println!("  snapshot:             {}", path.display());
            if deleted > 0 {
                println!("  {} {} old snapshot(s) removed", "🗑".dimmed(), deleted);
            }
        }
        Ok(())
    }
}
