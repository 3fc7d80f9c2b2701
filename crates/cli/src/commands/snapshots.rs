use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use colored::*;
use recommender::{export_file_name, RecommenderConfig, SnapshotManager};
use std::path::PathBuf;

/// Управление snapshot'ами модели
#[derive(Debug, Args)]
pub struct SnapshotsCommand {
    #[command(subcommand)]
    command: SnapshotsSubcommand,
}

#[derive(Debug, Clone, Subcommand)]
enum SnapshotsSubcommand {
    /// Показать список snapshot'ов (новые первые)
    #[command(name = "list")]
    List,

    /// Удалить старые snapshot'ы
    #[command(name = "cleanup")]
    Cleanup {
        /// Сколько последних оставить (по умолчанию keep_snapshots)
        #[arg(short, long)]
        keep: Option<usize>,
    },

    /// Выгрузить матрицу взаимодействий в CSV
    #[command(name = "export")]
    Export {
        /// Snapshot (по умолчанию последний)
        #[arg(short, long)]
        snapshot: Option<PathBuf>,

        /// Выходной CSV файл
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl SnapshotsCommand {
    pub async fn execute(self, config: RecommenderConfig) -> Result<()> {
        let manager = SnapshotManager::new(&config.snapshot_dir)?;

        match self.command {
            SnapshotsSubcommand::List => list_snapshots(&manager),
            SnapshotsSubcommand::Cleanup { keep } => {
                let keep = keep.unwrap_or(config.keep_snapshots);
                let deleted = manager.cleanup(keep)?;
                println!("{} Removed {} snapshot(s), kept up to {}", "✓".green(), deleted, keep);
                Ok(())
            }
            SnapshotsSubcommand::Export { snapshot, output } => {
                let path = match snapshot {
                    Some(path) => path,
                    None => manager
                        .latest()?
                        .map(|info| info.path)
                        .ok_or_else(|| anyhow!("no snapshots in {}", manager.base_path().display()))?,
                };
                let generation = manager.load(&path)?;
                let output = output.unwrap_or_else(|| PathBuf::from(export_file_name("interaction_matrix")));
                let cells = manager.export_matrix_csv(&generation, &output)?;
                println!("{} Exported {} cells to {}", "✓".green(), cells, output.display());
                Ok(())
            }
        }
    }
}

fn list_snapshots(manager: &SnapshotManager) -> Result<()> {
    let snapshots = manager.list()?;
    if snapshots.is_empty() {
        println!("{} No snapshots in {}", "ℹ".blue(), manager.base_path().display());
        return Ok(());
    }

    println!("{}", format!("Snapshots in {}", manager.base_path().display()).bold());
    for info in snapshots {
        let meta = &info.metadata;
        println!(
            "  {}  {}  {}×{} k={}  err={:.4}  {} KB",
            meta.created_at.format("%Y-%m-%d %H:%M:%S").to_string().cyan(),
            info.path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            meta.num_users,
            meta.num_items,
            meta.n_components,
            meta.reconstruction_error,
            info.size_bytes / 1024
        );
    }
    Ok(())
}
