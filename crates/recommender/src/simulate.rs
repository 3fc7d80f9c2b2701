//! Synthetic behaviour logs for demos, smoke tests and benchmarks.

use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{ConfigError, RecommenderError, RecommenderResult};
use crate::table::{InteractionRecord, REQUIRED_COLUMNS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub num_users: u64,
    pub num_items: u64,
    pub num_interactions: usize,
    /// Probability that a drawn pair carries a positive signal
    pub positive_rate: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_users: 1000,
            num_items: 500,
            num_interactions: 10_000,
            positive_rate: 0.05,
            seed: 42,
        }
    }
}

/// Uniformly drawn (user, item) pairs with Bernoulli(`positive_rate`) signals.
///
/// Pairs may repeat; ids fall in `0..num_users` and `0..num_items`. The same
/// config always yields the same log.
pub fn simulate_interactions(config: &SimulationConfig) -> RecommenderResult<Vec<InteractionRecord>> {
    for (key, value) in [("num_users", config.num_users), ("num_items", config.num_items)] {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
                expected: "positive integer".to_string(),
            }
            .into());
        }
    }
    if !(0.0..=1.0).contains(&config.positive_rate) {
        return Err(ConfigError::InvalidValue {
            key: "positive_rate".to_string(),
            value: config.positive_rate.to_string(),
            expected: "probability within [0, 1]".to_string(),
        }
        .into());
    }

    info!(
        users = config.num_users,
        items = config.num_items,
        interactions = config.num_interactions,
        "Simulating user behavior data"
    );

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let records: Vec<InteractionRecord> = (0..config.num_interactions)
        .map(|_| {
            let user_id = rng.gen_range(0..config.num_users);
            let item_id = rng.gen_range(0..config.num_items);
            let interaction = if rng.gen_bool(config.positive_rate) { 1.0 } else { 0.0 };
            InteractionRecord::new(user_id, item_id, interaction)
        })
        .collect();

    let positives = records.iter().filter(|r| r.interaction > 0.0).count();
    info!(positives, "Behavior data simulation complete");
    Ok(records)
}

/// Write records as `user_id,item_id,interaction`.
pub fn write_csv(records: &[InteractionRecord], path: impl AsRef<Path>) -> RecommenderResult<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| RecommenderError::Internal(format!("cannot create {}: {}", path.display(), e)))?;

    writer
        .write_record(REQUIRED_COLUMNS)
        .map_err(|e| RecommenderError::Internal(e.to_string()))?;
    for record in records {
        writer
            .write_record([
                record.user_id.to_string(),
                record.item_id.to_string(),
                record.interaction.to_string(),
            ])
            .map_err(|e| RecommenderError::Internal(e.to_string()))?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = records.len(), "Behavior data written");
    Ok(())
}
