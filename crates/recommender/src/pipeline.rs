//! Training cycle: Load → Build → Factorize → publishable generation.
//!
//! A cycle walks `Empty → Loading → Built → Trained → Ready` exactly once.
//! Any failure abandons the cycle; nothing partial ever leaves it.

use std::fmt;
use std::path::Path;

use common::OperationTimer;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::{DataError, RecommenderResult, TrainingError};
use crate::generation::Generation;
use crate::loader::load_table;
use crate::matrix::{Aggregation, InteractionMatrix};
use crate::nmf::{Factorization, Nmf, NmfConfig};
use crate::table::InteractionTable;

/// Everything one training run needs besides the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrainingConfig {
    pub nmf: NmfConfig,
    pub aggregation: Aggregation,
    /// Quality gate: fail the run when the reconstruction error is above this.
    pub max_reconstruction_error: Option<f64>,
}

impl TrainingConfig {
    pub fn with_components(n_components: usize) -> Self {
        Self {
            nmf: NmfConfig::with_components(n_components),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingStage {
    Empty,
    Loading,
    Built,
    Trained,
    Ready,
}

impl TrainingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStage::Empty => "empty",
            TrainingStage::Loading => "loading",
            TrainingStage::Built => "built",
            TrainingStage::Trained => "trained",
            TrainingStage::Ready => "ready",
        }
    }
}

impl fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One training run. Consumed by [`TrainingCycle::finish`].
pub struct TrainingCycle {
    config: TrainingConfig,
    stage: TrainingStage,
    table: Option<InteractionTable>,
    matrix: Option<InteractionMatrix>,
    factorization: Option<Factorization>,
}

impl TrainingCycle {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            stage: TrainingStage::Empty,
            table: None,
            matrix: None,
            factorization: None,
        }
    }

    pub fn stage(&self) -> TrainingStage {
        self.stage
    }

    fn expect_stage(&self, expected: TrainingStage) -> Result<(), TrainingError> {
        if self.stage != expected {
            return Err(TrainingError::InvalidStage {
                expected: expected.as_str(),
                actual: self.stage.as_str(),
            });
        }
        Ok(())
    }

    /// Empty → Loading, reading the log from disk.
    pub fn load_path(&mut self, path: impl AsRef<Path>) -> RecommenderResult<()> {
        self.expect_stage(TrainingStage::Empty)?;
        let table = load_table(path)?;
        self.accept_table(table)
    }

    /// Empty → Loading with an already loaded table. Empty tables stop here.
    pub fn accept_table(&mut self, table: InteractionTable) -> RecommenderResult<()> {
        self.expect_stage(TrainingStage::Empty)?;
        if table.is_empty() {
            return Err(DataError::Empty {
                source_name: "interaction table".to_string(),
            }
            .into());
        }
        self.table = Some(table);
        self.stage = TrainingStage::Loading;
        Ok(())
    }

    /// Loading → Built.
    pub fn build(&mut self) -> RecommenderResult<()> {
        self.expect_stage(TrainingStage::Loading)?;
        let table = self.table.take().ok_or(TrainingError::InvalidStage {
            expected: TrainingStage::Loading.as_str(),
            actual: self.stage.as_str(),
        })?;
        let matrix = InteractionMatrix::build(&table, self.config.aggregation)?;
        self.matrix = Some(matrix);
        self.stage = TrainingStage::Built;
        Ok(())
    }

    /// Built → Trained. Applies the quality gate when configured.
    pub fn factorize(&mut self) -> RecommenderResult<()> {
        self.expect_stage(TrainingStage::Built)?;
        let matrix = self.matrix.as_ref().ok_or(TrainingError::InvalidStage {
            expected: TrainingStage::Built.as_str(),
            actual: self.stage.as_str(),
        })?;

        info!(
            n_components = self.config.nmf.n_components,
            users = matrix.num_users(),
            items = matrix.num_items(),
            "Training NMF model"
        );
        let factorization = Nmf::new(self.config.nmf.clone()).fit(matrix.values())?;

        info!(
            validation_score = factorization.reconstruction_error,
            "Model validation score"
        );
        if let Some(threshold) = self.config.max_reconstruction_error {
            if factorization.reconstruction_error > threshold {
                error!(
                    error = factorization.reconstruction_error,
                    threshold, "Model rejected by quality gate"
                );
                return Err(TrainingError::QualityGate {
                    error: factorization.reconstruction_error,
                    threshold,
                }
                .into());
            }
        }

        self.factorization = Some(factorization);
        self.stage = TrainingStage::Trained;
        Ok(())
    }

    /// Trained → Ready: seal the outputs into an immutable generation.
    pub fn finish(mut self) -> RecommenderResult<Generation> {
        self.expect_stage(TrainingStage::Trained)?;
        let invalid = || TrainingError::InvalidStage {
            expected: TrainingStage::Trained.as_str(),
            actual: TrainingStage::Trained.as_str(),
        };
        let matrix = self.matrix.take().ok_or_else(invalid)?;
        let factorization = self.factorization.take().ok_or_else(invalid)?;
        self.stage = TrainingStage::Ready;

        let generation = Generation::new(matrix, factorization);
        info!(generation = %generation.id(), "Generation ready");
        Ok(generation)
    }
}

/// Train a new generation from an in-memory table.
///
/// An empty table fails with `DataError::Empty` before any matrix work; a
/// table without the required columns fails in the builder with a
/// `ValidationError`.
pub fn train(table: InteractionTable, config: &TrainingConfig) -> RecommenderResult<Generation> {
    let mut timer = OperationTimer::new("train");
    timer.add_field("rows", table.len());
    timer.add_field("n_components", config.nmf.n_components);

    let result = run_cycle(table, config);
    match &result {
        Ok(generation) => {
            timer.add_field("generation", generation.id().to_string());
            timer.finish();
        }
        Err(e) => {
            timer.finish_with_error(e);
        }
    }
    result
}

fn run_cycle(table: InteractionTable, config: &TrainingConfig) -> RecommenderResult<Generation> {
    let mut cycle = TrainingCycle::new(config.clone());
    cycle.accept_table(table)?;
    cycle.build()?;
    cycle.factorize()?;
    cycle.finish()
}

/// Load the log from disk and train on it.
///
/// Missing columns surface from the builder as `ValidationError`, the same
/// as for [`train`].
pub fn train_from_path(path: impl AsRef<Path>, config: &TrainingConfig) -> RecommenderResult<Generation> {
    let path = path.as_ref();
    info!(path = %path.display(), "Loading behavior data");
    let table = load_table(path)?;
    train(table, config)
}
