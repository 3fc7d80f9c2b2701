use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::errors::{QueryError, RecommenderError, RecommenderResult};
use crate::generation::Generation;
use crate::pipeline::{train, train_from_path, TrainingConfig};
use crate::table::InteractionTable;

/// Holder of the currently served generation.
///
/// Readers take an `Arc` snapshot under a short read lock and never observe
/// a half-published model: publish replaces the whole `Arc` at once. A
/// failed retrain leaves the previous generation in place.
#[derive(Default)]
pub struct ModelStore {
    current: RwLock<Option<Arc<Generation>>>,
    /// Serialises retrains; queries never touch it.
    retrain_lock: Mutex<()>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generation(generation: Generation) -> Self {
        let store = Self::new();
        store.publish(generation);
        store
    }

    /// The served generation, or `ModelNotTrained` before the first publish.
    pub fn current(&self) -> Result<Arc<Generation>, QueryError> {
        self.current.read().clone().ok_or(QueryError::ModelNotTrained)
    }

    pub fn is_ready(&self) -> bool {
        self.current.read().is_some()
    }

    /// Swap in a new generation and return the one it replaced.
    pub fn publish(&self, generation: Generation) -> Option<Arc<Generation>> {
        self.swap(Arc::new(generation))
    }

    fn swap(&self, next: Arc<Generation>) -> Option<Arc<Generation>> {
        let id = next.id();
        let previous = self.current.write().replace(next);
        info!(
            generation = %id,
            replaced = ?previous.as_ref().map(|g| g.id()),
            "Published model generation"
        );
        previous
    }

    /// Recommend from whatever generation is current at call time.
    pub fn recommend(&self, user_index: i64, top_n: Option<usize>) -> RecommenderResult<Vec<usize>> {
        let generation = self.current()?;
        generation.recommend(user_index, top_n)
    }

    pub fn recommend_for_user_id(&self, user_id: u64, top_n: Option<usize>) -> RecommenderResult<Vec<u64>> {
        let generation = self.current()?;
        generation.recommend_for_user_id(user_id, top_n)
    }

    /// Train on `table` and publish on success. Runs on the calling thread.
    pub fn retrain_blocking(&self, table: InteractionTable, config: &TrainingConfig) -> RecommenderResult<Arc<Generation>> {
        let _guard = self.retrain_lock.lock();
        self.finish_retrain(train(table, config))
    }

    /// Same as [`ModelStore::retrain_blocking`], reading the log from disk.
    pub fn retrain_from_path_blocking(
        &self,
        path: impl Into<PathBuf>,
        config: &TrainingConfig,
    ) -> RecommenderResult<Arc<Generation>> {
        let path = path.into();
        let _guard = self.retrain_lock.lock();
        self.finish_retrain(train_from_path(&path, config))
    }

    /// Background retrain: factorization runs on the blocking pool while
    /// queries keep hitting the old generation.
    pub async fn retrain(self: &Arc<Self>, table: InteractionTable, config: TrainingConfig) -> RecommenderResult<Arc<Generation>> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.retrain_blocking(table, &config))
            .await
            .map_err(|e| {
                error!(error = %e, "Retrain task failed to complete");
                RecommenderError::Internal(format!("retrain task failed: {}", e))
            })?
    }

    pub async fn retrain_from_path(
        self: &Arc<Self>,
        path: impl Into<PathBuf>,
        config: TrainingConfig,
    ) -> RecommenderResult<Arc<Generation>> {
        let store = Arc::clone(self);
        let path = path.into();
        tokio::task::spawn_blocking(move || store.retrain_from_path_blocking(path, &config))
            .await
            .map_err(|e| RecommenderError::Internal(format!("retrain task failed: {}", e)))?
    }

    fn finish_retrain(&self, trained: RecommenderResult<Generation>) -> RecommenderResult<Arc<Generation>> {
        match trained {
            Ok(generation) => {
                // Возвращаем именно опубликованное поколение, даже если следом был другой publish
                let published = Arc::new(generation);
                self.swap(Arc::clone(&published));
                Ok(published)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    code = e.error_code(),
                    kept = ?self.current.read().as_ref().map(|g| g.id()),
                    "Retrain failed, keeping previous generation"
                );
                Err(e)
            }
        }
    }
}
