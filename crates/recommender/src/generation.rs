use chrono::{DateTime, Utc};
use common::OperationTimer;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{QueryError, RecommenderResult};
use crate::matrix::InteractionMatrix;
use crate::nmf::Factorization;
use crate::ranking;

/// Descriptive part of a generation; everything except the matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub generation_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub n_components: usize,
    pub num_users: usize,
    pub num_items: usize,
    pub reconstruction_error: f64,
    pub n_iter: usize,
    pub converged: bool,
}

/// One complete, immutable training output.
///
/// Holds the interaction matrix the model was fitted on (for id lookups),
/// the user and item features and the reconstruction error. Nothing in a
/// generation changes after construction; retraining builds a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    metadata: ModelMetadata,
    matrix: InteractionMatrix,
    user_features: Array2<f64>,
    item_features: Array2<f64>,
}

impl Generation {
    pub fn new(matrix: InteractionMatrix, factorization: Factorization) -> Self {
        let metadata = ModelMetadata {
            generation_id: Uuid::new_v4(),
            created_at: Utc::now(),
            n_components: factorization.n_components,
            num_users: matrix.num_users(),
            num_items: matrix.num_items(),
            reconstruction_error: factorization.reconstruction_error,
            n_iter: factorization.n_iter,
            converged: factorization.converged,
        };
        Self {
            metadata,
            matrix,
            user_features: factorization.user_features,
            item_features: factorization.item_features,
        }
    }

    /// Reassemble a persisted generation. Shapes are checked by the caller.
    pub(crate) fn from_parts(
        metadata: ModelMetadata,
        matrix: InteractionMatrix,
        user_features: Array2<f64>,
        item_features: Array2<f64>,
    ) -> Self {
        Self {
            metadata,
            matrix,
            user_features,
            item_features,
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn id(&self) -> Uuid {
        self.metadata.generation_id
    }

    pub fn matrix(&self) -> &InteractionMatrix {
        &self.matrix
    }

    pub fn user_features(&self) -> &Array2<f64> {
        &self.user_features
    }

    pub fn item_features(&self) -> &Array2<f64> {
        &self.item_features
    }

    pub fn reconstruction_error(&self) -> f64 {
        self.metadata.reconstruction_error
    }

    pub fn num_users(&self) -> usize {
        self.user_features.nrows()
    }

    pub fn num_items(&self) -> usize {
        self.item_features.ncols()
    }

    /// Ranked item indices for a user row index.
    pub fn recommend(&self, user_index: i64, top_n: Option<usize>) -> RecommenderResult<Vec<usize>> {
        let mut timer = OperationTimer::new("recommend");
        timer.add_field("generation", self.metadata.generation_id.to_string());
        timer.add_field("user_index", user_index);

        let result = ranking::recommend_top_n(&self.user_features, &self.item_features, user_index, top_n);
        match &result {
            Ok(items) => {
                timer.add_field("items_count", items.len());
                timer.finish();
            }
            Err(e) => {
                timer.finish_with_error(e);
            }
        }
        Ok(result?)
    }

    /// Ranked raw item ids for a raw user id, mapped through the matrix index.
    pub fn recommend_for_user_id(&self, user_id: u64, top_n: Option<usize>) -> RecommenderResult<Vec<u64>> {
        let row = self
            .matrix
            .user_index(user_id)
            .ok_or(QueryError::UnknownUser(user_id))?;
        let indices = self.recommend(row as i64, top_n)?;
        Ok(indices
            .into_iter()
            .filter_map(|idx| self.matrix.item_id(idx))
            .collect())
    }
}
