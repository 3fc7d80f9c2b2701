//! Score reconstruction and per-user ranking.
//!
//! Ordering contract: items are sorted by descending predicted score; equal
//! scores keep ascending item index (the sort is stable over `0..num_items`).

use ndarray::{Array1, Array2};
use tracing::debug;

use crate::errors::QueryError;

/// One ranked item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredItem {
    pub index: usize,
    pub score: f64,
}

/// Check `0 <= user_index < num_users` and convert to a row index.
pub fn check_user_index(user_index: i64, num_users: usize) -> Result<usize, QueryError> {
    usize::try_from(user_index)
        .ok()
        .filter(|&idx| idx < num_users)
        .ok_or(QueryError::UserOutOfRange {
            index: user_index,
            num_users,
        })
}

fn check_shapes(user_features: &Array2<f64>, item_features: &Array2<f64>) -> Result<(), QueryError> {
    if user_features.ncols() != item_features.nrows() {
        return Err(QueryError::ShapeMismatch {
            user_dims: user_features.ncols(),
            item_dims: item_features.nrows(),
        });
    }
    Ok(())
}

/// Predicted score of every item for one user: `U[user, :] · V`.
pub fn score_items(
    user_features: &Array2<f64>,
    item_features: &Array2<f64>,
    user_index: i64,
) -> Result<Array1<f64>, QueryError> {
    check_shapes(user_features, item_features)?;
    let row = check_user_index(user_index, user_features.nrows())?;
    Ok(user_features.row(row).dot(item_features))
}

/// Scored items, best first.
pub fn rank_items(
    user_features: &Array2<f64>,
    item_features: &Array2<f64>,
    user_index: i64,
    top_n: Option<usize>,
) -> Result<Vec<ScoredItem>, QueryError> {
    let scores = score_items(user_features, item_features, user_index)?;

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    if let Some(n) = top_n {
        order.truncate(n);
    }

    debug!(user_index, returned = order.len(), "Ranked items");
    Ok(order
        .into_iter()
        .map(|index| ScoredItem {
            index,
            score: scores[index],
        })
        .collect())
}

/// Every item index for `user_index`, highest predicted score first.
pub fn recommend(
    user_features: &Array2<f64>,
    item_features: &Array2<f64>,
    user_index: i64,
) -> Result<Vec<usize>, QueryError> {
    recommend_top_n(user_features, item_features, user_index, None)
}

/// The first `n` entries of [`recommend`]; `None` returns the full ranking.
pub fn recommend_top_n(
    user_features: &Array2<f64>,
    item_features: &Array2<f64>,
    user_index: i64,
    n: Option<usize>,
) -> Result<Vec<usize>, QueryError> {
    Ok(rank_items(user_features, item_features, user_index, n)?
        .into_iter()
        .map(|item| item.index)
        .collect())
}
