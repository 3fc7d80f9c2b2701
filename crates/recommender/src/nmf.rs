//! Non-negative matrix factorization.
//!
//! Decomposes the interaction matrix `M` (users × items) into
//!   M ≈ U · V
//! where U (users × k) holds user embeddings and V (k × items) item embeddings,
//! both non-negative. Uses the multiplicative update rules of Lee & Seung for
//! the Frobenius objective, started from an NNDSVD initialisation.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, Zip};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::TrainingError;

pub const DEFAULT_N_COMPONENTS: usize = 15;
pub const DEFAULT_MAX_ITER: usize = 200;
pub const DEFAULT_TOL: f64 = 1e-4;
pub const DEFAULT_SEED: u64 = 42;

/// Denominator guard for the multiplicative updates.
const EPSILON: f64 = 1e-10;
/// NNDSVD entries below this are treated as zero before mean filling.
const NNDSVD_ZERO: f64 = 1e-6;
const POWER_ITERATIONS: usize = 64;
const CONVERGENCE_CHECK_EVERY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NmfInit {
    /// NNDSVD with zeros replaced by the matrix mean. Fully deterministic.
    #[default]
    Nndsvda,
    /// Uniform values scaled by `sqrt(mean / k)`, drawn from a seeded ChaCha RNG.
    Random,
}

impl FromStr for NmfInit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nndsvda" | "nndsvd" => Ok(NmfInit::Nndsvda),
            "random" => Ok(NmfInit::Random),
            other => Err(format!("unknown init '{other}'")),
        }
    }
}

impl fmt::Display for NmfInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NmfInit::Nndsvda => write!(f, "nndsvda"),
            NmfInit::Random => write!(f, "random"),
        }
    }
}

/// What to do when `k` exceeds `min(users, items)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankPolicy {
    /// Fail with `InvalidRank`.
    #[default]
    Strict,
    /// Lower `k` to `min(users, items)` and log a warning.
    Clamp,
}

impl FromStr for RankPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(RankPolicy::Strict),
            "clamp" => Ok(RankPolicy::Clamp),
            other => Err(format!("unknown rank policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NmfConfig {
    pub n_components: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub seed: u64,
    pub init: NmfInit,
    pub rank_policy: RankPolicy,
}

impl Default for NmfConfig {
    fn default() -> Self {
        Self {
            n_components: DEFAULT_N_COMPONENTS,
            max_iter: DEFAULT_MAX_ITER,
            tol: DEFAULT_TOL,
            seed: DEFAULT_SEED,
            init: NmfInit::default(),
            rank_policy: RankPolicy::default(),
        }
    }
}

impl NmfConfig {
    pub fn with_components(n_components: usize) -> Self {
        Self {
            n_components,
            ..Self::default()
        }
    }
}

/// Output of one factorization run.
#[derive(Debug, Clone, PartialEq)]
pub struct Factorization {
    /// users × k
    pub user_features: Array2<f64>,
    /// k × items
    pub item_features: Array2<f64>,
    /// Frobenius norm of `M − U·V`.
    pub reconstruction_error: f64,
    pub n_components: usize,
    pub n_iter: usize,
    pub converged: bool,
}

pub struct Nmf {
    config: NmfConfig,
}

impl Nmf {
    pub fn new(config: NmfConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NmfConfig {
        &self.config
    }

    /// Rank actually used for a matrix of `shape`, after applying the rank policy.
    pub fn effective_rank(&self, shape: (usize, usize)) -> Result<usize, TrainingError> {
        let max = shape.0.min(shape.1);
        let requested = self.config.n_components;

        if requested == 0 || max == 0 {
            return Err(TrainingError::InvalidRank { requested, max });
        }
        if requested <= max {
            return Ok(requested);
        }
        match self.config.rank_policy {
            RankPolicy::Strict => Err(TrainingError::InvalidRank { requested, max }),
            RankPolicy::Clamp => {
                warn!(requested, clamped = max, "Rank exceeds matrix shape, clamping");
                Ok(max)
            }
        }
    }

    /// Factorize `x`. The input is only borrowed and never modified.
    pub fn fit(&self, x: &Array2<f64>) -> Result<Factorization, TrainingError> {
        check_input(x)?;
        let k = self.effective_rank(x.dim())?;

        let (mut w, mut h) = match self.config.init {
            NmfInit::Nndsvda => nndsvda_init(x, k),
            NmfInit::Random => random_init(x, k, self.config.seed),
        };

        let error_at_init = frobenius_error(x, &w, &h);
        if !error_at_init.is_finite() {
            return Err(TrainingError::NonFinite {
                stage: "initialisation",
            });
        }
        debug!(k, init = %self.config.init, error_at_init, "NMF initialised");

        let mut previous_error = error_at_init;
        let mut n_iter = 0;
        let mut converged = error_at_init == 0.0;

        if !converged {
            for iter in 1..=self.config.max_iter {
                update_user_features(x, &mut w, &h);
                update_item_features(x, &w, &mut h);
                n_iter = iter;

                if self.config.tol > 0.0 && iter % CONVERGENCE_CHECK_EVERY == 0 {
                    let error = frobenius_error(x, &w, &h);
                    if !error.is_finite() {
                        return Err(TrainingError::NonFinite { stage: "iteration" });
                    }
                    debug!(iter, error, "NMF progress");
                    if (previous_error - error) / error_at_init < self.config.tol {
                        converged = true;
                        break;
                    }
                    previous_error = error;
                }
            }
        }

        if !all_finite(&w) || !all_finite(&h) {
            return Err(TrainingError::NonFinite { stage: "output" });
        }
        if !converged {
            warn!(
                max_iter = self.config.max_iter,
                "NMF reached the iteration limit without converging"
            );
        }

        let reconstruction_error = frobenius_error(x, &w, &h);
        info!(
            k,
            n_iter,
            converged,
            reconstruction_error,
            "NMF model training complete"
        );

        Ok(Factorization {
            user_features: w,
            item_features: h,
            reconstruction_error,
            n_components: k,
            n_iter,
            converged,
        })
    }
}

fn check_input(x: &Array2<f64>) -> Result<(), TrainingError> {
    for ((row, col), &value) in x.indexed_iter() {
        if !value.is_finite() {
            return Err(TrainingError::NonFinite { stage: "input" });
        }
        if value < 0.0 {
            return Err(TrainingError::NegativeInput { row, col, value });
        }
    }
    Ok(())
}

fn all_finite(m: &Array2<f64>) -> bool {
    m.iter().all(|v| v.is_finite())
}

pub(crate) fn frobenius_error(x: &Array2<f64>, w: &Array2<f64>, h: &Array2<f64>) -> f64 {
    let reconstruction = w.dot(h);
    (x - &reconstruction).mapv(|v| v * v).sum().sqrt()
}

// W = W * (X Hᵀ) / (W H Hᵀ)
fn update_user_features(x: &Array2<f64>, w: &mut Array2<f64>, h: &Array2<f64>) {
    let numerator = x.dot(&h.t());
    let denominator = w.dot(&h.dot(&h.t()));
    Zip::from(w)
        .and(&numerator)
        .and(&denominator)
        .for_each(|w, &num, &den| *w *= num / (den + EPSILON));
}

// H = H * (Wᵀ X) / (Wᵀ W H)
fn update_item_features(x: &Array2<f64>, w: &Array2<f64>, h: &mut Array2<f64>) {
    let numerator = w.t().dot(x);
    let denominator = w.t().dot(w).dot(&*h);
    Zip::from(h)
        .and(&numerator)
        .and(&denominator)
        .for_each(|h, &num, &den| *h *= num / (den + EPSILON));
}

fn random_init(x: &Array2<f64>, k: usize, seed: u64) -> (Array2<f64>, Array2<f64>) {
    let (n, m) = x.dim();
    let scale = (x.mean().unwrap_or(0.0) / k as f64).sqrt();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let w = Array2::from_shape_fn((n, k), |_| scale * rng.gen::<f64>());
    let h = Array2::from_shape_fn((k, m), |_| scale * rng.gen::<f64>());
    (w, h)
}

/// NNDSVD (Boutsidis & Gallopoulos) with zero entries filled by the mean ("a" variant).
fn nndsvda_init(x: &Array2<f64>, k: usize) -> (Array2<f64>, Array2<f64>) {
    let (n, m) = x.dim();
    let (u, sigma, v) = truncated_svd(x, k);

    let mut w = Array2::<f64>::zeros((n, k));
    let mut h = Array2::<f64>::zeros((k, m));

    // Leading singular vectors of a non-negative matrix are sign-consistent.
    let root = sigma[0].sqrt();
    w.column_mut(0).assign(&u.column(0).mapv(|a| a.abs() * root));
    h.row_mut(0).assign(&v.column(0).mapv(|a| a.abs() * root));

    for j in 1..k {
        let x_col = u.column(j);
        let y_col = v.column(j);

        let x_pos = x_col.mapv(|a| a.max(0.0));
        let x_neg = x_col.mapv(|a| (-a).max(0.0));
        let y_pos = y_col.mapv(|a| a.max(0.0));
        let y_neg = y_col.mapv(|a| (-a).max(0.0));

        let (x_pos_norm, y_pos_norm) = (norm(&x_pos), norm(&y_pos));
        let (x_neg_norm, y_neg_norm) = (norm(&x_neg), norm(&y_neg));
        let mass_pos = x_pos_norm * y_pos_norm;
        let mass_neg = x_neg_norm * y_neg_norm;

        let (left, right, mass) = if mass_pos > mass_neg {
            (x_pos / x_pos_norm, y_pos / y_pos_norm, mass_pos)
        } else if mass_neg > 0.0 {
            (x_neg / x_neg_norm, y_neg / y_neg_norm, mass_neg)
        } else {
            continue;
        };

        let lambda = (sigma[j] * mass).sqrt();
        w.column_mut(j).assign(&(left * lambda));
        h.row_mut(j).assign(&(right * lambda));
    }

    let avg = x.mean().unwrap_or(0.0);
    let fill = |a: f64| if a < NNDSVD_ZERO { avg } else { a };
    w.mapv_inplace(fill);
    h.mapv_inplace(fill);
    (w, h)
}

/// Top-`k` singular triplets by orthogonal (subspace) iteration.
///
/// Returns `(U, sigma, V)` with `U` users × k and `V` items × k. The start
/// basis is the `k` rows of `x` with the largest norm (ties: lower row first),
/// so the result depends only on `x`.
fn truncated_svd(x: &Array2<f64>, k: usize) -> (Array2<f64>, Vec<f64>, Array2<f64>) {
    let (n, m) = x.dim();

    let row_norms: Vec<f64> = x.rows().into_iter().map(|r| r.dot(&r)).collect();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| row_norms[b].total_cmp(&row_norms[a]));

    let mut v = Array2::<f64>::zeros((m, k));
    for (j, &row) in order.iter().take(k).enumerate() {
        v.column_mut(j).assign(&x.row(row));
    }
    orthonormalize_columns(&mut v);

    for _ in 0..POWER_ITERATIONS {
        let mut u = x.dot(&v);
        orthonormalize_columns(&mut u);
        v = x.t().dot(&u);
        orthonormalize_columns(&mut v);
    }

    let xv = x.dot(&v);
    let mut u = Array2::<f64>::zeros((n, k));
    let mut sigma = vec![0.0; k];
    for j in 0..k {
        let column = xv.column(j);
        let s = column.dot(&column).sqrt();
        sigma[j] = s;
        if s > 0.0 {
            u.column_mut(j).assign(&(&column / s));
        }
    }
    (u, sigma, v)
}

/// Modified Gram-Schmidt over columns, in order.
///
/// A column that collapses is replaced by the standard basis vector with the
/// largest component orthogonal to the previous columns, so the result always
/// has orthonormal columns when `cols <= rows`.
fn orthonormalize_columns(m: &mut Array2<f64>) {
    let (rows, cols) = m.dim();
    for j in 0..cols {
        let mut column = m.column(j).to_owned();
        remove_projections(m, j, &mut column);
        let mut length = norm(&column);

        if length < 1e-10 {
            let mut best: Option<(Array1<f64>, f64)> = None;
            for basis in 0..rows {
                let mut candidate = Array1::<f64>::zeros(rows);
                candidate[basis] = 1.0;
                remove_projections(m, j, &mut candidate);
                let candidate_len = norm(&candidate);
                if best.as_ref().map_or(true, |(_, l)| candidate_len > *l) {
                    best = Some((candidate, candidate_len));
                }
            }
            if let Some((candidate, candidate_len)) = best {
                column = candidate;
                length = candidate_len;
            }
        }

        if length > 0.0 {
            m.column_mut(j).assign(&(column / length));
        }
    }
}

fn remove_projections(m: &Array2<f64>, upto: usize, vector: &mut Array1<f64>) {
    for p in 0..upto {
        let previous = m.column(p);
        let projection = previous.dot(&*vector);
        vector.scaled_add(-projection, &previous);
    }
}

fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}
