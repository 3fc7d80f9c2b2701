use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;
use crate::matrix::Aggregation;
use crate::nmf::{NmfConfig, NmfInit, RankPolicy, DEFAULT_MAX_ITER, DEFAULT_N_COMPONENTS, DEFAULT_SEED, DEFAULT_TOL};
use crate::pipeline::TrainingConfig;

pub const DEFAULT_DATA_PATH: &str = "behavior_data.csv";
pub const DEFAULT_KEEP_SNAPSHOTS: usize = 5;

/// Конфигурация рекомендательной системы: TOML файл + переменные окружения
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommenderConfig {
    /// Путь к логу взаимодействий (CSV)
    pub data_path: PathBuf,
    /// Ранг факторизации k
    pub n_components: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub seed: u64,
    pub init: NmfInit,
    /// Как сворачивать повторные пары (user, item)
    pub aggregation: Aggregation,
    pub rank_policy: RankPolicy,
    /// Порог качества модели; `None` отключает проверку
    pub max_reconstruction_error: Option<f64>,
    pub snapshot_dir: PathBuf,
    /// Сколько последних snapshot'ов хранить
    pub keep_snapshots: usize,
    /// Длина выдачи по умолчанию; `None` = полный рейтинг
    pub default_top_n: Option<usize>,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            n_components: DEFAULT_N_COMPONENTS,
            max_iter: DEFAULT_MAX_ITER,
            tol: DEFAULT_TOL,
            seed: DEFAULT_SEED,
            init: NmfInit::default(),
            aggregation: Aggregation::default(),
            rank_policy: RankPolicy::default(),
            max_reconstruction_error: None,
            snapshot_dir: default_snapshot_dir(),
            keep_snapshots: DEFAULT_KEEP_SNAPSHOTS,
            default_top_n: None,
        }
    }
}

/// `<data_local_dir>/recsys/snapshots`, or `./snapshots` when the platform has none.
pub fn default_snapshot_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("recsys").join("snapshots"))
        .unwrap_or_else(|| PathBuf::from("snapshots"))
}

impl RecommenderConfig {
    /// Загрузить конфигурацию из переменных окружения
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// File values first, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text).map_err(|e| match e {
            ConfigError::Unreadable { reason, .. } => ConfigError::Unreadable {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Unreadable {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `RECSYS_*` variables read through `lookup`.
    ///
    /// Unparsable values are errors, never silently replaced by defaults.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| -> Option<(String, String)> {
            keys.iter()
                .find_map(|&key| lookup(key).map(|value| (key.to_string(), value)))
        };

        if let Some((_, value)) = get(&["RECSYS_DATA_PATH", "BEHAVIOR_DATA_PATH"]) {
            self.data_path = PathBuf::from(value);
        }
        if let Some((key, value)) = get(&["RECSYS_N_COMPONENTS", "NMF_COMPONENTS"]) {
            self.n_components = parse_value(&key, &value, "positive integer")?;
        }
        if let Some((key, value)) = get(&["RECSYS_MAX_ITER"]) {
            self.max_iter = parse_value(&key, &value, "positive integer")?;
        }
        if let Some((key, value)) = get(&["RECSYS_TOL"]) {
            self.tol = parse_value(&key, &value, "positive number")?;
        }
        if let Some((key, value)) = get(&["RECSYS_SEED"]) {
            self.seed = parse_value(&key, &value, "unsigned integer")?;
        }
        if let Some((key, value)) = get(&["RECSYS_INIT"]) {
            self.init = parse_value(&key, &value, "nndsvda | random")?;
        }
        if let Some((key, value)) = get(&["RECSYS_AGGREGATION"]) {
            self.aggregation = parse_value(&key, &value, "last | sum | mean | max")?;
        }
        if let Some((key, value)) = get(&["RECSYS_RANK_POLICY"]) {
            self.rank_policy = parse_value(&key, &value, "strict | clamp")?;
        }
        if let Some((key, value)) = get(&["RECSYS_MAX_RECONSTRUCTION_ERROR"]) {
            self.max_reconstruction_error = parse_optional(&key, &value, "non-negative number")?;
        }
        if let Some((_, value)) = get(&["RECSYS_SNAPSHOT_DIR"]) {
            self.snapshot_dir = PathBuf::from(value);
        }
        if let Some((key, value)) = get(&["RECSYS_KEEP_SNAPSHOTS"]) {
            self.keep_snapshots = parse_value(&key, &value, "unsigned integer")?;
        }
        if let Some((key, value)) = get(&["RECSYS_TOP_N"]) {
            self.default_top_n = parse_optional(&key, &value, "unsigned integer")?;
        }

        self.validate()?;
        debug!(config = ?self, "Recommender configuration loaded");
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_components == 0 {
            return Err(invalid("n_components", self.n_components, "positive integer"));
        }
        if self.max_iter == 0 {
            return Err(invalid("max_iter", self.max_iter, "positive integer"));
        }
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(invalid("tol", self.tol, "positive number"));
        }
        if let Some(threshold) = self.max_reconstruction_error {
            if !(threshold.is_finite() && threshold >= 0.0) {
                return Err(invalid("max_reconstruction_error", threshold, "non-negative number"));
            }
        }
        if self.keep_snapshots == 0 {
            return Err(invalid("keep_snapshots", self.keep_snapshots, "positive integer"));
        }
        if self.default_top_n == Some(0) {
            return Err(invalid("default_top_n", 0, "positive integer"));
        }
        if self.data_path.as_os_str().is_empty() {
            return Err(invalid("data_path", "", "non-empty path"));
        }
        Ok(())
    }

    pub fn nmf_config(&self) -> NmfConfig {
        NmfConfig {
            n_components: self.n_components,
            max_iter: self.max_iter,
            tol: self.tol,
            seed: self.seed,
            init: self.init,
            rank_policy: self.rank_policy,
        }
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            nmf: self.nmf_config(),
            aggregation: self.aggregation,
            max_reconstruction_error: self.max_reconstruction_error,
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            key: "config".to_string(),
            value: String::new(),
            expected: e.to_string(),
        })
    }
}

fn invalid(key: &str, value: impl Display, expected: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str, expected: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value, expected))
}

/// Empty string or `none` clears the option.
fn parse_optional<T: FromStr>(key: &str, value: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    parse_value(key, trimmed, expected).map(Some)
}
