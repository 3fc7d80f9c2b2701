use std::path::PathBuf;
use thiserror::Error;

/// Основная иерархия ошибок рекомендательного ядра
#[derive(Error, Debug)]
pub enum RecommenderError {
    // === Входные данные ===
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // === Обучение ===
    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    // === Запросы ===
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    // === Инфраструктура ===
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while reading the raw interaction log.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("interaction log is empty: {source_name}")]
    Empty { source_name: String },

    #[error("malformed data in {source_name}: {reason}")]
    Format { source_name: String, reason: String },

    #[error("missing required columns: {}", missing.join(", "))]
    Schema { missing: Vec<String> },
}

/// Matrix-build preconditions.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("interaction table has no rows")]
    EmptyTable,

    #[error("invalid {column} at row {row}: {value} is not a non-negative integer id")]
    InvalidId {
        column: String,
        row: usize,
        value: f64,
    },

    #[error("inconsistent matrix parts: {0}")]
    Inconsistent(String),
}

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("invalid rank: k = {requested}, must be in 1..={max}")]
    InvalidRank { requested: usize, max: usize },

    #[error("negative value {value} at ({row}, {col}); factorization requires non-negative input")]
    NegativeInput { row: usize, col: usize, value: f64 },

    #[error("non-finite values detected in {stage}")]
    NonFinite { stage: &'static str },

    #[error("reconstruction error {error:.6} exceeds threshold {threshold:.6}")]
    QualityGate { error: f64, threshold: f64 },

    #[error("training cycle is in stage {actual}, expected {expected}")]
    InvalidStage {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Query-side failures. All but `ModelNotTrained` are client faults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("user index {index} is out of range (0..{num_users})")]
    UserOutOfRange { index: i64, num_users: usize },

    #[error("unknown user id {0}")]
    UnknownUser(u64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("model is not trained yet")]
    ModelNotTrained,

    #[error("feature shapes do not align: user features have {user_dims} factors, item features have {item_dims}")]
    ShapeMismatch { user_dims: usize, item_dims: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value} ({expected})")]
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },

    #[error("failed to read config {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("unsupported snapshot format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("corrupted snapshot: {0}")]
    Corrupted(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// How the calling layer (HTTP, FaaS, CLI) should frame an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed request shape.
    BadRequest,
    /// Well-formed request for a user the model does not know.
    NotFound,
    /// Everything else.
    Internal,
}

impl ErrorClass {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorClass::BadRequest => 400,
            ErrorClass::NotFound => 404,
            ErrorClass::Internal => 500,
        }
    }
}

/// Error severity для alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Trait для определения retriable ошибок
pub trait IsRetriable {
    fn is_retriable(&self) -> bool;
}

impl IsRetriable for RecommenderError {
    fn is_retriable(&self) -> bool {
        match self {
            // Transient file system trouble may clear up on the next scheduled run
            RecommenderError::Io(_) => true,
            RecommenderError::Data(DataError::NotFound { .. }) => true,
            RecommenderError::Snapshot(SnapshotError::NotFound { .. }) => true,

            // Bad input and numerical failures repeat until the input changes
            _ => false,
        }
    }
}

impl RecommenderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RecommenderError::Query(QueryError::UserOutOfRange { .. })
            | RecommenderError::Query(QueryError::UnknownUser(_)) => ErrorClass::NotFound,
            RecommenderError::Query(QueryError::InvalidRequest(_)) => ErrorClass::BadRequest,
            _ => ErrorClass::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RecommenderError::Snapshot(SnapshotError::ChecksumMismatch { .. })
            | RecommenderError::Snapshot(SnapshotError::Corrupted(_)) => ErrorSeverity::Critical,
            RecommenderError::Internal(_) => ErrorSeverity::Critical,

            RecommenderError::Training(_) => ErrorSeverity::High,
            RecommenderError::Config(_) => ErrorSeverity::High,

            RecommenderError::Data(_) => ErrorSeverity::Medium,
            RecommenderError::Validation(_) => ErrorSeverity::Medium,
            RecommenderError::Io(_) => ErrorSeverity::Medium,
            RecommenderError::Snapshot(_) => ErrorSeverity::Medium,
            RecommenderError::Query(QueryError::ModelNotTrained) => ErrorSeverity::Medium,

            // Expected client errors
            RecommenderError::Query(_) => ErrorSeverity::Low,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RecommenderError::Data(DataError::NotFound { .. }) => "DATA_LOAD_ERROR",
            RecommenderError::Data(DataError::Empty { .. }) => "DATA_EMPTY_ERROR",
            RecommenderError::Data(DataError::Format { .. }) => "DATA_FORMAT_ERROR",
            RecommenderError::Data(DataError::Schema { .. }) => "SCHEMA_ERROR",
            RecommenderError::Validation(_) => "VALIDATION_ERROR",
            RecommenderError::Training(TrainingError::InvalidRank { .. }) => "INVALID_RANK",
            RecommenderError::Training(_) => "TRAINING_ERROR",
            RecommenderError::Query(QueryError::UserOutOfRange { .. }) => "USER_OUT_OF_RANGE",
            RecommenderError::Query(QueryError::UnknownUser(_)) => "UNKNOWN_USER",
            RecommenderError::Query(QueryError::InvalidRequest(_)) => "INVALID_REQUEST",
            RecommenderError::Query(QueryError::ModelNotTrained) => "MODEL_NOT_TRAINED",
            RecommenderError::Query(QueryError::ShapeMismatch { .. }) => "SHAPE_MISMATCH",
            RecommenderError::Config(_) => "CONFIG_ERROR",
            RecommenderError::Snapshot(_) => "SNAPSHOT_ERROR",
            RecommenderError::Io(_) => "IO_ERROR",
            RecommenderError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias для удобства
pub type RecommenderResult<T> = Result<T, RecommenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let out_of_range = RecommenderError::from(QueryError::UserOutOfRange {
            index: -1,
            num_users: 2,
        });
        assert_eq!(out_of_range.class(), ErrorClass::NotFound);
        assert_eq!(out_of_range.class().http_status(), 404);

        let bad_request = RecommenderError::from(QueryError::InvalidRequest("no user_id".into()));
        assert_eq!(bad_request.class().http_status(), 400);

        let not_trained = RecommenderError::from(QueryError::ModelNotTrained);
        assert_eq!(not_trained.class(), ErrorClass::Internal);

        let training = RecommenderError::from(TrainingError::NonFinite { stage: "output" });
        assert_eq!(training.class().http_status(), 500);
    }

    #[test]
    fn test_error_codes() {
        let rank = RecommenderError::from(TrainingError::InvalidRank {
            requested: 5,
            max: 2,
        });
        assert_eq!(rank.error_code(), "INVALID_RANK");

        let schema = RecommenderError::from(DataError::Schema {
            missing: vec!["interaction".into()],
        });
        assert_eq!(schema.error_code(), "SCHEMA_ERROR");
        assert!(schema.to_string().contains("interaction"));
    }

    #[test]
    fn test_retriable_errors() {
        let missing = RecommenderError::from(DataError::NotFound {
            path: PathBuf::from("/nope.csv"),
        });
        assert!(missing.is_retriable());

        let empty = RecommenderError::from(DataError::Empty {
            source_name: "log.csv".into(),
        });
        assert!(!empty.is_retriable());
    }

    #[test]
    fn test_error_severity() {
        let corrupted = RecommenderError::from(SnapshotError::Corrupted("bad".into()));
        assert_eq!(corrupted.severity(), ErrorSeverity::Critical);

        let client = RecommenderError::from(QueryError::UnknownUser(7));
        assert_eq!(client.severity(), ErrorSeverity::Low);
    }
}
