mod config;
mod errors;
mod generation;
pub mod loader;
pub mod matrix;
pub mod nmf;
mod pipeline;
pub mod ranking;
mod response;
pub mod simulate;
mod snapshot;
mod store;
pub mod table;

// Ошибки
pub use errors::{
    ConfigError, DataError, ErrorClass, ErrorSeverity, IsRetriable, QueryError, RecommenderError,
    RecommenderResult, SnapshotError, TrainingError, ValidationError,
};

// Данные и матрица взаимодействий
pub use loader::{load_table, load_table_from_reader, validate_schema};
pub use matrix::{Aggregation, InteractionMatrix};
pub use table::{InteractionRecord, InteractionTable, INTERACTION, ITEM_ID, REQUIRED_COLUMNS, USER_ID};

// Обучение и обслуживание модели
pub use config::{default_snapshot_dir, RecommenderConfig};
pub use generation::{Generation, ModelMetadata};
pub use nmf::{Factorization, Nmf, NmfConfig, NmfInit, RankPolicy};
pub use pipeline::{train, train_from_path, TrainingConfig, TrainingCycle, TrainingStage};
pub use ranking::{recommend, recommend_top_n, ScoredItem};
pub use store::ModelStore;

// Backup и интерфейс для внешнего слоя
pub use response::{error_reply, respond, ErrorResponse, RecommendRequest, RecommendationResponse, Reply};
pub use simulate::{simulate_interactions, write_csv, SimulationConfig};
pub use snapshot::{
    export_file_name, DenseBlock, ModelSnapshot, SnapshotInfo, SnapshotManager, SnapshotPayload, SnapshotSink,
    SNAPSHOT_FORMAT_VERSION,
};
