//! Model backup: versioned JSON snapshots of a generation.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::errors::{RecommenderError, RecommenderResult, SnapshotError};
use crate::generation::{Generation, ModelMetadata};
use crate::matrix::InteractionMatrix;
use crate::table::REQUIRED_COLUMNS;

/// Версия формата snapshot для совместимости
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

const SNAPSHOT_EXTENSION: &str = "json";
const SNAPSHOT_PREFIX: &str = "snapshot_";

/// Row-major dense matrix as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseBlock {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl DenseBlock {
    pub fn from_array(array: &Array2<f64>) -> Self {
        Self {
            rows: array.nrows(),
            cols: array.ncols(),
            data: array.iter().copied().collect(),
        }
    }

    pub fn to_array(&self) -> Result<Array2<f64>, SnapshotError> {
        Array2::from_shape_vec((self.rows, self.cols), self.data.clone()).map_err(|e| {
            SnapshotError::Corrupted(format!("{}x{} block: {}", self.rows, self.cols, e))
        })
    }
}

/// Matrices of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub user_ids: Vec<u64>,
    pub item_ids: Vec<u64>,
    pub interactions: DenseBlock,
    pub user_features: DenseBlock,
    pub item_features: DenseBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub format_version: u32,
    pub recsys_version: String,
    /// SHA256 по метаданным и payload
    pub checksum: String,
    pub metadata: ModelMetadata,
    pub payload: SnapshotPayload,
}

impl ModelSnapshot {
    pub fn from_generation(generation: &Generation) -> RecommenderResult<Self> {
        let matrix = generation.matrix();
        let payload = SnapshotPayload {
            user_ids: matrix.user_ids().to_vec(),
            item_ids: matrix.item_ids().to_vec(),
            interactions: DenseBlock::from_array(matrix.values()),
            user_features: DenseBlock::from_array(generation.user_features()),
            item_features: DenseBlock::from_array(generation.item_features()),
        };
        let metadata = generation.metadata().clone();
        let checksum = compute_checksum(&metadata, &payload)?;
        Ok(Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            recsys_version: env!("CARGO_PKG_VERSION").to_string(),
            checksum,
            metadata,
            payload,
        })
    }

    /// Check version, checksum and shapes.
    pub fn verify(&self) -> Result<(), SnapshotError> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: self.format_version,
                supported: SNAPSHOT_FORMAT_VERSION,
            });
        }

        let actual = compute_checksum(&self.metadata, &self.payload)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        if actual != self.checksum {
            return Err(SnapshotError::ChecksumMismatch {
                expected: self.checksum.clone(),
                actual,
            });
        }

        let p = &self.payload;
        let users = p.user_ids.len();
        let items = p.item_ids.len();
        let k = self.metadata.n_components;
        let expected = [
            ("interactions", &p.interactions, (users, items)),
            ("user_features", &p.user_features, (users, k)),
            ("item_features", &p.item_features, (k, items)),
        ];
        for (name, block, (rows, cols)) in expected {
            if block.rows != rows || block.cols != cols || block.data.len() != rows * cols {
                return Err(SnapshotError::Corrupted(format!(
                    "{name} is {}x{} with {} values, expected {rows}x{cols}",
                    block.rows,
                    block.cols,
                    block.data.len()
                )));
            }
        }
        Ok(())
    }

    pub fn into_generation(self) -> RecommenderResult<Generation> {
        self.verify()?;
        let matrix = InteractionMatrix::from_parts(
            self.payload.user_ids,
            self.payload.item_ids,
            self.payload.interactions.to_array()?,
        )
        .map_err(|e| SnapshotError::Corrupted(e.to_string()))?;
        let user_features = self.payload.user_features.to_array()?;
        let item_features = self.payload.item_features.to_array()?;
        Ok(Generation::from_parts(
            self.metadata,
            matrix,
            user_features,
            item_features,
        ))
    }
}

fn compute_checksum(metadata: &ModelMetadata, payload: &SnapshotPayload) -> RecommenderResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(metadata).map_err(serialization)?);
    hasher.update(serde_json::to_vec(payload).map_err(serialization)?);
    Ok(format!("{:x}", hasher.finalize()))
}

fn serialization(e: serde_json::Error) -> RecommenderError {
    SnapshotError::Serialization(e.to_string()).into()
}

/// Только заголовок snapshot, без матриц
#[derive(Debug, Deserialize)]
struct SnapshotHeader {
    format_version: u32,
    metadata: ModelMetadata,
}

/// Информация о snapshot файле
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub format_version: u32,
    pub metadata: ModelMetadata,
    pub size_bytes: u64,
}

/// Менеджер snapshot'ов модели
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    base_path: PathBuf,
}

impl SnapshotManager {
    pub fn new(base_path: impl AsRef<Path>) -> RecommenderResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();

        // Создаём директорию если не существует
        if !base_path.exists() {
            fs::create_dir_all(&base_path)?;
        }

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Сохранить generation. Файл появляется целиком или не появляется.
    pub fn save(&self, generation: &Generation) -> RecommenderResult<PathBuf> {
        let snapshot = ModelSnapshot::from_generation(generation)?;
        let timestamp = snapshot.metadata.created_at.format("%Y%m%d_%H%M%S");
        let id = snapshot.metadata.generation_id.simple().to_string();
        let file_name = format!("{SNAPSHOT_PREFIX}{timestamp}_{}.{SNAPSHOT_EXTENSION}", &id[..8]);
        let path = self.base_path.join(file_name);

        let tmp = NamedTempFile::new_in(&self.base_path)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, &snapshot).map_err(serialization)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| RecommenderError::Io(e.error))?;

        info!(
            path = %path.display(),
            generation = %snapshot.metadata.generation_id,
            checksum = &snapshot.checksum[..16],
            "Model snapshot saved"
        );
        Ok(path)
    }

    /// Прочитать snapshot без проверки
    pub fn read(&self, path: impl AsRef<Path>) -> RecommenderResult<ModelSnapshot> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RecommenderError::from(SnapshotError::NotFound {
                path: path.to_path_buf(),
            }),
            _ => RecommenderError::Io(e),
        })?;
        let snapshot: ModelSnapshot = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| SnapshotError::Corrupted(format!("{}: {}", path.display(), e)))?;
        Ok(snapshot)
    }

    /// Load, verify and rebuild the generation stored at `path`.
    pub fn load(&self, path: impl AsRef<Path>) -> RecommenderResult<Generation> {
        let path = path.as_ref();
        let generation = self.read(path)?.into_generation()?;
        info!(
            path = %path.display(),
            generation = %generation.id(),
            "Model snapshot loaded"
        );
        Ok(generation)
    }

    /// Newest first.
    pub fn list(&self) -> RecommenderResult<Vec<SnapshotInfo>> {
        let mut snapshots = Vec::new();

        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let path = entry.path();
            if !is_snapshot_file(&path) {
                continue;
            }

            match read_header(&path) {
                Ok(header) => snapshots.push(SnapshotInfo {
                    size_bytes: entry.metadata()?.len(),
                    path,
                    format_version: header.format_version,
                    metadata: header.metadata,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot"),
            }
        }

        snapshots.sort_by(|a, b| {
            b.metadata
                .created_at
                .cmp(&a.metadata.created_at)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(snapshots)
    }

    pub fn latest(&self) -> RecommenderResult<Option<SnapshotInfo>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Удалить старые snapshot'ы, оставив `keep` самых новых
    pub fn cleanup(&self, keep: usize) -> RecommenderResult<usize> {
        let mut deleted = 0;
        for info in self.list()?.into_iter().skip(keep) {
            fs::remove_file(&info.path)?;
            deleted += 1;
            info!(path = %info.path.display(), "Deleted old snapshot");
        }
        Ok(deleted)
    }

    /// Interaction matrix as `user_id,item_id,interaction`: every non-zero cell,
    /// plus one explicit `0` for each user or item without any, so that loading
    /// the file back yields the same ids and shape. Returns the number of rows written.
    pub fn export_matrix_csv(&self, generation: &Generation, path: impl AsRef<Path>) -> RecommenderResult<usize> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
        writer.write_record(REQUIRED_COLUMNS).map_err(csv_error)?;

        let matrix = generation.matrix();
        let values = matrix.values();
        let mut item_covered = vec![false; matrix.num_items()];
        let mut cells: Vec<(usize, usize, f64)> = Vec::new();

        for (row, user_row) in values.outer_iter().enumerate() {
            let before = cells.len();
            for (col, value) in user_row.iter().enumerate() {
                if *value != 0.0 {
                    cells.push((row, col, *value));
                    item_covered[col] = true;
                }
            }
            if cells.len() == before && !item_covered.is_empty() {
                cells.push((row, 0, 0.0));
                item_covered[0] = true;
            }
        }
        if matrix.num_users() > 0 {
            for (col, covered) in item_covered.iter().enumerate() {
                if !covered {
                    cells.push((0, col, 0.0));
                }
            }
        }

        let mut written = 0;
        for (row, col, value) in cells {
            let (Some(user_id), Some(item_id)) = (matrix.user_id(row), matrix.item_id(col)) else {
                continue;
            };
            writer
                .write_record([user_id.to_string(), item_id.to_string(), value.to_string()])
                .map_err(csv_error)?;
            written += 1;
        }
        writer.flush()?;

        debug!(path = %path.display(), cells = written, "Exported interaction matrix");
        Ok(written)
    }
}

fn is_snapshot_file(path: &Path) -> bool {
    let has_ext = path.extension().and_then(|s| s.to_str()) == Some(SNAPSHOT_EXTENSION);
    let has_prefix = path
        .file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|name| name.starts_with(SNAPSHOT_PREFIX));
    has_ext && has_prefix
}

fn read_header(path: &Path) -> RecommenderResult<SnapshotHeader> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| SnapshotError::Corrupted(format!("{}: {}", path.display(), e)).into())
}

fn csv_error(e: csv::Error) -> RecommenderError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => RecommenderError::Io(io),
        other => RecommenderError::Internal(format!("csv export failed: {:?}", other)),
    }
}

/// Куда публикуются snapshot'ы модели (локальный диск, object storage, ...)
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    fn name(&self) -> &str;

    /// Store the generation, returning where it went.
    async fn store(&self, generation: &Generation) -> RecommenderResult<String>;

    async fn fetch_latest(&self) -> RecommenderResult<Option<Generation>>;
}

#[async_trait]
impl SnapshotSink for SnapshotManager {
    fn name(&self) -> &str {
        "local"
    }

    async fn store(&self, generation: &Generation) -> RecommenderResult<String> {
        let path = self.save(generation)?;
        Ok(path.display().to_string())
    }

    async fn fetch_latest(&self) -> RecommenderResult<Option<Generation>> {
        match self.latest()? {
            Some(info) => Ok(Some(self.load(&info.path)?)),
            None => Ok(None),
        }
    }
}

/// Timestamp used when a caller needs a snapshot-style name for exports.
pub fn export_file_name(prefix: &str) -> String {
    format!("{prefix}_{}.csv", Utc::now().format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Aggregation;
    use crate::pipeline::{train, TrainingConfig};
    use crate::table::InteractionTable;
    use tempfile::TempDir;

    fn generation() -> Generation {
        let table = InteractionTable::from_triples(&[
            (3, 30, 1.0),
            (3, 40, 0.0),
            (5, 30, 0.0),
            (5, 40, 1.0),
            (7, 40, 2.0),
        ]);
        train(table, &TrainingConfig::with_components(1)).unwrap()
    }

    #[test]
    fn test_manager_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        let manager = SnapshotManager::new(&nested).unwrap();
        assert!(nested.exists());
        assert!(manager.list().unwrap().is_empty());
        assert!(manager.latest().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path()).unwrap();
        let original = generation();

        let path = manager.save(&original).unwrap();
        assert!(path.exists());

        let restored = manager.load(&path).unwrap();
        assert_eq!(restored.id(), original.id());
        assert_eq!(restored.matrix().user_ids(), original.matrix().user_ids());
        assert_eq!(restored.user_features().dim(), original.user_features().dim());
        for (a, b) in restored.item_features().iter().zip(original.item_features().iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert_eq!(
            restored.recommend_for_user_id(7, None).unwrap(),
            original.recommend_for_user_id(7, None).unwrap()
        );
    }

    #[test]
    fn test_tampered_snapshot_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path()).unwrap();
        let path = manager.save(&generation()).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value["payload"]["user_features"]["data"][0] = serde_json::json!(123.0);
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        let err = manager.load(&path).unwrap_err();
        assert!(matches!(
            err,
            RecommenderError::Snapshot(SnapshotError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path()).unwrap();
        let path = manager.save(&generation()).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value["format_version"] = serde_json::json!(SNAPSHOT_FORMAT_VERSION + 1);
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        let err = manager.load(&path).unwrap_err();
        assert!(matches!(
            err,
            RecommenderError::Snapshot(SnapshotError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_missing_and_garbage_files() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path()).unwrap();

        let err = manager.load(temp_dir.path().join("snapshot_missing.json")).unwrap_err();
        assert!(matches!(err, RecommenderError::Snapshot(SnapshotError::NotFound { .. })));

        let garbage = temp_dir.path().join("snapshot_garbage.json");
        fs::write(&garbage, "{ not json").unwrap();
        assert!(matches!(
            manager.load(&garbage).unwrap_err(),
            RecommenderError::Snapshot(SnapshotError::Corrupted(_))
        ));
        // Unreadable files are skipped by list()
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_latest_and_cleanup() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path()).unwrap();

        let mut ids = Vec::new();
        for _ in 0..4 {
            let generation = generation();
            ids.push(generation.id());
            manager.save(&generation).unwrap();
        }
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 4);
        assert_eq!(manager.latest().unwrap().unwrap().metadata.generation_id, ids[3]);

        assert_eq!(manager.cleanup(2).unwrap(), 2);
        let remaining: Vec<_> = manager
            .list()
            .unwrap()
            .into_iter()
            .map(|info| info.metadata.generation_id)
            .collect();
        assert_eq!(remaining, vec![ids[3], ids[2]]);
        assert_eq!(manager.cleanup(5).unwrap(), 0);
    }

    #[test]
    fn test_export_matrix_csv() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path()).unwrap();
        let out = temp_dir.path().join("matrix.csv");

        let written = manager.export_matrix_csv(&generation(), &out).unwrap();
        assert_eq!(written, 3);

        let text = fs::read_to_string(&out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("user_id,item_id,interaction"));
        assert!(text.contains("7,40,2"));
    }

    #[test]
    fn test_export_keeps_all_zero_users_and_items() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path()).unwrap();
        let out = temp_dir.path().join("matrix.csv");

        // user 2 и item 20 видели только нулевые взаимодействия
        let table = InteractionTable::from_triples(&[(1, 10, 1.0), (2, 10, 0.0), (1, 20, 0.0)]);
        let generation = train(table, &TrainingConfig::with_components(1)).unwrap();

        let written = manager.export_matrix_csv(&generation, &out).unwrap();
        assert_eq!(written, 3);

        let reloaded = crate::loader::load_table(&out).unwrap();
        let matrix = InteractionMatrix::build(&reloaded, Aggregation::Last).unwrap();
        assert_eq!(matrix.shape(), (2, 2));
        assert_eq!(matrix.user_ids(), generation.matrix().user_ids());
        assert_eq!(matrix.item_ids(), generation.matrix().item_ids());
        assert_eq!(matrix.values(), generation.matrix().values());
    }

    #[tokio::test]
    async fn test_local_sink() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SnapshotManager::new(temp_dir.path()).unwrap();
        let sink: &dyn SnapshotSink = &manager;

        assert!(sink.fetch_latest().await.unwrap().is_none());
        let generation = generation();
        let location = sink.store(&generation).await.unwrap();
        assert!(location.ends_with(".json"));
        assert_eq!(sink.fetch_latest().await.unwrap().unwrap().id(), generation.id());
        assert_eq!(sink.name(), "local");
    }
}
