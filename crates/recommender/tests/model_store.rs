//! ModelStore: публикация поколений, фоновое переобучение, snapshot'ы.

use recommender::{
    simulate_interactions, train, InteractionTable, ModelStore, QueryError, RecommenderError, SimulationConfig,
    SnapshotManager, TrainingConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn simulated_table(num_users: u64, num_items: u64, seed: u64) -> InteractionTable {
    let records = simulate_interactions(&SimulationConfig {
        num_users,
        num_items,
        num_interactions: (num_users * num_items) as usize,
        positive_rate: 0.3,
        seed,
    })
    .unwrap();
    InteractionTable::from_records(&records)
}

fn is_permutation(ranking: &[usize], len: usize) -> bool {
    let mut sorted = ranking.to_vec();
    sorted.sort_unstable();
    sorted == (0..len).collect::<Vec<_>>()
}

#[test]
fn empty_store_reports_not_trained() {
    let store = ModelStore::new();
    assert!(!store.is_ready());

    let err = store.recommend(0, None).unwrap_err();
    assert!(matches!(err, RecommenderError::Query(QueryError::ModelNotTrained)));
    assert_eq!(err.class().http_status(), 500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_see_whole_generations_during_retrain() {
    let config = TrainingConfig::with_components(3);
    let old = train(simulated_table(20, 12, 1), &config).unwrap();
    let old_items = old.num_items();
    let store = Arc::new(ModelStore::with_generation(old));

    let next_table = simulated_table(30, 25, 2);
    let stop = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        let stop = Arc::clone(&stop);
        readers.push(tokio::spawn(async move {
            let mut lengths = Vec::new();
            while !stop.load(Ordering::Relaxed) {
                let generation = store.current().unwrap();
                let ranking = generation.recommend(0, None).unwrap();
                assert!(is_permutation(&ranking, generation.num_items()));
                lengths.push(ranking.len());
                tokio::task::yield_now().await;
            }
            lengths
        }));
    }

    let published = store.retrain(next_table, config).await.unwrap();
    stop.store(true, Ordering::Relaxed);

    let new_items = published.num_items();
    for reader in readers {
        for len in reader.await.unwrap() {
            assert!(len == old_items || len == new_items, "torn read: {len} items");
        }
    }
    assert_eq!(store.current().unwrap().id(), published.id());
}

#[tokio::test]
async fn failed_retrain_keeps_previous_generation() {
    let store = Arc::new(ModelStore::new());
    let first = store
        .retrain(simulated_table(10, 8, 3), TrainingConfig::with_components(2))
        .await
        .unwrap();

    let err = store
        .retrain(InteractionTable::from_triples(&[]), TrainingConfig::with_components(2))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "DATA_EMPTY_ERROR");

    let err = store
        .retrain_from_path("/nonexistent/log.csv", TrainingConfig::with_components(2))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "DATA_LOAD_ERROR");

    assert_eq!(store.current().unwrap().id(), first.id());
    assert!(store.recommend(0, Some(3)).is_ok());
}

#[test]
fn publish_returns_replaced_generation() {
    let config = TrainingConfig::with_components(2);
    let store = ModelStore::new();
    assert!(store.publish(train(simulated_table(6, 5, 4), &config).unwrap()).is_none());

    let current_id = store.current().unwrap().id();
    let replaced = store.publish(train(simulated_table(6, 5, 5), &config).unwrap()).unwrap();
    assert_eq!(replaced.id(), current_id);
    assert_ne!(store.current().unwrap().id(), current_id);
}

#[test]
fn snapshot_restores_served_generation() {
    let temp = TempDir::new().unwrap();
    let manager = SnapshotManager::new(temp.path().join("snapshots")).unwrap();

    let store = ModelStore::new();
    let trained = store
        .retrain_blocking(simulated_table(15, 10, 6), &TrainingConfig::with_components(3))
        .unwrap();
    let path = manager.save(&trained).unwrap();

    let latest = manager.latest().unwrap().unwrap();
    assert_eq!(latest.path, path);
    assert_eq!(latest.metadata.generation_id, trained.id());

    let restored = ModelStore::with_generation(manager.load(&path).unwrap());
    let served = restored.current().unwrap();
    assert_eq!(served.id(), trained.id());
    assert_eq!(served.user_features(), trained.user_features());
    assert_eq!(served.item_features(), trained.item_features());
    for user in 0..trained.num_users() as i64 {
        assert_eq!(restored.recommend(user, None).unwrap(), store.recommend(user, None).unwrap());
    }

    let user_id = trained.matrix().user_ids()[0];
    assert_eq!(
        restored.recommend_for_user_id(user_id, Some(4)).unwrap(),
        store.recommend_for_user_id(user_id, Some(4)).unwrap()
    );
}

#[cfg(feature = "extended-tests")]
#[test]
fn retrain_on_large_simulated_log() {
    let store = ModelStore::new();
    let records = simulate_interactions(&SimulationConfig::default()).unwrap();
    let generation = store
        .retrain_blocking(InteractionTable::from_records(&records), &TrainingConfig::default())
        .unwrap();
    assert!(generation.num_users() > 900);
    assert!(generation.reconstruction_error().is_finite());
    assert_eq!(store.recommend(0, Some(10)).unwrap().len(), 10);
}
