//! End-to-end: CSV log → matrix → NMF → ranking.
//!
//! Покрывает:
//! - identity сценарий (k=1, пользователь 0 предпочитает item 0)
//! - ошибки входных данных (пустой лог, нет колонки interaction)
//! - детерминизм обучения
//! - границы индекса пользователя

use recommender::{
    load_table_from_reader, recommend, train, train_from_path, validate_schema, Aggregation, DataError,
    InteractionTable, NmfInit, QueryError, RankPolicy, RecommenderError, TrainingConfig, TrainingError,
    ValidationError, INTERACTION,
};
use std::fs;
use tempfile::TempDir;

fn identity_table() -> InteractionTable {
    InteractionTable::from_triples(&[(0, 0, 1.0), (0, 1, 0.0), (1, 0, 0.0), (1, 1, 1.0)])
}

#[test]
fn identity_log_ranks_own_item_first() {
    let generation = train(identity_table(), &TrainingConfig::with_components(1)).unwrap();

    let matrix = generation.matrix();
    assert_eq!(matrix.shape(), (2, 2));
    assert_eq!(matrix.get(0, 0), Some(1.0));
    assert_eq!(matrix.get(0, 1), Some(0.0));
    assert_eq!(matrix.get(1, 1), Some(1.0));

    assert_eq!(generation.user_features().dim(), (2, 1));
    assert_eq!(generation.item_features().dim(), (1, 2));
    assert!(generation.user_features().iter().all(|v| *v >= 0.0));
    assert!(generation.item_features().iter().all(|v| *v >= 0.0));

    let ranking = recommend(generation.user_features(), generation.item_features(), 0).unwrap();
    assert_eq!(ranking, vec![0, 1]);
    // A rank-1 fit of the identity keeps one unit of residual.
    assert!((generation.reconstruction_error() - 1.0).abs() < 1e-3);
}

#[test]
fn csv_file_round_trip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("behavior_data.csv");
    fs::write(
        &path,
        "user_id,item_id,interaction,timestamp\n0,0,1,100\n0,1,0,101\n1,0,0,102\n1,1,1,103\n",
    )
    .unwrap();

    let generation = train_from_path(&path, &TrainingConfig::with_components(1)).unwrap();
    assert_eq!(generation.recommend(0, None).unwrap(), vec![0, 1]);
    assert_eq!(generation.recommend(1, Some(1)).unwrap().len(), 1);

    // Source file is left untouched
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("user_id,item_id,interaction"));
}

#[test]
fn missing_interaction_column_is_validation_error() {
    let table = identity_table().without_column(INTERACTION);
    let err = train(table, &TrainingConfig::with_components(1)).unwrap_err();
    assert!(matches!(
        err,
        RecommenderError::Validation(ValidationError::MissingColumn(ref column)) if column == INTERACTION
    ));

    // The loader-level validator reports the same gap as a schema error
    let table = load_table_from_reader("user_id,item_id\n1,2\n".as_bytes(), "inline").unwrap();
    assert!(matches!(validate_schema(&table), Err(DataError::Schema { .. })));
    let err = train(table, &TrainingConfig::with_components(1)).unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
}

#[test]
fn empty_log_is_data_empty() {
    let err = train(InteractionTable::from_triples(&[]), &TrainingConfig::default()).unwrap_err();
    assert_eq!(err.error_code(), "DATA_EMPTY_ERROR");

    let temp = TempDir::new().unwrap();
    let path = temp.path().join("empty.csv");
    fs::write(&path, "user_id,item_id,interaction\n").unwrap();
    let err = train_from_path(&path, &TrainingConfig::default()).unwrap_err();
    assert!(matches!(err, RecommenderError::Data(DataError::Empty { .. })));
}

#[test]
fn missing_file_is_retriable_load_error() {
    use recommender::IsRetriable;

    let err = train_from_path("/nonexistent/behavior_data.csv", &TrainingConfig::default()).unwrap_err();
    assert_eq!(err.error_code(), "DATA_LOAD_ERROR");
    assert!(err.is_retriable());
}

#[test]
fn training_is_deterministic() {
    let table = InteractionTable::from_triples(&[
        (1, 10, 1.0),
        (1, 11, 0.0),
        (2, 10, 1.0),
        (2, 12, 1.0),
        (3, 11, 1.0),
        (3, 12, 0.0),
        (4, 10, 1.0),
        (4, 11, 1.0),
    ]);

    for init in [NmfInit::Nndsvda, NmfInit::Random] {
        let mut config = TrainingConfig::with_components(2);
        config.nmf.init = init;

        let a = train(table.clone(), &config).unwrap();
        let b = train(table.clone(), &config).unwrap();
        assert_eq!(a.user_features(), b.user_features(), "{init} init differs");
        assert_eq!(a.item_features(), b.item_features(), "{init} init differs");
        assert_eq!(a.reconstruction_error(), b.reconstruction_error());
        assert_ne!(a.id(), b.id());
    }
}

#[test]
fn user_index_bounds() {
    let generation = train(identity_table(), &TrainingConfig::with_components(1)).unwrap();
    let num_users = generation.num_users() as i64;

    for bad in [num_users, -1] {
        let err = generation.recommend(bad, None).unwrap_err();
        assert!(matches!(
            err,
            RecommenderError::Query(QueryError::UserOutOfRange { index, num_users: 2 }) if index == bad
        ));
        assert_eq!(err.class().http_status(), 404);
    }
}

#[test]
fn rank_policies() {
    let strict = TrainingConfig::with_components(5);
    let err = train(identity_table(), &strict).unwrap_err();
    assert!(matches!(
        err,
        RecommenderError::Training(TrainingError::InvalidRank { requested: 5, max: 2 })
    ));

    let mut clamp = TrainingConfig::with_components(5);
    clamp.nmf.rank_policy = RankPolicy::Clamp;
    let generation = train(identity_table(), &clamp).unwrap();
    assert_eq!(generation.metadata().n_components, 2);
    assert!(generation.reconstruction_error() < 1e-3);

    let mut zero = TrainingConfig::with_components(0);
    zero.nmf.rank_policy = RankPolicy::Clamp;
    assert_eq!(train(identity_table(), &zero).unwrap_err().error_code(), "INVALID_RANK");
}

#[test]
fn duplicate_pairs_follow_aggregation() {
    let table = InteractionTable::from_triples(&[(0, 0, 1.0), (0, 0, 3.0), (1, 1, 1.0), (0, 1, 0.0)]);

    let last = train(table.clone(), &TrainingConfig::with_components(1)).unwrap();
    assert_eq!(last.matrix().get(0, 0), Some(3.0));

    let mut config = TrainingConfig::with_components(1);
    config.aggregation = Aggregation::Sum;
    let summed = train(table, &config).unwrap();
    assert_eq!(summed.matrix().get(0, 0), Some(4.0));
}
