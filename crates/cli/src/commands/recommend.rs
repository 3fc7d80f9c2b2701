use anyhow::Result;
use clap::Args;
use recommender::{
    error_reply, respond, Generation, ModelStore, QueryError, RecommendRequest, RecommenderConfig,
    RecommenderError, SnapshotManager,
};
use std::path::PathBuf;

/// Рекомендации для пользователя из последнего (или заданного) snapshot'а
#[derive(Debug, Args)]
pub struct RecommendCommand {
    /// Индекс пользователя (строка матрицы)
    #[arg(allow_negative_numbers = true, conflicts_with_all = ["user_id", "request"])]
    user_index: Option<i64>,

    /// Исходный user_id из лога вместо индекса
    #[arg(long, conflicts_with = "request")]
    user_id: Option<u64>,

    /// JSON тело запроса, например '{"user_id": 3}'
    #[arg(long)]
    request: Option<String>,

    /// Сколько позиций вернуть (по умолчанию полный рейтинг)
    #[arg(short = 'n', long)]
    top_n: Option<usize>,

    /// Путь к snapshot'у (по умолчанию последний)
    #[arg(short, long)]
    snapshot: Option<PathBuf>,
}

impl RecommendCommand {
    pub async fn execute(self, config: RecommenderConfig) -> Result<()> {
        let store = ModelStore::new();
        if let Some(generation) = load_generation(&config, self.snapshot.as_deref())? {
            store.publish(generation);
        }
        let top_n = self.top_n.or(config.default_top_n);

        if let Some(user_id) = self.user_id {
            return match store.recommend_for_user_id(user_id, top_n) {
                Ok(items) => {
                    println!(
                        "{}",
                        serde_json::json!({ "user_id": user_id, "recommendations": items })
                    );
                    Ok(())
                }
                Err(e) => fail(e),
            };
        }

        let (user_index, top_n) = match (self.request, self.user_index) {
            (Some(body), _) => {
                let request = match RecommendRequest::from_slice(body.as_bytes()) {
                    Ok(request) => request,
                    Err(e) => return fail(e.into()),
                };
                (request.user_id, request.top_n.or(top_n))
            }
            (None, Some(index)) => (index, top_n),
            (None, None) => {
                return fail(
                    QueryError::InvalidRequest("provide a user index, --user-id or --request".to_string()).into(),
                )
            }
        };

        match store.recommend(user_index, top_n) {
            Ok(items) => {
                println!("{}", respond(user_index, Ok(items)).body);
                Ok(())
            }
            Err(e) => fail(e),
        }
    }
}

fn load_generation(config: &RecommenderConfig, snapshot: Option<&std::path::Path>) -> Result<Option<Generation>> {
    let manager = SnapshotManager::new(&config.snapshot_dir)?;
    let generation = match snapshot {
        Some(path) => Some(manager.load(path)?),
        None => match manager.latest()? {
            Some(info) => Some(manager.load(&info.path)?),
            None => None,
        },
    };
    Ok(generation)
}

fn fail(e: RecommenderError) -> Result<()> {
    println!("{}", error_reply(&e).body);
    Err(e.into())
}
