pub mod recommend;
pub mod simulate;
pub mod snapshots;
pub mod train;

pub use recommend::RecommendCommand;
pub use simulate::SimulateCommand;
pub use snapshots::SnapshotsCommand;
pub use train::TrainCommand;
