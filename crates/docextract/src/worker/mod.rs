pub mod pool;
pub mod report;
pub mod runner;

pub use pool::{PoolSettings, WorkerPool};
pub use report::{AttemptReport, WorkerState};
pub use runner::Worker;
