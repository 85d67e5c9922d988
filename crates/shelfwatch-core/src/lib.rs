pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod exclusion;
pub mod hasher;
pub mod jobs;
pub mod progress;
pub mod queue;
pub mod scanner;
pub mod storage;

pub use config::AppConfig;
pub use engine::{ScanEngine, ScanHandle};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
pub use queue::TaskType;
pub use storage::Database;
