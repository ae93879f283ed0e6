pub mod pipeline;
pub mod scheduler;
pub mod staging;
pub mod storage;
pub mod transform;
pub mod watcher;
