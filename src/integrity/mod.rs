pub mod classifier;
pub mod engine;
pub mod fingerprint;
pub mod scheduler;
pub mod summary;

pub use engine::{CancellationFlag, EngineConfig, ReconciliationEngine};
pub use scheduler::ReconciliationScheduler;
