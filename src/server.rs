mod domain;
mod supervisor;

pub use domain::{BedrockManager, ManagerBuilder, OperationResult};
pub use supervisor::{LifecycleOutcome, ServerGuard, Supervisor};
