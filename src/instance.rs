mod handle;
mod types;

pub use handle::InstanceHandle;
pub use types::{BackendToken, LifecycleState, ProcessHandle, ServerInstance, ServerName};
