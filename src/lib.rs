/*!
 # bedguard

 Lifecycle, console, backup and update engine for Minecraft Bedrock Dedicated Server.

 ## Overview

 bedguard provides:
 - Start, stop and restart with bounded waits and a per-server lock
 - Fire-and-forget console commands (`screen`/systemd on Linux, a named pipe on Windows)
 - Process status with delta-based CPU readings
 - World and config backups in three independently pruned pools, and restore
 - Version updates that stop, back up, download, extract, record and restart

 ## Basic Usage

 ```no_run
 use bedguard::{BedrockManager, ManagerSettings};

 #[tokio::main]
 async fn main() {
     let manager = BedrockManager::builder(ManagerSettings::default()).build();

     let result = manager.start("Alpha").await;
     println!("{}", result.message);

     let result = manager.send_command("Alpha", "say hello").await;
     assert!(result.success);

     let status = manager.probe_status("Alpha").await;
     println!("{:?}", status.status);
 }
 ```

 Every manager operation returns an [`OperationResult`]; failures carry an
 [`ErrorKind`] rather than surfacing as `Err`.
*/

pub mod archive;
pub mod backend;
pub mod backup;
pub mod channel;
pub mod config;
pub mod error;
pub mod instance;
pub mod probe;
pub mod server;
pub mod update;
pub mod utils;

pub use backend::{ProcessBackend, StopStrategy};
pub use backup::{BackupEngine, BackupKind, BackupRecord};
pub use config::{ManagerSettings, ServerConfig, TargetVersion};
pub use error::{Error, ErrorKind, Result};
pub use instance::{LifecycleState, ProcessHandle, ServerName};
pub use probe::{ProcessStatus, StatusProbe};
pub use server::{BedrockManager, LifecycleOutcome, ManagerBuilder, OperationResult, Supervisor};
pub use update::{UpdateOrchestrator, UpdateOutcome};
