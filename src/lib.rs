// alist-backup - backup and restore for AList admin data
// Snapshot export/import with optional field encryption

pub mod api;
pub mod backup_log;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod logging;
pub mod snapshot;

pub use api::{AListClient, AdminApi, ApiError};
pub use backup_log::{ConsoleLog, LogEntry, LogLevel, LogPhase, LogSink, MemoryLog};
pub use config::BackupConfig;
pub use coordinator::{BackupError, BackupRestoreCoordinator, RestoreMode, RestoreReport};
pub use snapshot::{FieldValue, Record, ResourceKind, Snapshot};
