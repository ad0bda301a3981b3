//! Admin API abstraction
//!
//! The backup coordinator talks to the server only through [`AdminApi`], so the
//! same export/import procedure runs against the HTTP client in production and
//! an in-memory server in tests.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │   BackupRestoreCoordinator   │
//! └──────────────────────────────┘
//!                │  AdminApi
//!        ┌───────┴────────┐
//!        ▼                ▼
//!  ┌────────────┐   ┌────────────┐
//!  │ AListClient│   │ MemoryAdmin│ (tests)
//!  └────────────┘   └────────────┘
//! ```

pub mod alist;
pub mod http_retry;
pub mod types;

#[cfg(test)]
pub(crate) mod memory;

pub use alist::AListClient;
pub use types::*;

use async_trait::async_trait;

use crate::snapshot::{Record, ResourceKind};

/// Resource endpoints the backup workflow depends on.
///
/// Endpoint paths come from the [`ResourceKind`] table; implementations must
/// not special-case kinds beyond what the table describes.
#[async_trait]
pub trait AdminApi: Send + Sync {
    /// Full live collection for a kind
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Record>, ApiError>;

    /// Create one record
    async fn create(&self, kind: ResourceKind, record: &Record) -> Result<(), ApiError>;

    /// Update one record (the server matches it by id)
    async fn update(&self, kind: ResourceKind, record: &Record) -> Result<(), ApiError>;

    /// Save a batch of settings by key
    async fn save_settings(&self, settings: &[Record]) -> Result<(), ApiError>;

    /// Bulk restore of label-file bindings
    async fn restore_bindings(&self, request: &BindingRestoreRequest) -> Result<(), ApiError>;
}
