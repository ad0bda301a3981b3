//! Backup and restore coordinator
//!
//! Export lists every resource kind in table order into a [`Snapshot`],
//! optionally encrypting each field. Import verifies the passphrase, decrypts,
//! and reconciles the snapshot into the live server in one of two modes:
//!
//! - **Override**: self-backup first, then upsert each kind by natural key.
//! - **Additive**: create every record as new, ignoring collisions.
//!
//! Per-item failures become operator log entries and never stop the run. A
//! wrong passphrase, a corrupt encrypted field or a failed pre-restore save
//! aborts, always before the first write.

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{AdminApi, BindingRestoreRequest};
use crate::backup_log::{LogEntry, LogLevel, LogPhase, LogSink};
use crate::crypto::{self, CryptoError};
use crate::snapshot::{
    is_protected_setting, normalize_binding, Record, ResourceKind, Snapshot, SnapshotFileError,
};

/// Kinds restored one record at a time, in restore order
const RECORD_KINDS: [ResourceKind; 4] = [
    ResourceKind::Users,
    ResourceKind::Storages,
    ResourceKind::Metas,
    ResourceKind::Labels,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestoreMode {
    /// Insert every record as new
    #[default]
    Additive,
    /// Back up, then update-or-create by natural key
    Override,
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Wrong encryption password")]
    WrongPassword,

    #[error("Encrypted field {field} in {kind} could not be decrypted: {source}")]
    CorruptField {
        kind: ResourceKind,
        field: String,
        #[source]
        source: CryptoError,
    },

    #[error("Encryption failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid snapshot document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("Could not save the pre-restore backup: {0}")]
    PreRestoreBackup(#[source] SnapshotFileError),
}

/// Outcome of an import
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Self-backup taken before an override restore
    pub pre_restore_backup: Option<Snapshot>,
    pub restored: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl RestoreReport {
    /// Process exit status for a finished restore: 2 when any item failed
    pub fn exit_status(&self) -> u8 {
        if self.failed > 0 {
            2
        } else {
            0
        }
    }
}

/// Persists the self-backup of an override restore before anything is written
pub type PreRestoreWriter = Box<dyn Fn(&Snapshot) -> Result<(), SnapshotFileError> + Send + Sync>;

pub struct BackupRestoreCoordinator {
    api: Arc<dyn AdminApi>,
    log: Arc<dyn LogSink>,
    pre_restore_writer: Option<PreRestoreWriter>,
}

impl BackupRestoreCoordinator {
    pub fn new(api: Arc<dyn AdminApi>, log: Arc<dyn LogSink>) -> Self {
        Self {
            api,
            log,
            pre_restore_writer: None,
        }
    }

    /// Save the override self-backup through `writer`; a failed save aborts the restore
    pub fn with_pre_restore_writer(
        mut self,
        writer: impl Fn(&Snapshot) -> Result<(), SnapshotFileError> + Send + Sync + 'static,
    ) -> Self {
        self.pre_restore_writer = Some(Box::new(writer));
        self
    }

    fn emit(&self, phase: LogPhase, level: LogLevel, message: impl Into<String>) {
        self.log.append(LogEntry::new(level, phase, message));
    }

    // ============ Export ============

    /// Snapshot every resource kind. A kind whose list call fails is logged and
    /// left empty; the export itself only fails if encryption does.
    pub async fn export(&self, passphrase: &str) -> Result<Snapshot, BackupError> {
        let phase = LogPhase::Backup;
        self.emit(phase, LogLevel::Info, "Start backup");

        let mut snapshot = Snapshot {
            encrypted: crypto::make_marker(passphrase)?,
            ..Default::default()
        };

        for kind in ResourceKind::ALL {
            match self.api.list(kind).await {
                Ok(mut records) => {
                    if !passphrase.is_empty() {
                        for record in records.iter_mut() {
                            for (_, value) in record.fields_mut() {
                                *value = crypto::encrypt_value(value, passphrase)?;
                            }
                        }
                    }
                    self.emit(phase, LogLevel::Success, format!("Backed up {kind}"));
                    snapshot.set_collection(kind, records);
                }
                Err(e) => {
                    warn!("Backup of {} failed: {}", kind, e);
                    self.emit(phase, LogLevel::Error, format!("Failed to back up {kind}: {e}"));
                }
            }
        }

        info!(
            "Backup finished: {} records, encrypted={}",
            snapshot.record_count(),
            snapshot.is_encrypted()
        );
        self.emit(phase, LogLevel::Info, "Finish backup");
        Ok(snapshot)
    }

    // ============ Import ============

    /// Parse a snapshot document and import it
    pub async fn import_document(
        &self,
        document: &str,
        passphrase: &str,
        mode: RestoreMode,
    ) -> Result<RestoreReport, BackupError> {
        let snapshot = Snapshot::from_json(document)?;
        self.import(snapshot, passphrase, mode).await
    }

    pub async fn import(
        &self,
        snapshot: Snapshot,
        passphrase: &str,
        mode: RestoreMode,
    ) -> Result<RestoreReport, BackupError> {
        let phase = LogPhase::Restore;
        self.emit(phase, LogLevel::Info, "Start restore");

        let snapshot = match self.unlock(snapshot, passphrase) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.emit(phase, LogLevel::Error, e.to_string());
                return Err(e);
            }
        };

        let mut report = RestoreReport::default();
        if mode == RestoreMode::Override {
            let pre = self.export(passphrase).await?;
            if let Some(writer) = &self.pre_restore_writer {
                if let Err(e) = writer(&pre) {
                    let err = BackupError::PreRestoreBackup(e);
                    self.emit(phase, LogLevel::Error, err.to_string());
                    return Err(err);
                }
            }
            report.pre_restore_backup = Some(pre);
        }

        if let Some(settings) = snapshot.settings.as_ref() {
            self.restore_settings(settings, &mut report).await;
        }

        match mode {
            RestoreMode::Override => {
                for kind in RECORD_KINDS {
                    self.upsert_kind(kind, snapshot.collection(kind), &mut report)
                        .await;
                }
                self.restore_bindings(&snapshot.label_file_bindings, true, &mut report)
                    .await;
                self.upsert_kind(ResourceKind::Roles, &snapshot.roles, &mut report)
                    .await;
            }
            RestoreMode::Additive => {
                for kind in RECORD_KINDS {
                    self.insert_kind(kind, snapshot.collection(kind), &mut report)
                        .await;
                }
                self.insert_kind(ResourceKind::Roles, &snapshot.roles, &mut report)
                    .await;
                self.restore_bindings(&snapshot.label_file_bindings, false, &mut report)
                    .await;
            }
        }

        info!(
            "Restore finished ({:?}): {} restored, {} failed, {} skipped",
            mode, report.restored, report.failed, report.skipped
        );
        self.emit(phase, LogLevel::Info, "Finish restore");
        Ok(report)
    }

    /// Verify the passphrase against the marker and decrypt every field
    fn unlock(&self, mut snapshot: Snapshot, passphrase: &str) -> Result<Snapshot, BackupError> {
        let Some(marker) = snapshot.encrypted.clone() else {
            return Ok(snapshot);
        };
        if !crypto::verify_marker(&marker, passphrase) {
            return Err(BackupError::WrongPassword);
        }

        for kind in ResourceKind::ALL {
            // keep absent settings absent
            if kind == ResourceKind::Settings && snapshot.settings.is_none() {
                continue;
            }
            for record in snapshot.collection_mut(kind).iter_mut() {
                for (field, value) in record.fields_mut() {
                    *value = crypto::decrypt_value(value, passphrase, true).map_err(|source| {
                        BackupError::CorruptField {
                            kind,
                            field: field.clone(),
                            source,
                        }
                    })?;
                }
            }
        }
        Ok(snapshot)
    }

    async fn restore_settings(&self, settings: &[Record], report: &mut RestoreReport) {
        let writable: Vec<Record> = settings
            .iter()
            .filter(|s| !is_protected_setting(s))
            .cloned()
            .collect();
        report.skipped += (settings.len() - writable.len()) as u32;

        match self.api.save_settings(&writable).await {
            Ok(()) => {
                report.restored += 1;
                self.emit(LogPhase::Restore, LogLevel::Success, "Restored settings");
            }
            Err(e) => {
                report.failed += 1;
                warn!("Restore of settings failed: {}", e);
                self.emit(
                    LogPhase::Restore,
                    LogLevel::Error,
                    format!("Failed to restore settings: {e}"),
                );
            }
        }
    }

    /// Drop built-in identities, logging one skip entry each
    fn without_builtins<'a>(
        &self,
        kind: ResourceKind,
        records: &'a [Record],
        report: &mut RestoreReport,
    ) -> Vec<&'a Record> {
        let key = kind.natural_key().unwrap_or_default();
        records
            .iter()
            .filter(|record| {
                if kind.is_builtin(record) {
                    report.skipped += 1;
                    self.emit(
                        LogPhase::Restore,
                        LogLevel::Info,
                        format!(
                            "{kind} - [{}] skipped (built-in {})",
                            record.label(key),
                            kind.singular()
                        ),
                    );
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    fn item_outcome(
        &self,
        kind: ResourceKind,
        key: &str,
        outcome: Result<(), crate::api::ApiError>,
        report: &mut RestoreReport,
    ) {
        match outcome {
            Ok(()) => {
                report.restored += 1;
                self.emit(
                    LogPhase::Restore,
                    LogLevel::Success,
                    format!("Restored {kind}-[{key}]"),
                );
            }
            Err(e) => {
                report.failed += 1;
                warn!("Restore of {} [{}] failed: {}", kind, key, e);
                self.emit(
                    LogPhase::Restore,
                    LogLevel::Error,
                    format!("Failed to restore {kind}-[{key}]: {e}"),
                );
            }
        }
    }

    /// Update records whose natural key exists live, create the rest
    async fn upsert_kind(&self, kind: ResourceKind, records: &[Record], report: &mut RestoreReport) {
        let records = self.without_builtins(kind, records, report);
        if records.is_empty() {
            return;
        }
        let Some(key_field) = kind.natural_key() else {
            return;
        };

        let live = match self.api.list(kind).await {
            Ok(live) => live,
            Err(e) => {
                report.failed += records.len() as u32;
                warn!("Listing live {} failed: {}", kind, e);
                self.emit(
                    LogPhase::Restore,
                    LogLevel::Error,
                    format!("Failed to restore {kind}: {e}"),
                );
                return;
            }
        };

        for record in records {
            let exists = record.get(key_field).is_some_and(|key| {
                live.iter().any(|current| {
                    current
                        .get(key_field)
                        .is_some_and(|live_key| live_key.same_key(key))
                })
            });
            let outcome = if exists {
                self.api.update(kind, record).await
            } else {
                self.api.create(kind, record).await
            };
            self.item_outcome(kind, &record.label(key_field), outcome, report);
        }
    }

    /// Create every record as new: ids reset to 0, role ids dropped
    async fn insert_kind(&self, kind: ResourceKind, records: &[Record], report: &mut RestoreReport) {
        let display_key = kind.display_key().unwrap_or_default();
        for record in self.without_builtins(kind, records, report) {
            let mut fresh = record.clone();
            if kind == ResourceKind::Roles {
                fresh.remove("id");
            } else {
                fresh.set("id", 0i64);
            }
            let outcome = self.api.create(kind, &fresh).await;
            self.item_outcome(kind, &record.label(display_key), outcome, report);
        }
    }

    async fn restore_bindings(
        &self,
        bindings: &[Record],
        override_existing: bool,
        report: &mut RestoreReport,
    ) {
        if bindings.is_empty() {
            return;
        }
        let request = BindingRestoreRequest {
            keep_ids: true,
            override_existing,
            bindings: bindings.iter().cloned().map(normalize_binding).collect(),
        };
        let kind = ResourceKind::LabelFileBindings;
        match self.api.restore_bindings(&request).await {
            Ok(()) => {
                report.restored += 1;
                self.emit(
                    LogPhase::Restore,
                    LogLevel::Success,
                    format!("Restored {kind} ({})", request.bindings.len()),
                );
            }
            Err(e) => {
                report.failed += 1;
                warn!("Restore of {} failed: {}", kind, e);
                self.emit(
                    LogPhase::Restore,
                    LogLevel::Error,
                    format!("Failed to restore {kind}: {e}"),
                );
            }
        }
    }
}
