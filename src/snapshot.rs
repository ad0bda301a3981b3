//! Snapshot document model
//!
//! A snapshot holds one collection of records per admin resource kind. Records
//! are generic field maps so encryption and reconciliation work the same way for
//! every kind; the per-kind knowledge (endpoints, natural keys, built-ins) lives
//! in the [`ResourceKind`] table.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

// ============ Field values and records ============

/// A single record field.
///
/// Scalars are kept as their own variants; arrays and objects (a user's role
/// list, permission entries, storage addition JSON) are carried as structured JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    Structured(serde_json::Value),
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Number(n) => FieldValue::Number(n),
            serde_json::Value::String(s) => FieldValue::Text(s),
            other => FieldValue::Structured(other),
        }
    }
}

impl From<FieldValue> for serde_json::Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(b) => serde_json::Value::Bool(b),
            FieldValue::Number(n) => serde_json::Value::Number(n),
            FieldValue::Text(s) => serde_json::Value::String(s),
            FieldValue::Structured(v) => v,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

impl FieldValue {
    /// Key equality; numbers compare by value, so `40` matches `40.0`
    pub fn same_key(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Number(a), FieldValue::Number(b)) => match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a == b,
                _ => a.as_f64() == b.as_f64(),
            },
            _ => self == other,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, ""),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Structured(v) => write!(f, "{v}"),
        }
    }
}

/// One resource instance: field name → value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, FieldValue>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.0.remove(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn fields_mut(&mut self) -> impl Iterator<Item = (&String, &mut FieldValue)> {
        self.0.iter_mut()
    }

    /// Display form of a field, empty when missing (used in log lines)
    pub fn label(&self, field: &str) -> String {
        self.get(field).map(|v| v.to_string()).unwrap_or_default()
    }

    /// Lower-cased text of a field, for built-in name checks
    fn name_lower(&self, field: &str) -> String {
        self.label(field).to_lowercase()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ============ Resource kind table ============

/// Admin resource kinds, in export order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Settings,
    Users,
    Storages,
    Metas,
    Labels,
    LabelFileBindings,
    Roles,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Settings,
        ResourceKind::Users,
        ResourceKind::Storages,
        ResourceKind::Metas,
        ResourceKind::Labels,
        ResourceKind::LabelFileBindings,
        ResourceKind::Roles,
    ];

    /// JSON key of the collection inside a snapshot
    pub fn key(&self) -> &'static str {
        match self {
            ResourceKind::Settings => "settings",
            ResourceKind::Users => "users",
            ResourceKind::Storages => "storages",
            ResourceKind::Metas => "metas",
            ResourceKind::Labels => "labels",
            ResourceKind::LabelFileBindings => "label_file_bindings",
            ResourceKind::Roles => "roles",
        }
    }

    pub fn list_path(&self) -> &'static str {
        match self {
            ResourceKind::Settings => "/admin/setting/list",
            ResourceKind::Users => "/admin/user/list",
            ResourceKind::Storages => "/admin/storage/list",
            ResourceKind::Metas => "/admin/meta/list",
            ResourceKind::Labels => "/label/list",
            ResourceKind::LabelFileBindings => "/admin/label_file_binding/list",
            ResourceKind::Roles => "/admin/role/list",
        }
    }

    /// Single-record create endpoint; settings and bindings have bulk endpoints instead
    pub fn create_path(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Users => Some("/admin/user/create"),
            ResourceKind::Storages => Some("/admin/storage/create"),
            ResourceKind::Metas => Some("/admin/meta/create"),
            ResourceKind::Labels => Some("/admin/label/create"),
            ResourceKind::Roles => Some("/admin/role/create"),
            ResourceKind::Settings | ResourceKind::LabelFileBindings => None,
        }
    }

    pub fn update_path(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Users => Some("/admin/user/update"),
            ResourceKind::Storages => Some("/admin/storage/update"),
            ResourceKind::Metas => Some("/admin/meta/update"),
            ResourceKind::Labels => Some("/admin/label/update"),
            ResourceKind::Roles => Some("/admin/role/update"),
            ResourceKind::Settings | ResourceKind::LabelFileBindings => None,
        }
    }

    /// Whether the list endpoint wraps records in `{content}`
    pub fn is_paged(&self) -> bool {
        !matches!(self, ResourceKind::Settings)
    }

    /// Field matched against live records when upserting
    pub fn natural_key(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Settings => Some("key"),
            ResourceKind::Users => Some("username"),
            ResourceKind::Storages => Some("mount_path"),
            ResourceKind::Metas => Some("path"),
            ResourceKind::Labels => Some("id"),
            ResourceKind::Roles => Some("name"),
            ResourceKind::LabelFileBindings => None,
        }
    }

    /// Field shown in log lines for additive inserts, where ids are reset
    pub fn display_key(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Labels => Some("name"),
            other => other.natural_key(),
        }
    }

    /// Reserved names that restore never creates or updates
    pub fn builtin_names(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Users => &["admin", "guest"],
            ResourceKind::Roles => &["admin", "guest", "general"],
            _ => &[],
        }
    }

    /// Whether a record is one of this kind's built-in identities
    pub fn is_builtin(&self, record: &Record) -> bool {
        let Some(field) = self.natural_key() else {
            return false;
        };
        let builtins = self.builtin_names();
        !builtins.is_empty() && builtins.contains(&record.name_lower(field).as_str())
    }

    /// Singular noun for skip messages ("built-in user")
    pub fn singular(&self) -> &'static str {
        match self {
            ResourceKind::Settings => "setting",
            ResourceKind::Users => "user",
            ResourceKind::Storages => "storage",
            ResourceKind::Metas => "meta",
            ResourceKind::Labels => "label",
            ResourceKind::LabelFileBindings => "label file binding",
            ResourceKind::Roles => "role",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Setting keys owned by the running server; never written by restore
pub const PROTECTED_SETTING_KEYS: &[&str] = &["version", "index_progress"];

pub fn is_protected_setting(record: &Record) -> bool {
    matches!(record.get("key"), Some(FieldValue::Text(key)) if PROTECTED_SETTING_KEYS.contains(&key.as_str()))
}

/// Coerce a label-file binding into the shape the restore endpoint expects:
/// numeric ids, string file name.
pub fn normalize_binding(mut binding: Record) -> Record {
    for field in ["id", "user_id", "label_id"] {
        let converted = match binding.get(field) {
            Some(FieldValue::Text(text)) => Some(numeric_text(text)),
            _ => None,
        };
        if let Some(number) = converted {
            binding.set(field, number);
        }
    }
    let file_name = match binding.get("file_name") {
        None | Some(FieldValue::Null) => String::new(),
        Some(other) => other.to_string(),
    };
    binding.set("file_name", FieldValue::Text(file_name));
    binding
}

/// Numeric form of an id given as text; blank is 0, garbage is null
fn numeric_text(text: &str) -> FieldValue {
    let text = text.trim();
    if text.is_empty() {
        return FieldValue::from(0i64);
    }
    if let Ok(n) = text.parse::<i64>() {
        return FieldValue::from(n);
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(FieldValue::Number)
        .unwrap_or(FieldValue::Null)
}

// ============ Snapshot ============

/// Portable backup document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Encrypted sentinel; present iff every field value is encrypted
    #[serde(
        default,
        deserialize_with = "deserialize_marker",
        skip_serializing_if = "Option::is_none"
    )]
    pub encrypted: Option<String>,
    /// `None` when the document carried no settings key at all
    #[serde(default)]
    pub settings: Option<Vec<Record>>,
    #[serde(default, deserialize_with = "deserialize_null_vec")]
    pub users: Vec<Record>,
    #[serde(default, deserialize_with = "deserialize_null_vec")]
    pub storages: Vec<Record>,
    #[serde(default, deserialize_with = "deserialize_null_vec")]
    pub metas: Vec<Record>,
    #[serde(default, deserialize_with = "deserialize_null_vec")]
    pub labels: Vec<Record>,
    #[serde(default, deserialize_with = "deserialize_null_vec")]
    pub label_file_bindings: Vec<Record>,
    #[serde(default, deserialize_with = "deserialize_null_vec")]
    pub roles: Vec<Record>,
}

/// Older documents write `"encrypted": ""` for clear-text snapshots
fn deserialize_marker<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.filter(|s| !s.is_empty()))
}

/// Deserialize a Vec that might be null in JSON (treat null as empty vec)
fn deserialize_null_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt: Option<Vec<T>> = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

impl Snapshot {
    pub fn is_encrypted(&self) -> bool {
        self.encrypted.is_some()
    }

    pub fn collection(&self, kind: ResourceKind) -> &[Record] {
        match kind {
            ResourceKind::Settings => self.settings.as_deref().unwrap_or(&[]),
            ResourceKind::Users => &self.users,
            ResourceKind::Storages => &self.storages,
            ResourceKind::Metas => &self.metas,
            ResourceKind::Labels => &self.labels,
            ResourceKind::LabelFileBindings => &self.label_file_bindings,
            ResourceKind::Roles => &self.roles,
        }
    }

    pub fn collection_mut(&mut self, kind: ResourceKind) -> &mut Vec<Record> {
        match kind {
            ResourceKind::Settings => self.settings.get_or_insert_with(Vec::new),
            ResourceKind::Users => &mut self.users,
            ResourceKind::Storages => &mut self.storages,
            ResourceKind::Metas => &mut self.metas,
            ResourceKind::Labels => &mut self.labels,
            ResourceKind::LabelFileBindings => &mut self.label_file_bindings,
            ResourceKind::Roles => &mut self.roles,
        }
    }

    /// Replace a collection wholesale
    pub fn set_collection(&mut self, kind: ResourceKind, records: Vec<Record>) {
        *self.collection_mut(kind) = records;
    }

    pub fn record_count(&self) -> usize {
        ResourceKind::ALL.iter().map(|k| self.collection(*k).len()).sum()
    }

    pub fn from_json(document: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(document)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ============ File I/O ============

#[derive(Debug, thiserror::Error)]
pub enum SnapshotFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid snapshot document: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Default download name, e.g. `alist_backup_2026-10-19_14-03-55.json`
pub fn default_file_name() -> String {
    format!(
        "alist_backup_{}.json",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    )
}

/// Resolve an output argument: a directory gets the default file name appended
pub fn resolve_output_path(output: Option<&Path>) -> PathBuf {
    match output {
        Some(path) if path.is_dir() => path.join(default_file_name()),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(default_file_name()),
    }
}

pub fn write_snapshot(snapshot: &Snapshot, path: &Path) -> Result<(), SnapshotFileError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, snapshot.to_json_pretty()?)?;
    tracing::info!("Snapshot written: {} records to {:?}", snapshot.record_count(), path);
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Snapshot, SnapshotFileError> {
    let document = std::fs::read_to_string(path)?;
    Ok(Snapshot::from_json(&document)?)
}
