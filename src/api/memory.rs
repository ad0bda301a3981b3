//! In-memory admin server used by coordinator tests
//!
//! Assigns ids on create, updates by id, and (like the real server in additive
//! mode) never enforces natural-key uniqueness. Failures can be injected per
//! kind or per record.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{AdminApi, ApiError, BindingRestoreRequest};
use crate::snapshot::{FieldValue, Record, ResourceKind};

#[derive(Default)]
struct State {
    collections: HashMap<ResourceKind, Vec<Record>>,
    next_id: i64,
    failing_lists: HashSet<ResourceKind>,
    /// (kind, natural-key text) pairs whose writes fail
    failing_writes: HashSet<(ResourceKind, String)>,
    saved_settings: Vec<Vec<Record>>,
    binding_requests: Vec<BindingRestoreRequest>,
    writes: usize,
}

#[derive(Default)]
pub(crate) struct MemoryAdmin {
    state: Mutex<State>,
}

impl MemoryAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a live collection; records without an id get one
    pub fn seed(&self, kind: ResourceKind, records: Vec<Record>) {
        let mut state = self.lock();
        for mut record in records {
            if kind != ResourceKind::Settings && !has_id(&record) {
                state.next_id += 1;
                record.set("id", state.next_id);
            }
            if let Some(FieldValue::Number(n)) = record.get("id") {
                state.next_id = state.next_id.max(n.as_i64().unwrap_or(0));
            }
            state.collections.entry(kind).or_default().push(record);
        }
    }

    pub fn fail_list(&self, kind: ResourceKind) {
        self.lock().failing_lists.insert(kind);
    }

    pub fn fail_write(&self, kind: ResourceKind, key: &str) {
        self.lock().failing_writes.insert((kind, key.to_string()));
    }

    pub fn records(&self, kind: ResourceKind) -> Vec<Record> {
        self.lock().collections.get(&kind).cloned().unwrap_or_default()
    }

    pub fn saved_settings(&self) -> Vec<Vec<Record>> {
        self.lock().saved_settings.clone()
    }

    pub fn binding_requests(&self) -> Vec<BindingRestoreRequest> {
        self.lock().binding_requests.clone()
    }

    /// Number of mutating calls received (successful or not)
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn check_write(state: &mut State, kind: ResourceKind, record: &Record) -> Result<(), ApiError> {
        state.writes += 1;
        let key = kind.display_key().map(|f| record.label(f)).unwrap_or_default();
        if state.failing_writes.contains(&(kind, key.clone())) {
            return Err(ApiError::Server {
                code: 500,
                message: format!("{key} rejected"),
            });
        }
        Ok(())
    }
}

fn has_id(record: &Record) -> bool {
    matches!(record.get("id"), Some(FieldValue::Number(n)) if n.as_i64() != Some(0))
}

#[async_trait]
impl AdminApi for MemoryAdmin {
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Record>, ApiError> {
        let state = self.lock();
        if state.failing_lists.contains(&kind) {
            return Err(ApiError::Server {
                code: 500,
                message: format!("failed get {kind}"),
            });
        }
        Ok(state.collections.get(&kind).cloned().unwrap_or_default())
    }

    async fn create(&self, kind: ResourceKind, record: &Record) -> Result<(), ApiError> {
        let mut state = self.lock();
        Self::check_write(&mut state, kind, record)?;
        let mut record = record.clone();
        let given = match record.get("id") {
            Some(FieldValue::Number(n)) => n.as_i64().filter(|id| *id != 0),
            _ => None,
        };
        match given {
            Some(id) => state.next_id = state.next_id.max(id),
            None => {
                state.next_id += 1;
                let id = state.next_id;
                record.set("id", id);
            }
        }
        state.collections.entry(kind).or_default().push(record);
        Ok(())
    }

    async fn update(&self, kind: ResourceKind, record: &Record) -> Result<(), ApiError> {
        let mut state = self.lock();
        Self::check_write(&mut state, kind, record)?;
        let id = record.get("id").cloned();
        let live = state.collections.entry(kind).or_default();
        let matches = |r: &Record| match (r.get("id"), id.as_ref()) {
            (Some(live_id), Some(id)) => live_id.same_key(id),
            _ => false,
        };
        match live.iter_mut().find(|r| matches(&**r)) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(ApiError::Server {
                code: 500,
                message: "record not found".to_string(),
            }),
        }
    }

    async fn save_settings(&self, settings: &[Record]) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.writes += 1;
        state.saved_settings.push(settings.to_vec());
        let live = state.collections.entry(ResourceKind::Settings).or_default();
        for setting in settings {
            match live.iter_mut().find(|r| r.get("key") == setting.get("key")) {
                Some(existing) => *existing = setting.clone(),
                None => live.push(setting.clone()),
            }
        }
        Ok(())
    }

    async fn restore_bindings(&self, request: &BindingRestoreRequest) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.writes += 1;
        state.binding_requests.push(request.clone());
        let live = state.collections.entry(ResourceKind::LabelFileBindings).or_default();
        if request.override_existing {
            live.clear();
        }
        live.extend(request.bindings.iter().cloned());
        Ok(())
    }
}
