//! Shared types for the AList admin API
//!
//! Response envelope, paging wrapper, request bodies and the error type every
//! `AdminApi` implementation reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::snapshot::Record;

/// Envelope code the server uses for success
pub const CODE_OK: i64 = 200;

/// Salt appended by the web client before hashing a login password
const PASSWORD_HASH_SALT: &str = "https://github.com/alist-org/alist";

/// `{code, message, data}` wrapper around every response
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// Paged list payload
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde(default = "Vec::new", deserialize_with = "deserialize_null_vec")]
    pub content: Vec<T>,
}

fn deserialize_null_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt: Option<Vec<T>> = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// Body of `POST /admin/label_file_binding/restore`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingRestoreRequest {
    pub keep_ids: bool,
    #[serde(rename = "override")]
    pub override_existing: bool,
    pub bindings: Vec<Record>,
}

/// Body of `POST /auth/login/hash`
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub username: String,
    /// Salted SHA-256 hex digest, see [`hash_password`]
    pub password: String,
    pub otp_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub device_key: Option<String>,
}

/// Which session list an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionScope {
    /// Sessions of the logged-in user
    Mine,
    /// Every user's sessions (admin only)
    All,
}

impl SessionScope {
    pub fn list_path(&self) -> &'static str {
        match self {
            SessionScope::Mine => "/me/sessions",
            SessionScope::All => "/admin/user/sessions",
        }
    }

    pub fn evict_path(&self) -> &'static str {
        match self {
            SessionScope::Mine => "/me/sessions/evict",
            SessionScope::All => "/admin/user/sessions/evict",
        }
    }
}

/// One login session as listed by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Equals the `device_key` handed out at login
    #[serde(default)]
    pub session_id: String,
    /// Only present in the admin listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub ua: String,
    #[serde(default)]
    pub ip: String,
    /// Unix seconds
    #[serde(default)]
    pub last_active: i64,
    #[serde(default)]
    pub status: i64,
}

impl SessionInfo {
    pub fn is_active(&self) -> bool {
        self.status == 0
    }

    /// Id with its middle hidden: first six, `***`, last six
    pub fn masked_id(&self) -> String {
        let chars: Vec<char> = self.session_id.chars().collect();
        if chars.len() <= 12 {
            return self.session_id.clone();
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 6..].iter().collect();
        format!("{head}***{tail}")
    }

    pub fn last_active_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.last_active, 0)
    }
}

/// Session lists arrive flat or wrapped in a page depending on the server build
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum SessionList {
    Flat(Vec<SessionInfo>),
    Paged(Page<SessionInfo>),
}

impl SessionList {
    pub(crate) fn into_vec(self) -> Vec<SessionInfo> {
        match self {
            SessionList::Flat(sessions) => sessions,
            SessionList::Paged(page) => page.content,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EvictSessionRequest<'a> {
    pub session_id: &'a str,
}

/// Hash a plain password the way the web login form does
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{password}-{PASSWORD_HASH_SALT}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Admin API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not logged in or token expired")]
    Unauthorized,

    #[error("Session inactive: {0}")]
    SessionInactive(String),

    #[error("Too many active devices: {0}")]
    TooManyDevices(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Non-200 envelope code; the message is what the web UI would show
    #[error("{message}")]
    Server { code: i64, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Session {0} belongs to this device; log in again instead of evicting it")]
    CurrentSession(String),
}

impl ApiError {
    /// Classify a failure by status (HTTP or envelope code) and server message
    pub fn from_status(status: i64, message: String) -> Self {
        match status {
            401 => ApiError::Unauthorized,
            403 if message.contains("session inactive") => ApiError::SessionInactive(message),
            403 if message.contains("too many active devices") => ApiError::TooManyDevices(message),
            100..=599 if status != CODE_OK && message.is_empty() => ApiError::Http {
                status: status as u16,
                message: "request failed".to_string(),
            },
            _ => ApiError::Server { code: status, message },
        }
    }

    /// Whether the stored token is no longer usable and the operator must log in again
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::SessionInactive(_))
    }

    /// HTTP status or envelope code behind the error, when the server sent one
    pub fn status(&self) -> Option<i64> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::SessionInactive(_) | ApiError::TooManyDevices(_) => Some(403),
            ApiError::Http { status, .. } => Some(i64::from(*status)),
            ApiError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Parse(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}
