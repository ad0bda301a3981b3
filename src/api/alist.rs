//! AList admin API client
//!
//! Implements [`AdminApi`] over the server's JSON HTTP API (`<server>/api`).
//! Every request carries the raw token in `Authorization` and the
//! installation's `Client-Id`; responses are unwrapped from the
//! `{code, message, data}` envelope.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::http_retry::{send_idempotent, RetryPolicy};
use super::types::{
    hash_password, ApiError, ApiResponse, BindingRestoreRequest, EvictSessionRequest, LoginRequest,
    LoginResponse, Page, SessionInfo, SessionList, SessionScope, CODE_OK,
};
use super::AdminApi;
use crate::config::BackupConfig;
use crate::snapshot::{Record, ResourceKind};

const CLIENT_ID_HEADER: &str = "Client-Id";

pub struct AListClient {
    api_base: String,
    client: reqwest::Client,
    token: SecretString,
    client_id: String,
    retry: RetryPolicy,
    /// Set once the server rejects the token
    session_lost: AtomicBool,
}

impl AListClient {
    pub fn new(
        server_url: &str,
        token: SecretString,
        client_id: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ApiError> {
        let parsed = url::Url::parse(server_url)
            .map_err(|e| ApiError::InvalidConfig(format!("Invalid server URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::InvalidConfig(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::InvalidConfig(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_base: format!("{}/api", server_url.trim_end_matches('/')),
            client,
            token,
            client_id: client_id.into(),
            retry,
            session_lost: AtomicBool::new(false),
        })
    }

    /// Build a client from saved configuration (token may be empty for login)
    pub fn from_config(config: &BackupConfig) -> Result<Self, ApiError> {
        Self::new(
            &config.server_url,
            SecretString::from(config.token.clone().unwrap_or_default()),
            config.client_id.clone().unwrap_or_default(),
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::with_max_retries(config.max_retries),
        )
    }

    /// Whether any call so far failed because the session is no longer valid
    pub fn session_lost(&self) -> bool {
        self.session_lost.load(Ordering::Relaxed)
    }

    fn track<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(e) = &result {
            if e.requires_login() {
                self.mark_session_lost(e);
            }
        }
        result
    }

    fn mark_session_lost(&self, cause: &ApiError) {
        if !self.session_lost.swap(true, Ordering::Relaxed) {
            warn!("Session rejected by server: {}", cause);
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn with_session(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(CONTENT_TYPE, "application/json;charset=utf-8");
        let builder = if self.client_id.is_empty() {
            builder
        } else {
            builder.header(CLIENT_ID_HEADER, &self.client_id)
        };
        let token = self.token.expose_secret();
        if token.is_empty() {
            builder
        } else {
            builder.header(AUTHORIZATION, token)
        }
    }

    /// Unwrap the envelope, mapping HTTP and envelope failures to [`ApiError`]
    async fn unwrap_envelope<T: DeserializeOwned>(resp: Response) -> Result<Option<T>, ApiError> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiResponse<serde_json::Value>>(&body)
                .map(|env| env.message)
                .unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16() as i64, message));
        }

        let envelope: ApiResponse<T> =
            serde_json::from_str(&body).map_err(|e| ApiError::Parse(e.to_string()))?;
        if envelope.code != CODE_OK {
            return Err(ApiError::from_status(envelope.code, envelope.message));
        }
        Ok(envelope.data)
    }

    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ApiError> {
        let url = self.endpoint(path);
        debug!("GET {}", url);
        let resp = send_idempotent(|| self.with_session(self.client.get(&url)), &self.retry).await?;
        self.track(Self::unwrap_envelope::<T>(resp).await)
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.get_optional(path)
            .await?
            .ok_or_else(|| ApiError::Parse(format!("No data in response from {path}")))
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let url = self.endpoint(path);
        debug!("POST {}", url);
        let resp = self
            .with_session(self.client.post(&url))
            .json(body)
            .send()
            .await?;
        self.track(Self::unwrap_envelope::<serde_json::Value>(resp).await)
            .map(|_| ())
    }

    /// Log in with username and password, returning the session token
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        otp_code: &str,
    ) -> Result<LoginResponse, ApiError> {
        let request = LoginRequest {
            username: username.to_string(),
            password: hash_password(password),
            otp_code: otp_code.to_string(),
        };
        let resp = self
            .with_session(self.client.post(self.endpoint("/auth/login/hash")))
            .json(&request)
            .send()
            .await?;
        let login = Self::unwrap_envelope::<LoginResponse>(resp)
            .await?
            .ok_or_else(|| ApiError::Parse("No token in login response".to_string()))?;
        info!("Logged in to {} as {}", self.api_base, username);
        Ok(login)
    }

    /// Login sessions in `scope`; a null list is empty
    pub async fn list_sessions(&self, scope: SessionScope) -> Result<Vec<SessionInfo>, ApiError> {
        let sessions = self.get_optional::<SessionList>(scope.list_path()).await?;
        Ok(sessions.map(SessionList::into_vec).unwrap_or_default())
    }

    /// Sign out one session.
    ///
    /// The session of this device (`device_key`) is refused without a request.
    /// A 403 answer means our own session is gone and marks it lost.
    pub async fn evict_session(
        &self,
        scope: SessionScope,
        session_id: &str,
        device_key: Option<&str>,
    ) -> Result<(), ApiError> {
        if device_key.is_some_and(|key| !key.is_empty() && key == session_id) {
            return Err(ApiError::CurrentSession(session_id.to_string()));
        }
        let result = self
            .post(scope.evict_path(), &EvictSessionRequest { session_id })
            .await;
        if let Err(e) = &result {
            if e.status() == Some(403) {
                self.mark_session_lost(e);
            }
        } else {
            info!("Evicted session {}", session_id);
        }
        result
    }
}

#[async_trait]
impl AdminApi for AListClient {
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Record>, ApiError> {
        if kind.is_paged() {
            let page: Page<Record> = self.get_data(kind.list_path()).await?;
            Ok(page.content)
        } else {
            self.get_data(kind.list_path()).await
        }
    }

    async fn create(&self, kind: ResourceKind, record: &Record) -> Result<(), ApiError> {
        let path = kind
            .create_path()
            .ok_or_else(|| ApiError::NotSupported(format!("create {kind}")))?;
        self.post(path, record).await
    }

    async fn update(&self, kind: ResourceKind, record: &Record) -> Result<(), ApiError> {
        let path = kind
            .update_path()
            .ok_or_else(|| ApiError::NotSupported(format!("update {kind}")))?;
        self.post(path, record).await
    }

    async fn save_settings(&self, settings: &[Record]) -> Result<(), ApiError> {
        self.post("/admin/setting/save", settings).await
    }

    async fn restore_bindings(&self, request: &BindingRestoreRequest) -> Result<(), ApiError> {
        self.post("/admin/label_file_binding/restore", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AListClient {
        AListClient::new(
            &format!("{}/", server.uri()),
            SecretString::from("tok-123".to_string()),
            "client-abc",
            Duration::from_secs(5),
            RetryPolicy::with_max_retries(0),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_server_url() {
        let err = AListClient::new(
            "ftp://example.com",
            SecretString::from(String::new()),
            "",
            Duration::from_secs(1),
            RetryPolicy::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_list_paged_sends_session_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/admin/user/list"))
            .and(header("authorization", "tok-123"))
            .and(header("client-id", "client-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200, "message": "success",
                "data": {"content": [{"id": 1, "username": "admin"}, {"id": 2, "username": "alice"}], "total": 2}
            })))
            .mount(&server)
            .await;

        let users = client_for(&server).list(ResourceKind::Users).await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].label("username"), "alice");
    }

    #[tokio::test]
    async fn test_list_settings_is_flat() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/admin/setting/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200, "message": "success",
                "data": [{"key": "site_title", "value": "AList"}]
            })))
            .mount(&server)
            .await;

        let settings = client_for(&server).list(ResourceKind::Settings).await.unwrap();
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].label("value"), "AList");
    }

    #[tokio::test]
    async fn test_envelope_failure_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/admin/storage/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 500, "message": "mount path already exists", "data": null
            })))
            .mount(&server)
            .await;

        let record: Record = [("mount_path", "/local")].into_iter().collect();
        let err = client_for(&server)
            .create(ResourceKind::Storages, &record)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "mount path already exists");
    }

    #[tokio::test]
    async fn test_http_403_session_inactive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "code": 403, "message": "session inactive"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(!client.session_lost());
        let err = client.list(ResourceKind::Roles).await.unwrap_err();
        assert!(err.requires_login());
        assert!(client.session_lost());
    }

    #[tokio::test]
    async fn test_restore_bindings_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/admin/label_file_binding/restore"))
            .and(body_json(json!({
                "keep_ids": true, "override": true,
                "bindings": [{"file_name": "a.txt", "label_id": 1}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200, "message": "success", "data": null})))
            .expect(1)
            .mount(&server)
            .await;

        let binding: Record = serde_json::from_value(json!({"file_name": "a.txt", "label_id": 1})).unwrap();
        client_for(&server)
            .restore_bindings(&BindingRestoreRequest {
                keep_ids: true,
                override_existing: true,
                bindings: vec![binding],
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_login_hashes_password() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login/hash"))
            .and(body_json(json!({
                "username": "admin",
                "password": hash_password("admin"),
                "otp_code": ""
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200, "message": "success",
                "data": {"token": "new-token", "device_key": "dev-1"}
            })))
            .mount(&server)
            .await;

        let login = client_for(&server).login("admin", "admin", "").await.unwrap();
        assert_eq!(login.token, "new-token");
        assert_eq!(login.device_key.as_deref(), Some("dev-1"));
    }

    fn envelope_ok() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"code": 200, "message": "success", "data": null}))
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/me/sessions"))
            .and(header("authorization", "tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200, "message": "success",
                "data": [
                    {"session_id": "dev-1", "ua": "alist-backup", "ip": "10.0.0.2", "last_active": 1700000000, "status": 0},
                    {"session_id": "dev-2", "ua": "Firefox", "ip": "10.0.0.3", "last_active": 1690000000, "status": 1}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/admin/user/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200, "message": "success", "data": null
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mine = client.list_sessions(SessionScope::Mine).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].session_id, "dev-1");
        assert!(mine[0].is_active());
        assert!(!mine[1].is_active());

        let all = client.list_sessions(SessionScope::All).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_evict_session_sends_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/admin/user/sessions/evict"))
            .and(body_json(json!({"session_id": "dev-2"})))
            .respond_with(envelope_ok())
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client
            .evict_session(SessionScope::All, "dev-2", Some("dev-1"))
            .await
            .unwrap();
        assert!(!client.session_lost());
    }

    #[tokio::test]
    async fn test_evict_own_device_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/me/sessions/evict"))
            .respond_with(envelope_ok())
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .evict_session(SessionScope::Mine, "dev-1", Some("dev-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::CurrentSession(ref id) if id == "dev-1"));
        assert!(!client.session_lost());
    }

    #[tokio::test]
    async fn test_evict_forbidden_marks_session_lost() {
        for body in [
            json!({"code": 403, "message": "session inactive", "data": null}),
            json!({"code": 403, "message": "forbidden", "data": null}),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/api/me/sessions/evict"))
                .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
                .expect(1)
                .mount(&server)
                .await;

            let client = client_for(&server);
            let err = client
                .evict_session(SessionScope::Mine, "dev-9", Some("dev-1"))
                .await
                .unwrap_err();
            assert_eq!(err.status(), Some(403), "{body}");
            assert!(client.session_lost(), "{body}");
        }
    }

    #[tokio::test]
    async fn test_evict_other_failure_keeps_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/me/sessions/evict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 500, "message": "session not found", "data": null
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .evict_session(SessionScope::Mine, "gone", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "session not found");
        assert!(!client.session_lost());
    }

    #[tokio::test]
    async fn test_settings_kind_has_no_create() {
        let server = MockServer::start().await;
        let err = client_for(&server)
            .create(ResourceKind::Settings, &Record::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotSupported(_)));
    }
}
