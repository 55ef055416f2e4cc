//! REST gateway for the ComfyQueue backend.
//!
//! Every outbound call goes through [`ApiClient`], which attaches the
//! current session's bearer token and classifies failures into
//! [`ApiError`]. The gateway never retries and never caches; callers
//! decide how to present or recover from each error.

use std::path::Path;
use std::sync::Arc;

use comfyqueue_core::models::job::Job;
use comfyqueue_core::models::node::{CreateNode, Node, ToggleNode, UpdateNode};
use comfyqueue_core::models::user::{ChangePassword, CreateUser, CurrentUser, UpdateUser, User};
use comfyqueue_core::roles::Role;
use comfyqueue_core::types::DbId;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ClientConfig;
use crate::session::SessionStore;

/// Credentials for `POST /api/auth/login`.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Response of a successful login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub role: String,
}

/// Response of `POST /api/nodes/add`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedNode {
    pub id: DbId,
}

/// Coarse failure class used for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing, expired or invalid credentials. Send the user to login.
    Auth,
    /// The request was rejected. Show the message next to the form.
    Validation,
    /// The backend failed. Show a generic failure banner.
    Server,
    /// No response at all. Ask the user to check the connection.
    Network,
}

/// Errors from the REST gateway.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// HTTP 401.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// HTTP 4xx other than 401, or a request rejected before sending
    /// (`status` is `None` in that case).
    #[error("Request rejected: {message}")]
    Validation { status: Option<u16>, message: String },

    /// HTTP 5xx.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The request never produced a response (DNS, connect, TLS, timeout).
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// A success response whose body did not match the expected shape.
    #[error("Malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Auth { .. } => ErrorKind::Auth,
            ApiError::Validation { .. } => ErrorKind::Validation,
            ApiError::Server { .. } | ApiError::Decode(_) => ErrorKind::Server,
            ApiError::Network(_) => ErrorKind::Network,
        }
    }

    pub fn is_auth(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }

    /// Short text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Auth { message } if !message.is_empty() => message.clone(),
            ApiError::Auth { .. } => "Authentication required. Please log in.".into(),
            ApiError::Validation { message, .. } => message.clone(),
            ApiError::Server { .. } | ApiError::Decode(_) => {
                "The server failed to process the request.".into()
            }
            ApiError::Network(_) => "Could not reach the server. Check your connection.".into(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        ApiError::Validation {
            status: None,
            message: message.into(),
        }
    }
}

/// HTTP client for the ComfyQueue backend.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
    session: Arc<SessionStore>,
}

impl ApiClient {
    /// Create a gateway for `config.base_url` that reads credentials
    /// from `session`.
    pub fn new(config: &ClientConfig, session: Arc<SessionStore>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(ApiError::Network)?;
        Ok(Self::with_client(client, config.base_url.clone(), session))
    }

    /// Create a gateway reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: Url, session: Arc<SessionStore>) -> Self {
        Self {
            client,
            base_url,
            session,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Issue a JSON request against `path` (relative to the base URL).
    ///
    /// Attaches `Authorization: Bearer <token>` when a session is active.
    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut builder = self.client.request(method.clone(), self.url(path)?);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.send(builder, &method, path, true).await
    }

    // ---- auth ----

    /// Exchange credentials for a token. Never sends a bearer header.
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        let builder = self
            .client
            .post(self.url("api/auth/login")?)
            .json(credentials);
        self.send(builder, &Method::POST, "api/auth/login", false)
            .await
    }

    /// Identity behind the current token.
    pub async fn me(&self) -> Result<CurrentUser, ApiError> {
        self.get("api/auth/me").await
    }

    // ---- snapshots ----

    pub async fn list_jobs(&self) -> Result<Vec<Job>, ApiError> {
        self.get("api/jobs").await
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>, ApiError> {
        self.get("api/nodes").await
    }

    // ---- nodes ----

    pub async fn toggle_node(&self, name: &str, enabled: bool) -> Result<(), ApiError> {
        let body = ToggleNode {
            name: name.to_string(),
            enabled,
        };
        self.request::<_, serde_json::Value>(Method::POST, "api/nodes/toggle", Some(&body))
            .await?;
        Ok(())
    }

    pub async fn add_node(&self, input: &CreateNode) -> Result<CreatedNode, ApiError> {
        if input.name.trim().is_empty() || input.url.trim().is_empty() {
            return Err(ApiError::rejected("name and url required"));
        }
        self.request(Method::POST, "api/nodes/add", Some(input)).await
    }

    pub async fn update_node(&self, id: DbId, input: &UpdateNode) -> Result<(), ApiError> {
        if input.is_empty() {
            return Err(ApiError::rejected("nothing to update"));
        }
        self.request::<_, serde_json::Value>(Method::PUT, &format!("api/nodes/{id}"), Some(input))
            .await?;
        Ok(())
    }

    pub async fn delete_node(&self, id: DbId) -> Result<(), ApiError> {
        self.request::<(), serde_json::Value>(Method::DELETE, &format!("api/nodes/{id}"), None)
            .await?;
        Ok(())
    }

    // ---- upload ----

    /// Upload a workflow file as multipart field `file`. The backend
    /// creates a pending job and announces it on the realtime channel.
    pub async fn upload_workflow(&self, path: &Path) -> Result<(), ApiError> {
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !is_json {
            return Err(ApiError::rejected("Only .json workflow files can be uploaded"));
        }
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ApiError::rejected("Workflow path has no file name"))?
            .to_string();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ApiError::rejected(format!("Cannot read {}: {e}", path.display()))
        })?;

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/json")
            .map_err(|e| ApiError::rejected(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let builder = self.client.post(self.url("upload")?).multipart(form);
        self.send::<serde_json::Value>(builder, &Method::POST, "upload", true)
            .await?;
        Ok(())
    }

    // ---- users (admin panel) ----

    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.get("api/users/").await
    }

    pub async fn create_user(&self, input: &CreateUser) -> Result<(), ApiError> {
        if input.username.trim().is_empty() || input.password.is_empty() {
            return Err(ApiError::rejected("Please fill all fields"));
        }
        self.request::<_, serde_json::Value>(Method::POST, "api/users/", Some(input))
            .await?;
        Ok(())
    }

    pub async fn update_user(&self, id: DbId, input: &UpdateUser) -> Result<(), ApiError> {
        self.request::<_, serde_json::Value>(Method::PUT, &format!("api/users/{id}"), Some(input))
            .await?;
        Ok(())
    }

    pub async fn change_password(&self, id: DbId, password: &str) -> Result<(), ApiError> {
        if password.trim().is_empty() {
            return Err(ApiError::rejected("Password must not be empty"));
        }
        let body = ChangePassword {
            password: password.to_string(),
        };
        self.request::<_, serde_json::Value>(
            Method::PUT,
            &format!("api/users/{id}/password"),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_user(&self, id: DbId) -> Result<(), ApiError> {
        self.request::<(), serde_json::Value>(Method::DELETE, &format!("api/users/{id}"), None)
            .await?;
        Ok(())
    }

    // ---- private helpers ----

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request::<(), T>(Method::GET, path, None).await
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::rejected(format!("Invalid path '{path}': {e}")))
    }

    /// Attach credentials, send, and classify the outcome.
    async fn send<T: DeserializeOwned>(
        &self,
        mut builder: reqwest::RequestBuilder,
        method: &Method,
        path: &str,
        authenticated: bool,
    ) -> Result<T, ApiError> {
        if authenticated {
            if let Some(token) = self.session.token() {
                builder = builder.bearer_auth(token);
            }
        }

        tracing::debug!(%method, path, "Sending request");
        let response = builder.send().await.map_err(|e| {
            tracing::warn!(%method, path, error = %e, "Request got no response");
            ApiError::Network(e)
        })?;

        let response = Self::ensure_success(response, method, path).await?;
        let bytes = response.bytes().await.map_err(ApiError::Network)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            tracing::warn!(%method, path, error = %e, "Unexpected response body");
            ApiError::Decode(e.to_string())
        })
    }

    /// Map a non-2xx status onto the error taxonomy.
    async fn ensure_success(
        response: reqwest::Response,
        method: &Method,
        path: &str,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let message = extract_message(&body);
        tracing::warn!(
            %method,
            path,
            status = status.as_u16(),
            message = %message,
            "Request failed"
        );

        Err(classify_status(status.as_u16(), message))
    }
}

/// Classify a non-success HTTP status.
pub fn classify_status(status: u16, message: String) -> ApiError {
    match status {
        401 => ApiError::Auth { message },
        400..=499 => ApiError::Validation {
            status: Some(status),
            message,
        },
        _ => ApiError::Server { status, message },
    }
}

/// Pull a human-readable message out of an error body. The backend uses
/// `msg` for auth/user routes and `error` for node routes.
fn extract_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["msg", "error", "message"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    body.trim().to_string()
}

/// Parse the role string of a [`LoginResponse`].
pub(crate) fn parse_role(raw: &str) -> Result<Role, ApiError> {
    raw.parse()
        .map_err(|e: comfyqueue_core::error::CoreError| ApiError::Decode(e.to_string()))
}
