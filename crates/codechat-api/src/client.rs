//! HTTP client for the chat server's REST API.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{ApiError, Result};
use crate::types::{
    ErrorBody, HealthResponse, HistoryPage, HistoryQuery, LoginRequest, LoginResponse,
    ServerSettings, SettingsUpdate, StatusResponse,
};

/// Name of the cookie that carries the session.
pub const SESSION_COOKIE: &str = "session_token";

/// Header that must echo the CSRF token on mutating requests.
pub const CSRF_HEADER: &str = "X-CSRF-Token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct Credentials {
    session_token: Option<String>,
    csrf_token: Option<String>,
}

/// Client for the REST API.
///
/// Clones share the same login state, so one clone can log in while another
/// hands the session token to the websocket connector.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    credentials: Arc<RwLock<Credentials>>,
}

impl ApiClient {
    /// Create a client for the server at `base_url` (e.g. `http://localhost:8000`).
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: Arc::new(RwLock::new(Credentials::default())),
        })
    }

    /// Adopt an existing session instead of logging in.
    #[must_use]
    pub fn with_session(self, session_token: impl Into<String>, csrf_token: Option<String>) -> Self {
        {
            let mut creds = self.credentials.write();
            creds.session_token = Some(session_token.into());
            creds.csrf_token = csrf_token;
        }
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the session cookie, and the CSRF header when `mutating`.
    fn authed(&self, builder: RequestBuilder, mutating: bool) -> Result<RequestBuilder> {
        let creds = self.credentials.read();
        let token = creds
            .session_token
            .as_deref()
            .ok_or(ApiError::NotAuthenticated)?;
        let mut builder = builder.header(COOKIE, format!("{SESSION_COOKIE}={token}"));
        if mutating {
            if let Some(csrf) = creds.csrf_token.as_deref() {
                builder = builder.header(CSRF_HEADER, csrf);
            }
        }
        Ok(builder)
    }

    /// Map a non-success response to an error.
    async fn handle_error(response: Response) -> ApiError {
        let status = response.status();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message(),
            Err(_) => status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string(),
        };
        if status == StatusCode::UNAUTHORIZED {
            ApiError::Unauthorized(message)
        } else {
            ApiError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    // =========================================================================
    // Auth
    // =========================================================================

    /// Log in and remember the session cookie and CSRF token.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Unauthorized` for bad credentials, `ApiError::Api`
    /// for other rejections (e.g. rate limiting) and `ApiError::Parse` if the
    /// response carries no session cookie.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        if username.is_empty() || password.is_empty() {
            return Err(ApiError::Validation(
                "username and password are required".to_string(),
            ));
        }

        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        let session_token = session_cookie(&response)
            .ok_or_else(|| ApiError::Parse("login response set no session cookie".to_string()))?;
        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;

        let mut creds = self.credentials.write();
        creds.session_token = Some(session_token);
        creds.csrf_token = Some(body.csrf_token);
        drop(creds);

        tracing::info!(username, "Logged in");
        Ok(())
    }

    /// End the session on the server and forget the local credentials.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::NotAuthenticated` when not logged in. Credentials
    /// are forgotten even when the server call fails.
    pub async fn logout(&self) -> Result<()> {
        let request = self.authed(self.client.post(self.url("/api/auth/logout")), true)?;
        let result = request.send().await;
        *self.credentials.write() = Credentials::default();

        let _: StatusResponse = Self::parse(result?).await?;
        tracing::info!("Logged out");
        Ok(())
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Fetch a page of stored messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::NotAuthenticated` when not logged in, or the
    /// request error.
    pub async fn history(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        let request = self
            .authed(self.client.get(self.url("/api/chat/history")), false)?
            .query(query);
        let page: HistoryPage = Self::parse(request.send().await?).await?;
        tracing::debug!(count = page.messages.len(), total = page.total, "Fetched history");
        Ok(page)
    }

    /// Delete every stored message.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::NotAuthenticated` when not logged in, or the
    /// request error.
    pub async fn clear_history(&self) -> Result<()> {
        let request = self.authed(self.client.delete(self.url("/api/chat/history")), true)?;
        let _: StatusResponse = Self::parse(request.send().await?).await?;
        tracing::info!("Cleared chat history");
        Ok(())
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Fetch the server's generation settings.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::NotAuthenticated` when not logged in, or the
    /// request error.
    pub async fn settings(&self) -> Result<ServerSettings> {
        let request = self.authed(self.client.get(self.url("/api/settings")), false)?;
        Self::parse(request.send().await?).await
    }

    /// Validate and apply a partial settings update.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Validation` without contacting the server if a
    /// field is out of range, `ApiError::NotAuthenticated` when not logged
    /// in, or the request error.
    pub async fn update_settings(&self, update: &SettingsUpdate) -> Result<()> {
        update.validate()?;
        let request = self
            .authed(self.client.post(self.url("/api/settings")), true)?
            .json(update);
        let _: StatusResponse = Self::parse(request.send().await?).await?;
        tracing::info!(update = ?update, "Updated server settings");
        Ok(())
    }

    // =========================================================================
    // Utility
    // =========================================================================

    /// Check that the server is up.
    ///
    /// # Errors
    ///
    /// Returns the request error if the server cannot be reached.
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.client.get(self.url("/health")).send().await?;
        Self::parse(response).await
    }

    /// The current session token, if logged in.
    #[must_use]
    pub fn session_token(&self) -> Option<String> {
        self.credentials.read().session_token.clone()
    }

    /// The current CSRF token, if logged in.
    #[must_use]
    pub fn csrf_token(&self) -> Option<String> {
        self.credentials.read().csrf_token.clone()
    }

    /// Whether a session is held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.credentials.read().session_token.is_some()
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Extract the session token from the response's `Set-Cookie` headers.
fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| {
            let pair = cookie.split(';').next()?.trim();
            let (name, value) = pair.split_once('=')?;
            (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
        })
}
