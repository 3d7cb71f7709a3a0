//! Directus-dialect CMS client.
//!
//! Implements [`ContentSource`] over the Directus REST API: `/items/{collection}`
//! routes wrapped in a `{ "data": ... }` envelope, bearer-token auth, and an
//! email/password session flow with refresh.

use crate::config::{ApiConfig, AuthMode};
use crate::error::{ApiError, ApiResult};
use crate::source::ContentSource;
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use voltek_types::{Item, ItemId};

/// Tokens for an established CMS session.
#[derive(Debug, Clone)]
struct SessionTokens {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<SystemTime>,
}

impl SessionTokens {
    fn from_auth(data: AuthData) -> Self {
        // `expires` is the token lifetime in milliseconds; refresh a minute
        // early so requests never race the expiry.
        let expires_at = data.expires.map(|ms| {
            SystemTime::now() + Duration::from_millis(ms).saturating_sub(Duration::from_secs(60))
        });
        Self {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            expires_at,
        }
    }
}

/// CMS auth response structures.
#[derive(Debug, Deserialize)]
struct AuthData {
    access_token: String,
    refresh_token: Option<String>,
    /// Token lifetime in milliseconds.
    expires: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AuthEnvelope {
    data: AuthData,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    message: String,
}

/// CMS client speaking the Directus REST dialect.
pub struct DirectusClient {
    config: ApiConfig,
    client: Client,
    tokens: Arc<RwLock<Option<SessionTokens>>>,
}

impl DirectusClient {
    /// Creates a new client. No network traffic happens until the first call.
    pub fn new(config: ApiConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("failed to create HTTP client");

        Self {
            config,
            client,
            tokens: Arc::new(RwLock::new(None)),
        }
    }

    /// URL for a file asset served by the CMS.
    #[must_use]
    pub fn asset_url(&self, file_id: &str) -> String {
        format!(
            "{}/assets/{}",
            self.config.base(),
            urlencoding::encode(file_id)
        )
    }

    /// Checks that the CMS answers at all.
    pub async fn ping(&self) -> ApiResult<()> {
        let response = self
            .client
            .get(format!("{}/server/health", self.config.base()))
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("health check failed: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ApiError::Api {
                status: response.status().as_u16(),
                message: "health check failed".to_string(),
            })
        }
    }

    /// Returns the bearer token for the next request, logging in or
    /// refreshing as needed. `None` in public mode.
    async fn access_token(&self) -> ApiResult<Option<String>> {
        match &self.config.auth {
            AuthMode::Public => Ok(None),
            AuthMode::Static { token } => Ok(Some(token.clone())),
            AuthMode::Session { .. } => {
                let current = {
                    let guard = self.tokens.read().await;
                    guard.as_ref().map(|tokens| {
                        let expired = tokens
                            .expires_at
                            .is_some_and(|exp| SystemTime::now() > exp);
                        (tokens.access_token.clone(), expired)
                    })
                }; // read lock dropped here

                match current {
                    Some((token, false)) => Ok(Some(token)),
                    Some((_, true)) => Ok(Some(self.refresh_session().await?)),
                    None => Ok(Some(self.login().await?)),
                }
            }
        }
    }

    /// Establishes a fresh session with the configured credentials.
    async fn login(&self) -> ApiResult<String> {
        let AuthMode::Session { email, password } = &self.config.auth else {
            return Err(ApiError::AuthFailed(
                "no session credentials configured".to_string(),
            ));
        };

        debug!("Logging in to CMS at {}", self.config.base());

        let response = self
            .client
            .post(format!("{}/auth/login", self.config.base()))
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "mode": "json",
            }))
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("login failed: {e}")))?;

        if !response.status().is_success() {
            let message = read_error_message(response).await;
            return Err(ApiError::AuthFailed(format!("login rejected: {message}")));
        }

        let envelope: AuthEnvelope = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("failed to parse auth response: {e}")))?;

        let tokens = SessionTokens::from_auth(envelope.data);
        let access = tokens.access_token.clone();
        *self.tokens.write().await = Some(tokens);

        info!("CMS session established");
        Ok(access)
    }

    /// Refreshes the current session token, falling back to a fresh login
    /// when the refresh is rejected or no refresh token exists.
    async fn refresh_session(&self) -> ApiResult<String> {
        let refresh_token = {
            let guard = self.tokens.read().await;
            guard.as_ref().and_then(|t| t.refresh_token.clone())
        };

        let Some(refresh_token) = refresh_token else {
            return self.login().await;
        };

        debug!("Refreshing CMS session token");

        let response = self
            .client
            .post(format!("{}/auth/refresh", self.config.base()))
            .json(&serde_json::json!({
                "refresh_token": refresh_token,
                "mode": "json",
            }))
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("token refresh failed: {e}")))?;

        if !response.status().is_success() {
            warn!("CMS token refresh rejected, starting a new session");
            return self.login().await;
        }

        let envelope: AuthEnvelope = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("failed to parse refresh response: {e}")))?;

        let tokens = SessionTokens::from_auth(envelope.data);
        let access = tokens.access_token.clone();
        *self.tokens.write().await = Some(tokens);

        Ok(access)
    }

    /// Whether a rejected request is worth one re-authentication: only in
    /// session mode, and only once a session had been established before.
    async fn can_reauthenticate(&self) -> bool {
        self.config.auth.can_reauthenticate() && self.tokens.read().await.is_some()
    }

    /// Sends a request, mapping CMS statuses into the error taxonomy.
    ///
    /// A 401/403 on a previously working session drops the tokens and
    /// retries exactly once with fresh auth; a second rejection surfaces.
    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> ApiResult<Response> {
        let mut reauthenticated = false;

        loop {
            let mut request = self.client.request(method.clone(), url);
            if let Some(token) = self.access_token().await? {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| ApiError::Network(format!("request failed: {e}")))?;

            match response.status() {
                status if status.is_success() => return Ok(response),
                StatusCode::NOT_FOUND => return Err(ApiError::NotFound),
                StatusCode::FORBIDDEN => {
                    if !reauthenticated && self.can_reauthenticate().await {
                        reauthenticated = true;
                        debug!("CMS rejected an authenticated request, retrying with fresh auth");
                        self.tokens.write().await.take();
                        continue;
                    }
                    return Err(ApiError::PermissionDenied);
                }
                StatusCode::UNAUTHORIZED => {
                    if !reauthenticated && self.can_reauthenticate().await {
                        reauthenticated = true;
                        warn!("CMS session expired, re-authenticating");
                        self.tokens.write().await.take();
                        continue;
                    }
                    return Err(ApiError::AuthExpired);
                }
                status => {
                    let message = read_error_message(response).await;
                    return Err(ApiError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }
            }
        }
    }

    fn items_url(&self, collection: &str) -> String {
        format!(
            "{}/items/{}",
            self.config.base(),
            urlencoding::encode(collection)
        )
    }

    fn item_url(&self, collection: &str, id: &ItemId) -> String {
        format!(
            "{}/{}",
            self.items_url(collection),
            urlencoding::encode(id.as_str())
        )
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> ApiResult<T> {
        let envelope: DataEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("failed to parse response: {e}")))?;
        Ok(envelope.data)
    }
}

/// Pulls the human-readable message out of the CMS error envelope, falling
/// back to the raw body text.
async fn read_error_message(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        if let Some(entry) = envelope.errors.first() {
            return entry.message.clone();
        }
    }
    body
}

#[async_trait]
impl ContentSource for DirectusClient {
    async fn fetch_item(&self, collection: &str, id: &ItemId) -> ApiResult<Item> {
        debug!("Fetching {collection}/{id}");
        let url = self.item_url(collection, id);
        let response = self.send(Method::GET, &url, None).await?;
        Self::decode(response).await
    }

    async fn fetch_items(&self, collection: &str, ids: &[ItemId]) -> ApiResult<Vec<Item>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Fetching {} items from {collection}", ids.len());
        let joined = ids.iter().map(ItemId::as_str).collect::<Vec<_>>().join(",");
        let url = format!(
            "{}?filter[id][_in]={}&limit=-1",
            self.items_url(collection),
            urlencoding::encode(&joined)
        );
        let response = self.send(Method::GET, &url, None).await?;
        Self::decode(response).await
    }

    async fn fetch_singleton(&self, collection: &str) -> ApiResult<Item> {
        debug!("Fetching singleton {collection}");
        let url = self.items_url(collection);
        let response = self.send(Method::GET, &url, None).await?;
        Self::decode(response).await
    }

    async fn list_items(&self, collection: &str) -> ApiResult<Vec<Item>> {
        debug!("Listing {collection}");
        let url = format!("{}?limit=-1", self.items_url(collection));
        let response = self.send(Method::GET, &url, None).await?;
        Self::decode(response).await
    }

    async fn update_item(
        &self,
        collection: &str,
        id: &ItemId,
        patch: Map<String, Value>,
    ) -> ApiResult<Item> {
        debug!("Updating {collection}/{id} ({} fields)", patch.len());
        let url = self.item_url(collection, id);
        let body = Value::Object(patch);
        let response = self.send(Method::PATCH, &url, Some(&body)).await?;
        let item = Self::decode(response).await?;
        info!("Updated {collection}/{id}");
        Ok(item)
    }
}
