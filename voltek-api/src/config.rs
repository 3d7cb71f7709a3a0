//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the client authenticates against the CMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    /// No credentials; only publicly readable collections are visible.
    Public,
    /// A long-lived static token (service account).
    Static { token: String },
    /// Email/password session with automatic token refresh.
    Session { email: String, password: String },
}

impl AuthMode {
    /// Whether this mode can establish a fresh session after a rejection.
    #[must_use]
    pub fn can_reauthenticate(&self) -> bool {
        matches!(self, Self::Session { .. })
    }
}

/// Configuration for the CMS client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the CMS (e.g. `https://cms.voltek.example`).
    pub base_url: String,
    /// Authentication mode.
    pub auth: AuthMode,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8055".to_string(),
            auth: AuthMode::Public,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ApiConfig {
    /// Builds a config from the deployment environment.
    ///
    /// `VOLTEK_CMS_URL` sets the base URL. `VOLTEK_CMS_TOKEN` selects static
    /// token auth; otherwise `VOLTEK_CMS_EMAIL` plus `VOLTEK_CMS_PASSWORD`
    /// select session auth. With neither, the client reads anonymously.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("VOLTEK_CMS_URL") {
            config.base_url = url;
        }

        if let Ok(token) = std::env::var("VOLTEK_CMS_TOKEN") {
            config.auth = AuthMode::Static { token };
        } else if let (Ok(email), Ok(password)) = (
            std::env::var("VOLTEK_CMS_EMAIL"),
            std::env::var("VOLTEK_CMS_PASSWORD"),
        ) {
            config.auth = AuthMode::Session { email, password };
        }

        config
    }

    /// Base URL without a trailing slash, ready for path concatenation.
    #[must_use]
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
