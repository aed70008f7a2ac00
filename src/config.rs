//! Client configuration.
//!
//! OAuth application settings come from the environment (the client secret
//! never lives in code). Everything else has defaults matching the public
//! Strava endpoints.

use std::env;

use crate::error::{HeatmapError, Result};

/// Strava's OAuth authorization page.
pub const STRAVA_AUTHORIZE_URL: &str = "https://www.strava.com/oauth/authorize";
/// Strava's token exchange/refresh endpoint.
pub const STRAVA_TOKEN_URL: &str = "https://www.strava.com/oauth/token";
/// Base URL for the Strava v3 REST API.
pub const STRAVA_API_BASE_URL: &str = "https://www.strava.com/api/v3";

/// OAuth application settings.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Requested scope. Default: "activity:read"
    pub scope: String,
    /// "force" to always show the consent screen, "auto" to skip it when
    /// already granted. Default: "force"
    pub approval_prompt: String,
    pub authorize_url: String,
    pub token_url: String,
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("approval_prompt", &self.approval_prompt)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

impl OAuthConfig {
    /// Settings for the given application, with default scope and endpoints.
    pub fn new(client_id: &str, client_secret: &str, redirect_uri: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
            scope: "activity:read".to_string(),
            approval_prompt: "force".to_string(),
            authorize_url: STRAVA_AUTHORIZE_URL.to_string(),
            token_url: STRAVA_TOKEN_URL.to_string(),
        }
    }

    /// Read `STRAVA_CLIENT_ID`, `STRAVA_CLIENT_SECRET` and
    /// `STRAVA_REDIRECT_URI`. The unprefixed names are accepted as fallbacks.
    /// `STRAVA_SCOPE` optionally overrides the scope.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(&format!("STRAVA_{}", key))
                .or_else(|| lookup(key))
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| HeatmapError::Config {
                    message: format!("STRAVA_{} is not set", key),
                })
        };

        let mut config = Self::new(
            &required("CLIENT_ID")?,
            &required("CLIENT_SECRET")?,
            &required("REDIRECT_URI")?,
        );
        if let Some(scope) = lookup("STRAVA_SCOPE").filter(|v| !v.trim().is_empty()) {
            config.scope = scope;
        }
        Ok(config)
    }
}

/// Settings for listing activities.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    pub api_base_url: String,
    /// Activities per page. Strava allows up to 200. Default: 30
    pub per_page: u32,
    /// Stop after this many pages even if more exist. Default: 1
    pub max_pages: u32,
    /// Per-request timeout in seconds. Default: 30
    pub timeout_secs: u64,
    /// Retries of a page answered with 429. Default: 3
    pub max_retries: u32,
    /// First 429 backoff in milliseconds, doubled per retry up to 8x. Default: 500
    pub retry_backoff_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_base_url: STRAVA_API_BASE_URL.to_string(),
            per_page: 30,
            max_pages: 1,
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_prefixed() {
        let config = OAuthConfig::from_lookup(lookup_from(&[
            ("STRAVA_CLIENT_ID", "123"),
            ("STRAVA_CLIENT_SECRET", "s3cret"),
            ("STRAVA_REDIRECT_URI", "http://localhost:8080/"),
        ]))
        .unwrap();

        assert_eq!(config.client_id, "123");
        assert_eq!(config.scope, "activity:read");
        assert_eq!(config.approval_prompt, "force");
        assert_eq!(config.token_url, STRAVA_TOKEN_URL);
    }

    #[test]
    fn test_from_lookup_unprefixed_fallback() {
        let config = OAuthConfig::from_lookup(lookup_from(&[
            ("CLIENT_ID", "123"),
            ("CLIENT_SECRET", "s3cret"),
            ("REDIRECT_URI", "http://localhost:8080/"),
            ("STRAVA_SCOPE", "activity:read_all"),
        ]))
        .unwrap();

        assert_eq!(config.client_secret, "s3cret");
        assert_eq!(config.scope, "activity:read_all");
    }

    #[test]
    fn test_from_lookup_missing_key() {
        let err = OAuthConfig::from_lookup(lookup_from(&[
            ("STRAVA_CLIENT_ID", "123"),
            ("STRAVA_REDIRECT_URI", "http://localhost:8080/"),
        ]))
        .unwrap_err();

        assert_eq!(
            err,
            HeatmapError::Config { message: "STRAVA_CLIENT_SECRET is not set".to_string() }
        );
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = OAuthConfig::new("123", "s3cret", "http://localhost/");
        assert!(!format!("{:?}", config).contains("s3cret"));
    }

    #[test]
    fn test_fetch_defaults() {
        let fetch = FetchConfig::default();
        assert_eq!(fetch.api_base_url, STRAVA_API_BASE_URL);
        assert_eq!((fetch.per_page, fetch.max_pages), (30, 1));
        assert_eq!((fetch.max_retries, fetch.retry_backoff_ms), (3, 500));
    }
}
