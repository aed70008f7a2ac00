//! HTTP client for the Strava API.
//!
//! This module provides:
//! - The authorization URL and redirect parsing for the OAuth code flow
//! - Token exchange and refresh against the OAuth token endpoint
//! - Paged activity listing with bearer authorization
//!
//! A 401 from the activity endpoint is reported as
//! [`HeatmapError::Unauthorized`] and never retried here. A 429 is retried
//! with exponential backoff up to [`FetchConfig::max_retries`] times.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::activity::Activity;
use crate::app::ActivitySource;
use crate::config::{FetchConfig, OAuthConfig};
use crate::error::{HeatmapError, Result};
use crate::session::{Credential, TokenEndpoint};

/// Build the URL that sends the user to Strava's consent page.
pub fn authorize_url(config: &OAuthConfig) -> Result<String> {
    let url = Url::parse_with_params(
        &config.authorize_url,
        &[
            ("client_id", config.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("approval_prompt", config.approval_prompt.as_str()),
            ("scope", config.scope.as_str()),
        ],
    )
    .map_err(|e| HeatmapError::Config {
        message: format!("Invalid authorize URL '{}': {}", config.authorize_url, e),
    })?;
    Ok(url.into())
}

/// Pull the authorization code out of the redirect back from Strava.
///
/// `Ok(None)` when the URL carries no code. A denied consent
/// (`error=access_denied`) is an exchange failure.
pub fn authorization_code_from_redirect(redirect: &str) -> Result<Option<String>> {
    let url = Url::parse(redirect).map_err(|e| HeatmapError::Config {
        message: format!("Invalid redirect URL: {}", e),
    })?;

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "error" => {
                return Err(HeatmapError::AuthExchange {
                    message: value.into_owned(),
                    status_code: None,
                })
            }
            _ => {}
        }
    }
    Ok(code)
}

/// Body for `POST /oauth/token`
#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
    grant_type: &'a str,
}

/// Response from `POST /oauth/token`
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    athlete: Option<AthleteSummary>,
}

#[derive(Debug, Deserialize)]
struct AthleteSummary {
    id: u64,
}

/// Strava error body: `{"message": "...", "errors": [...]}`
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Best human-readable message for a failed response.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("unexpected response")
                .to_string()
        })
}

/// Map an activity endpoint status to the crate error taxonomy.
fn check_activity_status(status: StatusCode, body: &str) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::UNAUTHORIZED {
        Err(HeatmapError::Unauthorized)
    } else {
        Err(HeatmapError::ActivityFetch {
            message: error_message(status, body),
            status_code: Some(status.as_u16()),
        })
    }
}

/// Which token call failed, for error mapping.
#[derive(Debug, Clone, Copy)]
enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    fn as_str(self) -> &'static str {
        match self {
            Grant::AuthorizationCode => "authorization_code",
            Grant::RefreshToken => "refresh_token",
        }
    }

    fn error(self, message: String, status_code: Option<u16>) -> HeatmapError {
        match self {
            Grant::AuthorizationCode => HeatmapError::AuthExchange { message, status_code },
            Grant::RefreshToken => HeatmapError::AuthRefresh { message, status_code },
        }
    }
}

/// Strava API client: token endpoint and activity source.
#[derive(Debug, Clone)]
pub struct StravaClient {
    client: Client,
    oauth: OAuthConfig,
    fetch: FetchConfig,
}

impl StravaClient {
    /// Create a client for the given OAuth application.
    pub fn new(oauth: OAuthConfig, fetch: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(fetch.timeout_secs))
            .build()
            .map_err(|e| HeatmapError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, oauth, fetch })
    }

    pub fn oauth(&self) -> &OAuthConfig {
        &self.oauth
    }

    async fn post_token(&self, grant: Grant, secret: &str) -> Result<Credential> {
        let body = TokenRequest {
            client_id: &self.oauth.client_id,
            client_secret: &self.oauth.client_secret,
            code: matches!(grant, Grant::AuthorizationCode).then_some(secret),
            refresh_token: matches!(grant, Grant::RefreshToken).then_some(secret),
            grant_type: grant.as_str(),
        };

        let start = Instant::now();
        let resp = self
            .client
            .post(&self.oauth.token_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| grant.error(format!("Request error: {}", e), None))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| grant.error(format!("Body download error: {}", e), Some(status.as_u16())))?;

        if !status.is_success() {
            warn!("[StravaClient] {} grant rejected: HTTP {}", grant.as_str(), status);
            return Err(grant.error(error_message(status, &text), Some(status.as_u16())));
        }

        let token: TokenResponse = serde_json::from_str(&text).map_err(|e| {
            grant.error(format!("JSON parse error: {}", e), Some(status.as_u16()))
        })?;

        info!(
            "[StravaClient] {} grant ok in {:?} (athlete={:?}, expires_at={:?})",
            grant.as_str(),
            start.elapsed(),
            token.athlete.as_ref().map(|a| a.id),
            token.expires_at
        );
        Ok(Credential::new(token.access_token, token.refresh_token))
    }

    /// Fetch one page of the athlete's activities (pages start at 1).
    ///
    /// Rate-limited responses are retried after a backoff; every other
    /// status is mapped once.
    pub async fn list_activities(&self, access_token: &str, page: u32) -> Result<Vec<Activity>> {
        let url = format!("{}/athlete/activities", self.fetch.api_base_url);
        let mut retries = 0;

        loop {
            let req_start = Instant::now();
            let resp = self
                .client
                .get(&url)
                .bearer_auth(access_token)
                .query(&[("page", page), ("per_page", self.fetch.per_page)])
                .send()
                .await
                .map_err(|e| HeatmapError::ActivityFetch {
                    message: format!("Request error: {}", e),
                    status_code: None,
                })?;

            let status = resp.status();
            let headers_elapsed = req_start.elapsed();

            if status == StatusCode::TOO_MANY_REQUESTS && retries < self.fetch.max_retries {
                retries += 1;
                let wait = backoff_delay(self.fetch.retry_backoff_ms, retries);
                warn!(
                    "[StravaClient] page {} got 429 after {:?}, retry {} with {:?} backoff",
                    page, headers_elapsed, retries, wait
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let bytes = resp.bytes().await.map_err(|e| HeatmapError::ActivityFetch {
                message: format!("Body download error: {}", e),
                status_code: Some(status.as_u16()),
            })?;

            check_activity_status(status, &String::from_utf8_lossy(&bytes))?;

            let activities: Vec<Activity> =
                serde_json::from_slice(&bytes).map_err(|e| HeatmapError::ActivityFetch {
                    message: format!("JSON parse error: {}", e),
                    status_code: Some(status.as_u16()),
                })?;

            debug!(
                "[StravaClient] page {} headers={:?} total={:?} body={:.1}KB activities={}",
                page,
                headers_elapsed,
                req_start.elapsed(),
                bytes.len() as f64 / 1024.0,
                activities.len()
            );
            return Ok(activities);
        }
    }
}

/// Backoff before the `retry`-th retry: base, 2x, 4x, then 8x at most.
fn backoff_delay(base_ms: u64, retry: u32) -> Duration {
    let shift = retry.saturating_sub(1).min(3);
    Duration::from_millis(base_ms.saturating_mul(1 << shift))
}

/// Pull pages 1..=`max_pages` (at least one), stopping after the first
/// page shorter than `per_page`. The first error aborts the walk.
async fn collect_pages<T, F, Fut>(max_pages: u32, per_page: u32, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<T>>>,
{
    let mut all = Vec::new();
    for page in 1..=max_pages.max(1) {
        let batch = fetch_page(page).await?;
        let short_page = (batch.len() as u32) < per_page;
        all.extend(batch);
        if short_page {
            break;
        }
    }
    Ok(all)
}

#[async_trait(?Send)]
impl TokenEndpoint for StravaClient {
    async fn exchange_code(&self, code: &str) -> Result<Credential> {
        self.post_token(Grant::AuthorizationCode, code).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<Credential> {
        self.post_token(Grant::RefreshToken, refresh_token).await
    }
}

#[async_trait(?Send)]
impl ActivitySource for StravaClient {
    /// All pages up to `max_pages`, stopping early on a short page.
    async fn fetch_activities(&self, credential: &Credential) -> Result<Vec<Activity>> {
        let start = Instant::now();
        let all = collect_pages(self.fetch.max_pages, self.fetch.per_page, |page| {
            self.list_activities(&credential.access_token, page)
        })
        .await?;

        info!(
            "[StravaClient] Fetched {} activities in {:?}",
            all.len(),
            start.elapsed()
        );
        Ok(all)
    }
}
