//! Unified error handling for the strava-heatmap library.
//!
//! Every failure the orchestrator can observe is one variant of
//! [`HeatmapError`]. An expired access token is its own variant
//! ([`HeatmapError::Unauthorized`]) so callers can match on it instead of
//! inspecting messages.

use thiserror::Error;

use crate::polyline::PolylineError;

/// Unified error type for strava-heatmap operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HeatmapError {
    /// The token endpoint rejected an authorization code.
    #[error("{}", http_message("Authorization failed", .status_code, .message))]
    AuthExchange {
        message: String,
        status_code: Option<u16>,
    },
    /// The token endpoint rejected a refresh token. The session is over.
    #[error("{}", http_message("Token refresh failed", .status_code, .message))]
    AuthRefresh {
        message: String,
        status_code: Option<u16>,
    },
    /// An authorized request was answered with 401.
    #[error("Access token rejected (HTTP 401)")]
    Unauthorized,
    /// Fetching activities failed for a reason other than authorization.
    #[error("{}", http_message("Activity fetch failed", .status_code, .message))]
    ActivityFetch {
        message: String,
        status_code: Option<u16>,
    },
    /// No credential is available and none can be obtained without the user.
    #[error("Not authenticated")]
    NotAuthenticated,
    /// An activity's polyline could not be decoded.
    #[error("Activity '{activity_id}' has a malformed polyline: {source}")]
    Polyline {
        activity_id: String,
        #[source]
        source: PolylineError,
    },
    /// Credential store read/write error
    #[error("Credential store error: {message}")]
    Store { message: String },
    /// The renderer could not draw or write the layer
    #[error("Render error: {message}")]
    Render { message: String },
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

fn http_message(prefix: &str, status_code: &Option<u16>, message: &str) -> String {
    match status_code {
        Some(code) => format!("{} (HTTP {}): {}", prefix, code, message),
        None => format!("{}: {}", prefix, message),
    }
}

impl HeatmapError {
    /// True when the error means the access token has expired or was revoked.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, HeatmapError::Unauthorized)
    }

    pub(crate) fn store(e: impl std::fmt::Display) -> Self {
        HeatmapError::Store { message: e.to_string() }
    }

    pub(crate) fn render(e: impl std::fmt::Display) -> Self {
        HeatmapError::Render { message: e.to_string() }
    }
}

/// Result type alias for strava-heatmap operations.
pub type Result<T> = std::result::Result<T, HeatmapError>;
