//! Supabase clients: GoTrue auth and PostgREST data access.
//!
//! # Architecture
//!
//! - Thin passthrough over the hosted REST endpoints using `reqwest`
//! - The backend is the source of truth; the only client-side state is the
//!   persisted auth session (local storage) and the current session in memory
//! - Session changes are published on a `tokio::sync::broadcast` channel
//!
//! # Example
//!
//! ```rust,ignore
//! use dulcenube_storefront::supabase::{AuthClient, RestClient};
//!
//! let auth = AuthClient::new(&config.supabase, local_storage);
//! let session = auth.get_session().await?;
//!
//! let rest = RestClient::new(&config.supabase);
//! let categories: Vec<CategoryRow> = rest
//!     .table("categories")
//!     .select("id,name,slug,emoji,sort_order")
//!     .order("sort_order", true)
//!     .fetch_all()
//!     .await?;
//! ```

pub mod auth;
pub mod rest;
pub mod types;

pub use auth::AuthClient;
pub use rest::{QueryBuilder, RestClient};
pub use types::*;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur when talking to Supabase.
#[derive(Debug, Error)]
pub enum SupabaseError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API error ({status}){}: {message}", .code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Endpoint URL could not be built.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Row not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by the backend.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Auth flow could not proceed (missing verifier, no session, ...).
    #[error("Auth error: {0}")]
    Auth(String),

    /// Persisting the session failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SupabaseError {
    /// Backend error code, if the API returned one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// HTTP status of an API error.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Error body returned by PostgREST or GoTrue.
///
/// PostgREST: `{"code","message","details","hint"}`.
/// GoTrue: `{"code": 400, "error_code", "msg"}` or the OAuth form
/// `{"error","error_description"}`.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    code: Option<serde_json::Value>,
    error_code: Option<String>,
    message: Option<String>,
    msg: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    details: Option<String>,
}

impl ApiErrorBody {
    fn into_error(self, status: u16, raw: &str) -> SupabaseError {
        let code = self.error_code.or_else(|| match self.code {
            Some(serde_json::Value::String(s)) => Some(s),
            _ => None,
        });
        let code = code.or_else(|| self.error.clone());
        let message = self
            .message
            .or(self.msg)
            .or(self.error_description)
            .or(self.error)
            .or(self.details)
            .unwrap_or_else(|| raw.chars().take(200).collect());

        SupabaseError::Api {
            status,
            code,
            message,
        }
    }
}

/// Check status and rate limiting, returning the body text of a successful
/// response.
async fn response_text(response: reqwest::Response) -> Result<String, SupabaseError> {
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1);
        return Err(SupabaseError::RateLimited(retry_after));
    }

    let text = response.text().await?;

    if !status.is_success() {
        tracing::debug!(
            status = %status,
            body = %text.chars().take(500).collect::<String>(),
            "Supabase returned non-success status"
        );
        let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();
        return Err(body.into_error(status.as_u16(), &text));
    }

    Ok(text)
}

/// Read and deserialize a JSON response.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, SupabaseError> {
    let text = response_text(response).await?;
    serde_json::from_str(&text).map_err(|e| {
        tracing::error!(
            error = %e,
            body = %text.chars().take(500).collect::<String>(),
            "Failed to parse Supabase response"
        );
        SupabaseError::Parse(e)
    })
}

/// Read a response whose body is not needed.
pub(crate) async fn read_empty(response: reqwest::Response) -> Result<(), SupabaseError> {
    response_text(response).await.map(|_| ())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(raw: &str, status: u16) -> SupabaseError {
        let body: ApiErrorBody = serde_json::from_str(raw).unwrap_or_default();
        body.into_error(status, raw)
    }

    #[test]
    fn test_postgrest_error_body() {
        let err = parse(
            r#"{"code":"23505","message":"duplicate key value","details":null,"hint":null}"#,
            409,
        );
        assert_eq!(err.code(), Some("23505"));
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.to_string(), "API error (409) [23505]: duplicate key value");
    }

    #[test]
    fn test_gotrue_error_body() {
        let err = parse(
            r#"{"code":400,"error_code":"bad_code_verifier","msg":"code challenge does not match"}"#,
            400,
        );
        assert_eq!(err.code(), Some("bad_code_verifier"));
        assert!(err.to_string().contains("code challenge does not match"));
    }

    #[test]
    fn test_oauth_error_body() {
        let err = parse(
            r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token"}"#,
            400,
        );
        assert_eq!(err.code(), Some("invalid_grant"));
        assert!(err.to_string().ends_with("Invalid Refresh Token"));
    }

    #[test]
    fn test_unparseable_error_body_keeps_raw_text() {
        let err = parse("upstream timeout", 504);
        assert_eq!(err.code(), None);
        assert_eq!(err.to_string(), "API error (504): upstream timeout");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            SupabaseError::NotFound("products".to_string()).to_string(),
            "Not found: products"
        );
        assert_eq!(
            SupabaseError::RateLimited(30).to_string(),
            "Rate limited, retry after 30 seconds"
        );
    }
}
