//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type for user actions (order submission,
//! sign-in, address edits). Front ends call [`AppError::report`] and show
//! [`AppError::user_message`] to the shopper.

use thiserror::Error;

use dulcenube_core::EmailError;

use crate::checkout::CheckoutError;
use crate::config::ConfigError;
use crate::storage::StorageError;
use crate::supabase::SupabaseError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Backend operation failed.
    #[error("Backend error: {0}")]
    Backend(#[from] SupabaseError),

    /// Local storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Order submission failed.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An email address was rejected.
    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not signed in.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad input from the shopper.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the error points at a fault on our side rather than the
    /// shopper's input.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        match self {
            Self::Backend(e) => !matches!(e, SupabaseError::RateLimited(_)),
            Self::Checkout(e) => e.is_backend_failure(),
            Self::Storage(_) | Self::Config(_) | Self::Internal(_) => true,
            Self::InvalidEmail(_)
            | Self::NotFound(_)
            | Self::Unauthorized(_)
            | Self::BadRequest(_) => false,
        }
    }

    /// Log the error and capture server-side faults to Sentry.
    pub fn report(&self) {
        if self.is_server_error() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Action failed"
            );
        } else {
            tracing::info!(error = %self, "Action rejected");
        }
    }

    /// Message safe to show the shopper.
    ///
    /// Internal details are never exposed.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Backend(SupabaseError::RateLimited(secs)) => {
                format!("Demasiados intentos. Intenta de nuevo en {secs} segundos.")
            }
            Self::Backend(_) => "No pudimos comunicarnos con la tienda. Intenta de nuevo.".to_string(),
            Self::Checkout(e) => e.user_message(),
            Self::InvalidEmail(_) => "Ingresa un email valido.".to_string(),
            Self::Unauthorized(_) => "Necesitas iniciar sesion para continuar.".to_string(),
            Self::NotFound(what) => format!("No encontramos {what}."),
            Self::BadRequest(msg) => msg.clone(),
            Self::Storage(_) | Self::Config(_) | Self::Internal(_) => {
                "Ocurrio un error inesperado.".to_string()
            }
        }
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Called whenever a session is published so errors are associated with the
/// signed-in shopper.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Called on sign-out to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Added item", Some(&[("key", "pastel-fresa::")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
