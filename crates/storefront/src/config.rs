//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `SUPABASE_URL` - Supabase project URL (e.g., `https://abcd.supabase.co`)
//! - `SUPABASE_PUBLISHABLE_KEY` - Publishable (anon) API key, falls back to
//!   `SUPABASE_ANON_KEY`
//!
//! ## Optional
//! - `STOREFRONT_BASE_URL` - Redirect target for magic links and OAuth
//!   (default: `http://localhost:5173/`)
//! - `STOREFRONT_DATA_DIR` - Local storage directory (default: `.dulcenube`)
//! - `STORE_NAME` - Store display name (default: `DulceNube`)
//! - `STORE_CURRENCY` - ISO currency code (default: `MXN`)
//! - `STORE_LOCALE` - Display locale (default: `es-MX`)
//! - `WHATSAPP_PHONE` - Order hand-off phone number (default: `525512345678`)
//! - `SUPPORT_EMAIL` - Support address (default: `soporte@dulcenube.com`)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::path::PathBuf;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use dulcenube_core::{CurrencyCode, Email};

use crate::catalog::StoreInfo;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_BASE_URL: &str = "http://localhost:5173/";
const DEFAULT_DATA_DIR: &str = ".dulcenube";
const DEFAULT_STORE_NAME: &str = "DulceNube";
const DEFAULT_CURRENCY: &str = "MXN";
const DEFAULT_LOCALE: &str = "es-MX";
const DEFAULT_WHATSAPP_PHONE: &str = "525512345678";
const DEFAULT_SUPPORT_EMAIL: &str = "soporte@dulcenube.com";

/// Prefix of Supabase secret keys, which must never ship in a client.
const SECRET_KEY_PREFIX: &str = "sb_secret_";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "your_",
    "changeme",
    "replace",
    "placeholder",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure key in {0}: {1}")]
    InsecureKey(String, String),
}

/// Storefront configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Supabase project connection
    pub supabase: SupabaseConfig,
    /// Storefront URL that auth redirects return to
    pub base_url: Url,
    /// Directory holding local storage files
    pub data_dir: PathBuf,
    /// Store name, currency and locale
    pub store: StoreInfo,
    /// Digits-only phone number for WhatsApp links
    pub whatsapp_phone: String,
    /// Support address for `mailto:` links
    pub support_email: Email,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Supabase project configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct SupabaseConfig {
    /// Project URL
    pub url: Url,
    /// Publishable (anon) API key
    pub api_key: SecretString,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl SupabaseConfig {
    #[must_use]
    pub fn new(url: Url, api_key: impl Into<String>) -> Self {
        Self {
            url,
            api_key: SecretString::from(api_key.into()),
        }
    }

    /// Project reference: the first label of the project host.
    #[must_use]
    pub fn project_ref(&self) -> &str {
        self.url
            .host_str()
            .and_then(|host| host.split('.').next())
            .unwrap_or("local")
    }

    /// Local storage key of the persisted auth session.
    #[must_use]
    pub fn session_storage_key(&self) -> String {
        format!("sb-{}-auth-token", self.project_ref())
    }

    /// Origin string used to scope local storage.
    #[must_use]
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the API key fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`StorefrontConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let supabase_url = env.required("SUPABASE_URL")?;
        let url = parse_url("SUPABASE_URL", &supabase_url)?;

        let (key_var, api_key) = env
            .optional("SUPABASE_PUBLISHABLE_KEY")
            .map(|key| ("SUPABASE_PUBLISHABLE_KEY", key))
            .or_else(|| {
                env.optional("SUPABASE_ANON_KEY")
                    .map(|key| ("SUPABASE_ANON_KEY", key))
            })
            .ok_or_else(|| ConfigError::MissingEnvVar("SUPABASE_PUBLISHABLE_KEY".to_string()))?;
        validate_api_key(&api_key, key_var)?;

        let base_url = parse_url(
            "STOREFRONT_BASE_URL",
            &env.or_default("STOREFRONT_BASE_URL", DEFAULT_BASE_URL),
        )?;

        let currency = env
            .or_default("STORE_CURRENCY", DEFAULT_CURRENCY)
            .parse::<CurrencyCode>()
            .map_err(|e| ConfigError::InvalidEnvVar("STORE_CURRENCY".to_string(), e))?;

        let whatsapp_phone = normalize_phone(&env.or_default("WHATSAPP_PHONE", DEFAULT_WHATSAPP_PHONE))
            .ok_or_else(|| {
                ConfigError::InvalidEnvVar(
                    "WHATSAPP_PHONE".to_string(),
                    "must contain only digits, spaces, dashes and a leading +".to_string(),
                )
            })?;

        let support_email = Email::parse(&env.or_default("SUPPORT_EMAIL", DEFAULT_SUPPORT_EMAIL))
            .map_err(|e| ConfigError::InvalidEnvVar("SUPPORT_EMAIL".to_string(), e.to_string()))?;

        Ok(Self {
            supabase: SupabaseConfig {
                url,
                api_key: SecretString::from(api_key),
            },
            base_url,
            data_dir: PathBuf::from(env.or_default("STOREFRONT_DATA_DIR", DEFAULT_DATA_DIR)),
            store: StoreInfo {
                name: env.or_default("STORE_NAME", DEFAULT_STORE_NAME),
                currency,
                locale: env.or_default("STORE_LOCALE", DEFAULT_LOCALE),
            },
            whatsapp_phone,
            support_email,
            sentry_dsn: env.optional("SENTRY_DSN"),
            sentry_environment: env.optional("SENTRY_ENVIRONMENT"),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Variable lookup that treats blank values as unset.
struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }
}

fn parse_url(var_name: &str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidEnvVar(var_name.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidEnvVar(
            var_name.to_string(),
            "must be an http(s) URL with a host".to_string(),
        ));
    }
    Ok(url)
}

/// Strip `+`, spaces and dashes; `None` if anything else remains.
fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-'))
        .collect();
    (!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())).then_some(digits)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that the API key is a publishable key with real-looking content.
fn validate_api_key(key: &str, var_name: &str) -> Result<(), ConfigError> {
    if key.starts_with(SECRET_KEY_PREFIX) || is_service_role_jwt(key) {
        return Err(ConfigError::InsecureKey(
            var_name.to_string(),
            "secret/service-role keys must not be used by the storefront".to_string(),
        ));
    }

    let lower = key.to_lowercase();
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureKey(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(key);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureKey(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Copy the key from the project settings."
            ),
        ));
    }

    Ok(())
}

/// Whether `key` is a legacy JWT key carrying `"role": "service_role"`.
fn is_service_role_jwt(key: &str) -> bool {
    key.split('.')
        .nth(1)
        .and_then(|payload| URL_SAFE_NO_PAD.decode(payload).ok())
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
        .and_then(|claims| {
            claims
                .get("role")
                .and_then(serde_json::Value::as_str)
                .map(|role| role == "service_role")
        })
        .unwrap_or(false)
}

/// Expose the API key for request headers.
pub(crate) fn api_key(config: &SupabaseConfig) -> &str {
    config.api_key.expose_secret()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const KEY: &str = "sb_publishable_Qm9Zx7Lk2Rt5Vw8Yp3Hn6Jd";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn jwt_with_role(role: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(
            r#"{{"iss":"supabase","ref":"abcd","role":"{role}","iat":1700000000}}"#
        ));
        format!("{header}.{payload}.c2lnbmF0dXJlLWJ5dGVz")
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = StorefrontConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://abcd.supabase.co"),
            ("SUPABASE_PUBLISHABLE_KEY", KEY),
        ]))
        .unwrap();

        assert_eq!(config.supabase.project_ref(), "abcd");
        assert_eq!(config.supabase.session_storage_key(), "sb-abcd-auth-token");
        assert_eq!(config.base_url.as_str(), "http://localhost:5173/");
        assert_eq!(config.data_dir, PathBuf::from(".dulcenube"));
        assert_eq!(config.store.name, "DulceNube");
        assert_eq!(config.store.currency, CurrencyCode::MXN);
        assert_eq!(config.store.locale, "es-MX");
        assert_eq!(config.whatsapp_phone, "525512345678");
        assert_eq!(config.support_email.as_str(), "soporte@dulcenube.com");
        assert!(config.sentry_dsn.is_none());
    }

    #[test]
    fn test_anon_key_fallback() {
        let anon = jwt_with_role("anon");
        let config = StorefrontConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://abcd.supabase.co"),
            ("SUPABASE_ANON_KEY", anon.as_str()),
        ]))
        .unwrap();
        assert_eq!(config.supabase.api_key.expose_secret(), anon);
    }

    #[test]
    fn test_missing_required_vars() {
        let err = StorefrontConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "SUPABASE_URL"));

        let err = StorefrontConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://abcd.supabase.co"),
            ("SUPABASE_PUBLISHABLE_KEY", "   "),
        ]))
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingEnvVar(ref v) if v == "SUPABASE_PUBLISHABLE_KEY")
        );
    }

    #[test]
    fn test_invalid_url() {
        let err = StorefrontConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "abcd.supabase.co"),
            ("SUPABASE_PUBLISHABLE_KEY", KEY),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref v, _) if v == "SUPABASE_URL"));
    }

    #[test]
    fn test_rejects_secret_keys() {
        assert!(matches!(
            validate_api_key("sb_secret_Qm9Zx7Lk2Rt5Vw8Yp3Hn6Jd", "K"),
            Err(ConfigError::InsecureKey(_, _))
        ));
        assert!(validate_api_key(&jwt_with_role("service_role"), "K").is_err());
        assert!(validate_api_key(&jwt_with_role("anon"), "K").is_ok());
    }

    #[test]
    fn test_rejects_placeholder_and_low_entropy_keys() {
        assert!(validate_api_key("your-anon-key-here", "K").is_err());
        assert!(validate_api_key("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "K").is_err());
        assert!(validate_api_key(KEY, "K").is_ok());
    }

    #[test]
    fn test_shannon_entropy() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("ab") - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_phone_normalization() {
        assert_eq!(normalize_phone("+52 55-1234-5678").as_deref(), Some("525512345678"));
        assert_eq!(normalize_phone("55 12 abc"), None);
        assert_eq!(normalize_phone("+"), None);
    }

    #[test]
    fn test_invalid_currency_and_email() {
        let err = StorefrontConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://abcd.supabase.co"),
            ("SUPABASE_PUBLISHABLE_KEY", KEY),
            ("STORE_CURRENCY", "ARS"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref v, _) if v == "STORE_CURRENCY"));

        let err = StorefrontConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://abcd.supabase.co"),
            ("SUPABASE_PUBLISHABLE_KEY", KEY),
            ("SUPPORT_EMAIL", "soporte"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref v, _) if v == "SUPPORT_EMAIL"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = SupabaseConfig::new(Url::parse("https://abcd.supabase.co").unwrap(), KEY);
        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("abcd.supabase.co"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains(KEY));
    }

    #[test]
    fn test_local_project_ref() {
        let config = SupabaseConfig::new(Url::parse("http://127.0.0.1:54321").unwrap(), KEY);
        assert_eq!(config.project_ref(), "127");
        assert_eq!(config.origin(), "http://127.0.0.1:54321");
    }
}
