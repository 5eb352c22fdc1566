//! Auth artifacts carried by a redirect URL.
//!
//! After a magic link or social sign-in the backend sends the shopper back to
//! the storefront with one of:
//!
//! - `?code=...` in the query string (PKCE flow),
//! - `#/route?code=...` inside a hash-routed fragment,
//! - `#access_token=...&refresh_token=...` in the fragment (implicit flow).
//!
//! Error redirects carry `error` and `error_description` the same way.

use url::Url;
use url::form_urlencoded;

/// Parameters removed from the visible URL once the redirect is handled.
pub const OAUTH_PARAMS: [&str; 11] = [
    "code",
    "state",
    "error",
    "error_code",
    "error_description",
    "access_token",
    "refresh_token",
    "expires_in",
    "expires_at",
    "provider_token",
    "token_type",
];

/// An access/refresh token pair from the fragment.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Error reported by the auth server through the redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectError {
    pub error: String,
    pub error_code: Option<String>,
    pub description: Option<String>,
}

/// What a redirect URL carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectArtifacts {
    pub code: Option<String>,
    pub tokens: Option<TokenPair>,
    pub error: Option<RedirectError>,
}

impl RedirectArtifacts {
    /// Whether the URL carries anything auth-related.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.code.is_none() && self.tokens.is_none() && self.error.is_none()
    }
}

/// The raw parameter string embedded in a fragment, if any.
///
/// `#/route?a=1` yields `a=1`; `#a=1&b=2` yields the whole fragment; a plain
/// route such as `#/carrito` yields nothing.
fn fragment_params(fragment: &str) -> Option<&str> {
    if let Some((_, params)) = fragment.split_once('?') {
        return Some(params);
    }
    (!fragment.starts_with('/') && fragment.contains('=')).then_some(fragment)
}

/// Decoded `(key, value)` pairs of a raw parameter string.
fn decode_pairs(raw: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v.as_str())
}

fn redirect_error(pairs: &[(String, String)]) -> Option<RedirectError> {
    let error = lookup(pairs, "error")?;
    Some(RedirectError {
        error: error.to_string(),
        error_code: lookup(pairs, "error_code").map(str::to_string),
        description: lookup(pairs, "error_description").map(str::to_string),
    })
}

/// Find the auth artifacts in `url`.
///
/// The code is taken from the query string first, then from the fragment.
/// Tokens are only read from the fragment and only as a complete pair.
#[must_use]
pub fn inspect(url: &Url) -> RedirectArtifacts {
    let query = url.query().map(decode_pairs).unwrap_or_default();
    let fragment = url
        .fragment()
        .and_then(fragment_params)
        .map(decode_pairs)
        .unwrap_or_default();

    let code = lookup(&query, "code")
        .or_else(|| lookup(&fragment, "code"))
        .map(str::to_string);

    let tokens = lookup(&fragment, "access_token")
        .zip(lookup(&fragment, "refresh_token"))
        .map(|(access, refresh)| TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        });

    let error = redirect_error(&query).or_else(|| redirect_error(&fragment));

    RedirectArtifacts {
        code,
        tokens,
        error,
    }
}

/// Whether a raw `key=value` segment names an auth parameter.
fn is_oauth_segment(segment: &str) -> bool {
    form_urlencoded::parse(segment.as_bytes())
        .next()
        .is_some_and(|(key, _)| OAUTH_PARAMS.contains(&key.as_ref()))
}

/// Drop auth segments from a raw parameter string, keeping the others
/// byte-for-byte and in order. A string without auth segments is returned
/// unchanged; otherwise empty segments are dropped along with them.
fn strip_params(raw: &str) -> String {
    if !raw.split('&').any(is_oauth_segment) {
        return raw.to_string();
    }
    raw.split('&')
        .filter(|segment| !segment.is_empty() && !is_oauth_segment(segment))
        .collect::<Vec<_>>()
        .join("&")
}

/// Return `url` with every auth parameter removed from the query string and
/// the fragment. An emptied query or fragment is removed entirely.
#[must_use]
pub fn scrub(url: &Url) -> Url {
    let mut scrubbed = url.clone();

    if let Some(query) = url.query() {
        let kept = strip_params(query);
        if kept != query {
            scrubbed.set_query((!kept.is_empty()).then_some(kept.as_str()));
        }
    }

    if let Some(fragment) = url.fragment() {
        let rewritten = match fragment.split_once('?') {
            Some((route, params)) => {
                let kept = strip_params(params);
                if kept.is_empty() {
                    route.to_string()
                } else {
                    format!("{route}?{kept}")
                }
            }
            None if fragment_params(fragment).is_some() => strip_params(fragment),
            None => fragment.to_string(),
        };
        if rewritten != fragment {
            scrubbed.set_fragment((!rewritten.is_empty()).then_some(rewritten.as_str()));
        }
    }

    scrubbed
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_code_in_query() {
        let u = url("http://localhost:5173/?code=ABC123");
        let artifacts = inspect(&u);
        assert_eq!(artifacts.code.as_deref(), Some("ABC123"));
        assert!(artifacts.tokens.is_none());
        assert_eq!(scrub(&u).as_str(), "http://localhost:5173/");
    }

    #[test]
    fn test_code_in_hash_route() {
        let u = url("http://localhost:5173/#/carrito?code=xyz&ref=promo%20verano");
        assert_eq!(inspect(&u).code.as_deref(), Some("xyz"));
        assert_eq!(
            scrub(&u).as_str(),
            "http://localhost:5173/#/carrito?ref=promo%20verano"
        );
    }

    #[test]
    fn test_query_code_wins_over_fragment_code() {
        let u = url("http://localhost:5173/?code=from-query#/cuenta?code=from-hash");
        assert_eq!(inspect(&u).code.as_deref(), Some("from-query"));
        assert_eq!(scrub(&u).as_str(), "http://localhost:5173/#/cuenta");
    }

    #[test]
    fn test_token_pair_in_fragment() {
        let u = url(
            "http://localhost:5173/#access_token=T1&refresh_token=T2&expires_in=3600&token_type=bearer&tab=pedidos",
        );
        let artifacts = inspect(&u);
        assert_eq!(
            artifacts.tokens,
            Some(TokenPair {
                access_token: "T1".to_string(),
                refresh_token: "T2".to_string(),
            })
        );
        assert_eq!(scrub(&u).as_str(), "http://localhost:5173/#tab=pedidos");
    }

    #[test]
    fn test_token_pair_in_hash_route() {
        let u = url("http://localhost:5173/#/cuenta?access_token=T1&refresh_token=T2");
        assert!(inspect(&u).tokens.is_some());
        assert_eq!(scrub(&u).as_str(), "http://localhost:5173/#/cuenta");
    }

    #[test]
    fn test_incomplete_token_pair_is_ignored() {
        let u = url("http://localhost:5173/#access_token=T1");
        assert!(inspect(&u).tokens.is_none());
        assert_eq!(scrub(&u).as_str(), "http://localhost:5173/");
    }

    #[test]
    fn test_tokens_in_query_are_not_installed() {
        let u = url("http://localhost:5173/?access_token=T1&refresh_token=T2");
        assert!(inspect(&u).tokens.is_none());
        assert_eq!(scrub(&u).as_str(), "http://localhost:5173/");
    }

    #[test]
    fn test_unrelated_params_keep_exact_text_and_order() {
        let u = url("https://dulcenube.com/tienda?utm_source=ig&code=1&q=pan+dulce&x=%C3%B1#sec");
        assert_eq!(
            scrub(&u).as_str(),
            "https://dulcenube.com/tienda?utm_source=ig&q=pan+dulce&x=%C3%B1#sec"
        );
    }

    #[test]
    fn test_empty_segments_survive_when_nothing_is_scrubbed() {
        for s in [
            "http://localhost:5173/productos?a=1&&b=2",
            "http://localhost:5173/productos?",
            "http://localhost:5173/#/catalogo?a=1&&b=2",
        ] {
            assert_eq!(scrub(&url(s)).as_str(), s);
        }

        let u = url("http://localhost:5173/productos?a=1&&code=X&b=2");
        assert_eq!(scrub(&u).as_str(), "http://localhost:5173/productos?a=1&b=2");
    }

    #[test]
    fn test_encoded_keys_are_scrubbed() {
        let u = url("http://localhost:5173/?%63ode=ABC&keep=1");
        assert_eq!(inspect(&u).code.as_deref(), Some("ABC"));
        assert_eq!(scrub(&u).as_str(), "http://localhost:5173/?keep=1");
    }

    #[test]
    fn test_redirect_error() {
        let u = url(
            "http://localhost:5173/#error=access_denied&error_code=otp_expired&error_description=Email+link+is+invalid",
        );
        let artifacts = inspect(&u);
        assert_eq!(
            artifacts.error,
            Some(RedirectError {
                error: "access_denied".to_string(),
                error_code: Some("otp_expired".to_string()),
                description: Some("Email link is invalid".to_string()),
            })
        );
        assert_eq!(scrub(&u).as_str(), "http://localhost:5173/");
    }

    #[test]
    fn test_plain_urls_are_untouched() {
        for s in [
            "http://localhost:5173/",
            "http://localhost:5173/#/carrito",
            "http://localhost:5173/productos?categoria=pasteles#top",
        ] {
            let u = url(s);
            assert!(inspect(&u).is_empty());
            assert_eq!(scrub(&u).as_str(), s);
        }
    }

    #[test]
    fn test_empty_code_is_absent() {
        let u = url("http://localhost:5173/?code=&a=1");
        assert!(inspect(&u).code.is_none());
        assert_eq!(scrub(&u).as_str(), "http://localhost:5173/?a=1");
    }

    #[test]
    fn test_token_pair_debug_is_redacted() {
        let pair = TokenPair {
            access_token: "secret-access".to_string(),
            refresh_token: "secret-refresh".to_string(),
        };
        assert!(!format!("{pair:?}").contains("secret"));
    }
}
