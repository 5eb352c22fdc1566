//! In-process stand-in for the Supabase backend.
//!
//! [`FakeSupabase`] serves the subset of GoTrue (`/auth/v1`) and PostgREST
//! (`/rest/v1`) the storefront talks to, backed by in-memory JSON tables.
//! Tests seed rows, mint sessions and authorization codes, inject failures
//! and inspect every request the storefront made.
//!
//! Row ownership is enforced for `profiles`, `orders` and `addresses` the way
//! the production row-level security policies do: a caller only sees and
//! changes its own rows, and anonymous callers may only insert unowned rows.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use dulcenube_storefront::StorefrontConfig;
use dulcenube_storefront::config::ConfigError;

/// Publishable key the fake accepts.
pub const PUBLISHABLE_KEY: &str = "sb_publishable_Xk29fLq0PzR8vN3mT7wB";

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const TOKEN_TTL_SECS: i64 = 3600;

/// A request received by the fake.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub prefer: Option<String>,
    pub bearer: Option<String>,
    pub body: Value,
}

impl RecordedRequest {
    /// First value of query parameter `key`.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct Backend {
    tables: HashMap<String, Vec<Value>>,
    users: HashMap<String, Value>,
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    codes: HashMap<String, PendingCode>,
    otp_requests: Vec<Value>,
    failures: HashSet<(String, String)>,
    requests: Vec<RecordedRequest>,
    issued: u64,
}

struct PendingCode {
    user_id: String,
    challenge: Option<String>,
}

type Shared = Arc<Mutex<Backend>>;

fn lock(shared: &Shared) -> MutexGuard<'_, Backend> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A running fake backend. The server stops when this is dropped.
pub struct FakeSupabase {
    addr: SocketAddr,
    shared: Shared,
    server: JoinHandle<()>,
}

impl Drop for FakeSupabase {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl FakeSupabase {
    /// Bind an ephemeral port on localhost and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start() -> std::io::Result<Self> {
        let shared: Shared = Arc::default();
        let app = Router::new()
            .route("/auth/v1/token", post(token))
            .route("/auth/v1/user", get(user))
            .route("/auth/v1/otp", post(otp))
            .route("/auth/v1/logout", post(logout))
            .route("/rest/v1/{table}", any(rest))
            .with_state(Arc::clone(&shared));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Fake Supabase stopped");
            }
        });

        Ok(Self {
            addr,
            shared,
            server,
        })
    }

    /// Project URL of the fake.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Storefront configuration pointing at the fake, with local storage
    /// under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns the configuration error if the generated values are rejected.
    pub fn storefront_config(&self, data_dir: &Path) -> Result<StorefrontConfig, ConfigError> {
        let url = self.url();
        let data_dir = data_dir.display().to_string();
        StorefrontConfig::from_lookup(|key| match key {
            "SUPABASE_URL" => Some(url.clone()),
            "SUPABASE_PUBLISHABLE_KEY" => Some(PUBLISHABLE_KEY.to_string()),
            "STOREFRONT_BASE_URL" => Some("http://localhost:5173/".to_string()),
            "STOREFRONT_DATA_DIR" => Some(data_dir.clone()),
            _ => None,
        })
    }

    // -------------------------------------------------------------------------
    // Auth fixtures
    // -------------------------------------------------------------------------

    /// Register a user and return its id.
    pub fn add_user(&self, email: &str, user_metadata: Value) -> String {
        let mut backend = lock(&self.shared);
        backend.insert_user(email, user_metadata, "email")
    }

    /// Mint a session for `user_id`, returning `(access_token, refresh_token)`.
    #[must_use]
    pub fn issue_tokens(&self, user_id: &str) -> (String, String) {
        let mut backend = lock(&self.shared);
        let access = backend.mint_access_token(user_id, TOKEN_TTL_SECS);
        let refresh = backend.mint_refresh_token(user_id);
        (access, refresh)
    }

    /// An already-expired access token for `user_id` that the backend no
    /// longer accepts.
    #[must_use]
    pub fn expired_access_token(&self, user_id: &str) -> String {
        let mut backend = lock(&self.shared);
        let token = backend.mint_access_token(user_id, -60);
        backend.access_tokens.remove(&token);
        token
    }

    /// Revoke an access token as if it had been invalidated server-side.
    pub fn revoke_access_token(&self, token: &str) {
        lock(&self.shared).access_tokens.remove(token);
    }

    /// Issue an authorization code for `user_id`, optionally bound to a PKCE
    /// challenge.
    #[must_use]
    pub fn issue_code(&self, user_id: &str, challenge: Option<&str>) -> String {
        let mut backend = lock(&self.shared);
        backend.issued += 1;
        let code = format!("code-{}", backend.issued);
        backend.codes.insert(
            code.clone(),
            PendingCode {
                user_id: user_id.to_string(),
                challenge: challenge.map(str::to_string),
            },
        );
        code
    }

    /// Complete the most recent magic-link request for `email`, creating the
    /// user on first use, and return the authorization code the link carries.
    #[must_use]
    pub fn complete_magic_link(&self, email: &str) -> Option<String> {
        let mut backend = lock(&self.shared);
        let request = backend
            .otp_requests
            .iter()
            .rev()
            .find(|r| r.get("email").and_then(Value::as_str) == Some(email))?
            .clone();
        let challenge = request
            .get("code_challenge")
            .and_then(Value::as_str)
            .map(str::to_string);

        let user_id = match backend.user_id_by_email(email) {
            Some(id) => id,
            None => backend.insert_user(email, json!({}), "email"),
        };

        backend.issued += 1;
        let code = format!("code-{}", backend.issued);
        backend.codes.insert(
            code.clone(),
            PendingCode { user_id, challenge },
        );
        Some(code)
    }

    /// Bodies of every magic-link request received.
    #[must_use]
    pub fn otp_requests(&self) -> Vec<Value> {
        lock(&self.shared).otp_requests.clone()
    }

    // -------------------------------------------------------------------------
    // Data fixtures
    // -------------------------------------------------------------------------

    /// Append rows to `table` as-is.
    pub fn insert_rows(&self, table: &str, rows: Vec<Value>) {
        lock(&self.shared)
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Current rows of `table`.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Value> {
        lock(&self.shared)
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Seed a small bakery catalog.
    ///
    /// Products: `p-fresa` (featured), `p-vegano`, `p-avena` (out of stock)
    /// and the inactive `p-retirado`.
    pub fn seed_catalog(&self) {
        self.insert_rows(
            "categories",
            vec![
                json!({"id": "c-pasteles", "name": "Pasteles", "slug": "pasteles", "emoji": "🎂", "sort_order": 1}),
                json!({"id": "c-galletas", "name": "Galletas", "slug": "galletas", "emoji": null, "sort_order": 2}),
            ],
        );
        self.insert_rows(
            "subcategories",
            vec![
                json!({"id": "s-clasicos", "category_id": "c-pasteles", "name": "Clasicos", "slug": "clasicos", "sort_order": 1}),
                json!({"id": "s-veganos", "category_id": "c-pasteles", "name": "Veganos", "slug": "veganos", "sort_order": 2}),
            ],
        );
        self.insert_rows(
            "products",
            vec![
                json!({
                    "id": "p-fresa", "sku": "PAS-001", "name": "Pastel de fresa",
                    "description": "Bizcocho de vainilla con fresas frescas",
                    "price": 450, "category_id": "c-pasteles", "subcategory_id": "s-clasicos",
                    "images": ["https://cdn.dulcenube.com/fresa.jpg"], "portions": "8-10",
                    "tags": ["fresa"], "dietary": ["sin nuez"],
                    "featured": true, "in_stock": true, "prep_hours": 24, "active": true
                }),
                json!({
                    "id": "p-vegano", "sku": "PAS-002", "name": "Pastel vegano de chocolate",
                    "description": null, "price": 520.5, "category_id": "c-pasteles",
                    "subcategory_id": "s-veganos", "images": null, "portions": null,
                    "tags": null, "dietary": ["vegano", "sin nuez"],
                    "featured": false, "in_stock": true, "prep_hours": 48, "active": true
                }),
                json!({
                    "id": "p-avena", "sku": "GAL-001", "name": "Galletas de avena",
                    "description": "Docena de galletas", "price": 120,
                    "category_id": "c-galletas", "subcategory_id": "s-avena",
                    "images": [], "portions": "12", "tags": ["clasico"], "dietary": [],
                    "featured": false, "in_stock": false, "prep_hours": 4, "active": true
                }),
                json!({
                    "id": "p-retirado", "sku": "PAS-999", "name": "Pastel de temporada",
                    "description": null, "price": 300, "category_id": "c-pasteles",
                    "subcategory_id": "s-clasicos", "images": null, "portions": null,
                    "tags": null, "dietary": null,
                    "featured": true, "in_stock": true, "prep_hours": 24, "active": false
                }),
            ],
        );
    }

    // -------------------------------------------------------------------------
    // Failure injection and inspection
    // -------------------------------------------------------------------------

    /// Answer every `method` request on `table` with a 500.
    pub fn fail(&self, table: &str, method: &str) {
        lock(&self.shared)
            .failures
            .insert((table.to_string(), method.to_uppercase()));
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.shared).requests.clone()
    }

    /// Requests matching `method` whose path ends with `path_suffix`.
    #[must_use]
    pub fn requests_to(&self, method: &str, path_suffix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path.ends_with(path_suffix))
            .collect()
    }

    /// Number of token requests with the given `grant_type`.
    #[must_use]
    pub fn token_grants(&self, grant_type: &str) -> usize {
        self.requests_to("POST", "/auth/v1/token")
            .iter()
            .filter(|r| r.param("grant_type") == Some(grant_type))
            .count()
    }
}

// =============================================================================
// Backend state
// =============================================================================

impl Backend {
    fn insert_user(&mut self, email: &str, user_metadata: Value, provider: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.users.insert(
            id.clone(),
            json!({
                "id": id,
                "aud": "authenticated",
                "email": email,
                "user_metadata": user_metadata,
                "app_metadata": {"provider": provider},
            }),
        );
        id
    }

    fn user_id_by_email(&self, email: &str) -> Option<String> {
        self.users
            .iter()
            .find(|(_, u)| u.get("email").and_then(Value::as_str) == Some(email))
            .map(|(id, _)| id.clone())
    }

    fn mint_access_token(&mut self, user_id: &str, ttl_secs: i64) -> String {
        self.issued += 1;
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let claims = json!({
            "sub": user_id,
            "role": "authenticated",
            "exp": chrono::Utc::now().timestamp() + ttl_secs,
            "jti": self.issued,
        });
        let token = format!(
            "{header}.{}.signature",
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        self.access_tokens.insert(token.clone(), user_id.to_string());
        token
    }

    fn mint_refresh_token(&mut self, user_id: &str) -> String {
        self.issued += 1;
        let token = format!("refresh-{}", self.issued);
        self.refresh_tokens.insert(token.clone(), user_id.to_string());
        token
    }

    fn session_for(&mut self, user_id: &str) -> Option<Value> {
        let user = self.users.get(user_id)?.clone();
        let access = self.mint_access_token(user_id, TOKEN_TTL_SECS);
        let refresh = self.mint_refresh_token(user_id);
        Some(json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": TOKEN_TTL_SECS,
            "token_type": "bearer",
            "user": user,
        }))
    }

    /// Resolve the caller from `apikey` and `Authorization`.
    ///
    /// `Ok(None)` is the anonymous role; an unknown bearer is rejected.
    fn caller(&self, headers: &HeaderMap) -> Result<Option<String>, Response> {
        if header_str(headers, "apikey") != Some(PUBLISHABLE_KEY) {
            return Err(error(
                StatusCode::UNAUTHORIZED,
                json!({"message": "Invalid API key"}),
            ));
        }
        match bearer(headers) {
            Some(token) if token == PUBLISHABLE_KEY => Ok(None),
            Some(token) => self.access_tokens.get(token).cloned().map(Some).ok_or_else(|| {
                error(
                    StatusCode::UNAUTHORIZED,
                    json!({"code": "PGRST301", "message": "JWT expired"}),
                )
            }),
            None => Ok(None),
        }
    }

    fn record(&mut self, method: &Method, path: &str, query: &[(String, String)], headers: &HeaderMap, body: &Value) {
        self.requests.push(RecordedRequest {
            method: method.to_string(),
            path: path.to_string(),
            query: query.to_vec(),
            prefer: header_str(headers, "prefer").map(str::to_string),
            bearer: bearer(headers).map(str::to_string),
            body: body.clone(),
        });
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, header::AUTHORIZATION.as_str())?.strip_prefix("Bearer ")
}

fn error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn parse_body(body: &Bytes) -> Value {
    if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(body).unwrap_or(Value::Null)
    }
}

// =============================================================================
// GoTrue
// =============================================================================

#[derive(Deserialize)]
struct GrantQuery {
    grant_type: String,
}

async fn token(
    State(shared): State<Shared>,
    Query(query): Query<GrantQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = parse_body(&body);
    let mut backend = lock(&shared);
    backend.record(
        &Method::POST,
        "/auth/v1/token",
        &[("grant_type".to_string(), query.grant_type.clone())],
        &headers,
        &body,
    );

    match query.grant_type.as_str() {
        "pkce" => {
            let code = body.get("auth_code").and_then(Value::as_str).unwrap_or_default();
            let verifier = body.get("code_verifier").and_then(Value::as_str).unwrap_or_default();
            let Some(pending) = backend.codes.remove(code) else {
                return error(
                    StatusCode::NOT_FOUND,
                    json!({"code": 404, "error_code": "flow_state_not_found", "msg": "invalid flow state, no valid flow state found"}),
                );
            };
            if let Some(challenge) = &pending.challenge {
                let computed = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
                if &computed != challenge {
                    return error(
                        StatusCode::BAD_REQUEST,
                        json!({"code": 400, "error_code": "bad_code_verifier", "msg": "code challenge does not match previously saved code verifier"}),
                    );
                }
            }
            backend.session_for(&pending.user_id).map_or_else(
                || error(StatusCode::NOT_FOUND, json!({"code": 404, "error_code": "user_not_found", "msg": "User not found"})),
                |session| Json(session).into_response(),
            )
        }
        "refresh_token" => {
            let presented = body.get("refresh_token").and_then(Value::as_str).unwrap_or_default();
            let Some(user_id) = backend.refresh_tokens.remove(presented) else {
                return error(
                    StatusCode::BAD_REQUEST,
                    json!({"code": 400, "error_code": "refresh_token_not_found", "msg": "Invalid Refresh Token: Refresh Token Not Found"}),
                );
            };
            backend.session_for(&user_id).map_or_else(
                || error(StatusCode::NOT_FOUND, json!({"code": 404, "error_code": "user_not_found", "msg": "User not found"})),
                |session| Json(session).into_response(),
            )
        }
        other => error(
            StatusCode::BAD_REQUEST,
            json!({"error": "unsupported_grant_type", "error_description": format!("unsupported grant type {other}")}),
        ),
    }
}

async fn user(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    let mut backend = lock(&shared);
    backend.record(&Method::GET, "/auth/v1/user", &[], &headers, &Value::Null);

    let user = bearer(&headers)
        .and_then(|token| backend.access_tokens.get(token))
        .and_then(|id| backend.users.get(id))
        .cloned();
    user.map_or_else(
        || error(StatusCode::UNAUTHORIZED, json!({"code": 401, "error_code": "bad_jwt", "msg": "invalid JWT"})),
        |u| Json(u).into_response(),
    )
}

async fn otp(
    State(shared): State<Shared>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = parse_body(&body);
    let mut backend = lock(&shared);
    backend.record(&Method::POST, "/auth/v1/otp", &query, &headers, &body);

    if backend.failures.contains(&("otp".to_string(), "POST".to_string())) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", "60")],
            Json(json!({"code": 429, "error_code": "over_email_send_rate_limit", "msg": "email rate limit exceeded"})),
        )
            .into_response();
    }
    backend.otp_requests.push(body);
    Json(json!({})).into_response()
}

async fn logout(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    let mut backend = lock(&shared);
    backend.record(&Method::POST, "/auth/v1/logout", &[], &headers, &Value::Null);

    let Some(user_id) = bearer(&headers).and_then(|t| backend.access_tokens.get(t)).cloned() else {
        return error(StatusCode::UNAUTHORIZED, json!({"code": 401, "error_code": "bad_jwt", "msg": "invalid JWT"}));
    };
    backend.access_tokens.retain(|_, owner| *owner != user_id);
    backend.refresh_tokens.retain(|_, owner| *owner != user_id);
    StatusCode::NO_CONTENT.into_response()
}

// =============================================================================
// PostgREST
// =============================================================================

/// Column holding the owning user of a row, for tables with per-user access.
fn owner_column(table: &str) -> Option<&'static str> {
    match table {
        "profiles" => Some("id"),
        "orders" | "addresses" => Some("user_id"),
        _ => None,
    }
}

fn column_defaults(table: &str) -> Vec<(&'static str, Value)> {
    match table {
        "profiles" => vec![("role", json!("customer")), ("full_name", Value::Null), ("avatar_url", Value::Null)],
        "addresses" => vec![("is_default", json!(false))],
        "orders" => vec![("status", json!("pending"))],
        _ => Vec::new(),
    }
}

const CONTROL_PARAMS: [&str; 4] = ["select", "order", "limit", "on_conflict"];

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches_filters(row: &Value, query: &[(String, String)]) -> bool {
    query
        .iter()
        .filter(|(k, _)| !CONTROL_PARAMS.contains(&k.as_str()))
        .all(|(column, filter)| {
            let actual = row.get(column).unwrap_or(&Value::Null);
            match filter.split_once('.') {
                Some(("eq", expected)) => value_text(actual) == expected,
                Some(("neq", expected)) => value_text(actual) != expected,
                Some(("is", "null")) => actual.is_null(),
                _ => false,
            }
        })
}

fn owned_by(row: &Value, table: &str, caller: Option<&str>) -> bool {
    owner_column(table).is_none_or(|column| {
        caller.is_some_and(|id| row.get(column).and_then(Value::as_str) == Some(id))
    })
}

fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => value_text(a).cmp(&value_text(b)),
    }
}

fn sort_rows(rows: &mut [Value], order: &str) {
    let keys: Vec<(&str, bool)> = order
        .split(',')
        .filter_map(|part| {
            let (column, direction) = part.split_once('.').unwrap_or((part, "asc"));
            (!column.is_empty()).then_some((column, direction != "desc"))
        })
        .collect();

    rows.sort_by(|a, b| {
        for (column, ascending) in &keys {
            let ordering = compare(
                a.get(column).unwrap_or(&Value::Null),
                b.get(column).unwrap_or(&Value::Null),
            );
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering.is_ne() {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Split a select list on top-level commas.
fn select_items(select: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0_i32;
    let mut start = 0;
    for (i, c) in select.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                items.push(select.get(start..i).unwrap_or_default().trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(select.get(start..).unwrap_or_default().trim());
    items.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Apply `select`, embedding `relation(*)` items by `<table>_id` foreign key.
fn project(backend: &Backend, table: &str, row: &Value, select: Option<&str>) -> Value {
    let Some(select) = select else {
        return row.clone();
    };
    let Some(source) = row.as_object() else {
        return row.clone();
    };

    let mut out = Map::new();
    for item in select_items(select) {
        if item == "*" {
            out.extend(source.clone());
        } else if let Some((relation, _)) = item.split_once('(') {
            let foreign_key = format!("{}_id", table.trim_end_matches('s'));
            let id = row.get("id").cloned().unwrap_or(Value::Null);
            let children: Vec<Value> = backend
                .tables
                .get(relation)
                .map(|rows| {
                    rows.iter()
                        .filter(|child| child.get(&foreign_key) == Some(&id))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            out.insert(relation.to_string(), Value::Array(children));
        } else if let Some(value) = source.get(item) {
            out.insert(item.to_string(), value.clone());
        }
    }
    Value::Object(out)
}

fn respond_rows(rows: Vec<Value>, single: bool, status: StatusCode) -> Response {
    if !single {
        return (status, Json(Value::Array(rows))).into_response();
    }
    match <[Value; 1]>::try_from(rows) {
        Ok([row]) => (status, Json(row)).into_response(),
        Err(rows) => error(
            StatusCode::NOT_ACCEPTABLE,
            json!({
                "code": "PGRST116",
                "message": "JSON object requested, multiple (or no) rows returned",
                "details": format!("The result contains {} rows", rows.len()),
            }),
        ),
    }
}

/// PATCH and DELETE answer 204, or 200 with the touched rows when asked.
fn respond_written(
    backend: &Backend,
    table: &str,
    rows: &[Value],
    select: Option<&str>,
    prefer: &str,
) -> Response {
    if !prefer.contains("return=representation") {
        return StatusCode::NO_CONTENT.into_response();
    }
    let rows = rows.iter().map(|r| project(backend, table, r, select)).collect();
    respond_rows(rows, false, StatusCode::OK)
}

async fn rest(
    State(shared): State<Shared>,
    method: Method,
    UrlPath(table): UrlPath<String>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = parse_body(&body);
    let mut backend = lock(&shared);
    backend.record(&method, &format!("/rest/v1/{table}"), &query, &headers, &body);

    let caller = match backend.caller(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    if backend.failures.contains(&(table.clone(), method.to_string())) {
        return error(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"code": "XX000", "message": format!("injected failure on {table}")}),
        );
    }

    let param = |key: &str| {
        query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };
    let select = param("select");
    let single = header_str(&headers, "accept") == Some(SINGLE_OBJECT);
    let prefer = header_str(&headers, "prefer").unwrap_or_default().to_string();
    let caller = caller.as_deref();

    match method {
        Method::GET => {
            let mut rows: Vec<Value> = backend
                .tables
                .get(&table)
                .map(|rows| {
                    rows.iter()
                        .filter(|r| matches_filters(r, &query) && owned_by(r, &table, caller))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            if let Some(order) = param("order") {
                sort_rows(&mut rows, &order);
            }
            if let Some(limit) = param("limit").and_then(|l| l.parse::<usize>().ok()) {
                rows.truncate(limit);
            }
            let rows = rows
                .iter()
                .map(|r| project(&backend, &table, r, select.as_deref()))
                .collect();
            respond_rows(rows, single, StatusCode::OK)
        }
        Method::POST => {
            let incoming = match body {
                Value::Array(rows) => rows,
                Value::Object(_) => vec![body],
                _ => {
                    return error(
                        StatusCode::BAD_REQUEST,
                        json!({"code": "PGRST102", "message": "Empty or invalid json"}),
                    );
                }
            };

            if let Some(column) = owner_column(&table) {
                let foreign = incoming.iter().any(|row| {
                    row.get(column)
                        .and_then(Value::as_str)
                        .is_some_and(|owner| Some(owner) != caller)
                });
                if foreign {
                    return error(
                        StatusCode::FORBIDDEN,
                        json!({"code": "42501", "message": format!("new row violates row-level security policy for table \"{table}\"")}),
                    );
                }
            }

            let conflict = param("on_conflict").filter(|_| prefer.contains("merge-duplicates"));
            let now = chrono::Utc::now().to_rfc3339();
            let mut written = Vec::new();
            let rows = backend.tables.entry(table.clone()).or_default();
            for mut row in incoming {
                let key = conflict
                    .as_deref()
                    .and_then(|column| row.get(column).cloned().map(|key| (column, key)));
                let existing = match &key {
                    Some((column, key)) => rows.iter_mut().find(|r| r.get(*column) == Some(key)),
                    None => None,
                };
                if let Some(existing) = existing {
                    if let (Some(target), Some(fields)) = (existing.as_object_mut(), row.as_object()) {
                        target.extend(fields.clone());
                    }
                    written.push(existing.clone());
                    continue;
                }
                if let Some(fields) = row.as_object_mut() {
                    fields
                        .entry("id")
                        .or_insert_with(|| json!(uuid::Uuid::new_v4().to_string()));
                    fields.entry("created_at").or_insert_with(|| json!(now));
                    for (column, default) in column_defaults(&table) {
                        fields.entry(column).or_insert(default);
                    }
                }
                rows.push(row.clone());
                written.push(row);
            }

            if prefer.contains("return=representation") {
                let rows = written
                    .iter()
                    .map(|r| project(&backend, &table, r, select.as_deref()))
                    .collect();
                respond_rows(rows, single, StatusCode::CREATED)
            } else {
                StatusCode::CREATED.into_response()
            }
        }
        Method::PATCH => {
            let Some(fields) = body.as_object().cloned() else {
                return error(
                    StatusCode::BAD_REQUEST,
                    json!({"code": "PGRST102", "message": "Empty or invalid json"}),
                );
            };
            let mut written = Vec::new();
            if let Some(rows) = backend.tables.get_mut(&table) {
                for row in rows
                    .iter_mut()
                    .filter(|r| matches_filters(r, &query) && owned_by(r, &table, caller))
                {
                    if let Some(target) = row.as_object_mut() {
                        target.extend(fields.clone());
                    }
                    written.push(row.clone());
                }
            }
            respond_written(&backend, &table, &written, select.as_deref(), &prefer)
        }
        Method::DELETE => {
            let mut removed = Vec::new();
            if let Some(rows) = backend.tables.get_mut(&table) {
                rows.retain(|r| {
                    let hit = matches_filters(r, &query) && owned_by(r, &table, caller);
                    if hit {
                        removed.push(r.clone());
                    }
                    !hit
                });
            }
            respond_written(&backend, &table, &removed, select.as_deref(), &prefer)
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}
