//! PostgREST data client.
//!
//! A small query builder covering what the storefront needs: column lists,
//! equality filters, multi-column ordering, single-row reads, and
//! insert/upsert/update/delete.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;
use url::Url;

use super::{SupabaseError, read_empty, read_json};
use crate::config::{SupabaseConfig, api_key};

/// Media type that makes PostgREST return a single object instead of an array.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Client for the PostgREST API.
///
/// Requests run with the publishable key unless an access token is attached
/// with [`RestClient::with_access_token`], in which case row-level security
/// sees the signed-in user.
#[derive(Clone)]
pub struct RestClient {
    inner: Arc<RestClientInner>,
    access_token: Option<Arc<str>>,
}

struct RestClientInner {
    client: reqwest::Client,
    rest_url: Url,
    api_key: String,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("rest_url", &self.inner.rest_url.as_str())
            .field("authenticated", &self.access_token.is_some())
            .finish()
    }
}

impl RestClient {
    /// Create a new anonymous client.
    #[must_use]
    pub fn new(config: &SupabaseConfig) -> Self {
        let rest_url = config
            .url
            .join("rest/v1/")
            .unwrap_or_else(|_| config.url.clone());

        Self {
            inner: Arc::new(RestClientInner {
                client: reqwest::Client::new(),
                rest_url,
                api_key: api_key(config).to_string(),
            }),
            access_token: None,
        }
    }

    /// A client sharing this one's connection pool that sends `access_token`.
    #[must_use]
    pub fn with_access_token(&self, access_token: &str) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            access_token: Some(Arc::from(access_token)),
        }
    }

    /// Whether requests carry a user access token.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Start a query against `table`.
    #[must_use]
    pub fn table(&self, table: &str) -> QueryBuilder {
        QueryBuilder {
            client: self.clone(),
            table: table.to_string(),
            select: None,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let token = self
            .access_token
            .as_deref()
            .unwrap_or(&self.inner.api_key);
        self.inner
            .client
            .request(method, url)
            .header("apikey", &self.inner.api_key)
            .bearer_auth(token)
    }
}

/// A PostgREST request under construction.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    client: RestClient,
    table: String,
    select: Option<String>,
    filters: Vec<(String, String)>,
    order: Vec<String>,
    limit: Option<usize>,
}

impl QueryBuilder {
    /// Columns to return, including embedded relations
    /// (e.g. `*,order_items(*)`).
    #[must_use]
    pub fn select(mut self, columns: &str) -> Self {
        self.select = Some(columns.to_string());
        self
    }

    /// Filter rows where `column = value`.
    #[must_use]
    pub fn eq(mut self, column: &str, value: impl std::fmt::Display) -> Self {
        self.filters.push((column.to_string(), format!("eq.{value}")));
        self
    }

    /// Filter rows where `column <> value`.
    #[must_use]
    pub fn neq(mut self, column: &str, value: impl std::fmt::Display) -> Self {
        self.filters.push((column.to_string(), format!("neq.{value}")));
        self
    }

    /// Append an ordering column. Earlier calls take precedence.
    #[must_use]
    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        let direction = if ascending { "asc" } else { "desc" };
        self.order.push(format!("{column}.{direction}"));
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn url(&self, extra: &[(&str, &str)]) -> Result<Url, SupabaseError> {
        let mut url = self.client.inner.rest_url.join(&self.table)?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(select) = &self.select {
                pairs.append_pair("select", select);
            }
            for (column, filter) in &self.filters {
                pairs.append_pair(column, filter);
            }
            if !self.order.is_empty() {
                pairs.append_pair("order", &self.order.join(","));
            }
            if let Some(limit) = self.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
            for (key, value) in extra {
                pairs.append_pair(key, value);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    /// Fetch all matching rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or rows cannot be decoded.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn fetch_all<T: DeserializeOwned>(self) -> Result<Vec<T>, SupabaseError> {
        let url = self.url(&[])?;
        let response = self
            .client
            .request(reqwest::Method::GET, url)
            .send()
            .await?;
        read_json(response).await
    }

    /// Fetch exactly one row.
    ///
    /// # Errors
    ///
    /// Returns `SupabaseError::NotFound` if no single row matches.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn fetch_one<T: DeserializeOwned>(self) -> Result<T, SupabaseError> {
        let url = self.url(&[])?;
        let response = self
            .client
            .request(reqwest::Method::GET, url)
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .send()
            .await?;
        read_json(response).await.map_err(|e| self.not_found(e))
    }

    /// Fetch at most one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails for any reason other than the
    /// row being absent.
    pub async fn fetch_optional<T: DeserializeOwned>(self) -> Result<Option<T>, SupabaseError> {
        match self.fetch_one().await {
            Ok(row) => Ok(Some(row)),
            Err(SupabaseError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Insert one or more rows without reading them back.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the insert is rejected.
    #[instrument(skip(self, body), fields(table = %self.table))]
    pub async fn insert<B: Serialize + ?Sized>(self, body: &B) -> Result<(), SupabaseError> {
        let url = self.url(&[])?;
        let response = self
            .client
            .request(reqwest::Method::POST, url)
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await?;
        read_empty(response).await
    }

    /// Insert a single row and return it, restricted to the selected columns.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the insert is rejected.
    #[instrument(skip(self, body), fields(table = %self.table))]
    pub async fn insert_returning<B, T>(self, body: &B) -> Result<T, SupabaseError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(&[])?;
        let response = self
            .client
            .request(reqwest::Method::POST, url)
            .header("Prefer", "return=representation")
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }

    /// Insert rows, merging into existing rows that collide on `on_conflict`.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the upsert is rejected.
    #[instrument(skip(self, body), fields(table = %self.table))]
    pub async fn upsert<B: Serialize + ?Sized>(
        self,
        body: &B,
        on_conflict: &str,
    ) -> Result<(), SupabaseError> {
        let url = self.url(&[("on_conflict", on_conflict)])?;
        let response = self
            .client
            .request(reqwest::Method::POST, url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(body)
            .send()
            .await?;
        read_empty(response).await
    }

    /// Update matching rows with the fields in `body`.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the update is rejected.
    #[instrument(skip(self, body), fields(table = %self.table))]
    pub async fn update<B: Serialize + ?Sized>(self, body: &B) -> Result<(), SupabaseError> {
        let url = self.url(&[])?;
        let response = self
            .client
            .request(reqwest::Method::PATCH, url)
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await?;
        read_empty(response).await
    }

    /// Update matching rows and return them, restricted to the selected
    /// columns. An empty result means no row matched.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the update is rejected.
    #[instrument(skip(self, body), fields(table = %self.table))]
    pub async fn update_returning<B, T>(self, body: &B) -> Result<Vec<T>, SupabaseError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(&[])?;
        let response = self
            .client
            .request(reqwest::Method::PATCH, url)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }

    /// Delete matching rows.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the delete is rejected.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn delete(self) -> Result<(), SupabaseError> {
        let url = self.url(&[])?;
        let response = self
            .client
            .request(reqwest::Method::DELETE, url)
            .send()
            .await?;
        read_empty(response).await
    }

    /// Delete matching rows and return what was removed.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the delete is rejected.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn delete_returning<T: DeserializeOwned>(self) -> Result<Vec<T>, SupabaseError> {
        let url = self.url(&[])?;
        let response = self
            .client
            .request(reqwest::Method::DELETE, url)
            .header("Prefer", "return=representation")
            .send()
            .await?;
        read_json(response).await
    }

    /// PostgREST answers 406 when a single-object read matches zero rows.
    fn not_found(&self, error: SupabaseError) -> SupabaseError {
        match error {
            SupabaseError::Api { status: 406, .. } => SupabaseError::NotFound(self.table.clone()),
            SupabaseError::Api { ref code, .. } if code.as_deref() == Some("PGRST116") => {
                SupabaseError::NotFound(self.table.clone())
            }
            other => other,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client() -> RestClient {
        RestClient::new(&SupabaseConfig::new(
            Url::parse("https://abcd.supabase.co").unwrap(),
            "sb_publishable_Qm9Zx7Lk2Rt5Vw8Yp3Hn6Jd",
        ))
    }

    fn query_pairs(url: &Url) -> Vec<(String, String)> {
        url.query_pairs().into_owned().collect()
    }

    #[test]
    fn test_query_url() {
        let url = client()
            .table("products")
            .select("id,name,price")
            .eq("is_active", true)
            .order("featured", false)
            .order("name", true)
            .url(&[])
            .unwrap();

        assert_eq!(url.path(), "/rest/v1/products");
        assert_eq!(
            query_pairs(&url),
            vec![
                ("select".to_string(), "id,name,price".to_string()),
                ("is_active".to_string(), "eq.true".to_string()),
                ("order".to_string(), "featured.desc,name.asc".to_string()),
            ]
        );
    }

    #[test]
    fn test_neq_filter() {
        let url = client()
            .table("addresses")
            .eq("user_id", "u1")
            .neq("id", "a1")
            .url(&[])
            .unwrap();
        assert_eq!(
            query_pairs(&url),
            vec![
                ("user_id".to_string(), "eq.u1".to_string()),
                ("id".to_string(), "neq.a1".to_string()),
            ]
        );
    }

    #[test]
    fn test_bare_table_url_has_no_query() {
        let url = client().table("orders").url(&[]).unwrap();
        assert_eq!(url.as_str(), "https://abcd.supabase.co/rest/v1/orders");
    }

    #[test]
    fn test_upsert_url_carries_on_conflict() {
        let url = client()
            .table("profiles")
            .url(&[("on_conflict", "id")])
            .unwrap();
        assert_eq!(query_pairs(&url), vec![("on_conflict".to_string(), "id".to_string())]);
    }

    #[test]
    fn test_with_access_token() {
        let anon = client();
        let authed = anon.with_access_token("user-jwt");
        assert!(!anon.is_authenticated());
        assert!(authed.is_authenticated());
        assert!(Arc::ptr_eq(&anon.inner, &authed.inner));
    }

    #[test]
    fn test_single_object_miss_maps_to_not_found() {
        let query = client().table("profiles");
        let err = query.not_found(SupabaseError::Api {
            status: 406,
            code: Some("PGRST116".to_string()),
            message: "JSON object requested, multiple (or no) rows returned".to_string(),
        });
        assert!(matches!(err, SupabaseError::NotFound(ref t) if t == "profiles"));

        let err = query.not_found(SupabaseError::Api {
            status: 401,
            code: Some("42501".to_string()),
            message: "permission denied".to_string(),
        });
        assert!(matches!(err, SupabaseError::Api { status: 401, .. }));
    }
}
