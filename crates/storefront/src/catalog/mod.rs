//! Product catalog.
//!
//! Categories, subcategories and active products are read concurrently from
//! the backend and assembled into a [`Catalog`]. The assembled catalog is
//! cached using `moka` (5-minute TTL).

mod filter;
mod types;

pub use filter::{CatalogFilter, SortMode};
pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, instrument};

use dulcenube_core::ProductId;

use crate::supabase::{RestClient, SupabaseError};

const CATEGORY_COLUMNS: &str = "id,name,slug,emoji,sort_order";
const SUBCATEGORY_COLUMNS: &str = "id,category_id,name,slug,sort_order";
const PRODUCT_COLUMNS: &str = "id,sku,name,category_id,subcategory_id,description,price,images,portions,tags,dietary,featured,in_stock,prep_hours";

const CATALOG_CACHE_KEY: &str = "catalog";

/// Number of related products shown on a product page.
pub const RELATED_PRODUCTS_LIMIT: usize = 4;

/// Catalog reads against the `categories`, `subcategories` and `products`
/// relations.
#[derive(Clone)]
pub struct CatalogService {
    inner: Arc<CatalogServiceInner>,
}

struct CatalogServiceInner {
    rest: RestClient,
    store: StoreInfo,
    cache: Cache<&'static str, Arc<Catalog>>,
}

impl std::fmt::Debug for CatalogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogService")
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

impl CatalogService {
    #[must_use]
    pub fn new(rest: RestClient, store: StoreInfo) -> Self {
        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(Duration::from_secs(300)) // 5 minutes
            .build();

        Self {
            inner: Arc::new(CatalogServiceInner { rest, store, cache }),
        }
    }

    /// Store display settings.
    #[must_use]
    pub fn store(&self) -> &StoreInfo {
        &self.inner.store
    }

    /// Load the full catalog, served from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns the first error of the three backend reads.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Arc<Catalog>, SupabaseError> {
        if let Some(catalog) = self.inner.cache.get(CATALOG_CACHE_KEY).await {
            debug!("Cache hit for catalog");
            return Ok(catalog);
        }

        let rest = &self.inner.rest;
        let (categories, subcategories, products) = tokio::try_join!(
            rest.table("categories")
                .select(CATEGORY_COLUMNS)
                .order("sort_order", true)
                .order("name", true)
                .fetch_all::<CategoryRow>(),
            rest.table("subcategories")
                .select(SUBCATEGORY_COLUMNS)
                .order("sort_order", true)
                .order("name", true)
                .fetch_all::<SubcategoryRow>(),
            rest.table("products")
                .select(PRODUCT_COLUMNS)
                .eq("active", true)
                .order("featured", false)
                .order("name", true)
                .fetch_all::<ProductRow>(),
        )?;

        debug!(
            categories = categories.len(),
            products = products.len(),
            "Catalog loaded"
        );

        let catalog = Arc::new(Catalog::from_rows(
            self.inner.store.clone(),
            categories,
            subcategories,
            products,
        ));
        self.inner
            .cache
            .insert(CATALOG_CACHE_KEY, Arc::clone(&catalog))
            .await;
        Ok(catalog)
    }

    /// Look up a single product.
    ///
    /// # Errors
    ///
    /// Returns `SupabaseError::NotFound` for unknown or inactive products.
    pub async fn product(&self, id: &ProductId) -> Result<Product, SupabaseError> {
        self.load()
            .await?
            .product(id)
            .cloned()
            .ok_or_else(|| SupabaseError::NotFound(format!("product {id}")))
    }

    /// Drop the cached catalog.
    pub async fn invalidate(&self) {
        self.inner.cache.invalidate_all();
        self.inner.cache.run_pending_tasks().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod testing {
    use super::*;

    fn product_row(json: serde_json::Value) -> ProductRow {
        serde_json::from_value(json).unwrap()
    }

    pub(crate) fn sample_catalog() -> Catalog {
        let categories = serde_json::from_value(serde_json::json!([
            {"id": "c-pasteles", "name": "Pasteles", "slug": "pasteles", "emoji": "🎂", "sort_order": 1},
            {"id": "c-galletas", "name": "Galletas", "slug": "galletas", "emoji": null, "sort_order": 2}
        ]))
        .unwrap();
        let subcategories = serde_json::from_value(serde_json::json!([
            {"id": "s-clasicos", "category_id": "c-pasteles", "name": "Clásicos", "slug": "clasicos", "sort_order": 1},
            {"id": "s-veganos", "category_id": "c-pasteles", "name": "Veganos", "slug": "veganos", "sort_order": 2},
            {"id": "s-huerfana", "category_id": "c-otro", "name": "Huérfana", "slug": "huerfana", "sort_order": 1}
        ]))
        .unwrap();
        let products = vec![
            product_row(serde_json::json!({
                "id": "p1", "sku": "PAS-001", "name": "Pastel de fresa",
                "category_id": "c-pasteles", "subcategory_id": "s-clasicos",
                "description": "Bizcocho con fresas", "price": 450,
                "images": ["fresa.jpg"], "portions": "8", "tags": ["fruta"],
                "dietary": ["sin nuez"], "featured": true, "in_stock": true, "prep_hours": 24
            })),
            product_row(serde_json::json!({
                "id": "p2", "sku": "PAS-002", "name": "Pastel vegano",
                "category_id": "c-pasteles", "subcategory_id": "s-veganos",
                "description": null, "price": 1250.5,
                "images": null, "portions": null, "tags": null,
                "dietary": ["vegano", "sin nuez"], "featured": false, "in_stock": true, "prep_hours": 48
            })),
            product_row(serde_json::json!({
                "id": "p3", "sku": "GAL-001", "name": "Galletas de avena",
                "category_id": "c-galletas", "subcategory_id": "s-avena",
                "description": "Docena", "price": 120,
                "images": [], "portions": "12", "tags": ["clasico"],
                "dietary": [], "featured": false, "in_stock": false, "prep_hours": 4
            })),
        ];
        Catalog::from_rows(StoreInfo::default(), categories, subcategories, products)
    }
}
