//! Catalog types.
//!
//! `*Row` types mirror the backend relations (nullable columns as `Option`);
//! the clean types are what the rest of the storefront works with.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use dulcenube_core::{CategoryId, CurrencyCode, Price, ProductId, SubcategoryId};

/// Emoji shown for categories that have none configured.
pub const DEFAULT_CATEGORY_EMOJI: &str = "🍰";

// =============================================================================
// Store
// =============================================================================

/// Store-wide display settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub name: String,
    pub currency: CurrencyCode,
    pub locale: String,
}

impl Default for StoreInfo {
    fn default() -> Self {
        Self {
            name: "DulceNube".to_string(),
            currency: CurrencyCode::MXN,
            locale: "es-MX".to_string(),
        }
    }
}

impl StoreInfo {
    /// Format an amount in the store currency (e.g. `$1,250`).
    #[must_use]
    pub fn format(&self, amount: Decimal) -> String {
        Price::new(amount, self.currency).display()
    }
}

// =============================================================================
// Backend Rows
// =============================================================================

/// A row of `categories`.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRow {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i32>,
}

/// A row of `subcategories`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubcategoryRow {
    pub id: SubcategoryId,
    pub category_id: CategoryId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub sort_order: Option<i32>,
}

/// A row of `products`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductRow {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub category_id: CategoryId,
    pub subcategory_id: SubcategoryId,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub portions: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub dietary: Option<Vec<String>>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub in_stock: bool,
    #[serde(default)]
    pub prep_hours: u32,
}

// =============================================================================
// Catalog
// =============================================================================

/// A product subcategory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subcategory {
    pub id: SubcategoryId,
    pub name: String,
    pub slug: String,
}

/// A top-level category with its subcategories in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    pub emoji: String,
    pub subcategories: Vec<Subcategory>,
}

/// An active product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub category_id: CategoryId,
    pub subcategory_id: SubcategoryId,
    pub description: String,
    pub price: Decimal,
    pub images: Vec<String>,
    pub portions: String,
    pub tags: Vec<String>,
    pub dietary: Vec<String>,
    pub featured: bool,
    pub in_stock: bool,
    /// Hours of notice the bakery needs.
    pub prep_hours: u32,
}

impl Product {
    /// First image, used as the cart thumbnail.
    #[must_use]
    pub fn primary_image(&self) -> &str {
        self.images.first().map_or("", String::as_str)
    }
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            slug: row.slug,
            emoji: row
                .emoji
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_CATEGORY_EMOJI.to_string()),
            subcategories: Vec::new(),
        }
    }
}

impl From<SubcategoryRow> for Subcategory {
    fn from(row: SubcategoryRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            slug: row.slug,
        }
    }
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            sku: row.sku,
            name: row.name,
            category_id: row.category_id,
            subcategory_id: row.subcategory_id,
            description: row.description.unwrap_or_default(),
            price: row.price,
            images: row.images.unwrap_or_default(),
            portions: row.portions.unwrap_or_default(),
            tags: row.tags.unwrap_or_default(),
            dietary: row.dietary.unwrap_or_default(),
            featured: row.featured,
            in_stock: row.in_stock,
            prep_hours: row.prep_hours,
        }
    }
}

/// The full catalog as shown to shoppers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub store: StoreInfo,
    pub categories: Vec<Category>,
    pub products: Vec<Product>,
}

impl Catalog {
    /// Assemble the catalog from backend rows, grouping subcategories under
    /// their category. Row order is preserved.
    #[must_use]
    pub fn from_rows(
        store: StoreInfo,
        categories: Vec<CategoryRow>,
        subcategories: Vec<SubcategoryRow>,
        products: Vec<ProductRow>,
    ) -> Self {
        let mut categories: Vec<Category> = categories.into_iter().map(Category::from).collect();
        for row in subcategories {
            if let Some(category) = categories.iter_mut().find(|c| c.id == row.category_id) {
                category.subcategories.push(row.into());
            }
        }

        Self {
            store,
            categories,
            products: products.into_iter().map(Product::from).collect(),
        }
    }

    /// Look up a product by ID.
    #[must_use]
    pub fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products.iter().find(|p| &p.id == id)
    }

    /// Look up a category by ID.
    #[must_use]
    pub fn category(&self, id: &CategoryId) -> Option<&Category> {
        self.categories.iter().find(|c| &c.id == id)
    }

    /// Look up a category by its slug.
    #[must_use]
    pub fn category_by_slug(&self, slug: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.slug == slug)
    }

    /// Display name of a subcategory, if known.
    #[must_use]
    pub fn subcategory_name(&self, id: &SubcategoryId) -> Option<&str> {
        self.categories
            .iter()
            .flat_map(|c| &c.subcategories)
            .find(|s| &s.id == id)
            .map(|s| s.name.as_str())
    }

    /// Highest product price, zero for an empty catalog.
    #[must_use]
    pub fn max_price(&self) -> Decimal {
        self.products
            .iter()
            .map(|p| p.price)
            .max()
            .unwrap_or(Decimal::ZERO)
    }

    /// Every dietary label in use, sorted and deduplicated.
    #[must_use]
    pub fn dietary_options(&self) -> Vec<String> {
        let mut options: Vec<String> = self
            .products
            .iter()
            .flat_map(|p| p.dietary.iter().cloned())
            .collect();
        options.sort();
        options.dedup();
        options
    }

    /// Up to `limit` other products of the same category, in catalog order.
    #[must_use]
    pub fn related_products(&self, product: &Product, limit: usize) -> Vec<&Product> {
        self.products
            .iter()
            .filter(|p| p.category_id == product.category_id && p.id != product.id)
            .take(limit)
            .collect()
    }
}
