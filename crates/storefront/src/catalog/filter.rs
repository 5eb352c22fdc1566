//! Catalog browsing filters.

use rust_decimal::Decimal;

use dulcenube_core::{CategoryId, SubcategoryId};

use super::types::{Catalog, Product};

/// Product ordering on the browse page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Featured products first, otherwise catalog order.
    #[default]
    Featured,
    PriceAsc,
    PriceDesc,
    /// Shortest preparation time first.
    Faster,
}

impl SortMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Featured => "featured",
            Self::PriceAsc => "price-asc",
            Self::PriceDesc => "price-desc",
            Self::Faster => "faster",
        }
    }
}

impl std::fmt::Display for SortMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "featured" => Ok(Self::Featured),
            "price-asc" => Ok(Self::PriceAsc),
            "price-desc" => Ok(Self::PriceDesc),
            "faster" => Ok(Self::Faster),
            other => Err(format!(
                "unknown sort mode '{other}' (expected featured, price-asc, price-desc or faster)"
            )),
        }
    }
}

/// Browse filters. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    /// Case-insensitive text matched against name, description, SKU, tags
    /// and subcategory name.
    pub query: Option<String>,
    pub category: Option<CategoryId>,
    pub subcategory: Option<SubcategoryId>,
    pub dietary: Option<String>,
    /// Products priced above the cap are hidden.
    pub price_cap: Option<Decimal>,
    pub sort: SortMode,
}

impl CatalogFilter {
    /// Products of `catalog` matching the filter, in the requested order.
    ///
    /// Sorting is stable: ties keep catalog order.
    #[must_use]
    pub fn apply<'a>(&self, catalog: &'a Catalog) -> Vec<&'a Product> {
        let needle = self
            .query
            .as_deref()
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());

        let mut products: Vec<&Product> = catalog
            .products
            .iter()
            .filter(|p| self.category.as_ref().is_none_or(|c| &p.category_id == c))
            .filter(|p| {
                self.subcategory
                    .as_ref()
                    .is_none_or(|s| &p.subcategory_id == s)
            })
            .filter(|p| self.dietary.as_ref().is_none_or(|d| p.dietary.contains(d)))
            .filter(|p| self.price_cap.is_none_or(|cap| p.price <= cap))
            .filter(|p| {
                needle
                    .as_deref()
                    .is_none_or(|n| searchable_text(catalog, p).contains(n))
            })
            .collect();

        match self.sort {
            SortMode::Featured => products.sort_by_key(|p| !p.featured),
            SortMode::PriceAsc => products.sort_by_key(|p| p.price),
            SortMode::PriceDesc => products.sort_by(|a, b| b.price.cmp(&a.price)),
            SortMode::Faster => products.sort_by_key(|p| p.prep_hours),
        }

        products
    }
}

fn searchable_text(catalog: &Catalog, product: &Product) -> String {
    let mut parts: Vec<&str> = vec![&product.name, &product.description, &product.sku];
    parts.extend(product.tags.iter().map(String::as_str));
    parts.push(catalog.subcategory_name(&product.subcategory_id).unwrap_or(""));
    parts.join(" ").to_lowercase()
}
