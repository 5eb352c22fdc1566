//! Shopping cart state container.
//!
//! The cart lives entirely on the client. Lines are kept in insertion order,
//! keyed by product and dedication text, and the whole list is mirrored to
//! local storage after every mutation so it survives restarts.
//!
//! The stored snapshot keeps the JSON shape used by the web storefront
//! (`id`, `productId`, `name`, `image`, `unitPrice`, `quantity`,
//! `dedication`), so carts written by either client can be read by the other.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use dulcenube_core::ProductId;

use crate::error::add_breadcrumb;
use crate::storage::Storage;

/// Local storage key holding the cart snapshot.
pub const CART_STORAGE_KEY: &str = "dulcenube_cart_v1";

/// Largest quantity a single line may hold.
pub const MAX_LINE_QUANTITY: u32 = 50;

/// Separator between product ID and dedication in a line key.
const KEY_SEPARATOR: &str = "::";

/// A line in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Line identity: `product_id` + `::` + trimmed dedication.
    #[serde(rename = "id")]
    pub key: String,
    #[serde(rename = "productId")]
    pub product_id: ProductId,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "image", default)]
    pub image_ref: String,
    #[serde(rename = "unitPrice", with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    pub quantity: u32,
    /// Free-text dedication written on the product (e.g. on a cake).
    #[serde(
        rename = "dedication",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub personalization: Option<String>,
}

impl CartLine {
    /// `unit_price × quantity`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Input for [`CartStore::add_item`].
#[derive(Debug, Clone)]
pub struct AddCartItem {
    pub product_id: ProductId,
    pub display_name: String,
    pub image_ref: String,
    pub unit_price: Decimal,
    /// Requested quantity, defaults to 1. Values below 1 count as 1.
    pub quantity: Option<i64>,
    pub personalization: Option<String>,
}

/// Build the line key for a product and optional dedication.
///
/// Dedications that differ only in surrounding whitespace map to the same key.
#[must_use]
pub fn cart_key(product_id: &ProductId, personalization: Option<&str>) -> String {
    let dedication = personalization.map_or("", str::trim);
    format!("{product_id}{KEY_SEPARATOR}{dedication}")
}

/// Clamp any requested quantity into `1..=MAX_LINE_QUANTITY`.
fn clamp_quantity(quantity: i64) -> u32 {
    let clamped = quantity.clamp(1, i64::from(MAX_LINE_QUANTITY));
    u32::try_from(clamped).unwrap_or(1)
}

/// Client-side cart backed by local storage.
pub struct CartStore {
    lines: Vec<CartLine>,
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for CartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartStore")
            .field("lines", &self.lines)
            .finish_non_exhaustive()
    }
}

impl CartStore {
    /// Rehydrate the cart from storage.
    ///
    /// A missing key, malformed JSON or a non-array payload all yield an
    /// empty cart.
    #[must_use]
    pub fn load(storage: Arc<dyn Storage>) -> Self {
        let lines = storage
            .get_item(CART_STORAGE_KEY)
            .map(|raw| parse_snapshot(&raw))
            .unwrap_or_default();

        debug!(lines = lines.len(), "Cart rehydrated");
        Self { lines, storage }
    }

    /// Current lines in insertion order.
    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Look up a line by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.key == key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of quantities over all lines.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    /// Sum of `unit_price × quantity` over all lines.
    #[must_use]
    pub fn total_amount(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Add a product to the cart, merging with an existing line for the same
    /// product and dedication. Returns the key of the affected line.
    pub fn add_item(&mut self, input: AddCartItem) -> String {
        let requested = input.quantity.unwrap_or(1).max(1);
        let dedication = input
            .personalization
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_owned);
        let key = cart_key(&input.product_id, dedication.as_deref());

        if let Some(line) = self.lines.iter_mut().find(|line| line.key == key) {
            line.quantity = clamp_quantity(i64::from(line.quantity).saturating_add(requested));
        } else {
            self.lines.push(CartLine {
                key: key.clone(),
                product_id: input.product_id,
                display_name: input.display_name,
                image_ref: input.image_ref,
                unit_price: input.unit_price.max(Decimal::ZERO),
                quantity: clamp_quantity(requested),
                personalization: dedication,
            });
        }

        add_breadcrumb("cart", "Added item", Some(&[("key", key.as_str())]));
        self.persist();
        key
    }

    /// Remove the line with `key`. Returns whether a line was removed.
    pub fn remove_item(&mut self, key: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| line.key != key);
        let removed = self.lines.len() != before;
        if removed {
            add_breadcrumb("cart", "Removed item", Some(&[("key", key)]));
        }
        self.persist();
        removed
    }

    /// Set the quantity of the line with `key`, clamped to `1..=50`.
    /// Returns whether the line exists.
    pub fn set_item_quantity(&mut self, key: &str, quantity: i64) -> bool {
        let quantity = clamp_quantity(quantity);
        let found = self
            .lines
            .iter_mut()
            .find(|line| line.key == key)
            .map(|line| line.quantity = quantity)
            .is_some();
        self.persist();
        found
    }

    /// Empty the cart.
    pub fn clear(&mut self) {
        self.lines.clear();
        add_breadcrumb("cart", "Cleared cart", None);
        self.persist();
    }

    /// Serialize the current lines in the stored snapshot format.
    #[must_use]
    pub fn snapshot(&self) -> String {
        serde_json::to_string(&self.lines).unwrap_or_else(|_| "[]".to_owned())
    }

    /// Mirror the current lines into storage.
    ///
    /// A failed write is logged; the in-memory cart stays authoritative.
    fn persist(&self) {
        if let Err(e) = self.storage.set_item(CART_STORAGE_KEY, &self.snapshot()) {
            warn!(error = %e, "Failed to persist cart");
        }
    }
}

/// Parse a stored snapshot, treating anything unusable as an empty cart.
fn parse_snapshot(raw: &str) -> Vec<CartLine> {
    match serde_json::from_str::<Vec<CartLine>>(raw) {
        Ok(mut lines) => {
            for line in &mut lines {
                line.quantity = clamp_quantity(i64::from(line.quantity));
                line.unit_price = line.unit_price.max(Decimal::ZERO);
            }
            lines
        }
        Err(e) => {
            warn!(error = %e, "Discarding unreadable cart snapshot");
            Vec::new()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn storage() -> Arc<dyn Storage> {
        Arc::new(MemoryStorage::new())
    }

    fn item(product: &str, price: &str, quantity: Option<i64>, dedication: Option<&str>) -> AddCartItem {
        AddCartItem {
            product_id: ProductId::new(product),
            display_name: format!("Producto {product}"),
            image_ref: format!("https://cdn.dulcenube.com/{product}.jpg"),
            unit_price: price.parse().unwrap(),
            quantity,
            personalization: dedication.map(str::to_owned),
        }
    }

    #[test]
    fn test_cart_key_format() {
        let id = ProductId::new("pastel-chocolate");
        assert_eq!(cart_key(&id, None), "pastel-chocolate::");
        assert_eq!(
            cart_key(&id, Some("  Feliz cumple  ")),
            "pastel-chocolate::Feliz cumple"
        );
    }

    #[test]
    fn test_whitespace_only_differences_share_a_key() {
        let mut cart = CartStore::load(storage());
        let a = cart.add_item(item("p1", "100", Some(1), Some("Para Ana")));
        let b = cart.add_item(item("p1", "100", Some(2), Some("   Para Ana\t")));

        assert_eq!(a, b);
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity, 3);
    }

    #[test]
    fn test_blank_dedication_is_absent() {
        let mut cart = CartStore::load(storage());
        let key = cart.add_item(item("p1", "100", None, Some("   ")));
        assert_eq!(key, "p1::");
        assert_eq!(cart.get(&key).unwrap().personalization, None);

        cart.add_item(item("p1", "100", None, None));
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.total_items(), 2);
    }

    #[test]
    fn test_different_dedications_are_separate_lines() {
        let mut cart = CartStore::load(storage());
        cart.add_item(item("p1", "100", None, Some("Para Ana")));
        cart.add_item(item("p1", "100", None, Some("Para Luis")));
        cart.add_item(item("p2", "50", None, None));

        let keys: Vec<_> = cart.lines().iter().map(|l| l.key.as_str()).collect();
        assert_eq!(keys, vec!["p1::Para Ana", "p1::Para Luis", "p2::"]);
    }

    #[test]
    fn test_repeated_adds_merge_and_cap_at_fifty() {
        let requests = [Some(10), Some(-3), None, Some(0), Some(30), Some(25)];
        let mut cart = CartStore::load(storage());
        for q in requests {
            cart.add_item(item("p1", "20", q, None));
        }

        let expected: i64 = requests.iter().map(|q| q.unwrap_or(1).max(1)).sum();
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(
            i64::from(cart.lines()[0].quantity),
            expected.min(i64::from(MAX_LINE_QUANTITY))
        );
    }

    #[test]
    fn test_single_large_add_is_capped() {
        let mut cart = CartStore::load(storage());
        cart.add_item(item("p1", "20", Some(120), None));
        assert_eq!(cart.lines()[0].quantity, MAX_LINE_QUANTITY);
    }

    #[test]
    fn test_negative_price_is_clamped_to_zero() {
        let mut cart = CartStore::load(storage());
        let key = cart.add_item(item("p1", "-120.50", Some(2), None));

        assert_eq!(cart.get(&key).unwrap().unit_price, Decimal::ZERO);
        assert_eq!(cart.total_amount(), Decimal::ZERO);
    }

    #[test]
    fn test_set_quantity_clamps() {
        let mut cart = CartStore::load(storage());
        let key = cart.add_item(item("p1", "20", Some(5), None));

        assert!(cart.set_item_quantity(&key, 0));
        assert_eq!(cart.get(&key).unwrap().quantity, 1);

        assert!(cart.set_item_quantity(&key, -7));
        assert_eq!(cart.get(&key).unwrap().quantity, 1);

        assert!(cart.set_item_quantity(&key, 51));
        assert_eq!(cart.get(&key).unwrap().quantity, 50);

        assert!(cart.set_item_quantity(&key, 12));
        assert_eq!(cart.get(&key).unwrap().quantity, 12);
    }

    #[test]
    fn test_set_quantity_unknown_key_is_noop() {
        let mut cart = CartStore::load(storage());
        cart.add_item(item("p1", "20", Some(2), None));
        assert!(!cart.set_item_quantity("nope::", 9));
        assert_eq!(cart.total_items(), 2);
    }

    #[test]
    fn test_remove_item() {
        let mut cart = CartStore::load(storage());
        let key = cart.add_item(item("p1", "20", Some(2), None));
        cart.add_item(item("p2", "30", Some(1), None));

        assert!(!cart.remove_item("missing::"));
        assert!(cart.remove_item(&key));
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].product_id.as_str(), "p2");
    }

    #[test]
    fn test_totals_are_recomputed_after_removal() {
        let mut cart = CartStore::load(storage());
        let cake = cart.add_item(item("cake", "450.50", Some(2), None));
        cart.add_item(item("cookie", "15", Some(4), None));

        assert_eq!(cart.total_items(), 6);
        assert_eq!(cart.total_amount(), "961.00".parse::<Decimal>().unwrap());

        cart.remove_item(&cake);
        assert_eq!(cart.total_items(), 4);
        assert_eq!(cart.total_amount(), Decimal::from(60));
    }

    #[test]
    fn test_clear() {
        let store = storage();
        let mut cart = CartStore::load(Arc::clone(&store));
        cart.add_item(item("p1", "20", Some(2), None));
        cart.clear();

        assert!(cart.is_empty());
        assert_eq!(cart.total_amount(), Decimal::ZERO);
        assert_eq!(store.get_item(CART_STORAGE_KEY).as_deref(), Some("[]"));
    }

    #[test]
    fn test_every_mutation_is_persisted() {
        let store = storage();
        let mut cart = CartStore::load(Arc::clone(&store));
        let key = cart.add_item(item("p1", "20", Some(2), Some("Hola")));
        cart.set_item_quantity(&key, 7);

        let reloaded = CartStore::load(Arc::clone(&store));
        assert_eq!(reloaded.lines(), cart.lines());
        assert_eq!(reloaded.lines()[0].quantity, 7);
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_order() {
        let store = storage();
        let mut cart = CartStore::load(Arc::clone(&store));
        cart.add_item(item("b", "12.5", Some(3), Some("Uno")));
        cart.add_item(item("a", "99.99", Some(1), None));
        cart.add_item(item("c", "0", Some(50), None));

        let snapshot = cart.snapshot();
        let other = storage();
        other.set_item(CART_STORAGE_KEY, &snapshot).unwrap();

        let rehydrated = CartStore::load(other);
        assert_eq!(rehydrated.lines(), cart.lines());
    }

    #[test]
    fn test_malformed_snapshots_load_empty() {
        for raw in ["not-json", "42", "{\"id\":\"x\"}", "null", "[{\"id\":1}]"] {
            let store = storage();
            store.set_item(CART_STORAGE_KEY, raw).unwrap();
            let cart = CartStore::load(store);
            assert!(cart.is_empty(), "expected empty cart for {raw}");
        }
    }

    #[test]
    fn test_stored_negative_price_loads_as_zero() {
        let raw = r#"[{"id":"p1::","productId":"p1","name":"Pastel","image":"",
            "unitPrice":-80,"quantity":2}]"#;
        let store = storage();
        store.set_item(CART_STORAGE_KEY, raw).unwrap();

        let cart = CartStore::load(store);
        assert_eq!(cart.lines()[0].unit_price, Decimal::ZERO);
        assert_eq!(cart.total_items(), 2);
    }

    #[test]
    fn test_reads_web_storefront_snapshot() {
        let raw = r#"[
            {"id":"p1::Feliz cumple","productId":"p1","name":"Pastel de fresa",
             "image":"https://cdn/p1.jpg","unitPrice":450,"quantity":2,"dedication":"Feliz cumple"},
            {"id":"p2::","productId":"p2","name":"Galletas","image":"https://cdn/p2.jpg",
             "unitPrice":35.5,"quantity":3}
        ]"#;
        let store = storage();
        store.set_item(CART_STORAGE_KEY, raw).unwrap();

        let cart = CartStore::load(store);
        assert_eq!(cart.lines().len(), 2);
        assert_eq!(
            cart.lines()[0].personalization.as_deref(),
            Some("Feliz cumple")
        );
        assert_eq!(cart.total_amount(), "1006.5".parse::<Decimal>().unwrap());
    }
}
