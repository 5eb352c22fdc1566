//! Catalog browsing commands.

use rust_decimal::Decimal;

use dulcenube_core::{CategoryId, ProductId, SubcategoryId};
use dulcenube_storefront::AppError;
use dulcenube_storefront::catalog::{
    Catalog, CatalogFilter, Product, RELATED_PRODUCTS_LIMIT, SortMode,
};
use dulcenube_storefront::links::{product_inquiry_message, whatsapp_url};

use super::Context;

/// Filters as given on the command line. Categories accept a slug or an ID.
pub struct FilterArgs {
    pub query: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub dietary: Option<String>,
    pub max_price: Option<Decimal>,
    pub sort: SortMode,
}

impl FilterArgs {
    fn resolve(self, catalog: &Catalog) -> CatalogFilter {
        let category = self.category.map(|c| {
            catalog
                .category_by_slug(&c)
                .map_or_else(|| CategoryId::new(c.as_str()), |found| found.id.clone())
        });
        let subcategory = self.subcategory.map(|s| {
            catalog
                .categories
                .iter()
                .flat_map(|c| &c.subcategories)
                .find(|sub| sub.slug == s)
                .map_or_else(|| SubcategoryId::new(s.as_str()), |found| found.id.clone())
        });

        CatalogFilter {
            query: self.query,
            category,
            subcategory,
            dietary: self.dietary,
            price_cap: self.max_price,
            sort: self.sort,
        }
    }
}

fn product_line(catalog: &Catalog, product: &Product) -> String {
    let mut flags = Vec::new();
    if product.featured {
        flags.push("destacado".to_string());
    }
    if !product.in_stock {
        flags.push("agotado".to_string());
    }
    flags.push(format!("{}h", product.prep_hours));
    format!(
        "  {:<12} {:<32} {:>8}  [{}]",
        product.id,
        product.name,
        catalog.store.format(product.price),
        flags.join(", ")
    )
}

/// `dulcenube catalog`
pub async fn list(ctx: &Context, args: FilterArgs) -> Result<(), AppError> {
    let catalog = ctx.storefront.catalog().load().await?;
    let filter = args.resolve(&catalog);

    println!("{}", catalog.store.name);
    println!();
    for category in &catalog.categories {
        let subcategories: Vec<&str> = category
            .subcategories
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        println!(
            "{} {} ({}){}",
            category.emoji,
            category.name,
            category.slug,
            if subcategories.is_empty() {
                String::new()
            } else {
                format!(": {}", subcategories.join(", "))
            }
        );
    }

    let products = filter.apply(&catalog);
    println!();
    println!(
        "{} resultados de {} productos (hasta {})",
        products.len(),
        catalog.products.len(),
        catalog.store.format(filter.price_cap.unwrap_or_else(|| catalog.max_price()))
    );
    for product in products {
        println!("{}", product_line(&catalog, product));
    }

    let dietary = catalog.dietary_options();
    if !dietary.is_empty() {
        println!();
        println!("Opciones dieteticas: {}", dietary.join(", "));
    }
    Ok(())
}

/// `dulcenube product <id>`
pub async fn show(
    ctx: &Context,
    id: &str,
    quantity: u32,
    dedication: Option<&str>,
) -> Result<(), AppError> {
    let catalog = ctx.storefront.catalog().load().await?;
    let product = catalog
        .product(&ProductId::new(id))
        .ok_or_else(|| AppError::NotFound(format!("el producto {id}")))?;

    println!("{} ({})", product.name, product.sku);
    println!("{}", catalog.store.format(product.price));
    if !product.description.is_empty() {
        println!("{}", product.description);
    }
    if !product.portions.is_empty() {
        println!("Porciones: {}", product.portions);
    }
    println!("Preparacion: {} horas", product.prep_hours);
    if !product.dietary.is_empty() {
        println!("Dieta: {}", product.dietary.join(", "));
    }
    if !product.in_stock {
        println!("Agotado por ahora");
    }

    let related = catalog.related_products(product, RELATED_PRODUCTS_LIMIT);
    if !related.is_empty() {
        println!();
        println!("Tambien te puede gustar:");
        for other in related {
            println!("{}", product_line(&catalog, other));
        }
    }

    let message = product_inquiry_message(product, quantity.max(1), dedication, &catalog.store);
    println!();
    println!(
        "Pedir por WhatsApp: {}",
        whatsapp_url(&ctx.storefront.config().whatsapp_phone, &message)
    );
    Ok(())
}
