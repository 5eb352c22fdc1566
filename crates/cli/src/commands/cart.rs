//! Cart commands.

use dulcenube_core::ProductId;
use dulcenube_storefront::catalog::StoreInfo;
use dulcenube_storefront::links::{order_summary_message, whatsapp_url};
use dulcenube_storefront::{AddCartItem, AppError, CartStore};

use super::Context;

fn print_cart(cart: &CartStore, store: &StoreInfo) {
    if cart.is_empty() {
        println!("Tu carrito esta vacio.");
        return;
    }

    for line in cart.lines() {
        let dedication = line
            .personalization
            .as_deref()
            .map(|d| format!(" (Dedicatoria: {d})"))
            .unwrap_or_default();
        println!(
            "  {:<24} {} x{} - {}{dedication}",
            line.key,
            line.display_name,
            line.quantity,
            store.format(line.line_total())
        );
    }
    println!(
        "Total: {} ({} articulos)",
        store.format(cart.total_amount()),
        cart.total_items()
    );
}

/// `dulcenube cart show`
pub fn show(ctx: &Context) {
    print_cart(&ctx.storefront.cart(), &ctx.storefront.config().store);
}

/// `dulcenube cart add`
pub async fn add(
    ctx: &Context,
    product_id: &str,
    quantity: Option<i64>,
    dedication: Option<String>,
) -> Result<(), AppError> {
    let product = ctx
        .storefront
        .catalog()
        .product(&ProductId::new(product_id))
        .await?;

    let mut cart = ctx.storefront.cart();
    let key = cart.add_item(AddCartItem {
        product_id: product.id.clone(),
        display_name: product.name.clone(),
        image_ref: product.primary_image().to_string(),
        unit_price: product.price,
        quantity,
        personalization: dedication,
    });

    let quantity = cart.get(&key).map_or(0, |line| line.quantity);
    println!("{} en el carrito: {quantity}", product.name);
    Ok(())
}

/// `dulcenube cart remove`
pub fn remove(ctx: &Context, key: &str) -> Result<(), AppError> {
    let mut cart = ctx.storefront.cart();
    if !cart.remove_item(key) {
        return Err(AppError::NotFound(format!("la linea {key}")));
    }
    print_cart(&cart, &ctx.storefront.config().store);
    Ok(())
}

/// `dulcenube cart set`
pub fn set(ctx: &Context, key: &str, quantity: i64) -> Result<(), AppError> {
    let mut cart = ctx.storefront.cart();
    if !cart.set_item_quantity(key, quantity) {
        return Err(AppError::NotFound(format!("la linea {key}")));
    }
    print_cart(&cart, &ctx.storefront.config().store);
    Ok(())
}

/// `dulcenube cart clear`
pub fn clear(ctx: &Context) {
    ctx.storefront.cart().clear();
    println!("Carrito vaciado.");
}

/// `dulcenube cart whatsapp`
pub fn whatsapp(ctx: &Context) -> Result<(), AppError> {
    let cart = ctx.storefront.cart();
    if cart.is_empty() {
        return Err(AppError::BadRequest("Tu carrito esta vacio.".to_string()));
    }
    let config = ctx.storefront.config();
    let message = order_summary_message(cart.lines(), &config.store);
    println!("{}", whatsapp_url(&config.whatsapp_phone, &message));
    Ok(())
}
