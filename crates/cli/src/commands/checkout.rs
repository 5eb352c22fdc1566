//! Checkout command.

use dulcenube_storefront::AppError;
use dulcenube_storefront::checkout::{CheckoutCustomer, GuestContact};

use super::Context;

/// `dulcenube checkout`
///
/// Orders as the signed-in shopper unless guest details are given.
pub async fn run(
    ctx: &Context,
    guest: Option<(String, String)>,
    guest_phone: Option<&str>,
) -> Result<(), AppError> {
    let customer = match guest {
        Some((name, email)) => CheckoutCustomer::Guest(GuestContact::new(&name, &email, guest_phone)?),
        None => CheckoutCustomer::member(ctx.snapshot().session.as_ref())?,
    };

    let mut cart = ctx.storefront.cart();
    let receipt = ctx
        .storefront
        .checkout()
        .create_order(&customer, &mut cart)
        .await?;

    let store = &ctx.storefront.config().store;
    println!("Pedido creado con exito. ID: {}", receipt.order_id);
    println!(
        "{} articulos, total {}",
        receipt.total_items,
        store.format(receipt.total_amount)
    );
    Ok(())
}
