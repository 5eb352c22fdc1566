//! Contact links.

use dulcenube_core::Email;
use dulcenube_storefront::AppError;
use dulcenube_storefront::links::{greeting_message, support_mailto, whatsapp_url};

use super::Context;

/// `dulcenube support`
pub fn mail(ctx: &Context, name: &str, email: &str, message: &str) -> Result<(), AppError> {
    let from = Email::parse(email)?;
    if message.trim().is_empty() {
        return Err(AppError::BadRequest("Escribe tu mensaje.".to_string()));
    }
    let config = ctx.storefront.config();
    println!(
        "{}",
        support_mailto(&config.support_email, &config.store, name.trim(), from.as_str(), message.trim())
    );
    Ok(())
}

/// `dulcenube whatsapp`
pub fn whatsapp(ctx: &Context) {
    let config = ctx.storefront.config();
    println!(
        "{}",
        whatsapp_url(&config.whatsapp_phone, &greeting_message(&config.store))
    );
}
