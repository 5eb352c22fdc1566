//! Sign-in and sign-out commands.

use dulcenube_storefront::AppError;

use super::{Context, greeting};

/// `dulcenube login magic-link <email>`
pub async fn magic_link(ctx: &Context, email: &str) -> Result<(), AppError> {
    let email = ctx.storefront.send_magic_link(email).await?;
    println!("Te enviamos un enlace de acceso a {email}.");
    println!("Abre el enlace y pasa la URL final a `dulcenube callback <url>`.");
    Ok(())
}

/// `dulcenube login google`
pub fn google(ctx: &Context) -> Result<(), AppError> {
    let url = ctx.storefront.social_sign_in_url()?;
    println!("Abre este enlace para entrar con Google:");
    println!("{url}");
    println!("Despues pasa la URL final a `dulcenube callback <url>`.");
    Ok(())
}

/// `dulcenube callback <url>`
///
/// The bootstrap already ran on the URL; report what it did.
pub fn callback(ctx: &Context) {
    let snapshot = ctx.snapshot();
    match &snapshot.session {
        Some(session) => println!("{}", greeting(session, snapshot.profile.as_ref())),
        None => println!("No se pudo iniciar sesion con este enlace."),
    }
    println!("URL: {}", ctx.bootstrapped.location);
}

/// `dulcenube logout`
pub async fn logout(ctx: &Context) -> Result<(), AppError> {
    ctx.storefront.sign_out().await?;
    println!("Sesion cerrada.");
    Ok(())
}
