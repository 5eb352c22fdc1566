//! Account commands: overview, orders and addresses.

use clap::Args;

use dulcenube_core::AddressId;
use dulcenube_storefront::AppError;
use dulcenube_storefront::account::NewAddress;
use dulcenube_storefront::supabase::SupabaseError;

use super::{Context, greeting};

/// Fields of `dulcenube account add-address`.
#[derive(Args)]
pub struct AddressArgs {
    /// Short name, e.g. "Casa"
    #[arg(long)]
    label: String,

    /// Who receives the order
    #[arg(long)]
    recipient: String,

    #[arg(long)]
    street: String,

    #[arg(long)]
    city: String,

    #[arg(long)]
    state: Option<String>,

    #[arg(long)]
    postal_code: String,

    #[arg(long)]
    phone: Option<String>,

    /// Delivery notes
    #[arg(long)]
    notes: Option<String>,

    /// Make this the default address
    #[arg(long)]
    default: bool,
}

impl From<AddressArgs> for NewAddress {
    fn from(args: AddressArgs) -> Self {
        Self {
            label: args.label,
            recipient_name: args.recipient,
            phone: args.phone,
            street: args.street,
            city: args.city,
            state: args.state,
            postal_code: args.postal_code,
            notes: args.notes,
            is_default: args.default,
        }
    }
}

/// `dulcenube account`
pub fn overview(ctx: &Context) -> Result<(), AppError> {
    let snapshot = ctx.snapshot();
    let session = ctx.require_session()?;
    println!("{}", greeting(&session, snapshot.profile.as_ref()));
    if let Some(email) = session.user.email.as_deref() {
        println!("Email: {email}");
    }
    if let Some(profile) = &snapshot.profile {
        println!("Rol: {}", profile.role);
    }
    println!();
    println!("Mis pedidos:      dulcenube account orders");
    println!("Mis direcciones:  dulcenube account addresses");
    Ok(())
}

/// `dulcenube account orders`
pub async fn orders(ctx: &Context) -> Result<(), AppError> {
    let session = ctx.require_session()?;
    let orders = ctx.storefront.account().orders(&session).await?;
    let store = &ctx.storefront.config().store;

    if orders.is_empty() {
        println!("Aun no tienes pedidos.");
        return Ok(());
    }

    let (current, past): (Vec<_>, Vec<_>) = orders.iter().partition(|o| o.is_open());
    for (title, group) in [("Pedidos actuales", current), ("Historial", past)] {
        if group.is_empty() {
            continue;
        }
        println!("{title}:");
        for order in group {
            println!(
                "  {} {} {} - {}",
                order.created_at.format("%Y-%m-%d"),
                order.id,
                order.status,
                store.format(order.total_amount)
            );
            for item in &order.items {
                println!(
                    "      {} x{} - {}",
                    item.product_name,
                    item.quantity,
                    store.format(item.line_total())
                );
            }
        }
    }
    Ok(())
}

/// `dulcenube account addresses`
pub async fn addresses(ctx: &Context) -> Result<(), AppError> {
    let session = ctx.require_session()?;
    let addresses = ctx.storefront.account().addresses(&session).await?;

    if addresses.is_empty() {
        println!("No tienes direcciones guardadas.");
        return Ok(());
    }
    for address in addresses {
        println!(
            "  {} {}{} - {} ({})",
            address.id,
            address.label,
            if address.is_default { " [principal]" } else { "" },
            address.one_line(),
            address.recipient_name
        );
    }
    Ok(())
}

/// `dulcenube account add-address`
pub async fn add_address(ctx: &Context, args: AddressArgs) -> Result<(), AppError> {
    let session = ctx.require_session()?;
    let address = ctx
        .storefront
        .account()
        .add_address(&session, &args.into())
        .await?;
    println!("Direccion guardada: {} ({})", address.label, address.id);
    Ok(())
}

/// `dulcenube account delete-address <id>`
pub async fn delete_address(ctx: &Context, id: &str) -> Result<(), AppError> {
    let session = ctx.require_session()?;
    ctx.storefront
        .account()
        .delete_address(&session, &AddressId::new(id))
        .await
        .map_err(|e| missing_address(e, id))?;
    println!("Direccion eliminada.");
    Ok(())
}

/// `dulcenube account default-address <id>`
pub async fn default_address(ctx: &Context, id: &str) -> Result<(), AppError> {
    let session = ctx.require_session()?;
    ctx.storefront
        .account()
        .set_default_address(&session, &AddressId::new(id))
        .await
        .map_err(|e| missing_address(e, id))?;
    println!("Direccion principal actualizada.");
    Ok(())
}

fn missing_address(error: SupabaseError, id: &str) -> AppError {
    match error {
        SupabaseError::NotFound(_) => AppError::NotFound(format!("la direccion {id}")),
        other => AppError::Backend(other),
    }
}
