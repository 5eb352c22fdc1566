//! Order submission.
//!
//! An order is written in two steps: the `orders` row (returning its ID),
//! then one `order_items` row per cart line. The cart is cleared only when
//! both writes succeed; if the items fail the order row stays behind and the
//! shopper keeps their cart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use dulcenube_core::{Email, EmailError, OrderId, OrderStatus, ProductId, UserId};

use crate::cart::{CartLine, CartStore};
use crate::error::add_breadcrumb;
use crate::supabase::{RestClient, Session, SupabaseError};

/// Errors from [`CheckoutService::create_order`].
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,

    #[error("sign-in required to place a member order")]
    SignInRequired,

    #[error("guest name is required")]
    MissingGuestName,

    #[error("invalid guest email: {0}")]
    InvalidGuestEmail(#[from] EmailError),

    #[error("order insert failed: {0}")]
    OrderInsert(#[source] SupabaseError),

    /// The order row exists but its lines could not be written.
    #[error("order {order_id} created but items insert failed: {source}")]
    ItemsInsert {
        order_id: OrderId,
        #[source]
        source: SupabaseError,
    },
}

impl CheckoutError {
    /// Whether the backend rejected a write, as opposed to invalid input.
    #[must_use]
    pub const fn is_backend_failure(&self) -> bool {
        matches!(self, Self::OrderInsert(_) | Self::ItemsInsert { .. })
    }

    /// Message shown to the shopper.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyCart => "Tu carrito esta vacio.".to_string(),
            Self::SignInRequired => {
                "Inicia sesion (Magic Link por email) para crear tu pedido.".to_string()
            }
            Self::MissingGuestName => "Ingresa tu nombre para crear el pedido.".to_string(),
            Self::InvalidGuestEmail(_) => "Ingresa un email valido.".to_string(),
            Self::OrderInsert(_) => "No se pudo crear el pedido. Intenta de nuevo.".to_string(),
            Self::ItemsInsert { order_id, .. } => {
                format!("El pedido {order_id} se creo, pero fallo al guardar los items.")
            }
        }
    }
}

/// Contact details for an order placed without an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestContact {
    pub name: String,
    pub email: Email,
    pub phone: Option<String>,
}

impl GuestContact {
    /// Validate guest contact fields.
    ///
    /// # Errors
    ///
    /// Returns `MissingGuestName` for a blank name and `InvalidGuestEmail`
    /// for an unusable email.
    pub fn new(name: &str, email: &str, phone: Option<&str>) -> Result<Self, CheckoutError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CheckoutError::MissingGuestName);
        }
        Ok(Self {
            name: name.to_string(),
            email: Email::parse(email)?,
            phone: phone
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        })
    }
}

/// Who is placing the order.
#[derive(Debug, Clone)]
pub enum CheckoutCustomer {
    /// A signed-in shopper; the order is written with their token.
    Member(Session),
    Guest(GuestContact),
}

impl CheckoutCustomer {
    /// A member customer from the resolved session.
    ///
    /// # Errors
    ///
    /// Returns `SignInRequired` when no session is resolved.
    pub fn member(session: Option<&Session>) -> Result<Self, CheckoutError> {
        session
            .cloned()
            .map(Self::Member)
            .ok_or(CheckoutError::SignInRequired)
    }
}

/// Row written to `orders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrder {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_phone: Option<String>,
    pub status: OrderStatus,
    pub total_amount: Decimal,
}

impl NewOrder {
    fn for_customer(customer: &CheckoutCustomer, total_amount: Decimal) -> Self {
        let mut order = Self {
            user_id: None,
            guest_name: None,
            guest_email: None,
            guest_phone: None,
            status: OrderStatus::Pending,
            total_amount,
        };
        match customer {
            CheckoutCustomer::Member(session) => order.user_id = Some(session.user_id().clone()),
            CheckoutCustomer::Guest(guest) => {
                order.guest_name = Some(guest.name.clone());
                order.guest_email = Some(guest.email.as_str().to_string());
                order.guest_phone.clone_from(&guest.phone);
            }
        }
        order
    }
}

/// Row written to `order_items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrderItem {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub dedication: Option<String>,
}

impl NewOrderItem {
    fn from_line(order_id: &OrderId, line: &CartLine) -> Self {
        Self {
            order_id: order_id.clone(),
            product_id: line.product_id.clone(),
            product_name: line.display_name.clone(),
            unit_price: line.unit_price,
            quantity: line.quantity,
            dedication: line.personalization.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedOrder {
    id: OrderId,
}

/// A successfully submitted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReceipt {
    pub order_id: OrderId,
    pub total_amount: Decimal,
    pub total_items: u32,
    /// The cart lines as they were submitted.
    pub lines: Vec<CartLine>,
}

/// Writes orders to the backend.
#[derive(Debug, Clone)]
pub struct CheckoutService {
    rest: RestClient,
}

impl CheckoutService {
    #[must_use]
    pub const fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// Submit the cart as an order and clear it on success.
    ///
    /// # Errors
    ///
    /// Returns `EmptyCart` before touching the backend, `OrderInsert` when
    /// the order row is rejected, and `ItemsInsert` when the order was
    /// created but its lines were not. The cart is untouched on error.
    #[instrument(skip_all, fields(lines = cart.lines().len()))]
    pub async fn create_order(
        &self,
        customer: &CheckoutCustomer,
        cart: &mut CartStore,
    ) -> Result<OrderReceipt, CheckoutError> {
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let rest = match customer {
            CheckoutCustomer::Member(session) => self.rest.with_access_token(&session.access_token),
            CheckoutCustomer::Guest(_) => self.rest.clone(),
        };

        let total_amount = cart.total_amount();
        let order = NewOrder::for_customer(customer, total_amount);

        let created: CreatedOrder = rest
            .table("orders")
            .select("id")
            .insert_returning(&order)
            .await
            .map_err(|e| {
                warn!(error = %e, "Order insert failed");
                CheckoutError::OrderInsert(e)
            })?;

        let items: Vec<NewOrderItem> = cart
            .lines()
            .iter()
            .map(|line| NewOrderItem::from_line(&created.id, line))
            .collect();

        if let Err(e) = rest.table("order_items").insert(&items).await {
            warn!(order_id = %created.id, error = %e, "Order items insert failed");
            return Err(CheckoutError::ItemsInsert {
                order_id: created.id,
                source: e,
            });
        }

        let receipt = OrderReceipt {
            order_id: created.id,
            total_amount,
            total_items: cart.total_items(),
            lines: cart.lines().to_vec(),
        };
        cart.clear();

        info!(order_id = %receipt.order_id, total = %receipt.total_amount, "Order created");
        add_breadcrumb(
            "checkout",
            "Order created",
            Some(&[("order_id", receipt.order_id.as_str())]),
        );
        Ok(receipt)
    }
}
