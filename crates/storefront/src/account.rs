//! Account pages: order history and saved delivery addresses.
//!
//! Every call runs with the shopper's access token so row-level security
//! restricts results to their own rows; the explicit `user_id` filters keep
//! the queries correct for staff accounts too.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use dulcenube_core::{AddressId, OrderId, OrderStatus, ProductId, UserId};

use crate::supabase::{RestClient, Session, SupabaseError};

/// A line of a stored order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    #[serde(default)]
    pub dedication: Option<String>,
}

impl OrderItem {
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// A stored order with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "order_items", default)]
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Whether the order belongs under "current orders".
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.status.is_open()
    }
}

/// A saved delivery address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    pub label: String,
    pub recipient_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub street: String,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub postal_code: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl Address {
    /// Single-line rendering for listings.
    #[must_use]
    pub fn one_line(&self) -> String {
        let mut parts = vec![self.street.as_str(), self.city.as_str()];
        if let Some(state) = self.state.as_deref() {
            parts.push(state);
        }
        parts.push(self.postal_code.as_str());
        parts.join(", ")
    }
}

/// Fields of a new address. The owner is taken from the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewAddress {
    pub label: String,
    pub recipient_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub street: String,
    pub city: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub postal_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub is_default: bool,
}

#[derive(Serialize)]
struct AddressInsert<'a> {
    user_id: &'a UserId,
    #[serde(flatten)]
    address: &'a NewAddress,
}

#[derive(Serialize)]
struct DefaultFlag {
    is_default: bool,
}

/// Order history and address book of the signed-in shopper.
#[derive(Debug, Clone)]
pub struct AccountService {
    rest: RestClient,
}

impl AccountService {
    #[must_use]
    pub const fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    fn rest(&self, session: &Session) -> RestClient {
        self.rest.with_access_token(&session.access_token)
    }

    /// Orders of the shopper, newest first, with their lines.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the read fails.
    #[instrument(skip_all, fields(user_id = %session.user_id()))]
    pub async fn orders(&self, session: &Session) -> Result<Vec<Order>, SupabaseError> {
        self.rest(session)
            .table("orders")
            .select("*,order_items(*)")
            .eq("user_id", session.user_id())
            .order("created_at", false)
            .fetch_all()
            .await
    }

    /// Saved addresses, default first.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the read fails.
    #[instrument(skip_all, fields(user_id = %session.user_id()))]
    pub async fn addresses(&self, session: &Session) -> Result<Vec<Address>, SupabaseError> {
        self.rest(session)
            .table("addresses")
            .select("*")
            .eq("user_id", session.user_id())
            .order("is_default", false)
            .order("created_at", true)
            .fetch_all()
            .await
    }

    /// Save a new address. A new default address demotes the previous one.
    ///
    /// # Errors
    ///
    /// Returns the backend error if either write fails.
    #[instrument(skip_all, fields(user_id = %session.user_id()))]
    pub async fn add_address(
        &self,
        session: &Session,
        address: &NewAddress,
    ) -> Result<Address, SupabaseError> {
        if address.is_default {
            self.clear_default(session).await?;
        }

        let created: Address = self
            .rest(session)
            .table("addresses")
            .select("*")
            .insert_returning(&AddressInsert {
                user_id: session.user_id(),
                address,
            })
            .await?;

        info!(address_id = %created.id, "Address added");
        Ok(created)
    }

    /// Delete one of the shopper's addresses.
    ///
    /// # Errors
    ///
    /// Returns `SupabaseError::NotFound` if the shopper has no address with
    /// this id, or the backend error if the delete fails.
    #[instrument(skip_all, fields(user_id = %session.user_id(), address_id = %id))]
    pub async fn delete_address(&self, session: &Session, id: &AddressId) -> Result<(), SupabaseError> {
        let removed: Vec<Address> = self
            .rest(session)
            .table("addresses")
            .select("*")
            .eq("id", id)
            .eq("user_id", session.user_id())
            .delete_returning()
            .await?;
        if removed.is_empty() {
            return Err(SupabaseError::NotFound("addresses".to_string()));
        }
        info!("Address deleted");
        Ok(())
    }

    /// Make `id` the only default address. The other addresses are only
    /// demoted once the target is known to belong to the shopper.
    ///
    /// # Errors
    ///
    /// Returns `SupabaseError::NotFound` if the shopper has no address with
    /// this id, or the backend error if either update fails.
    #[instrument(skip_all, fields(user_id = %session.user_id(), address_id = %id))]
    pub async fn set_default_address(
        &self,
        session: &Session,
        id: &AddressId,
    ) -> Result<(), SupabaseError> {
        let promoted: Vec<Address> = self
            .rest(session)
            .table("addresses")
            .select("*")
            .eq("id", id)
            .eq("user_id", session.user_id())
            .update_returning(&DefaultFlag { is_default: true })
            .await?;
        if promoted.is_empty() {
            return Err(SupabaseError::NotFound("addresses".to_string()));
        }

        self.rest(session)
            .table("addresses")
            .eq("user_id", session.user_id())
            .eq("is_default", true)
            .neq("id", id)
            .update(&DefaultFlag { is_default: false })
            .await?;
        info!("Default address changed");
        Ok(())
    }

    async fn clear_default(&self, session: &Session) -> Result<(), SupabaseError> {
        self.rest(session)
            .table("addresses")
            .eq("user_id", session.user_id())
            .eq("is_default", true)
            .update(&DefaultFlag { is_default: false })
            .await
    }
}
