//! DulceNube storefront library.
//!
//! Everything the storefront front ends need, as a library:
//!
//! - [`cart`] - Client-side cart persisted to local storage
//! - [`session`] - Redirect bootstrap and published auth state
//! - [`profile`] - Profile reconciliation on identity change
//! - [`catalog`] - Cached product catalog and browse filters
//! - [`checkout`] - Order submission
//! - [`account`] - Order history and saved addresses
//! - [`links`] - WhatsApp and support deep links
//! - [`supabase`] - GoTrue and PostgREST clients
//! - [`state`] - The [`Storefront`] context wiring it all together

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod account;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod error;
pub mod links;
pub mod profile;
pub mod session;
pub mod state;
pub mod storage;
pub mod supabase;

pub use cart::{AddCartItem, CartLine, CartStore};
pub use config::StorefrontConfig;
pub use error::{AppError, Result};
pub use state::Storefront;
