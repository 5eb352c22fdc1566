//! Integration tests for order history and the address book.
#![allow(clippy::unwrap_used)]

use rust_decimal::Decimal;
use serde_json::json;
use tempfile::TempDir;
use url::Url;

use dulcenube_core::{AddressId, OrderStatus};
use dulcenube_integration_tests::FakeSupabase;
use dulcenube_storefront::Storefront;
use dulcenube_storefront::account::NewAddress;
use dulcenube_storefront::supabase::{Session, SupabaseError};

async fn setup() -> (FakeSupabase, TempDir, Storefront) {
    let fake = FakeSupabase::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let storefront = Storefront::new(fake.storefront_config(dir.path()).unwrap()).unwrap();
    (fake, dir, storefront)
}

async fn sign_in(fake: &FakeSupabase, storefront: &Storefront, email: &str) -> Session {
    let user_id = fake.add_user(email, json!({}));
    let (access, refresh) = fake.issue_tokens(&user_id);
    let location = Url::parse(&format!(
        "http://localhost:5173/#access_token={access}&refresh_token={refresh}"
    ))
    .unwrap();
    storefront.bootstrap(&location).await.session.unwrap()
}

fn address(label: &str, is_default: bool) -> NewAddress {
    NewAddress {
        label: label.to_string(),
        recipient_name: "Ana Lopez".to_string(),
        street: "Av. Insurgentes Sur 1602".to_string(),
        city: "Ciudad de Mexico".to_string(),
        state: Some("CDMX".to_string()),
        postal_code: "03940".to_string(),
        is_default,
        ..NewAddress::default()
    }
}

// =============================================================================
// Orders
// =============================================================================

#[tokio::test]
async fn test_orders_newest_first_with_items() {
    let (fake, _dir, storefront) = setup().await;
    let session = sign_in(&fake, &storefront, "ana@example.com").await;
    let user_id = session.user_id().as_str();
    fake.insert_rows(
        "orders",
        vec![
            json!({"id": "o-1", "user_id": user_id, "status": "delivered", "total_amount": "450", "created_at": "2026-03-01T10:00:00Z"}),
            json!({"id": "o-2", "user_id": user_id, "status": "preparing", "total_amount": "240", "created_at": "2026-05-10T09:30:00Z"}),
            json!({"id": "o-other", "user_id": "someone-else", "status": "pending", "total_amount": "100", "created_at": "2026-06-01T00:00:00Z"}),
        ],
    );
    fake.insert_rows(
        "order_items",
        vec![
            json!({"id": "i-1", "order_id": "o-1", "product_id": "p-fresa", "product_name": "Pastel de fresa", "unit_price": "450", "quantity": 1, "dedication": "Felicidades"}),
            json!({"id": "i-2", "order_id": "o-2", "product_id": "p-avena", "product_name": "Galletas de avena", "unit_price": "120", "quantity": 2, "dedication": null}),
        ],
    );

    let orders = storefront.account().orders(&session).await.unwrap();

    let ids: Vec<&str> = orders.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, ["o-2", "o-1"]);
    assert!(orders[0].is_open());
    assert!(!orders[1].is_open());
    assert_eq!(orders[1].status, OrderStatus::Delivered);
    assert_eq!(orders[0].items[0].line_total(), Decimal::from(240));
    assert_eq!(orders[1].items[0].dedication.as_deref(), Some("Felicidades"));
}

#[tokio::test]
async fn test_orders_require_valid_token() {
    let (fake, _dir, storefront) = setup().await;
    let session = sign_in(&fake, &storefront, "ana@example.com").await;
    fake.revoke_access_token(&session.access_token);

    let err = storefront.account().orders(&session).await.unwrap_err();

    assert_eq!(err.status(), Some(401));
}

// =============================================================================
// Addresses
// =============================================================================

#[tokio::test]
async fn test_add_and_list_addresses() {
    let (fake, _dir, storefront) = setup().await;
    let session = sign_in(&fake, &storefront, "ana@example.com").await;
    let account = storefront.account();

    let casa = account.add_address(&session, &address("Casa", true)).await.unwrap();
    let oficina = account
        .add_address(&session, &address("Oficina", false))
        .await
        .unwrap();

    assert_eq!(casa.user_id, *session.user_id());
    assert!(casa.is_default);
    assert!(!oficina.is_default);
    assert_eq!(
        casa.one_line(),
        "Av. Insurgentes Sur 1602, Ciudad de Mexico, CDMX, 03940"
    );

    let listed = account.addresses(&session).await.unwrap();
    let labels: Vec<&str> = listed.iter().map(|a| a.label.as_str()).collect();
    assert_eq!(labels, ["Casa", "Oficina"]);

    let insert = &fake.requests_to("POST", "/rest/v1/addresses")[0];
    assert_eq!(insert.body["user_id"], json!(session.user_id().as_str()));
    assert!(insert.body.get("phone").is_none());
}

#[tokio::test]
async fn test_new_default_address_demotes_previous() {
    let (fake, _dir, storefront) = setup().await;
    let session = sign_in(&fake, &storefront, "ana@example.com").await;
    let account = storefront.account();

    account.add_address(&session, &address("Casa", true)).await.unwrap();
    let oficina = account
        .add_address(&session, &address("Oficina", true))
        .await
        .unwrap();

    let defaults: Vec<_> = account
        .addresses(&session)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.is_default)
        .collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].id, oficina.id);
    assert_eq!(fake.requests_to("PATCH", "/rest/v1/addresses").len(), 2);
}

#[tokio::test]
async fn test_set_default_address() {
    let (fake, _dir, storefront) = setup().await;
    let session = sign_in(&fake, &storefront, "ana@example.com").await;
    let account = storefront.account();
    account.add_address(&session, &address("Casa", true)).await.unwrap();
    let oficina = account
        .add_address(&session, &address("Oficina", false))
        .await
        .unwrap();

    account.set_default_address(&session, &oficina.id).await.unwrap();

    let listed = account.addresses(&session).await.unwrap();
    assert_eq!(listed[0].id, oficina.id);
    assert!(listed[0].is_default);
    assert!(!listed[1].is_default);
}

#[tokio::test]
async fn test_set_default_unknown_address_keeps_current_default() {
    let (fake, _dir, storefront) = setup().await;
    let session = sign_in(&fake, &storefront, "ana@example.com").await;
    let account = storefront.account();
    let casa = account.add_address(&session, &address("Casa", true)).await.unwrap();

    let err = account
        .set_default_address(&session, &AddressId::new("does-not-exist"))
        .await
        .unwrap_err();

    assert!(matches!(err, SupabaseError::NotFound(_)));
    let listed = account.addresses(&session).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, casa.id);
    assert!(listed[0].is_default);
    let patches = fake.requests_to("PATCH", "/rest/v1/addresses");
    let last = patches.last().unwrap();
    assert_eq!(last.body, json!({"is_default": true}));
    assert_eq!(last.param("id"), Some("eq.does-not-exist"));
}

#[tokio::test]
async fn test_set_default_foreign_address_is_not_found() {
    let (fake, _dir, storefront) = setup().await;
    let session = sign_in(&fake, &storefront, "ana@example.com").await;
    fake.insert_rows(
        "addresses",
        vec![json!({
            "id": "a-ajena", "user_id": "someone-else", "label": "Casa",
            "recipient_name": "Luis", "street": "Calle 5", "city": "Puebla",
            "postal_code": "72000", "is_default": false,
            "created_at": "2026-01-01T00:00:00Z"
        })],
    );
    let account = storefront.account();
    account.add_address(&session, &address("Casa", true)).await.unwrap();

    let err = account
        .set_default_address(&session, &AddressId::new("a-ajena"))
        .await
        .unwrap_err();

    assert!(matches!(err, SupabaseError::NotFound(_)));
    assert!(account.addresses(&session).await.unwrap()[0].is_default);
    let foreign = fake
        .rows("addresses")
        .into_iter()
        .find(|r| r["id"] == json!("a-ajena"))
        .unwrap();
    assert_eq!(foreign["is_default"], json!(false));
}

#[tokio::test]
async fn test_delete_address_only_touches_own_rows() {
    let (fake, _dir, storefront) = setup().await;
    let session = sign_in(&fake, &storefront, "ana@example.com").await;
    fake.insert_rows(
        "addresses",
        vec![json!({
            "id": "a-ajena", "user_id": "someone-else", "label": "Casa",
            "recipient_name": "Luis", "street": "Calle 5", "city": "Puebla",
            "postal_code": "72000", "is_default": true,
            "created_at": "2026-01-01T00:00:00Z"
        })],
    );
    let account = storefront.account();
    let casa = account.add_address(&session, &address("Casa", false)).await.unwrap();

    account.delete_address(&session, &casa.id).await.unwrap();
    let err = account
        .delete_address(&session, &AddressId::new("a-ajena"))
        .await
        .unwrap_err();
    assert!(matches!(err, SupabaseError::NotFound(_)));

    assert!(account.addresses(&session).await.unwrap().is_empty());
    let remaining = fake.rows("addresses");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["id"], json!("a-ajena"));
}
