//! Integration tests for profile reconciliation after sign-in.
#![allow(clippy::unwrap_used)]

use serde_json::{Value, json};
use tempfile::TempDir;
use url::Url;

use dulcenube_core::ProfileRole;
use dulcenube_integration_tests::FakeSupabase;
use dulcenube_storefront::Storefront;
use dulcenube_storefront::supabase::Session;

async fn setup() -> (FakeSupabase, TempDir, Storefront) {
    let fake = FakeSupabase::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let storefront = Storefront::new(fake.storefront_config(dir.path()).unwrap()).unwrap();
    (fake, dir, storefront)
}

async fn sign_in(fake: &FakeSupabase, storefront: &Storefront, email: &str, metadata: Value) -> Session {
    let user_id = fake.add_user(email, metadata);
    let (access, refresh) = fake.issue_tokens(&user_id);
    let location = Url::parse(&format!(
        "http://localhost:5173/#access_token={access}&refresh_token={refresh}"
    ))
    .unwrap();
    storefront.bootstrap(&location).await.session.unwrap()
}

#[tokio::test]
async fn test_profile_seeded_from_provider_claims() {
    let (fake, _dir, storefront) = setup().await;
    let session = sign_in(
        &fake,
        &storefront,
        "ana@example.com",
        json!({"name": "Ana Lopez", "picture": "https://lh3.example.com/ana.png"}),
    )
    .await;

    let auth = storefront.start_auth_state(Some(session.clone()));
    let snapshot = auth.settled().await;

    let profile = snapshot.profile.unwrap();
    assert_eq!(profile.id, *session.user_id());
    assert_eq!(profile.role, ProfileRole::Customer);
    assert_eq!(profile.full_name.as_deref(), Some("Ana Lopez"));
    assert_eq!(profile.avatar_url.as_deref(), Some("https://lh3.example.com/ana.png"));
    assert_eq!(profile.display_name(&session.user), "Ana Lopez");

    let rows = fake.rows("profiles");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["email"], json!("ana@example.com"));

    let upserts = fake.requests_to("POST", "/rest/v1/profiles");
    assert_eq!(upserts.len(), 1);
    assert_eq!(upserts[0].param("on_conflict"), Some("id"));
    assert!(upserts[0].prefer.as_deref().unwrap().contains("merge-duplicates"));
    assert_eq!(upserts[0].bearer.as_deref(), Some(session.access_token.as_str()));
}

#[tokio::test]
async fn test_existing_profile_keeps_role_and_name() {
    let (fake, _dir, storefront) = setup().await;
    let user_id = fake.add_user("duena@dulcenube.com", json!({}));
    fake.insert_rows(
        "profiles",
        vec![json!({"id": user_id, "role": "admin", "full_name": "Marisol", "avatar_url": null})],
    );
    let (access, refresh) = fake.issue_tokens(&user_id);
    let session = storefront
        .bootstrap(
            &Url::parse(&format!(
                "http://localhost:5173/#access_token={access}&refresh_token={refresh}"
            ))
            .unwrap(),
        )
        .await
        .session
        .unwrap();

    let profile = storefront.profiles().load(&session).await.unwrap();

    assert_eq!(profile.role, ProfileRole::Admin);
    assert_eq!(profile.full_name.as_deref(), Some("Marisol"));
    let upserted = &fake.requests_to("POST", "/rest/v1/profiles")[0].body;
    assert!(upserted.get("full_name").is_none());
    assert!(upserted.get("role").is_none());
}

#[tokio::test]
async fn test_profile_failure_keeps_session() {
    let (fake, _dir, storefront) = setup().await;
    fake.fail("profiles", "POST");
    fake.fail("profiles", "GET");
    let session = sign_in(&fake, &storefront, "ana@example.com", json!({})).await;

    let auth = storefront.start_auth_state(Some(session.clone()));
    let snapshot = auth.settled().await;

    assert_eq!(snapshot.session, Some(session));
    assert!(snapshot.profile.is_none());
    assert!(!snapshot.profile_loading);
}

#[tokio::test]
async fn test_failed_seed_still_reads_profile() {
    let (fake, _dir, storefront) = setup().await;
    let user_id = fake.add_user("ana@example.com", json!({"full_name": "Ana"}));
    fake.insert_rows(
        "profiles",
        vec![json!({"id": user_id, "role": "staff", "full_name": "Ana R.", "avatar_url": null})],
    );
    fake.fail("profiles", "POST");
    let (access, refresh) = fake.issue_tokens(&user_id);
    let session = storefront
        .bootstrap(
            &Url::parse(&format!(
                "http://localhost:5173/#access_token={access}&refresh_token={refresh}"
            ))
            .unwrap(),
        )
        .await
        .session
        .unwrap();

    let profile = storefront.profiles().load(&session).await.unwrap();

    assert_eq!(profile.role, ProfileRole::Staff);
    assert_eq!(profile.full_name.as_deref(), Some("Ana R."));
}

#[tokio::test]
async fn test_profile_follows_sign_in_and_out() {
    let (fake, _dir, storefront) = setup().await;
    let auth = storefront.start_auth_state(None);
    assert!(auth.settled().await.session.is_none());

    let session = sign_in(
        &fake,
        &storefront,
        "ana@example.com",
        json!({"given_name": "Ana", "family_name": "Lopez"}),
    )
    .await;

    let mut rx = auth.subscribe();
    let snapshot = rx
        .wait_for(|s| s.session.is_some() && !s.profile_loading)
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.user_id(), Some(session.user_id()));
    assert_eq!(
        snapshot.profile.unwrap().full_name.as_deref(),
        Some("Ana Lopez")
    );

    storefront.sign_out().await.unwrap();
    let snapshot = rx.wait_for(|s| s.session.is_none()).await.unwrap().clone();
    assert!(snapshot.profile.is_none());
}
