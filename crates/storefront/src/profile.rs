//! Shopper profiles.
//!
//! Every signed-in user gets a row in `profiles`. On each identity change the
//! storefront upserts a seed built from the provider claims and reads the row
//! back, so the profile exists even when no database trigger created it.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use dulcenube_core::{ProfileRole, UserId};

use crate::session::ProfileLoader;
use crate::supabase::{RestClient, Session, User};

const PROFILE_COLUMNS: &str = "id,role,full_name,avatar_url";

/// A row of `profiles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    #[serde(default)]
    pub role: ProfileRole,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Profile {
    /// Name to greet the shopper with.
    #[must_use]
    pub fn display_name<'a>(&'a self, user: &'a User) -> &'a str {
        self.full_name
            .as_deref()
            .or(user.email.as_deref())
            .unwrap_or("Usuario")
    }
}

/// Best-effort profile seed derived from a user's provider claims.
///
/// Absent fields are omitted from the upsert so existing values survive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSeed {
    pub id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfileSeed {
    /// Build a seed from `user`.
    ///
    /// Name: `full_name`, then `name`, then `given_name family_name`.
    /// Avatar: `avatar_url`, then `picture`.
    #[must_use]
    pub fn from_user(user: &User) -> Self {
        let full_name = user
            .metadata_str("full_name")
            .or_else(|| user.metadata_str("name"))
            .map(str::to_string)
            .or_else(|| {
                let parts: Vec<&str> = [user.metadata_str("given_name"), user.metadata_str("family_name")]
                    .into_iter()
                    .flatten()
                    .collect();
                (!parts.is_empty()).then(|| parts.join(" "))
            });

        let avatar_url = user
            .metadata_str("avatar_url")
            .or_else(|| user.metadata_str("picture"))
            .map(str::to_string);

        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            full_name,
            avatar_url,
        }
    }
}

/// Profile reconciliation against the `profiles` relation.
#[derive(Debug, Clone)]
pub struct ProfileService {
    rest: RestClient,
}

impl ProfileService {
    #[must_use]
    pub const fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// Upsert the seed for `session`'s user, then read the profile back.
    ///
    /// A failed seed is logged and the read still runs; a failed read yields
    /// `None`.
    #[instrument(skip_all, fields(user_id = %session.user_id()))]
    pub async fn load(&self, session: &Session) -> Option<Profile> {
        let rest = self.rest.with_access_token(&session.access_token);
        let seed = ProfileSeed::from_user(&session.user);

        if let Err(e) = rest.table("profiles").upsert(&seed, "id").await {
            warn!(error = %e, "Failed to seed profile");
        }

        match rest
            .table("profiles")
            .select(PROFILE_COLUMNS)
            .eq("id", &seed.id)
            .fetch_optional::<Profile>()
            .await
        {
            Ok(Some(profile)) => {
                debug!(role = %profile.role, "Profile loaded");
                Some(profile)
            }
            Ok(None) => {
                warn!("No profile row visible for user");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to load profile");
                None
            }
        }
    }
}

impl ProfileLoader for ProfileService {
    fn reconcile(&self, session: &Session) -> impl Future<Output = Option<Profile>> + Send {
        self.load(session)
    }
}
