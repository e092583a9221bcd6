use crate::error::StorageError;
use crate::models::vote::VoterIdentity;
use crate::storage::{KeyValueStore, ANONYMOUS_TOKEN_KEY};
use log::info;

/// Source of the authenticated identity for the current viewer.
pub trait IdentityResolver: Send + Sync {
    fn current_user(&self) -> Option<String>;
}

/// Resolver with a fixed answer, set at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Option<String>);

impl StaticIdentity {
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self(Some(id.into()))
    }
}

impl IdentityResolver for StaticIdentity {
    fn current_user(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Returns the profile's anonymous token, creating and persisting one if absent.
pub fn anonymous_token(store: &dyn KeyValueStore) -> Result<String, StorageError> {
    if let Some(token) = store.get(ANONYMOUS_TOKEN_KEY) {
        return Ok(token);
    }
    let token = uuid::Uuid::new_v4().to_string();
    store.set(ANONYMOUS_TOKEN_KEY, &token)?;
    info!("Generated anonymous voter token");
    Ok(token)
}

pub fn resolve_voter(
    resolver: &dyn IdentityResolver,
    store: &dyn KeyValueStore,
) -> Result<VoterIdentity, StorageError> {
    match resolver.current_user() {
        Some(user_id) => Ok(VoterIdentity::Authenticated(user_id)),
        None => anonymous_token(store).map(VoterIdentity::Anonymous),
    }
}
