// ── User directory ──
//
// Public profiles keyed by auth UID. Sign-in accepts either an email or a
// username; usernames are mapped to their email here before the identity
// provider ever sees them.

use std::sync::Arc;

use lookout_api::{DocumentPath, DocumentStore, FieldPath, FieldValue, Query, Write};
use tracing::debug;

use crate::error::CoreError;
use crate::model::UserProfile;

pub(crate) const USERS: &str = "users";

#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn DocumentStore>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn fetch_user_profile(&self, uid: &str) -> Result<Option<UserProfile>, CoreError> {
        let doc = self.store.get(&DocumentPath::new(USERS, uid)).await?;
        Ok(doc.as_ref().map(UserProfile::from))
    }

    /// Email registered for `username`.
    pub async fn email_by_username(&self, username: &str) -> Result<String, CoreError> {
        let query = Query::collection(USERS).where_eq("username", username).limit(1);
        let docs = self.store.run_query(&query).await?;
        docs.first()
            .and_then(|doc| doc.get_str("email"))
            .map(str::to_owned)
            .ok_or_else(|| CoreError::UnknownUsername {
                username: username.to_owned(),
            })
    }

    /// Write (or overwrite) the profile for `uid`.
    pub async fn create_user_profile(
        &self,
        uid: &str,
        username: &str,
        email: &str,
    ) -> Result<(), CoreError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(CoreError::validation("username cannot be empty"));
        }
        let write = Write::set(
            DocumentPath::new(USERS, uid),
            vec![
                (FieldPath::field("username"), FieldValue::set(username)),
                (FieldPath::field("email"), FieldValue::set(email.trim())),
                (FieldPath::field("createdAt"), FieldValue::ServerTimestamp),
            ],
        );
        self.store.commit(write.into()).await?;
        debug!(uid, username, "user profile written");
        Ok(())
    }

    /// Email to sign in with, given whatever the user typed.
    pub async fn resolve_login_email(&self, identifier: &str) -> Result<String, CoreError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(CoreError::validation("enter an email or username"));
        }
        if identifier.contains('@') {
            return Ok(identifier.to_owned());
        }
        self.email_by_username(identifier).await
    }
}

impl std::fmt::Debug for UserDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDirectory").finish_non_exhaustive()
    }
}
