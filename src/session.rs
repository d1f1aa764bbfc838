//! Authenticated session and credential glue.
//!
//! Thin boundary around the external identity provider: the core
//! pipeline only consumes [`Session`] values; credential verification
//! lives behind [`CredentialStore`] and is not used by the turn
//! pipeline itself.

use crate::error::AuthError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identity of the currently authenticated user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
}

/// Supplies the current session, if any. State reads/writes and
/// persistence are gated on this.
pub trait SessionProvider: Send + Sync {
    fn current_session(&self) -> Option<Session>;
}

/// Stored credential record, keyed by email.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub password_digest: String,
    pub salt: String,
}

/// Keyed credential lookup, external store.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, email: &str) -> Result<Option<UserRecord>, AuthError>;
}

fn credentials_shape_valid(email: &str, password: &str) -> bool {
    email.contains('@') && password.chars().count() >= 6
}

/// Verify credentials against the store and mint a session.
///
/// Malformed input and unknown users both collapse to
/// `InvalidCredentials`; the caller learns nothing about which.
pub async fn authenticate(
    store: &dyn CredentialStore,
    email: &str,
    password: &str,
    digest: impl Fn(&str, &str) -> String,
) -> Result<Session, AuthError> {
    if !credentials_shape_valid(email, password) {
        return Err(AuthError::InvalidCredentials);
    }

    let record = store
        .get(email)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    if digest(password, &record.salt) != record.password_digest {
        return Err(AuthError::InvalidCredentials);
    }

    Ok(Session {
        user_id: record.id,
        email: record.email,
    })
}
