//! Identity port: account storage plus the sign-up and sign-in flows built on top of it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::errors::{BackendError, Result as BackendResult};
use crate::{
    auth::password::{self, Argon2Params},
    errors::{Error, Result},
    types::UserId,
};

/// A resolved, signed-in account as seen by the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub display_name: String,
}

/// Stored account, including the credential hash. Never leaves the identity layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
}

impl From<Account> for Identity {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            display_name: account.display_name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

/// Normalize an email for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Display name used when sign-up did not provide one: the local part of the email.
pub fn default_display_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Persist a new account. Fails with `UniqueViolation` when the email is taken.
    async fn insert_account(&self, account: Account) -> BackendResult<Account>;

    /// Look up an account by (normalized) email
    async fn find_account_by_email(&self, email: &str) -> BackendResult<Option<Account>>;

    /// Resolve an account id into an identity, if the account still exists
    async fn get_identity(&self, id: UserId) -> BackendResult<Option<Identity>>;

    /// Create an account and return its identity.
    ///
    /// Password policy is enforced by the caller; this only hashes and stores.
    async fn sign_up(&self, request: SignUpRequest, params: Argon2Params) -> Result<Identity> {
        let email = normalize_email(&request.email);
        if email.is_empty() || !email.contains('@') {
            return Err(Error::BadRequest {
                message: "A valid email address is required".to_string(),
            });
        }

        if self.find_account_by_email(&email).await?.is_some() {
            return Err(Error::Conflict {
                message: "An account with this email address already exists".to_string(),
            });
        }

        // Hash the password on a blocking thread to avoid blocking async runtime
        let password = request.password;
        let password_hash = tokio::task::spawn_blocking(move || password::hash_string_with_params(&password, Some(params)))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("spawn password hashing task: {e}"),
            })??;

        let display_name = request
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| default_display_name(&email));

        let account = Account {
            id: Uuid::new_v4(),
            email,
            display_name,
            password_hash,
        };

        match self.insert_account(account).await {
            Ok(account) => Ok(account.into()),
            Err(BackendError::UniqueViolation { .. }) => Err(Error::Conflict {
                message: "An account with this email address already exists".to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Verify credentials and return the matching identity
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let invalid = || Error::Unauthenticated {
            message: Some("Invalid email or password".to_string()),
        };

        let account = self.find_account_by_email(&normalize_email(email)).await?;

        // Verify password on a blocking thread to avoid blocking async runtime
        let password = password.to_string();
        let hash = account.as_ref().map(|account| account.password_hash.clone());
        let is_valid = tokio::task::spawn_blocking(move || check_password(&password, hash.as_deref()))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("spawn password verification task: {e}"),
            })??;

        match account {
            Some(account) if is_valid => Ok(account.into()),
            _ => Err(invalid()),
        }
    }
}

/// Check a password against a stored hash.
///
/// Without a stored hash the password is still hashed once with the default parameters, so an
/// unknown email costs the same Argon2 work as a wrong password.
fn check_password(password: &str, stored_hash: Option<&str>) -> Result<bool> {
    match stored_hash {
        Some(hash) => password::verify_string(password, hash),
        None => password::hash_string(password).map(|_| false),
    }
}
