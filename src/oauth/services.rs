use tracing::{debug, info, warn};

use crate::auth::{
    repo::UserStore,
    repo_types::{NewUser, Provider, StoreError, UniqueField, User},
};
use crate::oauth::{
    client::{IdentityProvider, VerifiedIdentity},
    error::OAuthError,
};

/// Attempts at a derived username before giving up: `name`, `name2` .. `name5`.
pub const MAX_USERNAME_ATTEMPTS: u32 = 5;

// Leaves room for the suffix inside the 80-char column.
const MAX_BASE_USERNAME_LEN: usize = 72;

#[derive(Debug)]
pub enum OAuthOutcome {
    LinkedExistingAccount(User),
    NewAccountCreated(User),
    /// The email belongs to an account not bound to this provider subject.
    /// Nothing is linked or created.
    Rejected { email: String },
}

/// Code exchange, profile fetch and account resolution. Persists nothing
/// unless every provider call succeeded.
pub async fn complete_login(
    users: &dyn UserStore,
    idp: &dyn IdentityProvider,
    code: &str,
) -> Result<OAuthOutcome, OAuthError> {
    let tokens = idp.exchange_code(code).await?;
    let identity = idp.fetch_profile(&tokens).await?.into_identity()?;
    debug!(provider = %idp.provider(), "provider identity verified");
    resolve_account(users, idp.provider(), identity).await
}

/// Provider id match logs in, email match rejects, otherwise a new account.
pub async fn resolve_account(
    users: &dyn UserStore,
    provider: Provider,
    identity: VerifiedIdentity,
) -> Result<OAuthOutcome, OAuthError> {
    if let Some(user) = users
        .find_by_provider_id(provider, &identity.subject)
        .await
        .map_err(storage)?
    {
        return Ok(OAuthOutcome::LinkedExistingAccount(user));
    }

    if let Some(existing) = users.find_by_email(&identity.email).await.map_err(storage)? {
        warn!(%provider, user_id = %existing.id, "email already bound to another login method");
        return Ok(OAuthOutcome::Rejected {
            email: identity.email,
        });
    }

    let base = derive_username(&identity.email);
    for attempt in 1..=MAX_USERNAME_ATTEMPTS {
        let candidate = if attempt == 1 {
            base.clone()
        } else {
            format!("{base}{attempt}")
        };
        let draft = NewUser::federated(
            candidate,
            identity.email.clone(),
            provider,
            identity.subject.clone(),
        );
        match users.create(draft).await {
            Ok(user) => {
                info!(%provider, user_id = %user.id, username = %user.username, "account created from provider login");
                return Ok(OAuthOutcome::NewAccountCreated(user));
            }
            Err(StoreError::Conflict(UniqueField::Username)) => {
                debug!(attempt, "derived username taken");
            }
            Err(StoreError::Conflict(UniqueField::ProviderId(_))) => {
                // A concurrent callback for the same subject inserted first.
                return users
                    .find_by_provider_id(provider, &identity.subject)
                    .await
                    .map_err(storage)?
                    .map(OAuthOutcome::LinkedExistingAccount)
                    .ok_or_else(|| OAuthError::AccountCreationFailed("provider id conflict".into()));
            }
            Err(StoreError::Conflict(UniqueField::Email)) => {
                return Ok(OAuthOutcome::Rejected {
                    email: identity.email,
                });
            }
            Err(e) => return Err(OAuthError::AccountCreationFailed(e.to_string())),
        }
    }
    Err(OAuthError::AccountCreationFailed(format!(
        "no free username derived from {base:?}"
    )))
}

/// Local part of the email, or `user` when that is empty.
pub fn derive_username(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default().trim();
    if local.is_empty() {
        return "user".into();
    }
    local.chars().take(MAX_BASE_USERNAME_LEN).collect()
}

fn storage(e: StoreError) -> OAuthError {
    OAuthError::Storage(e.to_string())
}
