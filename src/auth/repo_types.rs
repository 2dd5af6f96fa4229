use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Widths of the `users` columns, counted in characters.
pub const MAX_USERNAME_LEN: usize = 80;
pub const MAX_EMAIL_LEN: usize = 120;
pub const MAX_PROVIDER_ID_LEN: usize = 120;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // Argon2 PHC string, absent for OAuth-only accounts
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub google_id: Option<String>,
    pub microsoft_id: Option<String>,
    pub github_id: Option<String>,
}

impl User {
    pub fn provider_id(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Google => self.google_id.as_deref(),
            Provider::Microsoft => self.microsoft_id.as_deref(),
            Provider::Github => self.github_id.as_deref(),
        }
    }
}

/// External identity providers with a reserved id column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Microsoft,
    Github,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Microsoft => "microsoft",
            Provider::Github => "github",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Google => "Google",
            Provider::Microsoft => "Microsoft",
            Provider::Github => "GitHub",
        }
    }

    /// Column holding this provider's subject id. Only ever interpolated
    /// from this fixed set.
    pub(crate) fn column(self) -> &'static str {
        match self {
            Provider::Google => "google_id",
            Provider::Microsoft => "microsoft_id",
            Provider::Github => "github_id",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Provider::Google),
            "microsoft" => Ok(Provider::Microsoft),
            "github" => Ok(Provider::Github),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown provider {0:?}")]
pub struct UnknownProvider(pub String);

/// Draft of an account to insert.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub provider: Option<(Provider, String)>,
}

impl NewUser {
    pub fn local(username: String, email: String, password_hash: String) -> Self {
        Self {
            username,
            email,
            password_hash: Some(password_hash),
            provider: None,
        }
    }

    pub fn federated(username: String, email: String, provider: Provider, subject: String) -> Self {
        Self {
            username,
            email,
            password_hash: None,
            provider: Some((provider, subject)),
        }
    }

    pub fn has_auth_method(&self) -> bool {
        self.password_hash.is_some() || self.provider.is_some()
    }

    pub(crate) fn provider_id(&self, provider: Provider) -> Option<String> {
        match &self.provider {
            Some((p, id)) if *p == provider => Some(id.clone()),
            _ => None,
        }
    }
}

/// Field whose uniqueness constraint rejected an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
    ProviderId(Provider),
}

impl UniqueField {
    /// Maps a constraint name from `migrations/0001_users.sql`.
    pub(crate) fn from_constraint(name: &str) -> Option<Self> {
        match name {
            "users_username_key" => Some(UniqueField::Username),
            "users_email_key" => Some(UniqueField::Email),
            "users_google_id_key" => Some(UniqueField::ProviderId(Provider::Google)),
            "users_microsoft_id_key" => Some(UniqueField::ProviderId(Provider::Microsoft)),
            "users_github_id_key" => Some(UniqueField::ProviderId(Provider::Github)),
            _ => None,
        }
    }
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueField::Username => f.write_str("username"),
            UniqueField::Email => f.write_str("email"),
            UniqueField::ProviderId(p) => write!(f, "{}", p.column()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(UniqueField),
    #[error("account needs a password or a provider id")]
    NoAuthMethod,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
