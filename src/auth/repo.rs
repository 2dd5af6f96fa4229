use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, Provider, StoreError, UniqueField, User};

const USER_COLUMNS: &str =
    "id, username, email, password_hash, created_at, google_id, microsoft_id, github_id";

/// Persistence for user accounts. Uniqueness of `username`, `email` and every
/// provider id is enforced by the store itself; `create` reports a violation
/// as [`StoreError::Conflict`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_provider_id(
        &self,
        provider: Provider,
        subject: &str,
    ) -> Result<Option<User>, StoreError>;
    async fn create(&self, draft: NewUser) -> Result<User, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_where(&self, column: &str, value: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("find user by {column}"))?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_where("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_where("email", email).await
    }

    async fn find_by_provider_id(
        &self,
        provider: Provider,
        subject: &str,
    ) -> Result<Option<User>, StoreError> {
        self.find_where(provider.column(), subject).await
    }

    /// Single INSERT; the table's UNIQUE constraints decide conflicts.
    async fn create(&self, draft: NewUser) -> Result<User, StoreError> {
        if !draft.has_auth_method() {
            return Err(StoreError::NoAuthMethod);
        }
        let sql = format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, google_id, microsoft_id, github_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&draft.username)
            .bind(&draft.email)
            .bind(&draft.password_hash)
            .bind(draft.provider_id(Provider::Google))
            .bind(draft.provider_id(Provider::Microsoft))
            .bind(draft.provider_id(Provider::Github))
            .fetch_one(&self.db)
            .await
            .map_err(map_insert_error)
    }
}

fn map_insert_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            if let Some(field) = db_err.constraint().and_then(UniqueField::from_constraint) {
                return StoreError::Conflict(field);
            }
        }
        if db_err.is_check_violation() {
            return StoreError::NoAuthMethod;
        }
    }
    StoreError::Backend(anyhow::Error::new(e).context("insert user"))
}
