//! What rides inside the signed session cookie. The cookie itself and the
//! backing store are provided by `tower-sessions`; the layer is built in
//! [`crate::app::session_layer`].

use serde::{Deserialize, Serialize};
use tower_sessions::{session, Session};
use tracing::debug;
use uuid::Uuid;

use crate::auth::repo_types::{Provider, User};

const USER_KEY: &str = "user";
const OAUTH_STATE_KEY: &str = "oauth_state";

/// Denormalized copy of the account taken at login time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

/// CSRF `state` issued when a federated login starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOAuth {
    pub provider: Provider,
    pub state: String,
}

/// Replaces whatever the browser's session held and issues a fresh id.
pub async fn establish(session: &Session, user: &User) -> Result<(), session::Error> {
    session.clear().await;
    session.cycle_id().await?;
    session.insert(USER_KEY, SessionUser::from(user)).await?;
    debug!(user_id = %user.id, "session established");
    Ok(())
}

pub async fn current(session: &Session) -> Result<Option<SessionUser>, session::Error> {
    session.get(USER_KEY).await
}

/// Drops all session data and the stored record.
pub async fn clear(session: &Session) -> Result<(), session::Error> {
    session.flush().await
}

pub async fn remember_oauth_state(
    session: &Session,
    pending: PendingOAuth,
) -> Result<(), session::Error> {
    session.insert(OAUTH_STATE_KEY, pending).await
}

/// Single use: the pending state is removed whether or not it matches.
pub async fn take_oauth_state(session: &Session) -> Result<Option<PendingOAuth>, session::Error> {
    session.remove(OAUTH_STATE_KEY).await
}
