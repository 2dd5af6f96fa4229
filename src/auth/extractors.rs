use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_sessions::Session;
use tracing::{error, warn};

use crate::auth::session::{self, SessionUser};
use crate::flash::{self, Level};
use crate::views::found;

pub const LOGIN_PATH: &str = "/login";

/// Access gate for protected routes. Install with `route_layer` so the wrapped
/// handler never runs without a session user.
pub async fn require_login(session: Session, request: Request, next: Next) -> Response {
    match session::current(&session).await {
        Ok(Some(_)) => next.run(request).await,
        Ok(None) => {
            warn!(path = %request.uri().path(), "unauthenticated access");
            flash::push(&session, Level::Warning, "Please log in first.").await;
            found(LOGIN_PATH)
        }
        Err(e) => {
            error!(error = %e, "session lookup failed");
            found(LOGIN_PATH)
        }
    }
}

/// Session user of the current request. Rejects with a redirect to login.
pub struct CurrentUser(pub SessionUser);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;
        match session::current(&session).await {
            Ok(Some(user)) => Ok(CurrentUser(user)),
            Ok(None) => {
                flash::push(&session, Level::Warning, "Please log in first.").await;
                Err(found(LOGIN_PATH))
            }
            Err(e) => {
                error!(error = %e, "session lookup failed");
                Err(found(LOGIN_PATH))
            }
        }
    }
}
