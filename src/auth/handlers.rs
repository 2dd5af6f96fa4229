use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Form, Router,
};
use tower_sessions::Session;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginForm, RegisterForm},
        extractors::LOGIN_PATH,
        services::{authenticate, register_account, LoginError, RegisterError, INVALID_CREDENTIALS},
        session,
    },
    flash::{self, Level},
    state::AppState,
    views::found,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", get(logout))
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<RegisterForm>,
) -> Response {
    match register_account(state.users.as_ref(), form).await {
        Ok(user) => {
            info!(user_id = %user.id, username = %user.username, "user registered");
            flash::push(&session, Level::Success, "Account created successfully! Please log in.").await;
            found(LOGIN_PATH)
        }
        Err(e) => {
            match &e {
                RegisterError::Invalid(v) => warn!(reason = %v, "registration rejected"),
                RegisterError::Conflict(field) => warn!(%field, "registration conflict"),
                RegisterError::Failed(err) => error!(error = %err, "registration failed"),
            }
            flash::push(&session, Level::Danger, e.user_message()).await;
            found("/register")
        }
    }
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Response {
    let user = match authenticate(state.users.as_ref(), &form.username, &form.password).await {
        Ok(user) => user,
        Err(LoginError::InvalidCredentials) => {
            flash::push(&session, Level::Danger, INVALID_CREDENTIALS).await;
            return found(LOGIN_PATH);
        }
        Err(e) => {
            error!(error = %e, "login failed");
            flash::push(&session, Level::Danger, "An error occurred. Please try again.").await;
            return found(LOGIN_PATH);
        }
    };

    if let Err(e) = session::establish(&session, &user).await {
        error!(error = %e, user_id = %user.id, "establish session failed");
        flash::push(&session, Level::Danger, "An error occurred. Please try again.").await;
        return found(LOGIN_PATH);
    }

    info!(user_id = %user.id, "user logged in");
    flash::push(&session, Level::Success, format!("Welcome back, {}!", user.username)).await;
    found("/dashboard")
}

#[instrument(skip_all)]
pub async fn logout(session: Session) -> Response {
    if let Err(e) = session::clear(&session).await {
        error!(error = %e, "clear session failed");
    }
    flash::push(&session, Level::Info, "You have been logged out.").await;
    found("/")
}
