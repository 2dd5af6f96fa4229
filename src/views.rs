//! Page glue: the rendering seam, the pages themselves and redirect helpers.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use tower_sessions::Session;
use tracing::{instrument, warn};

use crate::auth::{
    extractors::{CurrentUser, LOGIN_PATH},
    repo_types::User,
    session::{self, SessionUser},
};
use crate::error::AppError;
use crate::flash::{self, Level};
use crate::state::AppState;

/// Template collaborator: view name plus context in, document body out.
pub trait Renderer: Send + Sync {
    fn render(&self, view: &str, context: &Value) -> anyhow::Result<String>;
}

/// Stand-in renderer: the view name as title and the context as escaped JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainRenderer;

impl Renderer for PlainRenderer {
    fn render(&self, view: &str, context: &Value) -> anyhow::Result<String> {
        let ctx = serde_json::to_string_pretty(context)?;
        Ok(format!(
            "<!doctype html>\n<title>{view}</title>\n<pre>{}</pre>\n",
            escape_html(&ctx)
        ))
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Plain 302, the status browsers follow for form posts and OAuth hops.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

pub async fn render_page(
    state: &AppState,
    session: &Session,
    view: &str,
    user: Option<&User>,
) -> Result<Html<String>, AppError> {
    let context = json!({
        "user": user,
        "messages": flash::take(session).await,
    });
    let body = state.renderer.render(view, &context)?;
    Ok(Html(body))
}

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/login", get(login_page))
        .route("/register", get(register_page))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/profile", get(profile))
}

#[instrument(skip_all)]
pub async fn index(State(state): State<AppState>, session: Session) -> Result<Html<String>, AppError> {
    render_page(&state, &session, "index", None).await
}

#[instrument(skip_all)]
pub async fn login_page(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, AppError> {
    render_page(&state, &session, "login", None).await
}

#[instrument(skip_all)]
pub async fn register_page(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, AppError> {
    render_page(&state, &session, "register", None).await
}

#[instrument(skip_all)]
pub async fn dashboard(
    State(state): State<AppState>,
    session: Session,
    CurrentUser(current): CurrentUser,
) -> Result<Response, AppError> {
    account_page(&state, &session, &current, "dashboard").await
}

#[instrument(skip_all)]
pub async fn profile(
    State(state): State<AppState>,
    session: Session,
    CurrentUser(current): CurrentUser,
) -> Result<Response, AppError> {
    account_page(&state, &session, &current, "profile").await
}

async fn account_page(
    state: &AppState,
    session: &Session,
    current: &SessionUser,
    view: &str,
) -> Result<Response, AppError> {
    match state.users.find_by_id(current.user_id).await? {
        Some(user) => Ok(render_page(state, session, view, Some(&user))
            .await?
            .into_response()),
        None => {
            warn!(user_id = %current.user_id, "session refers to a missing account");
            session::clear(session).await?;
            flash::push(session, Level::Warning, "Please log in first.").await;
            Ok(found(LOGIN_PATH))
        }
    }
}

pub async fn not_found(State(state): State<AppState>, session: Session) -> Response {
    match render_page(&state, &session, "404", None).await {
        Ok(page) => (StatusCode::NOT_FOUND, page).into_response(),
        Err(e) => e.into_response(),
    }
}
