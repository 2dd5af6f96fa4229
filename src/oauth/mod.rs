use crate::state::AppState;
use axum::Router;

pub mod client;
pub mod error;
pub mod handlers;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::oauth_routes())
}
