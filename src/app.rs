use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::{middleware, Router};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tower_sessions::{
    cookie::{Key, SameSite},
    session_store::{ExpiredDeletion, SessionStore},
    Expiry, SessionManagerLayer,
};

use crate::auth::extractors::require_login;
use crate::state::AppState;
use crate::{auth, oauth, views};

/// Full router: public pages, auth and oauth endpoints, then the gated pages.
/// Sessions live in `store` and the browser holds a signed id cookie.
pub fn build_app<S: SessionStore + Clone>(state: AppState, store: S) -> anyhow::Result<Router> {
    let cfg = &state.config.session;
    let key = Key::try_from(cfg.secret.as_slice())
        .map_err(|e| anyhow::anyhow!("session secret rejected: {e:?}"))?;
    let sessions = SessionManagerLayer::new(store)
        .with_signed(key)
        .with_same_site(SameSite::Lax)
        .with_secure(cfg.secure_cookie)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(cfg.ttl_minutes)));

    let protected = views::protected_routes().route_layer(middleware::from_fn(require_login));

    Ok(Router::new()
        .merge(views::public_routes())
        .merge(auth::router())
        .merge(oauth::router())
        .merge(protected)
        .fallback(views::not_found)
        .with_state(state)
        .layer(sessions)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let path = req.uri().path().to_owned();
                    tracing::info_span!("http_request", %method, %path, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        ))
}

/// Deletes expired session records every `period`. A failed sweep is logged
/// and retried on the next tick.
pub fn spawn_session_sweeper<S>(store: S, period: Duration) -> JoinHandle<()>
where
    S: ExpiredDeletion + Clone,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = store.delete_expired().await {
                tracing::warn!(error = %e, "expired session sweep failed");
            }
        }
    })
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()
    .context("APP_HOST/APP_PORT do not form a socket address")?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
