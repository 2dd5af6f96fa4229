mod app;
mod auth;
mod config;
mod error;
mod flash;
mod oauth;
mod state;
mod views;

use tower_sessions_sqlx_store::PostgresStore;

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "gatehouse=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let cleanup_interval = config.session.cleanup_interval;
    let (state, db) = AppState::init(config).await?;

    sqlx::migrate!("./migrations").run(&db).await?;
    let sessions = PostgresStore::new(db);
    sessions.migrate().await?;
    tracing::info!("migrations applied");

    let sweeper = app::spawn_session_sweeper(sessions.clone(), cleanup_interval);
    let app = app::build_app(state, sessions)?;
    let served = app::serve(app).await;
    sweeper.abort();
    served
}
