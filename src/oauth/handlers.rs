use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::get,
    Router,
};
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        extractors::LOGIN_PATH,
        repo_types::{Provider, User},
        session::{self, PendingOAuth},
    },
    flash::{self, Level},
    oauth::{
        client::IdentityProvider,
        error::{authentication_failed, OAuthError},
        services::{complete_login, OAuthOutcome},
    },
    state::AppState,
    views::{self, found},
};

const STATE_LEN: usize = 32;

pub const EMAIL_TAKEN: &str =
    "This email is already registered. Please log in with your regular account first.";

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/oauth/:provider", get(begin))
        .route("/oauth/:provider/callback", get(callback))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LEN)
        .map(char::from)
        .collect()
}

fn lookup<'a>(state: &'a AppState, name: &str) -> Option<(Provider, &'a dyn IdentityProvider)> {
    let provider: Provider = name.parse().ok()?;
    let idp = state.providers.get(&provider)?;
    Some((provider, idp.as_ref()))
}

#[instrument(skip_all)]
pub async fn begin(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
) -> Response {
    let Some((provider, idp)) = lookup(&state, &name) else {
        return views::not_found(State(state.clone()), session).await;
    };

    let pending = PendingOAuth {
        provider,
        state: random_state(),
    };
    let url = match idp.authorization_url(&pending.state).await {
        Ok(url) => url,
        Err(e) => return fail(&session, provider, e).await,
    };
    if let Err(e) = session::remember_oauth_state(&session, pending).await {
        error!(error = %e, "store oauth state failed");
        flash::push(&session, Level::Danger, authentication_failed(provider)).await;
        return found(LOGIN_PATH);
    }
    found(url.as_str())
}

#[instrument(skip_all)]
pub async fn callback(
    State(state): State<AppState>,
    session: Session,
    Path(name): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some((provider, idp)) = lookup(&state, &name) else {
        return views::not_found(State(state.clone()), session).await;
    };

    // Consumed before anything else so a replayed callback cannot reuse it.
    let pending = match session::take_oauth_state(&session).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "read oauth state failed");
            None
        }
    };

    let code = match check_callback(provider, pending, query) {
        Ok(code) => code,
        Err(e) => return fail(&session, provider, e).await,
    };

    match complete_login(state.users.as_ref(), idp, &code).await {
        Ok(OAuthOutcome::LinkedExistingAccount(user)) => {
            let greeting = format!("Welcome back, {}!", user.username);
            sign_in(&session, provider, &user, greeting).await
        }
        Ok(OAuthOutcome::NewAccountCreated(user)) => {
            let greeting = format!(
                "Account created with {}! Welcome, {}!",
                provider.display_name(),
                user.username
            );
            sign_in(&session, provider, &user, greeting).await
        }
        Ok(OAuthOutcome::Rejected { .. }) => {
            flash::push(&session, Level::Warning, EMAIL_TAKEN).await;
            found(LOGIN_PATH)
        }
        Err(e) => fail(&session, provider, e).await,
    }
}

/// The code is only trusted when the callback carries the state this
/// session issued for the same provider.
fn check_callback(
    provider: Provider,
    pending: Option<PendingOAuth>,
    query: CallbackQuery,
) -> Result<String, OAuthError> {
    if let Some(reason) = query.error {
        warn!(%reason, "provider returned an error");
        return Err(OAuthError::MissingCode);
    }
    let returned = query.state.ok_or(OAuthError::StateMismatch)?;
    match pending {
        Some(p) if p.provider == provider && p.state == returned => {}
        _ => return Err(OAuthError::StateMismatch),
    }
    query
        .code
        .filter(|c| !c.is_empty())
        .ok_or(OAuthError::MissingCode)
}

async fn sign_in(session: &Session, provider: Provider, user: &User, greeting: String) -> Response {
    if let Err(e) = session::establish(session, user).await {
        error!(error = %e, user_id = %user.id, "establish session failed");
        flash::push(session, Level::Danger, authentication_failed(provider)).await;
        return found(LOGIN_PATH);
    }
    info!(%provider, user_id = %user.id, "user logged in via provider");
    flash::push(session, Level::Success, greeting).await;
    found("/dashboard")
}

async fn fail(session: &Session, provider: Provider, e: OAuthError) -> Response {
    match &e {
        OAuthError::StateMismatch | OAuthError::MissingCode => warn!(%provider, error = %e, "oauth callback refused"),
        _ => error!(%provider, error = %e, "oauth login failed"),
    }
    flash::push(session, Level::Danger, e.user_message(provider)).await;
    found(LOGIN_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::{header, StatusCode};
    use std::sync::Arc;
    use time::OffsetDateTime;
    use tower_sessions::{
        session::{Id, Record},
        session_store::{self, SessionStore},
    };
    use uuid::Uuid;

    /// Session backend whose deletes fail, so cycling the id fails.
    #[derive(Debug, Clone)]
    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn save(&self, _record: &Record) -> session_store::Result<()> {
            Ok(())
        }
        async fn load(&self, _id: &Id) -> session_store::Result<Option<Record>> {
            Ok(None)
        }
        async fn delete(&self, _id: &Id) -> session_store::Result<()> {
            Err(session_store::Error::Backend("session backend down".into()))
        }
    }

    #[tokio::test]
    async fn session_failure_on_sign_in_flashes_the_generic_notice() {
        let session = Session::new(None, Arc::new(BrokenStore), None);
        let user = User {
            id: Uuid::new_v4(),
            username: "jane".into(),
            email: "jane@gmail.com".into(),
            password_hash: None,
            created_at: OffsetDateTime::now_utc(),
            google_id: Some("g-1".into()),
            microsoft_id: None,
            github_id: None,
        };

        let res = sign_in(&session, Provider::Google, &user, "Welcome back, jane!".into()).await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()[header::LOCATION], LOGIN_PATH);

        let messages: Vec<String> = flash::take(&session).await.into_iter().map(|f| f.message).collect();
        assert_eq!(messages, vec!["Google authentication failed.".to_string()]);
        assert_eq!(session::current(&session).await.unwrap(), None);
    }

    fn pending(state: &str) -> Option<PendingOAuth> {
        Some(PendingOAuth {
            provider: Provider::Google,
            state: state.into(),
        })
    }

    fn query(code: Option<&str>, state: Option<&str>) -> CallbackQuery {
        CallbackQuery {
            code: code.map(Into::into),
            state: state.map(Into::into),
            error: None,
        }
    }

    #[test]
    fn matching_state_yields_code() {
        let code = check_callback(Provider::Google, pending("s1"), query(Some("c"), Some("s1"))).unwrap();
        assert_eq!(code, "c");
    }

    #[test]
    fn state_must_match_and_be_present() {
        let cases = [
            (pending("s1"), query(Some("c"), Some("s2"))),
            (pending("s1"), query(Some("c"), None)),
            (None, query(Some("c"), Some("s1"))),
        ];
        for (p, q) in cases {
            assert!(matches!(
                check_callback(Provider::Google, p, q),
                Err(OAuthError::StateMismatch)
            ));
        }
    }

    #[test]
    fn state_issued_for_another_provider_is_refused() {
        let p = Some(PendingOAuth {
            provider: Provider::Github,
            state: "s1".into(),
        });
        assert!(matches!(
            check_callback(Provider::Google, p, query(Some("c"), Some("s1"))),
            Err(OAuthError::StateMismatch)
        ));
    }

    #[test]
    fn missing_code_or_provider_error() {
        assert!(matches!(
            check_callback(Provider::Google, pending("s1"), query(None, Some("s1"))),
            Err(OAuthError::MissingCode)
        ));
        let denied = CallbackQuery {
            error: Some("access_denied".into()),
            ..query(None, Some("s1"))
        };
        assert!(matches!(
            check_callback(Provider::Google, pending("s1"), denied),
            Err(OAuthError::MissingCode)
        ));
    }

    #[test]
    fn states_are_random_alphanumeric() {
        let a = random_state();
        assert_eq!(a.len(), STATE_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, random_state());
    }
}
