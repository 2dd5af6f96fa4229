//! OpenID Connect authorization-code client. Endpoints come from the
//! provider's discovery document, cached for a TTL.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::auth::repo_types::{Provider, MAX_EMAIL_LEN, MAX_PROVIDER_ID_LEN};
use crate::config::ProviderConfig;
use crate::oauth::error::OAuthError;

pub const SCOPES: &str = "openid email profile";

/// One external identity provider, as seen by the login flow.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Consent page url carrying `state`.
    async fn authorization_url(&self, state: &str) -> Result<Url, OAuthError>;

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, OAuthError>;

    async fn fetch_profile(&self, tokens: &TokenSet) -> Result<ProviderProfile, OAuthError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Discovery {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub userinfo_endpoint: Url,
}

pub struct TokenSet {
    pub access_token: String,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Userinfo response; only the claims the login flow needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderProfile {
    #[serde(rename = "sub")]
    pub subject: Option<String>,
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub email_verified: Option<bool>,
    pub name: Option<String>,
}

/// Subject and normalized email of a provider account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub email: String,
}

impl ProviderProfile {
    pub fn into_identity(self) -> Result<VerifiedIdentity, OAuthError> {
        let email = self
            .email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or(OAuthError::IncompleteProfile)?;
        let subject = self
            .subject
            .filter(|s| !s.trim().is_empty())
            .ok_or(OAuthError::IncompleteProfile)?;
        if self.email_verified == Some(false) {
            return Err(OAuthError::IncompleteProfile);
        }
        // Values that cannot be stored are unusable, not a storage failure.
        if email.chars().count() > MAX_EMAIL_LEN || subject.chars().count() > MAX_PROVIDER_ID_LEN {
            return Err(OAuthError::IncompleteProfile);
        }
        Ok(VerifiedIdentity { subject, email })
    }
}

// Some providers send `"email_verified": "true"`.
fn lenient_bool<'de, D>(de: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

struct DiscoveryCache {
    url: Url,
    ttl: Duration,
    slot: RwLock<Option<(Instant, Arc<Discovery>)>>,
}

impl DiscoveryCache {
    async fn get(&self, http: &reqwest::Client) -> Result<Arc<Discovery>, OAuthError> {
        if let Some((fetched_at, doc)) = self.slot.read().await.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(doc.clone());
            }
        }

        let mut slot = self.slot.write().await;
        if let Some((fetched_at, doc)) = slot.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(doc.clone());
            }
        }
        let doc: Discovery = http
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(url = %self.url, "discovery document fetched");
        let doc = Arc::new(doc);
        *slot = Some((Instant::now(), doc.clone()));
        Ok(doc)
    }
}

pub struct OidcClient {
    provider: Provider,
    client_id: String,
    client_secret: String,
    redirect_uri: Url,
    http: reqwest::Client,
    discovery: DiscoveryCache,
}

impl OidcClient {
    /// `timeout` bounds every outbound request, connect included.
    pub fn new(
        provider: Provider,
        cfg: &ProviderConfig,
        redirect_uri: Url,
        timeout: Duration,
        discovery_ttl: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            provider,
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            redirect_uri,
            http,
            discovery: DiscoveryCache {
                url: cfg.discovery_url.clone(),
                ttl: discovery_ttl,
                slot: RwLock::new(None),
            },
        })
    }
}

#[async_trait]
impl IdentityProvider for OidcClient {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn authorization_url(&self, state: &str) -> Result<Url, OAuthError> {
        let doc = self.discovery.get(&self.http).await?;
        let mut url = doc.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", SCOPES)
            .append_pair("response_type", "code")
            .append_pair("access_type", "offline")
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, OAuthError> {
        let doc = self.discovery.get(&self.http).await?;
        let res = self
            .http
            .post(doc.token_endpoint.clone())
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        let status = res.status();
        let body: Value = match res.json().await {
            Ok(v) => v,
            Err(e) if status.is_server_error() || e.is_timeout() => {
                return Err(OAuthError::ProviderUnavailable(format!(
                    "token endpoint {status}: {e}"
                )))
            }
            Err(_) => {
                return Err(OAuthError::TokenExchangeFailed(format!(
                    "token endpoint {status} returned a non-json body"
                )))
            }
        };

        if let Some(err) = body.get("error") {
            let code = err.as_str().unwrap_or("unknown");
            return Err(OAuthError::TokenExchangeFailed(format!("{status} {code}")));
        }
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OAuthError::TokenExchangeFailed("response has no access_token".into()))?;
        Ok(TokenSet {
            access_token: access_token.to_string(),
        })
    }

    async fn fetch_profile(&self, tokens: &TokenSet) -> Result<ProviderProfile, OAuthError> {
        let doc = self.discovery.get(&self.http).await?;
        let profile = self
            .http
            .get(doc.userinfo_endpoint.clone())
            .bearer_auth(&tokens.access_token)
            .send()
            .await?
            .error_for_status()?
            .json::<ProviderProfile>()
            .await?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        extract::State,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, post},
        Form, Json, Router,
    };
    use serde_json::json;
    use tokio::net::TcpListener;

    #[derive(Clone)]
    struct MockIdp {
        base: Url,
        discovery_hits: Arc<AtomicUsize>,
    }

    async fn discovery(State(idp): State<MockIdp>) -> Json<Value> {
        idp.discovery_hits.fetch_add(1, Ordering::SeqCst);
        Json(json!({
            "issuer": idp.base.as_str(),
            "authorization_endpoint": idp.base.join("auth").unwrap().as_str(),
            "token_endpoint": idp.base.join("token").unwrap().as_str(),
            "userinfo_endpoint": idp.base.join("userinfo").unwrap().as_str(),
        }))
    }

    async fn token(Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
        let ok = form.get("code").map(String::as_str) == Some("good-code")
            && form.get("grant_type").map(String::as_str) == Some("authorization_code")
            && form.get("client_secret").map(String::as_str) == Some("client-secret")
            && form.contains_key("redirect_uri");
        if ok {
            (StatusCode::OK, Json(json!({ "access_token": "at-1", "token_type": "Bearer" })))
        } else {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" })))
        }
    }

    async fn userinfo(headers: HeaderMap) -> impl IntoResponse {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != "Bearer at-1" {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid_token" })));
        }
        (
            StatusCode::OK,
            Json(json!({ "sub": "g-123", "email": "Alice@Gmail.com", "email_verified": true })),
        )
    }

    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_secs(3)).await;
        "{}"
    }

    async fn spawn_idp() -> MockIdp {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base: Url = format!("http://{}/", listener.local_addr().unwrap())
            .parse()
            .unwrap();
        let idp = MockIdp {
            base,
            discovery_hits: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/token", post(token))
            .route("/userinfo", get(userinfo))
            .route("/slow", get(slow))
            .with_state(idp.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        idp
    }

    fn client(discovery_url: Url, timeout: Duration) -> OidcClient {
        let cfg = ProviderConfig {
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
            discovery_url,
        };
        OidcClient::new(
            Provider::Google,
            &cfg,
            "https://app.example/oauth/google/callback".parse().unwrap(),
            timeout,
            Duration::from_secs(60),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn authorization_url_carries_required_params_and_discovery_is_cached() {
        let idp = spawn_idp().await;
        let c = client(
            idp.base.join(".well-known/openid-configuration").unwrap(),
            Duration::from_secs(5),
        );

        let url = c.authorization_url("state-xyz").await.unwrap();
        let _ = c.authorization_url("state-abc").await.unwrap();
        assert_eq!(idp.discovery_hits.load(Ordering::SeqCst), 1);

        assert_eq!(url.path(), "/auth");
        let q: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(q["client_id"], "client-id");
        assert_eq!(q["redirect_uri"], "https://app.example/oauth/google/callback");
        assert_eq!(q["scope"], "openid email profile");
        assert_eq!(q["response_type"], "code");
        assert_eq!(q["access_type"], "offline");
        assert_eq!(q["state"], "state-xyz");
        assert!(!q.contains_key("client_secret"));
    }

    #[tokio::test]
    async fn code_exchange_and_userinfo() {
        let idp = spawn_idp().await;
        let c = client(
            idp.base.join(".well-known/openid-configuration").unwrap(),
            Duration::from_secs(5),
        );

        let tokens = c.exchange_code("good-code").await.unwrap();
        assert_eq!(tokens.access_token, "at-1");
        assert!(!format!("{tokens:?}").contains("at-1"));

        let identity = c.fetch_profile(&tokens).await.unwrap().into_identity().unwrap();
        assert_eq!(identity.subject, "g-123");
        assert_eq!(identity.email, "alice@gmail.com");
    }

    #[tokio::test]
    async fn provider_error_field_fails_exchange() {
        let idp = spawn_idp().await;
        let c = client(
            idp.base.join(".well-known/openid-configuration").unwrap(),
            Duration::from_secs(5),
        );
        let err = c.exchange_code("stale-code").await.unwrap_err();
        assert!(matches!(err, OAuthError::TokenExchangeFailed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn bad_access_token_is_provider_unavailable() {
        let idp = spawn_idp().await;
        let c = client(
            idp.base.join(".well-known/openid-configuration").unwrap(),
            Duration::from_secs(5),
        );
        let err = c
            .fetch_profile(&TokenSet {
                access_token: "forged".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::ProviderUnavailable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let idp = spawn_idp().await;
        let c = client(idp.base.join("slow").unwrap(), Duration::from_millis(200));
        let err = c.authorization_url("s").await.unwrap_err();
        match err {
            OAuthError::ProviderUnavailable(detail) => assert!(detail.starts_with("timeout")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_provider_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let c = client(
            format!("http://{addr}/.well-known/openid-configuration").parse().unwrap(),
            Duration::from_secs(2),
        );
        let err = c.exchange_code("good-code").await.unwrap_err();
        assert!(matches!(err, OAuthError::ProviderUnavailable(_)), "{err:?}");
    }

    #[test]
    fn profile_without_email_or_subject_is_incomplete() {
        let no_email = ProviderProfile {
            subject: Some("s".into()),
            ..Default::default()
        };
        let no_sub = ProviderProfile {
            email: Some("a@x.io".into()),
            ..Default::default()
        };
        let unverified: ProviderProfile =
            serde_json::from_value(json!({ "sub": "s", "email": "a@x.io", "email_verified": "false" }))
                .unwrap();
        for p in [no_email, no_sub, unverified] {
            assert!(matches!(p.into_identity(), Err(OAuthError::IncompleteProfile)));
        }
    }

    #[test]
    fn profile_values_wider_than_their_columns_are_incomplete() {
        let long_email = ProviderProfile {
            subject: Some("s".into()),
            email: Some(format!("{}@gmail.com", "a".repeat(MAX_EMAIL_LEN))),
            email_verified: Some(true),
            name: None,
        };
        let long_sub = ProviderProfile {
            subject: Some("9".repeat(MAX_PROVIDER_ID_LEN + 1)),
            email: Some("a@x.io".into()),
            email_verified: Some(true),
            name: None,
        };
        for p in [long_email, long_sub] {
            assert!(matches!(p.into_identity(), Err(OAuthError::IncompleteProfile)));
        }
    }
}
