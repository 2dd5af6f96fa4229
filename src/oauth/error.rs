use crate::auth::repo_types::Provider;

/// Failures of the federated login flow. Every variant is recovered at the
/// callback handler; the detail strings are for logs only.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("callback carried no authorization code")]
    MissingCode,
    #[error("oauth state missing or mismatched")]
    StateMismatch,
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),
    #[error("provider profile lacks a verified email or subject")]
    IncompleteProfile,
    #[error("could not create account: {0}")]
    AccountCreationFailed(String),
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("account lookup failed: {0}")]
    Storage(String),
}

/// Notice for any failed federated login that has no more specific message.
pub fn authentication_failed(provider: Provider) -> String {
    format!("{} authentication failed.", provider.display_name())
}

impl OAuthError {
    /// Generic notice shown to the browser. Never includes provider payloads.
    pub fn user_message(&self, provider: Provider) -> String {
        match self {
            OAuthError::AccountCreationFailed(_) => "Error creating account.".into(),
            _ => authentication_failed(provider),
        }
    }
}

impl From<reqwest::Error> for OAuthError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connect"
        } else if e.is_decode() {
            "decode"
        } else {
            "request"
        };
        OAuthError::ProviderUnavailable(format!("{kind}: {e}"))
    }
}
