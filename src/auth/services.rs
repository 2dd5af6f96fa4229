use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::auth::{
    dto::RegisterForm,
    password::{hash_password, verify_dummy, verify_password, MIN_PASSWORD_LEN},
    repo::UserStore,
    repo_types::{NewUser, StoreError, UniqueField, User, MAX_EMAIL_LEN, MAX_USERNAME_LEN},
};

pub const INVALID_CREDENTIALS: &str = "Invalid username or password.";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Registration input rejected before touching the store. The message is
/// shown to the user as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("All fields are required.")]
    MissingFields,
    #[error("Username must be at most 80 characters.")]
    UsernameTooLong,
    #[error("Email must be at most 120 characters.")]
    EmailTooLong,
    #[error("Please enter a valid email address.")]
    InvalidEmail,
    #[error("Passwords do not match.")]
    PasswordMismatch,
    #[error("Password must be at least 6 characters.")]
    PasswordTooShort,
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("{0} already taken")]
    Conflict(UniqueField),
    #[error(transparent)]
    Failed(anyhow::Error),
}

impl RegisterError {
    pub fn user_message(&self) -> String {
        match self {
            RegisterError::Invalid(v) => v.to_string(),
            RegisterError::Conflict(UniqueField::Username) => "Username already exists.".into(),
            RegisterError::Conflict(UniqueField::Email) => "Email already registered.".into(),
            RegisterError::Conflict(UniqueField::ProviderId(_)) | RegisterError::Failed(_) => {
                "An error occurred during registration.".into()
            }
        }
    }
}

impl From<StoreError> for RegisterError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(field) => RegisterError::Conflict(field),
            other => RegisterError::Failed(other.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// Unknown username and wrong password are deliberately the same case.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Normalized, validated registration.
#[derive(Debug, PartialEq, Eq)]
pub struct ValidRegistration {
    pub username: String,
    pub email: String,
    pub password: String,
}

pub fn validate_registration(form: RegisterForm) -> Result<ValidRegistration, ValidationError> {
    let username = form.username.trim().to_string();
    let email = form.email.trim().to_lowercase();

    if username.is_empty() || email.is_empty() || form.password.is_empty() {
        return Err(ValidationError::MissingFields);
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(ValidationError::UsernameTooLong);
    }
    if email.chars().count() > MAX_EMAIL_LEN {
        return Err(ValidationError::EmailTooLong);
    }
    if !is_valid_email(&email) {
        return Err(ValidationError::InvalidEmail);
    }
    if form.password != form.confirm_password {
        return Err(ValidationError::PasswordMismatch);
    }
    if form.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(ValidRegistration {
        username,
        email,
        password: form.password,
    })
}

/// Validates, hashes and inserts. Duplicate usernames or emails surface as
/// [`RegisterError::Conflict`] from the store's own constraint.
pub async fn register_account(
    users: &dyn UserStore,
    form: RegisterForm,
) -> Result<User, RegisterError> {
    let valid = validate_registration(form)?;
    let password = valid.password;
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("hash task panicked")
        .map_err(RegisterError::Failed)?
        .map_err(RegisterError::Failed)?;

    let user = users
        .create(NewUser::local(valid.username, valid.email, hash))
        .await?;
    debug!(user_id = %user.id, "account created");
    Ok(user)
}

/// Accounts without a password still pay for one Argon2 verification.
fn check_password(plain: &str, hash: Option<&str>) -> bool {
    match hash {
        Some(hash) => verify_password(plain, Some(hash)),
        None => verify_dummy(plain),
    }
}

pub async fn authenticate(
    users: &dyn UserStore,
    username: &str,
    password: &str,
) -> Result<User, LoginError> {
    let user = users.find_by_username(username.trim()).await?;
    let password = password.to_string();

    let Some(user) = user else {
        tokio::task::spawn_blocking(move || verify_dummy(&password))
            .await
            .context("verify task panicked")?;
        warn!("login for unknown username");
        return Err(LoginError::InvalidCredentials);
    };

    let hash = user.password_hash.clone();
    let ok = tokio::task::spawn_blocking(move || check_password(&password, hash.as_deref()))
        .await
        .context("verify task panicked")?;
    if !ok {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(LoginError::InvalidCredentials);
    }
    Ok(user)
}
