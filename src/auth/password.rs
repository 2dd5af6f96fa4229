use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use tracing::{error, warn};

pub const MIN_PASSWORD_LEN: usize = 6;

lazy_static! {
    /// Hash checked when the username is unknown, so both login failures
    /// spend the same time in Argon2.
    static ref DUMMY_HASH: Option<String> = hash_password("gatehouse-dummy-password").ok();
}

/// Argon2id hash with a random salt, returned as a PHC string.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// False for a missing or malformed record; never errors.
pub fn verify_password(plain: &str, hash: Option<&str>) -> bool {
    let Some(hash) = hash else {
        return false;
    };
    let parsed = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "stored password hash is malformed");
            return false;
        }
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// Burns one verification against the dummy hash. Always false.
pub fn verify_dummy(plain: &str) -> bool {
    let _ = verify_password(plain, DUMMY_HASH.as_deref());
    false
}
