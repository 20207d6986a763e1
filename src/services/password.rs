use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use ring::error::Unspecified;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;

const SCHEME: &str = "pbkdf2-sha256";
const ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = ring::digest::SHA256_OUTPUT_LEN;

static ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

#[derive(thiserror::Error, Debug)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    HashingFailed(String),

    #[error("Invalid password hash format")]
    InvalidFormat,
}

impl From<Unspecified> for PasswordError {
    fn from(_: Unspecified) -> Self {
        PasswordError::HashingFailed("Cryptographic operation failed".to_string())
    }
}

/// Hashes a password with a random salt.
///
/// Format: `pbkdf2-sha256$<iterations>$<salt b64>$<hash b64>`
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new().fill(&mut salt)?;

    let iterations = NonZeroU32::new(ITERATIONS).ok_or(PasswordError::InvalidFormat)?;
    let mut hash = [0u8; HASH_LEN];
    pbkdf2::derive(ALGORITHM, iterations, &salt, password.as_bytes(), &mut hash);

    Ok(format!(
        "{}${}${}${}",
        SCHEME,
        ITERATIONS,
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(hash)
    ))
}

/// Checks `password` against a hash produced by `hash_password`
pub fn verify_password(password: &str, encoded: &str) -> Result<bool, PasswordError> {
    let mut parts = encoded.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(hash), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(PasswordError::InvalidFormat);
    };

    if scheme != SCHEME {
        return Err(PasswordError::InvalidFormat);
    }

    let iterations = iterations
        .parse::<u32>()
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or(PasswordError::InvalidFormat)?;
    let salt = STANDARD_NO_PAD
        .decode(salt)
        .map_err(|_| PasswordError::InvalidFormat)?;
    let hash = STANDARD_NO_PAD
        .decode(hash)
        .map_err(|_| PasswordError::InvalidFormat)?;

    Ok(pbkdf2::verify(ALGORITHM, iterations, &salt, password.as_bytes(), &hash).is_ok())
}

/// Runs the same PBKDF2 work as `verify_password` for a login whose email
/// matched no user. Always false.
pub fn verify_unknown_user(password: &str) -> bool {
    let Some(iterations) = NonZeroU32::new(ITERATIONS) else {
        return false;
    };
    let salt = [0u8; SALT_LEN];
    let hash = [0u8; HASH_LEN];
    let _ = pbkdf2::verify(ALGORITHM, iterations, &salt, password.as_bytes(), &hash);
    false
}
