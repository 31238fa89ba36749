//! # Operator Credentials
//!
//! Argon2 hashing for operator PINs. Only the PHC-format hash string is
//! stored (`operators.pin_hash`).

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, SaltString},
    Argon2, PasswordHasher, PasswordVerifier,
};

use crate::error::{DbError, DbResult};

/// Hash a PIN for storage.
pub fn hash_pin(pin: &str) -> DbResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map_err(|e| DbError::Internal(format!("Failed to hash PIN: {}", e)))?;
    Ok(hash.to_string())
}

/// Verify a PIN against a stored hash.
///
/// An unparseable hash never verifies.
pub fn verify_pin(pin: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(pin.as_bytes(), &parsed_hash)
        .is_ok()
}
