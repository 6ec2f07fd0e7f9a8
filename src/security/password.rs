//! Password hashing and checks

use crate::{Error, Result};

/// Minimum password length in characters
pub const MIN_PASSWORD_LEN: usize = 8;

/// Hash a password with bcrypt at the given cost
///
/// # Errors
///
/// Returns error if the cost is out of range or hashing fails
pub fn hash_password(plain: &str, cost: u32) -> Result<String> {
    Ok(bcrypt::hash(plain, cost)?)
}

/// Check a password against a stored hash
///
/// A malformed hash never matches.
#[must_use]
pub fn verify_password(plain: &str, hash: &str) -> bool {
    match bcrypt::verify(plain, hash) {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!(error = %e, "password hash could not be verified");
            false
        }
    }
}

/// Reject passwords that are too weak to store
///
/// # Errors
///
/// Returns `Error::InvalidInput` describing the problem
pub fn validate_new_password(plain: &str) -> Result<()> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
