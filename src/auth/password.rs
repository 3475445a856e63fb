use crate::error::{AppError, AppResult};

/// Stored in place of a hash for accounts that must never log in.
pub const UNUSABLE_HASH: &str = "!";

/// Hash a password with a fresh random salt.
pub fn hash(password: &str) -> AppResult<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Check a password against a stored hash. Malformed hashes never match.
pub fn verify(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}
