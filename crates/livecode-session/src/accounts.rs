//! Token-based user accounts.
//!
//! Tokens identify a user profile and nothing more: session routes do
//! not require them.

use std::{collections::HashMap, sync::RwLock};

use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

/// PBKDF2 iterations for stored passwords.
pub const DEFAULT_ROUNDS: u32 = 100_000;

const MIN_PASSWORD_LEN: usize = 8;

/// Public user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: u64,
    pub email: String,
    pub full_name: String,
}

/// Authentication error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Email already registered: {0}")]
    EmailTaken(String),
    #[error("Incorrect email or password")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Invalid signup: {0}")]
    Invalid(String),
}

struct Account {
    profile: UserProfile,
    salt: [u8; 16],
    hash: [u8; 32],
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, String>,
    next_id: u64,
}

/// In-memory account directory with bearer tokens.
pub struct AccountStore {
    inner: RwLock<Inner>,
    rounds: u32,
}

impl Default for AccountStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rounds(DEFAULT_ROUNDS)
    }

    /// Create a store with a custom PBKDF2 iteration count.
    #[must_use]
    pub fn with_rounds(rounds: u32) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            rounds: rounds.max(1),
        }
    }

    /// Register a user.
    ///
    /// # Errors
    /// Returns error if the email is taken or the input is invalid.
    pub fn signup(&self, email: &str, full_name: &str, password: &str) -> Result<UserProfile, AuthError> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(AuthError::Invalid("email must contain '@'".to_string()));
        }
        if full_name.trim().is_empty() {
            return Err(AuthError::Invalid("full name is required".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Invalid(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let salt = *Uuid::new_v4().as_bytes();
        let hash = self.hash(password, &salt);

        let mut inner = self.write();
        if inner.accounts.contains_key(&email) {
            return Err(AuthError::EmailTaken(email));
        }
        inner.next_id += 1;
        let profile = UserProfile {
            id: inner.next_id,
            email: email.clone(),
            full_name: full_name.trim().to_string(),
        };
        inner.accounts.insert(
            email,
            Account {
                profile: profile.clone(),
                salt,
                hash,
            },
        );
        tracing::info!(user_id = profile.id, "Account created");
        Ok(profile)
    }

    /// Exchange credentials for a bearer token.
    ///
    /// # Errors
    /// Returns `AuthError::InvalidCredentials` on unknown email or wrong password.
    pub fn login(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let email = normalize_email(email);
        let (salt, expected) = {
            let inner = self.read();
            let account = inner
                .accounts
                .get(&email)
                .ok_or(AuthError::InvalidCredentials)?;
            (account.salt, account.hash)
        };

        if !constant_time_eq(&self.hash(password, &salt), &expected) {
            tracing::warn!("Rejected login attempt");
            return Err(AuthError::InvalidCredentials);
        }

        let token = Uuid::new_v4().simple().to_string();
        self.write().tokens.insert(token.clone(), email);
        Ok(token)
    }

    /// Profile behind a token.
    ///
    /// # Errors
    /// Returns `AuthError::InvalidToken` if the token is unknown.
    pub fn me(&self, token: &str) -> Result<UserProfile, AuthError> {
        let inner = self.read();
        inner
            .tokens
            .get(token)
            .and_then(|email| inner.accounts.get(email))
            .map(|account| account.profile.clone())
            .ok_or(AuthError::InvalidToken)
    }

    /// Revoke a token. Returns whether it was active.
    pub fn logout(&self, token: &str) -> bool {
        self.write().tokens.remove(token).is_some()
    }

    fn hash(&self, password: &str, salt: &[u8]) -> [u8; 32] {
        pbkdf2::pbkdf2_hmac_array::<Sha256, 32>(password.as_bytes(), salt, self.rounds)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AccountStore {
        AccountStore::with_rounds(10)
    }

    #[test]
    fn test_signup_login_me() {
        let store = store();
        let profile = store
            .signup("Test@Example.com", "Test User", "password123")
            .unwrap();
        assert_eq!(profile.email, "test@example.com");

        let token = store.login("test@example.com", "password123").unwrap();
        assert_eq!(store.me(&token).unwrap(), profile);

        assert!(store.logout(&token));
        assert_eq!(store.me(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_wrong_credentials() {
        let store = store();
        store.signup("a@b.c", "A", "password123").unwrap();

        assert_eq!(
            store.login("a@b.c", "wrongpassword"),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            store.login("wrong@example.com", "password123"),
            Err(AuthError::InvalidCredentials)
        );
    }

    #[test]
    fn test_signup_validation() {
        let store = store();
        assert!(matches!(
            store.signup("no-at-sign", "A", "password123"),
            Err(AuthError::Invalid(_))
        ));
        assert!(matches!(
            store.signup("a@b.c", "A", "short"),
            Err(AuthError::Invalid(_))
        ));
        store.signup("a@b.c", "A", "password123").unwrap();
        assert!(matches!(
            store.signup("A@B.C", "Other", "password456"),
            Err(AuthError::EmailTaken(_))
        ));
    }
}
