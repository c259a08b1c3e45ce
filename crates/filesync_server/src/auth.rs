//! Authentication support for the sync server.
//!
//! Credentials live in a JSON users file mapping each username to the
//! lowercase hex SHA-256 of its password:
//!
//! ```json
//! { "admin": "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8" }
//! ```
//!
//! The store is loaded once at startup. [`AuthenticationGate`] is the pure
//! check the dispatcher runs in front of every remote call.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for credential store operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors raised while loading or saving the credential store.
///
/// Bad credentials are never an error; see [`AuthenticationGate::authenticate`].
#[derive(Error, Debug)]
pub enum AuthError {
    /// The users file could not be read or written.
    #[error("credential store {path} unavailable: {source}")]
    Unavailable {
        /// Path to the users file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The users file is not a JSON object of username to hash.
    #[error("credential store {path} is malformed: {source}")]
    Malformed {
        /// Path to the users file.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// Usernames may not be empty.
    #[error("username must not be empty")]
    EmptyUsername,
}

/// A password verifier: hex-encoded SHA-256 digest of the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordVerifier(String);

impl PasswordVerifier {
    /// Derives the verifier for a plaintext password.
    pub fn from_password(password: &str) -> Self {
        let digest = Sha256::digest(password.as_bytes());
        Self(hex_lower(&digest))
    }

    /// Checks a plaintext password against this verifier.
    ///
    /// The comparison does not short-circuit on the first differing byte.
    pub fn verify(&self, password: &str) -> bool {
        let candidate = Self::from_password(password);
        constant_time_eq(self.0.as_bytes(), candidate.0.as_bytes())
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Username to password verifier mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialStore {
    users: BTreeMap<String, PasswordVerifier>,
}

impl CredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from plaintext `(username, password)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let users = pairs
            .into_iter()
            .map(|(user, password)| (user.to_string(), PasswordVerifier::from_password(password)))
            .collect();
        Self { users }
    }

    /// Loads the store from a users file.
    ///
    /// # Errors
    ///
    /// A missing, unreadable or malformed file is an error: the server
    /// cannot serve without its credential store.
    pub fn load(path: &Path) -> AuthResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| AuthError::Unavailable {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&data).map_err(|source| AuthError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads the store, or returns an empty one if the file does not exist.
    pub fn load_or_default(path: &Path) -> AuthResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Writes the store to a users file, creating parent directories.
    pub fn save(&self, path: &Path) -> AuthResult<()> {
        let unavailable = |source| AuthError::Unavailable {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(unavailable)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|source| AuthError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(unavailable)
    }

    /// Adds a user, replacing the password of an existing one.
    ///
    /// Returns true if the user did not exist before.
    pub fn insert(&mut self, username: &str, password: &str) -> AuthResult<bool> {
        if username.is_empty() {
            return Err(AuthError::EmptyUsername);
        }
        let previous = self
            .users
            .insert(username.to_string(), PasswordVerifier::from_password(password));
        Ok(previous.is_none())
    }

    /// Returns the registered usernames in sorted order.
    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    /// Returns the verifier for a user.
    pub fn verifier(&self, username: &str) -> Option<&PasswordVerifier> {
        self.users.get(username)
    }

    /// Returns the number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns true if the store holds no users.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Stateless credential check.
///
/// Never mutates anything and never logs; recording a failed attempt is
/// the caller's job.
#[derive(Debug, Clone)]
pub struct AuthenticationGate {
    store: CredentialStore,
}

impl AuthenticationGate {
    /// Creates a gate over a loaded store.
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    /// Returns true only if `username` exists and `password` matches.
    ///
    /// Unknown users and wrong passwords are indistinguishable to the caller.
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        match self.store.verifier(username) {
            Some(verifier) => verifier.verify(password),
            None => {
                // Burn the same hashing work as a real check.
                let _ = PasswordVerifier::from_password(password);
                false
            }
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
