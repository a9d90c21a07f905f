//! Client identifier for the streaming chat connection.
//!
//! A [`ClientId`] is generated once per transport session and stays the same
//! across reconnects, so the server can associate every connection of one
//! client run with the same identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

const PREFIX: &str = "client-";
const SUFFIX_LEN: usize = 9;
const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque client identity of the form `client-<unix-millis>-<9 base36 chars>`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    /// Generate a new identity from the current time and a random suffix.
    #[must_use]
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let mut entropy = uuid::Uuid::new_v4().as_u128();
        let mut suffix = String::with_capacity(SUFFIX_LEN);
        for _ in 0..SUFFIX_LEN {
            suffix.push(char::from(ALPHABET[(entropy % 36) as usize]));
            entropy /= 36;
        }

        Self(format!("{PREFIX}{millis}-{suffix}"))
    }

    /// Build an identity from explicit parts.
    ///
    /// # Errors
    ///
    /// Returns an error if `suffix` is not exactly 9 lowercase base36 characters.
    pub fn from_parts(millis: u128, suffix: &str) -> Result<Self, IdError> {
        validate_suffix(suffix)?;
        Ok(Self(format!("{PREFIX}{millis}-{suffix}")))
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_suffix(suffix: &str) -> Result<(), IdError> {
    if suffix.len() != SUFFIX_LEN {
        return Err(IdError::InvalidSuffix(suffix.to_string()));
    }
    if !suffix.bytes().all(|b| ALPHABET.contains(&b)) {
        return Err(IdError::InvalidSuffix(suffix.to_string()));
    }
    Ok(())
}

impl FromStr for ClientId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| IdError::MissingPrefix(s.to_string()))?;
        let (millis, suffix) = rest
            .split_once('-')
            .ok_or_else(|| IdError::InvalidTimestamp(rest.to_string()))?;
        let millis: u128 = millis
            .parse()
            .map_err(|_| IdError::InvalidTimestamp(millis.to_string()))?;
        Self::from_parts(millis, suffix)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ClientId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The identifier does not start with `client-`.
    #[error("missing client- prefix: {0}")]
    MissingPrefix(String),

    /// The timestamp segment is not a decimal number.
    #[error("invalid timestamp segment: {0}")]
    InvalidTimestamp(String),

    /// The random suffix has the wrong length or alphabet.
    #[error("invalid random suffix: {0}")]
    InvalidSuffix(String),
}
