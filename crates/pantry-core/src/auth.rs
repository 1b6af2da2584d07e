use std::fmt;

use thiserror::Error;

/// Where a request carried its secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretLocation {
    /// The `secret` field of a write request body.
    Body,
    /// The `secret` header of a read request.
    Header,
}

impl fmt::Display for SecretLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretLocation::Body => f.write_str("request body"),
            SecretLocation::Header => f.write_str("request header"),
        }
    }
}

/// Authentication failures. Only ever logged; callers receive a fixed message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("{location} secret missing")]
    Missing { location: SecretLocation },
    #[error("{location} secret mismatch")]
    Mismatch { location: SecretLocation },
}

/// The process-wide shared secret. Built once at startup and handed to the router.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    secret: String,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Exact, case-sensitive comparison of `supplied` against the shared secret.
    pub fn verify(&self, supplied: Option<&str>, location: SecretLocation) -> Result<(), AuthError> {
        let supplied = supplied.ok_or(AuthError::Missing { location })?;
        if constant_time_eq(supplied.as_bytes(), self.secret.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::Mismatch { location })
        }
    }
}

// Never print the secret itself.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
