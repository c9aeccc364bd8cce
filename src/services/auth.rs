//! Request authorization: the admin bearer key and per-share Basic passwords.
//!
//! - `Authorization: Bearer <base64(admin key)>` grants unrestricted access.
//! - `Authorization: Basic <base64(share id:password)>` unlocks one
//!   password-protected share.
//!
//! A missing header, a foreign share id and a wrong password are all reported
//! the same way so callers cannot tell which part was wrong.

use argon2::{
    Argon2, PasswordHash, PasswordVerifier,
    password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};
use axum::http::{HeaderMap, header};
use base64::{Engine as _, engine::general_purpose};
use uuid::Uuid;

use super::share_service::{ShareError, ShareResult};
use crate::models::share::Share;

/// Credentials extracted from a single request.
#[derive(Clone, Debug, Default)]
pub struct Access {
    pub is_admin: bool,
    basic: Option<BasicCredentials>,
}

#[derive(Clone, Debug)]
struct BasicCredentials {
    username: String,
    password: String,
}

impl Access {
    /// Inspect the `Authorization` header against the configured admin key.
    pub fn from_headers(headers: &HeaderMap, admin_key: &str) -> Self {
        let Some(value) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        else {
            return Self::default();
        };

        Self {
            is_admin: check_bearer(value, admin_key),
            basic: parse_basic(value),
        }
    }

    pub fn admin() -> Self {
        Self {
            is_admin: true,
            basic: None,
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            is_admin: false,
            basic: Some(BasicCredentials {
                username: username.into(),
                password: password.into(),
            }),
        }
    }

    /// Owner check: passes trivially for shares without a password, otherwise
    /// requires Basic credentials naming this share with the right password.
    pub async fn can_unlock(&self, share: &Share) -> bool {
        let Some(hash) = share.password.as_deref() else {
            return true;
        };
        let Some(creds) = &self.basic else {
            return false;
        };
        if Uuid::parse_str(&creds.username).ok() != Some(share.id) {
            return false;
        }
        verify_password(&creds.password, hash).await
    }

    /// Rules for fetching one share or its files: temporary shares are hidden
    /// from everyone but the admin, and the admin skips password checks.
    pub async fn authorize_read(&self, share: &Share) -> ShareResult<()> {
        if self.is_admin {
            return Ok(());
        }
        if share.is_temporary {
            return Err(ShareError::Forbidden("share is not finalized".into()));
        }
        if !self.can_unlock(share).await {
            return Err(ShareError::Unauthorized);
        }
        Ok(())
    }

    pub fn require_admin(&self) -> ShareResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(ShareError::Unauthorized)
        }
    }
}

/// True when `value` is `Bearer <token>` and the token decodes to the admin key.
/// An empty admin key never matches.
fn check_bearer(value: &str, admin_key: &str) -> bool {
    const PREFIX: &str = "bearer ";
    if admin_key.is_empty() || value.len() < PREFIX.len() {
        return false;
    }
    let (scheme, token) = value.split_at(PREFIX.len());
    if !scheme.eq_ignore_ascii_case(PREFIX) {
        return false;
    }
    match general_purpose::STANDARD.decode(token.trim()) {
        Ok(decoded) => constant_time_eq(&decoded, admin_key.as_bytes()),
        Err(_) => false,
    }
}

fn parse_basic(value: &str) -> Option<BasicCredentials> {
    const PREFIX: &str = "basic ";
    if value.len() < PREFIX.len() || !value[..PREFIX.len()].eq_ignore_ascii_case(PREFIX) {
        return None;
    }
    let decoded = general_purpose::STANDARD
        .decode(value[PREFIX.len()..].trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Hash a share password into an Argon2 PHC string on the blocking pool.
pub async fn hash_password(password: &str) -> ShareResult<String> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ShareError::PasswordHash(e.to_string()))
    })
    .await
    .map_err(|e| ShareError::PasswordHash(e.to_string()))?
}

/// Check `password` against a stored PHC string on the blocking pool.
pub async fn verify_password(password: &str, hash: &str) -> bool {
    let (password, hash) = (password.to_owned(), hash.to_owned());
    match tokio::task::spawn_blocking(move || verify_blocking(&password, &hash)).await {
        Ok(matched) => matched,
        Err(err) => {
            tracing::error!(error = %err, "password verification task failed");
            false
        }
    }
}

fn verify_blocking(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            tracing::warn!(error = %err, "stored password hash is malformed");
            false
        }
    }
}
