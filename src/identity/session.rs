use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use super::principal::Identity;
use crate::storage::{Store, StoreError, StoreResult};

/// Entity partition that holds session records. Sessions deliberately reuse
/// the generic entity store so there is no second storage technology; the
/// token lives inside the document, not in the record id.
pub const SESSION_ENTITY: &str = "Session";

pub type SessionToken = String;

#[derive(Debug, Clone)]
pub struct Session {
    pub record_id: String,
    pub token: SessionToken,
    pub identity: Identity,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a token check. Expired is classified separately from Invalid
/// so callers can log the distinction, but both map to Unauthorized.
#[derive(Debug, Clone)]
pub enum Validation {
    Valid(Identity),
    Expired,
    Invalid,
}

fn gen_token() -> StoreResult<String> {
    // 256-bit random token, base64url without padding. A failed RNG must
    // never degrade into a predictable token.
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf)
        .map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

pub struct SessionStore {
    pub ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self { Self { ttl: Duration::from_secs(60 * 60 * 24) } }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self { Self { ttl } }

    /// Issue a fresh session for an authenticated identity.
    /// `expires_at` is fixed at creation; use never extends it.
    pub fn issue(&self, store: &Store, identity: &Identity) -> StoreResult<Session> {
        let token = gen_token()?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(24));
        let mut doc = serde_json::Map::new();
        doc.insert("token".into(), json!(token));
        doc.insert("user_id".into(), json!(identity.user_id));
        doc.insert("username".into(), json!(identity.username));
        doc.insert("email".into(), json!(identity.email));
        doc.insert("role".into(), json!(identity.role));
        doc.insert("expires_at".into(), json!(expires_at.to_rfc3339()));
        let rec = store.create(SESSION_ENTITY, doc)?;
        debug!(target: "appbase::session", "issue: user='{}' sid='{}' ttl_secs={}", identity.username, rec.id, self.ttl.as_secs());
        Ok(Session { record_id: rec.id, token, identity: identity.clone(), expires_at })
    }

    /// Look up a session by its opaque token and classify it.
    ///
    /// Expired sessions are not eagerly purged; they simply never validate
    /// again. Unparsable session documents classify as Invalid.
    pub fn validate(&self, store: &Store, token: &str) -> StoreResult<Validation> {
        let Some(rec) = store.find_by_field(SESSION_ENTITY, "token", token)? else {
            return Ok(Validation::Invalid);
        };
        let Some(expires_at) = rec
            .data_str("expires_at")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
        else {
            return Ok(Validation::Invalid);
        };
        if expires_at < Utc::now() {
            return Ok(Validation::Expired);
        }
        let field = |k: &str| rec.data_str(k).unwrap_or_default().to_string();
        Ok(Validation::Valid(Identity {
            user_id: field("user_id"),
            username: field("username"),
            email: field("email"),
            role: field("role"),
        }))
    }

    /// Server-side revoke: drop the session record so the token can never
    /// validate again. Returns false when no session matched.
    pub fn revoke(&self, store: &Store, token: &str) -> StoreResult<bool> {
        let Some(rec) = store.find_by_field(SESSION_ENTITY, "token", token)? else {
            return Ok(false);
        };
        store.delete(SESSION_ENTITY, &rec.id)?;
        debug!(target: "appbase::session", "revoke: sid='{}'", rec.id);
        Ok(true)
    }
}

/// Build a session document with an explicit expiry. Test hook for expiry
/// classification; production code goes through `SessionStore::issue`.
#[cfg(test)]
pub fn write_session_with_expiry(
    store: &Store,
    identity: &Identity,
    token: &str,
    expires_at: DateTime<Utc>,
) -> StoreResult<()> {
    let mut doc = serde_json::Map::new();
    doc.insert("token".into(), json!(token));
    doc.insert("user_id".into(), json!(identity.user_id));
    doc.insert("username".into(), json!(identity.username));
    doc.insert("email".into(), json!(identity.email));
    doc.insert("role".into(), json!(identity.role));
    doc.insert("expires_at".into(), json!(expires_at.to_rfc3339()));
    store.create(SESSION_ENTITY, doc)?;
    Ok(())
}
