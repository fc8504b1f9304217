//! Authentication lifecycle tests: signup/login producing sessions, token
//! validation and expiry classification, revocation, and the bootstrap admin
//! path. These exercise positive and negative paths across the credential
//! service and the session store.

use anyhow::Result;
use serde_json::json;
use tempfile::tempdir;

use appbase::identity::{Credentials, SessionStore, Validation, SESSION_ENTITY};
use appbase::storage::Store;

fn service() -> Credentials {
    Credentials::new(SessionStore::default())
}

#[tokio::test]
async fn signup_then_login_round_trip() -> Result<()> {
    let tmp = tempdir()?;
    let store = Store::new(tmp.path())?;
    let auth = service();

    let signup_sess = auth.signup(&store, "alice", "a@x.com", "pw123456").expect("signup");
    assert!(matches!(
        auth.sessions.validate(&store, &signup_sess.token).unwrap(),
        Validation::Valid(_)
    ));

    let login_sess = auth.login(&store, "alice", "pw123456").expect("login");
    assert_ne!(login_sess.token, signup_sess.token, "each login issues a fresh token");
    match auth.sessions.validate(&store, &login_sess.token).unwrap() {
        Validation::Valid(who) => {
            assert_eq!(who.username, "alice");
            assert_eq!(who.email, "a@x.com");
            assert!(!who.user_id.is_empty());
        }
        other => panic!("expected Valid, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn expiry_is_fixed_at_issue_and_classifies_expired() -> Result<()> {
    let tmp = tempdir()?;
    let store = Store::new(tmp.path())?;
    let auth = service();

    let sess = auth.signup(&store, "bob", "b@x.com", "pw123456")?;
    let now = chrono::Utc::now();
    assert!(sess.expires_at > now, "fresh session expires in the future");

    // Sessions are plain entities; plant one whose expiry has already passed
    let mut doc = serde_json::Map::new();
    doc.insert("token".into(), json!("stale-token"));
    doc.insert("user_id".into(), json!("u-bob"));
    doc.insert("username".into(), json!("bob"));
    doc.insert("email".into(), json!("b@x.com"));
    doc.insert("role".into(), json!("user"));
    doc.insert(
        "expires_at".into(),
        json!((now - chrono::Duration::seconds(1)).to_rfc3339()),
    );
    store.create(SESSION_ENTITY, doc)?;

    assert!(matches!(
        auth.sessions.validate(&store, "stale-token").unwrap(),
        Validation::Expired
    ));
    Ok(())
}

#[tokio::test]
async fn session_document_with_garbage_expiry_is_invalid() -> Result<()> {
    let tmp = tempdir()?;
    let store = Store::new(tmp.path())?;
    let auth = service();

    let mut doc = serde_json::Map::new();
    doc.insert("token".into(), json!("broken-token"));
    doc.insert("expires_at".into(), json!("not-a-date"));
    store.create(SESSION_ENTITY, doc)?;

    assert!(matches!(
        auth.sessions.validate(&store, "broken-token").unwrap(),
        Validation::Invalid
    ));
    Ok(())
}

#[tokio::test]
async fn logout_revokes_server_side() -> Result<()> {
    let tmp = tempdir()?;
    let store = Store::new(tmp.path())?;
    let auth = service();

    let sess = auth.signup(&store, "carol", "c@x.com", "pw123456")?;
    assert!(auth.sessions.revoke(&store, &sess.token)?);
    assert!(matches!(
        auth.sessions.validate(&store, &sess.token).unwrap(),
        Validation::Invalid
    ));
    Ok(())
}

#[tokio::test]
async fn login_failure_modes_are_indistinguishable() -> Result<()> {
    let tmp = tempdir()?;
    let store = Store::new(tmp.path())?;
    let auth = service();
    auth.signup(&store, "dave", "d@x.com", "pw123456")?;

    let wrong = auth.login(&store, "dave", "not-the-password").unwrap_err();
    let missing = auth.login(&store, "nobody", "not-the-password").unwrap_err();
    assert_eq!(wrong.http_status(), 401);
    assert_eq!(missing.http_status(), 401);
    assert_eq!(wrong.code_str(), missing.code_str());
    assert_eq!(wrong.message(), missing.message());
    Ok(())
}

#[tokio::test]
async fn bootstrap_admin_path_is_weaker_but_logs_in() -> Result<()> {
    let tmp = tempdir()?;
    let store = Store::new(tmp.path())?;

    appbase::identity::ensure_bootstrap_admin(&store, "admin", "bootstrap-secret")?;
    let admin = store.find_by_field("User", "username", "admin")?.expect("admin exists");
    let stored = admin.data_str("password_hash").unwrap();
    assert!(!stored.starts_with("$argon2"), "bootstrap path uses the legacy digest");

    // A regular signup stays on the Argon2 path
    let auth = service();
    auth.signup(&store, "erin", "e@x.com", "pw123456")?;
    let erin = store.find_by_field("User", "username", "erin")?.unwrap();
    assert!(erin.data_str("password_hash").unwrap().starts_with("$argon2"));

    let sess = auth.login(&store, "admin", "bootstrap-secret")?;
    match auth.sessions.validate(&store, &sess.token).unwrap() {
        Validation::Valid(who) => assert_eq!(who.role, "admin"),
        other => panic!("expected Valid, got {:?}", other),
    }
    Ok(())
}
