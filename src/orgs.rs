//! Organization membership service: the join-by-code workflow layered on the
//! entity store, plus the owner-membership row written when an organization
//! is created.

use serde_json::json;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::identity::{Identity, ORG_ENTITY, ORG_MEMBER_ENTITY};
use crate::storage::{EntityRecord, Store};

fn find_membership(
    store: &Store,
    org_id: &str,
    email: &str,
) -> AppResult<Option<EntityRecord>> {
    let mut filters = serde_json::Map::new();
    filters.insert("organization_id".into(), json!(org_id));
    filters.insert("user_email".into(), json!(email));
    let mut rows = store
        .list(ORG_MEMBER_ENTITY, &filters, None, Some(1))
        .map_err(anyhow::Error::from)?;
    Ok(rows.pop())
}

fn write_membership(
    store: &Store,
    org_id: &str,
    email: &str,
    role: &str,
) -> AppResult<EntityRecord> {
    let mut doc = serde_json::Map::new();
    doc.insert("organization_id".into(), json!(org_id));
    doc.insert("user_email".into(), json!(email));
    doc.insert("role".into(), json!(role));
    Ok(store.create(ORG_MEMBER_ENTITY, doc).map_err(anyhow::Error::from)?)
}

/// Join an organization by its join code.
///
/// Adds the identity's email to the member set and writes a member-role
/// membership row. Idempotent: re-joining returns the existing row and never
/// duplicates it; an existing owner row keeps its owner role.
pub fn join(store: &Store, identity: &Identity, join_code: &str) -> AppResult<EntityRecord> {
    let code = join_code.trim();
    if code.is_empty() {
        return Err(AppError::bad_request("missing_join_code", "join_code is required"));
    }
    let Some(mut org) = store
        .find_by_field(ORG_ENTITY, "join_code", code)
        .map_err(anyhow::Error::from)?
    else {
        return Err(AppError::not_found("invalid_join_code", "no organization with that join code"));
    };

    let mut members: Vec<String> = org
        .data
        .get("member_emails")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    if !members.iter().any(|m| m == &identity.email) {
        members.push(identity.email.clone());
        org.data.insert("member_emails".into(), json!(members));
        store.update(ORG_ENTITY, &org.id, org.data.clone()).map_err(anyhow::Error::from)?;
    }

    if let Some(existing) = find_membership(store, &org.id, &identity.email)? {
        return Ok(existing);
    }
    let row = write_membership(store, &org.id, &identity.email, "member")?;
    info!(target: "appbase::orgs", "join: user='{}' org='{}'", identity.username, org.id);
    Ok(row)
}

/// Record the owner-role membership row for a freshly created organization.
/// Called by the dispatcher right after the Organization record is stored.
pub fn record_owner_membership(store: &Store, org: &EntityRecord) -> AppResult<()> {
    let owner = org.data_str("owner_email").unwrap_or_default().to_string();
    if owner.is_empty() {
        return Ok(());
    }
    if find_membership(store, &org.id, &owner)?.is_none() {
        write_membership(store, &org.id, &owner, "owner")?;
    }
    Ok(())
}
