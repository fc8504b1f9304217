//! Authorization engine: per-entity-type policy deciding whether an
//! authenticated identity may act on a record.
//!
//! Policy summary:
//! - `Session` and `User` are reserved and never reachable via the generic
//!   entity route.
//! - `Organization` is readable by members, writable by its owner.
//! - `OrganizationMember` rows are read-only here; only the join workflow
//!   writes them.
//! - Every other entity name gets the default personal-or-shared policy:
//!   records without an `organization_id` are private to their creator,
//!   records with one are shared with the organization's members.
//!
//! Records an identity is not allowed to see are reported as NotFound, not
//! Forbidden, so their existence does not leak. Forbidden is reserved for
//! records the caller can see but may not touch.

use base64::Engine;
use serde_json::{json, Value};

use super::principal::Identity;
use crate::error::{AppError, AppResult};
use crate::storage::{EntityRecord, Store};

pub const ORG_ENTITY: &str = "Organization";
pub const ORG_MEMBER_ENTITY: &str = "OrganizationMember";

/// Entity names owned by the auth subsystem; only dedicated auth endpoints
/// may touch them.
pub const RESERVED_ENTITIES: &[&str] = &["Session", "User"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    List,
    Create,
    Update,
    Delete,
}

fn hidden(entity_name: &str) -> AppError {
    AppError::not_found("entity_not_found".to_string(), format!("no such {} record", entity_name))
}

fn reserved(entity_name: &str) -> AppError {
    AppError::forbidden(
        "reserved_entity".to_string(),
        format!("{} is not accessible through the entity API", entity_name),
    )
}

pub fn is_reserved(entity_name: &str) -> bool {
    RESERVED_ENTITIES.contains(&entity_name)
}

fn member_emails(org: &EntityRecord) -> Vec<String> {
    org.data
        .get("member_emails")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Membership test against the Organization record itself. The owner counts
/// as a member even if the member list is stale.
pub fn is_org_member(store: &Store, org_id: &str, email: &str) -> AppResult<bool> {
    let org = match store.get(ORG_ENTITY, org_id) {
        Ok(rec) => rec,
        Err(crate::storage::StoreError::NotFound { .. }) => return Ok(false),
        Err(e) => return Err(anyhow::Error::from(e).into()),
    };
    if org.data_str("owner_email") == Some(email) {
        return Ok(true);
    }
    Ok(member_emails(&org).iter().any(|m| m == email))
}

pub fn is_org_owner(store: &Store, org_id: &str, email: &str) -> AppResult<bool> {
    match store.get(ORG_ENTITY, org_id) {
        Ok(rec) => Ok(rec.data_str("owner_email") == Some(email)),
        Err(crate::storage::StoreError::NotFound { .. }) => Ok(false),
        Err(e) => Err(anyhow::Error::from(e).into()),
    }
}

fn org_exists(store: &Store, org_id: &str) -> AppResult<bool> {
    match store.get(ORG_ENTITY, org_id) {
        Ok(_) => Ok(true),
        Err(crate::storage::StoreError::NotFound { .. }) => Ok(false),
        Err(e) => Err(anyhow::Error::from(e).into()),
    }
}

fn gen_join_code() -> AppResult<String> {
    let mut buf = [0u8; 6];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow::anyhow!("rng unavailable: {}", e))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Gate and prepare a create. Returns the document to store, with ownership
/// fields stamped by the engine rather than trusted from the caller.
pub fn authorize_create(
    store: &Store,
    identity: &Identity,
    entity_name: &str,
    mut body: serde_json::Map<String, Value>,
) -> AppResult<serde_json::Map<String, Value>> {
    if is_reserved(entity_name) {
        return Err(reserved(entity_name));
    }
    if entity_name == ORG_MEMBER_ENTITY {
        return Err(AppError::forbidden(
            "join_workflow_only",
            "memberships are created through the organization join endpoint",
        ));
    }
    if entity_name == ORG_ENTITY {
        // The creator becomes the owner regardless of what the body claims
        body.insert("owner_email".into(), json!(identity.email));
        let mut members: Vec<String> = body
            .get("member_emails")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        if !members.iter().any(|m| m == &identity.email) {
            members.push(identity.email.clone());
        }
        body.insert("member_emails".into(), json!(members));
        let join_code = match body.get("join_code").and_then(|v| v.as_str()) {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => gen_join_code()?,
        };
        if store
            .find_by_field(ORG_ENTITY, "join_code", &join_code)
            .map_err(anyhow::Error::from)?
            .is_some()
        {
            return Err(AppError::conflict("join_code_taken", "join code already in use"));
        }
        body.insert("join_code".into(), json!(join_code));
        body.insert("created_by".into(), json!(identity.email));
        return Ok(body);
    }

    // Default personal-or-shared policy
    body.insert("created_by".into(), json!(identity.email));
    if let Some(org_id) = body.get("organization_id").and_then(|v| v.as_str()) {
        let org_id = org_id.to_string();
        if !is_org_member(store, &org_id, &identity.email)? {
            return Err(AppError::forbidden(
                "not_a_member",
                "cannot create records in an organization you do not belong to",
            ));
        }
    }
    Ok(body)
}

/// Decide Read/Update/Delete on an existing record.
pub fn authorize_record(
    store: &Store,
    identity: &Identity,
    record: &EntityRecord,
    action: Action,
) -> AppResult<()> {
    let name = record.entity_name.as_str();
    if is_reserved(name) {
        return Err(reserved(name));
    }

    if name == ORG_ENTITY {
        let is_owner = record.data_str("owner_email") == Some(identity.email.as_str());
        let is_member =
            is_owner || member_emails(record).iter().any(|m| m == &identity.email);
        return match action {
            Action::Read | Action::List if is_member => Ok(()),
            Action::Update | Action::Delete if is_owner => Ok(()),
            Action::Update | Action::Delete if is_member => Err(AppError::forbidden(
                "owner_only",
                "only the organization owner may modify it",
            )),
            _ => Err(hidden(name)),
        };
    }

    if name == ORG_MEMBER_ENTITY {
        let org_id = record.data_str("organization_id").unwrap_or_default().to_string();
        let is_member = is_org_member(store, &org_id, &identity.email)?;
        return match action {
            Action::Read | Action::List if is_member => Ok(()),
            Action::Read | Action::List => Err(hidden(name)),
            // Membership rows are written only by the join workflow; the
            // owner row in particular can never be removed here.
            _ => Err(AppError::forbidden(
                "join_workflow_only",
                "memberships are managed through the organization join endpoint",
            )),
        };
    }

    // Default personal-or-shared policy
    let creator = record.data_str("created_by");
    let is_creator = creator == Some(identity.email.as_str());
    match record.data_str("organization_id") {
        None => {
            // Personal record: invisible to everyone but the creator
            if is_creator { Ok(()) } else { Err(hidden(name)) }
        }
        Some(org_id) => {
            let org_id = org_id.to_string();
            if !is_org_member(store, &org_id, &identity.email)? {
                // A dangling organization_id must not orphan the record:
                // when the organization is gone, the creator keeps access.
                if is_creator && !org_exists(store, &org_id)? {
                    return Ok(());
                }
                return Err(hidden(name));
            }
            match action {
                Action::Read | Action::List | Action::Update => Ok(()),
                Action::Delete => {
                    if is_creator || is_org_owner(store, &org_id, &identity.email)? {
                        Ok(())
                    } else {
                        Err(AppError::forbidden(
                            "delete_restricted",
                            "only the record creator or the organization owner may delete it",
                        ))
                    }
                }
                Action::Create => Ok(()),
            }
        }
    }
}

/// Prepare the replacement document for an update the caller is already
/// authorized to perform.
///
/// Updates replace `data` wholesale, but ownership fields are engine-owned:
/// `created_by` (and for organizations, `owner_email`) always carries over
/// from the stored record no matter what the new body claims. Re-pointing
/// `organization_id` at a different organization requires membership there,
/// and an organization's `join_code` must stay unique if changed.
pub fn sanitize_update(
    store: &Store,
    identity: &Identity,
    existing: &EntityRecord,
    mut body: serde_json::Map<String, Value>,
) -> AppResult<serde_json::Map<String, Value>> {
    if existing.entity_name == ORG_ENTITY {
        let owner = existing.data_str("owner_email").unwrap_or_default().to_string();
        body.insert("owner_email".into(), json!(owner));
        let mut members: Vec<String> = body
            .get("member_emails")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        if !owner.is_empty() && !members.iter().any(|m| m == &owner) {
            members.push(owner);
        }
        body.insert("member_emails".into(), json!(members));
        let old_code = existing.data_str("join_code").unwrap_or_default();
        match body.get("join_code").and_then(|v| v.as_str()) {
            Some(code) if code != old_code && !code.is_empty() => {
                if store
                    .find_by_field(ORG_ENTITY, "join_code", code)
                    .map_err(anyhow::Error::from)?
                    .is_some()
                {
                    return Err(AppError::conflict("join_code_taken", "join code already in use"));
                }
            }
            _ => {
                body.insert("join_code".into(), json!(old_code));
            }
        }
        return Ok(body);
    }

    if let Some(creator) = existing.data_str("created_by") {
        body.insert("created_by".into(), json!(creator));
    }
    let old_org = existing.data_str("organization_id");
    if let Some(new_org) = body.get("organization_id").and_then(|v| v.as_str()) {
        if Some(new_org) != old_org {
            let new_org = new_org.to_string();
            if !is_org_member(store, &new_org, &identity.email)? {
                return Err(AppError::forbidden(
                    "not_a_member",
                    "cannot move a record into an organization you do not belong to",
                ));
            }
        }
    }
    Ok(body)
}

/// Narrow a listing down to the records the identity may read. Denials do not
/// fail the call; they just drop the record from the result.
pub fn filter_readable(
    store: &Store,
    identity: &Identity,
    records: Vec<EntityRecord>,
) -> Vec<EntityRecord> {
    records
        .into_iter()
        .filter(|rec| authorize_record(store, identity, rec, Action::List).is_ok())
        .collect()
}
