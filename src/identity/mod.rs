//! Central identity, session and authorization for the entity API.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod credentials;
mod authorizer;

pub use principal::Identity;
pub use session::{Session, SessionStore, SessionToken, Validation, SESSION_ENTITY};
pub use credentials::{ensure_bootstrap_admin, hash_password, verify_password, Credentials, USER_ENTITY};
pub use authorizer::{
    authorize_create, authorize_record, filter_readable, is_org_member, is_org_owner,
    is_reserved, sanitize_update, Action, ORG_ENTITY, ORG_MEMBER_ENTITY, RESERVED_ENTITIES,
};
