use serde::{Deserialize, Serialize};

/// Authenticated identity resolved from a bearer token, passed explicitly
/// into every downstream call. Never stored in process-wide state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub role: String,
}
