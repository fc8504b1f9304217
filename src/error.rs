//! Unified application error model and mapping helpers.
//! This module provides the common error enum used by the HTTP dispatcher,
//! the authorization engine and the service layer, with a mapper to HTTP status codes.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    BadRequest { code: String, message: String },
    Unauthorized { code: String, message: String },
    Forbidden { code: String, message: String },
    NotFound { code: String, message: String },
    MethodNotAllowed { code: String, message: String },
    Conflict { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::BadRequest { code, .. }
            | AppError::Unauthorized { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::MethodNotAllowed { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::BadRequest { message, .. }
            | AppError::Unauthorized { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::MethodNotAllowed { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn bad_request<S: Into<String>>(code: S, msg: S) -> Self { AppError::BadRequest { code: code.into(), message: msg.into() } }
    pub fn unauthorized<S: Into<String>>(code: S, msg: S) -> Self { AppError::Unauthorized { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn method_not_allowed<S: Into<String>>(code: S, msg: S) -> Self { AppError::MethodNotAllowed { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::BadRequest { .. } => 400,
            AppError::Unauthorized { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::NotFound { .. } => 404,
            AppError::MethodNotAllowed { .. } => 405,
            AppError::Conflict { .. } => 409,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    // Unexpected store/service failures surface as Internal; no internals leak to the caller
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("internal error: {err}");
        AppError::Internal { code: "internal".into(), message: "internal server error".into() }
    }
}

impl From<crate::storage::StoreError> for AppError {
    fn from(err: crate::storage::StoreError) -> Self {
        match err {
            crate::storage::StoreError::NotFound { entity_name, id } => AppError::not_found(
                "entity_not_found".to_string(),
                format!("no {} record with id {}", entity_name, id),
            ),
            crate::storage::StoreError::InvalidEntityName(name) => AppError::bad_request(
                "invalid_entity_name".to_string(),
                format!("invalid entity name: {}", name),
            ),
            other => {
                tracing::error!("store error: {other}");
                AppError::internal("store_error", "internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::bad_request("bad_input", "oops").http_status(), 400);
        assert_eq!(AppError::unauthorized("no_session", "login first").http_status(), 401);
        assert_eq!(AppError::forbidden("denied", "not yours").http_status(), 403);
        assert_eq!(AppError::not_found("not_found", "missing").http_status(), 404);
        assert_eq!(AppError::method_not_allowed("bad_verb", "nope").http_status(), 405);
        assert_eq!(AppError::conflict("duplicate", "dup").http_status(), 409);
        assert_eq!(AppError::internal("internal", "boom").http_status(), 500);
    }

    #[test]
    fn display_includes_code_and_message() {
        let e = AppError::conflict("username_taken", "username already exists");
        assert_eq!(e.to_string(), "username_taken: username already exists");
    }

    #[test]
    fn store_io_error_maps_to_500() {
        let e: AppError = crate::storage::StoreError::Io(std::io::Error::other("disk gone")).into();
        assert_eq!(e.http_status(), 500);
        assert_eq!(e.code_str(), "store_error");
        assert_eq!(e.message(), "internal server error");
    }

    #[test]
    fn store_not_found_maps_to_404() {
        let e: AppError = crate::storage::StoreError::NotFound {
            entity_name: "Section".into(),
            id: "abc".into(),
        }
        .into();
        assert_eq!(e.http_status(), 404);
        assert_eq!(e.code_str(), "entity_not_found");
    }
}
