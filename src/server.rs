//!
//! appbase HTTP server
//! -------------------
//! This module defines the Axum-based HTTP API for the entity store.
//!
//! Responsibilities:
//! - Bearer-token authentication resolved per request; the two public routes
//!   (login, signup) are the only ones that bypass it.
//! - CORS handling: OPTIONS preflights short-circuit to 200 and every
//!   response carries the CORS headers.
//! - The generic `/api/entities/{name}` dispatch: point read, filtered list,
//!   single and bulk create, full-replace update and delete, all gated by
//!   the authorization engine.
//! - The organization join endpoint.
//! - Consistent JSON envelopes for every error and success response.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::identity::{
    authorize_create, authorize_record, ensure_bootstrap_admin, filter_readable,
    sanitize_update, Action, Credentials, Identity, SessionStore, Validation, ORG_ENTITY,
};
use crate::orgs;
use crate::storage::{EntityRecord, SharedStore};

/// Shared server state injected into all handlers.
///
/// Holds the global `SharedStore` handle and the credential service (which
/// owns the session store). There is no per-request mutable state here; the
/// authenticated identity is resolved per request and passed explicitly.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub auth: Arc<Credentials>,
}

/// Start the appbase HTTP server with the given configuration.
///
/// Sets up the store, provisions the optional bootstrap admin, and mounts
/// all routes behind the CORS layer.
pub async fn run_with_config(config: Config) -> anyhow::Result<()> {
    let store = SharedStore::new(&config.db_root)?;
    info!(target: "startup", "entity store root: '{}'", config.db_root);

    if let Some((username, password)) = &config.bootstrap_admin {
        let guard = store.0.lock();
        ensure_bootstrap_admin(&guard, username, password)?;
    }

    let state = AppState {
        store,
        auth: Arc::new(Credentials::new(SessionStore::new(config.session_ttl))),
    };
    let app = router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the full route table. Split from `run_with_config` so tests can
/// mount the router without binding a socket.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "appbase ok" }))
        .route("/api/auth/signup", post(signup).fallback(method_not_allowed))
        .route("/api/auth/login", post(login).fallback(method_not_allowed))
        .route("/api/auth/me", get(me).fallback(method_not_allowed))
        .route("/api/auth/logout", post(logout).fallback(method_not_allowed))
        .route("/api/organizations/join", post(join_org).fallback(method_not_allowed))
        .route(
            "/api/entities/{name}",
            get(entities_get)
                .post(entities_post)
                .put(entities_put)
                .delete(entities_delete)
                .fallback(method_not_allowed),
        )
        .fallback(route_not_found)
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

// --- CORS ---

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}

/// Preflights short-circuit before routing; every other response gets the
/// CORS headers stamped on the way out.
async fn cors(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut res = StatusCode::OK.into_response();
        apply_cors(res.headers_mut());
        return res;
    }
    let mut res = next.run(req).await;
    apply_cors(res.headers_mut());
    res
}

// --- Envelopes ---

fn error_response(e: &AppError) -> Response {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"status":"error","code": e.code_str(), "message": e.message()})))
        .into_response()
}

fn respond(result: AppResult<(StatusCode, Value)>) -> Response {
    match result {
        Ok((status, _)) if status == StatusCode::NO_CONTENT => status.into_response(),
        Ok((status, body)) => (status, Json(body)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Shape a stored record for the wire: the opaque body flattened to the top
/// level with the envelope fields layered on top (so a body cannot spoof
/// `id` or the timestamps).
fn record_json(rec: &EntityRecord) -> Value {
    let mut obj = rec.data.clone();
    obj.insert("id".into(), json!(rec.id));
    obj.insert("created_at".into(), json!(rec.created_at.to_rfc3339()));
    obj.insert("updated_at".into(), json!(rec.updated_at.to_rfc3339()));
    Value::Object(obj)
}

async fn method_not_allowed() -> Response {
    error_response(&AppError::method_not_allowed(
        "method_not_allowed",
        "method not allowed for this path",
    ))
}

async fn route_not_found() -> Response {
    error_response(&AppError::not_found("no_such_route", "no such route"))
}

// --- Authentication ---

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("authorization")?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ").or_else(|| raw.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() { None } else { Some(token.to_string()) }
}

/// The single authentication choke point: every non-public handler calls
/// this before touching any entity logic.
fn authenticate(state: &AppState, headers: &HeaderMap) -> AppResult<Identity> {
    let Some(token) = bearer_token(headers) else {
        return Err(AppError::unauthorized("missing_token", "missing or malformed Authorization header"));
    };
    let guard = state.store.0.lock();
    match state.auth.sessions.validate(&guard, &token).map_err(anyhow::Error::from)? {
        Validation::Valid(identity) => Ok(identity),
        Validation::Expired => Err(AppError::unauthorized("session_expired", "session has expired")),
        Validation::Invalid => Err(AppError::unauthorized("invalid_token", "invalid session token")),
    }
}

// --- Auth routes ---

#[derive(Debug, Deserialize)]
struct SignupPayload {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct JoinPayload {
    join_code: String,
}

fn session_envelope(sess: &crate::identity::Session) -> Value {
    json!({
        "status": "ok",
        "token": sess.token,
        "expires_at": sess.expires_at.to_rfc3339(),
        "user": {
            "id": sess.identity.user_id,
            "username": sess.identity.username,
            "email": sess.identity.email,
        }
    })
}

async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupPayload>, JsonRejection>,
) -> Response {
    let out = (|| {
        let payload = json_body(payload)?;
        let guard = state.store.0.lock();
        let sess = state.auth.signup(&guard, &payload.username, &payload.email, &payload.password)?;
        Ok((StatusCode::CREATED, session_envelope(&sess)))
    })();
    respond(out)
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginPayload>, JsonRejection>,
) -> Response {
    let out = (|| {
        let payload = json_body(payload)?;
        let guard = state.store.0.lock();
        let sess = state.auth.login(&guard, &payload.username, &payload.password)?;
        Ok((StatusCode::OK, session_envelope(&sess)))
    })();
    respond(out)
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let out = (|| {
        let who = authenticate(&state, &headers)?;
        Ok((
            StatusCode::OK,
            json!({"id": who.user_id, "username": who.username, "email": who.email}),
        ))
    })();
    respond(out)
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let out = (|| {
        let _who = authenticate(&state, &headers)?;
        // authenticate succeeded, so the token is present and valid
        if let Some(token) = bearer_token(&headers) {
            let guard = state.store.0.lock();
            let _ = state.auth.sessions.revoke(&guard, &token).map_err(anyhow::Error::from)?;
        }
        Ok((StatusCode::OK, json!({"status":"ok","message":"session revoked; drop the credential"})))
    })();
    respond(out)
}

// --- Organization join ---

async fn join_org(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<JoinPayload>, JsonRejection>,
) -> Response {
    let out = (|| {
        let who = authenticate(&state, &headers)?;
        let payload = json_body(payload)?;
        let guard = state.store.0.lock();
        let membership = orgs::join(&guard, &who, &payload.join_code)?;
        Ok((StatusCode::OK, record_json(&membership)))
    })();
    respond(out)
}

// --- Generic entity routes ---

/// Query parameters with routing meaning; everything else is an equality
/// filter on `data` fields.
const META_PARAMS: &[&str] = &["id", "bulk", "sort", "limit"];

fn filters_from(params: &HashMap<String, String>) -> serde_json::Map<String, Value> {
    params
        .iter()
        .filter(|(k, _)| !META_PARAMS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}

/// Reserved entities answer 403 before any lookup so a missing id does not
/// change the status.
fn reject_reserved(name: &str) -> AppResult<()> {
    if crate::identity::is_reserved(name) {
        return Err(AppError::forbidden(
            "reserved_entity".to_string(),
            format!("{} is not accessible through the entity API", name),
        ));
    }
    Ok(())
}

fn body_object(body: Value) -> AppResult<serde_json::Map<String, Value>> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::bad_request("invalid_body", "request body must be a JSON object")),
    }
}

/// Unwrap a `Json` extractor result so body parse failures get the same
/// error envelope as every other error instead of axum's plain-text reply.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    match body {
        Ok(Json(v)) => Ok(v),
        Err(rej) => Err(AppError::bad_request("invalid_body".to_string(), rej.body_text())),
    }
}

async fn entities_get(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let out = (|| {
        let who = authenticate(&state, &headers)?;
        reject_reserved(&name)?;
        let guard = state.store.0.lock();
        if let Some(id) = params.get("id") {
            let rec = guard.get(&name, id)?;
            authorize_record(&guard, &who, &rec, Action::Read)?;
            return Ok((StatusCode::OK, record_json(&rec)));
        }
        let filters = filters_from(&params);
        let sort = params.get("sort").map(String::as_str);
        let limit = params.get("limit").and_then(|s| s.parse::<usize>().ok());
        let records = guard.list(&name, &filters, sort, limit)?;
        let visible = filter_readable(&guard, &who, records);
        let items: Vec<Value> = visible.iter().map(record_json).collect();
        Ok((StatusCode::OK, Value::Array(items)))
    })();
    respond(out)
}

async fn entities_post(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let out = (|| {
        let who = authenticate(&state, &headers)?;
        let body = json_body(body)?;
        let bulk = params.get("bulk").map(String::as_str) == Some("1");
        let guard = state.store.0.lock();

        if bulk {
            // Organizations are created one at a time: each create also
            // writes the owner membership row and checks join_code uniqueness
            if name == ORG_ENTITY {
                return Err(AppError::bad_request(
                    "bulk_not_supported",
                    "organizations cannot be bulk created",
                ));
            }
            let items = body
                .get("items")
                .and_then(|v| v.as_array())
                .cloned()
                .ok_or_else(|| {
                    AppError::bad_request("invalid_body", "bulk create requires an items array")
                })?;
            let mut prepared = Vec::with_capacity(items.len());
            for item in items {
                let doc = authorize_create(&guard, &who, &name, body_object(item)?)?;
                prepared.push(doc);
            }
            let created = guard.bulk_create(&name, prepared)?;
            let out: Vec<Value> = created.iter().map(record_json).collect();
            return Ok((StatusCode::CREATED, Value::Array(out)));
        }

        let doc = authorize_create(&guard, &who, &name, body_object(body)?)?;
        let rec = guard.create(&name, doc)?;
        if name == ORG_ENTITY {
            orgs::record_owner_membership(&guard, &rec)?;
        }
        Ok((StatusCode::CREATED, record_json(&rec)))
    })();
    respond(out)
}

async fn entities_put(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let out = (|| {
        let who = authenticate(&state, &headers)?;
        reject_reserved(&name)?;
        let body = json_body(body)?;
        let id = params
            .get("id")
            .ok_or_else(|| AppError::bad_request("missing_id", "update requires an id query parameter"))?;
        let guard = state.store.0.lock();
        let existing = guard.get(&name, id)?;
        authorize_record(&guard, &who, &existing, Action::Update)?;
        let doc = sanitize_update(&guard, &who, &existing, body_object(body)?)?;
        let updated = guard.update(&name, id, doc)?;
        Ok((StatusCode::OK, record_json(&updated)))
    })();
    respond(out)
}

async fn entities_delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let out = (|| {
        let who = authenticate(&state, &headers)?;
        reject_reserved(&name)?;
        let id = params
            .get("id")
            .ok_or_else(|| AppError::bad_request("missing_id", "delete requires an id query parameter"))?;
        let guard = state.store.0.lock();
        let existing = guard.get(&name, id)?;
        authorize_record(&guard, &who, &existing, Action::Delete)?;
        guard.delete(&name, id)?;
        Ok((StatusCode::NO_CONTENT, Value::Null))
    })();
    respond(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("authorization", HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn bearer_token_parses_standard_header() {
        let h = headers_with("Bearer abc123");
        assert_eq!(bearer_token(&h).as_deref(), Some("abc123"));
    }

    #[test]
    fn bearer_token_rejects_malformed_headers() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
        assert_eq!(bearer_token(&headers_with("Basic abc")), None);
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&headers_with("abc123")), None);
    }

    #[test]
    fn filters_exclude_meta_params() {
        let mut params = HashMap::new();
        params.insert("id".to_string(), "x".to_string());
        params.insert("bulk".to_string(), "1".to_string());
        params.insert("sort".to_string(), "-name".to_string());
        params.insert("limit".to_string(), "5".to_string());
        params.insert("kind".to_string(), "a".to_string());
        let filters = filters_from(&params);
        assert_eq!(filters.len(), 1);
        assert_eq!(filters.get("kind"), Some(&Value::String("a".into())));
    }

    #[test]
    fn record_json_envelope_wins_over_body_fields() {
        let mut data = serde_json::Map::new();
        data.insert("id".into(), json!("spoofed"));
        data.insert("name".into(), json!("Intro"));
        let rec = EntityRecord {
            id: "real-id".into(),
            entity_name: "Section".into(),
            data,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let v = record_json(&rec);
        assert_eq!(v["id"], json!("real-id"));
        assert_eq!(v["name"], json!("Intro"));
        assert!(v.get("created_at").is_some());
    }
}
