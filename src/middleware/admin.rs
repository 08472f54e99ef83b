//! Admin authentication middleware.
//!
//! Retention routes require an administrative caller. The caller is
//! identified by one of:
//! - a pre-shared API key (`Authorization: Bearer <key>` or `X-API-Key`)
//! - identity headers set by an authenticating reverse proxy
//!
//! **Security:** Proxy headers are only trusted when the connection comes
//! from an address inside `auth.trusted_proxy_cidrs`. Otherwise any client
//! could connect directly and claim an identity.

use std::net::{IpAddr, SocketAddr};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::{
    AppState,
    config::{AdminAuthConfig, ApiKeyAuthConfig, ProxyAuthConfig},
    observability::metrics,
};

/// Role granted to API-key and unauthenticated local callers.
pub const ADMIN_ROLE: &str = "admin";

/// Authenticated administrative caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    /// Recorded as the executor of retention actions.
    pub id: String,
    pub roles: Vec<String>,
}

impl AdminIdentity {
    /// Identity used when no admin authentication is configured.
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            roles: vec![ADMIN_ROLE.to_string()],
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication credentials required")]
    MissingCredentials,
    #[error("Invalid authentication credentials")]
    InvalidCredentials,
    #[error("Caller lacks the '{0}' role")]
    Forbidden(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AuthError::MissingCredentials => (StatusCode::UNAUTHORIZED, "missing_credentials"),
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AuthError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
        };
        metrics::record_error("security_error", code);

        let body = json!({
            "error": {
                "type": "security_error",
                "code": code,
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Middleware that requires an admin caller and stores its [`AdminIdentity`]
/// in the request extensions.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let connecting_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());

    let identity = authenticate(req.headers(), connecting_ip, state.config.auth.as_ref())?;

    tracing::debug!(
        identity = %identity.id,
        roles = ?identity.roles,
        "Admin request authenticated"
    );

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Resolve the caller for a request.
pub fn authenticate(
    headers: &HeaderMap,
    connecting_ip: Option<IpAddr>,
    auth: Option<&AdminAuthConfig>,
) -> Result<AdminIdentity, AuthError> {
    match auth {
        None => Ok(AdminIdentity::anonymous()),
        Some(AdminAuthConfig::ApiKey(config)) => try_api_key_auth(headers, config),
        Some(AdminAuthConfig::ProxyAuth(config)) => {
            try_proxy_auth(headers, connecting_ip, config)
        }
    }
}

fn try_api_key_auth(
    headers: &HeaderMap,
    config: &ApiKeyAuthConfig,
) -> Result<AdminIdentity, AuthError> {
    let provided = extract_api_key(headers).ok_or(AuthError::MissingCredentials)?;

    let keys_match: bool = provided.as_bytes().ct_eq(config.api_key.as_bytes()).into();
    if !keys_match {
        tracing::warn!("Rejected admin request with invalid API key");
        return Err(AuthError::InvalidCredentials);
    }

    Ok(AdminIdentity {
        id: config.identity.clone(),
        roles: vec![ADMIN_ROLE.to_string()],
    })
}

fn try_proxy_auth(
    headers: &HeaderMap,
    connecting_ip: Option<IpAddr>,
    config: &ProxyAuthConfig,
) -> Result<AdminIdentity, AuthError> {
    if !config.is_trusted(connecting_ip) {
        if headers.contains_key(config.identity_header.as_str()) {
            tracing::warn!(
                connecting_ip = ?connecting_ip,
                identity_header = %config.identity_header,
                "Ignoring identity header from untrusted address"
            );
        }
        return Err(AuthError::MissingCredentials);
    }

    let id = headers
        .get(config.identity_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingCredentials)?
        .to_string();

    let roles: Vec<String> = headers
        .get(config.roles_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if !roles.iter().any(|r| r == &config.required_role) {
        tracing::warn!(identity = %id, required_role = %config.required_role, "Admin role missing");
        return Err(AuthError::Forbidden(config.required_role.clone()));
    }

    Ok(AdminIdentity { id, roles })
}

/// Checks `Authorization: Bearer <key>` first, then `X-API-Key`.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(axum::http::header::AUTHORIZATION)
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(key) = auth_str.strip_prefix("Bearer ")
    {
        let key = key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    if let Some(api_key_header) = headers.get("X-API-Key")
        && let Ok(key) = api_key_header.to_str()
    {
        let key = key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    None
}
