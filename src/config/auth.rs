//! Admin authentication configuration.
//!
//! Authentication itself is owned by the surrounding platform. This service
//! only needs an administrative caller identity, which it accepts from one of
//! two sources: a pre-shared API key for automation, or identity headers set by
//! an authenticating reverse proxy.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Admin authentication mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum AdminAuthConfig {
    /// Pre-shared API key, sent as `Authorization: Bearer <key>` or `X-API-Key`.
    ///
    /// Example: `api_key = "${FISCUS_ADMIN_KEY}"`
    ApiKey(ApiKeyAuthConfig),

    /// Reverse proxy authentication.
    ///
    /// **Security:** Headers are only trusted when the request originates from
    /// an address inside `trusted_proxy_cidrs`.
    ProxyAuth(Box<ProxyAuthConfig>),
}

impl AdminAuthConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        match self {
            AdminAuthConfig::ApiKey(c) => c.validate(),
            AdminAuthConfig::ProxyAuth(c) => c.validate(),
        }
    }
}

/// API key authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ApiKeyAuthConfig {
    /// The shared key. Callers presenting it act with the admin role.
    pub api_key: String,

    /// Identity recorded as the executor in retention audit logs.
    #[serde(default = "default_api_key_identity")]
    pub identity: String,
}

impl ApiKeyAuthConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.len() < 16 {
            return Err(ConfigError::Validation(
                "auth.api_key must be at least 16 characters".into(),
            ));
        }
        Ok(())
    }
}

fn default_api_key_identity() -> String {
    "bootstrap".to_string()
}

/// Reverse proxy authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ProxyAuthConfig {
    /// Header containing the authenticated caller's identity.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// Header containing the caller's roles (comma-separated).
    #[serde(default = "default_roles_header")]
    pub roles_header: String,

    /// Role a caller must hold to use the retention endpoints.
    #[serde(default = "default_required_role")]
    pub required_role: String,

    /// Networks whose connections may set identity headers.
    #[serde(default)]
    #[cfg_attr(feature = "json-schema", schemars(with = "Vec<String>"))]
    pub trusted_proxy_cidrs: Vec<IpNet>,
}

impl ProxyAuthConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.identity_header.is_empty() {
            return Err(ConfigError::Validation(
                "Proxy auth identity header cannot be empty".into(),
            ));
        }
        if self.required_role.is_empty() {
            return Err(ConfigError::Validation(
                "Proxy auth required_role cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// Whether a connection from `ip` may assert identity headers.
    ///
    /// With no CIDRs configured every source is trusted; config validation
    /// only allows that when the server binds to loopback.
    pub fn is_trusted(&self, ip: Option<std::net::IpAddr>) -> bool {
        if self.trusted_proxy_cidrs.is_empty() {
            return true;
        }
        match ip {
            Some(ip) => self.trusted_proxy_cidrs.iter().any(|net| net.contains(&ip)),
            None => false,
        }
    }
}

fn default_identity_header() -> String {
    "x-forwarded-user".to_string()
}

fn default_roles_header() -> String {
    "x-forwarded-roles".to_string()
}

fn default_required_role() -> String {
    "admin".to_string()
}
