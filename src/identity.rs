//! Visitor identity derivation.

use crate::types::VisitorId;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

const USER_PREFIX: &str = "user:";
const ANON_PREFIX: &str = "anon:";
const UNKNOWN_ADDR: &str = "unknown";

/// Request metadata needed to tell visitors apart.
#[derive(Debug, Clone, Default)]
pub struct VisitorDescriptor {
    /// Authenticated user identifier, if the caller is logged in
    pub user_id: Option<String>,
    /// Raw `X-Forwarded-For` header value
    pub forwarded_for: Option<String>,
    /// Direct socket address of the peer
    pub remote_addr: Option<SocketAddr>,
    /// Raw `User-Agent` header value
    pub user_agent: Option<String>,
}

impl VisitorDescriptor {
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn anonymous(remote_addr: Option<SocketAddr>, user_agent: Option<&str>) -> Self {
        Self {
            remote_addr,
            user_agent: user_agent.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn with_forwarded_for(mut self, header: impl Into<String>) -> Self {
        self.forwarded_for = Some(header.into());
        self
    }

    /// First hop of `X-Forwarded-For`, else the socket IP, else `"unknown"`.
    pub fn client_address(&self) -> String {
        self.forwarded_for
            .as_deref()
            .and_then(|header| header.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .map(str::to_string)
            .or_else(|| self.remote_addr.map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| UNKNOWN_ADDR.to_string())
    }
}

/// Derive the visitor id for a request. Same inputs always give the same id.
pub fn resolve(descriptor: &VisitorDescriptor) -> VisitorId {
    let raw = match descriptor
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        Some(user_id) => format!("{}{}", USER_PREFIX, user_id),
        None => {
            let fingerprint = format!(
                "{}|{}",
                descriptor.client_address(),
                descriptor.user_agent.as_deref().unwrap_or("")
            );
            format!("{}{:x}", ANON_PREFIX, Sha256::digest(fingerprint.as_bytes()))
        }
    };

    VisitorId::prefixed(raw)
}
