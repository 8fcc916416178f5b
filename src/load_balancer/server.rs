//! Server identity.
//!
//! # Responsibilities
//! - Represent a single candidate backend (host, port, zone, metadata)
//! - Carry the admission flag set by the server list source
//! - Compare and hash by host+port only
//!
//! Mutable per-server state (counters, circuit breaker, reachability) lives
//! in [`crate::health::ServerHealth`], keyed by this identity.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::config::schema::ServerConfig;

const DEFAULT_PORT: u16 = 80;

/// An immutable candidate server.
#[derive(Debug, Clone, Serialize)]
pub struct Server {
    host: String,
    port: u16,
    zone: Option<String>,
    ready_to_serve: bool,
    metadata: BTreeMap<String, String>,
}

impl Server {
    /// Create a server that is ready to serve and has no zone.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            zone: None,
            ready_to_serve: true,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn with_ready_to_serve(mut self, ready: bool) -> Self {
        self.ready_to_serve = ready;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build a server from its configuration entry.
    pub fn from_config(config: &ServerConfig) -> Result<Self, AddressError> {
        let mut server: Server = config.address.parse()?;
        server.zone = config.zone.clone();
        server.ready_to_serve = config.ready_to_serve;
        server.metadata = config.metadata.clone();
        Ok(server)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    /// Admission signal from the list source.
    pub fn is_ready_to_serve(&self) -> bool {
        self.ready_to_serve
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// `host:port`, the identity used in logs and metric labels.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl PartialEq for Server {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Server {}

impl Hash for Server {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A server address that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid server address '{0}'")]
pub struct AddressError(pub String);

impl FromStr for Server {
    type Err = AddressError;

    /// Parses `host:port` or `[ipv6]:port`; a missing port defaults to 80.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("http://")
            .or_else(|| s.strip_prefix("https://"))
            .unwrap_or(s);
        let s = s.trim_end_matches('/');

        let invalid = || AddressError(s.to_string());
        let parse_port = |port: &str| port.parse::<u16>().map_err(|_| invalid());

        // IPv6 literals must be bracketed: `[::1]:8080` or `[::1]`.
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match after {
                "" => DEFAULT_PORT,
                _ => parse_port(after.strip_prefix(':').ok_or_else(invalid)?)?,
            };
            if host.parse::<Ipv6Addr>().is_err() {
                return Err(invalid());
            }
            (host, port)
        } else {
            let (host, port) = match s.split_once(':') {
                Some((host, port)) => (host, parse_port(port)?),
                None => (s, DEFAULT_PORT),
            };
            if host.is_empty() || host.contains('/') || host.contains('[') {
                return Err(invalid());
            }
            (host, port)
        };

        Ok(Server::new(host, port))
    }
}
