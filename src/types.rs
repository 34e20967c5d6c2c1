//! Core types used throughout udp-impair.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AddressError, Result, TransportError};

/// Direction of a relayed datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// From the remembered client towards the upstream peer.
    ClientToServer,
    /// From the upstream peer back to the remembered client.
    ServerToClient,
}

impl Direction {
    /// Both directions, in reporting order.
    pub const ALL: [Direction; 2] = [Direction::ClientToServer, Direction::ServerToClient];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ClientToServer => "client_to_server",
            Direction::ServerToClient => "server_to_client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per [`Direction`].
///
/// Replaces direction-keyed maps: lookups can't miss and there are always
/// exactly two slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerDirection<T> {
    pub client_to_server: T,
    pub server_to_client: T,
}

impl<T> PerDirection<T> {
    /// Iterate over `(direction, value)` pairs in [`Direction::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Direction, &T)> {
        Direction::ALL.into_iter().map(move |d| (d, &self[d]))
    }
}

impl<T> Index<Direction> for PerDirection<T> {
    type Output = T;

    fn index(&self, direction: Direction) -> &T {
        match direction {
            Direction::ClientToServer => &self.client_to_server,
            Direction::ServerToClient => &self.server_to_client,
        }
    }
}

impl<T> IndexMut<Direction> for PerDirection<T> {
    fn index_mut(&mut self, direction: Direction) -> &mut T {
        match direction {
            Direction::ClientToServer => &mut self.client_to_server,
            Direction::ServerToClient => &mut self.server_to_client,
        }
    }
}

/// A `host:port` pair as given on the command line or in the config file.
///
/// IPv6 literals are written in brackets (`[::1]:9000`). The host is kept
/// verbatim and only resolved by [`Endpoint::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to a socket address. Literal IPs never touch the resolver;
    /// hostnames take the first address returned.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| TransportError::ResolveFailed {
                host: self.host.clone(),
                reason: e.to_string(),
            })?;

        addrs.next().ok_or_else(|| {
            TransportError::ResolveFailed {
                host: self.host.clone(),
                reason: "no addresses returned".into(),
            }
            .into()
        })
    }
}

impl FromStr for Endpoint {
    type Err = AddressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (host, port) = if let Some(bracketed) = s.strip_prefix('[') {
            let end = bracketed
                .find(']')
                .ok_or_else(|| AddressError::UnterminatedBracket(s.to_string()))?;
            let port = bracketed[end + 1..]
                .strip_prefix(':')
                .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;
            (&bracketed[..end], port)
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| AddressError::MissingPort(s.to_string()))?
        };

        if host.is_empty() {
            return Err(AddressError::EmptyHost(s.to_string()));
        }

        let port = port.parse::<u16>().map_err(|_| AddressError::InvalidPort {
            input: s.to_string(),
            port: port.to_string(),
        })?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = AddressError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
