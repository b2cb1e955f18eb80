use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// The host and port part of an actor address, shared by every actor
/// spawned in the same process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Authority {
    pub host: String,
    pub port: u16,
}

impl Authority {
    /// The authority of an actor system that is not bound to the network.
    /// Messages between such addresses are delivered within the process.
    pub fn local() -> Self {
        Self {
            host: "local".to_string(),
            port: 0,
        }
    }

    pub fn is_local(&self) -> bool {
        self.host == "local" && self.port == 0
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A network address of an actor, written as `host:port/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub authority: Authority,
    pub name: String,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16, name: impl Into<String>) -> Self {
        Self {
            authority: Authority {
                host: host.into(),
                port,
            },
            name: name.into(),
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self {
            authority: Authority::local(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.authority, self.name)
    }
}

impl FromStr for Address {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (authority, name) = s
            .split_once('/')
            .ok_or_else(|| ServerError::InvalidAddress(s.to_string()))?;
        let (host, port) = authority
            .split_once(':')
            .ok_or_else(|| ServerError::InvalidAddress(s.to_string()))?;
        if host.is_empty() || name.is_empty() {
            return Err(ServerError::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ServerError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(host, port, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let address = Address::new("10.0.0.7", 5050, "master");
        let text = address.to_string();
        assert_eq!(text, "10.0.0.7:5050/master");
        assert_eq!(text.parse::<Address>().unwrap(), address);
    }

    #[test]
    fn test_address_rejects_malformed_input() {
        for text in ["", "master", "host/master", "host:bad/master", ":0/x"] {
            assert!(text.parse::<Address>().is_err(), "accepted {text:?}");
        }
    }
}
