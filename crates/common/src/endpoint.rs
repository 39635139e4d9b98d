//! Addressable service endpoints.
//!
//! Canonical form: `scheme://host:port?is_secure=true|false`.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use url::Url;

const SECURE_FLAG: &str = "is_secure";

/// Immutable (scheme, address, secure) triple parsed from a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: String,
    address: String,
    secure: bool,
}

impl Endpoint {
    pub fn new(scheme: impl Into<String>, address: impl Into<String>, secure: bool) -> Self {
        Self {
            scheme: scheme.into(),
            address: address.into(),
            secure,
        }
    }

    /// Parse an endpoint from its URL form.
    pub fn parse(s: &str) -> Result<Self> {
        let url = Url::parse(s)?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidEndpoint(format!("no host in {}", s)))?;

        let address = match url.port_or_known_default() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let mut secure = false;
        for (key, value) in url.query_pairs() {
            if key == SECURE_FLAG {
                secure = value
                    .parse::<bool>()
                    .map_err(|_| Error::InvalidEndpoint(format!("bad {} flag: {}", SECURE_FLAG, value)))?;
            }
        }

        Ok(Self::new(url.scheme(), address, secure))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// `host:port` of the instance.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    /// Dial target understood by the transport clients.
    pub fn target(&self) -> String {
        format!("direct://{}", self.address)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}?{}={}",
            self.scheme, self.address, SECURE_FLAG, self.secure
        )
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
