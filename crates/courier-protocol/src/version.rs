//! Protocol version spoken by the bundled transports.
//!
//! The server announces its version in `Connected`. A client may ask for a
//! version when it attaches; any version sharing the server's major is
//! accepted.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current protocol version.
pub const PROTOCOL_VERSION: Version = Version::new(1, 0);

/// A `major.minor` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Incremented on breaking changes.
    pub major: u8,
    /// Incremented on backwards-compatible changes.
    pub minor: u8,
}

/// A client-requested version the server refuses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// Not of the form `major` or `major.minor`.
    #[error("Malformed protocol version {0:?}")]
    Malformed(String),

    /// Different major version.
    #[error("Protocol version {requested} unsupported, server speaks {supported}")]
    Unsupported {
        /// What the client asked for.
        requested: Version,
        /// What this server speaks.
        supported: Version,
    },
}

impl Version {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Accept a client's requested version, or explain why not.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Unsupported`] when the majors differ.
    pub fn accept(&self, requested: Version) -> Result<Version, VersionError> {
        if requested.major != self.major {
            return Err(VersionError::Unsupported {
                requested,
                supported: *self,
            });
        }
        Ok(requested)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    /// Parse `"1"` or `"1.2"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || VersionError::Malformed(s.to_string());
        let (major, minor) = match s.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (s, "0"),
        };
        let major = major.parse().map_err(|_| malformed())?;
        let minor = minor.parse().map_err(|_| malformed())?;
        Ok(Self::new(major, minor))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}
