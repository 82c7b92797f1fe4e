//! External services an identity can be proven against.

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Error;

/// The enumerated set of supported external services.
///
/// Numeric tags are part of the boundary contract and never reused.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceKind {
    Github,
}

impl ServiceKind {
    /// Maps a boundary service tag to a kind.
    ///
    /// # Errors
    /// [`Error::UnknownService`] for any tag outside the supported set.
    pub fn from_tag(tag: i32) -> Result<Self, Error> {
        match tag {
            1 => Ok(Self::Github),
            other => Err(Error::UnknownService(format!("tag {other}"))),
        }
    }

    #[must_use]
    pub const fn tag(self) -> i32 {
        match self {
            Self::Github => 1,
        }
    }
}

/// An external-service identity: a service kind plus the id on that service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    pub kind: ServiceKind,
    pub username: String,
}

impl Service {
    /// Builds a service binding from a boundary tag and external id.
    ///
    /// # Errors
    /// [`Error::UnknownService`] on an unsupported tag or empty id.
    pub fn from_tag(tag: i32, username: &str) -> Result<Self, Error> {
        let kind = ServiceKind::from_tag(tag)?;
        if username.is_empty() {
            return Err(Error::UnknownService("empty external id".into()));
        }
        Ok(Self {
            kind,
            username: username.to_owned(),
        })
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.kind)
    }
}

impl FromStr for Service {
    type Err = Error;

    /// Parses the `username@service` form used on CLIs and in records.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (username, service) = s
            .split_once('@')
            .ok_or_else(|| Error::UnknownService(format!("expected username@service: {s:?}")))?;
        if username.is_empty() || service.is_empty() || service.contains('@') {
            return Err(Error::UnknownService(format!(
                "expected username@service: {s:?}"
            )));
        }
        let kind = service
            .parse::<ServiceKind>()
            .map_err(|_| Error::UnknownService(service.to_owned()))?;
        Ok(Self {
            kind,
            username: username.to_owned(),
        })
    }
}
