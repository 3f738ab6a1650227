//! Message identifiers.
//!
//! Ids are ULIDs: sortable by creation time and generated without
//! coordination, so producers on different threads never need a shared
//! counter. The `msg-` prefix only appears in `Display`; the serialized form
//! is the bare ULID string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier of one envelope (assigned on creation, immutable).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Ulid);

impl MessageId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for MessageId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ulid::DecodeError;

    /// Accepts both the bare ULID and the `msg-` display form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("msg-").unwrap_or(s);
        Ulid::from_string(raw).map(Self)
    }
}
