use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric player identity as assigned by the lobby server. Carried on the
/// game wire as a 4-byte little-endian signed integer.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct PlayerId(pub i32);

impl From<i32> for PlayerId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
