use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One payload element of a game-control message. The wire carries a 4-byte
/// little-endian type tag per chunk: 0 for integers, 1 for strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Chunk {
    Int(i32),
    Str(String),
}

impl Chunk {
    /// Bridge to the JSON surface of the control channel: integers stay
    /// numbers, strings stay strings.
    pub fn to_json(&self) -> Value {
        match self {
            Chunk::Int(i) => Value::from(*i),
            Chunk::Str(s) => Value::from(s.clone()),
        }
    }

    /// Bridge from the JSON surface. Numbers become integer chunks; anything
    /// else is carried as its string form, matching the loose typing of the
    /// original control clients.
    pub fn from_json(value: &Value) -> Chunk {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Chunk::Int(i as i32),
                None => Chunk::Str(n.to_string()),
            },
            Value::String(s) => Chunk::Str(s.clone()),
            Value::Bool(b) => Chunk::Int(i32::from(*b)),
            other => Chunk::Str(other.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Chunk::Str(s) => Some(s),
            Chunk::Int(_) => None,
        }
    }
}

impl From<i32> for Chunk {
    fn from(i: i32) -> Self {
        Chunk::Int(i)
    }
}

impl From<&str> for Chunk {
    fn from(s: &str) -> Self {
        Chunk::Str(s.to_owned())
    }
}

impl From<String> for Chunk {
    fn from(s: String) -> Self {
        Chunk::Str(s)
    }
}

/// A complete game-control message: a header naming the operation and a list
/// of typed payload chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpgNetMessage {
    pub header: String,
    pub chunks: Vec<Chunk>,
}

impl GpgNetMessage {
    pub fn new(header: impl Into<String>, chunks: Vec<Chunk>) -> Self {
        Self {
            header: header.into(),
            chunks,
        }
    }

    /// Chunks as a JSON array, for the `onGpgNetMessageReceived` notification.
    pub fn chunks_to_json(&self) -> Value {
        Value::Array(self.chunks.iter().map(Chunk::to_json).collect())
    }
}

impl fmt::Display for GpgNetMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.header)?;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match chunk {
                Chunk::Int(v) => write!(f, "{v}")?,
                Chunk::Str(s) => write!(f, "{s:?}")?,
            }
        }
        write!(f, ")")
    }
}
