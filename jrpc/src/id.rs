use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// Correlation id of a request/response pair.
///
/// On the wire an id is either a number or a string. Numbers keep their
/// wire form, so `1.5` and `18446744073709551615` are valid ids while
/// `1` and `1.0` are distinct keys, as are `Id::from(1)` and `Id::from("1")`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum Id {
    Num(Number),
    Str(String),
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Num(n) => write!(f, "{n}"),
            Id::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Num(value.into())
    }
}

impl From<Number> for Id {
    fn from(value: Number) -> Self {
        Id::Num(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::Str(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::Str(value)
    }
}

/// Source of ids for outgoing requests.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Id;
}

/// Monotonic integer ids starting from a configurable value.
#[derive(Debug, Default)]
pub struct SequenceIdGenerator {
    next: AtomicI64,
}

impl SequenceIdGenerator {
    #[must_use]
    pub fn new(initial: i64) -> Self {
        Self {
            next: AtomicI64::new(initial),
        }
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> Id {
        Id::from(self.next.fetch_add(1, Ordering::SeqCst))
    }
}
