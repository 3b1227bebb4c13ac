use std::any::Any;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error kinds with their JSON-RPC numeric codes.
///
/// The first five kinds are the protocol-defined catalog. The local kinds
/// use codes from the implementation-defined server range and never need
/// to cross the wire, though nothing prevents it. Codes received from a
/// peer that are not in the table are kept verbatim in `Other`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(from = "i64", into = "i64")]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    DuplicateHandler,
    InvalidMapping,
    SendFailed,
    Other(i64),
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            ErrorKind::ParseError => -32700,
            ErrorKind::InvalidRequest => -32600,
            ErrorKind::MethodNotFound => -32601,
            ErrorKind::InvalidParams => -32602,
            ErrorKind::InternalError => -32603,
            ErrorKind::DuplicateHandler => -32001,
            ErrorKind::InvalidMapping => -32002,
            ErrorKind::SendFailed => -32003,
            ErrorKind::Other(code) => code,
        }
    }

    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            -32700 => ErrorKind::ParseError,
            -32600 => ErrorKind::InvalidRequest,
            -32601 => ErrorKind::MethodNotFound,
            -32602 => ErrorKind::InvalidParams,
            -32603 => ErrorKind::InternalError,
            -32001 => ErrorKind::DuplicateHandler,
            -32002 => ErrorKind::InvalidMapping,
            -32003 => ErrorKind::SendFailed,
            code => ErrorKind::Other(code),
        }
    }
}

impl From<i64> for ErrorKind {
    fn from(code: i64) -> Self {
        Self::from_code(code)
    }
}

impl From<ErrorKind> for i64 {
    fn from(kind: ErrorKind) -> Self {
        kind.code()
    }
}

/// The protocol error.
///
/// Serialized as the JSON-RPC error object `{code, message, data?}`, so the
/// same value is posted in error responses and raised to stub callers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Error {
    #[serde(rename = "code")]
    pub kind: ErrorKind,
    #[serde(rename = "message")]
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

const TIMEOUT: &str = "Timeout";
const INTERRUPTED: &str = "Interrupted";

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn kind(kind: ErrorKind) -> Self {
        Self::new(kind, String::default())
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = (!data.is_null()).then_some(data);
        self
    }

    #[must_use]
    pub fn code(&self) -> i64 {
        self.kind.code()
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self::new(ErrorKind::InternalError, TIMEOUT)
    }

    #[must_use]
    pub fn interrupted() -> Self {
        Self::new(ErrorKind::InternalError, INTERRUPTED)
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::InternalError && self.msg == TIMEOUT
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorKind::MethodNotFound,
            format!("method not found: {method}"),
        )
    }

    /// Maps an arbitrary failure onto the error catalog.
    ///
    /// The source chain is walked outermost first: a typed `Error` anywhere
    /// in the chain is returned unchanged, join errors are unwrapped,
    /// elapsed timers and timed-out I/O become `Timeout`, cancellation and
    /// interrupted I/O become `Interrupted`. Anything else is an internal
    /// error carrying the outermost message.
    #[must_use]
    pub fn resolve(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(e) = e.downcast_ref::<Error>() {
                return e.clone();
            }
            if let Some(e) = e.downcast_ref::<tokio::task::JoinError>() {
                if e.is_cancelled() {
                    return Self::interrupted();
                }
                return Self::new(ErrorKind::InternalError, e.to_string());
            }
            if e.is::<tokio::time::error::Elapsed>() {
                return Self::timeout();
            }
            if e.is::<tokio::sync::oneshot::error::RecvError>() {
                return Self::interrupted();
            }
            if let Some(e) = e.downcast_ref::<std::io::Error>() {
                match e.kind() {
                    std::io::ErrorKind::TimedOut => return Self::timeout(),
                    std::io::ErrorKind::Interrupted => return Self::interrupted(),
                    _ => {}
                }
                if let Some(inner) = e.get_ref() {
                    current = Some(inner as &(dyn std::error::Error + 'static));
                    continue;
                }
            }
            current = e.source();
        }
        Self::new(ErrorKind::InternalError, err.to_string())
    }

    /// Builds an internal error from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::new(ErrorKind::InternalError, msg)
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::kind(kind)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::new(ErrorKind::ParseError, value.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(value: rmp_serde::encode::Error) -> Self {
        Self::new(ErrorKind::InternalError, value.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(value: rmp_serde::decode::Error) -> Self {
        Self::new(ErrorKind::ParseError, value.to_string())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.msg)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
