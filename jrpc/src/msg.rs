use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{
    Id,
    error::{Error, ErrorKind, Result},
};

/// The only protocol version tag accepted and emitted.
pub const JSONRPC_VERSION: &str = "2.0";

/// A one-way message. No id, no response.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// A correlated call expecting exactly one [`Response`].
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub id: Id,
    pub method: String,
    pub params: Option<Value>,
}

impl Request {
    /// The notification view of this request: same method and params, no id.
    ///
    /// Every incoming request is also delivered to the notification
    /// handlers of its method through this view.
    #[must_use]
    pub fn as_notification(&self) -> Notification {
        Notification {
            method: self.method.clone(),
            params: self.params.clone(),
        }
    }
}

/// Reply to a [`Request`], carrying either a result or an error.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub id: Id,
    pub result: std::result::Result<Value, Error>,
}

impl Response {
    #[must_use]
    pub fn ok(id: Id, result: Value) -> Self {
        Self {
            id,
            result: Ok(result),
        }
    }

    #[must_use]
    pub fn err(id: Id, error: Error) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}

/// Any of the wire messages.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Notification(Notification),
    Request(Request),
    Response(Response),
}

impl From<Notification> for Message {
    fn from(value: Notification) -> Self {
        Message::Notification(value)
    }
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Message::Request(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Message::Response(value)
    }
}

/// Flat wire layout used for decoding.
///
/// `params` and `result` distinguish an explicit `null` from an absent
/// field, which plain `Option<Value>` would not.
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default, deserialize_with = "present")]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Error>,
}

fn present<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Serialize)]
struct RawMessageRef<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a Error>,
}

impl<'a> From<&'a Message> for RawMessageRef<'a> {
    fn from(msg: &'a Message) -> Self {
        let mut raw = RawMessageRef {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match msg {
            Message::Notification(n) => {
                raw.method = Some(&n.method);
                raw.params = n.params.as_ref();
            }
            Message::Request(r) => {
                raw.id = Some(&r.id);
                raw.method = Some(&r.method);
                raw.params = r.params.as_ref();
            }
            Message::Response(r) => {
                raw.id = Some(&r.id);
                match &r.result {
                    Ok(result) => raw.result = Some(result),
                    Err(error) => raw.error = Some(error),
                }
            }
        }
        raw
    }
}

fn parse_error(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::ParseError, msg)
}

impl Message {
    /// Decodes a message from its JSON text form.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` for blank or malformed text and for any
    /// value rejected by [`Message::from_value`].
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(parse_error("empty message"));
        }
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Classifies a generic JSON value as one of the message shapes.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` if the value is not an object, carries the
    /// wrong version tag, has neither `id` nor `method`, or combines
    /// fields inconsistently.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(object) = &value else {
            return Err(parse_error(format!("message is not an object: {value}")));
        };
        match object.get("jsonrpc") {
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            other => {
                return Err(parse_error(format!(
                    "unsupported jsonrpc version: {}",
                    other.unwrap_or(&Value::Null)
                )));
            }
        }

        let raw: RawMessage = serde_json::from_value(value)?;
        match (raw.id, raw.method, raw.result, raw.error) {
            (None, None, _, _) => Err(parse_error("message has neither id nor method")),
            (id, Some(method), None, None) => Ok(match id {
                Some(id) => Message::Request(Request {
                    id,
                    method,
                    params: raw.params,
                }),
                None => Message::Notification(Notification {
                    method,
                    params: raw.params,
                }),
            }),
            (Some(id), None, Some(result), None) => Ok(Message::Response(Response::ok(id, result))),
            (Some(id), None, None, Some(error)) => Ok(Message::Response(Response::err(id, error))),
            _ => Err(parse_error("inconsistent combination of message fields")),
        }
    }

    /// Encodes the message into its generic JSON value form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Notification(n) => Some(&n.method),
            Message::Request(r) => Some(&r.method),
            Message::Response(_) => None,
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&Id> {
        match self {
            Message::Notification(_) => None,
            Message::Request(r) => Some(&r.id),
            Message::Response(r) => Some(&r.id),
        }
    }
}

/// Returns the id of a raw value that looks like a request, so a reply can
/// be addressed even when the value fails to classify.
pub(crate) fn request_id_of(value: &Value) -> Option<Id> {
    let object = value.as_object()?;
    object.get("method")?;
    Id::deserialize(object.get("id")?).ok()
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        RawMessageRef::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for Message {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_value())
    }
}
