use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Message,
    error::{Error, ErrorKind, Result},
};

/// Frame encoding of messages.
///
/// Both formats decode into the same generic value model before the
/// message is classified, so the classification rules are identical.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Json,
    #[serde(alias = "msgpack")]
    MessagePack,
}

impl Codec {
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized.
    pub fn encode(self, msg: &Message) -> Result<Bytes> {
        match self {
            Codec::Json => Ok(serde_json::to_vec(msg)
                .map_err(|e| Error::new(ErrorKind::InternalError, e.to_string()))?
                .into()),
            Codec::MessagePack => Ok(rmp_serde::to_vec_named(msg)?.into()),
        }
    }

    /// Decodes a frame into a generic value without classifying it.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` for empty or malformed frames.
    pub fn decode_value(self, frame: &[u8]) -> Result<Value> {
        if frame.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::new(ErrorKind::ParseError, "empty message"));
        }
        match self {
            Codec::Json => Ok(serde_json::from_slice(frame)?),
            Codec::MessagePack => Ok(rmp_serde::from_slice(frame)?),
        }
    }

    /// # Errors
    ///
    /// Returns a `ParseError` if the frame is not a valid message.
    pub fn decode(self, frame: &[u8]) -> Result<Message> {
        Message::from_value(self.decode_value(frame)?)
    }
}
