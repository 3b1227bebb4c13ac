//! In-process transport over tokio channels.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    Codec, Endpoint, EndpointBuilder, Message, Transport,
    error::{Error, ErrorKind, Result},
};

/// Encodes messages and pushes the frames into a channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    codec: Codec,
    max_frame_size: Option<usize>,
    sender: mpsc::UnboundedSender<Bytes>,
}

impl ChannelTransport {
    #[must_use]
    pub fn new(codec: Codec, sender: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            codec,
            max_frame_size: None,
            sender,
        }
    }

    /// Refuses to post frames longer than `max_frame_size`.
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = Some(max_frame_size);
        self
    }
}

impl Transport for ChannelTransport {
    fn post(&self, message: &Message) -> Result<()> {
        let frame = self.codec.encode(message)?;
        if let Some(max) = self.max_frame_size
            && frame.len() > max
        {
            return Err(Error::new(
                ErrorKind::SendFailed,
                format!("frame is too long: {}", frame.len()),
            ));
        }
        self.sender
            .send(frame)
            .map_err(|_| Error::new(ErrorKind::SendFailed, "connection closed"))
    }
}

/// Connects two endpoints back to back.
///
/// Both builders must use the same codec. Dropping either endpoint closes
/// the connection, which interrupts the requests the other still awaits.
///
/// # Errors
///
/// Returns an error if the codecs differ or an endpoint cannot be built.
pub fn connect(a: EndpointBuilder, b: EndpointBuilder) -> Result<(Endpoint, Endpoint)> {
    if a.config().codec != b.config().codec {
        return Err(Error::new(
            ErrorKind::InternalError,
            format!(
                "codec mismatch: {:?} vs {:?}",
                a.config().codec,
                b.config().codec
            ),
        ));
    }
    let codec = a.config().codec;
    let (to_a, a_inbox) = mpsc::unbounded_channel();
    let (to_b, b_inbox) = mpsc::unbounded_channel();

    let a = a.build(Arc::new(ChannelTransport::new(codec, to_b)))?;
    let b = b.build(Arc::new(ChannelTransport::new(codec, to_a)))?;
    a.spawn_receiver(a_inbox);
    b.spawn_receiver(b_inbox);
    Ok((a, b))
}
