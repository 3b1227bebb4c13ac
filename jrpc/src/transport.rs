use crate::{Message, Result};

/// Outbound half of a connection.
///
/// The inbound half is whatever the transport uses to feed frames into
/// [`Endpoint::handle_frame`](crate::Endpoint::handle_frame); the
/// transport owns the connection lifecycle.
pub trait Transport: Send + Sync + 'static {
    /// Fires `message` toward the peer without waiting for delivery.
    ///
    /// # Errors
    ///
    /// Returns `SendFailed` if the connection is gone, or an encoding error.
    fn post(&self, message: &Message) -> Result<()>;
}
