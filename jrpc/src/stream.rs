//! Length-prefixed framing over byte streams such as `TcpStream`.
//!
//! Each frame is a 4-byte big-endian length followed by the encoded
//! message.

use std::{io::IoSlice, sync::Arc};

use bytes::{Buf, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

use crate::{
    ChannelTransport, Endpoint, EndpointBuilder,
    error::{Error, ErrorKind, Result},
};

const HEADER_SIZE: usize = std::mem::size_of::<u32>();

/// Runs an endpoint over `io`.
///
/// The connection stays up until the peer closes it, a framing error
/// occurs, or the endpoint is stopped.
///
/// # Errors
///
/// Returns an error if the endpoint cannot be built.
pub fn attach<S>(builder: EndpointBuilder, io: S) -> Result<Endpoint>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let codec = builder.config().codec;
    let max_frame_size = builder
        .config()
        .max_frame_size
        .min(usize::try_from(u32::MAX).unwrap_or(usize::MAX));
    let (reader, writer) = tokio::io::split(io);

    let (outbox, frames) = mpsc::unbounded_channel();
    let transport = ChannelTransport::new(codec, outbox).with_max_frame_size(max_frame_size);
    let endpoint = builder.build(Arc::new(transport))?;

    let (inbox_tx, inbox) = mpsc::unbounded_channel();
    endpoint.spawn_receiver(inbox);
    // the receiver stops the endpoint once the recv loop drops `inbox_tx`.
    let close = endpoint.stop_guard();
    endpoint.supervise(async move {
        let _close = close;
        if let Err(e) = send_loop(writer, frames).await {
            tracing::error!("send loop failed: {e}");
        }
    });
    endpoint.supervise(async move {
        match recv_loop(reader, inbox_tx, max_frame_size).await {
            Ok(()) => tracing::debug!("connection closed by peer"),
            Err(e) => tracing::error!("recv loop failed: {e}"),
        }
    });
    Ok(endpoint)
}

fn parse_frame(buffer: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>> {
    if buffer.len() < HEADER_SIZE {
        return Ok(None);
    }
    let header = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
    let len = usize::try_from(header)
        .map_err(|e| Error::new(ErrorKind::ParseError, e.to_string()))?;
    if len > max_frame_size {
        return Err(Error::new(
            ErrorKind::ParseError,
            format!("frame is too long: {len}"),
        ));
    }

    if buffer.len() < HEADER_SIZE + len {
        buffer.reserve(HEADER_SIZE + len - buffer.len());
        Ok(None)
    } else {
        buffer.advance(HEADER_SIZE);
        Ok(Some(buffer.split_to(len).freeze()))
    }
}

async fn recv_loop<R>(
    mut reader: R,
    inbox: mpsc::UnboundedSender<Bytes>,
    max_frame_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(1 << 16);
    loop {
        if let Some(frame) = parse_frame(&mut buffer, max_frame_size)? {
            if inbox.send(frame).is_err() {
                return Ok(());
            }
        } else {
            let n = reader
                .read_buf(&mut buffer)
                .await
                .map_err(|e| Error::resolve(&e))?;
            if n == 0 {
                return if buffer.is_empty() {
                    Ok(())
                } else {
                    Err(Error::new(
                        ErrorKind::ParseError,
                        format!("eof inside a frame, {} bytes pending", buffer.len()),
                    ))
                };
            }
        }
    }
}

async fn send_loop<W>(mut writer: W, mut frames: mpsc::UnboundedReceiver<Bytes>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    const LIMIT: usize = 64;
    let send_failed = |e: std::io::Error| Error::new(ErrorKind::SendFailed, e.to_string());
    let mut msgs = Vec::with_capacity(LIMIT);
    let mut headers = Vec::with_capacity(LIMIT);
    loop {
        let n = frames.recv_many(&mut msgs, LIMIT).await;
        if n == 0 {
            return writer.shutdown().await.map_err(send_failed);
        }

        headers.clear();
        for msg in &msgs {
            let len = u32::try_from(msg.len())
                .map_err(|e| Error::new(ErrorKind::SendFailed, e.to_string()))?;
            headers.push(len.to_be_bytes());
        }

        let mut bufs = [IoSlice::new(&[]); 2 * LIMIT];
        for ((msg, header), pair) in msgs.iter().zip(&headers).zip(bufs.chunks_exact_mut(2)) {
            pair[0] = IoSlice::new(header);
            pair[1] = IoSlice::new(msg);
        }

        let mut slices = &mut bufs[..2 * msgs.len()];
        while !slices.is_empty() {
            let n = writer.write_vectored(slices).await.map_err(send_failed)?;
            if n == 0 {
                return Err(Error::new(ErrorKind::SendFailed, "write zero"));
            }
            IoSlice::advance_slices(&mut slices, n);
        }
        writer.flush().await.map_err(send_failed)?;
        msgs.clear();
    }
}
