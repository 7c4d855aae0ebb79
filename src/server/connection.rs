//! Connection handling
//!
//! Manages individual client connections, decoding request frames
//! and sending response frames.

use crate::dispatch::Dispatcher;
use crate::protocol::{Frame, FrameCodec};
use crate::storage::Context;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Connection handler
pub struct Connection {
    /// TCP stream
    stream: TcpStream,

    /// Frame codec, shared limits for both directions
    codec: FrameCodec,

    /// Read buffer
    read_buffer: BytesMut,

    /// Write buffer
    write_buffer: BytesMut,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, codec: FrameCodec) -> Self {
        Connection {
            stream,
            codec,
            read_buffer: BytesMut::with_capacity(4096),
            write_buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Handle the connection
    ///
    /// Reads frames from the client, dispatches them one at a time, and
    /// sends responses. Each call runs under a child of `shutdown` bounded
    /// by `call_timeout`. Returns when the peer disconnects, on a framing
    /// error, or once `shutdown` is cancelled.
    pub async fn handle(
        &mut self,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
        call_timeout: Duration,
    ) -> std::io::Result<()> {
        loop {
            // Dispatch every complete frame already buffered
            while let Some(frame) = self.codec.decode(&mut self.read_buffer)? {
                debug!("Received frame tag={:#04x} seq={}", frame.tag, frame.seq);

                let ctx = Context::with_token(shutdown.child_token()).with_timeout(call_timeout);
                let reply = dispatcher.handle(&ctx, frame).await;

                self.send_frame(reply).await?;
            }

            // Read data from the socket
            let n = tokio::select! {
                res = self.stream.read_buf(&mut self.read_buffer) => res?,
                _ = shutdown.cancelled() => {
                    debug!("Closing connection on shutdown");
                    return Ok(());
                }
            };

            // Connection closed
            if n == 0 {
                if self.read_buffer.is_empty() {
                    return Ok(());
                } else {
                    warn!("Peer closed with {} unread bytes", self.read_buffer.len());
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset by peer",
                    ));
                }
            }

            debug!("Read {} bytes", n);
        }
    }

    /// Send a frame to the client
    async fn send_frame(&mut self, frame: Frame) -> std::io::Result<()> {
        self.write_buffer.clear();
        self.codec.encode(frame, &mut self.write_buffer)?;

        // Write to the socket
        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;

        Ok(())
    }
}
