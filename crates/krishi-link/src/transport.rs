//! Byte-level transports carrying frames to one endpoint.

use async_trait::async_trait;
use krishi_types::{Endpoint, KrishiError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tracing::debug;

/// Frame terminator.
const FRAME_END: u8 = b'>';

/// Inbound frames longer than this are garbage, not protocol.
const MAX_FRAME_LEN: usize = 512;

/// A full-duplex channel to one endpoint that moves whole frames.
///
/// Implementors do no retrying or acknowledgement matching; that lives in
/// [`crate::EndpointLink`].
#[async_trait]
pub trait FrameTransport: Send {
    /// Write one already-encoded frame.
    async fn send_frame(&mut self, frame: &str) -> Result<(), KrishiError>;

    /// Wait for the next frame, up to and including its terminating `>`.
    /// Cancel-safe only between frames; callers bound it with a timeout.
    async fn recv_frame(&mut self) -> Result<String, KrishiError>;
}

/// [`FrameTransport`] over any tokio byte stream: a serial device node opened
/// as a file, or a TCP serial bridge.
pub struct StreamTransport<S> {
    endpoint: Endpoint,
    stream: BufStream<S>,
    buf: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> StreamTransport<S> {
    pub fn new(endpoint: Endpoint, stream: S) -> Self {
        Self {
            endpoint,
            stream: BufStream::new(stream),
            buf: Vec::with_capacity(64),
        }
    }

    fn io_error(&self, e: impl std::fmt::Display) -> KrishiError {
        KrishiError::Io(format!("{} endpoint: {e}", self.endpoint))
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> FrameTransport for StreamTransport<S> {
    async fn send_frame(&mut self, frame: &str) -> Result<(), KrishiError> {
        debug!(endpoint = %self.endpoint, frame, "tx");
        self.stream
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        self.stream.flush().await.map_err(|e| self.io_error(e))
    }

    async fn recv_frame(&mut self) -> Result<String, KrishiError> {
        loop {
            let n = self
                .stream
                .read_until(FRAME_END, &mut self.buf)
                .await
                .map_err(|e| self.io_error(e))?;
            if n == 0 {
                return Err(self.io_error("stream closed"));
            }
            if self.buf.last() != Some(&FRAME_END) {
                if self.buf.len() > MAX_FRAME_LEN {
                    self.buf.clear();
                }
                continue;
            }
            let frame = String::from_utf8_lossy(&self.buf).trim().to_string();
            self.buf.clear();
            if frame.is_empty() {
                continue;
            }
            debug!(endpoint = %self.endpoint, frame, "rx");
            return Ok(frame);
        }
    }
}

/// Open the transport for `address`.
///
/// * `tcp://host:port` connects to a serial-over-TCP bridge.
/// * Anything else is treated as a device node (e.g. `/dev/ttyUSB0`) whose
///   line settings were configured by the host.
pub async fn connect(
    endpoint: Endpoint,
    address: &str,
) -> Result<Box<dyn FrameTransport>, KrishiError> {
    if let Some(addr) = address.strip_prefix("tcp://") {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|e| KrishiError::Io(format!("{endpoint} endpoint at {address}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| KrishiError::Io(format!("{endpoint} endpoint at {address}: {e}")))?;
        return Ok(Box::new(StreamTransport::new(endpoint, stream)));
    }

    let file = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(address)
        .await
        .map_err(|e| KrishiError::Io(format!("{endpoint} endpoint at {address}: {e}")))?;
    Ok(Box::new(StreamTransport::new(endpoint, file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_stream_into_frames() -> Result<(), Box<dyn std::error::Error>> {
        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = StreamTransport::new(Endpoint::Motion, client);

        server.write_all(b"\r\n<READY>\r\n<ACK:MOVE_OK><DATA:SENSORS:F:10>").await?;

        assert_eq!(transport.recv_frame().await?, "<READY>");
        assert_eq!(transport.recv_frame().await?, "<ACK:MOVE_OK>");
        assert_eq!(transport.recv_frame().await?, "<DATA:SENSORS:F:10>");
        Ok(())
    }

    #[tokio::test]
    async fn writes_frames_verbatim() -> Result<(), Box<dyn std::error::Error>> {
        use tokio::io::AsyncReadExt;
        let (client, mut server) = tokio::io::duplex(256);
        let mut transport = StreamTransport::new(Endpoint::Sensing, client);

        transport.send_frame("<PAN:150>").await?;
        let mut buf = [0u8; 9];
        server.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"<PAN:150>");
        Ok(())
    }

    #[tokio::test]
    async fn closed_stream_is_io_error() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut transport = StreamTransport::new(Endpoint::Motion, client);
        assert!(matches!(transport.recv_frame().await, Err(KrishiError::Io(_))));
    }
}
