//! Tunnel adapter: a channel as an async byte stream (RFC 4254
//! Section 7.2 usage).
//!
//! [`TunnelStream`] wraps an open channel as `AsyncRead + AsyncWrite`:
//! writes become CHANNEL_DATA (windowed by the multiplexer), reads
//! drain the channel's event queue, and shutdown sends EOF then
//! CLOSE. Higher-level protocols (HTTP, WebSocket, anything that
//! speaks bytes) run over it without knowing about SSH framing.
//!
//! This is the only surface the core offers them; the tunnel carrier
//! role of the stack hangs off this type.

use crate::ssh::connection::ChannelType;
use crate::ssh::mux::{ChannelEvent, MuxHandle};
use hawser_platform::{HawserError, HawserResult};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

/// A channel presented as a bidirectional byte stream.
pub struct TunnelStream {
    mux: MuxHandle,
    local_id: u32,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    /// Bytes received but not yet read out.
    carry: Vec<u8>,
    read_closed: bool,
    shutdown_sent: bool,
}

impl TunnelStream {
    /// Opens a `direct-tcpip` channel through the multiplexer and
    /// wraps it.
    pub async fn open_direct_tcpip(
        mux: &MuxHandle,
        host: &str,
        port: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> HawserResult<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let local_id = mux
            .open_channel(
                ChannelType::DirectTcpip {
                    host: host.to_string(),
                    port,
                    originator_address: originator_address.to_string(),
                    originator_port,
                },
                events_tx,
            )
            .await?;
        Ok(Self::from_parts(mux.clone(), local_id, events_rx))
    }

    /// Wraps an already-open channel (used for accepted
    /// forwarded-tcpip and auth-agent channels).
    pub fn from_parts(
        mux: MuxHandle,
        local_id: u32,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            mux,
            local_id,
            events,
            carry: Vec::new(),
            read_closed: false,
            shutdown_sent: false,
        }
    }

    /// Returns the underlying channel's local id.
    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    fn fill_from(&mut self, buf: &mut ReadBuf<'_>, mut data: Vec<u8>) {
        let take = data.len().min(buf.remaining());
        buf.put_slice(&data[..take]);
        if take < data.len() {
            self.carry.extend_from_slice(&data.split_off(take));
        }
    }
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        // Serve carried-over bytes first so DATA order is preserved.
        if !self.carry.is_empty() {
            let take = self.carry.len().min(buf.remaining());
            let rest = self.carry.split_off(take);
            buf.put_slice(&self.carry);
            self.carry = rest;
            return Poll::Ready(Ok(()));
        }

        if self.read_closed {
            return Poll::Ready(Ok(()));
        }

        loop {
            match self.events.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    self.read_closed = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(ChannelEvent::Data(data))) => {
                    if data.is_empty() {
                        continue;
                    }
                    self.fill_from(buf, data);
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(ChannelEvent::ExtendedData(_, data))) => {
                    if data.is_empty() {
                        continue;
                    }
                    self.fill_from(buf, data);
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(ChannelEvent::Eof | ChannelEvent::Closed)) => {
                    self.read_closed = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(_)) => continue,
            }
        }
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if self.shutdown_sent {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "tunnel already shut down",
            )));
        }
        match self.mux.send_data(self.local_id, buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(e) => Poll::Ready(Err(into_io(e))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        // Data is handed to the connection task on write; there is no
        // local buffer to flush.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.shutdown_sent {
            self.shutdown_sent = true;
            let _ = self.mux.send_eof(self.local_id);
            let _ = self.mux.close_channel(self.local_id);
        }
        Poll::Ready(Ok(()))
    }
}

impl std::fmt::Debug for TunnelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelStream")
            .field("local_id", &self.local_id)
            .field("carry", &self.carry.len())
            .field("read_closed", &self.read_closed)
            .finish()
    }
}

fn into_io(err: HawserError) -> std::io::Error {
    match err {
        HawserError::Io(e) => e,
        other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// The full path through a live multiplexer is covered by the
    /// integration tests; here the adapter logic runs against a
    /// hand-fed event queue.
    fn detached_stream() -> (TunnelStream, mpsc::UnboundedSender<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            TunnelStream::from_parts(MuxHandle::detached(), 3, events_rx),
            events_tx,
        )
    }

    #[tokio::test]
    async fn test_read_reassembles_in_order() {
        let (mut stream, events) = detached_stream();
        events.send(ChannelEvent::Data(b"hello ".to_vec())).unwrap();
        events.send(ChannelEvent::Data(b"world".to_vec())).unwrap();
        events.send(ChannelEvent::Eof).unwrap();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_short_reads_carry_over() {
        let (mut stream, events) = detached_stream();
        events
            .send(ChannelEvent::Data(b"0123456789".to_vec()))
            .unwrap();

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"0123");
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"4567");

        events.send(ChannelEvent::Closed).unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"89");
    }

    #[tokio::test]
    async fn test_eof_yields_clean_end() {
        let (mut stream, events) = detached_stream();
        events.send(ChannelEvent::Eof).unwrap();

        let mut out = Vec::new();
        let n = stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_write_after_shutdown_fails() {
        let (mut stream, _events) = detached_stream();
        stream.shutdown().await.unwrap();
        assert!(stream.write_all(b"late").await.is_err());
    }
}
