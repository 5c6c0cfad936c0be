//! Network-transported serial link to the distance sensor.
//!
//! Connects to an RFC 2217 (or raw TCP) serial server and turns the byte
//! stream into lines. Fetching a line waits at most the idle timeout and
//! reports [`LinkEvent::Idle`] when nothing complete arrived, so the caller
//! can check for shutdown without tearing the link down.
//!
//! The link never reconnects on its own. It reports failures classified as
//! recoverable or fatal and leaves retry policy to the session supervisor.

use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::endpoint::{Endpoint, Transport};
use super::telnet::TelnetFilter;
use crate::config::defaults::{MAX_LINE_BYTES, TCP_KEEPALIVE_INTERVAL_SECS, TCP_KEEPALIVE_TIME_SECS};
use crate::config::LinkConfig;
use crate::types::RawLine;

/// Link errors.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("connection to {address} failed: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link not connected")]
    NotConnected,
}

impl LinkError {
    /// Whether retrying the connection can help.
    ///
    /// Only a malformed endpoint is hopeless; everything else is a network
    /// condition that may clear up.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LinkError::InvalidEndpoint { .. })
    }
}

/// Result of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A complete line (terminator stripped)
    Line(RawLine),
    /// Idle timeout elapsed without a complete line
    Idle,
}

/// Link health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct LinkStats {
    pub connected: bool,
    pub lines_received: u64,
    pub idle_timeouts: u64,
    pub connections: u64,
    pub discarded_bytes: u64,
}

/// Serial-over-TCP line reader.
pub struct SerialLink {
    endpoint: Endpoint,
    baud_rate: u32,
    idle_timeout: Duration,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    telnet: Option<TelnetFilter>,
    /// Payload bytes received but not yet terminated by a newline
    pending: Vec<u8>,
    /// When the read that completed the lines in `pending` returned
    received_at: DateTime<Local>,
    stats: LinkStats,
}

impl SerialLink {
    pub fn new(
        endpoint: Endpoint,
        baud_rate: u32,
        idle_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            baud_rate,
            idle_timeout,
            connect_timeout,
            stream: None,
            telnet: None,
            pending: Vec::with_capacity(64),
            received_at: Local::now(),
            stats: LinkStats::default(),
        }
    }

    /// Build a link from the `[link]` config section.
    pub fn from_config(config: &LinkConfig) -> Result<Self, LinkError> {
        let endpoint = Endpoint::parse(&config.endpoint)?;
        Ok(Self::new(
            endpoint,
            config.baud_rate,
            config.idle_timeout(),
            config.connect_timeout(),
        ))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            connected: self.is_connected(),
            ..self.stats.clone()
        }
    }

    /// Connect, enable keepalive and (for RFC 2217) negotiate the serial line.
    ///
    /// Any previous connection is dropped first, along with its partial line.
    pub async fn open(&mut self) -> Result<(), LinkError> {
        self.close().await;

        let address = self.endpoint.socket_addr();
        tracing::info!(endpoint = %self.endpoint, baud = self.baud_rate, "[Link] Connecting to sensor");

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| LinkError::ConnectTimeout {
                address: address.clone(),
                timeout: self.connect_timeout,
            })?
            .map_err(|source| LinkError::ConnectFailed {
                address: address.clone(),
                source,
            })?;

        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(TCP_KEEPALIVE_TIME_SECS))
            .with_interval(Duration::from_secs(TCP_KEEPALIVE_INTERVAL_SECS));
        if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
            tracing::debug!(error = %e, "[Link] Could not enable TCP keepalive");
        }
        let _ = stream.set_nodelay(true);

        self.telnet = match self.endpoint.transport {
            Transport::Rfc2217 => {
                stream.write_all(&TelnetFilter::handshake(self.baud_rate)).await?;
                Some(TelnetFilter::rfc2217())
            }
            Transport::RawTcp => None,
        };

        self.stream = Some(stream);
        self.stats.connections += 1;
        tracing::info!(endpoint = %self.endpoint, "[Link] Sensor connection established");
        Ok(())
    }

    /// Shut the connection down. Safe to call when already closed.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            tracing::info!(endpoint = %self.endpoint, "[Link] Sensor connection closed");
        }
        self.telnet = None;
        self.pending.clear();
    }

    /// Wait up to the idle timeout for the next complete line.
    ///
    /// On a read error or peer close the connection is dropped before the
    /// error is returned; call [`Self::open`] to start over.
    pub async fn next_line(&mut self) -> Result<LinkEvent, LinkError> {
        let deadline = Instant::now() + self.idle_timeout;
        let mut chunk = [0u8; 512];

        loop {
            if let Some(line) = self.take_line() {
                self.stats.lines_received += 1;
                return Ok(LinkEvent::Line(line));
            }

            let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
            let read = match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
                Ok(result) => result,
                Err(_) => {
                    self.stats.idle_timeouts += 1;
                    return Ok(LinkEvent::Idle);
                }
            };

            match read {
                Ok(0) => {
                    self.drop_connection();
                    return Err(LinkError::ConnectionClosed);
                }
                Ok(n) => {
                    self.received_at = Local::now();
                    self.ingest(&chunk[..n]).await?;
                }
                Err(e) => {
                    self.drop_connection();
                    return Err(LinkError::Io(e));
                }
            }
        }
    }

    /// Push received bytes through the telnet layer (if any) into `pending`.
    async fn ingest(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        match self.telnet.as_mut() {
            Some(filter) => {
                filter.feed(bytes, &mut self.pending);
                let replies = filter.take_replies();
                if !replies.is_empty() {
                    if let Some(stream) = self.stream.as_mut() {
                        if let Err(e) = stream.write_all(&replies).await {
                            self.drop_connection();
                            return Err(LinkError::Io(e));
                        }
                    }
                }
            }
            None => self.pending.extend_from_slice(bytes),
        }

        if self.pending.len() > MAX_LINE_BYTES && !self.pending.contains(&b'\n') {
            tracing::warn!(
                bytes = self.pending.len(),
                "[Link] Discarding oversized line without terminator"
            );
            self.stats.discarded_bytes += self.pending.len() as u64;
            self.pending.clear();
        }
        Ok(())
    }

    /// Split the first complete line off `pending`.
    ///
    /// Lines carry the time of the read that delivered their newline, so
    /// several lines from one segment share a timestamp.
    fn take_line(&mut self) -> Option<RawLine> {
        let newline = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(RawLine::at(
            self.received_at,
            String::from_utf8_lossy(&line).into_owned(),
        ))
    }

    fn drop_connection(&mut self) {
        self.stream = None;
        self.telnet = None;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::telnet::cmd;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn raw_link(port: u16, idle_ms: u64) -> SerialLink {
        SerialLink::new(
            Endpoint::parse(&format!("socket://127.0.0.1:{port}")).unwrap(),
            9600,
            Duration::from_millis(idle_ms),
            Duration::from_secs(2),
        )
    }

    fn line_text(event: LinkEvent) -> String {
        match event {
            LinkEvent::Line(line) => line.text,
            LinkEvent::Idle => panic!("expected a line, got idle"),
        }
    }

    #[tokio::test]
    async fn test_lines_split_and_carriage_returns_stripped() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"3\r\n120\n\n12.").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            sock.write_all(b"5\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut link = raw_link(port, 2_000);
        link.open().await.unwrap();
        assert_eq!(line_text(link.next_line().await.unwrap()), "3");
        assert_eq!(line_text(link.next_line().await.unwrap()), "120");
        assert_eq!(line_text(link.next_line().await.unwrap()), "");
        assert_eq!(line_text(link.next_line().await.unwrap()), "12.5");
        assert_eq!(link.stats().lines_received, 4);
    }

    #[tokio::test]
    async fn test_lines_are_stamped_when_read_not_when_taken() {
        let (listener, port) = listener().await;
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"3\n120\n").await.unwrap();
            rx.await.ok();
            sock.write_all(b"4\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut link = raw_link(port, 2_000);
        link.open().await.unwrap();
        let first = match link.next_line().await.unwrap() {
            LinkEvent::Line(line) => line,
            LinkEvent::Idle => panic!("expected a line"),
        };
        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = match link.next_line().await.unwrap() {
            LinkEvent::Line(line) => line,
            LinkEvent::Idle => panic!("expected a line"),
        };
        assert_eq!(second.text, "120");
        assert_eq!(second.arrived_at, first.arrived_at, "buffered line keeps its read time");

        tx.send(()).unwrap();
        let third = match link.next_line().await.unwrap() {
            LinkEvent::Line(line) => line,
            LinkEvent::Idle => panic!("expected a line"),
        };
        assert_eq!(third.text, "4");
        assert!(third.arrived_at - first.arrived_at >= chrono::Duration::milliseconds(50));
    }

    #[tokio::test]
    async fn test_idle_timeout_keeps_partial_line() {
        let (listener, port) = listener().await;
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"4").await.unwrap();
            rx.await.ok();
            sock.write_all(b"2\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut link = raw_link(port, 100);
        link.open().await.unwrap();
        assert_eq!(link.next_line().await.unwrap(), LinkEvent::Idle);
        assert!(link.is_connected(), "idle must not drop the connection");
        tx.send(()).unwrap();

        let mut event = link.next_line().await.unwrap();
        while event == LinkEvent::Idle {
            event = link.next_line().await.unwrap();
        }
        assert_eq!(line_text(event), "42");
        assert!(link.stats().idle_timeouts >= 1);
    }

    #[tokio::test]
    async fn test_peer_close_is_recoverable() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"7\n").await.unwrap();
        });

        let mut link = raw_link(port, 2_000);
        link.open().await.unwrap();
        assert_eq!(line_text(link.next_line().await.unwrap()), "7");
        let err = link.next_line().await.unwrap_err();
        assert!(matches!(err, LinkError::ConnectionClosed));
        assert!(err.is_recoverable());
        assert!(!link.is_connected());
        assert!(matches!(link.next_line().await, Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, port) = listener().await;
        drop(listener);
        let mut link = raw_link(port, 100);
        let err = link.open().await.unwrap_err();
        assert!(matches!(err, LinkError::ConnectFailed { .. }));
    }

    #[tokio::test]
    async fn test_rfc2217_handshake_and_telnet_stripping() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let expected = TelnetFilter::handshake(19_200);
            let mut received = vec![0u8; expected.len()];
            sock.read_exact(&mut received).await.unwrap();
            assert_eq!(received, expected);

            // Ask the client for an option it must refuse, then send data
            sock.write_all(&[cmd::IAC, cmd::DO, 24]).await.unwrap();
            sock.write_all(&[b'8', cmd::IAC, cmd::NOP, b'8', b'\r', b'\n']).await.unwrap();

            let mut reply = [0u8; 3];
            sock.read_exact(&mut reply).await.unwrap();
            reply
        });

        let mut link = SerialLink::new(
            Endpoint::parse(&format!("rfc2217://127.0.0.1:{port}")).unwrap(),
            19_200,
            Duration::from_secs(2),
            Duration::from_secs(2),
        );
        link.open().await.unwrap();
        assert_eq!(line_text(link.next_line().await.unwrap()), "88");

        let reply = server.await.unwrap();
        assert_eq!(reply, [cmd::IAC, cmd::WONT, 24]);
    }

    #[tokio::test]
    async fn test_oversized_garbage_is_discarded() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&vec![b'x'; MAX_LINE_BYTES + 10]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            sock.write_all(b"\n9\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut link = raw_link(port, 2_000);
        link.open().await.unwrap();
        let mut texts = Vec::new();
        while texts.len() < 2 {
            if let LinkEvent::Line(line) = link.next_line().await.unwrap() {
                texts.push(line.text);
            }
        }
        assert_eq!(texts[1], "9");
        assert!(link.stats().discarded_bytes > 0);
    }
}
