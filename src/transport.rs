use async_trait::async_trait;
use std::{net::Ipv4Addr, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    codec::{Frame, FrameCodec},
    error::{BikeError, Result},
    protocol::Command,
    types::{ConnectionParams, LinkStats, TimeoutConfig},
};

/// Size of a single socket read
const READ_CHUNK: usize = 1024;

/// Result of waiting for inbound data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// One or more complete frames arrived
    Frames(Vec<Frame>),
    /// Nothing complete arrived before the timeout; the link is still up
    NoData,
    /// The link is down (never connected, closed by the peer, or failed)
    Disconnected,
}

/// A bidirectional frame link to the bike controller
///
/// Implemented by [`Transport`] for TCP. The handshake and the device session
/// only talk to the controller through this trait.
#[async_trait]
pub trait FrameLink: Send {
    /// Write one command; `false` if it could not be written
    async fn send(&mut self, command: &Command) -> bool;

    /// Wait up to `wait` for inbound frames
    async fn receive(&mut self, wait: Duration) -> ReceiveOutcome;

    /// Close the link; safe to call repeatedly
    async fn disconnect(&mut self);

    /// Whether the link is currently up
    fn is_connected(&self) -> bool;

    /// Frame counters for the current connection
    fn stats(&self) -> LinkStats;
}

/// TCP connection to the bike controller
pub struct Transport {
    params: ConnectionParams,
    timeouts: TimeoutConfig,
    stream: Option<TcpStream>,
    codec: FrameCodec,
    stats: LinkStats,
}

impl Transport {
    /// Create an unconnected transport
    #[must_use]
    pub fn new(params: ConnectionParams, timeouts: TimeoutConfig) -> Self {
        Self {
            params,
            timeouts,
            stream: None,
            codec: FrameCodec::new(),
            stats: LinkStats::default(),
        }
    }

    /// Connection parameters in use
    #[must_use]
    pub const fn params(&self) -> &ConnectionParams {
        &self.params
    }

    fn target(&self) -> String {
        format!("{}:{}", self.params.address, self.params.port)
    }

    /// Connect using the configured number of attempts
    pub async fn connect(&mut self) -> bool {
        self.connect_with_attempts(self.params.connect_attempts).await
    }

    /// Open the TCP connection, waking the controller between attempts
    ///
    /// After each failed attempt except the last, a UDP broadcast carrying the
    /// wake token is sent on the controller port before retrying. Failures are
    /// logged and reported as `false`; this never returns an error.
    pub async fn connect_with_attempts(&mut self, max_attempts: u32) -> bool {
        self.close_quietly().await;
        info!("Attempting to connect to {}...", self.target());

        for attempt in 1..=max_attempts {
            match self.open_stream().await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Could not disable Nagle: {e}");
                    }
                    self.stream = Some(stream);
                    self.stats = LinkStats::default();
                    info!("Connected successfully to {}", self.target());
                    return true;
                }
                Err(e) => warn!("Connect attempt {attempt}/{max_attempts} failed: {e}"),
            }

            if attempt < max_attempts {
                info!("Broadcasting wake token (attempt {attempt}/{max_attempts})");
                if let Err(e) = self.send_wake().await {
                    warn!("Wake broadcast failed: {e}");
                }
                sleep(Duration::from_millis(self.timeouts.wake_delay_ms)).await;
            }
        }

        false
    }

    async fn open_stream(&self) -> Result<TcpStream> {
        let timeout_ms = self.timeouts.connect_timeout_ms;
        let connect = TcpStream::connect((self.params.address.as_str(), self.params.port));

        match timeout(Duration::from_millis(timeout_ms), connect).await {
            Err(_) => Err(BikeError::ConnectTimeout { timeout_ms }),
            Ok(Err(e)) => Err(match BikeError::from_connect(e, &self.target()) {
                BikeError::ConnectTimeout { .. } => BikeError::ConnectTimeout { timeout_ms },
                other => other,
            }),
            Ok(Ok(stream)) => Ok(stream),
        }
    }

    async fn send_wake(&self) -> Result<()> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        socket
            .send_to(
                self.params.wake_token.as_bytes(),
                (Ipv4Addr::BROADCAST, self.params.port),
            )
            .await?;
        debug!("Broadcast wake token on port {}", self.params.port);
        Ok(())
    }

    async fn write_frame(&mut self, frame: &str) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(BikeError::Disconnected)?;
        stream.write_all(frame.as_bytes()).await?;
        self.stats.messages_sent += 1;
        Ok(())
    }

    fn mark_disconnected(&mut self) {
        self.stream = None;
        self.codec.clear();
    }

    async fn close_quietly(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.codec.clear();
    }
}

#[async_trait]
impl FrameLink for Transport {
    async fn send(&mut self, command: &Command) -> bool {
        if self.stream.is_none() {
            return false;
        }

        match self.write_frame(&command.to_frame()).await {
            Ok(()) => {
                debug!("Sent: {command}");
                true
            }
            Err(e) => {
                warn!("Send error: {e}");
                self.mark_disconnected();
                false
            }
        }
    }

    async fn receive(&mut self, wait: Duration) -> ReceiveOutcome {
        let Some(stream) = self.stream.as_mut() else {
            return ReceiveOutcome::Disconnected;
        };

        let mut buf = [0u8; READ_CHUNK];
        let read = timeout(wait, stream.read(&mut buf)).await;
        match read {
            Err(_) => ReceiveOutcome::NoData,
            Ok(Ok(0)) => {
                info!("Bike closed the connection");
                self.mark_disconnected();
                ReceiveOutcome::Disconnected
            }
            Ok(Ok(n)) => {
                let frames = self.codec.push(&buf[..n]);
                if frames.is_empty() {
                    ReceiveOutcome::NoData
                } else {
                    self.stats.messages_received += 1;
                    debug!("Received {} frame(s)", frames.len());
                    ReceiveOutcome::Frames(frames)
                }
            }
            Ok(Err(e)) => {
                warn!("Receive error: {e}");
                self.mark_disconnected();
                ReceiveOutcome::Disconnected
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.stream.is_some() {
            if let Err(e) = self.write_frame(&Command::Terminate.to_frame()).await {
                debug!("Terminate notice not delivered: {e}");
            }
            self.close_quietly().await;
            info!("Disconnected");
        }
        self.codec.clear();
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stats(&self) -> LinkStats {
        self.stats
    }
}
