//! UDP message socket with request/reply correlation and retries

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::net::codec::{self, CodecError, Envelope};
use crate::net::protocol::Message;

/// Largest datagram accepted
pub const MAX_DATAGRAM: usize = 65507;

/// Correlation ids wrap back to 0 after this
pub const MAX_MSG_ID: u32 = 65000;

/// Longest single wait for a reply
pub const MAX_REPLY_DELAY: Duration = Duration::from_secs(60);

/// Stats bucket for pre-serialized datagrams
const RAW_TYPE: &str = "preSerialized";

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Nothing is waiting in the receive buffer
    #[error("Receive buffer is empty")]
    BufferEmpty,

    #[error("Malformed datagram from {src}: {source}")]
    Malformed { src: SocketAddr, source: CodecError },

    #[error("Could not encode message: {0}")]
    Encode(#[from] CodecError),

    #[error("No reply after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// The peer answered with an `Error` message
    #[error("Peer replied with error: {0}")]
    ErrorReply(String),

    #[error("Socket error: {0}")]
    Io(#[from] io::Error),
}

/// Retry schedule for [`NetSocket::send_recv_message`]
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total sends, including the first. 0 still sends once.
    pub retries: u32,
    /// First wait, the socket's reply delay when `None`
    pub delay: Option<Duration>,
    /// Each resend waits this much longer than the previous attempt.
    /// Non-finite or non-positive values keep the delay fixed.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Wait for the attempt after one that waited `delay`
    fn next_delay(&self, delay: Duration) -> Duration {
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return delay;
        }
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier)
            .map_or(MAX_REPLY_DELAY, |next| next.min(MAX_REPLY_DELAY))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            delay: None,
            multiplier: 1.2,
        }
    }
}

/// Traffic counters for one socket
#[derive(Debug, Clone, Default)]
pub struct SocketStats {
    pub sent: u64,
    pub recv: u64,
    pub sent_by_type: BTreeMap<String, u64>,
    pub recv_by_type: BTreeMap<String, u64>,
    /// Completed or failed request/reply exchanges
    pub sync_calls: u64,
    pub resends: u64,
    /// Non-blocking sends dropped because the socket was not writable
    pub send_dropped: u64,
    /// Total time spent in request/reply exchanges
    pub sync_time: Duration,
}

impl SocketStats {
    fn count_sent(&mut self, kind: &str) {
        self.sent += 1;
        *self.sent_by_type.entry(kind.to_string()).or_insert(0) += 1;
    }

    fn count_recv(&mut self, kind: &str) {
        self.recv += 1;
        *self.recv_by_type.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Mean time per request/reply exchange
    pub fn avg_latency(&self) -> Duration {
        if self.sync_calls == 0 {
            Duration::ZERO
        } else {
            self.sync_time / self.sync_calls as u32
        }
    }
}

impl fmt::Display for SocketStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Messages sent: {}, received: {}", self.sent, self.recv)?;
        writeln!(
            f,
            "Request/reply calls: {}, resends: {}, dropped sends: {}, avg latency: {:.2}ms",
            self.sync_calls,
            self.resends,
            self.send_dropped,
            self.avg_latency().as_secs_f64() * 1000.0
        )?;
        writeln!(f, "Sent by type:")?;
        for (kind, count) in &self.sent_by_type {
            writeln!(f, "  {kind:<22} {count}")?;
        }
        writeln!(f, "Received by type:")?;
        for (kind, count) in &self.recv_by_type {
            writeln!(f, "  {kind:<22} {count}")?;
        }
        Ok(())
    }
}

/// UDP socket that speaks [`Envelope`]s.
///
/// The `try_` sends and [`recv_message`](Self::recv_message) never wait.
/// A `try_` send on a socket that is not writable yet drops the datagram,
/// which the protocol already tolerates. An empty receive buffer is
/// reported as [`TransportError::BufferEmpty`].
pub struct NetSocket {
    socket: UdpSocket,
    msg_id: u32,
    reply_delay: Duration,
    stats: SocketStats,
    buf: Vec<u8>,
}

impl NetSocket {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        debug!(addr = %socket.local_addr()?, "UDP socket bound");
        Ok(Self {
            socket,
            msg_id: rand::thread_rng().gen_range(0..MAX_MSG_ID),
            reply_delay: Duration::from_millis(100),
            stats: SocketStats::default(),
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn reply_delay(&self) -> Duration {
        self.reply_delay
    }

    pub fn set_reply_delay(&mut self, delay: Duration) {
        self.reply_delay = delay;
    }

    pub fn stats(&self) -> &SocketStats {
        &self.stats
    }

    fn next_msg_id(&mut self) -> u32 {
        self.msg_id = if self.msg_id >= MAX_MSG_ID {
            0
        } else {
            self.msg_id + 1
        };
        self.msg_id
    }

    /// Encode and send one envelope, waiting for the socket to be writable
    pub async fn send_message(&mut self, envelope: &Envelope, dest: SocketAddr) -> Result<(), TransportError> {
        let bytes = codec::serialize(envelope)?;
        self.socket.send_to(&bytes, dest).await?;
        self.stats.count_sent(envelope.kind().name());
        Ok(())
    }

    /// Encode and send one envelope without waiting.
    /// Returns false if the datagram was dropped.
    pub fn try_send_message(&mut self, envelope: &Envelope, dest: SocketAddr) -> Result<bool, TransportError> {
        let bytes = codec::serialize(envelope)?;
        let sent = self.try_send_bytes(&bytes, dest)?;
        if sent {
            self.stats.count_sent(envelope.kind().name());
        }
        Ok(sent)
    }

    /// Send a datagram that was serialized once for many receivers, without waiting.
    /// Returns false if the datagram was dropped.
    pub fn try_send_raw(&mut self, bytes: &[u8], dest: SocketAddr) -> Result<bool, TransportError> {
        let sent = self.try_send_bytes(bytes, dest)?;
        if sent {
            self.stats.count_sent(RAW_TYPE);
        }
        Ok(sent)
    }

    fn try_send_bytes(&mut self, bytes: &[u8], dest: SocketAddr) -> Result<bool, TransportError> {
        match self.socket.try_send_to(bytes, dest) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.stats.send_dropped += 1;
                debug!(%dest, "Socket not writable, datagram dropped");
                Ok(false)
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    /// Take the next datagram from the receive buffer
    pub fn recv_message(&mut self) -> Result<(Envelope, SocketAddr), TransportError> {
        let mut buf = std::mem::take(&mut self.buf);
        let result = match self.socket.try_recv_from(&mut buf) {
            Ok((len, src)) => self.accept(&buf[..len], src),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(TransportError::BufferEmpty),
            Err(e) => Err(TransportError::Io(e)),
        };
        self.buf = buf;
        result
    }

    /// Wait up to `deadline` for the next datagram
    async fn recv_until(&mut self, deadline: Instant) -> Option<Result<(Envelope, SocketAddr), TransportError>> {
        let mut buf = std::mem::take(&mut self.buf);
        let result = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
            Err(_) => None,
            Ok(Ok((len, src))) => Some(self.accept(&buf[..len], src)),
            Ok(Err(e)) => Some(Err(TransportError::Io(e))),
        };
        self.buf = buf;
        result
    }

    fn accept(&mut self, bytes: &[u8], src: SocketAddr) -> Result<(Envelope, SocketAddr), TransportError> {
        let envelope =
            codec::deserialize(bytes).map_err(|source| TransportError::Malformed { src, source })?;
        self.stats.count_recv(envelope.kind().name());

        // Servers tell joining robots how long a step is; wait about two
        if let Message::JoinReply { conf } = &envelope.body {
            if conf.step_sec > 0.0 && conf.step_sec.is_finite() {
                self.reply_delay = Duration::from_secs_f64(conf.step_sec * 2.0);
            }
        }

        Ok((envelope, src))
    }

    /// Send `msg` to `dest` and wait for the matching reply, resending
    /// with a growing delay until `policy.retries` sends have gone out.
    ///
    /// Replies with another id or from another endpoint are discarded
    /// without resending. An `Error` reply becomes
    /// [`TransportError::ErrorReply`].
    pub async fn send_recv_message(
        &mut self,
        msg: Message,
        dest: SocketAddr,
        policy: RetryPolicy,
    ) -> Result<Message, TransportError> {
        let started = Instant::now();
        let request = Envelope::with_id(msg, self.next_msg_id());
        let request_id = request.msg_id;

        let mut delay = policy.delay.unwrap_or(self.reply_delay).min(MAX_REPLY_DELAY);
        let mut attempt = 0;
        let result = 'exchange: loop {
            attempt += 1;
            if attempt > 1 {
                self.stats.resends += 1;
            }
            if let Err(e) = self.send_message(&request, dest).await {
                break Err(e);
            }

            let deadline = Instant::now() + delay;
            loop {
                match self.recv_until(deadline).await {
                    None => break,
                    Some(Ok((reply, src))) if src == dest && reply.msg_id == request_id => {
                        break 'exchange match reply.body {
                            Message::Error { result } => Err(TransportError::ErrorReply(result)),
                            body => Ok(body),
                        };
                    }
                    Some(Ok((reply, src))) => {
                        debug!(%src, kind = %reply.kind(), id = ?reply.msg_id, "Discarding unexpected reply");
                    }
                    Some(Err(TransportError::Malformed { src, source })) => {
                        warn!(%src, error = %source, "Discarding malformed reply");
                    }
                    Some(Err(e)) => break 'exchange Err(e),
                }
            }

            if attempt >= policy.retries.max(1) {
                break Err(TransportError::Timeout { attempts: attempt });
            }
            delay = policy.next_delay(delay);
        };

        self.stats.sync_calls += 1;
        self.stats.sync_time += started.elapsed();
        result
    }
}

impl fmt::Debug for NetSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetSocket")
            .field("local_addr", &self.socket.local_addr().ok())
            .field("reply_delay", &self.reply_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_wrap() {
        let mut socket = NetSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        socket.msg_id = MAX_MSG_ID;
        assert_eq!(socket.next_msg_id(), 0);
        assert_eq!(socket.next_msg_id(), 1);
    }

    #[tokio::test]
    async fn empty_buffer_is_reported() {
        let mut socket = NetSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert!(matches!(socket.recv_message(), Err(TransportError::BufferEmpty)));
    }

    #[test]
    fn stats_average_latency() {
        let stats = SocketStats {
            sync_calls: 4,
            sync_time: Duration::from_millis(100),
            ..SocketStats::default()
        };
        assert_eq!(stats.avg_latency(), Duration::from_millis(25));
        assert!(stats.to_string().contains("resends: 0"));
    }

    #[test]
    fn bad_multipliers_keep_the_delay() {
        let base = Duration::from_millis(100);
        let policy = |multiplier| RetryPolicy {
            multiplier,
            ..RetryPolicy::default()
        };
        assert_eq!(policy(f64::NAN).next_delay(base), base);
        assert_eq!(policy(-2.0).next_delay(base), base);
        assert_eq!(policy(0.0).next_delay(base), base);
        assert_eq!(policy(f64::INFINITY).next_delay(base), base);
        assert_eq!(policy(1e300).next_delay(base), MAX_REPLY_DELAY);
        assert_eq!(policy(2.0).next_delay(base), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn unready_socket_drops_instead_of_failing() {
        let mut socket = NetSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let dest = socket.local_addr().unwrap();

        // Straight after bind the socket may not be marked writable yet
        let sent = socket.try_send_raw(&[0x80], dest).unwrap();
        let stats = socket.stats();
        assert_eq!(stats.sent + stats.send_dropped, 1);
        assert_eq!(sent, stats.sent == 1);
    }
}
