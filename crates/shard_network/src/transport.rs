//! TCP transport — stream negotiation and the stream handle.
//!
//! Every stream is a fresh TCP connection. Before any payload flows the two
//! sides exchange newline-terminated preamble lines:
//!
//! 1. listener → dialer: the listener's peer ID
//! 2. dialer → listener: the dialer's peer ID, then the protocol ID
//! 3. listener → dialer: the protocol ID echoed back, or `na` if no handler
//!    is registered for it
//!
//! After that the connection carries raw payload bytes; end-of-stream marks
//! the end of a message in each direction.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::error::NetworkError;
use crate::identity::PeerId;
use crate::router::{ProtocolRouter, StreamHandler};

/// Longest preamble line accepted, excluding the newline.
pub const MAX_LINE_LEN: usize = 1024;

/// Pause after a failed accept (e.g. out of file descriptors) before the
/// next attempt.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Answer sent in place of the protocol ID when no handler matches.
const NOT_AVAILABLE: &str = "na";

/// A negotiated stream speaking one sub-protocol with one remote peer.
pub struct Stream {
    io: BufReader<TcpStream>,
    protocol: String,
    remote_peer: PeerId,
    remote_addr: SocketAddr,
}

impl Stream {
    /// The sub-protocol negotiated for this stream.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The peer on the other end.
    pub fn remote_peer(&self) -> &PeerId {
        &self.remote_peer
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Write the whole buffer and flush it to the socket.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.io.write_all(buf).await?;
        self.io.flush().await
    }

    /// Read until the remote side finishes writing.
    pub async fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.io.read_to_end(&mut out).await?;
        Ok(out)
    }

    /// Finish our side of the stream. The remote sees end-of-stream; reading
    /// from it remains possible.
    pub async fn close_write(&mut self) -> io::Result<()> {
        self.io.shutdown().await
    }

    /// Arm an abortive close: once the stream is dropped the connection is
    /// torn down with a RST instead of a FIN.
    pub fn reset(&mut self) {
        if let Err(e) = abort_on_drop(self.io.get_ref()) {
            debug!("Failed to arm reset for {}: {e}", self.remote_addr);
        }
    }
}

// Zero linger makes close send RST; a plain shutdown would send FIN and the
// remote would read a clean end-of-stream instead of a reset.
#[allow(deprecated)]
fn abort_on_drop(tcp: &TcpStream) -> io::Result<()> {
    tcp.set_linger(Some(Duration::ZERO))
}

// ---------------------------------------------------------------------------
// Preamble lines
// ---------------------------------------------------------------------------

async fn read_line<R>(reader: &mut R) -> Result<String, NetworkError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    (&mut *reader)
        .take(MAX_LINE_LEN as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;

    if buf.last() != Some(&b'\n') {
        let reason = if buf.len() > MAX_LINE_LEN {
            format!("preamble line longer than {MAX_LINE_LEN} bytes")
        } else {
            "stream ended during negotiation".to_string()
        };
        return Err(NetworkError::Negotiation(reason));
    }
    buf.pop();

    String::from_utf8(buf)
        .map_err(|_| NetworkError::Negotiation("preamble line is not valid UTF-8".to_string()))
}

async fn write_line<W>(writer: &mut W, line: &str) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(format!("{line}\n").as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Dialing and accepting
// ---------------------------------------------------------------------------

/// Open a stream to `expected` at `addr` and negotiate `protocol`.
pub(crate) async fn dial(
    addr: SocketAddr,
    local: &PeerId,
    expected: &PeerId,
    protocol: &str,
) -> Result<Stream, NetworkError> {
    let tcp = TcpStream::connect(addr).await?;
    tcp.set_nodelay(true)?;
    let mut io = BufReader::new(tcp);

    let announced = PeerId::from_string(read_line(&mut io).await?);
    if &announced != expected {
        return Err(NetworkError::PeerIdMismatch {
            expected: expected.to_string(),
            actual: announced.to_string(),
        });
    }

    write_line(&mut io, local.as_str()).await?;
    write_line(&mut io, protocol).await?;

    let answer = read_line(&mut io).await?;
    if answer == protocol {
        debug!("Negotiated {protocol} with {} at {addr}", expected.short());
        Ok(Stream {
            io,
            protocol: answer,
            remote_peer: announced,
            remote_addr: addr,
        })
    } else if answer == NOT_AVAILABLE {
        Err(NetworkError::ProtocolNotSupported {
            protocol: protocol.to_string(),
            peer: expected.to_string(),
        })
    } else {
        Err(NetworkError::Negotiation(format!(
            "unexpected protocol answer {answer:?}"
        )))
    }
}

/// Run the listener side of negotiation on a freshly accepted connection.
async fn accept(
    tcp: TcpStream,
    remote_addr: SocketAddr,
    local: &PeerId,
    router: &RwLock<ProtocolRouter>,
) -> Result<(Stream, StreamHandler), NetworkError> {
    tcp.set_nodelay(true)?;
    let mut io = BufReader::new(tcp);

    write_line(&mut io, local.as_str()).await?;
    let remote_peer = PeerId::from_string(read_line(&mut io).await?);
    let protocol = read_line(&mut io).await?;

    let handler = router.read().await.handler(&protocol);
    match handler {
        Some(handler) => {
            write_line(&mut io, &protocol).await?;
            Ok((
                Stream {
                    io,
                    protocol,
                    remote_peer,
                    remote_addr,
                },
                handler,
            ))
        }
        None => {
            write_line(&mut io, NOT_AVAILABLE).await?;
            let _ = io.shutdown().await;
            Err(NetworkError::ProtocolNotSupported {
                protocol,
                peer: local.to_string(),
            })
        }
    }
}

/// Source of inbound TCP connections.
#[async_trait]
pub(crate) trait Listener: Send + Sync + 'static {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Listener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Accept connections forever, handing each negotiated stream to its
/// protocol handler on a task of its own.
pub(crate) async fn accept_loop<L: Listener>(
    listener: L,
    local: PeerId,
    router: Arc<RwLock<ProtocolRouter>>,
) {
    loop {
        match listener.accept().await {
            Ok((tcp, remote_addr)) => {
                let local = local.clone();
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    match accept(tcp, remote_addr, &local, &router).await {
                        Ok((stream, handler)) => {
                            debug!(
                                "Inbound {} stream from {} at {remote_addr}",
                                stream.protocol(),
                                stream.remote_peer().short()
                            );
                            handler(stream).await;
                        }
                        Err(e) => debug!("Inbound negotiation from {remote_addr} failed: {e}"),
                    }
                });
            }
            Err(e) => {
                error!("TCP accept failed: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use futures::FutureExt;

    const TEST_PROTOCOL: &str = "/test/1";

    /// Start an accept loop on an ephemeral port with one handler that
    /// replies with whatever it read, reversed.
    async fn spawn_listener(local: PeerId, reset: bool) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut router = ProtocolRouter::new();
        let handler: StreamHandler = Arc::new(move |mut stream: Stream| {
            async move {
                let mut data = stream.read_to_end().await.unwrap_or_default();
                if reset {
                    stream.reset();
                    return;
                }
                data.reverse();
                let _ = stream.write_all(&data).await;
                let _ = stream.close_write().await;
            }
            .boxed()
        });
        router.register(TEST_PROTOCOL, handler);

        tokio::spawn(accept_loop(listener, local, Arc::new(RwLock::new(router))));
        addr
    }

    #[tokio::test]
    async fn test_negotiate_and_exchange() {
        let server_id = PeerId::from_string("server");
        let addr = spawn_listener(server_id.clone(), false).await;

        let client_id = PeerId::from_string("client");
        let mut stream = dial(addr, &client_id, &server_id, TEST_PROTOCOL)
            .await
            .unwrap();
        assert_eq!(stream.protocol(), TEST_PROTOCOL);
        assert_eq!(stream.remote_peer(), &server_id);
        assert_eq!(stream.remote_addr(), addr);

        stream.write_all(b"abc").await.unwrap();
        stream.close_write().await.unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), b"cba");
    }

    #[tokio::test]
    async fn test_unsupported_protocol() {
        let server_id = PeerId::from_string("server");
        let addr = spawn_listener(server_id.clone(), false).await;

        let result = dial(addr, &PeerId::from_string("client"), &server_id, "/other/1").await;
        match result {
            Err(NetworkError::ProtocolNotSupported { protocol, peer }) => {
                assert_eq!(protocol, "/other/1");
                assert_eq!(peer, "server");
            }
            other => panic!("Expected ProtocolNotSupported, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_peer_id_mismatch() {
        let addr = spawn_listener(PeerId::from_string("actual"), false).await;

        let result = dial(
            addr,
            &PeerId::from_string("client"),
            &PeerId::from_string("expected"),
            TEST_PROTOCOL,
        )
        .await;
        match result {
            Err(NetworkError::PeerIdMismatch { expected, actual }) => {
                assert_eq!(expected, "expected");
                assert_eq!(actual, "actual");
            }
            other => panic!("Expected PeerIdMismatch, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_reset_is_observed_as_connection_reset() {
        let server_id = PeerId::from_string("server");
        let addr = spawn_listener(server_id.clone(), true).await;

        let mut stream = dial(addr, &PeerId::from_string("client"), &server_id, TEST_PROTOCOL)
            .await
            .unwrap();
        stream.write_all(b"ping").await.unwrap();
        stream.close_write().await.unwrap();

        let err = stream.read_to_end().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = dial(
            addr,
            &PeerId::from_string("client"),
            &PeerId::from_string("gone"),
            TEST_PROTOCOL,
        )
        .await;
        assert!(matches!(result, Err(NetworkError::Io(_))));
    }

    #[tokio::test]
    async fn test_read_line() {
        let mut input: &[u8] = b"/shardprotocol/1\nrest";
        assert_eq!(read_line(&mut input).await.unwrap(), "/shardprotocol/1");
        assert_eq!(input, b"rest");
    }

    #[tokio::test]
    async fn test_read_line_rejects_truncated_input() {
        let mut input: &[u8] = b"no newline";
        assert!(matches!(
            read_line(&mut input).await,
            Err(NetworkError::Negotiation(_))
        ));
    }

    #[tokio::test]
    async fn test_read_line_rejects_overlong_line() {
        let long = vec![b'a'; MAX_LINE_LEN + 10];
        let mut input: &[u8] = &long;
        match read_line(&mut input).await {
            Err(NetworkError::Negotiation(reason)) => assert!(reason.contains("longer")),
            other => panic!("Expected Negotiation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_line_accepts_max_length() {
        let mut line = vec![b'a'; MAX_LINE_LEN];
        line.push(b'\n');
        let mut input: &[u8] = &line;
        assert_eq!(read_line(&mut input).await.unwrap().len(), MAX_LINE_LEN);
    }

    /// A listener whose every accept fails, counting the attempts.
    struct FailingListener(Arc<AtomicUsize>);

    #[async_trait]
    impl Listener for FailingListener {
        async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::other("too many open files"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_errors_back_off() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(accept_loop(
            FailingListener(Arc::clone(&attempts)),
            PeerId::from_string("server"),
            Arc::new(RwLock::new(ProtocolRouter::new())),
        ));

        tokio::time::sleep(ACCEPT_BACKOFF * 3 + ACCEPT_BACKOFF / 2).await;
        task.abort();

        let count = attempts.load(Ordering::SeqCst);
        assert!((3..=5).contains(&count), "{count} accept attempts");
    }
}
