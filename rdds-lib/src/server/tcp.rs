//! WHOIS TCP listener.
//!
//! ```text
//! TcpListener (port 43)
//!     |
//!     v
//! connection cap (semaphore, refuse when full)
//!     |
//!     v
//! spawned task per connection
//!     +-- read one line (idle timeout, max message size)
//!     +-- WhoisResponder::respond
//!     +-- write reply, shut down the write half
//! ```
//!
//! One query per connection. The client sees end of reply as end of stream.

use crate::config::WhoisConfig;
use crate::error::RddsError;
use crate::protocols::whois::{WhoisResponder, UNKNOWN_QUERY};
use crate::server::wait_for_shutdown;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Result of reading a query line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryLine {
    /// Line with CR/LF stripped, invalid UTF-8 replaced
    Line(String),
    /// More than the allowed bytes arrived without a line break
    TooLong,
    /// Peer closed before sending anything
    Closed,
}

/// Read a single query line of at most `max` bytes, terminator excluded.
///
/// A final line without a terminator is accepted when the peer half-closes.
pub async fn read_query_line<R>(reader: &mut R, max: usize) -> io::Result<QueryLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(256);
    let limit = (max as u64).saturating_add(2);
    let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;

    if n == 0 {
        return Ok(QueryLine::Closed);
    }

    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    if buf.len() > max {
        return Ok(QueryLine::TooLong);
    }

    Ok(QueryLine::Line(String::from_utf8_lossy(&buf).into_owned()))
}

/// A bound WHOIS listener.
pub struct WhoisServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    responder: WhoisResponder,
    config: Arc<WhoisConfig>,
    connections: Arc<Semaphore>,
}

impl WhoisServer {
    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// `RddsError::Bind` when the socket cannot be bound.
    pub async fn bind(config: &WhoisConfig, responder: WhoisResponder) -> Result<Self, RddsError> {
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|e| RddsError::bind("whois", config.bind, e))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            responder,
            config: Arc::new(config.clone()),
            connections: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.config
            .max_connections
            .saturating_sub(self.connections.available_permits())
    }

    /// Accept connections until shutdown is requested.
    ///
    /// Connections already accepted finish on their own tasks.
    pub async fn run_until_shutdown(self, shutdown: watch::Receiver<bool>) -> Result<(), RddsError> {
        info!(addr = %self.local_addr, "WHOIS server listening");

        let shutdown = wait_for_shutdown(shutdown);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.handle_connection(stream, peer),
                        Err(e) if is_fatal_error(&e) => {
                            error!(error = %e, "fatal WHOIS accept error");
                            return Err(e.into());
                        }
                        Err(e) => debug!(error = %e, "non-fatal accept error"),
                    }
                }
                _ = &mut shutdown => {
                    info!("WHOIS server stopped");
                    break;
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
            debug!(peer = %peer, "connection refused: limit reached");
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
        }

        let responder = self.responder.clone();
        let config = Arc::clone(&self.config);

        tokio::spawn(async move {
            let _permit = permit;
            debug!(peer = %peer, "connection accepted");
            if let Err(e) = serve_connection(stream, peer, responder, &config).await {
                debug!(peer = %peer, error = %e, "connection error");
            }
            debug!(peer = %peer, "connection closed");
        });
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    responder: WhoisResponder,
    config: &WhoisConfig,
) -> io::Result<()> {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);

    let line = match timeout(
        config.idle_timeout,
        read_query_line(&mut reader, config.max_message_size),
    )
    .await
    {
        Ok(line) => line?,
        Err(_) => {
            debug!(peer = %peer, "idle timeout waiting for query");
            return Ok(());
        }
    };

    let line = match line {
        QueryLine::Line(line) => line,
        QueryLine::TooLong => {
            debug!(peer = %peer, max = config.max_message_size, "query exceeds message size limit");
            return Ok(());
        }
        QueryLine::Closed => return Ok(()),
    };

    let reply = respond_isolated(peer, async move { responder.respond(peer.ip(), &line).await }).await;

    write_with_timeout(&mut write_half, reply.as_bytes(), config.idle_timeout).await?;
    write_half.shutdown().await
}

/// Run the responder on its own task so a panic still produces a reply.
async fn respond_isolated<F>(peer: SocketAddr, respond: F) -> String
where
    F: Future<Output = String> + Send + 'static,
{
    match tokio::spawn(respond).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(peer = %peer, error = %e, "WHOIS responder failed");
            UNKNOWN_QUERY.to_string()
        }
    }
}

async fn write_with_timeout<W>(writer: &mut W, bytes: &[u8], limit: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match timeout(limit, writer.write_all(bytes)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "reply write timed out")),
    }
}

fn is_fatal_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::AddrInUse
    )
}
