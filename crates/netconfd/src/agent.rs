//! Agent-side client for the server's JSON lines socket.
//!
//! A front-end agent holds one connection per client session. It registers
//! the session with [`AgentClient::hello`], then relays operations with
//! [`AgentClient::rpc`]. Notifications for the session arrive on the same
//! connection; those read while waiting for a reply are queued and handed
//! out by [`AgentClient::recv`].

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

use netconfd_config::SocketEndpoint;
use netconfd_modules::CapabilitySet;

use crate::dispatch::{AgentMessage, Hello, RpcRequest, ServerMessage};

#[cfg(unix)]
use std::os::fd::OwnedFd;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

/// Upper bound on establishing a connection.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by [`AgentClient`].
#[derive(Debug, Error)]
pub enum AgentError {
    /// The TCP host did not resolve.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        /// Endpoint being resolved.
        endpoint: String,
        /// Resolver error.
        #[source]
        source: io::Error,
    },
    /// Connecting to the server failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint being connected to.
        endpoint: String,
        /// Connection error.
        #[source]
        source: io::Error,
    },
    /// Unix sockets are not available on this platform.
    #[error("unix sockets are unsupported for endpoint {0}")]
    UnsupportedUnix(String),
    /// Reading or writing the socket failed.
    #[error("agent connection failed: {0}")]
    Io(#[from] io::Error),
    /// A message could not be encoded.
    #[error("failed to encode agent message: {0}")]
    Encode(#[source] serde_json::Error),
    /// The server sent a line that is not a known message.
    #[error("failed to decode server message {line:?}: {source}")]
    Decode {
        /// Offending line without its terminator.
        line: String,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },
    /// The server closed the connection.
    #[error("server closed the connection")]
    Closed,
}

enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Connection {
    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// One agent connection to the server.
pub struct AgentClient {
    reader: BufReader<Connection>,
    writer: Connection,
    pending: VecDeque<ServerMessage>,
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AgentClient")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl AgentClient {
    /// Connects to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Resolve`] or [`AgentError::Connect`] when the
    /// server cannot be reached.
    pub fn connect(endpoint: &SocketEndpoint) -> Result<Self, AgentError> {
        let writer = connect(endpoint)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self {
            reader,
            writer,
            pending: VecDeque::new(),
        })
    }

    /// Bounds how long [`AgentClient::recv`] blocks. `None` blocks forever.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Io`] when the socket rejects the timeout.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), AgentError> {
        self.writer.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Writes one message line.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Encode`] or [`AgentError::Io`].
    pub fn send(&mut self, message: &AgentMessage) -> Result<(), AgentError> {
        serde_json::to_writer(&mut self.writer, message).map_err(AgentError::Encode)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Next server message, queued notifications first.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Closed`] at end of stream, [`AgentError::Io`]
    /// on read failure or timeout and [`AgentError::Decode`] for a line
    /// that does not parse.
    pub fn recv(&mut self) -> Result<ServerMessage, AgentError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(message);
        }
        self.read_message()
    }

    /// Registers the session this connection fronts and returns the
    /// server's answer: `registered` or `error`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when the exchange fails at the socket level.
    pub fn hello(
        &mut self,
        session_id: &str,
        username: &str,
        capabilities: CapabilitySet,
    ) -> Result<ServerMessage, AgentError> {
        self.send(&AgentMessage::Hello(Hello {
            session_id: session_id.to_owned(),
            username: username.to_owned(),
            capabilities,
        }))?;
        self.answer()
    }

    /// Asks for the server's capability list.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when the exchange fails at the socket level.
    pub fn get_capabilities(&mut self) -> Result<ServerMessage, AgentError> {
        self.send(&AgentMessage::GetCapabilities)?;
        self.answer()
    }

    /// Sends one operation and waits for its reply or a protocol error.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when the exchange fails at the socket level.
    pub fn rpc(&mut self, request: RpcRequest) -> Result<ServerMessage, AgentError> {
        self.send(&AgentMessage::Rpc(request))?;
        self.answer()
    }

    fn answer(&mut self) -> Result<ServerMessage, AgentError> {
        loop {
            match self.read_message()? {
                notification @ ServerMessage::Notification { .. } => {
                    self.pending.push_back(notification);
                }
                message => return Ok(message),
            }
        }
    }

    fn read_message(&mut self) -> Result<ServerMessage, AgentError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(AgentError::Closed);
        }
        let trimmed = line.trim_end();
        serde_json::from_str(trimmed).map_err(|source| AgentError::Decode {
            line: trimmed.to_owned(),
            source,
        })
    }
}

fn connect(endpoint: &SocketEndpoint) -> Result<Connection, AgentError> {
    match endpoint {
        SocketEndpoint::Tcp { host, port } => {
            let address = resolve_tcp_address(host, *port).map_err(|source| {
                AgentError::Resolve {
                    endpoint: endpoint.to_string(),
                    source,
                }
            })?;
            TcpStream::connect_timeout(&address, CONNECTION_TIMEOUT)
                .map(Connection::Tcp)
                .map_err(|source| AgentError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })
        }
        SocketEndpoint::Unix { path } => {
            #[cfg(unix)]
            {
                connect_unix(path.as_str()).map_err(|source| AgentError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })
            }

            #[cfg(not(unix))]
            {
                let _ = path;
                Err(AgentError::UnsupportedUnix(endpoint.to_string()))
            }
        }
    }
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

#[cfg(unix)]
fn connect_unix(path: &str) -> io::Result<Connection> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, CONNECTION_TIMEOUT)?;
    Ok(Connection::Unix(UnixStream::from(OwnedFd::from(socket))))
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn rpc_queues_interleaved_notifications() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("address").port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = String::new();
            BufReader::new(stream.try_clone().expect("clone"))
                .read_line(&mut request)
                .expect("read request");
            stream
                .write_all(concat!(
                    r#"{"kind":"notification","session_id":"1","event_time":"2026-01-01T00:00:00Z","stream":"NETCONF","event":"tick","body":null}"#,
                    "\n",
                    r#"{"kind":"reply","session_id":"1","message_id":"7","reply":{"status":"ok"}}"#,
                    "\n"
                ).as_bytes())
                .expect("write");
            request
        });

        let mut client =
            AgentClient::connect(&SocketEndpoint::tcp("127.0.0.1", port)).expect("connect");
        let reply = client
            .rpc(RpcRequest::new("1", "get").with_message_id("7"))
            .expect("reply");
        let queued = client.recv().expect("queued notification");
        let request = server.join().expect("server thread");

        assert!(matches!(reply, ServerMessage::Reply { message_id: Some(ref id), .. } if id == "7"));
        assert!(matches!(queued, ServerMessage::Notification { ref event, .. } if event == "tick"));
        assert!(request.contains(r#""operation":"get""#));
    }

    #[test]
    fn end_of_stream_is_reported_as_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("address").port();
        let server = thread::spawn(move || drop(listener.accept().expect("accept")));

        let mut client =
            AgentClient::connect(&SocketEndpoint::tcp("127.0.0.1", port)).expect("connect");
        server.join().expect("server thread");

        assert!(matches!(client.recv(), Err(AgentError::Closed)));
    }

    #[cfg(unix)]
    #[test]
    fn connects_over_a_unix_socket() {
        use std::os::unix::net::UnixListener;

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir
            .path()
            .join("agent.sock")
            .to_str()
            .expect("utf-8 path")
            .to_owned();
        let listener = UnixListener::bind(&path).expect("bind");
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream
                .write_all(
                    concat!(
                        r#"{"kind":"reply","session_id":"1","message_id":"3","reply":{"status":"ok"}}"#,
                        "\n"
                    )
                    .as_bytes(),
                )
                .expect("write");
        });

        let mut client = AgentClient::connect(&SocketEndpoint::unix(path)).expect("connect");
        let reply = client.recv().expect("reply");
        server.join().expect("server thread");

        assert!(matches!(reply, ServerMessage::Reply { message_id: Some(ref id), .. } if id == "3"));
    }
}
