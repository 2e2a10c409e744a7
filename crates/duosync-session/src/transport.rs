//! Line-oriented TCP transport.
//!
//! Every connection, verification or data, is a [`LineStream`]: a configured
//! TCP stream split into a buffered line reader and a line writer, plus a
//! [`TransportCloser`] that can shut the socket down from any task.

use std::io;
use std::net::{IpAddr, Shutdown, SocketAddr};

use socket2::{SockRef, Socket};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};

use crate::config::SessionConfig;

/// Longest line accepted from a peer, excluding the newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const LISTEN_BACKLOG: u32 = 16;

/// Bind a listening endpoint with address reuse enabled.
pub fn bind_listener(address: IpAddr, port: u16) -> io::Result<TcpListener> {
    let addr = SocketAddr::new(address, port);
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Open and configure a connection to `address:port`.
///
/// Buffer sizes are set before connecting so the advertised receive window
/// already reflects them. Each resolved address is tried in turn.
pub async fn connect(address: &str, port: u16, config: &SessionConfig) -> io::Result<LineStream> {
    let mut last_err = None;
    for addr in lookup_host((address, port)).await? {
        match connect_addr(addr, config.socket_buffer_size).await {
            Ok(stream) => return LineStream::new(stream, config),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no addresses for {address}:{port}"),
        )
    }))
}

async fn connect_addr(addr: SocketAddr, buffer_size: usize) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    let size = u32::try_from(buffer_size).unwrap_or(u32::MAX);
    socket.set_send_buffer_size(size)?;
    socket.set_recv_buffer_size(size)?;
    socket.set_keepalive(true)?;
    socket.connect(addr).await
}

/// Keep-alive on, no coalescing delay, fixed buffer sizes.
pub fn configure_stream(stream: &TcpStream, buffer_size: usize) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let socket = SockRef::from(stream);
    socket.set_keepalive(true)?;
    socket.set_send_buffer_size(buffer_size)?;
    socket.set_recv_buffer_size(buffer_size)?;
    Ok(())
}

/// A configured TCP connection carrying newline-delimited text.
pub struct LineStream {
    reader: LineReader,
    writer: LineWriter,
    closer: TransportCloser,
    local_addr: SocketAddr,
}

impl LineStream {
    /// Configure the stream and wrap it in line adapters.
    pub fn new(stream: TcpStream, config: &SessionConfig) -> io::Result<Self> {
        configure_stream(&stream, config.socket_buffer_size)?;
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let closer = TransportCloser {
            socket: SockRef::from(&stream).try_clone()?,
            peer_addr,
        };
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: LineReader::new(read),
            writer: LineWriter { inner: write },
            closer,
            local_addr,
        })
    }

    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.reader.read_line().await
    }

    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_line(line).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.closer.peer_addr
    }

    /// Split into independently owned halves.
    pub fn into_parts(self) -> (LineReader, LineWriter, TransportCloser) {
        (self.reader, self.writer, self.closer)
    }

    /// Shut down both directions and release the socket.
    pub fn close(self) {
        self.closer.close();
    }
}

/// Read half: yields one line at a time with the terminator stripped.
pub struct LineReader {
    inner: BufReader<OwnedReadHalf>,
}

impl LineReader {
    fn new(read: OwnedReadHalf) -> Self {
        Self {
            inner: BufReader::new(read),
        }
    }

    /// Read the next line.
    ///
    /// Returns `None` at end of stream. Invalid UTF-8 or a line longer than
    /// [`MAX_LINE_BYTES`] is an `InvalidData` error.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let limit = MAX_LINE_BYTES as u64 + 1;
        let mut line = String::new();
        let read = (&mut self.inner).take(limit).read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        if !line.ends_with('\n') && read as u64 >= limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {MAX_LINE_BYTES} bytes"),
            ));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }
}

/// Write half: each call writes and flushes exactly one line.
pub struct LineWriter {
    inner: OwnedWriteHalf,
}

impl LineWriter {
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.inner.write_all(&buf).await?;
        self.inner.flush().await
    }
}

/// Handle that shuts a connection down independently of its halves.
///
/// Shutting down unblocks a read pending in another task, which then sees
/// end of stream or an error.
pub struct TransportCloser {
    socket: Socket,
    peer_addr: SocketAddr,
}

impl TransportCloser {
    /// Shut down input and output, then close. Failures are only logged.
    pub fn close(self) {
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            tracing::debug!("shutdown of connection to {} failed: {}", self.peer_addr, e);
        }
        tracing::debug!("closed connection to {}", self.peer_addr);
    }
}
