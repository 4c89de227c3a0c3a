use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, error};

use common::err::proxy_error::ProxyError;
use common::err::PResult;

use crate::buffer::PacketBuf;
use crate::PACKET_HEADER_SIZE;

/// Nonblocking byte stream towards one backend server. Split out as a trait
/// so the protocol logic can be driven against scripted streams.
pub trait BackendStream: Read + Write + fmt::Debug + Send {
    fn raw_fd(&self) -> RawFd;

    /// Pending SO_ERROR on the socket, if any.
    fn take_socket_error(&mut self) -> Option<io::Error> {
        None
    }
}

#[derive(Debug)]
pub struct TcpBackendStream {
    stream: TcpStream,
}

impl Read for TcpBackendStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpBackendStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl BackendStream for TcpBackendStream {
    fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn take_socket_error(&mut self) -> Option<io::Error> {
        self.stream.take_error().ok().flatten()
    }
}

fn connect_in_progress(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || err.raw_os_error() == Some(libc::EINPROGRESS)
}

/// Open a nonblocking socket and start the connect. Returns the stream and
/// whether the connect is still in progress (EINPROGRESS) rather than done.
pub fn connect_non_blocking(host: &str, port: u16) -> PResult<(TcpBackendStream, bool)> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ProxyError::Connection(format!("Cannot resolve host [{}]:{}", host, port)))?;

    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;

    let pending = match socket.connect(&SockAddr::from(addr)) {
        Ok(()) => false,
        Err(err) if connect_in_progress(&err) => true,
        Err(err) => {
            return Err(ProxyError::Connection(format!(
                "Failed to connect backend server [{}]:{} due to: {}",
                host, port, err
            )));
        }
    };

    debug!("Connected to backend server [{}]:{}, pending: {}", host, port, pending);
    let stream: TcpStream = socket.into();
    Ok((TcpBackendStream { stream }, pending))
}

/// One backend socket plus the write queue a partial nonblocking write
/// leaves behind.
#[derive(Debug)]
pub struct BackendChannel {
    stream: Option<Box<dyn BackendStream>>,
    writeq: PacketBuf,
}

impl BackendChannel {
    pub fn new(stream: Box<dyn BackendStream>) -> Self {
        BackendChannel {
            stream: Some(stream),
            writeq: PacketBuf::new(),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.stream.as_ref().map(|s| s.raw_fd()).unwrap_or(-1)
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Drain everything currently readable. Returns the buffered bytes and
    /// whether the peer closed its end.
    pub fn read_available(&mut self) -> io::Result<(PacketBuf, bool)> {
        let mut out = PacketBuf::new();
        let mut closed = false;

        let Some(stream) = self.stream.as_mut() else {
            return Ok((out, true));
        };

        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => out.append_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        Ok((out, closed))
    }

    /// Queue the buffer and attempt to flush it. Returns false on a hard
    /// transport error; a short write is not an error, the rest stays queued
    /// for the next writable edge.
    pub fn write_buf(&mut self, buf: PacketBuf) -> bool {
        self.writeq.append(buf);
        self.drain_writeq()
    }

    pub fn drain_writeq(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return self.writeq.is_empty();
        };

        while !self.writeq.is_empty() {
            let Some(chunk) = self.writeq.first_chunk() else {
                break;
            };
            match stream.write(chunk) {
                Ok(0) => return false,
                Ok(n) => self.writeq.consume(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return true,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("Write to backend failed: {}", err);
                    return false;
                }
            }
        }
        true
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.writeq.is_empty()
    }

    /// Command byte of the packet at the head of the write queue.
    pub fn writeq_command(&self) -> Option<u8> {
        self.writeq.peek_u8(PACKET_HEADER_SIZE)
    }

    pub fn clear_writeq(&mut self) {
        self.writeq.clear();
    }

    pub fn take_socket_error(&mut self) -> Option<io::Error> {
        self.stream.as_mut().and_then(|s| s.take_socket_error())
    }

    pub fn close(&mut self) {
        self.stream = None;
        self.writeq.clear();
    }
}
