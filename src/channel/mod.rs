//! The transport underneath the MySQL client protocol: a blocking TCP
//! socket with a read loop bounded by a timeout. The bounded-timeout read
//! is what lets the stream consumer honour cancellation without an async
//! runtime.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub trait SocketChannel {
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;
    fn read_exact_with_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    pub fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::Connectivity(format!("resolve {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| Error::Connectivity(format!("no address for {host}:{port}")))?;
        let stream = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|e| Error::Connectivity(format!("connect to {host}:{port}: {e}")))?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }
}

impl SocketChannel for TcpChannel {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf)?;
        Ok(())
    }

    /// Reads `buf.len()` bytes, polling in small increments so the caller
    /// can interleave a `CancellationToken` check between reads.
    fn read_exact_with_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        self.stream.set_read_timeout(Some(Duration::from_millis(200)))?;
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(Error::Connectivity("connection closed by peer".into())),
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    if Instant::now() >= deadline {
                        return Err(Error::Timeout("read timed out".into()));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stream.shutdown(Shutdown::Both).ok();
        Ok(())
    }
}
