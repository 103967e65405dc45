use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, trace};

use crate::cancel::CancelToken;
use crate::error::{Result, TransportError};
use crate::traits::ByteSource;

/// Default receive buffer size for one datagram.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8196;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for a UDP datagram source.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Local address to bind. Default: all interfaces.
    pub bind_addr: IpAddr,
    /// Local port the readout board sends to.
    pub port: u16,
    /// Maximum datagram size accepted per read.
    pub read_chunk_size: usize,
    /// Give up a single `read` after this long without data.
    pub timeout: Duration,
    /// Granularity at which cancellation is observed while waiting.
    pub poll_interval: Duration,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Datagram source bound to a fixed local port.
pub struct UdpSource {
    socket: UdpSocket,
    config: UdpConfig,
    scratch: Vec<u8>,
}

impl UdpSource {
    /// Bind the socket described by `config`.
    pub fn bind(config: UdpConfig) -> Result<Self> {
        let addr = SocketAddr::new(config.bind_addr, config.port);
        let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;

        let slice = config.poll_interval.max(MIN_POLL_INTERVAL);
        socket.set_read_timeout(Some(slice))?;

        info!(addr = %socket.local_addr()?, "listening for encoder datagrams");

        Ok(Self {
            scratch: vec![0u8; config.read_chunk_size.max(1)],
            socket,
            config,
        })
    }

    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Into::into)
    }

    /// Current source configuration.
    pub fn config(&self) -> &UdpConfig {
        &self.config
    }
}

impl ByteSource for UdpSource {
    fn read(&mut self, cancel: &CancelToken) -> Result<Option<Bytes>> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            if cancel.is_cancelled() {
                debug!("read cancelled");
                return Ok(None);
            }

            match self.socket.recv(&mut self.scratch) {
                Ok(n) => {
                    trace!(size = n, "datagram received");
                    return Ok(Some(Bytes::copy_from_slice(&self.scratch[..n])));
                }
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if Instant::now() >= deadline {
                        trace!("no datagram before timeout");
                        return Ok(None);
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

impl std::fmt::Debug for UdpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpSource")
            .field("local_addr", &self.socket.local_addr().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> UdpConfig {
        UdpConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            ..UdpConfig::default()
        }
    }

    #[test]
    fn receives_datagram() {
        let mut source = UdpSource::bind(loopback_config()).unwrap();
        let target = source.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"\xaf\x1e\x00\x00", target).unwrap();

        let bytes = source.read(&CancelToken::new()).unwrap().unwrap();
        assert_eq!(bytes.as_ref(), b"\xaf\x1e\x00\x00");
    }

    #[test]
    fn timeout_returns_none() {
        let mut source = UdpSource::bind(loopback_config()).unwrap();
        let start = Instant::now();
        let read = source.read(&CancelToken::new()).unwrap();
        assert!(read.is_none());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn cancelled_read_returns_promptly() {
        let config = UdpConfig {
            timeout: Duration::from_secs(30),
            ..loopback_config()
        };
        let mut source = UdpSource::bind(config).unwrap();
        let cancel = CancelToken::new();
        let remote = cancel.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let start = Instant::now();
        assert!(source.read(&cancel).unwrap().is_none());
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn bind_conflict_is_reported() {
        let first = UdpSource::bind(loopback_config()).unwrap();
        let taken = first.local_addr().unwrap();

        let err = UdpSource::bind(UdpConfig {
            port: taken.port(),
            ..loopback_config()
        })
        .unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }
}
