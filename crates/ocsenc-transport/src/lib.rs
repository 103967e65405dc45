//! Byte sources for encoder DAQ hardware.
//!
//! Provides the device-reader layer shared by every encoder agent:
//! - UDP datagrams from BeagleBone-based readout boards
//! - Memory-mapped generic-UIO FIFO registers (KR260 stimulator readout)
//! - Recorded captures replayed offline
//!
//! This is the lowest layer of ocsenc. The packet framer builds on the
//! [`ByteSource`] trait provided here.

pub mod cancel;
pub mod error;
pub mod replay;
pub mod traits;
pub mod udp;

#[cfg(unix)]
pub mod lock;
#[cfg(unix)]
pub mod uio;

pub use cancel::CancelToken;
pub use error::{Result, TransportError};
pub use replay::ReplaySource;
pub use traits::ByteSource;
pub use udp::{UdpConfig, UdpSource, DEFAULT_READ_CHUNK_SIZE};

#[cfg(unix)]
pub use lock::{DeviceLock, DEFAULT_LOCK_PATH};
#[cfg(unix)]
pub use uio::{default_sysfs_base, find_uio_device, FifoStatus, RegisterBlock, UioFifo, UioMap};
