use std::net::SocketAddr;
use std::path::PathBuf;

/// Errors that can occur while reading from encoder hardware.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the datagram socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to open or map a device file.
    #[error("failed to open device {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No UIO device was found under the expected sysfs directory.
    #[error("device not found under {0} (check firmware and device tree)")]
    DeviceNotFound(PathBuf),

    /// Another process holds the device lock.
    #[error("device locked: {0}")]
    Locked(PathBuf),

    /// An I/O error occurred on the source.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The source has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
