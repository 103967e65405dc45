/// Errors that can occur during packet framing and decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header word does not name a packet kind carried by this stream.
    #[error("bad header 0x{header:04X} for {layout} stream")]
    UnknownHeader { header: u32, layout: &'static str },

    /// A packet field does not have the length the layout requires.
    #[error("{field} has {actual} words, layout requires {expected}")]
    LayoutMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The packet kind is not part of this stream layout.
    #[error("{kind} packets are not carried by {layout} streams")]
    NotInLayout {
        kind: &'static str,
        layout: &'static str,
    },

    /// The byte source failed.
    #[error("source error: {0}")]
    Transport(#[from] ocsenc_transport::TransportError),

    /// An I/O error occurred while decoding from a stream.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
