//! Encoder packet decoding and acquisition agents.
//!
//! Reads the packet streams of the HWP, wiregrid and stimulator encoder
//! readout boards, reconstructs sample times and publishes them on feeds.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte sources (UDP datagrams, UIO FIFO registers)
//! - [`frame`]: magic-header framing and payload decoding
//! - [`agent`]: clock reconstruction, feed publishing, acquisition loops

/// Re-export transport types.
pub mod transport {
    pub use ocsenc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ocsenc_frame::*;
}

/// Re-export agent types.
pub mod agent {
    pub use ocsenc_agent::*;
}
