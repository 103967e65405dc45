//! Packet framing and payload decoding for encoder readout streams.
//!
//! Readout boards push fixed-size packets identified by a 4-byte
//! little-endian magic header:
//! - `0x1EAF` encoder counter samples (clock, overflow, index triples)
//! - `0xCAFE` IRIG-B time reference
//! - `0xE12A` IRIG synchronization error
//! - `0x1234` readout timeout
//! - `0xBAD0` / `0xF00D` gripper encoder and limit-switch samples
//!
//! Packet sizes are fixed per [`StreamLayout`]; there is no length field, so
//! an unrecognized header discards the buffered bytes and the stream
//! resynchronizes on the next read.
//!
//! Two front ends share the codec:
//! - [`Framer`] / [`PacketReader`]: blocking, driven by a
//!   [`ocsenc_transport::ByteSource`]; the acquisition agents and the CLI
//!   use these.
//! - `PacketCodec` (feature `async`): a `tokio_util::codec` decoder and
//!   encoder for embedding the packet stream in a tokio application, e.g.
//!   `FramedRead::new(socket_reader, PacketCodec::new(layout))`. It is
//!   library surface only; nothing in this workspace runs a tokio runtime.

pub mod codec;
pub mod error;
pub mod irig;
pub mod kind;
pub mod layout;
pub mod packet;
pub mod reader;
pub mod tsu;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    decode_packet, encode_packet, peek_header, FrameConfig, DEFAULT_MAX_BUFFER, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use irig::{de_irig, en_irig, IrigTime, RunTime};
pub use kind::{ENCODER, ERROR, GRIPPER_ENCODER, GRIPPER_LIMIT, IRIG, TIMEOUT};
pub use layout::StreamLayout;
pub use packet::{
    combine_ticks, CounterPacket, IrigPacket, LimitPacket, Packet, TimeoutPacket, TimeoutSource,
};
pub use reader::{Framer, FramerStats, PacketReader};
pub use tsu::{StimEntry, TsuTime};

#[cfg(feature = "async")]
pub use async_codec::PacketCodec;
