use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::error;

use crate::codec::{decode_packet, encode_packet, FrameConfig};
use crate::error::{FrameError, Result};
use crate::layout::StreamLayout;
use crate::packet::Packet;

/// Tokio codec for readout packet streams.
///
/// Applies the same policy as [`crate::Framer`]: a bad header or an
/// oversized buffer clears the read buffer and decoding continues with the
/// next bytes, and BeagleBone layouts drop what follows a fault packet.
#[derive(Debug, Clone, Default)]
pub struct PacketCodec {
    config: FrameConfig,
}

impl PacketCodec {
    /// Create a codec for `layout` with default limits.
    pub fn new(layout: StreamLayout) -> Self {
        Self::with_config(FrameConfig::new(layout))
    }

    /// Create a codec with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() > self.config.max_buffer {
            error!(buffered = src.len(), "codec buffer limit exceeded, discarding");
            src.clear();
            return Ok(None);
        }

        match decode_packet(src, &self.config.layout) {
            Ok(Some(packet)) => {
                if packet.is_fault() && self.config.layout.resync_after_fault() {
                    src.clear();
                }
                Ok(Some(packet))
            }
            Ok(None) => Ok(None),
            Err(FrameError::UnknownHeader { header, layout }) => {
                error!(
                    header = %format_args!("0x{header:X}"),
                    layout,
                    buffered = src.len(),
                    "bad header, discarding buffer"
                );
                src.clear();
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        encode_packet(&item, &self.config.layout, dst)
    }
}
