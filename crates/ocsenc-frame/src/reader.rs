use bytes::BytesMut;
use ocsenc_transport::{ByteSource, CancelToken};
use tracing::{debug, error, trace, warn};

use crate::codec::{decode_packet, FrameConfig};
use crate::error::Result;
use crate::kind::header_name;
use crate::layout::StreamLayout;
use crate::packet::Packet;

const INITIAL_BUFFER_CAPACITY: usize = 16 * 1024;

/// Counters kept by a [`Framer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    /// Packets decoded.
    pub packets: u64,
    /// Times the buffer was discarded to resynchronize.
    pub resyncs: u64,
    /// Bytes thrown away while resynchronizing.
    pub discarded_bytes: u64,
    /// Timeout and error packets seen.
    pub faults: u64,
}

/// Accumulates stream bytes and splits them into packets.
///
/// I/O free: feed it with [`Framer::push`] and pull packets out with
/// [`Framer::next_packet`]. A header the layout does not know discards the
/// whole buffer; packets have no length field, so there is no way to skip a
/// corrupt one.
#[derive(Debug)]
pub struct Framer {
    buf: BytesMut,
    config: FrameConfig,
    stats: FramerStats,
}

impl Framer {
    /// Create a framer for `layout` with default limits.
    pub fn new(layout: StreamLayout) -> Self {
        Self::with_config(FrameConfig::new(layout))
    }

    /// Create a framer with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            stats: FramerStats::default(),
        }
    }

    /// Append received bytes.
    ///
    /// The buffer never grows past `max_buffer`: when it would, the buffered
    /// bytes are discarded, and a chunk that alone exceeds the limit keeps
    /// only its trailing `max_buffer` bytes.
    pub fn push(&mut self, data: &[u8]) {
        let max_buffer = self.config.max_buffer;
        if self.buf.len() + data.len() > max_buffer {
            warn!(
                buffered = self.buf.len(),
                incoming = data.len(),
                max_buffer,
                "framer buffer limit exceeded, discarding"
            );
            self.discard();
        }
        let keep = data.len().min(max_buffer);
        let dropped = data.len() - keep;
        self.stats.discarded_bytes += dropped as u64;
        self.buf.extend_from_slice(&data[dropped..]);
    }

    /// Decode the next complete packet, if any.
    pub fn next_packet(&mut self) -> Option<Packet> {
        match decode_packet(&mut self.buf, &self.config.layout) {
            Ok(Some(packet)) => {
                self.stats.packets += 1;
                if packet.is_fault() {
                    self.on_fault(&packet);
                }
                Some(packet)
            }
            Ok(None) => {
                trace!(buffered = self.buf.len(), "waiting for more data");
                None
            }
            Err(err) => {
                let header = crate::codec::peek_header(&self.buf[..]).unwrap_or_default();
                error!(
                    header = %format_args!("0x{header:X}"),
                    name = header_name(header),
                    layout = self.config.layout.name(),
                    buffered = self.buf.len(),
                    %err,
                    "bad header, discarding buffer"
                );
                self.discard();
                None
            }
        }
    }

    /// Decode every complete packet currently buffered.
    pub fn drain(&mut self) -> Vec<Packet> {
        std::iter::from_fn(|| self.next_packet()).collect()
    }

    fn on_fault(&mut self, packet: &Packet) {
        self.stats.faults += 1;
        match packet {
            Packet::Timeout(timeout) => warn!(source = %timeout.source, "readout timeout"),
            _ => warn!("IRIG synchronization error"),
        }
        if self.config.layout.resync_after_fault() && !self.buf.is_empty() {
            debug!(dropped = self.buf.len(), "dropping bytes after fault packet");
            self.stats.discarded_bytes += self.buf.len() as u64;
            self.buf.clear();
        }
    }

    fn discard(&mut self) {
        self.stats.resyncs += 1;
        self.stats.discarded_bytes += self.buf.len() as u64;
        self.buf.clear();
    }

    /// Bytes waiting for the rest of their packet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop buffered bytes without counting a resync.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    pub fn layout(&self) -> &StreamLayout {
        &self.config.layout
    }

    /// Current framer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

/// Reads packets from a [`ByteSource`].
///
/// Each [`PacketReader::poll`] performs one bounded read and returns every
/// packet completed by it.
pub struct PacketReader<S> {
    source: S,
    framer: Framer,
}

impl<S: ByteSource> PacketReader<S> {
    /// Create a reader for `layout` with default limits.
    pub fn new(source: S, layout: StreamLayout) -> Self {
        Self::with_config(source, FrameConfig::new(layout))
    }

    /// Create a reader with explicit framing configuration.
    pub fn with_config(source: S, config: FrameConfig) -> Self {
        Self {
            source,
            framer: Framer::with_config(config),
        }
    }

    /// Read once and return the packets that became complete.
    ///
    /// Returns an empty vector on timeout or cancellation.
    pub fn poll(&mut self, cancel: &CancelToken) -> Result<Vec<Packet>> {
        match self.source.read(cancel)? {
            Some(chunk) => {
                trace!(len = chunk.len(), "received chunk");
                self.framer.push(&chunk);
                Ok(self.framer.drain())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Borrow the framer.
    pub fn framer(&self) -> &Framer {
        &self.framer
    }

    /// Borrow the underlying source.
    pub fn get_ref(&self) -> &S {
        &self.source
    }

    /// Mutably borrow the underlying source.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Consume the reader and return the source.
    pub fn into_inner(self) -> S {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, Bytes};
    use ocsenc_transport::{ReplaySource, TransportError};

    use super::*;
    use crate::codec::encode_packet;
    use crate::kind::{ENCODER, ERROR, TIMEOUT};
    use crate::packet::{CounterPacket, TimeoutSource};

    const LAYOUT: StreamLayout = StreamLayout::Hwp { samples: 3 };

    fn counter(clock: [u32; 3]) -> Packet {
        Packet::Counter(CounterPacket {
            quadrature: vec![0],
            clock: clock.to_vec(),
            overflow: vec![0; 3],
            index: vec![0, 1, 2],
            error: Vec::new(),
        })
    }

    fn wire(packets: &[Packet]) -> BytesMut {
        let mut buf = BytesMut::new();
        for packet in packets {
            encode_packet(packet, &LAYOUT, &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn short_input_defers() {
        for len in [0usize, 1, 3] {
            let mut framer = Framer::new(LAYOUT);
            framer.push(&[0xAF, 0x1E, 0x00][..len]);
            assert!(framer.next_packet().is_none());
            assert_eq!(framer.buffered(), len);
            assert_eq!(framer.stats().resyncs, 0);
        }
    }

    #[test]
    fn packet_split_across_pushes() {
        let bytes = wire(&[counter([1, 2, 3])]);
        let mut framer = Framer::new(LAYOUT);

        framer.push(&bytes[..10]);
        assert!(framer.next_packet().is_none());
        framer.push(&bytes[10..]);
        assert_eq!(framer.next_packet(), Some(counter([1, 2, 3])));
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn garbage_then_valid_packet_yields_one_packet() {
        let mut framer = Framer::new(LAYOUT);
        framer.push(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02]);
        assert!(framer.drain().is_empty());
        assert_eq!(framer.stats().resyncs, 1);
        assert_eq!(framer.stats().discarded_bytes, 6);

        framer.push(&wire(&[counter([100, 200, 300])]));
        let packets = framer.drain();
        assert_eq!(packets, vec![counter([100, 200, 300])]);
    }

    #[test]
    fn garbage_in_same_chunk_discards_everything() {
        let mut framer = Framer::new(LAYOUT);
        let mut bytes = BytesMut::from(&[0u8; 4][..]);
        bytes.extend_from_slice(&wire(&[counter([1, 2, 3])]));
        framer.push(&bytes);

        assert!(framer.drain().is_empty());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn timeout_discards_rest_of_beaglebone_buffer() {
        let mut bytes = BytesMut::new();
        bytes.put_u32_le(TIMEOUT);
        bytes.put_u32_le(1);
        bytes.extend_from_slice(&wire(&[counter([1, 2, 3])]));

        let mut framer = Framer::new(LAYOUT);
        framer.push(&bytes);
        let packets = framer.drain();

        assert_eq!(packets.len(), 1);
        assert!(matches!(
            &packets[0],
            Packet::Timeout(t) if t.source == TimeoutSource::Encoder
        ));
        assert_eq!(framer.stats().faults, 1);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn gripper_continues_after_timeout() {
        let layout = StreamLayout::Gripper { samples: 1 };
        let mut bytes = BytesMut::new();
        bytes.put_u32_le(TIMEOUT);
        bytes.put_u32_le(1);
        bytes.put_u32_le(crate::kind::GRIPPER_ENCODER);
        bytes.put_u32_le(5);
        bytes.put_u32_le(0);
        bytes.put_u32_le(3);

        let mut framer = Framer::new(layout);
        framer.push(&bytes);
        let packets = framer.drain();
        assert_eq!(packets.len(), 2);
        assert!(matches!(&packets[1], Packet::Counter(c) if c.index == vec![3]));
    }

    #[test]
    fn error_packet_is_reported() {
        let mut framer = Framer::new(LAYOUT);
        let mut bytes = BytesMut::new();
        bytes.put_u32_le(ERROR);
        framer.push(&bytes);
        assert_eq!(framer.next_packet(), Some(Packet::Error));
    }

    #[test]
    fn buffer_limit_discards() {
        let mut framer = Framer::with_config(FrameConfig {
            layout: LAYOUT,
            max_buffer: 8,
        });
        let mut header = BytesMut::new();
        header.put_u32_le(ENCODER);
        framer.push(&header);
        framer.push(&[0u8; 6]);
        assert_eq!(framer.buffered(), 6);
        assert_eq!(framer.stats().resyncs, 1);
    }

    #[test]
    fn oversized_chunk_keeps_trailing_bytes() {
        let mut framer = Framer::with_config(FrameConfig {
            layout: LAYOUT,
            max_buffer: 8,
        });
        framer.push(&[0xAA; 3]);
        let chunk: Vec<u8> = (0..20).collect();
        framer.push(&chunk);

        assert_eq!(framer.buffered(), 8);
        assert_eq!(framer.buf[..], chunk[12..]);
        let stats = framer.stats();
        assert_eq!(stats.resyncs, 1);
        assert_eq!(stats.discarded_bytes, 3 + 12);
    }

    #[test]
    fn reader_polls_source() {
        let bytes = wire(&[counter([100, 200, 300]), counter([400, 500, 600])]).freeze();
        let source = ReplaySource::from_capture(bytes, 25);
        let mut reader = PacketReader::new(source, LAYOUT);
        let cancel = CancelToken::new();

        let mut packets = Vec::new();
        while !reader.get_ref().is_exhausted() {
            packets.extend(reader.poll(&cancel).unwrap());
        }
        assert_eq!(packets, vec![counter([100, 200, 300]), counter([400, 500, 600])]);
        assert!(reader.poll(&cancel).unwrap().is_empty());
        assert_eq!(reader.framer().stats().packets, 2);
    }

    struct FailingSource;

    impl ByteSource for FailingSource {
        fn read(&mut self, _cancel: &CancelToken) -> ocsenc_transport::Result<Option<Bytes>> {
            Err(TransportError::Io(std::io::Error::other("socket reset")))
        }
    }

    #[test]
    fn reader_propagates_source_errors() {
        let mut reader = PacketReader::new(FailingSource, LAYOUT);
        let err = reader.poll(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, crate::error::FrameError::Transport(_)));
    }
}
