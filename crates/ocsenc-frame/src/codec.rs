use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::kind::{ENCODER, ERROR, GRIPPER_ENCODER, GRIPPER_LIMIT, IRIG, TIMEOUT};
use crate::layout::StreamLayout;
use crate::packet::{
    CounterPacket, IrigPacket, LimitPacket, Packet, TimeoutPacket, TimeoutSource, IRIG_WORDS,
};

/// Header: one little-endian u32 magic value.
pub const HEADER_SIZE: usize = 4;

/// Default cap on buffered, not yet framed bytes: 1 MiB.
pub const DEFAULT_MAX_BUFFER: usize = 1024 * 1024;

/// Configuration for packet framing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Packet layout of the stream.
    pub layout: StreamLayout,
    /// Buffered bytes above this are discarded as corrupt. Default: 1 MiB.
    pub max_buffer: usize,
}

impl FrameConfig {
    /// Default configuration for `layout`.
    pub fn new(layout: StreamLayout) -> Self {
        Self {
            layout,
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::new(StreamLayout::default())
    }
}

/// Read the header word without consuming it.
///
/// Returns `None` when fewer than [`HEADER_SIZE`] bytes are available.
pub fn peek_header(src: &[u8]) -> Option<u32> {
    let word: [u8; HEADER_SIZE] = src.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(word))
}

/// Decode one packet from the front of `src`.
///
/// Returns `Ok(None)` if the buffer does not hold a complete packet yet.
/// A header the layout does not carry yields [`FrameError::UnknownHeader`]
/// and leaves `src` untouched; callers decide how to resynchronize.
/// On success the packet bytes are consumed.
pub fn decode_packet(src: &mut BytesMut, layout: &StreamLayout) -> Result<Option<Packet>> {
    let Some(header) = peek_header(&src[..]) else {
        return Ok(None); // Need more data
    };

    let size = layout.packet_size(header).ok_or(FrameError::UnknownHeader {
        header,
        layout: layout.name(),
    })?;

    if src.len() < size {
        return Ok(None); // Need more data
    }

    let mut body = src.split_to(size);
    body.advance(HEADER_SIZE);

    let packet = match header {
        ENCODER | GRIPPER_ENCODER => Packet::Counter(decode_counter(&mut body, layout)),
        IRIG => Packet::Irig(decode_irig(&mut body)),
        GRIPPER_LIMIT => Packet::Limit(LimitPacket {
            clock: body.get_u32_le(),
            overflow: body.get_u32_le(),
            state: body.get_u32_le(),
        }),
        TIMEOUT => Packet::Timeout(TimeoutPacket {
            source: TimeoutSource::from_word(body.get_u32_le()),
        }),
        ERROR => Packet::Error,
        // packet_size() only admits the headers above.
        other => {
            return Err(FrameError::UnknownHeader {
                header: other,
                layout: layout.name(),
            })
        }
    };

    Ok(Some(packet))
}

fn read_words(src: &mut BytesMut, count: usize) -> Vec<u32> {
    (0..count).map(|_| src.get_u32_le()).collect()
}

fn read_array(src: &mut BytesMut) -> [u32; IRIG_WORDS] {
    let mut words = [0u32; IRIG_WORDS];
    for word in words.iter_mut() {
        *word = src.get_u32_le();
    }
    words
}

fn decode_counter(body: &mut BytesMut, layout: &StreamLayout) -> CounterPacket {
    let n = layout.samples();
    match layout {
        StreamLayout::Hwp { .. } => CounterPacket {
            quadrature: vec![body.get_u32_le()],
            clock: read_words(body, n),
            overflow: read_words(body, n),
            index: read_words(body, n),
            error: Vec::new(),
        },
        StreamLayout::Wiregrid { .. } => CounterPacket {
            quadrature: read_words(body, n),
            clock: read_words(body, n),
            overflow: read_words(body, n),
            index: read_words(body, n),
            error: read_words(body, n),
        },
        StreamLayout::Gripper { .. } => CounterPacket {
            quadrature: Vec::new(),
            clock: read_words(body, n),
            overflow: read_words(body, n),
            index: read_words(body, n),
            error: Vec::new(),
        },
    }
}

fn decode_irig(body: &mut BytesMut) -> IrigPacket {
    IrigPacket {
        rising_edge_clock: body.get_u32_le(),
        rising_edge_overflow: body.get_u32_le(),
        info: read_array(body),
        synch_clock: read_array(body),
        synch_overflow: read_array(body),
    }
}

/// Encode a packet in the wire format of `layout`.
///
/// Wire format of an HWP counter packet:
/// ```text
/// ┌───────────┬──────────┬─────────────┬──────────────┬────────────┐
/// │ 0x1EAF    │ quad     │ clock × N   │ overflow × N │ index × N  │
/// │ (4B LE)   │ (4B LE)  │ (4B LE)     │ (4B LE)      │ (4B LE)    │
/// └───────────┴──────────┴─────────────┴──────────────┴────────────┘
/// ```
/// Counter arrays must match the layout sample count; arrays the layout
/// does not carry must be empty.
pub fn encode_packet(packet: &Packet, layout: &StreamLayout, dst: &mut BytesMut) -> Result<()> {
    match packet {
        Packet::Counter(counter) => encode_counter(counter, layout, dst),
        Packet::Irig(irig) => {
            require_header(IRIG, "irig", layout)?;
            dst.reserve(crate::layout::IRIG_PACKET_SIZE);
            dst.put_u32_le(IRIG);
            dst.put_u32_le(irig.rising_edge_clock);
            dst.put_u32_le(irig.rising_edge_overflow);
            put_words(dst, &irig.info);
            put_words(dst, &irig.synch_clock);
            put_words(dst, &irig.synch_overflow);
            Ok(())
        }
        Packet::Limit(limit) => {
            require_header(GRIPPER_LIMIT, "limit", layout)?;
            dst.reserve(crate::layout::LIMIT_PACKET_SIZE);
            dst.put_u32_le(GRIPPER_LIMIT);
            dst.put_u32_le(limit.clock);
            dst.put_u32_le(limit.overflow);
            dst.put_u32_le(limit.state);
            Ok(())
        }
        Packet::Timeout(timeout) => {
            dst.reserve(crate::layout::TIMEOUT_PACKET_SIZE);
            dst.put_u32_le(TIMEOUT);
            dst.put_u32_le(timeout.source.to_word());
            Ok(())
        }
        Packet::Error => {
            require_header(ERROR, "error", layout)?;
            dst.put_u32_le(ERROR);
            Ok(())
        }
    }
}

fn require_header(header: u32, kind: &'static str, layout: &StreamLayout) -> Result<()> {
    match layout.packet_size(header) {
        Some(_) => Ok(()),
        None => Err(FrameError::NotInLayout {
            kind,
            layout: layout.name(),
        }),
    }
}

fn check_len(field: &'static str, words: &[u32], expected: usize) -> Result<()> {
    if words.len() != expected {
        return Err(FrameError::LayoutMismatch {
            field,
            expected,
            actual: words.len(),
        });
    }
    Ok(())
}

fn put_words(dst: &mut BytesMut, words: &[u32]) {
    for &word in words {
        dst.put_u32_le(word);
    }
}

fn encode_counter(packet: &CounterPacket, layout: &StreamLayout, dst: &mut BytesMut) -> Result<()> {
    let n = layout.samples();
    let (quad_len, error_len) = match layout {
        StreamLayout::Hwp { .. } => (1, 0),
        StreamLayout::Wiregrid { .. } => (n, n),
        StreamLayout::Gripper { .. } => (0, 0),
    };
    check_len("quadrature", &packet.quadrature, quad_len)?;
    check_len("clock", &packet.clock, n)?;
    check_len("overflow", &packet.overflow, n)?;
    check_len("index", &packet.index, n)?;
    check_len("error", &packet.error, error_len)?;

    dst.reserve(layout.counter_packet_size());
    dst.put_u32_le(layout.counter_header());
    put_words(dst, &packet.quadrature);
    put_words(dst, &packet.clock);
    put_words(dst, &packet.overflow);
    put_words(dst, &packet.index);
    put_words(dst, &packet.error);
    Ok(())
}
