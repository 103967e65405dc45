use crate::irig::IrigTime;

/// Number of IRIG info words and synchronization pulses per IRIG packet.
pub const IRIG_WORDS: usize = 10;

/// Merge a 32-bit running counter with its overflow counter.
pub fn combine_ticks(counter: u32, overflow: u32) -> u64 {
    u64::from(counter) + (u64::from(overflow) << 32)
}

/// One decoded packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Encoder edge samples.
    Counter(CounterPacket),
    /// IRIG-B time reference.
    Irig(IrigPacket),
    /// Gripper limit-switch change.
    Limit(LimitPacket),
    /// The readout board timed out waiting for a signal.
    Timeout(TimeoutPacket),
    /// IRIG synchronization error reported by the readout board.
    Error,
}

impl Packet {
    /// Name of the packet kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Counter(_) => "counter",
            Self::Irig(_) => "irig",
            Self::Limit(_) => "limit",
            Self::Timeout(_) => "timeout",
            Self::Error => "error",
        }
    }

    /// True for timeout and error packets.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Error)
    }
}

/// Encoder counter samples as parallel word arrays.
///
/// `clock[i] + (overflow[i] << 32)` is the 64-bit tick count of edge `i`.
/// `index` carries the edge index (HWP), the belt reference count (wiregrid)
/// or the state bits (gripper). `quadrature` holds one word per packet on
/// HWP streams and one per sample on wiregrid streams; `error` is only
/// populated by wiregrid streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterPacket {
    pub quadrature: Vec<u32>,
    pub clock: Vec<u32>,
    pub overflow: Vec<u32>,
    pub index: Vec<u32>,
    pub error: Vec<u32>,
}

impl CounterPacket {
    /// Number of samples in the packet.
    pub fn len(&self) -> usize {
        self.clock.len()
    }

    /// True when the packet carries no samples.
    pub fn is_empty(&self) -> bool {
        self.clock.is_empty()
    }

    /// 64-bit tick count of every sample.
    pub fn ticks(&self) -> impl Iterator<Item = u64> + '_ {
        self.clock
            .iter()
            .zip(&self.overflow)
            .map(|(&clock, &overflow)| combine_ticks(clock, overflow))
    }
}

/// IRIG-B reference packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrigPacket {
    /// Clock count at the rising edge of the on-time reference marker.
    pub rising_edge_clock: u32,
    pub rising_edge_overflow: u32,
    /// Raw IRIG bit groups, one per 100 ms frame.
    pub info: [u32; IRIG_WORDS],
    /// Clock counts of the ten synchronization pulses.
    pub synch_clock: [u32; IRIG_WORDS],
    pub synch_overflow: [u32; IRIG_WORDS],
}

impl IrigPacket {
    /// 64-bit tick count of the reference marker.
    pub fn rising_edge_ticks(&self) -> u64 {
        combine_ticks(self.rising_edge_clock, self.rising_edge_overflow)
    }

    /// 64-bit tick counts of the synchronization pulses.
    pub fn synch_pulse_ticks(&self) -> [u64; IRIG_WORDS] {
        let mut ticks = [0u64; IRIG_WORDS];
        for (i, tick) in ticks.iter_mut().enumerate() {
            *tick = combine_ticks(self.synch_clock[i], self.synch_overflow[i]);
        }
        ticks
    }

    /// Decoded calendar fields.
    pub fn time(&self) -> IrigTime {
        IrigTime::from_info(&self.info)
    }
}

/// Gripper limit-switch packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimitPacket {
    pub clock: u32,
    pub overflow: u32,
    pub state: u32,
}

impl LimitPacket {
    /// 64-bit tick count of the switch change.
    pub fn ticks(&self) -> u64 {
        combine_ticks(self.clock, self.overflow)
    }
}

/// What the readout board stopped seeing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutSource {
    Encoder,
    Irig,
    Unknown(u32),
}

impl TimeoutSource {
    /// Map the timeout type word.
    pub fn from_word(word: u32) -> Self {
        match word {
            1 => Self::Encoder,
            2 => Self::Irig,
            other => Self::Unknown(other),
        }
    }

    /// Wire value of the timeout type.
    pub fn to_word(self) -> u32 {
        match self {
            Self::Encoder => 1,
            Self::Irig => 2,
            Self::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for TimeoutSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encoder => write!(f, "encoder"),
            Self::Irig => write!(f, "IRIG"),
            Self::Unknown(word) => write!(f, "unknown type {word}"),
        }
    }
}

/// Timeout packet body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPacket {
    pub source: TimeoutSource,
}
