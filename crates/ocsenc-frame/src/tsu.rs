//! Timestamp-unit (TSU) entries popped from the stimulator encoder FIFO.
//!
//! Each entry is 96 bits assembled from three little-endian words:
//! `[state 2][sec 48][nsec 30][sub-nsec 16]`, most significant first.

const STATE_SHIFT: u32 = 94;
const TIME_MASK: u128 = (1 << STATE_SHIFT) - 1;
const SEC_SHIFT: u32 = 46;
const NSEC_MASK: u128 = 0x3fff_ffff_0000;
const NSEC_SHIFT: u32 = 16;

/// 94-bit TSU timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TsuTime {
    raw: u128,
}

impl TsuTime {
    /// Wrap a raw timestamp; bits above 94 are dropped.
    pub fn from_raw(raw: u128) -> Self {
        Self {
            raw: raw & TIME_MASK,
        }
    }

    /// Build from whole seconds and nanoseconds (sub-nanoseconds zero).
    pub fn from_parts(sec: u64, nsec: u32) -> Self {
        let raw = (u128::from(sec) << SEC_SHIFT) | ((u128::from(nsec) << NSEC_SHIFT) & NSEC_MASK);
        Self::from_raw(raw)
    }

    pub fn raw(&self) -> u128 {
        self.raw
    }

    /// Seconds part.
    pub fn sec(&self) -> u64 {
        (self.raw >> SEC_SHIFT) as u64
    }

    /// Nanoseconds part.
    pub fn nsec(&self) -> u32 {
        ((self.raw & NSEC_MASK) >> NSEC_SHIFT) as u32
    }

    /// Seconds since the TAI epoch.
    pub fn tai(&self) -> f64 {
        self.sec() as f64 + f64::from(self.nsec()) / 1e9
    }
}

/// One stimulator encoder edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StimEntry {
    /// Encoder state bits (two channels).
    pub state: u8,
    pub time: TsuTime,
}

impl StimEntry {
    /// Assemble an entry from the three FIFO data words.
    pub fn from_words(words: [u32; 3]) -> Self {
        let value =
            u128::from(words[0]) | (u128::from(words[1]) << 32) | (u128::from(words[2]) << 64);
        Self {
            state: ((value >> STATE_SHIFT) & 0b11) as u8,
            time: TsuTime::from_raw(value),
        }
    }

    /// FIFO data words for this entry.
    pub fn to_words(&self) -> [u32; 3] {
        let value = (u128::from(self.state & 0b11) << STATE_SHIFT) | self.time.raw();
        [value as u32, (value >> 32) as u32, (value >> 64) as u32]
    }
}
