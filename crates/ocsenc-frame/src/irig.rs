//! IRIG-B field decoding.
//!
//! The readout firmware stores each 100 ms IRIG frame as a raw bit group.
//! Digits are recovered with fixed bit weights: bits 0-3 are the ones digit
//! (1, 2, 4, 8), bit 4 is the IRIG position/separator bit and is skipped, and
//! bits 5-8 are the tens digit (10, 20, 40, 80). The seconds frame starts one
//! bit later than the others because its first bit is the reference marker.

use chrono::{Datelike, NaiveDate, TimeZone, Timelike, Utc};
use tracing::error;

use crate::packet::IRIG_WORDS;

/// Largest seconds field accepted by [`IrigTime::unix_seconds`].
const MAX_SECOND: u32 = 61;

const WEIGHTS: [(u32, u32); 8] = [
    (0, 1),
    (1, 2),
    (2, 4),
    (3, 8),
    (5, 10),
    (6, 20),
    (7, 40),
    (8, 80),
];

/// Decode one IRIG bit group into its decimal value.
pub fn de_irig(val: u32, base_shift: u32) -> u32 {
    WEIGHTS
        .iter()
        .map(|&(bit, weight)| {
            let shifted = bit
                .checked_add(base_shift)
                .and_then(|shift| val.checked_shr(shift))
                .unwrap_or(0);
            (shifted & 1) * weight
        })
        .sum()
}

/// Encode a decimal value (0-99) into the bit layout read by [`de_irig`].
pub fn en_irig(value: u32, base_shift: u32) -> u32 {
    let ones = value % 10;
    let tens = (value / 10) % 10;
    ((ones & 0xF) | ((tens & 0xF) << 5)) << base_shift
}

/// Calendar fields carried by one IRIG packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrigTime {
    pub sec: u32,
    pub min: u32,
    pub hour: u32,
    /// Day of year (1-366).
    pub day: u32,
    /// Two-digit year.
    pub year: u32,
}

impl IrigTime {
    /// Decode the info words of an IRIG packet.
    pub fn from_info(info: &[u32; IRIG_WORDS]) -> Self {
        Self {
            sec: de_irig(info[0], 1),
            min: de_irig(info[1], 0),
            hour: de_irig(info[2], 0),
            day: de_irig(info[3], 0) + de_irig(info[4], 0) * 100,
            year: de_irig(info[5], 0),
        }
    }

    /// Encode back into info words; words 6-9 are left zero.
    pub fn to_info(&self) -> [u32; IRIG_WORDS] {
        let mut info = [0u32; IRIG_WORDS];
        info[0] = en_irig(self.sec, 1);
        info[1] = en_irig(self.min, 0);
        info[2] = en_irig(self.hour, 0);
        info[3] = en_irig(self.day % 100, 0);
        info[4] = en_irig(self.day / 100, 0);
        info[5] = en_irig(self.year, 0);
        info
    }

    /// Fields for a unix timestamp (UTC).
    pub fn from_unix(seconds: i64) -> Option<Self> {
        let dt = Utc.timestamp_opt(seconds, 0).single()?;
        Some(Self {
            sec: dt.second(),
            min: dt.minute(),
            hour: dt.hour(),
            day: dt.ordinal(),
            year: (dt.year() % 100) as u32,
        })
    }

    /// Seconds since the unix epoch.
    ///
    /// Two-digit years 69-99 map to the 1900s, 00-68 to the 2000s. Seconds
    /// 60 and 61 (leap seconds) are accepted and roll into the next minute,
    /// as POSIX time has no leap seconds. Returns `None` (and logs) when the
    /// fields do not form a valid UTC time.
    pub fn unix_seconds(&self) -> Option<i64> {
        let century = if self.year >= 69 { 1900 } else { 2000 };
        let ts = (self.year < 100 && self.sec <= MAX_SECOND)
            .then(|| NaiveDate::from_yo_opt(century + self.year as i32, self.day))
            .flatten()
            .and_then(|date| date.and_hms_opt(self.hour, self.min, 0))
            .map(|dt| dt.and_utc().timestamp() + i64::from(self.sec));

        if ts.is_none() {
            error!(
                year = self.year,
                day = self.day,
                hour = self.hour,
                min = self.min,
                sec = self.sec,
                "invalid IRIG-B timestamp"
            );
        }
        ts
    }

    /// Run time elapsed since `start`, wrapped on the 24 h clock.
    pub fn elapsed_since(&self, start: &IrigTime) -> RunTime {
        let mut seconds = self.sec as i32 - start.sec as i32;
        let mut minutes = self.min as i32 - start.min as i32;
        let mut hours = self.hour as i32 - start.hour as i32;

        if hours < 0 {
            hours += 24;
        }
        if minutes < 0 || (minutes == 0 && seconds < 0) {
            minutes += 60;
            hours -= 1;
        }
        if seconds < 0 {
            seconds += 60;
            minutes -= 1;
        }

        RunTime {
            hours,
            minutes,
            seconds,
        }
    }
}

impl std::fmt::Display for IrigTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}/{:03} {:02}:{:02}:{:02}",
            self.year, self.day, self.hour, self.min, self.sec
        )
    }
}

/// Elapsed wall time since the first IRIG packet of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTime {
    pub hours: i32,
    pub minutes: i32,
    pub seconds: i32,
}

impl std::fmt::Display for RunTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.hours, self.minutes, self.seconds)
    }
}
