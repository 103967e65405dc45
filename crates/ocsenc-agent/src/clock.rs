//! Clock-domain reconstruction.
//!
//! Readout boards timestamp encoder edges with a free-running 32-bit counter
//! plus an overflow counter. This module merges them into 64-bit ticks, maps
//! ticks to seconds and derives the rough rotation estimates published
//! alongside the raw data.

use ocsenc_frame::{combine_ticks, CounterPacket};
use tracing::{debug, warn};

/// Seconds per tick of the 200 MHz BeagleBone PRU clock.
pub const BBB_TICK_PERIOD: f64 = 5e-9;

/// Nominal BeagleBone clock frequency in Hz.
pub const BBB_CLOCK_FREQ: f64 = 1.0 / BBB_TICK_PERIOD;

/// Per-sample flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    /// Ticks went backwards relative to the previous sample of the stream.
    pub clock_regressed: bool,
}

/// One reconstructed encoder edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedSample {
    pub ticks: u64,
    pub seconds: f64,
    /// Edge index, reference count or state bits, depending on the stream.
    pub index: u32,
    pub flags: SampleFlags,
}

/// Maps 64-bit ticks of one stream to seconds.
///
/// The first tick observed becomes the session origin:
/// `seconds = (ticks - origin) * tick_period + t_offset`.
#[derive(Debug, Clone)]
pub struct ClockModel {
    tick_period: f64,
    t_offset: f64,
    origin: Option<u64>,
    last: Option<u64>,
    regressions: u64,
}

impl ClockModel {
    pub fn new(tick_period: f64, t_offset: f64) -> Self {
        Self {
            tick_period,
            t_offset,
            origin: None,
            last: None,
            regressions: 0,
        }
    }

    /// Model for the BeagleBone PRU clock.
    pub fn bbb(t_offset: f64) -> Self {
        Self::new(BBB_TICK_PERIOD, t_offset)
    }

    /// Seconds for `ticks`; ticks before the origin clamp to `t_offset`.
    pub fn seconds(&self, ticks: u64) -> f64 {
        match self.origin {
            Some(origin) if ticks >= origin => {
                (ticks - origin) as f64 * self.tick_period + self.t_offset
            }
            _ => self.t_offset,
        }
    }

    /// Record one tick value and convert it.
    ///
    /// A tick value below the previous one is flagged and re-anchors the
    /// model at the previous sample's time, so reconstructed time never
    /// decreases within a stream.
    pub fn observe(&mut self, ticks: u64, index: u32) -> DecodedSample {
        self.origin.get_or_insert(ticks);
        let mut flags = SampleFlags::default();
        if let Some(last) = self.last {
            if ticks < last {
                flags.clock_regressed = true;
                self.regressions += 1;
                warn!(
                    last,
                    ticks,
                    regressions = self.regressions,
                    "encoder clock went backwards"
                );
                self.t_offset = self.seconds(last);
                self.origin = Some(ticks);
            }
        }
        self.last = Some(ticks);

        DecodedSample {
            ticks,
            seconds: self.seconds(ticks),
            index,
            flags,
        }
    }

    /// Convert every sample of a counter packet.
    pub fn reconstruct(&mut self, packet: &CounterPacket) -> Vec<DecodedSample> {
        packet
            .clock
            .iter()
            .zip(&packet.overflow)
            .enumerate()
            .map(|(i, (&clock, &overflow))| {
                let index = packet.index.get(i).copied().unwrap_or_default();
                self.observe(combine_ticks(clock, overflow), index)
            })
            .collect()
    }

    /// Forget the origin and restart at `t_offset`.
    pub fn reset(&mut self, t_offset: f64) {
        self.t_offset = t_offset;
        self.origin = None;
        self.last = None;
    }

    /// Time assigned to the session origin.
    pub fn t_offset(&self) -> f64 {
        self.t_offset
    }

    pub fn origin(&self) -> Option<u64> {
        self.origin
    }

    /// Number of samples flagged with [`SampleFlags::clock_regressed`].
    pub fn regressions(&self) -> u64 {
        self.regressions
    }

    pub fn tick_period(&self) -> f64 {
        self.tick_period
    }
}

/// Seconds relative to the first count of a batch, plus `t_offset`.
///
/// Assumes the nominal 200 MHz clock.
pub fn count_to_time(counts: &[u64], t_offset: f64) -> Vec<f64> {
    let Some(&first) = counts.first() else {
        return Vec::new();
    };
    counts
        .iter()
        .map(|&c| (i128::from(c) - i128::from(first)) as f64 * BBB_TICK_PERIOD + t_offset)
        .collect()
}

/// Mean and population standard deviation of consecutive differences.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiffStats {
    pub mean: f64,
    pub std: f64,
}

/// Statistics of `values[i + 1] - values[i]`; zero for fewer than two values.
pub fn diff_stats(values: &[u64]) -> DiffStats {
    if values.len() < 2 {
        return DiffStats::default();
    }
    let diffs: Vec<f64> = values
        .windows(2)
        .map(|w| (i128::from(w[1]) - i128::from(w[0])) as f64)
        .collect();
    let n = diffs.len() as f64;
    let mean = diffs.iter().sum::<f64>() / n;
    let var = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    DiffStats {
        mean,
        std: var.sqrt(),
    }
}

/// Wiregrid belt rotation speed over one packet, in revolutions per second.
///
/// `ref_counts` are reference counts already reduced modulo the counter
/// range; a smaller last count than first means the belt position wrapped.
/// Returns 0.0 when the packet spans no time.
pub fn wiregrid_rotation_speed(ticks: &[u64], ref_counts: &[u32], counts_on_belt: u32) -> f64 {
    let (Some(&t0), Some(&t1)) = (ticks.first(), ticks.last()) else {
        return 0.0;
    };
    let (Some(&r0), Some(&r1)) = (ref_counts.first(), ref_counts.last()) else {
        return 0.0;
    };

    let dclock = (i128::from(t1) - i128::from(t0)) as f64 * BBB_TICK_PERIOD;
    if dclock == 0.0 {
        return 0.0;
    }

    let belt = f64::from(counts_on_belt);
    let dcount = if dclock > 0.0 && r0 > r1 {
        (f64::from(r1) + belt - f64::from(r0)) / belt
    } else {
        (f64::from(r1) - f64::from(r0)) / belt
    };
    dcount / dclock
}

/// Rough HWP rotation frequency from encoder slits and IRIG references.
///
/// IRIG references calibrate the readout clock: two consecutive rising
/// edges one IRIG second apart give the measured clock rate. The HWP
/// frequency is then `Δindex / Δticks * f_clock / (2 * num_slits)`, averaged
/// over one publish batch. It is an approximation; its error is not bounded.
#[derive(Debug, Clone)]
pub struct FrequencyEstimator {
    num_slits: u32,
    prev_reference: Option<(u64, i64)>,
    clock_freq: Option<f64>,
}

impl FrequencyEstimator {
    pub fn new(num_slits: u32) -> Self {
        Self {
            num_slits,
            prev_reference: None,
            clock_freq: None,
        }
    }

    /// Record an IRIG reference and return the measured clock frequency.
    ///
    /// Returns 0.0 without a previous valid reference or when the edges do
    /// not advance in both clock and time.
    pub fn on_irig(&mut self, rising_edge_ticks: u64, unix_time: Option<i64>) -> f64 {
        let Some(time) = unix_time else {
            self.prev_reference = None;
            return 0.0;
        };

        let measured = match self.prev_reference {
            Some((prev_ticks, prev_time)) if time > prev_time && rising_edge_ticks > prev_ticks => {
                (rising_edge_ticks - prev_ticks) as f64 / (time - prev_time) as f64
            }
            Some(_) => {
                debug!(rising_edge_ticks, time, "IRIG reference did not advance");
                0.0
            }
            None => 0.0,
        };

        self.prev_reference = Some((rising_edge_ticks, time));
        if measured > 0.0 && measured.is_finite() {
            self.clock_freq = Some(measured);
        }
        measured
    }

    /// Latest calibrated clock frequency, if any.
    pub fn clock_freq(&self) -> Option<f64> {
        self.clock_freq
    }

    /// Approximate HWP frequency for a batch spanning `dindex` slit edges
    /// over `dticks` clock ticks. Returns 0.0 before the clock is calibrated
    /// or when the estimate is undefined.
    pub fn hwp_frequency(&self, dindex: i64, dticks: u64) -> f64 {
        let Some(f_clock) = self.clock_freq else {
            return 0.0;
        };
        if dticks == 0 || self.num_slits == 0 {
            return 0.0;
        }
        let freq = dindex as f64 * f_clock / dticks as f64 / 2.0 / f64::from(self.num_slits);
        if freq.is_finite() {
            freq
        } else {
            0.0
        }
    }

    pub fn num_slits(&self) -> u32 {
        self.num_slits
    }
}
