//! Feed blocks built from IRIG packets, shared by the UDP encoder agents.

use ocsenc_frame::packet::IRIG_WORDS;
use ocsenc_frame::{IrigPacket, IrigTime};
use tracing::debug;

use crate::publisher::FeedMessage;

/// First synchronization pulse, seconds after the reference marker.
const SYNCH_PULSE_OFFSET: f64 = 0.09;
/// Spacing of the synchronization pulses in seconds.
const SYNCH_PULSE_SPACING: f64 = 0.1;

/// Add the decoded calendar fields of an IRIG packet.
pub(crate) fn with_calendar(message: FeedMessage, time: &IrigTime) -> FeedMessage {
    message
        .field("irig_sec", time.sec)
        .field("irig_min", time.min)
        .field("irig_hour", time.hour)
        .field("irig_day", time.day)
        .field("irig_year", time.year)
}

/// Block with one sample per synchronization pulse.
///
/// `irig_time` is the unix time of the reference marker; pulse `k` lies
/// `0.09 + 0.1 k` seconds after it on both the host and the IRIG clock.
pub(crate) fn synch_pulse_block(
    block_name: &str,
    packet: &IrigPacket,
    sys_time: f64,
    irig_time: i64,
) -> FeedMessage {
    let offsets: Vec<f64> = (0..IRIG_WORDS)
        .map(|k| SYNCH_PULSE_OFFSET + k as f64 * SYNCH_PULSE_SPACING)
        .collect();
    let timestamps = offsets.iter().map(|o| sys_time + o).collect();
    let clock_times: Vec<f64> = offsets.iter().map(|o| irig_time as f64 + o).collect();

    FeedMessage::series(block_name, timestamps)
        .field("irig_synch_pulse_clock_time", clock_times)
        .field(
            "irig_synch_pulse_clock_counts",
            packet.synch_pulse_ticks().to_vec(),
        )
        .field("irig_info", packet.info.to_vec())
}

/// Logs IRIG time and run time since the first IRIG packet of a session.
#[derive(Debug, Default)]
pub(crate) struct IrigLog {
    start: Option<IrigTime>,
}

impl IrigLog {
    pub(crate) fn record(&mut self, time: &IrigTime, rising_edge_ticks: u64) {
        let start = *self.start.get_or_insert(*time);
        debug!(
            irig = %time,
            run_time = %time.elapsed_since(&start),
            rising_edge_ticks,
            "IRIG packet"
        );
    }
}
