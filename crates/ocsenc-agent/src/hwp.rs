//! HWP encoder agent.
//!
//! The BeagleBone streams counter packets (one quadrature word plus 120
//! slit edges each) and one IRIG packet per second over UDP. Counter
//! samples are buffered and published in batches; IRIG packets are
//! published as they arrive and calibrate the rough rotation frequency.

use ocsenc_frame::{CounterPacket, IrigPacket, Packet, PacketReader};
use ocsenc_transport::{ByteSource, CancelToken};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::clock::{diff_stats, ClockModel, DecodedSample, FrequencyEstimator};
use crate::config::HwpConfig;
use crate::error::Result;
use crate::irig_feed::{synch_pulse_block, with_calendar, IrigLog};
use crate::lock::TimeoutLock;
use crate::publisher::{FeedMessage, FeedPublisher, FeedSpec};
use crate::queue::PublishSchedule;
use crate::session::{unix_now, AcqParams, AcqProcess, RunState, Session, TaskOutcome};

pub const FEED: &str = "HWPEncoder";
pub const FEED_FULL: &str = "HWPEncoder_full";

pub const BLOCK_IRIG: &str = "HWPEncoder_irig";
pub const BLOCK_IRIG_RAW: &str = "HWPEncoder_irig_raw";
pub const BLOCK_QUAD: &str = "HWPEncoder_quad";
pub const BLOCK_COUNTER: &str = "HWPEncoder_counter";
pub const BLOCK_COUNTER_SUB: &str = "HWPEncoder_counter_sub";
pub const BLOCK_FREQ: &str = "HWPEncoder_freq";

/// Feeds the agent registers.
pub fn feed_specs() -> [FeedSpec; 2] {
    [
        FeedSpec::recorded(FEED, 60),
        FeedSpec::recorded(FEED_FULL, 60).exclude_influx(),
    ]
}

/// Latest values reported in the session data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HwpStatus {
    /// -1 until the first batch is published.
    pub approx_hwp_freq: f64,
    pub encoder_last_updated: Option<f64>,
    pub irig_time: Option<i64>,
    pub irig_last_updated: Option<f64>,
    pub clock_regressions: u64,
}

impl Default for HwpStatus {
    fn default() -> Self {
        Self {
            approx_hwp_freq: -1.0,
            encoder_last_updated: None,
            irig_time: None,
            irig_last_updated: None,
            clock_regressions: 0,
        }
    }
}

/// Turns decoded HWP packets into feed messages.
#[derive(Debug)]
pub struct HwpStream {
    clock: ClockModel,
    freq: FrequencyEstimator,
    schedule: PublishSchedule,
    subsample: usize,
    pending: Vec<DecodedSample>,
    quadrature: Vec<u32>,
    received: Vec<f64>,
    irig_log: IrigLog,
    status: HwpStatus,
}

impl HwpStream {
    pub fn new(config: &HwpConfig) -> Self {
        Self {
            clock: ClockModel::bbb(0.0),
            freq: FrequencyEstimator::new(config.num_slits),
            schedule: PublishSchedule::new(config.publish_samples, config.publish_interval()),
            subsample: config.subsample.max(1),
            pending: Vec::new(),
            quadrature: Vec::new(),
            received: Vec::new(),
            irig_log: IrigLog::default(),
            status: HwpStatus::default(),
        }
    }

    /// Handle one packet received at `recv_time` (unix seconds).
    pub fn handle<P: FeedPublisher + ?Sized>(
        &mut self,
        packet: &Packet,
        recv_time: f64,
        publisher: &mut P,
    ) -> Result<()> {
        match packet {
            Packet::Counter(counter) => {
                self.push_counter(counter, recv_time);
                Ok(())
            }
            Packet::Irig(irig) => self.on_irig(irig, recv_time, publisher),
            // Already logged by the framer.
            Packet::Timeout(_) | Packet::Error => Ok(()),
            Packet::Limit(_) => {
                debug!("ignoring limit packet on HWP stream");
                Ok(())
            }
        }
    }

    fn push_counter(&mut self, counter: &CounterPacket, recv_time: f64) {
        if self.clock.origin().is_none() {
            self.clock.reset(recv_time);
        }
        self.pending.extend(self.clock.reconstruct(counter));
        self.quadrature.extend_from_slice(&counter.quadrature);
        self.received.push(recv_time);
        self.status.encoder_last_updated = Some(recv_time);
        self.status.clock_regressions = self.clock.regressions();
    }

    fn on_irig<P: FeedPublisher + ?Sized>(
        &mut self,
        irig: &IrigPacket,
        recv_time: f64,
        publisher: &mut P,
    ) -> Result<()> {
        let time = irig.time();
        let rising_edge = irig.rising_edge_ticks();
        self.irig_log.record(&time, rising_edge);

        let unix_time = time.unix_seconds();
        let clock_freq = self.freq.on_irig(rising_edge, unix_time);
        let irig_time = unix_time.unwrap_or(-1);

        let block = FeedMessage::single(BLOCK_IRIG, recv_time)
            .field("irig_time", irig_time)
            .field("rising_edge_count", rising_edge);
        let block = with_calendar(block, &time).field("bbb_clock_freq", clock_freq);
        publisher.publish(FEED, &block)?;
        publisher.publish(
            FEED,
            &synch_pulse_block(BLOCK_IRIG_RAW, irig, recv_time, irig_time),
        )?;

        self.status.irig_time = Some(irig_time);
        self.status.irig_last_updated = Some(recv_time);
        Ok(())
    }

    /// Counter samples waiting to be published.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Publish the pending batch if the schedule says so.
    pub fn publish_if_due<P: FeedPublisher + ?Sized>(&mut self, publisher: &mut P) -> Result<bool> {
        if !self.schedule.is_due(self.pending.len()) {
            return Ok(false);
        }
        self.publish(publisher)?;
        Ok(true)
    }

    /// Publish every pending counter sample.
    pub fn publish<P: FeedPublisher + ?Sized>(&mut self, publisher: &mut P) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let samples = std::mem::take(&mut self.pending);
        let quadrature = std::mem::take(&mut self.quadrature);
        let received = std::mem::take(&mut self.received);
        let batch_time = received.first().copied().unwrap_or_else(unix_now);

        let timestamps: Vec<f64> = samples.iter().map(|s| s.seconds).collect();
        let counter: Vec<u64> = samples.iter().map(|s| s.ticks).collect();
        let index: Vec<u64> = samples.iter().map(|s| u64::from(s.index)).collect();

        publisher.publish(
            FEED,
            &FeedMessage::series(BLOCK_QUAD, received).field("quad", quadrature),
        )?;
        publisher.publish(
            FEED_FULL,
            &FeedMessage::series(BLOCK_COUNTER, timestamps.clone())
                .field("counter", counter.clone())
                .field("counter_index", index.clone()),
        )?;

        let step = self.subsample;
        publisher.publish(
            FEED,
            &FeedMessage::series(
                BLOCK_COUNTER_SUB,
                timestamps.iter().step_by(step).copied().collect(),
            )
            .field(
                "counter_sub",
                counter.iter().step_by(step).copied().collect::<Vec<_>>(),
            )
            .field(
                "counter_index_sub",
                index.iter().step_by(step).copied().collect::<Vec<_>>(),
            ),
        )?;

        let (first, last) = (&samples[0], &samples[samples.len() - 1]);
        let dindex = i64::from(last.index) - i64::from(first.index);
        let dticks = last.ticks.saturating_sub(first.ticks);
        let approx_hwp_freq = self.freq.hwp_frequency(dindex, dticks);
        let counter_stats = diff_stats(&counter);
        let index_stats = diff_stats(&index);
        publisher.publish(
            FEED,
            &FeedMessage::single(BLOCK_FREQ, batch_time)
                .field("approx_hwp_freq", approx_hwp_freq)
                .field("diff_counter_mean", counter_stats.mean)
                .field("diff_index_mean", index_stats.mean)
                .field("diff_counter_std", counter_stats.std)
                .field("diff_index_std", index_stats.std),
        )?;

        debug!(samples = samples.len(), approx_hwp_freq, "published counter batch");
        self.status.approx_hwp_freq = approx_hwp_freq;
        self.schedule.mark_published();
        Ok(())
    }

    /// Publish what is left and flush both feeds.
    pub fn finish<P: FeedPublisher + ?Sized>(&mut self, publisher: &mut P) -> Result<()> {
        self.publish(publisher)?;
        publisher.flush(FEED)?;
        publisher.flush(FEED_FULL)
    }

    pub fn status(&self) -> &HwpStatus {
        &self.status
    }

    /// Session data fields.
    pub fn session_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.status) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        }
    }
}

/// HWP encoder agent: reads packets from `S`, publishes to `P`.
pub struct HwpAgent<S, P> {
    config: HwpConfig,
    lock: TimeoutLock,
    run: RunState,
    reader: Mutex<PacketReader<S>>,
    publisher: Mutex<P>,
}

impl<S: ByteSource + Send, P: FeedPublisher + Send> HwpAgent<S, P> {
    /// Create the agent and register its feeds on `publisher`.
    pub fn new(config: HwpConfig, source: S, mut publisher: P) -> Result<Self> {
        for spec in feed_specs() {
            publisher.register_feed(spec)?;
        }
        let reader = PacketReader::with_config(source, config.frame_config());
        Ok(Self {
            config,
            lock: TimeoutLock::new(),
            run: RunState::default(),
            reader: Mutex::new(reader),
            publisher: Mutex::new(publisher),
        })
    }

    /// Run `acq`, stopping when `cancel` fires or [`AcqProcess::stop_acq`]
    /// is called.
    pub fn acq_until(&self, session: &Session, params: &AcqParams, cancel: CancelToken) -> TaskOutcome {
        self.run
            .run(&self.lock, session, cancel, |cancel| self.acquire(session, params, cancel))
    }

    fn acquire(&self, session: &Session, params: &AcqParams, cancel: &CancelToken) -> Result<()> {
        let mut reader = self.reader.lock();
        let mut publisher = self.publisher.lock();
        let publisher = &mut *publisher;
        let mut stream = HwpStream::new(&self.config);
        info!(
            layout = reader.framer().layout().name(),
            samples = self.config.samples_per_packet,
            "HWP acquisition running"
        );

        let result = Self::pump(&mut reader, publisher, &mut stream, session, params, cancel);
        let finished = stream.finish(publisher);
        session.update(stream.session_fields());

        let stats = reader.framer().stats();
        info!(
            packets = stats.packets,
            resyncs = stats.resyncs,
            discarded_bytes = stats.discarded_bytes,
            faults = stats.faults,
            "HWP acquisition stopped"
        );
        result.and(finished)
    }

    fn pump(
        reader: &mut PacketReader<S>,
        publisher: &mut P,
        stream: &mut HwpStream,
        session: &Session,
        params: &AcqParams,
        cancel: &CancelToken,
    ) -> Result<()> {
        while !cancel.is_cancelled() {
            let packets = reader.poll(cancel)?;
            let now = unix_now();
            let mut published = false;
            for packet in &packets {
                stream.handle(packet, now, publisher)?;
                published |= stream.publish_if_due(publisher)?;
            }
            published |= stream.publish_if_due(publisher)?;
            session.update(stream.session_fields());

            if params.test_mode && published {
                break;
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &HwpConfig {
        &self.config
    }

    /// Consume the agent and return its publisher.
    pub fn into_publisher(self) -> P {
        self.publisher.into_inner()
    }
}

impl<S: ByteSource + Send, P: FeedPublisher + Send> AcqProcess for HwpAgent<S, P> {
    fn acq(&self, session: &Session, params: &AcqParams) -> TaskOutcome {
        self.acq_until(session, params, CancelToken::new())
    }

    fn stop_acq(&self) -> TaskOutcome {
        self.run.request_stop()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use bytes::BytesMut;
    use ocsenc_frame::{encode_packet, IrigTime, StreamLayout, TimeoutPacket, TimeoutSource};
    use ocsenc_transport::ReplaySource;
    use serde_json::json;

    use super::*;
    use crate::publisher::MemoryPublisher;
    use crate::session::{SessionStatus, MSG_EXITED_CLEANLY, MSG_LOCK_FAILED, MSG_NOT_RUNNING};

    const IRIG_T0: i64 = 1_725_232_354;

    fn config(publish_samples: usize) -> HwpConfig {
        HwpConfig {
            samples_per_packet: 1,
            publish_samples,
            publish_interval_secs: 1000.0,
            ..HwpConfig::default()
        }
    }

    fn counter(clock: u32, index: u32) -> Packet {
        Packet::Counter(CounterPacket {
            quadrature: vec![1],
            clock: vec![clock],
            overflow: vec![0],
            index: vec![index],
            error: Vec::new(),
        })
    }

    fn irig(unix: i64, rising_edge: u32) -> Packet {
        Packet::Irig(IrigPacket {
            rising_edge_clock: rising_edge,
            info: IrigTime::from_unix(unix).unwrap().to_info(),
            ..IrigPacket::default()
        })
    }

    fn capture(packets: &[Packet]) -> Vec<u8> {
        let layout = StreamLayout::Hwp { samples: 1 };
        let mut buf = BytesMut::new();
        for packet in packets {
            encode_packet(packet, &layout, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    fn run_capture(config: HwpConfig, data: Vec<u8>) -> (TaskOutcome, Session, MemoryPublisher) {
        let cancel = CancelToken::new();
        let source = ReplaySource::new([data]).cancel_when_exhausted(cancel.clone());
        let agent = HwpAgent::new(config, source, MemoryPublisher::new()).unwrap();
        let session = Session::new();
        let outcome = agent.acq_until(&session, &AcqParams::default(), cancel);
        (outcome, session, agent.into_publisher())
    }

    #[test]
    fn counters_become_relative_times() {
        let data = capture(&[counter(100, 0), counter(200, 1), counter(300, 2)]);
        let (outcome, session, publisher) = run_capture(config(3), data);

        assert_eq!(outcome, TaskOutcome::ok(MSG_EXITED_CLEANLY));
        assert_eq!(session.status(), SessionStatus::Done);

        let blocks = publisher.blocks(BLOCK_COUNTER);
        assert_eq!(blocks.len(), 1);
        let ts = blocks[0].timestamps.as_ref().unwrap();
        assert!((ts[1] - ts[0] - 5e-7).abs() < 1e-9);
        assert!((ts[2] - ts[0] - 1e-6).abs() < 1e-9);
        assert_eq!(blocks[0].get("counter"), Some(&json!([100, 200, 300])));
        assert_eq!(blocks[0].get("counter_index"), Some(&json!([0, 1, 2])));
        assert_eq!(publisher.on_feed(FEED_FULL).len(), 1);

        let quad = publisher.blocks(BLOCK_QUAD);
        assert_eq!(quad[0].get("quad"), Some(&json!([1, 1, 1])));
        assert_eq!(quad[0].timestamps.as_ref().unwrap().len(), 3);

        // No IRIG reference: the frequency estimate stays at zero.
        let freq = publisher.blocks(BLOCK_FREQ);
        assert_eq!(freq[0].get("approx_hwp_freq"), Some(&json!(0.0)));
        assert_eq!(freq[0].get("diff_counter_mean"), Some(&json!(100.0)));
        assert_eq!(session.get("approx_hwp_freq"), Some(json!(0.0)));
        assert_eq!(session.get("clock_regressions"), Some(json!(0)));

        assert_eq!(publisher.flushes(), [FEED, FEED_FULL]);
    }

    #[test]
    fn irig_calibrates_frequency() {
        let data = capture(&[
            irig(IRIG_T0, 1_000),
            irig(IRIG_T0 + 1, 200_001_000),
            counter(0, 0),
            counter(100_000_000, 1140),
            counter(200_000_000, 2280),
        ]);
        let (outcome, session, publisher) = run_capture(config(3), data);
        assert!(outcome.ok);

        let irig_blocks = publisher.blocks(BLOCK_IRIG);
        assert_eq!(irig_blocks.len(), 2);
        assert_eq!(irig_blocks[0].get("irig_time"), Some(&json!(IRIG_T0)));
        assert_eq!(irig_blocks[0].get("bbb_clock_freq"), Some(&json!(0.0)));
        assert_eq!(irig_blocks[1].get("bbb_clock_freq"), Some(&json!(2e8)));
        assert_eq!(irig_blocks[1].get("irig_day"), Some(&json!(245)));
        assert_eq!(irig_blocks[1].get("rising_edge_count"), Some(&json!(200_001_000)));

        let raw = publisher.blocks(BLOCK_IRIG_RAW);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].timestamps.as_ref().unwrap().len(), 10);

        let freq = publisher.blocks(BLOCK_FREQ);
        let approx = freq[0].get("approx_hwp_freq").unwrap().as_f64().unwrap();
        assert!((approx - 2.0).abs() < 1e-9);
        assert_eq!(session.get("irig_time"), Some(json!(IRIG_T0 + 1)));
    }

    #[test]
    fn subsample_keeps_every_nth() {
        let packets: Vec<Packet> = (0..7).map(|i| counter(i * 10, i)).collect();
        let config = HwpConfig {
            subsample: 3,
            ..config(7)
        };
        let (_, _, publisher) = run_capture(config, capture(&packets));
        let sub = publisher.blocks(BLOCK_COUNTER_SUB);
        assert_eq!(sub[0].get("counter_sub"), Some(&json!([0, 30, 60])));
        assert_eq!(sub[0].get("counter_index_sub"), Some(&json!([0, 3, 6])));
        assert_eq!(sub[0].timestamps.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn leftover_samples_published_on_exit() {
        let data = capture(&[
            counter(100, 0),
            Packet::Timeout(TimeoutPacket {
                source: TimeoutSource::Encoder,
            }),
        ]);
        let (outcome, _, publisher) = run_capture(config(4200), data);
        assert!(outcome.ok);
        let blocks = publisher.blocks(BLOCK_COUNTER);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].get("counter"), Some(&json!([100])));
    }

    #[test]
    fn regression_counted_in_session() {
        let data = capture(&[counter(500, 0), counter(400, 1)]);
        let (_, session, publisher) = run_capture(config(4200), data);
        assert_eq!(session.get("clock_regressions"), Some(json!(1)));
        let ts = publisher.blocks(BLOCK_COUNTER)[0].timestamps.clone().unwrap();
        assert!(ts[1] >= ts[0]);
    }

    #[test]
    fn test_mode_stops_after_first_publish() {
        let source = ReplaySource::new([capture(&[counter(1, 0), counter(2, 1)])]);
        let agent = HwpAgent::new(config(1), source, MemoryPublisher::new()).unwrap();
        let params = AcqParams {
            test_mode: true,
            ..AcqParams::default()
        };
        let outcome = agent.acq(&Session::new(), &params);
        assert_eq!(outcome, TaskOutcome::ok(MSG_EXITED_CLEANLY));
        assert_eq!(agent.into_publisher().blocks(BLOCK_COUNTER).len(), 2);
    }

    #[test]
    fn acq_fails_while_locked() {
        let agent =
            HwpAgent::new(config(1), ReplaySource::default(), MemoryPublisher::new()).unwrap();
        let _held = agent.lock.acquire_timeout(Duration::ZERO, "other").unwrap();
        let outcome = agent.acq(&Session::new(), &AcqParams::default());
        assert_eq!(outcome, TaskOutcome::fail(MSG_LOCK_FAILED));
    }

    #[test]
    fn stop_acq_ends_running_loop() {
        let agent = Arc::new(
            HwpAgent::new(config(1), ReplaySource::default(), MemoryPublisher::new()).unwrap(),
        );
        assert_eq!(agent.stop_acq(), TaskOutcome::fail(MSG_NOT_RUNNING));

        let runner = Arc::clone(&agent);
        let handle = thread::spawn(move || runner.acq(&Session::new(), &AcqParams::default()));
        while !agent.stop_acq().ok {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.join().unwrap(), TaskOutcome::ok(MSG_EXITED_CLEANLY));
        assert_eq!(agent.stop_acq(), TaskOutcome::fail(MSG_NOT_RUNNING));
    }

    #[test]
    fn feeds_registered_on_creation() {
        let agent =
            HwpAgent::new(config(1), ReplaySource::default(), MemoryPublisher::new()).unwrap();
        let publisher = agent.into_publisher();
        let names: Vec<&str> = publisher.feeds().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, [FEED, FEED_FULL]);
        assert!(publisher.feeds()[1].exclude_influx);
    }
}
