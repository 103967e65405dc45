//! Wiregrid encoder agent.
//!
//! Same BeagleBone protocol as the HWP encoder, with per-sample quadrature
//! and error words. The rough feed keeps one sample per packet plus the
//! belt rotation speed; the full feed keeps everything.

use ocsenc_frame::{CounterPacket, IrigPacket, Packet, PacketReader};
use ocsenc_transport::{ByteSource, CancelToken};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::clock::{wiregrid_rotation_speed, ClockModel, FrequencyEstimator};
use crate::config::WiregridConfig;
use crate::error::Result;
use crate::irig_feed::{synch_pulse_block, with_calendar, IrigLog};
use crate::lock::TimeoutLock;
use crate::publisher::{FeedMessage, FeedPublisher, FeedSpec};
use crate::queue::PublishSchedule;
use crate::session::{unix_now, AcqParams, AcqProcess, RunState, Session, TaskOutcome};

pub const FEED_ROUGH: &str = "wgencoder_rough";
pub const FEED_FULL: &str = "wgencoder_full";

pub const BLOCK_IRIG: &str = "wgencoder_irig";
pub const BLOCK_IRIG_RAW: &str = "wgencoder_irig_raw";
pub const BLOCK_ROUGH: &str = "wgencoder_rough";
pub const BLOCK_FULL: &str = "wgencoder_full";

/// Feeds the agent registers.
pub fn feed_specs() -> [FeedSpec; 2] {
    [
        FeedSpec::recorded(FEED_ROUGH, 60).buffer_time(0.5),
        FeedSpec::recorded(FEED_FULL, 60).exclude_influx(),
    ]
}

/// Latest IRIG values in the session data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IrigStatus {
    pub last_updated: Option<f64>,
    pub irig_time: Option<i64>,
    pub rising_edge_count: u64,
    pub edge_diff: i64,
    pub irig_sec: u32,
    pub irig_min: u32,
    pub irig_hour: u32,
    pub irig_day: u32,
    pub irig_year: u32,
}

/// Latest encoder sample in the session data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EncoderStatus {
    pub last_updated: Option<f64>,
    pub quadrature: u32,
    pub pru_clock: u64,
    pub reference_degree: f64,
    pub error: u32,
}

/// Turns decoded wiregrid packets into feed messages.
#[derive(Debug)]
pub struct WiregridStream {
    clock: ClockModel,
    clock_ref: FrequencyEstimator,
    schedule: PublishSchedule,
    counts_on_belt: u32,
    reference_count_max: u32,
    prev_rising_edge: u64,
    irig_log: IrigLog,

    quadrature: Vec<u32>,
    ticks: Vec<u64>,
    seconds: Vec<f64>,
    reference: Vec<u32>,
    error: Vec<u32>,
    // One entry per packet.
    received: Vec<f64>,
    rotation_speed: Vec<f64>,
    first_of_packet: Vec<usize>,

    irig_status: IrigStatus,
    enc_status: EncoderStatus,
}

impl WiregridStream {
    pub fn new(config: &WiregridConfig) -> Self {
        Self {
            clock: ClockModel::bbb(0.0),
            clock_ref: FrequencyEstimator::new(0),
            schedule: PublishSchedule::new(config.publish_samples, config.publish_interval()),
            counts_on_belt: config.counts_on_belt.max(1),
            reference_count_max: config.reference_count_max.max(1),
            prev_rising_edge: 0,
            irig_log: IrigLog::default(),
            quadrature: Vec::new(),
            ticks: Vec::new(),
            seconds: Vec::new(),
            reference: Vec::new(),
            error: Vec::new(),
            received: Vec::new(),
            rotation_speed: Vec::new(),
            first_of_packet: Vec::new(),
            irig_status: IrigStatus::default(),
            enc_status: EncoderStatus::default(),
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
            Packet::Timeout(_) | Packet::Error => Ok(()),
            Packet::Limit(_) => {
                debug!("ignoring limit packet on wiregrid stream");
                Ok(())
            }
        }
    }

    fn reference_degree(&self, reference: u32) -> f64 {
        f64::from(reference) * 360.0 / f64::from(self.counts_on_belt)
    }

    fn push_counter(&mut self, counter: &CounterPacket, recv_time: f64) {
        if counter.is_empty() {
            return;
        }
        if self.clock.origin().is_none() {
            self.clock.reset(recv_time);
        }
        let start = self.ticks.len();
        for sample in self.clock.reconstruct(counter) {
            self.ticks.push(sample.ticks);
            self.seconds.push(sample.seconds);
            self.reference.push(sample.index % self.reference_count_max);
        }
        self.quadrature.extend_from_slice(&counter.quadrature);
        self.error.extend_from_slice(&counter.error);

        let speed = wiregrid_rotation_speed(
            &self.ticks[start..],
            &self.reference[start..],
            self.counts_on_belt,
        );
        self.first_of_packet.push(start);
        self.rotation_speed.push(speed);
        self.received.push(recv_time);

        let last = self.ticks.len() - 1;
        self.enc_status = EncoderStatus {
            last_updated: Some(recv_time),
            quadrature: self.quadrature.get(last).copied().unwrap_or_default(),
            pru_clock: self.ticks[last],
            reference_degree: self.reference_degree(self.reference[last]),
            error: self.error.get(last).copied().unwrap_or_default(),
        };
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

        let edge_diff = i64::try_from(i128::from(rising_edge) - i128::from(self.prev_rising_edge))
            .unwrap_or_default();
        self.prev_rising_edge = rising_edge;

        let unix_time = time.unix_seconds();
        let clock_freq = self.clock_ref.on_irig(rising_edge, unix_time);
        let irig_time = unix_time.unwrap_or(-1);

        let block = FeedMessage::single(BLOCK_IRIG, recv_time)
            .field("irig_time", irig_time)
            .field("rising_edge_count", rising_edge)
            .field("edge_diff", edge_diff);
        let block = with_calendar(block, &time).field("bbb_clock_freq", clock_freq);
        publisher.publish(FEED_ROUGH, &block)?;
        publisher.publish(
            FEED_FULL,
            &synch_pulse_block(BLOCK_IRIG_RAW, irig, recv_time, irig_time),
        )?;

        self.irig_status = IrigStatus {
            last_updated: Some(recv_time),
            irig_time: Some(irig_time),
            rising_edge_count: rising_edge,
            edge_diff,
            irig_sec: time.sec,
            irig_min: time.min,
            irig_hour: time.hour,
            irig_day: time.day,
            irig_year: time.year,
        };
        Ok(())
    }

    /// Counter samples waiting to be published.
    pub fn pending(&self) -> usize {
        self.ticks.len()
    }

    /// Publish the pending batch if the schedule says so.
    pub fn publish_if_due<P: FeedPublisher + ?Sized>(&mut self, publisher: &mut P) -> Result<bool> {
        if !self.schedule.is_due(self.ticks.len()) {
            return Ok(false);
        }
        self.publish(publisher)?;
        Ok(true)
    }

    /// Publish every pending counter sample.
    pub fn publish<P: FeedPublisher + ?Sized>(&mut self, publisher: &mut P) -> Result<()> {
        if self.ticks.is_empty() {
            return Ok(());
        }
        let quadrature = std::mem::take(&mut self.quadrature);
        let ticks = std::mem::take(&mut self.ticks);
        let seconds = std::mem::take(&mut self.seconds);
        let reference = std::mem::take(&mut self.reference);
        let error = std::mem::take(&mut self.error);
        let received = std::mem::take(&mut self.received);
        let rotation_speed = std::mem::take(&mut self.rotation_speed);
        let firsts = std::mem::take(&mut self.first_of_packet);

        let pick_u32 = |values: &[u32]| -> Vec<u32> {
            firsts.iter().filter_map(|&i| values.get(i).copied()).collect()
        };
        let reference_degree: Vec<f64> = firsts
            .iter()
            .map(|&i| self.reference_degree(reference[i]))
            .collect();

        publisher.publish(
            FEED_ROUGH,
            &FeedMessage::series(BLOCK_ROUGH, received)
                .field("quadrature", pick_u32(&quadrature))
                .field(
                    "pru_clock",
                    firsts.iter().map(|&i| ticks[i]).collect::<Vec<_>>(),
                )
                .field("reference_degree", reference_degree)
                .field("error", pick_u32(&error))
                .field("rotation_speed", rotation_speed),
        )?;

        let samples = ticks.len();
        publisher.publish(
            FEED_FULL,
            &FeedMessage::series(BLOCK_FULL, seconds)
                .field("quadrature", quadrature)
                .field("pru_clock", ticks)
                .field("reference_count", reference)
                .field("error", error),
        )?;

        debug!(samples, packets = firsts.len(), "published wiregrid batch");
        self.schedule.mark_published();
        Ok(())
    }

    /// Publish what is left and flush both feeds.
    pub fn finish<P: FeedPublisher + ?Sized>(&mut self, publisher: &mut P) -> Result<()> {
        self.publish(publisher)?;
        publisher.flush(FEED_ROUGH)?;
        publisher.flush(FEED_FULL)
    }

    pub fn irig_status(&self) -> &IrigStatus {
        &self.irig_status
    }

    pub fn encoder_status(&self) -> &EncoderStatus {
        &self.enc_status
    }

    /// Session data: `{"timestamp", "fields": {"irig_data", "enc_data"}}`.
    pub fn session_data(&self, now: f64) -> Map<String, Value> {
        let value = json!({
            "timestamp": now,
            "fields": {
                "irig_data": self.irig_status,
                "enc_data": self.enc_status,
            }
        });
        match value {
            Value::Object(data) => data,
            _ => Map::new(),
        }
    }
}

/// Wiregrid encoder agent: reads packets from `S`, publishes to `P`.
pub struct WiregridAgent<S, P> {
    config: WiregridConfig,
    lock: TimeoutLock,
    run: RunState,
    reader: Mutex<PacketReader<S>>,
    publisher: Mutex<P>,
}

impl<S: ByteSource + Send, P: FeedPublisher + Send> WiregridAgent<S, P> {
    /// Create the agent and register its feeds on `publisher`.
    pub fn new(config: WiregridConfig, source: S, mut publisher: P) -> Result<Self> {
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

    /// Run `acq` until `cancel` fires or a stop is requested.
    pub fn acq_until(&self, session: &Session, params: &AcqParams, cancel: CancelToken) -> TaskOutcome {
        self.run
            .run(&self.lock, session, cancel, |cancel| self.acquire(session, params, cancel))
    }

    fn acquire(&self, session: &Session, params: &AcqParams, cancel: &CancelToken) -> Result<()> {
        let mut reader = self.reader.lock();
        let mut publisher = self.publisher.lock();
        let publisher = &mut *publisher;
        let mut stream = WiregridStream::new(&self.config);
        info!(
            port = self.config.port,
            samples = self.config.samples_per_packet,
            "wiregrid acquisition running"
        );

        let mut result = Ok(());
        while !cancel.is_cancelled() {
            match Self::step(&mut reader, publisher, &mut stream, cancel) {
                Ok(published) => {
                    session.set_data(stream.session_data(unix_now()));
                    if params.test_mode && published {
                        break;
                    }
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }

        let finished = stream.finish(publisher);
        session.set_data(stream.session_data(unix_now()));
        let stats = reader.framer().stats();
        info!(
            packets = stats.packets,
            resyncs = stats.resyncs,
            discarded_bytes = stats.discarded_bytes,
            "wiregrid acquisition stopped"
        );
        result.and(finished)
    }

    fn step(
        reader: &mut PacketReader<S>,
        publisher: &mut P,
        stream: &mut WiregridStream,
        cancel: &CancelToken,
    ) -> Result<bool> {
        let packets = reader.poll(cancel)?;
        let now = unix_now();
        let mut published = false;
        for packet in &packets {
            stream.handle(packet, now, publisher)?;
            published |= stream.publish_if_due(publisher)?;
        }
        published |= stream.publish_if_due(publisher)?;
        Ok(published)
    }

    pub fn config(&self) -> &WiregridConfig {
        &self.config
    }

    /// Consume the agent and return its publisher.
    pub fn into_publisher(self) -> P {
        self.publisher.into_inner()
    }
}

impl<S: ByteSource + Send, P: FeedPublisher + Send> AcqProcess for WiregridAgent<S, P> {
    fn acq(&self, session: &Session, params: &AcqParams) -> TaskOutcome {
        self.acq_until(session, params, CancelToken::new())
    }

    fn stop_acq(&self) -> TaskOutcome {
        self.run.request_stop()
    }
}
