//! Stimulator encoder agent.
//!
//! A background pump drains the programmable-logic FIFO into a bounded
//! [`SampleQueue`]; the acquisition loop empties the queue at a fixed rate
//! and publishes every edge plus a downsampled summary.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ocsenc_frame::StimEntry;
use ocsenc_transport::{
    default_sysfs_base, find_uio_device, CancelToken, DeviceLock, RegisterBlock, UioFifo, UioMap,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::StimConfig;
use crate::error::{AgentError, Result};
use crate::lock::TimeoutLock;
use crate::publisher::{FeedMessage, FeedPublisher, FeedSpec};
use crate::queue::SampleQueue;
use crate::session::{unix_now, AcqParams, AcqProcess, Pacemaker, RunState, Session, TaskOutcome};

pub const FEED: &str = "stim_enc";
pub const FEED_DOWNSAMPLED: &str = "stim_enc_downsampled";

pub const BLOCK: &str = "stim_enc";
pub const BLOCK_DOWNSAMPLED: &str = "stim_enc_downsampled";

/// Feeds the agent registers.
pub fn feed_specs() -> [FeedSpec; 2] {
    [
        FeedSpec::recorded(FEED, 60).exclude_influx().buffer_time(1.0),
        FeedSpec::recorded(FEED_DOWNSAMPLED, 60).buffer_time(1.0),
    ]
}

/// A FIFO entry with the host time it was popped at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StimSample {
    pub entry: StimEntry,
    /// Unix time of the pop.
    pub utime: f64,
}

/// Background thread moving FIFO entries into a queue.
pub struct FifoPump<R> {
    cancel: CancelToken,
    handle: Option<JoinHandle<UioFifo<R>>>,
}

impl<R: RegisterBlock + Send + 'static> FifoPump<R> {
    /// Start draining `fifo` every `interval`.
    pub fn spawn(
        mut fifo: UioFifo<R>,
        queue: Arc<SampleQueue<StimSample>>,
        interval: Duration,
    ) -> Result<Self> {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name("stim-pump".into())
            .spawn(move || {
                debug!(?interval, "fifo pump started");
                loop {
                    let popped = fifo.drain(|words| {
                        queue.push(StimSample {
                            entry: StimEntry::from_words(words),
                            utime: unix_now(),
                        });
                    });
                    if popped > 0 {
                        debug!(popped, queued = queue.len(), "drained fifo");
                    }
                    if !token.sleep(interval) {
                        break;
                    }
                }
                debug!("fifo pump stopped");
                fifo
            })?;
        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// Stop the thread and hand the FIFO back.
    pub fn stop(mut self) -> Result<UioFifo<R>> {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| AgentError::Worker("stim-pump panicked".into())),
            None => Err(AgentError::Worker("stim-pump already stopped".into())),
        }
    }
}

impl<R> Drop for FifoPump<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Turns drained samples into feed messages.
#[derive(Debug, Clone)]
pub struct StimStream {
    time_prev: f64,
    tai_latest: f64,
    state_latest: u8,
    freq: f64,
}

impl StimStream {
    /// Start measuring the pulse rate at `start` (unix seconds).
    pub fn new(start: f64) -> Self {
        Self {
            time_prev: start,
            tai_latest: 0.0,
            state_latest: 0,
            freq: 0.0,
        }
    }

    /// Publish every sample on the full-rate feed.
    pub fn publish_samples<P: FeedPublisher + ?Sized>(
        &mut self,
        samples: &[StimSample],
        publisher: &mut P,
    ) -> Result<()> {
        let Some(last) = samples.last() else {
            return Ok(());
        };
        let message = FeedMessage::series(BLOCK, samples.iter().map(|s| s.utime).collect())
            .field(
                "timestamps_tai",
                samples.iter().map(|s| s.entry.time.tai()).collect::<Vec<_>>(),
            )
            .field(
                "state",
                samples.iter().map(|s| s.entry.state).collect::<Vec<_>>(),
            );
        publisher.publish(FEED, &message)?;
        self.tai_latest = last.entry.time.tai();
        self.state_latest = last.entry.state;
        Ok(())
    }

    /// One loop iteration at `now`: publish the samples, then the summary.
    pub fn process<P: FeedPublisher + ?Sized>(
        &mut self,
        samples: &[StimSample],
        now: f64,
        publisher: &mut P,
    ) -> Result<()> {
        self.publish_samples(samples, publisher)?;

        let dt = now - self.time_prev;
        self.freq = if dt > 0.0 {
            samples.len() as f64 / dt
        } else {
            0.0
        };
        self.time_prev = now;

        publisher.publish(
            FEED_DOWNSAMPLED,
            &FeedMessage::single(BLOCK_DOWNSAMPLED, now)
                .field("timestamps_tai", self.tai_latest)
                .field("state", self.state_latest)
                .field("freq", self.freq),
        )
    }

    /// Edge rate measured by the last [`StimStream::process`] call.
    pub fn freq(&self) -> f64 {
        self.freq
    }

    /// Session data fields.
    pub fn session_fields(&self, now: f64, dropped: u64) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("timestamp_tai".into(), self.tai_latest.into());
        fields.insert("state".into(), self.state_latest.into());
        fields.insert("freq".into(), self.freq.into());
        fields.insert("timestamp".into(), now.into());
        fields.insert("dropped".into(), dropped.into());
        fields
    }
}

/// Stimulator encoder agent reading a UIO FIFO with register block `R`.
pub struct StimAgent<R, P> {
    config: StimConfig,
    lock: TimeoutLock,
    run: RunState,
    fifo: Mutex<Option<UioFifo<R>>>,
    queue: Arc<SampleQueue<StimSample>>,
    publisher: Mutex<P>,
    device_lock: Option<DeviceLock>,
}

impl<P: FeedPublisher + Send> StimAgent<UioMap, P> {
    /// Take the device lock and map the FIFO. The device is discovered
    /// through sysfs unless configured.
    pub fn open(config: StimConfig, publisher: P) -> Result<Self> {
        let device_lock = DeviceLock::acquire(&config.lock_path)?;
        let path = match &config.device {
            Some(path) => path.clone(),
            None => find_uio_device(default_sysfs_base())?,
        };
        info!(?path, "opening stimulator encoder FIFO");
        let fifo = UioFifo::open(&path)?;
        let mut agent = Self::new(config, fifo, publisher)?;
        agent.device_lock = Some(device_lock);
        Ok(agent)
    }
}

impl<R: RegisterBlock + Send + 'static, P: FeedPublisher + Send> StimAgent<R, P> {
    /// Create the agent around an open FIFO and register its feeds.
    pub fn new(config: StimConfig, fifo: UioFifo<R>, mut publisher: P) -> Result<Self> {
        for spec in feed_specs() {
            publisher.register_feed(spec)?;
        }
        let queue = Arc::new(SampleQueue::new(
            config.queue_capacity,
            config.overflow_policy,
        ));
        Ok(Self {
            config,
            lock: TimeoutLock::new(),
            run: RunState::default(),
            fifo: Mutex::new(Some(fifo)),
            queue,
            publisher: Mutex::new(publisher),
            device_lock: None,
        })
    }

    /// Run `acq` until `cancel` fires or a stop is requested.
    pub fn acq_until(&self, session: &Session, params: &AcqParams, cancel: CancelToken) -> TaskOutcome {
        self.run
            .run(&self.lock, session, cancel, |cancel| self.acquire(session, params, cancel))
    }

    fn acquire(&self, session: &Session, params: &AcqParams, cancel: &CancelToken) -> Result<()> {
        let fifo = self
            .fifo
            .lock()
            .take()
            .ok_or_else(|| AgentError::Worker("FIFO was not returned by the previous run".into()))?;
        let pump = FifoPump::spawn(fifo, Arc::clone(&self.queue), self.config.pump_interval())?;

        let frequency = params
            .sampling_frequency
            .unwrap_or(self.config.sampling_frequency);
        let mut pace = Pacemaker::new(frequency);
        let mut publisher = self.publisher.lock();
        let publisher = &mut *publisher;
        let mut stream = StimStream::new(unix_now());
        info!(frequency, device_lock = ?self.device_lock.as_ref().map(|l| l.path()), "stim acquisition running");

        let mut result = Ok(());
        loop {
            let now = unix_now();
            let samples = self.queue.drain();
            if let Err(err) = stream.process(&samples, now, publisher) {
                result = Err(err);
                break;
            }
            session.update(stream.session_fields(now, self.queue.dropped()));

            let published = !samples.is_empty();
            if (params.test_mode && published) || !pace.sleep(cancel) {
                break;
            }
        }

        let stopped = pump.stop().map(|fifo| {
            *self.fifo.lock() = Some(fifo);
        });
        if let Err(err) = &stopped {
            warn!(error = %err, "could not stop fifo pump");
        }
        let leftover = self.queue.drain();
        let finished = stream
            .publish_samples(&leftover, publisher)
            .and_then(|()| publisher.flush(FEED))
            .and_then(|()| publisher.flush(FEED_DOWNSAMPLED));
        result.and(stopped).and(finished)
    }

    /// Items currently waiting in the sample queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn config(&self) -> &StimConfig {
        &self.config
    }

    /// Consume the agent and return its publisher.
    pub fn into_publisher(self) -> P {
        self.publisher.into_inner()
    }
}

impl<R: RegisterBlock + Send + 'static, P: FeedPublisher + Send> AcqProcess for StimAgent<R, P> {
    fn acq(&self, session: &Session, params: &AcqParams) -> TaskOutcome {
        self.acq_until(session, params, CancelToken::new())
    }

    fn stop_acq(&self) -> TaskOutcome {
        self.run.request_stop()
    }
}
