//! Encoder acquisition agents.
//!
//! Turns decoded packets into timestamped samples and publishes them on
//! named feeds:
//!
//! - [`clock`]: tick merging, tick-to-seconds conversion and rough rate
//!   estimates
//! - [`queue`]: bounded sample queue and publish scheduling
//! - [`publisher`]: feed messages and the [`FeedPublisher`] seam
//! - [`hwp`], [`wiregrid`], [`stim`]: the acquisition processes
//!
//! Each agent implements [`AcqProcess`]: `acq` blocks until stopped and
//! `stop_acq` asks it to return.

pub mod clock;
pub mod config;
pub mod error;
pub mod hwp;
mod irig_feed;
pub mod lock;
pub mod publisher;
pub mod queue;
pub mod session;
#[cfg(unix)]
pub mod stim;
pub mod wiregrid;

pub use clock::{
    count_to_time, diff_stats, wiregrid_rotation_speed, ClockModel, DecodedSample, DiffStats,
    FrequencyEstimator, SampleFlags, BBB_CLOCK_FREQ, BBB_TICK_PERIOD,
};
pub use config::{HwpConfig, StimConfig, WiregridConfig};
pub use error::{AgentError, Result};
pub use hwp::{HwpAgent, HwpStream};
pub use lock::{LockGuard, TimeoutLock};
pub use publisher::{FeedMessage, FeedPublisher, FeedSpec, JsonLinesPublisher, MemoryPublisher};
pub use queue::{OverflowPolicy, PublishSchedule, SampleQueue};
pub use session::{
    unix_now, AcqParams, AcqProcess, Pacemaker, Session, SessionStatus, TaskOutcome,
    MSG_EXITED_CLEANLY, MSG_LOCK_FAILED, MSG_NOT_RUNNING, MSG_STOP_REQUESTED,
};
#[cfg(unix)]
pub use stim::{FifoPump, StimAgent, StimSample, StimStream};
pub use wiregrid::{WiregridAgent, WiregridStream};
