use std::time::{Duration, Instant};

use ocsenc_transport::CancelToken;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::lock::TimeoutLock;

/// Returned when the acquisition lock is held by another task.
pub const MSG_LOCK_FAILED: &str = "Could not acquire lock.";
/// Returned by a stop request while nothing is running.
pub const MSG_NOT_RUNNING: &str = "acq is not currently running.";
/// Returned by a stop request that was accepted.
pub const MSG_STOP_REQUESTED: &str = "requested to stop taking data.";
/// Returned when the acquisition loop ends normally.
pub const MSG_EXITED_CLEANLY: &str = "Acquisition exited cleanly.";

/// Result of an agent task: success flag plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub ok: bool,
    pub message: String,
}

impl TaskOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Lifecycle of a task session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Starting,
    Running,
    Stopping,
    Done,
}

/// Status and latest data of one task invocation, readable while it runs.
#[derive(Debug)]
pub struct Session {
    status: Mutex<SessionStatus>,
    data: Mutex<Map<String, Value>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(SessionStatus::Starting),
            data: Mutex::new(Map::new()),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: SessionStatus) {
        *self.status.lock() = status;
    }

    /// Replace the session data.
    pub fn set_data(&self, data: Map<String, Value>) {
        *self.data.lock() = data;
    }

    /// Merge fields into the session data.
    pub fn update(&self, fields: Map<String, Value>) {
        self.data.lock().extend(fields);
    }

    /// Snapshot of the session data.
    pub fn data(&self) -> Value {
        Value::Object(self.data.lock().clone())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }
}

/// Parameters of the `acq` process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcqParams {
    /// Loop rate in Hz for agents that pace themselves; `None` keeps the
    /// agent default.
    pub sampling_frequency: Option<f64>,
    /// Stop after the first publish cycle.
    pub test_mode: bool,
}

/// A long-running acquisition process with a stop request.
pub trait AcqProcess: Send + Sync {
    /// Run until stopped. Blocks the calling thread.
    fn acq(&self, session: &Session, params: &AcqParams) -> TaskOutcome;

    /// Ask a running `acq` to return.
    fn stop_acq(&self) -> TaskOutcome;
}

/// Stop handle slot shared by `acq` and `stop_acq`.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    token: Mutex<Option<CancelToken>>,
}

impl RunState {
    pub(crate) fn start(&self, token: CancelToken) {
        *self.token.lock() = Some(token);
    }

    pub(crate) fn finish(&self) {
        *self.token.lock() = None;
    }

    /// Run `body` as the `acq` job of `lock`, publishing progress on
    /// `session`. Stop requests cancel `cancel`.
    pub(crate) fn run(
        &self,
        lock: &TimeoutLock,
        session: &Session,
        cancel: CancelToken,
        body: impl FnOnce(&CancelToken) -> Result<()>,
    ) -> TaskOutcome {
        let Some(_guard) = lock.acquire_timeout(Duration::ZERO, "acq") else {
            warn!(
                "Could not start acq because {} is already running",
                lock.job().unwrap_or_default()
            );
            return TaskOutcome::fail(MSG_LOCK_FAILED);
        };

        self.start(cancel.clone());
        session.set_data(Map::new());
        session.set_status(SessionStatus::Running);
        info!("acq started");

        let result = body(&cancel);

        self.finish();
        session.set_status(SessionStatus::Done);
        match result {
            Ok(()) => {
                info!("acq finished");
                TaskOutcome::ok(MSG_EXITED_CLEANLY)
            }
            Err(err) => {
                error!(error = %err, "acq failed");
                TaskOutcome::fail(err.to_string())
            }
        }
    }

    pub(crate) fn request_stop(&self) -> TaskOutcome {
        match self.token.lock().as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                TaskOutcome::ok(MSG_STOP_REQUESTED)
            }
            _ => TaskOutcome::fail(MSG_NOT_RUNNING),
        }
    }
}

/// Fixed-rate loop pacing that does not accumulate drift.
#[derive(Debug, Clone)]
pub struct Pacemaker {
    period: Duration,
    next: Instant,
}

impl Pacemaker {
    pub const MAX_PERIOD: Duration = Duration::from_secs(86_400);

    /// Pacemaker ticking at `frequency` Hz. Rates that are not positive or
    /// slower than one tick per [`Pacemaker::MAX_PERIOD`] fall back to 1 Hz.
    pub fn new(frequency: f64) -> Self {
        let period = Some(frequency)
            .filter(|f| f.is_finite() && *f > 0.0)
            .and_then(|f| Duration::try_from_secs_f64(1.0 / f).ok())
            .filter(|period| *period <= Self::MAX_PERIOD)
            .unwrap_or(Duration::from_secs(1));
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    /// Sleep until the next tick. Returns false if cancelled first.
    pub fn sleep(&mut self, cancel: &CancelToken) -> bool {
        let now = Instant::now();
        if self.next <= now {
            // Fell behind: restart the grid instead of bursting.
            self.next = now + self.period;
            return !cancel.is_cancelled();
        }
        let wait = self.next - now;
        self.next += self.period;
        cancel.sleep(wait)
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) * 1e-6
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn session_merges_fields() {
        let session = Session::new();
        assert_eq!(session.status(), SessionStatus::Starting);

        let mut fields = Map::new();
        fields.insert("a".into(), json!(1));
        session.update(fields);
        let mut fields = Map::new();
        fields.insert("b".into(), json!(2));
        session.update(fields);

        assert_eq!(session.data(), json!({"a": 1, "b": 2}));
        assert_eq!(session.get("b"), Some(json!(2)));
    }

    #[test]
    fn acq_params_defaults() {
        let params: AcqParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params, AcqParams::default());

        let params: AcqParams = serde_json::from_str(r#"{"test_mode": true}"#).unwrap();
        assert!(params.test_mode);
        assert_eq!(params.sampling_frequency, None);
    }

    #[test]
    fn stop_without_run_fails() {
        let state = RunState::default();
        assert_eq!(state.request_stop(), TaskOutcome::fail(MSG_NOT_RUNNING));

        let token = CancelToken::new();
        state.start(token.clone());
        assert_eq!(state.request_stop(), TaskOutcome::ok(MSG_STOP_REQUESTED));
        assert!(token.is_cancelled());
        assert_eq!(state.request_stop(), TaskOutcome::fail(MSG_NOT_RUNNING));

        state.finish();
        assert!(!state.request_stop().ok);
    }

    #[test]
    fn run_reports_lock_contention() {
        let lock = TimeoutLock::new();
        let state = RunState::default();
        let session = Session::new();

        let _held = lock.acquire_timeout(Duration::ZERO, "other").unwrap();
        let outcome = state.run(&lock, &session, CancelToken::new(), |_| Ok(()));
        assert_eq!(outcome, TaskOutcome::fail(MSG_LOCK_FAILED));
        assert_eq!(session.status(), SessionStatus::Starting);
    }

    #[test]
    fn run_maps_body_result() {
        let lock = TimeoutLock::new();
        let state = RunState::default();
        let session = Session::new();

        let outcome = state.run(&lock, &session, CancelToken::new(), |cancel| {
            assert!(!cancel.is_cancelled());
            Ok(())
        });
        assert_eq!(outcome, TaskOutcome::ok(MSG_EXITED_CLEANLY));
        assert_eq!(session.status(), SessionStatus::Done);
        assert_eq!(lock.job(), None);

        let outcome = state.run(&lock, &session, CancelToken::new(), |_| {
            Err(crate::error::AgentError::UnknownFeed("x".into()))
        });
        assert!(!outcome.ok);
        assert_eq!(outcome.message, "feed x is not registered");
    }

    #[test]
    fn pacemaker_wakes_on_cancel() {
        let mut pace = Pacemaker::new(0.01);
        let cancel = CancelToken::new();
        cancel.cancel();
        let start = Instant::now();
        assert!(!pace.sleep(&cancel));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn pacemaker_rejects_bad_rate() {
        assert_eq!(Pacemaker::new(0.0).period(), Duration::from_secs(1));
        assert_eq!(Pacemaker::new(4.0).period(), Duration::from_millis(250));
        assert_eq!(Pacemaker::new(f64::NAN).period(), Duration::from_secs(1));
    }

    #[test]
    fn pacemaker_rejects_rates_below_duration_range() {
        assert_eq!(Pacemaker::new(1e-300).period(), Duration::from_secs(1));
        assert_eq!(Pacemaker::new(f64::MIN_POSITIVE).period(), Duration::from_secs(1));
        assert_eq!(Pacemaker::new(1e-6).period(), Duration::from_secs(1));
        assert_eq!(Pacemaker::new(0.5).period(), Duration::from_secs(2));
    }

    #[test]
    fn unix_now_is_recent() {
        assert!(unix_now() > 1.6e9);
    }
}
