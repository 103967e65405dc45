use std::fmt;
use std::io;

use ocsenc_agent::{AgentError, TaskOutcome, MSG_LOCK_FAILED};
use ocsenc_frame::FrameError;
use ocsenc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const LOCKED: i32 = 4;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Locked(_) => CliError::new(LOCKED, format!("{context}: {err}")),
        TransportError::Io(source) => io_error(context, source),
        TransportError::Bind { .. }
        | TransportError::Open { .. }
        | TransportError::DeviceNotFound(_)
        | TransportError::Shutdown => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::Io(source) => io_error(context, source),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn agent_error(context: &str, err: AgentError) -> CliError {
    match err {
        AgentError::Transport(err) => transport_error(context, err),
        AgentError::Frame(err) => frame_error(context, err),
        AgentError::Io(source) => io_error(context, source),
        AgentError::Json(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

/// Exit code for a finished task.
pub fn outcome_code(outcome: &TaskOutcome) -> i32 {
    if outcome.ok {
        SUCCESS
    } else if outcome.message == MSG_LOCK_FAILED {
        LOCKED
    } else {
        FAILURE
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn locked_device_maps_to_locked() {
        let err = transport_error("open", TransportError::Locked(PathBuf::from("/tmp/.stim-lock")));
        assert_eq!(err.code, LOCKED);
        assert!(err.message.starts_with("open: "));
    }

    #[test]
    fn framing_errors_are_data_invalid() {
        let err = agent_error(
            "decode",
            AgentError::Frame(FrameError::UnknownHeader {
                header: 0xDEAD,
                layout: "hwp",
            }),
        );
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn outcome_codes() {
        assert_eq!(outcome_code(&TaskOutcome::ok("done")), SUCCESS);
        assert_eq!(outcome_code(&TaskOutcome::fail(MSG_LOCK_FAILED)), LOCKED);
        assert_eq!(outcome_code(&TaskOutcome::fail("boom")), FAILURE);
    }
}
