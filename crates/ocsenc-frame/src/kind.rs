//! Packet header magic values.
//!
//! Every packet starts with one little-endian u32 naming its kind.

/// Encoder counter packet (BeagleBone HWP and wiregrid readout).
pub const ENCODER: u32 = 0x1EAF;

/// IRIG-B time reference packet.
pub const IRIG: u32 = 0xCAFE;

/// IRIG synchronization-pulse timing error.
pub const ERROR: u32 = 0xE12A;

/// Readout timeout; followed by one word naming what timed out.
pub const TIMEOUT: u32 = 0x1234;

/// Gripper encoder packet.
pub const GRIPPER_ENCODER: u32 = 0xBAD0;

/// Gripper limit-switch packet.
pub const GRIPPER_LIMIT: u32 = 0xF00D;

/// Returns a human-readable name for a header value.
pub fn header_name(header: u32) -> &'static str {
    match header {
        ENCODER => "ENCODER",
        IRIG => "IRIG",
        ERROR => "ERROR",
        TIMEOUT => "TIMEOUT",
        GRIPPER_ENCODER => "GRIPPER_ENCODER",
        GRIPPER_LIMIT => "GRIPPER_LIMIT",
        _ => "UNKNOWN",
    }
}

/// Returns true if the header is one of the known magic values.
pub fn is_known(header: u32) -> bool {
    header_name(header) != "UNKNOWN"
}
