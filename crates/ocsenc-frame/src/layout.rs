use crate::kind::{ENCODER, ERROR, GRIPPER_ENCODER, GRIPPER_LIMIT, IRIG, TIMEOUT};

/// Samples per counter packet sent by the HWP BeagleBone firmware.
pub const HWP_SAMPLES_PER_PACKET: usize = 120;

/// Samples per counter packet sent by the wiregrid BeagleBone firmware.
pub const WIREGRID_SAMPLES_PER_PACKET: usize = 100;

/// Samples per gripper encoder packet.
pub const GRIPPER_SAMPLES_PER_PACKET: usize = 120;

/// IRIG packet: header, clock, overflow, info×10, synch×10, synch overflow×10.
pub const IRIG_PACKET_SIZE: usize = 132;

/// Timeout packet: header, type.
pub const TIMEOUT_PACKET_SIZE: usize = 8;

/// Error packet: header only.
pub const ERROR_PACKET_SIZE: usize = 4;

/// Limit packet: header, clock, overflow, state.
pub const LIMIT_PACKET_SIZE: usize = 16;

/// Fixed packet layout of one readout stream.
///
/// The sample count must match the firmware on the readout board; it is
/// not carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLayout {
    /// `[0x1EAF][quad][clock×N][overflow×N][index×N]`
    Hwp { samples: usize },
    /// `[0x1EAF][quad×N][clock×N][overflow×N][refcount×N][error×N]`
    Wiregrid { samples: usize },
    /// `[0xBAD0][clock×N][overflow×N][state×N]`
    Gripper { samples: usize },
}

impl StreamLayout {
    /// HWP encoder layout with the stock firmware sample count.
    pub const HWP: Self = Self::Hwp {
        samples: HWP_SAMPLES_PER_PACKET,
    };

    /// Wiregrid encoder layout with the stock firmware sample count.
    pub const WIREGRID: Self = Self::Wiregrid {
        samples: WIREGRID_SAMPLES_PER_PACKET,
    };

    /// Gripper layout with the stock firmware sample count.
    pub const GRIPPER: Self = Self::Gripper {
        samples: GRIPPER_SAMPLES_PER_PACKET,
    };

    /// Samples per counter packet.
    pub fn samples(&self) -> usize {
        match *self {
            Self::Hwp { samples } | Self::Wiregrid { samples } | Self::Gripper { samples } => {
                samples
            }
        }
    }

    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hwp { .. } => "hwp",
            Self::Wiregrid { .. } => "wiregrid",
            Self::Gripper { .. } => "gripper",
        }
    }

    /// Header that introduces counter packets on this stream.
    pub fn counter_header(&self) -> u32 {
        match self {
            Self::Gripper { .. } => GRIPPER_ENCODER,
            _ => ENCODER,
        }
    }

    /// Size in bytes of the counter packet, header included.
    pub fn counter_packet_size(&self) -> usize {
        let n = self.samples();
        match self {
            Self::Hwp { .. } => 4 + 4 + 12 * n,
            Self::Wiregrid { .. } => 4 + 20 * n,
            Self::Gripper { .. } => 4 + 12 * n,
        }
    }

    /// Full packet size for `header`, or `None` if the stream never carries it.
    pub fn packet_size(&self, header: u32) -> Option<usize> {
        match (self, header) {
            (Self::Hwp { .. } | Self::Wiregrid { .. }, ENCODER) => Some(self.counter_packet_size()),
            (Self::Hwp { .. } | Self::Wiregrid { .. }, IRIG) => Some(IRIG_PACKET_SIZE),
            (Self::Hwp { .. } | Self::Wiregrid { .. }, ERROR) => Some(ERROR_PACKET_SIZE),
            (Self::Gripper { .. }, GRIPPER_ENCODER) => Some(self.counter_packet_size()),
            (Self::Gripper { .. }, GRIPPER_LIMIT) => Some(LIMIT_PACKET_SIZE),
            (_, TIMEOUT) => Some(TIMEOUT_PACKET_SIZE),
            _ => None,
        }
    }

    /// Whether bytes buffered after a timeout or error packet are discarded.
    ///
    /// BeagleBone streams restart their packet train after a fault; the
    /// gripper stream keeps going.
    pub fn resync_after_fault(&self) -> bool {
        !matches!(self, Self::Gripper { .. })
    }
}

impl Default for StreamLayout {
    fn default() -> Self {
        Self::HWP
    }
}
