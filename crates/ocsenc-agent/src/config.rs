use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use ocsenc_frame::{FrameConfig, StreamLayout, DEFAULT_MAX_BUFFER};
use ocsenc_transport::UdpConfig;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::queue::OverflowPolicy;

fn any_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// Settings of the HWP encoder agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HwpConfig {
    pub bind_addr: IpAddr,
    /// UDP port the BeagleBone sends to.
    pub port: u16,
    pub read_chunk_size: usize,
    /// Samples per counter packet; must match the BeagleBone firmware.
    pub samples_per_packet: usize,
    /// Encoder wheel slits per revolution.
    pub num_slits: u32,
    /// Publish once this many counter samples are pending...
    pub publish_samples: usize,
    /// ...or this many seconds after the previous publish.
    #[serde(deserialize_with = "interval_secs")]
    pub publish_interval_secs: f64,
    /// Keep every Nth counter sample in the subsampled block.
    pub subsample: usize,
    pub max_buffer: usize,
}

impl Default for HwpConfig {
    fn default() -> Self {
        Self {
            bind_addr: any_addr(),
            port: 8080,
            read_chunk_size: 8196,
            samples_per_packet: 120,
            num_slits: 570,
            publish_samples: 4200,
            publish_interval_secs: 10.0,
            subsample: 500,
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

impl HwpConfig {
    pub fn layout(&self) -> StreamLayout {
        StreamLayout::Hwp {
            samples: self.samples_per_packet,
        }
    }

    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            layout: self.layout(),
            max_buffer: self.max_buffer,
        }
    }

    pub fn udp_config(&self) -> UdpConfig {
        UdpConfig {
            bind_addr: self.bind_addr,
            port: self.port,
            read_chunk_size: self.read_chunk_size,
            ..UdpConfig::default()
        }
    }

    pub fn publish_interval(&self) -> Duration {
        secs(self.publish_interval_secs)
    }
}

/// Settings of the wiregrid encoder agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WiregridConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub read_chunk_size: usize,
    pub samples_per_packet: usize,
    pub publish_samples: usize,
    #[serde(deserialize_with = "interval_secs")]
    pub publish_interval_secs: f64,
    /// Encoder counts per full belt revolution.
    pub counts_on_belt: u32,
    /// Reference counts are reduced modulo this value.
    pub reference_count_max: u32,
    pub max_buffer: usize,
}

impl Default for WiregridConfig {
    fn default() -> Self {
        Self {
            bind_addr: any_addr(),
            port: 50007,
            read_chunk_size: 8192,
            samples_per_packet: 100,
            publish_samples: 1000,
            publish_interval_secs: 1.0,
            counts_on_belt: 52000,
            reference_count_max: 2 << 15,
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

impl WiregridConfig {
    pub fn layout(&self) -> StreamLayout {
        StreamLayout::Wiregrid {
            samples: self.samples_per_packet,
        }
    }

    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            layout: self.layout(),
            max_buffer: self.max_buffer,
        }
    }

    pub fn udp_config(&self) -> UdpConfig {
        UdpConfig {
            bind_addr: self.bind_addr,
            port: self.port,
            read_chunk_size: self.read_chunk_size,
            ..UdpConfig::default()
        }
    }

    pub fn publish_interval(&self) -> Duration {
        secs(self.publish_interval_secs)
    }
}

/// Settings of the stimulator encoder agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StimConfig {
    /// UIO device node; discovered through sysfs when unset.
    pub device: Option<PathBuf>,
    pub lock_path: PathBuf,
    /// Loop rate of the acquisition process in Hz.
    pub sampling_frequency: f64,
    /// Seconds the FIFO pump sleeps between drains.
    #[serde(deserialize_with = "interval_secs")]
    pub pump_interval_secs: f64,
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for StimConfig {
    fn default() -> Self {
        Self {
            device: None,
            lock_path: PathBuf::from("/tmp/.stim-lock"),
            sampling_frequency: 0.5,
            pump_interval_secs: 0.1,
            queue_capacity: 1 << 18,
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

impl StimConfig {
    pub fn pump_interval(&self) -> Duration {
        secs(self.pump_interval_secs)
    }
}

/// Longest accepted publish or pump interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(86_400);

fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value)
        .unwrap_or(MAX_INTERVAL)
        .min(MAX_INTERVAL)
}

fn interval_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if !(0.0..=MAX_INTERVAL.as_secs_f64()).contains(&value) {
        return Err(D::Error::custom(format!(
            "interval {value:e} s is outside 0..={} s",
            MAX_INTERVAL.as_secs()
        )));
    }
    Ok(value)
}
