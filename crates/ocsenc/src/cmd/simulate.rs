use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use ocsenc_agent::{unix_now, BBB_CLOCK_FREQ};
use ocsenc_frame::packet::IRIG_WORDS;
use ocsenc_frame::{encode_packet, CounterPacket, IrigPacket, IrigTime, Packet, StreamLayout};
use tracing::{debug, info};

use crate::cmd::SimulateArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, SUCCESS, USAGE};

/// Ticks between IRIG reference markers.
const IRIG_PERIOD_TICKS: u64 = BBB_CLOCK_FREQ as u64;
/// Ticks between IRIG synchronization pulses.
const SYNCH_PULSE_TICKS: u64 = IRIG_PERIOD_TICKS / IRIG_WORDS as u64;

pub fn run(args: SimulateArgs) -> CliResult<i32> {
    if !args.rotation_freq.is_finite() || args.rotation_freq <= 0.0 || args.num_slits == 0 {
        return Err(CliError::new(
            USAGE,
            "rotation frequency and slit count must be positive",
        ));
    }
    let pace = packet_period(args.rate)?;
    let layout = args.layout.layout(args.samples);
    let start_time = args.start_time.unwrap_or_else(|| unix_now() as i64);
    let mut sim = Simulator::new(layout, args.rotation_freq, args.num_slits, start_time);

    match &args.capture {
        Some(path) => {
            let file = File::create(path)
                .map_err(|err| io_error(&format!("create {}", path.display()), err))?;
            let mut out = BufWriter::new(file);
            let mut buf = BytesMut::new();
            for _ in 0..args.packets {
                for packet in sim.next_packets() {
                    encode_packet(&packet, &layout, &mut buf)
                        .map_err(|err| frame_error("encode failed", err))?;
                }
            }
            out.write_all(&buf)
                .and_then(|()| out.flush())
                .map_err(|err| io_error(&format!("write {}", path.display()), err))?;
            info!(path = %path.display(), bytes = buf.len(), "capture written");
        }
        None => send(&mut sim, &layout, &args, pace)?,
    }
    Ok(SUCCESS)
}

/// Time between counter packets for `rate` packets per second; `None`
/// sends unpaced.
fn packet_period(rate: f64) -> CliResult<Option<Duration>> {
    if rate == 0.0 {
        return Ok(None);
    }
    Some(rate)
        .filter(|r| r.is_finite() && *r > 0.0)
        .and_then(|r| Duration::try_from_secs_f64(1.0 / r).ok())
        .map(Some)
        .ok_or_else(|| CliError::new(USAGE, format!("unusable packet rate {rate}")))
}

fn send(
    sim: &mut Simulator,
    layout: &StreamLayout,
    args: &SimulateArgs,
    pace: Option<Duration>,
) -> CliResult<()> {
    let local: SocketAddr = match args.target {
        SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
        SocketAddr::V6(_) => ([0u16; 8], 0).into(),
    };
    let socket = UdpSocket::bind(local).map_err(|err| io_error("bind failed", err))?;
    info!(target = %args.target, packets = args.packets, "sending");

    let started = Instant::now();
    let mut buf = BytesMut::new();
    for n in 0..args.packets {
        for packet in sim.next_packets() {
            buf.clear();
            encode_packet(&packet, layout, &mut buf)
                .map_err(|err| frame_error("encode failed", err))?;
            socket
                .send_to(&buf, args.target)
                .map_err(|err| io_error("send failed", err))?;
        }
        if let Some(pace) = pace {
            let due = Duration::try_from_secs_f64(pace.as_secs_f64() * (n + 1) as f64)
                .ok()
                .and_then(|offset| started.checked_add(offset));
            let wait = match due {
                Some(due) => due.checked_duration_since(Instant::now()),
                None => Some(pace),
            };
            if let Some(wait) = wait {
                std::thread::sleep(wait);
            }
        }
    }
    debug!(elapsed = ?started.elapsed(), "done");
    Ok(())
}

/// Synthetic readout board: a wheel turning at a constant rate plus a
/// 1 Hz IRIG reference.
#[derive(Debug)]
struct Simulator {
    layout: StreamLayout,
    ticks_per_edge: f64,
    edge: u64,
    next_irig: u64,
    start_time: i64,
    irig_count: i64,
}

impl Simulator {
    fn new(layout: StreamLayout, rotation_freq: f64, num_slits: u32, start_time: i64) -> Self {
        Self {
            layout,
            // Both edges of every slit are recorded.
            ticks_per_edge: BBB_CLOCK_FREQ / (2.0 * f64::from(num_slits) * rotation_freq),
            edge: 0,
            next_irig: 0,
            start_time,
            irig_count: 0,
        }
    }

    fn edge_ticks(&self, edge: u64) -> u64 {
        (edge as f64 * self.ticks_per_edge).round() as u64
    }

    /// The next counter packet, preceded by any IRIG packets due before it.
    fn next_packets(&mut self) -> Vec<Packet> {
        let n = self.layout.samples();
        let ticks: Vec<u64> = (self.edge..self.edge + n as u64)
            .map(|edge| self.edge_ticks(edge))
            .collect();

        let mut packets = Vec::new();
        let has_irig = !matches!(self.layout, StreamLayout::Gripper { .. });
        while has_irig && ticks.first().is_some_and(|&first| self.next_irig <= first) {
            packets.push(Packet::Irig(self.irig_packet()));
        }

        let index = (self.edge..self.edge + n as u64).map(|e| e as u32).collect();
        let (quadrature, error) = match self.layout {
            StreamLayout::Hwp { .. } => (vec![1], Vec::new()),
            StreamLayout::Wiregrid { .. } => (vec![1; n], vec![0; n]),
            StreamLayout::Gripper { .. } => (Vec::new(), Vec::new()),
        };
        packets.push(Packet::Counter(CounterPacket {
            quadrature,
            clock: ticks.iter().map(|&t| low_word(t)).collect(),
            overflow: ticks.iter().map(|&t| high_word(t)).collect(),
            index,
            error,
        }));
        self.edge += n as u64;
        packets
    }

    fn irig_packet(&mut self) -> IrigPacket {
        let marker = self.next_irig;
        let info = IrigTime::from_unix(self.start_time + self.irig_count)
            .map(|time| time.to_info())
            .unwrap_or_default();
        let synch: [u64; IRIG_WORDS] =
            std::array::from_fn(|k| marker + k as u64 * SYNCH_PULSE_TICKS);
        self.next_irig += IRIG_PERIOD_TICKS;
        self.irig_count += 1;
        IrigPacket {
            rising_edge_clock: low_word(marker),
            rising_edge_overflow: high_word(marker),
            info,
            synch_clock: synch.map(low_word),
            synch_overflow: synch.map(high_word),
        }
    }
}

fn low_word(ticks: u64) -> u32 {
    (ticks & u64::from(u32::MAX)) as u32
}

fn high_word(ticks: u64) -> u32 {
    (ticks >> 32) as u32
}

#[cfg(test)]
mod tests {
    use ocsenc_frame::Framer;

    use super::*;

    const START: i64 = 1_700_000_000;

    #[test]
    fn first_packet_is_irig_at_start_time() {
        let mut sim = Simulator::new(StreamLayout::Hwp { samples: 4 }, 2.0, 570, START);
        let packets = sim.next_packets();
        assert_eq!(packets.len(), 2);
        let Packet::Irig(irig) = &packets[0] else {
            panic!("expected irig, got {:?}", packets[0]);
        };
        assert_eq!(irig.rising_edge_ticks(), 0);
        assert_eq!(irig.time().unix_seconds(), Some(START));
        assert_eq!(irig.synch_pulse_ticks()[1], SYNCH_PULSE_TICKS);
    }

    #[test]
    fn edges_follow_rotation_rate() {
        let mut sim = Simulator::new(StreamLayout::Hwp { samples: 4 }, 2.0, 570, START);
        let packets = sim.next_packets();
        let Packet::Counter(counter) = &packets[1] else {
            panic!("expected counter");
        };
        let ticks: Vec<u64> = counter.ticks().collect();
        // 2e8 / (2 * 570 * 2) ticks per edge
        assert_eq!(ticks, vec![0, 87_719, 175_439, 263_158]);
        assert_eq!(counter.index, vec![0, 1, 2, 3]);
        assert_eq!(counter.quadrature, vec![1]);
    }

    #[test]
    fn irig_repeats_every_second_of_ticks() {
        // Slow wheel: 100 edges span several IRIG periods.
        let mut sim = Simulator::new(StreamLayout::Hwp { samples: 100 }, 0.01, 100, START);
        let packets = sim.next_packets();
        let irigs: Vec<_> = packets
            .iter()
            .filter_map(|p| match p {
                Packet::Irig(irig) => Some(irig.time().unix_seconds()),
                _ => None,
            })
            .collect();
        // Last edge at 99 * 1e8 ticks, so markers 0..=49 are due.
        assert_eq!(irigs.len(), 50);
        assert_eq!(irigs[49], Some(START + 49));
    }

    #[test]
    fn generated_stream_decodes_for_every_layout() {
        for layout in [
            StreamLayout::Hwp { samples: 8 },
            StreamLayout::Wiregrid { samples: 8 },
            StreamLayout::Gripper { samples: 8 },
        ] {
            let mut sim = Simulator::new(layout, 2.0, 570, START);
            let mut buf = BytesMut::new();
            let mut expected = Vec::new();
            for _ in 0..3 {
                for packet in sim.next_packets() {
                    encode_packet(&packet, &layout, &mut buf).unwrap();
                    expected.push(packet);
                }
            }
            let mut framer = Framer::new(layout);
            framer.push(&buf);
            assert_eq!(framer.drain(), expected, "{}", layout.name());
            assert_eq!(framer.buffered(), 0);
        }
    }

    #[test]
    fn packet_period_rejects_unusable_rates() {
        assert_eq!(packet_period(0.0).unwrap(), None);
        assert_eq!(
            packet_period(4.0).unwrap(),
            Some(Duration::from_millis(250))
        );
        for rate in [1e-300, -1.0, f64::NAN, f64::INFINITY] {
            assert_eq!(packet_period(rate).unwrap_err().code, USAGE, "{rate}");
        }
    }

    #[test]
    fn ticks_past_32_bits_use_overflow_word() {
        let ticks = (3u64 << 32) + 7;
        assert_eq!(low_word(ticks), 7);
        assert_eq!(high_word(ticks), 3);
    }
}
