use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ocsenc_agent::{count_to_time, TaskOutcome};
use ocsenc_frame::{FramerStats, Packet};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One decoded packet, flattened for display.
#[derive(Debug, Serialize)]
pub struct PacketRow {
    pub index: usize,
    pub kind: &'static str,
    pub samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_tick: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick: Option<u64>,
    /// Seconds between the first and last sample.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub irig_time: Option<i64>,
    pub detail: String,
}

impl PacketRow {
    pub fn from_packet(index: usize, packet: &Packet) -> Self {
        let mut row = Self {
            index,
            kind: packet.kind(),
            samples: 0,
            first_tick: None,
            last_tick: None,
            span_seconds: None,
            irig_time: None,
            detail: String::new(),
        };
        match packet {
            Packet::Counter(counter) => {
                let ticks: Vec<u64> = counter.ticks().collect();
                let times = count_to_time(&ticks, 0.0);
                row.samples = counter.len();
                row.first_tick = ticks.first().copied();
                row.last_tick = ticks.last().copied();
                row.span_seconds = times.last().copied();
                row.detail = match (counter.index.first(), counter.index.last()) {
                    (Some(first), Some(last)) => format!("index {first}..{last}"),
                    _ => String::new(),
                };
            }
            Packet::Irig(irig) => {
                let time = irig.time();
                row.samples = 1;
                row.first_tick = Some(irig.rising_edge_ticks());
                row.last_tick = row.first_tick;
                row.irig_time = time.unix_seconds();
                row.detail = time.to_string();
            }
            Packet::Limit(limit) => {
                row.samples = 1;
                row.first_tick = Some(limit.ticks());
                row.last_tick = row.first_tick;
                row.detail = format!("state {:#x}", limit.state);
            }
            Packet::Timeout(timeout) => row.detail = format!("{} timeout", timeout.source),
            Packet::Error => row.detail = "readout error".to_string(),
        }
        row
    }
}

pub fn print_packets(rows: &[PacketRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for row in rows {
                print_json(row);
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "KIND", "SAMPLES", "FIRST TICK", "SPAN (s)", "DETAIL"]);
            for row in rows {
                table.add_row(vec![
                    row.index.to_string(),
                    row.kind.to_string(),
                    row.samples.to_string(),
                    opt(row.first_tick),
                    row.span_seconds.map(|s| format!("{s:.9}")).unwrap_or_default(),
                    row.detail.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!(
                    "#{} {} samples={} first_tick={} {}",
                    row.index,
                    row.kind,
                    row.samples,
                    opt(row.first_tick),
                    row.detail
                );
            }
        }
    }
}

#[derive(Serialize)]
struct StatsOutput {
    packets: u64,
    resyncs: u64,
    discarded_bytes: u64,
    faults: u64,
    trailing_bytes: usize,
}

/// Framing statistics of a decode run.
pub fn print_stats(stats: FramerStats, trailing_bytes: usize, format: OutputFormat) {
    let out = StatsOutput {
        packets: stats.packets,
        resyncs: stats.resyncs,
        discarded_bytes: stats.discarded_bytes,
        faults: stats.faults,
        trailing_bytes,
    };
    match format {
        // Keep stdout one packet per line.
        OutputFormat::Json => eprintln!("{}", to_json(&out)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["PACKETS", "RESYNCS", "DISCARDED", "FAULTS", "TRAILING"])
                .add_row(vec![
                    out.packets.to_string(),
                    out.resyncs.to_string(),
                    out.discarded_bytes.to_string(),
                    out.faults.to_string(),
                    out.trailing_bytes.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "packets={} resyncs={} discarded_bytes={} faults={} trailing_bytes={}",
            out.packets, out.resyncs, out.discarded_bytes, out.faults, out.trailing_bytes
        ),
    }
}

#[derive(Serialize)]
struct OutcomeOutput<'a> {
    ok: bool,
    message: &'a str,
    session: &'a Value,
}

/// Final result of an agent process.
pub fn print_outcome(outcome: &TaskOutcome, session: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&OutcomeOutput {
            ok: outcome.ok,
            message: &outcome.message,
            session,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec!["ok".to_string(), outcome.ok.to_string()])
                .add_row(vec!["message".to_string(), outcome.message.clone()]);
            if let Value::Object(fields) = session {
                for (key, value) in fields {
                    table.add_row(vec![key.clone(), value.to_string()]);
                }
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("ok={} message={}", outcome.ok, outcome.message);
            println!("session={session}");
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!("{}", to_json(value));
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

fn opt(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use ocsenc_frame::{CounterPacket, TimeoutPacket, TimeoutSource};

    use super::*;

    #[test]
    fn counter_row_spans_samples() {
        let packet = Packet::Counter(CounterPacket {
            quadrature: vec![0],
            clock: vec![100, 300],
            overflow: vec![0, 0],
            index: vec![4, 5],
            error: Vec::new(),
        });
        let row = PacketRow::from_packet(3, &packet);
        assert_eq!(row.samples, 2);
        assert_eq!(row.first_tick, Some(100));
        assert!((row.span_seconds.unwrap() - 1e-6).abs() < 1e-12);
        assert_eq!(row.detail, "index 4..5");
    }

    #[test]
    fn timeout_row_names_source() {
        let row = PacketRow::from_packet(
            0,
            &Packet::Timeout(TimeoutPacket {
                source: TimeoutSource::Irig,
            }),
        );
        assert_eq!(row.detail, "IRIG timeout");
        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("first_tick").is_none());
    }
}
