use ocsenc_frame::PacketReader;
use ocsenc_transport::{CancelToken, ReplaySource};
use tracing::{debug, warn};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};
use crate::output::{print_packets, print_stats, OutputFormat, PacketRow};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let data = std::fs::read(&args.capture)
        .map_err(|err| io_error(&format!("read {}", args.capture.display()), err))?;
    let layout = args.layout.layout(args.samples);
    debug!(bytes = data.len(), layout = layout.name(), "decoding capture");

    let source = ReplaySource::from_capture(data, args.chunk_size);
    let mut reader = PacketReader::new(source, layout);
    let cancel = CancelToken::new();

    let mut rows = Vec::new();
    while !reader.get_ref().is_exhausted() {
        let packets = reader
            .poll(&cancel)
            .map_err(|err| frame_error("decode failed", err))?;
        for packet in &packets {
            rows.push(PacketRow::from_packet(rows.len(), packet));
        }
    }

    let trailing = reader.framer().buffered();
    if trailing > 0 {
        warn!(trailing, "capture ends inside a packet");
    }
    print_packets(&rows, format);
    print_stats(reader.framer().stats(), trailing, format);
    Ok(SUCCESS)
}
