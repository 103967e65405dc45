use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Subcommand, ValueEnum};
use ocsenc_agent::{AcqParams, AcqProcess, FeedPublisher, JsonLinesPublisher, Session};
use ocsenc_frame::StreamLayout;
use serde::de::DeserializeOwned;

use crate::exit::{io_error, outcome_code, CliError, CliResult, DATA_INVALID, INTERNAL};
use crate::output::{print_outcome, OutputFormat};

pub mod decode;
pub mod hwp;
pub mod simulate;
pub mod stim;
pub mod version;
pub mod wiregrid;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HWP encoder acquisition process.
    Hwp(HwpArgs),
    /// Run the wiregrid encoder acquisition process.
    Wiregrid(WiregridArgs),
    /// Run the stimulator encoder acquisition process.
    Stim(StimArgs),
    /// Decode a captured byte stream and print its packets.
    Decode(DecodeArgs),
    /// Generate synthetic encoder and IRIG packets.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Hwp(args) => hwp::run(args, format),
        Command::Wiregrid(args) => wiregrid::run(args, format),
        Command::Stim(args) => stim::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Simulate(args) => simulate::run(args),
        Command::Version(args) => version::run(args),
    }
}

/// Options shared by the agent subcommands.
#[derive(Args, Debug)]
pub struct AgentArgs {
    /// JSON configuration file; command-line flags override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Write feed messages to this file instead of stdout.
    #[arg(long, value_name = "FILE")]
    pub feed_out: Option<PathBuf>,
    /// Stop after the first publish cycle.
    #[arg(long)]
    pub test_mode: bool,
}

#[derive(Args, Debug)]
pub struct HwpArgs {
    #[command(flatten)]
    pub agent: AgentArgs,
    /// Local address to bind.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<IpAddr>,
    /// UDP port the readout board sends to.
    #[arg(long, env = "OCSENC_HWP_PORT")]
    pub port: Option<u16>,
    /// Counter samples per packet.
    #[arg(long)]
    pub samples_per_packet: Option<usize>,
    /// Encoder slits per revolution.
    #[arg(long)]
    pub num_slits: Option<u32>,
}

#[derive(Args, Debug)]
pub struct WiregridArgs {
    #[command(flatten)]
    pub agent: AgentArgs,
    /// Local address to bind.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<IpAddr>,
    /// UDP port the readout board sends to.
    #[arg(long, env = "OCSENC_WIREGRID_PORT")]
    pub port: Option<u16>,
    /// Counter samples per packet.
    #[arg(long)]
    pub samples_per_packet: Option<usize>,
}

#[derive(Args, Debug)]
pub struct StimArgs {
    #[command(flatten)]
    pub agent: AgentArgs,
    /// UIO device node; discovered through sysfs when omitted.
    #[arg(long, value_name = "PATH")]
    pub device: Option<PathBuf>,
    /// Device lock file.
    #[arg(long, value_name = "PATH")]
    pub lock_path: Option<PathBuf>,
    /// Acquisition loop rate in Hz.
    #[arg(long)]
    pub sampling_frequency: Option<f64>,
}

/// Readout stream layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LayoutArg {
    Hwp,
    Wiregrid,
    Gripper,
}

impl LayoutArg {
    /// Layout with `samples` per counter packet, or the board default.
    pub fn layout(self, samples: Option<usize>) -> StreamLayout {
        let default = match self {
            LayoutArg::Hwp => StreamLayout::HWP,
            LayoutArg::Wiregrid => StreamLayout::WIREGRID,
            LayoutArg::Gripper => StreamLayout::GRIPPER,
        };
        let samples = samples.unwrap_or_else(|| default.samples());
        match self {
            LayoutArg::Hwp => StreamLayout::Hwp { samples },
            LayoutArg::Wiregrid => StreamLayout::Wiregrid { samples },
            LayoutArg::Gripper => StreamLayout::Gripper { samples },
        }
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Capture file holding the raw byte stream.
    pub capture: PathBuf,
    /// Stream layout of the capture.
    #[arg(long, value_enum, default_value = "hwp")]
    pub layout: LayoutArg,
    /// Counter samples per packet (default: the layout's).
    #[arg(long)]
    pub samples: Option<usize>,
    /// Bytes handed to the framer per read, as a UDP socket would.
    #[arg(long, default_value = "8192")]
    pub chunk_size: usize,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Destination of the datagrams.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub target: std::net::SocketAddr,
    /// Write the byte stream to this file instead of sending it.
    #[arg(long, value_name = "FILE")]
    pub capture: Option<PathBuf>,
    /// Stream layout to generate.
    #[arg(long, value_enum, default_value = "hwp")]
    pub layout: LayoutArg,
    /// Counter samples per packet (default: the layout's).
    #[arg(long)]
    pub samples: Option<usize>,
    /// Counter packets to generate.
    #[arg(long, default_value = "100")]
    pub packets: u64,
    /// Simulated rotation frequency in Hz.
    #[arg(long, default_value = "2.0")]
    pub rotation_freq: f64,
    /// Encoder slits per revolution.
    #[arg(long, default_value = "570")]
    pub num_slits: u32,
    /// Unix time of the first IRIG packet (default: now).
    #[arg(long)]
    pub start_time: Option<i64>,
    /// Counter packets sent per second; 0 sends as fast as possible.
    #[arg(long, default_value = "0")]
    pub rate: f64,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Read a JSON config file, or defaults when none is given.
pub fn load_config<T: DeserializeOwned + Default>(path: Option<&Path>) -> CliResult<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("read config {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid config {}: {err}", path.display()),
        )
    })
}

pub type BoxPublisher = Box<dyn FeedPublisher + Send>;

/// JSON-lines feed publisher writing to `path`, or stdout.
pub fn feed_publisher(path: Option<&Path>) -> CliResult<BoxPublisher> {
    let writer: Box<dyn Write + Send> = match path {
        Some(path) => {
            let file = File::create(path)
                .map_err(|err| io_error(&format!("create {}", path.display()), err))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(std::io::stdout()),
    };
    Ok(Box::new(JsonLinesPublisher::new(writer)))
}

/// Run `agent`'s acquisition process until it ends or Ctrl-C stops it.
pub fn run_agent(agent: Arc<dyn AcqProcess>, params: AcqParams, format: OutputFormat) -> CliResult<i32> {
    install_stop_handler(Arc::clone(&agent))?;
    let session = Session::new();
    let outcome = agent.acq(&session, &params);
    print_outcome(&outcome, &session.data(), format);
    Ok(outcome_code(&outcome))
}

fn install_stop_handler(agent: Arc<dyn AcqProcess>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        let outcome = agent.stop_acq();
        tracing::info!(ok = outcome.ok, message = %outcome.message, "stop requested");
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
