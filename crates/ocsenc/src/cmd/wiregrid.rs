use std::sync::Arc;

use ocsenc_agent::{AcqParams, WiregridAgent, WiregridConfig};
use ocsenc_transport::UdpSource;
use tracing::info;

use crate::cmd::{feed_publisher, load_config, run_agent, WiregridArgs};
use crate::exit::{agent_error, transport_error, CliResult};
use crate::output::OutputFormat;

pub fn run(args: WiregridArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config: WiregridConfig = load_config(args.agent.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(samples) = args.samples_per_packet {
        config.samples_per_packet = samples;
    }

    let source = UdpSource::bind(config.udp_config())
        .map_err(|err| transport_error("bind failed", err))?;
    info!(port = config.port, "wiregrid encoder agent listening");

    let publisher = feed_publisher(args.agent.feed_out.as_deref())?;
    let agent = WiregridAgent::new(config, source, publisher)
        .map_err(|err| agent_error("agent setup failed", err))?;
    let params = AcqParams {
        test_mode: args.agent.test_mode,
        ..AcqParams::default()
    };
    run_agent(Arc::new(agent), params, format)
}
