use std::sync::Arc;

use ocsenc_agent::{AcqParams, HwpAgent, HwpConfig};
use ocsenc_transport::UdpSource;
use tracing::info;

use crate::cmd::{feed_publisher, load_config, run_agent, HwpArgs};
use crate::exit::{agent_error, transport_error, CliResult};
use crate::output::OutputFormat;

pub fn run(args: HwpArgs, format: OutputFormat) -> CliResult<i32> {
    let config = config_from_args(&args)?;
    let source = UdpSource::bind(config.udp_config())
        .map_err(|err| transport_error("bind failed", err))?;
    info!(port = config.port, num_slits = config.num_slits, "HWP encoder agent listening");

    let publisher = feed_publisher(args.agent.feed_out.as_deref())?;
    let agent = HwpAgent::new(config, source, publisher)
        .map_err(|err| agent_error("agent setup failed", err))?;
    let params = AcqParams {
        test_mode: args.agent.test_mode,
        ..AcqParams::default()
    };
    run_agent(Arc::new(agent), params, format)
}

fn config_from_args(args: &HwpArgs) -> CliResult<HwpConfig> {
    let mut config: HwpConfig = load_config(args.agent.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(samples) = args.samples_per_packet {
        config.samples_per_packet = samples;
    }
    if let Some(num_slits) = args.num_slits {
        config.num_slits = num_slits;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use crate::cmd::AgentArgs;

    use super::*;

    #[test]
    fn flags_override_config_file() {
        let path = std::env::temp_dir().join(format!("ocsenc-hwp-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"port": 9001, "num_slits": 1140}"#).unwrap();

        let args = HwpArgs {
            agent: AgentArgs {
                config: Some(path.clone()),
                feed_out: None,
                test_mode: false,
            },
            bind: None,
            port: Some(9002),
            samples_per_packet: None,
            num_slits: None,
        };
        let config = config_from_args(&args).unwrap();
        assert_eq!(config.port, 9002);
        assert_eq!(config.num_slits, 1140);
        assert_eq!(config.samples_per_packet, 120);
        let _ = std::fs::remove_file(&path);
    }
}
