use crate::cmd::StimArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

#[cfg(unix)]
pub fn run(args: StimArgs, format: OutputFormat) -> CliResult<i32> {
    use std::sync::Arc;

    use ocsenc_agent::{AcqParams, StimAgent, StimConfig};

    use crate::cmd::{feed_publisher, load_config, run_agent};
    use crate::exit::agent_error;

    let mut config: StimConfig = load_config(args.agent.config.as_deref())?;
    if let Some(device) = args.device {
        config.device = Some(device);
    }
    if let Some(lock_path) = args.lock_path {
        config.lock_path = lock_path;
    }

    let publisher = feed_publisher(args.agent.feed_out.as_deref())?;
    let agent =
        StimAgent::open(config, publisher).map_err(|err| agent_error("open failed", err))?;
    let params = AcqParams {
        sampling_frequency: args.sampling_frequency,
        test_mode: args.agent.test_mode,
    };
    run_agent(Arc::new(agent), params, format)
}

#[cfg(not(unix))]
pub fn run(_args: StimArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "the stimulator encoder needs a UIO device (unix only)",
    ))
}
