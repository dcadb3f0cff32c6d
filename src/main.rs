mod cli;
mod fiddle;
mod filter;
mod model;
mod orchestrator;
mod transport;

use anyhow::{Context, Result};
use cli::Invocation;
use std::path::PathBuf;
use time::UtcOffset;
use transport::SocketChannel;

/// Environment variable naming the execution host's control socket.
const HOST_SOCKET_ENV: &str = "FIDDLE_HOST_SOCKET";

fn main() -> Result<()> {
    let cwd = std::env::current_dir().context("reading working directory")?;

    match cli::parse(std::env::args_os(), &cwd) {
        Invocation::NoOp => Ok(()),
        Invocation::InvalidFiddle(err) => {
            // Recovered: reported to the operator, nothing dispatched, no
            // exit code claimed by this layer.
            eprintln!("{err}");
            Ok(())
        }
        Invocation::Run { request, timeout } => {
            // The local offset must be read while the process is still
            // single-threaded; the lookup is refused once runtime worker
            // threads exist.
            let clock_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
            let socket = std::env::var_os(HOST_SOCKET_ENV)
                .map(PathBuf::from)
                .with_context(|| {
                    format!("{HOST_SOCKET_ENV} is not set; no execution host to dispatch to")
                })?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("starting async runtime")?;
            let code = runtime.block_on(async {
                let channel = SocketChannel::connect(&socket).await?;
                orchestrator::run(&channel, &request, clock_offset, timeout).await
            })?;
            std::process::exit(code)
        }
    }
}
