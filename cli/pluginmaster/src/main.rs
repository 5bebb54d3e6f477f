use std::process::ExitCode;

use anyhow::Result;
use bpaf::Args;
use commands::{pluginmaster_args, PluginmasterArgs};
use logger::init_logger;
use tracing::debug;

mod commands;
mod config;
mod logger;

async fn run(args: PluginmasterArgs) -> Result<()> {
    init_logger(Some(args.verbosity));
    let config = config::Config::parse()?;
    args.handle(config).await
}

fn main() -> ExitCode {
    // initialize logger with "best guess" defaults
    // updating the logger conf is cheap, so we reinitialize once the flags are parsed
    init_logger(None);

    let args = match pluginmaster_args().run_inner(Args::current_args()) {
        Ok(args) => args,
        Err(bpaf::ParseFailure::Stdout(m, _)) => {
            print!("{m:80}");
            return ExitCode::from(0);
        },
        Err(bpaf::ParseFailure::Stderr(m)) => {
            eprintln!("{m:80}");
            return ExitCode::from(1);
        },
        Err(bpaf::ParseFailure::Completion(c)) => {
            print!("{c}");
            return ExitCode::from(0);
        },
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("ERROR: could not start async runtime: {e}");
            return ExitCode::from(1);
        },
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            debug!("{:#}", e);
            eprintln!("ERROR: {e:#}");
            ExitCode::from(1)
        },
    }
}
