//! Shutdown orchestrator server
//!
//! Hosts every HTTP service listed in a TOML configuration file and shuts
//! them down in stages on SIGINT / SIGTERM. A second signal, or the shutdown
//! timeout elapsing, forces a non-zero exit.
//!
//! ```sh
//! orchestrator init            # Generate default config.toml
//! orchestrator serve           # Start the services
//! ```

mod cmd;
mod routes;
mod telemetry;

use clap::Parser;
use cmd::{Cli, Commands};

#[tokio::main]
#[allow(clippy::print_stderr)]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { output, force } => cmd::init::run(&output, force)
            .map(|()| 0)
            .map_err(Into::into),
        Commands::Serve { config } => cmd::serve::run(&config).await,
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
