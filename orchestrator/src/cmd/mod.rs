//! Command line: `init` writes a starter config, `serve` hosts the services
//! it lists until a shutdown signal arrives.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod init;
pub mod serve;

/// Shutdown orchestrator: hosts HTTP services and stops them gracefully.
#[derive(Debug, Parser)]
#[command(name = "orchestrator")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// What to do.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write a starter config with default shutdown timings.
    Init {
        /// Where to write the config.
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Replace an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Host every configured service; SIGTERM or Ctrl+C starts a graceful
    /// shutdown and a second one forces exit.
    Serve {
        /// Config listing `[shutdown]` timings and `[[services]]`.
        #[arg(short, long, env = "CONFIG", default_value = "config.toml")]
        config: PathBuf,
    },
}
