use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "offload-server", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Deck address (host, or host:port)
    #[arg(long)]
    pub deck: Option<String>,

    /// Optional config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Slot to monitor (repeatable; defaults to both bays)
    #[arg(long = "slot")]
    pub slots: Vec<u8>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect, print the clip catalog as JSON, and exit
    Catalog,

    /// Watch for new clips and offload them until interrupted
    Run {
        /// Destination directory for offloaded clips (must exist)
        #[arg(long)]
        destination: Option<PathBuf>,
    },

    /// Rename an offloaded clip; keeps the extension when the new name has none
    Rename {
        /// Path of the offloaded file
        path: PathBuf,
        /// New base name
        new_name: String,
    },
}
