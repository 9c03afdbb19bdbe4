use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for wb-diag-collect.
///
/// Without `-s` a single collection runs and the archive lands in the
/// current directory; with `-s` the process serves `diag` and `status`
/// RPC calls over MQTT until it is signalled.
#[derive(Parser, Debug)]
#[clap(
    name = "wb-diag-collect",
    version,
    about = "One-click diagnostic data collector for Wiren Board, generating archive with data"
)]
pub struct Args {
    /// Path to configuration YAML file
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Run the MQTT RPC server
    #[clap(short = 's', long)]
    pub server: bool,

    /// Set debug logging level
    #[clap(short = 'd', long)]
    pub debug: bool,

    /// Timeout for each command, in seconds
    #[clap(short = 't', long)]
    pub timeout: Option<f64>,

    /// Archive name prefix
    #[clap(value_name = "OUTPUT_FILENAME")]
    pub output_filename: String,
}
