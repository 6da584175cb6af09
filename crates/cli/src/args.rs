use std::path::PathBuf;

use clap::Parser;

/// Command-line options. There is a single mode of operation: load a
/// configuration file and run the control loop until a termination signal
/// arrives.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the INI configuration file.
    #[arg(long, value_name("FILE"), env("ELASTIQ_CONFIG"))]
    pub config: PathBuf,

    /// Also write rotating daily log files into this directory.
    #[arg(long, value_name("DIR"), env("ELASTIQ_LOGDIR"))]
    pub logdir: Option<PathBuf>,

    /// Enable verbose output (up to 2 levels); takes precedence over
    /// `elastiq.log_level` from the configuration file.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
