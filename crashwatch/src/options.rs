/////////////////////////////////
use clap::Parser;
use std::path::PathBuf;
/////////////////////////////////

/// Runs a program to completion and reports how it terminated.
#[derive(Parser, Debug)]
#[command(name = "crashwatch", version)]
pub struct Options {
    /// The PID of a running process to attach to. This is mutually exclusive with the executable option.
    #[arg(
        short = 'p',
        long = "pid",
        required_unless_present = "executable",
        conflicts_with = "executable"
    )]
    pub pid: Option<i32>,

    /// The path to the executable to run
    #[arg(required_unless_present = "pid")]
    pub executable: Option<PathBuf>,

    /// The arguments to pass to the executable being launched.
    #[arg(last = true)]
    pub program_args: Vec<String>,

    /// Run the program without ptrace. The fault address is not available in this mode.
    #[arg(long = "no-trace", conflicts_with = "pid")]
    pub no_trace: bool,

    /// Enable debug logging on stderr.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}
