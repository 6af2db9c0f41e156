///////////////////////////
mod options;
mod report;
///////////////////////////
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use colored::Colorize;
use tracing::info;
///////////////////////////
use libcrashdemo::Pid;
use libcrashdemo::pipe_channel::create_pipe_channel;
use libcrashdemo::process::Process;
use options::Options;
///////////////////////////

fn main() {
    let options = Options::parse();
    tracing_subscriber::fmt()
        .with_max_level(if options.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    let result = if let Some(pid) = options.pid {
        watch_attached(Pid::from_raw(pid))
    } else if let Some(executable) = &options.executable {
        watch_launched(executable, &options)
    } else {
        unreachable!("This should never happen because of the required_unless_present attribute")
    };
    if let Err(e) = result {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn watch_launched(executable: &std::path::Path, options: &Options) -> Result<()> {
    let (read_port, write_port) = create_pipe_channel(true)?;
    let args: Vec<&str> = options.program_args.iter().map(String::as_str).collect();
    let mut process = Process::launch(executable, &args, !options.no_trace, Some(write_port))
        .with_context(|| format!("Failed to launch {}", executable.display()))?;
    info!(pid = %process.pid, traced = process.is_traced(), "running {}", executable.display());

    // Drain the pipe while the program runs so a chatty child cannot block on a full pipe.
    let reader = std::thread::spawn(move || read_port.read_to_end());
    let termination = process.run_to_termination()?;
    let output = reader
        .join()
        .map_err(|_| anyhow!("Output reader thread panicked"))??;

    print!(
        "{}",
        report::render(
            &executable.display().to_string(),
            &termination,
            &String::from_utf8_lossy(&output)
        )
    );
    Ok(())
}

/// The output of an attached process goes wherever it already went, only the report is printed.
fn watch_attached(pid: Pid) -> Result<()> {
    let mut process =
        Process::attach(pid).with_context(|| format!("Failed to attach to process {}", pid))?;
    info!(%pid, "attached");
    let termination = process.run_to_termination()?;
    print!(
        "{}",
        report::render(&format!("process {}", pid), &termination, "")
    );
    Ok(())
}
