use anyhow::{Context, Result, anyhow};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::ptrace::traceme;
use nix::sys::signal::Signal;
use nix::sys::signal::kill;
use nix::sys::wait::WaitPidFlag;
use nix::sys::wait::WaitStatus;
use nix::sys::wait::waitpid;
use nix::unistd::ForkResult;
use nix::unistd::execvp;
use nix::unistd::fork;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::Pid;
use crate::pipe_channel::{self, WritePort};

#[derive(PartialEq, Debug, Clone, Copy)]
enum ProcessHandleState {
    Running,
    Stopped,
    Exited,
    Terminated,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum StopReason {
    Exited(i32 /*Exit status */),
    Stopped(Signal),
    Terminated(Signal),
}

#[derive(PartialEq, Debug)]
pub enum ProcessState {
    Running,        // Running
    Sleeping,       // Sleeping in an interruptible wait
    Waiting,        // Waiting in uninterruptible disk sleep
    Zombie,         // Zombie
    Stopped,        // Stopped on a signal.
    TracingStopped, // Tracing stopped
    Unknown(char),
}

/// Where an instruction lives, relative to the file it was mapped from. Unlike the raw program
/// counter this does not move between runs when the executable is loaded at a random base.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct CodeLocation {
    pub module: PathBuf,
    pub offset: u64,
}

/// Details of a signal-delivery stop, as reported by `PTRACE_GETSIGINFO` and `PTRACE_GETREGS`.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct FaultInfo {
    pub signal: Signal,
    pub code: i32,
    pub address: usize,
    /// Program counter of the stopped thread.
    pub pc: u64,
    /// `pc` resolved against the memory maps, if it falls inside a file mapping.
    pub location: Option<CodeLocation>,
}

impl FaultInfo {
    /// Positive `si_code`s are set by the kernel when the signal comes from a trap, such as a
    /// memory access. Signals sent with `kill`/`raise` carry `SI_USER` or `SI_TKILL`, for which
    /// `address` means nothing.
    pub fn is_kernel_fault(&self) -> bool {
        self.code > 0
    }
}

/// How a supervised process ended.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Termination {
    pub reason: StopReason,
    /// The first fault stop observed on the way. Only available when the process is traced.
    pub fault: Option<FaultInfo>,
}

pub struct Process {
    pub pid: Pid,
    terminate_on_end: bool,
    state: ProcessHandleState,
    is_attached: bool,
}

pub fn is_fault_signal(signal: Signal) -> bool {
    matches!(
        signal,
        Signal::SIGSEGV | Signal::SIGBUS | Signal::SIGABRT | Signal::SIGILL | Signal::SIGFPE
    )
}

/// Sets up the child process after a fork: redirects its stdout if requested, enables tracing,
/// and replaces the process image with the executable.
fn setup_child_process(
    executable_path: &Path,
    args: &[&str],
    attach_for_debugging: bool,
    stdout_port: Option<WritePort>,
) -> Result<()> {
    let executable_path_cstring = CString::new(executable_path.as_os_str().as_bytes())
        .context("Executable path contains a NUL byte")?;
    let mut args_cstrings: Vec<CString> = vec![executable_path_cstring.clone()];
    for arg in args {
        args_cstrings.push(CString::new(*arg).context("Argument contains a NUL byte")?);
    }
    if let Some(stdout_port) = stdout_port {
        stdout_port.redirect_to_stdout()?;
    }
    if attach_for_debugging {
        traceme().context("Failed to enable tracing in child process")?;
    }
    execvp(&executable_path_cstring, &args_cstrings).context("Failed to launch executable")?;
    Ok(())
}

pub fn process_with_pid_exists(pid: Pid) -> bool {
    // EPERM still means there is a process with that pid.
    !matches!(kill(pid, None), Err(Errno::ESRCH))
}

pub fn get_process_state(pid: Pid) -> Result<ProcessState> {
    let proc_path = format!("/proc/{}/stat", pid);
    let contents = std::fs::read_to_string(proc_path).context("Failed to read /proc file")?;
    parse_process_state(&contents)
}

fn parse_process_state(contents: &str) -> Result<ProcessState> {
    let last_parenthesis = contents
        .rfind(')')
        .ok_or_else(|| anyhow!("Failed to find last parenthesis in /proc file"))?;
    // The state character follows the last parenthesis and a space. `rfind` gives a byte offset,
    // and the command name before it may contain multi-byte characters.
    let index_of_state_char = last_parenthesis + 2;
    let state_byte = contents
        .as_bytes()
        .get(index_of_state_char)
        .ok_or_else(|| anyhow!("Failed to find state character in /proc file"))?;
    Ok(ProcessState::from(char::from(*state_byte)))
}

/// Resolves `pc` to a file and offset using `/proc/<pid>/maps`.
pub fn resolve_code_location(pid: Pid, pc: u64) -> Result<Option<CodeLocation>> {
    let maps = procfs::process::Process::new(pid.as_raw())
        .and_then(|process| process.maps())
        .context("Failed to read memory maps")?;
    Ok(maps
        .iter()
        .find(|map| (map.address.0..map.address.1).contains(&pc))
        .and_then(|map| match &map.pathname {
            procfs::process::MMapPath::Path(path) => Some(CodeLocation {
                module: path.clone(),
                offset: pc - map.address.0 + map.offset,
            }),
            _ => None,
        }))
}

#[cfg(target_arch = "x86_64")]
fn read_program_counter(pid: Pid) -> Result<u64> {
    Ok(ptrace::getregs(pid).context("Failed to read registers")?.rip)
}

#[cfg(target_arch = "aarch64")]
fn read_program_counter(pid: Pid) -> Result<u64> {
    Ok(ptrace::getregs(pid).context("Failed to read registers")?.pc)
}

impl Process {
    /// Attaches to an existing process. The process is stopped when this returns and is left
    /// running, detached, when the handle is dropped before it terminates.
    pub fn attach(pid: Pid) -> Result<Self> {
        ptrace::attach(pid).context("Failed to attach to process")?; // The tracee is sent a SIGSTOP, but will not necessarily have stopped by the completion of this call.
        let mut process_handle = Process {
            pid,
            terminate_on_end: false,
            state: ProcessHandleState::Running,
            is_attached: true,
        };
        match process_handle.wait_on_signal(None)? {
            StopReason::Stopped(_signal) => {}
            stop_reason => {
                return Err(anyhow!("Process {} {} while attaching", pid, stop_reason));
            }
        }
        debug!(%pid, "attached");
        Ok(process_handle)
    }

    /// Launches `executable_path` in a child process.
    /// With `trace` set the child is traced and stopped right after `exec`. When `stdout_port`
    /// is given, the child's standard output is sent to it instead of ours.
    pub fn launch(
        executable_path: &Path,
        args: &[&str],
        trace: bool,
        stdout_port: Option<WritePort>,
    ) -> Result<Self> {
        let (error_read_port, error_write_port) = pipe_channel::create_pipe_channel(true)?;
        match unsafe { fork() }.context("Failed to fork")? {
            ForkResult::Parent { child, .. } => {
                drop(error_write_port);
                drop(stdout_port);
                debug!(pid = %child, executable = %executable_path.display(), trace, "launched");
                let mut child_process_handle = Process {
                    pid: child,
                    terminate_on_end: true,
                    state: ProcessHandleState::Running,
                    is_attached: trace,
                };
                // The error pipe is closed on exec, so EOF without data means exec succeeded.
                let message = error_read_port.read_to_end()?;
                if !message.is_empty() {
                    let stop_reason = child_process_handle.wait_on_signal(None)?;
                    return Err(anyhow!(
                        "Child process failed to start ({}): {}",
                        stop_reason,
                        String::from_utf8_lossy(&message).trim()
                    ));
                }
                if trace {
                    match child_process_handle.wait_on_signal(None)? {
                        StopReason::Stopped(_signal) => {}
                        stop_reason => {
                            return Err(anyhow!(
                                "Child process did not stop after exec: {}",
                                stop_reason
                            ));
                        }
                    }
                }
                Ok(child_process_handle)
            }
            ForkResult::Child => {
                drop(error_read_port);
                let result = setup_child_process(executable_path, args, trace, stdout_port);
                if let Err(e) = result {
                    let _ = error_write_port.write_from_buffer(format!("{:#}", e).as_bytes());
                }
                // No atexit handlers or runtime cleanup in a child of a possibly threaded parent.
                unsafe { libc::_exit(1) }
            }
        }
    }

    pub fn exists(&self) -> bool {
        process_with_pid_exists(self.pid)
    }

    pub fn is_traced(&self) -> bool {
        self.is_attached
    }

    /// Waits for the process to stop or exit. This function blocks until the process undergoes a state change.
    pub fn wait_on_signal(&mut self, options: Option<WaitPidFlag>) -> Result<StopReason> {
        let stop_reason =
            StopReason::try_from(waitpid(self.pid, options).context("Failed to wait for process")?)?;
        match &stop_reason {
            StopReason::Exited(_) => self.state = ProcessHandleState::Exited,
            StopReason::Stopped(_) => self.state = ProcessHandleState::Stopped,
            StopReason::Terminated(_) => self.state = ProcessHandleState::Terminated,
        }
        debug!(pid = %self.pid, %stop_reason, "state change");
        Ok(stop_reason)
    }

    /// Resumes the execution of the process being debugged.
    pub fn resume_process(&mut self) -> Result<()> {
        self.resume(None)
    }

    /// Resumes the process and delivers `signal` to it, as a debugger does after a signal stop.
    pub fn resume_with_signal(&mut self, signal: Signal) -> Result<()> {
        self.resume(Some(signal))
    }

    fn resume(&mut self, signal: Option<Signal>) -> Result<()> {
        if !self.is_attached {
            return Err(anyhow!("Process {} is not traced", self.pid));
        }
        ptrace::cont(self.pid, signal).context("Failed to resume process")?;
        debug!(pid = %self.pid, ?signal, "resumed");
        self.state = ProcessHandleState::Running;
        Ok(())
    }

    /// Reads the signal information and program counter of the current signal-delivery stop.
    pub fn fault_info(&self) -> Result<FaultInfo> {
        if self.state != ProcessHandleState::Stopped {
            return Err(anyhow!("Process {} is not stopped", self.pid));
        }
        let info = ptrace::getsiginfo(self.pid).context("Failed to read signal information")?;
        let signal = Signal::try_from(info.si_signo).context("Unknown signal number")?;
        // Safety: si_addr is only meaningful for fault signals, but reading it is always valid.
        let address = unsafe { info.si_addr() } as usize;
        let pc = read_program_counter(self.pid)?;
        Ok(FaultInfo {
            signal,
            code: info.si_code,
            address,
            pc,
            location: resolve_code_location(self.pid, pc)?,
        })
    }

    /// Lets the process run until it exits or is killed by a signal.
    /// A traced process is resumed after every stop with the signal it stopped on, so faults are
    /// delivered exactly as they would be without a tracer; the first fault is recorded.
    pub fn run_to_termination(&mut self) -> Result<Termination> {
        let mut fault = None;
        if self.is_attached && self.state == ProcessHandleState::Stopped {
            self.resume_process()?;
        }
        loop {
            match self.wait_on_signal(None)? {
                StopReason::Stopped(signal) => {
                    if fault.is_none() && is_fault_signal(signal) {
                        fault = Some(self.fault_info()?);
                    }
                    // Stops caused by the tracer itself are not forwarded.
                    match signal {
                        Signal::SIGTRAP | Signal::SIGSTOP => self.resume_process()?,
                        signal => self.resume_with_signal(signal)?,
                    }
                }
                reason => return Ok(Termination { reason, fault }),
            }
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let alive = matches!(
            self.state,
            ProcessHandleState::Running | ProcessHandleState::Stopped
        );
        if !alive {
            return;
        }
        if self.terminate_on_end {
            let _ = kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        } else if self.is_attached {
            if self.state == ProcessHandleState::Running {
                let _ = kill(self.pid, Signal::SIGSTOP);
                let _ = self.wait_on_signal(None);
            }
            let _ = ptrace::detach(self.pid, None);
            let _ = kill(self.pid, Signal::SIGCONT);
        }
    }
}

impl TryFrom<WaitStatus> for StopReason {
    type Error = anyhow::Error;

    fn try_from(value: WaitStatus) -> Result<Self> {
        match value {
            WaitStatus::Stopped(_, signal) => Ok(StopReason::Stopped(signal)),
            WaitStatus::Exited(_, exit_status) => Ok(StopReason::Exited(exit_status)),
            WaitStatus::Signaled(_, signal, _) => Ok(StopReason::Terminated(signal)),
            _ => Err(anyhow!("Unexpected wait status: {:?}", value)),
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Exited(status) => write!(f, "exited with status {}", status),
            StopReason::Stopped(signal) => write!(f, "stopped by signal {}", signal.as_str()),
            StopReason::Terminated(signal) => {
                write!(f, "terminated by signal {}", signal.as_str())
            }
        }
    }
}

impl From<char> for ProcessState {
    fn from(value: char) -> Self {
        match value {
            'R' => ProcessState::Running,
            'S' => ProcessState::Sleeping,
            'D' => ProcessState::Waiting,
            'Z' => ProcessState::Zombie,
            'T' => ProcessState::Stopped,
            't' => ProcessState::TracingStopped,
            ch => ProcessState::Unknown(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(StopReason::Exited(3).to_string(), "exited with status 3");
        assert_eq!(
            StopReason::Terminated(Signal::SIGSEGV).to_string(),
            "terminated by signal SIGSEGV"
        );
        assert_eq!(
            StopReason::Stopped(Signal::SIGTRAP).to_string(),
            "stopped by signal SIGTRAP"
        );
    }

    #[test]
    fn test_process_state_from_char() {
        assert_eq!(ProcessState::from('t'), ProcessState::TracingStopped);
        assert_eq!(ProcessState::from('Z'), ProcessState::Zombie);
        assert_eq!(ProcessState::from('x'), ProcessState::Unknown('x'));
    }

    #[test]
    fn test_parse_process_state_with_multibyte_name() {
        let stat = "1234 (sl\u{e9}\u{e9}p \u{1f600}) t 1 1234 1234 0 -1";
        assert_eq!(
            parse_process_state(stat).unwrap(),
            ProcessState::TracingStopped
        );
        assert_eq!(
            parse_process_state("42 (a) b) R 1").unwrap(),
            ProcessState::Running
        );
        assert!(parse_process_state("42 (truncated)").is_err());
    }

    #[test]
    fn test_resolve_code_location_of_own_code() {
        let pc = test_resolve_code_location_of_own_code as fn() as usize as u64;
        let location = resolve_code_location(Pid::this(), pc)
            .expect("Failed to read memory maps")
            .expect("Function should be inside a file mapping");
        let executable = std::env::current_exe().unwrap();
        assert_eq!(location.module.file_name(), executable.file_name());
    }

    #[test]
    fn test_kernel_fault_classification() {
        const SEGV_MAPERR: i32 = 1;
        const SI_TKILL: i32 = -6;
        let fault = FaultInfo {
            signal: Signal::SIGSEGV,
            code: SEGV_MAPERR,
            address: 0,
            pc: 0x1000,
            location: None,
        };
        assert!(fault.is_kernel_fault());
        let raised = FaultInfo {
            signal: Signal::SIGSEGV,
            code: SI_TKILL,
            address: 0,
            pc: 0x1000,
            location: None,
        };
        assert!(!raised.is_kernel_fault());
        assert!(is_fault_signal(Signal::SIGSEGV));
        assert!(!is_fault_signal(Signal::SIGTRAP));
    }
}
