use std::fmt::Write;
/////////////////////////////////////////
use colored::Colorize;
/////////////////////////////////////////
use libcrashdemo::process::{FaultInfo, StopReason, Termination, is_fault_signal};
/////////////////////////////////////////

/// Formats the captured output of the program followed by how it ended.
pub fn render(name: &str, termination: &Termination, output: &str) -> String {
    let mut report = String::new();
    if !output.is_empty() {
        report.push_str(output);
        if !output.ends_with('\n') {
            report.push('\n');
        }
    }
    let _ = writeln!(
        report,
        "{} {}",
        name.bold(),
        describe_reason(&termination.reason)
    );
    if let Some(fault) = &termination.fault {
        let _ = writeln!(report, "{}", describe_fault(fault));
        let _ = writeln!(report, "{}", describe_fault_location(fault));
    }
    report
}

fn describe_reason(reason: &StopReason) -> String {
    let text = reason.to_string();
    match reason {
        StopReason::Exited(0) => text.green().to_string(),
        StopReason::Terminated(signal) if is_fault_signal(*signal) => text.red().bold().to_string(),
        _ => text.yellow().to_string(),
    }
}

fn describe_fault(fault: &FaultInfo) -> String {
    let prefix = format!("fault: {} (si_code {})", fault.signal.as_str(), fault.code);
    if fault.is_kernel_fault() {
        format!("{} at address {:#x}", prefix.red(), fault.address)
    } else {
        format!("{} raised by the process", prefix.red())
    }
}

fn describe_fault_location(fault: &FaultInfo) -> String {
    let pc = format!("pc: {:#x}", fault.pc);
    match &fault.location {
        Some(location) => {
            let module = location
                .module
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| location.module.display().to_string());
            format!("{} ({}+{:#x})", pc, module.cyan(), location.offset)
        }
        None => pc,
    }
}
