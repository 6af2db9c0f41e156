/////////////////////////////////////////
use std::path::PathBuf;
use std::process::{Command, Output};
/////////////////////////////////////////
use test_binary::build_test_binary;
/////////////////////////////////////////

fn sample_binary(name: &str) -> PathBuf {
    PathBuf::from(build_test_binary(name, "../tools").expect("Failed to build sample binary"))
}

fn run_crashwatch(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_crashwatch"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("CLICOLOR_FORCE")
        .output()
        .expect("Failed to run crashwatch")
}

#[test]
fn test_reports_null_write_fault() {
    let executable = sample_binary("crash_example");
    let output = run_crashwatch(&[executable.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "Starting test program...");
    assert_eq!(lines[1], "10 + 20 = 30");
    assert!(lines[2].ends_with("crash_example terminated by signal SIGSEGV"), "{}", stdout);
    assert_eq!(lines[3], "fault: SIGSEGV (si_code 1) at address 0x0");
    assert!(lines[4].starts_with("pc: 0x"), "{}", stdout);
    assert!(lines[4].contains("(crash_example+0x"), "{}", stdout);
    assert_eq!(lines.len(), 5);
}

#[test]
fn test_untraced_run_has_no_fault_details() {
    let executable = sample_binary("crash_example");
    let output = run_crashwatch(&["--no-trace", executable.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.ends_with("terminated by signal SIGSEGV\n"), "{}", stdout);
    assert!(!stdout.contains("fault:"));
}

#[test]
fn test_program_arguments_are_forwarded() {
    let output = run_crashwatch(&["echo", "--", "a", "b  c"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        String::from_utf8(output.stdout).unwrap(),
        "a b  c\necho exited with status 0\n"
    );
}

#[test]
fn test_missing_executable_fails() {
    let output = run_crashwatch(&["executable_that_does_not_exist"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error:"), "{}", stderr);
    assert!(stderr.contains("executable_that_does_not_exist"), "{}", stderr);
}

#[test]
fn test_missing_target_is_a_usage_error() {
    let output = run_crashwatch(&[]);
    assert!(!output.status.success());
}
