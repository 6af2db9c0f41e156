use std::io::Write;
/////////////////////////////////////////
use anyhow::{Context, Result};
/////////////////////////////////////////

/// Values above this take the "greater" branch of [`conditional_branch`].
pub const BRANCH_THRESHOLD: i32 = 100;

/// Plain integer addition. Kept out of line so a debugger can break on it.
#[inline(never)]
pub fn add(a: i32, b: i32) -> i32 {
    a + b
}

/// Prints `Stack depth: N` for every depth from `depth` down to 1, one call frame per line.
/// A depth of zero (or below) is the terminal case and prints nothing.
#[inline(never)]
pub fn bounded_recursion<W: Write>(depth: i32, out: &mut W) -> Result<()> {
    if depth <= 0 {
        return Ok(());
    }
    writeln!(out, "Stack depth: {}", depth).context("Failed to write stack depth")?;
    bounded_recursion(depth - 1, out)
}

#[inline(never)]
pub fn conditional_branch<W: Write>(value: i32, out: &mut W) -> Result<()> {
    let result = if value > BRANCH_THRESHOLD {
        writeln!(out, "Value {} is greater than {}", value, BRANCH_THRESHOLD)
    } else {
        writeln!(
            out,
            "Value {} is less than or equal to {}",
            value, BRANCH_THRESHOLD
        )
    };
    result.context("Failed to write branch message")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_of(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).expect("Demo operation failed");
        String::from_utf8(out).expect("Output is not utf8")
    }

    #[test]
    fn test_add() {
        assert_eq!(add(10, 20), 30);
        assert_eq!(add(-5, 5), 0);
    }

    #[test]
    fn test_bounded_recursion_prints_each_depth_once() {
        let output = output_of(|out| bounded_recursion(3, out));
        assert_eq!(output, "Stack depth: 3\nStack depth: 2\nStack depth: 1\n");
    }

    #[test]
    fn test_bounded_recursion_terminal_case_is_silent() {
        assert_eq!(output_of(|out| bounded_recursion(0, out)), "");
        assert_eq!(output_of(|out| bounded_recursion(-2, out)), "");
    }

    #[test]
    fn test_conditional_branch_both_outcomes() {
        assert_eq!(
            output_of(|out| conditional_branch(150, out)),
            "Value 150 is greater than 100\n"
        );
        assert_eq!(
            output_of(|out| conditional_branch(50, out)),
            "Value 50 is less than or equal to 100\n"
        );
        // The threshold itself is not "greater".
        assert_eq!(
            output_of(|out| conditional_branch(100, out)),
            "Value 100 is less than or equal to 100\n"
        );
    }
}
