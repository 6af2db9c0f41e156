use std::io::Write;
/////////////////////////////////////////
use anyhow::{Context, Result};
/////////////////////////////////////////
use crate::demo::{add, bounded_recursion, conditional_branch};
use crate::fault::Fault;
use crate::memory::{DemoState, memory_operation};
/////////////////////////////////////////

pub const STACK_DEPTH: i32 = 3;
pub const FIRST_OPERAND: i32 = 10;
pub const SECOND_OPERAND: i32 = 20;
pub const LARGE_VALUE: i32 = 150;
pub const SMALL_VALUE: i32 = 50;

/// The two sample programs. Both print a fixed transcript and then fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Arithmetic followed by a write through a null pointer.
    NullWrite,
    /// Recursion, branching and a heap buffer, followed by a write past the end of that buffer.
    HeapOverflow,
}

impl Variant {
    /// Everything the variant prints before faulting.
    pub fn expected_output(&self) -> &'static str {
        match self {
            Variant::NullWrite => "Starting test program...\n10 + 20 = 30\n",
            Variant::HeapOverflow => concat!(
                "Starting stack and memory test program...\n",
                "Stack depth: 3\n",
                "Stack depth: 2\n",
                "Stack depth: 1\n",
                "Register operation: 10 + 20 = 30\n",
                "Sum result: 30\n",
                "Value 150 is greater than 100\n",
                "Value 50 is less than or equal to 100\n",
                "Buffer content: Hello, GDB!\n",
            ),
        }
    }
}

/// Runs every step of `variant` up to, but not including, the fault. The returned fault is what
/// the program should hand to [`crate::fault::inject`] once `out` has been flushed.
pub fn run<'a, W: Write>(
    variant: Variant,
    state: &'a mut DemoState,
    out: &mut W,
) -> Result<Fault<'a>> {
    match variant {
        Variant::NullWrite => {
            writeln!(out, "Starting test program...").context("Failed to write banner")?;
            let result = add(FIRST_OPERAND, SECOND_OPERAND);
            writeln!(out, "{} + {} = {}", FIRST_OPERAND, SECOND_OPERAND, result)
                .context("Failed to write result")?;
            Ok(Fault::NullWrite)
        }
        Variant::HeapOverflow => {
            writeln!(out, "Starting stack and memory test program...")
                .context("Failed to write banner")?;
            bounded_recursion(STACK_DEPTH, out)?;

            let sum = add(FIRST_OPERAND, SECOND_OPERAND);
            writeln!(
                out,
                "Register operation: {} + {} = {}",
                FIRST_OPERAND, SECOND_OPERAND, sum
            )
            .context("Failed to write register operation")?;
            writeln!(out, "Sum result: {}", sum).context("Failed to write sum")?;

            conditional_branch(LARGE_VALUE, out)?;
            conditional_branch(SMALL_VALUE, out)?;

            memory_operation(state, out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BUFFER_SIZE;

    #[test]
    fn test_null_write_variant() {
        let mut state = DemoState::new();
        let mut out = Vec::new();
        let fault = run(Variant::NullWrite, &mut state, &mut out).expect("Variant failed");
        assert!(matches!(fault, Fault::NullWrite));
        assert_eq!(
            String::from_utf8(out).unwrap(),
            Variant::NullWrite.expected_output()
        );
        assert!(state.buffer.is_none());
    }

    #[test]
    fn test_heap_overflow_variant() {
        let mut state = DemoState::new();
        let mut out = Vec::new();
        let fault = run(Variant::HeapOverflow, &mut state, &mut out).expect("Variant failed");
        match &fault {
            Fault::HeapOverflow(target) => assert_eq!(target.offset(), BUFFER_SIZE),
            other => panic!("Expected a heap overflow, got {:?}", other),
        }
        let output = String::from_utf8(out).unwrap();
        assert_eq!(output, Variant::HeapOverflow.expected_output());
        assert_eq!(output.lines().filter(|l| l.starts_with("Stack depth")).count(), 3);
        assert!(!output.contains("Stack depth: 0"));
    }

    #[test]
    fn test_write_errors_are_reported() {
        struct FailingWriter;
        impl Write for FailingWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("closed"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let mut state = DemoState::new();
        assert!(run(Variant::HeapOverflow, &mut state, &mut FailingWriter).is_err());
        assert!(state.buffer.is_none());
    }
}
