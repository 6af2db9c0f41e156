//! Walks through recursion, branching and a heap buffer, then writes one byte past the end of
//! that buffer. The buffer is never freed: the fault ends the process first.
use std::io::{Write, stdout};

use anyhow::{Context, Result};
use libcrashdemo::{DemoState, Variant, scenario};

fn main() -> Result<()> {
    let mut state = DemoState::new();
    let mut out = stdout().lock();
    let fault = scenario::run(Variant::HeapOverflow, &mut state, &mut out)?;
    out.flush().context("Failed to flush stdout")?;
    libcrashdemo::inject(fault)
}
