//! Prints a greeting and a sum, then writes through a null pointer.
//! Meant to be loaded into a debugger: `crashwatch target/debug/crash_example`.
use std::io::{Write, stdout};

use anyhow::{Context, Result};
use libcrashdemo::{DemoState, Variant, scenario};

fn main() -> Result<()> {
    let mut state = DemoState::new();
    let mut out = stdout().lock();
    let fault = scenario::run(Variant::NullWrite, &mut state, &mut out)?;
    out.flush().context("Failed to flush stdout")?;
    libcrashdemo::inject(fault)
}
