//! Fault injection. This module is the only place where the demo programs perform invalid
//! memory accesses on purpose.
//!
//! Writes go through a single store instruction emitted with inline assembly, so that the faulting
//! instruction a debugger stops on is exactly the one listed here, and so that the compiler's
//! debug-mode pointer checks cannot turn the fault into a panic.
//!
//! What a heap overflow does is up to the allocator: the write can go unnoticed (allocators
//! usually round small requests up), corrupt a neighbouring chunk, or be detected later as heap
//! corruption and abort the process. [`inject`] therefore follows the overflow with an explicit
//! SIGSEGV, so the process always ends on a fault signal even when the write itself was silent.

use std::arch::asm;
/////////////////////////////////////////
use nix::sys::signal::{SigHandler, Signal, raise, signal};
/////////////////////////////////////////
use crate::memory::OverflowTarget;
/////////////////////////////////////////

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("Fault injection is only implemented for x86_64 and aarch64");

pub const NULL_WRITE_VALUE: u32 = 42;
pub const OVERFLOW_BYTE: u8 = b'!';

#[derive(Debug)]
pub enum Fault<'a> {
    /// Write [`NULL_WRITE_VALUE`] through a null pointer.
    NullWrite,
    /// Write [`OVERFLOW_BYTE`] just past the end of a heap buffer.
    HeapOverflow(OverflowTarget<'a>),
}

impl Fault<'_> {
    /// The address the injected write targets.
    pub fn address(&self) -> usize {
        match self {
            Fault::NullWrite => 0,
            Fault::HeapOverflow(target) => target.address(),
        }
    }
}

/// Performs the fault. Never returns: the process is terminated by the kernel.
#[inline(never)]
pub fn inject(fault: Fault<'_>) -> ! {
    restore_default_fault_handlers();
    match fault {
        Fault::NullWrite => {
            // Safety: none, this is the point.
            unsafe { store_u32(0, NULL_WRITE_VALUE) };
        }
        Fault::HeapOverflow(target) => {
            // Safety: none, the target is one byte outside of the allocation.
            unsafe { store_u8(target.address(), OVERFLOW_BYTE) };
            let _ = raise(Signal::SIGSEGV);
        }
    }
    // Only reachable if something ignored SIGSEGV.
    std::process::abort()
}

/// The Rust runtime installs SIGSEGV/SIGBUS handlers to report stack overflows. For any other
/// fault they reset themselves and return, so the instruction faults a second time and a tracer
/// sees two stops for one fault.
fn restore_default_fault_handlers() {
    for fault_signal in [Signal::SIGSEGV, Signal::SIGBUS] {
        // Safety: SIG_DFL is not a Rust function, nothing can run concurrently with it.
        let _ = unsafe { signal(fault_signal, SigHandler::SigDfl) };
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn store_u32(address: usize, value: u32) {
    unsafe {
        asm!(
            "mov dword ptr [{address}], {value:e}",
            address = in(reg) address,
            value = in(reg) value,
            options(nostack, preserves_flags)
        );
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn store_u8(address: usize, value: u8) {
    unsafe {
        asm!(
            "mov byte ptr [{address}], {value}",
            address = in(reg) address,
            value = in(reg_byte) value,
            options(nostack, preserves_flags)
        );
    }
}

#[cfg(target_arch = "aarch64")]
unsafe fn store_u32(address: usize, value: u32) {
    unsafe {
        asm!(
            "str {value:w}, [{address}]",
            address = in(reg) address,
            value = in(reg) value,
            options(nostack, preserves_flags)
        );
    }
}

#[cfg(target_arch = "aarch64")]
unsafe fn store_u8(address: usize, value: u8) {
    unsafe {
        asm!(
            "strb {value:w}, [{address}]",
            address = in(reg) address,
            value = in(reg) u32::from(value),
            options(nostack, preserves_flags)
        );
    }
}
