pub mod demo;
pub mod fault;
pub mod memory;
pub mod pipe_channel;
pub mod process;
pub mod scenario;

pub use fault::{Fault, inject};
pub use memory::DemoState;
pub use scenario::Variant;

pub use nix::sys::signal::Signal;
pub type Pid = nix::unistd::Pid;
