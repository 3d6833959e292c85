//! A priority-preemptive SMP scheduling core with a timer wheel.
//!
//! The crate owns the scheduling state machine of a small real-time
//! kernel: fixed thread and timer arenas, per-priority ready lists under
//! a two-level bitmap, a per-core execution mapping with affinity and
//! preemption-threshold support, and a bucketed timer wheel driving
//! sleeps, timeouts, and application timers.
//!
//! It deliberately does not switch contexts. A [`Port`] implementation
//! supplies core identity and inter-core signaling, observes the
//! execution targets the kernel computes, and performs the switches at
//! its own safe points.

#![no_std]

pub mod bitmap;
pub mod config;
pub mod error;
pub mod kernel;
pub mod port;
pub mod thread;
pub mod timer;

mod sched;

#[cfg(test)]
extern crate std;

pub use bitmap::CoreMask;
pub use config::{KernelConfig, NO_WAIT, WAIT_FOREVER};
pub use error::{KernelError, KernelResult};
pub use kernel::Kernel;
pub use port::Port;
pub use thread::{ThreadConfig, ThreadId, ThreadInfo, ThreadNotify, ThreadState, WakeStatus};
pub use timer::{TimerConfig, TimerId, TimerInfo};
