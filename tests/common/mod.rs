//! Shared test port: a host-side `Port` that records every signal the
//! kernel emits and lets a test pretend to be any core.

#![allow(dead_code)]

use rtsched::{Kernel, KernelConfig, Port};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct PortState {
    core: AtomicUsize,
    preempts: Mutex<Vec<usize>>,
    wakeups: Mutex<Vec<usize>>,
    returns: AtomicUsize,
}

/// Clonable handle onto shared port state; one clone goes into the
/// kernel, the test keeps another to steer and observe.
#[derive(Clone, Default)]
pub struct TestPort {
    state: Arc<PortState>,
}

impl TestPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent kernel calls appear to come from `core`.
    pub fn set_core(&self, core: usize) {
        self.state.core.store(core, Ordering::SeqCst);
    }

    pub fn preempts(&self) -> Vec<usize> {
        self.state.preempts.lock().unwrap().clone()
    }

    pub fn wakeups(&self) -> Vec<usize> {
        self.state.wakeups.lock().unwrap().clone()
    }

    /// Times the kernel asked the calling core to switch.
    pub fn returns(&self) -> usize {
        self.state.returns.load(Ordering::SeqCst)
    }
}

impl Port for TestPort {
    fn core_id(&self) -> usize {
        self.state.core.load(Ordering::SeqCst)
    }

    fn preempt_core(&self, core: usize) {
        self.state.preempts.lock().unwrap().push(core);
    }

    fn wakeup_core(&self, core: usize) {
        self.state.wakeups.lock().unwrap().push(core);
    }

    fn return_to_system(&self) {
        self.state.returns.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn kernel(cores: usize) -> (Kernel<TestPort>, TestPort) {
    let port = TestPort::new();
    let kernel = Kernel::new(KernelConfig::new(cores), port.clone());
    (kernel, port)
}
