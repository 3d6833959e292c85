//! End-to-end scheduling behavior through the public kernel services,
//! driven by a recording test port.

mod common;

use common::{kernel, TestPort};
use rtsched::{
    CoreMask, Kernel, KernelConfig, KernelError, ThreadConfig, ThreadId, ThreadNotify,
    ThreadState,
};
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn auto_start_threads_get_cores_at_start() {
    let (kernel, _port) = kernel(2);
    let a = kernel.thread_create(&ThreadConfig::new("a", 10)).unwrap();
    let b = kernel.thread_create(&ThreadConfig::new("b", 20)).unwrap();
    let parked = kernel
        .thread_create(&ThreadConfig::new("parked", 5).auto_start(false))
        .unwrap();
    kernel.start();
    assert_eq!(kernel.execute_target(0), Some(a));
    assert_eq!(kernel.execute_target(1), Some(b));
    assert_eq!(
        kernel.thread_info_get(parked).unwrap().state,
        ThreadState::Suspended
    );
}

#[test]
fn higher_priority_preempts_running_thread() {
    let (kernel, port) = kernel(1);
    let low = kernel.thread_create(&ThreadConfig::new("low", 20)).unwrap();
    kernel.start();
    assert_eq!(kernel.acknowledge_schedule(), Some(low));
    let before = port.returns();
    let high = kernel.thread_create(&ThreadConfig::new("high", 5)).unwrap();
    assert_eq!(kernel.execute_target(0), Some(high));
    // The displaced thread stays ready and the calling core is told to
    // switch.
    assert_eq!(kernel.thread_info_get(low).unwrap().state, ThreadState::Ready);
    assert!(port.returns() > before);
    assert_eq!(kernel.acknowledge_schedule(), Some(high));
}

#[test]
fn suspend_resume_round_trip() {
    let (kernel, _port) = kernel(1);
    let w = kernel.thread_create(&ThreadConfig::new("w", 10)).unwrap();
    kernel.start();
    kernel.acknowledge_schedule();
    kernel.thread_suspend(w).unwrap();
    assert_eq!(kernel.thread_info_get(w).unwrap().state, ThreadState::Suspended);
    assert_eq!(kernel.execute_target(0), None);
    // Suspending a suspended thread is fine.
    kernel.thread_suspend(w).unwrap();
    assert_eq!(kernel.acknowledge_schedule(), None);
    kernel.thread_resume(w).unwrap();
    assert_eq!(kernel.thread_info_get(w).unwrap().state, ThreadState::Ready);
    assert_eq!(kernel.execute_target(0), Some(w));
    assert_eq!(kernel.thread_resume(w), Err(KernelError::NotSuspended));
}

#[test]
fn relinquish_rotates_same_priority() {
    let (kernel, _port) = kernel(1);
    let a = kernel.thread_create(&ThreadConfig::new("a", 10)).unwrap();
    let b = kernel.thread_create(&ThreadConfig::new("b", 10)).unwrap();
    kernel.start();
    assert_eq!(kernel.acknowledge_schedule(), Some(a));
    kernel.thread_relinquish().unwrap();
    assert_eq!(kernel.execute_target(0), Some(b));
    assert_eq!(kernel.acknowledge_schedule(), Some(b));
    kernel.thread_relinquish().unwrap();
    assert_eq!(kernel.execute_target(0), Some(a));
}

#[test]
fn relinquish_needs_a_current_thread() {
    let (kernel, _port) = kernel(1);
    kernel.start();
    assert_eq!(kernel.thread_relinquish(), Err(KernelError::CallerContext));
}

#[test]
fn time_slice_rotation_via_ticks() {
    let (kernel, _port) = kernel(1);
    let a = kernel
        .thread_create(&ThreadConfig::new("a", 10).time_slice(2))
        .unwrap();
    let b = kernel
        .thread_create(&ThreadConfig::new("b", 10).time_slice(2))
        .unwrap();
    kernel.start();
    assert_eq!(kernel.acknowledge_schedule(), Some(a));
    kernel.tick();
    assert_eq!(kernel.execute_target(0), Some(a));
    kernel.tick();
    // Slice expired: the peer takes over.
    assert_eq!(kernel.execute_target(0), Some(b));
    assert_eq!(kernel.acknowledge_schedule(), Some(b));
    kernel.tick();
    kernel.tick();
    assert_eq!(kernel.execute_target(0), Some(a));
}

#[test]
fn threshold_blocks_band_until_holder_leaves() {
    let (kernel, _port) = kernel(1);
    let holder = kernel
        .thread_create(&ThreadConfig::new("holder", 10).preempt_threshold(5))
        .unwrap();
    kernel.start();
    assert_eq!(kernel.acknowledge_schedule(), Some(holder));
    // Priority 7 falls inside the holder's blocked band [5, 10].
    let blocked = kernel.thread_create(&ThreadConfig::new("blocked", 7)).unwrap();
    assert_eq!(kernel.execute_target(0), Some(holder));
    assert_eq!(
        kernel.thread_info_get(blocked).unwrap().state,
        ThreadState::Ready
    );
    kernel.thread_suspend(holder).unwrap();
    assert_eq!(kernel.execute_target(0), Some(blocked));
    // Resuming the holder does not displace the band it once blocked.
    kernel.thread_resume(holder).unwrap();
    assert_eq!(kernel.execute_target(0), Some(blocked));
    assert_eq!(
        kernel.thread_info_get(holder).unwrap().state,
        ThreadState::Ready
    );
}

#[test]
fn pinned_thread_displaces_flexible_peer() {
    let (kernel, port) = kernel(2);
    let flexible = kernel.thread_create(&ThreadConfig::new("flex", 10)).unwrap();
    kernel.start();
    assert_eq!(kernel.execute_target(0), Some(flexible));
    let pinned = kernel
        .thread_create(&ThreadConfig::new("pin", 10).cores_excluded(CoreMask::single(1)))
        .unwrap();
    // Same priority, but the newcomer may only use core 0; the incumbent
    // shifts over and the idle core gets woken.
    assert_eq!(kernel.execute_target(0), Some(pinned));
    assert_eq!(kernel.execute_target(1), Some(flexible));
    assert!(port.wakeups().contains(&1));
}

#[test]
fn remote_preempt_rings_the_doorbell() {
    let (kernel, port) = kernel(2);
    let a = kernel.thread_create(&ThreadConfig::new("a", 10)).unwrap();
    let b = kernel.thread_create(&ThreadConfig::new("b", 20)).unwrap();
    kernel.start();
    assert_eq!(kernel.acknowledge_schedule(), Some(a));
    port.set_core(1);
    assert_eq!(kernel.acknowledge_schedule(), Some(b));
    port.set_core(0);
    let high = kernel.thread_create(&ThreadConfig::new("high", 5)).unwrap();
    // The least urgent thread ran on core 1; that core gets the IPI.
    assert_eq!(kernel.execute_target(1), Some(high));
    assert!(port.preempts().contains(&1));
    port.set_core(1);
    assert!(kernel.preemption_point());
    assert_eq!(kernel.acknowledge_schedule(), Some(high));
    assert_eq!(kernel.thread_info_get(b).unwrap().state, ThreadState::Ready);
}

#[test]
fn core_claim_waits_for_release_by_previous_core() {
    let (kernel, port) = kernel(2);
    let t = kernel.thread_create(&ThreadConfig::new("t", 10)).unwrap();
    kernel.start();
    assert_eq!(kernel.acknowledge_schedule(), Some(t));
    // Retarget the running thread at the other core.
    kernel.thread_core_exclude(t, CoreMask::single(0)).unwrap();
    assert_eq!(kernel.execute_target(1), Some(t));
    // Core 1 cannot claim it while core 0 still runs it.
    port.set_core(1);
    assert_eq!(kernel.acknowledge_schedule(), None);
    assert_eq!(kernel.current_thread(1), None);
    // Core 0 acknowledges, releasing the thread.
    port.set_core(0);
    assert_eq!(kernel.acknowledge_schedule(), None);
    // Now the claim goes through.
    port.set_core(1);
    assert_eq!(kernel.acknowledge_schedule(), Some(t));
    assert_eq!(kernel.thread_info_get(t).unwrap().core_mapped, 1);
}

static EXIT_EVENTS: AtomicUsize = AtomicUsize::new(0);
static HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

fn exit_notify(_id: ThreadId, event: ThreadNotify) {
    if event == ThreadNotify::Exit {
        EXIT_EVENTS.fetch_add(1, Ordering::SeqCst);
    }
}

fn termination_hook(_id: ThreadId) {
    HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn terminate_fires_exit_notify_and_hook() {
    let port = TestPort::new();
    let kernel = Kernel::new(
        KernelConfig::new(1).with_termination_hook(termination_hook),
        port.clone(),
    );
    let w = kernel
        .thread_create(&ThreadConfig::new("w", 10).entry_exit_notify(exit_notify))
        .unwrap();
    kernel.start();
    kernel.acknowledge_schedule();
    kernel.thread_terminate(w).unwrap();
    assert_eq!(kernel.thread_info_get(w).unwrap().state, ThreadState::Terminated);
    assert_eq!(kernel.execute_target(0), None);
    assert_eq!(EXIT_EVENTS.load(Ordering::SeqCst), 1);
    assert_eq!(HOOK_CALLS.load(Ordering::SeqCst), 1);
    // Terminating a terminated thread changes nothing.
    kernel.thread_terminate(w).unwrap();
    assert_eq!(EXIT_EVENTS.load(Ordering::SeqCst), 1);
    assert_eq!(HOOK_CALLS.load(Ordering::SeqCst), 1);
    // Terminal threads cannot be suspended or resumed back to life.
    assert_eq!(kernel.thread_suspend(w), Err(KernelError::NotSuspended));
    assert_eq!(kernel.thread_resume(w), Err(KernelError::NotSuspended));
}

static ENTRY_EVENTS: AtomicUsize = AtomicUsize::new(0);

fn entry_notify(_id: ThreadId, event: ThreadNotify) {
    if event == ThreadNotify::Entry {
        ENTRY_EVENTS.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn entry_notify_on_first_dispatch_only() {
    let (kernel, _port) = kernel(1);
    let w = kernel
        .thread_create(&ThreadConfig::new("w", 10).entry_exit_notify(entry_notify))
        .unwrap();
    kernel.start();
    assert_eq!(kernel.acknowledge_schedule(), Some(w));
    assert_eq!(ENTRY_EVENTS.load(Ordering::SeqCst), 1);
    kernel.acknowledge_schedule();
    assert_eq!(ENTRY_EVENTS.load(Ordering::SeqCst), 1);
    assert_eq!(kernel.thread_info_get(w).unwrap().run_count, 1);
}

#[test]
fn completed_thread_leaves_the_core_for_good() {
    let (kernel, _port) = kernel(1);
    let w = kernel.thread_create(&ThreadConfig::new("w", 10)).unwrap();
    let next = kernel.thread_create(&ThreadConfig::new("next", 20)).unwrap();
    kernel.start();
    assert_eq!(kernel.acknowledge_schedule(), Some(w));
    // The port reports the entry function returned.
    kernel.thread_complete().unwrap();
    assert_eq!(kernel.thread_info_get(w).unwrap().state, ThreadState::Completed);
    assert_eq!(kernel.execute_target(0), Some(next));
    assert_eq!(kernel.thread_resume(w), Err(KernelError::NotSuspended));
    // Completed threads can be deleted.
    kernel.thread_delete(w).unwrap();
}

#[test]
fn create_validation() {
    let (kernel, _port) = kernel(1);
    assert_eq!(
        kernel.thread_create(&ThreadConfig::new("p", 64)),
        Err(KernelError::InvalidPriority)
    );
    assert_eq!(
        kernel.thread_create(&ThreadConfig::new("t", 10).preempt_threshold(11)),
        Err(KernelError::InvalidThreshold)
    );
    // Excluding every active core leaves the thread nowhere to run.
    assert_eq!(
        kernel.thread_create(&ThreadConfig::new("m", 10).cores_excluded(CoreMask::single(0))),
        Err(KernelError::InvalidCoreMask)
    );
    // Masks may only name active cores.
    assert_eq!(
        kernel.thread_create(&ThreadConfig::new("m", 10).cores_excluded(CoreMask::single(1))),
        Err(KernelError::InvalidCoreMask)
    );
}

#[test]
fn delete_requires_terminal_state() {
    let (kernel, _port) = kernel(1);
    let w = kernel.thread_create(&ThreadConfig::new("w", 10)).unwrap();
    kernel.start();
    assert_eq!(kernel.thread_delete(w), Err(KernelError::NotDone));
    kernel.thread_terminate(w).unwrap();
    kernel.thread_delete(w).unwrap();
    // The handle is dead.
    assert!(matches!(
        kernel.thread_info_get(w),
        Err(KernelError::InvalidThread)
    ));
    assert_eq!(kernel.thread_terminate(w), Err(KernelError::InvalidThread));
}

#[test]
fn isr_context_rejects_creation_and_deletion() {
    let (kernel, _port) = kernel(1);
    kernel.start();
    kernel.interrupt_enter();
    assert_eq!(
        kernel.thread_create(&ThreadConfig::new("w", 10)).unwrap_err(),
        KernelError::CallerContext
    );
    kernel.interrupt_exit();
    let w = kernel.thread_create(&ThreadConfig::new("w", 10)).unwrap();
    kernel.interrupt_enter();
    assert_eq!(kernel.thread_delete(w), Err(KernelError::CallerContext));
    kernel.interrupt_exit();
}

#[test]
fn interrupt_exit_reports_target_change() {
    let (kernel, _port) = kernel(1);
    let a = kernel.thread_create(&ThreadConfig::new("a", 20)).unwrap();
    kernel.start();
    assert_eq!(kernel.acknowledge_schedule(), Some(a));
    kernel.interrupt_enter();
    // An interrupt handler readies something more urgent.
    let b = kernel.thread_create(&ThreadConfig::new("b", 5));
    assert_eq!(b, Err(KernelError::CallerContext));
    kernel.thread_suspend(a).unwrap();
    assert!(kernel.interrupt_exit());
}

#[test]
fn priority_change_reorders_and_returns_previous() {
    let (kernel, _port) = kernel(1);
    let a = kernel.thread_create(&ThreadConfig::new("a", 20)).unwrap();
    let b = kernel.thread_create(&ThreadConfig::new("b", 10)).unwrap();
    kernel.start();
    assert_eq!(kernel.execute_target(0), Some(b));
    assert_eq!(kernel.thread_priority_change(a, 5), Ok(20));
    assert_eq!(kernel.execute_target(0), Some(a));
    let info = kernel.thread_info_get(a).unwrap();
    assert_eq!(info.priority, 5);
    // The threshold follows the new priority.
    assert_eq!(info.preempt_threshold, 5);
    assert_eq!(
        kernel.thread_priority_change(a, 64),
        Err(KernelError::InvalidPriority)
    );
}

#[test]
fn preemption_change_validates_against_priority() {
    let (kernel, _port) = kernel(1);
    let t = kernel.thread_create(&ThreadConfig::new("t", 10)).unwrap();
    kernel.start();
    assert_eq!(
        kernel.thread_preemption_change(t, 20),
        Err(KernelError::InvalidThreshold)
    );
    assert_eq!(kernel.thread_preemption_change(t, 4), Ok(10));
    assert_eq!(kernel.thread_info_get(t).unwrap().preempt_threshold, 4);
}

#[test]
fn time_slice_change_returns_previous() {
    let (kernel, _port) = kernel(1);
    let t = kernel.thread_create(&ThreadConfig::new("t", 10)).unwrap();
    assert_eq!(kernel.thread_time_slice_change(t, 7), Ok(0));
    assert_eq!(kernel.thread_time_slice_change(t, 3), Ok(7));
    assert_eq!(kernel.thread_info_get(t).unwrap().time_slice, 3);
}

#[test]
fn core_exclusion_change_moves_running_thread() {
    let (kernel, _port) = kernel(2);
    let t = kernel.thread_create(&ThreadConfig::new("t", 10)).unwrap();
    kernel.start();
    assert_eq!(kernel.execute_target(0), Some(t));
    kernel.thread_core_exclude(t, CoreMask::single(0)).unwrap();
    assert_eq!(kernel.execute_target(0), None);
    assert_eq!(kernel.execute_target(1), Some(t));
    assert_eq!(kernel.thread_core_exclude_get(t), Ok(CoreMask::single(0)));
    assert_eq!(
        kernel.thread_core_exclude(t, CoreMask::from_bits(0b11)),
        Err(KernelError::InvalidCoreMask)
    );
}
