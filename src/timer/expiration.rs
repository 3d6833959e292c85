//! Expiration stepping for the timer wheel.
//!
//! The kernel drives this in a loop: each step runs under protection and
//! either finishes an adjustment pass inline or hands back one fired timer
//! whose action the kernel dispatches with the lock released, then settles
//! through `finish_fired`.

use super::{TimerId, TimerList, ExpirationAction, TIMER_CONTROL_ID};
use crate::config::TIMER_WHEEL_SIZE;

/// One timer whose expiration action is due for dispatch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExpiredStep {
    pub(crate) id: TimerId,
    pub(crate) action: ExpirationAction,
}

impl TimerList {
    /// Walk unprocessed buckets up to the cursor. Timers whose remaining
    /// span exceeds the wheel are re-armed with the remainder (the
    /// expiration adjustment) without firing; the first genuinely expired
    /// timer is unlinked, marked as in-dispatch, and returned.
    pub(crate) fn expire_step(&mut self) -> Option<ExpiredStep> {
        debug_assert!(self.processing.is_none());
        while self.processed() != self.cursor() {
            let bucket = (self.processed() + 1) % TIMER_WHEEL_SIZE;
            let head = match self.bucket_head(bucket) {
                Some(head) => head,
                None => {
                    self.set_processed(bucket);
                    continue;
                }
            };
            self.unlink(head);
            let (remaining, linked_span, action) = match self.record(head) {
                Some(record) => (record.remaining, record.linked_span, record.action),
                None => continue,
            };
            if remaining > linked_span {
                // Not yet elapsed: only `linked_span` ticks of the
                // remaining count have passed since this link.
                let remainder = remaining - linked_span;
                if let Some(record) = self.record_mut(head) {
                    record.remaining = remainder;
                    record.adjustments += 1;
                }
                self.link(head, remainder);
                continue;
            }
            self.processing = Some(head);
            self.processing_deactivated = false;
            return Some(ExpiredStep { id: head, action });
        }
        None
    }

    /// Settle a fired timer after its action ran with the lock released:
    /// honor a deactivate that raced the dispatch, re-arm periodic timers,
    /// and reap a record deleted mid-dispatch.
    pub(crate) fn finish_fired(&mut self, id: TimerId) {
        debug_assert_eq!(self.processing, Some(id));
        self.processing = None;
        let deactivated = self.processing_deactivated;
        self.processing_deactivated = false;
        let (reinit, live) = match self.record(id) {
            Some(record) => (record.reinit, record.control_id == TIMER_CONTROL_ID),
            None => return,
        };
        if !live {
            // Deleted from inside its own callback.
            self.reap(id);
            return;
        }
        if deactivated || reinit == 0 {
            if let Some(record) = self.record_mut(id) {
                record.remaining = 0;
            }
            return;
        }
        if let Some(record) = self.record_mut(id) {
            record.remaining = reinit;
            record.adjustments = 0;
        }
        self.link(id, reinit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WAIT_FOREVER;

    fn drive(list: &mut TimerList, ticks: u32) -> u32 {
        let mut fired = 0;
        for _ in 0..ticks {
            list.advance();
            while let Some(step) = list.expire_step() {
                fired += 1;
                list.finish_fired(step.id);
            }
        }
        fired
    }

    #[test]
    fn one_shot_fires_exactly_once() {
        let mut list = TimerList::new();
        let id = list.create("t", ExpirationAction::None, 7, 0).unwrap();
        list.activate(id, 7);
        assert_eq!(drive(&mut list, 6), 0);
        assert_eq!(drive(&mut list, 1), 1);
        assert!(!list.is_active(id));
        assert_eq!(drive(&mut list, 100), 0);
    }

    #[test]
    fn periodic_fires_once_per_period() {
        let mut list = TimerList::new();
        let id = list.create("p", ExpirationAction::None, 4, 4).unwrap();
        list.activate(id, 4);
        assert_eq!(drive(&mut list, 12), 3);
        assert!(list.is_active(id));
        list.deactivate(id);
        assert_eq!(drive(&mut list, 12), 0);
    }

    #[test]
    fn double_wheel_span_adjusts_twice_then_fires() {
        let mut list = TimerList::new();
        let ticks = 2 * TIMER_WHEEL_SIZE as u32;
        let id = list.create("long", ExpirationAction::None, ticks, 0).unwrap();
        list.activate(id, ticks);
        assert_eq!(drive(&mut list, ticks - 1), 0);
        assert_eq!(list.record(id).unwrap().adjustments, 2);
        assert_eq!(drive(&mut list, 1), 1);
        assert!(!list.is_active(id));
    }

    #[test]
    fn lagging_processing_never_fires_long_timers_early() {
        let mut list = TimerList::new();
        let pending = list.create("pending", ExpirationAction::None, 1, 0).unwrap();
        list.activate(pending, 1);
        // Two ticks land before the expiration routine gets to run.
        list.advance();
        list.advance();
        let late = list.create("late", ExpirationAction::None, 31, 0).unwrap();
        list.activate(late, 31);
        // Catching up fires only the 1-tick timer.
        let step = list.expire_step().expect("pending timer due");
        assert_eq!(step.id, pending);
        list.finish_fired(step.id);
        assert!(list.expire_step().is_none());
        assert!(list.is_active(late));
        // The long timer still takes its full 31 ticks from activation.
        assert_eq!(drive(&mut list, 30), 0);
        assert_eq!(drive(&mut list, 1), 1);
    }

    #[test]
    fn wait_forever_never_fires() {
        let mut list = TimerList::new();
        let id = list
            .create("inf", ExpirationAction::None, WAIT_FOREVER, 0)
            .unwrap();
        list.activate(id, WAIT_FOREVER);
        assert_eq!(drive(&mut list, 3 * TIMER_WHEEL_SIZE as u32), 0);
    }

    #[test]
    fn deactivate_during_dispatch_blocks_rearm() {
        let mut list = TimerList::new();
        let id = list.create("p", ExpirationAction::None, 2, 2).unwrap();
        list.activate(id, 2);
        list.advance();
        list.advance();
        let step = list.expire_step().expect("due");
        // Another core deactivates while the callback runs unlocked.
        list.deactivate(step.id);
        assert!(list.processing_deactivated);
        list.finish_fired(step.id);
        assert!(!list.is_active(id));
        assert_eq!(drive(&mut list, 8), 0);
    }
}
