//! Ready-structure maintenance: circular per-priority lists plus the
//! two-level priority bitmap.

use super::SchedulerCore;
use crate::config::MAX_PRIORITIES;
use crate::thread::ThreadId;

impl SchedulerCore {
    /// Link the thread at the tail of its priority's ready list and flag
    /// the priority in the bitmap. The TCB's links must be self-linked or
    /// about to be overwritten.
    pub(crate) fn ready_link(&mut self, id: ThreadId) {
        let priority = self.tcb(id).priority;
        match self.ready_heads[priority] {
            None => {
                let tcb = self.tcb_mut(id);
                tcb.ready_next = id;
                tcb.ready_prev = id;
                self.ready_heads[priority] = Some(id);
                self.ready_map.set(priority);
            }
            Some(head) => {
                let tail = self.tcb(head).ready_prev;
                let tcb = self.tcb_mut(id);
                tcb.ready_next = head;
                tcb.ready_prev = tail;
                self.tcb_mut(tail).ready_next = id;
                self.tcb_mut(head).ready_prev = id;
            }
        }
    }

    /// Splice the thread out of its ready list, clearing the bitmap bit
    /// when the list empties. Returns the thread that now follows at this
    /// priority, or `None` when the list became empty.
    pub(crate) fn ready_unlink(&mut self, id: ThreadId) -> Option<ThreadId> {
        let priority = self.tcb(id).priority;
        let next = self.tcb(id).ready_next;
        if next == id {
            self.ready_heads[priority] = None;
            self.ready_map.clear(priority);
            return None;
        }
        let prev = self.tcb(id).ready_prev;
        self.tcb_mut(prev).ready_next = next;
        self.tcb_mut(next).ready_prev = prev;
        if self.ready_heads[priority] == Some(id) {
            self.ready_heads[priority] = Some(next);
        }
        let tcb = self.tcb_mut(id);
        tcb.ready_next = id;
        tcb.ready_prev = id;
        Some(next)
    }

    /// Move the thread to the tail of its priority's ready list, giving
    /// its peers a turn. No-op when the thread is alone.
    pub(crate) fn rotate_to_tail(&mut self, id: ThreadId) {
        if self.tcb(id).ready_next == id {
            return;
        }
        let priority = self.tcb(id).priority;
        if self.ready_heads[priority] == Some(id) {
            // Head of a circular list: advancing the head makes it the tail.
            let next = self.tcb(id).ready_next;
            self.ready_heads[priority] = Some(next);
        } else {
            self.ready_unlink(id);
            self.ready_link(id);
        }
    }

    /// Most urgent non-empty priority at or below the urgency of `from`.
    /// `MAX_PRIORITIES` when nothing qualifies.
    pub(crate) fn next_priority_find(&self, from: usize) -> usize {
        self.ready_map.lowest_set_from(from).unwrap_or(MAX_PRIORITIES)
    }

    /// Follower of `id` within its own priority's circular list, or `None`
    /// once the walk wraps back to the head.
    pub(crate) fn next_at_priority(&self, id: ThreadId, priority: usize) -> Option<ThreadId> {
        let next = self.tcb(id).ready_next;
        if self.ready_heads[priority] == Some(next) {
            None
        } else {
            Some(next)
        }
    }
}
