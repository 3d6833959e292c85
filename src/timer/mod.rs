//! Internal timer records and the timer wheel.
//!
//! Timers live in a fixed arena and are linked into wheel buckets through
//! index-based circular lists, so activation and deactivation never
//! allocate. Expiration walks the bucket under the wheel cursor; spans
//! beyond the wheel are re-armed with the remainder until fully elapsed.

mod expiration;

pub(crate) use expiration::ExpiredStep;

use crate::config::{MAX_TIMERS, TIMER_WHEEL_SIZE, TIMER_WHEEL_SPAN, WAIT_FOREVER};
use crate::error::{KernelError, KernelResult};
use crate::thread::ThreadId;

/// Stable index into the timer arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) usize);

impl TimerId {
    pub(crate) const fn index(self) -> usize {
        self.0
    }
}

pub(crate) const TIMER_CONTROL_ID: u32 = 0x544D_5253;

/// What happens when a timer expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationAction {
    /// Nothing to invoke; the timer just goes inactive.
    None,
    /// Wake the owning thread with a timeout status. Used by the embedded
    /// sleep/timeout timer of every thread.
    ThreadTimeout(ThreadId),
    /// Application callback, invoked with the protection lock released.
    Callback { func: fn(usize), arg: usize },
}

/// One timer arena slot.
pub(crate) struct TimerRecord {
    pub(crate) control_id: u32,
    pub(crate) name: &'static str,
    /// Configured first-expiration ticks; what a fresh activation arms.
    pub(crate) initial: u32,
    /// Ticks left until expiration; 0 means inactive.
    pub(crate) remaining: u32,
    /// Re-initialization ticks for periodic timers; 0 means one-shot.
    pub(crate) reinit: u32,
    /// Bucket offset used at the last link. Expiration subtracts this,
    /// not the full wheel span, so a clamped insertion never fires early.
    pub(crate) linked_span: u32,
    pub(crate) action: ExpirationAction,
    /// Wheel bucket currently holding this timer, if any.
    pub(crate) bucket: Option<usize>,
    pub(crate) next: TimerId,
    pub(crate) prev: TimerId,
    /// Expiration-adjustment passes taken since the last activation.
    pub(crate) adjustments: u32,
}

/// Creation-time application timer attributes.
pub struct TimerConfig {
    pub name: &'static str,
    pub func: fn(usize),
    pub arg: usize,
    /// Ticks until the first expiration. Must be non-zero.
    pub initial: u32,
    /// Re-initialization ticks after each expiration; 0 makes the timer
    /// one-shot.
    pub reschedule: u32,
    pub auto_activate: bool,
}

impl TimerConfig {
    pub const fn new(name: &'static str, func: fn(usize), initial: u32) -> Self {
        Self {
            name,
            func,
            arg: 0,
            initial,
            reschedule: 0,
            auto_activate: true,
        }
    }

    pub const fn arg(mut self, arg: usize) -> Self {
        self.arg = arg;
        self
    }

    pub const fn reschedule(mut self, ticks: u32) -> Self {
        self.reschedule = ticks;
        self
    }

    pub const fn auto_activate(mut self, activate: bool) -> Self {
        self.auto_activate = activate;
        self
    }
}

/// Snapshot returned by `timer_info_get`.
#[derive(Debug, Clone, Copy)]
pub struct TimerInfo {
    pub name: &'static str,
    pub active: bool,
    pub remaining: u32,
    pub reinit: u32,
}

/// The timer list: arena plus wheel buckets plus cursor state.
pub(crate) struct TimerList {
    records: [Option<TimerRecord>; MAX_TIMERS],
    buckets: [Option<TimerId>; TIMER_WHEEL_SIZE],
    /// Bucket the tick source last advanced to.
    cursor: usize,
    /// Bucket the expiration routine last finished.
    processed: usize,
    /// Raised by `advance` when the new cursor bucket is non-empty.
    expired: bool,
    /// Timer whose callback is currently being dispatched with the lock
    /// released; a concurrent deactivate is recorded instead of unlinking.
    pub(crate) processing: Option<TimerId>,
    pub(crate) processing_deactivated: bool,
}

impl TimerList {
    pub(crate) const fn new() -> Self {
        Self {
            records: [const { None }; MAX_TIMERS],
            buckets: [None; TIMER_WHEEL_SIZE],
            cursor: 0,
            processed: 0,
            expired: false,
            processing: None,
            processing_deactivated: false,
        }
    }

    pub(crate) fn create(
        &mut self,
        name: &'static str,
        action: ExpirationAction,
        initial: u32,
        reinit: u32,
    ) -> KernelResult<TimerId> {
        let slot = self
            .records
            .iter()
            .position(|r| r.is_none())
            .ok_or(KernelError::MaxTimersReached)?;
        let id = TimerId(slot);
        self.records[slot] = Some(TimerRecord {
            control_id: TIMER_CONTROL_ID,
            name,
            initial,
            remaining: initial,
            reinit,
            linked_span: 0,
            action,
            bucket: None,
            next: id,
            prev: id,
            adjustments: 0,
        });
        Ok(id)
    }

    pub(crate) fn delete(&mut self, id: TimerId) {
        self.deactivate(id);
        if self.processing == Some(id) {
            // The record stays until the in-flight dispatch settles; the
            // deactivation mark above prevents any re-arm.
            if let Some(record) = self.record_mut(id) {
                record.control_id = 0;
            }
            return;
        }
        self.records[id.index()] = None;
    }

    /// Drop a record whose dispatch has settled and whose identity tag was
    /// cleared by a concurrent delete.
    pub(crate) fn reap(&mut self, id: TimerId) {
        if let Some(record) = self.record(id) {
            if record.control_id != TIMER_CONTROL_ID {
                self.records[id.index()] = None;
            }
        }
    }

    pub(crate) fn record(&self, id: TimerId) -> Option<&TimerRecord> {
        self.records.get(id.index()).and_then(|r| r.as_ref())
    }

    pub(crate) fn record_mut(&mut self, id: TimerId) -> Option<&mut TimerRecord> {
        self.records.get_mut(id.index()).and_then(|r| r.as_mut())
    }

    pub(crate) fn is_valid(&self, id: TimerId) -> bool {
        self.record(id)
            .map(|r| r.control_id == TIMER_CONTROL_ID)
            .unwrap_or(false)
    }

    pub(crate) fn is_active(&self, id: TimerId) -> bool {
        self.record(id).and_then(|r| r.bucket).is_some() || self.processing == Some(id)
    }

    /// Insert the timer into the bucket `ticks` slots ahead of the cursor,
    /// clamped to the wheel span. No-op for zero ticks, the wait-forever
    /// sentinel, or an already linked timer.
    pub(crate) fn activate(&mut self, id: TimerId, ticks: u32) {
        if ticks == 0 || ticks == WAIT_FOREVER {
            return;
        }
        let already_linked = match self.record(id) {
            Some(record) => record.bucket.is_some(),
            None => return,
        };
        if already_linked {
            return;
        }
        if let Some(record) = self.record_mut(id) {
            record.remaining = ticks;
            record.adjustments = 0;
        }
        self.link(id, ticks);
    }

    /// Link without touching `remaining`; used by expiration adjustment
    /// and periodic re-arm where remaining is already set.
    ///
    /// Buckets between the processing cursor and the tick cursor are
    /// still awaiting expiration; an insertion must never wrap into that
    /// window or it would be treated as already due. The offset is
    /// clamped below it and recorded so expiration subtracts exactly the
    /// span that elapsed.
    pub(crate) fn link(&mut self, id: TimerId, ticks: u32) {
        let lag = (self.cursor + TIMER_WHEEL_SIZE - self.processed) % TIMER_WHEEL_SIZE;
        let limit = TIMER_WHEEL_SPAN.saturating_sub(lag as u32).max(1);
        let span = ticks.clamp(1, limit) as usize;
        let bucket = (self.cursor + span) % TIMER_WHEEL_SIZE;
        match self.record_mut(id) {
            Some(record) => record.linked_span = span as u32,
            None => return,
        }
        match self.buckets[bucket] {
            None => {
                let record = match self.record_mut(id) {
                    Some(r) => r,
                    None => return,
                };
                record.next = id;
                record.prev = id;
                record.bucket = Some(bucket);
                self.buckets[bucket] = Some(id);
            }
            Some(head) => {
                let tail = match self.record(head) {
                    Some(h) => h.prev,
                    None => return,
                };
                if let Some(record) = self.record_mut(id) {
                    record.next = head;
                    record.prev = tail;
                    record.bucket = Some(bucket);
                }
                if let Some(tail_rec) = self.record_mut(tail) {
                    tail_rec.next = id;
                }
                if let Some(head_rec) = self.record_mut(head) {
                    head_rec.prev = id;
                }
            }
        }
    }

    /// Remove the timer from whatever bucket holds it. Idempotent; a
    /// deactivate racing the timer's own callback is recorded and applied
    /// when the dispatch settles instead of corrupting the list.
    pub(crate) fn deactivate(&mut self, id: TimerId) {
        if self.processing == Some(id) {
            self.processing_deactivated = true;
            return;
        }
        self.unlink(id);
        if let Some(record) = self.record_mut(id) {
            record.remaining = 0;
        }
    }

    /// Splice the timer out of its bucket, preserving `remaining`.
    pub(crate) fn unlink(&mut self, id: TimerId) {
        let (bucket, next, prev) = match self.record(id) {
            Some(record) => match record.bucket {
                Some(bucket) => (bucket, record.next, record.prev),
                None => return,
            },
            None => return,
        };
        if next == id {
            // Sole occupant.
            self.buckets[bucket] = None;
        } else {
            if let Some(prev_rec) = self.record_mut(prev) {
                prev_rec.next = next;
            }
            if let Some(next_rec) = self.record_mut(next) {
                next_rec.prev = prev;
            }
            if self.buckets[bucket] == Some(id) {
                self.buckets[bucket] = Some(next);
            }
        }
        if let Some(record) = self.record_mut(id) {
            record.bucket = None;
            record.next = id;
            record.prev = id;
        }
    }

    /// Advance the cursor one bucket. Returns true when the new bucket has
    /// timers to process.
    pub(crate) fn advance(&mut self) -> bool {
        self.cursor = (self.cursor + 1) % TIMER_WHEEL_SIZE;
        if self.buckets[self.cursor].is_some() {
            self.expired = true;
        }
        self.expired
    }

    pub(crate) fn expired(&self) -> bool {
        self.expired
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn processed(&self) -> usize {
        self.processed
    }

    pub(crate) fn set_processed(&mut self, bucket: usize) {
        self.processed = bucket;
        if self.processed == self.cursor {
            self.expired = false;
        }
    }

    pub(crate) fn bucket_head(&self, bucket: usize) -> Option<TimerId> {
        self.buckets[bucket]
    }

    pub(crate) fn info(&self, id: TimerId) -> Option<TimerInfo> {
        let record = self.record(id)?;
        Some(TimerInfo {
            name: record.name,
            active: record.bucket.is_some() || self.processing == Some(id),
            remaining: record.remaining,
            reinit: record.reinit,
        })
    }
}
