//! Deterministic single-threaded timer wheel with microsecond resolution.
//! Timers carry a plain [`TimerKind`] payload instead of callbacks; the
//! owning stack dispatches expired kinds after each tick. All wall-clock
//! progression inside the stack hangs off this module.

use crate::error::{StackError, StackResult};
use crate::limits::MAX_TIMERS;
use girder::pool::SlotPool;

/// What to do when a timer fires. Indices are pool positions, tolerant of
/// vacated slots at dispatch time.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TimerKind {
    /// Periodic transmission of one provider CR.
    PpmSend { ar: usize, cr: usize },
    /// Data-hold watchdog of one consumer CR.
    CpmDataHold { ar: usize, cr: usize },
    /// Alarm retransmission on one priority lane.
    AlarmRetransmit { ar: usize, lane: usize },
    /// Connection-establishment supervision.
    CmsmTimeout { ar: usize },
    /// RPC out-fragment retransmission.
    SessionResend { session: usize },
    /// Inbound fragment reassembly deadline.
    SessionFragTimeout { session: usize },
    /// Delayed DCP identify response.
    DcpResponse,
    /// Next HELLO emission of the startup burst.
    DcpHello,
    /// End of the DCP signal LED flash period.
    SignalLedOff,
}

/// Stable timer reference. The sequence tag detects reuse of the slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TimerHandle {
    index: usize,
    seq: u32,
}

#[derive(Debug)]
struct Slot {
    seq: u32,
    when_us: u64,
    kind: TimerKind,
    name: &'static str,
}

pub struct Scheduler {
    slots: SlotPool<Slot>,
    /// Pool indices ordered by expiry; equal expiries keep insertion order.
    ordered: Vec<usize>,
    seq: u32,
    now_us: u64,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            slots: SlotPool::with_capacity(MAX_TIMERS),
            ordered: Vec::with_capacity(MAX_TIMERS),
            seq: 0,
            now_us: 0,
        }
    }

    /// Current scheduler time: the timestamp of the latest tick.
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Insert a timer expiring `delay_us` after the current tick time.
    pub fn schedule(
        &mut self,
        delay_us: u64,
        kind: TimerKind,
        name: &'static str,
    ) -> StackResult<TimerHandle> {
        let when_us = self.now_us + delay_us;

        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;

        let index = self
            .slots
            .alloc(Slot {
                seq,
                when_us,
                kind,
                name,
            })
            .ok_or(StackError::OutOfResources)?;

        self.insert_ordered(index, when_us);

        Ok(TimerHandle { index, seq })
    }

    /// Remove the timer. Stale handles are ignored.
    pub fn cancel(&mut self, handle: TimerHandle) {
        let live = match self.slots.get(handle.index) {
            Some(slot) => slot.seq == handle.seq,
            None => false,
        };

        if live {
            self.slots.reclaim(handle.index);
            self.ordered.retain(|&index| index != handle.index);
        }
    }

    /// Move the timer to a new expiry relative to the current tick time.
    pub fn reschedule(&mut self, handle: TimerHandle, delay_us: u64) -> StackResult<()> {
        let when_us = self.now_us + delay_us;

        match self.slots.get_mut(handle.index) {
            Some(slot) if slot.seq == handle.seq => {
                slot.when_us = when_us;
            }
            _ => return Err(StackError::NotFound),
        }

        self.ordered.retain(|&index| index != handle.index);
        self.insert_ordered(handle.index, when_us);
        Ok(())
    }

    /// Advance to `now_us` and drain every expired timer into `fired`, in
    /// expiry order (insertion order for equal expiries).
    pub fn tick(&mut self, now_us: u64, fired: &mut Vec<TimerKind>) {
        self.now_us = now_us;

        while let Some(&index) = self.ordered.first() {
            let expired = match self.slots.get(index) {
                Some(slot) => slot.when_us <= now_us,
                // Vacated entries left over from a cancel race are dropped.
                None => true,
            };

            if !expired {
                break;
            }

            self.ordered.remove(0);
            if let Some(slot) = self.slots.reclaim(index) {
                fired.push(slot.kind);
            }
        }
    }

    /// Number of armed timers.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// The ordered list is sorted non-decreasing by expiry.
    pub fn is_ordered(&self) -> bool {
        let mut prev = 0u64;

        for &index in &self.ordered {
            let when = match self.slots.get(index) {
                Some(slot) => slot.when_us,
                None => continue,
            };

            if when < prev {
                return false;
            }
            prev = when;
        }

        true
    }

    /// Debug name of the timer behind a handle, if still armed.
    pub fn name(&self, handle: TimerHandle) -> Option<&'static str> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.seq == handle.seq)
            .map(|slot| slot.name)
    }

    fn insert_ordered(&mut self, index: usize, when_us: u64) {
        // Insert after every entry with expiry <= when_us to preserve
        // insertion order among equals.
        let position = self
            .ordered
            .iter()
            .position(|&other| match self.slots.get(other) {
                Some(slot) => slot.when_us > when_us,
                None => false,
            })
            .unwrap_or(self.ordered.len());

        self.ordered.insert(position, index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sched: &mut Scheduler, now: u64) -> Vec<TimerKind> {
        let mut fired = Vec::new();
        sched.tick(now, &mut fired);
        fired
    }

    #[test]
    fn test_fires_in_expiry_order() {
        let mut sched = Scheduler::new();

        sched
            .schedule(2000, TimerKind::PpmSend { ar: 0, cr: 0 }, "ppm")
            .unwrap();
        sched
            .schedule(1000, TimerKind::CpmDataHold { ar: 0, cr: 1 }, "dht")
            .unwrap();
        sched.schedule(3000, TimerKind::DcpHello, "hello").unwrap();

        assert!(sched.is_ordered());
        assert_eq!(drain(&mut sched, 500), vec![]);
        assert_eq!(
            drain(&mut sched, 2000),
            vec![
                TimerKind::CpmDataHold { ar: 0, cr: 1 },
                TimerKind::PpmSend { ar: 0, cr: 0 }
            ]
        );
        assert_eq!(drain(&mut sched, 3000), vec![TimerKind::DcpHello]);
        assert_eq!(sched.len(), 0);
    }

    #[test]
    fn test_equal_expiry_keeps_insertion_order() {
        let mut sched = Scheduler::new();

        sched
            .schedule(1000, TimerKind::PpmSend { ar: 0, cr: 0 }, "a")
            .unwrap();
        sched
            .schedule(1000, TimerKind::PpmSend { ar: 1, cr: 0 }, "b")
            .unwrap();
        sched
            .schedule(1000, TimerKind::PpmSend { ar: 2, cr: 0 }, "c")
            .unwrap();

        assert_eq!(
            drain(&mut sched, 1000),
            vec![
                TimerKind::PpmSend { ar: 0, cr: 0 },
                TimerKind::PpmSend { ar: 1, cr: 0 },
                TimerKind::PpmSend { ar: 2, cr: 0 }
            ]
        );
    }

    #[test]
    fn test_cancel_and_stale_handle() {
        let mut sched = Scheduler::new();

        let handle = sched.schedule(1000, TimerKind::DcpResponse, "dcp").unwrap();
        sched.cancel(handle);
        assert_eq!(drain(&mut sched, 2000), vec![]);

        // The slot may be reused; the stale handle must not touch it.
        let fresh = sched.schedule(1000, TimerKind::DcpHello, "hello").unwrap();
        sched.cancel(handle);
        assert_eq!(sched.name(fresh), Some("hello"));
        assert_eq!(drain(&mut sched, 3000), vec![TimerKind::DcpHello]);
    }

    #[test]
    fn test_reschedule_moves_expiry() {
        let mut sched = Scheduler::new();

        let handle = sched
            .schedule(1000, TimerKind::CmsmTimeout { ar: 0 }, "cmsm")
            .unwrap();
        sched.reschedule(handle, 5000).unwrap();

        assert_eq!(drain(&mut sched, 1000), vec![]);
        assert!(sched.is_ordered());
        assert_eq!(drain(&mut sched, 5000), vec![TimerKind::CmsmTimeout { ar: 0 }]);

        assert_eq!(sched.reschedule(handle, 100), Err(StackError::NotFound));
    }

    #[test]
    fn test_relative_to_tick_time() {
        let mut sched = Scheduler::new();

        drain(&mut sched, 10_000);
        sched
            .schedule(1000, TimerKind::SessionResend { session: 0 }, "resend")
            .unwrap();

        assert_eq!(drain(&mut sched, 10_999), vec![]);
        assert_eq!(
            drain(&mut sched, 11_000),
            vec![TimerKind::SessionResend { session: 0 }]
        );
    }

    #[test]
    fn test_capacity_bound() {
        let mut sched = Scheduler::new();

        for _ in 0..MAX_TIMERS {
            sched.schedule(1000, TimerKind::DcpResponse, "fill").unwrap();
        }

        assert_eq!(
            sched
                .schedule(1000, TimerKind::DcpResponse, "overflow")
                .unwrap_err(),
            StackError::OutOfResources
        );
    }

    #[test]
    fn test_sorted_after_random_inserts() {
        let mut sched = Scheduler::new();

        for _ in 0..MAX_TIMERS {
            let delay = u64::from(rand::random::<u16>() % 1000);
            sched.schedule(delay, TimerKind::DcpResponse, "rnd").unwrap();
        }

        assert!(sched.is_ordered());
    }
}
