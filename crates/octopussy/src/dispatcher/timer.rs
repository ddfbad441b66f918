// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timer heap for work process timeouts.
//!
//! Entries live in a map keyed by [`TimerId`]; the heap only orders
//! deadlines. Removing a timer drops the map entry and leaves a stale heap
//! node that is skipped when it surfaces.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use super::WpKey;
use crate::hiid::Hiid;
use crate::wp::{TimerId, TimerMode};

/// Minimum period for continuous timers.
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub(crate) struct TimerEntry {
    pub owner: WpKey,
    pub id: Hiid,
    pub period: Duration,
    pub mode: TimerMode,
    deadline: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
    entries: HashMap<TimerId, TimerEntry>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, owner: WpKey, id: Hiid, period: Duration, mode: TimerMode, now: Instant) -> TimerId {
        let tid = TimerId(self.next_id);
        self.next_id += 1;
        let period = match mode {
            TimerMode::Continuous => period.max(MIN_PERIOD),
            TimerMode::OneShot => period,
        };
        let deadline = now + period;
        self.entries.insert(
            tid,
            TimerEntry {
                owner,
                id,
                period,
                mode,
                deadline,
            },
        );
        self.heap.push(Reverse((deadline, tid)));
        tid
    }

    pub fn cancel(&mut self, tid: TimerId) -> bool {
        self.entries.remove(&tid).is_some()
    }

    /// Remove every timer of `owner` named `id`.
    pub fn remove(&mut self, owner: WpKey, id: &Hiid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, e| !(e.owner == owner && &e.id == id));
        self.entries.len() != before
    }

    pub fn remove_owner(&mut self, owner: WpKey) {
        self.entries.retain(|_, e| e.owner != owner);
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(&Reverse((deadline, tid))) = self.heap.peek() {
            match self.entries.get(&tid) {
                Some(entry) if entry.deadline == deadline => return Some(deadline),
                _ => {
                    self.heap.pop();
                }
            }
        }
        None
    }

    /// Pop every timer due at `now`, in deadline order. One-shot timers are
    /// removed; continuous timers are rescheduled one period later (or one
    /// period after `now` if they fell behind).
    pub fn pop_due(&mut self, now: Instant) -> Vec<(TimerId, TimerEntry)> {
        let mut due = Vec::new();
        while let Some(&Reverse((deadline, tid))) = self.heap.peek() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            let Some(entry) = self.entries.get_mut(&tid) else {
                continue;
            };
            if entry.deadline != deadline {
                continue;
            }
            let fired = entry.clone();
            match entry.mode {
                TimerMode::OneShot => {
                    self.entries.remove(&tid);
                }
                TimerMode::Continuous => {
                    let mut next = deadline + entry.period;
                    if next <= now {
                        next = now + entry.period;
                    }
                    entry.deadline = next;
                    self.heap.push(Reverse((next, tid)));
                }
            }
            due.push((tid, fired));
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aid::{AID_HEARTBEAT, AID_INIT};

    #[test]
    fn test_one_shot_fires_once() {
        let mut q = TimerQueue::new();
        let t0 = Instant::now();
        q.add(WpKey(1), AID_INIT.into(), Duration::from_millis(10), TimerMode::OneShot, t0);
        assert!(q.pop_due(t0).is_empty());
        let due = q.pop_due(t0 + Duration::from_millis(10));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1.id, Hiid::from(AID_INIT));
        assert!(q.next_deadline().is_none());
    }

    #[test]
    fn test_continuous_reschedules() {
        let mut q = TimerQueue::new();
        let t0 = Instant::now();
        let p = Duration::from_millis(5);
        q.add(WpKey(1), AID_HEARTBEAT.into(), p, TimerMode::Continuous, t0);
        assert_eq!(q.pop_due(t0 + p).len(), 1);
        assert_eq!(q.next_deadline(), Some(t0 + p + p));
        // falling far behind fires once and reschedules from now
        let late = t0 + Duration::from_millis(100);
        assert_eq!(q.pop_due(late).len(), 1);
        assert_eq!(q.next_deadline(), Some(late + p));
    }

    #[test]
    fn test_remove_and_owner_cleanup() {
        let mut q = TimerQueue::new();
        let t0 = Instant::now();
        q.add(WpKey(1), AID_INIT.into(), Duration::ZERO, TimerMode::OneShot, t0);
        q.add(WpKey(1), AID_HEARTBEAT.into(), Duration::ZERO, TimerMode::OneShot, t0);
        q.add(WpKey(2), AID_INIT.into(), Duration::ZERO, TimerMode::OneShot, t0);
        assert!(q.remove(WpKey(1), &AID_INIT.into()));
        q.remove_owner(WpKey(2));
        let due = q.pop_due(t0);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1.id, Hiid::from(AID_HEARTBEAT));
    }

    #[test]
    fn test_cancel_by_id() {
        let mut q = TimerQueue::new();
        let t0 = Instant::now();
        let tid = q.add(WpKey(3), AID_INIT.into(), Duration::from_millis(1), TimerMode::Continuous, t0);
        assert!(q.cancel(tid));
        assert!(!q.cancel(tid));
        assert!(q.pop_due(t0 + Duration::from_secs(1)).is_empty());
    }
}
