//! Ready queues, wait queues, and the timer-sorted sleep queue, spec §3's
//! "Wait Queue" and §4.7's five ready bands.
//!
//! Every queue here is an owned collection indexed by thread id, never a
//! pointer walk: the design notes call out intrusive next/prev links as
//! the one habit this lineage's teacher indulges that this kernel does
//! not reproduce.

extern crate alloc;

use super::task::{Priority, BAND_COUNT};
use alloc::collections::{BTreeMap, VecDeque};

/// Five FIFO queues, one per priority band. A thread id appears in at most
/// one ready-queue slot at a time (the scheduler's own invariant, not
/// enforced by this type, which is a dumb container).
#[derive(Default)]
pub struct ReadyQueues {
    bands: [VecDeque<u64>; BAND_COUNT],
}

impl ReadyQueues {
    pub const fn new() -> Self {
        Self {
            bands: [
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ],
        }
    }

    pub fn push_back(&mut self, band: Priority, tid: u64) {
        self.bands[band.index()].push_back(tid);
    }

    pub fn pop_front(&mut self, band: Priority) -> Option<u64> {
        self.bands[band.index()].pop_front()
    }

    /// The highest-priority band with at least one ready thread, per the
    /// dispatch rule "run the highest-priority non-empty band."
    pub fn highest_nonempty(&self) -> Option<Priority> {
        super::task::BANDS
            .into_iter()
            .find(|b| !self.bands[b.index()].is_empty())
    }

    pub fn is_empty(&self, band: Priority) -> bool {
        self.bands[band.index()].is_empty()
    }

    /// Removes `tid` from whichever band it sits in, if any. Used by
    /// cancellation and by a thread transitioning out of Ready for a
    /// reason other than being dispatched (e.g. a priority change).
    pub fn remove(&mut self, tid: u64) -> bool {
        for band in self.bands.iter_mut() {
            if let Some(pos) = band.iter().position(|t| *t == tid) {
                band.remove(pos);
                return true;
            }
        }
        false
    }
}

/// FIFO of thread ids blocked on one named resource. Spec §3: "a thread
/// appears on at most one wait queue at a time" — enforced by callers
/// (the scheduler clears [`crate::process::thread::Thread::wait_queue`]
/// before placing a tid on a new one).
#[derive(Default)]
pub struct WaitQueues {
    queues: BTreeMap<u64, VecDeque<u64>>,
}

impl WaitQueues {
    pub const fn new() -> Self {
        Self {
            queues: BTreeMap::new(),
        }
    }

    pub fn block(&mut self, wait_queue: u64, tid: u64) {
        self.queues.entry(wait_queue).or_default().push_back(tid);
    }

    /// Wakes the longest-waiting thread on `wait_queue`, preserving FIFO
    /// order across the queue (spec §5's ordering guarantee).
    pub fn wake_one(&mut self, wait_queue: u64) -> Option<u64> {
        let q = self.queues.get_mut(&wait_queue)?;
        let tid = q.pop_front();
        if q.is_empty() {
            self.queues.remove(&wait_queue);
        }
        tid
    }

    /// Wakes every thread currently on `wait_queue`, in FIFO order.
    pub fn wake_all(&mut self, wait_queue: u64) -> alloc::vec::Vec<u64> {
        self.queues
            .remove(&wait_queue)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default()
    }

    /// Removes `tid` from whichever wait queue it sits on, without waking
    /// it onto a ready queue. Used by cancellation.
    pub fn remove(&mut self, tid: u64) -> Option<u64> {
        let mut found = None;
        self.queues.retain(|qid, q| {
            if let Some(pos) = q.iter().position(|t| *t == tid) {
                q.remove(pos);
                found = Some(*qid);
            }
            !q.is_empty()
        });
        found
    }
}

/// Timer-sorted queue of sleeping threads. Spec §4.7: "`sleep(ms)` records
/// a wake deadline and places the thread on a timer-sorted queue; `tick()`
/// checks the head." Kept as a sorted `Vec` rather than a heap since the
/// expected population is tiny (a handful of sleeping threads, not a
/// scheduler-scale workload) and a sorted `Vec` makes "pop everything due"
/// a simple prefix drain.
#[derive(Default)]
pub struct SleepQueue {
    entries: alloc::vec::Vec<(u64, u64)>, // (deadline_ms, tid)
}

impl SleepQueue {
    pub const fn new() -> Self {
        Self {
            entries: alloc::vec::Vec::new(),
        }
    }

    pub fn insert(&mut self, deadline_ms: u64, tid: u64) {
        let pos = self
            .entries
            .binary_search_by_key(&deadline_ms, |(d, _)| *d)
            .unwrap_or_else(|p| p);
        self.entries.insert(pos, (deadline_ms, tid));
    }

    /// Removes and returns every thread whose deadline is `<= now_ms`, in
    /// deadline order.
    pub fn drain_due(&mut self, now_ms: u64) -> alloc::vec::Vec<u64> {
        let split = self.entries.partition_point(|(d, _)| *d <= now_ms);
        self.entries.drain(..split).map(|(_, tid)| tid).collect()
    }

    pub fn remove(&mut self, tid: u64) -> bool {
        if let Some(pos) = self.entries.iter().position(|(_, t)| *t == tid) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn ready_queues_are_fifo_within_a_band() {
        let mut rq = ReadyQueues::new();
        rq.push_back(Priority::Normal, 1);
        rq.push_back(Priority::Normal, 2);
        assert_eq!(rq.pop_front(Priority::Normal), Some(1));
        assert_eq!(rq.pop_front(Priority::Normal), Some(2));
        assert_eq!(rq.pop_front(Priority::Normal), None);
    }

    #[test]
    fn highest_nonempty_picks_the_top_band() {
        let mut rq = ReadyQueues::new();
        rq.push_back(Priority::Low, 1);
        rq.push_back(Priority::Critical, 2);
        assert_eq!(rq.highest_nonempty(), Some(Priority::Critical));
    }

    #[test]
    fn wait_queue_wakes_fifo() {
        let mut wq = WaitQueues::new();
        wq.block(7, 10);
        wq.block(7, 11);
        assert_eq!(wq.wake_one(7), Some(10));
        assert_eq!(wq.wake_one(7), Some(11));
        assert_eq!(wq.wake_one(7), None);
    }

    #[test]
    fn wait_queue_wake_all_drains_in_order() {
        let mut wq = WaitQueues::new();
        wq.block(1, 100);
        wq.block(1, 101);
        assert_eq!(wq.wake_all(1), alloc::vec![100, 101]);
        assert!(wq.wake_all(1).is_empty());
    }

    #[test]
    fn sleep_queue_drains_due_entries_in_deadline_order() {
        let mut sq = SleepQueue::new();
        sq.insert(50, 1);
        sq.insert(10, 2);
        sq.insert(30, 3);
        assert_eq!(sq.drain_due(30), alloc::vec![2, 3]);
        assert_eq!(sq.drain_due(1000), alloc::vec![1]);
    }
}
