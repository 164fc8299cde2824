// Deadline queue for coordinator timers.
//
// The relay runs every handler on one thread, so timers are plain data: the
// main loop asks for `next_deadline()`, sleeps on its event channel until
// then, and pops due entries with `pop_due(now)`. A `TimerHandle` returned by
// `schedule` lets the owner cancel the entry before it fires. Lobbies store
// the handle of their pending countdown tick and cancel it on destruction.
//
// Entries with equal deadlines fire in scheduling order.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Handle to a scheduled timer, used for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

pub struct TimerQueue<E> {
    next_id: u64,
    pending: BTreeMap<(Instant, u64), E>,
    deadlines: HashMap<u64, Instant>,
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            pending: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, event: E) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert((at, id), event);
        self.deadlines.insert(id, at);
        TimerHandle(id)
    }

    /// Cancel a pending timer. Returns false if it already fired or was
    /// cancelled before.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.deadlines.remove(&handle.0) {
            Some(at) => self.pending.remove(&(at, handle.0)).is_some(),
            None => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return the earliest entry whose deadline is `<= now`,
    /// together with that deadline.
    pub fn pop_due(&mut self, now: Instant) -> Option<(Instant, E)> {
        let key = *self.pending.keys().next()?;
        if key.0 > now {
            return None;
        }
        self.deadlines.remove(&key.1);
        self.pending.remove(&key).map(|event| (key.0, event))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn pops_in_deadline_order() {
        let t0 = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(t0 + Duration::from_millis(20), "late");
        queue.schedule(t0 + Duration::from_millis(10), "early");

        assert_eq!(queue.next_deadline(), Some(t0 + Duration::from_millis(10)));
        assert!(queue.pop_due(t0).is_none());

        let now = t0 + Duration::from_millis(25);
        assert_eq!(queue.pop_due(now).map(|(_, e)| e), Some("early"));
        assert_eq!(queue.pop_due(now).map(|(_, e)| e), Some("late"));
        assert!(queue.is_empty());
    }

    #[test]
    fn equal_deadlines_fire_in_schedule_order() {
        let t0 = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(t0, 1);
        queue.schedule(t0, 2);
        queue.schedule(t0, 3);
        let fired: Vec<i32> = std::iter::from_fn(|| queue.pop_due(t0).map(|(_, e)| e)).collect();
        assert_eq!(fired, vec![1, 2, 3]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let t0 = Instant::now();
        let mut queue = TimerQueue::new();
        let handle = queue.schedule(t0, "countdown");
        assert!(queue.cancel(handle));
        assert!(!queue.cancel(handle));
        assert!(queue.pop_due(t0 + Duration::from_secs(5)).is_none());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let t0 = Instant::now();
        let mut queue = TimerQueue::new();
        let handle = queue.schedule(t0, ());
        assert!(queue.pop_due(t0).is_some());
        assert!(!queue.cancel(handle));
    }
}
