use std::{
    cell::RefCell,
    cmp::Reverse,
    collections::BinaryHeap,
    rc::Rc,
    time::{Duration, Instant},
};

use log::trace;
use rustc_hash::FxHashMap;

use super::waker::{AwaitRegistration, WaitCell, Waker};

struct TimerEntry {
    cell: Rc<WaitCell<()>>,
}

#[derive(Default)]
struct TimerInner {
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    entries: FxHashMap<u64, TimerEntry>,
    next_id: u64,
}

/// Deadline-ordered wakers backing `sleep_ms`.
#[derive(Clone, Default)]
pub struct TimerQueue {
    inner: Rc<RefCell<TimerInner>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a timer. Cancelling the registration disarms it.
    pub fn arm(&self, deadline: Instant, waker: Waker) -> (Rc<WaitCell<()>>, AwaitRegistration) {
        let cell = Rc::new(WaitCell::new(waker.clone()));
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.deadlines.push(Reverse((deadline, id)));
            inner.entries.insert(id, TimerEntry { cell: cell.clone() });
            id
        };
        let timers = Rc::downgrade(&self.inner);
        let registration = AwaitRegistration::new(waker, move || {
            if let Some(timers) = timers.upgrade() {
                timers.borrow_mut().entries.remove(&id);
            }
        });
        (cell, registration)
    }

    /// 仍在等待的定时器数量
    pub fn len(&self) -> usize {
        self.inner
            .borrow()
            .entries
            .values()
            .filter(|entry| entry.cell.is_waiting())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let mut inner = self.inner.borrow_mut();
        loop {
            let Reverse((deadline, id)) = *inner.deadlines.peek()?;
            let live = inner
                .entries
                .get(&id)
                .is_some_and(|entry| entry.cell.is_waiting());
            if live {
                return Some(deadline);
            }
            inner.deadlines.pop();
            inner.entries.remove(&id);
        }
    }

    /// Fires every timer whose deadline is at or before `now`.
    pub fn fire_due(&self, now: Instant) -> usize {
        let mut due = vec![];
        {
            let mut inner = self.inner.borrow_mut();
            while let Some(Reverse((deadline, id))) = inner.deadlines.peek().copied() {
                if deadline > now {
                    break;
                }
                inner.deadlines.pop();
                if let Some(entry) = inner.entries.remove(&id) {
                    due.push(entry.cell);
                }
            }
        }
        // 在释放借用之后触发，唤醒回调会访问执行器队列
        let fired = due.into_iter().filter(|cell| cell.complete(())).count();
        if fired > 0 {
            trace!("{} timer(s) fired", fired);
        }
        fired
    }

    /// Sleeps the thread until the earliest live deadline and fires it.
    /// Returns `false` when no timer is armed.
    pub fn wait_and_fire(&self) -> bool {
        let Some(deadline) = self.next_deadline() else {
            return false;
        };
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.fire_due(Instant::now());
        true
    }
}

pub fn deadline_after(millis: u64) -> Instant {
    Instant::now() + Duration::from_millis(millis)
}
