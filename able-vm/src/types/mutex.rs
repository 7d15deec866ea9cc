use std::{cell::Cell, rc::Rc};

use serde_json::json;

use crate::scheduler::waker::{AwaitRegistration, WaitCell, WaitQueue, Waker};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// 没有等待者，锁变为空闲
    Released,
    /// 所有权直接移交给最早的等待者
    HandedOff,
    /// 锁本来就是空闲的
    NotLocked,
}

/// FIFO mutex shared between handles.
///
/// `owner` is the id of the holding handle, or `None` when the holder is
/// synchronous code or the mutex is free.
pub struct MutexState {
    locked: Cell<bool>,
    owner: Cell<Option<u64>>,
    waiters: WaitQueue<Option<u64>, ()>,
}

impl Default for MutexState {
    fn default() -> Self {
        Self::new()
    }
}

impl MutexState {
    pub fn new() -> Self {
        MutexState {
            locked: Cell::new(false),
            owner: Cell::new(None),
            waiters: WaitQueue::new(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    pub fn owner(&self) -> Option<u64> {
        self.owner.get()
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    pub fn try_lock(&self, owner: Option<u64>) -> bool {
        if self.locked.get() {
            return false;
        }
        self.locked.set(true);
        self.owner.set(owner);
        true
    }

    pub fn park(&self, owner: Option<u64>, waker: Waker) -> (Rc<WaitCell<()>>, AwaitRegistration) {
        self.waiters.push(owner, waker)
    }

    /// Releases the lock. With waiters present, ownership moves straight to
    /// the oldest one and the lock never becomes observably free.
    pub fn unlock(&self) -> UnlockOutcome {
        if !self.locked.get() {
            return UnlockOutcome::NotLocked;
        }
        match self.waiters.pop() {
            Some((next_owner, waiter)) => {
                self.owner.set(next_owner);
                waiter.complete(());
                UnlockOutcome::HandedOff
            }
            None => {
                self.locked.set(false);
                self.owner.set(None);
                UnlockOutcome::Released
            }
        }
    }

    pub fn format_context(&self) -> serde_json::Value {
        json!({
            "type": "Mutex",
            "locked": self.is_locked(),
            "owner": self.owner(),
            "waiters": self.waiting(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_unlock() {
        let mutex = MutexState::new();
        assert!(mutex.try_lock(Some(1)));
        assert!(!mutex.try_lock(Some(2)));
        assert_eq!(mutex.owner(), Some(1));
        assert_eq!(mutex.unlock(), UnlockOutcome::Released);
        assert!(!mutex.is_locked());
        assert_eq!(mutex.unlock(), UnlockOutcome::NotLocked);
    }

    #[test]
    fn test_handoff_in_arrival_order() {
        let mutex = MutexState::new();
        mutex.try_lock(None);
        let (first, _r1) = mutex.park(Some(2), Waker::noop());
        let (second, _r2) = mutex.park(Some(3), Waker::noop());
        assert_eq!(mutex.unlock(), UnlockOutcome::HandedOff);
        assert!(mutex.is_locked());
        assert_eq!(mutex.owner(), Some(2));
        assert_eq!(first.take_outcome(), Some(()));
        assert!(second.is_waiting());
        assert_eq!(mutex.unlock(), UnlockOutcome::HandedOff);
        assert_eq!(mutex.owner(), Some(3));
        assert_eq!(mutex.unlock(), UnlockOutcome::Released);
    }

    #[test]
    fn test_cancelled_waiter_is_not_granted() {
        let mutex = MutexState::new();
        mutex.try_lock(None);
        let (_cell, registration) = mutex.park(Some(2), Waker::noop());
        registration.cancel();
        assert_eq!(mutex.unlock(), UnlockOutcome::Released);
        assert_eq!(mutex.owner(), None);
    }
}
