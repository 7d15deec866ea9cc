//! 唤醒桥接：阻塞原语与调度器之间的订阅/唤醒机制。
//!
//! 通道、互斥锁、定时器以及跨句柄的 `.value()` 等待都通过这里挂起：
//! 资源持有 [`WaitQueue`] 中的等待项，等待方持有 [`AwaitRegistration`]，
//! 资源就绪时完成 [`WaitCell`] 并触发 [`Waker`]，由唤醒器把句柄重新排队。

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt::{Debug, Formatter},
    rc::Rc,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WakerState {
    Armed,
    Fired,
    Cancelled,
}

struct WakerInner {
    state: Cell<WakerState>,
    callback: RefCell<Option<Box<dyn FnOnce()>>>,
}

/// One-shot wake callback.
///
/// A waker moves from armed to either fired or cancelled exactly once;
/// whichever happens first wins and the other becomes a no-op.
#[derive(Clone)]
pub struct Waker {
    inner: Rc<WakerInner>,
}

impl Waker {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Waker {
            inner: Rc::new(WakerInner {
                state: Cell::new(WakerState::Armed),
                callback: RefCell::new(Some(Box::new(callback))),
            }),
        }
    }

    /// 不做任何事情的唤醒器，用于无需重新调度的等待
    pub fn noop() -> Self {
        Waker::new(|| {})
    }

    /// Fires the callback. Returns `false` if it already fired or was cancelled.
    pub fn wake(&self) -> bool {
        if self.inner.state.get() != WakerState::Armed {
            return false;
        }
        self.inner.state.set(WakerState::Fired);
        // 先取出回调再调用，回调内部可能再次访问本唤醒器
        let callback = self.inner.callback.borrow_mut().take();
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    /// Disarms the waker. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        if self.inner.state.get() != WakerState::Armed {
            return false;
        }
        self.inner.state.set(WakerState::Cancelled);
        self.inner.callback.borrow_mut().take();
        true
    }

    pub fn is_armed(&self) -> bool {
        self.inner.state.get() == WakerState::Armed
    }

    pub fn has_fired(&self) -> bool {
        self.inner.state.get() == WakerState::Fired
    }
}

impl Debug for Waker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Waker({:?})", self.inner.state.get())
    }
}

/// A cancellable subscription.
///
/// Cancelling disarms the waker and detaches the waiter from the resource
/// it was queued on. Cancelling twice, or after the waker fired, does
/// nothing.
#[derive(Clone)]
pub struct AwaitRegistration {
    waker: Waker,
    detach: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

impl AwaitRegistration {
    pub fn new<F>(waker: Waker, detach: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        AwaitRegistration {
            waker,
            detach: Rc::new(RefCell::new(Some(Box::new(detach)))),
        }
    }

    /// 资源已就绪时返回的登记：唤醒器已同步触发，取消无效果
    pub fn fired(waker: Waker) -> Self {
        waker.wake();
        AwaitRegistration {
            waker,
            detach: Rc::new(RefCell::new(None)),
        }
    }

    pub fn cancel(&self) -> bool {
        if !self.waker.cancel() {
            return false;
        }
        let detach = self.detach.borrow_mut().take();
        if let Some(detach) = detach {
            detach();
        }
        true
    }

    /// 仍在等待（既未触发也未取消）
    pub fn is_active(&self) -> bool {
        self.waker.is_armed()
    }

    pub fn has_fired(&self) -> bool {
        self.waker.has_fired()
    }
}

impl Debug for AwaitRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "AwaitRegistration({:?})", self.waker)
    }
}

/// Where a completed wait leaves its outcome for the woken waiter to read.
pub struct WaitCell<T> {
    waker: Waker,
    outcome: RefCell<Option<T>>,
}

impl<T> WaitCell<T> {
    pub fn new(waker: Waker) -> Self {
        WaitCell {
            waker,
            outcome: RefCell::new(None),
        }
    }

    /// Stores `outcome` and wakes the waiter. A cancelled waiter is left
    /// untouched and `false` is returned.
    pub fn complete(&self, outcome: T) -> bool {
        if !self.waker.is_armed() {
            return false;
        }
        *self.outcome.borrow_mut() = Some(outcome);
        self.waker.wake()
    }

    pub fn take_outcome(&self) -> Option<T> {
        self.outcome.borrow_mut().take()
    }

    pub fn is_waiting(&self) -> bool {
        self.waker.is_armed()
    }
}

impl<T> Debug for WaitCell<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "WaitCell({:?}, completed: {})",
            self.waker,
            self.outcome.borrow().is_some()
        )
    }
}

struct WaitEntry<P, T> {
    id: u64,
    payload: P,
    cell: Rc<WaitCell<T>>,
}

struct WaitQueueInner<P, T> {
    entries: VecDeque<WaitEntry<P, T>>,
    next_id: u64,
}

/// FIFO queue of waiters, each carrying a payload `P` and expecting an
/// outcome `T`.
pub struct WaitQueue<P, T> {
    inner: Rc<RefCell<WaitQueueInner<P, T>>>,
}

impl<P: 'static, T: 'static> Default for WaitQueue<P, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: 'static, T: 'static> WaitQueue<P, T> {
    pub fn new() -> Self {
        WaitQueue {
            inner: Rc::new(RefCell::new(WaitQueueInner {
                entries: VecDeque::new(),
                next_id: 0,
            })),
        }
    }

    /// Appends a waiter. The returned registration removes it again when
    /// cancelled before being served.
    pub fn push(&self, payload: P, waker: Waker) -> (Rc<WaitCell<T>>, AwaitRegistration) {
        let cell = Rc::new(WaitCell::new(waker.clone()));
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.entries.push_back(WaitEntry {
                id,
                payload,
                cell: cell.clone(),
            });
            id
        };
        let queue = Rc::downgrade(&self.inner);
        let registration = AwaitRegistration::new(waker, move || {
            if let Some(queue) = queue.upgrade() {
                queue.borrow_mut().entries.retain(|entry| entry.id != id);
            }
        });
        (cell, registration)
    }

    /// Pops the oldest waiter that is still armed.
    pub fn pop(&self) -> Option<(P, Rc<WaitCell<T>>)> {
        let mut inner = self.inner.borrow_mut();
        while let Some(entry) = inner.entries.pop_front() {
            if entry.cell.is_waiting() {
                return Some((entry.payload, entry.cell));
            }
        }
        None
    }

    /// Removes every armed waiter, oldest first.
    pub fn drain(&self) -> Vec<(P, Rc<WaitCell<T>>)> {
        let entries: Vec<_> = self.inner.borrow_mut().entries.drain(..).collect();
        entries
            .into_iter()
            .filter(|entry| entry.cell.is_waiting())
            .map(|entry| (entry.payload, entry.cell))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .borrow()
            .entries
            .iter()
            .filter(|entry| entry.cell.is_waiting())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Payload-free waiters on one resource, all released together.
#[derive(Clone)]
pub struct WaitSet {
    queue: Rc<WaitQueue<(), ()>>,
}

impl Default for WaitSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitSet {
    pub fn new() -> Self {
        WaitSet {
            queue: Rc::new(WaitQueue::new()),
        }
    }

    pub fn register(&self, waker: Waker) -> AwaitRegistration {
        self.queue.push((), waker).1
    }

    /// 触发并清空所有等待者，每个唤醒器恰好触发一次
    pub fn trigger_all(&self) -> usize {
        self.queue
            .drain()
            .into_iter()
            .filter(|(_, cell)| cell.complete(()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// A resource that can become ready, such as a settling handle.
pub trait Awaitable {
    fn is_ready(&self) -> bool;

    fn wait_set(&self) -> WaitSet;

    /// Subscribes `waker`. When the resource is already ready the waker
    /// fires synchronously and nothing is stored.
    fn register_awaiter(&self, waker: Waker) -> AwaitRegistration {
        if self.is_ready() {
            return AwaitRegistration::fired(waker);
        }
        self.wait_set().register(waker)
    }

    fn trigger_awaiters(&self) -> usize {
        self.wait_set().trigger_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_waker(counter: &Rc<Cell<u32>>) -> Waker {
        let counter = counter.clone();
        Waker::new(move || counter.set(counter.get() + 1))
    }

    #[test]
    fn test_wake_fires_once() {
        let count = Rc::new(Cell::new(0));
        let waker = counting_waker(&count);
        assert!(waker.wake());
        assert!(!waker.wake());
        assert_eq!(count.get(), 1);
        assert!(!waker.cancel());
    }

    #[test]
    fn test_cancel_then_wake_is_noop() {
        let count = Rc::new(Cell::new(0));
        let waker = counting_waker(&count);
        assert!(waker.cancel());
        assert!(!waker.wake());
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_registration_cancel_detaches_waiter() {
        let queue: WaitQueue<u32, ()> = WaitQueue::new();
        let (_a, reg_a) = queue.push(1, Waker::noop());
        let (_b, _reg_b) = queue.push(2, Waker::noop());
        assert_eq!(queue.len(), 2);
        assert!(reg_a.cancel());
        assert!(!reg_a.cancel());
        assert_eq!(queue.len(), 1);
        let (payload, _) = queue.pop().unwrap();
        assert_eq!(payload, 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let count = Rc::new(Cell::new(0));
        let queue: WaitQueue<(), &'static str> = WaitQueue::new();
        let (cell, registration) = queue.push((), counting_waker(&count));
        let (_, served) = queue.pop().unwrap();
        assert!(served.complete("done"));
        assert!(!registration.cancel());
        assert!(registration.has_fired());
        assert_eq!(cell.take_outcome(), Some("done"));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_pop_preserves_fifo_order() {
        let queue: WaitQueue<u32, ()> = WaitQueue::new();
        for i in 0..4 {
            queue.push(i, Waker::noop());
        }
        let order: Vec<u32> = std::iter::from_fn(|| queue.pop().map(|(p, _)| p)).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    struct Flag {
        ready: Cell<bool>,
        waiters: WaitSet,
    }

    impl Awaitable for Flag {
        fn is_ready(&self) -> bool {
            self.ready.get()
        }

        fn wait_set(&self) -> WaitSet {
            self.waiters.clone()
        }
    }

    #[test]
    fn test_register_on_ready_resource_fires_synchronously() {
        let count = Rc::new(Cell::new(0));
        let flag = Flag {
            ready: Cell::new(true),
            waiters: WaitSet::new(),
        };
        let registration = flag.register_awaiter(counting_waker(&count));
        assert_eq!(count.get(), 1);
        assert!(!registration.is_active());
        assert!(flag.waiters.is_empty());
    }

    #[test]
    fn test_trigger_awaiters_fires_each_once() {
        let count = Rc::new(Cell::new(0));
        let flag = Flag {
            ready: Cell::new(false),
            waiters: WaitSet::new(),
        };
        let first = flag.register_awaiter(counting_waker(&count));
        let _second = flag.register_awaiter(counting_waker(&count));
        let cancelled = flag.register_awaiter(counting_waker(&count));
        cancelled.cancel();
        flag.ready.set(true);
        assert_eq!(flag.trigger_awaiters(), 2);
        assert_eq!(flag.trigger_awaiters(), 0);
        assert_eq!(count.get(), 2);
        assert!(!first.cancel());
    }
}
