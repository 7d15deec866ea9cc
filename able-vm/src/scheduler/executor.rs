use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use log::trace;

/// 一次性恢复回调
pub type Task<H, E> = Box<dyn FnOnce(&mut H) -> Result<(), E>>;

/// 条目是否仍然有效；失效条目既不计数也不执行
pub type Liveness = Box<dyn Fn() -> bool>;

struct Entry<H, E> {
    task: Task<H, E>,
    live: Option<Liveness>,
}

impl<H, E> Entry<H, E> {
    fn is_live(&self) -> bool {
        self.live.as_ref().map_or(true, |live| live())
    }
}

type Queue<H, E> = Rc<RefCell<VecDeque<Entry<H, E>>>>;

/// The value an [`Executor`] hands to every task it runs.
///
/// The executor lives inside its host, so running a task means popping it
/// first and only then lending the host out mutably.
pub trait SchedulerHost: Sized {
    type Error;

    fn executor(&self) -> &Executor<Self, Self::Error>;

    /// 每个任务执行前调用，可用于检查中断
    fn before_task(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// FIFO run queue of resumption callbacks.
pub struct Executor<H, E> {
    queue: Queue<H, E>,
}

/// Enqueue-only view of an executor, cheap to clone into wakers.
pub struct Spawner<H, E> {
    queue: Queue<H, E>,
}

impl<H, E> Clone for Spawner<H, E> {
    fn clone(&self) -> Self {
        Spawner {
            queue: self.queue.clone(),
        }
    }
}

impl<H, E> Spawner<H, E> {
    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce(&mut H) -> Result<(), E> + 'static,
    {
        self.queue.borrow_mut().push_back(Entry {
            task: Box::new(task),
            live: None,
        });
    }

    pub fn schedule_while<F, L>(&self, live: L, task: F)
    where
        F: FnOnce(&mut H) -> Result<(), E> + 'static,
        L: Fn() -> bool + 'static,
    {
        self.queue.borrow_mut().push_back(Entry {
            task: Box::new(task),
            live: Some(Box::new(live)),
        });
    }
}

impl<H, E> Default for Executor<H, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H, E> Executor<H, E> {
    pub fn new() -> Self {
        Executor {
            queue: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    /// 入队一个回调，每次入队至多执行一次
    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce(&mut H) -> Result<(), E> + 'static,
    {
        self.spawner().schedule(task);
        trace!("task scheduled, queue depth {}", self.pending_tasks());
    }

    /// Enqueues a task that is dropped unrun, and not counted as pending,
    /// once `live` returns `false`.
    pub fn schedule_while<F, L>(&self, live: L, task: F)
    where
        F: FnOnce(&mut H) -> Result<(), E> + 'static,
        L: Fn() -> bool + 'static,
    {
        self.spawner().schedule_while(live, task);
        trace!("task scheduled, queue depth {}", self.pending_tasks());
    }

    pub fn spawner(&self) -> Spawner<H, E> {
        Spawner {
            queue: self.queue.clone(),
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.queue.borrow().iter().filter(|entry| entry.is_live()).count()
    }

    pub fn is_idle(&self) -> bool {
        self.pending_tasks() == 0
    }

    /// 弹出最早的有效任务，沿途丢弃失效条目
    fn pop(&self) -> Option<Task<H, E>> {
        let mut queue = self.queue.borrow_mut();
        while let Some(entry) = queue.pop_front() {
            if entry.is_live() {
                return Some(entry.task);
            }
            trace!("dropping stale task");
        }
        None
    }
}

impl<H, E> Executor<H, E>
where
    H: SchedulerHost<Error = E>,
{
    /// Runs the oldest queued task. Returns `false` when the queue was empty.
    pub fn run_one(host: &mut H) -> Result<bool, E> {
        let Some(task) = host.executor().pop() else {
            return Ok(false);
        };
        host.before_task()?;
        task(host)?;
        Ok(true)
    }

    /// Runs tasks until the queue is empty or `limit` tasks have run.
    ///
    /// Tasks scheduled while flushing, including a task re-scheduling its
    /// own handle, join the back of the same queue and are picked up by
    /// this call. The first error a task returns stops the flush.
    pub fn flush(host: &mut H, limit: Option<usize>) -> Result<usize, E> {
        let mut executed = 0;
        while limit.map_or(true, |limit| executed < limit) {
            if !Self::run_one(host)? {
                break;
            }
            executed += 1;
        }
        trace!("flush ran {} task(s)", executed);
        Ok(executed)
    }
}
