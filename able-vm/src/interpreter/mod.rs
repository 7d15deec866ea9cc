//! 树遍历解释器。
//!
//! - `ast`：语法树竞技场与构造器。
//! - `environment`：词法作用域。
//! - `eval`：各语法结构的求值，以及可挂起结构的检查点协议。
//! - `pattern`：`match`/`rescue` 使用的模式绑定。
//! - `natives`：程序可见的内建函数（通道、互斥锁、任务控制等）。

pub mod ast;
pub mod environment;
mod eval;
pub mod natives;
mod pattern;

use std::{
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, trace, warn};
use serde_json::json;

use crate::{
    config::RuntimeConfig,
    continuation::{Checkpoint, FrameKey},
    runtime::signal::{EvalResult, RuntimeError, Signal, Suspension},
    scheduler::{
        executor::{Executor, SchedulerHost, Spawner},
        timer::TimerQueue,
        waker::{AwaitRegistration, Waker},
    },
    types::{
        async_handle::{AsyncHandle, CancelOutcome, Computation, HandleKind},
        error::{ErrorKind, ErrorValue},
        resources::ResourceArena,
        value::Value,
    },
};

use self::{
    ast::{Ast, Expr, NodeId},
    environment::Environment,
};

type RuntimeExecutor = Executor<Interpreter, RuntimeError>;

/// 为句柄入队一次恢复；票据失效（同步 join 抢先恢复、句柄已结束）后该条目作废
fn enqueue_resumption(spawner: &Spawner<Interpreter, RuntimeError>, handle: &AsyncHandle) {
    let Some(ticket) = handle.mark_queued() else {
        return;
    };
    let watched = handle.clone();
    let handle = handle.clone();
    spawner.schedule_while(
        move || watched.holds_ticket(ticket),
        move |interp: &mut Interpreter| interp.run_queued(&handle, ticket),
    );
}

/// 一次求值的执行帧：同步代码没有句柄
struct ExecFrame {
    handle: Option<AsyncHandle>,
    /// 用户函数调用深度，参与检查点键
    depth: u32,
    /// 本次恢复已消耗的求值步数
    steps: usize,
}

impl ExecFrame {
    fn sync() -> Self {
        ExecFrame {
            handle: None,
            depth: 0,
            steps: 0,
        }
    }

    fn for_handle(handle: AsyncHandle) -> Self {
        ExecFrame {
            handle: Some(handle),
            depth: 0,
            steps: 0,
        }
    }
}

/// Builds a user-level error and raises it.
pub(crate) fn raise_error(message: impl Into<Rc<str>>) -> Signal {
    Signal::Raise(Value::error(ErrorValue::new(ErrorKind::Error, message)))
}

/// One interpreter instance: run queue, timers, channel/mutex arena,
/// global scope and the stack of execution frames.
pub struct Interpreter {
    config: RuntimeConfig,
    executor: RuntimeExecutor,
    timers: TimerQueue,
    resources: ResourceArena,
    globals: Environment,
    program_env: Environment,
    frames: Vec<ExecFrame>,
    next_handle_id: u64,
    output: Vec<String>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl SchedulerHost for Interpreter {
    type Error = RuntimeError;

    fn executor(&self) -> &RuntimeExecutor {
        &self.executor
    }

    fn before_task(&mut self) -> Result<(), RuntimeError> {
        self.check_interrupt()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Interpreter {
    pub fn new(config: RuntimeConfig) -> Self {
        let globals = Environment::new();
        natives::install(&globals);
        let program_env = globals.child();
        Interpreter {
            config,
            executor: Executor::new(),
            timers: TimerQueue::new(),
            resources: ResourceArena::new(),
            globals,
            program_env,
            frames: vec![],
            next_handle_id: 0,
            output: vec![],
            interrupt: None,
        }
    }

    /// 设置 Ctrl-C 中断标志，每个调度任务执行前检查
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn globals(&self) -> &Environment {
        &self.globals
    }

    /// Looks up a variable in the program scope that `run` evaluates into.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.program_env.lookup(name)
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub fn resources(&self) -> &ResourceArena {
        &self.resources
    }

    pub(crate) fn resources_mut(&mut self) -> &mut ResourceArena {
        &mut self.resources
    }

    pub(crate) fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    pub fn pending_tasks(&self) -> usize {
        self.executor.pending_tasks()
    }

    pub(crate) fn emit(&mut self, line: String) {
        if self.config.echo_output {
            println!("{}", line);
        }
        self.output.push(line);
    }

    fn check_interrupt(&self) -> Result<(), RuntimeError> {
        match &self.interrupt {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(RuntimeError::Interrupted),
            _ => Ok(()),
        }
    }

    /// Runs a program in synchronous context.
    ///
    /// A root block evaluates its statements directly in the program scope,
    /// so top-level bindings stay visible through [`Interpreter::lookup`].
    /// With `drain_on_exit` set, the run queue is flushed afterwards.
    pub fn run(&mut self, ast: &Rc<Ast>, root: NodeId) -> Result<Value, RuntimeError> {
        let env = self.program_env.clone();
        self.frames.push(ExecFrame::sync());
        let result = match ast.expr(root) {
            Expr::Block(statements) => {
                let mut last = Ok(Value::Nil);
                for statement in statements {
                    last = self.eval(ast, *statement, &env);
                    if last.is_err() {
                        break;
                    }
                }
                last
            }
            _ => self.eval(ast, root, &env),
        };
        self.frames.pop();
        let value = match result {
            Ok(value) | Err(Signal::Return(value)) => value,
            Err(signal) => return Err(Self::uncaught(signal)),
        };
        if self.config.drain_on_exit {
            self.flush(self.config.flush_limit)?;
        }
        Ok(value)
    }

    fn uncaught(signal: Signal) -> RuntimeError {
        match signal {
            Signal::Raise(value) => RuntimeError::Uncaught(value.to_string()),
            Signal::Exit(code) => RuntimeError::Exit(code),
            Signal::Fatal(error) => error,
            Signal::Suspend(_) | Signal::Cancelled => {
                RuntimeError::InvalidOperation("suspension outside async context".to_string())
            }
            Signal::Break(_) | Signal::Continue => {
                RuntimeError::InvalidOperation("break or continue outside loop".to_string())
            }
            Signal::Return(_) => RuntimeError::InvalidOperation("unexpected return".to_string()),
        }
    }

    /// Drives the run queue until it is empty or `limit` tasks have run,
    /// sleeping for armed timers whenever the queue drains.
    pub fn flush(&mut self, limit: Option<usize>) -> Result<usize, RuntimeError> {
        let mut executed = 0;
        loop {
            let remaining = limit.map(|limit| limit.saturating_sub(executed));
            if remaining == Some(0) {
                break;
            }
            executed += RuntimeExecutor::flush(self, remaining)?;
            if limit.is_some_and(|limit| executed >= limit) {
                break;
            }
            self.check_interrupt()?;
            if !self.timers.wait_and_fire() {
                break;
            }
        }
        Ok(executed)
    }

    /// Makes one unit of progress: a queued task, or else the next timer.
    /// Returns `false` when nothing can run.
    pub(crate) fn step_scheduler(&mut self) -> Result<bool, RuntimeError> {
        if RuntimeExecutor::run_one(self)? {
            return Ok(true);
        }
        self.check_interrupt()?;
        Ok(self.timers.wait_and_fire())
    }

    /// Repeats `attempt` from synchronous code, running other tasks between
    /// attempts, until it yields a value.
    pub(crate) fn block_on<T>(
        &mut self,
        what: &str,
        mut attempt: impl FnMut(&mut Self) -> EvalResult<Option<T>>,
    ) -> EvalResult<T> {
        loop {
            if let Some(value) = attempt(self)? {
                return Ok(value);
            }
            if !self.step_scheduler()? {
                warn!("{} blocked with no runnable tasks", what);
                return Err(Signal::Fatal(RuntimeError::Deadlock(format!(
                    "{} can never complete: no runnable tasks",
                    what
                ))));
            }
        }
    }

    // ---- 句柄生命周期 ----

    pub fn spawn_handle(&mut self, kind: HandleKind, computation: Computation) -> AsyncHandle {
        self.next_handle_id += 1;
        let handle = AsyncHandle::new(self.next_handle_id, kind, computation);
        debug!("spawned {}", handle);
        self.schedule_handle(&handle);
        handle
    }

    pub(crate) fn schedule_handle(&self, handle: &AsyncHandle) {
        enqueue_resumption(&self.executor.spawner(), handle);
    }

    /// A waker that reschedules `handle`.
    pub(crate) fn handle_waker(&self, handle: &AsyncHandle) -> Waker {
        let spawner = self.executor.spawner();
        let handle = handle.clone();
        Waker::new(move || enqueue_resumption(&spawner, &handle))
    }

    fn run_queued(&mut self, handle: &AsyncHandle, ticket: u64) -> Result<(), RuntimeError> {
        if !handle.take_queued(ticket) {
            return Ok(());
        }
        self.resume_handle(handle)
    }

    /// Resumes a handle once: re-walks its body from the root, with every
    /// construct picking up its saved progress, until it completes, fails
    /// or suspends again.
    pub(crate) fn resume_handle(&mut self, handle: &AsyncHandle) -> Result<(), RuntimeError> {
        if handle.is_settled() || handle.is_evaluating() {
            return Ok(());
        }
        if handle.cancel_requested() {
            handle.finalize_cancelled();
            return Ok(());
        }
        let Some(computation) = handle.begin_resume() else {
            return Ok(());
        };
        trace!("resuming {}", handle);
        self.frames.push(ExecFrame::for_handle(handle.clone()));
        let result = self.eval(&computation.ast, computation.body, &computation.env);
        self.frames.pop();
        handle.end_resume();

        match result {
            Ok(value) | Err(Signal::Return(value)) => {
                handle.resolve(value);
            }
            Err(Signal::Suspend(suspension)) => {
                #[cfg(feature = "debug")]
                debug!("{} suspended: {}", handle, handle.format_context());
                if handle.cancel_requested() {
                    handle.finalize_cancelled();
                } else if suspension == Suspension::Ready {
                    self.schedule_handle(handle);
                }
            }
            Err(Signal::Raise(raised)) => {
                handle.fail(raised);
            }
            Err(Signal::Cancelled) => {
                handle.finalize_cancelled();
            }
            Err(Signal::Break(_)) | Err(Signal::Continue) => {
                handle.fail(Value::from("break or continue outside loop"));
            }
            Err(Signal::Exit(code)) => return Err(RuntimeError::Exit(code)),
            Err(Signal::Fatal(error)) => {
                handle.fail(Value::error(ErrorValue::new(
                    ErrorKind::Error,
                    error.to_string(),
                )));
                return Err(error);
            }
        }
        Ok(())
    }

    /// Requests cancellation. A started handle is detached from every
    /// resource it is parked on right away, so no value or lock can be
    /// handed to it any more, and rescheduled to observe the request.
    pub fn cancel_handle(&mut self, handle: &AsyncHandle) -> CancelOutcome {
        let outcome = handle.request_cancel();
        if outcome == CancelOutcome::Requested {
            let released = handle.cancel_registrations();
            debug!("{} cancel requested, released {} wait(s)", handle, released);
            if !handle.is_evaluating() {
                self.schedule_handle(handle);
            }
        }
        outcome
    }

    /// Blocking join from synchronous code: resumes `handle` directly while
    /// it is runnable, and runs other tasks while it waits on them.
    pub fn await_handle_sync(&mut self, handle: &AsyncHandle) -> Result<Value, RuntimeError> {
        loop {
            if let Some(value) = handle.settled_value() {
                return Ok(value);
            }
            self.check_interrupt()?;
            if handle.is_evaluating() {
                return Err(RuntimeError::Deadlock(format!(
                    "{} is waiting on its own value",
                    handle
                )));
            }
            if !handle.has_started() || handle.is_queued() {
                handle.clear_queued();
                self.resume_handle(handle)?;
                continue;
            }
            if !self.step_scheduler()? {
                warn!("{} blocked with no runnable tasks", handle);
                return Err(RuntimeError::Deadlock(format!(
                    "{} can never settle: no runnable tasks",
                    handle
                )));
            }
        }
    }

    // ---- 当前执行帧 ----

    pub(crate) fn current_handle(&self) -> Option<&AsyncHandle> {
        self.frames.last()?.handle.as_ref()
    }

    pub fn in_async_context(&self) -> bool {
        self.current_handle().is_some()
    }

    pub(crate) fn current_waker(&self) -> Option<Waker> {
        self.current_handle().map(|handle| self.handle_waker(handle))
    }

    pub(crate) fn track_registration(&self, registration: AwaitRegistration) {
        if let Some(handle) = self.current_handle() {
            handle.track_registration(registration);
        }
    }

    /// The signal a suspension point raises. A pending cancellation request
    /// turns it into a cancellation.
    pub(crate) fn suspend(&self, suspension: Suspension) -> Signal {
        match self.current_handle() {
            Some(handle) if handle.cancel_requested() => Signal::Cancelled,
            _ => Signal::Suspend(suspension),
        }
    }

    fn frame_key(&self, node: NodeId) -> FrameKey {
        FrameKey {
            node,
            depth: self.frames.last().map_or(0, |frame| frame.depth),
        }
    }

    pub(crate) fn take_checkpoint<S: Checkpoint>(&self, node: NodeId) -> Option<S> {
        let key = self.frame_key(node);
        self.current_handle()?.take_checkpoint(key)
    }

    /// Saves `state` for `node` when `signal` is a suspension, then hands
    /// the signal back for propagation.
    pub(crate) fn park<S: Checkpoint>(&self, node: NodeId, signal: Signal, state: S) -> Signal {
        if signal.is_suspension() {
            let key = self.frame_key(node);
            if let Some(handle) = self.current_handle() {
                handle.save_checkpoint(key, state);
            }
        }
        signal
    }

    fn count_step(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.steps += 1;
        }
    }

    /// 时间片是否耗尽（仅异步上下文）
    fn preemption_due(&self) -> bool {
        let slice = self.config.time_slice;
        slice > 0
            && self
                .frames
                .last()
                .is_some_and(|frame| frame.handle.is_some() && frame.steps >= slice)
    }

    fn call_depth(&self) -> u32 {
        self.frames.last().map_or(0, |frame| frame.depth)
    }

    fn set_call_depth(&mut self, depth: u32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.depth = depth;
        }
    }

    pub fn format_context(&self) -> serde_json::Value {
        let frames: Vec<serde_json::Value> = self
            .frames
            .iter()
            .map(|frame| {
                json!({
                    "handle": frame.handle.as_ref().map(AsyncHandle::format_context),
                    "depth": frame.depth,
                    "steps": frame.steps,
                })
            })
            .collect();
        json!({
            "type": "Interpreter",
            "pending_tasks": self.pending_tasks(),
            "timers": self.timers.len(),
            "resources": self.resources.format_context(),
            "frames": frames,
        })
    }
}
