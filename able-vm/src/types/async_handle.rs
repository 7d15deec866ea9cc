use std::{
    cell::RefCell,
    fmt::{Debug, Display, Formatter},
    rc::Rc,
};

use log::debug;
use serde_json::json;

use crate::{
    continuation::{Checkpoint, ContinuationContext, FrameKey},
    interpreter::{
        ast::{Ast, NodeId},
        environment::Environment,
    },
    scheduler::waker::{AwaitRegistration, Awaitable, WaitSet},
};

use super::{
    error::{ErrorKind, ErrorValue},
    status::Status,
    value::Value,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleKind {
    /// `proc { … }`：失败时保留原始错误消息
    Proc,
    /// `spawn { … }`：失败时包装成摘要消息
    Future,
}

impl HandleKind {
    pub fn name(&self) -> &'static str {
        match self {
            HandleKind::Proc => "Proc",
            HandleKind::Future => "Future",
        }
    }
}

/// The captured body of a handle: a node and the scope it closes over.
#[derive(Clone)]
pub struct Computation {
    pub ast: Rc<Ast>,
    pub body: NodeId,
    pub env: Environment,
}

enum HandleState {
    Pending,
    Resolved(Value),
    Failed(Rc<ErrorValue>),
    Cancelled(Rc<ErrorValue>),
}

/// 取消请求的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    AlreadySettled,
    /// 尚未开始，已直接终结为 Cancelled
    Finalized,
    /// 已开始，将在下一个检查点生效
    Requested,
}

struct HandleInner {
    id: u64,
    kind: HandleKind,
    computation: Option<Computation>,
    state: HandleState,
    cancel_requested: bool,
    has_started: bool,
    is_evaluating: bool,
    /// 当前有效的排队票据；队列中票据不符的条目已过期
    queued: Option<u64>,
    next_ticket: u64,
    continuation: Option<ContinuationContext>,
    registrations: Vec<AwaitRegistration>,
    awaiters: WaitSet,
}

/// Shared reference to a Proc or Future.
///
/// State only moves forward: once resolved, failed or cancelled, the
/// result and error never change, the captured computation and
/// continuation are dropped, and outstanding registrations are cancelled.
#[derive(Clone)]
pub struct AsyncHandle(Rc<RefCell<HandleInner>>);

impl AsyncHandle {
    pub fn new(id: u64, kind: HandleKind, computation: Computation) -> Self {
        AsyncHandle(Rc::new(RefCell::new(HandleInner {
            id,
            kind,
            computation: Some(computation),
            state: HandleState::Pending,
            cancel_requested: false,
            has_started: false,
            is_evaluating: false,
            queued: None,
            next_ticket: 0,
            continuation: None,
            registrations: vec![],
            awaiters: WaitSet::new(),
        })))
    }

    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn kind(&self) -> HandleKind {
        self.0.borrow().kind
    }

    pub fn status(&self) -> Status {
        match &self.0.borrow().state {
            HandleState::Pending => Status::Pending,
            HandleState::Resolved(_) => Status::Resolved,
            HandleState::Cancelled(_) => Status::Cancelled,
            HandleState::Failed(error) => Status::Failed(error.clone()),
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.0.borrow().state, HandleState::Pending)
    }

    /// The result of a settled handle: its value, or the wrapped error for
    /// a failed or cancelled one. `None` while pending.
    pub fn settled_value(&self) -> Option<Value> {
        match &self.0.borrow().state {
            HandleState::Pending => None,
            HandleState::Resolved(value) => Some(value.clone()),
            HandleState::Failed(error) | HandleState::Cancelled(error) => {
                Some(Value::Error(error.clone()))
            }
        }
    }

    pub fn has_started(&self) -> bool {
        self.0.borrow().has_started
    }

    pub fn is_evaluating(&self) -> bool {
        self.0.borrow().is_evaluating
    }

    pub fn cancel_requested(&self) -> bool {
        self.0.borrow().cancel_requested
    }

    pub fn is_queued(&self) -> bool {
        self.0.borrow().queued.is_some()
    }

    pub fn ptr_eq(&self, other: &AsyncHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Marks the handle as having a resumption in the run queue and returns
    /// the ticket that resumption must present. `None` if one is already
    /// queued or the handle has settled.
    pub(crate) fn mark_queued(&self) -> Option<u64> {
        let mut inner = self.0.borrow_mut();
        if inner.queued.is_some() || !matches!(inner.state, HandleState::Pending) {
            return None;
        }
        inner.next_ticket += 1;
        let ticket = inner.next_ticket;
        inner.queued = Some(ticket);
        Some(ticket)
    }

    /// Whether the queued resumption holding `ticket` is still the live one.
    pub(crate) fn holds_ticket(&self, ticket: u64) -> bool {
        self.0.borrow().queued == Some(ticket)
    }

    /// 消费排队票据；返回 false 说明这次排队已被其他路径处理
    pub(crate) fn take_queued(&self, ticket: u64) -> bool {
        let mut inner = self.0.borrow_mut();
        if inner.queued != Some(ticket) {
            return false;
        }
        inner.queued = None;
        true
    }

    /// Drops any queued resumption; the queue entry goes stale.
    pub(crate) fn clear_queued(&self) {
        self.0.borrow_mut().queued = None;
    }

    pub fn request_cancel(&self) -> CancelOutcome {
        let not_started = {
            let mut inner = self.0.borrow_mut();
            if !matches!(inner.state, HandleState::Pending) {
                return CancelOutcome::AlreadySettled;
            }
            inner.cancel_requested = true;
            !inner.has_started
        };
        if not_started {
            self.finalize_cancelled();
            CancelOutcome::Finalized
        } else {
            CancelOutcome::Requested
        }
    }

    /// Enters evaluation. Returns the computation to run, or `None` when the
    /// handle is settled or already being evaluated further up the stack.
    pub(crate) fn begin_resume(&self) -> Option<Computation> {
        let mut inner = self.0.borrow_mut();
        if inner.is_evaluating || !matches!(inner.state, HandleState::Pending) {
            return None;
        }
        let computation = inner.computation.clone()?;
        inner.has_started = true;
        inner.is_evaluating = true;
        Some(computation)
    }

    pub(crate) fn end_resume(&self) {
        self.0.borrow_mut().is_evaluating = false;
    }

    pub(crate) fn resolve(&self, value: Value) -> bool {
        self.settle(HandleState::Resolved(value))
    }

    /// Fails with a raised value, wrapping it according to the handle kind.
    pub(crate) fn fail(&self, raised: Value) -> bool {
        let summary = ErrorValue::summarize(&raised);
        let error = match self.kind() {
            HandleKind::Proc => ErrorValue::new(ErrorKind::ProcError, summary),
            HandleKind::Future => {
                ErrorValue::new(ErrorKind::FutureError, format!("future failed: {}", summary))
            }
        };
        self.settle(HandleState::Failed(Rc::new(error.with_cause(raised))))
    }

    pub(crate) fn finalize_cancelled(&self) -> bool {
        let message = match self.kind() {
            HandleKind::Proc => "proc cancelled",
            HandleKind::Future => "future cancelled",
        };
        let error = ErrorValue::new(ErrorKind::CancellationError, message);
        self.settle(HandleState::Cancelled(Rc::new(error)))
    }

    fn settle(&self, state: HandleState) -> bool {
        let (registrations, awaiters) = {
            let mut inner = self.0.borrow_mut();
            if !matches!(inner.state, HandleState::Pending) {
                return false;
            }
            inner.state = state;
            inner.queued = None;
            inner.computation = None;
            inner.continuation = None;
            (
                std::mem::take(&mut inner.registrations),
                inner.awaiters.clone(),
            )
        };
        // 释放借用后再取消登记、唤醒等待者
        for registration in registrations {
            registration.cancel();
        }
        let woken = awaiters.trigger_all();
        debug!("{} settled, woke {} awaiter(s)", self, woken);
        true
    }

    pub(crate) fn take_checkpoint<S: Checkpoint>(&self, key: FrameKey) -> Option<S> {
        self.0.borrow_mut().continuation.as_mut()?.take(key)
    }

    /// 懒创建续体上下文
    pub(crate) fn save_checkpoint<S: Checkpoint>(&self, key: FrameKey, state: S) {
        let mut inner = self.0.borrow_mut();
        if !matches!(inner.state, HandleState::Pending) {
            return;
        }
        inner
            .continuation
            .get_or_insert_with(ContinuationContext::new)
            .save(key, state);
    }

    pub fn has_continuation(&self) -> bool {
        self.0.borrow().continuation.is_some()
    }

    pub fn checkpoint_count(&self) -> usize {
        self.0
            .borrow()
            .continuation
            .as_ref()
            .map_or(0, ContinuationContext::len)
    }

    /// Cancels every outstanding registration, detaching the handle from the
    /// wait queues it is parked on. Returns how many were still armed.
    pub(crate) fn cancel_registrations(&self) -> usize {
        let registrations = std::mem::take(&mut self.0.borrow_mut().registrations);
        registrations
            .iter()
            .filter(|registration| registration.cancel())
            .count()
    }

    pub(crate) fn track_registration(&self, registration: AwaitRegistration) {
        let mut inner = self.0.borrow_mut();
        inner.registrations.retain(AwaitRegistration::is_active);
        inner.registrations.push(registration);
    }

    pub fn active_registrations(&self) -> usize {
        self.0
            .borrow()
            .registrations
            .iter()
            .filter(|registration| registration.is_active())
            .count()
    }

    pub fn format_context(&self) -> serde_json::Value {
        let inner = self.0.borrow();
        json!({
            "id": inner.id,
            "kind": inner.kind.name(),
            "status": self.status().tag(),
            "cancel_requested": inner.cancel_requested,
            "started": inner.has_started,
            "queued": inner.queued.is_some(),
            "awaiters": inner.awaiters.len(),
            "continuation": inner.continuation.as_ref().map(ContinuationContext::format_context),
        })
    }
}

impl Awaitable for AsyncHandle {
    fn is_ready(&self) -> bool {
        self.is_settled()
    }

    fn wait_set(&self) -> WaitSet {
        self.0.borrow().awaiters.clone()
    }
}

impl Display for AsyncHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (kind, id) = {
            let inner = self.0.borrow();
            (inner.kind, inner.id)
        };
        write!(f, "{}#{}({})", kind.name(), id, self.status().tag())
    }
}

impl Debug for AsyncHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
