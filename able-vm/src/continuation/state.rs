use std::rc::Rc;

use crate::{
    interpreter::environment::Environment,
    scheduler::waker::{AwaitRegistration, WaitCell},
    types::{
        channel::{ReceiveOutcome, SendOutcome},
        value::Value,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopStage {
    /// 即将求值循环条件（或取下一个元素）
    BeforeBody,
    InBody,
}

/// 语句块：下一条要执行的语句、块作用域与上一条语句的值
pub struct BlockState {
    pub index: usize,
    pub env: Environment,
    pub last: Value,
}

/// `while` 循环
pub struct LoopState {
    pub stage: LoopStage,
    pub env: Environment,
}

/// Snapshot of the collection a `for` loop walks.
#[derive(Clone)]
pub struct ValueCursor {
    items: Rc<[Value]>,
    next: usize,
}

impl ValueCursor {
    pub fn new(items: Vec<Value>) -> Self {
        ValueCursor {
            items: items.into(),
            next: 0,
        }
    }

    pub fn next_item(&mut self) -> Option<Value> {
        let item = self.items.get(self.next)?.clone();
        self.next += 1;
        Some(item)
    }

    pub fn position(&self) -> usize {
        self.next
    }
}

/// `for` 循环：游标与当前迭代的作用域
pub struct ForState {
    pub stage: LoopStage,
    pub cursor: ValueCursor,
    pub env: Option<Environment>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IfStage {
    Condition,
    Body,
    OrCondition,
    OrBody,
}

pub struct IfState {
    pub stage: IfStage,
    pub or_index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchStage {
    Subject,
    Clause,
    Guard,
    Body,
}

pub struct MatchState {
    pub stage: MatchStage,
    pub clause: usize,
    pub subject: Option<Value>,
    /// 匹配成功的模式产生的绑定作用域
    pub env: Option<Environment>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RescueStage {
    Body,
    Clause,
    Guard,
    Handler,
}

pub struct RescueState {
    pub stage: RescueStage,
    pub clause: usize,
    /// 被拦截的 raise 值，选择子句期间保留
    pub raised: Option<Value>,
    pub env: Option<Environment>,
}

/// Parts already evaluated by a string interpolation or array literal.
pub struct SequenceState {
    pub values: Vec<Value>,
}

/// 二元运算已求值的左操作数
pub struct OperandState {
    pub left: Value,
}

/// A blocking native operation parked inside a call.
pub enum PendingWait {
    /// `yield()` 已经让出过一次，恢复时直接返回
    Yielded,
    Receive(Rc<WaitCell<ReceiveOutcome>>),
    Send(Rc<WaitCell<SendOutcome>>),
    Lock(Rc<WaitCell<()>>),
    Await(AwaitRegistration),
    Sleep(Rc<WaitCell<()>>),
}

impl PendingWait {
    pub fn describe(&self) -> &'static str {
        match self {
            PendingWait::Yielded => "yield",
            PendingWait::Receive(_) => "receive",
            PendingWait::Send(_) => "send",
            PendingWait::Lock(_) => "lock",
            PendingWait::Await(_) => "await",
            PendingWait::Sleep(_) => "sleep",
        }
    }
}

/// A call whose arguments, or whose callee's body, have not finished.
#[derive(Default)]
pub struct CallState {
    pub callee: Option<Value>,
    pub args: Vec<Value>,
    /// 方法调用时接收者占据的前导参数个数
    pub prefix: usize,
    /// 用户函数的激活作用域（参数绑定所在）
    pub activation: Option<Environment>,
    pub wait: Option<PendingWait>,
}
