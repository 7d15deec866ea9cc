use std::fmt::Display;

use crate::types::value::Value;

/// 宿主级错误：运行时自身的缺陷或无法继续的状态，不会被重试
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeError {
    /// 使用了不存在或类型不符的通道/互斥锁句柄
    InvalidHandle(String),
    InvalidOperation(String),
    /// 同步代码阻塞，但已没有任何任务可以推进
    Deadlock(String),
    /// Ctrl-C
    Interrupted,
    /// 进程退出信号，总是向外传播
    Exit(i32),
    /// 顶层未捕获的 raise
    Uncaught(String),
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::InvalidHandle(msg) => write!(f, "Invalid Handle: {}", msg),
            RuntimeError::InvalidOperation(msg) => write!(f, "Invalid Operation: {}", msg),
            RuntimeError::Deadlock(msg) => write!(f, "Deadlock: {}", msg),
            RuntimeError::Interrupted => write!(f, "Execution interrupted by Ctrl+C"),
            RuntimeError::Exit(code) => write!(f, "Exit with code {}", code),
            RuntimeError::Uncaught(msg) => write!(f, "Uncaught Error: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Why a handle gave up control.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suspension {
    /// 主动让出或时间片耗尽，立即重新排队
    Ready,
    /// 等待某个资源，由唤醒器负责重新排队
    Blocked,
}

/// Non-local exits produced while evaluating a node.
///
/// `Suspend` never reaches user code: it unwinds to the owning handle's
/// boundary while every enclosing construct records its progress in the
/// handle's continuation context. `Raise` is the only variant `rescue`
/// can intercept.
#[derive(Clone, Debug)]
pub enum Signal {
    Suspend(Suspension),
    Raise(Value),
    Break(Value),
    Continue,
    Return(Value),
    /// 取消在检查点被观察到，只能由句柄边界处理
    Cancelled,
    Exit(i32),
    Fatal(RuntimeError),
}

impl Signal {
    /// 是否为挂起信号：只有挂起时各结构才需要保存检查点
    #[inline]
    pub fn is_suspension(&self) -> bool {
        matches!(self, Signal::Suspend(_))
    }
}

impl From<RuntimeError> for Signal {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Exit(code) => Signal::Exit(code),
            other => Signal::Fatal(other),
        }
    }
}

pub type EvalResult<T = Value> = Result<T, Signal>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_error_becomes_exit_signal() {
        assert!(matches!(Signal::from(RuntimeError::Exit(3)), Signal::Exit(3)));
        assert!(matches!(
            Signal::from(RuntimeError::Interrupted),
            Signal::Fatal(RuntimeError::Interrupted)
        ));
    }

    #[test]
    fn test_display() {
        let err = RuntimeError::InvalidHandle("channel 7".to_string());
        assert_eq!(err.to_string(), "Invalid Handle: channel 7");
    }
}
