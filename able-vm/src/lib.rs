//! Able 虚拟机运行时。
//!
//! - `scheduler`：单线程协作式执行器、唤醒桥接与定时器队列。
//! - `continuation`：每个异步句柄私有的续体检查点存储。
//! - `types`：运行时值、状态、异步句柄、通道与互斥锁。
//! - `interpreter`：树遍历求值器及程序可见的内建函数。
//! - `runtime`：控制流信号与宿主级错误。

pub mod config;
pub mod continuation;
pub mod interpreter;
pub mod runtime;
pub mod scheduler;
pub mod types;
pub mod utils;

pub use config::RuntimeConfig;
pub use interpreter::ast::{Ast, AstBuilder, NodeId};
pub use interpreter::Interpreter;
pub use runtime::signal::{RuntimeError, Signal};
pub use types::value::Value;
