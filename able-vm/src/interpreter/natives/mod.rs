//! 内建函数。
//!
//! 每个子模块通过 `build_module` 导出 `(名字, 值)` 列表，由 [`install`]
//! 写入全局作用域。阻塞类操作（`receive`、`lock`、`value`…）在异步上下文中
//! 把等待登记记在 [`NativeCall::wait`] 里并挂起；恢复时调用点把同一个
//! `NativeCall` 还回来，函数据此读取结果而不是重新发起操作。

mod builtins;
mod channel;
mod mutex;
mod task;

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::{
    continuation::state::PendingWait,
    runtime::signal::{EvalResult, Suspension},
    types::{
        async_handle::AsyncHandle,
        value::{Arity, NativeFn, NativeFunction, Namespace, Value},
    },
};

use super::{environment::Environment, raise_error, Interpreter};

/// Arguments of one native call plus the wait it parked on, if any.
pub struct NativeCall {
    pub args: Vec<Value>,
    pub wait: Option<PendingWait>,
}

impl NativeCall {
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or(Value::Nil)
    }

    pub fn int_arg(&self, index: usize, what: &str) -> EvalResult<i64> {
        match self.args.get(index) {
            Some(Value::Int(n)) => Ok(*n),
            Some(other) => Err(raise_error(format!(
                "{} must be an Int, got {}",
                what,
                other.type_name()
            ))),
            None => Err(raise_error(format!("missing argument '{}'", what))),
        }
    }

    /// 缺省或 nil 视为未提供
    pub fn optional_int(&self, index: usize, what: &str) -> EvalResult<Option<i64>> {
        match self.args.get(index) {
            None | Some(Value::Nil) => Ok(None),
            Some(_) => self.int_arg(index, what).map(Some),
        }
    }

    pub fn handle_arg(&self, index: usize) -> EvalResult<AsyncHandle> {
        match self.args.get(index) {
            Some(Value::Handle(handle)) => Ok(handle.clone()),
            other => Err(raise_error(format!(
                "expected a Proc or Future, got {}",
                other.map_or("nothing", Value::type_name)
            ))),
        }
    }
}

pub(crate) fn native(name: &'static str, arity: Arity, func: NativeFn) -> Value {
    Value::Native(Rc::new(NativeFunction { name, arity, func }))
}

pub(crate) fn build_namespace(name: &'static str, members: Vec<(&'static str, Value)>) -> Value {
    let members: FxHashMap<&'static str, Value> = members.into_iter().collect();
    Value::Namespace(Rc::new(Namespace { name, members }))
}

pub(crate) fn install(globals: &Environment) {
    let modules = [
        builtins::build_module(),
        channel::build_module(),
        mutex::build_module(),
        task::build_module(),
    ];
    for (name, value) in modules.into_iter().flatten() {
        globals.define(name, value);
    }
}

/// Intrinsic methods of Proc and Future handles.
pub(crate) fn handle_method(name: &str) -> Option<Value> {
    task::handle_method(name)
}

/// 在 nil 句柄上阻塞：异步上下文中永远让出，同步上下文中直接报错
fn block_forever(interp: &Interpreter, what: &str) -> EvalResult {
    if interp.in_async_context() {
        Err(interp.suspend(Suspension::Ready))
    } else {
        Err(raise_error(format!(
            "{} would block forever outside async context",
            what
        )))
    }
}

