use crate::{
    continuation::state::PendingWait,
    interpreter::Interpreter,
    runtime::signal::{EvalResult, Suspension},
    types::{
        async_handle::AsyncHandle,
        resources::NIL_HANDLE,
        value::{Arity, Value},
    },
};

use super::{block_forever, build_namespace, native, NativeCall};

fn new_mutex(interp: &mut Interpreter, _call: &mut NativeCall) -> EvalResult {
    Ok(Value::Int(interp.resources_mut().new_mutex()))
}

fn lock(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let id = call.int_arg(0, "mutex")?;
    if id == NIL_HANDLE {
        return block_forever(interp, "lock of nil mutex");
    }
    let mutex = interp.resources().mutex(id)?;

    // 解锁方已把所有权直接移交给我们
    if let Some(PendingWait::Lock(cell)) = call.wait.take() {
        return match cell.take_outcome() {
            Some(()) => Ok(Value::Nil),
            None => {
                call.wait = Some(PendingWait::Lock(cell));
                Err(interp.suspend(Suspension::Blocked))
            }
        };
    }

    let owner = interp.current_handle().map(AsyncHandle::id);
    if mutex.try_lock(owner) {
        return Ok(Value::Nil);
    }
    if let Some(waker) = interp.current_waker() {
        let (cell, registration) = mutex.park(owner, waker);
        interp.track_registration(registration);
        call.wait = Some(PendingWait::Lock(cell));
        return Err(interp.suspend(Suspension::Blocked));
    }
    interp.block_on("lock", |_| Ok(mutex.try_lock(None).then_some(Value::Nil)))
}

/// 解锁未加锁的互斥锁或 nil 句柄都是空操作
fn unlock(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let id = call.int_arg(0, "mutex")?;
    if id == NIL_HANDLE {
        return Ok(Value::Nil);
    }
    let mutex = interp.resources().mutex(id)?;
    mutex.unlock();
    Ok(Value::Nil)
}

fn try_lock(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let id = call.int_arg(0, "mutex")?;
    if id == NIL_HANDLE {
        return Ok(Value::Bool(false));
    }
    let mutex = interp.resources().mutex(id)?;
    let owner = interp.current_handle().map(AsyncHandle::id);
    Ok(Value::Bool(mutex.try_lock(owner)))
}

pub(super) fn build_module() -> Vec<(&'static str, Value)> {
    vec![
        (
            "Mutex",
            build_namespace(
                "Mutex",
                vec![("new", native("new", Arity::Exact(0), new_mutex))],
            ),
        ),
        ("lock", native("lock", Arity::Exact(1), lock)),
        ("unlock", native("unlock", Arity::Exact(1), unlock)),
        ("try_lock", native("try_lock", Arity::Exact(1), try_lock)),
    ]
}
