use std::time::Duration;

use crate::{
    continuation::state::PendingWait,
    interpreter::{raise_error, Interpreter},
    runtime::signal::{EvalResult, Suspension},
    scheduler::{timer::deadline_after, waker::Awaitable},
    types::value::{Arity, Value},
};

use super::{native, NativeCall};

/// 让出一次：第一次调用挂起，恢复后返回 nil
fn yield_now(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    if !interp.in_async_context() {
        return Err(raise_error("yield() called outside async context"));
    }
    if let Some(PendingWait::Yielded) = call.wait.take() {
        return Ok(Value::Nil);
    }
    call.wait = Some(PendingWait::Yielded);
    Err(interp.suspend(Suspension::Ready))
}

fn cancelled(interp: &mut Interpreter, _call: &mut NativeCall) -> EvalResult {
    match interp.current_handle() {
        Some(handle) => Ok(Value::Bool(handle.cancel_requested())),
        None => Err(raise_error("cancelled() called outside async context")),
    }
}

/// `flush(limit = nil)`：只能在同步代码中驱动调度器
fn flush(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    if interp.in_async_context() {
        return Err(raise_error("flush() cannot be called from async context"));
    }
    let limit = match call.optional_int(0, "limit")? {
        Some(limit) => Some(
            usize::try_from(limit)
                .map_err(|_| raise_error(format!("flush limit must be >= 0, got {}", limit)))?,
        ),
        None => interp.config().flush_limit,
    };
    let executed = interp.flush(limit)?;
    Ok(Value::Int(executed as i64))
}

fn pending_tasks(interp: &mut Interpreter, _call: &mut NativeCall) -> EvalResult {
    Ok(Value::Int(interp.pending_tasks() as i64))
}

fn sleep_ms(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let millis = call.int_arg(0, "milliseconds")?;
    let millis = u64::try_from(millis)
        .map_err(|_| raise_error(format!("sleep duration must be >= 0, got {}", millis)))?;

    if let Some(PendingWait::Sleep(cell)) = call.wait.take() {
        return match cell.take_outcome() {
            Some(()) => Ok(Value::Nil),
            None => {
                call.wait = Some(PendingWait::Sleep(cell));
                Err(interp.suspend(Suspension::Blocked))
            }
        };
    }
    match interp.current_waker() {
        Some(waker) => {
            let (cell, registration) = interp.timers().arm(deadline_after(millis), waker);
            interp.track_registration(registration);
            call.wait = Some(PendingWait::Sleep(cell));
            Err(interp.suspend(Suspension::Blocked))
        }
        None => {
            std::thread::sleep(Duration::from_millis(millis));
            Ok(Value::Nil)
        }
    }
}

fn status(_interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    Ok(Value::Status(call.handle_arg(0)?.status()))
}

fn is_ready(_interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    Ok(Value::Bool(call.handle_arg(0)?.is_settled()))
}

fn cancel(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let handle = call.handle_arg(0)?;
    interp.cancel_handle(&handle);
    Ok(Value::Nil)
}

/// Joins a handle. Failed and cancelled handles produce their error value
/// instead of raising.
///
/// In async context the caller parks on the handle's awaiter set; from
/// synchronous code the handle is driven to completion.
fn value(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let handle = call.handle_arg(0)?;
    if let Some(result) = handle.settled_value() {
        call.wait = None;
        return Ok(result);
    }
    let Some(current) = interp.current_handle().cloned() else {
        return Ok(interp.await_handle_sync(&handle)?);
    };
    if current.ptr_eq(&handle) {
        return Err(raise_error(format!("{} cannot await its own value", handle)));
    }
    if let Some(PendingWait::Await(registration)) = &call.wait {
        if registration.is_active() {
            return Err(interp.suspend(Suspension::Blocked));
        }
    }
    // 首次等待，或被取消请求唤醒后重新登记
    let registration = handle.register_awaiter(interp.handle_waker(&current));
    interp.track_registration(registration.clone());
    call.wait = Some(PendingWait::Await(registration));
    Err(interp.suspend(Suspension::Blocked))
}

pub(super) fn handle_method(name: &str) -> Option<Value> {
    let method = match name {
        "status" => native("status", Arity::Exact(1), status),
        "value" => native("value", Arity::Exact(1), value),
        "cancel" => native("cancel", Arity::Exact(1), cancel),
        "is_ready" => native("is_ready", Arity::Exact(1), is_ready),
        _ => return None,
    };
    Some(method)
}

pub(super) fn build_module() -> Vec<(&'static str, Value)> {
    vec![
        ("yield", native("yield", Arity::Exact(0), yield_now)),
        ("cancelled", native("cancelled", Arity::Exact(0), cancelled)),
        ("flush", native("flush", Arity::Range(0, 1), flush)),
        ("pending_tasks", native("pending_tasks", Arity::Exact(0), pending_tasks)),
        ("sleep_ms", native("sleep_ms", Arity::Exact(1), sleep_ms)),
    ]
}
