use crate::{
    continuation::state::PendingWait,
    interpreter::{raise_error, Interpreter},
    runtime::signal::{EvalResult, Signal, Suspension},
    types::{
        channel::{ChannelError, ReceiveAttempt, ReceiveOutcome, SendAttempt, SendOutcome},
        error::{ErrorKind, ErrorValue},
        resources::NIL_HANDLE,
        value::{Arity, Value},
    },
};

use super::{block_forever, build_namespace, native, NativeCall};

fn channel_error(error: ChannelError) -> Signal {
    Signal::Raise(Value::error(ErrorValue::new(
        ErrorKind::ChannelClosed,
        error.to_string(),
    )))
}

/// `Channel.new(capacity = 0)`
fn new_channel(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let capacity = call.optional_int(0, "capacity")?.unwrap_or(0);
    let capacity = usize::try_from(capacity)
        .map_err(|_| raise_error(format!("channel capacity must be >= 0, got {}", capacity)))?;
    Ok(Value::Int(interp.resources_mut().new_channel(capacity)))
}

fn send(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let id = call.int_arg(0, "channel")?;
    if id == NIL_HANDLE {
        return block_forever(interp, "send on nil channel");
    }
    let channel = interp.resources().channel(id)?;

    // 恢复：读取挂起期间的结果
    if let Some(PendingWait::Send(cell)) = call.wait.take() {
        return match cell.take_outcome() {
            Some(SendOutcome::Delivered) => Ok(Value::Nil),
            Some(SendOutcome::Closed) => Err(channel_error(ChannelError::Closed)),
            None => {
                call.wait = Some(PendingWait::Send(cell));
                Err(interp.suspend(Suspension::Blocked))
            }
        };
    }

    match channel.try_send(call.arg(1)).map_err(channel_error)? {
        SendAttempt::Delivered | SendAttempt::Buffered => Ok(Value::Nil),
        SendAttempt::WouldBlock(value) => {
            if let Some(waker) = interp.current_waker() {
                let (cell, registration) = channel.park_sender(value, waker);
                interp.track_registration(registration);
                call.wait = Some(PendingWait::Send(cell));
                return Err(interp.suspend(Suspension::Blocked));
            }
            let mut pending = Some(value);
            interp.block_on("send", |_| {
                let Some(value) = pending.take() else {
                    return Ok(Some(Value::Nil));
                };
                match channel.try_send(value).map_err(channel_error)? {
                    SendAttempt::WouldBlock(value) => {
                        pending = Some(value);
                        Ok(None)
                    }
                    _ => Ok(Some(Value::Nil)),
                }
            })
        }
    }
}

/// 通道关闭且缓冲为空时返回 nil
fn receive(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let id = call.int_arg(0, "channel")?;
    if id == NIL_HANDLE {
        return block_forever(interp, "receive from nil channel");
    }
    let channel = interp.resources().channel(id)?;

    if let Some(PendingWait::Receive(cell)) = call.wait.take() {
        return match cell.take_outcome() {
            Some(ReceiveOutcome::Value(value)) => Ok(value),
            Some(ReceiveOutcome::Closed) => Ok(Value::Nil),
            None => {
                call.wait = Some(PendingWait::Receive(cell));
                Err(interp.suspend(Suspension::Blocked))
            }
        };
    }

    match channel.try_receive() {
        ReceiveAttempt::Value(value) => Ok(value),
        ReceiveAttempt::Closed => Ok(Value::Nil),
        ReceiveAttempt::WouldBlock => {
            if let Some(waker) = interp.current_waker() {
                let (cell, registration) = channel.park_receiver(waker);
                interp.track_registration(registration);
                call.wait = Some(PendingWait::Receive(cell));
                return Err(interp.suspend(Suspension::Blocked));
            }
            interp.block_on("receive", |_| {
                Ok(match channel.try_receive() {
                    ReceiveAttempt::Value(value) => Some(value),
                    ReceiveAttempt::Closed => Some(Value::Nil),
                    ReceiveAttempt::WouldBlock => None,
                })
            })
        }
    }
}

fn try_send(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let id = call.int_arg(0, "channel")?;
    if id == NIL_HANDLE {
        return Ok(Value::Bool(false));
    }
    let channel = interp.resources().channel(id)?;
    let sent = !matches!(
        channel.try_send(call.arg(1)).map_err(channel_error)?,
        SendAttempt::WouldBlock(_)
    );
    Ok(Value::Bool(sent))
}

fn try_receive(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let id = call.int_arg(0, "channel")?;
    if id == NIL_HANDLE {
        return Ok(Value::Nil);
    }
    let channel = interp.resources().channel(id)?;
    match channel.try_receive() {
        ReceiveAttempt::Value(value) => Ok(value),
        ReceiveAttempt::Closed | ReceiveAttempt::WouldBlock => Ok(Value::Nil),
    }
}

fn close(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let id = call.int_arg(0, "channel")?;
    if id == NIL_HANDLE {
        return Err(raise_error("close of nil channel"));
    }
    let channel = interp.resources().channel(id)?;
    channel.close().map_err(channel_error)?;
    Ok(Value::Nil)
}

fn is_closed(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let id = call.int_arg(0, "channel")?;
    if id == NIL_HANDLE {
        return Ok(Value::Bool(false));
    }
    let channel = interp.resources().channel(id)?;
    Ok(Value::Bool(channel.is_closed()))
}

pub(super) fn build_module() -> Vec<(&'static str, Value)> {
    vec![
        (
            "Channel",
            build_namespace(
                "Channel",
                vec![("new", native("new", Arity::Range(0, 1), new_channel))],
            ),
        ),
        ("send", native("send", Arity::Exact(2), send)),
        ("receive", native("receive", Arity::Exact(1), receive)),
        ("try_send", native("try_send", Arity::Exact(2), try_send)),
        ("try_receive", native("try_receive", Arity::Exact(1), try_receive)),
        ("close", native("close", Arity::Exact(1), close)),
        ("is_closed", native("is_closed", Arity::Exact(1), is_closed)),
    ]
}
