use log::debug;

use crate::{
    interpreter::{raise_error, Interpreter},
    runtime::signal::{EvalResult, Signal},
    types::{
        error::{ErrorKind, ErrorValue},
        value::{Arity, Value},
    },
};

use super::{native, NativeCall};

fn print(interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let line = call
        .args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    debug!("print: {}", line);
    interp.emit(line);
    Ok(Value::Nil)
}

fn len(_interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    match call.arg(0) {
        Value::Array(items) => Ok(Value::Int(items.borrow().len() as i64)),
        Value::String(text) => Ok(Value::Int(text.chars().count() as i64)),
        other => Err(raise_error(format!(
            "len() of value of type {}",
            other.type_name()
        ))),
    }
}

/// `error(message)` 构造一个错误值（不会抛出）
fn error(_interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let message = call.arg(0).to_string();
    Ok(Value::error(ErrorValue::new(ErrorKind::Error, message)))
}

fn type_of(_interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    Ok(Value::from(call.arg(0).type_name()))
}

fn push(_interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    match call.arg(0) {
        Value::Array(items) => {
            items.borrow_mut().push(call.arg(1));
            Ok(Value::Array(items))
        }
        other => Err(raise_error(format!(
            "push() on value of type {}",
            other.type_name()
        ))),
    }
}

fn exit(_interp: &mut Interpreter, call: &mut NativeCall) -> EvalResult {
    let code = call.optional_int(0, "code")?.unwrap_or(0);
    let code = i32::try_from(code).map_err(|_| raise_error("exit code out of range"))?;
    Err(Signal::Exit(code))
}

pub(super) fn build_module() -> Vec<(&'static str, Value)> {
    vec![
        ("print", native("print", Arity::Range(0, 16), print)),
        ("len", native("len", Arity::Exact(1), len)),
        ("error", native("error", Arity::Exact(1), error)),
        ("type_of", native("type_of", Arity::Exact(1), type_of)),
        ("push", native("push", Arity::Exact(2), push)),
        ("exit", native("exit", Arity::Range(0, 1), exit)),
    ]
}
