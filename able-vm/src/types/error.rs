use std::{
    fmt::{Display, Formatter},
    rc::Rc,
};

use crate::utils::format_value_summary;

use super::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// 用户代码或内建函数抛出的一般错误
    Error,
    ProcError,
    FutureError,
    CancellationError,
    ChannelClosed,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::ProcError => "ProcError",
            ErrorKind::FutureError => "FutureError",
            ErrorKind::CancellationError => "CancellationError",
            ErrorKind::ChannelClosed => "ChannelClosed",
        }
    }
}

/// A program-visible error value.
///
/// Wrappers produced by a failing handle keep the value that was actually
/// raised in `cause`.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorValue {
    pub kind: ErrorKind,
    pub message: Rc<str>,
    pub cause: Option<Value>,
}

impl ErrorValue {
    pub fn new(kind: ErrorKind, message: impl Into<Rc<str>>) -> Self {
        ErrorValue {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: Value) -> Self {
        self.cause = Some(cause);
        self
    }

    /// 错误取其消息，其他值取截断后的显示形式
    pub fn summarize(raised: &Value) -> String {
        match raised {
            Value::Error(error) => error.message.to_string(),
            other => format_value_summary(other),
        }
    }

    /// 按成员名读取字段：`message`、`cause`、`kind`
    pub fn member(&self, name: &str) -> Option<Value> {
        match name {
            "message" => Some(Value::String(self.message.clone())),
            "cause" => Some(self.cause.clone().unwrap_or(Value::Nil)),
            "kind" => Some(Value::from(self.kind.name())),
            _ => None,
        }
    }
}

impl Display for ErrorValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_prefers_error_message() {
        let inner = Value::from(ErrorValue::new(ErrorKind::Error, "disk full"));
        assert_eq!(ErrorValue::summarize(&inner), "disk full");
        assert_eq!(ErrorValue::summarize(&Value::from("boom")), "boom");
        assert_eq!(ErrorValue::summarize(&Value::Int(3)), "3");
    }

    #[test]
    fn test_members() {
        let error = ErrorValue::new(ErrorKind::ProcError, "boom").with_cause(Value::from("boom"));
        assert_eq!(error.member("cause"), Some(Value::from("boom")));
        assert_eq!(error.member("kind"), Some(Value::from("ProcError")));
        assert_eq!(error.member("nope"), None);
        assert_eq!(error.to_string(), "ProcError: boom");
    }
}
