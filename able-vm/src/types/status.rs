use std::{
    fmt::{Display, Formatter},
    rc::Rc,
};

use super::{error::ErrorValue, value::Value};

/// Projection of a handle's state as seen by programs.
#[derive(Clone, Debug, PartialEq)]
pub enum Status {
    Pending,
    Resolved,
    Cancelled,
    Failed(Rc<ErrorValue>),
}

impl Status {
    pub fn tag(&self) -> &'static str {
        match self {
            Status::Pending => "Pending",
            Status::Resolved => "Resolved",
            Status::Cancelled => "Cancelled",
            Status::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Pending)
    }

    /// 变体模式匹配时暴露的字段
    pub fn fields(&self) -> Vec<Value> {
        match self {
            Status::Failed(error) => vec![Value::Error(error.clone())],
            _ => vec![],
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Failed(error) => write!(f, "Failed({})", error.message),
            other => write!(f, "{}", other.tag()),
        }
    }
}
