use std::{
    cell::RefCell,
    fmt::{Debug, Display, Formatter},
    rc::Rc,
};

use rustc_hash::FxHashMap;

use crate::{
    interpreter::{
        ast::{Ast, LambdaDef},
        environment::Environment,
        natives::NativeCall,
        Interpreter,
    },
    runtime::signal::EvalResult,
};

use super::{async_handle::AsyncHandle, error::ErrorValue, status::Status};

pub type NativeFn = fn(&mut Interpreter, &mut NativeCall) -> EvalResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    /// 闭区间
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::Range(min, max) => (min..=max).contains(&count),
        }
    }
}

impl Display for Arity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::Range(min, max) => write!(f, "{} to {}", min, max),
        }
    }
}

pub struct NativeFunction {
    pub name: &'static str,
    pub arity: Arity,
    pub func: NativeFn,
}

pub struct Function {
    pub def: Rc<LambdaDef>,
    pub env: Environment,
    pub ast: Rc<Ast>,
}

impl Function {
    pub fn name(&self) -> &str {
        self.def.name.as_deref().unwrap_or("<lambda>")
    }
}

/// `Channel`、`Mutex` 这类只读的静态成员集合
pub struct Namespace {
    pub name: &'static str,
    pub members: FxHashMap<&'static str, Value>,
}

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Error(Rc<ErrorValue>),
    Status(Status),
    Handle(AsyncHandle),
    Function(Rc<Function>),
    Native(Rc<NativeFunction>),
    Namespace(Rc<Namespace>),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn error(error: ErrorValue) -> Self {
        Value::Error(Rc::new(error))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "Nil",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Error(_) => "Error",
            Value::Status(_) => "Status",
            Value::Handle(handle) => handle.kind().name(),
            Value::Function(_) | Value::Native(_) => "Function",
            Value::Namespace(_) => "Namespace",
        }
    }

    /// 只有 nil 与 false 为假
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&AsyncHandle> {
        match self {
            Value::Handle(handle) => Some(handle),
            _ => None,
        }
    }

    /// Program-facing representation: strings are quoted, everything else
    /// renders as with `Display`.
    pub fn repr(&self) -> String {
        match self {
            Value::String(s) => format!("{:?}", s),
            other => other.to_string(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                let items = items.borrow();
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Error(error) => write!(f, "{}", error),
            Value::Status(status) => write!(f, "{}", status),
            Value::Handle(handle) => write!(f, "{}", handle),
            Value::Function(function) => write!(f, "<function {}>", function.name()),
            Value::Native(native) => write!(f, "<native {}>", native.name),
            Value::Namespace(namespace) => write!(f, "<namespace {}>", namespace.name),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.repr())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Status(a), Value::Status(b)) => a == b,
            (Value::Handle(a), Value::Handle(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a.name == b.name,
            (Value::Namespace(a), Value::Namespace(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into())
    }
}

impl From<ErrorValue> for Value {
    fn from(value: ErrorValue) -> Self {
        Value::error(value)
    }
}
