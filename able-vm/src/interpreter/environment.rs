use std::{cell::RefCell, rc::Rc};

use rustc_hash::FxHashMap;

use crate::types::value::Value;

struct Scope {
    vars: FxHashMap<Rc<str>, Value>,
    parent: Option<Environment>,
}

/// A lexical scope shared by every closure and handle that captured it.
#[derive(Clone)]
pub struct Environment(Rc<RefCell<Scope>>);

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Environment(Rc::new(RefCell::new(Scope {
            vars: FxHashMap::default(),
            parent: None,
        })))
    }

    pub fn child(&self) -> Self {
        Environment(Rc::new(RefCell::new(Scope {
            vars: FxHashMap::default(),
            parent: Some(self.clone()),
        })))
    }

    /// 在当前作用域中声明（可遮蔽外层同名变量）
    pub fn define(&self, name: impl Into<Rc<str>>, value: Value) {
        self.0.borrow_mut().vars.insert(name.into(), value);
    }

    /// Updates the nearest binding of `name`. Returns `false` when no scope
    /// declares it.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let mut current = Some(self.clone());
        while let Some(env) = current {
            let mut scope = env.0.borrow_mut();
            if let Some(slot) = scope.vars.get_mut(name) {
                *slot = value;
                return true;
            }
            current = scope.parent.clone();
        }
        false
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(env) = current {
            let scope = env.0.borrow();
            if let Some(value) = scope.vars.get(name) {
                return Some(value.clone());
            }
            current = scope.parent.clone();
        }
        None
    }

    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_sees_and_updates_parent() {
        let global = Environment::new();
        global.define("x", Value::Int(1));
        let inner = global.child();
        assert_eq!(inner.lookup("x"), Some(Value::Int(1)));
        assert!(inner.assign("x", Value::Int(2)));
        assert_eq!(global.lookup("x"), Some(Value::Int(2)));
        assert!(!inner.assign("missing", Value::Nil));
    }

    #[test]
    fn test_define_shadows() {
        let global = Environment::new();
        global.define("x", Value::Int(1));
        let inner = global.child();
        inner.define("x", Value::Int(5));
        assert_eq!(inner.lookup("x"), Some(Value::Int(5)));
        assert_eq!(global.lookup("x"), Some(Value::Int(1)));
    }
}
