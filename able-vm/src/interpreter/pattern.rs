use crate::types::value::Value;

use super::{
    ast::{Literal, Pattern},
    environment::Environment,
};

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Nil => Value::Nil,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Str(s) => Value::String(s.clone()),
    }
}

/// Matches `value` against `pattern`, defining bindings in `env`.
///
/// On failure some bindings may already be defined; callers use a fresh
/// scope per clause and drop it.
pub(crate) fn bind(pattern: &Pattern, value: &Value, env: &Environment) -> bool {
    match pattern {
        Pattern::Wildcard => true,
        Pattern::Literal(literal) => literal_value(literal) == *value,
        Pattern::Binding(name) => {
            env.define(name.clone(), value.clone());
            true
        }
        Pattern::Array(patterns) => {
            let Value::Array(items) = value else {
                return false;
            };
            let items = items.borrow().clone();
            items.len() == patterns.len()
                && patterns
                    .iter()
                    .zip(items.iter())
                    .all(|(pattern, item)| bind(pattern, item, env))
        }
        Pattern::Variant { name, fields } => match value {
            Value::Status(status) => {
                status.tag() == &**name && bind_fields(fields, &status.fields(), env)
            }
            // `Error(e)` 匹配任意种类的错误
            Value::Error(error) => {
                (&**name == "Error" || error.kind.name() == &**name)
                    && bind_fields(fields, &[value.clone()], env)
            }
            _ => false,
        },
    }
}

/// 不写字段时只比较标签
fn bind_fields(patterns: &[Pattern], payload: &[Value], env: &Environment) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.len() == payload.len()
        && patterns
            .iter()
            .zip(payload)
            .all(|(pattern, item)| bind(pattern, item, env))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::types::{
        error::{ErrorKind, ErrorValue},
        status::Status,
    };

    #[test]
    fn test_failed_status_binds_error() {
        let env = Environment::new();
        let error = Rc::new(ErrorValue::new(ErrorKind::ProcError, "boom"));
        let status = Value::Status(Status::Failed(error.clone()));
        let pattern = Pattern::variant("Failed", vec![Pattern::binding("e")]);
        assert!(bind(&pattern, &status, &env));
        assert_eq!(env.lookup("e"), Some(Value::Error(error)));
        assert!(!bind(&Pattern::variant("Resolved", vec![]), &status, &env));
    }

    #[test]
    fn test_error_kind_patterns() {
        let env = Environment::new();
        let value = Value::error(ErrorValue::new(ErrorKind::CancellationError, "proc cancelled"));
        assert!(bind(&Pattern::variant("CancellationError", vec![]), &value, &env));
        assert!(bind(&Pattern::variant("Error", vec![Pattern::binding("e")]), &value, &env));
        assert!(!bind(&Pattern::variant("ProcError", vec![]), &value, &env));
    }

    #[test]
    fn test_array_and_literal_patterns() {
        let env = Environment::new();
        let value = Value::array(vec![Value::Int(1), Value::from("x")]);
        let pattern = Pattern::Array(vec![Pattern::int(1), Pattern::binding("s")]);
        assert!(bind(&pattern, &value, &env));
        assert_eq!(env.lookup("s"), Some(Value::from("x")));
        let short = Pattern::Array(vec![Pattern::Wildcard]);
        assert!(!bind(&short, &value, &env));
    }
}
