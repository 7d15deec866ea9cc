//! 语法树竞技场。
//!
//! 节点按 [`NodeId`] 存放在 [`Ast`] 中，续体检查点以节点身份为键，
//! 因此节点本身从不保存任何求值进度。没有解析器，程序通过
//! [`AstBuilder`] 构造。

use std::{cell::RefCell, rc::Rc};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    Wildcard,
    Literal(Literal),
    Binding(Rc<str>),
    Array(Vec<Pattern>),
    /// 状态标签（`Resolved`、`Failed(e)`…）或错误种类（`ProcError(e)`…）
    Variant { name: Rc<str>, fields: Vec<Pattern> },
}

impl Pattern {
    pub fn binding(name: &str) -> Self {
        Pattern::Binding(name.into())
    }

    pub fn int(value: i64) -> Self {
        Pattern::Literal(Literal::Int(value))
    }

    pub fn str(value: &str) -> Self {
        Pattern::Literal(Literal::Str(value.into()))
    }

    pub fn variant(name: &str, fields: Vec<Pattern>) -> Self {
        Pattern::Variant {
            name: name.into(),
            fields,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrClause {
    /// `None` 表示最后的无条件 `or { … }`
    pub condition: Option<NodeId>,
    pub body: NodeId,
}

#[derive(Clone, Debug)]
pub struct MatchClause {
    pub pattern: Pattern,
    pub guard: Option<NodeId>,
    pub body: NodeId,
}

#[derive(Debug)]
pub struct LambdaDef {
    pub name: Option<Rc<str>>,
    pub params: Vec<Rc<str>>,
    pub body: NodeId,
}

#[derive(Clone, Debug)]
pub enum Expr {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Interpolation(Vec<NodeId>),
    Array(Vec<NodeId>),
    Ident(Rc<str>),
    Member {
        object: NodeId,
        name: Rc<str>,
    },
    Index {
        object: NodeId,
        index: NodeId,
    },
    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
    Binary {
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    },
    /// `name := value`
    Define {
        name: Rc<str>,
        value: NodeId,
    },
    /// `name = value`
    Assign {
        name: Rc<str>,
        value: NodeId,
    },
    Block(Vec<NodeId>),
    If {
        condition: NodeId,
        body: NodeId,
        or_clauses: Vec<OrClause>,
    },
    While {
        condition: NodeId,
        body: NodeId,
    },
    For {
        binding: Rc<str>,
        iterable: NodeId,
        body: NodeId,
    },
    Break(Option<NodeId>),
    Continue,
    Return(Option<NodeId>),
    Raise(NodeId),
    Match {
        subject: NodeId,
        clauses: Vec<MatchClause>,
    },
    Rescue {
        body: NodeId,
        clauses: Vec<MatchClause>,
    },
    Lambda(Rc<LambdaDef>),
    Call {
        callee: NodeId,
        args: Vec<NodeId>,
    },
    MethodCall {
        receiver: NodeId,
        method: Rc<str>,
        args: Vec<NodeId>,
    },
    Proc(NodeId),
    Spawn(NodeId),
}

#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Expr>,
}

impl Ast {
    /// 节点只能由构造器创建，id 总是有效的
    pub fn expr(&self, id: NodeId) -> &Expr {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Builds an [`Ast`]. Methods take `&self` so calls nest freely:
///
/// ```
/// use able_vm::AstBuilder;
///
/// let b = AstBuilder::new();
/// let root = b.block(vec![b.define("x", b.int(1)), b.add(b.ident("x"), b.int(2))]);
/// let ast = b.finish();
/// assert!(ast.len() > root.0 as usize);
/// ```
#[derive(Default)]
pub struct AstBuilder {
    nodes: RefCell<Vec<Expr>>,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, expr: Expr) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(expr);
        NodeId((nodes.len() - 1) as u32)
    }

    pub fn finish(self) -> Rc<Ast> {
        Rc::new(Ast {
            nodes: self.nodes.into_inner(),
        })
    }

    pub fn nil(&self) -> NodeId {
        self.push(Expr::Nil)
    }

    pub fn bool(&self, value: bool) -> NodeId {
        self.push(Expr::Bool(value))
    }

    pub fn int(&self, value: i64) -> NodeId {
        self.push(Expr::Int(value))
    }

    pub fn float(&self, value: f64) -> NodeId {
        self.push(Expr::Float(value))
    }

    pub fn str(&self, value: &str) -> NodeId {
        self.push(Expr::Str(value.into()))
    }

    pub fn interpolate(&self, parts: Vec<NodeId>) -> NodeId {
        self.push(Expr::Interpolation(parts))
    }

    pub fn array(&self, items: Vec<NodeId>) -> NodeId {
        self.push(Expr::Array(items))
    }

    pub fn ident(&self, name: &str) -> NodeId {
        self.push(Expr::Ident(name.into()))
    }

    pub fn member(&self, object: NodeId, name: &str) -> NodeId {
        self.push(Expr::Member {
            object,
            name: name.into(),
        })
    }

    pub fn index(&self, object: NodeId, index: NodeId) -> NodeId {
        self.push(Expr::Index { object, index })
    }

    pub fn unary(&self, op: UnaryOp, operand: NodeId) -> NodeId {
        self.push(Expr::Unary { op, operand })
    }

    pub fn not(&self, operand: NodeId) -> NodeId {
        self.unary(UnaryOp::Not, operand)
    }

    pub fn binary(&self, op: BinaryOp, left: NodeId, right: NodeId) -> NodeId {
        self.push(Expr::Binary { op, left, right })
    }

    pub fn add(&self, left: NodeId, right: NodeId) -> NodeId {
        self.binary(BinaryOp::Add, left, right)
    }

    pub fn sub(&self, left: NodeId, right: NodeId) -> NodeId {
        self.binary(BinaryOp::Sub, left, right)
    }

    pub fn eq(&self, left: NodeId, right: NodeId) -> NodeId {
        self.binary(BinaryOp::Eq, left, right)
    }

    pub fn lt(&self, left: NodeId, right: NodeId) -> NodeId {
        self.binary(BinaryOp::Lt, left, right)
    }

    pub fn define(&self, name: &str, value: NodeId) -> NodeId {
        self.push(Expr::Define {
            name: name.into(),
            value,
        })
    }

    pub fn assign(&self, name: &str, value: NodeId) -> NodeId {
        self.push(Expr::Assign {
            name: name.into(),
            value,
        })
    }

    pub fn block(&self, statements: Vec<NodeId>) -> NodeId {
        self.push(Expr::Block(statements))
    }

    pub fn if_(&self, condition: NodeId, body: NodeId) -> NodeId {
        self.if_or(condition, body, vec![])
    }

    /// `if c { … } or c2 { … } or { … }`
    pub fn if_or(&self, condition: NodeId, body: NodeId, or_clauses: Vec<OrClause>) -> NodeId {
        self.push(Expr::If {
            condition,
            body,
            or_clauses,
        })
    }

    pub fn or_clause(&self, condition: Option<NodeId>, body: NodeId) -> OrClause {
        OrClause { condition, body }
    }

    pub fn while_(&self, condition: NodeId, body: NodeId) -> NodeId {
        self.push(Expr::While { condition, body })
    }

    pub fn for_(&self, binding: &str, iterable: NodeId, body: NodeId) -> NodeId {
        self.push(Expr::For {
            binding: binding.into(),
            iterable,
            body,
        })
    }

    pub fn break_(&self, value: Option<NodeId>) -> NodeId {
        self.push(Expr::Break(value))
    }

    pub fn continue_(&self) -> NodeId {
        self.push(Expr::Continue)
    }

    pub fn return_(&self, value: Option<NodeId>) -> NodeId {
        self.push(Expr::Return(value))
    }

    pub fn raise(&self, value: NodeId) -> NodeId {
        self.push(Expr::Raise(value))
    }

    pub fn clause(&self, pattern: Pattern, guard: Option<NodeId>, body: NodeId) -> MatchClause {
        MatchClause {
            pattern,
            guard,
            body,
        }
    }

    pub fn match_(&self, subject: NodeId, clauses: Vec<MatchClause>) -> NodeId {
        self.push(Expr::Match { subject, clauses })
    }

    /// `body rescue { pattern => handler, … }`
    pub fn rescue(&self, body: NodeId, clauses: Vec<MatchClause>) -> NodeId {
        self.push(Expr::Rescue { body, clauses })
    }

    pub fn lambda(&self, params: &[&str], body: NodeId) -> NodeId {
        self.push(Expr::Lambda(Rc::new(LambdaDef {
            name: None,
            params: params.iter().map(|p| Rc::from(*p)).collect(),
            body,
        })))
    }

    /// `fn name(params) { body }`，绑定到当前作用域
    pub fn function(&self, name: &str, params: &[&str], body: NodeId) -> NodeId {
        let lambda = self.push(Expr::Lambda(Rc::new(LambdaDef {
            name: Some(name.into()),
            params: params.iter().map(|p| Rc::from(*p)).collect(),
            body,
        })));
        self.define(name, lambda)
    }

    pub fn call(&self, callee: NodeId, args: Vec<NodeId>) -> NodeId {
        self.push(Expr::Call { callee, args })
    }

    /// 按名字调用作用域中的函数
    pub fn call_named(&self, name: &str, args: Vec<NodeId>) -> NodeId {
        let callee = self.ident(name);
        self.call(callee, args)
    }

    pub fn method(&self, receiver: NodeId, method: &str, args: Vec<NodeId>) -> NodeId {
        self.push(Expr::MethodCall {
            receiver,
            method: method.into(),
            args,
        })
    }

    pub fn proc_(&self, body: NodeId) -> NodeId {
        self.push(Expr::Proc(body))
    }

    pub fn spawn(&self, body: NodeId) -> NodeId {
        self.push(Expr::Spawn(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_builder_calls() {
        let b = AstBuilder::new();
        let root = b.block(vec![b.define("x", b.add(b.int(1), b.int(2)))]);
        let ast = b.finish();
        assert_eq!(ast.len(), 5);
        let Expr::Block(statements) = ast.expr(root) else {
            panic!("expected block");
        };
        assert!(matches!(ast.expr(statements[0]), Expr::Define { .. }));
    }

    #[test]
    fn test_function_defines_named_lambda() {
        let b = AstBuilder::new();
        let body = b.block(vec![]);
        let def = b.function("f", &["a", "b"], body);
        let ast = b.finish();
        let Expr::Define { name, value } = ast.expr(def) else {
            panic!("expected define");
        };
        assert_eq!(&**name, "f");
        let Expr::Lambda(lambda) = ast.expr(*value) else {
            panic!("expected lambda");
        };
        assert_eq!(lambda.params.len(), 2);
        assert_eq!(lambda.name.as_deref(), Some("f"));
    }
}
