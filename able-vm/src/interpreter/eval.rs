use std::rc::Rc;

use crate::{
    continuation::state::{
        BlockState, CallState, ForState, IfStage, IfState, LoopStage, LoopState, MatchStage,
        MatchState, OperandState, RescueStage, RescueState, SequenceState, ValueCursor,
    },
    runtime::signal::{EvalResult, Signal, Suspension},
    types::{
        async_handle::{Computation, HandleKind},
        value::{Function, Value},
    },
};

use super::{
    ast::{Ast, BinaryOp, Expr, MatchClause, NodeId, OrClause, UnaryOp},
    environment::Environment,
    natives::{self, NativeCall},
    pattern, raise_error, Interpreter,
};

/// 递归调用深度上限
const MAX_CALL_DEPTH: u32 = 200;

enum CallTarget<'a> {
    Callee(NodeId),
    Method { receiver: NodeId, name: &'a Rc<str> },
}

impl Interpreter {
    pub(crate) fn eval(&mut self, ast: &Rc<Ast>, id: NodeId, env: &Environment) -> EvalResult {
        self.count_step();
        match ast.expr(id) {
            Expr::Nil => Ok(Value::Nil),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Float(x) => Ok(Value::Float(*x)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Interpolation(parts) => {
                let values = self.eval_sequence(ast, id, parts, env)?;
                let text: String = values.iter().map(Value::to_string).collect();
                Ok(Value::from(text))
            }
            Expr::Array(items) => Ok(Value::array(self.eval_sequence(ast, id, items, env)?)),
            Expr::Ident(name) => env
                .lookup(name)
                .ok_or_else(|| raise_error(format!("undefined variable '{}'", name))),
            Expr::Member { object, name } => {
                let target = self.eval(ast, *object, env)?;
                member(&target, name)
            }
            Expr::Index { object, index } => {
                let (target, key) = self.eval_operands(ast, id, *object, *index, env)?;
                index_value(&target, &key)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(ast, *operand, env)?;
                unary(*op, &value)
            }
            Expr::Binary { op, left, right } => self.eval_binary(ast, id, *op, *left, *right, env),
            Expr::Define { name, value } => {
                let value = self.eval(ast, *value, env)?;
                env.define(name.clone(), value.clone());
                Ok(value)
            }
            Expr::Assign { name, value } => {
                let value = self.eval(ast, *value, env)?;
                if !env.assign(name, value.clone()) {
                    return Err(raise_error(format!("assignment to undefined variable '{}'", name)));
                }
                Ok(value)
            }
            Expr::Block(statements) => self.eval_block(ast, id, statements, env),
            Expr::If {
                condition,
                body,
                or_clauses,
            } => self.eval_if(ast, id, *condition, *body, or_clauses, env),
            Expr::While { condition, body } => self.eval_while(ast, id, *condition, *body, env),
            Expr::For {
                binding,
                iterable,
                body,
            } => self.eval_for(ast, id, binding, *iterable, *body, env),
            Expr::Break(value) => {
                let value = match value {
                    Some(node) => self.eval(ast, *node, env)?,
                    None => Value::Nil,
                };
                Err(Signal::Break(value))
            }
            Expr::Continue => Err(Signal::Continue),
            Expr::Return(value) => {
                let value = match value {
                    Some(node) => self.eval(ast, *node, env)?,
                    None => Value::Nil,
                };
                Err(Signal::Return(value))
            }
            Expr::Raise(value) => {
                let value = self.eval(ast, *value, env)?;
                Err(Signal::Raise(value))
            }
            Expr::Match { subject, clauses } => self.eval_match(ast, id, *subject, clauses, env),
            Expr::Rescue { body, clauses } => self.eval_rescue(ast, id, *body, clauses, env),
            Expr::Lambda(def) => Ok(Value::Function(Rc::new(Function {
                def: def.clone(),
                env: env.clone(),
                ast: ast.clone(),
            }))),
            Expr::Call { callee, args } => {
                self.eval_call(ast, id, CallTarget::Callee(*callee), args, env)
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => self.eval_call(
                ast,
                id,
                CallTarget::Method {
                    receiver: *receiver,
                    name: method,
                },
                args,
                env,
            ),
            Expr::Proc(body) => Ok(Value::Handle(self.spawn_handle(
                HandleKind::Proc,
                Computation {
                    ast: ast.clone(),
                    body: *body,
                    env: env.clone(),
                },
            ))),
            Expr::Spawn(body) => Ok(Value::Handle(self.spawn_handle(
                HandleKind::Future,
                Computation {
                    ast: ast.clone(),
                    body: *body,
                    env: env.clone(),
                },
            ))),
        }
    }

    /// 字符串插值与数组字面量：按顺序求值，已完成的部分不会重复求值
    fn eval_sequence(
        &mut self,
        ast: &Rc<Ast>,
        id: NodeId,
        items: &[NodeId],
        env: &Environment,
    ) -> EvalResult<Vec<Value>> {
        let mut values = self
            .take_checkpoint::<SequenceState>(id)
            .map(|state| state.values)
            .unwrap_or_default();
        while values.len() < items.len() {
            match self.eval(ast, items[values.len()], env) {
                Ok(value) => values.push(value),
                Err(signal) => return Err(self.park(id, signal, SequenceState { values })),
            }
        }
        Ok(values)
    }

    fn eval_operands(
        &mut self,
        ast: &Rc<Ast>,
        id: NodeId,
        left: NodeId,
        right: NodeId,
        env: &Environment,
    ) -> EvalResult<(Value, Value)> {
        let left = match self.take_checkpoint::<OperandState>(id) {
            Some(state) => state.left,
            None => self.eval(ast, left, env)?,
        };
        match self.eval(ast, right, env) {
            Ok(right) => Ok((left, right)),
            Err(signal) => Err(self.park(id, signal, OperandState { left })),
        }
    }

    fn eval_binary(
        &mut self,
        ast: &Rc<Ast>,
        id: NodeId,
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
        env: &Environment,
    ) -> EvalResult {
        if !matches!(op, BinaryOp::And | BinaryOp::Or) {
            let (left, right) = self.eval_operands(ast, id, left, right, env)?;
            return binary(op, &left, &right);
        }
        // 短路：左值决定结果时不求值右侧
        let left = match self.take_checkpoint::<OperandState>(id) {
            Some(state) => state.left,
            None => self.eval(ast, left, env)?,
        };
        let decided = match op {
            BinaryOp::And => !left.is_truthy(),
            _ => left.is_truthy(),
        };
        if decided {
            return Ok(Value::Bool(left.is_truthy()));
        }
        match self.eval(ast, right, env) {
            Ok(right) => Ok(Value::Bool(right.is_truthy())),
            Err(signal) => Err(self.park(id, signal, OperandState { left })),
        }
    }

    fn eval_block(
        &mut self,
        ast: &Rc<Ast>,
        id: NodeId,
        statements: &[NodeId],
        env: &Environment,
    ) -> EvalResult {
        let BlockState {
            mut index,
            env: scope,
            mut last,
        } = self.take_checkpoint(id).unwrap_or_else(|| BlockState {
            index: 0,
            env: env.child(),
            last: Value::Nil,
        });
        while let Some(statement) = statements.get(index) {
            match self.eval(ast, *statement, &scope) {
                Ok(value) => {
                    last = value;
                    index += 1;
                }
                Err(signal) => {
                    return Err(self.park(
                        id,
                        signal,
                        BlockState {
                            index,
                            env: scope,
                            last,
                        },
                    ))
                }
            }
        }
        Ok(last)
    }

    fn eval_if(
        &mut self,
        ast: &Rc<Ast>,
        id: NodeId,
        condition: NodeId,
        body: NodeId,
        or_clauses: &[OrClause],
        env: &Environment,
    ) -> EvalResult {
        let (mut stage, mut or_index) = self
            .take_checkpoint::<IfState>(id)
            .map_or((IfStage::Condition, 0), |state| (state.stage, state.or_index));
        let signal = loop {
            match stage {
                IfStage::Condition => match self.eval(ast, condition, env) {
                    Ok(value) if value.is_truthy() => stage = IfStage::Body,
                    Ok(_) => stage = IfStage::OrCondition,
                    Err(signal) => break signal,
                },
                IfStage::Body => match self.eval(ast, body, env) {
                    Ok(value) => return Ok(value),
                    Err(signal) => break signal,
                },
                IfStage::OrCondition => {
                    let Some(clause) = or_clauses.get(or_index) else {
                        return Ok(Value::Nil);
                    };
                    let Some(test) = clause.condition else {
                        stage = IfStage::OrBody;
                        continue;
                    };
                    match self.eval(ast, test, env) {
                        Ok(value) if value.is_truthy() => stage = IfStage::OrBody,
                        Ok(_) => or_index += 1,
                        Err(signal) => break signal,
                    }
                }
                IfStage::OrBody => {
                    let Some(clause) = or_clauses.get(or_index) else {
                        return Ok(Value::Nil);
                    };
                    match self.eval(ast, clause.body, env) {
                        Ok(value) => return Ok(value),
                        Err(signal) => break signal,
                    }
                }
            }
        };
        Err(self.park(id, signal, IfState { stage, or_index }))
    }

    fn eval_while(
        &mut self,
        ast: &Rc<Ast>,
        id: NodeId,
        condition: NodeId,
        body: NodeId,
        env: &Environment,
    ) -> EvalResult {
        let LoopState {
            mut stage,
            env: scope,
        } = self.take_checkpoint(id).unwrap_or_else(|| LoopState {
            stage: LoopStage::BeforeBody,
            env: env.child(),
        });
        loop {
            if stage == LoopStage::BeforeBody {
                // 回边：时间片耗尽则让出
                if self.preemption_due() {
                    let signal = self.suspend(Suspension::Ready);
                    return Err(self.park(id, signal, LoopState { stage, env: scope }));
                }
                match self.eval(ast, condition, &scope) {
                    Ok(value) if !value.is_truthy() => return Ok(Value::Nil),
                    Ok(_) => stage = LoopStage::InBody,
                    Err(signal) => {
                        return Err(self.park(id, signal, LoopState { stage, env: scope }))
                    }
                }
            }
            match self.eval(ast, body, &scope) {
                Ok(_) | Err(Signal::Continue) => stage = LoopStage::BeforeBody,
                Err(Signal::Break(value)) => return Ok(value),
                Err(signal) => return Err(self.park(id, signal, LoopState { stage, env: scope })),
            }
        }
    }

    fn eval_for(
        &mut self,
        ast: &Rc<Ast>,
        id: NodeId,
        binding: &Rc<str>,
        iterable: NodeId,
        body: NodeId,
        env: &Environment,
    ) -> EvalResult {
        let ForState {
            mut stage,
            mut cursor,
            env: mut iteration,
        } = match self.take_checkpoint(id) {
            Some(state) => state,
            None => {
                let collection = self.eval(ast, iterable, env)?;
                ForState {
                    stage: LoopStage::BeforeBody,
                    cursor: cursor_over(&collection)?,
                    env: None,
                }
            }
        };
        loop {
            if stage == LoopStage::BeforeBody {
                if self.preemption_due() {
                    let signal = self.suspend(Suspension::Ready);
                    let state = ForState {
                        stage,
                        cursor,
                        env: None,
                    };
                    return Err(self.park(id, signal, state));
                }
                let Some(item) = cursor.next_item() else {
                    return Ok(Value::Nil);
                };
                let scope = env.child();
                scope.define(binding.clone(), item);
                iteration = Some(scope);
                stage = LoopStage::InBody;
            }
            let Some(scope) = iteration.clone() else {
                stage = LoopStage::BeforeBody;
                continue;
            };
            match self.eval(ast, body, &scope) {
                Ok(_) | Err(Signal::Continue) => stage = LoopStage::BeforeBody,
                Err(Signal::Break(value)) => return Ok(value),
                Err(signal) => {
                    let state = ForState {
                        stage,
                        cursor,
                        env: Some(scope),
                    };
                    return Err(self.park(id, signal, state));
                }
            }
        }
    }

    fn eval_match(
        &mut self,
        ast: &Rc<Ast>,
        id: NodeId,
        subject: NodeId,
        clauses: &[MatchClause],
        env: &Environment,
    ) -> EvalResult {
        let mut state = self
            .take_checkpoint::<MatchState>(id)
            .unwrap_or(MatchState {
                stage: MatchStage::Subject,
                clause: 0,
                subject: None,
                env: None,
            });
        loop {
            let stage = state.stage;
            match stage {
                MatchStage::Subject => match self.eval(ast, subject, env) {
                    Ok(value) => {
                        state.subject = Some(value);
                        state.stage = MatchStage::Clause;
                    }
                    Err(signal) => return Err(self.park(id, signal, state)),
                },
                MatchStage::Clause => {
                    let Some(value) = state.subject.clone() else {
                        state.stage = MatchStage::Subject;
                        continue;
                    };
                    let Some(clause) = clauses.get(state.clause) else {
                        return Err(raise_error(format!("no match clause for {}", value.repr())));
                    };
                    let scope = env.child();
                    if pattern::bind(&clause.pattern, &value, &scope) {
                        state.stage = match clause.guard {
                            Some(_) => MatchStage::Guard,
                            None => MatchStage::Body,
                        };
                        state.env = Some(scope);
                    } else {
                        state.clause += 1;
                    }
                }
                MatchStage::Guard => {
                    let (Some(clause), Some(scope)) = (clauses.get(state.clause), state.env.clone())
                    else {
                        state.stage = MatchStage::Clause;
                        continue;
                    };
                    let Some(guard) = clause.guard else {
                        state.stage = MatchStage::Body;
                        continue;
                    };
                    match self.eval(ast, guard, &scope) {
                        Ok(value) if value.is_truthy() => state.stage = MatchStage::Body,
                        Ok(_) => {
                            state.clause += 1;
                            state.env = None;
                            state.stage = MatchStage::Clause;
                        }
                        Err(signal) => return Err(self.park(id, signal, state)),
                    }
                }
                MatchStage::Body => {
                    let (Some(clause), Some(scope)) = (clauses.get(state.clause), state.env.clone())
                    else {
                        state.stage = MatchStage::Clause;
                        continue;
                    };
                    return match self.eval(ast, clause.body, &scope) {
                        Ok(value) => Ok(value),
                        Err(signal) => Err(self.park(id, signal, state)),
                    };
                }
            }
        }
    }

    /// `rescue` 只拦截 raise；子句按模式与守卫选择，都不匹配时继续向外抛出
    fn eval_rescue(
        &mut self,
        ast: &Rc<Ast>,
        id: NodeId,
        body: NodeId,
        clauses: &[MatchClause],
        env: &Environment,
    ) -> EvalResult {
        let mut state = self
            .take_checkpoint::<RescueState>(id)
            .unwrap_or(RescueState {
                stage: RescueStage::Body,
                clause: 0,
                raised: None,
                env: None,
            });
        loop {
            match state.stage {
                RescueStage::Body => match self.eval(ast, body, env) {
                    Ok(value) => return Ok(value),
                    Err(Signal::Raise(raised)) => {
                        state.raised = Some(raised);
                        state.clause = 0;
                        state.stage = RescueStage::Clause;
                    }
                    Err(signal) => return Err(self.park(id, signal, state)),
                },
                RescueStage::Clause => {
                    let Some(raised) = state.raised.clone() else {
                        return Ok(Value::Nil);
                    };
                    let Some(clause) = clauses.get(state.clause) else {
                        return Err(Signal::Raise(raised));
                    };
                    let scope = env.child();
                    if pattern::bind(&clause.pattern, &raised, &scope) {
                        state.stage = match clause.guard {
                            Some(_) => RescueStage::Guard,
                            None => RescueStage::Handler,
                        };
                        state.env = Some(scope);
                    } else {
                        state.clause += 1;
                    }
                }
                RescueStage::Guard => {
                    let (Some(clause), Some(scope)) = (clauses.get(state.clause), state.env.clone())
                    else {
                        return Ok(Value::Nil);
                    };
                    let Some(guard) = clause.guard else {
                        state.stage = RescueStage::Handler;
                        continue;
                    };
                    match self.eval(ast, guard, &scope) {
                        Ok(value) if value.is_truthy() => state.stage = RescueStage::Handler,
                        Ok(_) => {
                            state.clause += 1;
                            state.env = None;
                            state.stage = RescueStage::Clause;
                        }
                        Err(signal) => return Err(self.park(id, signal, state)),
                    }
                }
                RescueStage::Handler => {
                    let (Some(clause), Some(scope)) = (clauses.get(state.clause), state.env.clone())
                    else {
                        return Ok(Value::Nil);
                    };
                    return match self.eval(ast, clause.body, &scope) {
                        Ok(value) => Ok(value),
                        Err(signal) => Err(self.park(id, signal, state)),
                    };
                }
            }
        }
    }

    fn eval_call(
        &mut self,
        ast: &Rc<Ast>,
        id: NodeId,
        target: CallTarget<'_>,
        arg_nodes: &[NodeId],
        env: &Environment,
    ) -> EvalResult {
        let mut state = self.take_checkpoint::<CallState>(id).unwrap_or_default();

        let callee = match state.callee.clone() {
            Some(callee) => callee,
            None => {
                let callee = match target {
                    CallTarget::Callee(node) => self.eval(ast, node, env)?,
                    CallTarget::Method { receiver, name } => {
                        let receiver = self.eval(ast, receiver, env)?;
                        let (callee, bound) = resolve_method(&receiver, name, env)?;
                        if bound {
                            state.args.push(receiver);
                            state.prefix = 1;
                        }
                        callee
                    }
                };
                state.callee = Some(callee.clone());
                callee
            }
        };

        while state.args.len() - state.prefix < arg_nodes.len() {
            let node = arg_nodes[state.args.len() - state.prefix];
            match self.eval(ast, node, env) {
                Ok(value) => state.args.push(value),
                Err(signal) => return Err(self.park(id, signal, state)),
            }
        }

        match callee {
            Value::Native(native) => {
                if state.wait.is_none() && !native.arity.accepts(state.args.len()) {
                    return Err(raise_error(format!(
                        "{}() expects {} argument(s), got {}",
                        native.name,
                        native.arity,
                        state.args.len()
                    )));
                }
                let mut call = NativeCall {
                    args: std::mem::take(&mut state.args),
                    wait: state.wait.take(),
                };
                match (native.func)(self, &mut call) {
                    Ok(value) => Ok(value),
                    Err(signal) => {
                        state.args = call.args;
                        state.wait = call.wait;
                        Err(self.park(id, signal, state))
                    }
                }
            }
            Value::Function(function) => {
                let activation = match state.activation.take() {
                    Some(activation) => activation,
                    None => bind_parameters(&function, &state.args)?,
                };
                let depth = self.call_depth();
                if depth >= MAX_CALL_DEPTH {
                    return Err(raise_error(format!(
                        "maximum call depth exceeded in {}()",
                        function.name()
                    )));
                }
                self.set_call_depth(depth + 1);
                let result = self.eval(&function.ast, function.def.body, &activation);
                self.set_call_depth(depth);
                match result {
                    Ok(value) | Err(Signal::Return(value)) => Ok(value),
                    Err(Signal::Break(_)) | Err(Signal::Continue) => Err(raise_error(format!(
                        "break or continue escaped {}()",
                        function.name()
                    ))),
                    Err(signal) => {
                        state.activation = Some(activation);
                        Err(self.park(id, signal, state))
                    }
                }
            }
            other => Err(raise_error(format!(
                "value of type {} is not callable",
                other.type_name()
            ))),
        }
    }
}

fn bind_parameters(function: &Function, args: &[Value]) -> EvalResult<Environment> {
    let params = &function.def.params;
    if params.len() != args.len() {
        return Err(raise_error(format!(
            "{}() expects {} argument(s), got {}",
            function.name(),
            params.len(),
            args.len()
        )));
    }
    let activation = function.env.child();
    for (param, arg) in params.iter().zip(args) {
        activation.define(param.clone(), arg.clone());
    }
    Ok(activation)
}

/// Resolves `receiver.name(...)`. The flag says whether the receiver is
/// passed as the first argument.
///
/// Order: handle intrinsics, namespace members, then any function of that
/// name in scope (`ch.send(v)` is `send(ch, v)`).
fn resolve_method(receiver: &Value, name: &str, env: &Environment) -> EvalResult<(Value, bool)> {
    if let Value::Handle(_) = receiver {
        if let Some(intrinsic) = natives::handle_method(name) {
            return Ok((intrinsic, true));
        }
    }
    if let Value::Namespace(namespace) = receiver {
        return match namespace.members.get(name) {
            Some(member) => Ok((member.clone(), false)),
            None => Err(raise_error(format!(
                "{} has no member '{}'",
                namespace.name, name
            ))),
        };
    }
    match env.lookup(name) {
        Some(callee @ (Value::Function(_) | Value::Native(_))) => Ok((callee, true)),
        _ => Err(raise_error(format!(
            "no method '{}' for value of type {}",
            name,
            receiver.type_name()
        ))),
    }
}

fn member(target: &Value, name: &str) -> EvalResult {
    let found = match target {
        Value::Namespace(namespace) => namespace.members.get(name).cloned(),
        Value::Error(error) => error.member(name),
        _ => None,
    };
    found.ok_or_else(|| {
        raise_error(format!(
            "value of type {} has no member '{}'",
            target.type_name(),
            name
        ))
    })
}

fn index_value(target: &Value, key: &Value) -> EvalResult {
    let Value::Int(index) = key else {
        return Err(raise_error(format!(
            "index must be Int, got {}",
            key.type_name()
        )));
    };
    let found = match target {
        Value::Array(items) => usize::try_from(*index)
            .ok()
            .and_then(|i| items.borrow().get(i).cloned()),
        Value::String(text) => usize::try_from(*index)
            .ok()
            .and_then(|i| text.chars().nth(i))
            .map(|c| Value::from(c.to_string())),
        other => {
            return Err(raise_error(format!(
                "value of type {} is not indexable",
                other.type_name()
            )))
        }
    };
    found.ok_or_else(|| raise_error(format!("index {} out of bounds", index)))
}

fn cursor_over(collection: &Value) -> EvalResult<ValueCursor> {
    match collection {
        Value::Array(items) => Ok(ValueCursor::new(items.borrow().clone())),
        Value::String(text) => Ok(ValueCursor::new(
            text.chars().map(|c| Value::from(c.to_string())).collect(),
        )),
        other => Err(raise_error(format!(
            "value of type {} is not iterable",
            other.type_name()
        ))),
    }
}

fn unary(op: UnaryOp, value: &Value) -> EvalResult {
    match (op, value) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| raise_error("integer overflow")),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Neg, other) => Err(raise_error(format!(
            "cannot negate value of type {}",
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> EvalResult {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(left == right)),
        BinaryOp::Ne => return Ok(Value::Bool(left != right)),
        _ => {}
    }
    let unsupported = || {
        raise_error(format!(
            "unsupported operand types for {}: {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))
    };
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let checked = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                    return Err(raise_error("division by zero"))
                }
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem => a.checked_rem(b),
                BinaryOp::Lt => return Ok(Value::Bool(a < b)),
                BinaryOp::Le => return Ok(Value::Bool(a <= b)),
                BinaryOp::Gt => return Ok(Value::Bool(a > b)),
                BinaryOp::Ge => return Ok(Value::Bool(a >= b)),
                _ => return Err(unsupported()),
            };
            checked
                .map(Value::Int)
                .ok_or_else(|| raise_error("integer overflow"))
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (a, b) = (as_float(left), as_float(right));
            match op {
                BinaryOp::Add => Ok(Value::Float(a + b)),
                BinaryOp::Sub => Ok(Value::Float(a - b)),
                BinaryOp::Mul => Ok(Value::Float(a * b)),
                BinaryOp::Div => Ok(Value::Float(a / b)),
                BinaryOp::Rem => Ok(Value::Float(a % b)),
                BinaryOp::Lt => Ok(Value::Bool(a < b)),
                BinaryOp::Le => Ok(Value::Bool(a <= b)),
                BinaryOp::Gt => Ok(Value::Bool(a > b)),
                BinaryOp::Ge => Ok(Value::Bool(a >= b)),
                _ => Err(unsupported()),
            }
        }
        (Value::String(a), Value::String(b)) => match op {
            BinaryOp::Add => Ok(Value::from(format!("{}{}", a, b))),
            BinaryOp::Lt => Ok(Value::Bool(a < b)),
            BinaryOp::Le => Ok(Value::Bool(a <= b)),
            BinaryOp::Gt => Ok(Value::Bool(a > b)),
            BinaryOp::Ge => Ok(Value::Bool(a >= b)),
            _ => Err(unsupported()),
        },
        (Value::String(a), other) if op == BinaryOp::Add => {
            Ok(Value::from(format!("{}{}", a, other)))
        }
        (Value::Array(a), Value::Array(b)) if op == BinaryOp::Add => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::array(items))
        }
        _ => Err(unsupported()),
    }
}

fn as_float(value: &Value) -> f64 {
    match value {
        Value::Int(n) => *n as f64,
        Value::Float(x) => *x,
        _ => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RuntimeConfig, interpreter::ast::AstBuilder};

    fn eval_program(build: impl FnOnce(&AstBuilder) -> NodeId) -> Result<Value, String> {
        let b = AstBuilder::new();
        let root = build(&b);
        let ast = b.finish();
        let mut interp = Interpreter::new(RuntimeConfig::default());
        interp.run(&ast, root).map_err(|e| e.to_string())
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let value = eval_program(|b| b.add(b.int(2), b.binary(BinaryOp::Mul, b.int(3), b.int(4))));
        assert_eq!(value, Ok(Value::Int(14)));
        let value = eval_program(|b| b.lt(b.float(1.5), b.int(2)));
        assert_eq!(value, Ok(Value::Bool(true)));
    }

    #[test]
    fn test_division_by_zero_raises() {
        let value = eval_program(|b| b.binary(BinaryOp::Div, b.int(1), b.int(0)));
        assert_eq!(value, Err("Uncaught Error: Error: division by zero".to_string()));
    }

    #[test]
    fn test_while_with_break_value() {
        let value = eval_program(|b| {
            b.block(vec![
                b.define("i", b.int(0)),
                b.while_(
                    b.bool(true),
                    b.block(vec![
                        b.assign("i", b.add(b.ident("i"), b.int(1))),
                        b.if_(b.eq(b.ident("i"), b.int(5)), b.break_(Some(b.ident("i")))),
                    ]),
                ),
            ])
        });
        assert_eq!(value, Ok(Value::Int(5)));
    }

    #[test]
    fn test_for_over_array_and_string() {
        let value = eval_program(|b| {
            b.block(vec![
                b.define("acc", b.str("")),
                b.for_(
                    "c",
                    b.str("abc"),
                    b.assign("acc", b.add(b.ident("c"), b.ident("acc"))),
                ),
                b.ident("acc"),
            ])
        });
        assert_eq!(value, Ok(Value::from("cba")));
    }

    #[test]
    fn test_if_or_chain() {
        let value = eval_program(|b| {
            b.if_or(
                b.bool(false),
                b.int(1),
                vec![
                    b.or_clause(Some(b.bool(false)), b.int(2)),
                    b.or_clause(None, b.int(3)),
                ],
            )
        });
        assert_eq!(value, Ok(Value::Int(3)));
    }

    #[test]
    fn test_recursive_function() {
        let value = eval_program(|b| {
            let body = b.if_or(
                b.lt(b.ident("n"), b.int(2)),
                b.ident("n"),
                vec![b.or_clause(
                    None,
                    b.add(
                        b.call_named("fib", vec![b.sub(b.ident("n"), b.int(1))]),
                        b.call_named("fib", vec![b.sub(b.ident("n"), b.int(2))]),
                    ),
                )],
            );
            b.block(vec![
                b.function("fib", &["n"], body),
                b.call_named("fib", vec![b.int(10)]),
            ])
        });
        assert_eq!(value, Ok(Value::Int(55)));
    }

    #[test]
    fn test_rescue_catches_raise_only() {
        let value = eval_program(|b| {
            b.rescue(
                b.raise(b.str("boom")),
                vec![b.clause(
                    crate::interpreter::ast::Pattern::binding("e"),
                    None,
                    b.interpolate(vec![b.str("caught "), b.ident("e")]),
                )],
            )
        });
        assert_eq!(value, Ok(Value::from("caught boom")));
    }

    #[test]
    fn test_rescue_guard_selects_clause() {
        let value = eval_program(|b| {
            b.rescue(
                b.raise(b.str("disk full")),
                vec![
                    b.clause(
                        crate::interpreter::ast::Pattern::binding("e"),
                        Some(b.eq(b.ident("e"), b.str("timeout"))),
                        b.str("retry"),
                    ),
                    b.clause(
                        crate::interpreter::ast::Pattern::binding("e"),
                        Some(b.eq(b.ident("e"), b.str("disk full"))),
                        b.str("cleanup"),
                    ),
                ],
            )
        });
        assert_eq!(value, Ok(Value::from("cleanup")));
    }

    #[test]
    fn test_rescue_rethrows_when_no_guard_passes() {
        let value = eval_program(|b| {
            b.rescue(
                b.raise(b.str("boom")),
                vec![b.clause(
                    crate::interpreter::ast::Pattern::binding("e"),
                    Some(b.bool(false)),
                    b.str("swallowed"),
                )],
            )
        });
        let message = value.unwrap_err();
        assert!(message.contains("boom"), "{message}");
    }

    #[test]
    fn test_short_circuit_skips_right() {
        let value = eval_program(|b| {
            b.binary(
                BinaryOp::And,
                b.bool(false),
                b.raise(b.str("never evaluated")),
            )
        });
        assert_eq!(value, Ok(Value::Bool(false)));
    }

    #[test]
    fn test_method_call_uses_function_in_scope() {
        let value = eval_program(|b| {
            let body = b.add(b.ident("x"), b.ident("y"));
            b.block(vec![
                b.function("plus", &["x", "y"], body),
                b.method(b.int(40), "plus", vec![b.int(2)]),
            ])
        });
        assert_eq!(value, Ok(Value::Int(42)));
    }
}
