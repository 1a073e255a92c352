//! Tree-walking evaluator for parsed chunks.
//!
//! Locals live in [`Scope`] cells shared by reference with any closure that
//! captures them, so assignments after capture are visible on both sides.
//! Every block and every loop iteration gets a fresh scope.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use super::function::{Closure, Function};
use super::state::State;
use super::value::{format_number, Value};
use super::{VmError, VmResult};
use crate::parser::{BinOp, Block, Expr, FunctionBody, Stat, StatKind, TableField, UnOp};

/// A lexical scope.
pub(crate) struct Scope {
    vars: RefCell<Vec<(Rc<str>, Rc<RefCell<Value>>)>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    /// Scope with no parent, the environment of a loaded chunk.
    pub(crate) fn root() -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(Vec::new()),
            parent: None,
        })
    }

    fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(Vec::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    fn declare(&self, name: Rc<str>, value: Value) -> Rc<RefCell<Value>> {
        let cell = Rc::new(RefCell::new(value));
        self.vars.borrow_mut().push((name, Rc::clone(&cell)));
        cell
    }

    fn lookup(&self, name: &str) -> Option<Rc<RefCell<Value>>> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            let found = current
                .vars
                .borrow()
                .iter()
                .rev()
                .find(|(n, _)| &**n == name)
                .map(|(_, cell)| Rc::clone(cell));
            if found.is_some() {
                return found;
            }
            scope = current.parent.as_deref();
        }
        None
    }
}

enum Flow {
    Normal,
    Break,
    Return(Vec<Value>),
}

/// Run a script closure with `args` and return its results.
pub(crate) fn call_closure(
    state: &State,
    closure: &Closure,
    args: Vec<Value>,
) -> VmResult<Vec<Value>> {
    let saved = state.location();
    state.enter_chunk(&closure.chunk, closure.body.line);

    let scope = Scope::child(&closure.env);
    let mut args = args.into_iter();
    for param in &closure.body.params {
        scope.declare(Rc::clone(param), args.next().unwrap_or(Value::Nil));
    }
    let varargs = if closure.body.is_vararg {
        args.collect()
    } else {
        Vec::new()
    };

    let eval = Evaluator {
        state,
        chunk: &closure.chunk,
        varargs,
    };
    let result = eval.exec_stats(&closure.body.body.stats, &scope);
    state.set_location(saved);

    match result? {
        Flow::Return(values) => Ok(values),
        Flow::Normal | Flow::Break => Ok(Vec::new()),
    }
}

struct Evaluator<'a> {
    state: &'a State,
    chunk: &'a Rc<str>,
    varargs: Vec<Value>,
}

impl Evaluator<'_> {
    // ========================================================================
    // Statements
    // ========================================================================

    fn exec_block(&self, block: &Block, scope: &Rc<Scope>) -> VmResult<Flow> {
        let scope = Scope::child(scope);
        self.exec_stats(&block.stats, &scope)
    }

    fn exec_stats(&self, stats: &[Stat], scope: &Rc<Scope>) -> VmResult<Flow> {
        for stat in stats {
            self.state.set_line(stat.line);
            match self.exec(&stat.kind, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&self, stat: &StatKind, scope: &Rc<Scope>) -> VmResult<Flow> {
        match stat {
            StatKind::Local { names, exprs } => {
                let values = adjust(self.eval_list(exprs, scope)?, names.len());
                for (name, value) in names.iter().zip(values) {
                    scope.declare(Rc::clone(name), value);
                }
            }

            StatKind::Assign { targets, exprs } => {
                let values = adjust(self.eval_list(exprs, scope)?, targets.len());
                for (target, value) in targets.iter().zip(values) {
                    self.assign(target, value, scope)?;
                }
            }

            StatKind::Call(expr) => {
                self.eval_call(expr, scope)?;
            }

            StatKind::Do(block) => return self.exec_block(block, scope),

            StatKind::While { cond, body } => {
                while self.eval(cond, scope)?.is_truthy() {
                    match self.exec_block(body, scope)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }

            StatKind::Repeat { body, cond } => loop {
                let inner = Scope::child(scope);
                match self.exec_stats(&body.stats, &inner)? {
                    Flow::Normal => {}
                    Flow::Break => break,
                    flow @ Flow::Return(_) => return Ok(flow),
                }
                if self.eval(cond, &inner)?.is_truthy() {
                    break;
                }
            },

            StatKind::If {
                branches,
                otherwise,
            } => {
                for (cond, block) in branches {
                    if self.eval(cond, scope)?.is_truthy() {
                        return self.exec_block(block, scope);
                    }
                }
                if let Some(block) = otherwise {
                    return self.exec_block(block, scope);
                }
            }

            StatKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                let start = self.for_number(start, scope, "initial value")?;
                let limit = self.for_number(limit, scope, "limit")?;
                let step = match step {
                    Some(step) => self.for_number(step, scope, "step")?,
                    None => 1.0,
                };

                let mut i = start;
                while (step > 0.0 && i <= limit) || (step <= 0.0 && i >= limit) {
                    let inner = Scope::child(scope);
                    inner.declare(Rc::clone(var), Value::Number(i));
                    match self.exec_stats(&body.stats, &inner)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                    i += step;
                }
            }

            StatKind::GenericFor { names, exprs, body } => {
                let mut init = adjust(self.eval_list(exprs, scope)?, 3).into_iter();
                let func = init.next().unwrap_or(Value::Nil);
                let target = init.next().unwrap_or(Value::Nil);
                let mut control = init.next().unwrap_or(Value::Nil);

                loop {
                    let results = self.invoke(&func, vec![target.clone(), control.clone()], "")?;
                    let results = adjust(results, names.len());
                    if results[0].is_nil() {
                        break;
                    }
                    control = results[0].clone();

                    let inner = Scope::child(scope);
                    for (name, value) in names.iter().zip(results) {
                        inner.declare(Rc::clone(name), value);
                    }
                    match self.exec_stats(&body.stats, &inner)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }

            StatKind::Function { target, body } => {
                let closure = self.closure(body, scope);
                self.assign(target, closure, scope)?;
            }

            StatKind::LocalFunction { name, body } => {
                // Declared first so the body can refer to itself
                let cell = scope.declare(Rc::clone(name), Value::Nil);
                *cell.borrow_mut() = self.closure(body, scope);
            }

            StatKind::Return(exprs) => return Ok(Flow::Return(self.eval_list(exprs, scope)?)),

            StatKind::Break => return Ok(Flow::Break),
        }
        Ok(Flow::Normal)
    }

    fn for_number(&self, expr: &Expr, scope: &Rc<Scope>, what: &str) -> VmResult<f64> {
        self.eval(expr, scope)?
            .to_number()
            .ok_or_else(|| self.state.runtime_error(format!("'for' {} must be a number", what)))
    }

    fn assign(&self, target: &Expr, value: Value, scope: &Rc<Scope>) -> VmResult<()> {
        match target {
            Expr::Name(name) => match scope.lookup(name) {
                Some(cell) => {
                    *cell.borrow_mut() = value;
                    Ok(())
                }
                None => {
                    let globals = Value::Table(self.state.globals());
                    self.state
                        .set_index(&globals, Value::String(Rc::clone(name)), value)
                }
            },
            Expr::Index { object, key } => {
                let obj = self.eval(object, scope)?;
                let key = self.eval(key, scope)?;
                if !matches!(obj, Value::Table(_))
                    && self.state.metamethod(&obj, "__newindex").is_nil()
                {
                    return Err(self.index_error(&obj, object, scope));
                }
                self.state.set_index(&obj, key, value)
            }
            _ => Err(self.state.runtime_error("cannot assign to this expression")),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn eval(&self, expr: &Expr, scope: &Rc<Scope>) -> VmResult<Value> {
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::True => Ok(Value::Boolean(true)),
            Expr::False => Ok(Value::Boolean(false)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(Rc::clone(s))),
            Expr::VarArgs => Ok(self.varargs.first().cloned().unwrap_or(Value::Nil)),
            Expr::Function(body) => Ok(self.closure(body, scope)),

            Expr::Name(name) => match scope.lookup(name) {
                Some(cell) => Ok(cell.borrow().clone()),
                None => {
                    let globals = Value::Table(self.state.globals());
                    self.state
                        .index(&globals, &Value::String(Rc::clone(name)))
                }
            },

            Expr::Index { object, key } => {
                let obj = self.eval(object, scope)?;
                let key = self.eval(key, scope)?;
                self.index(&obj, &key, object, scope)
            }

            Expr::Call { .. } | Expr::MethodCall { .. } => Ok(self
                .eval_call(expr, scope)?
                .into_iter()
                .next()
                .unwrap_or(Value::Nil)),

            Expr::Table(fields) => self.table(fields, scope),

            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::And => {
                    let a = self.eval(lhs, scope)?;
                    if a.is_truthy() {
                        self.eval(rhs, scope)
                    } else {
                        Ok(a)
                    }
                }
                BinOp::Or => {
                    let a = self.eval(lhs, scope)?;
                    if a.is_truthy() {
                        Ok(a)
                    } else {
                        self.eval(rhs, scope)
                    }
                }
                _ => {
                    let a = self.eval(lhs, scope)?;
                    let b = self.eval(rhs, scope)?;
                    self.binary(*op, a, b, lhs, rhs, scope)
                }
            },

            Expr::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                self.unary(*op, value, operand, scope)
            }

            Expr::Paren(inner) => self.eval(inner, scope),
        }
    }

    /// Evaluate an expression keeping every value it produces.
    fn eval_multi(&self, expr: &Expr, scope: &Rc<Scope>) -> VmResult<Vec<Value>> {
        match expr {
            Expr::Call { .. } | Expr::MethodCall { .. } => self.eval_call(expr, scope),
            Expr::VarArgs => Ok(self.varargs.clone()),
            other => Ok(vec![self.eval(other, scope)?]),
        }
    }

    /// Evaluate an expression list; only the last expression is expanded.
    fn eval_list(&self, exprs: &[Expr], scope: &Rc<Scope>) -> VmResult<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for (i, expr) in exprs.iter().enumerate() {
            if i + 1 == exprs.len() && expr.is_multi() {
                values.extend(self.eval_multi(expr, scope)?);
            } else {
                values.push(self.eval(expr, scope)?);
            }
        }
        Ok(values)
    }

    fn eval_call(&self, expr: &Expr, scope: &Rc<Scope>) -> VmResult<Vec<Value>> {
        match expr {
            Expr::Call { func, args, line } => {
                let callee = self.eval(func, scope)?;
                let args = self.eval_list(args, scope)?;
                self.state.set_line(*line);
                self.invoke(&callee, args, &self.describe(func, scope))
            }
            Expr::MethodCall {
                object,
                method,
                args,
                line,
            } => {
                let obj = self.eval(object, scope)?;
                let callee =
                    self.index(&obj, &Value::String(Rc::clone(method)), object, scope)?;
                let mut full = vec![obj];
                full.extend(self.eval_list(args, scope)?);
                self.state.set_line(*line);
                self.invoke(&callee, full, &format!(" (method '{}')", method))
            }
            other => Ok(vec![self.eval(other, scope)?]),
        }
    }

    fn invoke(&self, callee: &Value, args: Vec<Value>, what: &str) -> VmResult<Vec<Value>> {
        if !matches!(callee, Value::Function(_)) && self.state.metamethod(callee, "__call").is_nil()
        {
            return Err(self.state.runtime_error(format!(
                "attempt to call a {} value{}",
                callee.type_name(),
                what
            )));
        }
        self.state.call_value(callee, args)
    }

    fn index(&self, obj: &Value, key: &Value, expr: &Expr, scope: &Rc<Scope>) -> VmResult<Value> {
        if !matches!(obj, Value::Table(_)) && self.state.metamethod(obj, "__index").is_nil() {
            return Err(self.index_error(obj, expr, scope));
        }
        self.state.index(obj, key)
    }

    fn index_error(&self, obj: &Value, expr: &Expr, scope: &Rc<Scope>) -> VmError {
        self.state.runtime_error(format!(
            "attempt to index a {} value{}",
            obj.type_name(),
            self.describe(expr, scope)
        ))
    }

    /// `" (global 'x')"` style suffix for error messages.
    fn describe(&self, expr: &Expr, scope: &Rc<Scope>) -> String {
        let what = match expr {
            Expr::Name(name) if scope.lookup(name).is_some() => Some(format!("local '{}'", name)),
            other => other.describe(),
        };
        what.map(|w| format!(" ({})", w)).unwrap_or_default()
    }

    fn closure(&self, body: &Rc<FunctionBody>, scope: &Rc<Scope>) -> Value {
        Value::Function(Function::Script(Rc::new(Closure {
            body: Rc::clone(body),
            env: Rc::clone(scope),
            chunk: Rc::clone(self.chunk),
        })))
    }

    fn table(&self, fields: &[TableField], scope: &Rc<Scope>) -> VmResult<Value> {
        let table = self.state.create_table()?;
        let mut position = 1.0;
        for (i, field) in fields.iter().enumerate() {
            let entries = match field {
                TableField::Positional(expr) if i + 1 == fields.len() && expr.is_multi() => {
                    let values = self.eval_multi(expr, scope)?;
                    let mut entries = Vec::with_capacity(values.len());
                    for value in values {
                        entries.push((Value::Number(position), value));
                        position += 1.0;
                    }
                    entries
                }
                TableField::Positional(expr) => {
                    let entry = (Value::Number(position), self.eval(expr, scope)?);
                    position += 1.0;
                    vec![entry]
                }
                TableField::Named(name, expr) => {
                    vec![(Value::String(Rc::clone(name)), self.eval(expr, scope)?)]
                }
                TableField::Keyed(key, expr) => {
                    let key = self.eval(key, scope)?;
                    vec![(key, self.eval(expr, scope)?)]
                }
            };
            for (key, value) in entries {
                let result = table.borrow_mut().set(key, value);
                result.map_err(|e| self.state.locate(e))?;
            }
        }
        Ok(Value::Table(table))
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn binary(
        &self,
        op: BinOp,
        a: Value,
        b: Value,
        lhs: &Expr,
        rhs: &Expr,
        scope: &Rc<Scope>,
    ) -> VmResult<Value> {
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                if let (Some(x), Some(y)) = (a.to_number(), b.to_number()) {
                    return Ok(Value::Number(arith(op, x, y)));
                }
                if let Some(result) = self.try_metamethod(arith_event(op), &a, &b)? {
                    return Ok(result);
                }
                let (bad, expr) = if a.to_number().is_none() {
                    (&a, lhs)
                } else {
                    (&b, rhs)
                };
                Err(self.state.runtime_error(format!(
                    "attempt to perform arithmetic on a {} value{}",
                    bad.type_name(),
                    self.describe(expr, scope)
                )))
            }

            BinOp::Concat => {
                if let (Some(x), Some(y)) = (concat_part(&a), concat_part(&b)) {
                    self.state.check_memory(x.len() + y.len())?;
                    return Ok(Value::from(format!("{}{}", x, y)));
                }
                if let Some(result) = self.try_metamethod("__concat", &a, &b)? {
                    return Ok(result);
                }
                let (bad, expr) = if concat_part(&a).is_none() {
                    (&a, lhs)
                } else {
                    (&b, rhs)
                };
                Err(self.state.runtime_error(format!(
                    "attempt to concatenate a {} value{}",
                    bad.type_name(),
                    self.describe(expr, scope)
                )))
            }

            BinOp::Eq => Ok(Value::Boolean(self.state.equals(&a, &b)?)),
            BinOp::Ne => Ok(Value::Boolean(!self.state.equals(&a, &b)?)),
            BinOp::Lt => self.compare(&a, &b, "__lt", |o| o == Ordering::Less),
            BinOp::Le => self.compare(&a, &b, "__le", |o| o != Ordering::Greater),
            BinOp::Gt => self.compare(&b, &a, "__lt", |o| o == Ordering::Less),
            BinOp::Ge => self.compare(&b, &a, "__le", |o| o != Ordering::Greater),

            BinOp::And | BinOp::Or => unreachable!("short-circuit operators are evaluated lazily"),
        }
    }

    fn compare(
        &self,
        a: &Value,
        b: &Value,
        event: &str,
        test: impl Fn(Ordering) -> bool,
    ) -> VmResult<Value> {
        let ordering = match (a, b) {
            (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
            (Value::String(x), Value::String(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
            _ => {
                if let Some(result) = self.try_metamethod(event, a, b)? {
                    return Ok(Value::Boolean(result.is_truthy()));
                }
                let message = if a.type_name() == b.type_name() {
                    format!("attempt to compare two {} values", a.type_name())
                } else {
                    format!("attempt to compare {} with {}", a.type_name(), b.type_name())
                };
                return Err(self.state.runtime_error(message));
            }
        };
        // NaN compares false in every direction
        Ok(Value::Boolean(ordering.is_some_and(test)))
    }

    fn unary(&self, op: UnOp, value: Value, expr: &Expr, scope: &Rc<Scope>) -> VmResult<Value> {
        match op {
            UnOp::Not => Ok(Value::Boolean(!value.is_truthy())),
            UnOp::Neg => {
                if let Some(n) = value.to_number() {
                    return Ok(Value::Number(-n));
                }
                if let Some(result) = self.try_metamethod("__unm", &value, &value)? {
                    return Ok(result);
                }
                Err(self.state.runtime_error(format!(
                    "attempt to perform arithmetic on a {} value{}",
                    value.type_name(),
                    self.describe(expr, scope)
                )))
            }
            UnOp::Len => match &value {
                Value::String(s) => Ok(Value::Number(s.len() as f64)),
                Value::Table(t) => Ok(Value::Number(t.borrow().len() as f64)),
                other => {
                    if let Some(result) = self.try_metamethod("__len", other, &Value::Nil)? {
                        return Ok(result);
                    }
                    Err(self.state.runtime_error(format!(
                        "attempt to get length of a {} value{}",
                        other.type_name(),
                        self.describe(expr, scope)
                    )))
                }
            },
        }
    }

    /// Call the `event` handler of `a` (or else `b`) if either has one.
    fn try_metamethod(&self, event: &str, a: &Value, b: &Value) -> VmResult<Option<Value>> {
        let mut handler = self.state.metamethod(a, event);
        if handler.is_nil() {
            handler = self.state.metamethod(b, event);
        }
        if handler.is_nil() {
            return Ok(None);
        }
        let results = self.state.call_value(&handler, vec![a.clone(), b.clone()])?;
        Ok(Some(results.into_iter().next().unwrap_or(Value::Nil)))
    }
}

/// Pad with nil or truncate to exactly `n` values.
fn adjust(mut values: Vec<Value>, n: usize) -> Vec<Value> {
    values.resize(n, Value::Nil);
    values
}

fn arith(op: BinOp, x: f64, y: f64) -> f64 {
    match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::Mod => x - (x / y).floor() * y,
        BinOp::Pow => x.powf(y),
        _ => f64::NAN,
    }
}

fn arith_event(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "__add",
        BinOp::Sub => "__sub",
        BinOp::Mul => "__mul",
        BinOp::Div => "__div",
        BinOp::Mod => "__mod",
        _ => "__pow",
    }
}

fn concat_part(value: &Value) -> Option<Rc<str>> {
    match value {
        Value::String(s) => Some(Rc::clone(s)),
        Value::Number(n) => Some(Rc::from(format_number(*n))),
        _ => None,
    }
}
