use crate::language::ast::{BinaryOp, Expr, ExprKind, Stmt, UnaryOp};
use crate::runtime::{
    environment::{forcing_on_this_thread, Environment},
    error::{InterpreterFault, Location, RuntimeError, RuntimeResult},
    tasks::{CancelToken, Task, ThreadHandle, WORKER_STACK_SIZE},
    value::{Closure, FType, MethodDef, ObjectValue, Value},
};
use rayon::prelude::*;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Worker stack one nested `eval` may use, call frames in between included.
const FRAME_BUDGET: usize = 64 * 1024;

/// Deepest expression nesting allowed on one thread.
pub const MAX_EVAL_DEPTH: usize = WORKER_STACK_SIZE / FRAME_BUDGET;

thread_local! {
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter(site: impl FnOnce() -> Location) -> RuntimeResult<Self> {
        EVAL_DEPTH.with(|depth| {
            if depth.get() >= MAX_EVAL_DEPTH {
                return Err(InterpreterFault::program(
                    site(),
                    RuntimeError::StackOverflow {
                        depth: MAX_EVAL_DEPTH,
                    },
                ));
            }
            depth.set(depth.get() + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        EVAL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Tree-walking evaluator. Cheap to create; one per task or forced thunk.
#[derive(Clone, Debug)]
pub struct Evaluator {
    cancel: CancelToken,
    task: String,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            task: "<top level>".into(),
        }
    }

    pub fn for_task(task: &Task) -> Self {
        Self {
            cancel: task.cancel_token().clone(),
            task: task.name().to_string(),
        }
    }

    pub fn with_cancel(task: &str, cancel: CancelToken) -> Self {
        Self {
            cancel,
            task: task.to_string(),
        }
    }

    pub fn eval(&self, expr: &Expr, env: &Arc<Environment>) -> RuntimeResult<Value> {
        let _depth = DepthGuard::enter(|| Location::at(env.unit(), expr.span))?;
        self.eval_expression(expr, env)
            .map_err(|fault| fault.located(env.unit(), expr.span))
    }

    fn eval_expression(&self, expr: &Expr, env: &Arc<Environment>) -> RuntimeResult<Value> {
        let site = || Location::at(env.unit(), expr.span);
        match &expr.kind {
            ExprKind::Unit => Ok(Value::Unit),
            ExprKind::Int(value) => Ok(Value::Int(*value)),
            ExprKind::Bool(value) => Ok(Value::Bool(*value)),
            ExprKind::Str(value) => Ok(Value::Str(value.clone())),
            ExprKind::Ident(name) => env.lookup(name),
            ExprKind::SelfRef => env.lookup("self"),
            ExprKind::Tuple(items) => Ok(Value::Tuple(self.eval_arguments(items, env)?)),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand, env)?;
                self.eval_unary(*op, value, site())
            }
            ExprKind::Binary { op, left, right } => match op {
                BinaryOp::And | BinaryOp::Or => {
                    let lhs = self.expect_bool(self.eval(left, env)?, site())?;
                    if (*op == BinaryOp::And) != lhs {
                        return Ok(Value::Bool(lhs));
                    }
                    let rhs = self.expect_bool(self.eval(right, env)?, site())?;
                    Ok(Value::Bool(rhs))
                }
                _ => {
                    let lhs = self.eval(left, env)?;
                    let rhs = self.eval(right, env)?;
                    self.eval_binary(*op, lhs, rhs, site())
                }
            },
            ExprKind::Call { callee, args } => {
                let function = self.eval(callee, env)?;
                let args = self.eval_arguments(args, env)?;
                self.call_value(&function, args, &site())
            }
            ExprKind::MethodCall {
                receiver,
                method,
                args,
            } => {
                let receiver = self.eval(receiver, env)?;
                let args = self.eval_arguments(args, env)?;
                self.invoke_method(receiver, method, args, &site())
            }
            ExprKind::Field { target, name } => {
                let target = self.eval(target, env)?;
                self.read_field(&target, name, site())
            }
            ExprKind::Assign { name, value } => {
                let value = self.eval(value, env)?;
                env.assign(name, value)?;
                Ok(Value::Unit)
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.expect_bool(self.eval(cond, env)?, site())?;
                if cond {
                    self.eval(then_branch, env)
                } else if let Some(branch) = else_branch {
                    self.eval(branch, env)
                } else {
                    Ok(Value::Unit)
                }
            }
            ExprKind::While { cond, body } => {
                loop {
                    self.check_cancelled(&site())?;
                    if !self.expect_bool(self.eval(cond, env)?, site())? {
                        break;
                    }
                    self.eval(body, env)?;
                }
                Ok(Value::Unit)
            }
            ExprKind::Block { stmts, result } => {
                let scope = env.extend();
                for stmt in stmts {
                    match stmt {
                        Stmt::Let {
                            name,
                            mutable,
                            value,
                            span,
                        } => {
                            let value = self.eval(value, &scope)?;
                            scope
                                .bind(name, value, *mutable)
                                .map_err(|fault| fault.located(env.unit(), *span))?;
                        }
                        Stmt::Expr(expr) => {
                            self.eval(expr, &scope)?;
                        }
                    }
                }
                match result {
                    Some(result) => self.eval(result, &scope),
                    None => Ok(Value::Unit),
                }
            }
            ExprKind::Spawn(body) => {
                let body = body.clone();
                let scope = env.clone();
                let name = format!("spawn@{}", site());
                let task_name = name.clone();
                let handle = ThreadHandle::spawn(
                    &name,
                    Box::new(move |token: &CancelToken| {
                        Evaluator::with_cancel(&task_name, token.clone()).eval(&body, &scope)
                    }),
                )?;
                Ok(Value::Thread(handle))
            }
            ExprKind::Throw(value) => {
                let value = self.eval(value, env)?;
                Err(InterpreterFault::program(
                    site(),
                    RuntimeError::Thrown {
                        message: value.to_string(),
                    },
                ))
            }
            ExprKind::Try {
                body,
                binder,
                handler,
            } => match self.eval(body, env) {
                Ok(value) => Ok(value),
                Err(fault) if fault.is_bug() || fault.is_cancellation() => Err(fault),
                Err(fault) => {
                    let scope = env.extend();
                    scope.bind(binder, Value::Str(fault.message()), false)?;
                    self.eval(handler, &scope)
                }
            },
        }
    }

    /// Tuple items and call arguments. On a worker they are evaluated in
    /// parallel, except while this thread is forcing an initializer; the
    /// first failure in argument order wins.
    fn eval_arguments(&self, args: &[Expr], env: &Arc<Environment>) -> RuntimeResult<Vec<Value>> {
        if args.len() < 2 || rayon::current_thread_index().is_none() || forcing_on_this_thread() {
            return args.iter().map(|arg| self.eval(arg, env)).collect();
        }
        let outcomes: Vec<RuntimeResult<Value>> = args.par_iter().map(|arg| self.eval(arg, env)).collect();
        outcomes.into_iter().collect()
    }

    fn check_cancelled(&self, site: &Location) -> RuntimeResult<()> {
        if self.cancel.is_cancelled() {
            Err(InterpreterFault::program(
                site.clone(),
                RuntimeError::Cancelled {
                    task: self.task.clone(),
                },
            ))
        } else {
            Ok(())
        }
    }

    /// Applies any callable value: closures, natives, constructors and
    /// functional-method sets.
    pub fn call_value(&self, callee: &Value, args: Vec<Value>, site: &Location) -> RuntimeResult<Value> {
        self.check_cancelled(site)?;
        match callee {
            Value::Closure(closure) => self.call_closure(closure, args, site),
            Value::Native(native) => {
                if let Some(expected) = native.arity {
                    expect_arity(&native.name, expected, args.len(), site)?;
                }
                (native.func)(&args).map_err(|error| InterpreterFault::program(site.clone(), error))
            }
            Value::Constructor(ty) => self.construct(ty, args, site),
            Value::Functional(set) => {
                let Some(receiver) = args.first().cloned() else {
                    return Err(program_error(
                        site,
                        RuntimeError::ArityMismatch {
                            name: set.name.clone(),
                            expected: 1,
                            received: 0,
                        },
                    ));
                };
                if let Some(entry) = set.select(&receiver)? {
                    let rest = args[1..].to_vec();
                    return self.call_method(&entry.owner, &entry.method, receiver, rest, site);
                }
                if let Value::Object(object) = &receiver {
                    if let Some(found) = object.ty.find_method(&set.name) {
                        if found.method.functional && !found.method.is_abstract() {
                            let rest = args[1..].to_vec();
                            return self.call_method(&found.owner, &found.method, receiver, rest, site);
                        }
                    }
                }
                Err(program_error(
                    site,
                    RuntimeError::NoApplicableMethod {
                        name: set.name.clone(),
                        receiver: receiver.type_name(),
                    },
                ))
            }
            other => Err(program_error(
                site,
                RuntimeError::NotCallable {
                    found: other.type_name(),
                },
            )),
        }
    }

    fn call_closure(&self, closure: &Closure, args: Vec<Value>, site: &Location) -> RuntimeResult<Value> {
        expect_arity(&closure.name, closure.params.len(), args.len(), site)?;
        let scope = closure.scope()?.extend();
        for (param, arg) in closure.params.iter().zip(args) {
            scope.bind(param, arg, false)?;
        }
        self.eval(&closure.body, &scope)
    }

    fn construct(&self, ty: &Arc<FType>, args: Vec<Value>, site: &Location) -> RuntimeResult<Value> {
        let FType::Object(object) = ty.as_ref() else {
            return Err(program_error(
                site,
                RuntimeError::NotCallable {
                    found: format!("trait {}", ty.name()),
                },
            ));
        };
        let params = object.params.clone().unwrap_or_default();
        expect_arity(ty.name(), params.len(), args.len(), site)?;
        let fields: BTreeMap<String, Value> = params.into_iter().zip(args).collect();
        Ok(Value::Object(Arc::new(ObjectValue {
            ty: ty.clone(),
            fields,
        })))
    }

    /// Runs `method` as declared on `owner` with `self` bound to `receiver`.
    pub fn call_method(
        &self,
        owner: &Arc<FType>,
        method: &MethodDef,
        receiver: Value,
        args: Vec<Value>,
        site: &Location,
    ) -> RuntimeResult<Value> {
        self.check_cancelled(site)?;
        let Some(body) = &method.body else {
            return Err(program_error(
                site,
                RuntimeError::NoApplicableMethod {
                    name: method.name.clone(),
                    receiver: receiver.type_name(),
                },
            ));
        };
        let Some(core) = owner.core() else {
            return Err(InterpreterFault::bug(format!(
                "method `{}` attached to builtin type `{}`",
                method.name,
                owner.name()
            )));
        };
        let params = method.explicit_params();
        expect_arity(&method.name, params.len(), args.len(), site)?;
        let scope = core.scope()?.extend();
        scope.bind("self", receiver, false)?;
        for (param, arg) in params.iter().zip(args) {
            scope.bind(param, arg, false)?;
        }
        self.eval(body, &scope)
    }

    fn invoke_method(
        &self,
        receiver: Value,
        name: &str,
        args: Vec<Value>,
        site: &Location,
    ) -> RuntimeResult<Value> {
        match &receiver {
            Value::Thread(handle) => {
                expect_arity(name, 0, args.len(), site)?;
                match name {
                    "val" => handle.task.wait_for_result(),
                    "wait" => {
                        handle.task.wait();
                        Ok(Value::Unit)
                    }
                    "ready" => Ok(Value::Bool(handle.task.is_done())),
                    "stop" => {
                        handle.stop();
                        Ok(Value::Unit)
                    }
                    _ => Err(no_method(site, name, &receiver)),
                }
            }
            Value::Object(object) => match object.ty.find_method(name) {
                Some(found) => {
                    self.call_method(&found.owner, &found.method, receiver.clone(), args, site)
                }
                None => match object.fields.get(name) {
                    Some(field) => self.call_value(field, args, site),
                    None => Err(no_method(site, name, &receiver)),
                },
            },
            _ => Err(no_method(site, name, &receiver)),
        }
    }

    fn read_field(&self, target: &Value, name: &str, site: Location) -> RuntimeResult<Value> {
        match target {
            Value::Object(object) => match object.fields.get(name) {
                Some(value) => Ok(value.clone()),
                None => Err(InterpreterFault::program(
                    site,
                    RuntimeError::UnknownField {
                        name: name.to_string(),
                        receiver: target.type_name(),
                    },
                )),
            },
            Value::Tuple(items) => name
                .strip_prefix('_')
                .and_then(|index| index.parse::<usize>().ok())
                .and_then(|index| items.get(index).cloned())
                .ok_or_else(|| {
                    InterpreterFault::program(
                        site,
                        RuntimeError::UnknownField {
                            name: name.to_string(),
                            receiver: target.type_name(),
                        },
                    )
                }),
            _ => Err(InterpreterFault::program(
                site,
                RuntimeError::UnknownField {
                    name: name.to_string(),
                    receiver: target.type_name(),
                },
            )),
        }
    }

    fn expect_bool(&self, value: Value, site: Location) -> RuntimeResult<bool> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(InterpreterFault::program(
                site,
                RuntimeError::TypeMismatch {
                    expected: "bool".into(),
                    found: other.type_name(),
                },
            )),
        }
    }

    fn eval_unary(&self, op: UnaryOp, value: Value, site: Location) -> RuntimeResult<Value> {
        match (op, value) {
            (UnaryOp::Neg, Value::Int(v)) => v.checked_neg().map(Value::Int).ok_or_else(|| {
                InterpreterFault::program(site, RuntimeError::IntegerOverflow { op: "-".into() })
            }),
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, other) => Err(type_mismatch(site, "int", &other)),
            (UnaryOp::Not, other) => Err(type_mismatch(site, "bool", &other)),
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: Value, right: Value, site: Location) -> RuntimeResult<Value> {
        use BinaryOp::*;
        match op {
            Add => match (left, right) {
                (Value::Str(a), b) => Ok(Value::Str(format!("{a}{b}"))),
                (a, Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
                (a, b) => self.eval_numeric(op, a, b, site),
            },
            Sub | Mul | Div | Rem => self.eval_numeric(op, left, right, site),
            Eq => Ok(Value::Bool(left.equals(&right))),
            NotEq => Ok(Value::Bool(!left.equals(&right))),
            Lt => self.eval_compare(left, right, site, |o| o.is_lt()),
            LtEq => self.eval_compare(left, right, site, |o| o.is_le()),
            Gt => self.eval_compare(left, right, site, |o| o.is_gt()),
            GtEq => self.eval_compare(left, right, site, |o| o.is_ge()),
            And | Or => Err(InterpreterFault::bug("logical operator reached eager evaluation")),
        }
    }

    fn eval_numeric(&self, op: BinaryOp, left: Value, right: Value, site: Location) -> RuntimeResult<Value> {
        let (a, b) = match (left, right) {
            (Value::Int(a), Value::Int(b)) => (a, b),
            (Value::Int(_), other) | (other, _) => return Err(type_mismatch(site, "int", &other)),
        };
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                return Err(InterpreterFault::program(site, RuntimeError::DivisionByZero))
            }
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Rem => a.checked_rem(b),
            _ => return Err(InterpreterFault::bug("non-arithmetic operator in eval_numeric")),
        };
        result.map(Value::Int).ok_or_else(|| {
            InterpreterFault::program(
                site,
                RuntimeError::IntegerOverflow {
                    op: op.symbol().into(),
                },
            )
        })
    }

    fn eval_compare<F>(&self, left: Value, right: Value, site: Location, cmp: F) -> RuntimeResult<Value>
    where
        F: Fn(std::cmp::Ordering) -> bool,
    {
        match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Bool(cmp(a.cmp(&b)))),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(cmp(a.cmp(&b)))),
            (Value::Int(_), other) => Err(type_mismatch(site, "int", &other)),
            (Value::Str(_), other) => Err(type_mismatch(site, "string", &other)),
            (other, _) => Err(type_mismatch(site, "int or string", &other)),
        }
    }
}

fn expect_arity(name: &str, expected: usize, received: usize, site: &Location) -> RuntimeResult<()> {
    if expected == received {
        Ok(())
    } else {
        Err(program_error(
            site,
            RuntimeError::ArityMismatch {
                name: name.to_string(),
                expected,
                received,
            },
        ))
    }
}

fn program_error(site: &Location, error: RuntimeError) -> InterpreterFault {
    InterpreterFault::program(site.clone(), error)
}

fn type_mismatch(site: Location, expected: &str, found: &Value) -> InterpreterFault {
    InterpreterFault::program(
        site,
        RuntimeError::TypeMismatch {
            expected: expected.to_string(),
            found: found.type_name(),
        },
    )
}

fn no_method(site: &Location, name: &str, receiver: &Value) -> InterpreterFault {
    program_error(
        site,
        RuntimeError::NoApplicableMethod {
            name: name.to_string(),
            receiver: receiver.type_name(),
        },
    )
}
