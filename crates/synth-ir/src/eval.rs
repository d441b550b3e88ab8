use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::exp::{BinOp, Exp, ExpKind, Lambda, UnOp};
use crate::pretty::pprint;
use crate::types::Type;
use crate::value::{FuncTable, MapValue, Value};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("unbound variable {name}")]
    Unbound { name: String },
    #[error("no interpretation for function {name}")]
    UnknownFunction { name: String },
    #[error("cannot evaluate {expr}: {message}")]
    IllTyped { expr: String, message: String },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Env {
    pub vars: BTreeMap<String, Value>,
    pub funcs: BTreeMap<String, FuncTable>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn with_func(
        mut self,
        name: &str,
        arg_types: &[Type],
        result: &Type,
        table: FuncTable,
    ) -> Self {
        self.funcs.insert(func_key(name, arg_types, result), table);
        self
    }
}

/// Key of a witness table in [`Env::funcs`]. Calls of one name at different
/// types are different functions.
pub fn func_key(name: &str, arg_types: &[Type], result: &Type) -> String {
    let args = arg_types
        .iter()
        .map(Type::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{name}({args}) -> {result}")
}

/// Anything that can evaluate an expression to a concrete value.
pub trait Oracle {
    fn evaluate(&self, e: &Exp, env: &Env) -> Result<Value, EvalError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Interpreter;

impl Oracle for Interpreter {
    fn evaluate(&self, e: &Exp, env: &Env) -> Result<Value, EvalError> {
        eval(e, env)
    }
}

#[tracing::instrument(level = "trace", skip_all)]
pub fn eval(e: &Exp, env: &Env) -> Result<Value, EvalError> {
    Evaluator {
        env,
        locals: Vec::new(),
    }
    .eval(e)
}

struct Evaluator<'a> {
    env: &'a Env,
    locals: Vec<(String, Value)>,
}

fn ill_typed(e: &Exp, message: impl Into<String>) -> EvalError {
    EvalError::IllTyped {
        expr: pprint(e),
        message: message.into(),
    }
}

fn bits(value: i64, width: u32) -> u64 {
    if width >= 64 {
        value as u64
    } else {
        (value as u64) & ((1u64 << width) - 1)
    }
}

impl Evaluator<'_> {
    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .or_else(|| self.env.vars.get(name).cloned())
            .ok_or_else(|| EvalError::Unbound {
                name: name.to_string(),
            })
    }

    fn apply(&mut self, f: &Lambda, arg: Value) -> Result<Value, EvalError> {
        self.locals.push((f.arg.clone(), arg));
        let result = self.eval(&f.body);
        self.locals.pop();
        result
    }

    fn eval_bag(&mut self, e: &Exp) -> Result<Vec<Value>, EvalError> {
        match self.eval(e)? {
            Value::Bag(elems) => Ok(elems),
            other => Err(ill_typed(e, format!("expected a bag, got {other}"))),
        }
    }

    fn eval_bool(&mut self, e: &Exp) -> Result<bool, EvalError> {
        match self.eval(e)? {
            Value::Bool(b) => Ok(b),
            other => Err(ill_typed(e, format!("expected a boolean, got {other}"))),
        }
    }

    fn eval(&mut self, e: &Exp) -> Result<Value, EvalError> {
        trace!(expr = %e, "Evaluating expression");
        match &e.kind {
            ExpKind::Var(name) => self.lookup(name),
            ExpKind::Bool(b) => Ok(Value::Bool(*b)),
            ExpKind::Num(n) => match e.ty {
                Type::BitVec(width) => Ok(Value::BitVec {
                    value: bits(*n, width),
                    width,
                }),
                _ => Ok(Value::Int(*n)),
            },
            ExpKind::Str(s) => Ok(Value::Str(s.clone())),
            ExpKind::EnumEntry(case) => Ok(Value::Enum(case.clone())),
            ExpKind::Null => Ok(Value::Maybe(None)),
            ExpKind::Just(x) => Ok(Value::Maybe(Some(Box::new(self.eval(x)?)))),
            ExpKind::Call { func, args } => {
                let arg_types = args.iter().map(|a| a.ty.clone()).collect::<Vec<_>>();
                let key = func_key(func, &arg_types, &e.ty);
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                let table = self
                    .env
                    .funcs
                    .get(&key)
                    .ok_or(EvalError::UnknownFunction { name: key })?;
                Ok(table.apply(&args).unwrap_or(&table.default).clone())
            }
            ExpKind::Tuple(es) => Ok(Value::Tuple(
                es.iter()
                    .map(|x| self.eval(x))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            ExpKind::TupleGet(x, i) => match self.eval(x)? {
                Value::Tuple(mut items) if *i < items.len() => Ok(items.swap_remove(*i)),
                other => Err(ill_typed(e, format!("no component {i} in {other}"))),
            },
            ExpKind::MakeRecord(fields) => Ok(Value::Record(
                fields
                    .iter()
                    .map(|(name, x)| Ok((name.clone(), self.eval(x)?)))
                    .collect::<Result<Vec<_>, EvalError>>()?,
            )),
            ExpKind::GetField(x, field) => match self.eval(x)? {
                Value::Handle { value, .. } if field == "val" => Ok(*value),
                Value::Record(fields) => fields
                    .into_iter()
                    .find(|(name, _)| name == field)
                    .map(|(_, v)| v)
                    .ok_or_else(|| ill_typed(e, format!("no field {field}"))),
                other => Err(ill_typed(e, format!("no field {field} in {other}"))),
            },
            ExpKind::Unary(op, x) => self.eval_unary(e, *op, x),
            ExpKind::Binary(op, a, b) => self.eval_binary(e, *op, a, b),
            ExpKind::Cond {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval_bool(cond)? {
                    self.eval(then_branch)
                } else {
                    self.eval(else_branch)
                }
            }
            ExpKind::EmptyBag => Ok(Value::Bag(Vec::new())),
            ExpKind::Singleton(x) => Ok(Value::Bag(vec![self.eval(x)?])),
            ExpKind::Map(bag, f) => {
                let elems = self.eval_bag(bag)?;
                Ok(Value::Bag(
                    elems
                        .into_iter()
                        .map(|x| self.apply(f, x))
                        .collect::<Result<Vec<_>, _>>()?,
                ))
            }
            ExpKind::Filter(bag, p) => {
                let mut kept = Vec::new();
                for x in self.eval_bag(bag)? {
                    match self.apply(p, x.clone())? {
                        Value::Bool(true) => kept.push(x),
                        Value::Bool(false) => {}
                        other => return Err(ill_typed(e, format!("predicate returned {other}"))),
                    }
                }
                Ok(Value::Bag(kept))
            }
            ExpKind::FlatMap(bag, f) => {
                let mut out = Vec::new();
                for x in self.eval_bag(bag)? {
                    match self.apply(f, x)? {
                        Value::Bag(inner) => out.extend(inner),
                        other => return Err(ill_typed(e, format!("expected a bag, got {other}"))),
                    }
                }
                Ok(Value::Bag(out))
            }
            ExpKind::Flatten(x) => {
                let mut out = Vec::new();
                for inner in self.eval_bag(x)? {
                    match inner {
                        Value::Bag(items) => out.extend(items),
                        other => return Err(ill_typed(e, format!("expected a bag, got {other}"))),
                    }
                }
                Ok(Value::Bag(out))
            }
            ExpKind::MakeMap { source, key, value } => {
                let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
                for x in self.eval_bag(source)? {
                    let k = self.apply(key, x.clone())?;
                    match groups.iter_mut().find(|(g, _)| *g == k) {
                        Some((_, members)) => members.push(x),
                        None => groups.push((k, vec![x])),
                    }
                }
                let mut entries = Vec::with_capacity(groups.len());
                for (k, members) in groups {
                    entries.push((k, self.apply(value, Value::Bag(members))?));
                }
                let default = self.apply(value, Value::Bag(Vec::new()))?;
                Ok(Value::Map(MapValue {
                    entries,
                    default: Box::new(default),
                }))
            }
            ExpKind::MakeMap2 { source, value } => {
                let mut entries: Vec<(Value, Value)> = Vec::new();
                for k in self.eval_bag(source)? {
                    if entries.iter().any(|(seen, _)| *seen == k) {
                        continue;
                    }
                    let v = self.apply(value, k.clone())?;
                    entries.push((k, v));
                }
                Ok(Value::Map(MapValue {
                    entries,
                    default: Box::new(Value::default_of(value.result_type())),
                }))
            }
            ExpKind::MapGet { map, key } => match self.eval(map)? {
                Value::Map(m) => {
                    let k = self.eval(key)?;
                    Ok(m.get(&k).clone())
                }
                other => Err(ill_typed(e, format!("expected a map, got {other}"))),
            },
            ExpKind::MapKeys(map) => match self.eval(map)? {
                Value::Map(m) => Ok(Value::Bag(m.entries.into_iter().map(|(k, _)| k).collect())),
                other => Err(ill_typed(e, format!("expected a map, got {other}"))),
            },
            ExpKind::App(f, arg) => {
                let arg = self.eval(arg)?;
                self.apply(f, arg)
            }
            ExpKind::AlterMaybe(x, f) => match self.eval(x)? {
                Value::Maybe(None) => Ok(Value::Maybe(None)),
                Value::Maybe(Some(v)) => Ok(Value::Maybe(Some(Box::new(self.apply(f, *v)?)))),
                other => Err(ill_typed(e, format!("expected a maybe, got {other}"))),
            },
            ExpKind::DropFront(x) => {
                let mut elems = self.eval_bag(x)?;
                if !elems.is_empty() {
                    elems.remove(0);
                }
                Ok(Value::Bag(elems))
            }
            ExpKind::DropBack(x) => {
                let mut elems = self.eval_bag(x)?;
                elems.pop();
                Ok(Value::Bag(elems))
            }
            ExpKind::StateVar(x) => self.eval(x),
        }
    }

    fn eval_unary(&mut self, e: &Exp, op: UnOp, x: &Exp) -> Result<Value, EvalError> {
        match op {
            UnOp::Not => Ok(Value::Bool(!self.eval_bool(x)?)),
            UnOp::Neg => match self.eval(x)? {
                Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
                Value::BitVec { value, width } => Ok(Value::BitVec {
                    value: bits((value as i64).wrapping_neg(), width),
                    width,
                }),
                other => Err(ill_typed(e, format!("cannot negate {other}"))),
            },
            UnOp::Sum => {
                let mut acc = Value::default_of(&e.ty);
                for v in self.eval_bag(x)? {
                    acc = arith(e, BinOp::Add, acc, v)?;
                }
                Ok(acc)
            }
            UnOp::Len => Ok(Value::Int(self.eval_bag(x)?.len() as i64)),
            UnOp::Unique => {
                let elems = self.eval_bag(x)?;
                let unique = elems
                    .iter()
                    .enumerate()
                    .all(|(i, a)| elems[i + 1..].iter().all(|b| a != b));
                Ok(Value::Bool(unique))
            }
            UnOp::The => Ok(Value::Maybe(
                self.eval_bag(x)?.into_iter().next().map(Box::new),
            )),
            UnOp::Distinct => {
                let mut out: Vec<Value> = Vec::new();
                for v in self.eval_bag(x)? {
                    if !out.contains(&v) {
                        out.push(v);
                    }
                }
                Ok(Value::Bag(out))
            }
            UnOp::Exists => Ok(Value::Bool(!self.eval_bag(x)?.is_empty())),
        }
    }

    fn eval_binary(&mut self, e: &Exp, op: BinOp, a: &Exp, b: &Exp) -> Result<Value, EvalError> {
        match op {
            BinOp::And => Ok(Value::Bool(self.eval_bool(a)? && self.eval_bool(b)?)),
            BinOp::Or => Ok(Value::Bool(self.eval_bool(a)? || self.eval_bool(b)?)),
            BinOp::Eq => Ok(Value::Bool(self.eval(a)? == self.eval(b)?)),
            BinOp::Ne => Ok(Value::Bool(self.eval(a)? != self.eval(b)?)),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ordering = match (self.eval(a)?, self.eval(b)?) {
                    (Value::Int(x), Value::Int(y)) => x.cmp(&y),
                    (Value::BitVec { value: x, .. }, Value::BitVec { value: y, .. }) => x.cmp(&y),
                    (Value::Str(x), Value::Str(y)) => x.cmp(&y),
                    (x, y) => return Err(ill_typed(e, format!("cannot compare {x} and {y}"))),
                };
                Ok(Value::Bool(match op {
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::Le => ordering.is_le(),
                    BinOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }))
            }
            BinOp::Add | BinOp::Sub => {
                let x = self.eval(a)?;
                let y = self.eval(b)?;
                arith(e, op, x, y)
            }
            BinOp::In => {
                let x = self.eval(a)?;
                Ok(Value::Bool(self.eval_bag(b)?.contains(&x)))
            }
        }
    }
}

fn arith(e: &Exp, op: BinOp, x: Value, y: Value) -> Result<Value, EvalError> {
    let add = op == BinOp::Add;
    match (x, y) {
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(if add {
            x.wrapping_add(y)
        } else {
            x.wrapping_sub(y)
        })),
        (Value::BitVec { value: x, width }, Value::BitVec { value: y, .. }) => {
            let raw = if add {
                (x as i64).wrapping_add(y as i64)
            } else {
                (x as i64).wrapping_sub(y as i64)
            };
            Ok(Value::BitVec {
                value: bits(raw, width),
                width,
            })
        }
        (Value::Bag(mut xs), Value::Bag(ys)) => {
            if add {
                xs.extend(ys);
            } else {
                for y in ys {
                    if let Some(pos) = xs.iter().position(|x| *x == y) {
                        xs.remove(pos);
                    }
                }
            }
            Ok(Value::Bag(xs))
        }
        (x, y) => Err(ill_typed(e, format!("cannot combine {x} and {y}"))),
    }
}
