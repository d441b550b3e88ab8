//! Expression trees.
//!
//! Every node carries its resolved [`Type`]. The constructors on [`Exp`]
//! compute result types from their operands and assume well-typed input; type
//! errors are not reported here.

use serde::{Deserialize, Serialize};

use crate::types::Type;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Not,
    Neg,
    Sum,
    Len,
    Unique,
    /// First element of a bag as a `Maybe`.
    The,
    Distinct,
    Exists,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Numeric addition or bag union.
    Add,
    /// Numeric subtraction or bag difference.
    Sub,
    /// Bag membership; the bag is the right operand.
    In,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lambda {
    pub arg: String,
    pub arg_ty: Type,
    pub body: Box<Exp>,
}

impl Lambda {
    pub fn new(arg: impl Into<String>, arg_ty: Type, body: Exp) -> Self {
        Self {
            arg: arg.into(),
            arg_ty,
            body: Box::new(body),
        }
    }

    pub fn arg_var(&self) -> Exp {
        Exp::var(self.arg.clone(), self.arg_ty.clone())
    }

    pub fn result_type(&self) -> &Type {
        &self.body.ty
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Clause {
    /// Binds `var` to each element of `bag` for the clauses after it.
    Pull { var: String, bag: Exp },
    Cond(Exp),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpKind {
    Var(String),
    Bool(bool),
    Num(i64),
    Str(String),
    EnumEntry(String),
    Null,
    Just(Box<Exp>),
    Call {
        func: String,
        args: Vec<Exp>,
    },
    Tuple(Vec<Exp>),
    TupleGet(Box<Exp>, usize),
    MakeRecord(Vec<(String, Exp)>),
    GetField(Box<Exp>, String),
    Unary(UnOp, Box<Exp>),
    Binary(BinOp, Box<Exp>, Box<Exp>),
    Cond {
        cond: Box<Exp>,
        then_branch: Box<Exp>,
        else_branch: Box<Exp>,
    },
    EmptyBag,
    Singleton(Box<Exp>),
    Map(Box<Exp>, Lambda),
    Filter(Box<Exp>, Lambda),
    FlatMap(Box<Exp>, Lambda),
    Flatten(Box<Exp>),
    /// Group `source` by `key`; each key maps to `value` applied to the
    /// sub-bag of elements with that key.
    MakeMap {
        source: Box<Exp>,
        key: Lambda,
        value: Lambda,
    },
    /// Map each distinct element `k` of `source` to `value(k)`.
    MakeMap2 {
        source: Box<Exp>,
        value: Lambda,
    },
    MapGet {
        map: Box<Exp>,
        key: Box<Exp>,
    },
    MapKeys(Box<Exp>),
    App(Lambda, Box<Exp>),
    AlterMaybe(Box<Exp>, Lambda),
    DropFront(Box<Exp>),
    DropBack(Box<Exp>),
    /// Cached-state marker: the wrapped expression is maintained as state and
    /// read at runtime.
    StateVar(Box<Exp>),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Exp {
    pub kind: ExpKind,
    pub ty: Type,
}

fn elem_of(e: &Exp) -> Type {
    match &e.ty {
        Type::Bag(elem) => (**elem).clone(),
        other => {
            debug_assert!(false, "expected a bag, got {other:?}");
            other.clone()
        }
    }
}

impl Exp {
    pub fn new(kind: ExpKind, ty: Type) -> Self {
        Self { kind, ty }
    }

    pub fn var(name: impl Into<String>, ty: Type) -> Self {
        Self::new(ExpKind::Var(name.into()), ty)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ExpKind::Bool(value), Type::Bool)
    }

    pub fn truth() -> Self {
        Self::bool(true)
    }

    pub fn num(value: i64) -> Self {
        Self::new(ExpKind::Num(value), Type::Int)
    }

    pub fn num_typed(value: i64, ty: Type) -> Self {
        Self::new(ExpKind::Num(value), ty)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ExpKind::Str(value.into()), Type::String)
    }

    pub fn enum_entry(case: impl Into<String>, ty: Type) -> Self {
        Self::new(ExpKind::EnumEntry(case.into()), ty)
    }

    pub fn null(inner: Type) -> Self {
        Self::new(ExpKind::Null, Type::maybe(inner))
    }

    pub fn just(e: Exp) -> Self {
        let ty = Type::maybe(e.ty.clone());
        Self::new(ExpKind::Just(Box::new(e)), ty)
    }

    pub fn call(func: impl Into<String>, args: Vec<Exp>, ty: Type) -> Self {
        Self::new(
            ExpKind::Call {
                func: func.into(),
                args,
            },
            ty,
        )
    }

    pub fn tuple(es: Vec<Exp>) -> Self {
        let ty = Type::Tuple(es.iter().map(|e| e.ty.clone()).collect());
        Self::new(ExpKind::Tuple(es), ty)
    }

    pub fn tuple_get(e: Exp, index: usize) -> Self {
        let ty = match &e.ty {
            Type::Tuple(ts) => ts.get(index).cloned().unwrap_or(Type::Bool),
            _ => Type::Bool,
        };
        Self::new(ExpKind::TupleGet(Box::new(e), index), ty)
    }

    pub fn make_record(fields: Vec<(String, Exp)>) -> Self {
        let ty = Type::Record(fields.iter().map(|(f, e)| (f.clone(), e.ty.clone())).collect());
        Self::new(ExpKind::MakeRecord(fields), ty)
    }

    pub fn get_field(e: Exp, field: impl Into<String>) -> Self {
        let field = field.into();
        let ty = e.ty.field_type(&field).cloned().unwrap_or(Type::Bool);
        Self::new(ExpKind::GetField(Box::new(e), field), ty)
    }

    pub fn unary(op: UnOp, e: Exp) -> Self {
        let ty = match op {
            UnOp::Not | UnOp::Unique | UnOp::Exists => Type::Bool,
            UnOp::Len => Type::Int,
            UnOp::Neg => e.ty.clone(),
            UnOp::Sum => elem_of(&e),
            UnOp::The => Type::maybe(elem_of(&e)),
            UnOp::Distinct => e.ty.clone(),
        };
        Self::new(ExpKind::Unary(op, Box::new(e)), ty)
    }

    pub fn not(e: Exp) -> Self {
        Self::unary(UnOp::Not, e)
    }

    pub fn len(e: Exp) -> Self {
        Self::unary(UnOp::Len, e)
    }

    pub fn sum(e: Exp) -> Self {
        Self::unary(UnOp::Sum, e)
    }

    pub fn the(e: Exp) -> Self {
        Self::unary(UnOp::The, e)
    }

    pub fn distinct(e: Exp) -> Self {
        Self::unary(UnOp::Distinct, e)
    }

    pub fn binary(op: BinOp, lhs: Exp, rhs: Exp) -> Self {
        let ty = match op {
            BinOp::Add | BinOp::Sub => lhs.ty.clone(),
            _ => Type::Bool,
        };
        Self::new(ExpKind::Binary(op, Box::new(lhs), Box::new(rhs)), ty)
    }

    pub fn and(lhs: Exp, rhs: Exp) -> Self {
        Self::binary(BinOp::And, lhs, rhs)
    }

    pub fn or(lhs: Exp, rhs: Exp) -> Self {
        Self::binary(BinOp::Or, lhs, rhs)
    }

    pub fn implies(lhs: Exp, rhs: Exp) -> Self {
        Self::or(Self::not(lhs), rhs)
    }

    pub fn eq(lhs: Exp, rhs: Exp) -> Self {
        Self::binary(BinOp::Eq, lhs, rhs)
    }

    pub fn le(lhs: Exp, rhs: Exp) -> Self {
        Self::binary(BinOp::Le, lhs, rhs)
    }

    pub fn ge(lhs: Exp, rhs: Exp) -> Self {
        Self::binary(BinOp::Ge, lhs, rhs)
    }

    pub fn add(lhs: Exp, rhs: Exp) -> Self {
        Self::binary(BinOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Exp, rhs: Exp) -> Self {
        Self::binary(BinOp::Sub, lhs, rhs)
    }

    pub fn contains(bag: Exp, elem: Exp) -> Self {
        Self::binary(BinOp::In, elem, bag)
    }

    pub fn all(es: impl IntoIterator<Item = Exp>) -> Self {
        let mut parts = es
            .into_iter()
            .filter(|e| e.kind != ExpKind::Bool(true))
            .collect::<Vec<_>>();
        match parts.len() {
            0 => Self::truth(),
            _ => {
                let mut acc = parts.remove(0);
                for part in parts {
                    acc = Self::and(acc, part);
                }
                acc
            }
        }
    }

    pub fn cond(cond: Exp, then_branch: Exp, else_branch: Exp) -> Self {
        let ty = then_branch.ty.clone();
        Self::new(
            ExpKind::Cond {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            ty,
        )
    }

    pub fn empty_bag(elem: Type) -> Self {
        Self::new(ExpKind::EmptyBag, Type::bag(elem))
    }

    pub fn singleton(e: Exp) -> Self {
        let ty = Type::bag(e.ty.clone());
        Self::new(ExpKind::Singleton(Box::new(e)), ty)
    }

    /// Bag literal built from singletons; `elem` is used when `es` is empty.
    pub fn bag_of(elem: Type, es: Vec<Exp>) -> Self {
        let mut acc: Option<Exp> = None;
        for e in es {
            let single = Self::singleton(e);
            acc = Some(match acc {
                None => single,
                Some(prev) => Self::add(prev, single),
            });
        }
        acc.unwrap_or_else(|| Self::empty_bag(elem))
    }

    pub fn map(bag: Exp, f: Lambda) -> Self {
        let ty = Type::bag(f.result_type().clone());
        Self::new(ExpKind::Map(Box::new(bag), f), ty)
    }

    pub fn filter(bag: Exp, p: Lambda) -> Self {
        let ty = bag.ty.clone();
        Self::new(ExpKind::Filter(Box::new(bag), p), ty)
    }

    pub fn flat_map(bag: Exp, f: Lambda) -> Self {
        let ty = f.result_type().clone();
        Self::new(ExpKind::FlatMap(Box::new(bag), f), ty)
    }

    /// `[head | clauses]` as a bag, built from `Map`, `Filter`, `FlatMap` and
    /// `Cond` nodes. Element multiplicities multiply across pulls.
    pub fn comprehension(head: Exp, clauses: &[Clause]) -> Self {
        match clauses.split_first() {
            None => Self::singleton(head),
            Some((Clause::Cond(c), rest)) => {
                let elem = head.ty.clone();
                Self::cond(c.clone(), Self::comprehension(head, rest), Self::empty_bag(elem))
            }
            Some((Clause::Pull { var, bag }, rest)) => {
                let elem = elem_of(bag);
                let conds = rest
                    .iter()
                    .map(|c| match c {
                        Clause::Cond(e) => Some(e.clone()),
                        Clause::Pull { .. } => None,
                    })
                    .collect::<Option<Vec<_>>>();
                match conds {
                    Some(conds) => {
                        let keep = Self::all(conds);
                        let source = if keep == Self::truth() {
                            bag.clone()
                        } else {
                            Self::filter(bag.clone(), Lambda::new(var, elem.clone(), keep))
                        };
                        Self::map(source, Lambda::new(var, elem, head))
                    }
                    None => Self::flat_map(
                        bag.clone(),
                        Lambda::new(var, elem, Self::comprehension(head, rest)),
                    ),
                }
            }
        }
    }

    pub fn flatten(e: Exp) -> Self {
        let ty = elem_of(&e);
        Self::new(ExpKind::Flatten(Box::new(e)), ty)
    }

    pub fn make_map(source: Exp, key: Lambda, value: Lambda) -> Self {
        let ty = Type::map(key.result_type().clone(), value.result_type().clone());
        Self::new(
            ExpKind::MakeMap {
                source: Box::new(source),
                key,
                value,
            },
            ty,
        )
    }

    pub fn make_map2(source: Exp, value: Lambda) -> Self {
        let ty = Type::map(elem_of(&source), value.result_type().clone());
        Self::new(
            ExpKind::MakeMap2 {
                source: Box::new(source),
                value,
            },
            ty,
        )
    }

    pub fn map_get(map: Exp, key: Exp) -> Self {
        let ty = match &map.ty {
            Type::Map(_, v) => (**v).clone(),
            _ => Type::Bool,
        };
        Self::new(
            ExpKind::MapGet {
                map: Box::new(map),
                key: Box::new(key),
            },
            ty,
        )
    }

    pub fn map_keys(map: Exp) -> Self {
        let ty = match &map.ty {
            Type::Map(k, _) => Type::bag((**k).clone()),
            _ => Type::bag(Type::Bool),
        };
        Self::new(ExpKind::MapKeys(Box::new(map)), ty)
    }

    pub fn app(f: Lambda, arg: Exp) -> Self {
        let ty = f.result_type().clone();
        Self::new(ExpKind::App(f, Box::new(arg)), ty)
    }

    pub fn alter_maybe(e: Exp, f: Lambda) -> Self {
        let ty = Type::maybe(f.result_type().clone());
        Self::new(ExpKind::AlterMaybe(Box::new(e), f), ty)
    }

    pub fn drop_front(e: Exp) -> Self {
        let ty = e.ty.clone();
        Self::new(ExpKind::DropFront(Box::new(e)), ty)
    }

    pub fn drop_back(e: Exp) -> Self {
        let ty = e.ty.clone();
        Self::new(ExpKind::DropBack(Box::new(e)), ty)
    }

    pub fn state_var(e: Exp) -> Self {
        let ty = e.ty.clone();
        Self::new(ExpKind::StateVar(Box::new(e)), ty)
    }

    pub fn is_state_var(&self) -> bool {
        matches!(self.kind, ExpKind::StateVar(_))
    }

    pub fn size(&self) -> usize {
        let mut n = 0;
        crate::syntax::visit_children(self, &mut |child| n += child.size());
        n + 1
    }
}
