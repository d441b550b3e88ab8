use std::collections::HashSet;

use crate::exp::{Exp, ExpKind, Lambda};
use crate::fresh::NameGen;
use crate::types::Type;

#[derive(Clone, Copy, Debug)]
pub enum Child<'a> {
    Exp(&'a Exp),
    Lambda(&'a Lambda),
}

pub fn children(e: &Exp) -> Vec<Child<'_>> {
    use Child::{Exp as E, Lambda as L};
    match &e.kind {
        ExpKind::Var(_)
        | ExpKind::Bool(_)
        | ExpKind::Num(_)
        | ExpKind::Str(_)
        | ExpKind::EnumEntry(_)
        | ExpKind::Null
        | ExpKind::EmptyBag => Vec::new(),
        ExpKind::Just(x)
        | ExpKind::TupleGet(x, _)
        | ExpKind::GetField(x, _)
        | ExpKind::Unary(_, x)
        | ExpKind::Singleton(x)
        | ExpKind::Flatten(x)
        | ExpKind::MapKeys(x)
        | ExpKind::DropFront(x)
        | ExpKind::DropBack(x)
        | ExpKind::StateVar(x) => vec![E(x)],
        ExpKind::Call { args, .. } => args.iter().map(E).collect(),
        ExpKind::Tuple(es) => es.iter().map(E).collect(),
        ExpKind::MakeRecord(fields) => fields.iter().map(|(_, x)| E(x)).collect(),
        ExpKind::Binary(_, a, b) => vec![E(a), E(b)],
        ExpKind::Cond {
            cond,
            then_branch,
            else_branch,
        } => vec![E(cond), E(then_branch), E(else_branch)],
        ExpKind::Map(bag, f)
        | ExpKind::Filter(bag, f)
        | ExpKind::FlatMap(bag, f)
        | ExpKind::AlterMaybe(bag, f) => vec![E(bag), L(f)],
        ExpKind::MakeMap { source, key, value } => vec![E(source), L(key), L(value)],
        ExpKind::MakeMap2 { source, value } => vec![E(source), L(value)],
        ExpKind::MapGet { map, key } => vec![E(map), E(key)],
        ExpKind::App(f, arg) => vec![L(f), E(arg)],
    }
}

/// Calls `f` on every direct child expression, including lambda bodies.
pub fn visit_children(e: &Exp, f: &mut impl FnMut(&Exp)) {
    for child in children(e) {
        match child {
            Child::Exp(x) => f(x),
            Child::Lambda(l) => f(&l.body),
        }
    }
}

pub trait Rewriter {
    fn exp(&mut self, e: &Exp) -> Exp;
    fn lambda(&mut self, l: &Lambda) -> Lambda;
}

/// Rebuilds `e` with every direct child passed through `rw`.
pub fn rebuild_children(e: &Exp, rw: &mut impl Rewriter) -> Exp {
    let kind = match &e.kind {
        ExpKind::Var(_)
        | ExpKind::Bool(_)
        | ExpKind::Num(_)
        | ExpKind::Str(_)
        | ExpKind::EnumEntry(_)
        | ExpKind::Null
        | ExpKind::EmptyBag => e.kind.clone(),
        ExpKind::Just(x) => ExpKind::Just(Box::new(rw.exp(x))),
        ExpKind::TupleGet(x, i) => ExpKind::TupleGet(Box::new(rw.exp(x)), *i),
        ExpKind::GetField(x, f) => ExpKind::GetField(Box::new(rw.exp(x)), f.clone()),
        ExpKind::Unary(op, x) => ExpKind::Unary(*op, Box::new(rw.exp(x))),
        ExpKind::Singleton(x) => ExpKind::Singleton(Box::new(rw.exp(x))),
        ExpKind::Flatten(x) => ExpKind::Flatten(Box::new(rw.exp(x))),
        ExpKind::MapKeys(x) => ExpKind::MapKeys(Box::new(rw.exp(x))),
        ExpKind::DropFront(x) => ExpKind::DropFront(Box::new(rw.exp(x))),
        ExpKind::DropBack(x) => ExpKind::DropBack(Box::new(rw.exp(x))),
        ExpKind::StateVar(x) => ExpKind::StateVar(Box::new(rw.exp(x))),
        ExpKind::Call { func, args } => ExpKind::Call {
            func: func.clone(),
            args: args.iter().map(|x| rw.exp(x)).collect(),
        },
        ExpKind::Tuple(es) => ExpKind::Tuple(es.iter().map(|x| rw.exp(x)).collect()),
        ExpKind::MakeRecord(fields) => ExpKind::MakeRecord(
            fields
                .iter()
                .map(|(name, x)| (name.clone(), rw.exp(x)))
                .collect(),
        ),
        ExpKind::Binary(op, a, b) => {
            ExpKind::Binary(*op, Box::new(rw.exp(a)), Box::new(rw.exp(b)))
        }
        ExpKind::Cond {
            cond,
            then_branch,
            else_branch,
        } => ExpKind::Cond {
            cond: Box::new(rw.exp(cond)),
            then_branch: Box::new(rw.exp(then_branch)),
            else_branch: Box::new(rw.exp(else_branch)),
        },
        ExpKind::Map(bag, f) => ExpKind::Map(Box::new(rw.exp(bag)), rw.lambda(f)),
        ExpKind::Filter(bag, f) => ExpKind::Filter(Box::new(rw.exp(bag)), rw.lambda(f)),
        ExpKind::FlatMap(bag, f) => ExpKind::FlatMap(Box::new(rw.exp(bag)), rw.lambda(f)),
        ExpKind::AlterMaybe(x, f) => ExpKind::AlterMaybe(Box::new(rw.exp(x)), rw.lambda(f)),
        ExpKind::MakeMap { source, key, value } => ExpKind::MakeMap {
            source: Box::new(rw.exp(source)),
            key: rw.lambda(key),
            value: rw.lambda(value),
        },
        ExpKind::MakeMap2 { source, value } => ExpKind::MakeMap2 {
            source: Box::new(rw.exp(source)),
            value: rw.lambda(value),
        },
        ExpKind::MapGet { map, key } => ExpKind::MapGet {
            map: Box::new(rw.exp(map)),
            key: Box::new(rw.exp(key)),
        },
        ExpKind::App(f, arg) => {
            let f = rw.lambda(f);
            ExpKind::App(f, Box::new(rw.exp(arg)))
        }
    };
    Exp::new(kind, e.ty.clone())
}

/// Free variables of `e` in order of first occurrence.
pub fn free_vars(e: &Exp) -> Vec<(String, Type)> {
    fn go(e: &Exp, bound: &mut Vec<String>, seen: &mut HashSet<String>, out: &mut Vec<(String, Type)>) {
        if let ExpKind::Var(name) = &e.kind {
            if !bound.contains(name) && seen.insert(name.clone()) {
                out.push((name.clone(), e.ty.clone()));
            }
            return;
        }
        for child in children(e) {
            match child {
                Child::Exp(x) => go(x, bound, seen, out),
                Child::Lambda(l) => {
                    bound.push(l.arg.clone());
                    go(&l.body, bound, seen, out);
                    bound.pop();
                }
            }
        }
    }

    let mut out = Vec::new();
    go(e, &mut Vec::new(), &mut HashSet::new(), &mut out);
    out
}

pub fn free_var_names(e: &Exp) -> HashSet<String> {
    free_vars(e).into_iter().map(|(name, _)| name).collect()
}

fn same_label(a: &Exp, b: &Exp) -> bool {
    if std::mem::discriminant(&a.kind) != std::mem::discriminant(&b.kind) || a.ty != b.ty {
        return false;
    }
    match (&a.kind, &b.kind) {
        (ExpKind::Bool(x), ExpKind::Bool(y)) => x == y,
        (ExpKind::Num(x), ExpKind::Num(y)) => x == y,
        (ExpKind::Str(x), ExpKind::Str(y)) => x == y,
        (ExpKind::EnumEntry(x), ExpKind::EnumEntry(y)) => x == y,
        (ExpKind::Call { func: f, args: xs }, ExpKind::Call { func: g, args: ys }) => {
            f == g && xs.len() == ys.len()
        }
        (ExpKind::Tuple(xs), ExpKind::Tuple(ys)) => xs.len() == ys.len(),
        (ExpKind::TupleGet(_, i), ExpKind::TupleGet(_, j)) => i == j,
        (ExpKind::MakeRecord(xs), ExpKind::MakeRecord(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|((f, _), (g, _))| f == g)
        }
        (ExpKind::GetField(_, f), ExpKind::GetField(_, g)) => f == g,
        (ExpKind::Unary(o, _), ExpKind::Unary(p, _)) => o == p,
        (ExpKind::Binary(o, _, _), ExpKind::Binary(p, _, _)) => o == p,
        _ => true,
    }
}

/// Structural equality up to consistent renaming of bound variables.
pub fn alpha_equivalent(a: &Exp, b: &Exp) -> bool {
    fn go(a: &Exp, b: &Exp, binders: &mut Vec<(String, String)>) -> bool {
        if let (ExpKind::Var(x), ExpKind::Var(y)) = (&a.kind, &b.kind) {
            if a.ty != b.ty {
                return false;
            }
            let lhs = binders.iter().rposition(|(l, _)| l == x);
            let rhs = binders.iter().rposition(|(_, r)| r == y);
            return match (lhs, rhs) {
                (None, None) => x == y,
                (Some(i), Some(j)) => i == j,
                _ => false,
            };
        }
        if !same_label(a, b) {
            return false;
        }
        let (xs, ys) = (children(a), children(b));
        xs.len() == ys.len()
            && xs.into_iter().zip(ys).all(|pair| match pair {
                (Child::Exp(x), Child::Exp(y)) => go(x, y, binders),
                (Child::Lambda(f), Child::Lambda(g)) => {
                    if f.arg_ty != g.arg_ty {
                        return false;
                    }
                    binders.push((f.arg.clone(), g.arg.clone()));
                    let ok = go(&f.body, &g.body, binders);
                    binders.pop();
                    ok
                }
                _ => false,
            })
    }

    go(a, b, &mut Vec::new())
}

struct Replace<'a, M, D> {
    needle: &'a Exp,
    needle_vars: HashSet<String>,
    replacement: &'a Exp,
    matches: M,
    descend: D,
    bound: Vec<String>,
}

impl<M, D> Rewriter for Replace<'_, M, D>
where
    M: Fn(&Exp, &Exp) -> bool,
    D: Fn(&Exp) -> bool,
{
    fn exp(&mut self, e: &Exp) -> Exp {
        if !(self.descend)(e) {
            return e.clone();
        }
        let captured = self.bound.iter().any(|b| self.needle_vars.contains(b));
        if !captured && (self.matches)(e, self.needle) {
            return self.replacement.clone();
        }
        rebuild_children(e, self)
    }

    fn lambda(&mut self, l: &Lambda) -> Lambda {
        self.bound.push(l.arg.clone());
        let body = self.exp(&l.body);
        self.bound.pop();
        Lambda {
            arg: l.arg.clone(),
            arg_ty: l.arg_ty.clone(),
            body: Box::new(body),
        }
    }
}

/// Replaces every subexpression `x` of `e` with `matches(x, needle)` by
/// `replacement`.
///
/// Nodes rejected by `descend` are left untouched, together with everything
/// under them. Occurrences where a free variable of `needle` is bound by an
/// enclosing lambda are not replaced.
pub fn replace(
    e: &Exp,
    needle: &Exp,
    replacement: &Exp,
    matches: impl Fn(&Exp, &Exp) -> bool,
    descend: impl Fn(&Exp) -> bool,
) -> Exp {
    let mut rw = Replace {
        needle,
        needle_vars: free_var_names(needle),
        replacement,
        matches,
        descend,
        bound: Vec::new(),
    };
    rw.exp(e)
}

struct StripStateVars;

impl Rewriter for StripStateVars {
    fn exp(&mut self, e: &Exp) -> Exp {
        match &e.kind {
            ExpKind::StateVar(inner) => self.exp(inner),
            _ => rebuild_children(e, self),
        }
    }

    fn lambda(&mut self, l: &Lambda) -> Lambda {
        Lambda {
            arg: l.arg.clone(),
            arg_ty: l.arg_ty.clone(),
            body: Box::new(self.exp(&l.body)),
        }
    }
}

pub fn strip_state_vars(e: &Exp) -> Exp {
    StripStateVars.exp(e)
}

struct Freshen<'a> {
    names: &'a mut NameGen,
    renames: Vec<(String, String)>,
}

impl Rewriter for Freshen<'_> {
    fn exp(&mut self, e: &Exp) -> Exp {
        if let ExpKind::Var(name) = &e.kind {
            return match self.renames.iter().rev().find(|(old, _)| old == name) {
                Some((_, new)) => Exp::var(new.clone(), e.ty.clone()),
                None => e.clone(),
            };
        }
        rebuild_children(e, self)
    }

    fn lambda(&mut self, l: &Lambda) -> Lambda {
        let arg = self.names.fresh("var");
        self.renames.push((l.arg.clone(), arg.clone()));
        let body = self.exp(&l.body);
        self.renames.pop();
        Lambda {
            arg,
            arg_ty: l.arg_ty.clone(),
            body: Box::new(body),
        }
    }
}

/// Renames every binder in `e` to a fresh name, never reusing a name in
/// `avoid` or a free variable of `e`.
pub fn freshen_binders<'a, I>(e: &Exp, avoid: I) -> Exp
where
    I: IntoIterator<Item = &'a str>,
{
    let mut taken = free_var_names(e);
    taken.extend(avoid.into_iter().map(str::to_string));
    let mut names = NameGen::avoiding(taken);
    Freshen {
        names: &mut names,
        renames: Vec::new(),
    }
    .exp(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    fn xs() -> Exp {
        Exp::var("xs", Type::bag(Type::Int))
    }

    fn filter_eq(bag: Exp, binder: &str, target: Exp) -> Exp {
        Exp::filter(
            bag,
            Lambda::new(
                binder,
                Type::Int,
                Exp::eq(Exp::var(binder, Type::Int), target),
            ),
        )
    }

    #[test]
    fn free_vars_skip_bound_names() {
        let e = filter_eq(xs(), "x", Exp::var("y", Type::Int));
        let names = free_vars(&e)
            .into_iter()
            .map(|(name, _)| name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["xs", "y"]);
    }

    #[test]
    fn alpha_equivalence_renames_binders_consistently() {
        let a = filter_eq(xs(), "x", Exp::num(1));
        let b = filter_eq(xs(), "z", Exp::num(1));
        let c = filter_eq(xs(), "z", Exp::num(2));
        assert!(alpha_equivalent(&a, &b));
        assert!(!alpha_equivalent(&a, &c));
    }

    #[test]
    fn alpha_equivalence_distinguishes_free_from_bound() {
        let a = filter_eq(xs(), "x", Exp::var("x", Type::Int));
        let b = filter_eq(xs(), "z", Exp::var("x", Type::Int));
        assert!(!alpha_equivalent(&a, &b));
    }

    #[test]
    fn replace_skips_captured_occurrences() {
        let y = Exp::var("y", Type::Int);
        let e = Exp::add(
            y.clone(),
            Exp::sum(Exp::map(
                xs(),
                Lambda::new("y", Type::Int, Exp::var("y", Type::Int)),
            )),
        );
        let out = replace(&e, &y, &Exp::num(7), alpha_equivalent, |_| true);
        let expected = Exp::add(
            Exp::num(7),
            Exp::sum(Exp::map(
                xs(),
                Lambda::new("y", Type::Int, Exp::var("y", Type::Int)),
            )),
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn strip_then_freshen_preserves_meaning() {
        let e = Exp::state_var(filter_eq(xs(), "xs", Exp::num(1)));
        let stripped = strip_state_vars(&e);
        assert!(!stripped.is_state_var());

        let fresh = freshen_binders(&stripped, ["_var0"]);
        assert!(alpha_equivalent(&fresh, &stripped));
        let ExpKind::Filter(_, f) = &fresh.kind else {
            panic!("expected filter, got {fresh:?}");
        };
        assert_eq!(f.arg, "_var1");
    }

    #[test]
    fn size_counts_lambda_bodies() {
        let e = filter_eq(xs(), "x", Exp::num(1));
        assert_eq!(e.size(), 5);
    }
}
