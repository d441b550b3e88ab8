use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Sort {
    Bool,
    Int,
    BitVec(u32),
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Bool => f.write_str("Bool"),
            Sort::Int => f.write_str("Int"),
            Sort::BitVec(width) => write!(f, "(_ BitVec {width})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Term {
    BoolConst(bool),
    IntConst(i64),
    BvConst {
        value: u64,
        width: u32,
    },
    Var {
        name: String,
        sort: Sort,
    },
    App {
        func: String,
        args: Vec<Term>,
        sort: Sort,
    },
    Not(Rc<Term>),
    And(Vec<Term>),
    Or(Vec<Term>),
    Implies(Rc<Term>, Rc<Term>),
    Add(Vec<Term>),
    Sub(Rc<Term>, Rc<Term>),
    Neg(Rc<Term>),
    /// Two's-complement wrap of an integer into the `i64` range.
    WrapI64(Rc<Term>),
    Eq(Rc<Term>, Rc<Term>),
    Lt(Rc<Term>, Rc<Term>),
    Le(Rc<Term>, Rc<Term>),
    Ite {
        cond: Rc<Term>,
        then_term: Rc<Term>,
        else_term: Rc<Term>,
        sort: Sort,
    },
}

impl Term {
    pub fn sort(&self) -> Sort {
        match self {
            Term::BoolConst(_) => Sort::Bool,
            Term::IntConst(_) => Sort::Int,
            Term::BvConst { width, .. } => Sort::BitVec(*width),
            Term::Var { sort, .. } | Term::App { sort, .. } | Term::Ite { sort, .. } => *sort,
            Term::Not(_)
            | Term::And(_)
            | Term::Or(_)
            | Term::Implies(_, _)
            | Term::Eq(_, _)
            | Term::Lt(_, _)
            | Term::Le(_, _) => Sort::Bool,
            Term::Add(items) => items.first().map(Term::sort).unwrap_or(Sort::Int),
            Term::Sub(lhs, _) | Term::Neg(lhs) => lhs.sort(),
            Term::WrapI64(_) => Sort::Int,
        }
    }

    pub fn bool(value: bool) -> Term {
        Term::BoolConst(value)
    }

    pub fn int(value: i64) -> Term {
        Term::IntConst(value)
    }

    pub fn var(name: impl Into<String>, sort: Sort) -> Term {
        Term::Var {
            name: name.into(),
            sort,
        }
    }

    pub fn zero(sort: Sort) -> Term {
        match sort {
            Sort::BitVec(width) => Term::BvConst { value: 0, width },
            _ => Term::IntConst(0),
        }
    }

    pub fn as_bool_const(&self) -> Option<bool> {
        match self {
            Term::BoolConst(b) => Some(*b),
            _ => None,
        }
    }

    pub fn not(t: Term) -> Term {
        match t {
            Term::BoolConst(b) => Term::BoolConst(!b),
            Term::Not(inner) => (*inner).clone(),
            other => Term::Not(Rc::new(other)),
        }
    }

    pub fn and(items: impl IntoIterator<Item = Term>) -> Term {
        let mut parts = Vec::new();
        for item in items {
            match item {
                Term::BoolConst(true) => {}
                Term::BoolConst(false) => return Term::BoolConst(false),
                Term::And(nested) => parts.extend(nested),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Term::BoolConst(true),
            1 => parts.remove(0),
            _ => Term::And(parts),
        }
    }

    pub fn or(items: impl IntoIterator<Item = Term>) -> Term {
        let mut parts = Vec::new();
        for item in items {
            match item {
                Term::BoolConst(false) => {}
                Term::BoolConst(true) => return Term::BoolConst(true),
                Term::Or(nested) => parts.extend(nested),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Term::BoolConst(false),
            1 => parts.remove(0),
            _ => Term::Or(parts),
        }
    }

    pub fn implies(lhs: Term, rhs: Term) -> Term {
        match (&lhs, &rhs) {
            (Term::BoolConst(false), _) | (_, Term::BoolConst(true)) => Term::BoolConst(true),
            (Term::BoolConst(true), _) => rhs,
            _ => Term::Implies(Rc::new(lhs), Rc::new(rhs)),
        }
    }

    pub fn eq(lhs: Term, rhs: Term) -> Term {
        if lhs == rhs {
            return Term::BoolConst(true);
        }
        match (&lhs, &rhs) {
            (Term::BoolConst(a), Term::BoolConst(b)) => Term::BoolConst(a == b),
            (Term::IntConst(a), Term::IntConst(b)) => Term::BoolConst(a == b),
            (Term::BvConst { value: a, .. }, Term::BvConst { value: b, .. }) => {
                Term::BoolConst(a == b)
            }
            _ => Term::Eq(Rc::new(lhs), Rc::new(rhs)),
        }
    }

    pub fn lt(lhs: Term, rhs: Term) -> Term {
        match (&lhs, &rhs) {
            (Term::IntConst(a), Term::IntConst(b)) => Term::BoolConst(a < b),
            _ => Term::Lt(Rc::new(lhs), Rc::new(rhs)),
        }
    }

    pub fn le(lhs: Term, rhs: Term) -> Term {
        match (&lhs, &rhs) {
            (Term::IntConst(a), Term::IntConst(b)) => Term::BoolConst(a <= b),
            _ => Term::Le(Rc::new(lhs), Rc::new(rhs)),
        }
    }

    pub fn gt(lhs: Term, rhs: Term) -> Term {
        Term::lt(rhs, lhs)
    }

    pub fn ge(lhs: Term, rhs: Term) -> Term {
        Term::le(rhs, lhs)
    }

    /// Sum of `items`; folds integer constants while the folded constant
    /// stays an `i64`. `sort` is used when empty.
    pub fn add(sort: Sort, items: impl IntoIterator<Item = Term>) -> Term {
        let mut constant = 0i64;
        let mut parts = Vec::new();
        for item in items {
            match item {
                Term::IntConst(n) => match constant.checked_add(n) {
                    Some(folded) => constant = folded,
                    None => {
                        parts.push(Term::IntConst(constant));
                        constant = n;
                    }
                },
                Term::Add(nested) if sort == Sort::Int => parts.extend(nested),
                other => parts.push(other),
            }
        }
        if constant != 0 || parts.is_empty() {
            match sort {
                Sort::BitVec(_) if constant == 0 => {}
                _ => parts.push(Term::IntConst(constant)),
            }
        }
        match parts.len() {
            0 => Term::zero(sort),
            1 => parts.remove(0),
            _ => Term::Add(parts),
        }
    }

    pub fn sub(lhs: Term, rhs: Term) -> Term {
        match (&lhs, &rhs) {
            (_, Term::IntConst(0)) => lhs,
            (Term::IntConst(a), Term::IntConst(b)) if a.checked_sub(*b).is_some() => {
                Term::IntConst(a - b)
            }
            _ => Term::Sub(Rc::new(lhs), Rc::new(rhs)),
        }
    }

    pub fn neg(t: Term) -> Term {
        match t {
            Term::IntConst(n) if n != i64::MIN => Term::IntConst(-n),
            other => Term::Neg(Rc::new(other)),
        }
    }

    pub fn ite(cond: Term, then_term: Term, else_term: Term) -> Term {
        match cond {
            Term::BoolConst(true) => then_term,
            Term::BoolConst(false) => else_term,
            _ if then_term == else_term => then_term,
            cond => {
                let sort = then_term.sort();
                if sort == Sort::Bool {
                    match (&then_term, &else_term) {
                        (Term::BoolConst(true), Term::BoolConst(false)) => return cond,
                        (Term::BoolConst(false), Term::BoolConst(true)) => return Term::not(cond),
                        _ => {}
                    }
                }
                Term::Ite {
                    cond: Rc::new(cond),
                    then_term: Rc::new(then_term),
                    else_term: Rc::new(else_term),
                    sort,
                }
            }
        }
    }

    /// `t` reduced into the `i64` range the way machine arithmetic wraps.
    pub fn wrap_i64(t: Term) -> Term {
        match t {
            Term::IntConst(_) | Term::WrapI64(_) => t,
            other => Term::WrapI64(Rc::new(other)),
        }
    }

    /// `t` is representable as an `i64`.
    pub fn in_i64_range(t: Term) -> Term {
        Term::and([
            Term::le(Term::IntConst(i64::MIN), t.clone()),
            Term::le(t, Term::IntConst(i64::MAX)),
        ])
    }

    pub fn indicator(cond: Term) -> Term {
        Term::ite(cond, Term::IntConst(1), Term::IntConst(0))
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, head: &str, items: &[Term]) -> fmt::Result {
    write!(f, "({head}")?;
    for item in items {
        write!(f, " {item}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let is_bv = |t: &Term| matches!(t.sort(), Sort::BitVec(_));
        match self {
            Term::BoolConst(true) => f.write_str("true"),
            Term::BoolConst(false) => f.write_str("false"),
            Term::IntConst(n) if *n < 0 => write!(f, "(- {})", n.unsigned_abs()),
            Term::IntConst(n) => write!(f, "{n}"),
            Term::BvConst { value, width } => write!(f, "(_ bv{value} {width})"),
            Term::Var { name, .. } => f.write_str(name),
            Term::App { func, args, .. } if args.is_empty() => f.write_str(func),
            Term::App { func, args, .. } => write_list(f, func, args),
            Term::Not(inner) => write!(f, "(not {inner})"),
            Term::And(items) => write_list(f, "and", items),
            Term::Or(items) => write_list(f, "or", items),
            Term::Implies(lhs, rhs) => write!(f, "(=> {lhs} {rhs})"),
            Term::Add(items) if items.first().is_some_and(is_bv) => write_list(f, "bvadd", items),
            Term::Add(items) => write_list(f, "+", items),
            Term::Sub(lhs, rhs) if is_bv(lhs) => write!(f, "(bvsub {lhs} {rhs})"),
            Term::Sub(lhs, rhs) => write!(f, "(- {lhs} {rhs})"),
            Term::Neg(inner) if is_bv(inner) => write!(f, "(bvneg {inner})"),
            Term::Neg(inner) => write!(f, "(- {inner})"),
            Term::WrapI64(inner) => {
                let half = 1u128 << 63;
                let modulus = 1u128 << 64;
                write!(f, "(- (mod (+ {inner} {half}) {modulus}) {half})")
            }
            Term::Eq(lhs, rhs) => write!(f, "(= {lhs} {rhs})"),
            Term::Lt(lhs, rhs) if is_bv(lhs) => write!(f, "(bvult {lhs} {rhs})"),
            Term::Lt(lhs, rhs) => write!(f, "(< {lhs} {rhs})"),
            Term::Le(lhs, rhs) if is_bv(lhs) => write!(f, "(bvule {lhs} {rhs})"),
            Term::Le(lhs, rhs) => write!(f, "(<= {lhs} {rhs})"),
            Term::Ite {
                cond,
                then_term,
                else_term,
                ..
            } => write!(f, "(ite {cond} {then_term} {else_term})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_constants_in_connectives() {
        let x = Term::var("x", Sort::Bool);
        assert_eq!(Term::and([Term::bool(true), x.clone()]), x);
        assert_eq!(Term::or([x.clone(), Term::bool(true)]), Term::bool(true));
        assert_eq!(Term::not(Term::not(x.clone())), x);
        assert_eq!(Term::ite(x.clone(), Term::bool(true), Term::bool(false)), x);
    }

    #[test]
    fn renders_smtlib() {
        let x = Term::var("x", Sort::Int);
        let y = Term::var("y", Sort::Int);
        let t = Term::and([
            Term::le(Term::add(Sort::Int, [x.clone(), Term::int(-2)]), y.clone()),
            Term::not(Term::eq(x, y)),
        ]);
        insta::assert_snapshot!(t.to_string(), @"(and (<= (+ x (- 2)) y) (not (= x y)))");
    }

    #[test]
    fn folding_never_wraps_at_the_i64_boundary() {
        let sum = Term::add(Sort::Int, [Term::int(i64::MAX), Term::int(1)]);
        assert_ne!(sum, Term::int(i64::MIN));
        insta::assert_snapshot!(sum.to_string(), @"(+ 9223372036854775807 1)");

        let diff = Term::sub(Term::int(i64::MIN), Term::int(1));
        insta::assert_snapshot!(diff.to_string(), @"(- (- 9223372036854775808) 1)");

        let negated = Term::neg(Term::int(i64::MIN));
        insta::assert_snapshot!(negated.to_string(), @"(- (- 9223372036854775808))");

        assert_eq!(
            Term::add(Sort::Int, [Term::int(i64::MAX), Term::int(-1)]),
            Term::int(i64::MAX - 1)
        );
        assert_eq!(Term::in_i64_range(Term::int(i64::MAX)), Term::bool(true));
    }

    #[test]
    fn wraps_integers_into_the_i64_range() {
        let x = Term::var("x", Sort::Int);
        let wrapped = Term::wrap_i64(Term::add(Sort::Int, [x, Term::int(1)]));
        insta::assert_snapshot!(
            wrapped.to_string(),
            @"(- (mod (+ (+ x 1) 9223372036854775808) 18446744073709551616) 9223372036854775808)"
        );
        assert_eq!(Term::wrap_i64(wrapped.clone()), wrapped);
        assert_eq!(Term::wrap_i64(Term::int(-5)), Term::int(-5));
    }

    #[test]
    fn renders_bitvector_operations() {
        let a = Term::var("a", Sort::BitVec(8));
        let b = Term::BvConst { value: 3, width: 8 };
        let t = Term::lt(Term::add(Sort::BitVec(8), [a.clone(), b]), a);
        insta::assert_snapshot!(t.to_string(), @"(bvult (bvadd a (_ bv3 8)) a)");
    }
}
