use std::fmt;

use crate::exp::{BinOp, Exp, ExpKind, Lambda, UnOp};
use crate::types::Type;

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("Int"),
            Type::Long => f.write_str("Long"),
            Type::Bool => f.write_str("Bool"),
            Type::String => f.write_str("String"),
            Type::BitVec(width) => write!(f, "BitVec<{width}>"),
            Type::Enum(cases) => write!(f, "enum {{ {} }}", cases.join(", ")),
            Type::Native(name) => write!(f, "Native<{name}>"),
            Type::Maybe(t) => write!(f, "Maybe<{t}>"),
            Type::Bag(t) => write!(f, "Bag<{t}>"),
            Type::Map(k, v) => write!(f, "Map<{k}, {v}>"),
            Type::Record(fields) => {
                f.write_str("{ ")?;
                for (i, (name, t)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name} : {t}")?;
                }
                f.write_str(" }")
            }
            Type::Tuple(ts) => {
                f.write_str("(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{t}")?;
                }
                f.write_str(")")
            }
            Type::Handle { name, value } => write!(f, "Handle<{name}, {value}>"),
        }
    }
}

fn unop_name(op: UnOp) -> &'static str {
    match op {
        UnOp::Not => "not",
        UnOp::Neg => "-",
        UnOp::Sum => "sum",
        UnOp::Len => "len",
        UnOp::Unique => "unique",
        UnOp::The => "the",
        UnOp::Distinct => "distinct",
        UnOp::Exists => "exists",
    }
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::In => "in",
    }
}

fn lambda(l: &Lambda) -> String {
    format!("\\{} -> {}", l.arg, pprint(&l.body))
}

fn join(es: &[Exp]) -> String {
    es.iter().map(pprint).collect::<Vec<_>>().join(", ")
}

/// Renders `e` in a compact, unambiguous concrete syntax.
pub fn pprint(e: &Exp) -> String {
    match &e.kind {
        ExpKind::Var(name) => name.clone(),
        ExpKind::Bool(b) => b.to_string(),
        ExpKind::Num(n) => n.to_string(),
        ExpKind::Str(s) => format!("{s:?}"),
        ExpKind::EnumEntry(case) => case.clone(),
        ExpKind::Null => "null".to_string(),
        ExpKind::Just(x) => format!("just {}", pprint(x)),
        ExpKind::Call { func, args } => format!("{}({})", func, join(args)),
        ExpKind::Tuple(es) => format!("({})", join(es)),
        ExpKind::TupleGet(x, i) => format!("({}).{}", pprint(x), i),
        ExpKind::MakeRecord(fields) => format!(
            "{{ {} }}",
            fields
                .iter()
                .map(|(name, x)| format!("{} : {}", name, pprint(x)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        ExpKind::GetField(x, field) => format!("({}).{}", pprint(x), field),
        ExpKind::Unary(op, x) => format!("({} {})", unop_name(*op), pprint(x)),
        ExpKind::Binary(op, a, b) => format!("({} {} {})", pprint(a), binop_name(*op), pprint(b)),
        ExpKind::Cond {
            cond,
            then_branch,
            else_branch,
        } => format!(
            "({} ? {} : {})",
            pprint(cond),
            pprint(then_branch),
            pprint(else_branch)
        ),
        ExpKind::EmptyBag => "{}".to_string(),
        ExpKind::Singleton(x) => format!("{{{}}}", pprint(x)),
        ExpKind::Map(bag, f) => format!("Map {{{}}} ({})", lambda(f), pprint(bag)),
        ExpKind::Filter(bag, f) => format!("Filter {{{}}} ({})", lambda(f), pprint(bag)),
        ExpKind::FlatMap(bag, f) => format!("FlatMap {{{}}} ({})", lambda(f), pprint(bag)),
        ExpKind::Flatten(x) => format!("Flatten ({})", pprint(x)),
        ExpKind::MakeMap { source, key, value } => format!(
            "MakeMap {{{}}} {{{}}} ({})",
            lambda(key),
            lambda(value),
            pprint(source)
        ),
        ExpKind::MakeMap2 { source, value } => {
            format!("MakeMap2 {{{}}} ({})", lambda(value), pprint(source))
        }
        ExpKind::MapGet { map, key } => format!("{}[{}]", pprint(map), pprint(key)),
        ExpKind::MapKeys(x) => format!("({}).keys", pprint(x)),
        ExpKind::App(f, arg) => format!("({})({})", lambda(f), pprint(arg)),
        ExpKind::AlterMaybe(x, f) => format!("AlterMaybe {{{}}} ({})", lambda(f), pprint(x)),
        ExpKind::DropFront(x) => format!("DropFront ({})", pprint(x)),
        ExpKind::DropBack(x) => format!("DropBack ({})", pprint(x)),
        ExpKind::StateVar(x) => format!("EStateVar({})", pprint(x)),
    }
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&pprint(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_nested_binders() {
        let xs = Exp::var("xs", Type::bag(Type::Int));
        let e = Exp::len(Exp::state_var(Exp::filter(
            xs,
            Lambda::new("x", Type::Int, Exp::eq(Exp::var("x", Type::Int), Exp::num(1))),
        )));
        insta::assert_snapshot!(pprint(&e), @r"(len EStateVar(Filter {\x -> (x == 1)} (xs)))");
    }

    #[test]
    fn prints_types() {
        let ty = Type::map(Type::Int, Type::bag(Type::handle("Node", Type::Bool)));
        insta::assert_snapshot!(ty.to_string(), @"Map<Int, Bag<Handle<Node, Bool>>>");
    }
}
