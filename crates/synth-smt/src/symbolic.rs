use synth_ir::Type;

use crate::classify::sort_of;
use crate::term::{Sort, Term};
use crate::SmtError;

/// One slot of a bounded bag. The element is logically present iff `mask`.
#[derive(Clone, Debug, PartialEq)]
pub struct Slot {
    pub mask: Term,
    pub elem: SymValue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapEntry {
    pub present: Term,
    pub key: SymValue,
    pub value: SymValue,
}

/// A map as a list of guarded overrides on top of a default. Keys of present
/// entries are pairwise distinct.
#[derive(Clone, Debug, PartialEq)]
pub struct SymMap {
    pub entries: Vec<MapEntry>,
    pub default: Box<SymValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SymValue {
    Term(Term),
    Maybe {
        present: Term,
        value: Box<SymValue>,
    },
    Bag(Vec<Slot>),
    Map(SymMap),
    Record(Vec<(String, SymValue)>),
    Tuple(Vec<SymValue>),
    Handle {
        id: Term,
        value: Box<SymValue>,
    },
    /// Deferred `if cond then .. else ..` over a type with no solver sort.
    Union {
        cond: Term,
        then_value: Box<SymValue>,
        else_value: Box<SymValue>,
    },
}

fn unsupported(message: impl Into<String>) -> SmtError {
    SmtError::UnsupportedConstruct {
        message: message.into(),
    }
}

impl SymValue {
    /// Conditional value; a native `ite` when both branches are terms.
    pub fn ite(cond: Term, then_value: SymValue, else_value: SymValue) -> SymValue {
        match cond.as_bool_const() {
            Some(true) => return then_value,
            Some(false) => return else_value,
            None => {}
        }
        if then_value == else_value {
            return then_value;
        }
        match (then_value, else_value) {
            (SymValue::Term(a), SymValue::Term(b)) => SymValue::Term(Term::ite(cond, a, b)),
            (a, b) => SymValue::Union {
                cond,
                then_value: Box::new(a),
                else_value: Box::new(b),
            },
        }
    }

    /// Applies `f` beneath every union branch, re-collapsing where both
    /// results are terms.
    pub fn fmap<F>(self, f: &mut F) -> Result<SymValue, SmtError>
    where
        F: FnMut(SymValue) -> Result<SymValue, SmtError>,
    {
        match self {
            SymValue::Union {
                cond,
                then_value,
                else_value,
            } => {
                let then_value = then_value.fmap(f)?;
                let else_value = else_value.fmap(f)?;
                Ok(SymValue::ite(cond, then_value, else_value))
            }
            other => f(other),
        }
    }

    pub fn fmap_term<F>(self, f: &mut F) -> Result<Term, SmtError>
    where
        F: FnMut(SymValue) -> Result<Term, SmtError>,
    {
        match self {
            SymValue::Union {
                cond,
                then_value,
                else_value,
            } => {
                let then_term = then_value.fmap_term(f)?;
                let else_term = else_value.fmap_term(f)?;
                Ok(Term::ite(cond, then_term, else_term))
            }
            other => f(other),
        }
    }

    pub fn into_term(self) -> Result<Term, SmtError> {
        match self {
            SymValue::Term(t) => Ok(t),
            other => Err(unsupported(format!("expected a solver term, got {other:?}"))),
        }
    }

    /// Bag slots, with unions flattened into guarded slots. Slot order is
    /// preserved on both sides so "first present element" is unchanged.
    pub fn into_slots(self) -> Result<Vec<Slot>, SmtError> {
        match self {
            SymValue::Bag(slots) => Ok(slots),
            SymValue::Union {
                cond,
                then_value,
                else_value,
            } => {
                let mut slots = guard_slots(then_value.into_slots()?, &cond);
                slots.extend(guard_slots(else_value.into_slots()?, &Term::not(cond)));
                Ok(slots)
            }
            other => Err(unsupported(format!("expected a bag, got {other:?}"))),
        }
    }

    pub fn into_map(self) -> Result<SymMap, SmtError> {
        match self {
            SymValue::Map(map) => Ok(map),
            SymValue::Union {
                cond,
                then_value,
                else_value,
            } => {
                let then_map = then_value.into_map()?;
                let else_map = else_value.into_map()?;
                let not_cond = Term::not(cond.clone());
                let mut entries = Vec::with_capacity(then_map.entries.len() + else_map.entries.len());
                for (guard, side) in [(&cond, then_map.entries), (&not_cond, else_map.entries)] {
                    entries.extend(side.into_iter().map(|MapEntry { present, key, value }| {
                        MapEntry {
                            present: Term::and([guard.clone(), present]),
                            key,
                            value,
                        }
                    }));
                }
                Ok(SymMap {
                    entries,
                    default: Box::new(SymValue::ite(cond, *then_map.default, *else_map.default)),
                })
            }
            other => Err(unsupported(format!("expected a map, got {other:?}"))),
        }
    }

    pub fn default_of(ty: &Type) -> SymValue {
        match ty {
            Type::Bool => SymValue::Term(Term::bool(false)),
            Type::Maybe(inner) => SymValue::Maybe {
                present: Term::bool(false),
                value: Box::new(SymValue::default_of(inner)),
            },
            Type::Bag(_) => SymValue::Bag(Vec::new()),
            Type::Map(_, v) => SymValue::Map(SymMap {
                entries: Vec::new(),
                default: Box::new(SymValue::default_of(v)),
            }),
            Type::Record(fields) => SymValue::Record(
                fields
                    .iter()
                    .map(|(f, t)| (f.clone(), SymValue::default_of(t)))
                    .collect(),
            ),
            Type::Tuple(ts) => SymValue::Tuple(ts.iter().map(SymValue::default_of).collect()),
            Type::Handle { value, .. } => SymValue::Handle {
                id: Term::int(0),
                value: Box::new(SymValue::default_of(value)),
            },
            other => SymValue::Term(Term::zero(sort_of(other).unwrap_or(Sort::Int))),
        }
    }
}

fn guard_slots(slots: Vec<Slot>, guard: &Term) -> Vec<Slot> {
    slots
        .into_iter()
        .map(|slot| Slot {
            mask: Term::and([guard.clone(), slot.mask]),
            elem: slot.elem,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_var(name: &str) -> Term {
        Term::var(name, Sort::Int)
    }

    fn bag(elems: &[&str]) -> SymValue {
        SymValue::Bag(
            elems
                .iter()
                .map(|e| Slot {
                    mask: Term::bool(true),
                    elem: SymValue::Term(int_var(e)),
                })
                .collect(),
        )
    }

    #[test]
    fn terms_collapse_to_native_conditionals() {
        let c = Term::var("c", Sort::Bool);
        let v = SymValue::ite(c.clone(), SymValue::Term(int_var("a")), SymValue::Term(int_var("b")));
        assert_eq!(v, SymValue::Term(Term::ite(c, int_var("a"), int_var("b"))));
    }

    #[test]
    fn fmap_recollapses_once_branches_become_terms() {
        let c = Term::var("c", Sort::Bool);
        let u = SymValue::ite(c.clone(), bag(&["a"]), bag(&["a", "b"]));
        assert!(matches!(u, SymValue::Union { .. }));
        let len = u
            .fmap(&mut |v| {
                let n = v.into_slots()?.len() as i64;
                Ok(SymValue::Term(Term::int(n)))
            })
            .unwrap();
        assert_eq!(len, SymValue::Term(Term::ite(c, Term::int(1), Term::int(2))));
    }

    #[test]
    fn union_bags_flatten_into_guarded_slots() {
        let c = Term::var("c", Sort::Bool);
        let slots = SymValue::ite(c.clone(), bag(&["a"]), bag(&["b"]))
            .into_slots()
            .unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].mask, c.clone());
        assert_eq!(slots[1].mask, Term::not(c));
    }
}
