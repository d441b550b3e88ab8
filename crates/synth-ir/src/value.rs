use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::types::Type;

/// A concrete IR value.
///
/// Equality is semantic rather than structural: bags compare as multisets,
/// handles compare by identity, maps compare by lookup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    BitVec { value: u64, width: u32 },
    Enum(String),
    Native { name: String, id: i64 },
    Maybe(Option<Box<Value>>),
    Bag(Vec<Value>),
    Map(MapValue),
    Record(Vec<(String, Value)>),
    Tuple(Vec<Value>),
    Handle { id: i64, value: Box<Value> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapValue {
    /// Keys are distinct; order is first-insertion order.
    pub entries: Vec<(Value, Value)>,
    pub default: Box<Value>,
}

impl MapValue {
    pub fn get(&self, key: &Value) -> &Value {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .unwrap_or(&self.default)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl Value {
    /// The value an absent map key or an unconstrained slot of `ty` takes.
    pub fn default_of(ty: &Type) -> Value {
        match ty {
            Type::Int | Type::Long => Value::Int(0),
            Type::Bool => Value::Bool(false),
            Type::String => Value::Str(String::new()),
            Type::BitVec(width) => Value::BitVec {
                value: 0,
                width: *width,
            },
            Type::Enum(cases) => Value::Enum(cases.first().cloned().unwrap_or_default()),
            Type::Native(name) => Value::Native {
                name: name.clone(),
                id: 0,
            },
            Type::Maybe(_) => Value::Maybe(None),
            Type::Bag(_) => Value::Bag(Vec::new()),
            Type::Map(_, v) => Value::Map(MapValue {
                entries: Vec::new(),
                default: Box::new(Value::default_of(v)),
            }),
            Type::Record(fields) => Value::Record(
                fields
                    .iter()
                    .map(|(f, t)| (f.clone(), Value::default_of(t)))
                    .collect(),
            ),
            Type::Tuple(ts) => Value::Tuple(ts.iter().map(Value::default_of).collect()),
            Type::Handle { value, .. } => Value::Handle {
                id: 0,
                value: Box::new(Value::default_of(value)),
            },
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bag(&self) -> Option<&[Value]> {
        match self {
            Value::Bag(elems) => Some(elems),
            _ => None,
        }
    }

    fn count_of(elems: &[Value], x: &Value) -> usize {
        elems.iter().filter(|y| *y == x).count()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::BitVec { value: a, .. }, Value::BitVec { value: b, .. }) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Native { id: a, .. }, Value::Native { id: b, .. }) => a == b,
            (Value::Maybe(a), Value::Maybe(b)) => a == b,
            (Value::Bag(a), Value::Bag(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .all(|x| Value::count_of(a, x) == Value::count_of(b, x))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.default == b.default
                    && a.keys().chain(b.keys()).all(|k| a.get(k) == b.get(k))
            }
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Handle { id: a, .. }, Value::Handle { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Int(n) => n.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Str(s) => s.hash(state),
            Value::BitVec { value, .. } => value.hash(state),
            Value::Enum(name) => name.hash(state),
            Value::Native { id, .. } => id.hash(state),
            Value::Maybe(inner) => inner.hash(state),
            // Order-independent: sum of element hashes.
            Value::Bag(elems) => {
                let combined = elems.iter().fold(0u64, |acc, x| {
                    let mut h = DefaultHasher::new();
                    x.hash(&mut h);
                    acc.wrapping_add(h.finish())
                });
                combined.hash(state);
            }
            Value::Map(m) => m.default.hash(state),
            Value::Record(fields) => fields.hash(state),
            Value::Tuple(items) => items.hash(state),
            Value::Handle { id, .. } => id.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::BitVec { value, width } => write!(f, "{value}bv{width}"),
            Value::Enum(name) => f.write_str(name),
            Value::Native { name, id } => write!(f, "{name}#{id}"),
            Value::Maybe(None) => f.write_str("null"),
            Value::Maybe(Some(v)) => write!(f, "just {v}"),
            Value::Bag(elems) => {
                f.write_str("{")?;
                for (i, x) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{x}")?;
                }
                f.write_str("}")
            }
            Value::Map(m) => {
                f.write_str("{")?;
                for (k, v) in &m.entries {
                    write!(f, "{k} -> {v}, ")?;
                }
                write!(f, "_ -> {}}}", m.default)
            }
            Value::Record(fields) => {
                f.write_str("{ ")?;
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {v}")?;
                }
                f.write_str(" }")
            }
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (i, x) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{x}")?;
                }
                f.write_str(")")
            }
            Value::Handle { id, value } => write!(f, "<{id}: {value}>"),
        }
    }
}

/// Witness for an uninterpreted function: the argument tuples the solver was
/// asked about, plus a fallback for everything else.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FuncTable {
    pub entries: Vec<(Vec<Value>, Value)>,
    pub default: Value,
}

impl FuncTable {
    pub fn new(default: Value) -> Self {
        Self {
            entries: Vec::new(),
            default,
        }
    }

    pub fn insert(&mut self, args: Vec<Value>, result: Value) {
        if self.entries.iter().all(|(a, _)| *a != args) {
            self.entries.push((args, result));
        }
    }

    pub fn apply(&self, args: &[Value]) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(a, _)| a.as_slice() == args)
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn bags_compare_as_multisets() {
        let a = Value::Bag(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::Bag(vec![Value::Int(2), Value::Int(1)]);
        let c = Value::Bag(vec![Value::Int(1), Value::Int(1)]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set = [a, b].into_iter().collect::<HashSet<_>>();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn handles_compare_by_identity() {
        let h1 = Value::Handle {
            id: 3,
            value: Box::new(Value::Int(1)),
        };
        let h2 = Value::Handle {
            id: 3,
            value: Box::new(Value::Int(2)),
        };
        assert_eq!(h1, h2);
    }

    #[test]
    fn map_lookup_falls_back_to_default() {
        let m = MapValue {
            entries: vec![(Value::Int(1), Value::Bool(true))],
            default: Box::new(Value::Bool(false)),
        };
        assert_eq!(m.get(&Value::Int(1)), &Value::Bool(true));
        assert_eq!(m.get(&Value::Int(7)), &Value::Bool(false));
    }

    #[test]
    fn default_values_follow_type_structure() {
        let ty = Type::Record(vec![
            ("xs".to_string(), Type::bag(Type::Int)),
            ("tag".to_string(), Type::enumeration(["A", "B"])),
        ]);
        assert_eq!(
            Value::default_of(&ty).to_string(),
            "{ xs: {}, tag: A }"
        );
    }
}
