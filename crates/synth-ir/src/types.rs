use serde::{Deserialize, Serialize};

/// The closed set of IR types.
///
/// Nesting rules (no bag of collections, no map-valued maps) are not enforced
/// here; the IR lets you build such types and the well-formedness checker
/// rejects them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Type {
    Int,
    Long,
    Bool,
    String,
    BitVec(u32),
    Enum(Vec<String>),
    Native(String),
    Maybe(Box<Type>),
    Bag(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Record(Vec<(String, Type)>),
    Tuple(Vec<Type>),
    Handle { name: String, value: Box<Type> },
}

impl Type {
    pub fn bag(elem: Type) -> Type {
        Type::Bag(Box::new(elem))
    }

    pub fn maybe(inner: Type) -> Type {
        Type::Maybe(Box::new(inner))
    }

    pub fn map(key: Type, value: Type) -> Type {
        Type::Map(Box::new(key), Box::new(value))
    }

    pub fn handle(name: impl Into<String>, value: Type) -> Type {
        Type::Handle {
            name: name.into(),
            value: Box::new(value),
        }
    }

    pub fn enumeration<I, S>(cases: I) -> Type
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Type::Enum(cases.into_iter().map(Into::into).collect())
    }

    pub fn elem_type(&self) -> Option<&Type> {
        match self {
            Type::Bag(elem) => Some(elem),
            _ => None,
        }
    }

    pub fn field_type(&self, field: &str) -> Option<&Type> {
        match self {
            Type::Record(fields) => fields.iter().find(|(f, _)| f == field).map(|(_, t)| t),
            Type::Handle { value, .. } if field == "val" => Some(value),
            _ => None,
        }
    }
}
