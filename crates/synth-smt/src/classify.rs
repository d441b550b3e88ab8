use synth_ir::Type;

use crate::term::Sort;

/// Types with a direct solver sort. Values of these types are single terms;
/// everything else is a composite symbolic value.
pub fn is_decideable(ty: &Type) -> bool {
    sort_of(ty).is_some()
}

/// Types legal as map keys: decideable types, handles, and records, tuples
/// and maybes built only from scalars.
pub fn is_scalar(ty: &Type) -> bool {
    match ty {
        Type::Handle { .. } => true,
        Type::Maybe(inner) => is_scalar(inner),
        Type::Record(fields) => fields.iter().all(|(_, t)| is_scalar(t)),
        Type::Tuple(ts) => ts.iter().all(is_scalar),
        Type::Bag(_) | Type::Map(_, _) => false,
        other => is_decideable(other),
    }
}

pub fn is_numeric(ty: &Type) -> bool {
    matches!(ty, Type::Int | Type::Long | Type::BitVec(_))
}

pub fn is_collection(ty: &Type) -> bool {
    matches!(ty, Type::Bag(_))
}

/// Solver sort for a decideable type. Strings, enums and natives are
/// integers; enums carry a separate range assertion.
pub fn sort_of(ty: &Type) -> Option<Sort> {
    match ty {
        Type::Bool => Some(Sort::Bool),
        Type::Int | Type::Long | Type::String | Type::Enum(_) | Type::Native(_) => Some(Sort::Int),
        Type::BitVec(width) => Some(Sort::BitVec(*width)),
        _ => None,
    }
}
