//! Typed expression IR for the synthesizer's verification core: types,
//! expression trees, concrete values, the reference interpreter and syntax
//! utilities.

pub mod eval;
pub mod exp;
pub mod fresh;
pub mod pretty;
pub mod syntax;
pub mod types;
pub mod value;

pub use eval::{eval, func_key, Env, EvalError, Interpreter, Oracle};
pub use exp::{BinOp, Clause, Exp, ExpKind, Lambda, UnOp};
pub use fresh::NameGen;
pub use pretty::pprint;
pub use types::Type;
pub use value::{FuncTable, MapValue, Value};
