//! Bounded symbolic verification over the synthesizer IR: encoding to
//! SMT-LIB, solving with z3, and reconstructing validated models.

use synth_ir::{Exp, Interpreter};
use thiserror::Error;

pub mod classify;
mod config;
pub mod encode;
mod model;
mod session;
mod sexp;
pub mod symbolic;
pub mod term;

pub use config::{SolverConfig, DEFAULT_COLLECTION_DEPTH, DEFAULT_Z3};
pub use encode::{Encoder, SymEnv};
pub use model::{Model, ModelFinder};
pub use session::{solver_available, CheckOutcome, Session};
pub use sexp::Atom;
pub use symbolic::SymValue;
pub use term::{Sort, Term};

#[derive(Debug, Error)]
pub enum SmtError {
    #[error("unsupported construct: {message}")]
    UnsupportedConstruct { message: String },
    #[error("solver could not decide {formula}")]
    SolverUnknown { formula: String },
    #[error(
        "model validation failed: {formula} evaluated to {outcome}\nmodel: {model}\nassertions:\n{assertions}"
    )]
    ModelValidation {
        formula: String,
        outcome: String,
        model: String,
        assertions: String,
    },
    #[error("invalid solver configuration: {message}")]
    Config { message: String },
    #[error(transparent)]
    Solver(#[from] anyhow::Error),
}

/// A model of `formula` over its free variables, validated with the
/// reference interpreter.
pub fn satisfy(formula: &Exp, config: &SolverConfig) -> Result<Option<Model>, SmtError> {
    ModelFinder::new(config.clone(), &Interpreter).satisfy(formula)
}

/// Whether `formula` holds for every assignment within the collection bound.
pub fn valid(formula: &Exp, config: &SolverConfig) -> Result<bool, SmtError> {
    ModelFinder::new(config.clone(), &Interpreter).valid(formula)
}


#[cfg(test)]
mod tests {
    use synth_ir::{Clause, Env, EvalError, Lambda, Oracle, Type, Value};

    use super::test_support::z3_config;
    use super::*;

    fn int_bag(ns: &[i64]) -> Exp {
        Exp::bag_of(Type::Int, ns.iter().map(|n| Exp::num(*n)).collect())
    }

    #[test]
    #[ignore = "requires z3"]
    fn excluded_middle_is_valid() {
        let config = z3_config();
        let x = Exp::var("x", Type::Bool);
        assert!(valid(&Exp::or(x.clone(), Exp::not(x)), &config).expect("solves"));
    }

    #[test]
    #[ignore = "requires z3"]
    fn equal_integers_have_a_validated_model() {
        let config = z3_config();
        let f = Exp::eq(Exp::var("x", Type::Int), Exp::var("y", Type::Int));
        let model = satisfy(&f, &config).expect("solves").expect("satisfiable");
        assert_eq!(model.get("x"), model.get("y"));
        assert!(model.get("x").is_some());
    }

    #[test]
    #[ignore = "requires z3"]
    fn bag_equality_ignores_construction_order() {
        let config = z3_config();
        let same = Exp::eq(int_bag(&[1, 2]), int_bag(&[2, 1]));
        assert!(valid(&same, &config).expect("solves"));
        let different = Exp::eq(int_bag(&[1, 2]), int_bag(&[1, 1]));
        assert!(!valid(&different, &config).expect("solves"));
        assert!(satisfy(&different, &config).expect("solves").is_none());
    }

    #[test]
    #[ignore = "requires z3"]
    fn free_bags_compare_as_multisets() {
        let config = z3_config();
        let xs = Exp::var("xs", Type::bag(Type::Int));
        let ys = Exp::var("ys", Type::bag(Type::Int));
        let f = Exp::all([
            Exp::eq(xs.clone(), ys.clone()),
            Exp::eq(Exp::len(xs.clone()), Exp::num(2)),
            Exp::contains(xs, Exp::num(7)),
        ]);
        let model = satisfy(&f, &config).expect("solves").expect("satisfiable");
        assert_eq!(model.get("xs"), model.get("ys"));
        let xs = model.get("xs").and_then(Value::as_bag).expect("bag");
        assert_eq!(xs.len(), 2);
        assert!(xs.contains(&Value::Int(7)));
    }

    #[test]
    #[ignore = "requires z3"]
    fn handles_with_one_identity_share_a_payload() {
        let config = z3_config();
        let node = Type::handle("Node", Type::Int);
        let a = Exp::var("a", node.clone());
        let b = Exp::var("b", node);
        let f = Exp::eq(a.clone(), b.clone());
        let model = satisfy(&f, &config).expect("solves").expect("satisfiable");
        match (model.get("a"), model.get("b")) {
            (Some(Value::Handle { id: i, value: v }), Some(Value::Handle { id: j, value: w })) => {
                assert_eq!(i, j);
                assert_eq!(v, w);
            }
            other => panic!("expected two handles, got {other:?}"),
        }

        let distinct_payloads = Exp::all([
            Exp::eq(a.clone(), b.clone()),
            Exp::not(Exp::eq(Exp::get_field(a, "val"), Exp::get_field(b, "val"))),
        ]);
        assert!(satisfy(&distinct_payloads, &config).expect("solves").is_none());
    }

    #[test]
    #[ignore = "requires z3"]
    fn grouped_maps_and_uninterpreted_calls_reconstruct() {
        let config = z3_config();
        let xs = Exp::var("xs", Type::bag(Type::Int));
        let f = |x: Exp| Exp::call("f", vec![x], Type::Int);
        let counts = Exp::make_map(
            xs.clone(),
            Lambda::new("x", Type::Int, f(Exp::var("x", Type::Int))),
            Lambda::new("g", Type::bag(Type::Int), Exp::len(Exp::var("g", Type::bag(Type::Int)))),
        );
        let formula = Exp::all([
            Exp::eq(Exp::map_get(counts, Exp::num(3)), Exp::num(2)),
            Exp::not(Exp::eq(f(Exp::num(0)), Exp::num(3))),
        ]);
        let model = satisfy(&formula, &config).expect("solves").expect("satisfiable");
        assert!(model.env.funcs.contains_key("f(Int) -> Int"));
        assert_eq!(model.get("xs").and_then(Value::as_bag).map(<[Value]>::len), Some(2));
    }

    #[test]
    #[ignore = "requires z3"]
    fn one_name_at_two_signatures_gets_two_tables() {
        let config = z3_config();
        let formula = Exp::all([
            Exp::eq(Exp::call("f", vec![Exp::num(0)], Type::Int), Exp::num(1)),
            Exp::call("f", vec![Exp::num(0)], Type::Bool),
        ]);
        let model = satisfy(&formula, &config).expect("solves").expect("satisfiable");
        let int_table = &model.env.funcs["f(Int) -> Int"];
        let bool_table = &model.env.funcs["f(Int) -> Bool"];
        assert_eq!(int_table.apply(&[Value::Int(0)]), Some(&Value::Int(1)));
        assert_eq!(bool_table.apply(&[Value::Int(0)]), Some(&Value::Bool(true)));
    }

    #[test]
    #[ignore = "requires z3"]
    fn string_literals_survive_reconstruction() {
        let config = z3_config();
        let s = Exp::var("s", Type::String);
        let f = Exp::all([
            Exp::not(Exp::eq(s.clone(), Exp::string("hello"))),
            Exp::not(Exp::eq(s.clone(), Exp::string(""))),
        ]);
        let model = satisfy(&f, &config).expect("solves").expect("satisfiable");
        let Some(Value::Str(found)) = model.get("s") else {
            panic!("expected a string");
        };
        assert!(!found.is_empty() && found != "hello");

        let pinned = Exp::eq(s, Exp::string("hello"));
        let model = satisfy(&pinned, &config).expect("solves").expect("satisfiable");
        assert_eq!(model.get("s"), Some(&Value::Str("hello".to_string())));
    }

    #[test]
    #[ignore = "requires z3"]
    fn integers_wrap_at_the_i64_boundary() {
        let config = z3_config();
        let x = Exp::var("x", Type::Int);
        let y = Exp::var("y", Type::Int);

        let beyond = Exp::not(Exp::le(x.clone(), Exp::num(i64::MAX)));
        assert!(satisfy(&beyond, &config).expect("solves").is_none());

        let successor = Exp::all([
            Exp::eq(x.clone(), Exp::num(i64::MAX)),
            Exp::eq(y, Exp::add(x.clone(), Exp::num(1))),
        ]);
        let model = satisfy(&successor, &config).expect("solves").expect("satisfiable");
        assert_eq!(model.get("y"), Some(&Value::Int(i64::MIN)));

        let no_successor = Exp::le(Exp::add(x.clone(), Exp::num(1)), x);
        let model = satisfy(&no_successor, &config).expect("solves").expect("satisfiable");
        assert_eq!(model.get("x"), Some(&Value::Int(i64::MAX)));
    }

    #[test]
    #[ignore = "requires z3"]
    fn slot_ordering_keeps_every_answer() {
        let ordered = z3_config().with_collection_depth(3);
        let unordered = SolverConfig {
            order_slots: false,
            ..ordered.clone()
        };
        let xs = Exp::var("xs", Type::bag(Type::Int));
        let ys = Exp::var("ys", Type::bag(Type::Int));
        let len_is = |bag: &Exp, n: i64| Exp::eq(Exp::len(bag.clone()), Exp::num(n));
        let formulas = [
            Exp::all([len_is(&xs, 1), Exp::contains(xs.clone(), Exp::num(3))]),
            Exp::all([
                len_is(&xs, 1),
                Exp::contains(xs.clone(), Exp::num(3)),
                Exp::contains(xs.clone(), Exp::num(4)),
            ]),
            len_is(&xs, 3),
            len_is(&xs, 4),
            Exp::all([
                Exp::eq(Exp::add(xs.clone(), ys.clone()), int_bag(&[1, 2, 2])),
                len_is(&ys, 2),
            ]),
            Exp::all([
                Exp::eq(xs.clone(), ys.clone()),
                Exp::not(Exp::eq(Exp::sum(xs), Exp::sum(ys))),
            ]),
        ];
        for f in &formulas {
            let with = satisfy(f, &ordered).expect("solves");
            let without = satisfy(f, &unordered).expect("solves");
            assert_eq!(with.is_some(), without.is_some(), "{f}");
        }

        let single = satisfy(&formulas[0], &ordered).expect("solves").expect("satisfiable");
        assert_eq!(single.get("xs"), Some(&Value::Bag(vec![Value::Int(3)])));
    }

    #[test]
    #[ignore = "requires z3"]
    fn comprehensions_encode_through_their_clauses() {
        let config = z3_config();
        let xs = Exp::var("xs", Type::bag(Type::Int));
        let x = Exp::var("x", Type::Int);
        let positives = Exp::comprehension(
            x.clone(),
            &[
                Clause::Pull { var: "x".into(), bag: xs.clone() },
                Clause::Cond(Exp::not(Exp::le(x, Exp::num(0)))),
            ],
        );
        let f = Exp::all([
            Exp::eq(positives, int_bag(&[5])),
            Exp::eq(Exp::len(xs), Exp::num(2)),
        ]);
        let model = satisfy(&f, &config).expect("solves").expect("satisfiable");
        let xs = model.get("xs").and_then(Value::as_bag).expect("bag");
        assert!(xs.contains(&Value::Int(5)));
        assert!(xs.iter().any(|v| matches!(v, Value::Int(n) if *n <= 0)));
    }

    struct Contrarian;

    impl Oracle for Contrarian {
        fn evaluate(&self, _e: &Exp, _env: &Env) -> Result<Value, EvalError> {
            Ok(Value::Bool(false))
        }
    }

    #[test]
    #[ignore = "requires z3"]
    fn disagreeing_oracle_is_a_validation_failure() {
        let config = z3_config();
        let x = Exp::var("x", Type::Int);
        let err = ModelFinder::new(config, &Contrarian)
            .satisfy(&Exp::eq(x, Exp::num(4)))
            .expect_err("oracle rejects every model");
        match err {
            SmtError::ModelValidation {
                formula,
                outcome,
                model,
                ..
            } => {
                assert_eq!(formula, "(x == 4)");
                assert_eq!(outcome, "false");
                assert!(model.contains("\"x\""));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn unsupported_constructs_fail_before_solving() {
        let config = SolverConfig {
            z3_path: "/nonexistent/z3".into(),
            ..SolverConfig::default()
        };
        let m = Exp::var("m", Type::map(Type::Int, Type::Int));
        let err = satisfy(&Exp::eq(m.clone(), m), &config).expect_err("map equality");
        assert!(matches!(err, SmtError::UnsupportedConstruct { .. }));
    }
}
