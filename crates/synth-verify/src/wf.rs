use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use synth_ir::syntax::{children, free_var_names, replace, Child};
use synth_ir::{pprint, BinOp, Exp, ExpKind, Interpreter, Lambda, NameGen, Oracle, Type, UnOp};
use synth_smt::classify::{is_collection, is_scalar};
use synth_smt::{ModelFinder, SolverConfig};
use tracing::{debug, trace};

use crate::context::{Context, Pool};
use crate::VerifyError;

pub const DEFAULT_SIZE_BOUND_DEPTH: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WfConfig {
    /// Collection depth for the map size-bound query, which needs more room
    /// than ordinary queries to exhibit a blow-up.
    pub size_bound_depth: usize,
    pub solver: SolverConfig,
}

impl Default for WfConfig {
    fn default() -> Self {
        Self {
            size_bound_depth: DEFAULT_SIZE_BOUND_DEPTH,
            solver: SolverConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub toplevel: Exp,
    pub offending: Exp,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {} in {}",
            self.reason,
            pprint(&self.offending),
            pprint(&self.toplevel)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    WellFormed,
    NotWellFormed(Violation),
}

impl Verdict {
    pub fn is_well_formed(&self) -> bool {
        matches!(self, Verdict::WellFormed)
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Verdict::WellFormed => None,
            Verdict::NotWellFormed(v) => Some(v),
        }
    }
}

/// Checks `e` in `pool` under `ctx`, using the reference interpreter to
/// validate solver models.
pub fn check(
    e: &Exp,
    ctx: &Context,
    pool: Pool,
    assumptions: &Exp,
    config: &WfConfig,
) -> Result<Verdict, VerifyError> {
    Checker::new(config.clone(), &Interpreter).check(e, ctx, pool, assumptions)
}

pub struct Checker<'o, O: Oracle + ?Sized> {
    config: WfConfig,
    oracle: &'o O,
}

impl<'o, O: Oracle + ?Sized> Checker<'o, O> {
    pub fn new(config: WfConfig, oracle: &'o O) -> Self {
        Self { config, oracle }
    }

    pub fn config(&self) -> &WfConfig {
        &self.config
    }

    /// The first violation in a pre-order walk of `e`, or `WellFormed`.
    /// Solver failures during the semantic rules are errors, not verdicts.
    #[tracing::instrument(level = "trace", skip_all, fields(pool = pool.name()))]
    pub fn check(
        &self,
        e: &Exp,
        ctx: &Context,
        pool: Pool,
        assumptions: &Exp,
    ) -> Result<Verdict, VerifyError> {
        let assumption_vars = free_var_names(assumptions);
        let mut taken = all_names(e);
        taken.extend(assumption_vars.iter().cloned());
        taken.extend(ctx.names().map(str::to_string));
        let mut walk = Walk {
            checker: self,
            toplevel: e,
            assumptions,
            assumption_vars,
            names: NameGen::avoiding(taken),
            renamed: Vec::new(),
        };
        let verdict = match walk.exp(e, ctx, pool)? {
            None => Verdict::WellFormed,
            Some(v) => {
                debug!(reason = %v.reason, offending = %v.offending, "not well-formed");
                Verdict::NotWellFormed(v)
            }
        };
        Ok(verdict)
    }

    /// Whether `assumptions ∧ path ⇒ goal` holds at `depth`.
    fn valid_under(
        &self,
        assumptions: &Exp,
        ctx: &Context,
        goal: Exp,
        depth: usize,
    ) -> Result<bool, VerifyError> {
        let hypothesis = Exp::all([assumptions.clone(), ctx.path_condition()]);
        let formula = Exp::implies(hypothesis, goal);
        let solver = self.config.solver.clone().with_collection_depth(depth);
        Ok(ModelFinder::new(solver, self.oracle).valid(&formula)?)
    }
}

struct Walk<'c, 'o, O: Oracle + ?Sized> {
    checker: &'c Checker<'o, O>,
    toplevel: &'c Exp,
    assumptions: &'c Exp,
    assumption_vars: HashSet<String>,
    names: NameGen,
    /// Binders renamed by `unshadow`: fresh name and the original variable.
    renamed: Vec<(String, Exp)>,
}

macro_rules! first_violation {
    ($e:expr) => {
        if let Some(v) = $e? {
            return Ok(Some(v));
        }
    };
}

impl<O: Oracle + ?Sized> Walk<'_, '_, O> {
    fn exp(&mut self, e: &Exp, ctx: &Context, pool: Pool) -> Result<Option<Violation>, VerifyError> {
        trace!(expr = %e, pool = pool.name(), "wf");
        if let Some(reason) = self.node(e, ctx, pool)? {
            return Ok(Some(Violation {
                toplevel: self.toplevel.clone(),
                offending: self.restore_names(e),
                reason,
            }));
        }
        match &e.kind {
            ExpKind::StateVar(inner) => self.exp(inner, ctx, Pool::State),
            ExpKind::Map(bag, f) | ExpKind::Filter(bag, f) | ExpKind::FlatMap(bag, f) => {
                first_violation!(self.exp(bag, ctx, pool));
                self.lambda(f, ctx, pool, |x| Exp::contains((**bag).clone(), x))
            }
            ExpKind::MakeMap { source, key, value } => {
                first_violation!(self.exp(source, ctx, pool));
                first_violation!(self.lambda(key, ctx, pool, |x| Exp::contains((**source).clone(), x)));
                self.lambda(value, ctx, pool, |_| Exp::truth())
            }
            ExpKind::MakeMap2 { source, value } => {
                first_violation!(self.exp(source, ctx, pool));
                self.lambda(value, ctx, pool, |x| Exp::contains((**source).clone(), x))
            }
            ExpKind::App(f, arg) => {
                first_violation!(self.exp(arg, ctx, pool));
                self.lambda(f, ctx, pool, |x| Exp::eq(x, (**arg).clone()))
            }
            ExpKind::Cond {
                cond,
                then_branch,
                else_branch,
            } => {
                first_violation!(self.exp(cond, ctx, pool));
                let taken = ctx.clone().assume((**cond).clone());
                first_violation!(self.exp(then_branch, &taken, pool));
                let not_taken = ctx.clone().assume(Exp::not((**cond).clone()));
                self.exp(else_branch, &not_taken, pool)
            }
            _ => {
                for child in children(e) {
                    match child {
                        Child::Exp(c) => first_violation!(self.exp(c, ctx, pool)),
                        Child::Lambda(l) => first_violation!(self.lambda(l, ctx, pool, |_| Exp::truth())),
                    }
                }
                Ok(None)
            }
        }
    }

    fn lambda(
        &mut self,
        l: &Lambda,
        ctx: &Context,
        pool: Pool,
        fact: impl FnOnce(Exp) -> Exp,
    ) -> Result<Option<Violation>, VerifyError> {
        let l = self.unshadow(l, ctx);
        // Binder facts compare the binder with solver equality, which maps lack.
        let fact = if has_map(&l.arg_ty) { Exp::truth() } else { fact(l.arg_var()) };
        let inner = ctx.bind(l.arg.clone(), l.arg_ty.clone(), pool, fact);
        self.exp(&l.body, &inner, pool)
    }

    /// Renames a binder whose name is already visible, so that path
    /// conditions mentioning the outer variable keep their meaning.
    fn unshadow(&mut self, l: &Lambda, ctx: &Context) -> Lambda {
        if ctx.lookup(&l.arg).is_none() && !self.assumption_vars.contains(&l.arg) {
            return l.clone();
        }
        let name = self.names.fresh(&l.arg);
        let renamed = Exp::var(name.clone(), l.arg_ty.clone());
        let body = replace(&l.body, &l.arg_var(), &renamed, |a, b| a == b, |_| true);
        self.renamed.push((name.clone(), l.arg_var()));
        Lambda::new(name, l.arg_ty.clone(), body)
    }

    /// `e` with binders renamed by the walk given their written names back.
    fn restore_names(&self, e: &Exp) -> Exp {
        let mut out = e.clone();
        for (fresh, original) in self.renamed.iter().rev() {
            if free_var_names(&out).contains(fresh) {
                let from = Exp::var(fresh.clone(), original.ty.clone());
                out = replace(&out, &from, original, |a, b| a == b, |_| true);
            }
        }
        out
    }

    fn node(&mut self, e: &Exp, ctx: &Context, pool: Pool) -> Result<Option<String>, VerifyError> {
        match (&e.kind, pool) {
            (ExpKind::StateVar(_), Pool::State) => {
                return Ok(Some("cached state marker in state pool position".to_string()));
            }
            (ExpKind::Var(name), _) => match (ctx.pool_of(name), pool) {
                (Some(Pool::State), Pool::Runtime) => return Ok(Some("state var at runtime".to_string())),
                (Some(Pool::Runtime), Pool::State) => return Ok(Some("arg in state exp".to_string())),
                // Unknown variables are accepted as-is.
                _ => {}
            },
            _ => {}
        }
        if let Some(reason) = type_violation(&e.ty) {
            return Ok(Some(reason.to_string()));
        }
        if pool == Pool::State {
            if let Some(op) = transient_op(e) {
                return Ok(Some(format!("{op} in state position")));
            }
        }
        match &e.kind {
            ExpKind::Unary(UnOp::The, bag) => {
                let goal = Exp::le(Exp::len((**bag).clone()), Exp::num(1));
                let depth = self.checker.config.solver.collection_depth;
                if !self.checker.valid_under(self.assumptions, ctx, goal, depth)? {
                    return Ok(Some("the on a bag that may hold more than one element".to_string()));
                }
            }
            ExpKind::MakeMap2 { source, value } if is_collection(value.result_type()) => {
                let state_size = ctx
                    .state_vars()
                    .into_iter()
                    .filter(|v| is_collection(&v.ty))
                    .map(Exp::len)
                    .reduce(Exp::add)
                    .unwrap_or_else(|| Exp::num(0));
                let image = Exp::flat_map(Exp::distinct((**source).clone()), value.clone());
                let goal = Exp::ge(state_size, Exp::len(image));
                let depth = self.checker.config.size_bound_depth;
                if !self.checker.valid_under(self.assumptions, ctx, goal, depth)? {
                    return Ok(Some("non-polynomial-sized map".to_string()));
                }
            }
            // OPEN QUESTION: every other construct is accepted. Whether
            // unlisted constructs should be rejected instead is undecided.
            _ => {}
        }
        Ok(None)
    }
}

fn type_violation(ty: &Type) -> Option<&'static str> {
    match ty {
        Type::Bag(elem) if is_collection(elem) => Some("collection of collections"),
        Type::Map(_, value) if matches!(**value, Type::Map(_, _)) => Some("map value type is a map"),
        Type::Map(key, _) if !is_scalar(key) => Some("map key type is not scalar"),
        _ => None,
    }
}

/// Whether solver equality on `ty` would have to compare maps. Handles
/// compare by identity.
fn has_map(ty: &Type) -> bool {
    match ty {
        Type::Map(_, _) => true,
        Type::Maybe(inner) | Type::Bag(inner) => has_map(inner),
        Type::Record(fields) => fields.iter().any(|(_, t)| has_map(t)),
        Type::Tuple(ts) => ts.iter().any(has_map),
        _ => false,
    }
}

fn transient_op(e: &Exp) -> Option<String> {
    let op = match &e.kind {
        ExpKind::Binary(BinOp::Sub, _, _) if is_collection(&e.ty) => "bag subtraction",
        ExpKind::Singleton(_) => "singleton",
        ExpKind::Num(n) if *n != 0 => return Some(format!("nonzero literal {n}")),
        ExpKind::FlatMap(_, _) => "flat-map",
        ExpKind::DropFront(_) => "drop-front",
        ExpKind::DropBack(_) => "drop-back",
        _ => return None,
    };
    Some(op.to_string())
}

fn all_names(e: &Exp) -> HashSet<String> {
    fn go(e: &Exp, out: &mut HashSet<String>) {
        if let ExpKind::Var(name) = &e.kind {
            out.insert(name.clone());
        }
        for child in children(e) {
            match child {
                Child::Exp(c) => go(c, out),
                Child::Lambda(l) => {
                    out.insert(l.arg.clone());
                    go(&l.body, out);
                }
            }
        }
    }

    let mut out = HashSet::new();
    go(e, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{init_tracing, z3_config};

    fn ints() -> Type {
        Type::bag(Type::Int)
    }

    fn int(name: &str) -> Exp {
        Exp::var(name, Type::Int)
    }

    fn xs() -> Exp {
        Exp::var("xs", ints())
    }

    fn ctx() -> Context {
        Context::new().with_state_var("xs", ints()).with_arg("k", Type::Int)
    }

    /// Syntactic rules never reach the solver, so an unusable solver path
    /// proves the verdict was reached without one.
    fn offline() -> WfConfig {
        init_tracing();
        WfConfig {
            solver: SolverConfig {
                z3_path: "/nonexistent/z3".into(),
                ..SolverConfig::default()
            },
            ..WfConfig::default()
        }
    }

    fn verdict(e: &Exp, pool: Pool) -> Verdict {
        check(e, &ctx(), pool, &Exp::truth(), &offline()).expect("syntactic check")
    }

    fn reason(e: &Exp, pool: Pool) -> String {
        match verdict(e, pool) {
            Verdict::NotWellFormed(v) => v.reason,
            Verdict::WellFormed => panic!("{e} unexpectedly well-formed"),
        }
    }

    #[test]
    fn nonzero_literal_in_state_is_rejected() {
        let e = Exp::state_var(Exp::filter(
            xs(),
            Lambda::new("x", Type::Int, Exp::eq(int("x"), Exp::num(1))),
        ));
        let Verdict::NotWellFormed(v) = verdict(&e, Pool::Runtime) else {
            panic!("expected a violation");
        };
        assert_eq!(v.offending, Exp::num(1));
        assert_eq!(v.toplevel, e);
        insta::assert_snapshot!(
            v.to_string(),
            @r"nonzero literal 1 in state position at 1 in EStateVar(Filter {\x -> (x == 1)} (xs))"
        );
    }

    #[test]
    fn zero_literal_in_state_is_fine() {
        let e = Exp::add(
            Exp::len(Exp::state_var(Exp::filter(
                xs(),
                Lambda::new("x", Type::Int, Exp::ge(int("x"), Exp::num(0))),
            ))),
            int("k"),
        );
        assert_eq!(verdict(&e, Pool::Runtime), Verdict::WellFormed);
    }

    #[test]
    fn pools_separate_state_and_arguments() {
        assert_eq!(reason(&Exp::len(xs()), Pool::Runtime), "state var at runtime");
        assert_eq!(
            reason(&Exp::state_var(Exp::eq(int("k"), Exp::num(0))), Pool::Runtime),
            "arg in state exp"
        );
        assert_eq!(
            reason(&Exp::state_var(Exp::state_var(xs())), Pool::Runtime),
            "cached state marker in state pool position"
        );
        assert_eq!(verdict(&Exp::state_var(xs()), Pool::Runtime), Verdict::WellFormed);
        assert_eq!(verdict(&xs(), Pool::State), Verdict::WellFormed);
    }

    #[test]
    fn binders_take_the_pool_of_their_construct() {
        // The binder `k` shadows the runtime argument inside the state filter.
        let e = Exp::add(
            Exp::len(Exp::state_var(Exp::filter(
                xs(),
                Lambda::new("k", Type::Int, Exp::ge(int("k"), Exp::num(0))),
            ))),
            int("k"),
        );
        assert_eq!(verdict(&e, Pool::Runtime), Verdict::WellFormed);

        let runtime_binder = Exp::filter(
            Exp::state_var(xs()),
            Lambda::new("x", Type::Int, Exp::eq(int("x"), int("k"))),
        );
        assert_eq!(verdict(&runtime_binder, Pool::Runtime), Verdict::WellFormed);
    }

    #[test]
    fn transient_operators_stay_out_of_state() {
        let cases = [
            (Exp::singleton(Exp::num(0)), "singleton in state position"),
            (Exp::sub(xs(), xs()), "bag subtraction in state position"),
            (Exp::drop_front(xs()), "drop-front in state position"),
            (Exp::drop_back(xs()), "drop-back in state position"),
            (
                Exp::flat_map(xs(), Lambda::new("x", Type::Int, xs())),
                "flat-map in state position",
            ),
        ];
        for (e, expected) in cases {
            assert_eq!(reason(&Exp::state_var(e.clone()), Pool::Runtime), expected);
            assert!(check(&e, &Context::new(), Pool::Runtime, &Exp::truth(), &offline())
                .expect("syntactic check")
                .is_well_formed());
        }
    }

    #[test]
    fn collection_types_are_restricted() {
        let nested = Exp::map(
            Exp::state_var(xs()),
            Lambda::new("x", Type::Int, Exp::singleton(int("x"))),
        );
        assert_eq!(reason(&nested, Pool::Runtime), "collection of collections");

        let bag_keyed = Exp::var("m", Type::map(ints(), Type::Int));
        let map_valued = Exp::var("n", Type::map(Type::Int, Type::map(Type::Int, Type::Int)));
        assert_eq!(reason(&bag_keyed, Pool::Runtime), "map key type is not scalar");
        assert_eq!(reason(&map_valued, Pool::Runtime), "map value type is a map");
    }

    #[test]
    fn violations_use_the_written_binder_names() {
        // `k` shadows the argument, so the walk renames it internally.
        let offending = Exp::map(
            Exp::state_var(xs()),
            Lambda::new("y", Type::Int, Exp::singleton(int("k"))),
        );
        let e = Exp::filter(
            Exp::state_var(xs()),
            Lambda::new("k", Type::Int, Exp::ge(Exp::len(offending.clone()), int("k"))),
        );
        let Verdict::NotWellFormed(v) = verdict(&e, Pool::Runtime) else {
            panic!("expected a violation");
        };
        assert_eq!(v.reason, "collection of collections");
        assert_eq!(v.offending, offending);
        assert_eq!(v.toplevel, e);
    }

    #[test]
    fn binder_facts_skip_map_typed_binders() {
        let m = Type::map(Type::Int, ints());
        assert!(has_map(&m));
        assert!(has_map(&Type::Tuple(vec![Type::Int, m.clone()])));
        assert!(!has_map(&Type::handle("Node", m)));
        assert!(!has_map(&ints()));
    }

    #[test]
    fn verdicts_are_deterministic() {
        let e = Exp::cond(
            Exp::eq(int("k"), Exp::num(0)),
            Exp::len(Exp::state_var(xs())),
            Exp::len(xs()),
        );
        let first = verdict(&e, Pool::Runtime);
        assert_eq!(first, verdict(&e, Pool::Runtime));
        assert_eq!(first.violation().map(|v| v.offending.clone()), Some(xs()));
    }

    #[test]
    #[ignore = "requires z3"]
    fn the_requires_at_most_one_element() {
        let config = z3_config();
        let e = Exp::the(Exp::state_var(xs()));
        let small = Exp::le(Exp::len(xs()), Exp::num(1));
        let ok = check(&e, &ctx(), Pool::Runtime, &small, &config).expect("solves");
        assert_eq!(ok, Verdict::WellFormed);

        let any = check(&e, &ctx(), Pool::Runtime, &Exp::truth(), &config).expect("solves");
        assert_eq!(
            any.violation().map(|v| v.reason.as_str()),
            Some("the on a bag that may hold more than one element")
        );
    }

    #[test]
    #[ignore = "requires z3"]
    fn the_under_a_map_binder_is_decided() {
        let config = z3_config();
        let index = Type::map(Type::Int, ints());
        let ctx = ctx().with_state_var("m", index.clone());
        let lookup = Exp::app(
            Lambda::new(
                "mm",
                index.clone(),
                Exp::the(Exp::map_get(Exp::var("mm", index.clone()), int("k"))),
            ),
            Exp::state_var(Exp::var("m", index)),
        );
        let verdict = check(&lookup, &ctx, Pool::Runtime, &Exp::truth(), &config).expect("solves");
        assert_eq!(
            verdict.violation().map(|v| v.reason.as_str()),
            Some("the on a bag that may hold more than one element")
        );
    }

    #[test]
    #[ignore = "requires z3"]
    fn maps_of_collections_must_be_bounded_by_state() {
        let config = z3_config();
        let ys = Exp::var("ys", ints());
        let ctx = Context::new()
            .with_state_var("xs", ints())
            .with_state_var("ys", ints());
        let assumptions = Exp::eq(Exp::add(Exp::len(xs()), Exp::len(ys.clone())), Exp::num(3));

        let grouped = Exp::state_var(Exp::make_map2(
            xs(),
            Lambda::new(
                "k",
                Type::Int,
                Exp::filter(xs(), Lambda::new("x", Type::Int, Exp::eq(int("x"), int("k")))),
            ),
        ));
        let verdict = check(&grouped, &ctx, Pool::Runtime, &assumptions, &config).expect("solves");
        assert_eq!(verdict, Verdict::WellFormed);

        let everything = Exp::state_var(Exp::make_map2(
            xs(),
            Lambda::new("k", Type::Int, Exp::add(xs(), ys)),
        ));
        let verdict = check(&everything, &ctx, Pool::Runtime, &assumptions, &config).expect("solves");
        let violation = verdict.violation().expect("unbounded map");
        assert_eq!(violation.reason, "non-polynomial-sized map");
        assert!(matches!(violation.offending.kind, ExpKind::MakeMap2 { .. }));
    }
}
