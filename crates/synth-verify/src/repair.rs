use std::cmp::Reverse;

use synth_ir::syntax::{alpha_equivalent, freshen_binders, replace, strip_state_vars};
use synth_ir::{pprint, Exp, Interpreter, Oracle};
use tracing::{debug, trace};

use crate::context::{Context, Pool};
use crate::wf::{Checker, Verdict, WfConfig};
use crate::VerifyError;

pub fn repair(
    e: &Exp,
    ctx: &Context,
    extra_state: &[Exp],
    config: &WfConfig,
) -> Result<Exp, VerifyError> {
    Checker::new(config.clone(), &Interpreter).repair(e, ctx, extra_state)
}

impl<O: Oracle + ?Sized> Checker<'_, O> {
    /// Rewrites `e` so that it is well-formed in the runtime pool.
    ///
    /// Existing markers are dropped, then every occurrence of a state
    /// variable of `ctx` or of an `extra_state` expression is wrapped in a
    /// marker, largest first. Markers are never nested and occurrences whose
    /// variables are captured by a binder are left alone. A result that is
    /// still ill-formed is an error.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn repair(&self, e: &Exp, ctx: &Context, extra_state: &[Exp]) -> Result<Exp, VerifyError> {
        let mut available: Vec<Exp> = Vec::new();
        for s in ctx.state_vars().into_iter().chain(extra_state.iter().map(strip_state_vars)) {
            if !available.iter().any(|seen| alpha_equivalent(seen, &s)) {
                available.push(s);
            }
        }
        available.sort_by_key(|s| Reverse(s.size()));

        let mut repaired = strip_state_vars(e);
        for s in &available {
            trace!(state = %s, "folding");
            repaired = replace(
                &repaired,
                s,
                &Exp::state_var(s.clone()),
                alpha_equivalent,
                |x| !x.is_state_var(),
            );
        }
        let repaired = freshen_binders(&repaired, ctx.names());

        match self.check(&repaired, ctx, Pool::Runtime, &Exp::truth())? {
            Verdict::WellFormed => {
                debug!(from = %e, to = %repaired, "repaired");
                Ok(repaired)
            }
            Verdict::NotWellFormed(violation) => Err(VerifyError::RepairFailed {
                expr: pprint(e),
                violation: violation.to_string(),
            }),
        }
    }
}
