//! Well-formedness of candidate expressions with respect to the state and
//! runtime pools, and repair of ill-formed candidates with cached-state
//! markers.

use synth_smt::SmtError;
use thiserror::Error;

pub mod context;
mod repair;
mod wf;

pub use context::{Context, ContextVar, Pool};
pub use repair::repair;
pub use wf::{check, Checker, Verdict, Violation, WfConfig, DEFAULT_SIZE_BOUND_DEPTH};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Smt(#[from] SmtError),
    #[error("could not repair {expr}: {violation}")]
    RepairFailed { expr: String, violation: String },
}

#[cfg(test)]
pub(crate) mod test_support {
    use synth_smt::{solver_available, SolverConfig};

    use crate::WfConfig;

    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Default config for the `#[ignore = "requires z3"]` tests.
    pub fn z3_config() -> WfConfig {
        init_tracing();
        let config = WfConfig {
            solver: SolverConfig::from_env().expect("solver environment"),
            ..WfConfig::default()
        };
        assert!(
            solver_available(&config.solver),
            "z3 not found at {}; set SYNTH_Z3 or skip the ignored tests",
            config.solver.z3_path.display()
        );
        config
    }
}
