use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::Context;
use synth_ir::NameGen;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::SolverConfig;
use crate::sexp::{self, Atom};
use crate::term::{Sort, Term};
use crate::SmtError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Satisfiable; values of the queried terms, in query order.
    Sat(Vec<Atom>),
    Unsat,
    Unknown,
}

#[derive(Clone, Debug)]
enum Declaration {
    Const { name: String, sort: Sort },
    Fun { name: String, args: Vec<Sort>, result: Sort },
}

pub struct Session {
    config: SolverConfig,
    names: NameGen,
    declarations: Vec<Declaration>,
    assertions: Vec<Term>,
}

pub(crate) fn sanitize_ident(input: &str) -> String {
    let mut out = String::new();
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "sym".to_string()
    } else {
        out
    }
}

fn summarize_solver_output(stdout: &str, stderr: &str) -> String {
    let snippet = stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(2)
        .collect::<Vec<_>>()
        .join(" | ");
    if snippet.is_empty() {
        "no output".to_string()
    } else {
        snippet
    }
}

impl Session {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            names: NameGen::new(),
            declarations: Vec::new(),
            assertions: Vec::new(),
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn fresh_const(&mut self, hint: &str, sort: Sort) -> Term {
        let name = self.names.fresh(&sanitize_ident(hint));
        trace!(%name, %sort, "Declaring solver constant");
        self.declarations.push(Declaration::Const {
            name: name.clone(),
            sort,
        });
        Term::var(name, sort)
    }

    pub fn declare_fun(&mut self, hint: &str, args: Vec<Sort>, result: Sort) -> String {
        let name = self.names.fresh(&sanitize_ident(hint));
        trace!(%name, arity = args.len(), "Declaring uninterpreted function");
        self.declarations.push(Declaration::Fun {
            name: name.clone(),
            args,
            result,
        });
        name
    }

    pub fn assert(&mut self, t: Term) {
        if t.as_bool_const() != Some(true) {
            self.assertions.push(t);
        }
    }

    pub fn assertions(&self) -> &[Term] {
        &self.assertions
    }

    pub fn script(&self, queries: &[Term]) -> String {
        let mut smt = String::new();
        smt.push_str("(set-option :produce-models true)\n");
        smt.push_str("(set-logic ALL)\n");
        for decl in &self.declarations {
            match decl {
                Declaration::Const { name, sort } => {
                    let _ = writeln!(smt, "(declare-const {name} {sort})");
                }
                Declaration::Fun { name, args, result } => {
                    let args = args.iter().map(Sort::to_string).collect::<Vec<_>>();
                    let _ = writeln!(smt, "(declare-fun {name} ({}) {result})", args.join(" "));
                }
            }
        }
        for assertion in &self.assertions {
            let _ = writeln!(smt, "(assert {assertion})");
        }
        smt.push_str("(check-sat)\n");
        if !queries.is_empty() {
            let rendered = queries.iter().map(Term::to_string).collect::<Vec<_>>();
            let _ = writeln!(smt, "(get-value ({}))", rendered.join(" "));
        }
        smt
    }

    /// Runs the solver once over everything asserted so far, reading back the
    /// values of `queries` when satisfiable.
    #[tracing::instrument(level = "debug", skip_all, fields(assertions = self.assertions.len()))]
    pub fn check(&self, queries: &[Term]) -> Result<CheckOutcome, SmtError> {
        let smt = self.script(queries);
        if let Some(dir) = &self.config.artifact_dir {
            let path = write_artifact(dir, &smt)?;
            debug!(path = %path.display(), "Wrote solver query");
        }

        let stdout = self.run_z3(&smt)?;
        let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
        let first = lines.next().unwrap_or("");
        debug!(outcome = first, "Solver answered");
        match first {
            "sat" => {}
            "unsat" => return Ok(CheckOutcome::Unsat),
            "unknown" | "timeout" => return Ok(CheckOutcome::Unknown),
            other => {
                return Err(anyhow::anyhow!(
                    "unexpected z3 output: {}",
                    summarize_solver_output(other, "")
                )
                .into())
            }
        }
        if queries.is_empty() {
            return Ok(CheckOutcome::Sat(Vec::new()));
        }

        let rest = lines.collect::<Vec<_>>().join("\n");
        let parsed = sexp::parse_all(&rest).context("failed to parse z3 model values")?;
        let response = parsed
            .first()
            .context("z3 reported sat but returned no model values")?;
        let atoms = sexp::get_value_response(response)?;
        if atoms.len() != queries.len() {
            return Err(anyhow::anyhow!(
                "z3 returned {} model values for {} queries",
                atoms.len(),
                queries.len()
            )
            .into());
        }
        Ok(CheckOutcome::Sat(atoms))
    }

    fn run_z3(&self, smt: &str) -> anyhow::Result<String> {
        let mut command = Command::new(&self.config.z3_path);
        if let Some(seconds) = self.config.timeout_seconds {
            command.arg(format!("-T:{seconds}"));
        }
        command
            .arg("-in")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                anyhow::anyhow!(
                    "z3 executable not found at {}; install z3 or set SYNTH_Z3",
                    self.config.z3_path.display()
                )
            } else {
                anyhow::anyhow!("failed to spawn z3: {}", err)
            }
        })?;

        let write_result = {
            let stdin = child.stdin.as_mut().context("failed to open z3 stdin")?;
            stdin.write_all(smt.as_bytes())
        };
        if let Err(write_err) = write_result {
            let output = child
                .wait_with_output()
                .context("failed to wait for z3 process after write failure")?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!(
                "failed to send SMT query to z3: {} (status={}, {})",
                write_err,
                output.status,
                summarize_solver_output(&stdout, &stderr)
            ));
        }

        let output = child
            .wait_with_output()
            .context("failed to wait for z3 process")?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!(
                "z3 produced no answer (status={}): {}",
                output.status,
                summarize_solver_output("", &stderr)
            ));
        }
        Ok(stdout)
    }
}

fn write_artifact(dir: &std::path::Path, smt: &str) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create artifact directory {}", dir.display()))?;
    let path = dir.join(format!("query-{}.smt2", Uuid::now_v7()));
    std::fs::write(&path, smt)
        .with_context(|| format!("failed to write solver query {}", path.display()))?;
    Ok(path)
}

pub fn solver_available(config: &SolverConfig) -> bool {
    Command::new(&config.z3_path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_declares_before_asserting() {
        let mut session = Session::new(SolverConfig::default());
        let x = session.fresh_const("x!", Sort::Int);
        let f = session.declare_fun("f", vec![Sort::Int], Sort::Bool);
        session.assert(Term::bool(true));
        session.assert(Term::App {
            func: f,
            args: vec![x.clone()],
            sort: Sort::Bool,
        });
        insta::assert_snapshot!(session.script(&[x]), @r"
        (set-option :produce-models true)
        (set-logic ALL)
        (declare-const _x_0 Int)
        (declare-fun _f1 (Int) Bool)
        (assert (_f1 _x_0))
        (check-sat)
        (get-value (_x_0))
        ");
    }

    #[test]
    fn writes_query_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "(check-sat)\n").unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("query-") && name.ends_with(".smt2"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "(check-sat)\n");
    }

    #[test]
    fn missing_solver_is_a_solver_error() {
        let config = SolverConfig {
            z3_path: PathBuf::from("/nonexistent/z3"),
            ..SolverConfig::default()
        };
        assert!(!solver_available(&config));
        let err = Session::new(config).check(&[]).unwrap_err();
        assert!(matches!(err, SmtError::Solver(_)));
        assert!(err.to_string().contains("z3 executable not found"));
    }

    #[test]
    fn round_trips_through_z3() {
        let config = SolverConfig::default();
        if !solver_available(&config) {
            tracing::warn!("z3 not found; skipping");
            return;
        }
        let mut session = Session::new(config);
        let x = session.fresh_const("x", Sort::Int);
        session.assert(Term::eq(Term::add(Sort::Int, [x.clone(), Term::int(2)]), Term::int(-1)));
        let outcome = session.check(&[x]).unwrap();
        assert_eq!(outcome, CheckOutcome::Sat(vec![Atom::Int(-3)]));
    }
}
