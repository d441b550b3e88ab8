use serde::{Deserialize, Serialize};
use synth_ir::{Exp, Type};

/// Where an expression executes. State expressions are maintained by the
/// data structure; runtime expressions run when a query is answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pool {
    State,
    Runtime,
}

impl Pool {
    pub fn name(self) -> &'static str {
        match self {
            Pool::State => "state",
            Pool::Runtime => "runtime",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextVar {
    pub name: String,
    pub ty: Type,
    pub pool: Pool,
}

/// Ordered variables in scope plus the facts known to hold on the path
/// here. Later variables shadow earlier ones with the same name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    vars: Vec<ContextVar>,
    path: Vec<Exp>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, ty: Type, pool: Pool) -> Self {
        self.vars.push(ContextVar {
            name: name.into(),
            ty,
            pool,
        });
        self
    }

    pub fn with_state_var(self, name: impl Into<String>, ty: Type) -> Self {
        self.with_var(name, ty, Pool::State)
    }

    pub fn with_arg(self, name: impl Into<String>, ty: Type) -> Self {
        self.with_var(name, ty, Pool::Runtime)
    }

    /// Extends the context with a binder and the fact that introduced it.
    pub fn bind(&self, name: impl Into<String>, ty: Type, pool: Pool, fact: Exp) -> Context {
        self.clone().with_var(name, ty, pool).assume(fact)
    }

    pub fn assume(mut self, fact: Exp) -> Context {
        if fact != Exp::truth() {
            self.path.push(fact);
        }
        self
    }

    pub fn vars(&self) -> &[ContextVar] {
        &self.vars
    }

    pub fn lookup(&self, name: &str) -> Option<&ContextVar> {
        self.vars.iter().rev().find(|v| v.name == name)
    }

    pub fn pool_of(&self, name: &str) -> Option<Pool> {
        self.lookup(name).map(|v| v.pool)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|v| v.name.as_str())
    }

    pub fn state_vars(&self) -> Vec<Exp> {
        self.visible()
            .filter(|v| v.pool == Pool::State)
            .map(|v| Exp::var(v.name.clone(), v.ty.clone()))
            .collect()
    }

    pub fn args(&self) -> Vec<Exp> {
        self.visible()
            .filter(|v| v.pool == Pool::Runtime)
            .map(|v| Exp::var(v.name.clone(), v.ty.clone()))
            .collect()
    }

    pub fn path_condition(&self) -> Exp {
        Exp::all(self.path.iter().cloned())
    }

    fn visible(&self) -> impl Iterator<Item = &ContextVar> {
        self.vars.iter().enumerate().filter_map(move |(i, v)| {
            let shadowed = self.vars[i + 1..].iter().any(|later| later.name == v.name);
            (!shadowed).then_some(v)
        })
    }
}
