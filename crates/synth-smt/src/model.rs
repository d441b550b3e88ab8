use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use synth_ir::syntax::free_vars;
use synth_ir::{func_key, pprint, Env, Exp, FuncTable, MapValue, Oracle, Type, Value};
use tracing::{debug, error, warn};

use crate::classify::sort_of;
use crate::config::SolverConfig;
use crate::encode::{Encoder, StringTable, SymEnv, Symbols};
use crate::session::{CheckOutcome, Session};
use crate::sexp::Atom;
use crate::symbolic::{MapEntry, Slot, SymMap, SymValue};
use crate::term::{Sort, Term};
use crate::SmtError;

/// A satisfying assignment: concrete values for the free variables plus
/// witness tables for every uninterpreted function the formula calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Model {
    pub env: Env,
}

impl Model {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.env.vars.get(name)
    }
}

/// Answers satisfiability queries, validating every model it returns with
/// `oracle`.
pub struct ModelFinder<'o, O: Oracle + ?Sized> {
    config: SolverConfig,
    oracle: &'o O,
}

struct Allocator<'e, 's> {
    encoder: &'e mut Encoder<'s>,
    depth: usize,
    order_slots: bool,
    handles: Vec<(Type, Term, SymValue)>,
    strings: Vec<Term>,
}

impl Allocator<'_, '_> {
    fn alloc(&mut self, hint: &str, ty: &Type) -> Result<SymValue, SmtError> {
        if let Some(sort) = sort_of(ty) {
            let t = self.encoder.session().fresh_const(hint, sort);
            if *ty == Type::String {
                self.strings.push(t.clone());
            }
            match ty {
                Type::Enum(cases) => self.encoder.session().assert(Term::and([
                    Term::le(Term::int(0), t.clone()),
                    Term::lt(t.clone(), Term::int(cases.len() as i64)),
                ])),
                Type::Int | Type::Long | Type::Native(_) => {
                    self.encoder.session().assert(Term::in_i64_range(t.clone()))
                }
                _ => {}
            }
            return Ok(SymValue::Term(t));
        }
        match ty {
            Type::Maybe(inner) => Ok(SymValue::Maybe {
                present: self.encoder.session().fresh_const(hint, Sort::Bool),
                value: Box::new(self.alloc(hint, inner)?),
            }),
            Type::Bag(elem) => {
                let mut slots = Vec::with_capacity(self.depth);
                for _ in 0..self.depth {
                    slots.push(Slot {
                        mask: self.encoder.session().fresh_const(hint, Sort::Bool),
                        elem: self.alloc(hint, elem)?,
                    });
                }
                if self.order_slots {
                    for pair in slots.windows(2) {
                        let implied = Term::implies(pair[0].mask.clone(), pair[1].mask.clone());
                        self.encoder.session().assert(implied);
                    }
                }
                Ok(SymValue::Bag(slots))
            }
            Type::Map(key_ty, value_ty) => {
                let mut entries = Vec::with_capacity(self.depth);
                for _ in 0..self.depth {
                    entries.push(MapEntry {
                        present: self.encoder.session().fresh_const(hint, Sort::Bool),
                        key: self.alloc(hint, key_ty)?,
                        value: self.alloc(hint, value_ty)?,
                    });
                }
                for i in 0..entries.len() {
                    for j in i + 1..entries.len() {
                        let same = self.encoder.eq(key_ty, &entries[i].key, &entries[j].key)?;
                        let both = Term::and([entries[i].present.clone(), entries[j].present.clone()]);
                        self.encoder.session().assert(Term::implies(both, Term::not(same)));
                    }
                }
                Ok(SymValue::Map(SymMap {
                    entries,
                    default: Box::new(self.alloc(hint, value_ty)?),
                }))
            }
            Type::Record(fields) => Ok(SymValue::Record(
                fields
                    .iter()
                    .map(|(name, t)| Ok((name.clone(), self.alloc(&format!("{hint}_{name}"), t)?)))
                    .collect::<Result<Vec<_>, SmtError>>()?,
            )),
            Type::Tuple(ts) => Ok(SymValue::Tuple(
                ts.iter()
                    .map(|t| self.alloc(hint, t))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Type::Handle { value, .. } => {
                let id = self.encoder.session().fresh_const(hint, Sort::Int);
                self.encoder.session().assert(Term::in_i64_range(id.clone()));
                let payload = self.alloc(hint, value)?;
                self.handles.push((ty.clone(), id.clone(), payload.clone()));
                Ok(SymValue::Handle {
                    id,
                    value: Box::new(payload),
                })
            }
            other => Err(SmtError::UnsupportedConstruct {
                message: format!("cannot allocate a value of type {other}"),
            }),
        }
    }

    /// Same identity implies equal payloads, for every pair of allocated
    /// handles of one handle type.
    fn assert_handle_coherence(&mut self) -> Result<(), SmtError> {
        let handles = std::mem::take(&mut self.handles);
        for (i, (ty_a, id_a, value_a)) in handles.iter().enumerate() {
            for (ty_b, id_b, value_b) in &handles[i + 1..] {
                if ty_a != ty_b {
                    continue;
                }
                let Type::Handle { value: value_ty, .. } = ty_a else {
                    continue;
                };
                let same_payload = self.encoder.eq(value_ty, value_a, value_b)?;
                self.encoder
                    .session()
                    .assert(Term::implies(Term::eq(id_a.clone(), id_b.clone()), same_payload));
            }
        }
        Ok(())
    }
}

/// Leaf terms of an allocated value, in the order [`decode_shaped`] reads
/// them back.
fn collect_leaves(v: &SymValue, out: &mut Vec<Term>) {
    match v {
        SymValue::Term(t) => out.push(t.clone()),
        SymValue::Maybe { present, value } => {
            out.push(present.clone());
            collect_leaves(value, out);
        }
        SymValue::Bag(slots) => {
            for slot in slots {
                out.push(slot.mask.clone());
                collect_leaves(&slot.elem, out);
            }
        }
        SymValue::Map(map) => {
            for entry in &map.entries {
                out.push(entry.present.clone());
                collect_leaves(&entry.key, out);
                collect_leaves(&entry.value, out);
            }
            collect_leaves(&map.default, out);
        }
        SymValue::Record(fields) => {
            for (_, x) in fields {
                collect_leaves(x, out);
            }
        }
        SymValue::Tuple(items) => {
            for x in items {
                collect_leaves(x, out);
            }
        }
        SymValue::Handle { id, value } => {
            out.push(id.clone());
            collect_leaves(value, out);
        }
        SymValue::Union { .. } => {}
    }
}

struct Decoder<'a, I> {
    atoms: I,
    strings: &'a StringTable,
}

impl<'a, I: Iterator<Item = Atom>> Decoder<'a, I> {
    fn next(&mut self) -> anyhow::Result<Atom> {
        self.atoms
            .next()
            .context("solver returned fewer model values than requested")
    }

    fn next_bool(&mut self) -> anyhow::Result<bool> {
        let atom = self.next()?;
        atom.as_bool()
            .with_context(|| format!("expected a boolean model value, got {atom:?}"))
    }

    fn scalar(&self, ty: &Type, atom: Atom) -> anyhow::Result<Value> {
        let int = || {
            atom.as_int()
                .with_context(|| format!("expected an integer model value, got {atom:?}"))
        };
        Ok(match ty {
            Type::Bool => Value::Bool(
                atom.as_bool()
                    .with_context(|| format!("expected a boolean model value, got {atom:?}"))?,
            ),
            Type::Int | Type::Long => Value::Int(int()?),
            Type::String => Value::Str(self.strings.decode(int()?)),
            Type::BitVec(width) => match atom {
                Atom::BitVec { value, .. } => Value::BitVec {
                    value,
                    width: *width,
                },
                other => return Err(anyhow!("expected a bit-vector model value, got {other:?}")),
            },
            Type::Enum(cases) => {
                let index = int()?;
                let case = usize::try_from(index)
                    .ok()
                    .and_then(|i| cases.get(i))
                    .with_context(|| format!("enum index {index} out of range for {ty}"))?;
                Value::Enum(case.clone())
            }
            Type::Native(name) => Value::Native {
                name: name.clone(),
                id: int()?,
            },
            other => return Err(anyhow!("{other} is not a scalar type")),
        })
    }
}

impl<'o, O: Oracle + ?Sized> ModelFinder<'o, O> {
    pub fn new(config: SolverConfig, oracle: &'o O) -> Self {
        Self { config, oracle }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// A model of `formula` over its free variables, or `None` when no model
    /// exists within the configured collection depth.
    pub fn satisfy(&self, formula: &Exp) -> Result<Option<Model>, SmtError> {
        self.satisfy_over(formula, &free_vars(formula))
    }

    pub fn valid(&self, formula: &Exp) -> Result<bool, SmtError> {
        Ok(self.satisfy(&Exp::not(formula.clone()))?.is_none())
    }

    /// Like [`ModelFinder::satisfy`] with an explicit free-variable list.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn satisfy_over(
        &self,
        formula: &Exp,
        vars: &[(String, Type)],
    ) -> Result<Option<Model>, SmtError> {
        if formula.ty != Type::Bool {
            return Err(SmtError::UnsupportedConstruct {
                message: format!("formula {formula} has type {}, not Bool", formula.ty),
            });
        }
        let mut session = Session::new(self.config.clone());
        let mut encoder = Encoder::new(&mut session);

        let mut allocator = Allocator {
            encoder: &mut encoder,
            depth: self.config.collection_depth,
            order_slots: self.config.order_slots,
            handles: Vec::new(),
            strings: Vec::new(),
        };
        let mut env = SymEnv::new();
        for (name, ty) in vars {
            env.insert(name.clone(), allocator.alloc(name, ty)?);
        }
        allocator.assert_handle_coherence()?;
        let mut string_terms = std::mem::take(&mut allocator.strings);
        debug!(
            vars = vars.len(),
            depth = self.config.collection_depth,
            "Allocated free variables"
        );

        let encoded = encoder.encode_bool(formula, &env)?;
        encoder.session().assert(encoded);
        let symbols = encoder.finish();
        for function in symbols.functions.iter().filter(|f| f.result == Type::String) {
            string_terms.extend(function.applications.iter().map(|args| function.apply(args.clone())));
        }
        for t in &string_terms {
            session.assert(symbols.strings.admissible(t));
        }

        let mut queries = Vec::new();
        for (name, _) in vars {
            if let Some(v) = env.get(name) {
                collect_leaves(v, &mut queries);
            }
        }
        for function in &symbols.functions {
            for args in &function.applications {
                queries.extend(args.iter().cloned());
                queries.push(function.apply(args.clone()));
            }
        }

        let atoms = match session.check(&queries)? {
            CheckOutcome::Unsat => {
                debug!("No model within the collection bound");
                return Ok(None);
            }
            CheckOutcome::Unknown => {
                return Err(SmtError::SolverUnknown {
                    formula: pprint(formula),
                })
            }
            CheckOutcome::Sat(atoms) => atoms,
        };

        let model = reconstruct(vars, &env, &symbols, atoms)?;
        if self.config.validate_model {
            self.validate(formula, &model, &session)?;
        }
        Ok(Some(model))
    }

    fn validate(&self, formula: &Exp, model: &Model, session: &Session) -> Result<(), SmtError> {
        let outcome = match self.oracle.evaluate(formula, &model.env) {
            Ok(Value::Bool(true)) => return Ok(()),
            Ok(other) => other.to_string(),
            Err(err) => format!("error: {err}"),
        };
        let rendered_model =
            serde_json::to_string(&model.env).unwrap_or_else(|err| format!("<unprintable: {err}>"));
        let assertions = session
            .assertions()
            .iter()
            .map(Term::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        error!(formula = %formula, %outcome, model = %rendered_model, "Model validation failed");
        Err(SmtError::ModelValidation {
            formula: pprint(formula),
            outcome,
            model: rendered_model,
            assertions,
        })
    }
}

fn reconstruct(
    vars: &[(String, Type)],
    env: &SymEnv,
    symbols: &Symbols,
    atoms: Vec<Atom>,
) -> Result<Model, SmtError> {
    let mut decoder = Decoder {
        atoms: atoms.into_iter(),
        strings: &symbols.strings,
    };
    let mut model_env = Env::new();
    for (name, ty) in vars {
        let Some(shape) = env.get(name) else {
            continue;
        };
        let value = decode_shaped(&mut decoder, shape, ty)?;
        model_env.vars.insert(name.clone(), value);
    }

    let mut tables: BTreeMap<String, FuncTable> = BTreeMap::new();
    for function in &symbols.functions {
        let key = func_key(&function.name, &function.arg_types, &function.result);
        let table = tables
            .entry(key)
            .or_insert_with(|| FuncTable::new(Value::default_of(&function.result)));
        for _ in &function.applications {
            let mut args = Vec::with_capacity(function.arg_types.len());
            for ty in &function.arg_types {
                let atom = decoder.next()?;
                args.push(decoder.scalar(ty, atom)?);
            }
            let atom = decoder.next()?;
            let result = decoder.scalar(&function.result, atom)?;
            if let Some(existing) = table.apply(&args) {
                if *existing != result {
                    warn!(function = %function.name, "Conflicting witness entries; keeping the first");
                }
            }
            table.insert(args, result);
        }
    }
    model_env.funcs = tables;
    Ok(Model { env: model_env })
}

fn decode_shaped<I: Iterator<Item = Atom>>(
    decoder: &mut Decoder<'_, I>,
    shape: &SymValue,
    ty: &Type,
) -> anyhow::Result<Value> {
    match (shape, ty) {
        (SymValue::Term(_), ty) => {
            let atom = decoder.next()?;
            decoder.scalar(ty, atom)
        }
        (SymValue::Maybe { value, .. }, Type::Maybe(inner)) => {
            let present = decoder.next_bool()?;
            let payload = decode_shaped(decoder, value, inner)?;
            Ok(Value::Maybe(present.then(|| Box::new(payload))))
        }
        (SymValue::Bag(slots), Type::Bag(elem)) => {
            let mut elems = Vec::new();
            for slot in slots {
                let present = decoder.next_bool()?;
                let x = decode_shaped(decoder, &slot.elem, elem)?;
                if present {
                    elems.push(x);
                }
            }
            Ok(Value::Bag(elems))
        }
        (SymValue::Map(map), Type::Map(key_ty, value_ty)) => {
            let mut entries = Vec::new();
            for entry in &map.entries {
                let present = decoder.next_bool()?;
                let k = decode_shaped(decoder, &entry.key, key_ty)?;
                let v = decode_shaped(decoder, &entry.value, value_ty)?;
                if present {
                    entries.push((k, v));
                }
            }
            let default = decode_shaped(decoder, &map.default, value_ty)?;
            Ok(Value::Map(MapValue {
                entries,
                default: Box::new(default),
            }))
        }
        (SymValue::Record(fields), Type::Record(field_tys)) => {
            let mut out = Vec::with_capacity(fields.len());
            for ((name, x), (_, t)) in fields.iter().zip(field_tys) {
                out.push((name.clone(), decode_shaped(decoder, x, t)?));
            }
            Ok(Value::Record(out))
        }
        (SymValue::Tuple(items), Type::Tuple(ts)) => Ok(Value::Tuple(
            items
                .iter()
                .zip(ts)
                .map(|(x, t)| decode_shaped(decoder, x, t))
                .collect::<anyhow::Result<Vec<_>>>()?,
        )),
        (SymValue::Handle { value, .. }, Type::Handle { value: value_ty, .. }) => {
            let id = decoder.next()?;
            let id = id
                .as_int()
                .with_context(|| format!("expected a handle identity, got {id:?}"))?;
            Ok(Value::Handle {
                id,
                value: Box::new(decode_shaped(decoder, value, value_ty)?),
            })
        }
        (shape, ty) => Err(anyhow!("allocated value {shape:?} does not match type {ty}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::UninterpretedFn;

    fn function(result: Type, symbol: &str) -> UninterpretedFn {
        UninterpretedFn {
            name: "f".to_string(),
            symbol: symbol.to_string(),
            arg_types: vec![Type::Int],
            result,
            applications: vec![vec![Term::int(0)]],
        }
    }

    #[test]
    fn witness_tables_are_keyed_by_signature() {
        let symbols = Symbols {
            functions: vec![function(Type::Int, "_f0"), function(Type::Bool, "_f1")],
            strings: StringTable::default(),
        };
        let atoms = vec![Atom::Int(0), Atom::Int(7), Atom::Int(0), Atom::Bool(true)];
        let model = reconstruct(&[], &SymEnv::new(), &symbols, atoms).expect("decodes");

        let keys = model.env.funcs.keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys, vec!["f(Int) -> Bool", "f(Int) -> Int"]);
        let call = |ty: Type| Exp::call("f", vec![Exp::num(0)], ty);
        assert_eq!(synth_ir::eval(&call(Type::Int), &model.env).expect("evaluates"), Value::Int(7));
        assert_eq!(
            synth_ir::eval(&call(Type::Bool), &model.env).expect("evaluates"),
            Value::Bool(true)
        );
    }
}
