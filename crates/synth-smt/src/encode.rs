//! Lowering of IR expressions to solver terms and composite symbolic values.

use std::collections::BTreeMap;

use synth_ir::{BinOp, Exp, ExpKind, Lambda, Type, UnOp};
use tracing::trace;

use crate::classify::{is_numeric, sort_of};
use crate::session::Session;
use crate::symbolic::{MapEntry, Slot, SymMap, SymValue};
use crate::term::{Sort, Term};
use crate::SmtError;

/// Variable bindings during encoding. Binders extend a copy.
pub type SymEnv = BTreeMap<String, SymValue>;

/// First integer code handed to a string literal outside the canonical
/// `""`, `"bbb.."`, `"aaa.."` family.
pub const STRING_LITERAL_BASE: i64 = 1 << 40;

/// Longest canonical string a model value may decode to.
pub const MAX_CANONICAL_STRING: i64 = 1024;

/// String literals of one session and their integer codes.
///
/// Integers decode as `0 -> ""`, `n > 0 -> "b" * n`, `n < 0 -> "a" * -n`,
/// except codes assigned to other literals, which decode to the literal.
#[derive(Clone, Debug, Default)]
pub struct StringTable {
    literals: Vec<String>,
}

impl StringTable {
    pub fn code(&mut self, s: &str) -> i64 {
        if s.is_empty() {
            return 0;
        }
        if s.chars().all(|c| c == 'b') {
            return s.len() as i64;
        }
        if s.chars().all(|c| c == 'a') {
            return -(s.len() as i64);
        }
        let index = match self.literals.iter().position(|l| l == s) {
            Some(index) => index,
            None => {
                self.literals.push(s.to_string());
                self.literals.len() - 1
            }
        };
        STRING_LITERAL_BASE + index as i64
    }

    /// Restricts `t` to codes that decode to a short canonical string or to
    /// one of this table's literals.
    pub fn admissible(&self, t: &Term) -> Term {
        let canonical = Term::and([
            Term::le(Term::int(-MAX_CANONICAL_STRING), t.clone()),
            Term::le(t.clone(), Term::int(MAX_CANONICAL_STRING)),
        ]);
        let literals = (0..self.literals.len())
            .map(|i| Term::eq(t.clone(), Term::int(STRING_LITERAL_BASE + i as i64)));
        Term::or(std::iter::once(canonical).chain(literals))
    }

    pub fn decode(&self, n: i64) -> String {
        if n >= STRING_LITERAL_BASE {
            if let Some(literal) = usize::try_from(n - STRING_LITERAL_BASE)
                .ok()
                .and_then(|i| self.literals.get(i))
            {
                return literal.clone();
            }
        }
        if n >= 0 {
            "b".repeat(n as usize)
        } else {
            "a".repeat(n.unsigned_abs() as usize)
        }
    }
}

/// An uninterpreted function introduced for a `Call`, with every argument
/// tuple it was applied to.
#[derive(Clone, Debug)]
pub struct UninterpretedFn {
    pub name: String,
    pub symbol: String,
    pub arg_types: Vec<Type>,
    pub result: Type,
    pub applications: Vec<Vec<Term>>,
}

impl UninterpretedFn {
    pub fn apply(&self, args: Vec<Term>) -> Term {
        Term::App {
            func: self.symbol.clone(),
            args,
            sort: sort_of(&self.result).unwrap_or(Sort::Int),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Symbols {
    pub functions: Vec<UninterpretedFn>,
    pub strings: StringTable,
}

pub struct Encoder<'s> {
    session: &'s mut Session,
    symbols: Symbols,
}

fn unsupported(e: &Exp, message: impl std::fmt::Display) -> SmtError {
    SmtError::UnsupportedConstruct {
        message: format!("{message} in {e}"),
    }
}

fn bits(value: i64, width: u32) -> u64 {
    if width >= 64 {
        value as u64
    } else {
        (value as u64) & ((1u64 << width) - 1)
    }
}

fn wrap_machine(ty: &Type, t: Term) -> Term {
    match ty {
        Type::Int | Type::Long => Term::wrap_i64(t),
        _ => t,
    }
}

fn elem_type<'t>(e: &Exp, ty: &'t Type) -> Result<&'t Type, SmtError> {
    ty.elem_type()
        .ok_or_else(|| unsupported(e, format!("expected a bag type, got {ty}")))
}

pub fn len_of(slots: &[Slot]) -> Term {
    Term::add(Sort::Int, slots.iter().map(|s| Term::indicator(s.mask.clone())))
}

impl<'s> Encoder<'s> {
    pub fn new(session: &'s mut Session) -> Self {
        Self {
            session,
            symbols: Symbols::default(),
        }
    }

    pub fn session(&mut self) -> &mut Session {
        self.session
    }

    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    pub fn finish(self) -> Symbols {
        self.symbols
    }

    pub fn encode_bool(&mut self, e: &Exp, env: &SymEnv) -> Result<Term, SmtError> {
        self.encode(e, env)?.into_term()
    }

    fn encode_slots(&mut self, e: &Exp, env: &SymEnv) -> Result<Vec<Slot>, SmtError> {
        self.encode(e, env)?.into_slots()
    }

    fn apply(&mut self, f: &Lambda, arg: SymValue, env: &SymEnv) -> Result<SymValue, SmtError> {
        let mut inner = env.clone();
        inner.insert(f.arg.clone(), arg);
        self.encode(&f.body, &inner)
    }

    pub fn encode(&mut self, e: &Exp, env: &SymEnv) -> Result<SymValue, SmtError> {
        trace!(expr = %e, "Encoding expression");
        let term = |t: Term| -> Result<SymValue, SmtError> { Ok(SymValue::Term(t)) };
        match &e.kind {
            ExpKind::Var(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| unsupported(e, format!("unbound variable {name}"))),
            ExpKind::Bool(b) => term(Term::bool(*b)),
            ExpKind::Num(n) => match e.ty {
                Type::BitVec(width) => term(Term::BvConst {
                    value: bits(*n, width),
                    width,
                }),
                _ => term(Term::int(*n)),
            },
            ExpKind::Str(s) => term(Term::int(self.symbols.strings.code(s))),
            ExpKind::EnumEntry(case) => match &e.ty {
                Type::Enum(cases) => match cases.iter().position(|c| c == case) {
                    Some(index) => term(Term::int(index as i64)),
                    None => Err(unsupported(e, format!("{case} is not a case of {}", e.ty))),
                },
                other => Err(unsupported(e, format!("enum entry of type {other}"))),
            },
            ExpKind::Null => match &e.ty {
                Type::Maybe(inner) => Ok(SymValue::Maybe {
                    present: Term::bool(false),
                    value: Box::new(SymValue::default_of(inner)),
                }),
                other => Err(unsupported(e, format!("null of type {other}"))),
            },
            ExpKind::Just(x) => Ok(SymValue::Maybe {
                present: Term::bool(true),
                value: Box::new(self.encode(x, env)?),
            }),
            ExpKind::Call { func, args } => self.encode_call(e, func, args, env),
            ExpKind::Tuple(es) => Ok(SymValue::Tuple(
                es.iter()
                    .map(|x| self.encode(x, env))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            ExpKind::TupleGet(x, index) => self.encode(x, env)?.fmap(&mut |v| match v {
                SymValue::Tuple(mut items) if *index < items.len() => Ok(items.swap_remove(*index)),
                other => Err(unsupported(e, format!("no component {index} in {other:?}"))),
            }),
            ExpKind::MakeRecord(fields) => Ok(SymValue::Record(
                fields
                    .iter()
                    .map(|(name, x)| Ok((name.clone(), self.encode(x, env)?)))
                    .collect::<Result<Vec<_>, SmtError>>()?,
            )),
            ExpKind::GetField(x, field) => self.encode(x, env)?.fmap(&mut |v| match v {
                SymValue::Handle { value, .. } if field == "val" => Ok(*value),
                SymValue::Record(fields) => fields
                    .into_iter()
                    .find(|(name, _)| name == field)
                    .map(|(_, v)| v)
                    .ok_or_else(|| unsupported(e, format!("no field {field}"))),
                other => Err(unsupported(e, format!("no field {field} in {other:?}"))),
            }),
            ExpKind::Unary(op, x) => self.encode_unary(e, *op, x, env),
            ExpKind::Binary(op, a, b) => self.encode_binary(e, *op, a, b, env),
            ExpKind::Cond {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.encode_bool(cond, env)?;
                let then_value = self.encode(then_branch, env)?;
                let else_value = self.encode(else_branch, env)?;
                Ok(SymValue::ite(cond, then_value, else_value))
            }
            ExpKind::EmptyBag => Ok(SymValue::Bag(Vec::new())),
            ExpKind::Singleton(x) => Ok(SymValue::Bag(vec![Slot {
                mask: Term::bool(true),
                elem: self.encode(x, env)?,
            }])),
            ExpKind::Map(bag, f) => {
                let slots = self.encode_slots(bag, env)?;
                let mut out = Vec::with_capacity(slots.len());
                for slot in slots {
                    out.push(Slot {
                        mask: slot.mask,
                        elem: self.apply(f, slot.elem, env)?,
                    });
                }
                Ok(SymValue::Bag(out))
            }
            ExpKind::Filter(bag, p) => {
                let slots = self.encode_slots(bag, env)?;
                let mut out = Vec::with_capacity(slots.len());
                for slot in slots {
                    let keep = self.apply(p, slot.elem.clone(), env)?.into_term()?;
                    out.push(Slot {
                        mask: Term::and([slot.mask, keep]),
                        elem: slot.elem,
                    });
                }
                Ok(SymValue::Bag(out))
            }
            ExpKind::FlatMap(bag, f) => {
                let slots = self.encode_slots(bag, env)?;
                let mut outer = Vec::with_capacity(slots.len());
                for slot in slots {
                    outer.push(Slot {
                        mask: slot.mask,
                        elem: self.apply(f, slot.elem, env)?,
                    });
                }
                flatten(outer)
            }
            ExpKind::Flatten(x) => flatten(self.encode_slots(x, env)?),
            ExpKind::MakeMap { source, key, value } => {
                self.encode_make_map(e, source, key, value, env)
            }
            ExpKind::MakeMap2 { source, value } => {
                let key_ty = elem_type(e, &source.ty)?.clone();
                let slots = self.encode_slots(source, env)?;
                let keys = slots.iter().map(|s| s.elem.clone()).collect::<Vec<_>>();
                let present = self.first_occurrences(&key_ty, &slots, &keys)?;
                let mut entries = Vec::with_capacity(slots.len());
                for (slot, present) in slots.into_iter().zip(present) {
                    entries.push(MapEntry {
                        present,
                        value: self.apply(value, slot.elem.clone(), env)?,
                        key: slot.elem,
                    });
                }
                Ok(SymValue::Map(SymMap {
                    entries,
                    default: Box::new(SymValue::default_of(value.result_type())),
                }))
            }
            ExpKind::MapGet { map, key } => {
                let sym_map = self.encode(map, env)?.into_map()?;
                let k = self.encode(key, env)?;
                let mut acc = *sym_map.default;
                for entry in sym_map.entries.into_iter().rev() {
                    let hit = Term::and([entry.present, self.eq(&key.ty, &entry.key, &k)?]);
                    acc = SymValue::ite(hit, entry.value, acc);
                }
                Ok(acc)
            }
            ExpKind::MapKeys(map) => {
                let sym_map = self.encode(map, env)?.into_map()?;
                Ok(SymValue::Bag(
                    sym_map
                        .entries
                        .into_iter()
                        .map(|entry| Slot {
                            mask: entry.present,
                            elem: entry.key,
                        })
                        .collect(),
                ))
            }
            ExpKind::App(f, arg) => {
                let arg = self.encode(arg, env)?;
                self.apply(f, arg, env)
            }
            ExpKind::AlterMaybe(x, f) => self.encode(x, env)?.fmap(&mut |v| match v {
                SymValue::Maybe { present, value } => Ok(SymValue::Maybe {
                    present,
                    value: Box::new(self.apply(f, *value, env)?),
                }),
                other => Err(unsupported(e, format!("expected a maybe, got {other:?}"))),
            }),
            ExpKind::DropFront(x) => Ok(SymValue::Bag(drop_extreme(self.encode_slots(x, env)?, true))),
            ExpKind::DropBack(x) => Ok(SymValue::Bag(drop_extreme(self.encode_slots(x, env)?, false))),
            ExpKind::StateVar(x) => self.encode(x, env),
        }
    }

    fn encode_call(
        &mut self,
        e: &Exp,
        func: &str,
        args: &[Exp],
        env: &SymEnv,
    ) -> Result<SymValue, SmtError> {
        let result_sort = sort_of(&e.ty)
            .ok_or_else(|| unsupported(e, format!("uninterpreted result of type {}", e.ty)))?;
        let mut arg_sorts = Vec::with_capacity(args.len());
        let mut arg_terms = Vec::with_capacity(args.len());
        for arg in args {
            let sort = sort_of(&arg.ty).ok_or_else(|| {
                unsupported(e, format!("uninterpreted argument of type {}", arg.ty))
            })?;
            arg_sorts.push(sort);
            arg_terms.push(self.encode(arg, env)?.into_term()?);
        }
        let arg_types = args.iter().map(|a| a.ty.clone()).collect::<Vec<_>>();

        let index = match self
            .symbols
            .functions
            .iter()
            .position(|f| f.name == func && f.result == e.ty && f.arg_types == arg_types)
        {
            Some(index) => index,
            None => {
                let symbol = self.session.declare_fun(func, arg_sorts, result_sort);
                self.symbols.functions.push(UninterpretedFn {
                    name: func.to_string(),
                    symbol,
                    arg_types,
                    result: e.ty.clone(),
                    applications: Vec::new(),
                });
                self.symbols.functions.len() - 1
            }
        };
        let function = &mut self.symbols.functions[index];
        if !function.applications.contains(&arg_terms) {
            function.applications.push(arg_terms.clone());
        }
        let app = function.apply(arg_terms);
        match &e.ty {
            Type::Enum(cases) => self.session.assert(Term::and([
                Term::le(Term::int(0), app.clone()),
                Term::lt(app.clone(), Term::int(cases.len() as i64)),
            ])),
            Type::Int | Type::Long | Type::Native(_) => {
                self.session.assert(Term::in_i64_range(app.clone()))
            }
            _ => {}
        }
        Ok(SymValue::Term(app))
    }

    fn encode_unary(
        &mut self,
        e: &Exp,
        op: UnOp,
        x: &Exp,
        env: &SymEnv,
    ) -> Result<SymValue, SmtError> {
        match op {
            UnOp::Not => Ok(SymValue::Term(Term::not(self.encode_bool(x, env)?))),
            UnOp::Neg => Ok(SymValue::Term(wrap_machine(
                &e.ty,
                Term::neg(self.encode(x, env)?.into_term()?),
            ))),
            UnOp::Sum => {
                let sort = sort_of(&e.ty)
                    .filter(|_| is_numeric(&e.ty))
                    .ok_or_else(|| unsupported(e, format!("sum over {}", e.ty)))?;
                let slots = self.encode_slots(x, env)?;
                let mut parts = Vec::with_capacity(slots.len());
                for slot in slots {
                    parts.push(Term::ite(slot.mask, slot.elem.into_term()?, Term::zero(sort)));
                }
                Ok(SymValue::Term(wrap_machine(&e.ty, Term::add(sort, parts))))
            }
            UnOp::Len => Ok(SymValue::Term(len_of(&self.encode_slots(x, env)?))),
            UnOp::Unique => {
                let elem_ty = elem_type(e, &x.ty)?.clone();
                let slots = self.encode_slots(x, env)?;
                Ok(SymValue::Term(self.is_unique(&elem_ty, &slots)?))
            }
            UnOp::The => {
                let elem_ty = elem_type(e, &x.ty)?.clone();
                let slots = self.encode_slots(x, env)?;
                let mut acc = SymValue::Maybe {
                    present: Term::bool(false),
                    value: Box::new(SymValue::default_of(&elem_ty)),
                };
                for slot in slots.into_iter().rev() {
                    let here = SymValue::Maybe {
                        present: Term::bool(true),
                        value: Box::new(slot.elem),
                    };
                    acc = SymValue::ite(slot.mask, here, acc);
                }
                Ok(acc)
            }
            UnOp::Distinct => {
                let elem_ty = elem_type(e, &x.ty)?.clone();
                let slots = self.encode_slots(x, env)?;
                let elems = slots.iter().map(|s| s.elem.clone()).collect::<Vec<_>>();
                let keep = self.first_occurrences(&elem_ty, &slots, &elems)?;
                Ok(SymValue::Bag(
                    slots
                        .into_iter()
                        .zip(keep)
                        .map(|(slot, mask)| Slot {
                            mask,
                            elem: slot.elem,
                        })
                        .collect(),
                ))
            }
            UnOp::Exists => {
                let slots = self.encode_slots(x, env)?;
                Ok(SymValue::Term(Term::or(slots.into_iter().map(|s| s.mask))))
            }
        }
    }

    fn encode_binary(
        &mut self,
        e: &Exp,
        op: BinOp,
        a: &Exp,
        b: &Exp,
        env: &SymEnv,
    ) -> Result<SymValue, SmtError> {
        match op {
            BinOp::And => Ok(SymValue::Term(Term::and([
                self.encode_bool(a, env)?,
                self.encode_bool(b, env)?,
            ]))),
            BinOp::Or => Ok(SymValue::Term(Term::or([
                self.encode_bool(a, env)?,
                self.encode_bool(b, env)?,
            ]))),
            BinOp::Eq | BinOp::Ne => {
                let lhs = self.encode(a, env)?;
                let rhs = self.encode(b, env)?;
                let eq = self.eq(&a.ty, &lhs, &rhs)?;
                Ok(SymValue::Term(if op == BinOp::Eq { eq } else { Term::not(eq) }))
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                if !is_numeric(&a.ty) {
                    return Err(unsupported(e, format!("ordering on {}", a.ty)));
                }
                let lhs = self.encode(a, env)?.into_term()?;
                let rhs = self.encode(b, env)?.into_term()?;
                Ok(SymValue::Term(match op {
                    BinOp::Lt => Term::lt(lhs, rhs),
                    BinOp::Le => Term::le(lhs, rhs),
                    BinOp::Gt => Term::gt(lhs, rhs),
                    _ => Term::ge(lhs, rhs),
                }))
            }
            BinOp::Add => match &e.ty {
                Type::Bag(_) => {
                    let mut slots = self.encode_slots(a, env)?;
                    slots.extend(self.encode_slots(b, env)?);
                    Ok(SymValue::Bag(slots))
                }
                ty if is_numeric(ty) => {
                    let sort = sort_of(ty).unwrap_or(Sort::Int);
                    let lhs = self.encode(a, env)?.into_term()?;
                    let rhs = self.encode(b, env)?.into_term()?;
                    Ok(SymValue::Term(wrap_machine(ty, Term::add(sort, [lhs, rhs]))))
                }
                other => Err(unsupported(e, format!("addition on {other}"))),
            },
            BinOp::Sub => match &e.ty {
                Type::Bag(elem_ty) => {
                    let lhs = self.encode_slots(a, env)?;
                    let rhs = self.encode_slots(b, env)?;
                    Ok(SymValue::Bag(self.bag_difference(elem_ty, lhs, &rhs)?))
                }
                ty if is_numeric(ty) => {
                    let lhs = self.encode(a, env)?.into_term()?;
                    let rhs = self.encode(b, env)?.into_term()?;
                    Ok(SymValue::Term(wrap_machine(ty, Term::sub(lhs, rhs))))
                }
                other => Err(unsupported(e, format!("subtraction on {other}"))),
            },
            BinOp::In => {
                let x = self.encode(a, env)?;
                let slots = self.encode_slots(b, env)?;
                let mut hits = Vec::with_capacity(slots.len());
                for slot in &slots {
                    hits.push(Term::and([slot.mask.clone(), self.eq(&a.ty, &slot.elem, &x)?]));
                }
                Ok(SymValue::Term(Term::or(hits)))
            }
        }
    }

    fn encode_make_map(
        &mut self,
        e: &Exp,
        source: &Exp,
        key: &Lambda,
        value: &Lambda,
        env: &SymEnv,
    ) -> Result<SymValue, SmtError> {
        let key_ty = key.result_type().clone();
        let slots = self.encode_slots(source, env)?;
        let mut keys = Vec::with_capacity(slots.len());
        for slot in &slots {
            keys.push(self.apply(key, slot.elem.clone(), env)?);
        }
        let present = self.first_occurrences(&key_ty, &slots, &keys)?;

        let mut entries = Vec::with_capacity(slots.len());
        for (k, present) in keys.iter().zip(present) {
            let mut group = Vec::with_capacity(slots.len());
            for (slot, other) in slots.iter().zip(&keys) {
                group.push(Slot {
                    mask: Term::and([slot.mask.clone(), self.eq(&key_ty, other, k)?]),
                    elem: slot.elem.clone(),
                });
            }
            entries.push(MapEntry {
                present,
                key: k.clone(),
                value: self.apply(value, SymValue::Bag(group), env)?,
            });
        }
        trace!(map = %e, entries = entries.len(), "Encoded grouped map");
        Ok(SymValue::Map(SymMap {
            entries,
            default: Box::new(self.apply(value, SymValue::Bag(Vec::new()), env)?),
        }))
    }

    /// For each slot, whether it is present and no earlier present slot has
    /// an equal key.
    fn first_occurrences(
        &mut self,
        key_ty: &Type,
        slots: &[Slot],
        keys: &[SymValue],
    ) -> Result<Vec<Term>, SmtError> {
        let mut out = Vec::with_capacity(slots.len());
        for i in 0..slots.len() {
            let mut parts = vec![slots[i].mask.clone()];
            for j in 0..i {
                let dup = Term::and([slots[j].mask.clone(), self.eq(key_ty, &keys[j], &keys[i])?]);
                parts.push(Term::not(dup));
            }
            out.push(Term::and(parts));
        }
        Ok(out)
    }

    /// Multiset difference: the k-th present occurrence of a value (counting
    /// from zero) survives iff k is at least its multiplicity in `rhs`.
    fn bag_difference(
        &mut self,
        elem_ty: &Type,
        lhs: Vec<Slot>,
        rhs: &[Slot],
    ) -> Result<Vec<Slot>, SmtError> {
        let mut out = Vec::with_capacity(lhs.len());
        for i in 0..lhs.len() {
            let before = self.count_in(elem_ty, &lhs[..i], &lhs[i].elem)?;
            let removed = self.count_in(elem_ty, rhs, &lhs[i].elem)?;
            out.push(Term::and([lhs[i].mask.clone(), Term::ge(before, removed)]));
        }
        Ok(lhs
            .into_iter()
            .zip(out)
            .map(|(slot, mask)| Slot {
                mask,
                elem: slot.elem,
            })
            .collect())
    }

    pub fn count_in(&mut self, elem_ty: &Type, slots: &[Slot], x: &SymValue) -> Result<Term, SmtError> {
        let mut parts = Vec::with_capacity(slots.len());
        for slot in slots {
            parts.push(Term::indicator(Term::and([
                slot.mask.clone(),
                self.eq(elem_ty, &slot.elem, x)?,
            ])));
        }
        Ok(Term::add(Sort::Int, parts))
    }

    fn is_unique(&mut self, elem_ty: &Type, slots: &[Slot]) -> Result<Term, SmtError> {
        let mut parts = Vec::with_capacity(slots.len());
        for (i, slot) in slots.iter().enumerate() {
            let later = self.count_in(elem_ty, &slots[i + 1..], &slot.elem)?;
            parts.push(Term::implies(slot.mask.clone(), Term::eq(later, Term::int(0))));
        }
        Ok(Term::and(parts))
    }

    pub fn eq(&mut self, ty: &Type, lhs: &SymValue, rhs: &SymValue) -> Result<Term, SmtError> {
        match (lhs, rhs) {
            (SymValue::Union { .. }, _) | (_, SymValue::Union { .. }) => {
                lhs.clone().fmap_term(&mut |l| {
                    rhs.clone()
                        .fmap_term(&mut |r| self.eq_resolved(ty, &l, &r))
                })
            }
            _ => self.eq_resolved(ty, lhs, rhs),
        }
    }

    fn eq_resolved(&mut self, ty: &Type, lhs: &SymValue, rhs: &SymValue) -> Result<Term, SmtError> {
        let mismatch = || SmtError::UnsupportedConstruct {
            message: format!("cannot compare {lhs:?} and {rhs:?} at type {ty}"),
        };
        match (ty, lhs, rhs) {
            (_, SymValue::Term(a), SymValue::Term(b)) => Ok(Term::eq(a.clone(), b.clone())),
            (
                Type::Maybe(inner),
                SymValue::Maybe {
                    present: p1,
                    value: v1,
                },
                SymValue::Maybe {
                    present: p2,
                    value: v2,
                },
            ) => {
                let both_present = Term::and([p1.clone(), p2.clone(), self.eq(inner, v1, v2)?]);
                let both_absent = Term::and([Term::not(p1.clone()), Term::not(p2.clone())]);
                Ok(Term::or([both_absent, both_present]))
            }
            (Type::Bag(elem_ty), SymValue::Bag(a), SymValue::Bag(b)) => {
                let mut parts = vec![Term::eq(len_of(a), len_of(b))];
                for slot in a.iter().chain(b.iter()) {
                    let in_a = self.count_in(elem_ty, a, &slot.elem)?;
                    let in_b = self.count_in(elem_ty, b, &slot.elem)?;
                    parts.push(Term::implies(slot.mask.clone(), Term::eq(in_a, in_b)));
                }
                Ok(Term::and(parts))
            }
            (Type::Handle { .. }, SymValue::Handle { id: a, .. }, SymValue::Handle { id: b, .. }) => {
                Ok(Term::eq(a.clone(), b.clone()))
            }
            (Type::Record(fields), SymValue::Record(a), SymValue::Record(b)) => {
                let mut parts = Vec::with_capacity(fields.len());
                for (name, field_ty) in fields {
                    let x = a.iter().find(|(n, _)| n == name).map(|(_, v)| v);
                    let y = b.iter().find(|(n, _)| n == name).map(|(_, v)| v);
                    match (x, y) {
                        (Some(x), Some(y)) => parts.push(self.eq(field_ty, x, y)?),
                        _ => return Err(mismatch()),
                    }
                }
                Ok(Term::and(parts))
            }
            (Type::Tuple(ts), SymValue::Tuple(a), SymValue::Tuple(b))
                if a.len() == ts.len() && b.len() == ts.len() =>
            {
                let mut parts = Vec::with_capacity(ts.len());
                for ((t, x), y) in ts.iter().zip(a).zip(b) {
                    parts.push(self.eq(t, x, y)?);
                }
                Ok(Term::and(parts))
            }
            (Type::Map(_, _), _, _) => Err(SmtError::UnsupportedConstruct {
                message: format!("equality on maps of type {ty}"),
            }),
            _ => Err(mismatch()),
        }
    }
}

fn flatten(outer: Vec<Slot>) -> Result<SymValue, SmtError> {
    let mut out = Vec::new();
    for slot in outer {
        for inner in slot.elem.into_slots()? {
            out.push(Slot {
                mask: Term::and([slot.mask.clone(), inner.mask]),
                elem: inner.elem,
            });
        }
    }
    Ok(SymValue::Bag(out))
}

/// Removes the first (or last) present slot: a slot survives iff some slot
/// before (or after) it is present.
fn drop_extreme(slots: Vec<Slot>, from_front: bool) -> Vec<Slot> {
    let masks = slots.iter().map(|s| s.mask.clone()).collect::<Vec<_>>();
    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            let others = if from_front { &masks[..i] } else { &masks[i + 1..] };
            Slot {
                mask: Term::and([slot.mask, Term::or(others.iter().cloned())]),
                elem: slot.elem,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;

    fn int_bag_var(session: &mut Session, name: &str, n: usize) -> SymValue {
        SymValue::Bag(
            (0..n)
                .map(|_| Slot {
                    mask: session.fresh_const(&format!("{name}_mask"), Sort::Bool),
                    elem: SymValue::Term(session.fresh_const(name, Sort::Int)),
                })
                .collect(),
        )
    }

    #[test]
    fn string_codes_round_trip() {
        let mut table = StringTable::default();
        for s in ["", "bbb", "aa", "hello", "world"] {
            let code = table.code(s);
            assert_eq!(table.decode(code), s);
        }
        assert_eq!(table.code("hello"), STRING_LITERAL_BASE);
        assert_eq!(table.decode(STRING_LITERAL_BASE + 1), "world");
        assert_eq!(table.decode(-3), "aaa");
    }

    #[test]
    fn calls_share_one_function_per_signature() {
        let mut session = Session::new(SolverConfig::default());
        let mut encoder = Encoder::new(&mut session);
        let x = Exp::var("x", Type::Int);
        let e = Exp::eq(
            Exp::call("f", vec![x.clone()], Type::Int),
            Exp::call("f", vec![Exp::num(1)], Type::Int),
        );
        let env = SymEnv::from([("x".to_string(), SymValue::Term(Term::var("x", Sort::Int)))]);
        let t = encoder.encode_bool(&e, &env).unwrap();
        assert_eq!(t.to_string(), "(= (_f0 x) (_f0 1))");
        let symbols = encoder.finish();
        assert_eq!(symbols.functions.len(), 1);
        assert_eq!(symbols.functions[0].applications.len(), 2);
    }

    #[test]
    fn enum_results_are_range_checked() {
        let mut session = Session::new(SolverConfig::default());
        let colour = Type::enumeration(["Red", "Green", "Blue"]);
        let mut encoder = Encoder::new(&mut session);
        let e = Exp::eq(
            Exp::call("paint", vec![], colour.clone()),
            Exp::enum_entry("Blue", colour),
        );
        let t = encoder.encode_bool(&e, &SymEnv::new()).unwrap();
        assert_eq!(t.to_string(), "(= _paint0 2)");
        assert_eq!(
            session.assertions().iter().map(Term::to_string).collect::<Vec<_>>(),
            vec!["(and (<= 0 _paint0) (< _paint0 3))"]
        );
    }

    #[test]
    fn integer_arithmetic_wraps_like_i64() {
        let mut session = Session::new(SolverConfig::default());
        let mut encoder = Encoder::new(&mut session);
        let x = Exp::var("x", Type::Int);
        let env = SymEnv::from([("x".to_string(), SymValue::Term(Term::var("x", Sort::Int)))]);
        let sum = encoder
            .encode(&Exp::add(x.clone(), Exp::num(i64::MAX)), &env)
            .unwrap()
            .into_term()
            .unwrap();
        assert_eq!(
            sum,
            Term::wrap_i64(Term::add(Sort::Int, [Term::var("x", Sort::Int), Term::int(i64::MAX)]))
        );

        let positive = Exp::le(Exp::num(1), Exp::call("f", vec![x], Type::Int));
        encoder.encode_bool(&positive, &env).unwrap();
        assert_eq!(
            session.assertions().iter().map(Term::to_string).collect::<Vec<_>>(),
            vec!["(and (<= (- 9223372036854775808) (_f0 x)) (<= (_f0 x) 9223372036854775807))"]
        );
    }

    #[test]
    fn bag_length_counts_masks() {
        let mut session = Session::new(SolverConfig::default());
        let xs = int_bag_var(&mut session, "xs", 2);
        let env = SymEnv::from([("xs".to_string(), xs)]);
        let mut encoder = Encoder::new(&mut session);
        let t = encoder
            .encode(&Exp::len(Exp::var("xs", Type::bag(Type::Int))), &env)
            .unwrap()
            .into_term()
            .unwrap();
        insta::assert_snapshot!(t.to_string(), @"(+ (ite _xs_mask0 1 0) (ite _xs_mask2 1 0))");
    }

    #[test]
    fn map_equality_is_unsupported() {
        let mut session = Session::new(SolverConfig::default());
        let mut encoder = Encoder::new(&mut session);
        let m = Exp::make_map2(
            Exp::empty_bag(Type::Int),
            Lambda::new("k", Type::Int, Exp::var("k", Type::Int)),
        );
        let err = encoder
            .encode_bool(&Exp::eq(m.clone(), m), &SymEnv::new())
            .unwrap_err();
        assert!(matches!(err, SmtError::UnsupportedConstruct { .. }));
    }

    #[test]
    fn string_ordering_is_unsupported() {
        let mut session = Session::new(SolverConfig::default());
        let mut encoder = Encoder::new(&mut session);
        let e = Exp::binary(BinOp::Lt, Exp::string("a"), Exp::string("b"));
        let err = encoder.encode_bool(&e, &SymEnv::new()).unwrap_err();
        assert!(err.to_string().contains("ordering on String"));
    }
}
