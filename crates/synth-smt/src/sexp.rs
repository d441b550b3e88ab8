use anyhow::{bail, Context};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

/// A scalar read back from a `get-value` response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Atom {
    Bool(bool),
    Int(i64),
    BitVec { value: u64, width: u32 },
}

impl Atom {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Atom::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Atom::Int(n) => Some(n),
            Atom::BitVec { value, .. } => Some(value as i64),
            Atom::Bool(_) => None,
        }
    }
}

fn tokenize(input: &str) -> anyhow::Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&ch) = chars.peek() {
        match ch {
            '(' | ')' => {
                tokens.push(ch.to_string());
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '"' | '|' => {
                let close = ch;
                let mut token = String::new();
                token.push(ch);
                chars.next();
                loop {
                    let Some(c) = chars.next() else {
                        bail!("unterminated {close} literal in solver output");
                    };
                    token.push(c);
                    if c == close {
                        // SMT-LIB escapes a quote inside a string by doubling it.
                        if close == '"' && chars.peek() == Some(&'"') {
                            chars.next();
                            continue;
                        }
                        break;
                    }
                }
                tokens.push(token);
            }
            _ => {
                let mut token = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' {
                        break;
                    }
                    token.push(c);
                    chars.next();
                }
                tokens.push(token);
            }
        }
    }
    Ok(tokens)
}

pub fn parse_all(input: &str) -> anyhow::Result<Vec<Sexp>> {
    let tokens = tokenize(input)?;
    let mut stack: Vec<Vec<Sexp>> = vec![Vec::new()];
    for token in tokens {
        match token.as_str() {
            "(" => stack.push(Vec::new()),
            ")" => {
                let done = stack.pop().context("unbalanced ')' in solver output")?;
                stack
                    .last_mut()
                    .context("unbalanced ')' in solver output")?
                    .push(Sexp::List(done));
            }
            _ => stack
                .last_mut()
                .context("unbalanced ')' in solver output")?
                .push(Sexp::Atom(token)),
        }
    }
    if stack.len() != 1 {
        bail!("unbalanced '(' in solver output");
    }
    Ok(stack.pop().unwrap_or_default())
}

fn parse_numeral(text: &str) -> anyhow::Result<i64> {
    text.parse::<i64>()
        .with_context(|| format!("integer {text} does not fit in 64 bits"))
}

pub fn to_atom(sexp: &Sexp) -> anyhow::Result<Atom> {
    match sexp {
        Sexp::Atom(text) => match text.as_str() {
            "true" => Ok(Atom::Bool(true)),
            "false" => Ok(Atom::Bool(false)),
            t if t.starts_with("#b") => {
                let digits = &t[2..];
                let value = u64::from_str_radix(digits, 2)
                    .with_context(|| format!("bad binary literal {t}"))?;
                Ok(Atom::BitVec {
                    value,
                    width: digits.len() as u32,
                })
            }
            t if t.starts_with("#x") => {
                let digits = &t[2..];
                let value = u64::from_str_radix(digits, 16)
                    .with_context(|| format!("bad hex literal {t}"))?;
                Ok(Atom::BitVec {
                    value,
                    width: digits.len() as u32 * 4,
                })
            }
            t => Ok(Atom::Int(parse_numeral(t)?)),
        },
        Sexp::List(items) => match items.as_slice() {
            [Sexp::Atom(minus), inner] if minus == "-" => match to_atom(inner)? {
                Atom::Int(n) => Ok(Atom::Int(n.wrapping_neg())),
                other => bail!("cannot negate {other:?}"),
            },
            [Sexp::Atom(under), Sexp::Atom(bv), Sexp::Atom(width)]
                if under == "_" && bv.starts_with("bv") =>
            {
                let value = bv[2..]
                    .parse::<u64>()
                    .with_context(|| format!("bad bit-vector literal {bv}"))?;
                let width = width
                    .parse::<u32>()
                    .with_context(|| format!("bad bit-vector width {width}"))?;
                Ok(Atom::BitVec { value, width })
            }
            _ => bail!("unsupported model value {sexp:?}"),
        },
    }
}

/// Reads the values out of a `get-value` response, in query order.
pub fn get_value_response(sexp: &Sexp) -> anyhow::Result<Vec<Atom>> {
    let Sexp::List(pairs) = sexp else {
        bail!("expected a get-value response, got {sexp:?}");
    };
    if let Some(Sexp::Atom(head)) = pairs.first() {
        if head == "error" {
            bail!("solver reported an error: {sexp:?}");
        }
    }
    pairs
        .iter()
        .map(|pair| match pair {
            Sexp::List(kv) if kv.len() == 2 => to_atom(&kv[1]),
            other => bail!("malformed get-value entry {other:?}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_get_value_pairs() {
        let parsed = parse_all("((x 3) ((+ y 1) (- 4)) (b true) (v #b0101) (w (_ bv7 8)))").unwrap();
        let atoms = get_value_response(&parsed[0]).unwrap();
        assert_eq!(
            atoms,
            vec![
                Atom::Int(3),
                Atom::Int(-4),
                Atom::Bool(true),
                Atom::BitVec { value: 5, width: 4 },
                Atom::BitVec { value: 7, width: 8 },
            ]
        );
    }

    #[test]
    fn surfaces_solver_errors() {
        let parsed = parse_all(r#"(error "line 3 column 10: model is not available")"#).unwrap();
        assert!(get_value_response(&parsed[0]).is_err());
    }

    #[test]
    fn rejects_unbalanced_input() {
        assert!(parse_all("((x 1)").is_err());
        assert!(parse_all("(x 1))").is_err());
    }
}
