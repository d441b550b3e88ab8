use std::collections::HashSet;

/// Generator for names that do not collide with a caller-supplied set.
#[derive(Debug, Default)]
pub struct NameGen {
    next: u64,
    taken: HashSet<String>,
}

impl NameGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn avoiding<I, S>(avoid: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            next: 0,
            taken: avoid.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fresh(&mut self, hint: &str) -> String {
        loop {
            let candidate = format!("_{}{}", hint, self.next);
            self.next += 1;
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}
