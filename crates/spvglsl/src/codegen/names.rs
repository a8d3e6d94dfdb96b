//! Identifier assignment.
//!
//! Debug names are sanitized into valid GLSL identifiers and made unique
//! across the whole output. IDs without a usable name fall back to `_<id>`,
//! struct members to `_m<index>`. Assignment is deterministic for a given
//! emission order, so every attempt of a compilation names things the same
//! way.

use crate::ir::Id;
use std::collections::{HashMap, HashSet};

/// Turn an arbitrary debug string into something GLSL accepts.
///
/// Mangled names such as `foo(vf4;` keep only the part before the
/// parenthesis. Characters outside `[A-Za-z0-9_]` become `_`, runs of
/// underscores collapse (GLSL reserves `__`), and names that would start
/// with a digit or the reserved `gl_` prefix get a leading underscore.
pub fn sanitize(raw: &str) -> String {
    let raw = raw.split('(').next().unwrap_or("");
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '_' };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) || out.starts_with("gl_") {
        out.insert(0, '_');
    }
    if out == "_" {
        out.clear();
    }
    out
}

#[derive(Debug, Default)]
pub struct NameCache {
    assigned: HashMap<Id, String>,
    used: HashSet<String>,
    members: HashMap<Id, Vec<String>>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` as taken without binding it to an ID.
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    pub fn get(&self, id: Id) -> Option<&str> {
        self.assigned.get(&id).map(String::as_str)
    }

    /// Bind `id` to an exact name that was chosen elsewhere (`main`,
    /// builtin spellings).
    pub fn bind(&mut self, id: Id, name: &str) {
        self.used.insert(name.to_string());
        self.assigned.insert(id, name.to_string());
    }

    /// The name of `id`, assigning one from `preferred` on first use.
    pub fn assign(&mut self, id: Id, preferred: &str, is_keyword: impl Fn(&str) -> bool) -> String {
        if let Some(name) = self.assigned.get(&id) {
            return name.clone();
        }
        let base = match sanitize(preferred) {
            base if base.is_empty() => format!("_{id}"),
            base => base,
        };
        let name = unique(&base, |candidate| {
            is_keyword(candidate) || self.used.contains(candidate)
        });
        self.used.insert(name.clone());
        self.assigned.insert(id, name.clone());
        name
    }

    /// A new unique name not bound to any ID, for compiler temporaries.
    pub fn fresh(&mut self, base: &str) -> String {
        let name = unique(base, |candidate| self.used.contains(candidate));
        self.used.insert(name.clone());
        name
    }

    /// Member names of struct `id`, assigned together on first use.
    pub fn members(
        &mut self,
        id: Id,
        preferred: &[&str],
        is_keyword: impl Fn(&str) -> bool,
    ) -> &[String] {
        self.members.entry(id).or_insert_with(|| {
            let mut taken = HashSet::new();
            preferred
                .iter()
                .enumerate()
                .map(|(index, raw)| {
                    let base = match sanitize(raw) {
                        base if base.is_empty() => format!("_m{index}"),
                        base => base,
                    };
                    let name = unique(&base, |c| is_keyword(c) || taken.contains(c));
                    taken.insert(name.clone());
                    name
                })
                .collect()
        })
    }
}

/// `base`, or `base` with the smallest numeric suffix that is not taken.
fn unique(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let separator = if base.ends_with('_') { "" } else { "_" };
    (1u32..)
        .map(|n| format!("{base}{separator}{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
