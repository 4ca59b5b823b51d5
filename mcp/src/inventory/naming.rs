//! Multi-convention tool name resolution.
//!
//! Canonical names use dot notation (`proxy.bing.search`). Callers may also
//! use the flat form (`proxy_bing_search`) or a shortened suffix
//! (`bing.search`, `bing_search`, `search`). [`NamingIndex`] holds the
//! derived lookup maps; it is rebuilt from the registry key set on every
//! mutation and never edited in place.
//!
//! Suffix collisions are settled deterministically: the longest canonical
//! name wins, and among equally long names the one indexed last wins.

use std::collections::HashMap;

use tracing::debug;

/// Flat form of a name: `.` and any non-identifier character become `_`,
/// runs of `_` collapse to one.
pub fn to_flat_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for ch in name.chars() {
        let mapped = if ch.is_ascii_alphanumeric() { ch } else { '_' };
        if mapped == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        out.push(mapped);
    }
    out
}

/// Dotted form of a flat name: every `_` becomes `.`.
pub fn to_dotted_name(name: &str) -> String {
    name.replace('_', ".")
}

/// Derived alias maps over a registry key set.
#[derive(Debug, Default, Clone)]
pub struct NamingIndex {
    dot_to_underscore: HashMap<String, String>,
    underscore_to_dot: HashMap<String, String>,
    suffix_to_canonical: HashMap<String, String>,
}

impl NamingIndex {
    /// Build the index from canonical names in registry insertion order.
    pub fn build<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index = NamingIndex::default();
        for name in names {
            index.add(name);
        }
        index
    }

    /// Build the index and route the shortened forms of each
    /// `(original, alias)` pair to the alias.
    ///
    /// Used for flat aliases whose dotted original is no longer registered,
    /// so `bing.search` still reaches `proxy_bing_search`.
    pub fn build_with_aliases<'a, I, A>(names: I, aliases: A) -> Self
    where
        I: IntoIterator<Item = &'a str>,
        A: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut index = Self::build(names);
        for (original, alias) in aliases {
            index.add_suffixes(original, alias);
        }
        index
    }

    fn add(&mut self, canonical: &str) {
        let flat = to_flat_name(canonical);
        if flat != canonical {
            self.dot_to_underscore
                .insert(canonical.to_string(), flat.clone());
            insert_preferring_longest(&mut self.underscore_to_dot, flat, canonical);
        }
        self.add_suffixes(canonical, canonical);
    }

    /// Map the last one and two dotted segments of `dotted` to `target`.
    fn add_suffixes(&mut self, dotted: &str, target: &str) {
        let parts: Vec<&str> = dotted.split('.').collect();
        if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
            return;
        }
        let mut suffixes = vec![parts[parts.len() - 1].to_string()];
        if parts.len() >= 3 {
            suffixes.push(parts[parts.len() - 2..].join("."));
        }
        for suffix in suffixes {
            let flat_suffix = to_flat_name(&suffix);
            if flat_suffix != suffix {
                insert_preferring_longest(&mut self.suffix_to_canonical, flat_suffix, target);
            }
            insert_preferring_longest(&mut self.suffix_to_canonical, suffix, target);
        }
    }

    /// Resolve `candidate` to a registered canonical name.
    ///
    /// `is_registered` reports whether a name is a registry key. Returns the
    /// candidate unchanged when nothing matches, so that failures surface as
    /// ordinary lookup misses.
    pub fn resolve<F>(&self, candidate: &str, is_registered: F) -> String
    where
        F: Fn(&str) -> bool,
    {
        if is_registered(candidate) {
            return candidate.to_string();
        }

        // underscore -> dot
        if let Some(canonical) = self.underscore_to_dot.get(candidate) {
            if is_registered(canonical) {
                return canonical.clone();
            }
        }
        if candidate.contains('_') {
            let dotted = to_dotted_name(candidate);
            if is_registered(&dotted) {
                return dotted;
            }
        }

        // dot -> underscore
        let flat = to_flat_name(candidate);
        if flat != candidate {
            if is_registered(&flat) {
                return flat;
            }
            if let Some(canonical) = self.underscore_to_dot.get(&flat) {
                if is_registered(canonical) {
                    return canonical.clone();
                }
            }
        }

        // shortened suffix
        for key in [candidate, flat.as_str()] {
            if let Some(canonical) = self.suffix_to_canonical.get(key) {
                if is_registered(canonical) {
                    return canonical.clone();
                }
            }
        }

        candidate.to_string()
    }

    /// Flat form recorded for a canonical name.
    pub fn flat_for(&self, canonical: &str) -> Option<&str> {
        self.dot_to_underscore.get(canonical).map(String::as_str)
    }

    /// Canonical name recorded for a flat form.
    pub fn canonical_for_flat(&self, flat: &str) -> Option<&str> {
        self.underscore_to_dot.get(flat).map(String::as_str)
    }

    /// Canonical name a shortened suffix expands to.
    pub fn canonical_for_suffix(&self, suffix: &str) -> Option<&str> {
        self.suffix_to_canonical.get(suffix).map(String::as_str)
    }

    pub fn counts(&self) -> NamingCounts {
        NamingCounts {
            flat: self.underscore_to_dot.len(),
            suffixes: self.suffix_to_canonical.len(),
        }
    }
}

/// Sizes of the derived maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamingCounts {
    pub flat: usize,
    pub suffixes: usize,
}

fn insert_preferring_longest(map: &mut HashMap<String, String>, key: String, canonical: &str) {
    if let Some(existing) = map.get(&key) {
        if existing.as_str() == canonical {
            return;
        }
        if existing.len() > canonical.len() {
            debug!(
                "Alias '{}' is ambiguous: keeping '{}' over '{}'",
                key, existing, canonical
            );
            return;
        }
        debug!(
            "Alias '{}' is ambiguous: '{}' replaces '{}'",
            key, canonical, existing
        );
    }
    map.insert(key, canonical.to_string());
}
