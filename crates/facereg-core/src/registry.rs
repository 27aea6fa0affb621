//! In-memory registry of enrolled encodings.

use crate::matcher::{MatchOutcome, Matcher};
use crate::types::Encoding;

/// One enrolled person.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub name: String,
    pub encoding: Encoding,
}

/// Ordered collection of enrolled encodings.
///
/// Entries are only ever appended. Name uniqueness is the store's job: the
/// registry accepts duplicates, and under [`FirstWithinThreshold`] a later
/// duplicate is shadowed by the earlier one.
///
/// [`FirstWithinThreshold`]: crate::matcher::FirstWithinThreshold
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-append entries in iteration order. Does not deduplicate.
    pub fn load<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = RegistryEntry>,
    {
        let before = self.entries.len();
        self.entries.extend(entries);
        tracing::debug!(loaded = self.entries.len() - before, total = self.entries.len(), "registry loaded");
    }

    /// Append a single entry.
    pub fn enroll(&mut self, name: impl Into<String>, encoding: Encoding) {
        self.entries.push(RegistryEntry {
            name: name.into(),
            encoding,
        });
    }

    /// Search the registry for `probe`.
    pub fn find(&self, probe: &Encoding, matcher: &impl Matcher, threshold: f32) -> MatchOutcome {
        matcher.compare(probe, &self.entries, threshold)
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
