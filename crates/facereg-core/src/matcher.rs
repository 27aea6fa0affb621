//! Matching a probe encoding against the registry.

use crate::registry::RegistryEntry;
use crate::types::Encoding;
use std::fmt;
use std::str::FromStr;

/// Euclidean distance below which two encodings belong to the same person.
///
/// Tied to the geometry of the descriptor model; a match requires a distance
/// strictly less than this value.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Cosine similarity at which two ArcFace (`w600k_r50`) descriptors are taken
/// to be the same person.
pub const ARCFACE_COSINE_THRESHOLD: f32 = 0.40;

/// Euclidean distance equivalent to `cosine` similarity between
/// L2-normalized descriptors: `d = sqrt(2 - 2 cos)`.
pub fn euclidean_threshold_for_cosine(cosine: f32) -> f32 {
    (2.0 - 2.0 * cosine).max(0.0).sqrt()
}

/// Euclidean threshold for the shipped ArcFace model, about 1.095.
pub fn arcface_match_threshold() -> f32 {
    euclidean_threshold_for_cosine(ARCFACE_COSINE_THRESHOLD)
}

/// Outcome of a registry search. `Unknown` is a normal negative result.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched { name: String, distance: f32 },
    Unknown,
}

impl MatchOutcome {
    pub fn name(&self) -> Option<&str> {
        match self {
            MatchOutcome::Matched { name, .. } => Some(name),
            MatchOutcome::Unknown => None,
        }
    }
}

/// Strategy for comparing a probe encoding against the enrolled entries.
pub trait Matcher {
    fn compare(&self, probe: &Encoding, gallery: &[RegistryEntry], threshold: f32) -> MatchOutcome;
}

/// Entries whose encodings share the probe's descriptor space. Others can
/// never match and are logged.
fn comparable<'a>(
    probe: &'a Encoding,
    gallery: &'a [RegistryEntry],
) -> impl Iterator<Item = &'a RegistryEntry> + 'a {
    gallery.iter().filter(move |entry| {
        let ok = probe.is_comparable(&entry.encoding);
        if !ok {
            tracing::warn!(
                user_name = %entry.name,
                probe_dim = probe.dim(),
                entry_dim = entry.encoding.dim(),
                probe_model = ?probe.model_version,
                entry_model = ?entry.encoding.model_version,
                "skipping encoding from a different descriptor model"
            );
        }
        ok
    })
}

/// Returns the first entry, in registry order, within the threshold.
///
/// An earlier entry wins over a later, closer one.
pub struct FirstWithinThreshold;

impl Matcher for FirstWithinThreshold {
    fn compare(&self, probe: &Encoding, gallery: &[RegistryEntry], threshold: f32) -> MatchOutcome {
        comparable(probe, gallery)
            .map(|entry| (entry, probe.euclidean_distance(&entry.encoding)))
            .find(|(_, distance)| *distance < threshold)
            .map_or(MatchOutcome::Unknown, |(entry, distance)| MatchOutcome::Matched {
                name: entry.name.clone(),
                distance,
            })
    }
}

/// Returns the closest entry, if it is within the threshold.
///
/// Ties keep the earlier entry.
pub struct NearestWithinThreshold;

impl Matcher for NearestWithinThreshold {
    fn compare(&self, probe: &Encoding, gallery: &[RegistryEntry], threshold: f32) -> MatchOutcome {
        let mut best: Option<(&RegistryEntry, f32)> = None;

        for entry in comparable(probe, gallery) {
            let distance = probe.euclidean_distance(&entry.encoding);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((entry, distance));
            }
        }

        match best {
            Some((entry, distance)) if distance < threshold => MatchOutcome::Matched {
                name: entry.name.clone(),
                distance,
            },
            _ => MatchOutcome::Unknown,
        }
    }
}

/// Configurable choice between the two matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStrategy {
    #[default]
    First,
    Nearest,
}

impl Matcher for MatchStrategy {
    fn compare(&self, probe: &Encoding, gallery: &[RegistryEntry], threshold: f32) -> MatchOutcome {
        match self {
            MatchStrategy::First => FirstWithinThreshold.compare(probe, gallery, threshold),
            MatchStrategy::Nearest => NearestWithinThreshold.compare(probe, gallery, threshold),
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStrategy::First => f.write_str("first"),
            MatchStrategy::Nearest => f.write_str("nearest"),
        }
    }
}

impl FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MatchStrategy::First),
            "nearest" => Ok(MatchStrategy::Nearest),
            other => Err(format!("unknown match strategy {other:?} (expected \"first\" or \"nearest\")")),
        }
    }
}
