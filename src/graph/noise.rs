//! Which chunks are too anonymous or too noisy to become nodes.
use super::naming::ResolvedName;
use crate::db::models::{ANONYMOUS_NAME, ChunkKind};
use regex::RegexSet;
use serde::Serialize;

/// Names parsers give to functions that have none.
pub const ANONYMOUS_MARKERS: &[&str] = &[
    ANONYMOUS_NAME,
    "anonymous",
    "arrow_function",
    "lambda",
    "closure",
    "function",
    "func",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    Anonymous,
    Noise,
}

pub struct NoiseFilter {
    patterns: RegexSet,
}

impl NoiseFilter {
    pub fn new(patterns: &[String]) -> Result<Self, regex::Error> {
        Ok(Self {
            patterns: RegexSet::new(patterns)?,
        })
    }

    /// True when `name` is a test helper, debug call or language decorator.
    pub fn is_noise(&self, name: &str) -> bool {
        self.patterns.is_match(name)
    }

    /// Why a chunk stays out of the graph, if it does.
    pub fn classify(&self, kind: ChunkKind, name: &ResolvedName) -> Option<FilterReason> {
        if kind.is_callable()
            && (name.is_placeholder() || ANONYMOUS_MARKERS.contains(&name.as_str()))
        {
            return Some(FilterReason::Anonymous);
        }
        if !name.is_placeholder() && self.is_noise(name.as_str()) {
            return Some(FilterReason::Noise);
        }
        None
    }
}
