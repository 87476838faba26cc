//! FILENAME: core/facet-engine/src/latch.rs
//! LATCH dimension inference for facets that carry no explicit dimension.
//!
//! Inference is fuzzy by nature, so it sits behind `DimensionInference` and
//! the remap engine only ever talks to the trait.

use regex::Regex;

use crate::definition::{FacetConfig, LatchDimension};
use crate::error::FacetError;
use crate::settings::LatchPattern;

pub trait DimensionInference: Send + Sync {
    fn infer(&self, facet: &FacetConfig) -> LatchDimension;
}

// ============================================================================
// KEYWORD INFERENCE
// ============================================================================

/// Built-in vocabulary, checked in order. The first dimension with a term
/// contained in the facet id (then the name) wins.
const VOCABULARY: &[(LatchDimension, &[&str])] = &[
    (
        LatchDimension::Time,
        &["date", "time", "created", "modified", "updated", "due", "year", "month", "week", "day", "deadline"],
    ),
    (
        LatchDimension::Location,
        &["location", "place", "city", "country", "region", "address", "geo", "site"],
    ),
    (
        LatchDimension::Alphabet,
        &["name", "title", "alpha", "letter", "label"],
    ),
    (
        LatchDimension::Hierarchy,
        &["priority", "rank", "level", "importance", "parent", "folder", "depth", "order"],
    ),
    (
        LatchDimension::Category,
        &["category", "type", "status", "tag", "kind", "group"],
    ),
];

/// Lowercase substring matching against a fixed vocabulary. Falls back to
/// `Category`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordInference;

impl KeywordInference {
    fn match_text(text: &str) -> Option<LatchDimension> {
        let text = text.to_lowercase();
        VOCABULARY
            .iter()
            .find(|(_, terms)| terms.iter().any(|term| text.contains(term)))
            .map(|(dimension, _)| *dimension)
    }
}

impl DimensionInference for KeywordInference {
    fn infer(&self, facet: &FacetConfig) -> LatchDimension {
        KeywordInference::match_text(&facet.id)
            .or_else(|| KeywordInference::match_text(&facet.name))
            .unwrap_or_default()
    }
}

// ============================================================================
// PATTERN INFERENCE
// ============================================================================

/// User-supplied regular expressions, tried in order against id then name.
pub struct PatternInference {
    patterns: Vec<(LatchDimension, Regex)>,
}

impl PatternInference {
    pub fn new(patterns: &[LatchPattern]) -> Result<Self, FacetError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){}", p.pattern))
                    .map(|re| (p.dimension, re))
                    .map_err(|e| {
                        FacetError::InvalidConfig(format!("latch pattern '{}': {}", p.pattern, e))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PatternInference { patterns })
    }

    fn match_text(&self, text: &str) -> Option<LatchDimension> {
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(dimension, _)| *dimension)
    }
}

impl DimensionInference for PatternInference {
    fn infer(&self, facet: &FacetConfig) -> LatchDimension {
        self.match_text(&facet.id)
            .or_else(|| self.match_text(&facet.name))
            .unwrap_or_default()
    }
}

/// Picks the strategy the settings ask for: patterns when any are configured,
/// the built-in vocabulary otherwise.
pub fn inference_for(patterns: &[LatchPattern]) -> Result<Box<dyn DimensionInference>, FacetError> {
    if patterns.is_empty() {
        Ok(Box::new(KeywordInference))
    } else {
        Ok(Box::new(PatternInference::new(patterns)?))
    }
}
