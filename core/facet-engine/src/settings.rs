//! FILENAME: core/facet-engine/src/settings.rs
//! Engine settings. Every field has a default so a partial JSON document
//! (or none at all) yields a usable configuration.

use serde::{Deserialize, Serialize};

use crate::definition::{LatchDimension, Plane};
use crate::error::FacetError;

/// Maximum visible nesting depth of a header path.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Maximum number of header nodes emitted per axis.
pub const DEFAULT_MAX_HEADERS: usize = 100;

/// Smallest depth that still fits a head level, the collapsed marker and a
/// tail level.
pub const MIN_MAX_DEPTH: usize = 3;

/// Sentinel label for records whose grouped column is null.
pub const DEFAULT_UNASSIGNED_LABEL: &str = "Unassigned";

// ============================================================================
// TREE LIMITS
// ============================================================================

/// Knobs governing degenerate-case behavior of the header tree builder.
/// Only constructed through `new`, `default` or validated deserialization,
/// so a `TreeLimits` value always satisfies the bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LimitsDocument")]
pub struct TreeLimits {
    max_depth: usize,
    max_headers: usize,
}

#[derive(Deserialize)]
#[serde(default)]
struct LimitsDocument {
    max_depth: usize,
    max_headers: usize,
}

impl Default for LimitsDocument {
    fn default() -> Self {
        LimitsDocument {
            max_depth: DEFAULT_MAX_DEPTH,
            max_headers: DEFAULT_MAX_HEADERS,
        }
    }
}

impl TryFrom<LimitsDocument> for TreeLimits {
    type Error = FacetError;

    fn try_from(doc: LimitsDocument) -> Result<Self, Self::Error> {
        TreeLimits::new(doc.max_depth, doc.max_headers)
    }
}

impl Default for TreeLimits {
    fn default() -> Self {
        TreeLimits {
            max_depth: DEFAULT_MAX_DEPTH,
            max_headers: DEFAULT_MAX_HEADERS,
        }
    }
}

impl TreeLimits {
    pub fn new(max_depth: usize, max_headers: usize) -> Result<Self, FacetError> {
        if max_depth < MIN_MAX_DEPTH {
            return Err(FacetError::InvalidLimits(format!(
                "max_depth must be at least {}, got {}",
                MIN_MAX_DEPTH, max_depth
            )));
        }
        if max_headers == 0 {
            return Err(FacetError::InvalidLimits(
                "max_headers must be greater than zero".to_string(),
            ));
        }
        Ok(TreeLimits { max_depth, max_headers })
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn max_headers(&self) -> usize {
        self.max_headers
    }

    /// Levels kept above the collapsed marker of an over-deep path.
    pub fn head_levels(&self) -> usize {
        (self.max_depth - 1) / 2
    }

    /// Levels kept below the collapsed marker of an over-deep path.
    pub fn tail_levels(&self) -> usize {
        self.max_depth - 1 - self.head_levels()
    }
}

// ============================================================================
// SOURCE SCHEMA
// ============================================================================

/// Names of the record relation and its soft-deletion column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSchema {
    pub table: String,
    pub deleted_column: String,
}

impl Default for SourceSchema {
    fn default() -> Self {
        SourceSchema {
            table: "cards".to_string(),
            deleted_column: "deleted_at".to_string(),
        }
    }
}

// ============================================================================
// AXIS LAYOUT
// ============================================================================

/// Which planes feed the row header tree and which feed the column header
/// tree, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisLayout {
    pub rows: Vec<Plane>,
    pub columns: Vec<Plane>,
}

impl Default for AxisLayout {
    fn default() -> Self {
        AxisLayout {
            rows: vec![Plane::Z, Plane::Y],
            columns: vec![Plane::X],
        }
    }
}

impl AxisLayout {
    pub fn validate(&self) -> Result<(), FacetError> {
        let mut seen = Vec::new();
        for plane in self.rows.iter().chain(self.columns.iter()) {
            if seen.contains(plane) {
                return Err(FacetError::InvalidConfig(format!(
                    "plane {} appears more than once in the axis layout",
                    plane
                )));
            }
            seen.push(*plane);
        }
        Ok(())
    }
}

// ============================================================================
// ENGINE SETTINGS
// ============================================================================

/// A user-supplied vocabulary pattern for LATCH inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatchPattern {
    pub dimension: LatchDimension,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub limits: TreeLimits,

    /// Ask the renderer for a non-committal preview when a drag starts.
    pub preview_enabled: bool,

    pub unassigned_label: String,

    pub schema: SourceSchema,

    pub axis_layout: AxisLayout,

    /// Regex vocabulary replacing the built-in keyword inference when set.
    pub latch_patterns: Vec<LatchPattern>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            limits: TreeLimits::default(),
            preview_enabled: true,
            unassigned_label: DEFAULT_UNASSIGNED_LABEL.to_string(),
            schema: SourceSchema::default(),
            axis_layout: AxisLayout::default(),
            latch_patterns: Vec::new(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), FacetError> {
        self.axis_layout.validate()?;
        if self.schema.table.trim().is_empty() {
            return Err(FacetError::InvalidConfig("schema table must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, FacetError> {
        let settings: EngineSettings = serde_json::from_str(json)
            .map_err(|e| FacetError::InvalidConfig(format!("settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }
}
