//! FILENAME: core/facet-engine/src/definition.rs
//! Facet Definition - The serializable descriptors.
//!
//! This module contains the types needed to DESCRIBE a facet grid.
//! These structures are designed to be:
//! - Serializable (loaded from configuration, handed to the renderer)
//! - Read-only to the engine (facets are supplied externally)
//! - Cheap to compare (an AxisMapping is compared byte-for-byte on swaps)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FacetError;

/// Unique key of a facet.
pub type FacetId = String;

// ============================================================================
// LATCH DIMENSION
// ============================================================================

/// Coarse semantic bucket a facet belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatchDimension {
    Location,
    Alphabet,
    Time,
    #[default]
    Category,
    Hierarchy,
}

impl LatchDimension {
    pub const ALL: [LatchDimension; 5] = [
        LatchDimension::Location,
        LatchDimension::Alphabet,
        LatchDimension::Time,
        LatchDimension::Category,
        LatchDimension::Hierarchy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LatchDimension::Location => "location",
            LatchDimension::Alphabet => "alphabet",
            LatchDimension::Time => "time",
            LatchDimension::Category => "category",
            LatchDimension::Hierarchy => "hierarchy",
        }
    }
}

// ============================================================================
// DATA TYPES
// ============================================================================

/// Declared semantics of a facet's source column.
///
/// Unknown type names are kept as `Unsupported` so that a bad configuration
/// surfaces as a `FacetError` at compile time instead of a parse failure of
/// the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Text,
    Select,
    Number,
    Date,
    MultiSelect,
    Unsupported(String),
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => DataType::Text,
            "select" => DataType::Select,
            "number" => DataType::Number,
            "date" => DataType::Date,
            "multi_select" => DataType::MultiSelect,
            _ => DataType::Unsupported(value),
        }
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Text => f.write_str("text"),
            DataType::Select => f.write_str("select"),
            DataType::Number => f.write_str("number"),
            DataType::Date => f.write_str("date"),
            DataType::MultiSelect => f.write_str("multi_select"),
            DataType::Unsupported(name) => f.write_str(name),
        }
    }
}

/// Bucket granularity for date facets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFormat {
    #[serde(alias = "%Y")]
    Year,
    #[serde(alias = "Q")]
    Quarter,
    #[serde(alias = "%Y-%m")]
    Month,
    #[serde(alias = "%B")]
    MonthName,
    #[serde(alias = "%Y-W%W")]
    Week,
    #[serde(alias = "%Y-%m-%d")]
    Day,
}

// ============================================================================
// FACET CONFIG
// ============================================================================

/// Immutable descriptor of one groupable attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FacetConfig {
    pub id: FacetId,

    /// Display name.
    pub name: String,

    /// Explicit LATCH bucket. When absent it is inferred on first assignment.
    #[serde(default)]
    pub latch_dimension: Option<LatchDimension>,

    /// Name of the underlying record field. Empty means the facet is vacuous.
    #[serde(default)]
    pub source_column: String,

    pub data_type: DataType,

    /// Required iff `data_type` is `Date`.
    #[serde(default)]
    pub time_format: Option<TimeFormat>,

    #[serde(default)]
    pub sort_order: i32,
}

impl FacetConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_column: impl Into<String>,
        data_type: DataType,
    ) -> Self {
        FacetConfig {
            id: id.into(),
            name: name.into(),
            latch_dimension: None,
            source_column: source_column.into(),
            data_type,
            time_format: None,
            sort_order: 0,
        }
    }

    pub fn date(
        id: impl Into<String>,
        name: impl Into<String>,
        source_column: impl Into<String>,
        time_format: TimeFormat,
    ) -> Self {
        let mut facet = FacetConfig::new(id, name, source_column, DataType::Date);
        facet.time_format = Some(time_format);
        facet
    }

    pub fn with_latch(mut self, dimension: LatchDimension) -> Self {
        self.latch_dimension = Some(dimension);
        self
    }

    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// A facet without a source column always groups to zero rows.
    pub fn is_vacuous(&self) -> bool {
        self.source_column.trim().is_empty()
    }

    pub fn validate(&self) -> Result<(), FacetError> {
        match &self.data_type {
            DataType::Date if self.time_format.is_none() => Err(FacetError::MissingTimeFormat {
                facet_id: self.id.clone(),
            }),
            DataType::Unsupported(name) => Err(FacetError::UnsupportedDataType {
                facet_id: self.id.clone(),
                data_type: name.clone(),
            }),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// PLANES AND MAPPING
// ============================================================================

/// A spatial slot a facet can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plane {
    X,
    Y,
    Z,
}

impl Plane {
    pub const ALL: [Plane; 3] = [Plane::X, Plane::Y, Plane::Z];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plane::X => "x",
            Plane::Y => "y",
            Plane::Z => "z",
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which facet occupies which plane. At most one facet per plane and a
/// facet never sits on two planes at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisMapping {
    #[serde(default)]
    pub x: Option<FacetConfig>,
    #[serde(default)]
    pub y: Option<FacetConfig>,
    #[serde(default)]
    pub z: Option<FacetConfig>,
}

impl AxisMapping {
    pub fn new() -> Self {
        AxisMapping::default()
    }

    pub fn get(&self, plane: Plane) -> Option<&FacetConfig> {
        match plane {
            Plane::X => self.x.as_ref(),
            Plane::Y => self.y.as_ref(),
            Plane::Z => self.z.as_ref(),
        }
    }

    /// Replaces the occupant of `plane`, returning the previous one.
    pub fn set(&mut self, plane: Plane, facet: Option<FacetConfig>) -> Option<FacetConfig> {
        let slot = match plane {
            Plane::X => &mut self.x,
            Plane::Y => &mut self.y,
            Plane::Z => &mut self.z,
        };
        std::mem::replace(slot, facet)
    }

    pub fn plane_of(&self, facet_id: &str) -> Option<Plane> {
        Plane::ALL
            .into_iter()
            .find(|&plane| self.get(plane).map_or(false, |f| f.id == facet_id))
    }

    pub fn assigned(&self) -> impl Iterator<Item = (Plane, &FacetConfig)> {
        Plane::ALL
            .into_iter()
            .filter_map(move |plane| self.get(plane).map(|f| (plane, f)))
    }

    /// Facets on the given planes, in the order the planes are listed.
    pub fn facets_on(&self, planes: &[Plane]) -> Vec<FacetConfig> {
        planes
            .iter()
            .filter_map(|&plane| self.get(plane).cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned().next().is_none()
    }

    /// Places `facet` on `target` with swap semantics: if the facet already
    /// sits on another plane, whatever occupied `target` moves into that
    /// vacated plane. A facet coming from the pool simply displaces the
    /// occupant back to the pool.
    pub fn with_facet_at(&self, facet: FacetConfig, target: Plane) -> AxisMapping {
        let mut next = self.clone();
        let source = self.plane_of(&facet.id);
        if source == Some(target) {
            return next;
        }
        if let Some(source) = source {
            next.set(source, None);
        }
        let displaced = next.set(target, Some(facet));
        if let Some(source) = source {
            next.set(source, displaced);
        }
        next
    }

    /// Removes the facet from whatever plane it occupies.
    pub fn without_facet(&self, facet_id: &str) -> AxisMapping {
        let mut next = self.clone();
        if let Some(plane) = self.plane_of(facet_id) {
            next.set(plane, None);
        }
        next
    }

    /// Rejects mappings that place one facet on two planes.
    pub fn validate(&self) -> Result<(), FacetError> {
        let assigned: Vec<(Plane, &FacetConfig)> = self.assigned().collect();
        for (i, (plane, facet)) in assigned.iter().enumerate() {
            if let Some((other, _)) = assigned[i + 1..].iter().find(|(_, f)| f.id == facet.id) {
                return Err(FacetError::InvalidConfig(format!(
                    "facet '{}' is assigned to both {} and {}",
                    facet.id, plane, other
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// CATALOG
// ============================================================================

/// Every facet known to the grid, ordered by `sort_order`. Facets not on any
/// plane form the available pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FacetCatalog {
    facets: Vec<FacetConfig>,
}

impl FacetCatalog {
    pub fn new(mut facets: Vec<FacetConfig>) -> Result<Self, FacetError> {
        facets.sort_by_key(|f| f.sort_order);
        for (i, facet) in facets.iter().enumerate() {
            if facet.id.is_empty() {
                return Err(FacetError::InvalidConfig("facet with empty id".to_string()));
            }
            if facets[..i].iter().any(|f| f.id == facet.id) {
                return Err(FacetError::InvalidConfig(format!(
                    "duplicate facet id '{}'",
                    facet.id
                )));
            }
        }
        Ok(FacetCatalog { facets })
    }

    pub fn get(&self, facet_id: &str) -> Option<&FacetConfig> {
        self.facets.iter().find(|f| f.id == facet_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FacetConfig> {
        self.facets.iter()
    }

    pub fn len(&self) -> usize {
        self.facets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facets.is_empty()
    }

    /// Facets not currently assigned to any plane.
    pub fn available<'a>(&'a self, mapping: &'a AxisMapping) -> impl Iterator<Item = &'a FacetConfig> {
        self.facets
            .iter()
            .filter(move |f| mapping.plane_of(&f.id).is_none())
    }
}
