//! FILENAME: app/src/config.rs
// PURPOSE: Loads the grid configuration document.
// CONTEXT: { "settings": {...}, "facets": [...], "mapping": { "x": "<facet id>", ... } }

use std::path::Path;

use facet_engine::{
    AxisMapping, AxisRemapEngine, EngineSettings, FacetCatalog, FacetConfig, FacetError, Plane,
};
use serde::{Deserialize, Serialize};

/// Initial plane assignment by facet id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub z: Option<String>,
}

impl MappingConfig {
    fn get(&self, plane: Plane) -> Option<&str> {
        match plane {
            Plane::X => self.x.as_deref(),
            Plane::Y => self.y.as_deref(),
            Plane::Z => self.z.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default)]
    pub settings: EngineSettings,
    pub facets: Vec<FacetConfig>,
    #[serde(default)]
    pub mapping: MappingConfig,
}

impl GridConfig {
    pub fn from_json(json: &str) -> Result<Self, FacetError> {
        let config: GridConfig = serde_json::from_str(json)
            .map_err(|e| FacetError::InvalidConfig(format!("config: {}", e)))?;
        config.settings.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, FacetError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| FacetError::InvalidConfig(format!("reading {:?}: {}", path, e)))?;
        GridConfig::from_json(&json)
    }

    pub fn catalog(&self) -> Result<FacetCatalog, FacetError> {
        FacetCatalog::new(self.facets.clone())
    }

    /// Resolves the facet ids of `mapping` against the catalog.
    pub fn axis_mapping(&self, catalog: &FacetCatalog) -> Result<AxisMapping, FacetError> {
        let mut mapping = AxisMapping::new();
        for plane in Plane::ALL {
            if let Some(id) = self.mapping.get(plane) {
                let facet = catalog.get(id).cloned().ok_or_else(|| {
                    FacetError::InvalidConfig(format!("mapping {} names unknown facet '{}'", plane, id))
                })?;
                mapping.set(plane, Some(facet));
            }
        }
        mapping.validate()?;
        Ok(mapping)
    }

    pub fn into_engine(self) -> Result<AxisRemapEngine, FacetError> {
        let catalog = self.catalog()?;
        let mapping = self.axis_mapping(&catalog)?;
        AxisRemapEngine::new(catalog, mapping, self.settings)
    }
}
