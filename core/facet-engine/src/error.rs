//! FILENAME: core/facet-engine/src/error.rs

use thiserror::Error;

use crate::definition::Plane;

/// Malformed facet or engine configuration. These indicate a caller bug and
/// are never recovered inside the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FacetError {
    #[error("Facet '{facet_id}' is a date facet without a time format")]
    MissingTimeFormat { facet_id: String },

    #[error("Facet '{facet_id}' has unsupported data type '{data_type}'")]
    UnsupportedDataType { facet_id: String, data_type: String },

    #[error("Invalid limits: {0}")]
    InvalidLimits(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure while executing a compiled query against a record source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("Query returned {actual} value columns, expected {expected}")]
    ColumnMismatch { expected: usize, actual: usize },

    #[error("Reflow aborted: {0}")]
    Aborted(String),
}

/// Rejected gestures and illegal state transitions of the remap engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemapError {
    #[error("A drag of facet '{facet_id}' is already in progress")]
    DragAlreadyActive { facet_id: String },

    #[error("No drag in progress")]
    NotDragging,

    #[error("A reflow is in progress")]
    ReflowInProgress,

    #[error("No reflow is pending")]
    NoPendingReflow,

    #[error("Reflow ticket {actual} does not match pending ticket {expected}")]
    StaleReflow { expected: u64, actual: u64 },

    #[error("Unknown facet '{0}'")]
    UnknownFacet(String),

    #[error("Facet '{facet_id}' occupies {actual:?}, drag claimed {claimed:?}")]
    SourceMismatch {
        facet_id: String,
        claimed: Option<Plane>,
        actual: Option<Plane>,
    },

    #[error(transparent)]
    Config(#[from] FacetError),
}
