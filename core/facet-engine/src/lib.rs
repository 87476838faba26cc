//! FILENAME: core/facet-engine/src/lib.rs
//! Facet grid subsystem.
//!
//! This crate pivots a flat record set into a grid whose row and column
//! headers come from facets the user drags onto spatial planes. It has no
//! knowledge of the storage engine or the renderer: queries go out as SQL plus
//! a grouping plan, grouped rows come back through `GroupingSource`, and
//! rendering instructions leave as `RemapEffect`s.
//!
//! Layers:
//! - `definition`: Serializable configuration (facets, planes, mappings)
//! - `query`: Facet Query Compiler (WHAT to group by)
//! - `source`: Grouped rows and the in-memory source (HOW rows are fetched)
//! - `header`: Header Tree Builder (WHAT we display)
//! - `remap`: Axis Remap Engine (HOW the mapping changes)

pub mod bucket;
pub mod definition;
pub mod error;
pub mod header;
pub mod latch;
pub mod query;
pub mod remap;
pub mod settings;
pub mod source;

pub use definition::*;
pub use error::{FacetError, RemapError, SourceError};
pub use header::{CompositeKey, HeaderAxis, HeaderLeaf, HeaderNode, HeaderTree, HeaderTreeBuilder};
pub use latch::{DimensionInference, KeywordInference, PatternInference};
pub use query::{
    AggregateOp, AggregateSpec, CompiledQuery, FacetQueryCompiler, QueryOrder, QueryParam,
    StackOptions,
};
pub use remap::{
    AxisRemapEngine, DragState, DropOutcome, DropTarget, GridSnapshot, Point, Rect,
    ReflowRequest, ReflowResult, ReflowRows, RemapEffect, RemapPhase, SlotGeometry,
};
pub use settings::{EngineSettings, TreeLimits};
pub use source::{GroupedRow, GroupingSource, MemorySource, Record};
