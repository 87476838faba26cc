//! FILENAME: core/facet-engine/src/remap.rs
//! Axis Remap Engine - Drag-and-drop reassignment of facets to planes.
//!
//! State machine:
//!
//! ```text
//! Idle --start_drag--> Dragging --handle_drop--> Reflowing --complete_reflow--> Idle
//!                         |                          |
//!                         +--cancel_drag / miss--> Idle   (commit or rollback)
//! ```
//!
//! The published `GridSnapshot` (mapping plus both header trees) is only ever
//! replaced as a whole. A failed reflow leaves the previous snapshot in place,
//! so observers never see a new mapping paired with stale trees.
//!
//! Rendering concerns (ghost, preview, highlight) are emitted as `RemapEffect`s
//! which the host drains with `take_effects`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::{AxisMapping, FacetCatalog, FacetConfig, FacetId, Plane};
use crate::error::{FacetError, RemapError, SourceError};
use crate::header::{HeaderAxis, HeaderTree, HeaderTreeBuilder};
use crate::latch::{inference_for, DimensionInference};
use crate::query::{CompiledQuery, FacetQueryCompiler, QueryOrder, StackOptions};
use crate::settings::EngineSettings;
use crate::source::{GroupedRow, GroupingSource};

// ============================================================================
// GEOMETRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Rect { x, y, width, height }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    fn distance_sq(&self, point: Point) -> f64 {
        let c = self.center();
        (c.x - point.x).powi(2) + (c.y - point.y).powi(2)
    }
}

/// Where a dragged facet can land. The pool is the list of unassigned
/// facets; dropping an assigned facet there clears its plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "plane")]
pub enum DropTarget {
    Slot(Plane),
    Pool,
}

/// Screen rectangle of one drop target, supplied by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotGeometry {
    pub target: DropTarget,
    pub rect: Rect,
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DragState {
    pub facet_id: FacetId,
    /// Plane the facet was dragged from; `None` when it came from the pool.
    pub source: Option<Plane>,
    /// Pointer position when the drag started.
    pub start_position: Point,
    /// Latest pointer position.
    pub pointer: Point,
    pub started_at: DateTime<Utc>,
    /// The single highlighted drop candidate, if any.
    pub candidate: Option<DropTarget>,
}

/// What started a reflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ReflowCause {
    Drop { facet_id: FacetId },
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingReflow {
    pub ticket: u64,
    pub mapping: AxisMapping,
    pub cause: ReflowCause,
    row_columns: usize,
    column_columns: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum RemapState {
    Idle,
    Dragging(DragState),
    Reflowing(PendingReflow),
}

/// Payload-free view of the engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemapPhase {
    Idle,
    Dragging,
    Reflowing,
}

/// The consistent unit observers see: a mapping and the trees built for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridSnapshot {
    /// Bumped on every commit. Rollbacks keep the version.
    pub version: u64,
    pub mapping: AxisMapping,
    pub row_tree: HeaderTree,
    pub column_tree: HeaderTree,
}

impl GridSnapshot {
    fn initial(mapping: AxisMapping) -> Self {
        GridSnapshot {
            version: 0,
            mapping,
            row_tree: HeaderTree::empty(HeaderAxis::Row),
            column_tree: HeaderTree::empty(HeaderAxis::Column),
        }
    }

    /// True when neither axis produced any header.
    pub fn is_empty(&self) -> bool {
        self.row_tree.is_empty() && self.column_tree.is_empty()
    }
}

// ============================================================================
// REQUESTS, RESULTS, EFFECTS
// ============================================================================

/// The queries a host must run to finish a reflow.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflowRequest {
    pub ticket: u64,
    pub mapping: AxisMapping,
    pub row_query: CompiledQuery,
    pub column_query: CompiledQuery,
}

/// Grouped rows for both axes, each in display order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReflowRows {
    pub rows: Vec<GroupedRow>,
    pub columns: Vec<GroupedRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropOutcome {
    /// No target under the pointer; the drag was discarded.
    Cancelled,
    /// The drop would not change the mapping.
    Unchanged,
    Reflow(ReflowRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReflowResult {
    Committed(Arc<GridSnapshot>),
    /// The previous snapshot was republished unchanged.
    RolledBack {
        snapshot: Arc<GridSnapshot>,
        error: SourceError,
    },
}

/// A candidate outcome shown during preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewOutcome {
    pub target: DropTarget,
    pub mapping: AxisMapping,
}

/// Instructions for the rendering collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemapEffect {
    GhostShown {
        facet_id: FacetId,
        source: Option<Plane>,
        at: Point,
    },
    PreviewStarted {
        facet_id: FacetId,
        outcomes: Vec<PreviewOutcome>,
    },
    TargetHighlighted {
        target: Option<DropTarget>,
    },
    PreviewCleared,
    ReflowStarted {
        ticket: u64,
    },
    Published {
        version: u64,
    },
    RolledBack {
        version: u64,
        message: String,
    },
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct AxisRemapEngine {
    catalog: FacetCatalog,
    settings: EngineSettings,
    compiler: FacetQueryCompiler,
    inference: Box<dyn DimensionInference>,
    slots: Vec<SlotGeometry>,
    state: RemapState,
    published: Arc<GridSnapshot>,
    next_ticket: u64,
    effects: Vec<RemapEffect>,
}

impl AxisRemapEngine {
    /// Creates an idle engine publishing `mapping` with empty trees. Call
    /// `refresh` to populate the trees.
    pub fn new(
        catalog: FacetCatalog,
        mapping: AxisMapping,
        settings: EngineSettings,
    ) -> Result<Self, FacetError> {
        settings.validate()?;
        mapping.validate()?;
        for (plane, facet) in mapping.assigned() {
            if catalog.get(&facet.id).is_none() {
                return Err(FacetError::InvalidConfig(format!(
                    "facet '{}' on plane {} is not in the catalog",
                    facet.id, plane
                )));
            }
        }
        let inference = inference_for(&settings.latch_patterns)?;
        Ok(AxisRemapEngine {
            catalog,
            compiler: FacetQueryCompiler::from_settings(&settings),
            settings,
            inference,
            slots: Vec::new(),
            state: RemapState::Idle,
            published: Arc::new(GridSnapshot::initial(mapping)),
            next_ticket: 1,
            effects: Vec::new(),
        })
    }

    pub fn with_inference(mut self, inference: Box<dyn DimensionInference>) -> Self {
        self.inference = inference;
        self
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    pub fn snapshot(&self) -> Arc<GridSnapshot> {
        Arc::clone(&self.published)
    }

    pub fn mapping(&self) -> &AxisMapping {
        &self.published.mapping
    }

    pub fn catalog(&self) -> &FacetCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Unassigned facets, in catalog order.
    pub fn available(&self) -> Vec<&FacetConfig> {
        self.catalog.available(&self.published.mapping).collect()
    }

    pub fn phase(&self) -> RemapPhase {
        match self.state {
            RemapState::Idle => RemapPhase::Idle,
            RemapState::Dragging(_) => RemapPhase::Dragging,
            RemapState::Reflowing(_) => RemapPhase::Reflowing,
        }
    }

    pub fn drag_state(&self) -> Option<&DragState> {
        match &self.state {
            RemapState::Dragging(drag) => Some(drag),
            _ => None,
        }
    }

    pub fn pending_reflow(&self) -> Option<&PendingReflow> {
        match &self.state {
            RemapState::Reflowing(pending) => Some(pending),
            _ => None,
        }
    }

    pub fn take_effects(&mut self) -> Vec<RemapEffect> {
        std::mem::take(&mut self.effects)
    }

    // ------------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------------

    pub fn set_slot_geometry(&mut self, slots: Vec<SlotGeometry>) {
        self.slots = slots;
    }

    /// The target under `point`. When rectangles overlap, the one whose
    /// center is nearest wins.
    pub fn hit_test(&self, point: Point) -> Option<DropTarget> {
        self.slots
            .iter()
            .filter(|slot| slot.rect.contains(point))
            .min_by(|a, b| a.rect.distance_sq(point).total_cmp(&b.rect.distance_sq(point)))
            .map(|slot| slot.target)
    }

    // ------------------------------------------------------------------------
    // Gestures
    // ------------------------------------------------------------------------

    /// Starts dragging `facet_id` from `source` with the pointer at `at`.
    pub fn start_drag(&mut self, facet_id: &str, source: Option<Plane>, at: Point) -> Result<(), RemapError> {
        match &self.state {
            RemapState::Idle => {}
            RemapState::Dragging(drag) => {
                return Err(RemapError::DragAlreadyActive { facet_id: drag.facet_id.clone() })
            }
            RemapState::Reflowing(_) => return Err(RemapError::ReflowInProgress),
        }
        if self.catalog.get(facet_id).is_none() {
            return Err(RemapError::UnknownFacet(facet_id.to_string()));
        }
        let actual = self.published.mapping.plane_of(facet_id);
        if actual != source {
            return Err(RemapError::SourceMismatch {
                facet_id: facet_id.to_string(),
                claimed: source,
                actual,
            });
        }

        log::info!(target: "REMAP", "drag started: '{}' from {:?} at ({}, {})", facet_id, source, at.x, at.y);
        self.effects.push(RemapEffect::GhostShown {
            facet_id: facet_id.to_string(),
            source,
            at,
        });
        if self.settings.preview_enabled {
            let outcomes = self.preview_outcomes(facet_id, source);
            self.effects.push(RemapEffect::PreviewStarted {
                facet_id: facet_id.to_string(),
                outcomes,
            });
        }
        self.state = RemapState::Dragging(DragState {
            facet_id: facet_id.to_string(),
            source,
            start_position: at,
            pointer: at,
            started_at: Utc::now(),
            candidate: None,
        });
        Ok(())
    }

    /// Updates the live drop candidate. Returns the candidate under the
    /// pointer.
    pub fn pointer_move(&mut self, point: Point) -> Result<Option<DropTarget>, RemapError> {
        let candidate = self.hit_test(point);
        let drag = match &mut self.state {
            RemapState::Dragging(drag) => drag,
            _ => return Err(RemapError::NotDragging),
        };
        drag.pointer = point;
        if drag.candidate != candidate {
            drag.candidate = candidate;
            self.effects.push(RemapEffect::TargetHighlighted { target: candidate });
        }
        Ok(candidate)
    }

    /// Drops at a screen position. Missing every target cancels the drag.
    pub fn drop_at(&mut self, point: Point) -> Result<DropOutcome, RemapError> {
        if !matches!(self.state, RemapState::Dragging(_)) {
            return Err(self.not_dragging_error());
        }
        match self.hit_test(point) {
            Some(target) => self.handle_drop(target),
            None => {
                self.cancel_drag()?;
                Ok(DropOutcome::Cancelled)
            }
        }
    }

    /// Drops the dragged facet on `target` with swap semantics. On a mapping
    /// change the engine enters `Reflowing` and returns the queries to run;
    /// the published snapshot is untouched until `complete_reflow`.
    pub fn handle_drop(&mut self, target: DropTarget) -> Result<DropOutcome, RemapError> {
        let drag = match std::mem::replace(&mut self.state, RemapState::Idle) {
            RemapState::Dragging(drag) => drag,
            other => {
                self.state = other;
                return Err(self.not_dragging_error());
            }
        };
        self.effects.push(RemapEffect::PreviewCleared);

        let current = &self.published.mapping;
        let candidate = match target {
            DropTarget::Slot(plane) if drag.source == Some(plane) => None,
            DropTarget::Slot(plane) => {
                let facet = self.placed_facet(&drag.facet_id)?;
                Some(current.with_facet_at(facet, plane))
            }
            DropTarget::Pool => drag.source.map(|_| current.without_facet(&drag.facet_id)),
        };
        let mapping = match candidate {
            Some(mapping) if &mapping != current => mapping,
            _ => {
                log::debug!(target: "REMAP", "drop of '{}' on {:?} leaves mapping unchanged", drag.facet_id, target);
                return Ok(DropOutcome::Unchanged);
            }
        };

        log::info!(target: "REMAP", "dropped '{}' on {:?}", drag.facet_id, target);
        let request = self.begin_reflow(mapping, ReflowCause::Drop { facet_id: drag.facet_id })?;
        Ok(DropOutcome::Reflow(request))
    }

    /// Discards the drag and any preview. Not allowed once a reflow started.
    pub fn cancel_drag(&mut self) -> Result<(), RemapError> {
        match &self.state {
            RemapState::Dragging(drag) => {
                log::info!(target: "REMAP", "drag of '{}' cancelled", drag.facet_id);
                self.state = RemapState::Idle;
                self.effects.push(RemapEffect::PreviewCleared);
                Ok(())
            }
            _ => Err(self.not_dragging_error()),
        }
    }

    // ------------------------------------------------------------------------
    // Reflow
    // ------------------------------------------------------------------------

    /// Re-queries the current mapping, for use after the records changed.
    pub fn refresh(&mut self) -> Result<ReflowRequest, RemapError> {
        match &self.state {
            RemapState::Idle => {}
            RemapState::Dragging(drag) => {
                return Err(RemapError::DragAlreadyActive { facet_id: drag.facet_id.clone() })
            }
            RemapState::Reflowing(_) => return Err(RemapError::ReflowInProgress),
        }
        let mapping = self.published.mapping.clone();
        self.begin_reflow(mapping, ReflowCause::Refresh)
    }

    /// Finishes the pending reflow with the rows the host fetched, or with
    /// the error it hit. Errors roll back to the previous snapshot.
    pub fn complete_reflow(
        &mut self,
        ticket: u64,
        result: Result<ReflowRows, SourceError>,
    ) -> Result<ReflowResult, RemapError> {
        let expected = match &self.state {
            RemapState::Reflowing(pending) => pending.ticket,
            _ => return Err(RemapError::NoPendingReflow),
        };
        if expected != ticket {
            return Err(RemapError::StaleReflow { expected, actual: ticket });
        }
        let pending = match std::mem::replace(&mut self.state, RemapState::Idle) {
            RemapState::Reflowing(pending) => pending,
            _ => return Err(RemapError::NoPendingReflow),
        };

        let outcome = result.and_then(|rows| {
            check_arity(&rows.rows, pending.row_columns)?;
            check_arity(&rows.columns, pending.column_columns)?;
            Ok(rows)
        });
        match outcome {
            Ok(rows) => Ok(ReflowResult::Committed(self.commit(pending, rows))),
            Err(error) => Ok(self.rollback(pending, error)),
        }
    }

    /// Gives up on a stuck reflow. Takes the rollback path.
    pub fn abort_reflow(&mut self, reason: &str) -> Result<ReflowResult, RemapError> {
        let ticket = match &self.state {
            RemapState::Reflowing(pending) => pending.ticket,
            _ => return Err(RemapError::NoPendingReflow),
        };
        self.complete_reflow(ticket, Err(SourceError::Aborted(reason.to_string())))
    }

    /// Runs both queries of `request` against `source` and completes the
    /// reflow.
    pub fn run_reflow(
        &mut self,
        request: &ReflowRequest,
        source: &mut dyn GroupingSource,
    ) -> Result<ReflowResult, RemapError> {
        let rows = source.execute(&request.row_query).and_then(|rows| {
            let columns = source.execute(&request.column_query)?;
            Ok(ReflowRows { rows, columns })
        });
        self.complete_reflow(request.ticket, rows)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn not_dragging_error(&self) -> RemapError {
        match self.state {
            RemapState::Reflowing(_) => RemapError::ReflowInProgress,
            _ => RemapError::NotDragging,
        }
    }

    /// The facet as it will be placed: its current configuration if it is
    /// assigned, otherwise the catalog entry with an inferred dimension.
    fn placed_facet(&self, facet_id: &str) -> Result<FacetConfig, RemapError> {
        if let Some(plane) = self.published.mapping.plane_of(facet_id) {
            if let Some(facet) = self.published.mapping.get(plane) {
                return Ok(facet.clone());
            }
        }
        let mut facet = self
            .catalog
            .get(facet_id)
            .cloned()
            .ok_or_else(|| RemapError::UnknownFacet(facet_id.to_string()))?;
        if facet.latch_dimension.is_none() {
            let dimension = self.inference.infer(&facet);
            log::debug!(target: "REMAP", "inferred {} for '{}'", dimension.as_str(), facet.id);
            facet.latch_dimension = Some(dimension);
        }
        Ok(facet)
    }

    fn preview_outcomes(&self, facet_id: &str, source: Option<Plane>) -> Vec<PreviewOutcome> {
        let current = &self.published.mapping;
        let mut outcomes = Vec::new();
        if let Ok(facet) = self.placed_facet(facet_id) {
            for plane in Plane::ALL {
                if Some(plane) != source {
                    outcomes.push(PreviewOutcome {
                        target: DropTarget::Slot(plane),
                        mapping: current.with_facet_at(facet.clone(), plane),
                    });
                }
            }
        }
        if source.is_some() {
            outcomes.push(PreviewOutcome {
                target: DropTarget::Pool,
                mapping: current.without_facet(facet_id),
            });
        }
        outcomes
    }

    fn compile_axis(&self, mapping: &AxisMapping, planes: &[Plane]) -> Result<CompiledQuery, FacetError> {
        let facets = mapping.facets_on(planes);
        let options = StackOptions {
            order: QueryOrder::FacetValues,
            aggregates: Vec::new(),
        };
        self.compiler.compile_stacked(&facets, &options)
    }

    /// Compiles both axis queries and enters `Reflowing`. A compile error
    /// leaves the engine idle with the snapshot untouched.
    fn begin_reflow(&mut self, mapping: AxisMapping, cause: ReflowCause) -> Result<ReflowRequest, RemapError> {
        let layout = &self.settings.axis_layout;
        let row_query = self.compile_axis(&mapping, &layout.rows)?;
        let column_query = self.compile_axis(&mapping, &layout.columns)?;

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        log::info!(target: "REMAP", "reflow {} started ({:?})", ticket, cause);

        self.state = RemapState::Reflowing(PendingReflow {
            ticket,
            mapping: mapping.clone(),
            cause,
            row_columns: row_query.value_columns(),
            column_columns: column_query.value_columns(),
        });
        self.effects.push(RemapEffect::ReflowStarted { ticket });
        Ok(ReflowRequest {
            ticket,
            mapping,
            row_query,
            column_query,
        })
    }

    fn commit(&mut self, pending: PendingReflow, rows: ReflowRows) -> Arc<GridSnapshot> {
        let limits = self.settings.limits;
        let snapshot = Arc::new(GridSnapshot {
            version: self.published.version + 1,
            mapping: pending.mapping,
            row_tree: HeaderTreeBuilder::new(HeaderAxis::Row, limits).build_rows(&rows.rows),
            column_tree: HeaderTreeBuilder::new(HeaderAxis::Column, limits).build_rows(&rows.columns),
        });
        log::info!(
            target: "REMAP",
            "reflow {} committed as version {} ({} x {} leaves)",
            pending.ticket,
            snapshot.version,
            snapshot.row_tree.leaf_count,
            snapshot.column_tree.leaf_count
        );
        self.published = Arc::clone(&snapshot);
        self.effects.push(RemapEffect::Published { version: snapshot.version });
        snapshot
    }

    fn rollback(&mut self, pending: PendingReflow, error: SourceError) -> ReflowResult {
        log::warn!(
            target: "REMAP",
            "reflow {} failed, keeping version {}: {}",
            pending.ticket,
            self.published.version,
            error
        );
        self.effects.push(RemapEffect::RolledBack {
            version: self.published.version,
            message: error.to_string(),
        });
        ReflowResult::RolledBack {
            snapshot: Arc::clone(&self.published),
            error,
        }
    }
}

fn check_arity(rows: &[GroupedRow], expected: usize) -> Result<(), SourceError> {
    match rows.iter().find(|r| r.values.len() != expected) {
        Some(row) => Err(SourceError::ColumnMismatch {
            expected,
            actual: row.values.len(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DataType, LatchDimension, TimeFormat};
    use crate::query::CompiledQuery;
    use crate::source::{MemorySource, Record};
    use serde_json::json;

    fn catalog() -> FacetCatalog {
        FacetCatalog::new(vec![
            FacetConfig::new("status", "Status", "status", DataType::Select).with_sort_order(1),
            FacetConfig::new("folder", "Folder", "folder", DataType::Text).with_sort_order(2),
            FacetConfig::date("created", "Created", "created_at", TimeFormat::Quarter).with_sort_order(3),
            FacetConfig::new("broken", "Broken", "due_at", DataType::Date).with_sort_order(4),
        ])
        .unwrap()
    }

    fn source() -> MemorySource {
        MemorySource::with_records(vec![
            Record::new("1")
                .with("status", json!("open"))
                .with("folder", json!("work"))
                .with("created_at", json!("2024-03-10")),
            Record::new("2")
                .with("status", json!("done"))
                .with("folder", json!("home"))
                .with("created_at", json!("2024-07-02")),
            Record::new("3")
                .with("status", json!("open"))
                .with("folder", json!("home"))
                .with("created_at", json!("2024-08-20")),
        ])
    }

    fn initial_mapping(catalog: &FacetCatalog) -> AxisMapping {
        let mut mapping = AxisMapping::new();
        mapping.set(Plane::X, catalog.get("status").cloned());
        mapping.set(Plane::Y, catalog.get("folder").cloned());
        mapping
    }

    /// An engine with status on X and folder on Y, already refreshed.
    fn engine(source: &mut MemorySource) -> AxisRemapEngine {
        let catalog = catalog();
        let mapping = initial_mapping(&catalog);
        let mut engine = AxisRemapEngine::new(catalog, mapping, EngineSettings::default()).unwrap();
        let request = engine.refresh().unwrap();
        engine.run_reflow(&request, source).unwrap();
        engine.take_effects();
        engine
    }

    fn origin() -> Point {
        Point::new(0.0, 0.0)
    }

    fn expect_reflow(outcome: DropOutcome) -> ReflowRequest {
        match outcome {
            DropOutcome::Reflow(request) => request,
            other => panic!("expected reflow, got {:?}", other),
        }
    }

    struct FailingSource;

    impl GroupingSource for FailingSource {
        fn execute(&mut self, _query: &CompiledQuery) -> Result<Vec<GroupedRow>, SourceError> {
            Err(SourceError::Execution("database is locked".to_string()))
        }
    }

    struct MalformedSource;

    impl GroupingSource for MalformedSource {
        fn execute(&mut self, _query: &CompiledQuery) -> Result<Vec<GroupedRow>, SourceError> {
            Ok(vec![GroupedRow::new(["a", "b", "c"], 1)])
        }
    }

    #[test]
    fn test_refresh_builds_both_trees() {
        let mut source = source();
        let engine = engine(&mut source);
        let snapshot = engine.snapshot();

        assert_eq!(snapshot.version, 1);
        let rows: Vec<&str> = snapshot.row_tree.roots.iter().map(|n| n.value.as_str()).collect();
        let cols: Vec<&str> = snapshot.column_tree.roots.iter().map(|n| n.value.as_str()).collect();
        assert_eq!(rows, vec!["home", "work"]);
        assert_eq!(cols, vec!["done", "open"]);
        assert_eq!(engine.phase(), RemapPhase::Idle);
    }

    #[test]
    fn test_drag_state_tracks_start_and_current_position() {
        let mut source = source();
        let mut engine = engine(&mut source);
        let before = Utc::now();
        engine.start_drag("status", Some(Plane::X), Point::new(12.0, 8.0)).unwrap();

        let drag = engine.drag_state().unwrap().clone();
        assert_eq!(drag.start_position, Point::new(12.0, 8.0));
        assert_eq!(drag.pointer, Point::new(12.0, 8.0));
        assert!(drag.started_at >= before && drag.started_at <= Utc::now());

        engine.pointer_move(Point::new(40.0, 90.0)).unwrap();
        let moved = engine.drag_state().unwrap();
        assert_eq!(moved.start_position, Point::new(12.0, 8.0));
        assert_eq!(moved.pointer, Point::new(40.0, 90.0));
        assert_eq!(moved.started_at, drag.started_at);
    }

    #[test]
    fn test_start_drag_emits_ghost_and_preview() {
        let mut source = source();
        let mut engine = engine(&mut source);
        engine.start_drag("status", Some(Plane::X), origin()).unwrap();

        let effects = engine.take_effects();
        assert!(matches!(effects[0], RemapEffect::GhostShown { .. }));
        match &effects[1] {
            RemapEffect::PreviewStarted { outcomes, .. } => {
                // Y, Z and the pool.
                assert_eq!(outcomes.len(), 3);
                assert_eq!(outcomes[2].target, DropTarget::Pool);
            }
            other => panic!("expected preview, got {:?}", other),
        }
        assert_eq!(engine.phase(), RemapPhase::Dragging);
        assert_eq!(engine.mapping(), &initial_mapping(&catalog()));
    }

    #[test]
    fn test_preview_can_be_disabled() {
        let catalog = catalog();
        let mapping = initial_mapping(&catalog);
        let settings = EngineSettings { preview_enabled: false, ..EngineSettings::default() };
        let mut engine = AxisRemapEngine::new(catalog, mapping, settings).unwrap();
        engine.start_drag("created", None, origin()).unwrap();
        assert_eq!(engine.take_effects().len(), 1);
    }

    #[test]
    fn test_concurrent_drag_rejected() {
        let mut source = source();
        let mut engine = engine(&mut source);
        engine.start_drag("status", Some(Plane::X), origin()).unwrap();
        assert_eq!(
            engine.start_drag("folder", Some(Plane::Y), origin()),
            Err(RemapError::DragAlreadyActive { facet_id: "status".to_string() })
        );
        assert_eq!(engine.drag_state().map(|d| d.facet_id.as_str()), Some("status"));
    }

    #[test]
    fn test_start_drag_validates_source() {
        let mut source = source();
        let mut engine = engine(&mut source);
        assert!(matches!(
            engine.start_drag("status", Some(Plane::Y), origin()),
            Err(RemapError::SourceMismatch { .. })
        ));
        assert_eq!(
            engine.start_drag("nope", None, origin()),
            Err(RemapError::UnknownFacet("nope".to_string()))
        );
        assert_eq!(engine.phase(), RemapPhase::Idle);
    }

    #[test]
    fn test_swap_round_trip() {
        let mut source = source();
        let mut engine = engine(&mut source);
        let original = engine.mapping().clone();

        engine.start_drag("status", Some(Plane::X), origin()).unwrap();
        let request = expect_reflow(engine.handle_drop(DropTarget::Slot(Plane::Y)).unwrap());
        assert!(matches!(engine.run_reflow(&request, &mut source).unwrap(), ReflowResult::Committed(_)));
        assert_eq!(engine.mapping().get(Plane::X).map(|f| f.id.as_str()), Some("folder"));
        assert_eq!(engine.mapping().get(Plane::Y).map(|f| f.id.as_str()), Some("status"));

        engine.start_drag("status", Some(Plane::Y), origin()).unwrap();
        let request = expect_reflow(engine.handle_drop(DropTarget::Slot(Plane::X)).unwrap());
        engine.run_reflow(&request, &mut source).unwrap();

        assert_eq!(engine.mapping(), &original);
        assert_eq!(
            serde_json::to_string(engine.mapping()).unwrap(),
            serde_json::to_string(&original).unwrap()
        );
    }

    #[test]
    fn test_rollback_keeps_previous_snapshot() {
        let mut source = source();
        let mut engine = engine(&mut source);
        let before = engine.snapshot();

        engine.start_drag("status", Some(Plane::X), origin()).unwrap();
        let request = expect_reflow(engine.handle_drop(DropTarget::Slot(Plane::Z)).unwrap());
        assert_eq!(engine.mapping(), &before.mapping);

        let result = engine.run_reflow(&request, &mut FailingSource).unwrap();
        match result {
            ReflowResult::RolledBack { snapshot, error } => {
                assert!(Arc::ptr_eq(&snapshot, &before));
                assert_eq!(error, SourceError::Execution("database is locked".to_string()));
            }
            other => panic!("expected rollback, got {:?}", other),
        }
        assert_eq!(engine.mapping(), &before.mapping);
        assert_eq!(engine.snapshot().version, before.version);
        assert_eq!(engine.phase(), RemapPhase::Idle);
        assert!(engine
            .take_effects()
            .iter()
            .any(|e| matches!(e, RemapEffect::RolledBack { .. })));
    }

    #[test]
    fn test_wrong_column_count_rolls_back() {
        let mut source = source();
        let mut engine = engine(&mut source);
        let before = engine.snapshot();

        let request = engine.refresh().unwrap();
        let result = engine.run_reflow(&request, &mut MalformedSource).unwrap();
        assert!(matches!(
            result,
            ReflowResult::RolledBack { error: SourceError::ColumnMismatch { .. }, .. }
        ));
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn test_start_drag_rejected_during_reflow() {
        let mut source = source();
        let mut engine = engine(&mut source);
        engine.start_drag("status", Some(Plane::X), origin()).unwrap();
        let request = expect_reflow(engine.handle_drop(DropTarget::Slot(Plane::Z)).unwrap());

        assert_eq!(engine.start_drag("folder", Some(Plane::Y), origin()), Err(RemapError::ReflowInProgress));
        assert_eq!(engine.cancel_drag(), Err(RemapError::ReflowInProgress));
        assert_eq!(engine.refresh().unwrap_err(), RemapError::ReflowInProgress);

        engine.run_reflow(&request, &mut source).unwrap();
        assert_eq!(engine.mapping().plane_of("status"), Some(Plane::Z));
    }

    #[test]
    fn test_stale_ticket_is_rejected() {
        let mut source = source();
        let mut engine = engine(&mut source);
        let request = engine.refresh().unwrap();

        let result = engine.complete_reflow(request.ticket + 7, Ok(ReflowRows::default()));
        assert_eq!(
            result,
            Err(RemapError::StaleReflow { expected: request.ticket, actual: request.ticket + 7 })
        );
        assert_eq!(engine.phase(), RemapPhase::Reflowing);
        engine.run_reflow(&request, &mut source).unwrap();
        assert_eq!(engine.complete_reflow(request.ticket, Ok(ReflowRows::default())), Err(RemapError::NoPendingReflow));
    }

    #[test]
    fn test_abort_reflow_rolls_back() {
        let mut source = source();
        let mut engine = engine(&mut source);
        let before = engine.snapshot();
        engine.start_drag("folder", Some(Plane::Y), origin()).unwrap();
        engine.handle_drop(DropTarget::Pool).unwrap();

        let result = engine.abort_reflow("timed out").unwrap();
        assert!(matches!(
            result,
            ReflowResult::RolledBack { error: SourceError::Aborted(_), .. }
        ));
        assert_eq!(engine.snapshot(), before);
        assert_eq!(engine.abort_reflow("again"), Err(RemapError::NoPendingReflow));
    }

    #[test]
    fn test_drop_outside_targets_cancels() {
        let mut source = source();
        let mut engine = engine(&mut source);
        engine.set_slot_geometry(vec![SlotGeometry {
            target: DropTarget::Slot(Plane::Y),
            rect: Rect::new(0.0, 0.0, 100.0, 40.0),
        }]);
        engine.start_drag("status", Some(Plane::X), origin()).unwrap();

        assert_eq!(engine.drop_at(Point::new(500.0, 500.0)).unwrap(), DropOutcome::Cancelled);
        assert_eq!(engine.phase(), RemapPhase::Idle);
        assert_eq!(engine.mapping(), &initial_mapping(&catalog()));
    }

    #[test]
    fn test_cancel_drag_discards_preview() {
        let mut source = source();
        let mut engine = engine(&mut source);
        engine.start_drag("status", Some(Plane::X), origin()).unwrap();
        engine.take_effects();

        engine.cancel_drag().unwrap();
        assert_eq!(engine.take_effects(), vec![RemapEffect::PreviewCleared]);
        assert_eq!(engine.cancel_drag(), Err(RemapError::NotDragging));
    }

    #[test]
    fn test_pointer_highlights_single_nearest_target() {
        let mut source = source();
        let mut engine = engine(&mut source);
        engine.set_slot_geometry(vec![
            SlotGeometry { target: DropTarget::Slot(Plane::Y), rect: Rect::new(0.0, 0.0, 100.0, 100.0) },
            SlotGeometry { target: DropTarget::Slot(Plane::Z), rect: Rect::new(50.0, 50.0, 100.0, 100.0) },
        ]);
        engine.start_drag("status", Some(Plane::X), origin()).unwrap();
        engine.take_effects();

        assert_eq!(engine.pointer_move(Point::new(60.0, 60.0)).unwrap(), Some(DropTarget::Slot(Plane::Y)));
        assert_eq!(engine.pointer_move(Point::new(90.0, 90.0)).unwrap(), Some(DropTarget::Slot(Plane::Z)));
        assert_eq!(engine.pointer_move(Point::new(95.0, 95.0)).unwrap(), Some(DropTarget::Slot(Plane::Z)));
        assert_eq!(engine.pointer_move(Point::new(400.0, 0.0)).unwrap(), None);

        let highlights: Vec<Option<DropTarget>> = engine
            .take_effects()
            .into_iter()
            .filter_map(|e| match e {
                RemapEffect::TargetHighlighted { target } => Some(target),
                _ => None,
            })
            .collect();
        assert_eq!(
            highlights,
            vec![Some(DropTarget::Slot(Plane::Y)), Some(DropTarget::Slot(Plane::Z)), None]
        );
    }

    #[test]
    fn test_drop_on_own_slot_is_unchanged() {
        let mut source = source();
        let mut engine = engine(&mut source);
        engine.start_drag("status", Some(Plane::X), origin()).unwrap();
        assert_eq!(engine.handle_drop(DropTarget::Slot(Plane::X)).unwrap(), DropOutcome::Unchanged);
        assert_eq!(engine.phase(), RemapPhase::Idle);
    }

    #[test]
    fn test_fresh_facet_gets_inferred_dimension() {
        let mut source = source();
        let mut engine = engine(&mut source);
        engine.start_drag("created", None, origin()).unwrap();
        let request = expect_reflow(engine.handle_drop(DropTarget::Slot(Plane::Z)).unwrap());
        engine.run_reflow(&request, &mut source).unwrap();

        let placed = engine.mapping().get(Plane::Z).unwrap();
        assert_eq!(placed.latch_dimension, Some(LatchDimension::Time));
        // Z nests outside Y on the row axis.
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.row_tree.max_depth, 2);
        assert_eq!(snapshot.row_tree.roots[0].value, "Q1");
    }

    #[test]
    fn test_pool_drop_clears_plane() {
        let mut source = source();
        let mut engine = engine(&mut source);
        engine.start_drag("folder", Some(Plane::Y), origin()).unwrap();
        let request = expect_reflow(engine.handle_drop(DropTarget::Pool).unwrap());
        engine.run_reflow(&request, &mut source).unwrap();

        assert_eq!(engine.mapping().plane_of("folder"), None);
        assert!(engine.snapshot().row_tree.is_empty());
        let pool: Vec<&str> = engine.available().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(pool, vec!["folder", "created", "broken"]);
    }

    #[test]
    fn test_invalid_facet_fails_at_drop_and_returns_to_idle() {
        let mut source = source();
        let mut engine = engine(&mut source);
        engine.start_drag("broken", None, origin()).unwrap();
        assert_eq!(
            engine.handle_drop(DropTarget::Slot(Plane::Z)),
            Err(RemapError::Config(FacetError::MissingTimeFormat { facet_id: "broken".to_string() }))
        );
        assert_eq!(engine.phase(), RemapPhase::Idle);
        assert_eq!(engine.snapshot().version, 1);
    }

    #[test]
    fn test_new_rejects_mapping_outside_catalog() {
        let mut mapping = AxisMapping::new();
        mapping.set(Plane::X, Some(FacetConfig::new("ghost", "Ghost", "ghost", DataType::Text)));
        assert!(AxisRemapEngine::new(catalog(), mapping, EngineSettings::default()).is_err());
    }
}
