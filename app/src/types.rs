//! FILENAME: app/src/types.rs
// PURPOSE: Request and response types for the grid commands.

use facet_engine::{
    DragState, DropTarget, FacetConfig, GridSnapshot, HeaderNode, HeaderTree, LatchDimension, Plane, Point,
    RemapEffect, RemapPhase,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDragRequest {
    pub facet_id: String,
    /// Plane the facet is dragged from; absent for the available pool.
    pub source: Option<Plane>,
    /// Pointer position where the drag began.
    pub pointer: PointerRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerRequest {
    pub x: f64,
    pub y: f64,
}

impl PointerRequest {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A drop either names its target directly or gives a pointer position to
/// hit-test against the registered drop targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropRequest {
    pub target: Option<DropTarget>,
    pub pointer: Option<PointerRequest>,
}

// ============================================================================
// RESPONSES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HeaderCellData {
    pub key: String,
    pub label: String,
    pub span: usize,
    pub start_index: usize,
    pub is_collapsed: bool,
}

impl From<&HeaderNode> for HeaderCellData {
    fn from(node: &HeaderNode) -> Self {
        HeaderCellData {
            key: node.key.clone(),
            label: node.value.clone(),
            span: node.span,
            start_index: node.start_index,
            is_collapsed: node.is_collapsed,
        }
    }
}

/// One axis flattened into rows of header cells, outermost level first.
#[derive(Debug, Clone, Serialize)]
pub struct HeaderAxisData {
    pub levels: Vec<Vec<HeaderCellData>>,
    pub leaf_count: usize,
    pub depth: usize,
    pub truncated: bool,
    pub hidden_nodes: usize,
}

impl From<&HeaderTree> for HeaderAxisData {
    fn from(tree: &HeaderTree) -> Self {
        let mut levels: Vec<Vec<HeaderCellData>> = vec![Vec::new(); tree.max_depth];
        for node in tree.nodes() {
            if let Some(level) = levels.get_mut(node.level) {
                level.push(HeaderCellData::from(node));
            }
        }
        HeaderAxisData {
            levels,
            leaf_count: tree.leaf_count,
            depth: tree.max_depth,
            truncated: tree.truncated,
            hidden_nodes: tree.hidden_nodes,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FacetData {
    pub id: String,
    pub name: String,
    pub latch_dimension: Option<LatchDimension>,
}

impl From<&FacetConfig> for FacetData {
    fn from(facet: &FacetConfig) -> Self {
        FacetData {
            id: facet.id.clone(),
            name: facet.name.clone(),
            latch_dimension: facet.latch_dimension,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotData {
    pub plane: Plane,
    pub facet: Option<FacetData>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GridViewResponse {
    pub version: u64,
    pub phase: RemapPhase,
    pub slots: Vec<SlotData>,
    pub available: Vec<FacetData>,
    pub rows: HeaderAxisData,
    pub columns: HeaderAxisData,
    /// Nothing to show for the selected axes. Distinct from "still loading".
    pub no_data: bool,
    /// User-facing message from the last failed reflow.
    pub notice: Option<String>,
}

impl GridViewResponse {
    pub fn build(
        snapshot: &GridSnapshot,
        phase: RemapPhase,
        available: Vec<FacetData>,
        notice: Option<String>,
    ) -> Self {
        let slots = Plane::ALL
            .into_iter()
            .map(|plane| SlotData {
                plane,
                facet: snapshot.mapping.get(plane).map(FacetData::from),
            })
            .collect();
        GridViewResponse {
            version: snapshot.version,
            phase,
            slots,
            available,
            rows: HeaderAxisData::from(&snapshot.row_tree),
            columns: HeaderAxisData::from(&snapshot.column_tree),
            no_data: snapshot.is_empty(),
            notice,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DragResponse {
    pub phase: RemapPhase,
    pub candidate: Option<DropTarget>,
    /// The live gesture, absent once it ended.
    pub drag: Option<DragState>,
    pub effects: Vec<RemapEffect>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropStatus {
    Committed,
    RolledBack,
    Unchanged,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct DropResponse {
    pub status: DropStatus,
    pub view: GridViewResponse,
    pub effects: Vec<RemapEffect>,
}
