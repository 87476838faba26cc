//! FILENAME: tests/common/mod.rs
//! Test harness and fixtures for grid session integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use facet_engine::{CompiledQuery, GroupedRow, GroupingSource, MemorySource, Plane, Record, SourceError};
use grid_app::commands::{drop_facet, get_grid_view, start_facet_drag};
use grid_app::{
    create_session, DropRequest, DropResponse, GridConfig, GridSession, GridViewResponse, PointerRequest,
    StartDragRequest,
};
use serde_json::json;

/// Configuration with status on X and folder on Y.
pub const CARDS_CONFIG: &str = r#"{
    "settings": { "limits": { "max_depth": 5, "max_headers": 100 } },
    "facets": [
        { "id": "status", "name": "Status", "source_column": "status", "data_type": "select", "sort_order": 1 },
        { "id": "folder", "name": "Folder", "source_column": "folder", "data_type": "text", "sort_order": 2 },
        { "id": "created", "name": "Created", "source_column": "created_at", "data_type": "date", "time_format": "quarter", "sort_order": 3 },
        { "id": "tags", "name": "Tags", "source_column": "tags", "data_type": "multi_select", "sort_order": 4 },
        { "id": "notes", "name": "Notes", "source_column": "", "data_type": "text", "sort_order": 5 }
    ],
    "mapping": { "x": "status", "y": "folder" }
}"#;

/// Card records used across the tests.
pub struct CardsFixture;

impl CardsFixture {
    pub fn records() -> Vec<Record> {
        vec![
            Record::new("c1")
                .with("status", json!("open"))
                .with("folder", json!("work"))
                .with("created_at", json!("2024-03-10"))
                .with("tags", json!(["a", "b"])),
            Record::new("c2")
                .with("status", json!("done"))
                .with("folder", json!("home"))
                .with("created_at", json!("2024-07-02T09:00:00"))
                .with("tags", json!(["b"])),
            Record::new("c3")
                .with("status", json!("open"))
                .with("folder", json!("home"))
                .with("created_at", json!("2024-08-20")),
            Record::new("c4")
                .with("status", json!("open"))
                .with("created_at", json!("2023-11-30"))
                .with("tags", json!([])),
        ]
    }

    pub fn source() -> MemorySource {
        MemorySource::with_records(CardsFixture::records())
    }
}

/// Wraps a source and fails every query while the switch is on.
pub struct FlakySource {
    inner: MemorySource,
    failing: Arc<AtomicBool>,
}

impl FlakySource {
    pub fn new(inner: MemorySource) -> (Self, Arc<AtomicBool>) {
        let failing = Arc::new(AtomicBool::new(false));
        (
            FlakySource {
                inner,
                failing: Arc::clone(&failing),
            },
            failing,
        )
    }
}

impl GroupingSource for FlakySource {
    fn execute(&mut self, query: &CompiledQuery) -> Result<Vec<GroupedRow>, SourceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Execution("connection reset".to_string()));
        }
        self.inner.execute(query)
    }
}

/// Wraps a source and, once armed, parks the next query until the test
/// releases it. `entered` fires when a query is parked.
pub struct GatedSource {
    inner: MemorySource,
    armed: Arc<AtomicBool>,
    entered: Sender<()>,
    release: Receiver<()>,
}

/// Test side of a `GatedSource`.
pub struct Gate {
    pub armed: Arc<AtomicBool>,
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

impl GatedSource {
    pub fn new(inner: MemorySource) -> (Self, Gate) {
        let armed = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        (
            GatedSource {
                inner,
                armed: Arc::clone(&armed),
                entered: entered_tx,
                release: release_rx,
            },
            Gate {
                armed,
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl GroupingSource for GatedSource {
    fn execute(&mut self, query: &CompiledQuery) -> Result<Vec<GroupedRow>, SourceError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.entered.send(());
            let _ = self.release.recv();
        }
        self.inner.execute(query)
    }
}

/// Test harness owning one session.
pub struct TestHarness {
    pub session: GridSession,
}

impl TestHarness {
    pub fn new() -> Self {
        TestHarness::with_source(Box::new(CardsFixture::source()))
    }

    pub fn with_source(source: grid_app::BoxedSource) -> Self {
        let config = GridConfig::from_json(CARDS_CONFIG).expect("fixture config parses");
        let session = create_session(config, source).expect("session starts");
        TestHarness { session }
    }

    /// A harness whose source can be switched into failure.
    pub fn flaky() -> (Self, Arc<AtomicBool>) {
        let (source, failing) = FlakySource::new(CardsFixture::source());
        (TestHarness::with_source(Box::new(source)), failing)
    }

    /// A harness whose source can park a query mid-reflow.
    pub fn gated() -> (Self, Gate) {
        let (source, gate) = GatedSource::new(CardsFixture::source());
        (TestHarness::with_source(Box::new(source)), gate)
    }

    pub fn view(&self) -> GridViewResponse {
        get_grid_view(&self.session).expect("view")
    }

    pub fn facet_on(&self, plane: Plane) -> Option<String> {
        self.view()
            .slots
            .into_iter()
            .find(|slot| slot.plane == plane)
            .and_then(|slot| slot.facet.map(|f| f.id))
    }

    pub fn labels(levels: &[Vec<grid_app::HeaderCellData>], level: usize) -> Vec<String> {
        levels
            .get(level)
            .map(|cells| cells.iter().map(|c| c.label.clone()).collect())
            .unwrap_or_default()
    }

    /// Drags `facet_id` from `source` and drops it on `target`.
    pub fn drag_and_drop(
        &self,
        facet_id: &str,
        source: Option<Plane>,
        target: facet_engine::DropTarget,
    ) -> Result<DropResponse, String> {
        start_facet_drag(
            &self.session,
            StartDragRequest {
                facet_id: facet_id.to_string(),
                source,
                pointer: PointerRequest { x: 0.0, y: 0.0 },
            },
        )?;
        drop_facet(
            &self.session,
            DropRequest {
                target: Some(target),
                pointer: None,
            },
        )
    }
}
