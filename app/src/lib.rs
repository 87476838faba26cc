//! FILENAME: app/src/lib.rs
// PURPOSE: Host-side glue around the facet engine.
// CONTEXT: A GridSession owns one remap engine and the record source its
// reflows query. Commands in `commands` are the entry points for the renderer.

use std::sync::Mutex;

use facet_engine::{AxisRemapEngine, GroupingSource};

pub mod logging;
pub mod config;
pub mod types;
pub mod commands;

pub use config::{GridConfig, MappingConfig};
pub use logging::{get_log_path, init_facade, init_log_file, next_seq, write_log};
pub use types::*;

/// A record source a session can share across threads.
pub type BoxedSource = Box<dyn GroupingSource + Send>;

/// The engine and source locks are never held together. Reflow queries run
/// with only the source locked, so other commands see the published snapshot
/// and a drag started meanwhile is rejected.
pub struct GridSession {
    pub engine: Mutex<AxisRemapEngine>,
    pub source: Mutex<BoxedSource>,
    /// Message for the user after a rolled back reflow. Cleared on commit.
    pub notice: Mutex<Option<String>>,
}

/// Builds a session from a configuration and runs the first reflow so the
/// initial view already carries header trees.
pub fn create_session(config: GridConfig, source: BoxedSource) -> Result<GridSession, String> {
    log_info!("SYS", "Creating GridSession with {} facets", config.facets.len());
    let engine = config.into_engine().map_err(|e| e.to_string())?;
    let session = GridSession {
        engine: Mutex::new(engine),
        source: Mutex::new(source),
        notice: Mutex::new(None),
    };
    commands::refresh_grid(&session)?;
    Ok(session)
}

impl GridSession {
    /// Swaps in a new record source. Call `commands::refresh_grid` afterwards.
    pub fn replace_source(&self, source: BoxedSource) -> Result<(), String> {
        let mut guard = self.source.lock().map_err(|e| format!("Lock error: {}", e))?;
        *guard = source;
        Ok(())
    }
}
