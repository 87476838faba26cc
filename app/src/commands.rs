//! FILENAME: app/src/commands.rs
// PURPOSE: Command entry points for the facet grid renderer.
// CONTEXT: Every command returns Result<T, String>; engine errors are
// stringified at this boundary.

use std::sync::MutexGuard;

use facet_engine::{
    AxisRemapEngine, DropOutcome, ReflowRequest, ReflowResult, ReflowRows, RemapEffect, SlotGeometry,
    SourceError,
};

use crate::types::*;
use crate::{log_debug, log_enter, log_exit, log_info, log_warn, BoxedSource, GridSession};

// ============================================================================
// HELPERS
// ============================================================================

fn lock_engine(session: &GridSession) -> Result<MutexGuard<'_, AxisRemapEngine>, String> {
    session.engine.lock().map_err(|e| format!("Lock error: {}", e))
}

fn lock_source(session: &GridSession) -> Result<MutexGuard<'_, BoxedSource>, String> {
    session.source.lock().map_err(|e| format!("Lock error: {}", e))
}

fn current_notice(session: &GridSession) -> Option<String> {
    session.notice.lock().ok().and_then(|guard| guard.clone())
}

fn set_notice(session: &GridSession, notice: Option<String>) {
    if let Ok(mut guard) = session.notice.lock() {
        *guard = notice;
    }
}

fn view_of(session: &GridSession, engine: &AxisRemapEngine) -> GridViewResponse {
    let available = engine.available().into_iter().map(FacetData::from).collect();
    GridViewResponse::build(&engine.snapshot(), engine.phase(), available, current_notice(session))
}

/// What a finished reflow left behind, captured under one engine lock.
struct ReflowReport {
    status: DropStatus,
    effects: Vec<RemapEffect>,
    view: GridViewResponse,
}

/// Runs both queries of `request` with only the source locked, then
/// completes the reflow on the engine. While the queries run, views show the
/// previous snapshot and new drags fail with a reflow in progress.
fn execute_reflow(session: &GridSession, request: &ReflowRequest) -> Result<ReflowReport, String> {
    log_debug!("GRID", "reflow {}: running row and column queries", request.ticket);
    let rows = match lock_source(session) {
        Ok(mut source) => source.execute(&request.row_query).and_then(|rows| {
            let columns = source.execute(&request.column_query)?;
            Ok(ReflowRows { rows, columns })
        }),
        Err(e) => Err(SourceError::Execution(e)),
    };

    let mut engine = lock_engine(session)?;
    let result = engine
        .complete_reflow(request.ticket, rows)
        .map_err(|e| e.to_string())?;
    let status = match result {
        ReflowResult::Committed(snapshot) => {
            log_info!(
                "GRID",
                "reflow {} committed: version {}, {} row leaves, {} column leaves",
                request.ticket,
                snapshot.version,
                snapshot.row_tree.leaf_count,
                snapshot.column_tree.leaf_count
            );
            if snapshot.row_tree.truncated || snapshot.column_tree.truncated {
                log_warn!(
                    "GRID",
                    "headers truncated: {} row and {} column nodes hidden",
                    snapshot.row_tree.hidden_nodes,
                    snapshot.column_tree.hidden_nodes
                );
            }
            set_notice(session, None);
            DropStatus::Committed
        }
        ReflowResult::RolledBack { snapshot, error } => {
            log_warn!("GRID", "reflow {} rolled back to version {}: {}", request.ticket, snapshot.version, error);
            set_notice(
                session,
                Some(format!("Could not rearrange the grid ({}). The previous layout was restored.", error)),
            );
            DropStatus::RolledBack
        }
    };
    Ok(ReflowReport {
        status,
        effects: engine.take_effects(),
        view: view_of(session, &engine),
    })
}

// ============================================================================
// COMMANDS
// ============================================================================

pub fn get_grid_view(session: &GridSession) -> Result<GridViewResponse, String> {
    let engine = lock_engine(session)?;
    Ok(view_of(session, &engine))
}

/// Registers the screen rectangles of the drop targets.
pub fn set_drop_targets(session: &GridSession, targets: Vec<SlotGeometry>) -> Result<(), String> {
    log_debug!("GRID", "set_drop_targets count={}", targets.len());
    let mut engine = lock_engine(session)?;
    engine.set_slot_geometry(targets);
    Ok(())
}

pub fn start_facet_drag(session: &GridSession, request: StartDragRequest) -> Result<DragResponse, String> {
    log_enter!("GRID", "start_facet_drag", "facet={} source={:?}", request.facet_id, request.source);
    let mut engine = lock_engine(session)?;
    engine
        .start_drag(&request.facet_id, request.source, request.pointer.point())
        .map_err(|e| e.to_string())?;
    let response = DragResponse {
        phase: engine.phase(),
        candidate: None,
        drag: engine.drag_state().cloned(),
        effects: engine.take_effects(),
    };
    log_exit!("GRID", "start_facet_drag", "{} effects", response.effects.len());
    Ok(response)
}

pub fn move_facet_pointer(session: &GridSession, request: PointerRequest) -> Result<DragResponse, String> {
    let mut engine = lock_engine(session)?;
    let candidate = engine
        .pointer_move(request.point())
        .map_err(|e| e.to_string())?;
    Ok(DragResponse {
        phase: engine.phase(),
        candidate,
        drag: engine.drag_state().cloned(),
        effects: engine.take_effects(),
    })
}

/// Drops the dragged facet and, when the mapping changes, runs the reflow
/// to completion before answering. The engine lock is released while the
/// reflow queries run.
pub fn drop_facet(session: &GridSession, request: DropRequest) -> Result<DropResponse, String> {
    log_enter!("GRID", "drop_facet", "target={:?}", request.target);
    let (outcome, mut effects, view) = {
        let mut engine = lock_engine(session)?;
        let outcome = match (request.target, &request.pointer) {
            (Some(target), _) => engine.handle_drop(target),
            (None, Some(pointer)) => engine.drop_at(pointer.point()),
            (None, None) => engine.cancel_drag().map(|_| DropOutcome::Cancelled),
        };
        match outcome {
            Ok(outcome) => (outcome, engine.take_effects(), view_of(session, &engine)),
            Err(e) => {
                let effects = engine.take_effects();
                log_warn!("GRID", "drop rejected: {} ({} effects discarded)", e, effects.len());
                return Err(e.to_string());
            }
        }
    };

    let (status, view) = match outcome {
        DropOutcome::Cancelled => (DropStatus::Cancelled, view),
        DropOutcome::Unchanged => (DropStatus::Unchanged, view),
        DropOutcome::Reflow(reflow) => {
            let report = execute_reflow(session, &reflow)?;
            effects.extend(report.effects);
            (report.status, report.view)
        }
    };

    log_exit!("GRID", "drop_facet", "status={:?} version={}", status, view.version);
    Ok(DropResponse { status, view, effects })
}

pub fn cancel_facet_drag(session: &GridSession) -> Result<DragResponse, String> {
    log_info!("GRID", "cancel_facet_drag");
    let mut engine = lock_engine(session)?;
    engine.cancel_drag().map_err(|e| e.to_string())?;
    Ok(DragResponse {
        phase: engine.phase(),
        candidate: None,
        drag: None,
        effects: engine.take_effects(),
    })
}

/// Rebuilds both trees for the current mapping after the records changed.
pub fn refresh_grid(session: &GridSession) -> Result<GridViewResponse, String> {
    log_enter!("GRID", "refresh_grid");
    let request = {
        let mut engine = lock_engine(session)?;
        let request = engine.refresh().map_err(|e| e.to_string())?;
        engine.take_effects();
        request
    };
    let report = execute_reflow(session, &request)?;
    log_exit!("GRID", "refresh_grid", "version={} no_data={}", report.view.version, report.view.no_data);
    Ok(report.view)
}
