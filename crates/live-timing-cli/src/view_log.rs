//! Default [`ViewSink`]: logs what a real terminal UI would draw,
//! without depending on a curses binding. A thin stand-in for the
//! rendering layer described as out of scope for this workspace.

use live_timing_model::ViewSink;

#[derive(Debug, Default)]
pub struct TracingViewSink;

impl ViewSink for TracingViewSink {
    fn update_cell(&mut self, car: i32, atom_kind: i32) {
        tracing::trace!(car, atom_kind, "cell changed");
    }

    fn update_status(&mut self) {
        tracing::trace!("status line changed");
    }

    fn update_time(&mut self) {
        tracing::trace!("clock changed");
    }

    fn clear_board(&mut self) {
        tracing::debug!("board cleared");
    }

    fn clear_car(&mut self, car: i32) {
        tracing::debug!(car, "car row cleared");
    }

    fn info(&mut self, level: i32, message: &str) {
        match level {
            0 => tracing::warn!(%message, "notice"),
            1 => tracing::info!(%message, "commentary"),
            _ => tracing::debug!(%message, "info"),
        }
    }

    fn close_popup(&mut self) {
        tracing::trace!("popup dismissed");
    }
}
