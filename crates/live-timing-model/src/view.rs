//! The presentation seam: the updater only ever tells a [`ViewSink`]
//! which cells changed, never how to draw them.

/// Display surface driven by the model updater. A terminal UI, a test
/// harness, and a headless logger each implement this the same way.
pub trait ViewSink: Send {
    /// Car `car`'s atom `atom_kind` changed; re-read it from the model
    /// and redraw.
    fn update_cell(&mut self, car: i32, atom_kind: i32);

    /// Status line fields (flag, laps, fastest lap) changed.
    fn update_status(&mut self);

    /// The clock fields changed.
    fn update_time(&mut self);

    /// The whole board must be redrawn (new event, reconnect).
    fn clear_board(&mut self);

    /// One car dropped out or was reassigned; blank its row.
    fn clear_car(&mut self, car: i32);

    /// A message for the user, at `level` (0 lowest, matching the
    /// original's copyright/notice/commentary severity ordering).
    fn info(&mut self, level: i32, message: &str);

    /// Dismiss whatever `info` last raised.
    fn close_popup(&mut self);
}

/// A [`ViewSink`] that discards every event. Useful for headless runs
/// and for tests that only care about model state.
#[derive(Debug, Default)]
pub struct NullViewSink;

impl ViewSink for NullViewSink {
    fn update_cell(&mut self, _car: i32, _atom_kind: i32) {}
    fn update_status(&mut self) {}
    fn update_time(&mut self) {}
    fn clear_board(&mut self) {}
    fn clear_car(&mut self, _car: i32) {}
    fn info(&mut self, _level: i32, _message: &str) {}
    fn close_popup(&mut self) {}
}

/// One [`ViewSink`] call, reified so it can cross a channel to a
/// separate rendering task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    UpdateCell { car: i32, atom_kind: i32 },
    UpdateStatus,
    UpdateTime,
    ClearBoard,
    ClearCar { car: i32 },
    Info { level: i32, message: String },
    ClosePopup,
}

/// Forwards every [`ViewSink`] call as a [`ViewEvent`] over an
/// unbounded channel. A dropped receiver just means the events pile up
/// unread until the sink is dropped too; this never blocks the
/// updater's drain loop.
pub struct ChannelViewSink {
    tx: tokio::sync::mpsc::UnboundedSender<ViewEvent>,
}

impl ChannelViewSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<ViewEvent>) -> Self {
        Self { tx }
    }
}

impl ViewSink for ChannelViewSink {
    fn update_cell(&mut self, car: i32, atom_kind: i32) {
        let _ = self.tx.send(ViewEvent::UpdateCell { car, atom_kind });
    }

    fn update_status(&mut self) {
        let _ = self.tx.send(ViewEvent::UpdateStatus);
    }

    fn update_time(&mut self) {
        let _ = self.tx.send(ViewEvent::UpdateTime);
    }

    fn clear_board(&mut self) {
        let _ = self.tx.send(ViewEvent::ClearBoard);
    }

    fn clear_car(&mut self, car: i32) {
        let _ = self.tx.send(ViewEvent::ClearCar { car });
    }

    fn info(&mut self, level: i32, message: &str) {
        let _ = self.tx.send(ViewEvent::Info {
            level,
            message: message.to_string(),
        });
    }

    fn close_popup(&mut self) {
        let _ = self.tx.send(ViewEvent::ClosePopup);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards_calls_as_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = ChannelViewSink::new(tx);
        sink.update_cell(3, 1);
        sink.clear_board();
        sink.info(2, "hello");
        assert_eq!(rx.try_recv(), Ok(ViewEvent::UpdateCell { car: 3, atom_kind: 1 }));
        assert_eq!(rx.try_recv(), Ok(ViewEvent::ClearBoard));
        assert_eq!(
            rx.try_recv(),
            Ok(ViewEvent::Info {
                level: 2,
                message: "hello".to_string()
            })
        );
    }
}
