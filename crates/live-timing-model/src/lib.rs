//! The time-gated model updater: decodes packets drained from the
//! encrypted cache into race state and presentation events.

pub mod state;
pub mod updater;
pub mod view;

pub use state::{CarRow, FastestLap, StateModel, ATOM_SLOTS};
pub use updater::ModelUpdater;
pub use view::{ChannelViewSink, NullViewSink, ViewEvent, ViewSink};
