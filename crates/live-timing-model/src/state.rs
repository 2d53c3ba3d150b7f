//! Replay/presentation state: everything the model updater mutates as
//! it drains packets from the encrypted cache.

use live_timing_cipher::CRYPTO_SEED;
use live_timing_protocol::{CarAtom, EventType, FlagStatus};

/// Car atom subtypes are a 4-bit field (0 is `POSITION_UPDATE`, 15 is
/// `POSITION_HISTORY`); the remaining values name a row's data cells.
pub const ATOM_SLOTS: usize = 16;

/// One car's row: its current race position and every atom cell an
/// event type might address.
#[derive(Debug, Clone)]
pub struct CarRow {
    pub position: i32,
    pub atoms: [CarAtom; ATOM_SLOTS],
}

impl Default for CarRow {
    fn default() -> Self {
        Self {
            position: 0,
            atoms: [CarAtom::default(); ATOM_SLOTS],
        }
    }
}

/// Fastest-lap information, refreshed piecemeal by `SYS_SPEED` sub-fields.
#[derive(Debug, Clone, Default)]
pub struct FastestLap {
    pub car: String,
    pub driver: String,
    pub time: String,
    pub lap: String,
}

/// Owner of replay/presentation state, drained from the encrypted cache
/// by the [`crate::updater::ModelUpdater`].
#[derive(Debug, Clone)]
pub struct StateModel {
    pub decryption_key: u32,
    pub salt: u32,
    pub decryption_failure: bool,

    pub event_type: Option<EventType>,

    pub paused: bool,
    pub replay_gap: i64,
    pub time_gap: i64,
    pub last_time_gap: i64,
    pub paused_time: i64,
    pub model_time: i64,
    pub remaining_time: i64,
    pub epoch_time: i64,

    pub laps_completed: u32,
    pub total_laps: u32,
    pub flag: Option<FlagStatus>,

    pub track_temp: i32,
    pub air_temp: i32,
    pub humidity: i32,
    pub wind_speed: i32,
    pub wind_direction: i32,
    pub pressure: i32,

    pub fastest_lap: FastestLap,

    pub cars: Vec<CarRow>,
}

impl Default for StateModel {
    fn default() -> Self {
        Self::new()
    }
}

impl StateModel {
    pub fn new() -> Self {
        Self {
            decryption_key: 0,
            salt: CRYPTO_SEED,
            decryption_failure: false,
            event_type: None,
            paused: false,
            replay_gap: 0,
            time_gap: 0,
            last_time_gap: 0,
            paused_time: 0,
            model_time: 0,
            remaining_time: 0,
            epoch_time: 0,
            laps_completed: 0,
            total_laps: 0,
            flag: None,
            track_temp: 0,
            air_temp: 0,
            humidity: 0,
            wind_speed: 0,
            wind_direction: 0,
            pressure: 0,
            fastest_lap: FastestLap::default(),
            cars: Vec::new(),
        }
    }

    /// Car index is the car's grid start position (1-based); grow the
    /// table if this is the first packet seen for it.
    pub fn ensure_car(&mut self, car: i32) -> &mut CarRow {
        let idx = (car - 1).max(0) as usize;
        if idx >= self.cars.len() {
            self.cars.resize(idx + 1, CarRow::default());
        }
        &mut self.cars[idx]
    }

    pub fn car(&self, car: i32) -> Option<&CarRow> {
        self.cars.get((car - 1).max(0) as usize)
    }

    /// Reset everything a new `EVENT_ID` invalidates: weather, fastest
    /// lap, laps completed, the whole car table, and the cipher salt.
    pub fn reset_for_new_event(&mut self, event_type: Option<EventType>) {
        self.event_type = event_type;
        self.epoch_time = 0;
        self.remaining_time = 0;
        self.laps_completed = 0;
        self.flag = Some(FlagStatus::Green);
        self.track_temp = 0;
        self.air_temp = 0;
        self.wind_speed = 0;
        self.humidity = 0;
        self.pressure = 0;
        self.wind_direction = 0;
        self.fastest_lap = FastestLap::default();
        self.cars.clear();
        self.salt = CRYPTO_SEED;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_car_grows_table_once() {
        let mut model = StateModel::new();
        model.ensure_car(3).position = 5;
        assert_eq!(model.cars.len(), 3);
        assert_eq!(model.car(3).expect("present").position, 5);
    }

    #[test]
    fn reset_for_new_event_clears_cars_and_salt() {
        let mut model = StateModel::new();
        model.ensure_car(2).position = 1;
        model.salt = 0xDEAD_BEEF;
        model.reset_for_new_event(Some(EventType::Race));
        assert!(model.cars.is_empty());
        assert_eq!(model.salt, CRYPTO_SEED);
        assert_eq!(model.event_type, Some(EventType::Race));
    }
}
