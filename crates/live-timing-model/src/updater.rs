//! Drains the encrypted cache and folds each packet into [`StateModel`],
//! emitting [`ViewSink`] calls for whatever changed.

use live_timing_cache::{PacketCache, PacketIterator};
use live_timing_cipher::is_valid_decrypted_data;
use live_timing_errors::CacheError;
use live_timing_protocol::{
    ATOM_NUMBER, ATOM_RACE_INTERVAL, CarPacketKind, EventType, FlagStatus, Packet, SpeedField,
    SystemPacketKind, WeatherField,
};

use crate::state::StateModel;
use crate::view::ViewSink;

/// A `USER_SYS_KEY` packet the drain loop must stop at rather than
/// consume: the reader writes `data = 0` for its waiting marker and
/// `data = (cipher_mode << 1) | 1` once a key commits, so `data` odd
/// means a key is loaded and `data` even means still waiting.
fn is_waiting_key_marker(packet: &Packet) -> bool {
    packet.is_system()
        && SystemPacketKind::from_wire(packet.kind) == SystemPacketKind::UserSysKey
        && packet.data & 1 == 0
}

/// Parse a decimal run starting at `bytes[0]`, ignoring a non-digit
/// prefix byte (the event id atom carries one) and stopping at the
/// first non-digit.
fn parse_leading_decimal(bytes: &[u8]) -> u32 {
    let mut n: u32 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            if n != 0 {
                break;
            }
            continue;
        }
        n = n.saturating_mul(10).saturating_add(u32::from(b - b'0'));
    }
    n
}

/// Parse a colon-separated clock (`H:MM:SS`, or any other number of
/// groups) into seconds: each `:` folds the accumulator through
/// `total = total * 60 + group`, then the trailing group folds in the
/// same way. Returns `None` for text with no digits at all.
fn parse_colon_clock(text: &str) -> Option<i64> {
    let mut total: i64 = 0;
    let mut group: i64 = 0;
    let mut saw_digit = false;
    for c in text.chars() {
        if c == ':' {
            total = total * 60 + group;
            group = 0;
        } else if let Some(d) = c.to_digit(10) {
            group = group * 10 + i64::from(d);
            saw_digit = true;
        }
    }
    if !saw_digit {
        return None;
    }
    Some(total * 60 + group)
}

/// Accumulates `SYS_COMMENTARY` chunks until a non-continuation prefix
/// closes the message.
#[derive(Debug, Default)]
struct CommentaryBuffer {
    text: String,
}

impl CommentaryBuffer {
    /// Feed one packet's payload. The original treats any two-byte
    /// prefix other than exactly `01 00` as the terminal chunk, not just
    /// `00 00`; preserved here rather than tightened to "only 00 00
    /// terminates".
    fn feed(&mut self, payload: &[u8]) -> Option<String> {
        if payload.len() < 2 {
            return None;
        }
        let continuation = payload[0] == 1 && payload[1] == 0;
        self.text.push_str(&String::from_utf8_lossy(&payload[2..]));
        if continuation {
            None
        } else {
            Some(std::mem::take(&mut self.text))
        }
    }
}

/// Drains the encrypted cache under a wall-clock gate and mutates
/// [`StateModel`] one packet at a time.
pub struct ModelUpdater<V: ViewSink> {
    state: StateModel,
    view: V,
    iter: PacketIterator,
    commentary: CommentaryBuffer,
    /// Wall-clock time as of the most recent tick, used only to stamp
    /// `epoch_time` when a `SYS_WEATHER` session-clock packet arrives.
    now: i64,
}

impl<V: ViewSink> ModelUpdater<V> {
    pub fn new(view: V) -> Self {
        Self {
            state: StateModel::new(),
            view,
            iter: PacketIterator::default(),
            commentary: CommentaryBuffer::default(),
            now: 0,
        }
    }

    pub fn state(&self) -> &StateModel {
        &self.state
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    /// Pause the clock; `laps_completed`/positions stop advancing until
    /// [`Self::resume`].
    pub fn pause(&mut self, now: i64) {
        if !self.state.paused {
            self.state.paused = true;
            self.state.paused_time = now;
        }
    }

    /// Resume after a pause, folding the paused interval into the
    /// running time gap so `model_time` doesn't jump.
    pub fn resume(&mut self, now: i64) {
        if self.state.paused {
            self.state.time_gap += now - self.state.paused_time;
            self.state.paused_time = 0;
            self.state.paused = false;
        }
    }

    /// Advance `model_time` toward `now` minus the accumulated gaps,
    /// capped at one second of progress per call so a tick after a long
    /// stall doesn't replay the whole backlog in one jump.
    pub fn advance_clock(&mut self, now: i64) {
        self.now = now;
        if self.state.paused {
            return;
        }
        let target = now - self.state.time_gap - self.state.replay_gap;
        if target > self.state.model_time {
            self.state.model_time = (self.state.model_time + 1).min(target);
            self.view.update_time();
        }
    }

    /// One scheduler tick: advance the clock, then drain everything that
    /// became due. Suspension never happens mid-packet, since nothing
    /// here is `.await`-ed.
    pub fn tick(&mut self, cache: &mut PacketCache, now: i64) -> Result<usize, CacheError> {
        self.advance_clock(now);
        self.drain(cache)
    }

    /// Drain every packet at or before `model_time`, stopping at a
    /// not-yet-filled `USER_SYS_KEY` waiting marker or the live edge of
    /// the cache. Returns the number of packets applied.
    pub fn drain(&mut self, cache: &mut PacketCache) -> Result<usize, CacheError> {
        let mut applied = 0;
        loop {
            let mut probe = self.iter;
            let packet = match cache.get(&mut probe)? {
                Some(packet) => packet,
                None => {
                    self.iter = probe;
                    break;
                }
            };
            self.iter = probe;
            if packet.at > self.state.model_time {
                break;
            }
            if is_waiting_key_marker(&packet) {
                break;
            }
            self.handle_packet(&packet);
            cache.to_next(&mut self.iter)?;
            applied += 1;
        }
        Ok(applied)
    }

    fn handle_packet(&mut self, packet: &Packet) {
        if packet.is_system() {
            self.handle_system_packet(packet);
        } else {
            self.handle_car_packet(packet);
        }
    }

    fn handle_car_packet(&mut self, packet: &Packet) {
        let car = packet.car;
        match CarPacketKind::from_wire(packet.kind) {
            CarPacketKind::PositionUpdate => {
                // Often comes in pairs: one clearing the old position
                // (data 0), one setting the new (data != 0), but not
                // reliably so every update re-scans for whoever else
                // currently holds the target slot.
                let new_position = packet.data;
                self.view.clear_car(car);
                for row in &mut self.state.cars {
                    if row.position == new_position {
                        row.position = 0;
                    }
                }
                self.state.ensure_car(car).position = new_position;
                if new_position != 0 {
                    self.view.update_cell(car, CarPacketKind::PositionUpdate.to_wire());
                }
            }
            CarPacketKind::PositionHistory => {}
            CarPacketKind::Atom(subtype) => {
                if subtype == ATOM_NUMBER && !packet.is_header_only() {
                    self.state.decryption_failure = !is_valid_decrypted_data(packet);
                }
                let row = self.state.ensure_car(car);
                let slot = subtype as usize;
                if slot < row.atoms.len() {
                    row.atoms[slot].colour = packet.data as u8;
                    if !packet.is_header_only() {
                        row.atoms[slot].set_text(packet.payload_bytes());
                    }
                }
                self.view.update_cell(car, subtype as i32);

                if self.state.event_type == Some(EventType::Race)
                    && subtype == ATOM_RACE_INTERVAL
                    && self.state.car(car).map(|r| r.position) == Some(1)
                {
                    self.state.laps_completed = parse_leading_decimal(packet.payload_bytes());
                    self.view.update_status();
                }
            }
        }
    }

    fn handle_system_packet(&mut self, packet: &Packet) {
        match SystemPacketKind::from_wire(packet.kind) {
            SystemPacketKind::EventId => {
                let event_type = EventType::from_data(packet.data);
                self.state.reset_for_new_event(event_type);
                self.commentary = CommentaryBuffer::default();
                self.view.clear_board();
                self.view.info(3, "new event");
            }
            SystemPacketKind::KeyFrame => {
                self.state.salt = live_timing_cipher::CRYPTO_SEED;
            }
            SystemPacketKind::ValidMarker => {}
            SystemPacketKind::Commentary => {
                if let Some(message) = self.commentary.feed(packet.payload_bytes()) {
                    self.view.info(1, message.trim());
                }
            }
            SystemPacketKind::RefreshRate => {}
            SystemPacketKind::Notice => {
                self.view.info(0, &String::from_utf8_lossy(packet.payload_bytes()));
            }
            SystemPacketKind::Timestamp => {}
            SystemPacketKind::Weather => self.handle_weather(packet),
            SystemPacketKind::Speed => self.handle_speed(packet),
            SystemPacketKind::TrackStatus => {
                if packet.data == 1 {
                    if let Some(&digit) = packet.payload_bytes().first() {
                        self.state.flag = FlagStatus::from_digit(digit - b'0');
                        self.view.update_status();
                    }
                }
            }
            SystemPacketKind::Copyright => {
                self.view.info(2, &String::from_utf8_lossy(packet.payload_bytes()));
            }
            SystemPacketKind::UserSysTotalLaps => {
                self.state.total_laps = packet.data as u32;
                self.view.update_status();
            }
            SystemPacketKind::UserSysKey => {
                if packet.data & 1 != 0 {
                    let bytes = packet.payload_bytes();
                    if bytes.len() >= 4 {
                        self.state.decryption_key = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    }
                }
            }
            SystemPacketKind::Unknown(_) => {}
        }
    }

    fn handle_weather(&mut self, packet: &Packet) {
        let text = String::from_utf8_lossy(packet.payload_bytes());
        match WeatherField::from_data(packet.data) {
            WeatherField::SessionClock => {
                // Sent roughly once a minute in `H:MM:SS`; a -1-length
                // packet just marks a minute passing without a fresh
                // reading, and is how we notice a session has started.
                if packet.len > 0 {
                    if let Some(seconds) = parse_colon_clock(&text) {
                        if self.state.epoch_time != 0 {
                            self.state.epoch_time = self.now;
                        }
                        self.state.remaining_time = seconds;
                    }
                } else {
                    self.state.epoch_time = self.now;
                }
                self.view.close_popup();
                self.view.update_time();
            }
            WeatherField::TrackTemp => {
                self.state.track_temp = text.trim().parse().unwrap_or(self.state.track_temp);
                self.view.update_status();
            }
            WeatherField::AirTemp => {
                self.state.air_temp = text.trim().parse().unwrap_or(self.state.air_temp);
                self.view.update_status();
            }
            WeatherField::Humidity => {
                self.state.humidity = text.trim().parse().unwrap_or(self.state.humidity);
                self.view.update_status();
            }
            WeatherField::Pressure => {
                let digits: String = text.chars().filter(|c| *c != '.').collect();
                self.state.pressure = digits.parse().unwrap_or(self.state.pressure);
                self.view.update_status();
            }
            WeatherField::WindSpeed => {
                let digits: String = text.chars().filter(|c| *c != '.').collect();
                self.state.wind_speed = digits.parse().unwrap_or(self.state.wind_speed);
                self.view.update_status();
            }
            WeatherField::WindDirection => {
                self.state.wind_direction = text.trim().parse().unwrap_or(self.state.wind_direction);
                self.view.update_status();
            }
            WeatherField::Unknown(_) => {}
        }
    }

    fn handle_speed(&mut self, packet: &Packet) {
        let bytes = packet.payload_bytes();
        let Some((&selector, rest)) = bytes.split_first() else {
            return;
        };
        let text = String::from_utf8_lossy(rest).trim().to_string();
        match SpeedField::from_byte(selector) {
            SpeedField::FastestLapCar => self.state.fastest_lap.car = text,
            SpeedField::FastestLapDriver => self.state.fastest_lap.driver = text,
            SpeedField::FastestLapTime => self.state.fastest_lap.time = text,
            SpeedField::FastestLapNumber => self.state.fastest_lap.lap = text,
            SpeedField::Unknown(_) => return,
        }
        self.view.update_status();
    }
}
