//! The wire packet model: [`Packet`], the closed sets of system and car
//! packet kinds, and the fixed-size atom cell the updater mutates.

/// Upper bound (inclusive) on the car index encoded in a packet header.
/// The header's car field is 5 bits (`byte0 & 0x1F`), so this is also the
/// largest value that field can represent.
pub const MAX_CAR_NUMBER: i32 = 31;

/// Capacity of a packet's payload buffer in bytes.
pub const PAYLOAD_CAPACITY: usize = 128;

/// A single decoded packet from the wire.
///
/// `car == 0` denotes a system packet; otherwise `car` is the car's grid
/// start position, not its race number. `len == -1` means a header-only
/// "colour-only change" atom with no payload bytes. Payload bytes beyond
/// `len` are always zero-filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub car: i32,
    pub kind: i32,
    pub data: i32,
    pub len: i32,
    pub at: i64,
    pub payload: [u8; PAYLOAD_CAPACITY],
}

impl Packet {
    /// Build a packet with a zero-filled payload, copying at most `len`
    /// bytes (or all of `bytes` if shorter) from `bytes`.
    pub fn new(car: i32, kind: i32, data: i32, len: i32, at: i64, bytes: &[u8]) -> Self {
        let mut payload = [0u8; PAYLOAD_CAPACITY];
        if len > 0 {
            let n = (len as usize).min(bytes.len()).min(PAYLOAD_CAPACITY);
            payload[..n].copy_from_slice(&bytes[..n]);
        }
        Self {
            car,
            kind,
            data,
            len,
            at,
            payload,
        }
    }

    /// True for a system packet (`car == 0`).
    pub fn is_system(&self) -> bool {
        self.car == 0
    }

    /// True for a header-only, colour-only change atom.
    pub fn is_header_only(&self) -> bool {
        self.len == -1
    }

    /// The payload bytes actually in use, per `len` (empty for header-only
    /// or zero-length packets).
    pub fn payload_bytes(&self) -> &[u8] {
        if self.len <= 0 {
            &[]
        } else {
            let n = (self.len as usize).min(PAYLOAD_CAPACITY);
            &self.payload[..n]
        }
    }
}

/// Closed set of system packet kinds (`car == 0`). Two entries,
/// [`SystemPacketKind::UserSysTotalLaps`] and
/// [`SystemPacketKind::UserSysKey`], are synthesized locally rather than
/// received from the wire (see design §4.5/§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemPacketKind {
    EventId,
    KeyFrame,
    ValidMarker,
    Commentary,
    RefreshRate,
    Notice,
    Timestamp,
    Weather,
    Speed,
    TrackStatus,
    Copyright,
    UserSysTotalLaps,
    UserSysKey,
    Unknown(i32),
}

impl SystemPacketKind {
    pub fn from_wire(kind: i32) -> Self {
        match kind {
            1 => SystemPacketKind::EventId,
            2 => SystemPacketKind::KeyFrame,
            3 => SystemPacketKind::ValidMarker,
            4 => SystemPacketKind::Commentary,
            5 => SystemPacketKind::RefreshRate,
            6 => SystemPacketKind::Notice,
            7 => SystemPacketKind::Timestamp,
            8 => SystemPacketKind::Weather,
            9 => SystemPacketKind::Speed,
            10 => SystemPacketKind::TrackStatus,
            12 => SystemPacketKind::Copyright,
            14 => SystemPacketKind::UserSysTotalLaps,
            15 => SystemPacketKind::UserSysKey,
            other => SystemPacketKind::Unknown(other),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            SystemPacketKind::EventId => 1,
            SystemPacketKind::KeyFrame => 2,
            SystemPacketKind::ValidMarker => 3,
            SystemPacketKind::Commentary => 4,
            SystemPacketKind::RefreshRate => 5,
            SystemPacketKind::Notice => 6,
            SystemPacketKind::Timestamp => 7,
            SystemPacketKind::Weather => 8,
            SystemPacketKind::Speed => 9,
            SystemPacketKind::TrackStatus => 10,
            SystemPacketKind::Copyright => 12,
            SystemPacketKind::UserSysTotalLaps => 14,
            SystemPacketKind::UserSysKey => 15,
            SystemPacketKind::Unknown(other) => other,
        }
    }
}

/// Closed set of car packet kinds (`car != 0`). A data atom's numeric
/// subtype also names a cell in the car's row; only the two subtypes the
/// core behavior depends on (the race-number atom, used by the decryption
/// validator, and the interval atom, used to derive completed laps) are
/// given names here. All other atom slots are event-type-specific text
/// cells addressed by their raw subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarPacketKind {
    PositionUpdate,
    PositionHistory,
    Atom(u8),
}

/// Car atom subtype carrying the car's displayed race number. Its
/// payload must satisfy `^[1-9][0-9]?$|^$` after decryption.
pub const ATOM_NUMBER: u8 = 1;

/// Car atom subtype carrying a RACE event's gap/interval text; when this
/// atom belongs to the car currently in position 1, its decimal payload
/// is also the number of laps completed.
pub const ATOM_RACE_INTERVAL: u8 = 4;

/// Subtype reserved for the long-encoded, currently-unprocessed position
/// history packet.
const CAR_POSITION_HISTORY_SUBTYPE: i32 = 15;

impl CarPacketKind {
    pub fn from_wire(kind: i32) -> Self {
        match kind {
            0 => CarPacketKind::PositionUpdate,
            k if k == CAR_POSITION_HISTORY_SUBTYPE => CarPacketKind::PositionHistory,
            k => CarPacketKind::Atom(k as u8),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            CarPacketKind::PositionUpdate => 0,
            CarPacketKind::PositionHistory => CAR_POSITION_HISTORY_SUBTYPE,
            CarPacketKind::Atom(slot) => slot as i32,
        }
    }
}

/// A single cell of a car's row: a short text plus its colour code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarAtom {
    pub colour: u8,
    pub text: [u8; 16],
}

impl Default for CarAtom {
    fn default() -> Self {
        Self {
            colour: 0,
            text: [0u8; 16],
        }
    }
}

impl CarAtom {
    /// Set the text from payload bytes, truncating to 15 bytes and
    /// zero-padding the rest, matching the original's `char text[16]`
    /// null-terminated-string convention.
    pub fn set_text(&mut self, bytes: &[u8]) {
        self.text = [0u8; 16];
        let n = bytes.len().min(15);
        self.text[..n].copy_from_slice(&bytes[..n]);
    }

    pub fn text_str(&self) -> &str {
        let end = self.text.iter().position(|&b| b == 0).unwrap_or(16);
        std::str::from_utf8(&self.text[..end]).unwrap_or("")
    }
}

/// Event type, attaching meaning to each car atom slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Race = 1,
    Practice = 2,
    Qualifying = 3,
}

impl EventType {
    pub fn from_data(data: i32) -> Option<Self> {
        match data {
            1 => Some(EventType::Race),
            2 => Some(EventType::Practice),
            3 => Some(EventType::Qualifying),
            _ => None,
        }
    }
}

/// Current track status / flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagStatus {
    Green = 1,
    Yellow = 2,
    SafetyCarStandby = 3,
    SafetyCarDeployed = 4,
    Red = 5,
}

impl FlagStatus {
    pub fn from_digit(d: u8) -> Option<Self> {
        match d {
            1 => Some(FlagStatus::Green),
            2 => Some(FlagStatus::Yellow),
            3 => Some(FlagStatus::SafetyCarStandby),
            4 => Some(FlagStatus::SafetyCarDeployed),
            5 => Some(FlagStatus::Red),
            _ => None,
        }
    }
}

/// `SYS_WEATHER` sub-field, selected by the packet's `data` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherField {
    SessionClock,
    TrackTemp,
    AirTemp,
    Humidity,
    Pressure,
    WindSpeed,
    WindDirection,
    Unknown(i32),
}

impl WeatherField {
    pub fn from_data(data: i32) -> Self {
        match data {
            0 => WeatherField::SessionClock,
            1 => WeatherField::TrackTemp,
            2 => WeatherField::AirTemp,
            3 => WeatherField::Humidity,
            4 => WeatherField::Pressure,
            5 => WeatherField::WindSpeed,
            6 => WeatherField::WindDirection,
            other => WeatherField::Unknown(other),
        }
    }
}

/// `SYS_SPEED` sub-field, selected by the first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedField {
    FastestLapCar,
    FastestLapDriver,
    FastestLapTime,
    FastestLapNumber,
    Unknown(u8),
}

impl SpeedField {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => SpeedField::FastestLapCar,
            1 => SpeedField::FastestLapDriver,
            2 => SpeedField::FastestLapTime,
            3 => SpeedField::FastestLapNumber,
            other => SpeedField::Unknown(other),
        }
    }

    /// Expected text length for this sub-field (bytes after the selector byte).
    pub fn text_len(self) -> usize {
        match self {
            SpeedField::FastestLapCar => 2,
            SpeedField::FastestLapDriver => 14,
            SpeedField::FastestLapTime => 8,
            SpeedField::FastestLapNumber => 2,
            SpeedField::Unknown(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_new_pads_payload() {
        let p = Packet::new(0, 6, 0, 5, 100, b"hello");
        assert_eq!(&p.payload[..5], b"hello");
        assert_eq!(&p.payload[5..], &[0u8; 123][..]);
    }

    #[test]
    fn header_only_has_no_payload_bytes() {
        let p = Packet::new(1, 1, 3, -1, 0, &[]);
        assert!(p.is_header_only());
        assert_eq!(p.payload_bytes(), &[] as &[u8]);
    }

    #[test]
    fn system_kind_round_trips() {
        for k in [
            SystemPacketKind::EventId,
            SystemPacketKind::KeyFrame,
            SystemPacketKind::Weather,
            SystemPacketKind::UserSysKey,
        ] {
            assert_eq!(SystemPacketKind::from_wire(k.to_wire()), k);
        }
    }

    #[test]
    fn car_atom_text_truncates_and_pads() {
        let mut atom = CarAtom::default();
        atom.set_text(b"VERSTAPPEN-MAX-EXTRA");
        assert_eq!(atom.text_str(), "VERSTAPPEN-MAX-");
    }
}
