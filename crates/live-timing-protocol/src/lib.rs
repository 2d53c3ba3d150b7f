//! Wire packet model and framer for the live-timing stream engine.
//!
//! `car == 0` packets are system packets; everything else is a car
//! packet whose `car` index is the car's grid start position, not its
//! race number. See [`packet::Packet`] for the full layout.

pub mod framer;
pub mod packet;

pub use framer::Framer;
pub use packet::{
    CarAtom, CarPacketKind, EventType, FlagStatus, Packet, SpeedField, SystemPacketKind,
    WeatherField, ATOM_NUMBER, ATOM_RACE_INTERVAL, MAX_CAR_NUMBER, PAYLOAD_CAPACITY,
};
