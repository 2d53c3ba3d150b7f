//! HTTP-driven auth/key/keyframe/total-laps acquisition state machine.

pub mod acquirer;
pub mod transport;

pub use acquirer::{
    Acquirer, OBTAINING_ALL, OBTAINING_AUTH, OBTAINING_CONNECT, OBTAINING_FRAME, OBTAINING_KEY,
    OBTAINING_TOTALLAPS,
};
pub use transport::{HttpResponse, ReqwestTransport, Transport};
