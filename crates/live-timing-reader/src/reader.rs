//! The pre-handler: every packet observed on the live stream (or inside
//! a key frame body) passes through [`Reader::pre_handle_packet`] before
//! it is durable in the encrypted cache. It feeds the key reverser,
//! drives the acquirer's `EVENT_ID`/`KEY_FRAME` transitions, and detects
//! a cipher switch so the model knows to wait for a fresh key.

use std::future::Future;
use std::pin::Pin;

use live_timing_acquirer::{Acquirer, Transport, OBTAINING_KEY, OBTAINING_TOTALLAPS};
use live_timing_cache::{PacketCache, PacketIterator};
use live_timing_cipher::{is_crypted, KeyReverser, ReverserStatus};
use live_timing_errors::ReaderError;
use live_timing_protocol::{Framer, Packet, SystemPacketKind};

fn parse_event_no(payload: &[u8]) -> u32 {
    let start = payload.iter().position(u8::is_ascii_digit).unwrap_or(payload.len());
    let mut value = 0u32;
    for &b in &payload[start..] {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.saturating_mul(10).saturating_add(u32::from(b - b'0'));
    }
    value
}

fn crypted_system_kind(packet: &Packet) -> Option<SystemPacketKind> {
    if packet.is_system() && is_crypted(packet) {
        Some(SystemPacketKind::from_wire(packet.kind))
    } else {
        None
    }
}

/// Owns the key reverser and acquisition state machine, and arbitrates
/// what reaches the encrypted cache.
pub struct Reader<T: Transport> {
    acquirer: Acquirer<T>,
    key_reverser: KeyReverser,
    /// -1 unknown, 0 plaintext, 1 encrypted. Mirrors `StateReader`'s
    /// `current_cipher` field.
    current_cipher: i32,
    committed: Option<(i32, u32)>,
    key_slot: Option<PacketIterator>,
    valid_frame: bool,
    new_event_no: Option<u32>,
    last_frame: Option<u32>,
    saving_time: i64,
}

impl<T: Transport> Reader<T> {
    pub fn new(acquirer: Acquirer<T>) -> Self {
        Self {
            acquirer,
            key_reverser: KeyReverser::new(),
            current_cipher: -1,
            committed: None,
            key_slot: None,
            valid_frame: true,
            new_event_no: None,
            last_frame: None,
            saving_time: 0,
        }
    }

    pub fn acquirer(&self) -> &Acquirer<T> {
        &self.acquirer
    }

    pub fn acquirer_mut(&mut self) -> &mut Acquirer<T> {
        &mut self.acquirer
    }

    pub fn current_cipher(&self) -> i32 {
        self.current_cipher
    }

    pub fn valid_frame(&self) -> bool {
        self.valid_frame
    }

    pub fn set_saving_time(&mut self, at: i64) {
        self.saving_time = at;
    }

    /// Run every packet from the live stream, or a key frame body, through
    /// the pre-handler. `from_frame` forces the packet into the encrypted
    /// cache regardless of what the pre-handler otherwise decides, and
    /// freezes the packet's cache timestamp to `saving_time` as set by
    /// the caller before the frame request was issued.
    pub fn pre_handle_packet<'a>(
        &'a mut self,
        encrypted: &'a mut PacketCache,
        packet: &'a Packet,
        from_frame: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReaderError>> + 'a>> {
        Box::pin(async move {
            if KeyReverser::is_reset_trigger(packet) {
                self.key_reverser.reset();
            } else if let Some(kind) = crypted_system_kind(packet) {
                self.key_reverser.feed_system_packet(kind, packet.payload_bytes());
                self.maybe_commit_from_reverser(encrypted)?;
            }

            self.detect_stale_plaintext(encrypted, packet)?;

            let dispatch_result = self.dispatch(encrypted, packet).await;
            if from_frame {
                encrypted.push(packet, self.saving_time)?;
                dispatch_result?;
            } else {
                dispatch_result?;
                encrypted.push(packet, self.saving_time)?;
            }
            Ok(())
        })
    }

    async fn dispatch(&mut self, encrypted: &mut PacketCache, packet: &Packet) -> Result<(), ReaderError> {
        if !packet.is_system() {
            return Ok(());
        }
        match SystemPacketKind::from_wire(packet.kind) {
            SystemPacketKind::EventId => self.handle_event_id(encrypted, packet).await,
            SystemPacketKind::KeyFrame => self.handle_key_frame(encrypted, packet).await,
            _ => Ok(()),
        }
    }

    async fn handle_event_id(&mut self, encrypted: &mut PacketCache, packet: &Packet) -> Result<(), ReaderError> {
        let event_no = parse_event_no(packet.payload_bytes());
        self.new_event_no = Some(event_no);

        let marker = Packet::new(0, SystemPacketKind::UserSysKey.to_wire(), 0, 0, self.saving_time, &[]);
        let slot = encrypted.push(&marker, self.saving_time)?;
        self.key_slot = Some(slot);
        self.committed = None;

        if !self.acquirer.is_obtaining(OBTAINING_TOTALLAPS) {
            match self.acquirer.request_total_laps().await {
                Ok(total_laps) => {
                    let laps_packet = Packet::new(
                        0,
                        SystemPacketKind::UserSysTotalLaps.to_wire(),
                        total_laps as i32,
                        0,
                        self.saving_time,
                        &[],
                    );
                    encrypted.push(&laps_packet, self.saving_time)?;
                }
                Err(e) => tracing::warn!(error = %e, "total laps request failed"),
            }
        }
        Ok(())
    }

    async fn handle_key_frame(&mut self, encrypted: &mut PacketCache, packet: &Packet) -> Result<(), ReaderError> {
        let frame = if packet.payload_bytes().len() >= 4 {
            u32::from_le_bytes([
                packet.payload[0],
                packet.payload[1],
                packet.payload[2],
                packet.payload[3],
            ])
        } else {
            0
        };
        if self.last_frame.is_some_and(|last| frame <= last) {
            return Ok(());
        }

        let body = self.acquirer.request_key_frame(Some(frame)).await?;
        self.last_frame = Some(frame);

        let mut framer = Framer::new();
        framer.feed(&body);
        for framed in framer.drain_packets(self.saving_time) {
            self.pre_handle_packet(encrypted, &framed, true).await?;
        }

        // Only after a frame has been fetched may a key be requested: the
        // server returns a null key otherwise.
        if let Some(event_no) = self.new_event_no {
            if self.committed.is_none() && !self.acquirer.is_obtaining(OBTAINING_KEY) {
                match self.acquirer.request_key(event_no).await {
                    Ok(key) => {
                        let cipher_mode = i32::from(key != 0);
                        self.commit_key(encrypted, cipher_mode, key)?;
                    }
                    Err(e) => tracing::warn!(error = %e, "key request failed; falling back to key reversal"),
                }
            }
        }
        Ok(())
    }

    fn maybe_commit_from_reverser(&mut self, encrypted: &mut PacketCache) -> Result<(), ReaderError> {
        match self.key_reverser.status() {
            ReverserStatus::Success => {
                let key = self.key_reverser.key();
                self.commit_key(encrypted, 1, key)
            }
            ReverserStatus::Plaintext => self.commit_key(encrypted, 0, 0),
            _ => Ok(()),
        }
    }

    /// Overwrite the persisted `USER_SYS_KEY` slot with `data =
    /// (cipher<<1)|1`, carrying both the cipher mode and the "confidence"
    /// bit. A no-op if this exact (cipher, key) pair is already committed.
    fn commit_key(&mut self, encrypted: &mut PacketCache, cipher_mode: i32, key: u32) -> Result<(), ReaderError> {
        if self.committed == Some((cipher_mode, key)) {
            return Ok(());
        }
        let slot = match self.key_slot {
            Some(s) => s,
            None => return Ok(()),
        };
        let data = (cipher_mode << 1) | 1;
        let packet = Packet::new(0, SystemPacketKind::UserSysKey.to_wire(), data, 4, self.saving_time, &key.to_le_bytes());
        encrypted.write(&slot, &packet)?;

        if self.current_cipher != -1 && self.current_cipher != cipher_mode {
            self.invalidate_frame_and_wait_for_key(encrypted)?;
        }
        self.current_cipher = cipher_mode;
        self.committed = Some((cipher_mode, key));
        Ok(())
    }

    /// A crypted packet arrived while we believe we're in plaintext mode
    /// and the reverser isn't mid-handshake for it: the session's cipher
    /// mode changed out from under us.
    fn detect_stale_plaintext(&mut self, encrypted: &mut PacketCache, packet: &Packet) -> Result<(), ReaderError> {
        if self.current_cipher == 0 && is_crypted(packet) && self.key_reverser.status() != ReverserStatus::Start {
            self.invalidate_frame_and_wait_for_key(encrypted)?;
        }
        Ok(())
    }

    fn invalidate_frame_and_wait_for_key(&mut self, encrypted: &mut PacketCache) -> Result<(), ReaderError> {
        self.valid_frame = false;
        let marker = Packet::new(0, SystemPacketKind::UserSysKey.to_wire(), 0, 0, self.saving_time, &[]);
        let slot = encrypted.push(&marker, self.saving_time)?;
        self.key_slot = Some(slot);
        self.committed = None;
        self.key_reverser.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use live_timing_acquirer::HttpResponse;
    use live_timing_errors::AcquirerError;
    use live_timing_protocol::EventType;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct FakeTransport {
        get_response: Mutex<Option<HttpResponse>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn post_form(&self, _host: &str, _path: &str, _form: &str) -> Result<HttpResponse, AcquirerError> {
            Ok(HttpResponse::default())
        }

        async fn get(&self, _host: &str, _path: &str) -> Result<HttpResponse, AcquirerError> {
            Ok(self.get_response.lock().expect("lock").clone().unwrap_or_default())
        }
    }

    fn open_cache() -> (NamedTempFile, PacketCache) {
        let file = NamedTempFile::new().expect("tmp file");
        let cache = PacketCache::open(file.path(), false).expect("open for recording");
        (file, cache)
    }

    #[tokio::test]
    async fn plaintext_notice_commits_key_and_overwrites_marker() {
        let acquirer = Acquirer::new(FakeTransport::default(), "auth", "data");
        let mut reader = Reader::new(acquirer);
        let (_tmp, mut cache) = open_cache();

        let event = Packet::new(0, SystemPacketKind::EventId.to_wire(), EventType::Race as i32, 6, 0, b"X12345");
        reader.pre_handle_packet(&mut cache, &event, false).await.expect("event id");

        let notice = Packet::new(0, SystemPacketKind::Notice.to_wire(), 0, 20, 1, b"img:no-session-here");
        reader.pre_handle_packet(&mut cache, &notice, false).await.expect("notice");

        assert_eq!(reader.current_cipher(), 0);

        let mut it = PacketIterator::default();
        let first = cache.get(&mut it).expect("get").expect("present");
        assert_eq!(first.kind, SystemPacketKind::UserSysKey.to_wire());
        assert_eq!(first.data, 1);
    }

    #[tokio::test]
    async fn ignores_non_system_packets_for_dispatch() {
        let acquirer = Acquirer::new(FakeTransport::default(), "auth", "data");
        let mut reader = Reader::new(acquirer);
        let (_tmp, mut cache) = open_cache();

        let car_packet = Packet::new(1, 0, 2, 0, 0, &[]);
        reader.pre_handle_packet(&mut cache, &car_packet, false).await.expect("car packet");
        assert_eq!(reader.current_cipher(), -1);
        assert!(reader.valid_frame());
    }
}
