//! Known-plaintext key recovery.
//!
//! The feed always opens a session with a fixed `NOTICE` packet, the
//! fifteen-byte phrase `"Please Wait ..."`. Since the keystream only
//! depends on the salt and the 32-bit key, observing that phrase both in
//! the clear (its expected bytes) and encrypted (the bytes actually on
//! the wire) is enough to recover the key one bit at a time, starting
//! from the low byte and working up through the high bit.

use crate::cipher::CRYPTO_SEED;
use live_timing_protocol::{Packet, SystemPacketKind};

const START_PHRASE: &[u8] = b"Please Wait ...";

/// Where a [`KeyReverser`] is in the recovery process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverserStatus {
    /// Waiting for the session-opening `NOTICE` packet.
    Start,
    /// Start phrase matched; absorbing further encrypted bytes to pin
    /// down the remaining key bits.
    InProgress,
    /// All 32 key bits are known.
    Success,
    /// The observed bytes are inconsistent with any key, or the start
    /// phrase never arrived in the expected form.
    Failure,
    /// The session turned out to be unencrypted (the `NOTICE` payload
    /// was an `img:` URL rather than the start phrase).
    Plaintext,
}

/// Bit-by-bit known-plaintext key recovery state machine.
pub struct KeyReverser {
    key: u32,
    salt: u32,
    mask: u32,
    status: ReverserStatus,
    /// Count of ciphertext bytes consumed so far, independent of `mask`.
    /// Used to know how many feedback steps `replay_salt` must redo after
    /// a guessed key bit turns out wrong.
    pos: u32,
}

impl Default for KeyReverser {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyReverser {
    pub fn new() -> Self {
        let mut r = Self {
            key: 0,
            salt: 0,
            mask: 0,
            status: ReverserStatus::Start,
            pos: 0,
        };
        r.reset();
        r
    }

    /// Start over. Called on construction and whenever the caller
    /// observes an `EVENT_ID` or `KEY_FRAME` packet, both of which mark a
    /// new session with a (possibly different) key.
    pub fn reset(&mut self) {
        self.key = 0x8000_0000;
        self.salt = CRYPTO_SEED;
        self.mask = 0;
        self.status = ReverserStatus::Start;
        self.pos = 0;
    }

    pub fn status(&self) -> ReverserStatus {
        self.status
    }

    /// The recovered key, valid once [`Self::status`] is
    /// [`ReverserStatus::Success`] or [`ReverserStatus::Plaintext`] (where
    /// it reads zero).
    pub fn key(&self) -> u32 {
        self.key
    }

    /// True for packets that should reset an in-progress reverser: the
    /// start of a new event, or a new key frame.
    pub fn is_reset_trigger(packet: &Packet) -> bool {
        packet.is_system()
            && matches!(
                SystemPacketKind::from_wire(packet.kind),
                SystemPacketKind::EventId | SystemPacketKind::KeyFrame
            )
    }

    /// Replay the salt from the seed through `through_bits` feedback
    /// steps using the current key guess. Used after a guessed bit turns
    /// out wrong: the key changed, so the running salt has to be
    /// recomputed from scratch rather than patched in place.
    fn replay_salt(&mut self, through_bits: u32) {
        let mut salt = CRYPTO_SEED;
        for _ in 0..through_bits {
            salt = (salt >> 1) ^ if salt & 0x01 != 0 { self.key } else { 0 };
        }
        self.salt = salt;
    }

    /// Consume the first ciphertext byte against the first plaintext
    /// byte, which alone fixes the low 8 bits of the key (`salt`'s low
    /// byte is known after one feedback step from the `0x5555_5555`
    /// seed: it's always odd, so this step's high bit contributes to the
    /// key unconditionally).
    fn first_byte(&mut self, diff: u8) {
        self.salt >>= 1;
        self.key = (diff as u32) ^ self.salt;
        self.mask = 0xFF;
        self.salt ^= self.key;
    }

    /// Consume one further ciphertext byte, tightening `mask` by one bit
    /// or failing outright. `diff` is the ciphertext byte XORed with the
    /// expected plaintext byte when `strict`, or the raw ciphertext byte
    /// (an opaque MSB-zero check only) once recovery has moved past the
    /// start phrase. `self.pos` (the count of bytes already consumed,
    /// not `mask`'s bit count) is what `replay_salt` needs to redo the
    /// feedback correctly after a guessed bit turns out wrong.
    fn next_byte(&mut self, diff: u8, strict: bool) {
        let carry = self.salt & 0x01;
        self.salt >>= 1;
        if carry != 0 {
            self.salt ^= self.key;
        }

        if strict && (diff & 0x7F) as u32 != self.salt & 0x7F {
            self.status = ReverserStatus::Failure;
            return;
        }

        if (diff & 0x80) as u32 != self.salt & 0x80 {
            self.key ^= self.mask + 1;
            self.replay_salt(self.pos + 1);
        }
        if (diff & 0x80) as u32 != self.salt & 0x80 {
            self.status = ReverserStatus::Failure;
            return;
        }

        self.mask = (self.mask << 1) | 1;
        if self.mask == u32::MAX {
            self.status = ReverserStatus::Success;
        }
        self.pos += 1;
    }

    /// Feed one encrypted system packet into the reverser. `raw` is the
    /// still-encrypted payload bytes as they arrived on the wire, before
    /// any decryption attempt.
    pub fn feed_system_packet(&mut self, kind: SystemPacketKind, raw: &[u8]) {
        match self.status {
            ReverserStatus::Failure | ReverserStatus::Success | ReverserStatus::Plaintext => return,
            ReverserStatus::Start => self.feed_start(kind, raw),
            ReverserStatus::InProgress => self.feed_in_progress(kind, raw),
        }
    }

    fn feed_start(&mut self, kind: SystemPacketKind, raw: &[u8]) {
        if kind != SystemPacketKind::Notice {
            self.status = ReverserStatus::Failure;
            return;
        }
        if raw.len() != START_PHRASE.len() {
            if raw.starts_with(b"img:") {
                self.status = ReverserStatus::Plaintext;
                self.key = 0;
            } else {
                self.status = ReverserStatus::Failure;
            }
            return;
        }

        self.first_byte(raw[0] ^ START_PHRASE[0]);
        self.pos = 1;
        for (i, &byte) in raw.iter().enumerate().skip(1) {
            self.next_byte(byte ^ START_PHRASE[i], true);
            if self.status == ReverserStatus::Failure {
                return;
            }
        }
        self.status = ReverserStatus::InProgress;
    }

    fn feed_in_progress(&mut self, kind: SystemPacketKind, raw: &[u8]) {
        if matches!(kind, SystemPacketKind::Commentary | SystemPacketKind::Notice) {
            // Variable-length, non-fixed-prefix payloads; the original
            // plaintext isn't known so these can't tighten the key further.
            self.status = ReverserStatus::Failure;
            return;
        }
        for &byte in raw {
            self.next_byte(byte, false);
            if self.status != ReverserStatus::InProgress {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::Cipher;

    fn encrypt(key: u32, bytes: &[u8]) -> Vec<u8> {
        let mut cipher = Cipher::new();
        let mut buf = bytes.to_vec();
        cipher.decrypt(key, &mut buf);
        buf
    }

    #[test]
    fn recovers_key_from_start_phrase_and_followup_bytes() {
        let key = 0xA53C_91F0u32;
        let mut reverser = KeyReverser::new();

        let ciphertext = encrypt(key, START_PHRASE);
        reverser.feed_system_packet(SystemPacketKind::Notice, &ciphertext);
        assert_eq!(reverser.status(), ReverserStatus::InProgress);

        // Encrypt the start phrase plus trailing bytes together with a
        // freshly seeded cipher, so the trailing ciphertext reflects the
        // salt's actual progression past the start phrase.
        let mut trailing_plain = Vec::new();
        for i in 0..64u8 {
            trailing_plain.push(i.wrapping_mul(7).wrapping_add(3));
        }
        let mut full_cipher = Cipher::new();
        let mut full_plain = START_PHRASE.to_vec();
        full_plain.extend_from_slice(&trailing_plain);
        let mut full_cipher_bytes = full_plain.clone();
        full_cipher.decrypt(key, &mut full_cipher_bytes);
        let trailing_cipher = &full_cipher_bytes[START_PHRASE.len()..];

        reverser.feed_system_packet(SystemPacketKind::Weather, trailing_cipher);
        assert_eq!(reverser.status(), ReverserStatus::Success);
        assert_eq!(reverser.key(), key);
    }

    #[test]
    fn detects_plaintext_session() {
        let mut reverser = KeyReverser::new();
        reverser.feed_system_packet(SystemPacketKind::Notice, b"img:http://example/logo.png");
        assert_eq!(reverser.status(), ReverserStatus::Plaintext);
        assert_eq!(reverser.key(), 0);
    }

    #[test]
    fn wrong_length_non_url_notice_fails() {
        let mut reverser = KeyReverser::new();
        reverser.feed_system_packet(SystemPacketKind::Notice, b"short");
        assert_eq!(reverser.status(), ReverserStatus::Failure);
    }

    #[test]
    fn reset_triggers_cover_event_id_and_key_frame() {
        let event = Packet::new(0, SystemPacketKind::EventId.to_wire(), 0, 1, 0, b"X");
        let key_frame = Packet::new(0, SystemPacketKind::KeyFrame.to_wire(), 0, 0, 0, &[]);
        let weather = Packet::new(0, SystemPacketKind::Weather.to_wire(), 0, 1, 0, b"1");
        assert!(KeyReverser::is_reset_trigger(&event));
        assert!(KeyReverser::is_reset_trigger(&key_frame));
        assert!(!KeyReverser::is_reset_trigger(&weather));
    }
}
