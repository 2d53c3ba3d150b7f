//! Chunked, file-backed, ref-counted packet cache.
//!
//! Packets accumulate in memory in fixed-size chunks. Chunks that fall
//! behind the write cursor and have no outstanding iterator are written
//! to the backing file and their buffers become reclaimable; the most
//! recently reclaimable chunk is reused in place of a fresh allocation
//! once more than [`MIN_CHUNKS_CACHE_SIZE`] chunks are idle. Index 0 in
//! the chunk table is never real data: it is the sentinel head of the
//! idle-chunk list, doubling as the idle count.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use live_timing_errors::CacheError;
use live_timing_protocol::Packet;

use crate::record::{decode, encode, RECORD_SIZE};

/// Packets held per in-memory chunk.
pub const PACKET_CHUNK_SIZE: usize = 1024;
/// Idle chunks beyond this count become reuse candidates for a newly
/// needed chunk instead of the new chunk allocating its own buffer.
pub const MIN_CHUNKS_CACHE_SIZE: usize = 4;

const SIGNATURE_TEXT: &[u8] = b"live-timing-cache file format v1";

fn signature_record() -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    let n = SIGNATURE_TEXT.len().min(RECORD_SIZE);
    buf[..n].copy_from_slice(&SIGNATURE_TEXT[..n]);
    buf
}

#[derive(Default)]
struct ChunkHolder {
    /// Outstanding iterator references for index > 0; reused as the idle
    /// list's element count for index 0.
    ref_count: usize,
    /// Idle-list links; meaningless while `ref_count > 0` or `data` is
    /// `None`. `0` terminates a traversal in either direction.
    prev: usize,
    next: usize,
    data: Option<Vec<u8>>,
}

/// Position within the cache. An `index` of zero means "unpositioned" —
/// the cache repositions it lazily to the first packet on first use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketIterator {
    index: usize,
    pos: usize,
}

impl PacketIterator {
    /// True once this iterator has been positioned by the cache (after
    /// its first use in [`PacketCache::to_start`], [`PacketCache::get`],
    /// or similar).
    pub fn is_positioned(&self) -> bool {
        self.index != 0
    }
}

/// Durable, chunked packet cache.
pub struct PacketCache {
    file: File,
    chunks: Vec<ChunkHolder>,
    itpush: PacketIterator,
    itwrite: PacketIterator,
}

impl PacketCache {
    /// Open (replay mode) or create (recording mode) the backing file at
    /// `path` and position the cache at its last saved packet.
    pub fn open(path: &Path, replay_mode: bool) -> Result<Self, CacheError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(!replay_mode)
            .create(!replay_mode)
            .truncate(!replay_mode)
            .open(path)
            .map_err(|_| CacheError::File)?;

        if replay_mode {
            let mut sig = [0u8; RECORD_SIZE];
            file.seek(SeekFrom::Start(0)).map_err(|_| CacheError::File)?;
            file.read_exact(&mut sig).map_err(|_| CacheError::Version)?;
            if sig != signature_record() {
                return Err(CacheError::Version);
            }
        } else {
            let sig = signature_record();
            file.seek(SeekFrom::Start(0)).map_err(|_| CacheError::File)?;
            file.write_all(&sig).map_err(|_| CacheError::File)?;
        }

        let mut cache = Self {
            file,
            chunks: vec![ChunkHolder::default()],
            itpush: PacketIterator::default(),
            itwrite: PacketIterator::default(),
        };
        cache.load_final_packet()?;
        Ok(cache)
    }

    fn file_packet_count(&mut self) -> Result<usize, CacheError> {
        let end = self.file.seek(SeekFrom::End(0)).map_err(|_| CacheError::File)?;
        let data_bytes = end.checked_sub(RECORD_SIZE as u64).ok_or(CacheError::File)?;
        Ok((data_bytes / RECORD_SIZE as u64) as usize)
    }

    fn seek_to_packet(&mut self, packet_offset: usize) -> Result<(), CacheError> {
        let bytes = (packet_offset as u64)
            .checked_add(1)
            .and_then(|n| n.checked_mul(RECORD_SIZE as u64))
            .ok_or(CacheError::Overflow)?;
        self.file.seek(SeekFrom::Start(bytes)).map_err(|_| CacheError::File)?;
        Ok(())
    }

    fn read_records(&mut self, dest: &mut [u8]) -> Result<(), CacheError> {
        self.file.read_exact(dest).map_err(|_| CacheError::File)
    }

    fn write_records(&mut self, src: &[u8]) -> Result<usize, CacheError> {
        self.file.write_all(src).map_err(|_| CacheError::File)?;
        Ok(src.len() / RECORD_SIZE)
    }

    fn reserve_space_for_holder(&mut self, new_index: usize) -> Result<(), CacheError> {
        if new_index < self.chunks.len() {
            return Ok(());
        }
        let current_cap = self.chunks.len();
        let doubled = current_cap.checked_mul(2).unwrap_or(usize::MAX);
        let new_cap = doubled
            .max(new_index)
            .checked_add(1)
            .ok_or(CacheError::Overflow)?;
        if new_index >= new_cap {
            return Err(CacheError::Overflow);
        }
        self.chunks
            .try_reserve(new_cap - current_cap)
            .map_err(|_| CacheError::Nomem)?;
        self.chunks.resize_with(new_cap, ChunkHolder::default);
        Ok(())
    }

    fn push_to_idle(&mut self, index: usize) {
        debug_assert!(index > 0);
        // `chunks[0].next` is the list front; when the list is empty this
        // targets `chunks[0].prev` itself, planting the tail pointer that
        // `lock_chunk` reads to find the oldest idle chunk.
        let old_front = self.chunks[0].next;
        self.chunks[old_front].prev = index;
        self.chunks[index].next = old_front;
        self.chunks[0].next = index;
        self.chunks[index].prev = 0;
        self.chunks[0].ref_count += 1;
    }

    fn pop_from_idle(&mut self, index: usize) {
        debug_assert!(index > 0);
        let (prev, next) = (self.chunks[index].prev, self.chunks[index].next);
        self.chunks[prev].next = next;
        // Same unconditional write as above: removing the tail (next == 0)
        // must update `chunks[0].prev`, not skip it.
        self.chunks[next].prev = prev;
        self.chunks[index].prev = 0;
        self.chunks[index].next = 0;
        self.chunks[0].ref_count -= 1;
    }

    fn release_chunk(&mut self, index: usize) {
        if index == 0 {
            return;
        }
        let holder = &mut self.chunks[index];
        debug_assert!(holder.ref_count > 0);
        holder.ref_count -= 1;
        if holder.ref_count == 0 && holder.data.is_some() && index < self.itwrite.index {
            self.push_to_idle(index);
        }
    }

    fn intercept_ownership(&mut self, into: usize, from_idle: usize) {
        let data = self.chunks[from_idle].data.take();
        self.chunks[into].data = data;
        if from_idle != 0 {
            self.pop_from_idle(from_idle);
        }
    }

    fn lock_chunk(&mut self, index: usize) -> Result<(), CacheError> {
        if self.chunks[index].ref_count == usize::MAX {
            return Err(CacheError::Overflow);
        }
        if self.chunks[index].data.is_some() {
            self.chunks[index].ref_count += 1;
            return Ok(());
        }

        let mut idle_tail = self.chunks[0].prev;
        if idle_tail != 0 && self.chunks[0].ref_count > MIN_CHUNKS_CACHE_SIZE {
            self.intercept_ownership(index, idle_tail);
        }
        if self.chunks[index].data.is_none() {
            let mut buf = Vec::new();
            if buf.try_reserve_exact(PACKET_CHUNK_SIZE * RECORD_SIZE).is_ok() {
                buf.resize(PACKET_CHUNK_SIZE * RECORD_SIZE, 0);
                self.chunks[index].data = Some(buf);
            }
            while self.chunks[index].data.is_none() && idle_tail != 0 {
                self.intercept_ownership(index, idle_tail);
                idle_tail = self.chunks[0].prev;
            }
            if self.chunks[index].data.is_none() {
                return Err(CacheError::Nomem);
            }
        }

        if index < self.itwrite.index {
            self.seek_to_packet((index - 1) * PACKET_CHUNK_SIZE)?;
            let data = self.chunks[index].data.as_mut().expect("just populated");
            let mut tmp = std::mem::take(data);
            let result = self.read_records(&mut tmp);
            self.chunks[index].data = Some(tmp);
            if result.is_err() {
                self.chunks[index].data = None;
                return Err(CacheError::File);
            }
        }
        self.chunks[index].ref_count += 1;
        Ok(())
    }

    fn change_chunk(&mut self, new_index: usize, old_index: usize) -> Result<(), CacheError> {
        self.reserve_space_for_holder(new_index)?;
        if new_index != 0 {
            self.lock_chunk(new_index)?;
        }
        if old_index != 0 {
            self.release_chunk(old_index);
        }
        Ok(())
    }

    fn to_start_standalone(&mut self, it: &mut PacketIterator) -> Result<(), CacheError> {
        let other = PacketIterator { index: 1, pos: 0 };
        self.change_chunk(other.index, it.index)?;
        *it = other;
        Ok(())
    }

    fn to_next_chunk(&mut self, it: &mut PacketIterator) -> Result<(), CacheError> {
        let other = PacketIterator {
            index: it.index + 1,
            pos: 0,
        };
        self.change_chunk(other.index, it.index)?;
        *it = other;
        Ok(())
    }

    fn to_next_standalone(&mut self, it: &mut PacketIterator) -> Result<(), CacheError> {
        if it.pos + 1 < PACKET_CHUNK_SIZE {
            it.pos += 1;
            Ok(())
        } else {
            self.to_next_chunk(it)
        }
    }

    /// Reposition `it` to the first packet in the cache.
    pub fn to_start(&mut self, it: &mut PacketIterator) -> Result<(), CacheError> {
        self.to_start_standalone(it)
    }

    /// Advance `it` to the next packet.
    pub fn to_next(&mut self, it: &mut PacketIterator) -> Result<(), CacheError> {
        self.to_next_standalone(it)
    }

    /// Release the chunk `it` holds. Iterators that go out of scope
    /// without calling this keep their chunk pinned; callers that hold
    /// an iterator across a long replay scroll should call this
    /// explicitly when done with it.
    pub fn release(&mut self, it: PacketIterator) {
        self.release_chunk(it.index);
    }

    fn load_final_packet(&mut self) -> Result<(), CacheError> {
        let count = self.file_packet_count()?;
        let new_index = 1 + count / PACKET_CHUNK_SIZE;

        self.change_chunk(new_index, self.itwrite.index)?;
        if let Err(e) = self.change_chunk(new_index, self.itpush.index) {
            self.change_chunk(self.itwrite.index, new_index).ok();
            return Err(e);
        }

        let pos = count % PACKET_CHUNK_SIZE;
        if pos > 0 {
            self.seek_to_packet((new_index - 1) * PACKET_CHUNK_SIZE)?;
            let data = self.chunks[new_index].data.as_mut().expect("just locked");
            let mut tmp = std::mem::take(data);
            let result = self.read_records(&mut tmp[..pos * RECORD_SIZE]);
            self.chunks[new_index].data = Some(tmp);
            if result.is_err() {
                self.chunks[new_index].data = None;
                self.change_chunk(self.itpush.index, new_index).ok();
                self.change_chunk(self.itwrite.index, new_index).ok();
                return Err(CacheError::File);
            }
        }
        self.itwrite = PacketIterator { index: new_index, pos };
        self.itpush = PacketIterator { index: new_index, pos };
        Ok(())
    }

    /// Append `packet` (stamped with `saving_time`) to the cache.
    /// Returns an iterator pinned at the position the packet now
    /// occupies, so a caller that needs to overwrite it in place later
    /// (the persisted `USER_SYS_KEY` slot) can hold onto its location.
    pub fn push(&mut self, packet: &Packet, saving_time: i64) -> Result<PacketIterator, CacheError> {
        if self.itpush.index == 0 {
            let mut it = self.itpush;
            self.to_start_standalone(&mut it)?;
            self.itpush = it;
        }
        let mut stamped = packet.clone();
        stamped.at = saving_time;

        let slot = self.itpush;
        let index = slot.index;
        let pos = slot.pos;
        let data = self.chunks[index].data.as_mut().expect("itpush chunk is locked");
        let mut record = [0u8; RECORD_SIZE];
        encode(&stamped, &mut record);
        data[pos * RECORD_SIZE..(pos + 1) * RECORD_SIZE].copy_from_slice(&record);

        let mut it = self.itpush;
        self.to_next_standalone(&mut it)?;
        self.itpush = it;
        Ok(slot)
    }

    /// Read the packet at `it` without moving it. Returns `Ok(None)` once
    /// `it` has reached the push cursor (no packet there yet).
    pub fn get(&mut self, it: &mut PacketIterator) -> Result<Option<Packet>, CacheError> {
        if it.index == 0 {
            self.to_start_standalone(it)?;
        }
        let before_push = it.index < self.itpush.index
            || (it.index == self.itpush.index && it.pos < self.itpush.pos);
        if !before_push {
            return Ok(None);
        }
        let data = self.chunks[it.index].data.as_ref().expect("locked iterator chunk");
        let start = it.pos * RECORD_SIZE;
        let record: [u8; RECORD_SIZE] = data[start..start + RECORD_SIZE]
            .try_into()
            .expect("chunk slice is one record wide");
        Ok(Some(decode(&record)))
    }

    /// Overwrite the packet at `it` in place. Used only for the
    /// persisted `USER_SYS_KEY` slot: the chunk must either still be
    /// resident in memory or already durable on disk, otherwise there is
    /// nothing to overwrite and this returns [`CacheError::Cnum`].
    pub fn write(&mut self, it: &PacketIterator, packet: &Packet) -> Result<(), CacheError> {
        if it.index == 0 {
            return Err(CacheError::Cnum);
        }
        let mut record = [0u8; RECORD_SIZE];
        encode(packet, &mut record);

        let resident = self.chunks[it.index].data.is_some();
        if resident {
            let data = self.chunks[it.index].data.as_mut().expect("checked resident");
            let start = it.pos * RECORD_SIZE;
            data[start..start + RECORD_SIZE].copy_from_slice(&record);
        }

        let durable = it.index < self.itwrite.index
            || (it.index == self.itwrite.index && it.pos < self.itwrite.pos);
        if durable {
            self.seek_to_packet((it.index - 1) * PACKET_CHUNK_SIZE + it.pos)?;
            self.file.write_all(&record).map_err(|_| CacheError::File)?;
        } else if !resident {
            return Err(CacheError::Cnum);
        }
        Ok(())
    }

    /// Write every packet pushed since the last save to the backing
    /// file, advancing the write cursor.
    pub fn save_unsaved(&mut self) -> Result<(), CacheError> {
        let mut push_it = self.itpush;
        if push_it.index == 0 {
            self.to_start_standalone(&mut push_it)?;
            self.itpush = push_it;
        }
        let mut write_it = self.itwrite;
        if write_it.index == 0 {
            let result = self.to_start_standalone(&mut write_it);
            if let Err(e) = result {
                self.change_chunk(push_it.index, self.itpush.index).ok();
                return Err(e);
            }
        }

        let caught_up = write_it.index > push_it.index
            || (write_it.index == push_it.index && write_it.pos >= push_it.pos);
        if caught_up {
            self.itpush = push_it;
            self.itwrite = write_it;
            return Ok(());
        }

        self.seek_to_packet((write_it.index - 1) * PACKET_CHUNK_SIZE + write_it.pos)?;

        let mut any_saved = false;
        while write_it.index < push_it.index {
            let want = PACKET_CHUNK_SIZE - write_it.pos;
            let start = write_it.pos * RECORD_SIZE;
            let end = start + want * RECORD_SIZE;
            let bytes = self.chunks[write_it.index]
                .data
                .as_ref()
                .expect("write cursor chunk is locked")[start..end]
                .to_vec();
            let written = self.write_records(&bytes)?;
            write_it.pos += written;
            any_saved = any_saved || written > 0;
            if written != want {
                break;
            }
            self.to_next_chunk(&mut write_it)?;
        }

        if write_it.index == push_it.index && write_it.pos < push_it.pos {
            let want = push_it.pos - write_it.pos;
            let start = write_it.pos * RECORD_SIZE;
            let end = start + want * RECORD_SIZE;
            let bytes = self.chunks[write_it.index]
                .data
                .as_ref()
                .expect("write cursor chunk is locked")[start..end]
                .to_vec();
            let written = self.write_records(&bytes)?;
            write_it.pos += written;
            any_saved = any_saved || written > 0;
        }

        self.itwrite = write_it;
        if any_saved {
            Ok(())
        } else {
            Err(CacheError::File)
        }
    }
}

impl Drop for PacketCache {
    fn drop(&mut self) {
        let _ = self.file.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use live_timing_protocol::{PAYLOAD_CAPACITY, SystemPacketKind};
    use proptest::prelude::*;
    use tempfile::NamedTempFile;

    fn sample_packet(at: i64, text: &[u8]) -> Packet {
        Packet::new(0, SystemPacketKind::Notice.to_wire(), 0, text.len() as i32, at, text)
    }

    #[test]
    fn push_then_get_recovers_packet() {
        let file = NamedTempFile::new().expect("tmp file");
        let mut cache = PacketCache::open(file.path(), false).expect("open for recording");
        cache.push(&sample_packet(1, b"hi"), 1).expect("push");

        let mut it = PacketIterator::default();
        let got = cache.get(&mut it).expect("get").expect("packet present");
        assert_eq!(got.payload_bytes(), b"hi");
        assert_eq!(got.at, 1);

        let mut it2 = it;
        cache.to_next(&mut it2).expect("advance");
        assert_eq!(cache.get(&mut it2).expect("get"), None);
    }

    #[test]
    fn save_and_replay_round_trips_across_file() {
        let file = NamedTempFile::new().expect("tmp file");
        {
            let mut cache = PacketCache::open(file.path(), false).expect("open for recording");
            for i in 0..5 {
                cache
                    .push(&sample_packet(i, format!("p{i}").as_bytes()), i)
                    .expect("push");
            }
            cache.save_unsaved().expect("save");
        }

        let mut replay = PacketCache::open(file.path(), true).expect("open for replay");
        let mut it = PacketIterator::default();
        for i in 0..5 {
            let got = replay.get(&mut it).expect("get").expect("packet present");
            assert_eq!(got.at, i);
            replay.to_next(&mut it).expect("advance");
        }
        assert_eq!(replay.get(&mut it).expect("get"), None);
    }

    #[test]
    fn replay_rejects_bad_signature() {
        use std::io::Write as _;
        let mut file = NamedTempFile::new().expect("tmp file");
        file.write_all(&[0u8; RECORD_SIZE]).expect("write junk");
        let result = PacketCache::open(file.path(), true);
        assert_eq!(result.err(), Some(CacheError::Version));
    }

    #[test]
    fn write_overwrites_in_place_without_shifting_later_packets() {
        let file = NamedTempFile::new().expect("tmp file");
        let mut cache = PacketCache::open(file.path(), false).expect("open for recording");
        cache.push(&sample_packet(1, b"key-slot"), 1).expect("push");
        cache.push(&sample_packet(2, b"second"), 2).expect("push");
        cache.save_unsaved().expect("save");

        let mut key_slot = PacketIterator::default();
        cache.to_start(&mut key_slot).expect("to start");
        cache
            .write(&key_slot, &sample_packet(1, b"overwritten"))
            .expect("write in place");

        let mut it = PacketIterator::default();
        let first = cache.get(&mut it).expect("get").expect("present");
        assert_eq!(first.payload_bytes(), b"overwritten");
        cache.to_next(&mut it).expect("advance");
        let second = cache.get(&mut it).expect("get").expect("present");
        assert_eq!(second.payload_bytes(), b"second");
    }

    #[test]
    fn write_on_unpositioned_iterator_fails() {
        let file = NamedTempFile::new().expect("tmp file");
        let mut cache = PacketCache::open(file.path(), false).expect("open for recording");
        let unpositioned = PacketIterator::default();
        let result = cache.write(&unpositioned, &sample_packet(1, b"x"));
        assert_eq!(result.err(), Some(CacheError::Cnum));
    }

    #[test]
    fn crosses_chunk_boundary() {
        let file = NamedTempFile::new().expect("tmp file");
        let mut cache = PacketCache::open(file.path(), false).expect("open for recording");
        for i in 0..(PACKET_CHUNK_SIZE + 5) {
            cache
                .push(&sample_packet(i as i64, b"x"), i as i64)
                .expect("push");
        }
        cache.save_unsaved().expect("save");

        let mut it = PacketIterator::default();
        let mut count = 0;
        while cache.get(&mut it).expect("get").is_some() {
            cache.to_next(&mut it).expect("advance");
            count += 1;
        }
        assert_eq!(count, PACKET_CHUNK_SIZE + 5);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        /// Cache append-only durability: whatever gets pushed and saved
        /// is what replay reads back, in push order, byte for byte.
        #[test]
        fn prop_push_save_replay_round_trips(
            payloads in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..PAYLOAD_CAPACITY), 0..40),
        ) {
            let file = NamedTempFile::new().expect("tmp file");
            {
                let mut cache = PacketCache::open(file.path(), false).expect("open for recording");
                for (i, bytes) in payloads.iter().enumerate() {
                    cache
                        .push(&sample_packet(i as i64, bytes), i as i64)
                        .expect("push");
                }
                cache.save_unsaved().expect("save");
            }

            let mut replay = PacketCache::open(file.path(), true).expect("open for replay");
            let mut it = PacketIterator::default();
            for (i, bytes) in payloads.iter().enumerate() {
                let got = replay.get(&mut it).expect("get").expect("packet present");
                prop_assert_eq!(got.at, i as i64);
                prop_assert_eq!(got.payload_bytes(), bytes.as_slice());
                replay.to_next(&mut it).expect("advance");
            }
            prop_assert_eq!(replay.get(&mut it).expect("get"), None);
        }
    }
}
