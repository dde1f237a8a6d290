//! Byte-addressed FIFO of shared audio blocks
//!
//! A [`BlockQueue`] holds the in-flight audio of one stream as a sorted list
//! of [`AudioBlock`] references positioned on an absolute byte axis. Reads
//! and writes move two independent cursors along that axis, which makes
//! rewinds (re-reading consumed data) and write seeks (replacing data that
//! was already queued) cheap: neither touches the sample bytes.
//!
//! The queue has no internal locking. It is owned and mutated by a single
//! real-time context.

use std::collections::VecDeque;

use super::block::AudioBlock;
use super::error::QueueError;

/// Upper bound on the queued length of a single stream (16 MiB)
pub const MAX_QUEUE_LENGTH: usize = 16 * 1024 * 1024;

/// Size of the shared silence filler
const SILENCE_FILLER_LEN: usize = 16 * 1024;

#[derive(Debug, Clone)]
struct Entry {
    index: i64,
    block: AudioBlock,
}

impl Entry {
    fn end(&self) -> i64 {
        self.index + self.block.len() as i64
    }
}

/// FIFO of audio blocks with independent read and write cursors
#[derive(Debug)]
pub struct BlockQueue {
    /// Sorted, non-overlapping, all ending at or before `write_index`
    entries: VecDeque<Entry>,
    read_index: i64,
    write_index: i64,
    /// Lowest read position a rewind may return to (raised by history flushes)
    floor: i64,
    max_length: usize,
    max_rewind: usize,
    base: usize,
    silence: AudioBlock,
}

impl BlockQueue {
    /// Create a queue for frames of `base` bytes, holding at most `max_length` bytes
    pub fn new(base: usize, max_length: usize) -> Self {
        let base = base.max(1);
        let filler_len = SILENCE_FILLER_LEN - SILENCE_FILLER_LEN % base;
        Self {
            entries: VecDeque::new(),
            read_index: 0,
            write_index: 0,
            floor: 0,
            max_length: max_length.min(MAX_QUEUE_LENGTH),
            max_rewind: 0,
            base,
            silence: AudioBlock::silence(filler_len),
        }
    }

    /// Number of queued, unread bytes
    pub fn length(&self) -> usize {
        (self.write_index - self.read_index).max(0) as usize
    }

    /// Whether no unread bytes are queued
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Absolute read cursor
    pub fn read_index(&self) -> i64 {
        self.read_index
    }

    /// Absolute write cursor
    pub fn write_index(&self) -> i64 {
        self.write_index
    }

    /// Maximum queued length in bytes
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Frame size every push must be aligned to
    pub fn base(&self) -> usize {
        self.base
    }

    /// Bytes of already-read history kept for rewinds
    pub fn max_rewind(&self) -> usize {
        self.max_rewind
    }

    /// Change how much read history is kept for rewinds
    pub fn set_max_rewind(&mut self, max_rewind: usize) {
        self.max_rewind = max_rewind;
        self.release_history();
    }

    /// Append a block at the write cursor.
    ///
    /// Data previously queued at the same positions (after a backward seek)
    /// is replaced.
    pub fn push(&mut self, block: AudioBlock) -> Result<(), QueueError> {
        let len = block.len();
        if len % self.base != 0 {
            return Err(QueueError::Unaligned {
                len,
                base: self.base,
            });
        }
        if len == 0 {
            return Ok(());
        }

        let start = self.write_index;
        let end = start + len as i64;
        let requested = (end - self.read_index).max(0) as usize;
        if requested > self.max_length {
            return Err(QueueError::Overflow {
                requested,
                max: self.max_length,
            });
        }

        self.clear_range(start, end);
        let pos = self.entries.partition_point(|e| e.index < start);
        self.entries.insert(pos, Entry { index: start, block });
        self.write_index = end;
        Ok(())
    }

    /// Return exactly `n` bytes starting at the read cursor without consuming them.
    ///
    /// Holes and the region past the write cursor read as silence. When a
    /// single block covers the range, the result shares its storage.
    pub fn peek_fixed(&self, n: usize) -> AudioBlock {
        if n == 0 {
            return AudioBlock::silence(0);
        }
        let start = self.read_index;
        let end = start + n as i64;
        let first = self.entries.partition_point(|e| e.end() <= start);

        if let Some(entry) = self.entries.get(first) {
            if entry.index <= start && entry.end() >= end {
                let offset = (start - entry.index) as usize;
                return entry.block.slice(offset..offset + n);
            }
        }

        let mut out = vec![0u8; n];
        let mut touched = false;
        for entry in self.entries.iter().skip(first) {
            if entry.index >= end {
                break;
            }
            let from = entry.index.max(start);
            let to = entry.end().min(end);
            let src = &entry.block.as_bytes()[(from - entry.index) as usize..(to - entry.index) as usize];
            out[(from - start) as usize..(to - start) as usize].copy_from_slice(src);
            touched = true;
        }

        if !touched && n <= self.silence.len() {
            return self.silence.slice(0..n);
        }
        AudioBlock::new(out)
    }

    /// Advance the read cursor by `n` bytes.
    ///
    /// Dropping past the write cursor pulls the write cursor along.
    pub fn drop(&mut self, n: usize) {
        self.read_index += n as i64;
        if self.write_index < self.read_index {
            self.write_index = self.read_index;
        }
        self.release_history();
    }

    /// Move the read cursor back by up to `n` bytes, re-admitting data that
    /// was already read. Returns the number of bytes actually rewound.
    pub fn rewind(&mut self, n: usize) -> usize {
        let available = (self.read_index - self.history_floor()).max(0) as usize;
        let amount = n.min(available);
        self.read_index -= amount as i64;
        amount
    }

    /// Move the write cursor by a signed offset.
    ///
    /// Moving backward forgets the data past the new cursor so the next push
    /// replaces it. With `clamp_to_read` the write cursor never ends up behind
    /// the read cursor. Moving forward leaves a hole that reads as silence.
    pub fn seek_relative(&mut self, offset: i64, clamp_to_read: bool) {
        let mut target = self.write_index + offset;
        if clamp_to_read && target < self.read_index {
            target = self.read_index;
        }
        let limit = self.read_index + self.max_length as i64;
        if target > limit {
            target = limit;
        }
        if target < self.write_index {
            self.clear_range(target, i64::MAX);
        }
        self.write_index = target;
    }

    /// Discard all unread data.
    ///
    /// With `keep_history` already-read data stays available for rewinds.
    pub fn flush_write(&mut self, keep_history: bool) {
        self.clear_range(self.read_index, i64::MAX);
        self.write_index = self.read_index;
        if !keep_history {
            self.entries.clear();
            self.floor = self.read_index;
        }
    }

    fn history_floor(&self) -> i64 {
        self.floor.max(self.read_index - self.max_rewind as i64)
    }

    fn release_history(&mut self) {
        let keep_from = self.history_floor();
        while let Some(front) = self.entries.front() {
            if front.end() <= keep_from {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Remove every byte in `[start, end)`, splitting blocks that straddle the edges
    fn clear_range(&mut self, start: i64, end: i64) {
        let mut i = self.entries.partition_point(|e| e.end() <= start);
        while i < self.entries.len() {
            let (e_start, e_end) = (self.entries[i].index, self.entries[i].end());
            if e_start >= end {
                break;
            }
            let block = self.entries[i].block.clone();
            self.entries.remove(i);

            if e_end > end {
                let tail = block.slice((end - e_start) as usize..block.len());
                self.entries.insert(
                    i,
                    Entry {
                        index: end,
                        block: tail,
                    },
                );
            }
            if e_start < start {
                let head = block.slice(0..(start - e_start) as usize);
                self.entries.insert(
                    i,
                    Entry {
                        index: e_start,
                        block: head,
                    },
                );
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(range: std::ops::Range<u8>) -> AudioBlock {
        AudioBlock::new(range.collect())
    }

    #[test]
    fn test_push_and_length() {
        let mut q = BlockQueue::new(2, 1024);
        q.push(block(0..10)).unwrap();
        q.push(block(10..16)).unwrap();
        assert_eq!(q.length(), 16);
        assert_eq!(q.write_index() - q.read_index(), 16);
    }

    #[test]
    fn test_peek_spans_blocks() {
        let mut q = BlockQueue::new(2, 1024);
        q.push(block(0..4)).unwrap();
        q.push(block(4..8)).unwrap();
        q.drop(2);
        assert_eq!(q.peek_fixed(4).as_bytes(), &[2, 3, 4, 5]);
        // peek does not consume
        assert_eq!(q.length(), 6);
    }

    #[test]
    fn test_peek_single_block_is_zero_copy() {
        let mut q = BlockQueue::new(2, 1024);
        let b = block(0..8);
        q.push(b.clone()).unwrap();
        let peeked = q.peek_fixed(4);
        assert!(peeked.shares_storage(&b));
    }

    #[test]
    fn test_peek_pads_with_silence() {
        let mut q = BlockQueue::new(2, 1024);
        q.push(AudioBlock::new(vec![9, 9])).unwrap();
        assert_eq!(q.peek_fixed(6).as_bytes(), &[9, 9, 0, 0, 0, 0]);
        let empty = BlockQueue::new(2, 1024);
        assert_eq!(empty.peek_fixed(4).as_bytes(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_overflow_rejected() {
        let mut q = BlockQueue::new(2, 8);
        q.push(block(0..8)).unwrap();
        let err = q.push(block(0..2)).unwrap_err();
        assert_eq!(
            err,
            QueueError::Overflow {
                requested: 10,
                max: 8
            }
        );
        assert_eq!(q.length(), 8);
    }

    #[test]
    fn test_unaligned_rejected() {
        let mut q = BlockQueue::new(4, 64);
        assert!(matches!(
            q.push(block(0..6)),
            Err(QueueError::Unaligned { len: 6, base: 4 })
        ));
    }

    #[test]
    fn test_rewind_needs_history() {
        let mut q = BlockQueue::new(1, 64);
        q.push(block(0..8)).unwrap();
        q.drop(4);
        // no history retained by default
        assert_eq!(q.rewind(2), 0);

        q.set_max_rewind(16);
        q.drop(2);
        assert_eq!(q.rewind(2), 2);
        assert_eq!(q.peek_fixed(2).as_bytes(), &[4, 5]);
    }

    #[test]
    fn test_rewind_clamped_to_history() {
        let mut q = BlockQueue::new(1, 64);
        q.set_max_rewind(4);
        q.push(block(0..16)).unwrap();
        q.drop(10);
        assert_eq!(q.rewind(8), 4);
        assert_eq!(q.peek_fixed(2).as_bytes(), &[6, 7]);
    }

    #[test]
    fn test_seek_back_replaces_data() {
        let mut q = BlockQueue::new(1, 64);
        q.push(block(0..8)).unwrap();
        q.seek_relative(-4, true);
        assert_eq!(q.length(), 4);
        q.push(AudioBlock::new(vec![100, 101, 102, 103])).unwrap();
        assert_eq!(q.peek_fixed(8).as_bytes(), &[0, 1, 2, 3, 100, 101, 102, 103]);
    }

    #[test]
    fn test_seek_clamps_to_read_cursor() {
        let mut q = BlockQueue::new(1, 64);
        q.push(block(0..8)).unwrap();
        q.drop(6);
        q.seek_relative(-10, true);
        assert_eq!(q.write_index(), q.read_index());
        assert_eq!(q.length(), 0);
    }

    #[test]
    fn test_seek_forward_leaves_silent_hole() {
        let mut q = BlockQueue::new(1, 64);
        q.push(block(1..3)).unwrap();
        q.seek_relative(2, true);
        q.push(AudioBlock::new(vec![7])).unwrap();
        assert_eq!(q.peek_fixed(5).as_bytes(), &[1, 2, 0, 0, 7]);
    }

    #[test]
    fn test_flush_write() {
        let mut q = BlockQueue::new(1, 64);
        q.set_max_rewind(8);
        q.push(block(0..8)).unwrap();
        q.drop(4);
        q.flush_write(true);
        assert_eq!(q.length(), 0);
        assert_eq!(q.rewind(4), 4);
        assert_eq!(q.peek_fixed(4).as_bytes(), &[0, 1, 2, 3]);

        q.flush_write(false);
        assert_eq!(q.rewind(4), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn test_drop_past_end_moves_write_cursor() {
        let mut q = BlockQueue::new(1, 64);
        q.push(block(0..4)).unwrap();
        q.drop(6);
        assert_eq!(q.length(), 0);
        assert_eq!(q.write_index(), 6);
        q.push(block(50..52)).unwrap();
        assert_eq!(q.peek_fixed(2).as_bytes(), &[50, 51]);
    }
}
