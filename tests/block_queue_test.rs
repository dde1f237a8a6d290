//! Block queue property tests
//!
//! Checks the queue against a plain byte FIFO model.

use std::collections::VecDeque;

use proptest::prelude::*;

use aec_sync::audio::{AudioBlock, BlockQueue};

const FRAME: usize = 2;
const MAX_LENGTH: usize = 4096;

#[derive(Debug, Clone)]
enum Op {
    /// Push a block of this many frames
    Push(usize),
    /// Drop this many frames
    Drop(usize),
    /// Peek this many frames
    Peek(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..200).prop_map(Op::Push),
        (0usize..200).prop_map(Op::Drop),
        (0usize..300).prop_map(Op::Peek),
    ]
}

/// Non-zero bytes so silence padding is distinguishable from data
fn next_bytes(counter: &mut u32, len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| {
            *counter += 1;
            (*counter % 251) as u8 + 1
        })
        .collect()
}

proptest! {
    /// Test: peek returns the oldest unconsumed bytes
    /// Given any sequence of pushes, drops and peeks within the length limit
    /// When peeking n bytes
    /// Then the result is exactly the n oldest unread bytes, padded with silence
    #[test]
    fn test_peek_returns_oldest_bytes(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        let mut queue = BlockQueue::new(FRAME, MAX_LENGTH);
        let mut model: VecDeque<u8> = VecDeque::new();
        let mut counter = 0u32;

        for op in ops {
            match op {
                Op::Push(frames) => {
                    let len = frames * FRAME;
                    if model.len() + len > MAX_LENGTH {
                        continue;
                    }
                    let bytes = next_bytes(&mut counter, len);
                    model.extend(bytes.iter().copied());
                    queue.push(AudioBlock::new(bytes)).unwrap();
                }
                Op::Drop(frames) => {
                    let n = (frames * FRAME).min(model.len());
                    queue.drop(n);
                    model.drain(..n);
                }
                Op::Peek(frames) => {
                    let n = frames * FRAME;
                    let peeked = queue.peek_fixed(n);
                    prop_assert_eq!(peeked.len(), n);
                    let mut expected: Vec<u8> = model.iter().take(n).copied().collect();
                    expected.resize(n, 0);
                    prop_assert_eq!(peeked.as_bytes(), expected.as_slice());
                }
            }
            prop_assert_eq!(queue.length(), model.len());
            prop_assert!(queue.length() <= queue.max_length());
        }
    }

    /// Test: dropped bytes are never returned again
    /// Given a queue holding data
    /// When n bytes are dropped
    /// Then the next peek starts right after them
    #[test]
    fn test_drop_never_rereturns(
        blocks in proptest::collection::vec(1usize..64, 1..20),
        drop_frames in 0usize..256,
    ) {
        let mut queue = BlockQueue::new(FRAME, MAX_LENGTH);
        let mut all = Vec::new();
        let mut counter = 0u32;
        for frames in blocks {
            let bytes = next_bytes(&mut counter, frames * FRAME);
            all.extend_from_slice(&bytes);
            queue.push(AudioBlock::new(bytes)).unwrap();
        }

        let n = (drop_frames * FRAME).min(all.len());
        queue.drop(n);
        let rest = queue.peek_fixed(all.len() - n);
        prop_assert_eq!(rest.as_bytes(), &all[n..]);
    }

    /// Test: fixed-size reads reproduce the pushed stream
    /// Given blocks of arbitrary sizes totaling L bytes
    /// When reading blockSize chunks with peek and drop until L bytes are consumed
    /// Then the chunks concatenate to the original bytes plus silence padding
    #[test]
    fn test_fixed_reads_reproduce_stream(
        blocks in proptest::collection::vec(1usize..100, 1..30),
        block_frames in 1usize..64,
    ) {
        let mut queue = BlockQueue::new(FRAME, MAX_LENGTH);
        let mut original = Vec::new();
        let mut counter = 0u32;
        for frames in blocks {
            let bytes = next_bytes(&mut counter, frames * FRAME);
            if original.len() + bytes.len() > MAX_LENGTH {
                break;
            }
            original.extend_from_slice(&bytes);
            queue.push(AudioBlock::new(bytes)).unwrap();
        }

        let block_size = block_frames * FRAME;
        let mut read = Vec::new();
        while read.len() < original.len() {
            let chunk = queue.peek_fixed(block_size);
            read.extend_from_slice(chunk.as_bytes());
            queue.drop(block_size);
        }

        let mut expected = original.clone();
        expected.resize(read.len(), 0);
        prop_assert_eq!(read, expected);
        prop_assert!(queue.is_empty());
    }
}

/// Test: a backward write seek replaces queued data
/// Given a queue holding 8 bytes
/// When the write cursor moves back 4 bytes and new data is pushed
/// Then the new data replaces the old tail
#[test]
fn test_seek_back_then_push_replaces_tail() {
    let mut queue = BlockQueue::new(1, 64);
    queue.push(AudioBlock::new((1..=8).collect())).unwrap();
    queue.seek_relative(-4, true);
    queue.push(AudioBlock::new(vec![50, 51])).unwrap();
    assert_eq!(queue.length(), 6);
    assert_eq!(queue.peek_fixed(6).as_bytes(), &[1, 2, 3, 4, 50, 51]);
}

/// Test: rewinding re-admits consumed data within the history limit
/// Given a queue keeping 16 bytes of history
/// When 12 bytes are consumed and the queue is rewound by 8
/// Then the rewound bytes are read again
#[test]
fn test_rewind_readmits_history() {
    let mut queue = BlockQueue::new(1, 64);
    queue.set_max_rewind(16);
    queue.push(AudioBlock::new((0..16).collect())).unwrap();
    queue.drop(12);
    assert_eq!(queue.rewind(8), 8);
    assert_eq!(queue.length(), 12);
    assert_eq!(queue.peek_fixed(4).as_bytes(), &[4, 5, 6, 7]);
}
