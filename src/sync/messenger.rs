//! Cross-context message channels
//!
//! Each channel is a bounded single-producer/single-consumer ring. Posting
//! never blocks: a full or closed channel drops the message. The receiving
//! context drains its inbox at the top of every tick. Dropping the inbox
//! closes the channel, after which every post is a no-op.
//!
//! The control thread may additionally issue a blocking round trip with
//! [`send`]. Real-time contexts never do; they only answer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Create a channel holding up to `capacity` undelivered messages
pub fn channel<M>(capacity: usize) -> (Poster<M>, Inbox<M>) {
    let (producer, consumer) = HeapRb::<M>::new(capacity.max(1)).split();
    let closed = Arc::new(AtomicBool::new(false));
    (
        Poster {
            producer,
            closed: closed.clone(),
            dropped: 0,
        },
        Inbox { consumer, closed },
    )
}

/// Sending half of a channel
pub struct Poster<M> {
    producer: HeapProd<M>,
    closed: Arc<AtomicBool>,
    dropped: u64,
}

impl<M> Poster<M> {
    /// Queue a message for the receiving context.
    ///
    /// Returns false if the message was dropped because the channel is full
    /// or the receiver is gone.
    pub fn post(&mut self, message: M) -> bool {
        if self.is_closed() {
            self.dropped += 1;
            return false;
        }
        if self.producer.try_push(message).is_err() {
            self.dropped += 1;
            return false;
        }
        true
    }

    /// Whether the receiving side has been torn down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of messages dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Receiving half of a channel
pub struct Inbox<M> {
    consumer: HeapCons<M>,
    closed: Arc<AtomicBool>,
}

impl<M> Inbox<M> {
    /// Take the oldest pending message
    pub fn try_recv(&mut self) -> Option<M> {
        self.consumer.try_pop()
    }

    /// Dispatch up to `limit` pending messages in order. Returns how many were handled.
    pub fn drain<F: FnMut(M)>(&mut self, limit: usize, mut handler: F) -> usize {
        let mut handled = 0;
        while handled < limit {
            match self.consumer.try_pop() {
                Some(message) => {
                    handler(message);
                    handled += 1;
                }
                None => break,
            }
        }
        handled
    }
}

impl<M> Drop for Inbox<M> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        // Release pending messages now so waiting repliers see a disconnect
        while self.consumer.try_pop().is_some() {}
    }
}

/// One-shot reply slot carried inside a request message
pub struct Reply<T> {
    sender: SyncSender<T>,
}

impl<T> Reply<T> {
    /// Answer the request. Never blocks; a vanished requester is ignored.
    pub fn send(self, value: T) {
        let _ = self.sender.try_send(value);
    }
}

impl<T> std::fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Reply")
    }
}

/// Create a reply slot and the receiver waiting on it
pub fn reply_slot<T>() -> (Reply<T>, Receiver<T>) {
    let (sender, receiver) = mpsc::sync_channel(1);
    (Reply { sender }, receiver)
}

/// Blocking round trip from the control thread.
///
/// Posts the request built by `make_request` and waits up to `timeout` for
/// the answer. Returns `None` if the target is gone, the channel is full, or
/// no answer arrives in time.
pub fn send<M, T, F>(poster: &mut Poster<M>, make_request: F, timeout: Duration) -> Option<T>
where
    F: FnOnce(Reply<T>) -> M,
{
    let (reply, receiver) = reply_slot();
    if !poster.post(make_request(reply)) {
        return None;
    }
    receiver.recv_timeout(timeout).ok()
}
