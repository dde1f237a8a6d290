//! Timing snapshots and drift computation

use crate::audio::SampleSpec;

/// Timing state of the playback context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkSnapshot {
    /// Clock reading when the snapshot was taken
    pub now_usec: u64,
    /// Time until everything handed to the playback device has been played
    pub latency_usec: u64,
    /// Rendered bytes not yet handed to the device
    pub delay_bytes: usize,
    /// Bytes forwarded to the capture context
    pub send_counter: i64,
}

/// Timing state of the capture context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSnapshot {
    /// Clock reading when the snapshot was taken
    pub now_usec: u64,
    /// Time since the last delivered byte was captured
    pub latency_usec: u64,
    /// Captured bytes not yet delivered to the engine
    pub delay_bytes: usize,
    /// Playback bytes received from the playback context
    pub recv_counter: i64,
    /// Queued capture bytes, including a pending sink skip
    pub capture_len: usize,
    /// Queued playback bytes, including a pending source skip
    pub playback_len: usize,
}

fn bytes_to_usec(spec: &SampleSpec, bytes: i64) -> i64 {
    spec.bytes_to_usec(bytes.max(0) as u64) as i64
}

/// Offset between capture and playback in microseconds.
///
/// Zero means the captured audio lines up with the playback audio it will
/// be paired with. A positive value means playback is too far ahead and
/// captured audio must be skipped; a negative value means playback comes
/// after capture and playback data must be skipped.
pub fn calc_diff(sink: &SinkSnapshot, source: &SourceSnapshot, spec: &SampleSpec) -> i64 {
    let plen = bytes_to_usec(spec, source.playback_len as i64);
    let rlen = bytes_to_usec(spec, source.capture_len as i64);
    let mut buffered = (plen - rlen).max(0);

    buffered += bytes_to_usec(spec, source.delay_bytes as i64);
    buffered += bytes_to_usec(spec, sink.delay_bytes as i64);

    // Playback data still in flight between the two contexts
    buffered += bytes_to_usec(spec, sink.send_counter - source.recv_counter);

    let playback_time = sink.now_usec as i64 + sink.latency_usec as i64 - buffered;
    let capture_time = source.now_usec as i64 - source.latency_usec as i64;
    playback_time - capture_time
}
