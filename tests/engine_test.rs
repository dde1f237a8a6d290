//! Engine setup and teardown tests

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use aec_sync::audio::RawFileSource;
use aec_sync::sync::{DeviceState, DriftOutcome, EchoCancelEngine, EngineError, StreamEndpoints};
use aec_sync::CancellerMethod;

use common::*;

fn endpoints(output: &Collected) -> StreamEndpoints {
    StreamEndpoints {
        clock: Arc::new(FakeClock::at(0)),
        capture_latency: Box::new(FixedLatency(0)),
        playback_latency: Box::new(FixedLatency(0)),
        downstream: Box::new(CollectingSink(output.clone())),
        upstream: ramp_source(),
    }
}

/// Test: the configured canceller decides the block size
/// Given 8 kHz with the default 20 ms NLMS frame
/// When the engine is built
/// Then blocks are 128 frames (largest power of two within 160)
#[test]
fn test_build_with_nlms() {
    let output = Collected::default();
    let (engine, capture, _playback) =
        EchoCancelEngine::build(&config_8k(), endpoints(&output)).expect("engine");

    assert_eq!(engine.block_bytes(), 256);
    assert_eq!(capture.block_bytes(), 256);
    assert_eq!(engine.sample_spec().rate, 8000);
    assert!(!engine.is_active());
}

/// Test: the null canceller forwards capture unchanged
/// Given the null method
/// When matched blocks are processed
/// Then the output equals the captured input
#[test]
fn test_null_canceller_passes_capture() {
    let mut config = config_8k();
    config.aec_method = CancellerMethod::Null;
    let output = Collected::default();
    let (engine, mut capture, mut playback) =
        EchoCancelEngine::build(&config, endpoints(&output)).expect("engine");

    let block = engine.block_bytes();
    playback.render(block);
    let captured = ramp(42, block / 2);
    capture.push(captured.clone());

    assert_eq!(output.bytes(), captured.as_bytes());
    assert_eq!(engine.stats().blocks_cancelled, 1);
}

/// Test: NLMS removes a pure echo over time
/// Given playback that reaches the microphone unchanged
/// When a few seconds of matched blocks are processed
/// Then the output energy ends well below the captured energy
#[test]
fn test_nlms_reduces_direct_echo() {
    let output = Collected::default();
    let mut state = 1u32;
    let noise: Vec<i16> = (0..40_000)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (((state >> 16) & 0x7fff) as i32 - 16384) as i16
        })
        .collect();
    let source = aec_sync::AudioBlock::from_i16(&noise);
    let mut points = endpoints(&output);
    points.upstream = Box::new(RawFileSource::from_block(source, false));

    let mut config = config_8k();
    config.aec_args.filter_size_ms = 10;
    let (engine, mut capture, mut playback) =
        EchoCancelEngine::build(&config, points).expect("engine");
    let block = engine.block_bytes();

    let mut last_in = 0f64;
    for _ in 0..200 {
        let played = playback.render(block);
        last_in = played.to_i16().iter().map(|&s| (s as f64).powi(2)).sum();
        capture.push(played);
    }

    let out = output.blocks.lock().unwrap();
    let last_out: f64 = out
        .last()
        .map(|b| b.to_i16().iter().map(|&s| (s as f64).powi(2)).sum())
        .unwrap_or(f64::MAX);
    assert!(last_in > 0.0);
    assert!(last_out < last_in * 0.1, "out {} in {}", last_out, last_in);
}

/// Test: invalid configuration creates nothing
/// Given zero channels, or a frame size outside 1..=200 ms
/// When the engine is built
/// Then setup fails and the endpoints are released
#[test]
fn test_invalid_config_releases_endpoints() {
    let mut no_channels = config_8k();
    no_channels.channels = 0;
    let mut long_frame = config_8k();
    long_frame.aec_args.frame_size_ms = 500;

    for config in [no_channels, long_frame] {
        let output = Collected::default();
        let result = EchoCancelEngine::build(&config, endpoints(&output));
        assert!(matches!(result, Err(EngineError::Config(_))));
        assert!(output.dropped.load(Ordering::SeqCst));
    }
}

/// Test: a canceller without a block size is rejected
/// Given a canceller reporting zero frames per block
/// When the engine is built around it
/// Then setup fails
#[test]
fn test_empty_block_rejected() {
    let output = Collected::default();
    let canceller = Box::new(RecordingCanceller {
        frames: 0,
        calls: Arc::new(Mutex::new(Vec::new())),
    });
    let result = EchoCancelEngine::build_with_canceller(&config_8k(), canceller, endpoints(&output));
    assert!(matches!(result, Err(EngineError::EmptyBlock)));
}

/// Test: device state changes drive activation
/// Given a freshly built engine
/// When the devices start and stop
/// Then the engine is active only while both run and each start requests a resync
#[test]
fn test_device_states() {
    let s = session();
    assert!(!s.engine.resync_pending());

    s.engine.set_sink_state(DeviceState::Running);
    assert!(!s.engine.is_active());
    assert!(s.engine.resync_pending());

    s.engine.set_source_state(DeviceState::Running);
    assert!(s.engine.is_active());

    s.engine.set_source_state(DeviceState::Suspended);
    assert!(!s.engine.is_active());
    assert_eq!(s.engine.check_drift(), DriftOutcome::Inactive);

    s.engine.set_sink_state(DeviceState::Suspended);
}

/// Test: repeating the current device state changes nothing
/// Given both devices running and the activation resync already consumed
/// When a device is reported running again
/// Then no new resync is requested
#[test]
fn test_repeated_running_is_ignored() {
    let mut s = session();
    s.engine.set_sink_state(DeviceState::Running);
    s.engine.set_source_state(DeviceState::Running);
    s.playback.render(BLOCK_BYTES);
    s.capture.push(ramp(0, BLOCK_FRAMES));
    assert!(!s.engine.resync_pending());
    let resyncs = s.engine.stats().resyncs;

    s.engine.set_source_state(DeviceState::Running);
    s.engine.set_sink_state(DeviceState::Running);
    assert!(!s.engine.resync_pending());
    assert!(s.engine.is_active());

    s.playback.render(BLOCK_BYTES);
    s.capture.push(ramp(160, BLOCK_FRAMES));
    assert_eq!(s.engine.stats().resyncs, resyncs);
}

/// Test: device state changes reach the capture context
/// Given both devices running
/// When the capture device suspends and runs again
/// Then the capture context follows on its next tick and passes audio through while suspended
#[test]
fn test_state_change_reaches_capture_context() {
    let mut s = session();
    s.engine.set_sink_state(DeviceState::Running);
    s.engine.set_source_state(DeviceState::Running);
    s.playback.render(BLOCK_BYTES);
    s.capture.push(ramp(0, BLOCK_FRAMES));
    assert!(!s.capture.is_suspended());

    s.engine.set_source_state(DeviceState::Suspended);
    assert!(!s.capture.is_suspended());
    s.playback.render(BLOCK_BYTES);
    s.capture.push(ramp(160, BLOCK_FRAMES));
    assert!(s.capture.is_suspended());
    assert_eq!(s.capture.mirror_queue_len(), 0);

    s.engine.set_source_state(DeviceState::Running);
    s.capture.push(ramp(320, BLOCK_FRAMES));
    assert!(!s.capture.is_suspended());
    assert!(s.engine.resync_pending());
}

/// Test: a released capture context cancels round trips
/// Given both devices running and the capture context dropped
/// When the playback side renders and a drift check runs
/// Then forwarded playback is counted as dropped and the check is canceled
#[test]
fn test_released_capture_cancels_round_trips() {
    let Session {
        engine,
        capture,
        mut playback,
        ..
    } = session();
    engine.set_sink_state(DeviceState::Running);
    engine.set_source_state(DeviceState::Running);
    drop(capture);

    playback.render(BLOCK_BYTES);
    assert!(engine.stats().posts_dropped >= 2);
    assert_eq!(engine.check_drift(), DriftOutcome::Canceled);
    assert!(!engine.post_diff_time(1000));

    engine.set_source_state(DeviceState::Suspended);
    engine.set_sink_state(DeviceState::Suspended);
}

/// Test: shutdown unlinks both contexts
/// Given a running session
/// When the engine shuts down
/// Then rendering yields silence and captured audio is ignored
#[test]
fn test_shutdown_unlinks_contexts() {
    let mut s = session();
    s.playback.render(BLOCK_BYTES);
    s.capture.push(ramp(0, BLOCK_FRAMES));
    assert_eq!(s.output.total_bytes(), BLOCK_BYTES);

    s.engine.shutdown();
    let silent = s.playback.render(BLOCK_BYTES);
    assert!(silent.as_bytes().iter().all(|&b| b == 0));
    assert_eq!(s.playback.send_counter(), BLOCK_BYTES as i64);

    s.capture.push(ramp(0, BLOCK_FRAMES));
    assert_eq!(s.output.total_bytes(), BLOCK_BYTES);
    assert_eq!(s.calls.lock().unwrap().len(), 1);

    // Idempotent
    s.engine.shutdown();
}

/// Test: contexts release their endpoints when dropped
/// Given a session
/// When the capture context is dropped
/// Then the downstream endpoint is released
#[test]
fn test_capture_drop_releases_downstream() {
    let Session {
        engine,
        capture,
        output,
        ..
    } = session();
    assert!(!output.dropped.load(Ordering::SeqCst));
    drop(capture);
    assert!(output.dropped.load(Ordering::SeqCst));
    drop(engine);
}

/// Test: periodic drift checks can be enabled
/// Given adjust_time of one second
/// When the engine is built and dropped
/// Then the timer thread starts and stops cleanly
#[test]
fn test_drift_timer_lifecycle() {
    let mut config = config_8k();
    config.adjust_time = 1;
    let output = Collected::default();
    let (mut engine, _capture, _playback) =
        EchoCancelEngine::build(&config, endpoints(&output)).expect("engine");
    engine.set_sink_state(DeviceState::Running);
    engine.set_source_state(DeviceState::Running);
    engine.set_source_state(DeviceState::Suspended);
    engine.set_sink_state(DeviceState::Suspended);
    engine.shutdown();
}

/// Test: the debug recorder writes every cancelled block
/// Given save_aec enabled with a scratch dump directory
/// When three blocks are cancelled
/// Then each dump file holds three blocks
#[test]
fn test_recorder_dumps_cancelled_blocks() {
    let dir = std::env::temp_dir().join(format!("aec-sync-engine-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let mut config = config_8k();
    config.save_aec = true;
    config.dump_dir = dir.clone();

    let output = Collected::default();
    let (engine, mut capture, mut playback) =
        EchoCancelEngine::build(&config, endpoints(&output)).expect("engine");
    let block = engine.block_bytes();
    for i in 0..3 {
        playback.render(block);
        capture.push(ramp(i * 128, block / 2));
    }
    drop(capture);

    for name in [
        aec_sync::audio::CAPTURED_FILE,
        aec_sync::audio::PLAYED_FILE,
        aec_sync::audio::CANCELED_FILE,
    ] {
        let len = std::fs::metadata(dir.join(name)).unwrap().len();
        assert_eq!(len, 3 * block as u64, "{}", name);
    }
    let _ = std::fs::remove_dir_all(&dir);
}
