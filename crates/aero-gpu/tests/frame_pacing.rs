use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use aero_gpu::{
    guest_status, AeroGpuConfig, AeroGpuDevice, AeroGpuSubmission, CommandProcessorError, FenceCompletionMode,
    GuestStatus, NullAeroGpuBackend, SubmissionOutcome, SyncError,
};
use aero_protocol::aerogpu::aerogpu_cmd::{AEROGPU_D3D9_PRESENT_DONOTWAIT, AEROGPU_PRESENT_FLAG_VSYNC};
use aero_protocol::aerogpu::aerogpu_ring::AEROGPU_SUBMIT_FLAG_PRESENT;
use aero_protocol::aerogpu::cmd_writer::AerogpuCmdWriter;

fn present_ex_stream(d3d9_present_flags: u32) -> Vec<u8> {
    let mut w = AerogpuCmdWriter::new();
    w.present_ex(0, AEROGPU_PRESENT_FLAG_VSYNC, d3d9_present_flags);
    w.finish()
}

fn submission(signal_fence: u64, cmd_stream: &[u8]) -> AeroGpuSubmission<'_> {
    AeroGpuSubmission {
        context_id: 0,
        engine_id: 0,
        flags: AEROGPU_SUBMIT_FLAG_PRESENT,
        signal_fence,
        cmd_stream,
    }
}

fn deferred_device(max_frame_latency: u32) -> AeroGpuDevice<NullAeroGpuBackend> {
    let config = AeroGpuConfig {
        max_frame_latency,
        fence_completion: FenceCompletionMode::Deferred,
        ..AeroGpuConfig::default()
    };
    AeroGpuDevice::new(config, NullAeroGpuBackend::new())
}

#[test]
fn fourth_present_without_wait_is_still_drawing() {
    let mut device = deferred_device(3);
    let stream = present_ex_stream(0);
    for fence in 1..=3 {
        device.submit(submission(fence, &stream)).unwrap();
    }
    assert_eq!(device.completed_fence(), 0);
    assert_eq!(device.last_present_count(), 3);

    let no_wait = present_ex_stream(AEROGPU_D3D9_PRESENT_DONOTWAIT);
    let result = device.submit(submission(4, &no_wait));
    assert_eq!(
        result.as_ref().unwrap_err(),
        &CommandProcessorError::Sync(SyncError::StillDrawing)
    );
    assert_eq!(guest_status(&result), GuestStatus::WasStillDrawing);

    // The rejected present left no trace.
    assert_eq!(device.last_present_count(), 3);
    assert_eq!(device.fence_tracker().in_flight_presents(), 3);
    assert_eq!(
        device.recent_submissions().last().map(|r| &r.outcome),
        Some(&SubmissionOutcome::Throttled)
    );
}

#[test]
fn fourth_present_blocks_until_first_fence_completes() {
    let mut device = deferred_device(3);
    let stream = present_ex_stream(0);
    for fence in 1..=3 {
        device.submit(submission(fence, &stream)).unwrap();
    }

    let fences = device.fence_tracker();
    let released = Arc::new(AtomicBool::new(false));
    let completer = {
        let released = Arc::clone(&released);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            released.store(true, Ordering::SeqCst);
            fences.complete(1);
        })
    };

    let start = Instant::now();
    let report = device.submit(submission(4, &stream)).unwrap();
    assert!(released.load(Ordering::SeqCst), "present was admitted before fence 1 completed");
    assert!(start.elapsed() >= Duration::from_millis(40));
    completer.join().unwrap();

    assert_eq!(report.packets_processed, 1);
    assert_eq!(device.completed_fence(), 1);
    assert_eq!(device.last_present_count(), 4);
}

#[test]
fn non_present_submissions_are_not_throttled() {
    let mut device = deferred_device(1);
    let stream = present_ex_stream(0);
    device.submit(submission(1, &stream)).unwrap();

    let mut w = AerogpuCmdWriter::new();
    w.nop();
    let plain = w.finish();
    let report = device
        .submit(AeroGpuSubmission {
            context_id: 0,
            engine_id: 0,
            flags: 0,
            signal_fence: 2,
            cmd_stream: &plain,
        })
        .unwrap();
    assert_eq!(report.packets_processed, 1);
}

#[test]
fn lowering_latency_applies_to_next_present() {
    let mut device = deferred_device(3);
    let stream = present_ex_stream(0);
    device.submit(submission(1, &stream)).unwrap();

    assert_eq!(device.set_maximum_frame_latency(0), 1);
    assert_eq!(device.maximum_frame_latency(), 1);
    let no_wait = present_ex_stream(AEROGPU_D3D9_PRESENT_DONOTWAIT);
    assert!(device.submit(submission(2, &no_wait)).is_err());

    device.fence_tracker().complete(1);
    device.submit(submission(2, &no_wait)).unwrap();
    assert_eq!(device.present_stats().present_count, 2);
}
