//! End-to-end submissions through `AeroGpuDevice`, from encoded bytes to
//! guest-visible status.

use std::thread;
use std::time::Duration;

use aero_gpu::protocol::parse_cmd_stream;
use aero_gpu::{
    guest_status, AeroGpuConfig, AeroGpuDevice, AeroGpuEvent, AeroGpuSubmission, CommandProcessorError, ErrorKind,
    FenceCompletionMode, GuestStatus, NullAeroGpuBackend, RecordedCommand, RecordingAeroGpuBackend, StateError,
    SyncError,
};
use aero_protocol::aerogpu::aerogpu_cmd::{
    AerogpuCmdDecodeError, AerogpuCmdOpcode, AEROGPU_D3D9_PRESENT_DONOTWAIT, AEROGPU_PRESENT_FLAG_VSYNC,
    AEROGPU_RESOURCE_USAGE_VERTEX_BUFFER,
};
use aero_protocol::aerogpu::cmd_writer::AerogpuCmdWriter;

fn submission(signal_fence: u64, cmd_stream: &[u8]) -> AeroGpuSubmission<'_> {
    AeroGpuSubmission {
        context_id: 0,
        engine_id: 0,
        flags: 0,
        signal_fence,
        cmd_stream,
    }
}

#[test]
fn draw_without_vertex_buffer_fails_with_missing_binding() {
    let mut w = AerogpuCmdWriter::new();
    w.create_buffer(1, AEROGPU_RESOURCE_USAGE_VERTEX_BUFFER, 256, 0, 0);
    w.draw(3, 1, 0, 0);
    let stream = w.finish();

    let mut device = AeroGpuDevice::new(AeroGpuConfig::default(), RecordingAeroGpuBackend::new());
    let result = device.submit(submission(1, &stream));
    let err = result.as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(matches!(err.state_error(), Some(StateError::MissingBinding(_))));
    // Nothing degenerate reached the backend, and the guest is not stalled.
    assert!(!device
        .backend()
        .commands
        .iter()
        .any(|c| matches!(c, RecordedCommand::Draw(_))));
    assert_eq!(device.completed_fence(), 1);
    assert_eq!(guest_status(&result), GuestStatus::Ok);
}

#[test]
fn short_render_target_packet_is_a_structural_error() {
    // color_count=2, depth_stencil=0, then room for a single handle.
    let mut payload = Vec::new();
    for word in [2u32, 0, 7] {
        payload.extend_from_slice(&word.to_le_bytes());
    }
    let mut w = AerogpuCmdWriter::new();
    w.raw_packet(AerogpuCmdOpcode::SetRenderTargets as u32, &payload);
    let stream = w.finish();

    assert!(matches!(
        parse_cmd_stream(&stream),
        Err(AerogpuCmdDecodeError::PayloadTooSmall {
            opcode: AerogpuCmdOpcode::SetRenderTargets,
            ..
        })
    ));

    let mut device = AeroGpuDevice::new(AeroGpuConfig::default(), NullAeroGpuBackend::new());
    let err = device.submit(submission(1, &stream)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);
    assert_eq!(err.offset(), Some(24));
}

#[test]
fn present_ex_pacing_at_latency_three() {
    let config = AeroGpuConfig {
        max_frame_latency: 3,
        fence_completion: FenceCompletionMode::Deferred,
        ..AeroGpuConfig::default()
    };
    let mut device = AeroGpuDevice::new(config, NullAeroGpuBackend::new());
    let present_ex = |d3d9_flags| {
        let mut w = AerogpuCmdWriter::new();
        w.present_ex(0, AEROGPU_PRESENT_FLAG_VSYNC, d3d9_flags);
        w.finish()
    };

    let wait = present_ex(0);
    for fence in 1..=3 {
        device.submit(submission(fence, &wait)).unwrap();
    }

    let no_wait = present_ex(AEROGPU_D3D9_PRESENT_DONOTWAIT);
    assert_eq!(
        device.submit(submission(4, &no_wait)).unwrap_err(),
        CommandProcessorError::Sync(SyncError::StillDrawing)
    );

    let fences = device.fence_tracker();
    let completer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        fences.complete(1);
    });
    device.submit(submission(4, &wait)).unwrap();
    completer.join().unwrap();
    assert!(device.get_data(1, false));
    assert!(!device.get_data(2, false));
    assert_eq!(device.last_present_count(), 4);
}

/// `Present(scanout_id=0, flags=VSYNC)` as the only packet in a stream.
const PRESENT_GOLDEN: [u8; 40] = [
    0x41, 0x43, 0x4D, 0x44, // magic "ACMD"
    0x02, 0x00, 0x01, 0x00, // abi 1.2
    0x28, 0x00, 0x00, 0x00, // size_bytes
    0x00, 0x00, 0x00, 0x00, // flags
    0x00, 0x00, 0x00, 0x00, // reserved0
    0x00, 0x00, 0x00, 0x00, // reserved1
    0x00, 0x07, 0x00, 0x00, // opcode
    0x10, 0x00, 0x00, 0x00, // packet size_bytes
    0x00, 0x00, 0x00, 0x00, // scanout_id
    0x01, 0x00, 0x00, 0x00, // flags
];

#[test]
fn present_golden_vector_round_trips_through_device() {
    let mut w = AerogpuCmdWriter::new();
    w.present(0, AEROGPU_PRESENT_FLAG_VSYNC);
    assert_eq!(w.finish(), PRESENT_GOLDEN);

    let mut device = AeroGpuDevice::new(AeroGpuConfig::default(), NullAeroGpuBackend::new());
    let report = device.submit(submission(1, &PRESENT_GOLDEN)).unwrap();
    assert_eq!(
        report.events,
        vec![
            AeroGpuEvent::PresentCompleted {
                scanout_id: 0,
                present_count: 1,
            },
            AeroGpuEvent::FenceSignaled { fence: 1 },
        ]
    );
}

#[test]
fn present_count_survives_aborted_streams() {
    let mut device = AeroGpuDevice::new(AeroGpuConfig::default(), NullAeroGpuBackend::new());

    let mut w = AerogpuCmdWriter::new();
    w.present(0, 0);
    w.draw(3, 1, 0, 0);
    let aborted = w.finish();

    let mut w = AerogpuCmdWriter::new();
    w.present(0, 0);
    let ok = w.finish();

    let mut last = 0;
    for fence in 1..=6 {
        let stream = if fence % 2 == 0 { &aborted } else { &ok };
        let _ = device.submit(submission(fence, stream));
        let count = device.last_present_count();
        assert!(count >= last);
        last = count;
    }
    // Presents ahead of the failing draw were already applied.
    assert_eq!(last, 6);
    assert_eq!(device.completed_fence(), 6);
}
