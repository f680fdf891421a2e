#![no_main]

use aero_gpu::{
    AeroGpuConfig, AeroGpuDevice, AeroGpuSubmission, FenceCompletionMode, RecordingAeroGpuBackend,
};
use aero_protocol::aerogpu::aerogpu_cmd::{AerogpuCmdStreamHeader, AEROGPU_CMD_STREAM_MAGIC};
use aero_protocol::aerogpu::aerogpu_pci::AEROGPU_ABI_VERSION_U32;
use arbitrary::Unstructured;
use libfuzzer_sys::fuzz_target;

const MAX_SUBMISSIONS: usize = 8;
const MAX_STREAM_BYTES: usize = 16 * 1024;

/// Prefix fuzzer bytes with a valid stream header so most inputs reach the processor.
fn framed(body: &[u8]) -> Vec<u8> {
    let size_bytes = (AerogpuCmdStreamHeader::SIZE_BYTES + body.len()) as u32;
    let mut out = Vec::with_capacity(size_bytes as usize);
    out.extend_from_slice(&AEROGPU_CMD_STREAM_MAGIC.to_le_bytes());
    out.extend_from_slice(&AEROGPU_ABI_VERSION_U32.to_le_bytes());
    out.extend_from_slice(&size_bytes.to_le_bytes());
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(body);
    out
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);
    let deferred: bool = u.arbitrary().unwrap_or(false);
    let config = AeroGpuConfig {
        max_handles: 64,
        max_frame_latency: u.int_in_range(1..=16).unwrap_or(3),
        fence_completion: if deferred {
            FenceCompletionMode::Deferred
        } else {
            FenceCompletionMode::Immediate
        },
        keep_last_submissions: 4,
    };
    let mut device = AeroGpuDevice::new(config, RecordingAeroGpuBackend::new());

    let mut fence = 0u64;
    let mut last_completed = 0u64;
    let mut last_presents = 0u64;
    for _ in 0..MAX_SUBMISSIONS {
        let Ok(len) = u.int_in_range(0..=MAX_STREAM_BYTES) else {
            break;
        };
        let len = len.min(u.len());
        let Ok(body) = u.bytes(len) else {
            break;
        };
        let stream = framed(body);
        fence += 1;
        let _ = device.submit(AeroGpuSubmission {
            context_id: 0,
            engine_id: 0,
            flags: 0,
            signal_fence: fence,
            cmd_stream: &stream,
        });
        // Drain deferred fences so the next present is never throttled.
        if deferred {
            device.backend_mut().complete_all();
            device.poll_completions();
        }

        let completed = device.completed_fence();
        assert!(completed >= last_completed);
        last_completed = completed;
        let presents = device.last_present_count();
        assert!(presents >= last_presents);
        last_presents = presents;
    }
});
