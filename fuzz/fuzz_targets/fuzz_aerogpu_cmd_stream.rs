#![no_main]

use aero_gpu::protocol::{decode_cmd, parse_cmd_stream};
use aero_protocol::aerogpu::aerogpu_cmd::{cmd_stream_has_vsync_present_bytes, AerogpuCmdStream};
use libfuzzer_sys::fuzz_target;

/// Keep the raw input bounded; the decoder is linear in stream size.
const MAX_INPUT_SIZE_BYTES: usize = 256 * 1024;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT_SIZE_BYTES {
        return;
    }

    let _ = parse_cmd_stream(data);
    let _ = cmd_stream_has_vsync_present_bytes(data);

    // Walk packets one at a time too so that decode errors after a good prefix are reached.
    let Ok(stream) = AerogpuCmdStream::open(data) else {
        return;
    };
    for packet in stream.packets() {
        let Ok(packet) = packet else {
            break;
        };
        assert!(packet.offset + packet.hdr.size_bytes as usize <= data.len());
        let _ = decode_cmd(&packet);
    }
});
