use aero_protocol::aerogpu::aerogpu_cmd::{
    cmd_stream_has_vsync_present, cmd_stream_has_vsync_present_bytes, cmd_stream_has_vsync_present_reader,
    AerogpuCmdDecodeError, AerogpuCmdOpcode, AerogpuCmdStream, AerogpuCmdStreamHeader, AEROGPU_CMD_STREAM_MAGIC,
    AEROGPU_PRESENT_FLAG_VSYNC,
};
use aero_protocol::aerogpu::aerogpu_pci::AEROGPU_ABI_VERSION_U32;
use aero_protocol::aerogpu::cmd_writer::AerogpuCmdWriter;

const CMD_STREAM_SIZE_BYTES_OFFSET: usize = core::mem::offset_of!(AerogpuCmdStreamHeader, size_bytes);

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn build_cmd_stream_header() -> Vec<u8> {
    let mut bytes = Vec::new();
    push_u32(&mut bytes, AEROGPU_CMD_STREAM_MAGIC);
    push_u32(&mut bytes, AEROGPU_ABI_VERSION_U32);
    push_u32(&mut bytes, 0); // size_bytes (patched later)
    push_u32(&mut bytes, 0); // flags
    push_u32(&mut bytes, 0); // reserved0
    push_u32(&mut bytes, 0); // reserved1
    bytes
}

fn patch_stream_size(bytes: &mut [u8]) {
    let size_bytes = u32::try_from(bytes.len()).unwrap();
    bytes[CMD_STREAM_SIZE_BYTES_OFFSET..CMD_STREAM_SIZE_BYTES_OFFSET + 4].copy_from_slice(&size_bytes.to_le_bytes());
}

/// Run the guest-memory variant over `stream` mapped at an arbitrary GPA.
fn scan_via_reader(stream: &[u8]) -> Result<bool, AerogpuCmdDecodeError> {
    let base_gpa = 0x7000u64;
    let read = |gpa: u64, buf: &mut [u8]| {
        let off = usize::try_from(gpa - base_gpa).unwrap();
        buf.copy_from_slice(&stream[off..off + buf.len()]);
    };
    cmd_stream_has_vsync_present_reader(read, base_gpa, stream.len() as u32)
}

#[test]
fn detects_vsync_on_present_and_present_ex() {
    let mut w = AerogpuCmdWriter::new();
    w.present(0, AEROGPU_PRESENT_FLAG_VSYNC);
    let stream = w.finish();
    assert!(cmd_stream_has_vsync_present_bytes(&stream).unwrap());
    assert!(scan_via_reader(&stream).unwrap());

    let mut w = AerogpuCmdWriter::new();
    w.present(0, 0);
    let stream = w.finish();
    assert!(!cmd_stream_has_vsync_present_bytes(&stream).unwrap());
    assert!(!scan_via_reader(&stream).unwrap());

    let mut w = AerogpuCmdWriter::new();
    w.flush();
    w.present_ex(0, AEROGPU_PRESENT_FLAG_VSYNC, 0);
    let stream = w.finish();
    assert!(cmd_stream_has_vsync_present_bytes(&stream).unwrap());
    assert!(scan_via_reader(&stream).unwrap());
    assert!(AerogpuCmdStream::open(&stream).unwrap().has_vsync_present());
}

#[test]
fn tolerates_present_packets_extended_by_newer_minors() {
    let mut stream = build_cmd_stream_header();
    push_u32(&mut stream, AerogpuCmdOpcode::Present as u32);
    push_u32(&mut stream, 32); // size_bytes: 16 known + 16 trailing
    push_u32(&mut stream, 0); // scanout_id
    push_u32(&mut stream, AEROGPU_PRESENT_FLAG_VSYNC);
    for _ in 0..4 {
        push_u32(&mut stream, 0xFFFF_FFFF); // fields from a future minor
    }
    patch_stream_size(&mut stream);

    assert!(cmd_stream_has_vsync_present_bytes(&stream).unwrap());
    assert!(scan_via_reader(&stream).unwrap());
}

#[test]
fn skips_unknown_opcodes_by_size() {
    let mut stream = build_cmd_stream_header();
    push_u32(&mut stream, 0x0BAD_0000);
    push_u32(&mut stream, 12);
    push_u32(&mut stream, AEROGPU_PRESENT_FLAG_VSYNC); // looks like flags, must not be read as such
    push_u32(&mut stream, AerogpuCmdOpcode::Present as u32);
    push_u32(&mut stream, 16);
    push_u32(&mut stream, 0);
    push_u32(&mut stream, 0);
    patch_stream_size(&mut stream);

    assert!(!cmd_stream_has_vsync_present_bytes(&stream).unwrap());
    assert!(!scan_via_reader(&stream).unwrap());
}

#[test]
fn errors_on_truncated_present_packets() {
    // PRESENT that only contains scanout_id (missing flags).
    let mut stream = build_cmd_stream_header();
    push_u32(&mut stream, AerogpuCmdOpcode::Present as u32);
    push_u32(&mut stream, 12); // size_bytes (hdr + scanout_id)
    push_u32(&mut stream, 0); // scanout_id
    patch_stream_size(&mut stream);

    let expected = AerogpuCmdDecodeError::PayloadTooSmall {
        opcode: AerogpuCmdOpcode::Present,
        expected: 16,
        found: 12,
    };
    assert_eq!(cmd_stream_has_vsync_present_bytes(&stream).unwrap_err(), expected);
    assert_eq!(scan_via_reader(&stream).unwrap_err(), expected);

    // The lenient query treats malformed streams as "no vsync".
    assert!(!cmd_stream_has_vsync_present(&stream));
    assert!(!cmd_stream_has_vsync_present(&stream[..10]));
}

#[test]
fn reader_only_touches_headers_and_flags() {
    let mut stream = build_cmd_stream_header();

    const LARGE_PACKET_SIZE: u32 = 4096;
    push_u32(&mut stream, AerogpuCmdOpcode::DebugMarker as u32);
    push_u32(&mut stream, LARGE_PACKET_SIZE);
    stream.resize(stream.len() + LARGE_PACKET_SIZE as usize - 8, 0);

    push_u32(&mut stream, AerogpuCmdOpcode::Present as u32);
    push_u32(&mut stream, 16); // size_bytes
    push_u32(&mut stream, 0); // scanout_id
    push_u32(&mut stream, AEROGPU_PRESENT_FLAG_VSYNC);
    patch_stream_size(&mut stream);

    let base_gpa = 0x5000u64;
    let mut bytes_read = 0usize;
    let read = |gpa: u64, buf: &mut [u8]| {
        bytes_read += buf.len();
        let off = usize::try_from(gpa - base_gpa).unwrap();
        buf.copy_from_slice(&stream[off..off + buf.len()]);
    };

    assert!(cmd_stream_has_vsync_present_reader(read, base_gpa, stream.len() as u32).unwrap());
    assert!(bytes_read <= 64, "expected header-sized reads, got {bytes_read}");
}
