use std::path::PathBuf;
use std::process::Command;

use aero_gpu::{AeroGpuConfig, AeroGpuEvent, ErrorKind, SubmissionOutcome};
use aero_gpu_cmd_dump::{
    decode_cmd_stream_listing, list_cmd_stream, render_replay, replay_cmd_stream, CmdDumpError,
};
use aero_protocol::aerogpu::aerogpu_cmd::{
    AerogpuCmdDecodeError, AEROGPU_CMD_STREAM_MAGIC, AEROGPU_PRESENT_FLAG_VSYNC, AEROGPU_RESOURCE_USAGE_VERTEX_BUFFER,
};
use aero_protocol::aerogpu::aerogpu_pci::{AEROGPU_ABI_MAJOR, AEROGPU_ABI_MINOR};
use aero_protocol::aerogpu::cmd_writer::AerogpuCmdWriter;

const PRESENT_OFFSET: usize = 0x6C;

fn build_fixture_cmd_stream() -> Vec<u8> {
    let mut w = AerogpuCmdWriter::new();
    w.create_buffer(1, AEROGPU_RESOURCE_USAGE_VERTEX_BUFFER, 64, 2, 16);
    w.upload_resource(1, 8, &[0xDE, 0xAD, 0xBE, 0xEF]);
    w.raw_packet(0xDEAD_BEEF, &[]);
    w.present(0, AEROGPU_PRESENT_FLAG_VSYNC);
    w.finish()
}

fn patch_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn decodes_cmd_stream_dump_to_stable_listing() {
    let bytes = build_fixture_cmd_stream();
    let listing = decode_cmd_stream_listing(&bytes, false).expect("listing should succeed");

    let expected = format!(
        "header magic=0x{AEROGPU_CMD_STREAM_MAGIC:08X} abi={AEROGPU_ABI_MAJOR}.{AEROGPU_ABI_MINOR} size_bytes=124 flags=0x00000000\n\
         0x00000018 CreateBuffer size_bytes=40 buffer_handle=1 usage_flags=0x00000001 buffer_size_bytes=64 backing_alloc_id=2 backing_offset_bytes=16\n\
         0x00000040 UploadResource size_bytes=36 resource_handle=1 offset_bytes=8 data_len=4 data_prefix=deadbeef\n\
         0x00000064 Unknown size_bytes=8 opcode_id=0xDEADBEEF decode_error=unknown opcode 0xDEADBEEF\n\
         0x0000006C Present size_bytes=16 scanout_id=0 flags=0x00000001\n"
    );
    assert_eq!(listing, expected);
}

#[test]
fn strict_mode_rejects_unknown_opcode() {
    let bytes = build_fixture_cmd_stream();
    match list_cmd_stream(&bytes, true) {
        Err(CmdDumpError::Packet { offset, source }) => {
            assert_eq!(offset, 0x64);
            assert_eq!(source, AerogpuCmdDecodeError::UnknownOpcode { found: 0xDEAD_BEEF });
        }
        other => panic!("expected a packet error, got {other:?}"),
    }
}

#[test]
fn framing_error_ends_listing() {
    let mut bytes = build_fixture_cmd_stream();
    // Present's size now runs past the end of the stream.
    patch_u32(&mut bytes, PRESENT_OFFSET + 4, 32);

    let listing = list_cmd_stream(&bytes, false).unwrap();
    assert_eq!(listing.packets.len(), 3);
    let error = listing.error.as_ref().expect("framing error is reported");
    assert_eq!(error.offset, PRESENT_OFFSET);

    let text = decode_cmd_stream_listing(&bytes, false).unwrap();
    assert!(text.ends_with(&format!("0x0000006C error: {}\n", error.message)));
}

#[test]
fn bad_header_is_an_error() {
    let mut bytes = build_fixture_cmd_stream();
    patch_u32(&mut bytes, 0, 0x1234_5678);
    assert!(matches!(
        list_cmd_stream(&bytes, false),
        Err(CmdDumpError::Header(AerogpuCmdDecodeError::BadMagic { found: 0x1234_5678 }))
    ));
}

#[test]
fn json_listing_carries_fields() {
    let listing = list_cmd_stream(&build_fixture_cmd_stream(), false).unwrap();
    let json = serde_json::to_value(&listing).unwrap();
    assert_eq!(json["abi_major"], serde_json::json!(AEROGPU_ABI_MAJOR));
    assert_eq!(json["packets"][0]["opcode"], "CreateBuffer");
    assert_eq!(json["packets"][0]["fields"][0]["name"], "buffer_handle");
    assert_eq!(json["packets"][0]["fields"][0]["value"], "1");
    assert_eq!(json["packets"][2]["opcode_id"], serde_json::json!(0xDEAD_BEEFu32));
    assert!(json["error"].is_null());
}

#[test]
fn replay_reports_presents_and_fence() {
    let mut w = AerogpuCmdWriter::new();
    w.create_buffer(1, AEROGPU_RESOURCE_USAGE_VERTEX_BUFFER, 64, 0, 0);
    w.debug_marker("frame 0");
    w.present(0, AEROGPU_PRESENT_FLAG_VSYNC);
    let report = replay_cmd_stream(&w.finish(), AeroGpuConfig::default(), 5);

    assert_eq!(report.outcome, SubmissionOutcome::Completed { packets_processed: 3 });
    assert_eq!(report.completed_fence, 5);
    assert_eq!(report.present_stats.present_count, 1);
    assert!(report.events.contains(&AeroGpuEvent::PresentCompleted {
        scanout_id: 0,
        present_count: 1,
    }));
    assert!(report.events.contains(&AeroGpuEvent::FenceSignaled { fence: 5 }));

    let text = render_replay(&report);
    assert!(text.contains("marker: frame 0\n"));
    assert!(text.contains("completed: 3 packets\n"));
}

#[test]
fn replay_reports_aborting_packet() {
    let mut w = AerogpuCmdWriter::new();
    w.nop();
    w.draw(3, 1, 0, 0);
    let report = replay_cmd_stream(&w.finish(), AeroGpuConfig::default(), 1);

    match &report.outcome {
        SubmissionOutcome::Failed { kind, .. } => assert_eq!(*kind, ErrorKind::State),
        other => panic!("expected failure, got {other:?}"),
    }
    // The draw follows the stream header and one NOP.
    assert_eq!(report.error_offset, Some(0x20));
    assert!(report.events.is_empty());
    // The fence still signals so the guest is not left waiting.
    assert_eq!(report.completed_fence, 1);
    assert!(render_replay(&report).contains("at 0x00000020"));
}

fn resolve_cli_exe() -> PathBuf {
    if let Some(exe) = option_env!("CARGO_BIN_EXE_aero-gpu-cmd-dump") {
        return PathBuf::from(exe);
    }
    let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
    let target_dir = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| repo_root.join("target"));
    let exe_name = format!("aero-gpu-cmd-dump{}", std::env::consts::EXE_SUFFIX);
    target_dir.join("debug").join(exe_name)
}

#[test]
fn cli_prints_listing_and_exit_status() {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let good = tmp.path().join("good.acmd");
    std::fs::write(&good, build_fixture_cmd_stream()).unwrap();

    let output = Command::new(resolve_cli_exe()).arg(&good).output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("0x0000006C Present size_bytes=16"));

    let output = Command::new(resolve_cli_exe()).arg(&good).arg("--strict").output().unwrap();
    assert!(!output.status.success());

    let output = Command::new(resolve_cli_exe())
        .arg(&good)
        .args(["--replay", "--json", "--fence", "9"])
        .output()
        .unwrap();
    // The unknown opcode aborts the replayed stream.
    assert!(!output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["signal_fence"], serde_json::json!(9));
    assert_eq!(json["error_offset"], serde_json::json!(0x64));
}
