use crate::protocol::{decode_cmd, parse_cmd_stream, AeroGpuCmd};

use aero_protocol::aerogpu::aerogpu_cmd::{
    AerogpuCmdDecodeError, AerogpuCmdHdr as ProtocolCmdHdr, AerogpuCmdOpcode,
    AerogpuCmdStream, AerogpuCmdStreamHeader as ProtocolCmdStreamHeader, AerogpuVertexBufferBinding,
    AEROGPU_CMD_STREAM_MAGIC, AEROGPU_PRESENT_FLAG_VSYNC,
};
use aero_protocol::aerogpu::aerogpu_pci::{AerogpuAbiError, AEROGPU_ABI_MAJOR, AEROGPU_ABI_VERSION_U32};
use aero_protocol::aerogpu::cmd_writer::AerogpuCmdWriter;

const CMD_STREAM_SIZE_BYTES_OFFSET: usize = core::mem::offset_of!(ProtocolCmdStreamHeader, size_bytes);
const CMD_HDR_SIZE_BYTES_OFFSET: usize = core::mem::offset_of!(ProtocolCmdHdr, size_bytes);

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn build_stream_with_abi(abi_version: u32, packets: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut out = Vec::new();

    // aerogpu_cmd_stream_header (24 bytes)
    push_u32(&mut out, AEROGPU_CMD_STREAM_MAGIC);
    push_u32(&mut out, abi_version);
    push_u32(&mut out, 0); // size_bytes (patch later)
    push_u32(&mut out, 0); // flags
    push_u32(&mut out, 0); // reserved0
    push_u32(&mut out, 0); // reserved1

    packets(&mut out);

    let size_bytes = out.len() as u32;
    out[CMD_STREAM_SIZE_BYTES_OFFSET..CMD_STREAM_SIZE_BYTES_OFFSET + 4].copy_from_slice(&size_bytes.to_le_bytes());
    out
}

fn build_stream(packets: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    build_stream_with_abi(AEROGPU_ABI_VERSION_U32, packets)
}

fn emit_packet(out: &mut Vec<u8>, opcode: u32, payload: impl FnOnce(&mut Vec<u8>)) {
    let start = out.len();
    push_u32(out, opcode);
    push_u32(out, 0); // size_bytes placeholder
    payload(out);
    pad4(out);

    let size_bytes = (out.len() - start) as u32;
    assert!(size_bytes >= 8);
    out[start + CMD_HDR_SIZE_BYTES_OFFSET..start + CMD_HDR_SIZE_BYTES_OFFSET + 4]
        .copy_from_slice(&size_bytes.to_le_bytes());
}

#[test]
fn protocol_decodes_hand_built_packets() {
    let upload = [1u8, 2, 3, 4, 5];
    let stream = build_stream(|out| {
        emit_packet(out, AerogpuCmdOpcode::DebugMarker as u32, |out| {
            out.extend_from_slice(b"mark");
        });
        emit_packet(out, AerogpuCmdOpcode::UploadResource as u32, |out| {
            push_u32(out, 7); // resource_handle
            push_u32(out, 0); // reserved0
            push_u64(out, 16); // offset_bytes
            push_u64(out, upload.len() as u64);
            out.extend_from_slice(&upload);
        });
        emit_packet(out, AerogpuCmdOpcode::SetRenderTargets as u32, |out| {
            push_u32(out, 2); // color_count
            push_u32(out, 9); // depth_stencil
            push_u32(out, 3);
            push_u32(out, 4);
            for _ in 2..8 {
                push_u32(out, 0);
            }
        });
        emit_packet(out, AerogpuCmdOpcode::SetVertexBuffers as u32, |out| {
            push_u32(out, 1); // start_slot
            push_u32(out, 1); // buffer_count
            push_u32(out, 11); // buffer
            push_u32(out, 32); // stride_bytes
            push_u32(out, 4); // offset_bytes
            push_u32(out, 0); // reserved0
        });
        emit_packet(out, AerogpuCmdOpcode::ReleaseSharedSurface as u32, |out| {
            push_u64(out, 0x1122_3344_5566_7788);
            push_u64(out, 0);
        });
        emit_packet(out, AerogpuCmdOpcode::Present as u32, |out| {
            push_u32(out, 0);
            push_u32(out, AEROGPU_PRESENT_FLAG_VSYNC);
        });
    });

    let view = parse_cmd_stream(&stream).unwrap();
    let abi = view.header.abi_version;
    assert_eq!(abi, AEROGPU_ABI_VERSION_U32);

    let mut colors = [0u32; 8];
    colors[0] = 3;
    colors[1] = 4;
    assert_eq!(
        view.cmds,
        vec![
            AeroGpuCmd::DebugMarker { bytes: b"mark" },
            AeroGpuCmd::UploadResource {
                resource_handle: 7,
                offset_bytes: 16,
                size_bytes: 5,
                data: &upload,
            },
            AeroGpuCmd::SetRenderTargets {
                color_count: 2,
                depth_stencil: 9,
                colors,
            },
            AeroGpuCmd::SetVertexBuffers {
                start_slot: 1,
                bindings: vec![AerogpuVertexBufferBinding {
                    buffer: 11,
                    stride_bytes: 32,
                    offset_bytes: 4,
                    reserved0: 0,
                }],
            },
            AeroGpuCmd::ReleaseSharedSurface {
                share_token: 0x1122_3344_5566_7788,
            },
            AeroGpuCmd::Present {
                scanout_id: 0,
                flags: AEROGPU_PRESENT_FLAG_VSYNC,
            },
        ]
    );
}

#[test]
fn protocol_decodes_writer_output() {
    let mut w = AerogpuCmdWriter::new();
    w.create_buffer(1, 1, 256, 0, 0);
    w.set_viewport(0.0, 0.0, 640.0, 480.0, 0.0, 1.0);
    w.clear(1, [0.25, 0.5, 0.75, 1.0], 1.0, 0);
    w.draw_indexed(6, 1, 0, -2, 0);
    w.export_shared_surface(3, 0xABCD);
    w.flush();
    let stream = w.finish();

    let view = parse_cmd_stream(&stream).unwrap();
    assert_eq!(view.cmds.len(), 6);
    assert_eq!(
        view.cmds[0],
        AeroGpuCmd::CreateBuffer {
            buffer_handle: 1,
            usage_flags: 1,
            size_bytes: 256,
            backing_alloc_id: 0,
            backing_offset_bytes: 0,
        }
    );
    assert_eq!(
        view.cmds[2],
        AeroGpuCmd::Clear {
            flags: 1,
            color_rgba: [0.25, 0.5, 0.75, 1.0],
            depth: 1.0,
            stencil: 0,
        }
    );
    assert_eq!(
        view.cmds[3],
        AeroGpuCmd::DrawIndexed {
            index_count: 6,
            instance_count: 1,
            first_index: 0,
            base_vertex: -2,
            first_instance: 0,
        }
    );
    assert_eq!(view.cmds[5], AeroGpuCmd::Flush);
    for cmd in &view.cmds {
        assert!(AerogpuCmdOpcode::from_u32(cmd.opcode() as u32).is_some());
    }
}

#[test]
fn set_render_targets_count_beyond_payload_is_rejected() {
    // color_count says two handles, the packet only has room for one.
    let stream = build_stream(|out| {
        emit_packet(out, AerogpuCmdOpcode::SetRenderTargets as u32, |out| {
            push_u32(out, 2); // color_count
            push_u32(out, 0); // depth_stencil
            push_u32(out, 5);
        });
    });

    let err = parse_cmd_stream(&stream).unwrap_err();
    assert_eq!(
        err,
        AerogpuCmdDecodeError::PayloadTooSmall {
            opcode: AerogpuCmdOpcode::SetRenderTargets,
            expected: 24,
            found: 20,
        }
    );
}

#[test]
fn upload_size_larger_than_packet_is_rejected() {
    let stream = build_stream(|out| {
        emit_packet(out, AerogpuCmdOpcode::UploadResource as u32, |out| {
            push_u32(out, 1);
            push_u32(out, 0);
            push_u64(out, 0);
            push_u64(out, u64::from(u32::MAX)); // far more than follows
            out.extend_from_slice(&[0u8; 8]);
        });
    });

    assert!(matches!(
        parse_cmd_stream(&stream),
        Err(AerogpuCmdDecodeError::PayloadTooSmall {
            opcode: AerogpuCmdOpcode::UploadResource,
            ..
        })
    ));
}

#[test]
fn unknown_opcode_is_a_hard_error() {
    let stream = build_stream(|out| {
        emit_packet(out, AerogpuCmdOpcode::Nop as u32, |_| {});
        emit_packet(out, 0xDEAD, |out| push_u32(out, 0));
    });

    let stream = AerogpuCmdStream::open(&stream).unwrap();
    let results: Vec<_> = stream.packets().map(|p| p.and_then(|p| decode_cmd(&p))).collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], Ok(AeroGpuCmd::Nop));
    assert_eq!(results[1], Err(AerogpuCmdDecodeError::UnknownOpcode { found: 0xDEAD }));
}

#[test]
fn extended_packets_from_newer_minor_decode_known_prefix() {
    let stream = build_stream(|out| {
        emit_packet(out, AerogpuCmdOpcode::PresentEx as u32, |out| {
            push_u32(out, 1); // scanout_id
            push_u32(out, AEROGPU_PRESENT_FLAG_VSYNC);
            push_u32(out, 0); // d3d9_present_flags
            push_u32(out, 0); // reserved0
            push_u32(out, 0xFFFF_FFFF); // appended field
        });
    });

    let view = parse_cmd_stream(&stream).unwrap();
    assert_eq!(
        view.cmds,
        vec![AeroGpuCmd::PresentEx {
            scanout_id: 1,
            flags: AEROGPU_PRESENT_FLAG_VSYNC,
            d3d9_present_flags: 0,
        }]
    );
}

#[test]
fn major_version_mismatch_is_rejected() {
    let stream = build_stream_with_abi((AEROGPU_ABI_MAJOR + 1) << 16, |out| {
        emit_packet(out, AerogpuCmdOpcode::Nop as u32, |_| {});
    });

    assert!(matches!(
        parse_cmd_stream(&stream),
        Err(AerogpuCmdDecodeError::UnsupportedAbiVersion(
            AerogpuAbiError::UnsupportedMajor { .. }
        ))
    ));
}

#[test]
fn every_truncation_is_a_structural_error() {
    let mut w = AerogpuCmdWriter::new();
    w.create_buffer(1, 1, 64, 0, 0);
    w.upload_resource(1, 0, &[7u8; 10]);
    w.set_render_targets(&[2, 3], 0);
    w.present(0, AEROGPU_PRESENT_FLAG_VSYNC);
    let stream = w.finish();

    for len in 0..stream.len() {
        let mut truncated = stream[..len].to_vec();
        // Keep the header consistent with the buffer so packet decoding, not
        // just the header check, sees the cut.
        if len >= ProtocolCmdStreamHeader::SIZE_BYTES {
            truncated[CMD_STREAM_SIZE_BYTES_OFFSET..CMD_STREAM_SIZE_BYTES_OFFSET + 4]
                .copy_from_slice(&(len as u32).to_le_bytes());
        }
        if let Ok(view) = parse_cmd_stream(&truncated) {
            assert!(view.cmds.len() < 4, "prefix of {len} bytes decoded every packet");
        }
    }
}
