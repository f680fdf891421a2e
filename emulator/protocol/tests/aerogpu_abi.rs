use core::mem::offset_of;

use aero_protocol::aerogpu::aerogpu_cmd::{
    AerogpuCmdCopyBuffer, AerogpuCmdCopyTexture2d, AerogpuCmdCreateBuffer, AerogpuCmdCreateTexture2d,
    AerogpuCmdDispatch, AerogpuCmdExportSharedSurface, AerogpuCmdOpcode, AerogpuCmdPresentEx,
    AerogpuCmdReleaseSharedSurface, AerogpuCmdSetRenderTargets, AerogpuCmdSetShaderConstantsB,
    AerogpuCmdSetShaderConstantsI, AerogpuCmdStreamHeader,
};
use aero_protocol::aerogpu::aerogpu_pci::{
    parse_and_validate_abi_version_u32, AerogpuAbiError, AerogpuAbiVersion, AerogpuFormat, AEROGPU_ABI_MAJOR,
    AEROGPU_ABI_MINOR, AEROGPU_ABI_VERSION_U32,
};
use aero_protocol::aerogpu::aerogpu_ring::{
    AerogpuRingDecodeError, AerogpuSubmitDesc, AEROGPU_SUBMIT_FLAG_NO_IRQ, AEROGPU_SUBMIT_FLAG_PRESENT,
};

#[test]
fn abi_version_packs_major_and_minor() {
    let v = AerogpuAbiVersion::from_u32(AEROGPU_ABI_VERSION_U32);
    assert_eq!(u32::from(v.major), AEROGPU_ABI_MAJOR);
    assert_eq!(u32::from(v.minor), AEROGPU_ABI_MINOR);
    assert_eq!(v.to_u32(), AEROGPU_ABI_VERSION_U32);
}

#[test]
fn abi_version_rejects_unknown_major() {
    let version_u32 = ((AEROGPU_ABI_MAJOR + 1) << 16) | AEROGPU_ABI_MINOR;
    let err = parse_and_validate_abi_version_u32(version_u32).unwrap_err();
    assert!(matches!(err, AerogpuAbiError::UnsupportedMajor { .. }));

    let err = parse_and_validate_abi_version_u32(AEROGPU_ABI_MINOR).unwrap_err();
    assert_eq!(err, AerogpuAbiError::UnsupportedMajor { found: 0 });
}

#[test]
fn abi_version_minor_must_not_exceed_supported() {
    let err = parse_and_validate_abi_version_u32((AEROGPU_ABI_MAJOR << 16) | 999).unwrap_err();
    assert_eq!(err, AerogpuAbiError::UnsupportedMinor { found: 999 });

    for minor in 0..=AEROGPU_ABI_MINOR {
        let parsed = parse_and_validate_abi_version_u32((AEROGPU_ABI_MAJOR << 16) | minor).unwrap();
        assert_eq!(u32::from(parsed.minor), minor);
    }
}

#[test]
fn layout_offsets_match_c_header() {
    assert_eq!(offset_of!(AerogpuCmdStreamHeader, size_bytes), 8);
    assert_eq!(offset_of!(AerogpuCmdStreamHeader, flags), 12);

    assert_eq!(offset_of!(AerogpuCmdCreateBuffer, size_bytes), 16);
    assert_eq!(offset_of!(AerogpuCmdCreateBuffer, backing_alloc_id), 24);
    assert_eq!(offset_of!(AerogpuCmdCreateTexture2d, row_pitch_bytes), 36);
    assert_eq!(offset_of!(AerogpuCmdCopyBuffer, size_bytes), 32);
    assert_eq!(offset_of!(AerogpuCmdCopyBuffer, flags), 40);
    assert_eq!(offset_of!(AerogpuCmdCopyTexture2d, flags), 56);
    assert_eq!(offset_of!(AerogpuCmdSetRenderTargets, colors), 16);
    assert_eq!(offset_of!(AerogpuCmdPresentEx, d3d9_present_flags), 16);
    assert_eq!(offset_of!(AerogpuCmdExportSharedSurface, share_token), 16);
    assert_eq!(offset_of!(AerogpuCmdReleaseSharedSurface, share_token), 8);
    assert_eq!(offset_of!(AerogpuCmdSetShaderConstantsI, vec4_count), 16);
    assert_eq!(offset_of!(AerogpuCmdSetShaderConstantsB, bool_count), 16);
    assert_eq!(offset_of!(AerogpuCmdDispatch, group_count_z), 16);
}

#[test]
fn opcode_table_is_consistent() {
    for opcode in AerogpuCmdOpcode::ALL {
        assert_eq!(AerogpuCmdOpcode::from_u32(opcode as u32), Some(opcode));
        assert!(opcode.min_size_bytes() >= 8);
        assert_eq!(opcode.min_size_bytes() % 4, 0);
    }
    assert_eq!(AerogpuCmdOpcode::from_u32(0x7FF), None);
    assert_eq!(AerogpuCmdOpcode::from_u32(0x207), Some(AerogpuCmdOpcode::SetShaderConstantsI));
    assert_eq!(AerogpuCmdOpcode::from_u32(0x208), Some(AerogpuCmdOpcode::SetShaderConstantsB));
    assert_eq!(AerogpuCmdOpcode::from_u32(0x603), Some(AerogpuCmdOpcode::Dispatch));
    // D3D10/11 binding-table opcodes are not part of this ABI.
    assert_eq!(AerogpuCmdOpcode::from_u32(0x520), None);
}

#[test]
fn opcode_ranges_follow_groups() {
    assert!((AerogpuCmdOpcode::Nop as u32) < 0x100);
    assert!((0x100..0x200).contains(&(AerogpuCmdOpcode::CopyTexture2d as u32)));
    assert!((0x200..0x300).contains(&(AerogpuCmdOpcode::SetInputLayout as u32)));
    assert!((0x300..0x400).contains(&(AerogpuCmdOpcode::SetRasterizerState as u32)));
    assert!((0x400..0x500).contains(&(AerogpuCmdOpcode::SetScissor as u32)));
    assert!((0x500..0x600).contains(&(AerogpuCmdOpcode::SetRenderState as u32)));
    assert!((0x200..0x300).contains(&(AerogpuCmdOpcode::SetShaderConstantsB as u32)));
    assert!((0x600..0x700).contains(&(AerogpuCmdOpcode::Dispatch as u32)));
    assert!((0x700..0x800).contains(&(AerogpuCmdOpcode::Flush as u32)));
}

#[test]
fn format_helpers() {
    assert_eq!(AerogpuFormat::from_u32(1), Some(AerogpuFormat::B8G8R8A8Unorm));
    assert_eq!(AerogpuFormat::from_u32(7), None);
    assert_eq!(AerogpuFormat::from_u32(71), Some(AerogpuFormat::BC7RgbaUnormSrgb));

    assert!(AerogpuFormat::D24UnormS8Uint.is_depth_stencil());
    assert!(!AerogpuFormat::R8G8B8A8Unorm.is_depth_stencil());

    assert!(AerogpuFormat::BC1RgbaUnorm.is_block_compressed());
    assert_eq!(AerogpuFormat::BC1RgbaUnorm.tight_row_pitch_bytes(13), Some(4 * 8));
    assert_eq!(AerogpuFormat::BC3RgbaUnorm.block_rows(5), 2);
    assert_eq!(AerogpuFormat::B5G6R5Unorm.tight_row_pitch_bytes(3), Some(6));
    assert_eq!(AerogpuFormat::B8G8R8A8Unorm.tight_row_pitch_bytes(64), Some(256));
}

#[test]
fn submit_desc_roundtrips_and_accepts_extensions() {
    let desc = AerogpuSubmitDesc {
        desc_size_bytes: AerogpuSubmitDesc::SIZE_BYTES as u32,
        flags: AEROGPU_SUBMIT_FLAG_PRESENT | AEROGPU_SUBMIT_FLAG_NO_IRQ,
        context_id: 0,
        engine_id: 0,
        cmd_gpa: 0x1_0000_0000,
        cmd_size_bytes: 256,
        reserved0: 0,
        alloc_table_gpa: 0x2000,
        alloc_table_size_bytes: 64,
        reserved1: 0,
        signal_fence: 42,
        reserved2: 0,
    };
    let mut bytes = desc.encode_le().to_vec();
    let decoded = AerogpuSubmitDesc::decode_from_le_bytes(&bytes).unwrap();
    let (cmd_gpa, signal_fence) = (decoded.cmd_gpa, decoded.signal_fence);
    assert_eq!(cmd_gpa, 0x1_0000_0000);
    assert_eq!(signal_fence, 42);
    assert!(decoded.is_present());
    decoded.validate_prefix().unwrap();

    bytes.resize(128, 0);
    bytes[0..4].copy_from_slice(&128u32.to_le_bytes());
    AerogpuSubmitDesc::decode_from_le_bytes(&bytes)
        .unwrap()
        .validate_prefix()
        .unwrap();
}

#[test]
fn submit_desc_rejects_too_small() {
    let mut buf = vec![0u8; AerogpuSubmitDesc::SIZE_BYTES];
    buf[0..4].copy_from_slice(&32u32.to_le_bytes());
    let desc = AerogpuSubmitDesc::decode_from_le_bytes(&buf).unwrap();
    assert_eq!(
        desc.validate_prefix().unwrap_err(),
        AerogpuRingDecodeError::BadSizeField { found: 32 }
    );

    assert_eq!(
        AerogpuSubmitDesc::decode_from_le_bytes(&buf[..40]).unwrap_err(),
        AerogpuRingDecodeError::BufferTooSmall { found: 40 }
    );
}
