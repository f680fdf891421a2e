//! ABI versioning and the texture format enumeration.
//!
//! Source of truth: `drivers/aerogpu/protocol/aerogpu_pci.h`.

pub const AEROGPU_ABI_MAJOR: u32 = 1;
pub const AEROGPU_ABI_MINOR: u32 = 2;
pub const AEROGPU_ABI_VERSION_U32: u32 = (AEROGPU_ABI_MAJOR << 16) | AEROGPU_ABI_MINOR;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AerogpuAbiVersion {
    pub major: u16,
    pub minor: u16,
}

impl AerogpuAbiVersion {
    pub const fn from_u32(v: u32) -> Self {
        Self {
            major: (v >> 16) as u16,
            minor: (v & 0xFFFF) as u16,
        }
    }

    pub const fn to_u32(self) -> u32 {
        ((self.major as u32) << 16) | self.minor as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AerogpuAbiError {
    #[error("unsupported AeroGPU ABI major version {found} (host supports {AEROGPU_ABI_MAJOR})")]
    UnsupportedMajor { found: u16 },
    #[error("unsupported AeroGPU ABI minor version {found} (host supports <= {AEROGPU_ABI_MINOR})")]
    UnsupportedMinor { found: u16 },
}

/// Split a packed `abi_version` and check it against the host's ABI.
///
/// The major version must match exactly. A guest built against a newer minor
/// may emit opcodes this host has never heard of, so minors above
/// [`AEROGPU_ABI_MINOR`] are rejected at the stream level; older minors are
/// accepted as-is.
pub fn parse_and_validate_abi_version_u32(v: u32) -> Result<AerogpuAbiVersion, AerogpuAbiError> {
    let version = AerogpuAbiVersion::from_u32(v);
    if u32::from(version.major) != AEROGPU_ABI_MAJOR {
        return Err(AerogpuAbiError::UnsupportedMajor {
            found: version.major,
        });
    }
    if u32::from(version.minor) > AEROGPU_ABI_MINOR {
        return Err(AerogpuAbiError::UnsupportedMinor {
            found: version.minor,
        });
    }
    Ok(version)
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AerogpuFormat {
    Invalid = 0,

    B8G8R8A8Unorm = 1,
    B8G8R8X8Unorm = 2,
    R8G8B8A8Unorm = 3,
    R8G8B8X8Unorm = 4,
    B5G6R5Unorm = 5,
    B5G5R5A1Unorm = 6,

    B8G8R8A8UnormSrgb = 8,
    B8G8R8X8UnormSrgb = 9,
    R8G8B8A8UnormSrgb = 10,
    R8G8B8X8UnormSrgb = 11,

    D24UnormS8Uint = 32,
    D32Float = 33,

    BC1RgbaUnorm = 64,
    BC1RgbaUnormSrgb = 65,
    BC2RgbaUnorm = 66,
    BC2RgbaUnormSrgb = 67,
    BC3RgbaUnorm = 68,
    BC3RgbaUnormSrgb = 69,
    BC7RgbaUnorm = 70,
    BC7RgbaUnormSrgb = 71,
}

impl AerogpuFormat {
    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Invalid,
            1 => Self::B8G8R8A8Unorm,
            2 => Self::B8G8R8X8Unorm,
            3 => Self::R8G8B8A8Unorm,
            4 => Self::R8G8B8X8Unorm,
            5 => Self::B5G6R5Unorm,
            6 => Self::B5G5R5A1Unorm,
            8 => Self::B8G8R8A8UnormSrgb,
            9 => Self::B8G8R8X8UnormSrgb,
            10 => Self::R8G8B8A8UnormSrgb,
            11 => Self::R8G8B8X8UnormSrgb,
            32 => Self::D24UnormS8Uint,
            33 => Self::D32Float,
            64 => Self::BC1RgbaUnorm,
            65 => Self::BC1RgbaUnormSrgb,
            66 => Self::BC2RgbaUnorm,
            67 => Self::BC2RgbaUnormSrgb,
            68 => Self::BC3RgbaUnorm,
            69 => Self::BC3RgbaUnormSrgb,
            70 => Self::BC7RgbaUnorm,
            71 => Self::BC7RgbaUnormSrgb,
            _ => return None,
        })
    }

    pub const fn is_depth_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint | Self::D32Float)
    }

    pub const fn is_block_compressed(self) -> bool {
        (self as u32) >= 64 && (self as u32) <= 71
    }

    /// Bytes per 4x4 block for BC formats, bytes per texel otherwise.
    pub const fn bytes_per_block(self) -> u32 {
        match self {
            Self::Invalid => 0,
            Self::B5G6R5Unorm | Self::B5G5R5A1Unorm => 2,
            Self::BC1RgbaUnorm | Self::BC1RgbaUnormSrgb => 8,
            Self::BC2RgbaUnorm
            | Self::BC2RgbaUnormSrgb
            | Self::BC3RgbaUnorm
            | Self::BC3RgbaUnormSrgb
            | Self::BC7RgbaUnorm
            | Self::BC7RgbaUnormSrgb => 16,
            _ => 4,
        }
    }

    /// Width/height in texels of one addressable block.
    pub const fn block_dim(self) -> u32 {
        if self.is_block_compressed() {
            4
        } else {
            1
        }
    }

    /// Tightly packed size of one row of blocks for a mip of `width` texels.
    pub fn tight_row_pitch_bytes(self, width: u32) -> Option<u64> {
        let dim = self.block_dim();
        let blocks = u64::from(width).div_ceil(u64::from(dim));
        blocks.checked_mul(u64::from(self.bytes_per_block()))
    }

    /// Number of block rows for a mip of `height` texels.
    pub fn block_rows(self, height: u32) -> u64 {
        u64::from(height).div_ceil(u64::from(self.block_dim()))
    }
}
