//! Submission descriptor layout.
//!
//! Source of truth: `drivers/aerogpu/protocol/aerogpu_ring.h`. Only the
//! per-submission descriptor is mirrored here; the ring header and fence page
//! belong to the transport and are not consumed by the command processor.

use super::aerogpu_cmd::read_u32_le;
use super::aerogpu_cmd::read_u64_le;

/// The submission contains a present; the host may pace it against vblank.
pub const AEROGPU_SUBMIT_FLAG_PRESENT: u32 = 1u32 << 0;
/// Do not raise a fence interrupt when this submission completes.
pub const AEROGPU_SUBMIT_FLAG_NO_IRQ: u32 = 1u32 << 1;

/// MVP ABI: every submission uses context 0 (single global handle namespace).
pub const AEROGPU_DEFAULT_CONTEXT_ID: u32 = 0;

#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct AerogpuSubmitDesc {
    pub desc_size_bytes: u32,
    pub flags: u32,
    pub context_id: u32,
    pub engine_id: u32,
    pub cmd_gpa: u64,
    pub cmd_size_bytes: u32,
    pub reserved0: u32,
    pub alloc_table_gpa: u64,
    pub alloc_table_size_bytes: u32,
    pub reserved1: u32,
    pub signal_fence: u64,
    pub reserved2: u64,
}

const _: () = assert!(core::mem::size_of::<AerogpuSubmitDesc>() == AerogpuSubmitDesc::SIZE_BYTES);

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AerogpuRingDecodeError {
    #[error("submit descriptor buffer too small ({found} bytes)")]
    BufferTooSmall { found: usize },
    #[error("submit descriptor desc_size_bytes {found} is smaller than the known layout")]
    BadSizeField { found: u32 },
}

impl AerogpuSubmitDesc {
    pub const SIZE_BYTES: usize = 64;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Result<Self, AerogpuRingDecodeError> {
        let short = AerogpuRingDecodeError::BufferTooSmall { found: buf.len() };
        let u32_at = |off: usize| read_u32_le(buf, off).ok_or(short);
        let u64_at = |off: usize| read_u64_le(buf, off).ok_or(short);

        Ok(Self {
            desc_size_bytes: u32_at(0)?,
            flags: u32_at(4)?,
            context_id: u32_at(8)?,
            engine_id: u32_at(12)?,
            cmd_gpa: u64_at(16)?,
            cmd_size_bytes: u32_at(24)?,
            reserved0: u32_at(28)?,
            alloc_table_gpa: u64_at(32)?,
            alloc_table_size_bytes: u32_at(40)?,
            reserved1: u32_at(44)?,
            signal_fence: u64_at(48)?,
            reserved2: u64_at(56)?,
        })
    }

    /// Descriptors may grow in newer ABI minors; only reject ones that are
    /// smaller than what this host reads.
    pub fn validate_prefix(&self) -> Result<(), AerogpuRingDecodeError> {
        let found = self.desc_size_bytes;
        if (found as usize) < Self::SIZE_BYTES {
            return Err(AerogpuRingDecodeError::BadSizeField { found });
        }
        Ok(())
    }

    pub fn encode_le(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        let mut put = |off: usize, bytes: &[u8]| out[off..off + bytes.len()].copy_from_slice(bytes);
        put(0, &{ self.desc_size_bytes }.to_le_bytes());
        put(4, &{ self.flags }.to_le_bytes());
        put(8, &{ self.context_id }.to_le_bytes());
        put(12, &{ self.engine_id }.to_le_bytes());
        put(16, &{ self.cmd_gpa }.to_le_bytes());
        put(24, &{ self.cmd_size_bytes }.to_le_bytes());
        put(32, &{ self.alloc_table_gpa }.to_le_bytes());
        put(40, &{ self.alloc_table_size_bytes }.to_le_bytes());
        put(48, &{ self.signal_fence }.to_le_bytes());
        out
    }

    pub fn is_present(&self) -> bool {
        self.flags & AEROGPU_SUBMIT_FLAG_PRESENT != 0
    }
}
