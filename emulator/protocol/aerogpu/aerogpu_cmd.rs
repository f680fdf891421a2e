//! AeroGPU command stream layouts, header validation and the packet iterator.
//!
//! Source of truth: `drivers/aerogpu/protocol/aerogpu_cmd.h`.
//!
//! A command stream is a 24-byte [`AerogpuCmdStreamHeader`] followed by a
//! sequence of self-describing packets, each starting with an
//! [`AerogpuCmdHdr`]. All integers are little-endian; `*_f32` fields carry
//! IEEE-754 single precision bit patterns.
//!
//! The layout structs below mirror the C header byte for byte and are used for
//! `offset_of!`/`size_of` bookkeeping. Decoding never transmutes guest bytes
//! into them; fields are read one at a time after length checks.

use core::mem::size_of;

use super::aerogpu_pci::{parse_and_validate_abi_version_u32, AerogpuAbiError};

pub type AerogpuHandle = u32;

/// Handle value meaning "no resource" in bind packets.
pub const AEROGPU_HANDLE_NULL: AerogpuHandle = 0;

pub const AEROGPU_CMD_STREAM_MAGIC: u32 = 0x444D_4341; // "ACMD" LE

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuCmdStreamFlags {
    None = 0,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct AerogpuCmdStreamHeader {
    pub magic: u32,
    pub abi_version: u32,
    pub size_bytes: u32,
    pub flags: u32,
    pub reserved0: u32,
    pub reserved1: u32,
}

impl AerogpuCmdStreamHeader {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct AerogpuCmdHdr {
    pub opcode: u32,
    pub size_bytes: u32,
}

impl AerogpuCmdHdr {
    pub const SIZE_BYTES: usize = 8;
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AerogpuCmdOpcode {
    Nop = 0,
    DebugMarker = 1,

    CreateBuffer = 0x100,
    CreateTexture2d = 0x101,
    DestroyResource = 0x102,
    ResourceDirtyRange = 0x103,
    UploadResource = 0x104,
    CopyBuffer = 0x105,
    CopyTexture2d = 0x106,

    CreateShaderDxbc = 0x200,
    DestroyShader = 0x201,
    BindShaders = 0x202,
    SetShaderConstantsF = 0x203,
    CreateInputLayout = 0x204,
    DestroyInputLayout = 0x205,
    SetInputLayout = 0x206,
    SetShaderConstantsI = 0x207,
    SetShaderConstantsB = 0x208,

    SetBlendState = 0x300,
    SetDepthStencilState = 0x301,
    SetRasterizerState = 0x302,

    SetRenderTargets = 0x400,
    SetViewport = 0x401,
    SetScissor = 0x402,

    SetVertexBuffers = 0x500,
    SetIndexBuffer = 0x501,
    SetPrimitiveTopology = 0x502,
    SetTexture = 0x510,
    SetSamplerState = 0x511,
    SetRenderState = 0x512,

    Clear = 0x600,
    Draw = 0x601,
    DrawIndexed = 0x602,
    Dispatch = 0x603,

    Present = 0x700,
    PresentEx = 0x701,

    ExportSharedSurface = 0x710,
    ImportSharedSurface = 0x711,
    ReleaseSharedSurface = 0x712,

    Flush = 0x720,
}

impl AerogpuCmdOpcode {
    pub const ALL: [Self; 40] = [
        Self::Nop,
        Self::DebugMarker,
        Self::CreateBuffer,
        Self::CreateTexture2d,
        Self::DestroyResource,
        Self::ResourceDirtyRange,
        Self::UploadResource,
        Self::CopyBuffer,
        Self::CopyTexture2d,
        Self::CreateShaderDxbc,
        Self::DestroyShader,
        Self::BindShaders,
        Self::SetShaderConstantsF,
        Self::CreateInputLayout,
        Self::DestroyInputLayout,
        Self::SetInputLayout,
        Self::SetShaderConstantsI,
        Self::SetShaderConstantsB,
        Self::SetBlendState,
        Self::SetDepthStencilState,
        Self::SetRasterizerState,
        Self::SetRenderTargets,
        Self::SetViewport,
        Self::SetScissor,
        Self::SetVertexBuffers,
        Self::SetIndexBuffer,
        Self::SetPrimitiveTopology,
        Self::SetTexture,
        Self::SetSamplerState,
        Self::SetRenderState,
        Self::Clear,
        Self::Draw,
        Self::DrawIndexed,
        Self::Dispatch,
        Self::Present,
        Self::PresentEx,
        Self::ExportSharedSurface,
        Self::ImportSharedSurface,
        Self::ReleaseSharedSurface,
        Self::Flush,
    ];

    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Nop,
            1 => Self::DebugMarker,
            0x100 => Self::CreateBuffer,
            0x101 => Self::CreateTexture2d,
            0x102 => Self::DestroyResource,
            0x103 => Self::ResourceDirtyRange,
            0x104 => Self::UploadResource,
            0x105 => Self::CopyBuffer,
            0x106 => Self::CopyTexture2d,
            0x200 => Self::CreateShaderDxbc,
            0x201 => Self::DestroyShader,
            0x202 => Self::BindShaders,
            0x203 => Self::SetShaderConstantsF,
            0x204 => Self::CreateInputLayout,
            0x205 => Self::DestroyInputLayout,
            0x206 => Self::SetInputLayout,
            0x207 => Self::SetShaderConstantsI,
            0x208 => Self::SetShaderConstantsB,
            0x300 => Self::SetBlendState,
            0x301 => Self::SetDepthStencilState,
            0x302 => Self::SetRasterizerState,
            0x400 => Self::SetRenderTargets,
            0x401 => Self::SetViewport,
            0x402 => Self::SetScissor,
            0x500 => Self::SetVertexBuffers,
            0x501 => Self::SetIndexBuffer,
            0x502 => Self::SetPrimitiveTopology,
            0x510 => Self::SetTexture,
            0x511 => Self::SetSamplerState,
            0x512 => Self::SetRenderState,
            0x600 => Self::Clear,
            0x601 => Self::Draw,
            0x602 => Self::DrawIndexed,
            0x603 => Self::Dispatch,
            0x700 => Self::Present,
            0x701 => Self::PresentEx,
            0x710 => Self::ExportSharedSurface,
            0x711 => Self::ImportSharedSurface,
            0x712 => Self::ReleaseSharedSurface,
            0x720 => Self::Flush,
            _ => return None,
        })
    }

    /// Size of the fixed part of the packet, header included. Packets may be
    /// longer (variable payloads or fields appended by newer ABI minors).
    pub const fn min_size_bytes(self) -> usize {
        match self {
            Self::Nop | Self::DebugMarker => AerogpuCmdHdr::SIZE_BYTES,
            Self::CreateBuffer => AerogpuCmdCreateBuffer::SIZE_BYTES,
            Self::CreateTexture2d => AerogpuCmdCreateTexture2d::SIZE_BYTES,
            Self::DestroyResource => AerogpuCmdDestroyResource::SIZE_BYTES,
            Self::ResourceDirtyRange => AerogpuCmdResourceDirtyRange::SIZE_BYTES,
            Self::UploadResource => AerogpuCmdUploadResource::SIZE_BYTES,
            Self::CopyBuffer => AerogpuCmdCopyBuffer::SIZE_BYTES,
            Self::CopyTexture2d => AerogpuCmdCopyTexture2d::SIZE_BYTES,
            Self::CreateShaderDxbc => AerogpuCmdCreateShaderDxbc::SIZE_BYTES,
            Self::DestroyShader => AerogpuCmdDestroyShader::SIZE_BYTES,
            Self::BindShaders => AerogpuCmdBindShaders::SIZE_BYTES,
            Self::SetShaderConstantsF => AerogpuCmdSetShaderConstantsF::SIZE_BYTES,
            Self::CreateInputLayout => AerogpuCmdCreateInputLayout::SIZE_BYTES,
            Self::DestroyInputLayout => AerogpuCmdDestroyInputLayout::SIZE_BYTES,
            Self::SetInputLayout => AerogpuCmdSetInputLayout::SIZE_BYTES,
            Self::SetShaderConstantsI => AerogpuCmdSetShaderConstantsI::SIZE_BYTES,
            Self::SetShaderConstantsB => AerogpuCmdSetShaderConstantsB::SIZE_BYTES,
            Self::SetBlendState => AerogpuCmdSetBlendState::SIZE_BYTES,
            Self::SetDepthStencilState => AerogpuCmdSetDepthStencilState::SIZE_BYTES,
            Self::SetRasterizerState => AerogpuCmdSetRasterizerState::SIZE_BYTES,
            // `colors[]` is only read up to `color_count`; see `SET_RENDER_TARGETS_PREFIX_BYTES`.
            Self::SetRenderTargets => SET_RENDER_TARGETS_PREFIX_BYTES,
            Self::SetViewport => AerogpuCmdSetViewport::SIZE_BYTES,
            Self::SetScissor => AerogpuCmdSetScissor::SIZE_BYTES,
            Self::SetVertexBuffers => AerogpuCmdSetVertexBuffers::SIZE_BYTES,
            Self::SetIndexBuffer => AerogpuCmdSetIndexBuffer::SIZE_BYTES,
            Self::SetPrimitiveTopology => AerogpuCmdSetPrimitiveTopology::SIZE_BYTES,
            Self::SetTexture => AerogpuCmdSetTexture::SIZE_BYTES,
            Self::SetSamplerState => AerogpuCmdSetSamplerState::SIZE_BYTES,
            Self::SetRenderState => AerogpuCmdSetRenderState::SIZE_BYTES,
            Self::Clear => AerogpuCmdClear::SIZE_BYTES,
            Self::Draw => AerogpuCmdDraw::SIZE_BYTES,
            Self::DrawIndexed => AerogpuCmdDrawIndexed::SIZE_BYTES,
            Self::Dispatch => AerogpuCmdDispatch::SIZE_BYTES,
            Self::Present => AerogpuCmdPresent::SIZE_BYTES,
            Self::PresentEx => AerogpuCmdPresentEx::SIZE_BYTES,
            Self::ExportSharedSurface => AerogpuCmdExportSharedSurface::SIZE_BYTES,
            Self::ImportSharedSurface => AerogpuCmdImportSharedSurface::SIZE_BYTES,
            Self::ReleaseSharedSurface => AerogpuCmdReleaseSharedSurface::SIZE_BYTES,
            Self::Flush => AerogpuCmdFlush::SIZE_BYTES,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuShaderStage {
    Vertex = 0,
    Pixel = 1,
    Compute = 2,
}

impl AerogpuShaderStage {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Vertex),
            1 => Some(Self::Pixel),
            2 => Some(Self::Compute),
            _ => None,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuIndexFormat {
    Uint16 = 0,
    Uint32 = 1,
}

impl AerogpuIndexFormat {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Uint16),
            1 => Some(Self::Uint32),
            _ => None,
        }
    }

    pub const fn bytes_per_index(self) -> u32 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuPrimitiveTopology {
    PointList = 1,
    LineList = 2,
    LineStrip = 3,
    TriangleList = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
}

impl AerogpuPrimitiveTopology {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::PointList),
            2 => Some(Self::LineList),
            3 => Some(Self::LineStrip),
            4 => Some(Self::TriangleList),
            5 => Some(Self::TriangleStrip),
            6 => Some(Self::TriangleFan),
            _ => None,
        }
    }
}

pub const AEROGPU_RESOURCE_USAGE_NONE: u32 = 0;
pub const AEROGPU_RESOURCE_USAGE_VERTEX_BUFFER: u32 = 1u32 << 0;
pub const AEROGPU_RESOURCE_USAGE_INDEX_BUFFER: u32 = 1u32 << 1;
pub const AEROGPU_RESOURCE_USAGE_CONSTANT_BUFFER: u32 = 1u32 << 2;
pub const AEROGPU_RESOURCE_USAGE_TEXTURE: u32 = 1u32 << 3;
pub const AEROGPU_RESOURCE_USAGE_RENDER_TARGET: u32 = 1u32 << 4;
pub const AEROGPU_RESOURCE_USAGE_DEPTH_STENCIL: u32 = 1u32 << 5;
pub const AEROGPU_RESOURCE_USAGE_SCANOUT: u32 = 1u32 << 6;

/* --------------------------- Resource management -------------------------- */

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCreateBuffer {
    pub hdr: AerogpuCmdHdr,
    pub buffer_handle: AerogpuHandle,
    pub usage_flags: u32,
    pub size_bytes: u64,
    pub backing_alloc_id: u32,
    pub backing_offset_bytes: u32,
    pub reserved0: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCreateTexture2d {
    pub hdr: AerogpuCmdHdr,
    pub texture_handle: AerogpuHandle,
    pub usage_flags: u32,
    pub format: u32, // aerogpu_format
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub row_pitch_bytes: u32,
    pub backing_alloc_id: u32,
    pub backing_offset_bytes: u32,
    pub reserved0: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDestroyResource {
    pub hdr: AerogpuCmdHdr,
    pub resource_handle: AerogpuHandle,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdResourceDirtyRange {
    pub hdr: AerogpuCmdHdr,
    pub resource_handle: AerogpuHandle,
    pub reserved0: u32,
    pub offset_bytes: u64,
    pub size_bytes: u64,
}

/// Followed by `size_bytes` of data, zero padded to 4 bytes.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdUploadResource {
    pub hdr: AerogpuCmdHdr,
    pub resource_handle: AerogpuHandle,
    pub reserved0: u32,
    pub offset_bytes: u64,
    pub size_bytes: u64,
}

pub const AEROGPU_COPY_FLAG_NONE: u32 = 0;
/// Also write the copied bytes back into the destination's guest backing.
pub const AEROGPU_COPY_FLAG_WRITEBACK_DST: u32 = 1u32 << 0;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCopyBuffer {
    pub hdr: AerogpuCmdHdr,
    pub dst_buffer: AerogpuHandle,
    pub src_buffer: AerogpuHandle,
    pub dst_offset_bytes: u64,
    pub src_offset_bytes: u64,
    pub size_bytes: u64,
    pub flags: u32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCopyTexture2d {
    pub hdr: AerogpuCmdHdr,
    pub dst_texture: AerogpuHandle,
    pub src_texture: AerogpuHandle,
    pub dst_mip_level: u32,
    pub dst_array_layer: u32,
    pub src_mip_level: u32,
    pub src_array_layer: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub src_x: u32,
    pub src_y: u32,
    pub width: u32,
    pub height: u32,
    pub flags: u32,
    pub reserved0: u32,
}

/* -------------------------------- Shaders -------------------------------- */

/// Followed by `dxbc_size_bytes` of DXBC, zero padded to 4 bytes.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCreateShaderDxbc {
    pub hdr: AerogpuCmdHdr,
    pub shader_handle: AerogpuHandle,
    pub stage: u32,
    pub dxbc_size_bytes: u32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDestroyShader {
    pub hdr: AerogpuCmdHdr,
    pub shader_handle: AerogpuHandle,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdBindShaders {
    pub hdr: AerogpuCmdHdr,
    pub vs: AerogpuHandle,
    pub ps: AerogpuHandle,
    pub cs: AerogpuHandle,
    pub reserved0: u32,
}

/// Followed by `vec4_count * 4` floats.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetShaderConstantsF {
    pub hdr: AerogpuCmdHdr,
    pub stage: u32,
    pub start_register: u32,
    pub vec4_count: u32,
    pub reserved0: u32,
}

/// Followed by `vec4_count * 4` little-endian `i32`s.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetShaderConstantsI {
    pub hdr: AerogpuCmdHdr,
    pub stage: u32,
    pub start_register: u32,
    pub vec4_count: u32,
    pub reserved0: u32,
}

/// Followed by `bool_count` registers of four `u32` lanes each. Any non-zero
/// lane reads as true; the writer replicates 0/1 across all four.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetShaderConstantsB {
    pub hdr: AerogpuCmdHdr,
    pub stage: u32,
    pub start_register: u32,
    pub bool_count: u32,
    pub reserved0: u32,
}

pub const AEROGPU_INPUT_LAYOUT_BLOB_MAGIC: u32 = 0x5941_4C49; // "ILAY" LE
pub const AEROGPU_INPUT_LAYOUT_BLOB_VERSION: u32 = 1;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuInputLayoutBlobHeader {
    pub magic: u32,
    pub version: u32,
    pub element_count: u32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AerogpuInputLayoutElementDxgi {
    pub semantic_name_hash: u32,
    pub semantic_index: u32,
    pub dxgi_format: u32,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
    pub input_slot_class: u32,
    pub instance_data_step_rate: u32,
}

/// Followed by `blob_size_bytes` of input layout blob, zero padded to 4 bytes.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdCreateInputLayout {
    pub hdr: AerogpuCmdHdr,
    pub input_layout_handle: AerogpuHandle,
    pub blob_size_bytes: u32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDestroyInputLayout {
    pub hdr: AerogpuCmdHdr,
    pub input_layout_handle: AerogpuHandle,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetInputLayout {
    pub hdr: AerogpuCmdHdr,
    pub input_layout_handle: AerogpuHandle,
    pub reserved0: u32,
}

/* ------------------------------ Pipeline state ---------------------------- */

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuBlendFactor {
    Zero = 0,
    One = 1,
    SrcAlpha = 2,
    InvSrcAlpha = 3,
    DestAlpha = 4,
    InvDestAlpha = 5,
}

impl AerogpuBlendFactor {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Zero),
            1 => Some(Self::One),
            2 => Some(Self::SrcAlpha),
            3 => Some(Self::InvSrcAlpha),
            4 => Some(Self::DestAlpha),
            5 => Some(Self::InvDestAlpha),
            _ => None,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuBlendOp {
    Add = 0,
    Subtract = 1,
    RevSubtract = 2,
    Min = 3,
    Max = 4,
}

impl AerogpuBlendOp {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Add),
            1 => Some(Self::Subtract),
            2 => Some(Self::RevSubtract),
            3 => Some(Self::Min),
            4 => Some(Self::Max),
            _ => None,
        }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuBlendState {
    pub enable: u32,
    pub src_factor: u32,
    pub dst_factor: u32,
    pub blend_op: u32,
    pub color_write_mask: u8,
    pub reserved0: [u8; 3],
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetBlendState {
    pub hdr: AerogpuCmdHdr,
    pub state: AerogpuBlendState,
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuCompareFunc {
    Never = 0,
    Less = 1,
    Equal = 2,
    LessEqual = 3,
    Greater = 4,
    NotEqual = 5,
    GreaterEqual = 6,
    Always = 7,
}

impl AerogpuCompareFunc {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Never),
            1 => Some(Self::Less),
            2 => Some(Self::Equal),
            3 => Some(Self::LessEqual),
            4 => Some(Self::Greater),
            5 => Some(Self::NotEqual),
            6 => Some(Self::GreaterEqual),
            7 => Some(Self::Always),
            _ => None,
        }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuDepthStencilState {
    pub depth_enable: u32,
    pub depth_write_enable: u32,
    pub depth_func: u32,
    pub stencil_enable: u32,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub reserved0: [u8; 2],
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetDepthStencilState {
    pub hdr: AerogpuCmdHdr,
    pub state: AerogpuDepthStencilState,
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuFillMode {
    Solid = 0,
    Wireframe = 1,
}

impl AerogpuFillMode {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Solid),
            1 => Some(Self::Wireframe),
            _ => None,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AerogpuCullMode {
    None = 0,
    Front = 1,
    Back = 2,
}

impl AerogpuCullMode {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Front),
            2 => Some(Self::Back),
            _ => None,
        }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuRasterizerState {
    pub fill_mode: u32,
    pub cull_mode: u32,
    pub front_ccw: u32,
    pub scissor_enable: u32,
    pub depth_bias: i32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetRasterizerState {
    pub hdr: AerogpuCmdHdr,
    pub state: AerogpuRasterizerState,
}

/* ------------------------- Render targets / state ------------------------- */

pub const AEROGPU_MAX_RENDER_TARGETS: usize = 8;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetRenderTargets {
    pub hdr: AerogpuCmdHdr,
    pub color_count: u32,
    pub depth_stencil: AerogpuHandle,
    pub colors: [AerogpuHandle; AEROGPU_MAX_RENDER_TARGETS],
}

/// `hdr + color_count + depth_stencil`; the packet must additionally hold
/// `color_count` entries of `colors[]`.
pub const SET_RENDER_TARGETS_PREFIX_BYTES: usize = 16;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetViewport {
    pub hdr: AerogpuCmdHdr,
    pub x_f32: u32,
    pub y_f32: u32,
    pub width_f32: u32,
    pub height_f32: u32,
    pub min_depth_f32: u32,
    pub max_depth_f32: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetScissor {
    pub hdr: AerogpuCmdHdr,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/* ------------------------------ Input assembler --------------------------- */

pub const AEROGPU_MAX_VERTEX_BUFFER_SLOTS: u32 = 16;

#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AerogpuVertexBufferBinding {
    pub buffer: AerogpuHandle,
    pub stride_bytes: u32,
    pub offset_bytes: u32,
    pub reserved0: u32,
}

/// Followed by `buffer_count` [`AerogpuVertexBufferBinding`]s.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetVertexBuffers {
    pub hdr: AerogpuCmdHdr,
    pub start_slot: u32,
    pub buffer_count: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetIndexBuffer {
    pub hdr: AerogpuCmdHdr,
    pub buffer: AerogpuHandle,
    pub format: u32,
    pub offset_bytes: u32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetPrimitiveTopology {
    pub hdr: AerogpuCmdHdr,
    pub topology: u32,
    pub reserved0: u32,
}

pub const AEROGPU_MAX_TEXTURE_SLOTS: u32 = 16;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetTexture {
    pub hdr: AerogpuCmdHdr,
    pub shader_stage: u32,
    pub slot: u32,
    pub texture: AerogpuHandle,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetSamplerState {
    pub hdr: AerogpuCmdHdr,
    pub shader_stage: u32,
    pub slot: u32,
    pub state: u32,
    pub value: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdSetRenderState {
    pub hdr: AerogpuCmdHdr,
    pub state: u32,
    pub value: u32,
}

/* -------------------------------- Drawing -------------------------------- */

pub const AEROGPU_CLEAR_COLOR: u32 = 1u32 << 0;
pub const AEROGPU_CLEAR_DEPTH: u32 = 1u32 << 1;
pub const AEROGPU_CLEAR_STENCIL: u32 = 1u32 << 2;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdClear {
    pub hdr: AerogpuCmdHdr,
    pub flags: u32,
    pub color_rgba_f32: [u32; 4],
    pub depth_f32: u32,
    pub stencil: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDraw {
    pub hdr: AerogpuCmdHdr,
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDrawIndexed {
    pub hdr: AerogpuCmdHdr,
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdDispatch {
    pub hdr: AerogpuCmdHdr,
    pub group_count_x: u32,
    pub group_count_y: u32,
    pub group_count_z: u32,
    pub reserved0: u32,
}

/* ------------------------------ Presentation ------------------------------ */

pub const AEROGPU_PRESENT_FLAG_NONE: u32 = 0;
pub const AEROGPU_PRESENT_FLAG_VSYNC: u32 = 1u32 << 0;

/// `D3DPRESENT_DONOTWAIT` as forwarded in `d3d9_present_flags`.
pub const AEROGPU_D3D9_PRESENT_DONOTWAIT: u32 = 0x0000_0001;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdPresent {
    pub hdr: AerogpuCmdHdr,
    pub scanout_id: u32,
    pub flags: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdPresentEx {
    pub hdr: AerogpuCmdHdr,
    pub scanout_id: u32,
    pub flags: u32,
    pub d3d9_present_flags: u32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdExportSharedSurface {
    pub hdr: AerogpuCmdHdr,
    pub resource_handle: AerogpuHandle,
    pub reserved0: u32,
    pub share_token: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdImportSharedSurface {
    pub hdr: AerogpuCmdHdr,
    pub out_resource_handle: AerogpuHandle,
    pub reserved0: u32,
    pub share_token: u64,
}

/// Retire a share token once the last guest-side user has closed it.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdReleaseSharedSurface {
    pub hdr: AerogpuCmdHdr,
    pub share_token: u64,
    pub reserved0: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct AerogpuCmdFlush {
    pub hdr: AerogpuCmdHdr,
    pub reserved0: u32,
    pub reserved1: u32,
}

macro_rules! layout_sizes {
    ($($ty:ident = $size:expr;)*) => {
        $(
            impl $ty {
                pub const SIZE_BYTES: usize = $size;
            }
            const _: () = assert!(size_of::<$ty>() == $ty::SIZE_BYTES);
        )*
    };
}

layout_sizes! {
    AerogpuCmdCreateBuffer = 40;
    AerogpuCmdCreateTexture2d = 56;
    AerogpuCmdDestroyResource = 16;
    AerogpuCmdResourceDirtyRange = 32;
    AerogpuCmdUploadResource = 32;
    AerogpuCmdCopyBuffer = 48;
    AerogpuCmdCopyTexture2d = 64;
    AerogpuCmdCreateShaderDxbc = 24;
    AerogpuCmdDestroyShader = 16;
    AerogpuCmdBindShaders = 24;
    AerogpuCmdSetShaderConstantsF = 24;
    AerogpuCmdSetShaderConstantsI = 24;
    AerogpuCmdSetShaderConstantsB = 24;
    AerogpuInputLayoutBlobHeader = 16;
    AerogpuInputLayoutElementDxgi = 28;
    AerogpuCmdCreateInputLayout = 20;
    AerogpuCmdDestroyInputLayout = 16;
    AerogpuCmdSetInputLayout = 16;
    AerogpuBlendState = 20;
    AerogpuCmdSetBlendState = 28;
    AerogpuDepthStencilState = 20;
    AerogpuCmdSetDepthStencilState = 28;
    AerogpuRasterizerState = 24;
    AerogpuCmdSetRasterizerState = 32;
    AerogpuCmdSetRenderTargets = 48;
    AerogpuCmdSetViewport = 32;
    AerogpuCmdSetScissor = 24;
    AerogpuVertexBufferBinding = 16;
    AerogpuCmdSetVertexBuffers = 16;
    AerogpuCmdSetIndexBuffer = 24;
    AerogpuCmdSetPrimitiveTopology = 16;
    AerogpuCmdSetTexture = 24;
    AerogpuCmdSetSamplerState = 24;
    AerogpuCmdSetRenderState = 16;
    AerogpuCmdClear = 36;
    AerogpuCmdDraw = 24;
    AerogpuCmdDrawIndexed = 28;
    AerogpuCmdDispatch = 24;
    AerogpuCmdPresent = 16;
    AerogpuCmdPresentEx = 24;
    AerogpuCmdExportSharedSurface = 24;
    AerogpuCmdImportSharedSurface = 24;
    AerogpuCmdReleaseSharedSurface = 24;
    AerogpuCmdFlush = 16;
}

const _: () = assert!(size_of::<AerogpuCmdStreamHeader>() == AerogpuCmdStreamHeader::SIZE_BYTES);
const _: () = assert!(size_of::<AerogpuCmdHdr>() == AerogpuCmdHdr::SIZE_BYTES);

/* -------------------------------- Decoding -------------------------------- */

/// Structural errors: the stream or one of its packets is not well formed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AerogpuCmdDecodeError {
    #[error("buffer too small ({found} bytes, need {needed})")]
    TooSmall { needed: usize, found: usize },
    #[error("bad command stream magic 0x{found:08X}")]
    BadMagic { found: u32 },
    #[error(transparent)]
    UnsupportedAbiVersion(#[from] AerogpuAbiError),
    #[error("stream size_bytes {size_bytes} out of range (header {header}, buffer {buffer_len})", header = AerogpuCmdStreamHeader::SIZE_BYTES)]
    SizeOutOfRange { size_bytes: u32, buffer_len: usize },
    #[error("packet size_bytes {found} smaller than the packet header")]
    SizeTooSmall { found: u32 },
    #[error("packet size_bytes {found} is not a multiple of 4")]
    MisalignedSize { found: u32 },
    #[error("packet at offset {offset} (size_bytes {packet_size_bytes}) overruns stream of {stream_size_bytes} bytes")]
    PacketOverrunsStream {
        offset: usize,
        packet_size_bytes: u32,
        stream_size_bytes: u32,
    },
    #[error("unknown opcode 0x{found:X}")]
    UnknownOpcode { found: u32 },
    #[error("{opcode:?} packet too small (need {expected} bytes, found {found})")]
    PayloadTooSmall {
        opcode: AerogpuCmdOpcode,
        expected: usize,
        found: usize,
    },
    #[error("expected {expected:?} packet, found opcode 0x{found:X}")]
    UnexpectedOpcode {
        found: u32,
        expected: AerogpuCmdOpcode,
    },
    #[error("bad input layout blob (magic 0x{magic:08X}, version {version})")]
    BadInputLayoutBlob { magic: u32, version: u32 },
    #[error("size computation overflowed")]
    CountOverflow,
}

pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

pub(crate) fn read_u64_le(buf: &[u8], offset: usize) -> Option<u64> {
    let bytes = buf.get(offset..offset.checked_add(8)?)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// Decode and validate the stream header against the buffer that holds it.
pub fn decode_cmd_stream_header_le(buf: &[u8]) -> Result<AerogpuCmdStreamHeader, AerogpuCmdDecodeError> {
    let too_small = AerogpuCmdDecodeError::TooSmall {
        needed: AerogpuCmdStreamHeader::SIZE_BYTES,
        found: buf.len(),
    };
    let field = |offset: usize| read_u32_le(buf, offset).ok_or(too_small);

    let hdr = AerogpuCmdStreamHeader {
        magic: field(0)?,
        abi_version: field(4)?,
        size_bytes: field(8)?,
        flags: field(12)?,
        reserved0: field(16)?,
        reserved1: field(20)?,
    };

    validate_cmd_stream_header(&hdr, buf.len())?;
    Ok(hdr)
}

pub fn validate_cmd_stream_header(
    hdr: &AerogpuCmdStreamHeader,
    buffer_len: usize,
) -> Result<(), AerogpuCmdDecodeError> {
    let magic = hdr.magic;
    if magic != AEROGPU_CMD_STREAM_MAGIC {
        return Err(AerogpuCmdDecodeError::BadMagic { found: magic });
    }

    parse_and_validate_abi_version_u32(hdr.abi_version)?;

    let size_bytes = hdr.size_bytes;
    if (size_bytes as usize) < AerogpuCmdStreamHeader::SIZE_BYTES || size_bytes as usize > buffer_len {
        return Err(AerogpuCmdDecodeError::SizeOutOfRange {
            size_bytes,
            buffer_len,
        });
    }

    Ok(())
}

/// Decode the packet header starting at `offset` in `buf`.
///
/// Only the header itself is validated here; whether the packet fits in the
/// stream is checked by [`AerogpuCmdStreamIter`].
pub fn decode_cmd_hdr_at(buf: &[u8], offset: usize) -> Result<AerogpuCmdHdr, AerogpuCmdDecodeError> {
    let too_small = AerogpuCmdDecodeError::TooSmall {
        needed: AerogpuCmdHdr::SIZE_BYTES,
        found: buf.len().saturating_sub(offset),
    };
    let opcode = read_u32_le(buf, offset).ok_or(too_small)?;
    let size_bytes = offset
        .checked_add(4)
        .and_then(|at| read_u32_le(buf, at))
        .ok_or(too_small)?;

    if (size_bytes as usize) < AerogpuCmdHdr::SIZE_BYTES {
        return Err(AerogpuCmdDecodeError::SizeTooSmall { found: size_bytes });
    }
    if size_bytes % 4 != 0 {
        return Err(AerogpuCmdDecodeError::MisalignedSize { found: size_bytes });
    }

    Ok(AerogpuCmdHdr { opcode, size_bytes })
}

/// One packet as found in the stream. `bytes` spans the whole packet
/// (header included); `payload` is everything after the header.
#[derive(Clone, Copy, Debug)]
pub struct AerogpuCmdPacket<'a> {
    pub offset: usize,
    pub hdr: AerogpuCmdHdr,
    pub opcode: Option<AerogpuCmdOpcode>,
    pub bytes: &'a [u8],
    pub payload: &'a [u8],
}

impl<'a> AerogpuCmdPacket<'a> {
    /// The decoded opcode, or [`AerogpuCmdDecodeError::UnknownOpcode`].
    pub fn known_opcode(&self) -> Result<AerogpuCmdOpcode, AerogpuCmdDecodeError> {
        self.opcode.ok_or(AerogpuCmdDecodeError::UnknownOpcode {
            found: self.hdr.opcode,
        })
    }

    /// Fails unless the packet holds at least `needed` bytes (header included).
    pub fn require_size(&self, opcode: AerogpuCmdOpcode, needed: usize) -> Result<(), AerogpuCmdDecodeError> {
        if self.bytes.len() < needed {
            return Err(AerogpuCmdDecodeError::PayloadTooSmall {
                opcode,
                expected: needed,
                found: self.bytes.len(),
            });
        }
        Ok(())
    }

    /// Fails unless this is a known opcode whose fixed prefix is present in full.
    pub fn require_prefix(&self) -> Result<AerogpuCmdOpcode, AerogpuCmdDecodeError> {
        let opcode = self.known_opcode()?;
        self.require_size(opcode, opcode.min_size_bytes())?;
        Ok(opcode)
    }

    pub fn u32_at(&self, offset: usize) -> Result<u32, AerogpuCmdDecodeError> {
        read_u32_le(self.bytes, offset).ok_or(self.short_read(offset, 4))
    }

    pub fn u64_at(&self, offset: usize) -> Result<u64, AerogpuCmdDecodeError> {
        read_u64_le(self.bytes, offset).ok_or(self.short_read(offset, 8))
    }

    pub fn i32_at(&self, offset: usize) -> Result<i32, AerogpuCmdDecodeError> {
        self.u32_at(offset).map(|v| v as i32)
    }

    pub fn f32_at(&self, offset: usize) -> Result<f32, AerogpuCmdDecodeError> {
        self.u32_at(offset).map(f32::from_bits)
    }

    pub fn u8_at(&self, offset: usize) -> Result<u8, AerogpuCmdDecodeError> {
        self.bytes.get(offset).copied().ok_or(self.short_read(offset, 1))
    }

    /// `len` bytes of trailing data starting at `offset`, re-validated against
    /// the packet's own size.
    pub fn trailing(&self, offset: usize, len: usize) -> Result<&'a [u8], AerogpuCmdDecodeError> {
        let end = offset.checked_add(len).ok_or(AerogpuCmdDecodeError::CountOverflow)?;
        self.bytes.get(offset..end).ok_or(self.short_read(offset, len))
    }

    fn short_read(&self, offset: usize, len: usize) -> AerogpuCmdDecodeError {
        match self.opcode {
            Some(opcode) => AerogpuCmdDecodeError::PayloadTooSmall {
                opcode,
                expected: offset.saturating_add(len),
                found: self.bytes.len(),
            },
            None => AerogpuCmdDecodeError::UnknownOpcode {
                found: self.hdr.opcode,
            },
        }
    }
}

/// Forward-only packet iterator over one stream.
///
/// Yields packets in encoded order and stops after the first structural
/// error, which is yielded as the final item.
pub struct AerogpuCmdStreamIter<'a> {
    buf: &'a [u8],
    stream_size_bytes: u32,
    offset: usize,
    end: usize,
    done: bool,
}

impl<'a> AerogpuCmdStreamIter<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, AerogpuCmdDecodeError> {
        let header = decode_cmd_stream_header_le(buf)?;
        Ok(Self::with_header(buf, &header))
    }

    fn with_header(buf: &'a [u8], header: &AerogpuCmdStreamHeader) -> Self {
        let stream_size_bytes = header.size_bytes;
        Self {
            buf,
            stream_size_bytes,
            offset: AerogpuCmdStreamHeader::SIZE_BYTES,
            end: stream_size_bytes as usize,
            done: false,
        }
    }

    /// Byte offset of the next packet.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn fail(&mut self, err: AerogpuCmdDecodeError) -> Option<Result<AerogpuCmdPacket<'a>, AerogpuCmdDecodeError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<'a> Iterator for AerogpuCmdStreamIter<'a> {
    type Item = Result<AerogpuCmdPacket<'a>, AerogpuCmdDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.end {
            return None;
        }

        let stream = &self.buf[..self.end];
        let hdr = match decode_cmd_hdr_at(stream, self.offset) {
            Ok(hdr) => hdr,
            Err(err) => return self.fail(err),
        };

        let packet_end = match self.offset.checked_add(hdr.size_bytes as usize) {
            Some(end) if end <= self.end => end,
            _ => {
                return self.fail(AerogpuCmdDecodeError::PacketOverrunsStream {
                    offset: self.offset,
                    packet_size_bytes: hdr.size_bytes,
                    stream_size_bytes: self.stream_size_bytes,
                })
            }
        };

        let bytes = &stream[self.offset..packet_end];
        let packet = AerogpuCmdPacket {
            offset: self.offset,
            hdr,
            opcode: AerogpuCmdOpcode::from_u32(hdr.opcode),
            bytes,
            payload: &bytes[AerogpuCmdHdr::SIZE_BYTES..],
        };

        self.offset = packet_end;
        Some(Ok(packet))
    }
}

impl core::iter::FusedIterator for AerogpuCmdStreamIter<'_> {}

/// A validated stream header over a borrowed submission buffer.
///
/// Opening only checks the header; packets are decoded lazily by
/// [`AerogpuCmdStream::packets`]. Bytes past `size_bytes` are ignored.
#[derive(Clone, Copy, Debug)]
pub struct AerogpuCmdStream<'a> {
    header: AerogpuCmdStreamHeader,
    buf: &'a [u8],
}

impl<'a> AerogpuCmdStream<'a> {
    pub fn open(buf: &'a [u8]) -> Result<Self, AerogpuCmdDecodeError> {
        let header = decode_cmd_stream_header_le(buf)?;
        Ok(Self { header, buf })
    }

    pub fn header(&self) -> &AerogpuCmdStreamHeader {
        &self.header
    }

    pub fn size_bytes(&self) -> usize {
        self.header.size_bytes as usize
    }

    /// The stream bytes, header included, trimmed to `size_bytes`.
    pub fn as_bytes(&self) -> &'a [u8] {
        &self.buf[..self.size_bytes()]
    }

    pub fn is_empty(&self) -> bool {
        self.size_bytes() == AerogpuCmdStreamHeader::SIZE_BYTES
    }

    pub fn packets(&self) -> AerogpuCmdStreamIter<'a> {
        AerogpuCmdStreamIter::with_header(self.buf, &self.header)
    }

    /// See [`cmd_stream_has_vsync_present`].
    pub fn has_vsync_present(&self) -> bool {
        scan_vsync_present(self.packets()).unwrap_or(false)
    }
}

/* --------------------------------- ILAY ---------------------------------- */

/// Parsed `CREATE_INPUT_LAYOUT` blob.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AerogpuInputLayoutBlob {
    pub elements: Vec<AerogpuInputLayoutElementDxgi>,
}

impl AerogpuInputLayoutBlob {
    /// Distinct vertex buffer slots referenced by the layout, ascending.
    pub fn input_slots(&self) -> Vec<u32> {
        let mut slots: Vec<u32> = self.elements.iter().map(|e| e.input_slot).collect();
        slots.sort_unstable();
        slots.dedup();
        slots
    }
}

pub fn decode_input_layout_blob_le(blob: &[u8]) -> Result<AerogpuInputLayoutBlob, AerogpuCmdDecodeError> {
    let too_small = |needed: usize| AerogpuCmdDecodeError::PayloadTooSmall {
        opcode: AerogpuCmdOpcode::CreateInputLayout,
        expected: needed,
        found: blob.len(),
    };
    let header_len = AerogpuInputLayoutBlobHeader::SIZE_BYTES;
    let magic = read_u32_le(blob, 0).ok_or(too_small(header_len))?;
    let version = read_u32_le(blob, 4).ok_or(too_small(header_len))?;
    let element_count = read_u32_le(blob, 8).ok_or(too_small(header_len))?;
    if blob.len() < header_len {
        return Err(too_small(header_len));
    }
    if magic != AEROGPU_INPUT_LAYOUT_BLOB_MAGIC || version != AEROGPU_INPUT_LAYOUT_BLOB_VERSION {
        return Err(AerogpuCmdDecodeError::BadInputLayoutBlob { magic, version });
    }

    let elem_size = AerogpuInputLayoutElementDxgi::SIZE_BYTES;
    let needed = (element_count as usize)
        .checked_mul(elem_size)
        .and_then(|n| n.checked_add(header_len))
        .ok_or(AerogpuCmdDecodeError::CountOverflow)?;
    if blob.len() < needed {
        return Err(too_small(needed));
    }

    let elements = blob[header_len..needed]
        .chunks_exact(elem_size)
        .map(|e| {
            let f = |i: usize| read_u32_le(e, i * 4).unwrap_or_default();
            AerogpuInputLayoutElementDxgi {
                semantic_name_hash: f(0),
                semantic_index: f(1),
                dxgi_format: f(2),
                input_slot: f(3),
                aligned_byte_offset: f(4),
                input_slot_class: f(5),
                instance_data_step_rate: f(6),
            }
        })
        .collect();

    Ok(AerogpuInputLayoutBlob { elements })
}

/// Serialize an ILAY blob; the inverse of [`decode_input_layout_blob_le`].
pub fn encode_input_layout_blob_le(elements: &[AerogpuInputLayoutElementDxgi]) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        AerogpuInputLayoutBlobHeader::SIZE_BYTES + elements.len() * AerogpuInputLayoutElementDxgi::SIZE_BYTES,
    );
    for v in [
        AEROGPU_INPUT_LAYOUT_BLOB_MAGIC,
        AEROGPU_INPUT_LAYOUT_BLOB_VERSION,
        elements.len() as u32,
        0,
    ] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for e in elements {
        for v in [
            e.semantic_name_hash,
            e.semantic_index,
            e.dxgi_format,
            e.input_slot,
            e.aligned_byte_offset,
            e.input_slot_class,
            e.instance_data_step_rate,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

/* ------------------------------ Vsync present ----------------------------- */

/// `PRESENT`/`PRESENT_EX` both keep `flags` right after `scanout_id`.
const PRESENT_FLAGS_OFFSET: usize = 12;

fn scan_vsync_present<'a>(
    packets: impl Iterator<Item = Result<AerogpuCmdPacket<'a>, AerogpuCmdDecodeError>>,
) -> Result<bool, AerogpuCmdDecodeError> {
    for packet in packets {
        let packet = packet?;
        if !matches!(
            packet.opcode,
            Some(AerogpuCmdOpcode::Present | AerogpuCmdOpcode::PresentEx)
        ) {
            continue;
        }
        let flags = packet.u32_at(PRESENT_FLAGS_OFFSET)?;
        if flags & AEROGPU_PRESENT_FLAG_VSYNC != 0 {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether the stream contains a `PRESENT`/`PRESENT_EX` with the vsync flag.
///
/// Only the known prefix of each present packet is read, so packets extended
/// by newer ABI minors are handled. Other opcodes (including unknown ones)
/// are skipped by size.
pub fn cmd_stream_has_vsync_present_bytes(buf: &[u8]) -> Result<bool, AerogpuCmdDecodeError> {
    scan_vsync_present(AerogpuCmdStreamIter::new(buf)?)
}

/// Lenient form of [`cmd_stream_has_vsync_present_bytes`]: malformed
/// streams never request vsync.
pub fn cmd_stream_has_vsync_present(buf: &[u8]) -> bool {
    cmd_stream_has_vsync_present_bytes(buf).unwrap_or(false)
}

/// Same scan as [`cmd_stream_has_vsync_present_bytes`], reading a stream that
/// lives in guest memory at `gpa` through `read(gpa, out)`.
///
/// Only packet headers and present flags are read; `size_bytes` is the
/// guest-declared length of the submission.
pub fn cmd_stream_has_vsync_present_reader<F>(
    mut read: F,
    gpa: u64,
    size_bytes: u32,
) -> Result<bool, AerogpuCmdDecodeError>
where
    F: FnMut(u64, &mut [u8]),
{
    let mut hdr_bytes = [0u8; AerogpuCmdStreamHeader::SIZE_BYTES];
    if (size_bytes as usize) < hdr_bytes.len() {
        return Err(AerogpuCmdDecodeError::TooSmall {
            needed: hdr_bytes.len(),
            found: size_bytes as usize,
        });
    }
    read(gpa, &mut hdr_bytes);
    let hdr = decode_cmd_stream_header_le_unchecked(&hdr_bytes);
    validate_cmd_stream_header(&hdr, size_bytes as usize)?;

    let end = hdr.size_bytes as usize;
    let mut offset = AerogpuCmdStreamHeader::SIZE_BYTES;
    while offset < end {
        let at = |off: usize| gpa.checked_add(off as u64).ok_or(AerogpuCmdDecodeError::CountOverflow);

        let mut pkt = [0u8; AerogpuCmdPresent::SIZE_BYTES];
        let hdr_len = AerogpuCmdHdr::SIZE_BYTES.min(end - offset);
        read(at(offset)?, &mut pkt[..hdr_len]);
        let cmd_hdr = decode_cmd_hdr_at(&pkt[..hdr_len], 0)?;

        let packet_end = offset
            .checked_add(cmd_hdr.size_bytes as usize)
            .filter(|&e| e <= end)
            .ok_or(AerogpuCmdDecodeError::PacketOverrunsStream {
                offset,
                packet_size_bytes: cmd_hdr.size_bytes,
                stream_size_bytes: hdr.size_bytes,
            })?;

        if let Some(opcode @ (AerogpuCmdOpcode::Present | AerogpuCmdOpcode::PresentEx)) =
            AerogpuCmdOpcode::from_u32(cmd_hdr.opcode)
        {
            if (cmd_hdr.size_bytes as usize) < AerogpuCmdPresent::SIZE_BYTES {
                return Err(AerogpuCmdDecodeError::PayloadTooSmall {
                    opcode,
                    expected: AerogpuCmdPresent::SIZE_BYTES,
                    found: cmd_hdr.size_bytes as usize,
                });
            }
            read(at(offset + AerogpuCmdHdr::SIZE_BYTES)?, &mut pkt[AerogpuCmdHdr::SIZE_BYTES..]);
            if read_u32_le(&pkt, PRESENT_FLAGS_OFFSET).unwrap_or_default() & AEROGPU_PRESENT_FLAG_VSYNC != 0 {
                return Ok(true);
            }
        }

        offset = packet_end;
    }

    Ok(false)
}

fn decode_cmd_stream_header_le_unchecked(buf: &[u8; AerogpuCmdStreamHeader::SIZE_BYTES]) -> AerogpuCmdStreamHeader {
    let f = |offset: usize| read_u32_le(buf, offset).unwrap_or_default();
    AerogpuCmdStreamHeader {
        magic: f(0),
        abi_version: f(4),
        size_bytes: f(8),
        flags: f(12),
        reserved0: f(16),
        reserved1: f(20),
    }
}
