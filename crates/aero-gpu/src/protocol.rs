//! Typed view of AeroGPU command packets.
//!
//! [`decode_cmd`] turns one [`AerogpuCmdPacket`] from the protocol iterator
//! into an [`AeroGpuCmd`]. Fields are read one at a time at their ABI
//! offsets after the fixed prefix has been length checked, and any size
//! field that describes trailing data is re-checked against the packet's own
//! `size_bytes`. Enum-typed fields stay raw `u32`s here; the command
//! processor decides whether a value is valid.
//!
//! Unknown opcodes are a hard error. Packets longer than their known prefix
//! (fields appended by a newer ABI minor) decode normally; the extra bytes
//! are ignored.

use core::mem::offset_of;

use aero_protocol::aerogpu::aerogpu_cmd::{
    self as cmd, AerogpuCmdDecodeError, AerogpuCmdOpcode, AerogpuCmdPacket, AerogpuCmdStream,
    AerogpuCmdStreamHeader, AerogpuVertexBufferBinding, AEROGPU_MAX_RENDER_TARGETS,
    AEROGPU_MAX_VERTEX_BUFFER_SLOTS, SET_RENDER_TARGETS_PREFIX_BYTES,
};

/// Offset of `$field` within packet layout `$ty`.
macro_rules! at {
    ($ty:ident, $field:ident) => {
        offset_of!(cmd::$ty, $field)
    };
    ($ty:ident, $state:ident . $field:ident) => {
        offset_of!(cmd::$ty, $state) + offset_of!(state_ty!($ty), $field)
    };
}

macro_rules! state_ty {
    (AerogpuCmdSetBlendState) => {
        cmd::AerogpuBlendState
    };
    (AerogpuCmdSetDepthStencilState) => {
        cmd::AerogpuDepthStencilState
    };
    (AerogpuCmdSetRasterizerState) => {
        cmd::AerogpuRasterizerState
    };
}

#[derive(Debug, Clone, PartialEq)]
pub enum AeroGpuCmd<'a> {
    Nop,
    /// NUL padding is stripped.
    DebugMarker {
        bytes: &'a [u8],
    },

    CreateBuffer {
        buffer_handle: u32,
        usage_flags: u32,
        size_bytes: u64,
        backing_alloc_id: u32,
        backing_offset_bytes: u32,
    },
    CreateTexture2d {
        texture_handle: u32,
        usage_flags: u32,
        format: u32,
        width: u32,
        height: u32,
        mip_levels: u32,
        array_layers: u32,
        row_pitch_bytes: u32,
        backing_alloc_id: u32,
        backing_offset_bytes: u32,
    },
    DestroyResource {
        resource_handle: u32,
    },
    ResourceDirtyRange {
        resource_handle: u32,
        offset_bytes: u64,
        size_bytes: u64,
    },
    UploadResource {
        resource_handle: u32,
        offset_bytes: u64,
        size_bytes: u64,
        data: &'a [u8],
    },
    CopyBuffer {
        dst_buffer: u32,
        src_buffer: u32,
        dst_offset_bytes: u64,
        src_offset_bytes: u64,
        size_bytes: u64,
        flags: u32,
    },
    CopyTexture2d {
        dst_texture: u32,
        src_texture: u32,
        dst_mip_level: u32,
        dst_array_layer: u32,
        src_mip_level: u32,
        src_array_layer: u32,
        dst_x: u32,
        dst_y: u32,
        src_x: u32,
        src_y: u32,
        width: u32,
        height: u32,
        flags: u32,
    },

    CreateShaderDxbc {
        shader_handle: u32,
        stage: u32,
        dxbc_bytes: &'a [u8],
    },
    DestroyShader {
        shader_handle: u32,
    },
    BindShaders {
        vs: u32,
        ps: u32,
        cs: u32,
    },
    /// `data` holds `vec4_count * 16` bytes of little-endian floats.
    SetShaderConstantsF {
        stage: u32,
        start_register: u32,
        vec4_count: u32,
        data: &'a [u8],
    },
    /// `data` holds `vec4_count * 16` bytes of little-endian `i32`s.
    SetShaderConstantsI {
        stage: u32,
        start_register: u32,
        vec4_count: u32,
        data: &'a [u8],
    },
    /// `data` holds `bool_count * 16` bytes, four `u32` lanes per register.
    SetShaderConstantsB {
        stage: u32,
        start_register: u32,
        bool_count: u32,
        data: &'a [u8],
    },
    CreateInputLayout {
        input_layout_handle: u32,
        blob_bytes: &'a [u8],
    },
    DestroyInputLayout {
        input_layout_handle: u32,
    },
    SetInputLayout {
        input_layout_handle: u32,
    },

    SetBlendState {
        enable: u32,
        src_factor: u32,
        dst_factor: u32,
        blend_op: u32,
        color_write_mask: u8,
    },
    SetDepthStencilState {
        depth_enable: u32,
        depth_write_enable: u32,
        depth_func: u32,
        stencil_enable: u32,
        stencil_read_mask: u8,
        stencil_write_mask: u8,
    },
    SetRasterizerState {
        fill_mode: u32,
        cull_mode: u32,
        front_ccw: u32,
        scissor_enable: u32,
        depth_bias: i32,
    },

    /// Entries of `colors` past `min(color_count, 8)` are zero.
    SetRenderTargets {
        color_count: u32,
        depth_stencil: u32,
        colors: [u32; AEROGPU_MAX_RENDER_TARGETS],
    },
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        min_depth: f32,
        max_depth: f32,
    },
    SetScissor {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },

    SetVertexBuffers {
        start_slot: u32,
        bindings: Vec<AerogpuVertexBufferBinding>,
    },
    SetIndexBuffer {
        buffer: u32,
        format: u32,
        offset_bytes: u32,
    },
    SetPrimitiveTopology {
        topology: u32,
    },
    SetTexture {
        shader_stage: u32,
        slot: u32,
        texture: u32,
    },
    SetSamplerState {
        shader_stage: u32,
        slot: u32,
        state: u32,
        value: u32,
    },
    SetRenderState {
        state: u32,
        value: u32,
    },

    Clear {
        flags: u32,
        color_rgba: [f32; 4],
        depth: f32,
        stencil: u32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    Dispatch {
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    },

    Present {
        scanout_id: u32,
        flags: u32,
    },
    PresentEx {
        scanout_id: u32,
        flags: u32,
        d3d9_present_flags: u32,
    },
    ExportSharedSurface {
        resource_handle: u32,
        share_token: u64,
    },
    ImportSharedSurface {
        out_resource_handle: u32,
        share_token: u64,
    },
    ReleaseSharedSurface {
        share_token: u64,
    },

    Flush,
}

impl AeroGpuCmd<'_> {
    pub fn opcode(&self) -> AerogpuCmdOpcode {
        use AerogpuCmdOpcode as Op;
        match self {
            Self::Nop => Op::Nop,
            Self::DebugMarker { .. } => Op::DebugMarker,
            Self::CreateBuffer { .. } => Op::CreateBuffer,
            Self::CreateTexture2d { .. } => Op::CreateTexture2d,
            Self::DestroyResource { .. } => Op::DestroyResource,
            Self::ResourceDirtyRange { .. } => Op::ResourceDirtyRange,
            Self::UploadResource { .. } => Op::UploadResource,
            Self::CopyBuffer { .. } => Op::CopyBuffer,
            Self::CopyTexture2d { .. } => Op::CopyTexture2d,
            Self::CreateShaderDxbc { .. } => Op::CreateShaderDxbc,
            Self::DestroyShader { .. } => Op::DestroyShader,
            Self::BindShaders { .. } => Op::BindShaders,
            Self::SetShaderConstantsF { .. } => Op::SetShaderConstantsF,
            Self::SetShaderConstantsI { .. } => Op::SetShaderConstantsI,
            Self::SetShaderConstantsB { .. } => Op::SetShaderConstantsB,
            Self::CreateInputLayout { .. } => Op::CreateInputLayout,
            Self::DestroyInputLayout { .. } => Op::DestroyInputLayout,
            Self::SetInputLayout { .. } => Op::SetInputLayout,
            Self::SetBlendState { .. } => Op::SetBlendState,
            Self::SetDepthStencilState { .. } => Op::SetDepthStencilState,
            Self::SetRasterizerState { .. } => Op::SetRasterizerState,
            Self::SetRenderTargets { .. } => Op::SetRenderTargets,
            Self::SetViewport { .. } => Op::SetViewport,
            Self::SetScissor { .. } => Op::SetScissor,
            Self::SetVertexBuffers { .. } => Op::SetVertexBuffers,
            Self::SetIndexBuffer { .. } => Op::SetIndexBuffer,
            Self::SetPrimitiveTopology { .. } => Op::SetPrimitiveTopology,
            Self::SetTexture { .. } => Op::SetTexture,
            Self::SetSamplerState { .. } => Op::SetSamplerState,
            Self::SetRenderState { .. } => Op::SetRenderState,
            Self::Clear { .. } => Op::Clear,
            Self::Draw { .. } => Op::Draw,
            Self::DrawIndexed { .. } => Op::DrawIndexed,
            Self::Dispatch { .. } => Op::Dispatch,
            Self::Present { .. } => Op::Present,
            Self::PresentEx { .. } => Op::PresentEx,
            Self::ExportSharedSurface { .. } => Op::ExportSharedSurface,
            Self::ImportSharedSurface { .. } => Op::ImportSharedSurface,
            Self::ReleaseSharedSurface { .. } => Op::ReleaseSharedSurface,
            Self::Flush => Op::Flush,
        }
    }
}

/// Length of trailing data declared by a wire field, as a `usize`.
fn trailing_len(len: u64) -> Result<usize, AerogpuCmdDecodeError> {
    usize::try_from(len).map_err(|_| AerogpuCmdDecodeError::CountOverflow)
}

/// Bytes taken by `count` 16-byte constant registers.
fn register_bytes(count: u32) -> Result<usize, AerogpuCmdDecodeError> {
    (count as usize)
        .checked_mul(16)
        .ok_or(AerogpuCmdDecodeError::CountOverflow)
}

pub fn decode_cmd<'a>(p: &AerogpuCmdPacket<'a>) -> Result<AeroGpuCmd<'a>, AerogpuCmdDecodeError> {
    use AerogpuCmdOpcode as Op;

    let opcode = p.require_prefix()?;
    let cmd = match opcode {
        Op::Nop => AeroGpuCmd::Nop,
        Op::DebugMarker => {
            let end = p.payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            AeroGpuCmd::DebugMarker {
                bytes: &p.payload[..end],
            }
        }

        Op::CreateBuffer => AeroGpuCmd::CreateBuffer {
            buffer_handle: p.u32_at(at!(AerogpuCmdCreateBuffer, buffer_handle))?,
            usage_flags: p.u32_at(at!(AerogpuCmdCreateBuffer, usage_flags))?,
            size_bytes: p.u64_at(at!(AerogpuCmdCreateBuffer, size_bytes))?,
            backing_alloc_id: p.u32_at(at!(AerogpuCmdCreateBuffer, backing_alloc_id))?,
            backing_offset_bytes: p.u32_at(at!(AerogpuCmdCreateBuffer, backing_offset_bytes))?,
        },
        Op::CreateTexture2d => AeroGpuCmd::CreateTexture2d {
            texture_handle: p.u32_at(at!(AerogpuCmdCreateTexture2d, texture_handle))?,
            usage_flags: p.u32_at(at!(AerogpuCmdCreateTexture2d, usage_flags))?,
            format: p.u32_at(at!(AerogpuCmdCreateTexture2d, format))?,
            width: p.u32_at(at!(AerogpuCmdCreateTexture2d, width))?,
            height: p.u32_at(at!(AerogpuCmdCreateTexture2d, height))?,
            mip_levels: p.u32_at(at!(AerogpuCmdCreateTexture2d, mip_levels))?,
            array_layers: p.u32_at(at!(AerogpuCmdCreateTexture2d, array_layers))?,
            row_pitch_bytes: p.u32_at(at!(AerogpuCmdCreateTexture2d, row_pitch_bytes))?,
            backing_alloc_id: p.u32_at(at!(AerogpuCmdCreateTexture2d, backing_alloc_id))?,
            backing_offset_bytes: p.u32_at(at!(AerogpuCmdCreateTexture2d, backing_offset_bytes))?,
        },
        Op::DestroyResource => AeroGpuCmd::DestroyResource {
            resource_handle: p.u32_at(at!(AerogpuCmdDestroyResource, resource_handle))?,
        },
        Op::ResourceDirtyRange => AeroGpuCmd::ResourceDirtyRange {
            resource_handle: p.u32_at(at!(AerogpuCmdResourceDirtyRange, resource_handle))?,
            offset_bytes: p.u64_at(at!(AerogpuCmdResourceDirtyRange, offset_bytes))?,
            size_bytes: p.u64_at(at!(AerogpuCmdResourceDirtyRange, size_bytes))?,
        },
        Op::UploadResource => {
            let size_bytes = p.u64_at(at!(AerogpuCmdUploadResource, size_bytes))?;
            AeroGpuCmd::UploadResource {
                resource_handle: p.u32_at(at!(AerogpuCmdUploadResource, resource_handle))?,
                offset_bytes: p.u64_at(at!(AerogpuCmdUploadResource, offset_bytes))?,
                size_bytes,
                data: p.trailing(cmd::AerogpuCmdUploadResource::SIZE_BYTES, trailing_len(size_bytes)?)?,
            }
        }
        Op::CopyBuffer => AeroGpuCmd::CopyBuffer {
            dst_buffer: p.u32_at(at!(AerogpuCmdCopyBuffer, dst_buffer))?,
            src_buffer: p.u32_at(at!(AerogpuCmdCopyBuffer, src_buffer))?,
            dst_offset_bytes: p.u64_at(at!(AerogpuCmdCopyBuffer, dst_offset_bytes))?,
            src_offset_bytes: p.u64_at(at!(AerogpuCmdCopyBuffer, src_offset_bytes))?,
            size_bytes: p.u64_at(at!(AerogpuCmdCopyBuffer, size_bytes))?,
            flags: p.u32_at(at!(AerogpuCmdCopyBuffer, flags))?,
        },
        Op::CopyTexture2d => AeroGpuCmd::CopyTexture2d {
            dst_texture: p.u32_at(at!(AerogpuCmdCopyTexture2d, dst_texture))?,
            src_texture: p.u32_at(at!(AerogpuCmdCopyTexture2d, src_texture))?,
            dst_mip_level: p.u32_at(at!(AerogpuCmdCopyTexture2d, dst_mip_level))?,
            dst_array_layer: p.u32_at(at!(AerogpuCmdCopyTexture2d, dst_array_layer))?,
            src_mip_level: p.u32_at(at!(AerogpuCmdCopyTexture2d, src_mip_level))?,
            src_array_layer: p.u32_at(at!(AerogpuCmdCopyTexture2d, src_array_layer))?,
            dst_x: p.u32_at(at!(AerogpuCmdCopyTexture2d, dst_x))?,
            dst_y: p.u32_at(at!(AerogpuCmdCopyTexture2d, dst_y))?,
            src_x: p.u32_at(at!(AerogpuCmdCopyTexture2d, src_x))?,
            src_y: p.u32_at(at!(AerogpuCmdCopyTexture2d, src_y))?,
            width: p.u32_at(at!(AerogpuCmdCopyTexture2d, width))?,
            height: p.u32_at(at!(AerogpuCmdCopyTexture2d, height))?,
            flags: p.u32_at(at!(AerogpuCmdCopyTexture2d, flags))?,
        },

        Op::CreateShaderDxbc => {
            let dxbc_size_bytes = p.u32_at(at!(AerogpuCmdCreateShaderDxbc, dxbc_size_bytes))?;
            AeroGpuCmd::CreateShaderDxbc {
                shader_handle: p.u32_at(at!(AerogpuCmdCreateShaderDxbc, shader_handle))?,
                stage: p.u32_at(at!(AerogpuCmdCreateShaderDxbc, stage))?,
                dxbc_bytes: p.trailing(
                    cmd::AerogpuCmdCreateShaderDxbc::SIZE_BYTES,
                    dxbc_size_bytes as usize,
                )?,
            }
        }
        Op::DestroyShader => AeroGpuCmd::DestroyShader {
            shader_handle: p.u32_at(at!(AerogpuCmdDestroyShader, shader_handle))?,
        },
        Op::BindShaders => AeroGpuCmd::BindShaders {
            vs: p.u32_at(at!(AerogpuCmdBindShaders, vs))?,
            ps: p.u32_at(at!(AerogpuCmdBindShaders, ps))?,
            cs: p.u32_at(at!(AerogpuCmdBindShaders, cs))?,
        },
        Op::SetShaderConstantsF => {
            let vec4_count = p.u32_at(at!(AerogpuCmdSetShaderConstantsF, vec4_count))?;
            AeroGpuCmd::SetShaderConstantsF {
                stage: p.u32_at(at!(AerogpuCmdSetShaderConstantsF, stage))?,
                start_register: p.u32_at(at!(AerogpuCmdSetShaderConstantsF, start_register))?,
                vec4_count,
                data: p.trailing(cmd::AerogpuCmdSetShaderConstantsF::SIZE_BYTES, register_bytes(vec4_count)?)?,
            }
        }
        Op::SetShaderConstantsI => {
            let vec4_count = p.u32_at(at!(AerogpuCmdSetShaderConstantsI, vec4_count))?;
            AeroGpuCmd::SetShaderConstantsI {
                stage: p.u32_at(at!(AerogpuCmdSetShaderConstantsI, stage))?,
                start_register: p.u32_at(at!(AerogpuCmdSetShaderConstantsI, start_register))?,
                vec4_count,
                data: p.trailing(cmd::AerogpuCmdSetShaderConstantsI::SIZE_BYTES, register_bytes(vec4_count)?)?,
            }
        }
        Op::SetShaderConstantsB => {
            let bool_count = p.u32_at(at!(AerogpuCmdSetShaderConstantsB, bool_count))?;
            AeroGpuCmd::SetShaderConstantsB {
                stage: p.u32_at(at!(AerogpuCmdSetShaderConstantsB, stage))?,
                start_register: p.u32_at(at!(AerogpuCmdSetShaderConstantsB, start_register))?,
                bool_count,
                data: p.trailing(cmd::AerogpuCmdSetShaderConstantsB::SIZE_BYTES, register_bytes(bool_count)?)?,
            }
        }
        Op::CreateInputLayout => {
            let blob_size_bytes = p.u32_at(at!(AerogpuCmdCreateInputLayout, blob_size_bytes))?;
            AeroGpuCmd::CreateInputLayout {
                input_layout_handle: p.u32_at(at!(AerogpuCmdCreateInputLayout, input_layout_handle))?,
                blob_bytes: p.trailing(
                    cmd::AerogpuCmdCreateInputLayout::SIZE_BYTES,
                    blob_size_bytes as usize,
                )?,
            }
        }
        Op::DestroyInputLayout => AeroGpuCmd::DestroyInputLayout {
            input_layout_handle: p.u32_at(at!(AerogpuCmdDestroyInputLayout, input_layout_handle))?,
        },
        Op::SetInputLayout => AeroGpuCmd::SetInputLayout {
            input_layout_handle: p.u32_at(at!(AerogpuCmdSetInputLayout, input_layout_handle))?,
        },

        Op::SetBlendState => AeroGpuCmd::SetBlendState {
            enable: p.u32_at(at!(AerogpuCmdSetBlendState, state.enable))?,
            src_factor: p.u32_at(at!(AerogpuCmdSetBlendState, state.src_factor))?,
            dst_factor: p.u32_at(at!(AerogpuCmdSetBlendState, state.dst_factor))?,
            blend_op: p.u32_at(at!(AerogpuCmdSetBlendState, state.blend_op))?,
            color_write_mask: p.u8_at(at!(AerogpuCmdSetBlendState, state.color_write_mask))?,
        },
        Op::SetDepthStencilState => AeroGpuCmd::SetDepthStencilState {
            depth_enable: p.u32_at(at!(AerogpuCmdSetDepthStencilState, state.depth_enable))?,
            depth_write_enable: p.u32_at(at!(AerogpuCmdSetDepthStencilState, state.depth_write_enable))?,
            depth_func: p.u32_at(at!(AerogpuCmdSetDepthStencilState, state.depth_func))?,
            stencil_enable: p.u32_at(at!(AerogpuCmdSetDepthStencilState, state.stencil_enable))?,
            stencil_read_mask: p.u8_at(at!(AerogpuCmdSetDepthStencilState, state.stencil_read_mask))?,
            stencil_write_mask: p.u8_at(at!(AerogpuCmdSetDepthStencilState, state.stencil_write_mask))?,
        },
        Op::SetRasterizerState => AeroGpuCmd::SetRasterizerState {
            fill_mode: p.u32_at(at!(AerogpuCmdSetRasterizerState, state.fill_mode))?,
            cull_mode: p.u32_at(at!(AerogpuCmdSetRasterizerState, state.cull_mode))?,
            front_ccw: p.u32_at(at!(AerogpuCmdSetRasterizerState, state.front_ccw))?,
            scissor_enable: p.u32_at(at!(AerogpuCmdSetRasterizerState, state.scissor_enable))?,
            depth_bias: p.i32_at(at!(AerogpuCmdSetRasterizerState, state.depth_bias))?,
        },

        Op::SetRenderTargets => {
            let color_count = p.u32_at(at!(AerogpuCmdSetRenderTargets, color_count))?;
            // An oversized count is a state error for the processor; the
            // packet still has to carry every slot it could address.
            let present = (color_count as usize).min(AEROGPU_MAX_RENDER_TARGETS);
            p.require_size(opcode, SET_RENDER_TARGETS_PREFIX_BYTES + present * 4)?;
            let mut colors = [0u32; AEROGPU_MAX_RENDER_TARGETS];
            for (i, color) in colors.iter_mut().enumerate().take(present) {
                *color = p.u32_at(at!(AerogpuCmdSetRenderTargets, colors) + i * 4)?;
            }
            AeroGpuCmd::SetRenderTargets {
                color_count,
                depth_stencil: p.u32_at(at!(AerogpuCmdSetRenderTargets, depth_stencil))?,
                colors,
            }
        }
        Op::SetViewport => AeroGpuCmd::SetViewport {
            x: p.f32_at(at!(AerogpuCmdSetViewport, x_f32))?,
            y: p.f32_at(at!(AerogpuCmdSetViewport, y_f32))?,
            width: p.f32_at(at!(AerogpuCmdSetViewport, width_f32))?,
            height: p.f32_at(at!(AerogpuCmdSetViewport, height_f32))?,
            min_depth: p.f32_at(at!(AerogpuCmdSetViewport, min_depth_f32))?,
            max_depth: p.f32_at(at!(AerogpuCmdSetViewport, max_depth_f32))?,
        },
        Op::SetScissor => AeroGpuCmd::SetScissor {
            x: p.i32_at(at!(AerogpuCmdSetScissor, x))?,
            y: p.i32_at(at!(AerogpuCmdSetScissor, y))?,
            width: p.i32_at(at!(AerogpuCmdSetScissor, width))?,
            height: p.i32_at(at!(AerogpuCmdSetScissor, height))?,
        },

        Op::SetVertexBuffers => {
            let start_slot = p.u32_at(at!(AerogpuCmdSetVertexBuffers, start_slot))?;
            let buffer_count = p.u32_at(at!(AerogpuCmdSetVertexBuffers, buffer_count))?;
            let stride = cmd::AerogpuVertexBufferBinding::SIZE_BYTES;
            let len = (buffer_count as usize)
                .checked_mul(stride)
                .ok_or(AerogpuCmdDecodeError::CountOverflow)?;
            // Validate before allocating so a huge count cannot reserve memory.
            let raw = p.trailing(cmd::AerogpuCmdSetVertexBuffers::SIZE_BYTES, len)?;
            let capacity = raw.len() / stride;
            let mut bindings = Vec::with_capacity(capacity.min(AEROGPU_MAX_VERTEX_BUFFER_SLOTS as usize));
            for i in 0..capacity {
                let base = cmd::AerogpuCmdSetVertexBuffers::SIZE_BYTES + i * stride;
                bindings.push(AerogpuVertexBufferBinding {
                    buffer: p.u32_at(base + offset_of!(AerogpuVertexBufferBinding, buffer))?,
                    stride_bytes: p.u32_at(base + offset_of!(AerogpuVertexBufferBinding, stride_bytes))?,
                    offset_bytes: p.u32_at(base + offset_of!(AerogpuVertexBufferBinding, offset_bytes))?,
                    reserved0: 0,
                });
            }
            AeroGpuCmd::SetVertexBuffers { start_slot, bindings }
        }
        Op::SetIndexBuffer => AeroGpuCmd::SetIndexBuffer {
            buffer: p.u32_at(at!(AerogpuCmdSetIndexBuffer, buffer))?,
            format: p.u32_at(at!(AerogpuCmdSetIndexBuffer, format))?,
            offset_bytes: p.u32_at(at!(AerogpuCmdSetIndexBuffer, offset_bytes))?,
        },
        Op::SetPrimitiveTopology => AeroGpuCmd::SetPrimitiveTopology {
            topology: p.u32_at(at!(AerogpuCmdSetPrimitiveTopology, topology))?,
        },
        Op::SetTexture => AeroGpuCmd::SetTexture {
            shader_stage: p.u32_at(at!(AerogpuCmdSetTexture, shader_stage))?,
            slot: p.u32_at(at!(AerogpuCmdSetTexture, slot))?,
            texture: p.u32_at(at!(AerogpuCmdSetTexture, texture))?,
        },
        Op::SetSamplerState => AeroGpuCmd::SetSamplerState {
            shader_stage: p.u32_at(at!(AerogpuCmdSetSamplerState, shader_stage))?,
            slot: p.u32_at(at!(AerogpuCmdSetSamplerState, slot))?,
            state: p.u32_at(at!(AerogpuCmdSetSamplerState, state))?,
            value: p.u32_at(at!(AerogpuCmdSetSamplerState, value))?,
        },
        Op::SetRenderState => AeroGpuCmd::SetRenderState {
            state: p.u32_at(at!(AerogpuCmdSetRenderState, state))?,
            value: p.u32_at(at!(AerogpuCmdSetRenderState, value))?,
        },

        Op::Clear => {
            let base = at!(AerogpuCmdClear, color_rgba_f32);
            AeroGpuCmd::Clear {
                flags: p.u32_at(at!(AerogpuCmdClear, flags))?,
                color_rgba: [
                    p.f32_at(base)?,
                    p.f32_at(base + 4)?,
                    p.f32_at(base + 8)?,
                    p.f32_at(base + 12)?,
                ],
                depth: p.f32_at(at!(AerogpuCmdClear, depth_f32))?,
                stencil: p.u32_at(at!(AerogpuCmdClear, stencil))?,
            }
        }
        Op::Draw => AeroGpuCmd::Draw {
            vertex_count: p.u32_at(at!(AerogpuCmdDraw, vertex_count))?,
            instance_count: p.u32_at(at!(AerogpuCmdDraw, instance_count))?,
            first_vertex: p.u32_at(at!(AerogpuCmdDraw, first_vertex))?,
            first_instance: p.u32_at(at!(AerogpuCmdDraw, first_instance))?,
        },
        Op::DrawIndexed => AeroGpuCmd::DrawIndexed {
            index_count: p.u32_at(at!(AerogpuCmdDrawIndexed, index_count))?,
            instance_count: p.u32_at(at!(AerogpuCmdDrawIndexed, instance_count))?,
            first_index: p.u32_at(at!(AerogpuCmdDrawIndexed, first_index))?,
            base_vertex: p.i32_at(at!(AerogpuCmdDrawIndexed, base_vertex))?,
            first_instance: p.u32_at(at!(AerogpuCmdDrawIndexed, first_instance))?,
        },
        Op::Dispatch => AeroGpuCmd::Dispatch {
            group_count_x: p.u32_at(at!(AerogpuCmdDispatch, group_count_x))?,
            group_count_y: p.u32_at(at!(AerogpuCmdDispatch, group_count_y))?,
            group_count_z: p.u32_at(at!(AerogpuCmdDispatch, group_count_z))?,
        },

        Op::Present => AeroGpuCmd::Present {
            scanout_id: p.u32_at(at!(AerogpuCmdPresent, scanout_id))?,
            flags: p.u32_at(at!(AerogpuCmdPresent, flags))?,
        },
        Op::PresentEx => AeroGpuCmd::PresentEx {
            scanout_id: p.u32_at(at!(AerogpuCmdPresentEx, scanout_id))?,
            flags: p.u32_at(at!(AerogpuCmdPresentEx, flags))?,
            d3d9_present_flags: p.u32_at(at!(AerogpuCmdPresentEx, d3d9_present_flags))?,
        },
        Op::ExportSharedSurface => AeroGpuCmd::ExportSharedSurface {
            resource_handle: p.u32_at(at!(AerogpuCmdExportSharedSurface, resource_handle))?,
            share_token: p.u64_at(at!(AerogpuCmdExportSharedSurface, share_token))?,
        },
        Op::ImportSharedSurface => AeroGpuCmd::ImportSharedSurface {
            out_resource_handle: p.u32_at(at!(AerogpuCmdImportSharedSurface, out_resource_handle))?,
            share_token: p.u64_at(at!(AerogpuCmdImportSharedSurface, share_token))?,
        },
        Op::ReleaseSharedSurface => AeroGpuCmd::ReleaseSharedSurface {
            share_token: p.u64_at(at!(AerogpuCmdReleaseSharedSurface, share_token))?,
        },

        Op::Flush => AeroGpuCmd::Flush,
    };
    Ok(cmd)
}

/// A fully decoded stream: header plus every packet, in order.
#[derive(Debug, Clone)]
pub struct AeroGpuCmdStreamView<'a> {
    pub header: AerogpuCmdStreamHeader,
    pub cmds: Vec<AeroGpuCmd<'a>>,
}

/// Eagerly decode a whole stream, failing on the first bad packet.
///
/// The command processor walks packets lazily instead; this is for tools and
/// tests that want the typed list up front.
pub fn parse_cmd_stream(bytes: &[u8]) -> Result<AeroGpuCmdStreamView<'_>, AerogpuCmdDecodeError> {
    let stream = AerogpuCmdStream::open(bytes)?;
    let mut cmds = Vec::new();
    for packet in stream.packets() {
        cmds.push(decode_cmd(&packet?)?);
    }
    Ok(AeroGpuCmdStreamView {
        header: *stream.header(),
        cmds,
    })
}
