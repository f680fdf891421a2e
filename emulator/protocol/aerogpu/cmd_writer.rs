//! Canonical command stream encoder for AeroGPU (`aerogpu_cmd.h`).
//!
//! Used by tests, fixtures and host tooling that need byte-exact streams:
//! every packet is zero padded to a 4-byte multiple, reserved fields are
//! zero, and [`AerogpuCmdWriter::finish`] patches the stream header's
//! `size_bytes`. Encoding the same calls in the same order always produces
//! identical bytes.

use core::mem::offset_of;

use super::aerogpu_cmd::{
    AerogpuBlendFactor, AerogpuBlendOp, AerogpuCmdBindShaders, AerogpuCmdClear, AerogpuCmdCopyBuffer,
    AerogpuCmdCopyTexture2d, AerogpuCmdCreateBuffer, AerogpuCmdCreateInputLayout, AerogpuCmdCreateShaderDxbc,
    AerogpuCmdCreateTexture2d, AerogpuCmdDestroyInputLayout, AerogpuCmdDestroyResource, AerogpuCmdDestroyShader,
    AerogpuCmdDispatch, AerogpuCmdDraw, AerogpuCmdDrawIndexed, AerogpuCmdExportSharedSurface, AerogpuCmdFlush, AerogpuCmdHdr,
    AerogpuCmdImportSharedSurface, AerogpuCmdOpcode, AerogpuCmdPresent, AerogpuCmdPresentEx,
    AerogpuCmdReleaseSharedSurface, AerogpuCmdResourceDirtyRange, AerogpuCmdSetBlendState,
    AerogpuCmdSetDepthStencilState, AerogpuCmdSetIndexBuffer, AerogpuCmdSetInputLayout,
    AerogpuCmdSetPrimitiveTopology, AerogpuCmdSetRasterizerState, AerogpuCmdSetRenderState,
    AerogpuCmdSetRenderTargets, AerogpuCmdSetSamplerState, AerogpuCmdSetScissor, AerogpuCmdSetShaderConstantsB,
    AerogpuCmdSetShaderConstantsF, AerogpuCmdSetShaderConstantsI,
    AerogpuCmdSetTexture, AerogpuCmdSetVertexBuffers, AerogpuCmdSetViewport, AerogpuCmdStreamFlags,
    AerogpuCmdStreamHeader, AerogpuCmdUploadResource, AerogpuCompareFunc, AerogpuCullMode, AerogpuFillMode,
    AerogpuHandle, AerogpuIndexFormat, AerogpuPrimitiveTopology, AerogpuShaderStage, AerogpuVertexBufferBinding,
    AEROGPU_CMD_STREAM_MAGIC, AEROGPU_MAX_RENDER_TARGETS,
};
use super::aerogpu_pci::AEROGPU_ABI_VERSION_U32;

const STREAM_SIZE_BYTES_OFFSET: usize = offset_of!(AerogpuCmdStreamHeader, size_bytes);

/// Sequential little-endian field writer over one reserved packet.
///
/// Fields must be written in layout order; anything not written (reserved
/// fields, padding) stays zero.
struct PacketFields<'w> {
    buf: &'w mut [u8],
    pos: usize,
}

impl PacketFields<'_> {
    fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    fn i32(&mut self, v: i32) -> &mut Self {
        self.u32(v as u32)
    }

    fn f32(&mut self, v: f32) -> &mut Self {
        self.u32(v.to_bits())
    }

    fn u64(&mut self, v: u64) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    fn u8(&mut self, v: u8) -> &mut Self {
        self.bytes(&[v])
    }

    fn skip(&mut self, n: usize) -> &mut Self {
        self.pos += n;
        self
    }

    fn seek(&mut self, pos: usize) -> &mut Self {
        self.pos = pos;
        self
    }

    fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
        self
    }
}

/// Append-only AeroGPU command stream builder.
#[derive(Debug, Clone)]
pub struct AerogpuCmdWriter {
    buf: Vec<u8>,
}

impl Default for AerogpuCmdWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl AerogpuCmdWriter {
    pub fn new() -> Self {
        let mut w = Self { buf: Vec::new() };
        w.reset();
        w
    }

    /// Drop all packets and start a fresh stream header.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.buf.resize(AerogpuCmdStreamHeader::SIZE_BYTES, 0);
        let size = AerogpuCmdStreamHeader::SIZE_BYTES as u32;
        PacketFields {
            buf: &mut self.buf,
            pos: 0,
        }
        .u32(AEROGPU_CMD_STREAM_MAGIC)
        .u32(AEROGPU_ABI_VERSION_U32)
        .u32(size)
        .u32(AerogpuCmdStreamFlags::None as u32);
    }

    /// Patch the header's `size_bytes` and hand out the finished stream.
    pub fn finish(mut self) -> Vec<u8> {
        self.patch_size();
        self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.len() <= AerogpuCmdStreamHeader::SIZE_BYTES
    }

    /// Bytes written so far; `size_bytes` is kept current after every packet.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn patch_size(&mut self) {
        let size = u32::try_from(self.buf.len()).expect("command stream too large for u32 size_bytes");
        self.buf[STREAM_SIZE_BYTES_OFFSET..STREAM_SIZE_BYTES_OFFSET + 4].copy_from_slice(&size.to_le_bytes());
    }

    /// Reserve a zeroed packet of `unpadded_size` bytes (rounded up to 4),
    /// write its header and return a cursor positioned after it.
    fn packet(&mut self, opcode: AerogpuCmdOpcode, unpadded_size: usize) -> PacketFields<'_> {
        let size = unpadded_size.next_multiple_of(4);
        let size_u32 = u32::try_from(size).expect("command packet too large for u32 size_bytes");

        let start = self.buf.len();
        self.buf.resize(start + size, 0);
        self.patch_size();

        let mut fields = PacketFields {
            buf: &mut self.buf[start..],
            pos: 0,
        };
        fields.u32(opcode as u32).u32(size_u32);
        fields
    }

    /// Append a packet verbatim with an arbitrary opcode and payload.
    /// Intended for forward-compatibility and negative tests.
    pub fn raw_packet(&mut self, opcode: u32, payload: &[u8]) {
        let size = (AerogpuCmdHdr::SIZE_BYTES + payload.len()).next_multiple_of(4);
        let size_u32 = u32::try_from(size).expect("command packet too large for u32 size_bytes");
        let start = self.buf.len();
        self.buf.resize(start + size, 0);
        self.patch_size();
        PacketFields {
            buf: &mut self.buf[start..],
            pos: 0,
        }
        .u32(opcode)
        .u32(size_u32)
        .bytes(payload);
    }

    pub fn nop(&mut self) {
        self.packet(AerogpuCmdOpcode::Nop, AerogpuCmdHdr::SIZE_BYTES);
    }

    pub fn debug_marker(&mut self, marker: &str) {
        self.packet(AerogpuCmdOpcode::DebugMarker, AerogpuCmdHdr::SIZE_BYTES + marker.len())
            .bytes(marker.as_bytes());
    }

    pub fn create_buffer(
        &mut self,
        buffer_handle: AerogpuHandle,
        usage_flags: u32,
        size_bytes: u64,
        backing_alloc_id: u32,
        backing_offset_bytes: u32,
    ) {
        self.packet(AerogpuCmdOpcode::CreateBuffer, AerogpuCmdCreateBuffer::SIZE_BYTES)
            .u32(buffer_handle)
            .u32(usage_flags)
            .u64(size_bytes)
            .u32(backing_alloc_id)
            .u32(backing_offset_bytes);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_texture2d(
        &mut self,
        texture_handle: AerogpuHandle,
        usage_flags: u32,
        format: u32,
        width: u32,
        height: u32,
        mip_levels: u32,
        array_layers: u32,
        row_pitch_bytes: u32,
        backing_alloc_id: u32,
        backing_offset_bytes: u32,
    ) {
        self.packet(AerogpuCmdOpcode::CreateTexture2d, AerogpuCmdCreateTexture2d::SIZE_BYTES)
            .u32(texture_handle)
            .u32(usage_flags)
            .u32(format)
            .u32(width)
            .u32(height)
            .u32(mip_levels)
            .u32(array_layers)
            .u32(row_pitch_bytes)
            .u32(backing_alloc_id)
            .u32(backing_offset_bytes);
    }

    pub fn destroy_resource(&mut self, resource_handle: AerogpuHandle) {
        self.packet(AerogpuCmdOpcode::DestroyResource, AerogpuCmdDestroyResource::SIZE_BYTES)
            .u32(resource_handle);
    }

    pub fn resource_dirty_range(&mut self, resource_handle: AerogpuHandle, offset_bytes: u64, size_bytes: u64) {
        self.packet(AerogpuCmdOpcode::ResourceDirtyRange, AerogpuCmdResourceDirtyRange::SIZE_BYTES)
            .u32(resource_handle)
            .skip(4)
            .u64(offset_bytes)
            .u64(size_bytes);
    }

    pub fn upload_resource(&mut self, resource_handle: AerogpuHandle, offset_bytes: u64, data: &[u8]) {
        self.packet(
            AerogpuCmdOpcode::UploadResource,
            AerogpuCmdUploadResource::SIZE_BYTES + data.len(),
        )
        .u32(resource_handle)
        .skip(4)
        .u64(offset_bytes)
        .u64(data.len() as u64)
        .bytes(data);
    }

    pub fn copy_buffer(
        &mut self,
        dst_buffer: AerogpuHandle,
        src_buffer: AerogpuHandle,
        dst_offset_bytes: u64,
        src_offset_bytes: u64,
        size_bytes: u64,
        flags: u32,
    ) {
        self.packet(AerogpuCmdOpcode::CopyBuffer, AerogpuCmdCopyBuffer::SIZE_BYTES)
            .u32(dst_buffer)
            .u32(src_buffer)
            .u64(dst_offset_bytes)
            .u64(src_offset_bytes)
            .u64(size_bytes)
            .u32(flags);
    }

    /// `dst`/`src` are `(texture, mip_level, array_layer, x, y)`.
    pub fn copy_texture2d(
        &mut self,
        dst: (AerogpuHandle, u32, u32, u32, u32),
        src: (AerogpuHandle, u32, u32, u32, u32),
        width: u32,
        height: u32,
        flags: u32,
    ) {
        let (dst_texture, dst_mip, dst_layer, dst_x, dst_y) = dst;
        let (src_texture, src_mip, src_layer, src_x, src_y) = src;
        self.packet(AerogpuCmdOpcode::CopyTexture2d, AerogpuCmdCopyTexture2d::SIZE_BYTES)
            .u32(dst_texture)
            .u32(src_texture)
            .u32(dst_mip)
            .u32(dst_layer)
            .u32(src_mip)
            .u32(src_layer)
            .u32(dst_x)
            .u32(dst_y)
            .u32(src_x)
            .u32(src_y)
            .u32(width)
            .u32(height)
            .u32(flags);
    }

    pub fn create_shader_dxbc(&mut self, shader_handle: AerogpuHandle, stage: AerogpuShaderStage, dxbc_bytes: &[u8]) {
        self.create_shader_dxbc_raw(shader_handle, stage as u32, dxbc_bytes);
    }

    /// Like [`Self::create_shader_dxbc`] but with an unvalidated stage value.
    pub fn create_shader_dxbc_raw(&mut self, shader_handle: AerogpuHandle, stage: u32, dxbc_bytes: &[u8]) {
        let len = u32::try_from(dxbc_bytes.len()).expect("DXBC blob too large");
        self.packet(
            AerogpuCmdOpcode::CreateShaderDxbc,
            AerogpuCmdCreateShaderDxbc::SIZE_BYTES + dxbc_bytes.len(),
        )
        .u32(shader_handle)
        .u32(stage)
        .u32(len)
        .skip(4)
        .bytes(dxbc_bytes);
    }

    pub fn destroy_shader(&mut self, shader_handle: AerogpuHandle) {
        self.packet(AerogpuCmdOpcode::DestroyShader, AerogpuCmdDestroyShader::SIZE_BYTES)
            .u32(shader_handle);
    }

    pub fn bind_shaders(&mut self, vs: AerogpuHandle, ps: AerogpuHandle, cs: AerogpuHandle) {
        self.packet(AerogpuCmdOpcode::BindShaders, AerogpuCmdBindShaders::SIZE_BYTES)
            .u32(vs)
            .u32(ps)
            .u32(cs);
    }

    /// `data` holds `4 * vec4_count` floats.
    pub fn set_shader_constants_f(&mut self, stage: AerogpuShaderStage, start_register: u32, data: &[f32]) {
        assert_eq!(
            data.len() % 4,
            0,
            "SET_SHADER_CONSTANTS_F data must be float4-aligned (got {} floats)",
            data.len()
        );
        let vec4_count = u32::try_from(data.len() / 4).expect("too many shader constants");
        let mut fields = self.packet(
            AerogpuCmdOpcode::SetShaderConstantsF,
            AerogpuCmdSetShaderConstantsF::SIZE_BYTES + data.len() * 4,
        );
        fields.u32(stage as u32).u32(start_register).u32(vec4_count).skip(4);
        for &v in data {
            fields.f32(v);
        }
    }

    /// `data` holds `4 * vec4_count` ints.
    pub fn set_shader_constants_i(&mut self, stage: AerogpuShaderStage, start_register: u32, data: &[i32]) {
        assert_eq!(
            data.len() % 4,
            0,
            "SET_SHADER_CONSTANTS_I data must be int4-aligned (got {} ints)",
            data.len()
        );
        let vec4_count = u32::try_from(data.len() / 4).expect("too many shader constants");
        let mut fields = self.packet(
            AerogpuCmdOpcode::SetShaderConstantsI,
            AerogpuCmdSetShaderConstantsI::SIZE_BYTES + data.len() * 4,
        );
        fields.u32(stage as u32).u32(start_register).u32(vec4_count).skip(4);
        for &v in data {
            fields.i32(v);
        }
    }

    /// One register per entry of `data`, each replicated across four lanes.
    pub fn set_shader_constants_b(&mut self, stage: AerogpuShaderStage, start_register: u32, data: &[bool]) {
        let bool_count = u32::try_from(data.len()).expect("too many shader constants");
        let mut fields = self.packet(
            AerogpuCmdOpcode::SetShaderConstantsB,
            AerogpuCmdSetShaderConstantsB::SIZE_BYTES + data.len() * 16,
        );
        fields.u32(stage as u32).u32(start_register).u32(bool_count).skip(4);
        for &v in data {
            for _ in 0..4 {
                fields.u32(v as u32);
            }
        }
    }

    pub fn create_input_layout(&mut self, input_layout_handle: AerogpuHandle, blob: &[u8]) {
        let len = u32::try_from(blob.len()).expect("input layout blob too large");
        self.packet(
            AerogpuCmdOpcode::CreateInputLayout,
            AerogpuCmdCreateInputLayout::SIZE_BYTES + blob.len(),
        )
        .u32(input_layout_handle)
        .u32(len)
        .skip(4)
        .bytes(blob);
    }

    pub fn destroy_input_layout(&mut self, input_layout_handle: AerogpuHandle) {
        self.packet(AerogpuCmdOpcode::DestroyInputLayout, AerogpuCmdDestroyInputLayout::SIZE_BYTES)
            .u32(input_layout_handle);
    }

    pub fn set_input_layout(&mut self, input_layout_handle: AerogpuHandle) {
        self.packet(AerogpuCmdOpcode::SetInputLayout, AerogpuCmdSetInputLayout::SIZE_BYTES)
            .u32(input_layout_handle);
    }

    pub fn set_blend_state(
        &mut self,
        enable: bool,
        src_factor: AerogpuBlendFactor,
        dst_factor: AerogpuBlendFactor,
        blend_op: AerogpuBlendOp,
        color_write_mask: u8,
    ) {
        self.packet(AerogpuCmdOpcode::SetBlendState, AerogpuCmdSetBlendState::SIZE_BYTES)
            .u32(enable as u32)
            .u32(src_factor as u32)
            .u32(dst_factor as u32)
            .u32(blend_op as u32)
            .u8(color_write_mask);
    }

    pub fn set_depth_stencil_state(
        &mut self,
        depth_enable: bool,
        depth_write_enable: bool,
        depth_func: AerogpuCompareFunc,
        stencil_enable: bool,
        stencil_read_mask: u8,
        stencil_write_mask: u8,
    ) {
        self.packet(
            AerogpuCmdOpcode::SetDepthStencilState,
            AerogpuCmdSetDepthStencilState::SIZE_BYTES,
        )
        .u32(depth_enable as u32)
        .u32(depth_write_enable as u32)
        .u32(depth_func as u32)
        .u32(stencil_enable as u32)
        .u8(stencil_read_mask)
        .u8(stencil_write_mask);
    }

    pub fn set_rasterizer_state(
        &mut self,
        fill_mode: AerogpuFillMode,
        cull_mode: AerogpuCullMode,
        front_ccw: bool,
        scissor_enable: bool,
        depth_bias: i32,
    ) {
        self.packet(AerogpuCmdOpcode::SetRasterizerState, AerogpuCmdSetRasterizerState::SIZE_BYTES)
            .u32(fill_mode as u32)
            .u32(cull_mode as u32)
            .u32(front_ccw as u32)
            .u32(scissor_enable as u32)
            .i32(depth_bias);
    }

    /// Always emits the full fixed-size packet; unused `colors[]` entries are zero.
    pub fn set_render_targets(&mut self, colors: &[AerogpuHandle], depth_stencil: AerogpuHandle) {
        assert!(
            colors.len() <= AEROGPU_MAX_RENDER_TARGETS,
            "too many render targets ({} > {AEROGPU_MAX_RENDER_TARGETS})",
            colors.len()
        );
        let mut fields = self.packet(AerogpuCmdOpcode::SetRenderTargets, AerogpuCmdSetRenderTargets::SIZE_BYTES);
        fields.u32(colors.len() as u32).u32(depth_stencil);
        debug_assert_eq!(fields.pos, offset_of!(AerogpuCmdSetRenderTargets, colors));
        for &h in colors {
            fields.u32(h);
        }
    }

    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        self.packet(AerogpuCmdOpcode::SetViewport, AerogpuCmdSetViewport::SIZE_BYTES)
            .f32(x)
            .f32(y)
            .f32(width)
            .f32(height)
            .f32(min_depth)
            .f32(max_depth);
    }

    pub fn set_scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.packet(AerogpuCmdOpcode::SetScissor, AerogpuCmdSetScissor::SIZE_BYTES)
            .i32(x)
            .i32(y)
            .i32(width)
            .i32(height);
    }

    pub fn set_vertex_buffers(&mut self, start_slot: u32, bindings: &[AerogpuVertexBufferBinding]) {
        let count = u32::try_from(bindings.len()).expect("too many vertex buffer bindings");
        let mut fields = self.packet(
            AerogpuCmdOpcode::SetVertexBuffers,
            AerogpuCmdSetVertexBuffers::SIZE_BYTES + bindings.len() * AerogpuVertexBufferBinding::SIZE_BYTES,
        );
        fields.u32(start_slot).u32(count);
        for b in bindings {
            fields.u32(b.buffer).u32(b.stride_bytes).u32(b.offset_bytes).skip(4);
        }
    }

    pub fn set_index_buffer(&mut self, buffer: AerogpuHandle, format: AerogpuIndexFormat, offset_bytes: u32) {
        self.packet(AerogpuCmdOpcode::SetIndexBuffer, AerogpuCmdSetIndexBuffer::SIZE_BYTES)
            .u32(buffer)
            .u32(format as u32)
            .u32(offset_bytes);
    }

    pub fn set_primitive_topology(&mut self, topology: AerogpuPrimitiveTopology) {
        self.set_primitive_topology_raw(topology as u32);
    }

    /// Like [`Self::set_primitive_topology`] but with an unvalidated value.
    pub fn set_primitive_topology_raw(&mut self, topology: u32) {
        self.packet(
            AerogpuCmdOpcode::SetPrimitiveTopology,
            AerogpuCmdSetPrimitiveTopology::SIZE_BYTES,
        )
        .u32(topology);
    }

    pub fn set_texture(&mut self, shader_stage: AerogpuShaderStage, slot: u32, texture: AerogpuHandle) {
        self.packet(AerogpuCmdOpcode::SetTexture, AerogpuCmdSetTexture::SIZE_BYTES)
            .u32(shader_stage as u32)
            .u32(slot)
            .u32(texture);
    }

    pub fn set_sampler_state(&mut self, shader_stage: AerogpuShaderStage, slot: u32, state: u32, value: u32) {
        self.packet(AerogpuCmdOpcode::SetSamplerState, AerogpuCmdSetSamplerState::SIZE_BYTES)
            .u32(shader_stage as u32)
            .u32(slot)
            .u32(state)
            .u32(value);
    }

    pub fn set_render_state(&mut self, state: u32, value: u32) {
        self.packet(AerogpuCmdOpcode::SetRenderState, AerogpuCmdSetRenderState::SIZE_BYTES)
            .u32(state)
            .u32(value);
    }

    pub fn clear(&mut self, flags: u32, color_rgba: [f32; 4], depth: f32, stencil: u32) {
        let mut fields = self.packet(AerogpuCmdOpcode::Clear, AerogpuCmdClear::SIZE_BYTES);
        fields.u32(flags);
        for c in color_rgba {
            fields.f32(c);
        }
        fields.f32(depth).u32(stencil);
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.packet(AerogpuCmdOpcode::Draw, AerogpuCmdDraw::SIZE_BYTES)
            .u32(vertex_count)
            .u32(instance_count)
            .u32(first_vertex)
            .u32(first_instance);
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.packet(AerogpuCmdOpcode::DrawIndexed, AerogpuCmdDrawIndexed::SIZE_BYTES)
            .u32(index_count)
            .u32(instance_count)
            .u32(first_index)
            .i32(base_vertex)
            .u32(first_instance);
    }

    pub fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.packet(AerogpuCmdOpcode::Dispatch, AerogpuCmdDispatch::SIZE_BYTES)
            .u32(group_count_x)
            .u32(group_count_y)
            .u32(group_count_z);
    }

    pub fn present(&mut self, scanout_id: u32, flags: u32) {
        self.packet(AerogpuCmdOpcode::Present, AerogpuCmdPresent::SIZE_BYTES)
            .u32(scanout_id)
            .u32(flags);
    }

    pub fn present_ex(&mut self, scanout_id: u32, flags: u32, d3d9_present_flags: u32) {
        self.packet(AerogpuCmdOpcode::PresentEx, AerogpuCmdPresentEx::SIZE_BYTES)
            .u32(scanout_id)
            .u32(flags)
            .u32(d3d9_present_flags);
    }

    pub fn export_shared_surface(&mut self, resource_handle: AerogpuHandle, share_token: u64) {
        self.packet(
            AerogpuCmdOpcode::ExportSharedSurface,
            AerogpuCmdExportSharedSurface::SIZE_BYTES,
        )
        .u32(resource_handle)
        .seek(offset_of!(AerogpuCmdExportSharedSurface, share_token))
        .u64(share_token);
    }

    pub fn import_shared_surface(&mut self, out_resource_handle: AerogpuHandle, share_token: u64) {
        self.packet(
            AerogpuCmdOpcode::ImportSharedSurface,
            AerogpuCmdImportSharedSurface::SIZE_BYTES,
        )
        .u32(out_resource_handle)
        .seek(offset_of!(AerogpuCmdImportSharedSurface, share_token))
        .u64(share_token);
    }

    pub fn release_shared_surface(&mut self, share_token: u64) {
        self.packet(
            AerogpuCmdOpcode::ReleaseSharedSurface,
            AerogpuCmdReleaseSharedSurface::SIZE_BYTES,
        )
        .u64(share_token);
    }

    pub fn flush(&mut self) {
        self.packet(AerogpuCmdOpcode::Flush, AerogpuCmdFlush::SIZE_BYTES);
    }
}
