//! Host-side AeroGPU command processor.
//!
//! Walks one submission's packets in order, validates each against the
//! resource table and pipeline state, and forwards the resulting host actions
//! to an [`AeroGpuBackend`]. The first failing packet aborts the rest of the
//! stream. Nothing already applied is rolled back; callers that care should
//! treat device state as partially updated and recreate what they need.

use std::sync::MutexGuard;

use aero_protocol::aerogpu::aerogpu_cmd::{
    decode_cmd_hdr_at, decode_input_layout_blob_le, AerogpuBlendFactor, AerogpuBlendOp, AerogpuCmdStream,
    AerogpuCompareFunc, AerogpuCullMode, AerogpuFillMode, AerogpuIndexFormat, AerogpuPrimitiveTopology,
    AerogpuShaderStage, AEROGPU_CLEAR_COLOR, AEROGPU_CLEAR_DEPTH, AEROGPU_CLEAR_STENCIL,
    AEROGPU_COPY_FLAG_WRITEBACK_DST, AEROGPU_HANDLE_NULL, AEROGPU_MAX_RENDER_TARGETS, AEROGPU_MAX_TEXTURE_SLOTS,
    AEROGPU_MAX_VERTEX_BUFFER_SLOTS, AEROGPU_PRESENT_FLAG_VSYNC,
};
use aero_protocol::aerogpu::aerogpu_pci::AerogpuFormat;
use tracing::{debug, trace, warn};

use crate::backend::{AeroGpuBackend, BackendCommand, CopyTexture2dRegion, DrawArgs};
use crate::error::{CommandProcessorError, MissingBinding, PacketError, ResourceError, StateError};
use crate::frame_pacing::FramePacer;
use crate::pipeline_state::{
    BlendState, BoundIndexBuffer, BoundVertexBuffer, DepthStencilState, PipelineState, RasterizerState,
    ResolvedBindings, ScissorRect, Viewport, MAX_SHADER_BOOL_CONSTANT_REGISTERS, MAX_SHADER_CONSTANT_REGISTERS,
    MAX_SHADER_INT_CONSTANT_REGISTERS,
};
use crate::protocol::{decode_cmd, AeroGpuCmd};
use crate::resource_table::{
    BufferDesc, InputLayoutDesc, ResourceDesc, ResourceKind, ResourceTable, ResourceUsage, ShaderDesc,
    SharedResourceTable, Texture2dDesc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum ProcessorState {
    #[default]
    Idle,
    /// Inside a stream, between the first packet and the end or a flush.
    Recording,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum AeroGpuEvent {
    /// The completed fence advanced to `fence`.
    FenceSignaled { fence: u64 },
    /// A present was accepted. `present_count` never decreases.
    PresentCompleted { scanout_id: u32, present_count: u64 },
    Flushed,
    DebugMarker { text: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutionReport {
    pub packets_processed: usize,
    pub events: Vec<AeroGpuEvent>,
}

fn lock_table(table: &SharedResourceTable) -> MutexGuard<'_, ResourceTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn enum_value<T>(field: &'static str, value: u32, parse: fn(u32) -> Option<T>) -> Result<T, StateError> {
    parse(value).ok_or(StateError::InvalidEnum { field, value })
}

fn shader_stage(value: u32) -> Result<AerogpuShaderStage, StateError> {
    enum_value("shader stage", value, AerogpuShaderStage::from_u32)
}

fn check_slot(what: &'static str, end: u64, limit: u32) -> Result<(), StateError> {
    if end > u64::from(limit) {
        return Err(StateError::SlotOutOfRange { what, slot: end, max: limit });
    }
    Ok(())
}

fn check_range(handle: u32, offset: u64, size: u64, resource_size: u64) -> Result<(), ResourceError> {
    match offset.checked_add(size) {
        Some(end) if end <= resource_size => Ok(()),
        _ => Err(ResourceError::RangeOutOfBounds {
            handle,
            offset,
            size,
            resource_size,
        }),
    }
}

/// Size of the guest-visible backing of a buffer or texture.
fn backing_size(table: &ResourceTable, handle: u32) -> Result<u64, ResourceError> {
    let desc = table.resolve(handle)?;
    match desc {
        ResourceDesc::Buffer(_) | ResourceDesc::Texture2d(_) => {
            desc.size_bytes().ok_or(ResourceError::InvalidDescriptor {
                handle,
                reason: "texture size overflows",
            })
        }
        other => Err(ResourceError::KindMismatch {
            handle,
            expected: "buffer or texture2d",
            found: other.kind(),
        }),
    }
}

fn check_subresource(desc: &Texture2dDesc, mip_level: u32, array_layer: u32) -> Result<(), StateError> {
    check_slot("mip level", u64::from(mip_level) + 1, desc.mip_levels)?;
    check_slot("array layer", u64::from(array_layer) + 1, desc.array_layers)
}

fn check_rect(handle: u32, desc: &Texture2dDesc, mip_level: u32, x: u32, y: u32, width: u32, height: u32) -> Result<(), ResourceError> {
    let (mip_w, mip_h) = desc.mip_extent(mip_level);
    check_range(handle, u64::from(x), u64::from(width), u64::from(mip_w))?;
    check_range(handle, u64::from(y), u64::from(height), u64::from(mip_h))
}

fn read_registers(data: &[u8]) -> impl Iterator<Item = [[u8; 4]; 4]> + '_ {
    data.chunks_exact(16).map(|reg| {
        let lane = |i: usize| [reg[i], reg[i + 1], reg[i + 2], reg[i + 3]];
        [lane(0), lane(4), lane(8), lane(12)]
    })
}

fn read_vec4s(data: &[u8]) -> impl Iterator<Item = [f32; 4]> + '_ {
    read_registers(data).map(|reg| reg.map(f32::from_le_bytes))
}

fn read_int4s(data: &[u8]) -> impl Iterator<Item = [i32; 4]> + '_ {
    read_registers(data).map(|reg| reg.map(i32::from_le_bytes))
}

/// Any non-zero lane reads as true.
fn read_bools(data: &[u8]) -> impl Iterator<Item = bool> + '_ {
    read_registers(data).map(|reg| reg.iter().any(|lane| u32::from_le_bytes(*lane) != 0))
}

/// `start..start + count` as slice bounds, after checking it against `limit`.
fn register_range(what: &'static str, start: u32, count: u32, limit: u32) -> Result<(usize, usize), StateError> {
    let end = u64::from(start) + u64::from(count);
    check_slot(what, end, limit)?;
    Ok((start as usize, end as usize))
}

fn stage_name(stage: AerogpuShaderStage) -> &'static str {
    match stage {
        AerogpuShaderStage::Vertex => "vertex",
        AerogpuShaderStage::Pixel => "pixel",
        AerogpuShaderStage::Compute => "compute",
    }
}

fn check_shader_stage(handle: u32, desc: &ShaderDesc, expected: AerogpuShaderStage) -> Result<(), StateError> {
    if desc.stage != expected {
        return Err(StateError::ShaderStageMismatch {
            handle,
            expected: stage_name(expected),
            found: desc.stage as u32,
        });
    }
    Ok(())
}

fn check_usage(handle: u32, usage: ResourceUsage, required: ResourceUsage) -> Result<(), ResourceError> {
    if !usage.contains(required) {
        return Err(ResourceError::InvalidUsageFlags {
            handle,
            usage_flags: usage.bits(),
        });
    }
    Ok(())
}

/// Per-device command stream state machine.
#[derive(Debug)]
pub struct AeroGpuCommandProcessor {
    state: ProcessorState,
    table: SharedResourceTable,
    pipeline: PipelineState,
    pacer: FramePacer,
}

impl AeroGpuCommandProcessor {
    pub fn new(table: SharedResourceTable, pacer: FramePacer) -> Self {
        Self {
            state: ProcessorState::Idle,
            table,
            pipeline: PipelineState::default(),
            pacer,
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn pipeline_state(&self) -> &PipelineState {
        &self.pipeline
    }

    /// Drop all bound state; resources and present statistics are kept.
    pub fn reset_pipeline_state(&mut self) {
        self.pipeline.reset();
        self.state = ProcessorState::Idle;
    }

    pub fn resource_table(&self) -> &SharedResourceTable {
        &self.table
    }

    pub fn frame_pacer(&self) -> &FramePacer {
        &self.pacer
    }

    pub fn frame_pacer_mut(&mut self) -> &mut FramePacer {
        &mut self.pacer
    }

    pub fn present_count(&self) -> u64 {
        self.pacer.last_present_count()
    }

    /// Apply every packet of `cmd_stream`, in order.
    ///
    /// `signal_fence` is only recorded against presents; fence bookkeeping
    /// belongs to the caller.
    pub fn process(
        &mut self,
        cmd_stream: &[u8],
        signal_fence: u64,
        backend: &mut dyn AeroGpuBackend,
    ) -> Result<ExecutionReport, CommandProcessorError> {
        let stream = AerogpuCmdStream::open(cmd_stream).map_err(|err| {
            warn!(error = %err, "rejected command stream header");
            CommandProcessorError::Stream(err)
        })?;
        debug!(size_bytes = stream.size_bytes(), signal_fence, "processing command stream");

        let mut report = ExecutionReport::default();
        let mut packets = stream.packets();
        loop {
            let offset = packets.offset();
            let packet = match packets.next() {
                None => break,
                Some(Ok(packet)) => packet,
                Some(Err(err)) => {
                    let opcode = decode_cmd_hdr_at(stream.as_bytes(), offset).map_or(0, |hdr| hdr.opcode);
                    return Err(self.abort(offset, opcode, err.into()));
                }
            };
            let opcode = packet.hdr.opcode;
            let size_bytes = packet.hdr.size_bytes;
            self.state = ProcessorState::Recording;
            trace!(offset, opcode, size_bytes, "dispatch packet");

            let applied = decode_cmd(&packet)
                .map_err(PacketError::from)
                .and_then(|cmd| self.apply(cmd, offset, signal_fence, backend));
            match applied {
                Ok(event) => {
                    report.packets_processed += 1;
                    report.events.extend(event);
                }
                Err(err) => return Err(self.abort(offset, opcode, err)),
            }
        }

        self.state = ProcessorState::Idle;
        Ok(report)
    }

    fn abort(&mut self, offset: usize, opcode: u32, source: PacketError) -> CommandProcessorError {
        self.state = ProcessorState::Idle;
        warn!(offset, opcode, error = %source, "command stream aborted");
        CommandProcessorError::Packet { offset, opcode, source }
    }

    fn apply(
        &mut self,
        cmd: AeroGpuCmd<'_>,
        offset: usize,
        signal_fence: u64,
        backend: &mut dyn AeroGpuBackend,
    ) -> Result<Option<AeroGpuEvent>, PacketError> {
        let backend_err = PacketError::Backend;
        let mut table = lock_table(&self.table);
        let pipeline = &mut self.pipeline;

        match cmd {
            AeroGpuCmd::Nop => {}
            AeroGpuCmd::DebugMarker { bytes } => {
                let text = String::from_utf8_lossy(bytes).into_owned();
                trace!(offset, marker = %text, "debug marker");
                return Ok(Some(AeroGpuEvent::DebugMarker { text }));
            }

            AeroGpuCmd::CreateBuffer {
                buffer_handle,
                usage_flags,
                size_bytes,
                backing_alloc_id,
                backing_offset_bytes,
            } => {
                let desc = BufferDesc {
                    usage: ResourceUsage::from_wire(buffer_handle, usage_flags)?,
                    size_bytes,
                    backing_alloc_id,
                    backing_offset_bytes,
                };
                desc.validate(buffer_handle)?;
                let desc = ResourceDesc::Buffer(desc);
                table.create(buffer_handle, desc.clone())?;
                backend
                    .execute(BackendCommand::CreateResource {
                        id: buffer_handle,
                        desc: &desc,
                    })
                    .map_err(backend_err)?;
            }
            AeroGpuCmd::CreateTexture2d {
                texture_handle,
                usage_flags,
                format,
                width,
                height,
                mip_levels,
                array_layers,
                row_pitch_bytes,
                backing_alloc_id,
                backing_offset_bytes,
            } => {
                let format = AerogpuFormat::from_u32(format)
                    .filter(|f| *f != AerogpuFormat::Invalid)
                    .ok_or(StateError::InvalidEnum {
                        field: "texture format",
                        value: format,
                    })?;
                let desc = Texture2dDesc {
                    usage: ResourceUsage::from_wire(texture_handle, usage_flags)?,
                    format,
                    width,
                    height,
                    mip_levels,
                    array_layers,
                    row_pitch_bytes,
                    backing_alloc_id,
                    backing_offset_bytes,
                };
                desc.validate(texture_handle)?;
                let desc = ResourceDesc::Texture2d(desc);
                table.create(texture_handle, desc.clone())?;
                backend
                    .execute(BackendCommand::CreateResource {
                        id: texture_handle,
                        desc: &desc,
                    })
                    .map_err(backend_err)?;
            }
            AeroGpuCmd::DestroyResource { resource_handle } => {
                let destroyed = table.destroy_kind(resource_handle, "buffer or texture2d", |k| {
                    matches!(k, ResourceKind::Buffer | ResourceKind::Texture2d)
                })?;
                pipeline.unbind_handle(resource_handle);
                if destroyed.freed {
                    backend
                        .execute(BackendCommand::DestroyResource {
                            id: destroyed.underlying,
                        })
                        .map_err(backend_err)?;
                }
            }
            AeroGpuCmd::ResourceDirtyRange {
                resource_handle,
                offset_bytes,
                size_bytes,
            } => {
                let resource_size = backing_size(&table, resource_handle)?;
                check_range(resource_handle, offset_bytes, size_bytes, resource_size)?;
                backend
                    .execute(BackendCommand::DirtyRange {
                        id: table.underlying(resource_handle)?,
                        offset_bytes,
                        size_bytes,
                    })
                    .map_err(backend_err)?;
            }
            AeroGpuCmd::UploadResource {
                resource_handle,
                offset_bytes,
                size_bytes,
                data,
            } => {
                let resource_size = backing_size(&table, resource_handle)?;
                check_range(resource_handle, offset_bytes, size_bytes, resource_size)?;
                backend
                    .execute(BackendCommand::Upload {
                        id: table.underlying(resource_handle)?,
                        offset_bytes,
                        data,
                    })
                    .map_err(backend_err)?;
            }
            AeroGpuCmd::CopyBuffer {
                dst_buffer,
                src_buffer,
                dst_offset_bytes,
                src_offset_bytes,
                size_bytes,
                flags,
            } => {
                let dst_size = table.buffer(dst_buffer)?.size_bytes;
                let src_size = table.buffer(src_buffer)?.size_bytes;
                check_range(dst_buffer, dst_offset_bytes, size_bytes, dst_size)?;
                check_range(src_buffer, src_offset_bytes, size_bytes, src_size)?;
                backend
                    .execute(BackendCommand::CopyBuffer {
                        dst: table.underlying(dst_buffer)?,
                        src: table.underlying(src_buffer)?,
                        dst_offset_bytes,
                        src_offset_bytes,
                        size_bytes,
                        writeback_dst: flags & AEROGPU_COPY_FLAG_WRITEBACK_DST != 0,
                    })
                    .map_err(backend_err)?;
            }
            AeroGpuCmd::CopyTexture2d {
                dst_texture,
                src_texture,
                dst_mip_level,
                dst_array_layer,
                src_mip_level,
                src_array_layer,
                dst_x,
                dst_y,
                src_x,
                src_y,
                width,
                height,
                flags,
            } => {
                let dst = *table.texture2d(dst_texture)?;
                let src = *table.texture2d(src_texture)?;
                if dst.format != src.format {
                    return Err(ResourceError::FormatMismatch {
                        dst: dst_texture,
                        src: src_texture,
                    }
                    .into());
                }
                check_subresource(&dst, dst_mip_level, dst_array_layer)?;
                check_subresource(&src, src_mip_level, src_array_layer)?;
                check_rect(dst_texture, &dst, dst_mip_level, dst_x, dst_y, width, height)?;
                check_rect(src_texture, &src, src_mip_level, src_x, src_y, width, height)?;
                let region = CopyTexture2dRegion {
                    dst: table.underlying(dst_texture)?,
                    src: table.underlying(src_texture)?,
                    dst_mip_level,
                    dst_array_layer,
                    src_mip_level,
                    src_array_layer,
                    dst_x,
                    dst_y,
                    src_x,
                    src_y,
                    width,
                    height,
                };
                backend
                    .execute(BackendCommand::CopyTexture2d {
                        region,
                        writeback_dst: flags & AEROGPU_COPY_FLAG_WRITEBACK_DST != 0,
                    })
                    .map_err(backend_err)?;
            }

            AeroGpuCmd::CreateShaderDxbc {
                shader_handle,
                stage,
                dxbc_bytes,
            } => {
                let stage = shader_stage(stage)?;
                if dxbc_bytes.is_empty() {
                    return Err(ResourceError::InvalidDescriptor {
                        handle: shader_handle,
                        reason: "empty DXBC blob",
                    }
                    .into());
                }
                let desc = ResourceDesc::Shader(ShaderDesc {
                    stage,
                    dxbc_size_bytes: dxbc_bytes.len(),
                });
                table.create(shader_handle, desc.clone())?;
                backend
                    .execute(BackendCommand::CreateResource {
                        id: shader_handle,
                        desc: &desc,
                    })
                    .map_err(backend_err)?;
            }
            AeroGpuCmd::DestroyShader { shader_handle } => {
                let destroyed = table.destroy_kind(shader_handle, "shader", |k| k == ResourceKind::Shader)?;
                pipeline.unbind_handle(shader_handle);
                if destroyed.freed {
                    backend
                        .execute(BackendCommand::DestroyResource {
                            id: destroyed.underlying,
                        })
                        .map_err(backend_err)?;
                }
            }
            AeroGpuCmd::BindShaders { vs, ps, cs } => {
                for (handle, expected) in [
                    (vs, AerogpuShaderStage::Vertex),
                    (ps, AerogpuShaderStage::Pixel),
                    (cs, AerogpuShaderStage::Compute),
                ] {
                    if handle != AEROGPU_HANDLE_NULL {
                        check_shader_stage(handle, table.shader(handle)?, expected)?;
                    }
                }
                pipeline.vs = vs;
                pipeline.ps = ps;
                pipeline.cs = cs;
            }
            AeroGpuCmd::SetShaderConstantsF {
                stage,
                start_register,
                vec4_count,
                data,
            } => {
                let stage = shader_stage(stage)?;
                let (start, end) =
                    register_range("constant register", start_register, vec4_count, MAX_SHADER_CONSTANT_REGISTERS)?;
                let registers = &mut pipeline.stage_mut(stage).constants[start..end];
                for (reg, value) in registers.iter_mut().zip(read_vec4s(data)) {
                    *reg = value;
                }
            }
            AeroGpuCmd::SetShaderConstantsI {
                stage,
                start_register,
                vec4_count,
                data,
            } => {
                let stage = shader_stage(stage)?;
                let (start, end) = register_range(
                    "int constant register",
                    start_register,
                    vec4_count,
                    MAX_SHADER_INT_CONSTANT_REGISTERS,
                )?;
                let registers = &mut pipeline.stage_mut(stage).int_constants[start..end];
                for (reg, value) in registers.iter_mut().zip(read_int4s(data)) {
                    *reg = value;
                }
            }
            AeroGpuCmd::SetShaderConstantsB {
                stage,
                start_register,
                bool_count,
                data,
            } => {
                let stage = shader_stage(stage)?;
                let (start, end) = register_range(
                    "bool constant register",
                    start_register,
                    bool_count,
                    MAX_SHADER_BOOL_CONSTANT_REGISTERS,
                )?;
                let registers = &mut pipeline.stage_mut(stage).bool_constants[start..end];
                for (reg, value) in registers.iter_mut().zip(read_bools(data)) {
                    *reg = value;
                }
            }
            AeroGpuCmd::CreateInputLayout {
                input_layout_handle,
                blob_bytes,
            } => {
                let blob = decode_input_layout_blob_le(blob_bytes)?;
                let input_slots = blob.input_slots();
                if let Some(&slot) = input_slots.last() {
                    check_slot("input slot", u64::from(slot) + 1, AEROGPU_MAX_VERTEX_BUFFER_SLOTS)?;
                }
                let desc = ResourceDesc::InputLayout(InputLayoutDesc {
                    elements: blob.elements,
                    input_slots,
                });
                table.create(input_layout_handle, desc.clone())?;
                backend
                    .execute(BackendCommand::CreateResource {
                        id: input_layout_handle,
                        desc: &desc,
                    })
                    .map_err(backend_err)?;
            }
            AeroGpuCmd::DestroyInputLayout { input_layout_handle } => {
                let destroyed = table.destroy_kind(input_layout_handle, "input layout", |k| {
                    k == ResourceKind::InputLayout
                })?;
                pipeline.unbind_handle(input_layout_handle);
                if destroyed.freed {
                    backend
                        .execute(BackendCommand::DestroyResource {
                            id: destroyed.underlying,
                        })
                        .map_err(backend_err)?;
                }
            }
            AeroGpuCmd::SetInputLayout { input_layout_handle } => {
                if input_layout_handle != AEROGPU_HANDLE_NULL {
                    table.input_layout(input_layout_handle)?;
                }
                pipeline.input_layout = input_layout_handle;
            }

            AeroGpuCmd::SetBlendState {
                enable,
                src_factor,
                dst_factor,
                blend_op,
                color_write_mask,
            } => {
                pipeline.blend = BlendState {
                    enable: enable != 0,
                    src_factor: enum_value("src blend factor", src_factor, AerogpuBlendFactor::from_u32)?,
                    dst_factor: enum_value("dst blend factor", dst_factor, AerogpuBlendFactor::from_u32)?,
                    blend_op: enum_value("blend op", blend_op, AerogpuBlendOp::from_u32)?,
                    color_write_mask,
                };
            }
            AeroGpuCmd::SetDepthStencilState {
                depth_enable,
                depth_write_enable,
                depth_func,
                stencil_enable,
                stencil_read_mask,
                stencil_write_mask,
            } => {
                pipeline.depth_stencil_state = DepthStencilState {
                    depth_enable: depth_enable != 0,
                    depth_write_enable: depth_write_enable != 0,
                    depth_func: enum_value("depth func", depth_func, AerogpuCompareFunc::from_u32)?,
                    stencil_enable: stencil_enable != 0,
                    stencil_read_mask,
                    stencil_write_mask,
                };
            }
            AeroGpuCmd::SetRasterizerState {
                fill_mode,
                cull_mode,
                front_ccw,
                scissor_enable,
                depth_bias,
            } => {
                pipeline.rasterizer = RasterizerState {
                    fill_mode: enum_value("fill mode", fill_mode, AerogpuFillMode::from_u32)?,
                    cull_mode: enum_value("cull mode", cull_mode, AerogpuCullMode::from_u32)?,
                    front_ccw: front_ccw != 0,
                    scissor_enable: scissor_enable != 0,
                    depth_bias,
                };
            }

            AeroGpuCmd::SetRenderTargets {
                color_count,
                depth_stencil,
                colors,
            } => {
                if color_count as usize > AEROGPU_MAX_RENDER_TARGETS {
                    return Err(StateError::TooManyRenderTargets {
                        count: color_count,
                        max: AEROGPU_MAX_RENDER_TARGETS as u32,
                    }
                    .into());
                }
                for &handle in colors[..color_count as usize].iter().filter(|&&h| h != AEROGPU_HANDLE_NULL) {
                    check_usage(handle, table.texture2d(handle)?.usage, ResourceUsage::RENDER_TARGET)?;
                }
                if depth_stencil != AEROGPU_HANDLE_NULL {
                    check_usage(
                        depth_stencil,
                        table.texture2d(depth_stencil)?.usage,
                        ResourceUsage::DEPTH_STENCIL,
                    )?;
                }
                pipeline.render_targets = colors;
                pipeline.color_count = color_count;
                pipeline.depth_stencil = depth_stencil;
            }
            AeroGpuCmd::SetViewport {
                x,
                y,
                width,
                height,
                min_depth,
                max_depth,
            } => {
                pipeline.viewport = Some(Viewport {
                    x,
                    y,
                    width,
                    height,
                    min_depth,
                    max_depth,
                });
            }
            AeroGpuCmd::SetScissor { x, y, width, height } => {
                pipeline.scissor = Some(ScissorRect { x, y, width, height });
            }

            AeroGpuCmd::SetVertexBuffers { start_slot, bindings } => {
                let end = u64::from(start_slot) + bindings.len() as u64;
                check_slot("vertex buffer slot", end, AEROGPU_MAX_VERTEX_BUFFER_SLOTS)?;
                for binding in &bindings {
                    let buffer = binding.buffer;
                    if buffer != AEROGPU_HANDLE_NULL {
                        table.buffer(buffer)?;
                    }
                }
                for (slot, binding) in pipeline.vertex_buffers[start_slot as usize..end as usize]
                    .iter_mut()
                    .zip(&bindings)
                {
                    let buffer = binding.buffer;
                    *slot = (buffer != AEROGPU_HANDLE_NULL).then(|| BoundVertexBuffer {
                        buffer,
                        stride_bytes: binding.stride_bytes,
                        offset_bytes: binding.offset_bytes,
                    });
                }
            }
            AeroGpuCmd::SetIndexBuffer {
                buffer,
                format,
                offset_bytes,
            } => {
                pipeline.index_buffer = if buffer == AEROGPU_HANDLE_NULL {
                    None
                } else {
                    let format = enum_value("index format", format, AerogpuIndexFormat::from_u32)?;
                    table.buffer(buffer)?;
                    Some(BoundIndexBuffer {
                        buffer,
                        format,
                        offset_bytes,
                    })
                };
            }
            AeroGpuCmd::SetPrimitiveTopology { topology } => {
                pipeline.topology = enum_value("primitive topology", topology, AerogpuPrimitiveTopology::from_u32)?;
            }
            AeroGpuCmd::SetTexture {
                shader_stage: stage,
                slot,
                texture,
            } => {
                let stage = shader_stage(stage)?;
                check_slot("texture slot", u64::from(slot) + 1, AEROGPU_MAX_TEXTURE_SLOTS)?;
                if texture != AEROGPU_HANDLE_NULL {
                    table.texture2d(texture)?;
                }
                pipeline.stage_mut(stage).textures[slot as usize] = texture;
            }
            AeroGpuCmd::SetSamplerState {
                shader_stage: stage,
                slot,
                state,
                value,
            } => {
                let stage = shader_stage(stage)?;
                check_slot("sampler slot", u64::from(slot) + 1, AEROGPU_MAX_TEXTURE_SLOTS)?;
                pipeline.stage_mut(stage).sampler_states.insert((slot, state), value);
            }
            AeroGpuCmd::SetRenderState { state, value } => {
                pipeline.render_states.insert(state, value);
            }

            AeroGpuCmd::Clear {
                flags,
                color_rgba,
                depth,
                stencil,
            } => {
                let mut bindings = ResolvedBindings::default();
                resolve_targets(&table, pipeline, &mut bindings)?;
                let has_color = bindings.color_targets().next().is_some();
                let has_depth_stencil = bindings.depth_stencil != AEROGPU_HANDLE_NULL;
                if flags & AEROGPU_CLEAR_COLOR != 0 && !has_color {
                    return Err(StateError::NoRenderTargetBound { aspect: "color" }.into());
                }
                if flags & AEROGPU_CLEAR_DEPTH != 0 && !has_depth_stencil {
                    return Err(StateError::NoRenderTargetBound { aspect: "depth" }.into());
                }
                if flags & AEROGPU_CLEAR_STENCIL != 0 && !has_depth_stencil {
                    return Err(StateError::NoRenderTargetBound { aspect: "stencil" }.into());
                }
                backend
                    .execute(BackendCommand::Clear {
                        flags,
                        color_rgba,
                        depth,
                        stencil,
                        state: pipeline,
                        bindings: &bindings,
                    })
                    .map_err(backend_err)?;
            }
            AeroGpuCmd::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                let bindings = resolve_draw_bindings(&table, pipeline, false)?;
                let args = DrawArgs::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                };
                backend
                    .execute(BackendCommand::Draw {
                        args,
                        state: pipeline,
                        bindings: &bindings,
                    })
                    .map_err(backend_err)?;
            }
            AeroGpuCmd::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => {
                let bindings = resolve_draw_bindings(&table, pipeline, true)?;
                let args = DrawArgs::Indexed {
                    index_count,
                    instance_count,
                    first_index,
                    base_vertex,
                    first_instance,
                };
                backend
                    .execute(BackendCommand::Draw {
                        args,
                        state: pipeline,
                        bindings: &bindings,
                    })
                    .map_err(backend_err)?;
            }
            AeroGpuCmd::Dispatch {
                group_count_x,
                group_count_y,
                group_count_z,
            } => {
                let bindings = resolve_dispatch_bindings(&table, pipeline)?;
                backend
                    .execute(BackendCommand::Dispatch {
                        group_count: [group_count_x, group_count_y, group_count_z],
                        state: pipeline,
                        bindings: &bindings,
                    })
                    .map_err(backend_err)?;
            }

            AeroGpuCmd::Present { scanout_id, flags } | AeroGpuCmd::PresentEx { scanout_id, flags, .. } => {
                let vsync = flags & AEROGPU_PRESENT_FLAG_VSYNC != 0;
                backend
                    .execute(BackendCommand::Present { scanout_id, vsync })
                    .map_err(backend_err)?;
                let present_count = self.pacer.record_present(signal_fence, scanout_id, vsync);
                debug!(scanout_id, vsync, present_count, "present");
                return Ok(Some(AeroGpuEvent::PresentCompleted {
                    scanout_id,
                    present_count,
                }));
            }
            AeroGpuCmd::ExportSharedSurface {
                resource_handle,
                share_token,
            } => {
                table.export_shared(resource_handle, share_token)?;
            }
            AeroGpuCmd::ImportSharedSurface {
                out_resource_handle,
                share_token,
            } => {
                table.import_shared(share_token, out_resource_handle)?;
            }
            AeroGpuCmd::ReleaseSharedSurface { share_token } => {
                if !table.release_shared(share_token) {
                    trace!(share_token, "release of unknown share token ignored");
                }
            }

            AeroGpuCmd::Flush => {
                backend.execute(BackendCommand::Flush).map_err(backend_err)?;
                self.state = ProcessorState::Idle;
                return Ok(Some(AeroGpuEvent::Flushed));
            }
        }
        Ok(None)
    }
}

/// A bound handle freed since it was bound, possibly by another device
/// sharing the table, reads as unbound.
fn bound<T>(found: Result<T, ResourceError>, missing: MissingBinding) -> Result<T, PacketError> {
    match found {
        Err(ResourceError::UnknownHandle { .. }) => Err(StateError::from(missing).into()),
        other => other.map_err(PacketError::from),
    }
}

fn resolve_shader(
    table: &ResourceTable,
    handle: u32,
    stage: AerogpuShaderStage,
    missing: MissingBinding,
) -> Result<u32, PacketError> {
    if handle == AEROGPU_HANDLE_NULL {
        return Err(StateError::from(missing).into());
    }
    check_shader_stage(handle, bound(table.shader(handle), missing)?, stage)?;
    Ok(table.underlying(handle)?)
}

fn resolve_texture(
    table: &ResourceTable,
    handle: u32,
    usage: ResourceUsage,
    missing: MissingBinding,
) -> Result<u32, PacketError> {
    check_usage(handle, bound(table.texture2d(handle), missing)?.usage, usage)?;
    Ok(table.underlying(handle)?)
}

fn resolve_targets(table: &ResourceTable, pipeline: &PipelineState, out: &mut ResolvedBindings) -> Result<(), PacketError> {
    let count = (pipeline.color_count as usize).min(AEROGPU_MAX_RENDER_TARGETS);
    for (slot, &handle) in out.render_targets.iter_mut().zip(&pipeline.render_targets[..count]) {
        if handle != AEROGPU_HANDLE_NULL {
            *slot = resolve_texture(table, handle, ResourceUsage::RENDER_TARGET, MissingBinding::RenderTarget)?;
        }
    }
    if pipeline.depth_stencil != AEROGPU_HANDLE_NULL {
        out.depth_stencil = resolve_texture(
            table,
            pipeline.depth_stencil,
            ResourceUsage::DEPTH_STENCIL,
            MissingBinding::DepthStencil,
        )?;
    }
    Ok(())
}

fn resolve_stage_textures(
    table: &ResourceTable,
    pipeline: &PipelineState,
    stage: AerogpuShaderStage,
    out: &mut ResolvedBindings,
) -> Result<(), PacketError> {
    let bound_textures = &pipeline.stage(stage).textures;
    for (slot, (resolved, &handle)) in out.textures[stage as usize].iter_mut().zip(bound_textures).enumerate() {
        if handle != AEROGPU_HANDLE_NULL {
            let missing = MissingBinding::Texture { slot: slot as u32 };
            *resolved = resolve_texture(table, handle, ResourceUsage::empty(), missing)?;
        }
    }
    Ok(())
}

/// Everything a draw reads must be bound and still alive: shaders and
/// layout first, then the vertex buffers the layout names, then the index
/// buffer, textures and targets.
fn resolve_draw_bindings(
    table: &ResourceTable,
    pipeline: &PipelineState,
    indexed: bool,
) -> Result<ResolvedBindings, PacketError> {
    let mut out = ResolvedBindings {
        vs: resolve_shader(table, pipeline.vs, AerogpuShaderStage::Vertex, MissingBinding::VertexShader)?,
        ..ResolvedBindings::default()
    };
    if pipeline.ps != AEROGPU_HANDLE_NULL {
        out.ps = resolve_shader(table, pipeline.ps, AerogpuShaderStage::Pixel, MissingBinding::PixelShader)?;
    }

    if pipeline.input_layout == AEROGPU_HANDLE_NULL {
        return Err(StateError::from(MissingBinding::InputLayout).into());
    }
    let layout = bound(table.input_layout(pipeline.input_layout), MissingBinding::InputLayout)?;
    out.input_layout = table.underlying(pipeline.input_layout)?;
    for &slot in &layout.input_slots {
        let missing = MissingBinding::VertexBuffer { slot };
        let vb = pipeline
            .vertex_buffers
            .get(slot as usize)
            .copied()
            .flatten()
            .ok_or(StateError::from(missing))?;
        bound(table.buffer(vb.buffer), missing)?;
        out.vertex_buffers[slot as usize] = Some(BoundVertexBuffer {
            buffer: table.underlying(vb.buffer)?,
            ..vb
        });
    }

    if indexed {
        let ib = pipeline
            .index_buffer
            .ok_or(StateError::from(MissingBinding::IndexBuffer))?;
        bound(table.buffer(ib.buffer), MissingBinding::IndexBuffer)?;
        out.index_buffer = Some(BoundIndexBuffer {
            buffer: table.underlying(ib.buffer)?,
            ..ib
        });
    }

    resolve_stage_textures(table, pipeline, AerogpuShaderStage::Vertex, &mut out)?;
    resolve_stage_textures(table, pipeline, AerogpuShaderStage::Pixel, &mut out)?;
    resolve_targets(table, pipeline, &mut out)?;
    if out.color_targets().next().is_none() && out.depth_stencil == AEROGPU_HANDLE_NULL {
        return Err(StateError::from(MissingBinding::RenderTarget).into());
    }
    Ok(out)
}

fn resolve_dispatch_bindings(table: &ResourceTable, pipeline: &PipelineState) -> Result<ResolvedBindings, PacketError> {
    let mut out = ResolvedBindings {
        cs: resolve_shader(table, pipeline.cs, AerogpuShaderStage::Compute, MissingBinding::ComputeShader)?,
        ..ResolvedBindings::default()
    };
    resolve_stage_textures(table, pipeline, AerogpuShaderStage::Compute, &mut out)?;
    Ok(out)
}

impl Default for AeroGpuCommandProcessor {
    fn default() -> Self {
        Self::new(
            ResourceTable::new_shared(crate::config::DEFAULT_MAX_HANDLES),
            FramePacer::default(),
        )
    }
}
