//! Offline inspection of AeroGPU command streams.
//!
//! [`list_cmd_stream`] produces a stable per-packet listing (offset, opcode,
//! size and decoded fields) that renders as text or JSON.
//! [`replay_cmd_stream`] runs a stream through a device with the null
//! backend, which exercises every validation rule without a host GPU.

use std::fmt::Write as _;

use aero_gpu::protocol::{decode_cmd, AeroGpuCmd};
use aero_gpu::{
    AeroGpuConfig, AeroGpuDevice, AeroGpuEvent, AeroGpuSubmission, CommandProcessorError, NullAeroGpuBackend,
    PresentStats, SubmissionOutcome,
};
use aero_protocol::aerogpu::aerogpu_cmd::{AerogpuCmdDecodeError, AerogpuCmdStream, AerogpuShaderStage};
use aero_protocol::aerogpu::aerogpu_pci::AerogpuFormat;
use serde::Serialize;
use tracing::debug;

/// Bytes of trailing data shown in `*_prefix` fields.
const DATA_PREFIX_BYTES: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CmdDumpError {
    #[error("invalid command stream header: {0}")]
    Header(#[source] AerogpuCmdDecodeError),
    #[error("packet at offset 0x{offset:08X} failed to decode: {source}")]
    Packet {
        offset: usize,
        #[source]
        source: AerogpuCmdDecodeError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketListing {
    pub offset: usize,
    pub opcode: String,
    pub opcode_id: u32,
    pub size_bytes: u32,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodeFailure {
    pub offset: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamListing {
    pub magic: u32,
    pub abi_major: u16,
    pub abi_minor: u16,
    pub size_bytes: u32,
    pub flags: u32,
    pub packets: Vec<PacketListing>,
    /// Framing error that ended the listing early.
    pub error: Option<DecodeFailure>,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn stage_name(stage: u32) -> String {
    AerogpuShaderStage::from_u32(stage).map_or_else(|| format!("Invalid({stage})"), |s| format!("{s:?}"))
}

fn format_name(format: u32) -> String {
    AerogpuFormat::from_u32(format).map_or_else(|| format!("Invalid({format})"), |f| format!("{f:?}"))
}

struct Fields(Vec<Field>);

impl Fields {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn add(&mut self, name: &'static str, value: impl ToString) -> &mut Self {
        self.0.push(Field {
            name,
            value: value.to_string(),
        });
        self
    }

    fn flags(&mut self, name: &'static str, value: u32) -> &mut Self {
        self.add(name, format!("0x{value:08X}"))
    }

    fn data(&mut self, len_name: &'static str, prefix_name: &'static str, data: &[u8]) -> &mut Self {
        self.add(len_name, data.len());
        self.add(prefix_name, hex(&data[..data.len().min(DATA_PREFIX_BYTES)]))
    }
}

/// Key/value view of one decoded command.
pub fn cmd_fields(cmd: &AeroGpuCmd<'_>) -> Vec<Field> {
    let mut f = Fields::new();
    match cmd {
        AeroGpuCmd::Nop | AeroGpuCmd::Flush => {}
        AeroGpuCmd::DebugMarker { bytes } => {
            f.add("marker", String::from_utf8_lossy(bytes));
        }
        AeroGpuCmd::CreateBuffer {
            buffer_handle,
            usage_flags,
            size_bytes,
            backing_alloc_id,
            backing_offset_bytes,
        } => {
            f.add("buffer_handle", buffer_handle)
                .flags("usage_flags", *usage_flags)
                .add("buffer_size_bytes", size_bytes)
                .add("backing_alloc_id", backing_alloc_id)
                .add("backing_offset_bytes", backing_offset_bytes);
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
            f.add("texture_handle", texture_handle)
                .flags("usage_flags", *usage_flags)
                .add("format", format)
                .add("format_name", format_name(*format))
                .add("width", width)
                .add("height", height)
                .add("mip_levels", mip_levels)
                .add("array_layers", array_layers)
                .add("row_pitch_bytes", row_pitch_bytes)
                .add("backing_alloc_id", backing_alloc_id)
                .add("backing_offset_bytes", backing_offset_bytes);
        }
        AeroGpuCmd::DestroyResource { resource_handle } => {
            f.add("resource_handle", resource_handle);
        }
        AeroGpuCmd::ResourceDirtyRange {
            resource_handle,
            offset_bytes,
            size_bytes,
        } => {
            f.add("resource_handle", resource_handle)
                .add("offset_bytes", offset_bytes)
                .add("range_size_bytes", size_bytes);
        }
        AeroGpuCmd::UploadResource {
            resource_handle,
            offset_bytes,
            data,
            ..
        } => {
            f.add("resource_handle", resource_handle)
                .add("offset_bytes", offset_bytes)
                .data("data_len", "data_prefix", data);
        }
        AeroGpuCmd::CopyBuffer {
            dst_buffer,
            src_buffer,
            dst_offset_bytes,
            src_offset_bytes,
            size_bytes,
            flags,
        } => {
            f.add("dst_buffer", dst_buffer)
                .add("src_buffer", src_buffer)
                .add("dst_offset_bytes", dst_offset_bytes)
                .add("src_offset_bytes", src_offset_bytes)
                .add("copy_size_bytes", size_bytes)
                .flags("flags", *flags);
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
            f.add("dst_texture", dst_texture)
                .add("src_texture", src_texture)
                .add("dst_mip_level", dst_mip_level)
                .add("dst_array_layer", dst_array_layer)
                .add("src_mip_level", src_mip_level)
                .add("src_array_layer", src_array_layer)
                .add("dst_x", dst_x)
                .add("dst_y", dst_y)
                .add("src_x", src_x)
                .add("src_y", src_y)
                .add("width", width)
                .add("height", height)
                .flags("flags", *flags);
        }
        AeroGpuCmd::CreateShaderDxbc {
            shader_handle,
            stage,
            dxbc_bytes,
        } => {
            f.add("shader_handle", shader_handle)
                .add("stage", stage)
                .add("stage_name", stage_name(*stage))
                .data("dxbc_len", "dxbc_prefix", dxbc_bytes);
        }
        AeroGpuCmd::DestroyShader { shader_handle } => {
            f.add("shader_handle", shader_handle);
        }
        AeroGpuCmd::BindShaders { vs, ps, cs } => {
            f.add("vs", vs).add("ps", ps).add("cs", cs);
        }
        AeroGpuCmd::SetShaderConstantsF {
            stage,
            start_register,
            vec4_count,
            data,
        }
        | AeroGpuCmd::SetShaderConstantsI {
            stage,
            start_register,
            vec4_count,
            data,
        } => {
            f.add("stage", stage)
                .add("stage_name", stage_name(*stage))
                .add("start_register", start_register)
                .add("vec4_count", vec4_count)
                .data("data_len", "data_prefix", data);
        }
        AeroGpuCmd::SetShaderConstantsB {
            stage,
            start_register,
            bool_count,
            data,
        } => {
            f.add("stage", stage)
                .add("stage_name", stage_name(*stage))
                .add("start_register", start_register)
                .add("bool_count", bool_count)
                .data("data_len", "data_prefix", data);
        }
        AeroGpuCmd::CreateInputLayout {
            input_layout_handle,
            blob_bytes,
        } => {
            f.add("input_layout_handle", input_layout_handle)
                .data("blob_len", "blob_prefix", blob_bytes);
        }
        AeroGpuCmd::DestroyInputLayout { input_layout_handle } | AeroGpuCmd::SetInputLayout { input_layout_handle } => {
            f.add("input_layout_handle", input_layout_handle);
        }
        AeroGpuCmd::SetBlendState {
            enable,
            src_factor,
            dst_factor,
            blend_op,
            color_write_mask,
        } => {
            f.add("enable", enable)
                .add("src_factor", src_factor)
                .add("dst_factor", dst_factor)
                .add("blend_op", blend_op)
                .add("color_write_mask", format!("0x{color_write_mask:X}"));
        }
        AeroGpuCmd::SetDepthStencilState {
            depth_enable,
            depth_write_enable,
            depth_func,
            stencil_enable,
            stencil_read_mask,
            stencil_write_mask,
        } => {
            f.add("depth_enable", depth_enable)
                .add("depth_write_enable", depth_write_enable)
                .add("depth_func", depth_func)
                .add("stencil_enable", stencil_enable)
                .add("stencil_read_mask", format!("0x{stencil_read_mask:02X}"))
                .add("stencil_write_mask", format!("0x{stencil_write_mask:02X}"));
        }
        AeroGpuCmd::SetRasterizerState {
            fill_mode,
            cull_mode,
            front_ccw,
            scissor_enable,
            depth_bias,
        } => {
            f.add("fill_mode", fill_mode)
                .add("cull_mode", cull_mode)
                .add("front_ccw", front_ccw)
                .add("scissor_enable", scissor_enable)
                .add("depth_bias", depth_bias);
        }
        AeroGpuCmd::SetRenderTargets {
            color_count,
            depth_stencil,
            colors,
        } => {
            f.add("color_count", color_count).add("depth_stencil", depth_stencil);
            let shown = (*color_count as usize).min(colors.len());
            let colors: Vec<String> = colors[..shown].iter().map(u32::to_string).collect();
            f.add("colors", colors.join(","));
        }
        AeroGpuCmd::SetViewport {
            x,
            y,
            width,
            height,
            min_depth,
            max_depth,
        } => {
            f.add("x", x)
                .add("y", y)
                .add("width", width)
                .add("height", height)
                .add("min_depth", min_depth)
                .add("max_depth", max_depth);
        }
        AeroGpuCmd::SetScissor { x, y, width, height } => {
            f.add("x", x).add("y", y).add("width", width).add("height", height);
        }
        AeroGpuCmd::SetVertexBuffers { start_slot, bindings } => {
            f.add("start_slot", start_slot).add("buffer_count", bindings.len());
            for (i, binding) in bindings.iter().enumerate() {
                let (buffer, stride, offset) = (binding.buffer, binding.stride_bytes, binding.offset_bytes);
                f.add("binding", format!("{i}:buffer={buffer},stride={stride},offset={offset}"));
            }
        }
        AeroGpuCmd::SetIndexBuffer {
            buffer,
            format,
            offset_bytes,
        } => {
            f.add("buffer", buffer)
                .add("format", format)
                .add("offset_bytes", offset_bytes);
        }
        AeroGpuCmd::SetPrimitiveTopology { topology } => {
            f.add("topology", topology);
        }
        AeroGpuCmd::SetTexture {
            shader_stage,
            slot,
            texture,
        } => {
            f.add("shader_stage", shader_stage)
                .add("shader_stage_name", stage_name(*shader_stage))
                .add("slot", slot)
                .add("texture", texture);
        }
        AeroGpuCmd::SetSamplerState {
            shader_stage,
            slot,
            state,
            value,
        } => {
            f.add("shader_stage", shader_stage)
                .add("shader_stage_name", stage_name(*shader_stage))
                .add("slot", slot)
                .add("state", state)
                .add("value", value);
        }
        AeroGpuCmd::SetRenderState { state, value } => {
            f.add("state", state).add("value", value);
        }
        AeroGpuCmd::Clear {
            flags,
            color_rgba,
            depth,
            stencil,
        } => {
            let [r, g, b, a] = color_rgba;
            f.flags("flags", *flags)
                .add("color_rgba", format!("{r},{g},{b},{a}"))
                .add("depth", depth)
                .add("stencil", stencil);
        }
        AeroGpuCmd::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        } => {
            f.add("vertex_count", vertex_count)
                .add("instance_count", instance_count)
                .add("first_vertex", first_vertex)
                .add("first_instance", first_instance);
        }
        AeroGpuCmd::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        } => {
            f.add("index_count", index_count)
                .add("instance_count", instance_count)
                .add("first_index", first_index)
                .add("base_vertex", base_vertex)
                .add("first_instance", first_instance);
        }
        AeroGpuCmd::Dispatch {
            group_count_x,
            group_count_y,
            group_count_z,
        } => {
            f.add("group_count_x", group_count_x)
                .add("group_count_y", group_count_y)
                .add("group_count_z", group_count_z);
        }
        AeroGpuCmd::Present { scanout_id, flags } => {
            f.add("scanout_id", scanout_id).flags("flags", *flags);
        }
        AeroGpuCmd::PresentEx {
            scanout_id,
            flags,
            d3d9_present_flags,
        } => {
            f.add("scanout_id", scanout_id)
                .flags("flags", *flags)
                .flags("d3d9_present_flags", *d3d9_present_flags);
        }
        AeroGpuCmd::ExportSharedSurface {
            resource_handle,
            share_token,
        } => {
            f.add("resource_handle", resource_handle)
                .add("share_token", format!("0x{share_token:016X}"));
        }
        AeroGpuCmd::ImportSharedSurface {
            out_resource_handle,
            share_token,
        } => {
            f.add("out_resource_handle", out_resource_handle)
                .add("share_token", format!("0x{share_token:016X}"));
        }
        AeroGpuCmd::ReleaseSharedSurface { share_token } => {
            f.add("share_token", format!("0x{share_token:016X}"));
        }
    }
    f.0
}

/// Decode every packet of `bytes`.
///
/// Packets whose framing is intact but whose contents do not decode (an
/// unknown opcode, a short payload) are listed with a `decode_error` field
/// and the listing continues, unless `strict` is set. A framing error ends
/// the listing and is reported in [`StreamListing::error`].
pub fn list_cmd_stream(bytes: &[u8], strict: bool) -> Result<StreamListing, CmdDumpError> {
    let stream = AerogpuCmdStream::open(bytes).map_err(CmdDumpError::Header)?;
    let header = *stream.header();
    let abi_version = header.abi_version;

    let mut listing = StreamListing {
        magic: header.magic,
        abi_major: (abi_version >> 16) as u16,
        abi_minor: (abi_version & 0xFFFF) as u16,
        size_bytes: header.size_bytes,
        flags: header.flags,
        packets: Vec::new(),
        error: None,
    };

    let mut packets = stream.packets();
    loop {
        let offset = packets.offset();
        let packet = match packets.next() {
            None => break,
            Some(Ok(packet)) => packet,
            Some(Err(source)) if strict => return Err(CmdDumpError::Packet { offset, source }),
            Some(Err(err)) => {
                listing.error = Some(DecodeFailure {
                    offset,
                    message: err.to_string(),
                });
                break;
            }
        };

        let opcode_id = packet.hdr.opcode;
        let size_bytes = packet.hdr.size_bytes;
        let (opcode, fields) = match decode_cmd(&packet) {
            Ok(cmd) => (format!("{:?}", cmd.opcode()), cmd_fields(&cmd)),
            Err(source) if strict => return Err(CmdDumpError::Packet { offset, source }),
            Err(err) => {
                let name = packet.opcode.map_or_else(|| "Unknown".to_owned(), |op| format!("{op:?}"));
                let mut f = Fields::new();
                f.flags("opcode_id", opcode_id).add("decode_error", err);
                (name, f.0)
            }
        };
        listing.packets.push(PacketListing {
            offset,
            opcode,
            opcode_id,
            size_bytes,
            fields,
        });
    }
    Ok(listing)
}

pub fn render_listing(listing: &StreamListing) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "header magic=0x{:08X} abi={}.{} size_bytes={} flags=0x{:08X}",
        listing.magic, listing.abi_major, listing.abi_minor, listing.size_bytes, listing.flags
    );
    for packet in &listing.packets {
        let _ = write!(
            out,
            "0x{:08X} {} size_bytes={}",
            packet.offset, packet.opcode, packet.size_bytes
        );
        for field in &packet.fields {
            let _ = write!(out, " {}={}", field.name, field.value);
        }
        out.push('\n');
    }
    if let Some(err) = &listing.error {
        let _ = writeln!(out, "0x{:08X} error: {}", err.offset, err.message);
    }
    out
}

/// Text listing of `bytes`; see [`list_cmd_stream`].
pub fn decode_cmd_stream_listing(bytes: &[u8], strict: bool) -> Result<String, CmdDumpError> {
    list_cmd_stream(bytes, strict).map(|listing| render_listing(&listing))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    pub signal_fence: u64,
    pub outcome: SubmissionOutcome,
    /// Offset of the packet that aborted the stream.
    pub error_offset: Option<usize>,
    pub events: Vec<AeroGpuEvent>,
    pub completed_fence: u64,
    pub present_stats: PresentStats,
}

/// Submit `bytes` once to a fresh device backed by [`NullAeroGpuBackend`].
pub fn replay_cmd_stream(bytes: &[u8], config: AeroGpuConfig, signal_fence: u64) -> ReplayReport {
    let mut device = AeroGpuDevice::new(config, NullAeroGpuBackend::new());
    let result = device.submit(AeroGpuSubmission {
        context_id: 0,
        engine_id: 0,
        flags: 0,
        signal_fence,
        cmd_stream: bytes,
    });

    let (outcome, error_offset, events) = match result {
        Ok(report) => (
            SubmissionOutcome::Completed {
                packets_processed: report.packets_processed,
            },
            None,
            report.events,
        ),
        Err(CommandProcessorError::Sync(_)) => (SubmissionOutcome::Throttled, None, Vec::new()),
        Err(err) => (
            SubmissionOutcome::Failed {
                kind: err.kind(),
                error: err.to_string(),
            },
            err.offset(),
            Vec::new(),
        ),
    };
    debug!(signal_fence, ?outcome, "replay finished");

    ReplayReport {
        signal_fence,
        outcome,
        error_offset,
        events,
        completed_fence: device.completed_fence(),
        present_stats: device.present_stats(),
    }
}

pub fn render_replay(report: &ReplayReport) -> String {
    let mut out = String::new();
    for event in &report.events {
        let _ = match event {
            AeroGpuEvent::FenceSignaled { fence } => writeln!(out, "fence signaled: {fence}"),
            AeroGpuEvent::PresentCompleted {
                scanout_id,
                present_count,
            } => writeln!(out, "present: scanout={scanout_id} count={present_count}"),
            AeroGpuEvent::Flushed => writeln!(out, "flush"),
            AeroGpuEvent::DebugMarker { text } => writeln!(out, "marker: {text}"),
        };
    }
    let _ = match &report.outcome {
        SubmissionOutcome::Completed { packets_processed } => {
            writeln!(out, "completed: {packets_processed} packets")
        }
        SubmissionOutcome::Failed { kind, error } => match report.error_offset {
            Some(offset) => writeln!(out, "failed ({kind:?}) at 0x{offset:08X}: {error}"),
            None => writeln!(out, "failed ({kind:?}): {error}"),
        },
        SubmissionOutcome::Throttled => writeln!(out, "throttled"),
        SubmissionOutcome::Dropped => writeln!(out, "dropped"),
    };
    let _ = writeln!(
        out,
        "completed_fence={} present_count={}",
        report.completed_fence, report.present_stats.present_count
    );
    out
}
