//! Host-side pipeline state mutated by bind packets and read by clears and
//! draws.
//!
//! Bindings hold the guest handle exactly as it was bound (original or
//! alias). Clears, draws and dispatches resolve them again at use into a
//! [`ResolvedBindings`], which is all the backend ever sees of them.

use std::collections::BTreeMap;

use aero_protocol::aerogpu::aerogpu_cmd::{
    AerogpuBlendFactor, AerogpuBlendOp, AerogpuCompareFunc, AerogpuCullMode, AerogpuFillMode, AerogpuIndexFormat,
    AerogpuPrimitiveTopology, AerogpuShaderStage, AEROGPU_HANDLE_NULL, AEROGPU_MAX_RENDER_TARGETS,
    AEROGPU_MAX_TEXTURE_SLOTS, AEROGPU_MAX_VERTEX_BUFFER_SLOTS,
};

/// Float4 constant registers per shader stage.
pub const MAX_SHADER_CONSTANT_REGISTERS: u32 = 256;
/// Int4 constant registers per shader stage (D3D9 `c`/`i` split).
pub const MAX_SHADER_INT_CONSTANT_REGISTERS: u32 = 16;
pub const MAX_SHADER_BOOL_CONSTANT_REGISTERS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundVertexBuffer {
    pub buffer: u32,
    pub stride_bytes: u32,
    pub offset_bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundIndexBuffer {
    pub buffer: u32,
    pub format: AerogpuIndexFormat,
    pub offset_bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub enable: bool,
    pub src_factor: AerogpuBlendFactor,
    pub dst_factor: AerogpuBlendFactor,
    pub blend_op: AerogpuBlendOp,
    pub color_write_mask: u8,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enable: false,
            src_factor: AerogpuBlendFactor::One,
            dst_factor: AerogpuBlendFactor::Zero,
            blend_op: AerogpuBlendOp::Add,
            color_write_mask: 0xF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    pub depth_enable: bool,
    pub depth_write_enable: bool,
    pub depth_func: AerogpuCompareFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_enable: true,
            depth_write_enable: true,
            depth_func: AerogpuCompareFunc::Less,
            stencil_enable: false,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterizerState {
    pub fill_mode: AerogpuFillMode,
    pub cull_mode: AerogpuCullMode,
    pub front_ccw: bool,
    pub scissor_enable: bool,
    pub depth_bias: i32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            fill_mode: AerogpuFillMode::Solid,
            cull_mode: AerogpuCullMode::Back,
            front_ccw: false,
            scissor_enable: false,
            depth_bias: 0,
        }
    }
}

/// Per-stage texture, sampler and constant bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct StageBindings {
    pub textures: [u32; AEROGPU_MAX_TEXTURE_SLOTS as usize],
    /// `(slot, state) -> value`, as forwarded by the D3D9 runtime.
    pub sampler_states: BTreeMap<(u32, u32), u32>,
    pub constants: Vec<[f32; 4]>,
    pub int_constants: [[i32; 4]; MAX_SHADER_INT_CONSTANT_REGISTERS as usize],
    pub bool_constants: [bool; MAX_SHADER_BOOL_CONSTANT_REGISTERS as usize],
}

impl Default for StageBindings {
    fn default() -> Self {
        Self {
            textures: [AEROGPU_HANDLE_NULL; AEROGPU_MAX_TEXTURE_SLOTS as usize],
            sampler_states: BTreeMap::new(),
            constants: vec![[0.0; 4]; MAX_SHADER_CONSTANT_REGISTERS as usize],
            int_constants: [[0; 4]; MAX_SHADER_INT_CONSTANT_REGISTERS as usize],
            bool_constants: [false; MAX_SHADER_BOOL_CONSTANT_REGISTERS as usize],
        }
    }
}

/// The bindings one clear, draw or dispatch reads, with every handle replaced
/// by its underlying object id. Slots the operation does not read are null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolvedBindings {
    pub render_targets: [u32; AEROGPU_MAX_RENDER_TARGETS],
    pub depth_stencil: u32,
    pub vertex_buffers: [Option<BoundVertexBuffer>; AEROGPU_MAX_VERTEX_BUFFER_SLOTS as usize],
    pub index_buffer: Option<BoundIndexBuffer>,
    pub input_layout: u32,
    pub vs: u32,
    pub ps: u32,
    pub cs: u32,
    /// Indexed by `AerogpuShaderStage`.
    pub textures: [[u32; AEROGPU_MAX_TEXTURE_SLOTS as usize]; 3],
}

impl ResolvedBindings {
    pub fn color_targets(&self) -> impl Iterator<Item = u32> + '_ {
        self.render_targets.iter().copied().filter(|&h| h != AEROGPU_HANDLE_NULL)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pub render_targets: [u32; AEROGPU_MAX_RENDER_TARGETS],
    pub color_count: u32,
    pub depth_stencil: u32,
    pub viewport: Option<Viewport>,
    pub scissor: Option<ScissorRect>,

    pub vertex_buffers: [Option<BoundVertexBuffer>; AEROGPU_MAX_VERTEX_BUFFER_SLOTS as usize],
    pub index_buffer: Option<BoundIndexBuffer>,
    pub topology: AerogpuPrimitiveTopology,
    pub input_layout: u32,

    pub vs: u32,
    pub ps: u32,
    pub cs: u32,

    pub blend: BlendState,
    pub depth_stencil_state: DepthStencilState,
    pub rasterizer: RasterizerState,

    stages: [StageBindings; 3],
    pub render_states: BTreeMap<u32, u32>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            render_targets: [AEROGPU_HANDLE_NULL; AEROGPU_MAX_RENDER_TARGETS],
            color_count: 0,
            depth_stencil: AEROGPU_HANDLE_NULL,
            viewport: None,
            scissor: None,
            vertex_buffers: [None; AEROGPU_MAX_VERTEX_BUFFER_SLOTS as usize],
            index_buffer: None,
            topology: AerogpuPrimitiveTopology::TriangleList,
            input_layout: AEROGPU_HANDLE_NULL,
            vs: AEROGPU_HANDLE_NULL,
            ps: AEROGPU_HANDLE_NULL,
            cs: AEROGPU_HANDLE_NULL,
            blend: BlendState::default(),
            depth_stencil_state: DepthStencilState::default(),
            rasterizer: RasterizerState::default(),
            stages: Default::default(),
            render_states: BTreeMap::new(),
        }
    }
}

impl PipelineState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn stage(&self, stage: AerogpuShaderStage) -> &StageBindings {
        &self.stages[stage as usize]
    }

    pub fn stage_mut(&mut self, stage: AerogpuShaderStage) -> &mut StageBindings {
        &mut self.stages[stage as usize]
    }

    /// Bound color targets, in slot order, skipping null slots.
    pub fn color_targets(&self) -> impl Iterator<Item = u32> + '_ {
        self.render_targets[..(self.color_count as usize).min(AEROGPU_MAX_RENDER_TARGETS)]
            .iter()
            .copied()
            .filter(|&h| h != AEROGPU_HANDLE_NULL)
    }

    pub fn has_color_target(&self) -> bool {
        self.color_targets().next().is_some()
    }

    pub fn has_depth_stencil(&self) -> bool {
        self.depth_stencil != AEROGPU_HANDLE_NULL
    }

    /// Drop every binding that refers to `handle`. Returns whether any did.
    pub fn unbind_handle(&mut self, handle: u32) -> bool {
        if handle == AEROGPU_HANDLE_NULL {
            return false;
        }
        let mut hit = false;
        let mut clear = |slot: &mut u32| {
            if *slot == handle {
                *slot = AEROGPU_HANDLE_NULL;
                hit = true;
            }
        };

        self.render_targets.iter_mut().for_each(&mut clear);
        clear(&mut self.depth_stencil);
        clear(&mut self.input_layout);
        clear(&mut self.vs);
        clear(&mut self.ps);
        clear(&mut self.cs);
        for stage in &mut self.stages {
            stage.textures.iter_mut().for_each(&mut clear);
        }

        for slot in &mut self.vertex_buffers {
            if slot.is_some_and(|vb| vb.buffer == handle) {
                *slot = None;
                hit = true;
            }
        }
        if self.index_buffer.is_some_and(|ib| ib.buffer == handle) {
            self.index_buffer = None;
            hit = true;
        }
        hit
    }
}
