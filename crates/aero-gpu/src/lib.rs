//! `aero-gpu` is the host side of the AeroGPU command stream.
//!
//! Currently this crate provides:
//! - A typed decoder over the wire packets (see [`protocol`]).
//! - The guest handle table, including cross-process shared surfaces (see
//!   [`ResourceTable`]).
//! - The command processor that validates packets against pipeline state and
//!   forwards them to an [`AeroGpuBackend`].
//! - Fence tracking, frame pacing and present statistics, tied together by
//!   [`AeroGpuDevice`].

mod error;
mod fence;
mod frame_pacing;
mod pipeline_state;

pub mod backend;
pub mod command_processor;
pub mod config;
pub mod device;
pub mod protocol;
pub mod resource_table;

pub use backend::{
    AeroGpuBackend, AeroGpuBackendCompletion, AeroGpuBackendSubmission, BackendCommand, ImmediateAeroGpuBackend,
    NullAeroGpuBackend, RecordedCommand, RecordingAeroGpuBackend,
};
pub use command_processor::{AeroGpuCommandProcessor, AeroGpuEvent, ExecutionReport, ProcessorState};
pub use config::{AeroGpuConfig, ConfigError, FenceCompletionMode};
pub use device::{
    guest_status, AeroGpuDevice, AeroGpuSubmission, DisplayMode, GuestStatus, SubmissionOutcome, SubmissionRecord,
};
pub use error::{
    CommandProcessorError, ErrorKind, MissingBinding, PacketError, ResourceError, StateError, SyncError,
};
pub use fence::FenceTracker;
pub use frame_pacing::{
    clamp_frame_latency, scan_presents, FramePacer, PresentScan, PresentStats, DEFAULT_FRAME_LATENCY,
    MAX_FRAME_LATENCY, MIN_FRAME_LATENCY,
};
pub use pipeline_state::{
    BlendState, BoundIndexBuffer, BoundVertexBuffer, DepthStencilState, PipelineState, RasterizerState,
    ResolvedBindings, ScissorRect, StageBindings, Viewport, MAX_SHADER_BOOL_CONSTANT_REGISTERS,
    MAX_SHADER_CONSTANT_REGISTERS, MAX_SHADER_INT_CONSTANT_REGISTERS,
};
pub use resource_table::{ResourceDesc, ResourceKind, ResourceTable, ResourceUsage, SharedResourceTable};

#[cfg(test)]
mod tests;
