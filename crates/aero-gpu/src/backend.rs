use std::collections::VecDeque;

use crate::pipeline_state::{PipelineState, ResolvedBindings};
use crate::resource_table::{ResourceDesc, ResourceKind};

/// End-of-submission notice handed to the backend once every packet of a
/// stream has been applied (or the stream aborted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeroGpuBackendSubmission {
    pub flags: u32,
    pub context_id: u32,
    pub engine_id: u32,
    pub signal_fence: u64,
    /// Set when the processor aborted the stream.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeroGpuBackendCompletion {
    pub fence: u64,
    /// If set, the submission failed on the host.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyTexture2dRegion {
    pub dst: u32,
    pub src: u32,
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawArgs {
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    Indexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
}

/// One validated host action. Resource ids are underlying object ids, never
/// alias handles.
///
/// `state` on clears and draws carries the fixed-function state only; its
/// handle fields are guest handles. Bound objects come from `bindings`.
#[derive(Debug, Clone, Copy)]
pub enum BackendCommand<'a> {
    CreateResource {
        id: u32,
        desc: &'a ResourceDesc,
    },
    DestroyResource {
        id: u32,
    },
    Upload {
        id: u32,
        offset_bytes: u64,
        data: &'a [u8],
    },
    /// Guest backing changed; re-read it before next use.
    DirtyRange {
        id: u32,
        offset_bytes: u64,
        size_bytes: u64,
    },
    CopyBuffer {
        dst: u32,
        src: u32,
        dst_offset_bytes: u64,
        src_offset_bytes: u64,
        size_bytes: u64,
        writeback_dst: bool,
    },
    CopyTexture2d {
        region: CopyTexture2dRegion,
        writeback_dst: bool,
    },
    Clear {
        flags: u32,
        color_rgba: [f32; 4],
        depth: f32,
        stencil: u32,
        state: &'a PipelineState,
        bindings: &'a ResolvedBindings,
    },
    Draw {
        args: DrawArgs,
        state: &'a PipelineState,
        bindings: &'a ResolvedBindings,
    },
    Dispatch {
        group_count: [u32; 3],
        state: &'a PipelineState,
        bindings: &'a ResolvedBindings,
    },
    Present {
        scanout_id: u32,
        vsync: bool,
    },
    Flush,
}

/// Boundary between command processing and host GPU execution.
///
/// Implementations may execute immediately or queue work and later report
/// fence completions through [`AeroGpuBackend::poll_completions`].
pub trait AeroGpuBackend {
    /// Drop all backend objects and pending completions.
    fn reset(&mut self);

    fn execute(&mut self, cmd: BackendCommand<'_>) -> Result<(), String>;

    /// Called once per submission after its packets were handled.
    ///
    /// Backends that report completions must eventually report
    /// `submission.signal_fence`, failed submissions included, so guest
    /// fences keep moving.
    fn submit(&mut self, submission: AeroGpuBackendSubmission) -> Result<(), String>;

    /// Drain completions reported since the last poll.
    fn poll_completions(&mut self) -> Vec<AeroGpuBackendCompletion>;
}

/// Accepts everything, renders nothing, never reports completions.
#[derive(Debug, Default)]
pub struct NullAeroGpuBackend;

impl NullAeroGpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AeroGpuBackend for NullAeroGpuBackend {
    fn reset(&mut self) {}

    fn execute(&mut self, _cmd: BackendCommand<'_>) -> Result<(), String> {
        Ok(())
    }

    fn submit(&mut self, _submission: AeroGpuBackendSubmission) -> Result<(), String> {
        Ok(())
    }

    fn poll_completions(&mut self) -> Vec<AeroGpuBackendCompletion> {
        Vec::new()
    }
}

/// Completes every submission as soon as it is submitted.
#[derive(Debug, Default)]
pub struct ImmediateAeroGpuBackend {
    completed: VecDeque<AeroGpuBackendCompletion>,
}

impl ImmediateAeroGpuBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AeroGpuBackend for ImmediateAeroGpuBackend {
    fn reset(&mut self) {
        self.completed.clear();
    }

    fn execute(&mut self, _cmd: BackendCommand<'_>) -> Result<(), String> {
        Ok(())
    }

    fn submit(&mut self, submission: AeroGpuBackendSubmission) -> Result<(), String> {
        self.completed.push_back(AeroGpuBackendCompletion {
            fence: submission.signal_fence,
            error: submission.error,
        });
        Ok(())
    }

    fn poll_completions(&mut self) -> Vec<AeroGpuBackendCompletion> {
        self.completed.drain(..).collect()
    }
}

/// Owned summary of a [`BackendCommand`], as kept by [`RecordingAeroGpuBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Create { id: u32, kind: ResourceKind },
    Destroy { id: u32 },
    Upload { id: u32, offset_bytes: u64, len: usize },
    DirtyRange { id: u32, offset_bytes: u64, size_bytes: u64 },
    CopyBuffer { dst: u32, src: u32, size_bytes: u64 },
    CopyTexture2d { dst: u32, src: u32 },
    Clear { flags: u32, color_rgba: [f32; 4] },
    Draw(DrawArgs),
    Dispatch { group_count: [u32; 3] },
    Present { scanout_id: u32, vsync: bool },
    Flush,
}

impl From<&BackendCommand<'_>> for RecordedCommand {
    fn from(cmd: &BackendCommand<'_>) -> Self {
        match *cmd {
            BackendCommand::CreateResource { id, desc } => Self::Create { id, kind: desc.kind() },
            BackendCommand::DestroyResource { id } => Self::Destroy { id },
            BackendCommand::Upload { id, offset_bytes, data } => Self::Upload {
                id,
                offset_bytes,
                len: data.len(),
            },
            BackendCommand::DirtyRange {
                id,
                offset_bytes,
                size_bytes,
            } => Self::DirtyRange {
                id,
                offset_bytes,
                size_bytes,
            },
            BackendCommand::CopyBuffer {
                dst, src, size_bytes, ..
            } => Self::CopyBuffer { dst, src, size_bytes },
            BackendCommand::CopyTexture2d { region, .. } => Self::CopyTexture2d {
                dst: region.dst,
                src: region.src,
            },
            BackendCommand::Clear { flags, color_rgba, .. } => Self::Clear { flags, color_rgba },
            BackendCommand::Draw { args, .. } => Self::Draw(args),
            BackendCommand::Dispatch { group_count, .. } => Self::Dispatch { group_count },
            BackendCommand::Present { scanout_id, vsync } => Self::Present { scanout_id, vsync },
            BackendCommand::Flush => Self::Flush,
        }
    }
}

/// Records every command and holds completions until the test releases
/// them, which makes fence and pacing behavior observable.
#[derive(Debug, Default)]
pub struct RecordingAeroGpuBackend {
    pub commands: Vec<RecordedCommand>,
    /// Bindings of every clear, draw and dispatch, in order.
    pub bindings: Vec<ResolvedBindings>,
    pub submissions: Vec<AeroGpuBackendSubmission>,
    /// When set, the next `execute` fails with this message.
    pub fail_next: Option<String>,
    pending: VecDeque<AeroGpuBackendCompletion>,
    ready: Vec<AeroGpuBackendCompletion>,
}

impl RecordingAeroGpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fences submitted but not yet released, oldest first.
    pub fn pending_fences(&self) -> Vec<u64> {
        self.pending.iter().map(|c| c.fence).collect()
    }

    /// Release the oldest pending completion.
    pub fn complete_next(&mut self) -> Option<u64> {
        let completion = self.pending.pop_front()?;
        let fence = completion.fence;
        self.ready.push(completion);
        Some(fence)
    }

    /// Release a specific fence, possibly out of order.
    pub fn complete_fence(&mut self, fence: u64) -> bool {
        let Some(pos) = self.pending.iter().position(|c| c.fence == fence) else {
            return false;
        };
        if let Some(completion) = self.pending.remove(pos) {
            self.ready.push(completion);
        }
        true
    }

    pub fn complete_all(&mut self) {
        self.ready.extend(self.pending.drain(..));
    }
}

impl AeroGpuBackend for RecordingAeroGpuBackend {
    fn reset(&mut self) {
        self.commands.clear();
        self.bindings.clear();
        self.pending.clear();
        self.ready.clear();
    }

    fn execute(&mut self, cmd: BackendCommand<'_>) -> Result<(), String> {
        if let Some(message) = self.fail_next.take() {
            return Err(message);
        }
        if let BackendCommand::Clear { bindings, .. }
        | BackendCommand::Draw { bindings, .. }
        | BackendCommand::Dispatch { bindings, .. } = cmd
        {
            self.bindings.push(*bindings);
        }
        self.commands.push(RecordedCommand::from(&cmd));
        Ok(())
    }

    fn submit(&mut self, submission: AeroGpuBackendSubmission) -> Result<(), String> {
        self.pending.push_back(AeroGpuBackendCompletion {
            fence: submission.signal_fence,
            error: submission.error.clone(),
        });
        self.submissions.push(submission);
        Ok(())
    }

    fn poll_completions(&mut self) -> Vec<AeroGpuBackendCompletion> {
        std::mem::take(&mut self.ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(signal_fence: u64) -> AeroGpuBackendSubmission {
        AeroGpuBackendSubmission {
            flags: 0,
            context_id: 0,
            engine_id: 0,
            signal_fence,
            error: None,
        }
    }

    #[test]
    fn immediate_backend_completes_fence() {
        let mut backend = ImmediateAeroGpuBackend::new();
        backend.submit(submission(42)).unwrap();

        let completions = backend.poll_completions();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].fence, 42);
        assert!(completions[0].error.is_none());

        // Drain semantics.
        assert!(backend.poll_completions().is_empty());
    }

    #[test]
    fn recording_backend_holds_completions_until_released() {
        let mut backend = RecordingAeroGpuBackend::new();
        backend.submit(submission(1)).unwrap();
        backend.submit(submission(2)).unwrap();
        assert!(backend.poll_completions().is_empty());

        assert!(backend.complete_fence(2));
        assert!(!backend.complete_fence(2));
        let fences: Vec<u64> = backend.poll_completions().iter().map(|c| c.fence).collect();
        assert_eq!(fences, vec![2]);
        assert_eq!(backend.pending_fences(), vec![1]);

        backend.reset();
        assert!(backend.pending_fences().is_empty());
    }
}
