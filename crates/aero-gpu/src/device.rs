//! Per-device submission entry point and the D3D9Ex-facing queries built on
//! top of it.
//!
//! A submission goes through frame pacing first (only if it presents), then
//! has its fence registered, its packets applied, and finally is handed to
//! the backend. The fence is completed even when processing fails, so a
//! guest waiting on it never hangs because of a bad stream.

use std::collections::VecDeque;
use std::sync::Arc;

use aero_protocol::aerogpu::aerogpu_ring::{AerogpuSubmitDesc, AEROGPU_SUBMIT_FLAG_PRESENT};
use tracing::{debug, error, warn};

use crate::backend::{AeroGpuBackend, AeroGpuBackendSubmission, BackendCommand};
use crate::command_processor::{AeroGpuCommandProcessor, AeroGpuEvent, ExecutionReport};
use crate::config::{AeroGpuConfig, FenceCompletionMode};
use crate::error::{CommandProcessorError, ErrorKind, SyncError};
use crate::fence::FenceTracker;
use crate::frame_pacing::{scan_presents, FramePacer, PresentStats};
use crate::resource_table::{ResourceTable, SharedResourceTable};

/// One guest submission, as read from the ring.
#[derive(Debug, Clone, Copy)]
pub struct AeroGpuSubmission<'a> {
    pub context_id: u32,
    pub engine_id: u32,
    pub flags: u32,
    pub signal_fence: u64,
    pub cmd_stream: &'a [u8],
}

impl<'a> AeroGpuSubmission<'a> {
    /// Pair a ring descriptor with the command bytes it points at.
    pub fn from_desc(desc: &AerogpuSubmitDesc, cmd_stream: &'a [u8]) -> Self {
        Self {
            context_id: desc.context_id,
            engine_id: desc.engine_id,
            flags: desc.flags,
            signal_fence: desc.signal_fence,
            cmd_stream,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum SubmissionOutcome {
    Completed { packets_processed: usize },
    Failed { kind: ErrorKind, error: String },
    /// Rejected by frame pacing before anything was applied.
    Throttled,
    /// Accepted after backend loss; nothing was executed.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SubmissionRecord {
    pub fence: u64,
    pub context_id: u32,
    pub size_bytes: usize,
    pub outcome: SubmissionOutcome,
}

/// What the guest driver gets to see. Hard host failures are deliberately
/// reported as `Ok`; the compositor copes badly with anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum GuestStatus {
    Ok,
    WasStillDrawing,
    DeviceLost,
}

pub fn guest_status<T>(result: &Result<T, CommandProcessorError>) -> GuestStatus {
    match result {
        Err(CommandProcessorError::Sync(SyncError::StillDrawing)) => GuestStatus::WasStillDrawing,
        _ => GuestStatus::Ok,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DisplayMode {
    /// Scanout of the latest accepted present.
    pub scanout_id: Option<u32>,
    pub present_count: u64,
}

fn pump_completions(backend: &mut dyn AeroGpuBackend, fences: &FenceTracker, events: &mut Vec<AeroGpuEvent>) {
    for completion in backend.poll_completions() {
        if let Some(err) = &completion.error {
            warn!(fence = completion.fence, error = %err, "submission failed on the backend");
        }
        if fences.complete(completion.fence) {
            events.push(AeroGpuEvent::FenceSignaled {
                fence: fences.completed_fence(),
            });
        }
    }
}

pub struct AeroGpuDevice<B: AeroGpuBackend> {
    config: AeroGpuConfig,
    backend: B,
    processor: AeroGpuCommandProcessor,
    fences: Arc<FenceTracker>,
    last_submissions: VecDeque<SubmissionRecord>,
    lost: bool,
}

impl<B: AeroGpuBackend> AeroGpuDevice<B> {
    pub fn new(config: AeroGpuConfig, backend: B) -> Self {
        let table = ResourceTable::new_shared(config.max_handles);
        Self::with_shared_table(config, backend, table)
    }

    /// A device whose handles live in `table`, which other devices may share.
    pub fn with_shared_table(config: AeroGpuConfig, backend: B, table: SharedResourceTable) -> Self {
        let pacer = FramePacer::new(config.max_frame_latency);
        Self {
            processor: AeroGpuCommandProcessor::new(table, pacer),
            config,
            backend,
            fences: Arc::new(FenceTracker::new()),
            last_submissions: VecDeque::new(),
            lost: false,
        }
    }

    pub fn config(&self) -> &AeroGpuConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn processor(&self) -> &AeroGpuCommandProcessor {
        &self.processor
    }

    pub fn resource_table(&self) -> SharedResourceTable {
        self.processor.resource_table().clone()
    }

    /// Shared handle so another thread can observe or complete fences.
    pub fn fence_tracker(&self) -> Arc<FenceTracker> {
        Arc::clone(&self.fences)
    }

    pub fn completed_fence(&self) -> u64 {
        self.fences.completed_fence()
    }

    pub fn submit(&mut self, submission: AeroGpuSubmission<'_>) -> Result<ExecutionReport, CommandProcessorError> {
        let AeroGpuSubmission {
            context_id,
            engine_id,
            flags,
            signal_fence,
            cmd_stream,
        } = submission;
        let mut events = Vec::new();

        if self.lost {
            warn!(fence = signal_fence, "submission after backend loss dropped");
            self.fences.register(signal_fence, false);
            self.fences.complete(signal_fence);
            self.record(signal_fence, context_id, cmd_stream.len(), SubmissionOutcome::Dropped);
            return Ok(ExecutionReport::default());
        }

        let scan = scan_presents(cmd_stream);
        let presents = scan.presents > 0 || flags & AEROGPU_SUBMIT_FLAG_PRESENT != 0;
        if presents {
            let fences = &self.fences;
            let backend = &mut self.backend;
            let admitted = self.processor.frame_pacer().admit(fences, scan.do_not_wait, || {
                pump_completions(&mut *backend, fences, &mut events)
            });
            if let Err(err) = admitted {
                self.record(signal_fence, context_id, cmd_stream.len(), SubmissionOutcome::Throttled);
                return Err(err.into());
            }
        }

        self.fences.register(signal_fence, presents);
        let result = self.processor.process(cmd_stream, signal_fence, &mut self.backend);

        let backend_submission = AeroGpuBackendSubmission {
            flags,
            context_id,
            engine_id,
            signal_fence,
            error: result.as_ref().err().map(ToString::to_string),
        };
        let handed_off = match self.backend.submit(backend_submission) {
            Ok(()) => true,
            Err(err) => {
                error!(fence = signal_fence, error = %err, "backend rejected submission");
                false
            }
        };

        // A backend that never saw the submission will never report it.
        let complete_now = self.config.fence_completion == FenceCompletionMode::Immediate || !handed_off;
        if complete_now && self.fences.complete(signal_fence) {
            events.push(AeroGpuEvent::FenceSignaled {
                fence: self.fences.completed_fence(),
            });
        }
        pump_completions(&mut self.backend, &self.fences, &mut events);

        let outcome = match &result {
            Ok(report) => SubmissionOutcome::Completed {
                packets_processed: report.packets_processed,
            },
            Err(err) => SubmissionOutcome::Failed {
                kind: err.kind(),
                error: err.to_string(),
            },
        };
        self.record(signal_fence, context_id, cmd_stream.len(), outcome);

        result.map(|mut report| {
            report.events.extend(events);
            report
        })
    }

    fn record(&mut self, fence: u64, context_id: u32, size_bytes: usize, outcome: SubmissionOutcome) {
        if self.config.keep_last_submissions == 0 {
            return;
        }
        while self.last_submissions.len() >= self.config.keep_last_submissions {
            self.last_submissions.pop_front();
        }
        self.last_submissions.push_back(SubmissionRecord {
            fence,
            context_id,
            size_bytes,
            outcome,
        });
    }

    /// Most recent submissions, oldest first.
    pub fn recent_submissions(&self) -> impl Iterator<Item = &SubmissionRecord> {
        self.last_submissions.iter()
    }

    /// Apply backend completions. Returns the completed fence.
    pub fn poll_completions(&mut self) -> u64 {
        let mut events = Vec::new();
        pump_completions(&mut self.backend, &self.fences, &mut events);
        self.fences.completed_fence()
    }

    /// Non-blocking query: has `fence` completed?
    ///
    /// `flush_hint` asks the backend to start pending work, but the call
    /// never waits for it.
    pub fn get_data(&mut self, fence: u64, flush_hint: bool) -> bool {
        if flush_hint {
            if let Err(err) = self.backend.execute(BackendCommand::Flush) {
                debug!(error = %err, "best-effort flush failed");
            }
        }
        self.poll_completions() >= fence
    }

    /// Returns the latency actually applied.
    pub fn set_maximum_frame_latency(&mut self, n: u32) -> u32 {
        self.processor.frame_pacer_mut().set_max_frame_latency(n)
    }

    pub fn maximum_frame_latency(&self) -> u32 {
        self.processor.frame_pacer().max_frame_latency()
    }

    pub fn present_stats(&self) -> PresentStats {
        self.processor.frame_pacer().stats()
    }

    pub fn last_present_count(&self) -> u64 {
        self.processor.present_count()
    }

    pub fn display_mode(&self) -> DisplayMode {
        let pacer = self.processor.frame_pacer();
        DisplayMode {
            scanout_id: pacer.last_scanout_id(),
            present_count: pacer.last_present_count(),
        }
    }

    /// `ResetEx`: clears bound pipeline state. Resources, fences and present
    /// statistics survive.
    pub fn reset_ex(&mut self) {
        debug!("reset pipeline state");
        self.processor.reset_pipeline_state();
    }

    pub fn check_device_state(&self) -> GuestStatus {
        if self.lost {
            GuestStatus::DeviceLost
        } else {
            GuestStatus::Ok
        }
    }

    /// The backend died. Every in-flight fence is signaled so no guest
    /// waiter deadlocks. Returns the forced fences.
    pub fn on_backend_lost(&mut self) -> Vec<u64> {
        self.lost = true;
        self.backend.reset();
        self.fences.force_complete_all()
    }
}
