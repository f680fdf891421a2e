//! Frame latency throttling and present statistics.
//!
//! A submission containing a present is admitted only while fewer than
//! `max_frame_latency` earlier presents are still in flight. Admission is
//! decided before any packet of the submission is applied, so a rejected
//! `DONOTWAIT` present leaves no trace and the guest can simply retry.

use std::time::Duration;

use aero_protocol::aerogpu::aerogpu_cmd::{
    AerogpuCmdOpcode, AerogpuCmdStream, AEROGPU_D3D9_PRESENT_DONOTWAIT, AEROGPU_PRESENT_FLAG_VSYNC,
};
use tracing::trace;

use crate::error::SyncError;
use crate::fence::FenceTracker;
use crate::protocol::{decode_cmd, AeroGpuCmd};

pub const MIN_FRAME_LATENCY: u32 = 1;
pub const MAX_FRAME_LATENCY: u32 = 16;
pub const DEFAULT_FRAME_LATENCY: u32 = 3;

/// How long one pacing wait sleeps before polling the backend again.
const PACING_POLL_INTERVAL: Duration = Duration::from_millis(2);

pub fn clamp_frame_latency(n: u32) -> u32 {
    n.clamp(MIN_FRAME_LATENCY, MAX_FRAME_LATENCY)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct PresentStats {
    /// Accepted presents; never decreases.
    pub present_count: u64,
    /// Accepted presents that asked for vblank sync.
    pub present_refresh_count: u64,
    /// Fence of the submission carrying the latest accepted present.
    pub last_present_fence: u64,
}

/// Present packets found in one submission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PresentScan {
    pub presents: u32,
    pub do_not_wait: bool,
    pub vsync: bool,
}

/// Look for present packets without applying anything. Scanning stops at
/// the first malformed packet; processing reports the error.
pub fn scan_presents(bytes: &[u8]) -> PresentScan {
    let mut scan = PresentScan::default();
    let Ok(stream) = AerogpuCmdStream::open(bytes) else {
        return scan;
    };
    for packet in stream.packets() {
        let Ok(packet) = packet else { break };
        if !matches!(
            packet.opcode,
            Some(AerogpuCmdOpcode::Present | AerogpuCmdOpcode::PresentEx)
        ) {
            continue;
        }
        let (flags, d3d9_flags) = match decode_cmd(&packet) {
            Ok(AeroGpuCmd::Present { flags, .. }) => (flags, 0),
            Ok(AeroGpuCmd::PresentEx {
                flags,
                d3d9_present_flags,
                ..
            }) => (flags, d3d9_present_flags),
            _ => break,
        };
        scan.presents += 1;
        scan.vsync |= flags & AEROGPU_PRESENT_FLAG_VSYNC != 0;
        scan.do_not_wait |= d3d9_flags & AEROGPU_D3D9_PRESENT_DONOTWAIT != 0;
    }
    scan
}

#[derive(Debug)]
pub struct FramePacer {
    max_frame_latency: u32,
    stats: PresentStats,
    last_scanout_id: Option<u32>,
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_LATENCY)
    }
}

impl FramePacer {
    pub fn new(max_frame_latency: u32) -> Self {
        Self {
            max_frame_latency: clamp_frame_latency(max_frame_latency),
            stats: PresentStats::default(),
            last_scanout_id: None,
        }
    }

    pub fn max_frame_latency(&self) -> u32 {
        self.max_frame_latency
    }

    /// Returns the value actually applied.
    pub fn set_max_frame_latency(&mut self, n: u32) -> u32 {
        self.max_frame_latency = clamp_frame_latency(n);
        self.max_frame_latency
    }

    /// Wait until a new present may be queued.
    ///
    /// `pump` is called before every check so completions reported by the
    /// backend reach `fences`. With `do_not_wait` the call never blocks and
    /// fails with [`SyncError::StillDrawing`] instead.
    pub fn admit(&self, fences: &FenceTracker, do_not_wait: bool, mut pump: impl FnMut()) -> Result<(), SyncError> {
        let limit = self.max_frame_latency as usize;
        loop {
            pump();
            if fences.in_flight_presents() < limit {
                return Ok(());
            }
            if do_not_wait {
                trace!(limit, "present throttled (do not wait)");
                return Err(SyncError::StillDrawing);
            }
            fences.wait_presents_below(limit, PACING_POLL_INTERVAL);
        }
    }

    pub fn record_present(&mut self, fence: u64, scanout_id: u32, vsync: bool) -> u64 {
        self.stats.present_count += 1;
        if vsync {
            self.stats.present_refresh_count += 1;
        }
        self.stats.last_present_fence = self.stats.last_present_fence.max(fence);
        self.last_scanout_id = Some(scanout_id);
        self.stats.present_count
    }

    pub fn stats(&self) -> PresentStats {
        self.stats
    }

    pub fn last_present_count(&self) -> u64 {
        self.stats.present_count
    }

    pub fn last_scanout_id(&self) -> Option<u32> {
        self.last_scanout_id
    }
}

#[cfg(test)]
mod tests {
    use aero_protocol::aerogpu::cmd_writer::AerogpuCmdWriter;

    use super::*;

    #[test]
    fn latency_is_clamped() {
        let mut pacer = FramePacer::new(0);
        assert_eq!(pacer.max_frame_latency(), 1);
        assert_eq!(pacer.set_max_frame_latency(100), MAX_FRAME_LATENCY);
        assert_eq!(pacer.set_max_frame_latency(2), 2);
    }

    #[test]
    fn scan_finds_present_flags() {
        let mut w = AerogpuCmdWriter::new();
        w.flush();
        w.present_ex(0, AEROGPU_PRESENT_FLAG_VSYNC, AEROGPU_D3D9_PRESENT_DONOTWAIT);
        let scan = scan_presents(&w.finish());
        assert_eq!(
            scan,
            PresentScan {
                presents: 1,
                do_not_wait: true,
                vsync: true,
            }
        );

        let mut w = AerogpuCmdWriter::new();
        w.present(0, 0);
        let scan = scan_presents(&w.finish());
        assert_eq!(scan.presents, 1);
        assert!(!scan.do_not_wait);

        assert_eq!(scan_presents(&[0u8; 4]), PresentScan::default());
    }

    #[test]
    fn admit_fails_fast_when_full_and_not_waiting() {
        let fences = FenceTracker::new();
        let pacer = FramePacer::new(2);
        fences.register(1, true);
        pacer.admit(&fences, true, || {}).unwrap();
        fences.register(2, true);
        assert_eq!(pacer.admit(&fences, true, || {}), Err(SyncError::StillDrawing));

        // The pump is how backend completions arrive.
        pacer.admit(&fences, false, || {
            fences.complete(1);
        })
        .unwrap();
    }

    #[test]
    fn present_count_is_monotonic() {
        let mut pacer = FramePacer::default();
        assert_eq!(pacer.record_present(4, 0, true), 1);
        assert_eq!(pacer.record_present(3, 1, false), 2);
        let stats = pacer.stats();
        assert_eq!(stats.present_count, 2);
        assert_eq!(stats.present_refresh_count, 1);
        assert_eq!(stats.last_present_fence, 4);
        assert_eq!(pacer.last_scanout_id(), Some(1));
    }
}
