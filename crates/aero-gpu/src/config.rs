use serde::{Deserialize, Serialize};

use crate::frame_pacing::{clamp_frame_latency, DEFAULT_FRAME_LATENCY};

pub const DEFAULT_MAX_HANDLES: usize = 65536;
pub const DEFAULT_KEEP_LAST_SUBMISSIONS: usize = 16;

/// When a submission's fence is considered complete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FenceCompletionMode {
    /// As soon as the processor has applied the stream.
    #[default]
    Immediate,
    /// When the backend reports it through `poll_completions`.
    Deferred,
}

impl std::str::FromStr for FenceCompletionMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "deferred" => Ok(Self::Deferred),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AeroGpuConfig {
    /// Cap on live handles (aliases included).
    pub max_handles: usize,
    /// Initial frame latency; clamped to `1..=16` when applied.
    pub max_frame_latency: u32,
    pub fence_completion: FenceCompletionMode,
    /// Size of the diagnostic ring of recent submissions.
    pub keep_last_submissions: usize,
}

impl Default for AeroGpuConfig {
    fn default() -> Self {
        Self {
            max_handles: DEFAULT_MAX_HANDLES,
            max_frame_latency: DEFAULT_FRAME_LATENCY,
            fence_completion: FenceCompletionMode::Immediate,
            keep_last_submissions: DEFAULT_KEEP_LAST_SUBMISSIONS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for env var {var}")]
    InvalidEnv { var: &'static str, value: String },
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { var, value: raw })
}

impl AeroGpuConfig {
    /// Defaults overlaid with `AEROGPU_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = parse_var(&lookup, "AEROGPU_MAX_HANDLES")? {
            cfg.max_handles = v;
        }
        if let Some(v) = parse_var(&lookup, "AEROGPU_MAX_FRAME_LATENCY")? {
            cfg.max_frame_latency = v;
        }
        if let Some(v) = parse_var(&lookup, "AEROGPU_FENCE_COMPLETION")? {
            cfg.fence_completion = v;
        }
        if let Some(v) = parse_var(&lookup, "AEROGPU_KEEP_LAST_SUBMISSIONS")? {
            cfg.keep_last_submissions = v;
        }
        Ok(cfg)
    }

    pub fn effective_frame_latency(&self) -> u32 {
        clamp_frame_latency(self.max_frame_latency)
    }
}
