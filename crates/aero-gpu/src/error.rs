use aero_protocol::aerogpu::aerogpu_cmd::AerogpuCmdDecodeError;

use crate::resource_table::ResourceKind;

/// Coarse classification of a processing failure, used for logging and for
/// deciding what the guest gets to see.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorKind {
    Structural,
    Resource,
    State,
    Synchronization,
    Backend,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("handle 0 is reserved")]
    NullHandle,
    #[error("resource handle {handle} is already in use")]
    DuplicateHandle { handle: u32 },
    #[error("unknown resource handle {handle}")]
    UnknownHandle { handle: u32 },
    #[error("resource handle {handle} is a {found:?}, expected {expected}")]
    KindMismatch {
        handle: u32,
        expected: &'static str,
        found: ResourceKind,
    },
    #[error("share token 0x{share_token:016X} already exported for resource {existing} (new resource {new})")]
    Collision { share_token: u64, existing: u32, new: u32 },
    #[error("unknown share token 0x{share_token:016X}")]
    UnknownToken { share_token: u64 },
    #[error("share token 0x{share_token:016X} was released and cannot be re-exported")]
    ShareTokenRetired { share_token: u64 },
    #[error("share token 0 is reserved")]
    NullShareToken,
    #[error("resource {handle} cannot be shared: {reason}")]
    NotShareable { handle: u32, reason: &'static str },
    #[error("live handle limit of {limit} reached")]
    ResourceLimitExceeded { limit: usize },
    #[error("range offset={offset} size={size} is outside resource {handle} ({resource_size} bytes)")]
    RangeOutOfBounds {
        handle: u32,
        offset: u64,
        size: u64,
        resource_size: u64,
    },
    #[error("copy between mismatched formats (dst {dst}, src {src})")]
    FormatMismatch { dst: u32, src: u32 },
    #[error("invalid descriptor for resource {handle}: {reason}")]
    InvalidDescriptor { handle: u32, reason: &'static str },
    #[error("resource {handle} has incompatible usage flags 0x{usage_flags:08X}")]
    InvalidUsageFlags { handle: u32, usage_flags: u32 },
}

/// A draw was issued without the state it needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MissingBinding {
    #[error("no vertex shader bound")]
    VertexShader,
    #[error("no pixel shader bound")]
    PixelShader,
    #[error("no compute shader bound")]
    ComputeShader,
    #[error("no input layout bound")]
    InputLayout,
    #[error("no vertex buffer bound to slot {slot}")]
    VertexBuffer { slot: u32 },
    #[error("no index buffer bound")]
    IndexBuffer,
    #[error("no render target bound")]
    RenderTarget,
    #[error("no depth-stencil target bound")]
    DepthStencil,
    #[error("no texture bound to slot {slot}")]
    Texture { slot: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("invalid {field} value {value}")]
    InvalidEnum { field: &'static str, value: u32 },
    #[error("{count} render targets requested (max {max})")]
    TooManyRenderTargets { count: u32, max: u32 },
    #[error("clear requests {aspect} but no {aspect} target is bound")]
    NoRenderTargetBound { aspect: &'static str },
    #[error("missing binding: {0}")]
    MissingBinding(#[from] MissingBinding),
    #[error("{what} {slot} is out of range (limit {max})")]
    SlotOutOfRange { what: &'static str, slot: u64, max: u32 },
    #[error("shader {handle} bound as {expected} shader but was created for stage {found}")]
    ShaderStageMismatch {
        handle: u32,
        expected: &'static str,
        found: u32,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Frame latency limit reached and the present asked not to wait.
    #[error("device is still drawing")]
    StillDrawing,
    /// The fence was signaled because the backend went away, not because
    /// the work completed.
    #[error("fence {fence} force-completed after backend loss")]
    ForcedCompletion { fence: u64 },
}

/// Why a single packet failed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PacketError {
    #[error(transparent)]
    Decode(#[from] AerogpuCmdDecodeError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CommandProcessorError {
    /// The stream header itself was rejected.
    #[error("invalid command stream: {0}")]
    Stream(#[from] AerogpuCmdDecodeError),
    #[error("packet at offset {offset} (opcode 0x{opcode:X}) failed: {source}")]
    Packet {
        offset: usize,
        opcode: u32,
        #[source]
        source: PacketError,
    },
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl CommandProcessorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Stream(_) => ErrorKind::Structural,
            Self::Packet { source, .. } => match source {
                PacketError::Decode(_) => ErrorKind::Structural,
                PacketError::Resource(_) => ErrorKind::Resource,
                PacketError::State(_) => ErrorKind::State,
                PacketError::Backend(_) => ErrorKind::Backend,
            },
            Self::Sync(_) => ErrorKind::Synchronization,
        }
    }

    /// Byte offset of the failing packet, if the failure is tied to one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Packet { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    pub fn resource_error(&self) -> Option<&ResourceError> {
        match self {
            Self::Packet {
                source: PacketError::Resource(err),
                ..
            } => Some(err),
            _ => None,
        }
    }

    pub fn state_error(&self) -> Option<&StateError> {
        match self {
            Self::Packet {
                source: PacketError::State(err),
                ..
            } => Some(err),
            _ => None,
        }
    }

    pub fn decode_error(&self) -> Option<&AerogpuCmdDecodeError> {
        match self {
            Self::Stream(err)
            | Self::Packet {
                source: PacketError::Decode(err),
                ..
            } => Some(err),
            _ => None,
        }
    }
}
