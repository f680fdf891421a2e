//! Guest handle → host object bookkeeping.
//!
//! Handles live in one global namespace (the MVP ABI always submits with
//! `context_id == 0`). Every handle maps to an *underlying* object id, which
//! is the handle the object was created with; shared-surface imports add
//! alias handles onto an existing underlying object.
//!
//! Lifetime rules for shared surfaces:
//! - every live handle (original or alias) holds one reference on its
//!   underlying object; the object is freed when the last one is destroyed;
//! - the underlying id stays reserved while any alias is alive, so a new
//!   resource cannot be created under it;
//! - freeing the object retires all of its share tokens, as does an explicit
//!   `RELEASE_SHARED_SURFACE`; retired tokens can never be exported again.
//!
//! The table is shared between devices (guest processes) through
//! [`SharedResourceTable`], so every export/import/destroy is serialized by
//! one lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use aero_protocol::aerogpu::aerogpu_cmd::{
    AerogpuInputLayoutElementDxgi, AerogpuShaderStage, AEROGPU_HANDLE_NULL, AEROGPU_RESOURCE_USAGE_CONSTANT_BUFFER,
    AEROGPU_RESOURCE_USAGE_DEPTH_STENCIL, AEROGPU_RESOURCE_USAGE_INDEX_BUFFER, AEROGPU_RESOURCE_USAGE_RENDER_TARGET,
    AEROGPU_RESOURCE_USAGE_SCANOUT, AEROGPU_RESOURCE_USAGE_TEXTURE, AEROGPU_RESOURCE_USAGE_VERTEX_BUFFER,
};
use aero_protocol::aerogpu::aerogpu_pci::AerogpuFormat;
use bitflags::bitflags;
use tracing::debug;

use crate::error::ResourceError;

pub type SharedResourceTable = Arc<Mutex<ResourceTable>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ResourceKind {
    Buffer,
    Texture2d,
    Shader,
    InputLayout,
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ResourceUsage: u32 {
        const VERTEX_BUFFER = AEROGPU_RESOURCE_USAGE_VERTEX_BUFFER;
        const INDEX_BUFFER = AEROGPU_RESOURCE_USAGE_INDEX_BUFFER;
        const CONSTANT_BUFFER = AEROGPU_RESOURCE_USAGE_CONSTANT_BUFFER;
        const TEXTURE = AEROGPU_RESOURCE_USAGE_TEXTURE;
        const RENDER_TARGET = AEROGPU_RESOURCE_USAGE_RENDER_TARGET;
        const DEPTH_STENCIL = AEROGPU_RESOURCE_USAGE_DEPTH_STENCIL;
        const SCANOUT = AEROGPU_RESOURCE_USAGE_SCANOUT;
    }
}

impl ResourceUsage {
    /// Parse wire usage flags for resource `handle`; unknown bits are rejected.
    pub fn from_wire(handle: u32, usage_flags: u32) -> Result<Self, ResourceError> {
        Self::from_bits(usage_flags).ok_or(ResourceError::InvalidUsageFlags { handle, usage_flags })
    }

    const TEXTURE_ONLY: Self = Self::TEXTURE
        .union(Self::RENDER_TARGET)
        .union(Self::DEPTH_STENCIL)
        .union(Self::SCANOUT);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub usage: ResourceUsage,
    pub size_bytes: u64,
    pub backing_alloc_id: u32,
    pub backing_offset_bytes: u32,
}

impl BufferDesc {
    pub fn validate(&self, handle: u32) -> Result<(), ResourceError> {
        if self.usage.intersects(ResourceUsage::TEXTURE_ONLY) {
            return Err(ResourceError::InvalidUsageFlags {
                handle,
                usage_flags: self.usage.bits(),
            });
        }
        if self.size_bytes == 0 {
            return Err(ResourceError::InvalidDescriptor {
                handle,
                reason: "zero-sized buffer",
            });
        }
        if self.size_bytes % 4 != 0 {
            return Err(ResourceError::InvalidDescriptor {
                handle,
                reason: "buffer size is not a multiple of 4",
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Texture2dDesc {
    pub usage: ResourceUsage,
    pub format: AerogpuFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    /// Row pitch of mip 0; 0 means tightly packed.
    pub row_pitch_bytes: u32,
    pub backing_alloc_id: u32,
    pub backing_offset_bytes: u32,
}

impl Texture2dDesc {
    pub fn validate(&self, handle: u32) -> Result<(), ResourceError> {
        let invalid = |reason| ResourceError::InvalidDescriptor { handle, reason };
        let usage_flags = self.usage.bits();

        // Attachment usage must agree with the format: depth formats only as
        // depth-stencil targets, color formats only as render targets.
        let attachment = self
            .usage
            .intersects(ResourceUsage::DEPTH_STENCIL | ResourceUsage::RENDER_TARGET);
        let format_mismatch =
            attachment && self.usage.contains(ResourceUsage::DEPTH_STENCIL) != self.format.is_depth_stencil();
        if self.usage.contains(ResourceUsage::SCANOUT | ResourceUsage::DEPTH_STENCIL)
            || self.usage.intersects(ResourceUsage::VERTEX_BUFFER | ResourceUsage::INDEX_BUFFER)
            || format_mismatch
        {
            return Err(ResourceError::InvalidUsageFlags { handle, usage_flags });
        }
        if self.width == 0 || self.height == 0 {
            return Err(invalid("zero texture extent"));
        }
        if self.mip_levels == 0 || self.mip_levels > full_mip_chain(self.width, self.height) {
            return Err(invalid("mip_levels outside 1..=full chain"));
        }
        if self.array_layers == 0 {
            return Err(invalid("array_layers must be at least 1"));
        }
        let tight = self
            .format
            .tight_row_pitch_bytes(self.width)
            .ok_or(invalid("row size overflows"))?;
        if self.row_pitch_bytes != 0 && u64::from(self.row_pitch_bytes) < tight {
            return Err(invalid("row_pitch_bytes smaller than a packed row"));
        }
        self.size_bytes().ok_or(invalid("texture size overflows"))?;
        Ok(())
    }

    pub fn mip_extent(&self, mip_level: u32) -> (u32, u32) {
        let w = self.width.checked_shr(mip_level).unwrap_or(0).max(1);
        let h = self.height.checked_shr(mip_level).unwrap_or(0).max(1);
        (w, h)
    }

    fn mip_size_bytes(&self, mip_level: u32) -> Option<u64> {
        let (w, h) = self.mip_extent(mip_level);
        let pitch = if mip_level == 0 && self.row_pitch_bytes != 0 {
            u64::from(self.row_pitch_bytes)
        } else {
            self.format.tight_row_pitch_bytes(w)?
        };
        pitch.checked_mul(self.format.block_rows(h))
    }

    /// Bytes covered by every mip of every array layer, as laid out in the
    /// guest backing.
    pub fn size_bytes(&self) -> Option<u64> {
        let mut layer = 0u64;
        for mip in 0..self.mip_levels {
            layer = layer.checked_add(self.mip_size_bytes(mip)?)?;
        }
        layer.checked_mul(u64::from(self.array_layers))
    }
}

fn full_mip_chain(width: u32, height: u32) -> u32 {
    32 - width.max(height).leading_zeros()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderDesc {
    pub stage: AerogpuShaderStage,
    pub dxbc_size_bytes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputLayoutDesc {
    pub elements: Vec<AerogpuInputLayoutElementDxgi>,
    /// Vertex buffer slots a draw with this layout reads from.
    pub input_slots: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceDesc {
    Buffer(BufferDesc),
    Texture2d(Texture2dDesc),
    Shader(ShaderDesc),
    InputLayout(InputLayoutDesc),
}

impl ResourceDesc {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Buffer(_) => ResourceKind::Buffer,
            Self::Texture2d(_) => ResourceKind::Texture2d,
            Self::Shader(_) => ResourceKind::Shader,
            Self::InputLayout(_) => ResourceKind::InputLayout,
        }
    }

    /// Size of the guest-visible backing, for range checks.
    pub fn size_bytes(&self) -> Option<u64> {
        match self {
            Self::Buffer(b) => Some(b.size_bytes),
            Self::Texture2d(t) => t.size_bytes(),
            Self::Shader(_) | Self::InputLayout(_) => None,
        }
    }
}

#[derive(Debug)]
struct Object {
    desc: ResourceDesc,
    refcount: u32,
    share_tokens: Vec<u64>,
}

/// What a successful destroy did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Destroyed {
    pub underlying: u32,
    /// The last reference went away and the host object was freed.
    pub freed: bool,
}

#[derive(Debug)]
pub struct ResourceTable {
    max_handles: usize,
    /// Live handle → underlying object id.
    handles: HashMap<u32, u32>,
    objects: HashMap<u32, Object>,
    tokens: HashMap<u64, u32>,
    retired_tokens: HashSet<u64>,
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_HANDLES)
    }
}

impl ResourceTable {
    pub fn new(max_handles: usize) -> Self {
        Self {
            max_handles,
            handles: HashMap::new(),
            objects: HashMap::new(),
            tokens: HashMap::new(),
            retired_tokens: HashSet::new(),
        }
    }

    pub fn new_shared(max_handles: usize) -> SharedResourceTable {
        Arc::new(Mutex::new(Self::new(max_handles)))
    }

    pub fn live_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn max_handles(&self) -> usize {
        self.max_handles
    }

    fn check_limit(&self) -> Result<(), ResourceError> {
        if self.handles.len() >= self.max_handles {
            return Err(ResourceError::ResourceLimitExceeded {
                limit: self.max_handles,
            });
        }
        Ok(())
    }

    pub fn create(&mut self, handle: u32, desc: ResourceDesc) -> Result<(), ResourceError> {
        if handle == AEROGPU_HANDLE_NULL {
            return Err(ResourceError::NullHandle);
        }
        // An underlying id stays taken while aliases of it are alive.
        if self.handles.contains_key(&handle) || self.objects.contains_key(&handle) {
            return Err(ResourceError::DuplicateHandle { handle });
        }
        self.check_limit()?;

        debug!(handle, kind = ?desc.kind(), "create resource");
        self.handles.insert(handle, handle);
        self.objects.insert(
            handle,
            Object {
                desc,
                refcount: 1,
                share_tokens: Vec::new(),
            },
        );
        Ok(())
    }

    /// Drop one reference. Frees the object (and retires its share tokens)
    /// when it was the last one.
    pub fn destroy(&mut self, handle: u32) -> Result<Destroyed, ResourceError> {
        let underlying = self
            .handles
            .remove(&handle)
            .ok_or(ResourceError::UnknownHandle { handle })?;

        let Some(object) = self.objects.get_mut(&underlying) else {
            return Err(ResourceError::UnknownHandle { handle });
        };
        object.refcount = object.refcount.saturating_sub(1);
        if object.refcount > 0 {
            debug!(handle, underlying, refcount = object.refcount, "release alias");
            return Ok(Destroyed {
                underlying,
                freed: false,
            });
        }

        if let Some(object) = self.objects.remove(&underlying) {
            for token in object.share_tokens {
                self.tokens.remove(&token);
                self.retired_tokens.insert(token);
            }
        }
        debug!(handle, underlying, "free resource");
        Ok(Destroyed { underlying, freed: true })
    }

    /// Destroy `handle` after checking its kind.
    pub fn destroy_kind(
        &mut self,
        handle: u32,
        expected: &'static str,
        accept: impl Fn(ResourceKind) -> bool,
    ) -> Result<Destroyed, ResourceError> {
        let found = self.resolve(handle)?.kind();
        if !accept(found) {
            return Err(ResourceError::KindMismatch { handle, expected, found });
        }
        self.destroy(handle)
    }

    /// The underlying object id for `handle`.
    pub fn underlying(&self, handle: u32) -> Result<u32, ResourceError> {
        self.handles
            .get(&handle)
            .copied()
            .ok_or(ResourceError::UnknownHandle { handle })
    }

    pub fn resolve(&self, handle: u32) -> Result<&ResourceDesc, ResourceError> {
        let underlying = self.underlying(handle)?;
        self.objects
            .get(&underlying)
            .map(|o| &o.desc)
            .ok_or(ResourceError::UnknownHandle { handle })
    }

    pub fn buffer(&self, handle: u32) -> Result<&BufferDesc, ResourceError> {
        match self.resolve(handle)? {
            ResourceDesc::Buffer(desc) => Ok(desc),
            other => Err(ResourceError::KindMismatch {
                handle,
                expected: "buffer",
                found: other.kind(),
            }),
        }
    }

    pub fn texture2d(&self, handle: u32) -> Result<&Texture2dDesc, ResourceError> {
        match self.resolve(handle)? {
            ResourceDesc::Texture2d(desc) => Ok(desc),
            other => Err(ResourceError::KindMismatch {
                handle,
                expected: "texture2d",
                found: other.kind(),
            }),
        }
    }

    pub fn shader(&self, handle: u32) -> Result<&ShaderDesc, ResourceError> {
        match self.resolve(handle)? {
            ResourceDesc::Shader(desc) => Ok(desc),
            other => Err(ResourceError::KindMismatch {
                handle,
                expected: "shader",
                found: other.kind(),
            }),
        }
    }

    pub fn input_layout(&self, handle: u32) -> Result<&InputLayoutDesc, ResourceError> {
        match self.resolve(handle)? {
            ResourceDesc::InputLayout(desc) => Ok(desc),
            other => Err(ResourceError::KindMismatch {
                handle,
                expected: "input layout",
                found: other.kind(),
            }),
        }
    }

    /// Number of live handles referencing the object behind `handle`.
    pub fn refcount(&self, handle: u32) -> Option<u32> {
        let underlying = self.handles.get(&handle)?;
        self.objects.get(underlying).map(|o| o.refcount)
    }

    /// Underlying object currently exported under `share_token`.
    pub fn lookup_share_token(&self, share_token: u64) -> Option<u32> {
        self.tokens.get(&share_token).copied()
    }

    pub fn is_token_retired(&self, share_token: u64) -> bool {
        self.retired_tokens.contains(&share_token)
    }

    /// Publish the object behind `handle` under `share_token`.
    ///
    /// Re-exporting the same object under the same token is a no-op.
    pub fn export_shared(&mut self, handle: u32, share_token: u64) -> Result<(), ResourceError> {
        if share_token == 0 {
            return Err(ResourceError::NullShareToken);
        }
        let underlying = self.underlying(handle)?;
        match self.resolve(handle)? {
            ResourceDesc::Texture2d(desc) if desc.mip_levels == 1 && desc.array_layers == 1 => {}
            ResourceDesc::Texture2d(_) => {
                return Err(ResourceError::NotShareable {
                    handle,
                    reason: "shared surfaces must be a single allocation (one mip, one layer)",
                })
            }
            _ => {
                return Err(ResourceError::NotShareable {
                    handle,
                    reason: "only 2D textures can be shared",
                })
            }
        }

        if self.retired_tokens.contains(&share_token) {
            return Err(ResourceError::ShareTokenRetired { share_token });
        }
        if let Some(&existing) = self.tokens.get(&share_token) {
            if existing != underlying {
                return Err(ResourceError::Collision {
                    share_token,
                    existing,
                    new: underlying,
                });
            }
            return Ok(());
        }

        debug!(handle, underlying, share_token, "export shared surface");
        self.tokens.insert(share_token, underlying);
        if let Some(object) = self.objects.get_mut(&underlying) {
            object.share_tokens.push(share_token);
        }
        Ok(())
    }

    /// Bind `alias` to the object exported under `share_token`, taking a
    /// reference on it.
    ///
    /// Importing the same token into the same alias again is a no-op.
    pub fn import_shared(&mut self, share_token: u64, alias: u32) -> Result<u32, ResourceError> {
        if alias == AEROGPU_HANDLE_NULL {
            return Err(ResourceError::NullHandle);
        }
        if share_token == 0 {
            return Err(ResourceError::NullShareToken);
        }
        let underlying = self
            .tokens
            .get(&share_token)
            .copied()
            .ok_or(ResourceError::UnknownToken { share_token })?;

        if let Some(&existing) = self.handles.get(&alias) {
            if existing == underlying {
                return Ok(underlying);
            }
            return Err(ResourceError::DuplicateHandle { handle: alias });
        }
        if self.objects.contains_key(&alias) {
            return Err(ResourceError::DuplicateHandle { handle: alias });
        }
        self.check_limit()?;

        let Some(object) = self.objects.get_mut(&underlying) else {
            return Err(ResourceError::UnknownToken { share_token });
        };
        object.refcount += 1;
        debug!(alias, underlying, share_token, refcount = object.refcount, "import shared surface");
        self.handles.insert(alias, underlying);
        Ok(underlying)
    }

    /// Retire `share_token`. Existing aliases stay valid; unknown or already
    /// released tokens are ignored. Returns whether a mapping was removed.
    pub fn release_shared(&mut self, share_token: u64) -> bool {
        if share_token == 0 {
            return false;
        }
        let Some(underlying) = self.tokens.remove(&share_token) else {
            return false;
        };
        self.retired_tokens.insert(share_token);
        if let Some(object) = self.objects.get_mut(&underlying) {
            object.share_tokens.retain(|&t| t != share_token);
        }
        debug!(underlying, share_token, "release shared surface");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(size_bytes: u64) -> ResourceDesc {
        ResourceDesc::Buffer(BufferDesc {
            usage: ResourceUsage::VERTEX_BUFFER,
            size_bytes,
            backing_alloc_id: 0,
            backing_offset_bytes: 0,
        })
    }

    fn texture(format: AerogpuFormat, width: u32, height: u32, mip_levels: u32) -> Texture2dDesc {
        Texture2dDesc {
            usage: ResourceUsage::TEXTURE,
            format,
            width,
            height,
            mip_levels,
            array_layers: 1,
            row_pitch_bytes: 0,
            backing_alloc_id: 0,
            backing_offset_bytes: 0,
        }
    }

    #[test]
    fn texture_size_covers_mip_chain() {
        let desc = texture(AerogpuFormat::B8G8R8A8Unorm, 4, 4, 3);
        assert_eq!(desc.size_bytes(), Some(64 + 16 + 4));

        let bc = texture(AerogpuFormat::BC1RgbaUnorm, 8, 8, 1);
        assert_eq!(bc.size_bytes(), Some(4 * 8));

        let mut pitched = texture(AerogpuFormat::R8G8B8A8Unorm, 3, 2, 1);
        pitched.row_pitch_bytes = 16;
        assert_eq!(pitched.size_bytes(), Some(32));
    }

    #[test]
    fn texture_validation() {
        assert!(texture(AerogpuFormat::B8G8R8A8Unorm, 16, 8, 5).validate(1).is_ok());
        assert!(matches!(
            texture(AerogpuFormat::B8G8R8A8Unorm, 16, 8, 6).validate(1),
            Err(ResourceError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            texture(AerogpuFormat::B8G8R8A8Unorm, 0, 8, 1).validate(1),
            Err(ResourceError::InvalidDescriptor { .. })
        ));

        let mut short_pitch = texture(AerogpuFormat::B8G8R8A8Unorm, 16, 1, 1);
        short_pitch.row_pitch_bytes = 32;
        assert!(short_pitch.validate(1).is_err());

        let mut scanout_depth = texture(AerogpuFormat::D24UnormS8Uint, 16, 16, 1);
        scanout_depth.usage = ResourceUsage::SCANOUT | ResourceUsage::DEPTH_STENCIL;
        assert_eq!(
            scanout_depth.validate(7),
            Err(ResourceError::InvalidUsageFlags {
                handle: 7,
                usage_flags: scanout_depth.usage.bits(),
            })
        );
    }

    #[test]
    fn limit_counts_aliases() {
        let mut table = ResourceTable::new(2);
        table
            .create(1, ResourceDesc::Texture2d(texture(AerogpuFormat::B8G8R8A8Unorm, 4, 4, 1)))
            .unwrap();
        table.export_shared(1, 0xAB).unwrap();
        table.import_shared(0xAB, 2).unwrap();
        assert_eq!(
            table.create(3, buffer(16)),
            Err(ResourceError::ResourceLimitExceeded { limit: 2 })
        );
        table.destroy(2).unwrap();
        table.create(3, buffer(16)).unwrap();
    }

    #[test]
    fn destroy_kind_rejects_wrong_kind() {
        let mut table = ResourceTable::default();
        table.create(5, buffer(64)).unwrap();
        let err = table
            .destroy_kind(5, "shader", |k| k == ResourceKind::Shader)
            .unwrap_err();
        assert_eq!(
            err,
            ResourceError::KindMismatch {
                handle: 5,
                expected: "shader",
                found: ResourceKind::Buffer,
            }
        );
        assert!(table.resolve(5).is_ok());
    }
}
