//! Layouts, access masks and resource states.
//!
//! The explicit-barrier family describes a hazard as access masks plus an
//! image layout; the resource-state family only knows the state a resource is
//! in. The tables here map the former onto the latter.

use bitflags::bitflags;
#[cfg(feature = "nori-serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub enum ImageLayout {
    #[default]
    Undefined,
    General,
    ColourAttachmentOptimal,
    DepthStencilAttachmentOptimal,
    DepthStencilReadOnlyOptimal,
    ShaderReadOnlyOptimal,
    TransferSrcOptimal,
    TransferDstOptimal,
    Preinitialised,
    PresentSrc,
}

// Raw values follow the Vulkan encodings so the explicit backend can pass
// them through untouched.
bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
    pub struct AccessBit: u32 {
        const INDIRECT_COMMAND_READ = 0x0000_0001;
        const INDEX_READ = 0x0000_0002;
        const VERTEX_ATTRIBUTE_READ = 0x0000_0004;
        const UNIFORM_READ = 0x0000_0008;
        const INPUT_ATTACHMENT_READ = 0x0000_0010;
        const SHADER_READ = 0x0000_0020;
        const SHADER_WRITE = 0x0000_0040;
        const COLOUR_ATTACHMENT_READ = 0x0000_0080;
        const COLOUR_ATTACHMENT_WRITE = 0x0000_0100;
        const DEPTH_STENCIL_ATTACHMENT_READ = 0x0000_0200;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 0x0000_0400;
        const TRANSFER_READ = 0x0000_0800;
        const TRANSFER_WRITE = 0x0000_1000;
        const HOST_READ = 0x0000_2000;
        const HOST_WRITE = 0x0000_4000;
        const MEMORY_READ = 0x0000_8000;
        const MEMORY_WRITE = 0x0001_0000;
        const ACCELERATION_STRUCTURE_READ = 0x0020_0000;
        const ACCELERATION_STRUCTURE_WRITE = 0x0040_0000;
    }
}

impl AccessBit {
    pub const WRITES: AccessBit = AccessBit::SHADER_WRITE
        .union(AccessBit::COLOUR_ATTACHMENT_WRITE)
        .union(AccessBit::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .union(AccessBit::TRANSFER_WRITE)
        .union(AccessBit::HOST_WRITE)
        .union(AccessBit::MEMORY_WRITE)
        .union(AccessBit::ACCELERATION_STRUCTURE_WRITE);

    pub fn has_write(self) -> bool {
        self.intersects(Self::WRITES)
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
    pub struct PipelineStageBit: u32 {
        const TOP_OF_PIPE = 0x0000_0001;
        const DRAW_INDIRECT = 0x0000_0002;
        const VERTEX_INPUT = 0x0000_0004;
        const VERTEX_SHADER = 0x0000_0008;
        const TESSELLATION_CONTROL_SHADER = 0x0000_0010;
        const TESSELLATION_EVALUATION_SHADER = 0x0000_0020;
        const GEOMETRY_SHADER = 0x0000_0040;
        const FRAGMENT_SHADER = 0x0000_0080;
        const EARLY_FRAGMENT_TESTS = 0x0000_0100;
        const LATE_FRAGMENT_TESTS = 0x0000_0200;
        const COLOUR_ATTACHMENT_OUTPUT = 0x0000_0400;
        const COMPUTE_SHADER = 0x0000_0800;
        const TRANSFER = 0x0000_1000;
        const BOTTOM_OF_PIPE = 0x0000_2000;
        const HOST = 0x0000_4000;
        const ALL_GRAPHICS = 0x0000_8000;
        const ALL_COMMANDS = 0x0001_0000;
        const RAY_TRACING_SHADER = 0x0020_0000;
        const ACCELERATION_STRUCTURE_BUILD = 0x0200_0000;
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
    pub struct DependencyBit: u32 {
        const BY_REGION = 0x1;
        const VIEW_LOCAL = 0x2;
        const DEVICE_GROUP = 0x4;
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
    pub struct BufferUsageBit: u32 {
        const TRANSFER_SRC = 0x0000_0001;
        const TRANSFER_DST = 0x0000_0002;
        const UNIFORM_TEXEL = 0x0000_0004;
        const STORAGE_TEXEL = 0x0000_0008;
        const UNIFORM = 0x0000_0010;
        const STORAGE = 0x0000_0020;
        const INDEX = 0x0000_0040;
        const VERTEX = 0x0000_0080;
        const INDIRECT = 0x0000_0100;
        const SHADER_DEVICE_ADDRESS = 0x0002_0000;
        const ACCELERATION_STRUCTURE_STORAGE = 0x0010_0000;
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
    pub struct ImageUsageBit: u32 {
        const TRANSFER_SRC = 0x01;
        const TRANSFER_DST = 0x02;
        const SAMPLED = 0x04;
        const STORAGE = 0x08;
        const COLOUR_ATTACHMENT = 0x10;
        const DEPTH_STENCIL_ATTACHMENT = 0x20;
        const TRANSIENT_ATTACHMENT = 0x40;
        const INPUT_ATTACHMENT = 0x80;
    }
}

// Raw values follow the D3D12 encodings. `PRESENT` aliases `COMMON` there and
// does here too.
bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
    pub struct ResourceState: u32 {
        const COMMON = 0;
        const PRESENT = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 0x0000_0001;
        const INDEX_BUFFER = 0x0000_0002;
        const RENDER_TARGET = 0x0000_0004;
        const UNORDERED_ACCESS = 0x0000_0008;
        const DEPTH_WRITE = 0x0000_0010;
        const DEPTH_READ = 0x0000_0020;
        const NON_PIXEL_SHADER_RESOURCE = 0x0000_0040;
        const PIXEL_SHADER_RESOURCE = 0x0000_0080;
        const INDIRECT_ARGUMENT = 0x0000_0200;
        const COPY_DEST = 0x0000_0400;
        const COPY_SOURCE = 0x0000_0800;
        const ACCELERATION_STRUCTURE = 0x0040_0000;
    }
}

impl ResourceState {
    pub const SHADER_RESOURCE: ResourceState =
        ResourceState::PIXEL_SHADER_RESOURCE.union(ResourceState::NON_PIXEL_SHADER_RESOURCE);

    /// States a copy queue is allowed to use.
    pub const COPY_QUEUE_LEGAL: ResourceState =
        ResourceState::COPY_SOURCE.union(ResourceState::COPY_DEST);

    const WRITE_STATES: ResourceState = ResourceState::RENDER_TARGET
        .union(ResourceState::UNORDERED_ACCESS)
        .union(ResourceState::DEPTH_WRITE)
        .union(ResourceState::COPY_DEST);

    pub fn has_write(self) -> bool {
        self.intersects(Self::WRITE_STATES)
    }

    /// Whether a copy queue may hold a resource in this state.
    pub fn is_copy_legal(self) -> bool {
        Self::COPY_QUEUE_LEGAL.contains(self)
    }
}

impl ImageLayout {
    /// Layouts no write access may target.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            ImageLayout::DepthStencilReadOnlyOptimal
                | ImageLayout::ShaderReadOnlyOptimal
                | ImageLayout::TransferSrcOptimal
                | ImageLayout::PresentSrc
        )
    }

    /// Write accesses that may be performed on an image in this layout.
    pub fn writable_access(self) -> AccessBit {
        match self {
            ImageLayout::Undefined | ImageLayout::General | ImageLayout::Preinitialised => {
                AccessBit::WRITES
            }
            ImageLayout::ColourAttachmentOptimal => AccessBit::COLOUR_ATTACHMENT_WRITE,
            ImageLayout::DepthStencilAttachmentOptimal => {
                AccessBit::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            ImageLayout::TransferDstOptimal => AccessBit::TRANSFER_WRITE,
            ImageLayout::DepthStencilReadOnlyOptimal
            | ImageLayout::ShaderReadOnlyOptimal
            | ImageLayout::TransferSrcOptimal
            | ImageLayout::PresentSrc => AccessBit::empty(),
        }
    }

    /// Whether an image created with `usage` may be put into this layout.
    pub fn allowed_by(self, usage: ImageUsageBit) -> bool {
        let needs = match self {
            ImageLayout::ColourAttachmentOptimal => ImageUsageBit::COLOUR_ATTACHMENT,
            ImageLayout::DepthStencilAttachmentOptimal => {
                ImageUsageBit::DEPTH_STENCIL_ATTACHMENT
            }
            ImageLayout::DepthStencilReadOnlyOptimal => {
                ImageUsageBit::DEPTH_STENCIL_ATTACHMENT | ImageUsageBit::SAMPLED
            }
            ImageLayout::ShaderReadOnlyOptimal => {
                ImageUsageBit::SAMPLED | ImageUsageBit::INPUT_ATTACHMENT
            }
            ImageLayout::TransferSrcOptimal => ImageUsageBit::TRANSFER_SRC,
            ImageLayout::TransferDstOptimal => ImageUsageBit::TRANSFER_DST,
            _ => return true,
        };
        usage.intersects(needs)
    }

    /// Layout an image is put into before its first use with `usage`.
    pub fn preferred_for(usage: ImageUsageBit) -> ImageLayout {
        if usage.contains(ImageUsageBit::COLOUR_ATTACHMENT) {
            return ImageLayout::ColourAttachmentOptimal;
        }
        if usage.contains(ImageUsageBit::DEPTH_STENCIL_ATTACHMENT) {
            return ImageLayout::DepthStencilAttachmentOptimal;
        }
        if usage.contains(ImageUsageBit::TRANSFER_DST) {
            return ImageLayout::TransferDstOptimal;
        }
        if usage.contains(ImageUsageBit::STORAGE) {
            return ImageLayout::General;
        }
        if usage.contains(ImageUsageBit::SAMPLED) {
            return ImageLayout::ShaderReadOnlyOptimal;
        }
        ImageLayout::General
    }
}

/// Resource state an image reaches in `layout` when accessed with `access`.
///
/// `Undefined` has no state of its own and yields `None`; callers substitute
/// the tracked state.
pub fn image_state_for(layout: ImageLayout, access: AccessBit) -> Option<ResourceState> {
    let state = match layout {
        ImageLayout::Undefined => return None,
        ImageLayout::General => {
            if access.intersects(AccessBit::SHADER_READ | AccessBit::SHADER_WRITE) {
                ResourceState::UNORDERED_ACCESS
            } else {
                ResourceState::COMMON
            }
        }
        ImageLayout::ColourAttachmentOptimal => ResourceState::RENDER_TARGET,
        ImageLayout::DepthStencilAttachmentOptimal => ResourceState::DEPTH_WRITE,
        ImageLayout::DepthStencilReadOnlyOptimal => {
            if access.contains(AccessBit::SHADER_READ) {
                ResourceState::DEPTH_READ | ResourceState::SHADER_RESOURCE
            } else {
                ResourceState::DEPTH_READ
            }
        }
        ImageLayout::ShaderReadOnlyOptimal => ResourceState::SHADER_RESOURCE,
        ImageLayout::TransferSrcOptimal => ResourceState::COPY_SOURCE,
        ImageLayout::TransferDstOptimal => ResourceState::COPY_DEST,
        ImageLayout::Preinitialised => ResourceState::COMMON,
        ImageLayout::PresentSrc => ResourceState::PRESENT,
    };
    Some(state)
}

const READ_ACCESS_TO_STATE: &[(AccessBit, ResourceState)] = &[
    (
        AccessBit::VERTEX_ATTRIBUTE_READ,
        ResourceState::VERTEX_AND_CONSTANT_BUFFER,
    ),
    (
        AccessBit::UNIFORM_READ,
        ResourceState::VERTEX_AND_CONSTANT_BUFFER,
    ),
    (AccessBit::INDEX_READ, ResourceState::INDEX_BUFFER),
    (
        AccessBit::INDIRECT_COMMAND_READ,
        ResourceState::INDIRECT_ARGUMENT,
    ),
    (AccessBit::SHADER_READ, ResourceState::SHADER_RESOURCE),
    (AccessBit::TRANSFER_READ, ResourceState::COPY_SOURCE),
    (
        AccessBit::ACCELERATION_STRUCTURE_READ,
        ResourceState::ACCELERATION_STRUCTURE,
    ),
];

/// Resource state a buffer reaches when accessed with `access`.
///
/// A write decides the state on its own; reads combine.
pub fn buffer_state_for(access: AccessBit) -> ResourceState {
    if access.contains(AccessBit::ACCELERATION_STRUCTURE_WRITE) {
        return ResourceState::ACCELERATION_STRUCTURE;
    }
    if access.contains(AccessBit::SHADER_WRITE) {
        return ResourceState::UNORDERED_ACCESS;
    }
    if access.contains(AccessBit::TRANSFER_WRITE) {
        return ResourceState::COPY_DEST;
    }
    READ_ACCESS_TO_STATE
        .iter()
        .filter(|(a, _)| access.intersects(*a))
        .fold(ResourceState::COMMON, |acc, (_, s)| acc | *s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_layouts_allow_no_writes() {
        for layout in [
            ImageLayout::ShaderReadOnlyOptimal,
            ImageLayout::TransferSrcOptimal,
            ImageLayout::DepthStencilReadOnlyOptimal,
            ImageLayout::PresentSrc,
        ] {
            assert!(layout.is_read_only());
            assert!(layout.writable_access().is_empty());
        }
        assert_eq!(
            ImageLayout::TransferDstOptimal.writable_access(),
            AccessBit::TRANSFER_WRITE
        );
    }

    #[test]
    fn layout_usage_requirements() {
        assert!(!ImageLayout::ColourAttachmentOptimal.allowed_by(ImageUsageBit::SAMPLED));
        assert!(ImageLayout::ColourAttachmentOptimal
            .allowed_by(ImageUsageBit::SAMPLED | ImageUsageBit::COLOUR_ATTACHMENT));
        assert!(ImageLayout::General.allowed_by(ImageUsageBit::empty()));
        assert!(ImageLayout::ShaderReadOnlyOptimal.allowed_by(ImageUsageBit::INPUT_ATTACHMENT));
    }

    #[test]
    fn image_states_follow_layout() {
        assert_eq!(image_state_for(ImageLayout::Undefined, AccessBit::empty()), None);
        assert_eq!(
            image_state_for(ImageLayout::TransferDstOptimal, AccessBit::TRANSFER_WRITE),
            Some(ResourceState::COPY_DEST)
        );
        assert_eq!(
            image_state_for(ImageLayout::ShaderReadOnlyOptimal, AccessBit::SHADER_READ),
            Some(ResourceState::PIXEL_SHADER_RESOURCE | ResourceState::NON_PIXEL_SHADER_RESOURCE)
        );
        assert_eq!(
            image_state_for(ImageLayout::General, AccessBit::SHADER_WRITE),
            Some(ResourceState::UNORDERED_ACCESS)
        );
        assert_eq!(
            image_state_for(ImageLayout::General, AccessBit::TRANSFER_READ),
            Some(ResourceState::COMMON)
        );
    }

    #[test]
    fn buffer_writes_win_over_reads() {
        assert_eq!(
            buffer_state_for(AccessBit::TRANSFER_WRITE | AccessBit::SHADER_READ),
            ResourceState::COPY_DEST
        );
        assert_eq!(
            buffer_state_for(AccessBit::INDEX_READ | AccessBit::VERTEX_ATTRIBUTE_READ),
            ResourceState::INDEX_BUFFER | ResourceState::VERTEX_AND_CONSTANT_BUFFER
        );
        assert_eq!(buffer_state_for(AccessBit::empty()), ResourceState::COMMON);
    }

    #[test]
    fn copy_queue_legality() {
        assert!(ResourceState::COMMON.is_copy_legal());
        assert!(ResourceState::COPY_DEST.is_copy_legal());
        assert!(!ResourceState::RENDER_TARGET.is_copy_legal());
        assert!(!(ResourceState::COPY_SOURCE | ResourceState::SHADER_RESOURCE).is_copy_legal());
    }
}
