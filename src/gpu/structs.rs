use bitflags::bitflags;
#[cfg(feature = "nori-serde")]
use serde::{Deserialize, Serialize};

#[repr(C)]
#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub enum QueueType {
    #[default]
    Graphics,
    Compute,
    Transfer,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Transfer];

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

#[repr(C)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub enum Format {
    R8Unorm,
    R8Uint,
    RG8Unorm,
    #[default]
    RGBA8Unorm,
    RGBA8Srgb,
    BGRA8Unorm,
    BGRA8Srgb,
    RGBA16Float,
    RGBA32Float,
    R32Float,
    D16Unorm,
    D32Float,
    D24UnormS8Uint,
    D32FloatS8Uint,
}

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AspectMask: u32 {
        const COLOUR = 0x1;
        const DEPTH = 0x2;
        const STENCIL = 0x4;
    }
}

impl Format {
    /// Aspects an image of this format exposes to barriers and views.
    pub fn aspects(self) -> AspectMask {
        match self {
            Format::D16Unorm | Format::D32Float => AspectMask::DEPTH,
            Format::D24UnormS8Uint | Format::D32FloatS8Uint => {
                AspectMask::DEPTH | AspectMask::STENCIL
            }
            _ => AspectMask::COLOUR,
        }
    }

    /// Number of channels stored per texel.
    pub fn components(self) -> u32 {
        match self {
            Format::R8Unorm
            | Format::R8Uint
            | Format::R32Float
            | Format::D16Unorm
            | Format::D32Float => 1,
            Format::RG8Unorm | Format::D24UnormS8Uint | Format::D32FloatS8Uint => 2,
            Format::RGBA8Unorm
            | Format::RGBA8Srgb
            | Format::BGRA8Unorm
            | Format::BGRA8Srgb
            | Format::RGBA16Float
            | Format::RGBA32Float => 4,
        }
    }

    pub fn is_depth_stencil(self) -> bool {
        !self.aspects().contains(AspectMask::COLOUR)
    }
}

#[repr(C)]
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub struct Extent3D {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Default for Extent3D {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth: 1,
        }
    }
}

/// Mip levels and array layers touched by an image barrier.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub level_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl Default for SubresourceRange {
    fn default() -> Self {
        Self {
            base_mip: Default::default(),
            level_count: 1,
            base_layer: Default::default(),
            layer_count: 1,
        }
    }
}

impl SubresourceRange {
    pub fn new(base_mip: u32, level_count: u32, base_layer: u32, layer_count: u32) -> Self {
        Self {
            base_mip,
            level_count,
            base_layer,
            layer_count,
        }
    }

    /// Range covering every mip and layer of an image.
    pub fn whole(mip_levels: u32, array_layers: u32) -> Self {
        Self::new(0, mip_levels, 0, array_layers)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub enum PipelineBindPoint {
    #[default]
    Graphics,
    Compute,
    RayTracing,
}

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
    pub struct CommandPoolFlags: u32 {
        const TRANSIENT = 0x1;
        const RESET_COMMAND_BUFFER = 0x2;
        const PROTECTED = 0x4;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
pub enum CommandBufferLevel {
    #[default]
    Primary,
    Secondary,
}

bitflags! {
    #[repr(transparent)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "nori-serde", derive(Serialize, Deserialize))]
    pub struct CommandBufferUsageBit: u32 {
        const ONE_TIME_SUBMIT = 0x1;
        const RENDER_PASS_CONTINUE = 0x2;
        const SIMULTANEOUS = 0x4;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Draw {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl Default for Draw {
    fn default() -> Self {
        Self {
            vertex_count: 0,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DrawIndexed {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

impl Default for DrawIndexed {
    fn default() -> Self {
        Self {
            index_count: 0,
            instance_count: 1,
            first_index: 0,
            vertex_offset: 0,
            first_instance: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_count_every_channel() {
        assert_eq!(Format::R8Unorm.components(), 1);
        assert_eq!(Format::RG8Unorm.components(), 2);
        assert_eq!(Format::BGRA8Srgb.components(), 4);
        assert_eq!(Format::RGBA32Float.components(), 4);
        assert_eq!(Format::D24UnormS8Uint.components(), 2);
    }

    #[test]
    fn depth_formats_have_no_colour_aspect() {
        assert!(Format::D32Float.is_depth_stencil());
        assert_eq!(
            Format::D32FloatS8Uint.aspects(),
            AspectMask::DEPTH | AspectMask::STENCIL
        );
        assert_eq!(Format::RGBA8Unorm.aspects(), AspectMask::COLOUR);
    }

    #[test]
    fn whole_range_spans_all_subresources() {
        let r = SubresourceRange::whole(4, 6);
        assert_eq!(r.base_mip, 0);
        assert_eq!(r.level_count, 4);
        assert_eq!(r.layer_count, 6);
    }
}
