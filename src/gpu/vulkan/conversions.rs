use ash::vk;

use crate::gpu::{
    AccessBit, AspectMask, BufferCopy, CommandBufferUsageBit, CommandPoolFlags, DependencyBit,
    Format, ImageLayout, IndexType, PipelineBindPoint, PipelineStageBit, SubresourceRange,
};

// The bitflag types share the Vulkan bit encodings.

impl From<AccessBit> for vk::AccessFlags {
    fn from(value: AccessBit) -> Self {
        vk::AccessFlags::from_raw(value.bits())
    }
}

impl From<PipelineStageBit> for vk::PipelineStageFlags {
    fn from(value: PipelineStageBit) -> Self {
        vk::PipelineStageFlags::from_raw(value.bits())
    }
}

impl From<DependencyBit> for vk::DependencyFlags {
    fn from(value: DependencyBit) -> Self {
        vk::DependencyFlags::from_raw(value.bits())
    }
}

impl From<CommandPoolFlags> for vk::CommandPoolCreateFlags {
    fn from(value: CommandPoolFlags) -> Self {
        vk::CommandPoolCreateFlags::from_raw(value.bits())
    }
}

impl From<CommandBufferUsageBit> for vk::CommandBufferUsageFlags {
    fn from(value: CommandBufferUsageBit) -> Self {
        vk::CommandBufferUsageFlags::from_raw(value.bits())
    }
}

impl From<AspectMask> for vk::ImageAspectFlags {
    fn from(value: AspectMask) -> Self {
        let mut flags = vk::ImageAspectFlags::empty();
        if value.contains(AspectMask::COLOUR) {
            flags |= vk::ImageAspectFlags::COLOR;
        }
        if value.contains(AspectMask::DEPTH) {
            flags |= vk::ImageAspectFlags::DEPTH;
        }
        if value.contains(AspectMask::STENCIL) {
            flags |= vk::ImageAspectFlags::STENCIL;
        }
        flags
    }
}

impl From<ImageLayout> for vk::ImageLayout {
    fn from(value: ImageLayout) -> Self {
        match value {
            ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
            ImageLayout::General => vk::ImageLayout::GENERAL,
            ImageLayout::ColourAttachmentOptimal => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageLayout::DepthStencilAttachmentOptimal => {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            }
            ImageLayout::DepthStencilReadOnlyOptimal => {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            }
            ImageLayout::ShaderReadOnlyOptimal => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageLayout::TransferSrcOptimal => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageLayout::TransferDstOptimal => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::Preinitialised => vk::ImageLayout::PREINITIALIZED,
            ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

impl From<Format> for vk::Format {
    fn from(value: Format) -> Self {
        match value {
            Format::R8Unorm => vk::Format::R8_UNORM,
            Format::R8Uint => vk::Format::R8_UINT,
            Format::RG8Unorm => vk::Format::R8G8_UNORM,
            Format::RGBA8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::RGBA8Srgb => vk::Format::R8G8B8A8_SRGB,
            Format::BGRA8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::BGRA8Srgb => vk::Format::B8G8R8A8_SRGB,
            Format::RGBA16Float => vk::Format::R16G16B16A16_SFLOAT,
            Format::RGBA32Float => vk::Format::R32G32B32A32_SFLOAT,
            Format::R32Float => vk::Format::R32_SFLOAT,
            Format::D16Unorm => vk::Format::D16_UNORM,
            Format::D32Float => vk::Format::D32_SFLOAT,
            Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
            Format::D32FloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
        }
    }
}

/// Inverse of the `Format` conversion for the formats a surface may report.
pub(crate) fn format_from_vk(format: vk::Format) -> Option<Format> {
    Some(match format {
        vk::Format::B8G8R8A8_SRGB => Format::BGRA8Srgb,
        vk::Format::B8G8R8A8_UNORM => Format::BGRA8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::RGBA8Srgb,
        vk::Format::R8G8B8A8_UNORM => Format::RGBA8Unorm,
        vk::Format::R16G16B16A16_SFLOAT => Format::RGBA16Float,
        _ => return None,
    })
}

impl From<IndexType> for vk::IndexType {
    fn from(value: IndexType) -> Self {
        match value {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        }
    }
}

impl From<PipelineBindPoint> for vk::PipelineBindPoint {
    fn from(value: PipelineBindPoint) -> Self {
        match value {
            PipelineBindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
            PipelineBindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
            PipelineBindPoint::RayTracing => vk::PipelineBindPoint::RAY_TRACING_KHR,
        }
    }
}

impl From<BufferCopy> for vk::BufferCopy {
    fn from(value: BufferCopy) -> Self {
        vk::BufferCopy {
            src_offset: value.src_offset,
            dst_offset: value.dst_offset,
            size: value.size,
        }
    }
}

pub(crate) fn subresource_range(format: Format, range: SubresourceRange) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: format.aspects().into(),
        base_mip_level: range.base_mip,
        level_count: range.level_count,
        base_array_layer: range.base_layer,
        layer_count: range.layer_count,
    }
}
