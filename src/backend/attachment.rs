// Render target attachments - multisample colour and depth
//
// Both targets are sized to the swapchain and rebuilt with it. Each owns one
// image, one dedicated device-local allocation and one view.

use anyhow::{Context, Result};
use ash::vk;

use super::api::{ImageDesc, ImageViewDesc, InstanceApi};
use super::device::LogicalDevice;
use super::owned::Owned;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Colour,
    Depth,
}

impl AttachmentKind {
    fn usage(self) -> vk::ImageUsageFlags {
        match self {
            Self::Colour => {
                vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT
            }
            Self::Depth => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        }
    }

    fn aspect(self, format: vk::Format) -> vk::ImageAspectFlags {
        match self {
            Self::Colour => vk::ImageAspectFlags::COLOR,
            Self::Depth if has_stencil(format) => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            Self::Depth => vk::ImageAspectFlags::DEPTH,
        }
    }
}

pub struct Attachment {
    // Drop order: view, image, memory
    view: Owned<vk::ImageView>,
    _image: Owned<vk::Image>,
    _memory: Owned<vk::DeviceMemory>,
    pub format: vk::Format,
}

impl Attachment {
    pub fn new(
        device: &LogicalDevice,
        kind: AttachmentKind,
        format: vk::Format,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        let api = device.api();

        let image = api
            .create_image(&ImageDesc {
                format,
                extent,
                samples,
                usage: kind.usage(),
            })
            .with_context(|| format!("Failed to create {kind:?} attachment image"))?;
        let image = Owned::new(api, image);

        let requirements = api.image_memory_requirements(image.handle());
        let alloc_info =
            device.memory_alloc_info(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL);

        let memory = api
            .allocate_memory(&alloc_info)
            .with_context(|| format!("Failed to allocate {kind:?} attachment memory"))?;
        let memory = Owned::new(api, memory);

        api.bind_image_memory(image.handle(), memory.handle(), 0)
            .with_context(|| format!("Failed to bind {kind:?} attachment memory"))?;

        let view = api
            .create_image_view(&ImageViewDesc {
                image: image.handle(),
                format,
                aspect: kind.aspect(format),
            })
            .with_context(|| format!("Failed to create {kind:?} attachment view"))?;
        let view = Owned::new(api, view);

        Ok(Self {
            view,
            _image: image,
            _memory: memory,
            format,
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }
}

/// Format and sample count shared by every rebuild of the attachments.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentFormats {
    pub colour: vk::Format,
    pub depth: vk::Format,
    pub samples: vk::SampleCountFlags,
}

/// The multisample colour target and the depth target, rebuilt together.
pub struct Attachments {
    pub colour: Attachment,
    pub depth: Attachment,
}

impl Attachments {
    pub fn new(
        device: &LogicalDevice,
        formats: &AttachmentFormats,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        log::debug!(
            "Creating attachments {}x{}: colour={:?} depth={:?} samples={:?}",
            extent.width,
            extent.height,
            formats.colour,
            formats.depth,
            formats.samples
        );

        Ok(Self {
            colour: Attachment::new(
                device,
                AttachmentKind::Colour,
                formats.colour,
                extent,
                formats.samples,
            )?,
            depth: Attachment::new(
                device,
                AttachmentKind::Depth,
                formats.depth,
                extent,
                formats.samples,
            )?,
        })
    }
}

/// First candidate usable as an optimally tiled depth/stencil attachment,
/// else the first candidate.
pub fn choose_depth_format(
    instance: &dyn InstanceApi,
    physical_device: vk::PhysicalDevice,
) -> vk::Format {
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| {
            instance
                .format_properties(physical_device, format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .unwrap_or(DEPTH_FORMAT_CANDIDATES[0])
}

/// Highest sample count usable for both colour and depth framebuffers.
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;

    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}
