// Render pass and framebuffers
//
// One subpass renders into a multisampled colour target and a depth target;
// the colour target is resolved into the swapchain image at the end of the
// subpass. Attachment indices:
//   0 - multisample colour
//   1 - depth
//   2 - resolve / present target

use anyhow::{Context, Result};
use ash::vk;

use super::api::RenderPassLayout;
use super::attachment::Attachments;
use super::device::LogicalDevice;
use super::owned::Owned;
use super::swapchain::Swapchain;

impl RenderPassLayout {
    pub fn new(
        colour_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Self {
        // Multisampled colour, resolved away at the end of the subpass
        let colour = vk::AttachmentDescription::default()
            .format(colour_format)
            .samples(samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let depth = vk::AttachmentDescription::default()
            .format(depth_format)
            .samples(samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        // Fully overwritten by the resolve, so its old contents don't matter
        let resolve = vk::AttachmentDescription::default()
            .format(colour_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let colour_access =
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;

        let dependencies = [
            // Wait for the presentation engine to finish reading before we write
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
                .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags::MEMORY_READ)
                .dst_access_mask(colour_access)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
            // Make colour writes available before presentation reads the image
            vk::SubpassDependency::default()
                .src_subpass(0)
                .dst_subpass(vk::SUBPASS_EXTERNAL)
                .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .dst_stage_mask(vk::PipelineStageFlags::BOTTOM_OF_PIPE)
                .src_access_mask(colour_access)
                .dst_access_mask(vk::AccessFlags::MEMORY_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        ];

        Self {
            attachments: [colour, depth, resolve],
            color: vk::AttachmentReference {
                attachment: 0,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
            depth: vk::AttachmentReference {
                attachment: 1,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            },
            resolve: vk::AttachmentReference {
                attachment: 2,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            },
            dependencies,
        }
    }
}

pub struct RenderPass {
    handle: Owned<vk::RenderPass>,
    pub layout: RenderPassLayout,
}

impl RenderPass {
    pub fn new(device: &LogicalDevice, layout: RenderPassLayout) -> Result<Self> {
        let handle = device
            .api()
            .create_render_pass(&layout)
            .context("Failed to create render pass")?;

        Ok(Self {
            handle: Owned::new(device.api(), handle),
            layout,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle.handle()
    }
}

/// One framebuffer per swapchain image: `[colour, depth, swapchain view]`.
pub fn create_framebuffers(
    device: &LogicalDevice,
    render_pass: &RenderPass,
    attachments: &Attachments,
    swapchain: &Swapchain,
) -> Result<Vec<Owned<vk::Framebuffer>>> {
    swapchain
        .views()
        .map(|view| {
            let views = [attachments.colour.view(), attachments.depth.view(), view];
            let framebuffer = device
                .api()
                .create_framebuffer(render_pass.handle(), &views, swapchain.extent)
                .context("Failed to create framebuffer")?;
            Ok(Owned::new(device.api(), framebuffer))
        })
        .collect()
}
