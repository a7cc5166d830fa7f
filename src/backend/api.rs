// Driver seam - the Vulkan calls the core is allowed to make
//
// Everything above this module talks to the GPU through these two traits.
// `vulkan.rs` implements them with ash; the unit tests implement them with
// a recording mock. Requests are plain descriptors so the policy code never
// builds raw create-info structs itself.

use ash::prelude::VkResult;
use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

/// Instance-level queries plus logical device creation.
pub trait InstanceApi {
    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>>;

    /// Names of the device extensions the physical device reports.
    fn device_extension_names(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<String>>;

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties>;

    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        surface: vk::SurfaceKHR,
    ) -> VkResult<bool>;

    fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>>;

    fn surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>>;

    fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR>;

    fn properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties;

    fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties;

    fn features(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures;

    fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties;

    /// Create the logical device. The returned handle destroys the device
    /// when the last reference is dropped.
    fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        desc: &DeviceDesc,
    ) -> VkResult<Arc<dyn DeviceApi>>;

    fn destroy_surface(&self, surface: vk::SurfaceKHR);
}

/// Device-level object management, queue work and presentation.
///
/// Every handle passed in must have been created by the same device.
pub trait DeviceApi {
    fn queue(&self, family: u32, index: u32) -> vk::Queue;
    fn wait_idle(&self) -> VkResult<()>;

    // Images and memory
    fn create_image(&self, desc: &ImageDesc) -> VkResult<vk::Image>;
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory>;
    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    fn create_image_view(&self, desc: &ImageViewDesc) -> VkResult<vk::ImageView>;

    // Swapchain
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    /// Returns `(image_index, suboptimal)`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    /// Returns `true` when the swapchain is suboptimal.
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool>;

    // Render pass and framebuffers
    fn create_render_pass(&self, layout: &RenderPassLayout) -> VkResult<vk::RenderPass>;
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer>;

    // Commands
    fn create_command_pool(
        &self,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool>;
    fn create_pipeline_cache(&self) -> VkResult<vk::PipelineCache>;
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);

    // Synchronization
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn queue_submit(
        &self,
        queue: vk::Queue,
        submission: &Submission<'_>,
        fence: vk::Fence,
    ) -> VkResult<()>;

    // Destruction (called by `Owned<T>`)
    fn destroy_image(&self, image: vk::Image);
    fn destroy_image_view(&self, view: vk::ImageView);
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache);
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn destroy_fence(&self, fence: vk::Fence);
}

/// Logical device request.
#[derive(Debug, Clone, Default)]
pub struct DeviceDesc {
    /// One queue is created per listed family; families are unique.
    pub queue_families: Vec<u32>,
    pub extensions: Vec<CString>,
    pub layers: Vec<CString>,
    pub features: vk::PhysicalDeviceFeatures,
}

/// Swapchain request, already resolved against the surface capabilities.
#[derive(Debug, Clone)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub image_usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    /// Empty for EXCLUSIVE sharing.
    pub queue_family_indices: Vec<u32>,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

/// Single-mip, single-layer 2D image with optimal tiling.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
}

/// 2D view over mip 0 / layer 0 with identity swizzle.
#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    pub image: vk::Image,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
}

/// One graphics subpass with a colour, a depth and a resolve attachment.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassLayout {
    pub attachments: [vk::AttachmentDescription; 3],
    pub color: vk::AttachmentReference,
    pub depth: vk::AttachmentReference,
    pub resolve: vk::AttachmentReference,
    pub dependencies: [vk::SubpassDependency; 2],
}

/// A single batch for `queue_submit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Submission<'a> {
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub command_buffers: &'a [vk::CommandBuffer],
    pub signal_semaphores: &'a [vk::Semaphore],
}
