// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// A swapchain is replaced, never mutated: recreation builds a new chain from
// the old one and the caller drops the old one afterwards.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::api::{DeviceApi, ImageViewDesc, InstanceApi, SwapchainDesc};
use super::device::LogicalDevice;
use super::owned::{Owned, Surface};
use super::selector::QueueFamilyIndices;

/// What the caller wants from the next swapchain.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainRequest {
    pub surface_format: vk::SurfaceFormatKHR,
    pub vsync: bool,
    /// Used only when the surface leaves the extent to the application.
    pub window_extent: vk::Extent2D,
}

/// Result of `acquire_next_image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Image(u32),
    /// An image was acquired (and its semaphore will signal) but the chain
    /// no longer matches the surface.
    Suboptimal(u32),
    OutOfDate,
}

pub struct Swapchain {
    // Views go before the chain they were created from
    views: Vec<Owned<vk::ImageView>>,
    handle: Owned<vk::SwapchainKHR>,
    images: Vec<vk::Image>,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    device: Arc<dyn DeviceApi>,
}

impl Swapchain {
    /// Negotiate and create a swapchain for `surface`.
    ///
    /// `previous` is handed to the driver for resource reuse; the caller
    /// drops it once this returns. Returns `None` when the surface currently
    /// has a zero-sized extent (minimised window).
    pub fn new(
        instance: &dyn InstanceApi,
        device: &LogicalDevice,
        surface: &Surface,
        request: &SwapchainRequest,
        previous: Option<&Swapchain>,
    ) -> Result<Option<Self>> {
        let physical_device = device.physical.handle;

        let caps = instance
            .surface_capabilities(physical_device, surface.handle())
            .context("Failed to query surface capabilities")?;
        let present_modes = instance
            .surface_present_modes(physical_device, surface.handle())
            .context("Failed to query present modes")?;

        let extent = choose_extent(&caps, request.window_extent);
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Surface extent is {}x{}, deferring swapchain", extent.width, extent.height);
            return Ok(None);
        }

        let present_mode = choose_present_mode(&present_modes, request.vsync);
        let image_count = choose_image_count(&caps);
        let (sharing_mode, queue_family_indices) = sharing(device.physical.queue_families);

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            image_count,
            present_mode,
            sharing_mode
        );

        let desc = SwapchainDesc {
            surface: surface.handle(),
            min_image_count: image_count,
            surface_format: request.surface_format,
            extent,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            sharing_mode,
            queue_family_indices,
            // The surface's own transform is authoritative
            pre_transform: caps.current_transform,
            present_mode,
            old_swapchain: previous.map_or(vk::SwapchainKHR::null(), |p| p.handle()),
        };

        let api = device.api();
        let handle = api
            .create_swapchain(&desc)
            .context("Failed to create swapchain")?;
        let handle = Owned::new(api, handle);

        let images = api
            .swapchain_images(handle.handle())
            .context("Failed to get swapchain images")?;

        let views = images
            .iter()
            .map(|&image| {
                let view = api
                    .create_image_view(&ImageViewDesc {
                        image,
                        format: request.surface_format.format,
                        aspect: vk::ImageAspectFlags::COLOR,
                    })
                    .context("Failed to create image view")?;
                Ok(Owned::new(api, view))
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!("Created swapchain with {} images", images.len());

        Ok(Some(Self {
            views,
            handle,
            images,
            surface_format: request.surface_format,
            extent,
            present_mode,
            device: Arc::clone(api),
        }))
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle.handle()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> impl ExactSizeIterator<Item = vk::ImageView> + '_ {
        self.views.iter().map(Owned::handle)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> Result<Acquired> {
        match self
            .device
            .acquire_next_image(self.handle(), timeout, semaphore)
        {
            Ok((index, false)) => Ok(Acquired::Image(index)),
            Ok((index, true)) => Ok(Acquired::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen. Returns `true` when the swapchain
    /// must be recreated.
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait: vk::Semaphore) -> Result<bool> {
        match self
            .device
            .queue_present(queue, self.handle(), image_index, wait)
        {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}

/// Prefer B8G8R8A8_SRGB with a non-linear sRGB colour space, otherwise take
/// whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Choose present mode
///
/// MAILBOX: no vsync, no tearing, lowest latency without blocking
/// IMMEDIATE: no vsync, may tear
/// FIFO: vsync, the only mode every driver must support
pub fn choose_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// One more than the minimum, clamped to the maximum (0 means no limit).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// The surface's current extent, unless it reports the `u32::MAX` sentinel.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// CONCURRENT across both families when they differ, so images never need
/// an ownership transfer between graphics and present queues.
fn sharing(families: QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}
