// Backend module - Vulkan abstraction layer
//
// Design: policy code (selection, swapchain negotiation, attachments, frame
// sync) is written against the `api` traits; `vulkan` is the only module
// that touches ash directly.

pub mod api;
pub mod attachment;
pub mod device;
pub mod owned;
pub mod render_pass;
pub mod selector;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

#[cfg(test)]
pub mod mock;

pub use device::LogicalDevice;
pub use owned::{Owned, Surface};
pub use swapchain::Swapchain;
pub use vulkan::{VulkanDevice, VulkanInstance};
