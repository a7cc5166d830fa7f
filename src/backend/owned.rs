// Scoped ownership for device objects
//
// An `Owned<T>` destroys its handle through the device that created it when
// dropped. Teardown order therefore follows struct field order instead of a
// hand-written cleanup routine.

use ash::vk;
use std::fmt;
use std::sync::Arc;

use super::api::{DeviceApi, InstanceApi};

/// A device object that can be destroyed through `DeviceApi`.
pub trait DeviceResource: Copy + fmt::Debug {
    fn destroy(self, device: &dyn DeviceApi);
}

macro_rules! device_resource {
    ($($ty:ty => $destroy:ident),* $(,)?) => {
        $(
            impl DeviceResource for $ty {
                fn destroy(self, device: &dyn DeviceApi) {
                    device.$destroy(self);
                }
            }
        )*
    };
}

device_resource! {
    vk::Image => destroy_image,
    vk::ImageView => destroy_image_view,
    vk::DeviceMemory => free_memory,
    vk::SwapchainKHR => destroy_swapchain,
    vk::RenderPass => destroy_render_pass,
    vk::Framebuffer => destroy_framebuffer,
    vk::CommandPool => destroy_command_pool,
    vk::PipelineCache => destroy_pipeline_cache,
    vk::Semaphore => destroy_semaphore,
    vk::Fence => destroy_fence,
}

/// Exclusive owner of one device object.
pub struct Owned<T: DeviceResource> {
    handle: T,
    device: Arc<dyn DeviceApi>,
}

impl<T: DeviceResource> Owned<T> {
    pub fn new(device: &Arc<dyn DeviceApi>, handle: T) -> Self {
        Self {
            handle,
            device: Arc::clone(device),
        }
    }

    pub fn handle(&self) -> T {
        self.handle
    }
}

impl<T: DeviceResource> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}

impl<T: DeviceResource> Drop for Owned<T> {
    fn drop(&mut self) {
        self.handle.destroy(self.device.as_ref());
    }
}

/// Window surface, destroyed through the instance that owns it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    instance: Arc<dyn InstanceApi>,
}

impl Surface {
    pub fn new(instance: &Arc<dyn InstanceApi>, handle: vk::SurfaceKHR) -> Self {
        Self {
            handle,
            instance: Arc::clone(instance),
        }
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("Destroying surface");
        self.instance.destroy_surface(self.handle);
    }
}
