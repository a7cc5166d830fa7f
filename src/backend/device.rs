// Logical device - queues, command pool, pipeline cache
//
// Responsibilities:
// - Physical device selection (delegated to `selector`)
// - Logical device + queue creation (one queue per family)
// - Command pool and pipeline cache
// - Memory type lookup and one-shot command submission

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::api::{DeviceApi, DeviceDesc, InstanceApi, Submission};
use super::owned::{Owned, Surface};
use super::selector::{self, QueueFamilyIndices};

/// Device extensions the renderer cannot run without
pub const REQUIRED_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Selected GPU and the metadata cached at selection time.
#[derive(Debug, Clone, Copy)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    pub fn name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_string())
    }
}

/// Logical device wrapper with automatic cleanup.
///
/// Field order is teardown order: the pipeline cache and command pool are
/// released before the last reference to the device itself.
pub struct LogicalDevice {
    pipeline_cache: Owned<vk::PipelineCache>,
    command_pool: Owned<vk::CommandPool>,
    api: Arc<dyn DeviceApi>,

    pub physical: PhysicalDeviceInfo,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

impl LogicalDevice {
    /// Select a GPU for `surface` and create the logical device on it.
    ///
    /// `layers` is the explicit validation layer list (empty in release
    /// configurations).
    pub fn initialise(
        instance: &dyn InstanceApi,
        surface: &Surface,
        layers: &[CString],
    ) -> Result<Self> {
        let selection =
            selector::select_physical_device(instance, surface.handle(), REQUIRED_EXTENSIONS)?;
        let physical_device = selection.physical_device;
        let queue_families = selection
            .queue_families
            .context("Selected GPU has no graphics or present queue family")?;

        let physical = PhysicalDeviceInfo {
            handle: physical_device,
            properties: instance.properties(physical_device),
            memory_properties: instance.memory_properties(physical_device),
            features: instance.features(physical_device),
            queue_families,
        };

        if selection.suitable {
            log::info!("Selected GPU: {}", physical.name());
        } else {
            log::warn!("Using fallback GPU: {}", physical.name());
        }
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(physical.properties.api_version),
            vk::api_version_minor(physical.properties.api_version),
            vk::api_version_patch(physical.properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        let desc = DeviceDesc {
            queue_families: queue_families.unique(),
            extensions: REQUIRED_EXTENSIONS.iter().map(|&n| n.to_owned()).collect(),
            layers: layers.to_vec(),
            features: vk::PhysicalDeviceFeatures {
                sample_rate_shading: physical.features.sample_rate_shading,
                ..Default::default()
            },
        };

        let api = instance
            .create_device(physical_device, &desc)
            .context("Failed to create logical device")?;

        let graphics_queue = api.queue(queue_families.graphics, 0);
        let present_queue = api.queue(queue_families.present, 0);

        // TRANSIENT: command buffers are re-recorded every frame
        // RESET: allow individual buffer reset
        let command_pool = api
            .create_command_pool(
                queue_families.graphics,
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
            .context("Failed to create command pool")?;
        let command_pool = Owned::new(&api, command_pool);

        let pipeline_cache = api
            .create_pipeline_cache()
            .context("Failed to create pipeline cache")?;
        let pipeline_cache = Owned::new(&api, pipeline_cache);

        Ok(Self {
            pipeline_cache,
            command_pool,
            api,
            physical,
            graphics_queue,
            present_queue,
        })
    }

    pub fn api(&self) -> &Arc<dyn DeviceApi> {
        &self.api
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool.handle()
    }

    pub fn pipeline_cache(&self) -> vk::PipelineCache {
        self.pipeline_cache.handle()
    }

    /// Allocation info for `requirements` from the first memory type that
    /// is allowed and has every flag in `properties`. Falls back to type 0.
    pub fn memory_alloc_info(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> vk::MemoryAllocateInfo<'static> {
        let memory_type_index = find_memory_type(
            &self.physical.memory_properties,
            requirements.memory_type_bits,
            properties,
        )
        .unwrap_or_else(|| {
            log::warn!("No memory type matches {:?}, using type 0", properties);
            0
        });

        vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index)
    }

    pub fn allocate_command_buffers(
        &self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        self.api
            .allocate_command_buffers(self.command_pool(), level, count)
            .context("Failed to allocate command buffers")
    }

    /// Allocate one command buffer, optionally opening a one-shot recording.
    pub fn create_command_buffer(
        &self,
        level: vk::CommandBufferLevel,
        begin: bool,
    ) -> Result<vk::CommandBuffer> {
        let command_buffer = self
            .allocate_command_buffers(level, 1)?
            .into_iter()
            .next()
            .context("Driver returned no command buffer")?;

        if begin {
            self.api
                .begin_command_buffer(
                    command_buffer,
                    vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                )
                .context("Failed to begin command buffer")?;
        }

        Ok(command_buffer)
    }

    /// End `command_buffer`, submit it to `queue` and block until it has
    /// executed. Not for use in the frame loop.
    pub fn flush_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        queue: vk::Queue,
        free: bool,
    ) -> Result<()> {
        self.api
            .end_command_buffer(command_buffer)
            .context("Failed to end command buffer")?;

        let fence = Owned::new(&self.api, self.api.create_fence(false)?);
        let command_buffers = [command_buffer];
        let submission = Submission {
            command_buffers: &command_buffers,
            ..Default::default()
        };

        self.api
            .queue_submit(queue, &submission, fence.handle())
            .context("Failed to submit command buffer")?;
        self.api.wait_for_fence(fence.handle(), u64::MAX)?;
        drop(fence);

        if free {
            self.api
                .free_command_buffers(self.command_pool(), &command_buffers);
        }

        Ok(())
    }

    /// `flush_command_buffer` on the graphics queue.
    pub fn flush_command_buffer_graphics(
        &self,
        command_buffer: vk::CommandBuffer,
        free: bool,
    ) -> Result<()> {
        self.flush_command_buffer(command_buffer, self.graphics_queue, free)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        self.api.wait_idle().context("Failed to wait for device idle")
    }

    /// Destroy pipeline cache, command pool, then the device.
    pub fn shutdown(self) {
        log::info!("Destroying logical device...");
        drop(self);
    }
}

/// Find a suitable memory type index
fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);
        has_type && has_properties
    })
}
