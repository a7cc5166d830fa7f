// Recording mock GPU for the unit tests
//
// Implements both driver traits against an in-memory world: handles are
// fabricated, live objects are tracked, fences move through
// unsignalled -> pending -> signalled (a pending fence completes when it is
// waited on or on device idle), and binary semaphores must be signalled
// before they are waited on. Misuse that a real driver would turn into
// undefined behaviour panics or is recorded in `violations`.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::api::{
    DeviceApi, DeviceDesc, ImageDesc, ImageViewDesc, InstanceApi, RenderPassLayout,
    Submission, SwapchainDesc,
};

const PHYSICAL_DEVICE_BASE: u64 = 0x100;
const QUEUE_BASE: u64 = 0x500;
const SURFACE: u64 = 0xABC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Image,
    ImageView,
    Memory,
    Swapchain,
    RenderPass,
    Framebuffer,
    CommandPool,
    PipelineCache,
    Semaphore,
    Fence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateDevice,
    DestroyDevice,
    DestroySurface,
    DestroyInstance,
    Create(Kind, u64),
    Destroy(Kind, u64),
    WaitIdle,
    WaitFence(u64),
    ResetFence(u64),
    Acquire(u64),
    BeginCommandBuffer(u64),
    EndCommandBuffer(u64),
    ResetCommandBuffer(u64),
    FreeCommandBuffers(usize),
    BeginRenderPass(u64),
    EndRenderPass,
    Submit { command_buffer: u64, fence: u64 },
    Present { image_index: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
}

/// Configuration of one fake physical device.
#[derive(Debug, Clone)]
pub struct MockPhysicalDevice {
    pub extensions: Vec<String>,
    pub queue_families: Vec<vk::QueueFlags>,
    /// Present support per queue family; missing entries mean `false`.
    pub present_support: Vec<bool>,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub sample_counts: vk::SampleCountFlags,
    pub memory_types: Vec<vk::MemoryPropertyFlags>,
    /// Formats reporting optimal-tiling depth/stencil attachment support.
    pub depth_formats: Vec<vk::Format>,
    pub sample_rate_shading: bool,
    pub reject_device_creation: bool,
    /// Extension and surface queries fail with this result when set.
    pub query_error: Option<vk::Result>,
}

impl Default for MockPhysicalDevice {
    fn default() -> Self {
        Self {
            extensions: vec!["VK_KHR_swapchain".into()],
            queue_families: vec![
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            ],
            present_support: vec![true],
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            capabilities: capabilities(2, 0, extent(1280, 720)),
            sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            memory_types: vec![
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ],
            depth_formats: vec![
                vk::Format::D24_UNORM_S8_UINT,
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
            ],
            sample_rate_shading: true,
            reject_device_creation: false,
            query_error: None,
        }
    }
}

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

pub fn capabilities(
    min_image_count: u32,
    max_image_count: u32,
    current_extent: vk::Extent2D,
) -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        min_image_count,
        max_image_count,
        current_extent,
        min_image_extent: extent(1, 1),
        max_image_extent: extent(8192, 8192),
        max_image_array_layers: 1,
        supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY
            | vk::SurfaceTransformFlagsKHR::ROTATE_90,
        current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
    }
}

/// Everything the fake driver knows and has seen.
#[derive(Default)]
pub struct World {
    pub devices: Vec<MockPhysicalDevice>,
    pub events: Vec<Event>,
    pub live: HashMap<u64, Kind>,
    /// Objects still alive when the device was destroyed.
    pub leaked: Vec<(u64, Kind)>,
    /// Ordering mistakes that a validation layer would report.
    pub violations: Vec<String>,

    pub device_desc: Option<(vk::PhysicalDevice, DeviceDesc)>,
    pub swapchains: Vec<SwapchainDesc>,
    pub images: Vec<ImageDesc>,
    pub views: Vec<ImageViewDesc>,
    pub allocations: Vec<(u32, vk::DeviceSize)>,
    pub render_passes: Vec<RenderPassLayout>,
    pub framebuffers: Vec<(Vec<vk::ImageView>, vk::Extent2D)>,
    pub submit_waits: Vec<(Vec<vk::Semaphore>, Vec<vk::PipelineStageFlags>)>,
    pub present_queues: Vec<vk::Queue>,

    pub acquire_results: VecDeque<VkResult<(u32, bool)>>,
    pub present_results: VecDeque<VkResult<bool>>,

    next_handle: u64,
    selected: usize,
    fences: HashMap<u64, FenceState>,
    signaled_semaphores: HashSet<u64>,
    in_flight: HashMap<u64, u64>,
    command_buffers: HashMap<u64, u64>,
    swapchain_images: HashMap<u64, Vec<u64>>,
    next_image: HashMap<u64, u32>,
    view_image: HashMap<u64, u64>,
    image_memory: HashMap<u64, u64>,
}

impl World {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        0x10_000 + self.next_handle
    }

    fn create<T: Handle>(&mut self, kind: Kind) -> T {
        let raw = self.handle();
        self.live.insert(raw, kind);
        self.events.push(Event::Create(kind, raw));
        T::from_raw(raw)
    }

    fn destroy<T: Handle>(&mut self, kind: Kind, handle: T) {
        let raw = handle.as_raw();
        match self.live.remove(&raw) {
            Some(k) if k == kind => {}
            other => self
                .violations
                .push(format!("destroying {kind:?} {raw:#x} which is {other:?}")),
        }
        self.events.push(Event::Destroy(kind, raw));
    }

    fn device(&self, physical_device: vk::PhysicalDevice) -> &MockPhysicalDevice {
        let index = (physical_device.as_raw() - PHYSICAL_DEVICE_BASE) as usize;
        &self.devices[index]
    }

    fn check_not_in_flight(&self, command_buffer: vk::CommandBuffer) {
        if let Some(fence) = self.in_flight.get(&command_buffer.as_raw()) {
            if self.fences.get(fence) == Some(&FenceState::Pending) {
                panic!("command buffer {command_buffer:?} reused while its submission is pending");
            }
        }
    }

    /// Number of live objects of one kind.
    pub fn count(&self, kind: Kind) -> usize {
        self.live.values().filter(|&&k| k == kind).count()
    }

    /// Creation events in order, as kinds.
    pub fn created(&self) -> Vec<Kind> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Create(kind, _) => Some(*kind),
                _ => None,
            })
            .collect()
    }
}

/// Handle to a fake driver shared by the mock instance and device.
#[derive(Clone)]
pub struct MockGpu {
    world: Arc<Mutex<World>>,
}

impl MockGpu {
    pub fn new(devices: Vec<MockPhysicalDevice>) -> Self {
        Self {
            world: Arc::new(Mutex::new(World {
                devices,
                ..World::default()
            })),
        }
    }

    pub fn single() -> Self {
        Self::new(vec![MockPhysicalDevice::default()])
    }

    pub fn instance(&self) -> Arc<dyn InstanceApi> {
        Arc::new(MockInstance {
            world: Arc::clone(&self.world),
        })
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(SURFACE)
    }

    pub fn physical_device(&self, index: usize) -> vk::PhysicalDevice {
        vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE + index as u64)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        f(&mut self.world.lock())
    }

    pub fn events(&self) -> Vec<Event> {
        self.world.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.world.lock().events.clear();
    }

    pub fn push_acquire(&self, result: VkResult<(u32, bool)>) {
        self.world.lock().acquire_results.push_back(result);
    }

    pub fn push_present(&self, result: VkResult<bool>) {
        self.world.lock().present_results.push_back(result);
    }

    /// Change what the selected device's surface reports from now on.
    pub fn set_capabilities(&self, caps: vk::SurfaceCapabilitiesKHR) {
        let mut world = self.world.lock();
        let selected = world.selected;
        world.devices[selected].capabilities = caps;
    }
}

struct MockInstance {
    world: Arc<Mutex<World>>,
}

impl InstanceApi for MockInstance {
    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        let world = self.world.lock();
        Ok((0..world.devices.len())
            .map(|i| vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE + i as u64))
            .collect())
    }

    fn device_extension_names(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<String>> {
        let world = self.world.lock();
        let device = world.device(physical_device);
        device.query_error.map_or(Ok(device.extensions.clone()), Err)
    }

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        self.world
            .lock()
            .device(physical_device)
            .queue_families
            .iter()
            .map(|&queue_flags| vk::QueueFamilyProperties {
                queue_flags,
                queue_count: 1,
                ..Default::default()
            })
            .collect()
    }

    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<bool> {
        let world = self.world.lock();
        let device = world.device(physical_device);
        if let Some(error) = device.query_error {
            return Err(error);
        }
        Ok(device
            .present_support
            .get(queue_family as usize)
            .copied()
            .unwrap_or(false))
    }

    fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        let world = self.world.lock();
        let device = world.device(physical_device);
        device.query_error.map_or(Ok(device.formats.clone()), Err)
    }

    fn surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        let world = self.world.lock();
        let device = world.device(physical_device);
        device.query_error.map_or(Ok(device.present_modes.clone()), Err)
    }

    fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.world.lock().device(physical_device).capabilities)
    }

    fn properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        let world = self.world.lock();
        let device = world.device(physical_device);
        let mut properties = vk::PhysicalDeviceProperties {
            api_version: vk::API_VERSION_1_0,
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            ..Default::default()
        };
        properties.limits.framebuffer_color_sample_counts = device.sample_counts;
        properties.limits.framebuffer_depth_sample_counts = device.sample_counts;
        properties
    }

    fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        let world = self.world.lock();
        let device = world.device(physical_device);
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: device.memory_types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, &property_flags) in properties.memory_types.iter_mut().zip(&device.memory_types) {
            *slot = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        properties
    }

    fn features(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        let enabled = self.world.lock().device(physical_device).sample_rate_shading;
        vk::PhysicalDeviceFeatures {
            sample_rate_shading: enabled.into(),
            ..Default::default()
        }
    }

    fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties {
        let world = self.world.lock();
        let mut properties = vk::FormatProperties::default();
        if world.device(physical_device).depth_formats.contains(&format) {
            properties.optimal_tiling_features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        properties
    }

    fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        desc: &DeviceDesc,
    ) -> VkResult<Arc<dyn DeviceApi>> {
        let mut world = self.world.lock();
        if world.device(physical_device).reject_device_creation {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        world.selected = (physical_device.as_raw() - PHYSICAL_DEVICE_BASE) as usize;
        world.device_desc = Some((physical_device, desc.clone()));
        world.events.push(Event::CreateDevice);
        Ok(Arc::new(MockDevice {
            world: Arc::clone(&self.world),
        }))
    }

    fn destroy_surface(&self, _surface: vk::SurfaceKHR) {
        self.world.lock().events.push(Event::DestroySurface);
    }
}

impl Drop for MockInstance {
    fn drop(&mut self) {
        self.world.lock().events.push(Event::DestroyInstance);
    }
}

struct MockDevice {
    world: Arc<Mutex<World>>,
}

impl DeviceApi for MockDevice {
    fn queue(&self, family: u32, _index: u32) -> vk::Queue {
        vk::Queue::from_raw(QUEUE_BASE + family as u64)
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut world = self.world.lock();
        for state in world.fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
        world.events.push(Event::WaitIdle);
        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc) -> VkResult<vk::Image> {
        let mut world = self.world.lock();
        world.images.push(*desc);
        Ok(world.create(Kind::Image))
    }

    fn image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        let world = self.world.lock();
        let types = world.devices[world.selected].memory_types.len() as u32;
        vk::MemoryRequirements {
            size: 1 << 20,
            alignment: 256,
            memory_type_bits: (1 << types) - 1,
        }
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory> {
        let mut world = self.world.lock();
        world
            .allocations
            .push((info.memory_type_index, info.allocation_size));
        Ok(world.create(Kind::Memory))
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> VkResult<()> {
        self.world
            .lock()
            .image_memory
            .insert(image.as_raw(), memory.as_raw());
        Ok(())
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> VkResult<vk::ImageView> {
        let mut world = self.world.lock();
        world.views.push(*desc);
        let view: vk::ImageView = world.create(Kind::ImageView);
        world.view_image.insert(view.as_raw(), desc.image.as_raw());
        Ok(view)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let mut world = self.world.lock();
        let old = desc.old_swapchain.as_raw();
        if old != 0 && world.live.get(&old) != Some(&Kind::Swapchain) {
            world
                .violations
                .push(format!("old swapchain {old:#x} is not alive"));
        }
        world.swapchains.push(desc.clone());
        let swapchain: vk::SwapchainKHR = world.create(Kind::Swapchain);
        let images = (0..desc.min_image_count).map(|_| world.handle()).collect();
        world.swapchain_images.insert(swapchain.as_raw(), images);
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let world = self.world.lock();
        Ok(world
            .swapchain_images
            .get(&swapchain.as_raw())
            .map(|images| images.iter().map(|&raw| vk::Image::from_raw(raw)).collect())
            .unwrap_or_default())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut world = self.world.lock();
        world.events.push(Event::Acquire(semaphore.as_raw()));

        let result = match world.acquire_results.pop_front() {
            Some(result) => result,
            None => {
                let count = world
                    .swapchain_images
                    .get(&swapchain.as_raw())
                    .map_or(1, |images| images.len() as u32);
                let next = world.next_image.entry(swapchain.as_raw()).or_insert(0);
                let index = *next % count;
                *next += 1;
                Ok((index, false))
            }
        };

        if result.is_ok() && !world.signaled_semaphores.insert(semaphore.as_raw()) {
            panic!("acquire with semaphore {semaphore:?} that already has a pending signal");
        }
        result
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut world = self.world.lock();
        if !world.signaled_semaphores.remove(&wait_semaphore.as_raw()) {
            panic!("present waits on unsignalled semaphore {wait_semaphore:?}");
        }
        world.present_queues.push(queue);
        world.events.push(Event::Present { image_index });
        world.present_results.pop_front().unwrap_or(Ok(false))
    }

    fn create_render_pass(&self, layout: &RenderPassLayout) -> VkResult<vk::RenderPass> {
        let mut world = self.world.lock();
        world.render_passes.push(*layout);
        Ok(world.create(Kind::RenderPass))
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut world = self.world.lock();
        world.framebuffers.push((attachments.to_vec(), extent));
        Ok(world.create(Kind::Framebuffer))
    }

    fn create_command_pool(
        &self,
        _queue_family: u32,
        _flags: vk::CommandPoolCreateFlags,
    ) -> VkResult<vk::CommandPool> {
        Ok(self.world.lock().create(Kind::CommandPool))
    }

    fn create_pipeline_cache(&self) -> VkResult<vk::PipelineCache> {
        Ok(self.world.lock().create(Kind::PipelineCache))
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        _level: vk::CommandBufferLevel,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut world = self.world.lock();
        Ok((0..count)
            .map(|_| {
                let raw = world.handle();
                world.command_buffers.insert(raw, pool.as_raw());
                vk::CommandBuffer::from_raw(raw)
            })
            .collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut world = self.world.lock();
        for buffer in buffers {
            world.check_not_in_flight(*buffer);
            world.command_buffers.remove(&buffer.as_raw());
        }
        world.events.push(Event::FreeCommandBuffers(buffers.len()));
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let mut world = self.world.lock();
        world.check_not_in_flight(command_buffer);
        world
            .events
            .push(Event::BeginCommandBuffer(command_buffer.as_raw()));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.world
            .lock()
            .events
            .push(Event::EndCommandBuffer(command_buffer.as_raw()));
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut world = self.world.lock();
        world.check_not_in_flight(command_buffer);
        world
            .events
            .push(Event::ResetCommandBuffer(command_buffer.as_raw()));
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        _command_buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        _clear_values: &[vk::ClearValue],
    ) {
        self.world
            .lock()
            .events
            .push(Event::BeginRenderPass(framebuffer.as_raw()));
    }

    fn cmd_end_render_pass(&self, _command_buffer: vk::CommandBuffer) {
        self.world.lock().events.push(Event::EndRenderPass);
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        Ok(self.world.lock().create(Kind::Semaphore))
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut world = self.world.lock();
        let fence: vk::Fence = world.create(Kind::Fence);
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        world.fences.insert(fence.as_raw(), state);
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        let mut world = self.world.lock();
        world.events.push(Event::WaitFence(fence.as_raw()));
        let state = world.fences.get_mut(&fence.as_raw());
        match state {
            Some(state) if *state != FenceState::Unsignaled => {
                *state = FenceState::Signaled;
                Ok(())
            }
            _ => panic!("waiting on fence {fence:?} that can never signal"),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut world = self.world.lock();
        world.events.push(Event::ResetFence(fence.as_raw()));
        match world.fences.get_mut(&fence.as_raw()) {
            Some(state) if *state != FenceState::Pending => {
                *state = FenceState::Unsignaled;
                Ok(())
            }
            _ => panic!("resetting fence {fence:?} that is pending or unknown"),
        }
    }

    fn queue_submit(
        &self,
        _queue: vk::Queue,
        submission: &Submission<'_>,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut world = self.world.lock();

        for semaphore in submission.wait_semaphores {
            if !world.signaled_semaphores.remove(&semaphore.as_raw()) {
                panic!("submit waits on unsignalled semaphore {semaphore:?}");
            }
        }
        for semaphore in submission.signal_semaphores {
            world.signaled_semaphores.insert(semaphore.as_raw());
        }
        world.submit_waits.push((
            submission.wait_semaphores.to_vec(),
            submission.wait_stages.to_vec(),
        ));

        if fence != vk::Fence::null() {
            match world.fences.get_mut(&fence.as_raw()) {
                Some(state) if *state == FenceState::Unsignaled => *state = FenceState::Pending,
                _ => panic!("submit with fence {fence:?} that is not unsignalled"),
            }
        }

        for &command_buffer in submission.command_buffers {
            world.check_not_in_flight(command_buffer);
            world
                .in_flight
                .insert(command_buffer.as_raw(), fence.as_raw());
            world.events.push(Event::Submit {
                command_buffer: command_buffer.as_raw(),
                fence: fence.as_raw(),
            });
        }
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut world = self.world.lock();
        let raw = image.as_raw();
        if world.view_image.values().any(|&img| img == raw) {
            world
                .violations
                .push(format!("image {raw:#x} destroyed before its view"));
        }
        world.destroy(Kind::Image, image);
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut world = self.world.lock();
        world.view_image.remove(&view.as_raw());
        world.destroy(Kind::ImageView, view);
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut world = self.world.lock();
        let raw = memory.as_raw();
        let bound_alive = world
            .image_memory
            .iter()
            .any(|(image, &mem)| mem == raw && world.live.contains_key(image));
        if bound_alive {
            world
                .violations
                .push(format!("memory {raw:#x} freed while its image is alive"));
        }
        world.image_memory.retain(|_, mem| *mem != raw);
        world.destroy(Kind::Memory, memory);
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut world = self.world.lock();
        if let Some(images) = world.swapchain_images.remove(&swapchain.as_raw()) {
            if world.view_image.values().any(|image| images.contains(image)) {
                world.violations.push(format!(
                    "swapchain {:#x} destroyed before its views",
                    swapchain.as_raw()
                ));
            }
        }
        world.destroy(Kind::Swapchain, swapchain);
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.world.lock().destroy(Kind::RenderPass, render_pass);
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.world.lock().destroy(Kind::Framebuffer, framebuffer);
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut world = self.world.lock();
        let raw = pool.as_raw();
        world.command_buffers.retain(|_, owner| *owner != raw);
        world.destroy(Kind::CommandPool, pool);
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        self.world.lock().destroy(Kind::PipelineCache, cache);
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut world = self.world.lock();
        world.signaled_semaphores.remove(&semaphore.as_raw());
        world.destroy(Kind::Semaphore, semaphore);
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut world = self.world.lock();
        if world.fences.remove(&fence.as_raw()) == Some(FenceState::Pending) {
            world
                .violations
                .push(format!("fence {:#x} destroyed while pending", fence.as_raw()));
        }
        world.destroy(Kind::Fence, fence);
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        let mut world = self.world.lock();
        let mut leaked: Vec<_> = world.live.iter().map(|(&raw, &kind)| (raw, kind)).collect();
        leaked.sort_unstable_by_key(|&(raw, _)| raw);
        world.leaked = leaked;
        world.events.push(Event::DestroyDevice);
    }
}
