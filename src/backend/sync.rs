// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// Each frame in flight owns one slot; a slot is only reused after its fence
// has signalled, so its command buffer is never reset while still executing.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::api::DeviceApi;
use super::device::LogicalDevice;
use super::owned::Owned;

/// Number of frames the CPU may record ahead of the GPU
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Where a slot is in the frame protocol.
///
/// `Idle -> Acquiring -> Recording -> Submitted -> Presenting -> Idle`. A
/// failed or out-of-date acquire goes straight back to `Idle`, and so does
/// a recorded frame that is abandoned before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    /// The command buffer holds a frame for this swapchain image.
    Recording { image_index: u32 },
    Submitted,
    Presenting,
}

/// Frame synchronization - one per frame in flight
pub struct FrameSlot {
    pub image_available: Owned<vk::Semaphore>,
    pub render_finished: Owned<vk::Semaphore>,
    /// Created signalled so the first wait on a fresh slot returns at once
    pub in_flight: Owned<vk::Fence>,
    pub command_buffer: vk::CommandBuffer,
    pub state: SlotState,
}

impl FrameSlot {
    fn new(api: &Arc<dyn DeviceApi>, command_buffer: vk::CommandBuffer) -> Result<Self> {
        Ok(Self {
            image_available: Owned::new(api, api.create_semaphore()?),
            render_finished: Owned::new(api, api.create_semaphore()?),
            in_flight: Owned::new(api, api.create_fence(true)?),
            command_buffer,
            state: SlotState::Idle,
        })
    }

    /// Block until the last submission from this slot has finished.
    pub fn wait(&self, api: &dyn DeviceApi) -> Result<()> {
        api.wait_for_fence(self.in_flight.handle(), u64::MAX)
            .context("Failed to wait for in-flight fence")
    }

    pub fn reset_fence(&self, api: &dyn DeviceApi) -> Result<()> {
        api.reset_fence(self.in_flight.handle())
            .context("Failed to reset in-flight fence")
    }

    /// The image a recorded, not yet submitted frame targets.
    pub fn recorded_image(&self) -> Option<u32> {
        match self.state {
            SlotState::Recording { image_index } => Some(image_index),
            _ => None,
        }
    }

    /// Swap in a fresh signalled fence. Needed when the fence was reset for
    /// a frame that will never be submitted.
    pub fn renew_in_flight(&mut self, api: &Arc<dyn DeviceApi>) -> Result<()> {
        let fence = api.create_fence(true).context("Failed to create fence")?;
        self.in_flight = Owned::new(api, fence);
        Ok(())
    }

    /// Drop a recorded frame without submitting it. Its fence was reset and
    /// its image-available semaphore signalled by the acquire, so both are
    /// replaced and the slot can be waited on again.
    pub fn abandon(&mut self, api: &Arc<dyn DeviceApi>) -> Result<()> {
        self.renew_in_flight(api)?;
        self.renew_image_available(api)?;
        self.state = SlotState::Idle;
        Ok(())
    }

    /// Swap in a fresh image-available semaphore. Used when an acquire left
    /// a signal on the old one that no submission will ever consume.
    pub fn renew_image_available(&mut self, api: &Arc<dyn DeviceApi>) -> Result<()> {
        let semaphore = api
            .create_semaphore()
            .context("Failed to create semaphore")?;
        self.image_available = Owned::new(api, semaphore);
        Ok(())
    }
}

/// Ring of `FRAMES_IN_FLIGHT` slots sharing one command pool.
pub struct FrameSync {
    slots: Vec<FrameSlot>,
    current: usize,
    command_pool: vk::CommandPool,
    api: Arc<dyn DeviceApi>,
}

impl FrameSync {
    pub fn new(device: &LogicalDevice) -> Result<Self> {
        let command_buffers = device
            .allocate_command_buffers(vk::CommandBufferLevel::PRIMARY, FRAMES_IN_FLIGHT as u32)?;

        let slots = command_buffers
            .into_iter()
            .map(|command_buffer| FrameSlot::new(device.api(), command_buffer))
            .collect::<Result<Vec<_>>>()?;

        log::debug!("Created {} frame slots", slots.len());

        Ok(Self {
            slots,
            // First advance lands on slot 0
            current: FRAMES_IN_FLIGHT - 1,
            command_pool: device.command_pool(),
            api: Arc::clone(device.api()),
        })
    }

    /// Move to the next slot and return its index.
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.slots.len();
        self.current
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Reset every slot's command buffer. The caller must have waited for
    /// the device to go idle.
    pub fn reset_command_buffers(&mut self) -> Result<()> {
        for slot in &mut self.slots {
            self.api
                .reset_command_buffer(slot.command_buffer)
                .context("Failed to reset command buffer")?;
            slot.state = SlotState::Idle;
        }
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        let command_buffers: Vec<_> = self.slots.iter().map(|s| s.command_buffer).collect();
        self.api
            .free_command_buffers(self.command_pool, &command_buffers);
    }
}
