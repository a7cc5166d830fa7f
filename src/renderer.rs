// Renderer - frame loop and swapchain lifecycle
//
// Owns everything between the window surface and a presented image:
// device, swapchain, attachments, render pass, framebuffers and the
// frames-in-flight ring. The application drives it with `render_frame`,
// `resize` and `set_vsync`; everything else happens in here.

use anyhow::{ensure, Context, Result};
use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

use crate::backend::api::{DeviceApi, InstanceApi, RenderPassLayout, Submission};
use crate::backend::attachment::{self, AttachmentFormats, Attachments};
use crate::backend::device::LogicalDevice;
use crate::backend::owned::{Owned, Surface};
use crate::backend::render_pass::{self, RenderPass};
use crate::backend::swapchain::{self, Acquired, Swapchain, SwapchainRequest};
use crate::backend::sync::{FrameSync, SlotState};

/// Everything a recorder needs to fill one frame's command buffer.
pub struct FrameContext<'a> {
    pub device: &'a dyn DeviceApi,
    /// Already in the recording state; the renderer ends it.
    pub command_buffer: vk::CommandBuffer,
    pub render_pass: vk::RenderPass,
    /// For recorders that build pipelines against this render pass.
    pub pipeline_cache: vk::PipelineCache,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub image_index: u32,
    pub frame_index: usize,
}

/// Records the commands for one frame.
pub trait FrameRecorder {
    fn record(&mut self, frame: &FrameContext<'_>) -> Result<()>;
}

/// Clears colour and depth and does nothing else.
#[derive(Debug, Clone, Copy)]
pub struct ClearRecorder {
    pub color: [f32; 4],
}

impl ClearRecorder {
    pub fn new(color: [f32; 4]) -> Self {
        Self { color }
    }
}

impl FrameRecorder for ClearRecorder {
    fn record(&mut self, frame: &FrameContext<'_>) -> Result<()> {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        frame.device.cmd_begin_render_pass(
            frame.command_buffer,
            frame.render_pass,
            frame.framebuffer,
            frame.extent,
            &clear_values,
        );
        frame.device.cmd_end_render_pass(frame.command_buffer);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Valid,
    /// The chain no longer matches the surface, or the surface is zero-sized.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// `prepare_frame` recorded a frame, or `submit_frame` presented it.
    Ready,
    /// The swapchain was rebuilt; nothing was submitted this frame.
    Recreated,
    /// No usable swapchain or no prepared image.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub window_extent: vk::Extent2D,
    pub vsync: bool,
    /// Explicit layer list, empty when validation is off.
    pub layers: Vec<CString>,
}

/// Field order is teardown order.
pub struct Renderer {
    recorder: Box<dyn FrameRecorder>,
    frames: FrameSync,
    render_pass: RenderPass,
    framebuffers: Vec<Owned<vk::Framebuffer>>,
    attachments: Option<Attachments>,
    swapchain: Option<Swapchain>,
    device: LogicalDevice,
    surface: Surface,
    instance: Arc<dyn InstanceApi>,

    request: SwapchainRequest,
    formats: AttachmentFormats,
    state: SwapchainState,
}

impl Renderer {
    pub fn initialise(
        instance: Arc<dyn InstanceApi>,
        surface: Surface,
        settings: &RendererSettings,
        recorder: Box<dyn FrameRecorder>,
    ) -> Result<Self> {
        let device = LogicalDevice::initialise(instance.as_ref(), &surface, &settings.layers)?;
        let physical_device = device.physical.handle;

        let surface_formats = instance
            .surface_formats(physical_device, surface.handle())
            .context("Failed to query surface formats")?;
        let surface_format = swapchain::choose_surface_format(&surface_formats)
            .context("Surface reports no formats")?;

        let formats = AttachmentFormats {
            colour: surface_format.format,
            depth: attachment::choose_depth_format(instance.as_ref(), physical_device),
            samples: attachment::max_usable_sample_count(&device.physical.properties.limits),
        };
        log::info!(
            "Surface format {:?}/{:?}, depth {:?}, {:?}",
            surface_format.format,
            surface_format.color_space,
            formats.depth,
            formats.samples
        );

        let request = SwapchainRequest {
            surface_format,
            vsync: settings.vsync,
            window_extent: settings.window_extent,
        };

        let swapchain = Swapchain::new(instance.as_ref(), &device, &surface, &request, None)?;
        let attachments = swapchain
            .as_ref()
            .map(|s| Attachments::new(&device, &formats, s.extent))
            .transpose()?;
        let render_pass = RenderPass::new(
            &device,
            RenderPassLayout::new(formats.colour, formats.depth, formats.samples),
        )?;
        let framebuffers = match (&swapchain, &attachments) {
            (Some(swapchain), Some(attachments)) => {
                render_pass::create_framebuffers(&device, &render_pass, attachments, swapchain)?
            }
            _ => Vec::new(),
        };
        let frames = FrameSync::new(&device)?;

        let state = if swapchain.is_some() {
            SwapchainState::Valid
        } else {
            SwapchainState::Stale
        };
        log::info!("Renderer initialised ({:?})", state);

        Ok(Self {
            recorder,
            frames,
            render_pass,
            framebuffers,
            attachments,
            swapchain,
            device,
            surface,
            instance,
            request,
            formats,
            state,
        })
    }

    pub fn device(&self) -> &LogicalDevice {
        &self.device
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    /// Wait for the next slot, acquire an image and record the frame.
    pub fn prepare_frame(&mut self) -> Result<FrameStatus> {
        ensure!(
            self.frames.current().recorded_image().is_none(),
            "prepare_frame called twice without submit_frame"
        );

        if self.state == SwapchainState::Stale {
            self.window_resize()?;
            if self.state == SwapchainState::Stale {
                return Ok(FrameStatus::Skipped);
            }
        }

        let api = Arc::clone(self.device.api());
        let frame_index = self.frames.advance();

        self.frames.current_mut().state = SlotState::Acquiring;
        self.frames.current().wait(api.as_ref())?;

        let Some(swapchain) = self.swapchain.as_ref() else {
            self.frames.current_mut().state = SlotState::Idle;
            return Ok(FrameStatus::Skipped);
        };
        let semaphore = self.frames.current().image_available.handle();

        let image_index = match swapchain.acquire_next_image(u64::MAX, semaphore)? {
            Acquired::Image(index) => index,
            Acquired::Suboptimal(index) => {
                log::debug!("Acquired image {} is suboptimal, recreating", index);
                self.frames.current_mut().state = SlotState::Idle;
                self.window_resize()?;
                // The acquire's signal is never consumed
                self.frames.current_mut().renew_image_available(&api)?;
                return Ok(FrameStatus::Recreated);
            }
            Acquired::OutOfDate => {
                log::debug!("Swapchain out of date on acquire, recreating");
                self.frames.current_mut().state = SlotState::Idle;
                self.window_resize()?;
                return Ok(FrameStatus::Recreated);
            }
        };
        log::trace!("Frame {} acquired image {}", frame_index, image_index);

        let framebuffer = self
            .framebuffers
            .get(image_index as usize)
            .map(Owned::handle)
            .with_context(|| format!("No framebuffer for swapchain image {image_index}"))?;
        let extent = swapchain.extent;

        let slot = self.frames.current_mut();
        slot.reset_fence(api.as_ref())?;
        let command_buffer = slot.command_buffer;

        api.reset_command_buffer(command_buffer)
            .context("Failed to reset command buffer")?;
        api.begin_command_buffer(command_buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .context("Failed to begin command buffer")?;

        let recorded = self
            .recorder
            .record(&FrameContext {
                device: api.as_ref(),
                command_buffer,
                render_pass: self.render_pass.handle(),
                pipeline_cache: self.device.pipeline_cache(),
                framebuffer,
                extent,
                image_index,
                frame_index,
            })
            .and_then(|()| {
                api.end_command_buffer(command_buffer)
                    .context("Failed to end command buffer")
            });
        if let Err(e) = recorded {
            // The fence was reset, so the slot must not be left waiting on it
            self.frames.current_mut().abandon(&api)?;
            return Err(e);
        }

        self.frames.current_mut().state = SlotState::Recording { image_index };
        Ok(FrameStatus::Ready)
    }

    /// Submit the prepared frame and present it.
    pub fn submit_frame(&mut self) -> Result<FrameStatus> {
        let Some(image_index) = self.frames.current().recorded_image() else {
            return Ok(FrameStatus::Skipped);
        };
        let Some(swapchain) = self.swapchain.as_ref() else {
            return Ok(FrameStatus::Skipped);
        };

        let api = Arc::clone(self.device.api());
        let slot = self.frames.current_mut();

        let wait_semaphores = [slot.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [slot.command_buffer];
        let signal_semaphores = [slot.render_finished.handle()];

        let submission = Submission {
            wait_semaphores: &wait_semaphores,
            wait_stages: &wait_stages,
            command_buffers: &command_buffers,
            signal_semaphores: &signal_semaphores,
        };

        api.queue_submit(self.device.graphics_queue, &submission, slot.in_flight.handle())
            .context("Failed to submit frame")?;
        slot.state = SlotState::Submitted;
        log::trace!("Frame {} submitted", self.frames.current_index());

        let slot = self.frames.current_mut();
        slot.state = SlotState::Presenting;
        let recreate = swapchain.present(
            self.device.present_queue,
            image_index,
            slot.render_finished.handle(),
        )?;
        slot.state = SlotState::Idle;

        if recreate {
            log::debug!("Swapchain out of date on present, recreating");
            self.window_resize()?;
            return Ok(FrameStatus::Recreated);
        }

        Ok(FrameStatus::Ready)
    }

    pub fn render_frame(&mut self) -> Result<FrameStatus> {
        match self.prepare_frame()? {
            FrameStatus::Ready => self.submit_frame(),
            status => Ok(status),
        }
    }

    pub fn set_vsync(&mut self, vsync: bool) -> Result<()> {
        self.request.vsync = vsync;
        self.window_resize()
    }

    pub fn resize(&mut self, window_extent: vk::Extent2D) -> Result<()> {
        self.request.window_extent = window_extent;
        self.window_resize()
    }

    /// Rebuild the swapchain and everything sized from it.
    pub fn window_resize(&mut self) -> Result<()> {
        self.device.wait_idle()?;

        if let Some(image_index) = self.frames.current().recorded_image() {
            log::debug!("Dropping recorded frame for image {}", image_index);
            let api = Arc::clone(self.device.api());
            self.frames.current_mut().abandon(&api)?;
        }

        let swapchain = Swapchain::new(
            self.instance.as_ref(),
            &self.device,
            &self.surface,
            &self.request,
            self.swapchain.as_ref(),
        )?;

        // Framebuffers reference the old views, so they go before the old chain
        self.framebuffers.clear();
        self.swapchain = swapchain;
        self.frames.reset_command_buffers()?;

        let Some(swapchain) = self.swapchain.as_ref() else {
            log::info!("Surface has no area, waiting for a resize");
            self.attachments = None;
            self.state = SwapchainState::Stale;
            return Ok(());
        };

        self.attachments = None;
        let attachments = Attachments::new(&self.device, &self.formats, swapchain.extent)?;

        self.render_pass = RenderPass::new(&self.device, self.render_pass.layout)?;
        self.framebuffers = render_pass::create_framebuffers(
            &self.device,
            &self.render_pass,
            &attachments,
            swapchain,
        )?;
        self.attachments = Some(attachments);
        self.state = SwapchainState::Valid;

        log::info!(
            "Swapchain recreated: {}x{}, {:?}",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.present_mode
        );
        Ok(())
    }

    /// Wait for the GPU and release everything in teardown order.
    pub fn shutdown(self) {
        log::info!("Shutting down renderer...");
        drop(self);
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device did not go idle before teardown: {:?}", e);
        }
    }
}
