// =============================================================================
// MARS RENDERER - demo window
// =============================================================================
//
// Opens a window, hands its surface to the renderer and clears it every
// frame. Window events map onto the renderer:
//   Resized         -> Renderer::resize
//   RedrawRequested -> Renderer::render_frame
//   CloseRequested  -> drop the renderer, exit
//   V               -> toggle vsync
//
// =============================================================================

use anyhow::Result;
use ash::vk;
use mars_renderer::backend::VulkanInstance;
use mars_renderer::config::Config;
use mars_renderer::{ClearRecorder, FrameStatus, Renderer, RendererSettings};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

fn main() -> Result<()> {
    init_logging();

    let config = Config::load();
    log::info!("Starting Mars renderer");
    log::info!(
        "Window: {}x{}, vsync {}",
        config.window.width,
        config.window.height,
        config.graphics.vsync
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Field order matters for Drop: the renderer (and with it the surface)
/// must go before the window it was created from.
struct App {
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    config: Config,
    vsync: bool,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            renderer: None,
            window: None,
            vsync: config.graphics.vsync,
            config,
        }
    }

    fn init_renderer(&self, window: &Window) -> Result<Renderer> {
        let display = window.display_handle()?.as_raw();
        let handle = window.window_handle()?.as_raw();
        let layers = self.config.validation_layers();

        let instance = VulkanInstance::new(&self.config.window.title, display, &layers)?;
        let surface = instance.create_surface(display, handle)?;

        // Some platforms report no size until the window is first shown
        let size = window.inner_size();
        let window_extent = if size.width == 0 || size.height == 0 {
            self.config.window_extent()
        } else {
            vk::Extent2D {
                width: size.width,
                height: size.height,
            }
        };
        let settings = RendererSettings {
            window_extent,
            vsync: self.vsync,
            layers,
        };
        let recorder = Box::new(ClearRecorder::new(self.config.graphics.clear_color));

        Renderer::initialise(instance, surface, &settings, recorder)
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            renderer.shutdown();
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let extent = self.config.window_extent();
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(extent.width, extent.height));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                let extent = vk::Extent2D {
                    width: size.width,
                    height: size.height,
                };
                if let Err(e) = renderer.resize(extent) {
                    log::error!("Resize failed: {:?}", e);
                    self.shutdown(event_loop);
                }
            }

            WindowEvent::RedrawRequested => match renderer.render_frame() {
                Ok(FrameStatus::Ready) => {}
                Ok(status) => log::trace!("Frame not presented: {:?}", status),
                Err(e) => {
                    log::error!("Render error: {:?}", e);
                    self.shutdown(event_loop);
                }
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if !event.state.is_pressed() || event.repeat {
                    return;
                }
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => {
                        log::info!("ESC pressed, exiting...");
                        self.shutdown(event_loop);
                    }
                    PhysicalKey::Code(KeyCode::KeyV) => {
                        self.vsync = !self.vsync;
                        log::info!("VSync {}", if self.vsync { "on" } else { "off" });
                        if let Err(e) = renderer.set_vsync(self.vsync) {
                            log::error!("Failed to switch vsync: {:?}", e);
                            self.shutdown(event_loop);
                        }
                    }
                    _ => {}
                }
            }

            _ => {}
        }
    }

    /// Redraw continuously.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
