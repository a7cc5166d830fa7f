// Vulkan presentation bootstrap
//
// Device selection, swapchain lifecycle, render targets and a
// double-buffered acquire/record/submit/present loop.

pub mod backend;
pub mod config;
pub mod renderer;

pub use renderer::{
    ClearRecorder, FrameContext, FrameRecorder, FrameStatus, Renderer, RendererSettings,
    SwapchainState,
};
