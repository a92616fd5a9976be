pub mod config;
pub mod core;
pub mod error;

use std::sync::Arc;

use ash::vk;
use color_eyre::Result;
use winit::window::Window;

use crate::renderer::config::RenderConfig;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::frame::FrameExecutor;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::pipeline::RenderPipeline;
use crate::renderer::core::swapchain::Swapchain;
use crate::renderer::error::{ApiOp, RenderError};

/// Owns every Vulkan object, created front to back and destroyed in exactly
/// the reverse order
pub struct Renderer {
    // Keeps the window alive for as long as the surface that targets it.
    _window: Arc<Window>,

    instance: RenderInstance,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    device: RenderDevice,
    swapchain: Swapchain,
    pipeline: RenderPipeline,
    executor: FrameExecutor,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: &RenderConfig) -> Result<Self> {
        let instance = RenderInstance::new(&window, config)?;
        let (surface, surface_loader) = instance.create_surface(&window)?;
        let device = RenderDevice::new(&instance.instance, surface, &surface_loader)?;
        let swapchain = Swapchain::new(
            &instance.instance,
            &device,
            surface,
            &surface_loader,
            &window,
        )?;
        log::info!("swapchain delivered {} images", swapchain.images.len());

        let pipeline = RenderPipeline::new(
            &device.logical,
            config,
            swapchain.format,
            swapchain.extent,
            &swapchain.image_views,
        )?;
        let executor = FrameExecutor::new(&device)?;

        Ok(Self {
            _window: window,
            instance,
            surface,
            surface_loader,
            device,
            swapchain,
            pipeline,
            executor,
        })
    }

    pub fn draw(&mut self) -> Result<()> {
        self.executor
            .draw(&self.device, &self.swapchain, &self.pipeline)
    }

    /// Blocks until the device has retired all submitted work.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device
                .logical
                .device_wait_idle()
                .map_err(|r| RenderError::api(ApiOp::DeviceWaitIdle, r))?
        };
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Reverse of creation: sync objects and pool, framebuffers, pipeline,
        // layout, render pass, image views, swapchain, device, messenger,
        // surface, instance. The window outlives the surface in App.
        if let Err(err) = self.wait_idle() {
            log::error!("device wait-idle failed during teardown: {err:?}");
        }
        unsafe {
            self.executor.destroy(&self.device.logical);
            self.pipeline.destroy(&self.device.logical);
            self.swapchain.destroy(&self.device.logical);
            self.device.destroy();
            self.instance.destroy_messenger();
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy();
        }
    }
}
