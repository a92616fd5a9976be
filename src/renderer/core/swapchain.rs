use ash::prelude::VkResult;
use ash::vk;
use color_eyre::Result;
use winit::window::Window;

use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::queue::QueueFamilyIndices;
use crate::renderer::error::{ApiOp, RenderError};

/// What the surface reports for the selected device; input to the plan.
pub struct SurfaceProperties {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceProperties {
    pub fn query(
        surface_loader: &ash::khr::surface::Instance,
        physical: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        let properties = unsafe {
            Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical, surface)
                    .map_err(|r| RenderError::api(ApiOp::QuerySurface, r))?,
                formats: surface_loader
                    .get_physical_device_surface_formats(physical, surface)
                    .map_err(|r| RenderError::api(ApiOp::QuerySurface, r))?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical, surface)
                    .map_err(|r| RenderError::api(ApiOp::QuerySurface, r))?,
            }
        };
        Ok(properties)
    }
}

/// The swapchain parameters, all decided before any Vulkan object exists so
/// every selection policy stays testable on its own.
#[derive(Debug, Clone)]
pub struct SwapchainPlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn new(
        properties: &SurfaceProperties,
        drawable_size: (u32, u32),
        families: QueueFamilyIndices,
    ) -> Self {
        let (sharing_mode, queue_family_indices) = choose_sharing(families);
        Self {
            format: choose_surface_format(&properties.formats),
            present_mode: choose_present_mode(&properties.present_modes),
            extent: choose_extent(&properties.capabilities, drawable_size),
            min_image_count: choose_image_count(&properties.capabilities),
            sharing_mode,
            queue_family_indices,
            pre_transform: properties.capabilities.current_transform,
        }
    }
}

/// Prefer 8-bit BGRA in nonlinear sRGB; otherwise take the first format the
/// surface reports. Device suitability guarantees the list is not empty.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .copied()
        .unwrap_or(formats[0])
}

/// Mailbox when the driver offers it, else the always-available FIFO.
fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// A current extent width of `u32::MAX` means the surface defers sizing to
/// the swapchain; the drawable pixel size fills in, clamped to the reported
/// bounds.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        let (width, height) = drawable_size;
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more image than the minimum so acquisition never waits on the driver's
/// internal bookkeeping, capped by the maximum when the surface reports one
/// (zero means uncapped).
fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let min = capabilities.min_image_count;
    let max = capabilities.max_image_count;
    if max > 0 && min + 1 > max {
        max
    } else {
        min + 1
    }
}

/// Split graphics/present families need concurrent image access across both;
/// a unified family keeps exclusive access with no family list.
fn choose_sharing(families: QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if families.is_unified() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

/// The presentable image chain and its per-image color views
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    pub fn new(
        instance: &ash::Instance,
        device: &RenderDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        window: &Window,
    ) -> Result<Self> {
        let properties = SurfaceProperties::query(surface_loader, device.physical, surface)?;
        let window_size = window.inner_size();
        let plan = SwapchainPlan::new(
            &properties,
            (window_size.width, window_size.height),
            device.queue_families(),
        );

        log::info!(
            "swapchain: {:?} {:?}, {}x{}, {} images requested",
            plan.format.format,
            plan.present_mode,
            plan.extent.width,
            plan.extent.height,
            plan.min_image_count,
        );

        let loader = ash::khr::swapchain::Device::new(instance, &device.logical);
        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(plan.min_image_count)
            .image_format(plan.format.format)
            .image_color_space(plan.format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(plan.sharing_mode)
            .queue_family_indices(&plan.queue_family_indices)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);

        let handle = unsafe {
            loader
                .create_swapchain(&swapchain_info, None)
                .map_err(|r| RenderError::api(ApiOp::CreateSwapchain, r))?
        };

        // The driver may hand back more images than requested.
        let images = unsafe {
            loader
                .get_swapchain_images(handle)
                .map_err(|r| RenderError::api(ApiOp::CreateSwapchain, r))?
        };
        let image_views =
            Self::create_image_views(&device.logical, &images, plan.format.format)?;

        Ok(Self {
            handle,
            loader,
            images,
            image_views,
            format: plan.format.format,
            extent: plan.extent,
        })
    }

    fn create_image_views(
        device: &ash::Device,
        images: &[vk::Image],
        format: vk::Format,
    ) -> Result<Vec<vk::ImageView>> {
        let image_views = images
            .iter()
            .map(|image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(*image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe { device.create_image_view(&view_info, None) }
            })
            .collect::<VkResult<Vec<_>>>()
            .map_err(|r| RenderError::api(ApiOp::CreateImageView, r))?;
        Ok(image_views)
    }

    /// # Safety
    /// All GPU work referencing the chain must have retired.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BGRA_SRGB: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    const RGBA_UNORM: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_bgra_srgb_wherever_it_appears() {
        let formats = [RGBA_UNORM, BGRA_SRGB];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn falls_back_to_the_first_format() {
        let formats = [
            RGBA_UNORM,
            vk::SurfaceFormatKHR {
                format: vk::Format::R16G16B16A16_SFLOAT,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn prefers_mailbox_presentation() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn falls_back_to_fifo_presentation() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn image_count_is_uncapped_when_max_is_zero() {
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
    }

    #[test]
    fn image_count_is_clamped_to_the_maximum() {
        assert_eq!(choose_image_count(&capabilities(2, 2)), 2);
        assert_eq!(choose_image_count(&capabilities(2, 3)), 3);
        assert_eq!(choose_image_count(&capabilities(3, 8)), 4);
    }

    #[test]
    fn extent_takes_a_definite_current_extent_verbatim() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 640, height: 480 },
            ..Default::default()
        };
        let extent = choose_extent(&caps, (800, 600));
        assert_eq!((extent.width, extent.height), (640, 480));
    }

    #[test]
    fn extent_derives_from_the_drawable_size_when_undefined() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 1024, height: 1024 },
            ..Default::default()
        };
        let extent = choose_extent(&caps, (800, 600));
        assert_eq!((extent.width, extent.height), (800, 600));

        let clamped = choose_extent(&caps, (4096, 0));
        assert_eq!((clamped.width, clamped.height), (1024, 1));
    }

    #[test]
    fn distinct_families_share_images_concurrently() {
        let (mode, indices) = choose_sharing(QueueFamilyIndices { graphics: 2, present: 5 });
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![2, 5]);
    }

    #[test]
    fn a_unified_family_keeps_exclusive_access() {
        let (mode, indices) = choose_sharing(QueueFamilyIndices { graphics: 3, present: 3 });
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());
    }

    #[test]
    fn plans_the_minimal_headless_surface() {
        let properties = SurfaceProperties {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 0,
                current_extent: vk::Extent2D { width: 1, height: 1 },
                ..Default::default()
            },
            formats: vec![BGRA_SRGB],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let plan = SwapchainPlan::new(
            &properties,
            (1, 1),
            QueueFamilyIndices { graphics: 0, present: 0 },
        );

        assert_eq!(plan.format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!((plan.extent.width, plan.extent.height), (1, 1));
        assert_eq!(plan.min_image_count, 3);
        assert_eq!(plan.sharing_mode, vk::SharingMode::EXCLUSIVE);
        assert!(plan.queue_family_indices.is_empty());
    }
}
