use std::ffi::{c_char, CStr};

use ash::vk;
use color_eyre::Result;

use crate::renderer::core::queue::{Queue, QueueFamilyIndices};
use crate::renderer::error::{ApiOp, RenderError};

/// Owns the logical device and the queues everything else submits to
pub struct RenderDevice {
    pub physical: vk::PhysicalDevice,
    pub logical: ash::Device,
    pub graphics_queue: Queue,
    pub present_queue: Queue,
}

impl RenderDevice {
    pub fn new(
        instance: &ash::Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self> {
        let (physical, families) =
            Self::select_physical_device(instance, surface, surface_loader)?;

        let properties = unsafe { instance.get_physical_device_properties(physical) };
        log::info!(
            "selected device: {:?} (graphics family {}, present family {})",
            properties.device_name_as_c_str().unwrap_or(c"unknown"),
            families.graphics,
            families.present,
        );

        let (logical, graphics_queue, present_queue) =
            Self::create_logical_device(instance, physical, families)?;

        Ok(Self {
            physical,
            logical,
            graphics_queue,
            present_queue,
        })
    }

    pub fn queue_families(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics: self.graphics_queue.family_index,
            present: self.present_queue.family_index,
        }
    }

    fn select_physical_device(
        instance: &ash::Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(|r| RenderError::api(ApiOp::EnumerateDevices, r))?
        };

        let reports = devices
            .iter()
            .map(|&device| Self::assess(instance, device, surface, surface_loader))
            .collect::<Vec<_>>();

        let (index, families) =
            first_suitable(&reports).ok_or(RenderError::NoSuitableDevice)?;
        Ok((devices[index], families))
    }

    /// Builds the capability record device selection runs on. The record is
    /// transient; only the queue family indices survive selection.
    fn assess(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> SuitabilityReport {
        let queue_props =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        let queue_families = find_queue_families(&queue_props, |index| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        });

        let supported_exts = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .unwrap_or_default()
        };
        let supported_names = supported_exts
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .collect::<Vec<_>>();
        let extensions_supported =
            extensions_supported(&required_device_extensions(), &supported_names);

        // Surface format and present mode queries are only meaningful once
        // the swapchain extension is known to exist.
        let (has_surface_format, has_present_mode) = if extensions_supported {
            let formats = unsafe {
                surface_loader
                    .get_physical_device_surface_formats(device, surface)
                    .unwrap_or_default()
            };
            let modes = unsafe {
                surface_loader
                    .get_physical_device_surface_present_modes(device, surface)
                    .unwrap_or_default()
            };
            (!formats.is_empty(), !modes.is_empty())
        } else {
            (false, false)
        };

        SuitabilityReport {
            queue_families,
            extensions_supported,
            has_surface_format,
            has_present_mode,
        }
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical: vk::PhysicalDevice,
        families: QueueFamilyIndices,
    ) -> Result<(ash::Device, Queue, Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos = families
            .unique()
            .into_iter()
            .map(|index| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(index)
                    .queue_priorities(&queue_priorities)
            })
            .collect::<Vec<_>>();

        let enabled_extension_names = required_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        // The fixed pipeline needs no optional device features.
        let enabled_features = vk::PhysicalDeviceFeatures::default();

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names)
            .enabled_features(&enabled_features);

        let logical = unsafe {
            instance
                .create_device(physical, &device_create_info, None)
                .map_err(|r| RenderError::api(ApiOp::CreateDevice, r))?
        };

        let graphics_queue = Queue {
            family_index: families.graphics,
            handle: unsafe { logical.get_device_queue(families.graphics, 0) },
        };
        let present_queue = Queue {
            family_index: families.present,
            handle: unsafe { logical.get_device_queue(families.present, 0) },
        };

        Ok((logical, graphics_queue, present_queue))
    }

    /// # Safety
    /// Every object created from this device must already be destroyed and
    /// the device must be idle.
    pub unsafe fn destroy(&mut self) {
        unsafe { self.logical.destroy_device(None) };
    }
}

/// What device selection learned about one candidate accelerator.
#[derive(Debug, Clone, Copy)]
struct SuitabilityReport {
    queue_families: Option<QueueFamilyIndices>,
    extensions_supported: bool,
    has_surface_format: bool,
    has_present_mode: bool,
}

impl SuitabilityReport {
    fn is_suitable(&self) -> bool {
        self.queue_families.is_some()
            && self.extensions_supported
            && self.has_surface_format
            && self.has_present_mode
    }

    fn suitable_indices(&self) -> Option<QueueFamilyIndices> {
        if self.is_suitable() {
            self.queue_families
        } else {
            None
        }
    }
}

/// Picks the first suitable candidate in enumeration order.
fn first_suitable(reports: &[SuitabilityReport]) -> Option<(usize, QueueFamilyIndices)> {
    reports
        .iter()
        .enumerate()
        .find_map(|(index, report)| report.suitable_indices().map(|f| (index, f)))
}

/// Resolves the graphics and present roles against a device's queue families.
/// Each role takes the first family that supports it; the two may coincide.
fn find_queue_families(
    props: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilyIndices> {
    let graphics = props
        .iter()
        .position(|p| p.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32);
    let present = (0..props.len() as u32).find(|&index| supports_present(index));

    match (graphics, present) {
        (Some(graphics), Some(present)) => Some(QueueFamilyIndices { graphics, present }),
        _ => None,
    }
}

fn extensions_supported(required: &[&CStr], available: &[&CStr]) -> bool {
    required.iter().all(|req| available.contains(req))
}

fn required_device_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::swapchain::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_subset::NAME,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn suitable(graphics: u32, present: u32) -> SuitabilityReport {
        SuitabilityReport {
            queue_families: Some(QueueFamilyIndices { graphics, present }),
            extensions_supported: true,
            has_surface_format: true,
            has_present_mode: true,
        }
    }

    #[test]
    fn resolves_split_graphics_and_present_families() {
        let props = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let families = find_queue_families(&props, |index| index == 0).unwrap();
        assert_eq!(families, QueueFamilyIndices { graphics: 1, present: 0 });
    }

    #[test]
    fn resolves_a_unified_family() {
        let props = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let families = find_queue_families(&props, |_| true).unwrap();
        assert_eq!(families, QueueFamilyIndices { graphics: 0, present: 0 });
    }

    #[test]
    fn missing_graphics_support_is_unresolvable() {
        let props = [family(vk::QueueFlags::COMPUTE)];
        assert!(find_queue_families(&props, |_| true).is_none());
    }

    #[test]
    fn missing_present_support_is_unresolvable() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        assert!(find_queue_families(&props, |_| false).is_none());
    }

    #[test]
    fn selects_the_first_suitable_device_in_order() {
        let unsuitable = SuitabilityReport {
            queue_families: Some(QueueFamilyIndices { graphics: 0, present: 0 }),
            extensions_supported: false,
            has_surface_format: true,
            has_present_mode: true,
        };
        let reports = [unsuitable, suitable(1, 1), suitable(0, 0)];
        let (index, families) = first_suitable(&reports).unwrap();
        assert_eq!(index, 1);
        assert_eq!(families, QueueFamilyIndices { graphics: 1, present: 1 });
    }

    #[test]
    fn no_suitable_device_yields_nothing() {
        let report = SuitabilityReport {
            queue_families: None,
            extensions_supported: true,
            has_surface_format: true,
            has_present_mode: true,
        };
        assert!(first_suitable(&[report]).is_none());
        assert!(first_suitable(&[]).is_none());
    }

    #[test]
    fn suitability_requires_every_term() {
        let mut report = suitable(0, 0);
        assert!(report.is_suitable());

        report.has_surface_format = false;
        assert!(!report.is_suitable());

        report.has_surface_format = true;
        report.has_present_mode = false;
        assert!(!report.is_suitable());
    }

    #[test]
    fn required_extensions_are_checked_as_a_subset() {
        let required = [ash::khr::swapchain::NAME];
        let available = [c"VK_KHR_swapchain", c"VK_KHR_maintenance1"];
        assert!(extensions_supported(&required, &available));
        assert!(!extensions_supported(&required, &[c"VK_KHR_maintenance1"]));
    }
}
