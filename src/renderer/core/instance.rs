use std::ffi::{c_char, c_void, CStr};

use ash::vk;
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use crate::renderer::config::RenderConfig;
use crate::renderer::error::{ApiOp, RenderError};

const REQUIRED_VALIDATION_LAYERS: &[&CStr] = &[c"VK_LAYER_KHRONOS_validation"];

/// Initializes Vulkan and keeps the instance and diagnostic channel alive
pub struct RenderInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl RenderInstance {
    pub fn new(window: &Window, config: &RenderConfig) -> Result<Self> {
        let entry = ash::Entry::linked();

        if config.enable_validation {
            Self::check_validation_layers_supported(&entry)?;
        }

        let instance = Self::create_instance(&entry, window, config)?;

        // The diagnostic channel is registered before any device work so
        // selection and creation are covered. It only observes: messages are
        // routed to the log and never change control flow.
        let debug_utils = if config.enable_validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let debug_utils_info = debug_utils_messenger_create_info();
            let messenger = unsafe {
                loader
                    .create_debug_utils_messenger(&debug_utils_info, None)
                    .map_err(|r| RenderError::api(ApiOp::CreateDebugMessenger, r))?
            };
            Some((loader, messenger))
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
        })
    }

    pub fn create_surface(
        &self,
        window: &Window,
    ) -> Result<(vk::SurfaceKHR, ash::khr::surface::Instance)> {
        let surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )
            .map_err(|r| RenderError::api(ApiOp::CreateSurface, r))?
        };
        let surface_loader = ash::khr::surface::Instance::new(&self.entry, &self.instance);
        Ok((surface, surface_loader))
    }

    fn create_instance(
        entry: &ash::Entry,
        window: &Window,
        config: &RenderConfig,
    ) -> Result<ash::Instance> {
        let application_info = vk::ApplicationInfo::default()
            .application_name(c"trigon")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let enabled_layer_names = if config.enable_validation {
            REQUIRED_VALIDATION_LAYERS
                .iter()
                .map(|layer| layer.as_ptr())
                .collect::<Vec<*const c_char>>()
        } else {
            Vec::new()
        };
        let enabled_extension_names = Self::required_extensions(window, config)?;

        let mut debug_utils_info = debug_utils_messenger_create_info();
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        let instance_info = if config.enable_validation {
            instance_info.push_next(&mut debug_utils_info)
        } else {
            instance_info
        };

        #[cfg(target_os = "macos")]
        let instance_info = instance_info.flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        let instance = unsafe {
            entry
                .create_instance(&instance_info, None)
                .map_err(|r| RenderError::api(ApiOp::CreateInstance, r))?
        };
        Ok(instance)
    }

    fn required_extensions(
        window: &Window,
        config: &RenderConfig,
    ) -> Result<Vec<*const c_char>> {
        let mut exts =
            ash_window::enumerate_required_extensions(window.display_handle()?.as_raw())
                .map_err(|r| RenderError::api(ApiOp::CreateInstance, r))?
                .to_vec();

        if config.enable_validation {
            exts.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        #[cfg(target_os = "macos")]
        {
            exts.push(ash::khr::portability_enumeration::NAME.as_ptr());
            exts.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
        }

        Ok(exts)
    }

    fn check_validation_layers_supported(entry: &ash::Entry) -> Result<()> {
        let supported_layers = unsafe {
            entry
                .enumerate_instance_layer_properties()
                .map_err(|r| RenderError::api(ApiOp::CreateInstance, r))?
        };
        let supported_layers = supported_layers
            .iter()
            .filter_map(|props| props.layer_name_as_c_str().ok())
            .collect::<Vec<_>>();

        for layer in REQUIRED_VALIDATION_LAYERS {
            if !supported_layers.contains(layer) {
                return Err(RenderError::MissingValidationLayer(
                    layer.to_string_lossy().into_owned(),
                )
                .into());
            }
        }

        Ok(())
    }

    /// Tears down the diagnostic channel.
    ///
    /// # Safety
    /// Must be called before `destroy`, after the device is gone.
    pub unsafe fn destroy_messenger(&mut self) {
        if let Some((loader, messenger)) = self.debug_utils.take() {
            unsafe { loader.destroy_debug_utils_messenger(messenger, None) };
        }
    }

    /// # Safety
    /// Every object created through this instance, the surface included, must
    /// already be destroyed.
    pub unsafe fn destroy(&mut self) {
        unsafe { self.instance.destroy_instance(None) };
    }
}

fn debug_utils_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let msg = unsafe { CStr::from_ptr((*p_callback_data).p_message) };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::trace!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("{} {:?}", msg_type, msg);
        }
        _ => {
            log::warn!("[Unknown]{} {:?}", msg_type, msg);
        }
    }

    vk::FALSE
}
