use std::fmt;
use std::io;
use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// Closed set of failures the renderer can surface. Every variant is fatal:
/// there is no partial-setup recovery and no degraded mode, so each one
/// propagates to `main` and terminates the process.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("validation layer {0} requested but not available")]
    MissingValidationLayer(String),

    #[error("no suitable graphics device found")]
    NoSuitableDevice,

    #[error("failed to read shader binary {}", path.display())]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{op} failed: {result:?}")]
    Api { op: ApiOp, result: vk::Result },
}

impl RenderError {
    /// Single classification point for Vulkan call failures: tags the raw
    /// result code with the operation that produced it and logs it once.
    pub fn api(op: ApiOp, result: vk::Result) -> Self {
        log::error!("{op} failed: {result:?}");
        Self::Api { op, result }
    }
}

/// The Vulkan operations that can fail, named for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOp {
    CreateInstance,
    CreateDebugMessenger,
    CreateSurface,
    EnumerateDevices,
    QuerySurface,
    CreateDevice,
    CreateSwapchain,
    CreateImageView,
    CreateShaderModule,
    CreateRenderPass,
    CreatePipelineLayout,
    CreatePipeline,
    CreateFramebuffer,
    CreateCommandPool,
    AllocateCommandBuffers,
    CreateSyncObjects,
    WaitFence,
    ResetFence,
    AcquireImage,
    RecordCommands,
    QueueSubmit,
    QueuePresent,
    DeviceWaitIdle,
}

impl fmt::Display for ApiOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateInstance => "instance creation",
            Self::CreateDebugMessenger => "debug messenger creation",
            Self::CreateSurface => "surface creation",
            Self::EnumerateDevices => "device enumeration",
            Self::QuerySurface => "surface capability query",
            Self::CreateDevice => "logical device creation",
            Self::CreateSwapchain => "swapchain creation",
            Self::CreateImageView => "image view creation",
            Self::CreateShaderModule => "shader module creation",
            Self::CreateRenderPass => "render pass creation",
            Self::CreatePipelineLayout => "pipeline layout creation",
            Self::CreatePipeline => "graphics pipeline creation",
            Self::CreateFramebuffer => "framebuffer creation",
            Self::CreateCommandPool => "command pool creation",
            Self::AllocateCommandBuffers => "command buffer allocation",
            Self::CreateSyncObjects => "sync object creation",
            Self::WaitFence => "fence wait",
            Self::ResetFence => "fence reset",
            Self::AcquireImage => "image acquisition",
            Self::RecordCommands => "command recording",
            Self::QueueSubmit => "queue submission",
            Self::QueuePresent => "presentation",
            Self::DeviceWaitIdle => "device wait-idle",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_name_the_failing_operation() {
        let err = RenderError::api(ApiOp::CreateSwapchain, vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(err.to_string(), "swapchain creation failed: ERROR_DEVICE_LOST");
    }

    #[test]
    fn api_errors_keep_the_operation_tag() {
        let err = RenderError::api(ApiOp::QueueSubmit, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        match err {
            RenderError::Api { op, result } => {
                assert_eq!(op, ApiOp::QueueSubmit);
                assert_eq!(result, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_layer_names_the_layer() {
        let err = RenderError::MissingValidationLayer("VK_LAYER_KHRONOS_validation".to_string());
        assert_eq!(
            err.to_string(),
            "validation layer VK_LAYER_KHRONOS_validation requested but not available"
        );
    }
}
