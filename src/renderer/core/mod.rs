pub mod device;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod queue;
pub mod swapchain;
