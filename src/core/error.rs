use std::ffi::CStr;
use ash::vk;
use thiserror::Error;

/// Every failure the core can report.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Scope `{0}` is already disposed")]
    ScopeClosed(String),
    #[error("Extension {0:?} is not available")]
    ExtensionUnavailable(&'static CStr),
    #[error("No physical device supports the surface and required extensions")]
    NoAdequateDevice,
    #[error("Failed to create logical device: {0}")]
    DeviceCreation(vk::Result),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreation(#[from] SwapchainCreationError),
    #[error("Failed to create instance: {0}")]
    InstanceCreation(vk::Result),
    #[error("Validation layers requested but none of the known layer sets is installed")]
    ValidationLayersUnavailable,
    #[error("Failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("Window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),
    #[error("Vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),
}

#[derive(Debug, Error)]
pub enum SwapchainCreationError {
    #[error("definition is incomplete, missing {0}")]
    Incomplete(&'static str),
    #[error("native call failed: {0}")]
    Native(vk::Result),
}

pub type Result<T, E = ResourceError> = std::result::Result<T, E>;
