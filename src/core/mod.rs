pub mod debug;
pub mod device;
pub mod error;
pub mod extension;
pub mod instance;
pub mod physical_device;
pub mod scope;
pub mod surface;
pub mod swapchain;
