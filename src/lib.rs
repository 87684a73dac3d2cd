pub mod config;
pub mod context;
pub mod core;

pub use config::VulkanConfig;
pub use context::GraphicsContext;
pub use crate::core::device::{LogicalDevice, LogicalDeviceBuilder};
pub use crate::core::error::{ResourceError, Result, SwapchainCreationError};
pub use crate::core::extension::{Extension, ExtensionOwner};
pub use crate::core::instance::Instance;
pub use crate::core::physical_device::{Candidate, DeviceSelection};
pub use crate::core::scope::{DisposableSet, Releasable};
pub use crate::core::swapchain::{Swapchain, SwapchainExtension};
