use std::ffi::{CStr, CString};
use ash::vk;
use crate::core::physical_device::DeviceSelection;

/// Contains configuration options for the Vulkan session like validation, vsync, and device choice
pub struct VulkanConfig {
    pub application_name: CString,
    pub engine_name: CString,
    pub api_version: u32,

    pub enable_validation: bool,
    /// Candidate layer sets, most preferred first. The first fully installed set is used.
    pub validation_layer_priority: Vec<Vec<&'static CStr>>,
    /// Instance extensions enabled only when the loader reports them.
    pub optional_instance_extensions: Vec<&'static CStr>,
    pub required_device_extensions: Vec<&'static CStr>,
    pub min_message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,

    pub device_selection: DeviceSelection,
    pub vsync: bool,
    pub image_count: Option<u32>,
}

impl Default for VulkanConfig {
    fn default() -> Self {
        Self {
            application_name: CString::from(c"Unnamed Application"),
            engine_name: CString::from(c"vkscope"),
            api_version: vk::API_VERSION_1_1,

            enable_validation: cfg!(debug_assertions),
            validation_layer_priority: vec![
                vec![c"VK_LAYER_KHRONOS_validation"],
                vec![c"VK_LAYER_LUNARG_standard_validation"],
                vec![
                    c"VK_LAYER_GOOGLE_threading",
                    c"VK_LAYER_LUNARG_parameter_validation",
                    c"VK_LAYER_LUNARG_object_tracker",
                    c"VK_LAYER_LUNARG_core_validation",
                    c"VK_LAYER_GOOGLE_unique_objects",
                ],
            ],
            optional_instance_extensions: vec![
                ash::khr::get_physical_device_properties2::NAME,
            ],
            required_device_extensions: vec![
                ash::khr::swapchain::NAME,

                #[cfg(target_os = "macos")]
                ash::khr::portability_subset::NAME,
            ],
            min_message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,

            device_selection: DeviceSelection::FirstAdequate,
            vsync: true,
            image_count: None,
        }
    }
}
