use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use crate::config::VulkanConfig;
use crate::core::debug;
use crate::core::error::{ResourceError, Result};
use crate::core::extension::{self, Extension, ExtensionOwner};
use crate::core::scope::{Releasable, ReleaseGuard, ScopeLink};

/// Root Vulkan handle. Destroying it invalidates every surface, device, and extension derived from it.
pub struct Instance {
    entry: ash::Entry,
    instance: ash::Instance,
    enabled_extensions: Vec<CString>,
    enabled_layers: Vec<CString>,
    guard: ReleaseGuard,
}

impl Instance {
    pub fn builder(config: &VulkanConfig) -> InstanceBuilder<'_> {
        InstanceBuilder::new(config)
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn handle(&self) -> vk::Instance {
        self.instance.handle()
    }

    pub fn enabled_extensions(&self) -> &[CString] {
        &self.enabled_extensions
    }

    pub fn enabled_layers(&self) -> &[CString] {
        &self.enabled_layers
    }

    pub fn try_get_extension<E: Extension<Self>>(&self) -> Option<E> {
        extension::try_get_extension(self)
    }

    pub fn require_extension<E: Extension<Self>>(&self) -> Result<E> {
        extension::require_extension(self)
    }

    pub fn enumerate_physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>> {
        Ok(unsafe {
            self.instance.enumerate_physical_devices()?
        })
    }
}

impl ExtensionOwner for Instance {
    fn has_extension(&self, name: &CStr) -> bool {
        self.enabled_extensions
            .iter()
            .any(|ext| ext.as_c_str() == name)
    }
}

impl Releasable for Instance {
    fn release(&self) {
        if !self.guard.begin() {
            return;
        }
        log::info!("Destroying instance {:?}", self.instance.handle());
        unsafe {
            self.instance.destroy_instance(None);
        }
    }

    fn attach(&self, link: ScopeLink) {
        self.guard.attach(link);
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.release();
    }
}

/// Collects extensions and layers, then creates the instance in one call
pub struct InstanceBuilder<'a> {
    config: &'a VulkanConfig,
    entry: Option<ash::Entry>,
    extensions: Vec<CString>,
    optional_extensions: Vec<CString>,
}

impl<'a> InstanceBuilder<'a> {
    fn new(config: &'a VulkanConfig) -> Self {
        Self {
            config,
            entry: None,
            extensions: Vec::new(),
            optional_extensions: config
                .optional_instance_extensions
                .iter()
                .map(|ext| CString::from(*ext))
                .collect(),
        }
    }

    /// Uses an already loaded entry instead of loading the system Vulkan library.
    pub fn with_entry(mut self, entry: ash::Entry) -> Self {
        self.entry = Some(entry);
        self
    }

    /// Adds the surface extensions the windowing platform needs.
    pub fn with_window_extensions(mut self, display: RawDisplayHandle) -> Result<Self> {
        let required = ash_window::enumerate_required_extensions(display)?;
        self.extensions.extend(
            required
                .iter()
                .map(|ext| unsafe { CStr::from_ptr(*ext) }.to_owned()),
        );
        Ok(self)
    }

    pub fn with_extensions<'n>(mut self, names: impl IntoIterator<Item = &'n CStr>) -> Self {
        self.extensions.extend(names.into_iter().map(CStr::to_owned));
        self
    }

    /// Extensions that are enabled only if the loader reports them.
    pub fn with_optional_extensions<'n>(mut self, names: impl IntoIterator<Item = &'n CStr>) -> Self {
        self.optional_extensions.extend(names.into_iter().map(CStr::to_owned));
        self
    }

    pub fn create(self) -> Result<Arc<Instance>> {
        let entry = match self.entry {
            Some(entry) => entry,
            None => unsafe { ash::Entry::load()? },
        };


        let enabled_layers = if self.config.enable_validation {
            let available_layers = unsafe {
                entry
                    .enumerate_instance_layer_properties()?
                    .iter()
                    .filter_map(|props| props.layer_name_as_c_str().ok().map(CStr::to_owned))
                    .collect::<Vec<_>>()
            };
            select_validation_layers(&available_layers, &self.config.validation_layer_priority)
                .ok_or(ResourceError::ValidationLayersUnavailable)?
                .into_iter()
                .map(CStr::to_owned)
                .collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        // Layers can provide extensions the loader does not, debug utils among them
        let mut available_extensions = unsafe {
            entry.enumerate_instance_extension_properties(None)?
        };
        for layer in &enabled_layers {
            let provided = unsafe {
                entry.enumerate_instance_extension_properties(Some(layer.as_c_str()))?
            };
            available_extensions.extend(provided);
        }

        let enabled_extensions = enabled_extension_names(
            self.extensions,
            self.optional_extensions,
            self.config.enable_validation,
            &available_extensions,
        );
        let debug_utils_enabled = enabled_extensions
            .iter()
            .any(|ext| ext.as_c_str() == ash::ext::debug_utils::NAME);

        let application_info = vk::ApplicationInfo::default()
            .application_name(&self.config.application_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&self.config.engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(self.config.api_version);
        let layer_names = enabled_layers
            .iter()
            .map(|layer| layer.as_ptr())
            .collect::<Vec<*const c_char>>();
        let extension_names = enabled_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        // Chained so that instance creation and destruction are reported too
        let mut debug_info = debug::messenger_create_info(self.config.min_message_severity);
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names);
        let instance_info = if debug_utils_enabled {
            instance_info.push_next(&mut debug_info)
        } else {
            instance_info
        };

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        let instance = unsafe {
            entry
                .create_instance(&instance_info, None)
                .map_err(ResourceError::InstanceCreation)?
        };

        log::info!(
            "Created instance {:?} with layers {:?} and extensions {:?}",
            instance.handle(),
            enabled_layers,
            enabled_extensions,
        );

        Ok(Arc::new(Instance {
            entry,
            instance,
            enabled_extensions,
            enabled_layers,
            guard: ReleaseGuard::default(),
        }))
    }
}

/// Picks the first layer set whose layers are all installed.
pub fn select_validation_layers(
    available: &[CString],
    priority: &[Vec<&'static CStr>],
) -> Option<Vec<&'static CStr>> {
    priority
        .iter()
        .find(|set| {
            set.iter()
                .all(|layer| available.iter().any(|avail| avail.as_c_str() == *layer))
        })
        .cloned()
}

/// Required names, then debug utils (with validation) and optional names that the
/// loader reports. Duplicates are dropped keeping the first occurrence.
fn enabled_extension_names(
    required: Vec<CString>,
    optional: Vec<CString>,
    enable_validation: bool,
    available: &[vk::ExtensionProperties],
) -> Vec<CString> {
    let mut enabled = required;
    let debug_utils = enable_validation.then(|| ash::ext::debug_utils::NAME.to_owned());
    for ext in debug_utils.into_iter().chain(optional) {
        if extension::contains_extension(available, &ext) {
            enabled.push(ext);
        } else {
            log::info!("Optional instance extension {:?} not present", ext);
        }
    }

    #[cfg(target_os = "macos")]
    enabled.push(ash::khr::portability_enumeration::NAME.to_owned());

    dedup_names(&mut enabled);
    enabled
}

fn dedup_names(names: &mut Vec<CString>) {
    let mut seen = Vec::with_capacity(names.len());
    names.retain(|name| {
        if seen.contains(name) {
            false
        } else {
            seen.push(name.clone());
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed(names: &[&CStr]) -> Vec<CString> {
        names.iter().map(|name| CString::from(*name)).collect()
    }

    #[test]
    fn prefers_first_complete_layer_set() {
        let config = VulkanConfig::default();
        let available = installed(&[c"VK_LAYER_LUNARG_standard_validation", c"VK_LAYER_KHRONOS_validation"]);

        let layers = select_validation_layers(&available, &config.validation_layer_priority).unwrap();

        assert_eq!(layers, vec![c"VK_LAYER_KHRONOS_validation"]);
    }

    #[test]
    fn skips_partially_installed_sets() {
        let priority = vec![
            vec![c"VK_LAYER_A", c"VK_LAYER_B"],
            vec![c"VK_LAYER_C"],
        ];
        let available = installed(&[c"VK_LAYER_A", c"VK_LAYER_C"]);

        let layers = select_validation_layers(&available, &priority).unwrap();

        assert_eq!(layers, vec![c"VK_LAYER_C"]);
    }

    #[test]
    fn no_layer_set_installed() {
        let config = VulkanConfig::default();

        assert!(select_validation_layers(&[], &config.validation_layer_priority).is_none());
    }

    fn reported(names: &[&CStr]) -> Vec<vk::ExtensionProperties> {
        names
            .iter()
            .map(|name| {
                let mut props = vk::ExtensionProperties::default();
                for (dst, src) in props.extension_name.iter_mut().zip(name.to_bytes()) {
                    *dst = *src as c_char;
                }
                props
            })
            .collect()
    }

    fn has(names: &[CString], name: &CStr) -> bool {
        names.iter().any(|ext| ext.as_c_str() == name)
    }

    #[test]
    fn debug_utils_follows_validation_and_availability() {
        let available = reported(&[ash::ext::debug_utils::NAME]);

        let validated = enabled_extension_names(Vec::new(), Vec::new(), true, &available);
        let plain = enabled_extension_names(Vec::new(), Vec::new(), false, &available);
        let missing = enabled_extension_names(Vec::new(), Vec::new(), true, &[]);

        assert!(has(&validated, ash::ext::debug_utils::NAME));
        assert!(!has(&plain, ash::ext::debug_utils::NAME));
        assert!(!has(&missing, ash::ext::debug_utils::NAME));
    }

    #[test]
    fn required_names_stay_and_optional_names_need_the_loader() {
        let available = reported(&[ash::khr::get_physical_device_properties2::NAME]);

        let enabled = enabled_extension_names(
            installed(&[ash::khr::surface::NAME, ash::khr::surface::NAME]),
            installed(&[ash::khr::get_physical_device_properties2::NAME, c"VK_NOPE_missing"]),
            false,
            &available,
        );

        assert_eq!(enabled[0].as_c_str(), ash::khr::surface::NAME);
        assert_eq!(enabled.iter().filter(|ext| ext.as_c_str() == ash::khr::surface::NAME).count(), 1);
        assert!(has(&enabled, ash::khr::get_physical_device_properties2::NAME));
        assert!(!has(&enabled, c"VK_NOPE_missing"));
    }

    unsafe extern "system" fn no_proc_addr(
        _instance: vk::Instance,
        _name: *const c_char,
    ) -> vk::PFN_vkVoidFunction {
        None
    }

    #[test]
    fn provided_entry_replaces_library_loading() {
        let config = VulkanConfig::default();
        let entry = unsafe {
            ash::Entry::from_static_fn(ash::StaticFn {
                get_instance_proc_addr: no_proc_addr,
            })
        };

        let builder = Instance::builder(&config).with_entry(entry);

        assert!(builder.entry.is_some());
    }

    #[test]
    fn duplicate_extension_names_are_removed_in_order() {
        let mut names = installed(&[c"VK_KHR_surface", c"VK_EXT_debug_utils", c"VK_KHR_surface"]);

        dedup_names(&mut names);

        assert_eq!(names, installed(&[c"VK_KHR_surface", c"VK_EXT_debug_utils"]));
    }
}
