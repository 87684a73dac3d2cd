use std::ffi::{c_void, CStr};
use std::sync::Arc;
use ash::vk;
use crate::core::error::Result;
use crate::core::extension::Extension;
use crate::core::instance::Instance;
use crate::core::scope::{Releasable, ReleaseGuard, ScopeLink};

/// `VK_EXT_debug_utils` bound to its instance
pub struct DebugUtilsExtension {
    loader: ash::ext::debug_utils::Instance,
}

impl Extension<Instance> for DebugUtilsExtension {
    const NAME: &'static CStr = ash::ext::debug_utils::NAME;

    fn bind(owner: &Instance) -> Self {
        Self {
            loader: ash::ext::debug_utils::Instance::new(owner.entry(), owner.raw()),
        }
    }
}

impl DebugUtilsExtension {
    /// Forwards validation messages at or above `min_severity` to the `log` sink.
    pub fn create_messenger(
        &self,
        min_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    ) -> Result<Arc<DebugMessenger>> {
        let info = messenger_create_info(min_severity);
        let messenger = unsafe {
            self.loader.create_debug_utils_messenger(&info, None)?
        };
        Ok(Arc::new(DebugMessenger {
            loader: self.loader.clone(),
            messenger,
            guard: ReleaseGuard::default(),
        }))
    }
}

pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    guard: ReleaseGuard,
}

impl Releasable for DebugMessenger {
    fn release(&self) {
        if !self.guard.begin() {
            return;
        }
        log::trace!("Destroying debug messenger {:?}", self.messenger);
        unsafe {
            self.loader.destroy_debug_utils_messenger(self.messenger, None);
        }
    }

    fn attach(&self, link: ScopeLink) {
        self.guard.attach(link);
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        self.release();
    }
}

/// Every severity bit at or above `min`.
pub fn severity_mask(
    min: vk::DebugUtilsMessageSeverityFlagsEXT,
) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    [
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
    ]
    .into_iter()
    .filter(|severity| severity.as_raw() >= min.as_raw())
    .fold(vk::DebugUtilsMessageSeverityFlagsEXT::empty(), |mask, severity| mask | severity)
}

pub(crate) fn messenger_create_info(
    min_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(severity_mask(min_severity))
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

fn category(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    }
}

fn level(message_severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::Level::Trace,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Info,
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        _ => log::Level::Warn,
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe {
        (*p_callback_data)
            .message_as_c_str()
            .unwrap_or(c"<no message>")
    };
    log::log!(
        target: "vkscope::validation",
        level(message_severity),
        "{} {:?}",
        category(message_type),
        msg,
    );

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_includes_min_and_above() {
        let mask = severity_mask(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING);

        assert_eq!(
            mask,
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        );
    }

    #[test]
    fn verbose_mask_forwards_everything() {
        let mask = severity_mask(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE);

        assert!(mask.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
        assert!(mask.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR));
    }

    #[test]
    fn severities_map_to_log_levels() {
        assert_eq!(level(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE), log::Level::Trace);
        assert_eq!(level(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR), log::Level::Error);
        assert_eq!(category(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION), "[Validation]");
    }

    #[test]
    fn create_info_carries_filter_and_callback() {
        let info = messenger_create_info(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR);

        assert_eq!(info.message_severity, vk::DebugUtilsMessageSeverityFlagsEXT::ERROR);
        assert!(info.pfn_user_callback.is_some());
    }
}
