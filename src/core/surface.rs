use std::ffi::CStr;
use std::sync::Arc;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use crate::core::error::Result;
use crate::core::extension::Extension;
use crate::core::instance::Instance;
use crate::core::scope::{Releasable, ReleaseGuard, ScopeLink};

/// `VK_KHR_surface` bound to its instance
pub struct SurfaceExtension {
    entry: ash::Entry,
    instance: ash::Instance,
    loader: ash::khr::surface::Instance,
}

impl Extension<Instance> for SurfaceExtension {
    const NAME: &'static CStr = ash::khr::surface::NAME;

    fn bind(owner: &Instance) -> Self {
        Self {
            entry: owner.entry().clone(),
            instance: owner.raw().clone(),
            loader: ash::khr::surface::Instance::new(owner.entry(), owner.raw()),
        }
    }
}

impl SurfaceExtension {
    pub fn create_surface<W>(&self, window: &W) -> Result<Arc<Surface>>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        log::info!("Created surface {:?}", surface);
        Ok(Arc::new(Surface {
            loader: self.loader.clone(),
            surface,
            guard: ReleaseGuard::default(),
        }))
    }
}

/// Presentable target backed by a window
pub struct Surface {
    loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    guard: ReleaseGuard,
}

impl Surface {
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<bool> {
        Ok(unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family_index,
                self.surface,
            )?
        })
    }

    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?
        })
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)?
        })
    }

    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::PresentModeKHR>> {
        Ok(unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)?
        })
    }

    pub fn support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        Ok(SurfaceSupport {
            capabilities: self.capabilities(physical_device)?,
            formats: self.formats(physical_device)?,
            present_modes: self.present_modes(physical_device)?,
        })
    }
}

impl Releasable for Surface {
    fn release(&self) {
        if !self.guard.begin() {
            return;
        }
        log::trace!("Destroying surface {:?}", self.surface);
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }

    fn attach(&self, link: ScopeLink) {
        self.guard.attach(link);
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.release();
    }
}

/// What a surface offers on one physical device, captured at survey time
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }

    /// The preferred format if offered, otherwise whatever the surface lists first.
    pub fn choose_format(&self, preferred: vk::SurfaceFormatKHR) -> Option<vk::SurfaceFormatKHR> {
        self.formats
            .iter()
            .find(|format| {
                format.format == preferred.format && format.color_space == preferred.color_space
            })
            .or_else(|| self.formats.first())
            .copied()
    }

    /// FIFO is always available. Without vsync, MAILBOX then IMMEDIATE are preferred.
    pub fn choose_present_mode(&self, vsync: bool) -> vk::PresentModeKHR {
        if vsync {
            return vk::PresentModeKHR::FIFO;
        }
        [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
            .into_iter()
            .find(|mode| self.present_modes.contains(mode))
            .unwrap_or(vk::PresentModeKHR::FIFO)
    }
}

pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};
