use std::ffi::CString;
use std::sync::Arc;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use crate::config::VulkanConfig;
use crate::core::debug::{DebugMessenger, DebugUtilsExtension};
use crate::core::device::LogicalDevice;
use crate::core::error::{Result, SwapchainCreationError};
use crate::core::instance::Instance;
use crate::core::physical_device::{self, Candidate, NativeSurvey};
use crate::core::scope::DisposableSet;
use crate::core::surface::{Surface, SurfaceExtension, PREFERRED_SURFACE_FORMAT};
use crate::core::swapchain::{Swapchain, SwapchainExtension};

/// Everything needed to present to one window.
///
/// Owns the application scope. Every resource below is registered into it in
/// creation order, so dropping the context tears them down in reverse.
pub struct GraphicsContext {
    config: VulkanConfig,
    scope: DisposableSet,
    instance: Arc<Instance>,
    debug_messenger: Option<Arc<DebugMessenger>>,
    surface: Arc<Surface>,
    candidate: Candidate,
    device: Arc<LogicalDevice>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    swapchain_ext: SwapchainExtension,
    swapchain_scope: DisposableSet,
    swapchain: Option<Arc<Swapchain>>,
}

impl GraphicsContext {
    /// `extent` is the window's current framebuffer size in pixels.
    pub fn new<W>(config: VulkanConfig, window: &W, extent: vk::Extent2D) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let scope = DisposableSet::new("application");

        let instance = Instance::builder(&config)
            .with_window_extensions(window.display_handle()?.as_raw())?
            .create()?;
        let instance = scope.add(instance)?;

        let debug_messenger = if config.enable_validation {
            match instance.try_get_extension::<DebugUtilsExtension>() {
                Some(debug_utils) => Some(scope.add(
                    debug_utils.create_messenger(config.min_message_severity)?,
                )?),
                None => {
                    log::warn!("Validation enabled but debug utils are unavailable");
                    None
                }
            }
        } else {
            None
        };

        let surface = instance
            .require_extension::<SurfaceExtension>()?
            .create_surface(window)?;
        let surface = scope.add(surface)?;

        let candidate = {
            let source = NativeSurvey {
                instance: &instance,
                surface: &surface,
            };
            let candidates = physical_device::survey(
                &source,
                config.required_device_extensions.iter().copied(),
            )?;
            config.device_selection.select(candidates)?
        };

        let mut graphics_queue = vk::Queue::default();
        let mut present_queue = vk::Queue::default();
        let device = LogicalDevice::builder(&instance, candidate.physical_device)
            .with_queue(candidate.graphics_family, |queue| graphics_queue = queue)
            .with_queue(candidate.present_family, |queue| present_queue = queue)
            .with_validation_layers(instance.enabled_layers().iter().map(CString::as_c_str))
            .with_device_extensions(config.required_device_extensions.iter().copied())
            .create()?;
        let device = scope.add(device)?;

        let swapchain_ext = device.require_extension::<SwapchainExtension>()?;
        let swapchain_scope = scope.nested("swapchain")?;
        let swapchain = create_swapchain(
            &config,
            &swapchain_ext,
            &surface,
            &candidate,
            &swapchain_scope,
            extent,
        )?;

        Ok(Self {
            config,
            scope,
            instance,
            debug_messenger,
            surface,
            candidate,
            device,
            graphics_queue,
            present_queue,
            swapchain_ext,
            swapchain_scope,
            swapchain: Some(swapchain),
        })
    }

    /// Replaces the swapchain after the window changed size.
    ///
    /// A zero-sized extent (minimized window) keeps the current swapchain.
    pub fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> Result<()> {
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Skipping swapchain rebuild for empty extent");
            return Ok(());
        }

        self.device.wait_idle()?;
        let Self {
            config,
            scope,
            surface,
            candidate,
            swapchain_ext,
            swapchain_scope,
            swapchain,
            ..
        } = self;
        replace_generation(scope, swapchain_scope, swapchain, "swapchain", |next_scope| {
            create_swapchain(config, swapchain_ext, surface, candidate, next_scope, extent)
        })
    }

    pub fn config(&self) -> &VulkanConfig {
        &self.config
    }

    pub fn scope(&self) -> &DisposableSet {
        &self.scope
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn has_debug_messenger(&self) -> bool {
        self.debug_messenger.is_some()
    }

    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }

    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn swapchain_extension(&self) -> &SwapchainExtension {
        &self.swapchain_ext
    }

    /// `None` after a failed rebuild, until a later rebuild succeeds.
    pub fn swapchain(&self) -> Option<&Arc<Swapchain>> {
        self.swapchain.as_ref()
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        self.scope.dispose();
    }
}

/// Disposes the current generation, then builds the next one in a fresh child of `parent`.
///
/// `slot` is emptied first and stays empty if building fails, so it never
/// holds a released resource.
fn replace_generation<T>(
    parent: &DisposableSet,
    scope: &mut DisposableSet,
    slot: &mut Option<Arc<T>>,
    label: &str,
    build: impl FnOnce(&DisposableSet) -> Result<Arc<T>>,
) -> Result<()> {
    slot.take();
    scope.dispose();
    *scope = parent.nested(label)?;
    *slot = Some(build(scope)?);
    Ok(())
}

fn create_swapchain(
    config: &VulkanConfig,
    swapchain_ext: &SwapchainExtension,
    surface: &Surface,
    candidate: &Candidate,
    scope: &DisposableSet,
    extent: vk::Extent2D,
) -> Result<Arc<Swapchain>> {
    // Formats and modes can change between rebuilds, e.g. after moving to another monitor
    let support = surface.support(candidate.physical_device)?;
    let surface_format = support
        .choose_format(PREFERRED_SURFACE_FORMAT)
        .ok_or(SwapchainCreationError::Incomplete("surface format"))?;

    let mut definition = swapchain_ext
        .define_swapchain(surface)?
        .with_queue_family(candidate.graphics_family)
        .with_queue_family(candidate.present_family)
        .with_surface_format(surface_format)
        .with_present_mode(support.choose_present_mode(config.vsync))
        .with_image_extent(extent);
    if let Some(image_count) = config.image_count {
        definition = definition.with_image_count(image_count);
    }
    definition.create(scope)
}
