use std::ffi::CStr;
use std::sync::Arc;
use ash::vk;
use smallvec::SmallVec;
use crate::core::device::{ImageView, LogicalDevice};
use crate::core::error::{ResourceError, Result, SwapchainCreationError};
use crate::core::extension::Extension;
use crate::core::scope::{DisposableSet, Releasable, ReleaseGuard, ScopeLink};
use crate::core::surface::Surface;

/// Picks the swapchain extent for a surface.
///
/// A surface that reports `u32::MAX` as its current width lets the swapchain
/// decide, so the request is clamped into the supported bounds. Otherwise the
/// surface dictates its current extent.
pub fn resolve_image_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width.max(capabilities.min_image_extent.width),
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height.max(capabilities.min_image_extent.height),
        ),
    }
}

/// One image above the minimum unless told otherwise, never outside the surface bounds.
/// A maximum of zero means unbounded.
pub fn resolve_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: Option<u32>) -> u32 {
    let min = capabilities.min_image_count;
    let max = capabilities.max_image_count;
    let count = requested
        .unwrap_or_else(|| min.saturating_add(1))
        .max(min);
    if max > 0 {
        count.min(max)
    } else {
        count
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SharingPlan {
    Exclusive,
    Concurrent(SmallVec<[u32; 2]>),
}

impl SharingPlan {
    /// Images are shared only when more than one distinct family touches them.
    pub fn for_families(families: &[u32]) -> Self {
        let mut distinct = SmallVec::<[u32; 2]>::new();
        for family in families {
            if !distinct.contains(family) {
                distinct.push(*family);
            }
        }
        if distinct.len() > 1 {
            Self::Concurrent(distinct)
        } else {
            Self::Exclusive
        }
    }

    pub fn mode(&self) -> vk::SharingMode {
        match self {
            Self::Exclusive => vk::SharingMode::EXCLUSIVE,
            Self::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    pub fn queue_family_indices(&self) -> &[u32] {
        match self {
            Self::Exclusive => &[],
            Self::Concurrent(families) => families,
        }
    }
}

/// Everything the native create call needs, fully resolved
#[derive(Clone, Debug)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_extent: vk::Extent2D,
    pub image_count: u32,
    pub image_usage: vk::ImageUsageFlags,
    pub sharing: SharingPlan,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Swapchain parameters accumulated against a capabilities snapshot
#[derive(Clone, Debug)]
pub struct SwapchainConfig {
    capabilities: vk::SurfaceCapabilitiesKHR,
    queue_families: SmallVec<[u32; 2]>,
    surface_format: Option<vk::SurfaceFormatKHR>,
    present_mode: Option<vk::PresentModeKHR>,
    image_count: Option<u32>,
    image_extent: Option<vk::Extent2D>,
    image_usage: vk::ImageUsageFlags,
}

impl SwapchainConfig {
    pub fn new(capabilities: vk::SurfaceCapabilitiesKHR) -> Self {
        Self {
            capabilities,
            queue_families: SmallVec::new(),
            surface_format: None,
            present_mode: None,
            image_count: None,
            image_extent: None,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        }
    }

    pub fn with_queue_family(mut self, family_index: u32) -> Self {
        if !self.queue_families.contains(&family_index) {
            self.queue_families.push(family_index);
        }
        self
    }

    pub fn with_surface_format(mut self, surface_format: vk::SurfaceFormatKHR) -> Self {
        self.surface_format = Some(surface_format);
        self
    }

    pub fn with_present_mode(mut self, present_mode: vk::PresentModeKHR) -> Self {
        self.present_mode = Some(present_mode);
        self
    }

    pub fn with_image_count(mut self, image_count: u32) -> Self {
        self.image_count = Some(image_count);
        self
    }

    /// Resolved against the capabilities right away, see [`resolve_image_extent`].
    pub fn with_image_extent(mut self, requested: vk::Extent2D) -> Self {
        self.image_extent = Some(resolve_image_extent(&self.capabilities, requested));
        self
    }

    pub fn with_image_usage(mut self, image_usage: vk::ImageUsageFlags) -> Self {
        self.image_usage = image_usage;
        self
    }

    pub fn capabilities(&self) -> &vk::SurfaceCapabilitiesKHR {
        &self.capabilities
    }

    pub fn queue_families(&self) -> &[u32] {
        &self.queue_families
    }

    pub fn image_extent(&self) -> Option<vk::Extent2D> {
        self.image_extent
    }

    pub fn can_create(&self) -> bool {
        self.surface_format.is_some() && self.present_mode.is_some() && self.image_extent.is_some()
    }

    pub fn plan(&self) -> Result<SwapchainPlan, SwapchainCreationError> {
        let surface_format = self
            .surface_format
            .ok_or(SwapchainCreationError::Incomplete("surface format"))?;
        let present_mode = self
            .present_mode
            .ok_or(SwapchainCreationError::Incomplete("present mode"))?;
        let image_extent = self
            .image_extent
            .ok_or(SwapchainCreationError::Incomplete("image extent"))?;

        let pre_transform = if self
            .capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            self.capabilities.current_transform
        };

        Ok(SwapchainPlan {
            surface_format,
            present_mode,
            image_extent,
            image_count: resolve_image_count(&self.capabilities, self.image_count),
            image_usage: self.image_usage,
            sharing: SharingPlan::for_families(&self.queue_families),
            pre_transform,
        })
    }
}

/// `VK_KHR_swapchain` bound to its logical device
pub struct SwapchainExtension {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    loader: ash::khr::swapchain::Device,
}

impl Extension<LogicalDevice> for SwapchainExtension {
    const NAME: &'static CStr = ash::khr::swapchain::NAME;

    fn bind(owner: &LogicalDevice) -> Self {
        Self {
            device: owner.raw().clone(),
            physical_device: owner.physical_device(),
            loader: ash::khr::swapchain::Device::new(owner.instance(), owner.raw()),
        }
    }
}

impl SwapchainExtension {
    pub fn loader(&self) -> &ash::khr::swapchain::Device {
        &self.loader
    }

    /// Starts a swapchain for `surface` using its current capabilities.
    pub fn define_swapchain<'a>(&'a self, surface: &'a Surface) -> Result<SwapchainDefinition<'a>> {
        let capabilities = surface.capabilities(self.physical_device)?;
        Ok(SwapchainDefinition {
            extension: self,
            surface,
            config: SwapchainConfig::new(capabilities),
        })
    }
}

pub struct SwapchainDefinition<'a> {
    extension: &'a SwapchainExtension,
    surface: &'a Surface,
    config: SwapchainConfig,
}

impl<'a> SwapchainDefinition<'a> {
    pub fn with_queue_family(mut self, family_index: u32) -> Self {
        self.config = self.config.with_queue_family(family_index);
        self
    }

    pub fn with_surface_format(mut self, surface_format: vk::SurfaceFormatKHR) -> Self {
        self.config = self.config.with_surface_format(surface_format);
        self
    }

    pub fn with_present_mode(mut self, present_mode: vk::PresentModeKHR) -> Self {
        self.config = self.config.with_present_mode(present_mode);
        self
    }

    pub fn with_image_count(mut self, image_count: u32) -> Self {
        self.config = self.config.with_image_count(image_count);
        self
    }

    pub fn with_image_extent(mut self, requested: vk::Extent2D) -> Self {
        self.config = self.config.with_image_extent(requested);
        self
    }

    pub fn with_image_usage(mut self, image_usage: vk::ImageUsageFlags) -> Self {
        self.config = self.config.with_image_usage(image_usage);
        self
    }

    pub fn config(&self) -> &SwapchainConfig {
        &self.config
    }

    pub fn can_create(&self) -> bool {
        self.config.can_create()
    }

    /// Creates the swapchain and one view per image, then registers the swapchain in `scope`.
    ///
    /// Anything created before a failure is destroyed before the error is returned.
    pub fn create(self, scope: &DisposableSet) -> Result<Arc<Swapchain>> {
        let plan = self.config.plan()?;
        let loader = &self.extension.loader;

        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle())
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.image_extent)
            .image_usage(plan.image_usage)
            .image_sharing_mode(plan.sharing.mode())
            .queue_family_indices(plan.sharing.queue_family_indices())
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .image_array_layers(1);

        let handle = unsafe {
            loader
                .create_swapchain(&swapchain_info, None)
                .map_err(SwapchainCreationError::Native)?
        };

        // From here on dropping `swapchain` destroys the views and the handle
        let mut swapchain = Swapchain {
            loader: loader.clone(),
            swapchain: handle,
            images: Vec::new(),
            views: DisposableSet::new("swapchain image views"),
            surface_format: plan.surface_format,
            present_mode: plan.present_mode,
            image_extent: plan.image_extent,
            sharing_mode: plan.sharing.mode(),
            guard: ReleaseGuard::default(),
        };

        let images = unsafe {
            loader
                .get_swapchain_images(handle)
                .map_err(SwapchainCreationError::Native)?
        };
        let device = &self.extension.device;
        let format = plan.surface_format.format;
        let views = create_image_views(&swapchain.views, &images, |image| {
            ImageView::create(device, &image_view_info(image, format))
        })?;
        swapchain.images = views
            .into_iter()
            .map(|(image, view)| SwapchainImage { image, view })
            .collect();

        log::info!(
            "Created swapchain {:?}: {} images, {}x{}, {:?}, {:?}, {:?}",
            handle,
            swapchain.images.len(),
            plan.image_extent.width,
            plan.image_extent.height,
            plan.surface_format.format,
            plan.present_mode,
            plan.sharing.mode(),
        );

        scope.add(Arc::new(swapchain))
    }
}

/// Creates and registers one view per image, in image order.
///
/// If any view fails, the ones already created are released newest first
/// before the error is returned.
fn create_image_views<V, F>(
    views: &DisposableSet,
    images: &[vk::Image],
    mut create_view: F,
) -> Result<Vec<(vk::Image, Arc<V>)>>
where
    V: Releasable + 'static,
    F: FnMut(vk::Image) -> std::result::Result<Arc<V>, vk::Result>,
{
    let mut created = Vec::with_capacity(images.len());
    for &image in images {
        let view = create_view(image)
            .map_err(|e| ResourceError::from(SwapchainCreationError::Native(e)))
            .and_then(|view| views.add(view));
        match view {
            Ok(view) => created.push((image, view)),
            Err(e) => {
                log::warn!("Swapchain view {} of {} failed: {}", created.len() + 1, images.len(), e);
                views.dispose();
                return Err(e);
            }
        }
    }
    Ok(created)
}

/// 2D, identity swizzle, one mip, one layer, color aspect.
fn image_view_info(image: vk::Image, format: vk::Format) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo::default()
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::R,
            g: vk::ComponentSwizzle::G,
            b: vk::ComponentSwizzle::B,
            a: vk::ComponentSwizzle::A,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image(image)
}

pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: Arc<ImageView>,
}

/// Created once and never modified. A resize replaces the whole swapchain.
pub struct Swapchain {
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<SwapchainImage>,
    views: DisposableSet,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    image_extent: vk::Extent2D,
    sharing_mode: vk::SharingMode,
    guard: ReleaseGuard,
}

impl Swapchain {
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn images(&self) -> &[SwapchainImage] {
        &self.images
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn image_extent(&self) -> vk::Extent2D {
        self.image_extent
    }

    pub fn sharing_mode(&self) -> vk::SharingMode {
        self.sharing_mode
    }
}

impl Releasable for Swapchain {
    fn release(&self) {
        if !self.guard.begin() {
            return;
        }
        self.views.dispose();
        log::trace!("Destroying swapchain {:?}", self.swapchain);
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }

    fn attach(&self, link: ScopeLink) {
        self.guard.attach(link);
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.release();
    }
}
