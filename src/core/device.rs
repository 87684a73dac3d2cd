use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;
use ash::vk;
use smallvec::SmallVec;
use crate::core::error::{ResourceError, Result};
use crate::core::extension::{self, Extension, ExtensionOwner};
use crate::core::instance::Instance;
use crate::core::physical_device::Candidate;
use crate::core::scope::{Releasable, ReleaseGuard, ScopeLink};

/// One `VkDeviceQueueCreateInfo` worth of data
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueueRecord {
    pub family_index: u32,
    pub priority: f32,
}

struct QueueRequest<'a> {
    family_index: u32,
    on_created: Box<dyn FnOnce(vk::Queue) + 'a>,
}

/// Queue requests coalesced per family.
///
/// Vulkan rejects two create infos for the same family, so repeated requests
/// share the first record (and its priority) while keeping their own callback.
#[derive(Default)]
pub struct QueuePlan<'a> {
    records: SmallVec<[QueueRecord; 4]>,
    requests: Vec<QueueRequest<'a>>,
}

impl<'a> QueuePlan<'a> {
    pub fn request(&mut self, family_index: u32, priority: f32, on_created: impl FnOnce(vk::Queue) + 'a) {
        self.requests.push(QueueRequest {
            family_index,
            on_created: Box::new(on_created),
        });
        if self.records.iter().any(|record| record.family_index == family_index) {
            return;
        }
        self.records.push(QueueRecord {
            family_index,
            priority,
        });
    }

    pub fn records(&self) -> &[QueueRecord] {
        &self.records
    }

    /// Hands every requester queue 0 of its family, in request order.
    pub fn deliver(self, mut fetch: impl FnMut(u32) -> vk::Queue) {
        for request in self.requests {
            (request.on_created)(fetch(request.family_index));
        }
    }
}

/// Accumulates queues, layers, and extensions for a single `vkCreateDevice` call
pub struct LogicalDeviceBuilder<'a> {
    instance: &'a Instance,
    physical_device: vk::PhysicalDevice,
    queues: QueuePlan<'a>,
    validation_layers: Vec<CString>,
    device_extensions: Vec<CString>,
    features: vk::PhysicalDeviceFeatures,
}

impl<'a> LogicalDeviceBuilder<'a> {
    pub fn new(instance: &'a Instance, physical_device: vk::PhysicalDevice) -> Self {
        Self {
            instance,
            physical_device,
            queues: QueuePlan::default(),
            validation_layers: Vec::new(),
            device_extensions: Vec::new(),
            features: vk::PhysicalDeviceFeatures::default(),
        }
    }

    pub fn for_candidate(instance: &'a Instance, candidate: &Candidate) -> Self {
        Self::new(instance, candidate.physical_device)
    }

    /// Requests a queue with priority 1.0.
    pub fn with_queue(self, family_index: u32, on_created: impl FnOnce(vk::Queue) + 'a) -> Self {
        self.with_queue_priority(family_index, 1.0, on_created)
    }

    pub fn with_queue_priority(
        mut self,
        family_index: u32,
        priority: f32,
        on_created: impl FnOnce(vk::Queue) + 'a,
    ) -> Self {
        self.queues.request(family_index, priority, on_created);
        self
    }

    pub fn with_validation_layers<'n>(mut self, names: impl IntoIterator<Item = &'n CStr>) -> Self {
        self.validation_layers = names.into_iter().map(CStr::to_owned).collect();
        self
    }

    pub fn with_device_extensions<'n>(mut self, names: impl IntoIterator<Item = &'n CStr>) -> Self {
        self.device_extensions = names.into_iter().map(CStr::to_owned).collect();
        self
    }

    pub fn with_features(mut self, features: vk::PhysicalDeviceFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn queue_records(&self) -> &[QueueRecord] {
        self.queues.records()
    }

    pub fn create(self) -> Result<Arc<LogicalDevice>> {
        let Self {
            instance,
            physical_device,
            queues,
            validation_layers,
            device_extensions,
            features,
        } = self;

        if queues.records().is_empty() {
            log::error!("Logical device requested without any queues");
            return Err(ResourceError::DeviceCreation(vk::Result::ERROR_INITIALIZATION_FAILED));
        }

        let priorities = queues
            .records()
            .iter()
            .map(|record| [record.priority])
            .collect::<SmallVec<[[f32; 1]; 4]>>();
        let queue_create_infos = queues
            .records()
            .iter()
            .zip(priorities.iter())
            .map(|(record, priority)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(record.family_index)
                    .queue_priorities(priority)
            })
            .collect::<SmallVec<[vk::DeviceQueueCreateInfo; 4]>>();
        let layer_names = validation_layers
            .iter()
            .map(|layer| layer.as_ptr())
            .collect::<Vec<*const c_char>>();
        let extension_names = device_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        // Device layers are ignored by current loaders but still honoured by old ones
        #[allow(deprecated)]
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .raw()
                .create_device(physical_device, &device_create_info, None)
                .map_err(ResourceError::DeviceCreation)?
        };
        log::info!(
            "Created logical device {:?} with queue families {:?} and extensions {:?}",
            device.handle(),
            queues.records().iter().map(|r| r.family_index).collect::<Vec<_>>(),
            device_extensions,
        );

        let queue_families = queues
            .records()
            .iter()
            .map(|record| record.family_index)
            .collect();
        queues.deliver(|family_index| unsafe {
            device.get_device_queue(family_index, 0)
        });

        Ok(Arc::new(LogicalDevice {
            instance: instance.raw().clone(),
            device,
            physical_device,
            queue_families,
            enabled_layers: validation_layers,
            enabled_extensions: device_extensions,
            guard: ReleaseGuard::default(),
        }))
    }
}

/// Logical device created from one surveyed candidate
pub struct LogicalDevice {
    instance: ash::Instance,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    queue_families: SmallVec<[u32; 4]>,
    enabled_layers: Vec<CString>,
    enabled_extensions: Vec<CString>,
    guard: ReleaseGuard,
}

impl LogicalDevice {
    pub fn builder(instance: &Instance, physical_device: vk::PhysicalDevice) -> LogicalDeviceBuilder<'_> {
        LogicalDeviceBuilder::new(instance, physical_device)
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn handle(&self) -> vk::Device {
        self.device.handle()
    }

    /// Instance function table the device was created from.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_families(&self) -> &[u32] {
        &self.queue_families
    }

    pub fn enabled_layers(&self) -> &[CString] {
        &self.enabled_layers
    }

    pub fn enabled_extensions(&self) -> &[CString] {
        &self.enabled_extensions
    }

    pub fn try_get_extension<E: Extension<Self>>(&self) -> Option<E> {
        extension::try_get_extension(self)
    }

    pub fn require_extension<E: Extension<Self>>(&self) -> Result<E> {
        extension::require_extension(self)
    }

    pub fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> Result<Arc<ImageView>> {
        Ok(ImageView::create(&self.device, info)?)
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl ExtensionOwner for LogicalDevice {
    fn has_extension(&self, name: &CStr) -> bool {
        self.enabled_extensions
            .iter()
            .any(|ext| ext.as_c_str() == name)
    }
}

impl Releasable for LogicalDevice {
    fn release(&self) {
        if !self.guard.begin() {
            return;
        }
        if let Err(e) = self.wait_idle() {
            log::warn!("Device wait before destruction failed: {}", e);
        }
        log::info!("Destroying logical device {:?}", self.device.handle());
        unsafe {
            self.device.destroy_device(None);
        }
    }

    fn attach(&self, link: ScopeLink) {
        self.guard.attach(link);
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct ImageView {
    device: ash::Device,
    view: vk::ImageView,
    guard: ReleaseGuard,
}

impl ImageView {
    pub(crate) fn create(
        device: &ash::Device,
        info: &vk::ImageViewCreateInfo,
    ) -> std::result::Result<Arc<Self>, vk::Result> {
        let view = unsafe {
            device.create_image_view(info, None)?
        };
        Ok(Arc::new(Self {
            device: device.clone(),
            view,
            guard: ReleaseGuard::default(),
        }))
    }

    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Releasable for ImageView {
    fn release(&self) {
        if !self.guard.begin() {
            return;
        }
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }

    fn attach(&self, link: ScopeLink) {
        self.guard.attach(link);
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.release();
    }
}
