use std::ffi::{CStr, CString};
use ash::vk;
use smallvec::SmallVec;
use crate::core::error::{ResourceError, Result};
use crate::core::instance::Instance;
use crate::core::surface::{Surface, SurfaceSupport};

/// Native queries the survey needs. Implemented over a real instance and surface by
/// [`NativeSurvey`], and by in-memory fakes in tests.
pub trait SurveySource {
    fn physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>>;
    fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<CString>>;
    fn device_properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties;
    fn queue_families(&self, physical_device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;
    fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family_index: u32) -> Result<bool>;
    fn surface_support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport>;
}

pub struct NativeSurvey<'a> {
    pub instance: &'a Instance,
    pub surface: &'a Surface,
}

impl SurveySource for NativeSurvey<'_> {
    fn physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>> {
        self.instance.enumerate_physical_devices()
    }

    fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<CString>> {
        let props = unsafe {
            self.instance
                .raw()
                .enumerate_device_extension_properties(physical_device)?
        };
        Ok(props
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok().map(CStr::to_owned))
            .collect())
    }

    fn device_properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        unsafe {
            self.instance.raw().get_physical_device_properties(physical_device)
        }
    }

    fn queue_families(&self, physical_device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .raw()
                .get_physical_device_queue_family_properties(physical_device)
        }
    }

    fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family_index: u32) -> Result<bool> {
        self.surface.supports_present(physical_device, queue_family_index)
    }

    fn surface_support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        self.surface.support(physical_device)
    }
}

/// A physical device that can render to and present on the surveyed surface
#[derive(Clone, Debug)]
pub struct Candidate {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub graphics_family: u32,
    pub present_family: u32,
    pub surface_support: SurfaceSupport,
}

impl Candidate {
    pub fn is_valid(&self) -> bool {
        self.surface_support.is_adequate()
    }

    pub fn shares_queue_family(&self) -> bool {
        self.graphics_family == self.present_family
    }

    /// Distinct queue family indices, graphics first.
    pub fn queue_family_indices(&self) -> SmallVec<[u32; 2]> {
        let mut indices = SmallVec::new();
        indices.push(self.graphics_family);
        if !self.shares_queue_family() {
            indices.push(self.present_family);
        }
        indices
    }
}

/// Lazy pass over the instance's physical devices.
///
/// Each device is inspected only when the iterator reaches it. Running
/// [`survey`] again re-queries everything; nothing is cached.
pub struct Survey<'a, S: SurveySource + ?Sized> {
    source: &'a S,
    required_extensions: Vec<CString>,
    devices: std::vec::IntoIter<vk::PhysicalDevice>,
}

pub fn survey<'a, 'n, S>(
    source: &'a S,
    required_extensions: impl IntoIterator<Item = &'n CStr>,
) -> Result<Survey<'a, S>>
where
    S: SurveySource + ?Sized,
{
    Ok(Survey {
        source,
        required_extensions: required_extensions.into_iter().map(CStr::to_owned).collect(),
        devices: source.physical_devices()?.into_iter(),
    })
}

impl<S: SurveySource + ?Sized> Survey<'_, S> {
    fn inspect_device(&self, physical_device: vk::PhysicalDevice) -> Option<Candidate> {
        let props = self.source.device_properties(physical_device);
        let name = props
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let supported_extensions = self
            .source
            .device_extensions(physical_device)
            .unwrap_or_else(|e| {
                log::warn!("Could not enumerate extensions of {}: {}", name, e);
                Vec::new()
            });
        if let Some(missing) = self
            .required_extensions
            .iter()
            .find(|req| !supported_extensions.contains(*req))
        {
            log::debug!("Rejecting {}: missing extension {:?}", name, missing);
            return None;
        }

        let families = self.source.queue_families(physical_device);
        let (graphics_family, present_family) = find_queue_families(&families, |index| {
            self.source
                .supports_present(physical_device, index)
                .unwrap_or_else(|e| {
                    log::warn!("Present support query failed on {} family {}: {}", name, index, e);
                    false
                })
        });
        let (Some(graphics_family), Some(present_family)) = (graphics_family, present_family) else {
            log::debug!(
                "Rejecting {}: graphics family {:?}, present family {:?}",
                name,
                graphics_family,
                present_family,
            );
            return None;
        };

        let surface_support = match self.source.surface_support(physical_device) {
            Ok(support) => support,
            Err(e) => {
                log::warn!("Surface query failed on {}: {}", name, e);
                return None;
            }
        };
        if !surface_support.is_adequate() {
            log::debug!("Rejecting {}: no surface formats or present modes", name);
            return None;
        }

        Some(Candidate {
            physical_device,
            name,
            device_type: props.device_type,
            graphics_family,
            present_family,
            surface_support,
        })
    }
}

impl<S: SurveySource + ?Sized> Iterator for Survey<'_, S> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            let device = self.devices.next()?;
            if let Some(candidate) = self.inspect_device(device) {
                return Some(candidate);
            }
        }
    }
}

/// First graphics-capable family and first present-capable family. They may coincide.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> (Option<u32>, Option<u32>) {
    let mut graphics = None;
    let mut present = None;
    for (index, family) in (0u32..).zip(families) {
        if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(index);
        }
        if present.is_none() && supports_present(index) {
            present = Some(index);
        }
        if graphics.is_some() && present.is_some() {
            break;
        }
    }
    (graphics, present)
}

/// How to pick one device out of the surveyed candidates
#[derive(Clone, Copy, Default)]
pub enum DeviceSelection {
    /// The first adequate device in enumeration order.
    #[default]
    FirstAdequate,
    /// Discrete, then integrated, virtual, CPU. Ties keep enumeration order.
    PreferDiscrete,
    /// Lowest rank wins. Ties keep enumeration order.
    Ranked(fn(&Candidate) -> u32),
}

impl DeviceSelection {
    pub fn select(&self, candidates: impl IntoIterator<Item = Candidate>) -> Result<Candidate> {
        let mut candidates = candidates.into_iter();
        let chosen = match self {
            DeviceSelection::FirstAdequate => candidates.next(),
            DeviceSelection::PreferDiscrete => candidates.min_by_key(device_type_rank),
            DeviceSelection::Ranked(rank) => candidates.min_by_key(|candidate| rank(candidate)),
        };
        let chosen = chosen.ok_or(ResourceError::NoAdequateDevice)?;
        log::info!(
            "Selected {} ({:?}), graphics family {}, present family {}",
            chosen.name,
            chosen.device_type,
            chosen.graphics_family,
            chosen.present_family,
        );
        Ok(chosen)
    }
}

pub fn device_type_rank(candidate: &Candidate) -> u32 {
    match candidate.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        vk::PhysicalDeviceType::OTHER => 4,
        _ => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use ash::vk::Handle;

    const GRAPHICS: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
    const COMPUTE: vk::QueueFlags = vk::QueueFlags::COMPUTE;

    struct FakeDevice {
        name: &'static CStr,
        device_type: vk::PhysicalDeviceType,
        extensions: Vec<&'static CStr>,
        // (flags, can present)
        families: Vec<(vk::QueueFlags, bool)>,
        formats: usize,
        present_modes: usize,
        surface_lost: bool,
        present_query_fails: bool,
    }

    impl FakeDevice {
        fn adequate(name: &'static CStr) -> Self {
            Self {
                name,
                device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
                extensions: vec![ash::khr::swapchain::NAME],
                families: vec![(GRAPHICS | COMPUTE, true)],
                formats: 2,
                present_modes: 1,
                surface_lost: false,
                present_query_fails: false,
            }
        }
    }

    #[derive(Default)]
    struct FakeSource {
        devices: Vec<FakeDevice>,
        enumerations: Cell<u32>,
    }

    impl FakeSource {
        fn new(devices: Vec<FakeDevice>) -> Self {
            Self {
                devices,
                enumerations: Cell::new(0),
            }
        }

        fn device(&self, physical_device: vk::PhysicalDevice) -> &FakeDevice {
            &self.devices[physical_device.as_raw() as usize - 1]
        }
    }

    impl SurveySource for FakeSource {
        fn physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>> {
            self.enumerations.set(self.enumerations.get() + 1);
            Ok((1..=self.devices.len() as u64)
                .map(vk::PhysicalDevice::from_raw)
                .collect())
        }

        fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<CString>> {
            Ok(self
                .device(physical_device)
                .extensions
                .iter()
                .map(|ext| CString::from(*ext))
                .collect())
        }

        fn device_properties(&self, physical_device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
            let device = self.device(physical_device);
            let mut props = vk::PhysicalDeviceProperties {
                device_type: device.device_type,
                ..Default::default()
            };
            for (dst, src) in props.device_name.iter_mut().zip(device.name.to_bytes()) {
                *dst = *src as std::ffi::c_char;
            }
            props
        }

        fn queue_families(&self, physical_device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
            self.device(physical_device)
                .families
                .iter()
                .map(|(flags, _)| vk::QueueFamilyProperties {
                    queue_flags: *flags,
                    queue_count: 1,
                    ..Default::default()
                })
                .collect()
        }

        fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family_index: u32) -> Result<bool> {
            let device = self.device(physical_device);
            if device.present_query_fails {
                return Err(vk::Result::ERROR_DEVICE_LOST.into());
            }
            Ok(device.families[queue_family_index as usize].1)
        }

        fn surface_support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
            let device = self.device(physical_device);
            if device.surface_lost {
                return Err(vk::Result::ERROR_SURFACE_LOST_KHR.into());
            }
            Ok(SurfaceSupport {
                capabilities: vk::SurfaceCapabilitiesKHR::default(),
                formats: vec![vk::SurfaceFormatKHR::default(); device.formats],
                present_modes: vec![vk::PresentModeKHR::FIFO; device.present_modes],
            })
        }
    }

    fn run(source: &FakeSource) -> Vec<Candidate> {
        survey(source, [ash::khr::swapchain::NAME])
            .unwrap()
            .collect()
    }

    #[test]
    fn only_the_adequate_device_survives() {
        let source = FakeSource::new(vec![
            FakeDevice {
                families: vec![(COMPUTE, true)],
                ..FakeDevice::adequate(c"compute only")
            },
            FakeDevice::adequate(c"good"),
            FakeDevice {
                formats: 0,
                ..FakeDevice::adequate(c"no formats")
            },
        ]);

        let candidates = run(&source);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "good");
        assert_eq!(candidates[0].physical_device.as_raw(), 2);
        assert!(candidates[0].is_valid());
    }

    #[test]
    fn graphics_without_present_is_excluded() {
        let source = FakeSource::new(vec![FakeDevice {
            families: vec![(GRAPHICS, false), (COMPUTE, false)],
            ..FakeDevice::adequate(c"headless")
        }]);

        assert!(run(&source).is_empty());
    }

    #[test]
    fn missing_required_extension_is_excluded() {
        let source = FakeSource::new(vec![FakeDevice {
            extensions: Vec::new(),
            ..FakeDevice::adequate(c"no swapchain")
        }]);

        assert!(run(&source).is_empty());
    }

    #[test]
    fn empty_present_modes_are_excluded() {
        let source = FakeSource::new(vec![FakeDevice {
            present_modes: 0,
            ..FakeDevice::adequate(c"no modes")
        }]);

        assert!(run(&source).is_empty());
    }

    #[test]
    fn failed_surface_query_skips_only_that_device() {
        let source = FakeSource::new(vec![
            FakeDevice {
                surface_lost: true,
                ..FakeDevice::adequate(c"lost")
            },
            FakeDevice::adequate(c"good"),
        ]);

        let candidates = run(&source);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].physical_device.as_raw(), 2);
    }

    #[test]
    fn failed_present_query_counts_as_no_present_support() {
        let source = FakeSource::new(vec![
            FakeDevice {
                present_query_fails: true,
                ..FakeDevice::adequate(c"flaky")
            },
            FakeDevice::adequate(c"good"),
        ]);

        let names = run(&source).into_iter().map(|c| c.name).collect::<Vec<_>>();

        assert_eq!(names, vec!["good"]);
    }

    #[test]
    fn first_matching_families_are_chosen() {
        let source = FakeSource::new(vec![FakeDevice {
            families: vec![
                (COMPUTE, false),
                (GRAPHICS, false),
                (COMPUTE, true),
                (GRAPHICS, true),
            ],
            ..FakeDevice::adequate(c"split")
        }]);

        let candidate = run(&source).remove(0);

        assert_eq!(candidate.graphics_family, 1);
        assert_eq!(candidate.present_family, 2);
        assert!(!candidate.shares_queue_family());
        assert_eq!(candidate.queue_family_indices().as_slice(), &[1, 2]);
    }

    #[test]
    fn shared_family_yields_single_index() {
        let source = FakeSource::new(vec![FakeDevice::adequate(c"shared")]);

        let candidate = run(&source).remove(0);

        assert!(candidate.shares_queue_family());
        assert_eq!(candidate.queue_family_indices().as_slice(), &[0]);
    }

    #[test]
    fn survey_is_lazy_and_restartable() {
        let source = FakeSource::new(vec![
            FakeDevice::adequate(c"first"),
            FakeDevice::adequate(c"second"),
        ]);

        let first = survey(&source, [ash::khr::swapchain::NAME]).unwrap().next().unwrap();
        let again = run(&source);

        assert_eq!(first.name, "first");
        assert_eq!(again.len(), 2);
        assert_eq!(source.enumerations.get(), 2);
    }

    #[test]
    fn first_adequate_selection_keeps_enumeration_order() {
        let source = FakeSource::new(vec![
            FakeDevice::adequate(c"integrated"),
            FakeDevice {
                device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
                ..FakeDevice::adequate(c"discrete")
            },
        ]);

        let first = DeviceSelection::FirstAdequate.select(run(&source)).unwrap();
        let discrete = DeviceSelection::PreferDiscrete.select(run(&source)).unwrap();
        let ranked = DeviceSelection::Ranked(|c| c.name.len() as u32).select(run(&source)).unwrap();

        assert_eq!(first.name, "integrated");
        assert_eq!(discrete.name, "discrete");
        assert_eq!(ranked.name, "discrete");
    }

    #[test]
    fn no_candidates_is_fatal() {
        let source = FakeSource::default();

        let result = DeviceSelection::FirstAdequate.select(run(&source));

        assert!(matches!(result, Err(ResourceError::NoAdequateDevice)));
    }
}
