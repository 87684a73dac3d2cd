use std::ffi::CStr;
use crate::core::error::{ResourceError, Result};

/// An instance or device that knows which extensions it was created with.
pub trait ExtensionOwner {
    fn has_extension(&self, name: &CStr) -> bool;
}

/// Typed wrapper around an optional native function table.
///
/// `bind` is only called after the owner reported `NAME` as enabled. The wrapper
/// captures the loaded table and whatever owner handles it needs, and keeps that
/// binding for its whole lifetime.
pub trait Extension<O: ExtensionOwner + ?Sized>: Sized {
    const NAME: &'static CStr;

    fn bind(owner: &O) -> Self;
}

/// Binds `E` against `owner`, or returns `None` when the extension is absent.
pub fn try_get_extension<E, O>(owner: &O) -> Option<E>
where
    E: Extension<O>,
    O: ExtensionOwner + ?Sized,
{
    if !owner.has_extension(E::NAME) {
        log::debug!("Extension {:?} not enabled", E::NAME);
        return None;
    }
    Some(E::bind(owner))
}

/// Like [`try_get_extension`] for callers that cannot continue without it.
pub fn require_extension<E, O>(owner: &O) -> Result<E>
where
    E: Extension<O>,
    O: ExtensionOwner + ?Sized,
{
    try_get_extension(owner).ok_or(ResourceError::ExtensionUnavailable(E::NAME))
}

/// Matches `name` against a list of extension properties reported by the driver.
pub fn contains_extension(available: &[ash::vk::ExtensionProperties], name: &CStr) -> bool {
    available
        .iter()
        .any(|props| props.extension_name_as_c_str() == Ok(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::ffi::CString;

    struct FakeOwner {
        enabled: Vec<CString>,
        handle: u64,
        binds: Cell<u32>,
    }

    impl ExtensionOwner for FakeOwner {
        fn has_extension(&self, name: &CStr) -> bool {
            self.enabled.iter().any(|ext| ext.as_c_str() == name)
        }
    }

    struct Timeline {
        owner_handle: u64,
    }

    impl Extension<FakeOwner> for Timeline {
        const NAME: &'static CStr = c"VK_KHR_timeline_semaphore";

        fn bind(owner: &FakeOwner) -> Self {
            owner.binds.set(owner.binds.get() + 1);
            Self {
                owner_handle: owner.handle,
            }
        }
    }

    struct Imaginary;

    impl Extension<FakeOwner> for Imaginary {
        const NAME: &'static CStr = c"VK_NOPE_imaginary";

        fn bind(owner: &FakeOwner) -> Self {
            owner.binds.set(owner.binds.get() + 1);
            Self
        }
    }

    fn owner() -> FakeOwner {
        FakeOwner {
            enabled: vec![CString::from(c"VK_KHR_timeline_semaphore")],
            handle: 42,
            binds: Cell::new(0),
        }
    }

    #[test]
    fn present_extension_binds_to_owner() {
        let owner = owner();

        let timeline = try_get_extension::<Timeline, _>(&owner).unwrap();

        assert_eq!(timeline.owner_handle, 42);
        assert_eq!(owner.binds.get(), 1);
    }

    #[test]
    fn absent_extension_has_no_side_effects() {
        let owner = owner();

        assert!(try_get_extension::<Imaginary, _>(&owner).is_none());
        assert_eq!(owner.binds.get(), 0);
        assert_eq!(owner.enabled.len(), 1);
        assert!(try_get_extension::<Timeline, _>(&owner).is_some());
    }

    #[test]
    fn require_reports_missing_name() {
        let owner = owner();

        let err = require_extension::<Imaginary, _>(&owner).err().unwrap();

        assert!(matches!(err, ResourceError::ExtensionUnavailable(name) if name == c"VK_NOPE_imaginary"));
    }

    #[test]
    fn extension_properties_lookup() {
        let mut props = ash::vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(c"VK_KHR_swapchain".to_bytes()) {
            *dst = *src as std::ffi::c_char;
        }

        assert!(contains_extension(&[props], ash::khr::swapchain::NAME));
        assert!(!contains_extension(&[props], ash::khr::surface::NAME));
    }
}
