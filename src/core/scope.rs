use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use crate::core::error::{ResourceError, Result};

/// Anything that owns a native handle and can give it back exactly once.
///
/// `release` must be idempotent. Resources that can tear themselves down before
/// their owning scope does keep the [`ScopeLink`] handed to `attach` and detach
/// through it on their first release, usually by embedding a [`ReleaseGuard`].
pub trait Releasable: Send + Sync {
    fn release(&self);

    fn attach(&self, _link: ScopeLink) {}
}

/// Back-reference from a registered resource to the scope holding it.
pub struct ScopeLink {
    scope: Weak<ScopeInner>,
    id: u64,
}

impl ScopeLink {
    /// Removes the entry from the owning scope without releasing it.
    pub fn detach(self) {
        if let Some(scope) = self.scope.upgrade() {
            scope.remove(self.id);
        }
    }
}

/// Run-once latch for [`Releasable::release`] that also detaches from the owning scope.
#[derive(Default)]
pub struct ReleaseGuard {
    released: AtomicBool,
    link: Mutex<Option<ScopeLink>>,
}

impl ReleaseGuard {
    pub fn attach(&self, link: ScopeLink) {
        if self.is_released() {
            link.detach();
            return;
        }
        *lock(&self.link) = Some(link);
    }

    /// Returns `true` for the first caller only. That caller owns the teardown.
    pub fn begin(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(link) = lock(&self.link).take() {
            link.detach();
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

struct ScopeEntry {
    id: u64,
    resource: Arc<dyn Releasable>,
}

#[derive(Default)]
struct ScopeState {
    entries: Vec<ScopeEntry>,
    next_id: u64,
    disposed: bool,
}

struct ScopeInner {
    label: String,
    state: Mutex<ScopeState>,
    guard: ReleaseGuard,
}

impl ScopeInner {
    fn remove(&self, id: u64) {
        let removed = {
            let mut state = lock(&self.state);
            state
                .entries
                .iter()
                .position(|entry| entry.id == id)
                .map(|index| state.entries.remove(index))
        };
        // Dropped outside the lock, the entry may be the last owner
        drop(removed);
    }

    fn dispose(&self) {
        let entries = {
            let mut state = lock(&self.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.entries)
        };

        log::trace!("Disposing scope `{}` ({} resources)", self.label, entries.len());
        for entry in entries.iter().rev() {
            entry.resource.release();
        }
        drop(entries);

        self.guard.begin();
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Ordered collection of releasable resources, torn down last-in-first-out.
///
/// Cloning yields another handle to the same set. The set is disposed on an
/// explicit [`DisposableSet::dispose`], when a parent scope releases it, or when
/// the last handle is dropped.
#[derive(Clone)]
pub struct DisposableSet(Arc<ScopeInner>);

impl DisposableSet {
    pub fn new(label: impl Into<String>) -> Self {
        Self(Arc::new(ScopeInner {
            label: label.into(),
            state: Mutex::new(ScopeState::default()),
            guard: ReleaseGuard::default(),
        }))
    }

    /// Registers `resource` and hands it straight back.
    ///
    /// Fails with [`ResourceError::ScopeClosed`] once the set is disposed. The
    /// resource is not registered in that case and is dropped with the error.
    pub fn add<T: Releasable + 'static>(&self, resource: Arc<T>) -> Result<Arc<T>> {
        let id = {
            let mut state = lock(&self.0.state);
            if state.disposed {
                return Err(ResourceError::ScopeClosed(self.0.label.clone()));
            }
            let id = state.next_id;
            state.next_id += 1;
            state.entries.push(ScopeEntry {
                id,
                resource: resource.clone() as Arc<dyn Releasable>,
            });
            id
        };

        resource.attach(ScopeLink {
            scope: Arc::downgrade(&self.0),
            id,
        });
        Ok(resource)
    }

    /// Creates a child scope registered into this one.
    pub fn nested(&self, label: impl Into<String>) -> Result<DisposableSet> {
        let child = DisposableSet::new(label);
        self.add(Arc::new(child.clone()))?;
        Ok(child)
    }

    pub fn dispose(&self) {
        self.0.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.0.state).disposed
    }

    pub fn len(&self) -> usize {
        lock(&self.0.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }
}

impl Releasable for DisposableSet {
    fn release(&self) {
        self.0.dispose();
    }

    fn attach(&self, link: ScopeLink) {
        self.0.guard.attach(link);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
