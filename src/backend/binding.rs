//! Binding between a context and its crypto backend
//!
//! The backend comes from a capability lookup run once when the binding is
//! built. It can be swapped later with `rebind`, so a test or a
//! reconfiguration can point an existing context at a different backend.
//!
//! The binding also owns the one backend instance a context uses. The
//! instance is created on demand by `acquire_instance` and released either by
//! `release_instance` (identity destroy, last deinit) or by `rebind`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::{BackendHandle, CryptoBackend};
use crate::error::BackendError;

pub struct CryptoBackendBinding {
    backend: RwLock<Arc<dyn CryptoBackend>>,
    instance: Mutex<Option<BackendHandle>>,
}

impl CryptoBackendBinding {
    pub fn new(backend: Arc<dyn CryptoBackend>) -> Self {
        Self {
            backend: RwLock::new(backend),
            instance: Mutex::new(None),
        }
    }

    /// Resolve the backend through a lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: FnOnce() -> Arc<dyn CryptoBackend>,
    {
        Self::new(lookup())
    }

    /// The backend currently bound.
    pub fn bind(&self) -> Arc<dyn CryptoBackend> {
        Arc::clone(&self.backend.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Point this binding at another backend.
    ///
    /// An instance held for the previous backend is destroyed on that backend
    /// first; handles never cross backends.
    pub fn rebind(&self, backend: Arc<dyn CryptoBackend>) {
        let mut slot = self.slot();
        let mut current = self.backend.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            log::debug!("Releasing backend instance {} before rebind", handle.id());
            current.destroy_instance(handle);
        }
        *current = backend;
    }

    /// The instance currently held, if any.
    pub fn instance(&self) -> Option<BackendHandle> {
        *self.slot()
    }

    /// Return the held instance, creating one on `backend` if the slot is
    /// empty. The flag is `true` when this call created it.
    pub fn acquire_instance(
        &self,
        backend: &dyn CryptoBackend,
    ) -> Result<(BackendHandle, bool), BackendError> {
        let mut slot = self.slot();
        if let Some(handle) = *slot {
            return Ok((handle, false));
        }

        let handle = backend.create_instance()?;
        log::debug!("Created backend instance {}", handle.id());
        *slot = Some(handle);
        Ok((handle, true))
    }

    /// Destroy the held instance on `backend`. Returns the released handle.
    pub fn release_instance(&self, backend: &dyn CryptoBackend) -> Option<BackendHandle> {
        let handle = self.slot().take()?;
        log::debug!("Destroying backend instance {}", handle.id());
        backend.destroy_instance(handle);
        Some(handle)
    }

    /// Run `op` against the held instance, or against a transient instance
    /// that is destroyed again before returning when the slot is empty.
    pub fn with_instance<T, F>(&self, backend: &dyn CryptoBackend, op: F) -> Result<T, BackendError>
    where
        F: FnOnce(&BackendHandle) -> Result<T, BackendError>,
    {
        if let Some(handle) = self.instance() {
            return op(&handle);
        }

        let handle = backend.create_instance()?;
        let result = op(&handle);
        backend.destroy_instance(handle);
        result
    }

    fn slot(&self) -> MutexGuard<'_, Option<BackendHandle>> {
        self.instance.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
