//! Initialization counter for an identity context
//!
//! `init` and `deinit` nest. Only the first `init` touches the backend, and
//! only the `deinit` that brings the count back to zero tears it down. A
//! failed backend init leaves the count at zero so the next `init` retries.
//!
//! Gated operations run with the counter locked, so a final `deinit` cannot
//! tear the backend down underneath them. The closures handed to `gated`,
//! `when_initialized` and `with_count` must not call back into the same
//! `Lifecycle`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::CryptoBackendBinding;
use crate::error::{X509Error, X509Result};

#[derive(Default)]
pub struct Lifecycle {
    counter: Mutex<usize>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&self, binding: &CryptoBackendBinding) -> X509Result<()> {
        let mut count = self.counter();
        if *count == 0 {
            if let Err(e) = binding.bind().init() {
                log::warn!("Crypto backend init failed: {}", e);
                return Err(X509Error::BackendInit(e.to_string()));
            }
            log::info!("Crypto backend initialized");
        }
        *count += 1;
        log::debug!("X509 init count now {}", *count);
        Ok(())
    }

    pub fn deinit(&self, binding: &CryptoBackendBinding) {
        let mut count = self.counter();
        if *count == 0 {
            log::debug!("X509 deinit called while not initialized");
            return;
        }

        *count -= 1;
        if *count == 0 {
            teardown(binding);
        } else {
            log::debug!("X509 init count now {}", *count);
        }
    }

    /// Drop every outstanding `init` at once, tearing the backend down if it
    /// was up. Used when the owning context goes away.
    pub fn shutdown(&self, binding: &CryptoBackendBinding) {
        let mut count = self.counter();
        if *count == 0 {
            return;
        }

        log::warn!("Shutting down with {} outstanding X509 init(s)", *count);
        *count = 0;
        teardown(binding);
    }

    /// Run `op` while holding the counter, failing with `NotInitialized`
    /// unless at least one `init` is outstanding.
    pub fn gated<T>(&self, op: impl FnOnce() -> X509Result<T>) -> X509Result<T> {
        self.with_count(|count| {
            if count == 0 {
                Err(X509Error::NotInitialized)
            } else {
                op()
            }
        })
    }

    /// Run `op` while holding the counter if initialized, otherwise skip it.
    pub fn when_initialized<T>(&self, op: impl FnOnce() -> T) -> Option<T> {
        self.with_count(|count| (count > 0).then(op))
    }

    /// Run `op` with the current count, holding the counter until it returns.
    pub fn with_count<T>(&self, op: impl FnOnce(usize) -> T) -> T {
        let count = self.counter();
        op(*count)
    }

    pub fn is_initialized(&self) -> bool {
        self.count() > 0
    }

    pub fn count(&self) -> usize {
        *self.counter()
    }

    fn counter(&self) -> MutexGuard<'_, usize> {
        self.counter.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn teardown(binding: &CryptoBackendBinding) {
    let backend = binding.bind();
    binding.release_instance(backend.as_ref());
    backend.deinit();
    log::info!("Crypto backend deinitialized");
}
