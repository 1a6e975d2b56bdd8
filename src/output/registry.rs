//! Process-local bookkeeping of devices held open by virtual outputs.
//!
//! v4l2loopback lets the same node be opened many times, so outputs in one
//! process track which nodes they hold to avoid selecting a device twice.
//! This cannot see other processes or tools; explicitly selecting the
//! device is the only remedy there.

use crate::error::{Result, VirtualOutputError};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::debug;

/// Shared set of device identifiers currently claimed. Cloning yields a
/// handle onto the same set.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    active: Arc<Mutex<BTreeSet<String>>>,
}

impl DeviceRegistry {
    /// Creates an empty registry, independent of every other one.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every output in this process that was not
    /// given one explicitly.
    pub fn shared() -> Self {
        static SHARED: OnceLock<DeviceRegistry> = OnceLock::new();
        SHARED.get_or_init(DeviceRegistry::new).clone()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        // A panic while holding the lock cannot leave a set half-updated
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically checks that `device` is free and reserves it.
    ///
    /// The reservation is released when the returned [`Claim`] is dropped,
    /// so a device that fails to open or configure never stays registered.
    pub fn try_claim(&self, device: &str) -> Result<Claim> {
        let mut active = self.lock();
        if !active.insert(device.to_string()) {
            return Err(VirtualOutputError::DeviceInUse {
                device: device.to_string(),
            });
        }
        debug!("Claimed {}", device);
        Ok(Claim {
            registry: self.clone(),
            device: device.to_string(),
        })
    }

    // Only a Claim removes entries, so an identifier stays registered for
    // exactly as long as its owner lives.
    fn remove(&self, device: &str) {
        if self.lock().remove(device) {
            debug!("Released {}", device);
        }
    }

    pub fn contains(&self, device: &str) -> bool {
        self.lock().contains(device)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sorted copy of the claimed identifiers.
    pub fn devices(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }
}

/// Ownership of one registry entry; releases it on drop.
#[derive(Debug)]
pub struct Claim {
    registry: DeviceRegistry,
    device: String,
}

impl Claim {
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Gives the entry back now instead of at end of scope.
    pub fn release(self) {}
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.registry.remove(&self.device);
    }
}
