//! Shared device selection.
//!
//! A [`DeviceRegistry`] is cheap to clone; every clone sees the same selection,
//! scan results and observers. Hand one to the [`Scanner`](crate::scanner::Scanner)
//! and to each [`HrMonitor`](crate::monitor::HrMonitor) that should follow it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tracing::{debug, error, info};

use crate::error::RegistryError;


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub name: String,
    /// Opaque platform identifier, passed back to the transport on connect.
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedDevice {
    pub address: String,
    pub name: Option<String>,
}

pub type Observer = Arc<dyn Fn() + Send + Sync>;

struct ObserverEntry {
    id: u64,
    callback: Observer,
    handles: usize,
}

#[derive(Default)]
struct ObserverList {
    next_id: u64,
    entries: Vec<ObserverEntry>,
}

#[derive(Default)]
struct Inner {
    selected: RwLock<Option<SelectedDevice>>,
    scan_results: RwLock<Vec<ScanResult>>,
    observers: Mutex<ObserverList>,
}

impl Inner {
    fn observers(&self) -> MutexGuard<'_, ObserverList> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<Inner>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the selection, then runs every observer in registration order.
    ///
    /// Observers run on the caller's thread after the selection is visible and
    /// with no registry lock held, so an observer may read the registry or even
    /// select another device. A panicking observer is logged and skipped.
    pub fn set_device(
        &self,
        address: impl Into<String>,
        name: Option<String>,
    ) -> Result<(), RegistryError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(RegistryError::EmptyAddress);
        }

        info!(%address, name = name.as_deref().unwrap_or("unknown"), "Device selected");
        *self.inner.selected.write().unwrap_or_else(PoisonError::into_inner) =
            Some(SelectedDevice { address, name });

        let callbacks: Vec<(u64, Observer)> = self
            .inner
            .observers()
            .entries
            .iter()
            .map(|entry| (entry.id, entry.callback.clone()))
            .collect();

        for (id, callback) in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!(observer = id, "Device observer panicked, continuing with the rest");
            }
        }
        Ok(())
    }

    pub fn selected(&self) -> Option<SelectedDevice> {
        self.inner.selected.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn last_scan_results(&self) -> Vec<ScanResult> {
        self.inner.scan_results.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn replace_scan_results(&self, results: Vec<ScanResult>) {
        *self.inner.scan_results.write().unwrap_or_else(PoisonError::into_inner) = results;
    }

    /// Registers `observer` to run on every selection change.
    ///
    /// Subscribing the same `Arc` again does not add a second entry; the observer
    /// stays registered until every returned [`Subscription`] is dropped.
    pub fn subscribe(&self, observer: Observer) -> Subscription {
        let mut list = self.inner.observers();

        let existing = list.entries.iter().position(|e| Arc::ptr_eq(&e.callback, &observer));
        let id = match existing {
            Some(pos) => {
                let entry = &mut list.entries[pos];
                entry.handles += 1;
                debug!(observer = entry.id, "Observer already registered");
                entry.id
            }
            None => {
                let id = list.next_id;
                list.next_id += 1;
                list.entries.push(ObserverEntry { id, callback: observer, handles: 1 });
                id
            }
        };

        Subscription {
            registry: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers().entries.len()
    }
}

/// Keeps an observer registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unregisters the observer"]
pub struct Subscription {
    registry: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.registry.upgrade() else { return; };
        let mut list = inner.observers();
        if let Some(pos) = list.entries.iter().position(|e| e.id == self.id) {
            list.entries[pos].handles -= 1;
            if list.entries[pos].handles == 0 {
                list.entries.remove(pos);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, Observer) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let observer: Observer = Arc::new(move || { c.fetch_add(1, Ordering::SeqCst); });
        (count, observer)
    }

    #[test]
    fn nothing_selected_initially() {
        let registry = DeviceRegistry::new();
        assert_eq!(registry.selected(), None);
        assert!(registry.last_scan_results().is_empty());
    }

    #[test]
    fn set_device_replaces_selection() {
        let registry = DeviceRegistry::new();
        registry.set_device("AA:BB", Some("Polar".into())).unwrap();
        assert_eq!(
            registry.selected(),
            Some(SelectedDevice { address: "AA:BB".into(), name: Some("Polar".into()) })
        );

        registry.set_device("CC:DD", None).unwrap();
        assert_eq!(
            registry.selected(),
            Some(SelectedDevice { address: "CC:DD".into(), name: None })
        );
    }

    #[test]
    fn empty_address_is_rejected() {
        let registry = DeviceRegistry::new();
        registry.set_device("AA:BB", None).unwrap();
        assert_eq!(registry.set_device("  ", Some("x".into())), Err(RegistryError::EmptyAddress));
        assert_eq!(registry.selected().unwrap().address, "AA:BB");
    }

    #[test]
    fn clones_share_selection() {
        let registry = DeviceRegistry::new();
        let other = registry.clone();
        registry.set_device("AA:BB", None).unwrap();
        assert_eq!(other.selected().unwrap().address, "AA:BB");
    }

    #[test]
    fn duplicate_subscription_runs_once() {
        let registry = DeviceRegistry::new();
        let (count, observer) = counter();
        let _a = registry.subscribe(observer.clone());
        let _b = registry.subscribe(observer);
        assert_eq!(registry.observer_count(), 1);

        registry.set_device("AA:BB", Some("Polar".into())).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observer_stays_until_last_handle_dropped() {
        let registry = DeviceRegistry::new();
        let (count, observer) = counter();
        let a = registry.subscribe(observer.clone());
        let b = registry.subscribe(observer);

        a.unsubscribe();
        registry.set_device("AA:BB", None).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(b);
        assert_eq!(registry.observer_count(), 0);
        registry.set_device("CC:DD", None).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observers_run_in_registration_order() {
        let registry = DeviceRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let order = order.clone();
                registry.subscribe(Arc::new(move || order.lock().unwrap().push(i)))
            })
            .collect();

        registry.set_device("AA:BB", None).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn panicking_observer_does_not_stop_the_rest() {
        let registry = DeviceRegistry::new();
        let _bad = registry.subscribe(Arc::new(|| panic!("observer failure")));
        let (count, observer) = counter();
        let _good = registry.subscribe(observer);

        registry.set_device("AA:BB", None).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observer_sees_new_selection() {
        let registry = DeviceRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let (r, s) = (registry.clone(), seen.clone());
        let _sub = registry.subscribe(Arc::new(move || *s.lock().unwrap() = r.selected()));

        registry.set_device("AA:BB", Some("Polar".into())).unwrap();
        assert_eq!(seen.lock().unwrap().as_ref().unwrap().address, "AA:BB");
    }
}
