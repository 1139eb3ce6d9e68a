//! Subscription interfaces for session and peripheral callbacks
//!
//! Observers are held weakly: dropping the last `Arc` of an observer unsubscribes it. Subscribing twice with
//! the same [`observer_id`](Observer::observer_id) keeps a single registration.

use std::sync::{Arc, Weak};

use async_lock::Mutex;

use crate::gatt::{Characteristic, Descriptor, Service};
use crate::{Device, Error};

/// Identity shared by every observer.
pub trait Observer: Send + Sync {
    /// Stable identifier used to deduplicate and remove subscriptions
    fn observer_id(&self) -> &str;
}

/// Callbacks describing the lifecycle of devices in a [`Session`](crate::Session).
#[allow(unused_variables)]
pub trait SessionObserver: Observer {
    /// An advertisement from `device` was received; `device` reflects the merged state
    fn did_discover(&self, device: &Device) {}

    /// A connection to `device` was established
    fn did_connect(&self, device: &Device) {}

    /// A connection attempt to `device` failed
    fn did_fail_to_connect(&self, device: &Device, error: &Error) {}

    /// `device` disconnected
    fn did_disconnect(&self, device: &Device) {}

    /// The radio was reset and every device was forgotten
    fn radio_reset(&self) {}
}

/// Callbacks describing GATT activity on a single [`Device`].
#[allow(unused_variables)]
pub trait PeripheralObserver: Observer {
    /// The device's services were discovered
    fn did_discover_services(&self, device: &Device, services: &[Service]) {}

    /// The characteristics of `service` were discovered
    fn did_discover_characteristics(&self, device: &Device, service: &Service) {}

    /// A characteristic value was read or notified
    fn did_update_characteristic(&self, device: &Device, characteristic: &Characteristic) {}

    /// A descriptor value was read
    fn did_update_descriptor(&self, device: &Device, characteristic: &Characteristic, descriptor: &Descriptor) {}

    /// A write to `characteristic` was acknowledged
    fn did_write_characteristic(&self, device: &Device, characteristic: &Characteristic) {}
}

pub(crate) struct Registry<O: ?Sized> {
    entries: Mutex<Vec<(String, Weak<O>)>>,
}

impl<O: ?Sized + Observer> Registry<O> {
    pub fn new() -> Self {
        Registry {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Returns `false` if an observer with the same id is already registered.
    pub fn subscribe(&self, id: &str, observer: Weak<O>) -> bool {
        let mut entries = self.entries.lock_blocking();
        entries.retain(|(_, weak)| weak.strong_count() > 0);
        if entries.iter().any(|(existing, _)| existing == id) {
            return false;
        }
        entries.push((id.to_owned(), observer));
        true
    }

    pub fn unsubscribe(&self, id: &str) -> bool {
        let mut entries = self.entries.lock_blocking();
        let before = entries.len();
        entries.retain(|(existing, _)| existing != id);
        entries.len() != before
    }

    /// Live observers, in subscription order. Dead entries are pruned.
    pub fn snapshot(&self) -> Vec<Arc<O>> {
        let mut entries = self.entries.lock_blocking();
        entries.retain(|(_, weak)| weak.strong_count() > 0);
        entries.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
    }
}
