//! Type-indexed lookup of shared services.
//!
//! [`ServiceLocator`] lets components reach cross-cutting services (such as the
//! GPIO pin map) without threading them through every constructor. It holds
//! only weak references: the application owns the services and the locator
//! never keeps one alive.
//!
//! Registration is expected to finish before any thread starts looking
//! services up.
//!
//! ```rust
//! use std::sync::Arc;
//! use filament_core::locator::ServiceLocator;
//!
//! struct Clock(u64);
//!
//! let clock = Arc::new(Clock(42));
//! let mut locator = ServiceLocator::new();
//! locator.add(&clock);
//!
//! assert_eq!(locator.get::<Clock>().0, 42);
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Weak, type-indexed service registry.
#[derive(Default)]
pub struct ServiceLocator {
    services: HashMap<TypeId, Weak<dyn Any + Send + Sync>>,
}

impl ServiceLocator {
    /// Creates an empty locator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under its type, replacing an earlier registration.
    pub fn add<T: Any + Send + Sync>(&mut self, service: &Arc<T>) {
        let service: Arc<dyn Any + Send + Sync> = service.clone();
        self.services
            .insert(TypeId::of::<T>(), Arc::downgrade(&service));
    }

    /// Look up a service that must exist.
    ///
    /// # Panics
    ///
    /// Panics if `T` was never registered or its owner has dropped it. A
    /// missing service is a wiring error in the application.
    pub fn get<T: Any + Send + Sync>(&self) -> Arc<T> {
        match self.try_get::<T>() {
            Some(service) => service,
            None => panic!("service {} is not registered", type_name::<T>()),
        }
    }

    /// Look up a service, returning `None` if absent or dropped.
    pub fn try_get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let service = self.services.get(&TypeId::of::<T>())?.upgrade()?;
        service.downcast::<T>().ok()
    }

    /// Returns true if `T` is registered and still alive.
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.try_get::<T>().is_some()
    }
}
