//! Service container passed to middleware constructors.
//!
//! Middlewares declare their collaborators (a user repository, a shared auth
//! strategy set, an external cache backend) by looking them up here by name
//! instead of reaching for global state. Values are type-erased; asking for
//! a registered name with the wrong type yields `None`.

use crate::pipeline::config::MiddlewareConfig;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

type Erased = Box<dyn Any + Send + Sync>;
type Builder = Arc<dyn Fn(&ServiceContainer) -> Erased + Send + Sync>;

#[derive(Clone)]
enum Provider {
    Instance(Arc<dyn Any + Send + Sync>),
    Factory(Builder),
    Singleton {
        build: Builder,
        cell: Arc<OnceLock<Erased>>,
    },
}

#[derive(Default)]
pub struct ServiceContainer {
    providers: RwLock<HashMap<String, Provider>>,
    configurations: RwLock<HashMap<String, MiddlewareConfig>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a ready-made value. `T` is usually an `Arc<...>` so lookups are cheap clones.
    pub fn register_service<T>(&self, name: &str, value: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.providers
            .write()
            .insert(name.to_string(), Provider::Instance(Arc::new(value)));
        tracing::debug!(service = name, "Registered service");
    }

    /// Registers a factory invoked on every lookup.
    pub fn register_factory<T, F>(&self, name: &str, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> T + Send + Sync + 'static,
    {
        let build: Builder = Arc::new(move |c| Box::new(factory(c)));
        self.providers
            .write()
            .insert(name.to_string(), Provider::Factory(build));
        tracing::debug!(service = name, "Registered factory");
    }

    /// Registers a value built on first lookup and shared afterwards.
    pub fn register_singleton<T, F>(&self, name: &str, factory: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> T + Send + Sync + 'static,
    {
        let build: Builder = Arc::new(move |c| Box::new(factory(c)));
        self.providers.write().insert(
            name.to_string(),
            Provider::Singleton {
                build,
                cell: Arc::new(OnceLock::new()),
            },
        );
        tracing::debug!(service = name, "Registered singleton");
    }

    pub fn register_configuration(&self, name: &str, config: MiddlewareConfig) {
        self.configurations.write().insert(name.to_string(), config);
    }

    /// Resolves a service. Factories produce a fresh value on each call.
    pub fn get_service<T>(&self, name: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        // The lock is released before resolving so builders may look up other services.
        let provider = self.providers.read().get(name).cloned()?;

        match provider {
            Provider::Instance(value) => value.downcast_ref::<T>().cloned(),
            Provider::Factory(build) => build(self).downcast::<T>().ok().map(|v| *v),
            Provider::Singleton { build, cell } => {
                cell.get_or_init(|| build(self)).downcast_ref::<T>().cloned()
            }
        }
    }

    /// Builds a new value from a registered factory. Non-factory names yield `None`.
    pub fn get_new_instance<T>(&self, name: &str) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        let provider = self.providers.read().get(name).cloned()?;

        match provider {
            Provider::Factory(build) => build(self).downcast::<T>().ok().map(|v| *v),
            _ => {
                tracing::debug!(service = name, "Service is not a factory");
                None
            }
        }
    }

    pub fn get_configuration(&self, name: &str) -> Option<MiddlewareConfig> {
        self.configurations.read().get(name).cloned()
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.providers.read().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.providers.write().remove(name).is_some()
    }

    pub fn clear(&self) {
        self.providers.write().clear();
        self.configurations.write().clear();
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.providers.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("ServiceContainer")
            .field("services", &names)
            .finish()
    }
}
