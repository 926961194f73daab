//! Ordered catalog of middleware descriptors with lazily built singletons.
//!
//! Descriptors are kept in ascending priority order; equal priorities keep
//! registration order. Instances are constructed on first access from the
//! descriptor's constructor and cached until the descriptor's configuration
//! or enabled flag changes.

use crate::error::AppError;
use crate::pipeline::config::MiddlewareConfig;
use crate::pipeline::container::ServiceContainer;
use crate::pipeline::middleware::Middleware;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Builds a middleware instance from its config and the shared services.
pub type MiddlewareConstructor = Arc<
    dyn Fn(&MiddlewareConfig, &ServiceContainer) -> Result<Arc<dyn Middleware>, AppError>
        + Send
        + Sync,
>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("middleware '{0}' is already registered")]
    DuplicateName(String),
    #[error("middleware '{0}' is not registered")]
    NotRegistered(String),
}

/// Registration parameters for one middleware.
#[derive(Clone)]
pub struct MiddlewareDescriptor {
    pub name: String,
    pub group: Option<String>,
    pub priority: i32,
    pub config: MiddlewareConfig,
    pub enabled: bool,
    constructor: MiddlewareConstructor,
}

impl MiddlewareDescriptor {
    pub fn new(name: impl Into<String>, constructor: MiddlewareConstructor) -> Self {
        Self {
            name: name.into(),
            group: None,
            priority: 100,
            config: MiddlewareConfig::default(),
            enabled: true,
            constructor,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Sets the config; its `enabled` key becomes the initial enabled flag.
    pub fn config(mut self, config: MiddlewareConfig) -> Self {
        self.enabled = config.enabled();
        self.config = config;
        self
    }
}

impl std::fmt::Debug for MiddlewareDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareDescriptor")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// A constructed middleware paired with the name it was registered under.
#[derive(Clone)]
pub struct PipelineInstance {
    pub name: String,
    pub middleware: Arc<dyn Middleware>,
}

#[derive(Default)]
struct RegistryState {
    descriptors: HashMap<String, MiddlewareDescriptor>,
    /// Names in ascending priority order.
    order: Vec<String>,
    groups: BTreeMap<String, Vec<String>>,
    instances: HashMap<String, Arc<dyn Middleware>>,
}

impl RegistryState {
    fn insert_ordered(&mut self, name: &str, priority: i32) {
        let position = self
            .order
            .iter()
            .position(|existing| {
                self.descriptors
                    .get(existing)
                    .is_some_and(|d| d.priority > priority)
            })
            .unwrap_or(self.order.len());
        self.order.insert(position, name.to_string());
    }

    fn detach(&mut self, name: &str) -> Option<MiddlewareDescriptor> {
        let descriptor = self.descriptors.remove(name)?;
        self.order.retain(|n| n != name);
        self.instances.remove(name);
        for members in self.groups.values_mut() {
            members.retain(|n| n != name);
        }
        self.groups.retain(|_, members| !members.is_empty());
        Some(descriptor)
    }
}

pub struct MiddlewareRegistry {
    state: RwLock<RegistryState>,
    services: Arc<ServiceContainer>,
}

impl MiddlewareRegistry {
    pub fn new(services: Arc<ServiceContainer>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            services,
        }
    }

    pub fn services(&self) -> &Arc<ServiceContainer> {
        &self.services
    }

    /// Adds a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if the name is taken; use
    /// [`register_replace`](Self::register_replace) to overwrite.
    pub fn register(&self, descriptor: MiddlewareDescriptor) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        if state.descriptors.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateName(descriptor.name));
        }
        Self::attach(&mut state, descriptor);
        Ok(())
    }

    /// Adds a descriptor, replacing and re-ordering any existing one with the same name.
    pub fn register_replace(&self, descriptor: MiddlewareDescriptor) {
        let mut state = self.state.write();
        if state.detach(&descriptor.name).is_some() {
            debug!(middleware = %descriptor.name, "Replacing registered middleware");
        }
        Self::attach(&mut state, descriptor);
    }

    fn attach(state: &mut RegistryState, descriptor: MiddlewareDescriptor) {
        let name = descriptor.name.clone();
        let priority = descriptor.priority;
        if let Some(group) = &descriptor.group {
            state
                .groups
                .entry(group.clone())
                .or_default()
                .push(name.clone());
        }
        info!(
            middleware = %name,
            priority,
            group = descriptor.group.as_deref().unwrap_or("-"),
            "Registered middleware"
        );
        state.descriptors.insert(name.clone(), descriptor);
        state.insert_ordered(&name, priority);
    }

    /// Returns the singleton instance, building it on first access.
    ///
    /// Yields `None` when the name is unknown, the middleware is disabled, or
    /// its constructor fails (the failure is logged).
    pub fn get(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        {
            let state = self.state.read();
            let descriptor = state.descriptors.get(name)?;
            if !descriptor.enabled {
                return None;
            }
            if let Some(instance) = state.instances.get(name) {
                return Some(instance.clone());
            }
        }

        let mut state = self.state.write();
        if let Some(instance) = state.instances.get(name) {
            return Some(instance.clone());
        }
        let descriptor = state.descriptors.get(name)?;
        if !descriptor.enabled {
            return None;
        }

        match (descriptor.constructor)(&descriptor.config, &self.services) {
            Ok(instance) => {
                debug!(middleware = name, "Constructed middleware instance");
                state.instances.insert(name.to_string(), instance.clone());
                Some(instance)
            }
            Err(e) => {
                error!(middleware = name, error = %e, "Failed to construct middleware");
                None
            }
        }
    }

    /// Enabled instances in ascending priority order.
    pub fn get_all_ordered(&self) -> Vec<PipelineInstance> {
        let names = self.state.read().order.clone();
        self.instances_for(names)
    }

    /// Enabled instances of one group, in priority order.
    pub fn get_by_group(&self, group: &str) -> Vec<PipelineInstance> {
        let members = self.descriptor_names_in(group);
        let names = self
            .state
            .read()
            .order
            .iter()
            .filter(|n| members.contains(n))
            .cloned()
            .collect();
        self.instances_for(names)
    }

    fn instances_for(&self, names: Vec<String>) -> Vec<PipelineInstance> {
        names
            .into_iter()
            .filter_map(|name| {
                self.get(&name)
                    .map(|middleware| PipelineInstance { name, middleware })
            })
            .collect()
    }

    /// Replaces the configuration and drops the cached instance.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] for unknown names.
    pub fn update_config(&self, name: &str, config: MiddlewareConfig) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        let descriptor = state
            .descriptors
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;
        descriptor.enabled = config.enabled();
        descriptor.config = config;
        state.instances.remove(name);
        info!(middleware = name, "Updated middleware config");
        Ok(())
    }

    /// Toggles a middleware without touching its config.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] for unknown names.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        let descriptor = state
            .descriptors
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;
        descriptor.enabled = enabled;
        state.instances.remove(name);
        Ok(())
    }

    /// Removes the descriptor, its instance and its group membership.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.state.write().detach(name).is_some();
        if removed {
            info!(middleware = name, "Unregistered middleware");
        }
        removed
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.state.read().descriptors.contains_key(name)
    }

    /// All registered names in priority order, enabled or not.
    pub fn list_registered(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    pub fn list_groups(&self) -> Vec<String> {
        self.state.read().groups.keys().cloned().collect()
    }

    pub fn descriptor_names_in(&self, group: &str) -> Vec<String> {
        self.state
            .read()
            .groups
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_config(&self, name: &str) -> Option<MiddlewareConfig> {
        self.state
            .read()
            .descriptors
            .get(name)
            .map(|d| d.config.clone())
    }

    pub fn clear(&self) {
        *self.state.write() = RegistryState::default();
    }
}
