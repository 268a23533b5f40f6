//! Pluggable server components with an explicit lifecycle.
//!
//! Components declare dependencies by name and are ordered topologically.
//! Lifecycle: `init` for all (registering methods), then a components-ready
//! hook, then `start` — each pass in dependency order. Shutdown runs in
//! reverse order with a bounded grace period per component.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use forge_core::errors::ComponentError;
use forge_core::events::EventBus;

use crate::rpc::registry::MethodRegistry;

/// Name and dependencies of one component.
#[derive(Clone, Debug)]
pub struct ComponentDescriptor {
    /// Unique component name.
    pub name: String,
    /// Names of components that must initialize first.
    pub depends_on: Vec<String>,
}

impl ComponentDescriptor {
    /// Descriptor with no dependencies.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            depends_on: Vec::new(),
        }
    }

    /// Descriptor with dependencies.
    #[must_use]
    pub fn with_deps(name: &str, deps: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            depends_on: deps.iter().map(ToString::to_string).collect(),
        }
    }
}

/// One server component.
#[async_trait]
pub trait Component: Send + Sync {
    /// Identity and dependencies.
    fn descriptor(&self) -> ComponentDescriptor;

    /// Register methods and subscribe to events. Runs in dependency order
    /// before any request is served; an error here aborts startup.
    async fn init(
        &self,
        _registry: &mut MethodRegistry,
        _bus: &EventBus,
    ) -> Result<(), ComponentError> {
        Ok(())
    }

    /// All components have initialized.
    async fn on_components_ready(&self) {}

    /// Begin background work.
    async fn start(&self) {}

    /// The firmware reached the ready state (fires on every reconnect).
    async fn on_firmware_ready(&self) {}

    /// Stop background work. Bounded by the shutdown grace period.
    async fn stop(&self) {}
}

/// Components in initialization order.
pub struct ComponentRegistry {
    ordered: Vec<Arc<dyn Component>>,
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field(
                "ordered",
                &self
                    .ordered
                    .iter()
                    .map(|c| c.descriptor().name)
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ComponentRegistry {
    /// Order components topologically by their declared dependencies.
    ///
    /// Sibling order follows the registration order the caller provided.
    /// Unknown dependencies and cycles are fatal.
    pub fn new(components: Vec<Arc<dyn Component>>) -> Result<Self, ComponentError> {
        let names: Vec<String> = components.iter().map(|c| c.descriptor().name).collect();
        for component in &components {
            let desc = component.descriptor();
            for dep in &desc.depends_on {
                if !names.contains(dep) {
                    return Err(ComponentError::UnknownDependency {
                        component: desc.name,
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut remaining = components;
        let mut placed: Vec<String> = Vec::new();
        let mut ordered: Vec<Arc<dyn Component>> = Vec::new();
        while !remaining.is_empty() {
            let next = remaining.iter().position(|c| {
                c.descriptor()
                    .depends_on
                    .iter()
                    .all(|d| placed.contains(d))
            });
            let Some(next) = next else {
                return Err(ComponentError::DependencyCycle {
                    names: remaining.iter().map(|c| c.descriptor().name).collect(),
                });
            };
            let component = remaining.remove(next);
            placed.push(component.descriptor().name);
            ordered.push(component);
        }
        Ok(Self { ordered })
    }

    /// Component names in initialization order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.ordered.iter().map(|c| c.descriptor().name).collect()
    }

    /// Run `init` for every component, then the components-ready hook, then
    /// `start`, each pass in dependency order.
    pub async fn bring_up(
        &self,
        registry: &mut MethodRegistry,
        bus: &EventBus,
    ) -> Result<(), ComponentError> {
        for component in &self.ordered {
            let name = component.descriptor().name;
            debug!(component = %name, "initializing component");
            component.init(registry, bus).await?;
        }
        for component in &self.ordered {
            component.on_components_ready().await;
        }
        for component in &self.ordered {
            component.start().await;
        }
        info!(count = self.ordered.len(), "components started");
        Ok(())
    }

    /// Propagate firmware readiness in dependency order.
    pub async fn notify_firmware_ready(&self) {
        for component in &self.ordered {
            component.on_firmware_ready().await;
        }
    }

    /// Stop components in reverse order. A component exceeding the grace
    /// period is abandoned and shutdown continues.
    pub async fn shutdown(&self, grace: Duration) {
        for component in self.ordered.iter().rev() {
            let name = component.descriptor().name;
            if tokio::time::timeout(grace, component.stop()).await.is_err() {
                warn!(component = %name, grace_ms = grace.as_millis() as u64, "component stop exceeded grace period, abandoned");
                metrics::counter!("forge_component_stop_timeouts").increment(1);
            }
        }
    }
}
