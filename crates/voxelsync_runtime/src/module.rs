//! Content modules and the environments built from them.
//!
//! An [`Environment`] is the active content set: the modules that were
//! resolved and the component/event registries they declare. Switching
//! environments happens only at startup or during teardown.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use voxelsync_foundation::{Error, Result};
use voxelsync_storage::{
    ComponentDef, ComponentLibrary, EntitySystemLibrary, EventDef, EventLibrary,
};

/// A unit of content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Module {
    /// Unique id.
    pub id: String,
    /// Modules that must load first.
    pub dependencies: Vec<String>,
    /// Component kinds declared by this module.
    pub components: Vec<ComponentDef>,
    /// Event kinds declared by this module.
    pub events: Vec<EventDef>,
}

impl Module {
    /// An empty module.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            components: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Adds a dependency.
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Declares a component kind.
    #[must_use]
    pub fn with_component(mut self, def: ComponentDef) -> Self {
        self.components.push(def);
        self
    }

    /// Declares an event kind.
    #[must_use]
    pub fn with_event(mut self, def: EventDef) -> Self {
        self.events.push(def);
        self
    }
}

/// A resolved content set.
#[derive(Debug)]
pub struct Environment {
    modules: Vec<String>,
    library: EntitySystemLibrary,
    closed: AtomicBool,
}

impl Environment {
    /// The environment with no modules.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            modules: Vec::new(),
            library: EntitySystemLibrary::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Builds the registries of `modules`, which must be in dependency order.
    ///
    /// # Errors
    ///
    /// Returns `ModuleResolution` if two modules declare the same kind.
    pub fn build(modules: &[Module]) -> Result<Self> {
        let mut components = ComponentLibrary::new();
        let mut events = EventLibrary::new();
        for module in modules {
            for def in &module.components {
                components.register(def.clone()).map_err(|e| {
                    Error::module_resolution(format!("module {}: {e}", module.id))
                })?;
            }
            for def in &module.events {
                events.register(def.clone()).map_err(|e| {
                    Error::module_resolution(format!("module {}: {e}", module.id))
                })?;
            }
        }
        Ok(Self {
            modules: modules.iter().map(|m| m.id.clone()).collect(),
            library: EntitySystemLibrary::new(components, events),
            closed: AtomicBool::new(false),
        })
    }

    /// Module ids in load order.
    #[must_use]
    pub fn module_ids(&self) -> &[String] {
        &self.modules
    }

    /// Returns true if the module is part of this environment.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.modules.iter().any(|m| m == id)
    }

    /// Component kinds.
    #[must_use]
    pub fn components(&self) -> &Arc<ComponentLibrary> {
        &self.library.components
    }

    /// Event kinds.
    #[must_use]
    pub fn events(&self) -> &Arc<EventLibrary> {
        &self.library.events
    }

    /// Releases the environment. Repeated calls do nothing.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("closed environment [{}]", self.modules.join(", "));
        }
    }

    /// Returns true after [`Self::close`].
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Resolves module sets into environments.
pub trait ModuleManager {
    /// The primary environment, if one is loaded.
    fn environment(&self) -> Option<Arc<Environment>>;

    /// Resolves `modules` and their dependencies into an environment. With
    /// `as_primary` the result replaces the primary environment; the previous
    /// one is not closed.
    ///
    /// # Errors
    ///
    /// Returns `ModuleResolution` for unknown modules, dependency cycles or
    /// conflicting kinds. The primary environment is unchanged on error.
    fn load_environment(&mut self, modules: &[String], as_primary: bool)
    -> Result<Arc<Environment>>;
}

/// Told as teardown unloads the world and, unless shutting down, swaps in the
/// empty environment.
pub trait EnvironmentSwitchHandler {
    /// The store dropped the world's `entities`.
    fn handle_world_unloaded(&mut self, _entities: usize) {}

    /// The empty environment is now primary.
    fn handle_switch_to_empty_environment(&mut self);
}

/// A switch handler that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSwitchHandler;

impl EnvironmentSwitchHandler for NullSwitchHandler {
    fn handle_switch_to_empty_environment(&mut self) {}
}

/// Module manager over a fixed catalog known at startup.
#[derive(Debug, Default)]
pub struct StaticModuleManager {
    catalog: BTreeMap<String, Module>,
    primary: Option<Arc<Environment>>,
}

impl StaticModuleManager {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module to the catalog, replacing any module with the same id.
    #[must_use]
    pub fn with_module(mut self, module: Module) -> Self {
        self.catalog.insert(module.id.clone(), module);
        self
    }

    /// Ids in the catalog.
    pub fn available(&self) -> impl Iterator<Item = &str> {
        self.catalog.keys().map(String::as_str)
    }

    /// `modules` and their dependencies, dependencies first.
    ///
    /// # Errors
    ///
    /// Returns `ModuleResolution` for unknown modules or cycles.
    pub fn resolve(&self, modules: &[String]) -> Result<Vec<Module>> {
        let mut ordered = Vec::new();
        let mut done = BTreeSet::new();
        for id in modules {
            self.visit(id, &mut Vec::new(), &mut done, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit(
        &self,
        id: &str,
        path: &mut Vec<String>,
        done: &mut BTreeSet<String>,
        ordered: &mut Vec<Module>,
    ) -> Result<()> {
        if done.contains(id) {
            return Ok(());
        }
        if path.iter().any(|p| p == id) {
            return Err(Error::module_resolution(format!(
                "dependency cycle: {} -> {id}",
                path.join(" -> ")
            )));
        }
        let module = self.catalog.get(id).ok_or_else(|| {
            let needed_by = path.last().map_or(String::new(), |p| format!(" (needed by {p})"));
            Error::module_resolution(format!("unknown module {id}{needed_by}"))
        })?;

        path.push(id.to_string());
        for dep in &module.dependencies {
            self.visit(dep, path, done, ordered)?;
        }
        path.pop();

        done.insert(id.to_string());
        ordered.push(module.clone());
        Ok(())
    }
}

impl ModuleManager for StaticModuleManager {
    fn environment(&self) -> Option<Arc<Environment>> {
        self.primary.clone()
    }

    fn load_environment(
        &mut self,
        modules: &[String],
        as_primary: bool,
    ) -> Result<Arc<Environment>> {
        let resolved = self.resolve(modules)?;
        let environment = Arc::new(Environment::build(&resolved)?);
        if as_primary {
            info!("primary environment: [{}]", environment.module_ids().join(", "));
            self.primary = Some(Arc::clone(&environment));
        }
        Ok(environment)
    }
}
