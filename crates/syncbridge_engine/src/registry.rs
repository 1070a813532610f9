//! Module registry and exclusive-group arbitration.

use crate::error::{EngineError, EngineResult};
use crate::module::SyncModule;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// All modules known to the engine, keyed by module id.
///
/// Registration order is significant: it breaks ties between modules of an
/// exclusive group that share a priority.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn SyncModule>>,
    index: HashMap<String, usize>,
    enabled: RwLock<HashMap<String, bool>>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module.
    pub fn register(&mut self, module: impl SyncModule + 'static) -> EngineResult<()> {
        self.register_arc(Arc::new(module))
    }

    /// Adds a shared module.
    pub fn register_arc(&mut self, module: Arc<dyn SyncModule>) -> EngineResult<()> {
        let id = module.module_id().to_string();
        if self.index.contains_key(&id) {
            return Err(EngineError::DuplicateModule(id));
        }
        self.index.insert(id, self.modules.len());
        self.modules.push(module);
        Ok(())
    }

    /// Looks a module up.
    pub fn get(&self, module_id: &str) -> Option<Arc<dyn SyncModule>> {
        self.index.get(module_id).map(|&i| Arc::clone(&self.modules[i]))
    }

    /// Returns true if a module is registered under `module_id`.
    pub fn contains(&self, module_id: &str) -> bool {
        self.index.contains_key(module_id)
    }

    /// Module ids in registration order.
    pub fn module_ids(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.module_id().to_string()).collect()
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if no module is registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Overrides the enabled switch of a module.
    pub fn set_enabled(&self, module_id: &str, enabled: bool) -> EngineResult<()> {
        if !self.contains(module_id) {
            return Err(EngineError::UnknownModule(module_id.to_string()));
        }
        self.enabled.write().insert(module_id.to_string(), enabled);
        info!(module_id, enabled, "module switch changed");
        Ok(())
    }

    /// Returns the enabled switch of a module.
    pub fn is_enabled(&self, module_id: &str) -> bool {
        let Some(module) = self.get(module_id) else {
            return false;
        };
        self.enabled
            .read()
            .get(module_id)
            .copied()
            .unwrap_or(module.registration().enabled)
    }

    /// The active module of an exclusive group.
    ///
    /// Enabled members are ranked by priority (lower first, unset last),
    /// then by registration order.
    pub fn active_module(&self, group: &str) -> Option<String> {
        self.modules
            .iter()
            .enumerate()
            .filter(|(_, m)| m.registration().exclusive_group.as_deref() == Some(group))
            .filter(|(_, m)| self.is_enabled(m.module_id()))
            .min_by_key(|(i, m)| {
                let priority = m.registration().exclusive_priority;
                (priority.is_none(), priority, *i)
            })
            .map(|(_, m)| m.module_id().to_string())
    }

    /// Returns true if the module's change detection should run.
    pub fn is_active(&self, module_id: &str) -> bool {
        let Some(module) = self.get(module_id) else {
            return false;
        };
        if !self.is_enabled(module_id) {
            return false;
        }
        match &module.registration().exclusive_group {
            Some(group) => self.active_module(group).as_deref() == Some(module_id),
            None => true,
        }
    }

    /// Returns true if the module is registered but not active.
    pub fn is_dormant(&self, module_id: &str) -> bool {
        self.contains(module_id) && !self.is_active(module_id)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.module_ids())
            .field("enabled", &*self.enabled.read())
            .finish()
    }
}
