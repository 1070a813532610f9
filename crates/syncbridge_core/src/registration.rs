//! Module registrations.

use crate::job::JobDirection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which directions a module synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Local changes are pushed; remote changes are ignored.
    PushOnly,
    /// Remote changes are pulled; local changes are ignored.
    PullOnly,
    /// Both directions.
    Bidirectional,
}

impl SyncDirection {
    /// Returns true if local changes may be pushed.
    pub fn allows_push(&self) -> bool {
        matches!(self, SyncDirection::PushOnly | SyncDirection::Bidirectional)
    }

    /// Returns true if remote changes may be pulled.
    pub fn allows_pull(&self) -> bool {
        matches!(self, SyncDirection::PullOnly | SyncDirection::Bidirectional)
    }

    /// Returns true if jobs flowing in `direction` are allowed.
    pub fn allows(&self, direction: JobDirection) -> bool {
        match direction {
            JobDirection::Push => self.allows_push(),
            JobDirection::Pull => self.allows_pull(),
        }
    }
}

/// Static description of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRegistration {
    /// Unique module id.
    pub module_id: String,
    /// Remote model for each entity type the module owns.
    pub remote_models: BTreeMap<String, String>,
    /// Directions the module synchronizes.
    pub sync_direction: SyncDirection,
    /// Modules in the same group target overlapping remote models; only one
    /// of them is active at a time.
    pub exclusive_group: Option<String>,
    /// Rank within the exclusive group. Lower wins.
    pub exclusive_priority: Option<i32>,
    /// Operator switch. Disabled modules never become active.
    pub enabled: bool,
}

impl ModuleRegistration {
    /// Creates a bidirectional, enabled registration with no entity types.
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            remote_models: BTreeMap::new(),
            sync_direction: SyncDirection::Bidirectional,
            exclusive_group: None,
            exclusive_priority: None,
            enabled: true,
        }
    }

    /// Declares an entity type and the remote model it maps to.
    pub fn with_entity(mut self, entity_type: impl Into<String>, remote_model: impl Into<String>) -> Self {
        self.remote_models.insert(entity_type.into(), remote_model.into());
        self
    }

    /// Sets the sync direction.
    pub fn with_direction(mut self, direction: SyncDirection) -> Self {
        self.sync_direction = direction;
        self
    }

    /// Places the module in an exclusive group.
    pub fn in_exclusive_group(mut self, group: impl Into<String>, priority: i32) -> Self {
        self.exclusive_group = Some(group.into());
        self.exclusive_priority = Some(priority);
        self
    }

    /// Sets the enabled switch.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Entity types owned by the module, sorted.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.remote_models.keys().map(String::as_str)
    }

    /// Remote model for an entity type.
    pub fn remote_model(&self, entity_type: &str) -> Option<&str> {
        self.remote_models.get(entity_type).map(String::as_str)
    }
}
