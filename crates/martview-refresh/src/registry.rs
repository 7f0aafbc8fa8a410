//! Static, ordered catalog of derived views.
//!
//! Declaration order is significant: a view that reads another derived view
//! must be declared after it, and every refresh walks views in this order.

use std::collections::HashSet;

use tracing::info;

use martview_state::{MetadataStore, RefreshCadence, ViewDescriptor, ViewKind};

use crate::error::{RefreshError, RefreshResult};

/// Declaration of one derived view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDefinition {
    pub name: String,
    /// Owning module.
    pub category: String,
    pub kind: ViewKind,
    pub refresh_cadence: RefreshCadence,
}

impl ViewDefinition {
    pub fn new(name: &str, category: &str, kind: ViewKind, refresh_cadence: RefreshCadence) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            kind,
            refresh_cadence,
        }
    }

    pub fn snapshot(name: &str, category: &str, refresh_cadence: RefreshCadence) -> Self {
        Self::new(name, category, ViewKind::PrecomputedSnapshot, refresh_cadence)
    }

    pub fn on_demand(name: &str, category: &str) -> Self {
        Self::new(name, category, ViewKind::OnDemandView, RefreshCadence::Realtime)
    }

    /// Descriptor to register for a view that has never been refreshed.
    pub fn descriptor(&self) -> ViewDescriptor {
        ViewDescriptor::new(&self.name, &self.category, self.kind, self.refresh_cadence)
    }
}

#[derive(Debug, Clone)]
pub struct ViewRegistry {
    views: Vec<ViewDefinition>,
}

impl ViewRegistry {
    /// Build a registry, rejecting repeated view names.
    pub fn new(views: Vec<ViewDefinition>) -> RefreshResult<Self> {
        let mut seen = HashSet::new();
        for view in &views {
            if !seen.insert(view.name.as_str()) {
                return Err(RefreshError::DuplicateView(view.name.clone()));
            }
        }
        Ok(Self { views })
    }

    pub fn all(&self) -> &[ViewDefinition] {
        &self.views
    }

    pub fn names(&self) -> Vec<String> {
        self.views.iter().map(|v| v.name.clone()).collect()
    }

    /// Views owned by `category`, in declaration order.
    pub fn views_in(&self, category: &str) -> Vec<&ViewDefinition> {
        self.views.iter().filter(|v| v.category == category).collect()
    }

    /// Module names in first-seen order.
    pub fn modules(&self) -> Vec<&str> {
        let mut modules: Vec<&str> = Vec::new();
        for view in &self.views {
            if !modules.contains(&view.category.as_str()) {
                modules.push(&view.category);
            }
        }
        modules
    }

    pub fn get(&self, name: &str) -> RefreshResult<&ViewDefinition> {
        self.views
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| RefreshError::UnknownView(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.views.iter().any(|v| v.name == name)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Register every declared view in the metadata store.
    ///
    /// Idempotent: existing registrations keep their freshness.
    pub fn install(&self, store: &MetadataStore) -> RefreshResult<()> {
        for view in &self.views {
            store.register_view(&view.descriptor())?;
        }
        info!(views = self.views.len(), "view catalog installed");
        Ok(())
    }
}
