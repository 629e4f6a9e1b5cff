//! Named views and view resolution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::spec::ProjectionSpec;
use crate::path_table::WILDCARD;

/// View name → projection, with a wildcard view shared by every other view.
///
/// A view registered under the exclusive prefix (`_index` with the default
/// sigil) is used on its own and never merged with the wildcard view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatRegistry {
    views: HashMap<String, ProjectionSpec>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view. Use `"*"` for the wildcard view and the exclusive
    /// sigil as a prefix for views that opt out of it.
    pub fn view(mut self, name: impl Into<String>, spec: ProjectionSpec) -> Self {
        self.views.insert(name.into(), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ProjectionSpec> {
        self.views.get(name)
    }

    /// The wildcard view, empty when none is registered.
    pub fn wildcard(&self) -> ProjectionSpec {
        self.views.get(WILDCARD).cloned().unwrap_or_default()
    }

    /// Resolve the projection for a request.
    ///
    /// The name is `requested` if given, else the current action name.
    /// An exact entry is merged over the wildcard view; else an exclusive
    /// entry is returned alone; else the wildcard view is returned. An
    /// unknown name is not an error.
    pub fn resolve(
        &self,
        requested: Option<&str>,
        current_action: Option<&str>,
        exclusive_sigil: &str,
    ) -> ProjectionSpec {
        let wildcard = self.wildcard();

        let Some(name) = requested.or(current_action) else {
            return wildcard;
        };

        if name != WILDCARD
            && let Some(view) = self.views.get(name)
        {
            return wildcard.merge(view);
        }

        if let Some(view) = self.views.get(&format!("{exclusive_sigil}{name}")) {
            return view.clone();
        }

        tracing::trace!(view = name, "no view registered, using wildcard view");
        wildcard
    }
}
