//! Kind-indexed provider registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::granter::{GrantError, Granter};

/// Maps grant kinds to their providers.
///
/// Built once at startup and shared read-only afterwards; registering a
/// kind twice replaces the earlier provider.
#[derive(Clone, Default)]
pub struct GranterRegistry {
    granters: HashMap<String, Arc<dyn Granter>>,
}

impl GranterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        GranterRegistry::default()
    }

    /// Register a provider for a grant kind, builder style.
    pub fn with(mut self, kind: impl Into<String>, granter: Arc<dyn Granter>) -> Self {
        self.granters.insert(kind.into(), granter);
        self
    }

    /// Look up the provider for a grant kind.
    pub fn get(&self, kind: &str) -> Result<Arc<dyn Granter>, GrantError> {
        self.granters
            .get(kind)
            .cloned()
            .ok_or_else(|| GrantError::UnknownKind {
                kind: kind.to_string(),
            })
    }

    /// The registered kinds, for diagnostics.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.granters.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for GranterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GranterRegistry")
            .field("kinds", &self.granters.keys().collect::<Vec<_>>())
            .finish()
    }
}
