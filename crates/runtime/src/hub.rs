//! Provider registry.

use crate::model::ProviderId;
use crate::provider::Provider;
use crate::{PiError, Result};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

/// Maps provider ids to implementations.
///
/// Populated at composition time, then shared read-only behind an `Arc`.
#[derive(Default, Clone)]
pub struct ProviderHub {
    providers: HashMap<ProviderId, Arc<dyn Provider>>,
}

impl ProviderHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a provider. Rebinding an id fails and keeps the original.
    pub fn insert(&mut self, id: ProviderId, provider: Arc<dyn Provider>) -> Result<()> {
        match self.providers.entry(id) {
            Entry::Occupied(slot) => Err(PiError::DuplicateProvider(slot.key().to_string())),
            Entry::Vacant(slot) => {
                tracing::debug!(provider = %slot.key(), "provider registered");
                slot.insert(provider);
                Ok(())
            }
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, id: ProviderId, provider: impl Provider + 'static) -> Result<Self> {
        self.insert(id, Arc::new(provider))?;
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| PiError::UnknownProvider(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// Bound ids, sorted.
    pub fn ids(&self) -> Vec<&ProviderId> {
        let mut ids: Vec<_> = self.providers.keys().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHub")
            .field("providers", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProvider;

    fn id(s: &str) -> ProviderId {
        ProviderId::new(s).unwrap()
    }

    #[test]
    fn get_unknown_provider() {
        let hub = ProviderHub::new();
        assert_eq!(
            hub.get("missing").err(),
            Some(PiError::UnknownProvider("missing".into()))
        );
    }

    #[test]
    fn duplicate_insert_keeps_first() {
        let mut hub = ProviderHub::new();
        hub.insert(id("p"), Arc::new(ScriptedProvider::named("first")))
            .unwrap();
        let err = hub
            .insert(id("p"), Arc::new(ScriptedProvider::named("second")))
            .unwrap_err();
        assert_eq!(err, PiError::DuplicateProvider("p".into()));
        assert_eq!(hub.get("p").unwrap().name(), "first");
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn ids_are_sorted() {
        let hub = ProviderHub::new()
            .with(id("zeta"), ScriptedProvider::new())
            .unwrap()
            .with(id("alpha"), ScriptedProvider::new())
            .unwrap();
        let ids: Vec<_> = hub.ids().into_iter().map(ProviderId::as_str).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }
}
