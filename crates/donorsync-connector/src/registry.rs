//! Provider registry.
//!
//! Built once at process start and handed to the integration manager.
//! There is no global instance and no lazy registration.

use std::collections::BTreeMap;
use std::sync::Arc;

use donorsync_core::ProviderName;
use tracing::info;

use crate::error::{ConnectorError, ConnectorResult};
use crate::traits::CrmAdapter;

/// Shared handle to an adapter.
pub type BoxedAdapter = Arc<dyn CrmAdapter>;

/// Maps provider names to adapter instances.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: BTreeMap<ProviderName, BoxedAdapter>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own provider name.
    ///
    /// Registering the same name twice replaces the earlier adapter.
    pub fn register(&mut self, adapter: BoxedAdapter) -> &mut Self {
        let name = adapter.provider_name().clone();
        info!(provider = %name, display_name = adapter.display_name(), "Registered provider adapter");
        self.adapters.insert(name, adapter);
        self
    }

    /// Builder-style [`ProviderRegistry::register`].
    #[must_use]
    pub fn with(mut self, adapter: BoxedAdapter) -> Self {
        self.register(adapter);
        self
    }

    /// Look up an adapter.
    pub fn get(&self, provider: &ProviderName) -> ConnectorResult<BoxedAdapter> {
        self.adapters
            .get(provider)
            .cloned()
            .ok_or_else(|| ConnectorError::UnsupportedProvider {
                provider: provider.to_string(),
            })
    }

    /// Registered provider names, sorted.
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderName> {
        self.adapters.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderCredentials;
    use async_trait::async_trait;
    use donorsync_core::{CanonicalDonation, CanonicalDonor, PageRequest, PaginatedResponse};

    struct Named(ProviderName);

    #[async_trait]
    impl CrmAdapter for Named {
        fn provider_name(&self) -> &ProviderName {
            &self.0
        }

        fn display_name(&self) -> &str {
            "Named"
        }

        async fn fetch_donors(
            &self,
            _credentials: &ProviderCredentials,
            _page: PageRequest,
        ) -> ConnectorResult<PaginatedResponse<CanonicalDonor>> {
            Ok(PaginatedResponse::empty())
        }

        async fn fetch_donations(
            &self,
            _credentials: &ProviderCredentials,
            _page: PageRequest,
        ) -> ConnectorResult<PaginatedResponse<CanonicalDonation>> {
            Ok(PaginatedResponse::empty())
        }
    }

    fn name(value: &str) -> ProviderName {
        ProviderName::new(value).unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(Named(name("salesforce"))))
            .with(Arc::new(Named(name("bloomerang"))));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.providers(), vec![name("bloomerang"), name("salesforce")]);
        assert!(registry.get(&name("salesforce")).is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        let err = registry.get(&name("nope")).err().unwrap();
        assert_eq!(err.error_code(), "UNSUPPORTED_PROVIDER");
    }
}
