//! The set of external capabilities a workflow run can draw on.

use std::collections::HashMap;
use std::sync::Arc;

use agents::{Classifier, Extractor, Notifier, Provider, SourceProvider, StorageSink, TracingNotifier};
use async_trait::async_trait;

use crate::validator::Readiness;

/// Maps providers to sources and connection names to storage sinks.
///
/// One classifier and one extractor serve every step.
pub struct AgentRegistry {
    sources: HashMap<Provider, Arc<dyn SourceProvider>>,
    sinks: HashMap<String, Arc<dyn StorageSink>>,
    classifier: Arc<dyn Classifier>,
    extractor: Arc<dyn Extractor>,
    notifier: Arc<dyn Notifier>,
}

impl AgentRegistry {
    pub fn new(classifier: Arc<dyn Classifier>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            sources: HashMap::new(),
            sinks: HashMap::new(),
            classifier,
            extractor,
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Register `source` under its own provider, replacing any previous one.
    pub fn with_source(mut self, source: Arc<dyn SourceProvider>) -> Self {
        self.sources.insert(source.provider(), source);
        self
    }

    pub fn with_sink(mut self, connection: impl Into<String>, sink: Arc<dyn StorageSink>) -> Self {
        self.sinks.insert(connection.into(), sink);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn source(&self, provider: Provider) -> Option<&Arc<dyn SourceProvider>> {
        self.sources.get(&provider)
    }

    pub fn sink(&self, connection: &str) -> Option<&Arc<dyn StorageSink>> {
        self.sinks.get(connection)
    }

    pub fn classifier(&self) -> Arc<dyn Classifier> {
        Arc::clone(&self.classifier)
    }

    pub fn extractor(&self) -> Arc<dyn Extractor> {
        Arc::clone(&self.extractor)
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }
}

#[async_trait]
impl Readiness for AgentRegistry {
    async fn is_authenticated(&self, provider: Provider) -> bool {
        match self.sources.get(&provider) {
            Some(source) => source.is_authenticated().await,
            None => false,
        }
    }

    async fn has_connection(&self, connection: &str) -> bool {
        self.sinks.contains_key(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agents::mock::{MemorySink, MockClassifier, MockExtractor, MockSource};
    use agents::{Classification, ExtractedInvoice};

    fn registry() -> AgentRegistry {
        AgentRegistry::new(
            Arc::new(MockClassifier::returning(Classification::new(true, 0.9))),
            Arc::new(MockExtractor::returning(ExtractedInvoice::default())),
        )
    }

    #[tokio::test]
    async fn readiness_follows_registered_sources() {
        let registry = registry()
            .with_source(Arc::new(MockSource::new(Provider::Gmail, vec![])))
            .with_source(Arc::new(MockSource::new(Provider::Dropbox, vec![]).unauthenticated()))
            .with_sink("warehouse", Arc::new(MemorySink::new()));

        assert!(registry.is_authenticated(Provider::Gmail).await);
        assert!(!registry.is_authenticated(Provider::Dropbox).await);
        assert!(!registry.is_authenticated(Provider::Outlook).await);
        assert!(registry.has_connection("warehouse").await);
        assert!(!registry.has_connection("erp").await);
    }
}
