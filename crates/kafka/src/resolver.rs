//! Subject to schema-id resolution with a per-pipeline cache.

use chrono::{DateTime, Utc};
use schema_bridge_registry::SchemaRegistryClient;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Cached association between a subject and the schema id it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaBinding {
    pub subject: String,
    pub schema_id: u32,
    pub cached_at: DateTime<Utc>,
    /// Whether the binding came from auto-registration
    pub registered: bool,
}

/// Resolves a subject to its latest schema id, registering a default
/// document when the subject is missing and auto-registration is enabled.
///
/// A resolved binding is reused for the lifetime of the pipeline; call
/// [`SchemaResolver::invalidate`] to force a new lookup.
pub struct SchemaResolver<R: ?Sized> {
    registry: Arc<R>,
    auto_register: bool,
    default_schema: Option<String>,
    binding: Option<SchemaBinding>,
}

impl<R: SchemaRegistryClient + ?Sized> SchemaResolver<R> {
    pub fn new(registry: Arc<R>, auto_register: bool, default_schema: Option<String>) -> Self {
        Self {
            registry,
            auto_register,
            default_schema,
            binding: None,
        }
    }

    pub async fn resolve(&mut self, subject: &str) -> Result<u32> {
        if let Some(binding) = &self.binding {
            if binding.subject == subject {
                return Ok(binding.schema_id);
            }
        }

        let (schema_id, registered) = match self.registry.latest_schema_id(subject).await {
            Ok(id) => (id, false),
            Err(e) if e.is_not_found() => (self.register_default(subject).await?, true),
            Err(e) => return Err(Error::Registry(e)),
        };

        debug!("Resolved subject {subject} to schema id {schema_id}");
        self.binding = Some(SchemaBinding {
            subject: subject.to_string(),
            schema_id,
            cached_at: Utc::now(),
            registered,
        });
        Ok(schema_id)
    }

    async fn register_default(&self, subject: &str) -> Result<u32> {
        let document = match (self.auto_register, self.default_schema.as_deref()) {
            (true, Some(document)) => document,
            _ => {
                return Err(Error::SchemaNotFound {
                    subject: subject.to_string(),
                })
            }
        };

        // Normalize the document before handing it to the registry
        let parsed: serde_json::Value = serde_json::from_str(document)
            .map_err(|e| Error::InvalidSchemaJson(e.to_string()))?;
        let normalized = serde_json::to_string(&parsed)
            .map_err(|e| Error::InvalidSchemaJson(e.to_string()))?;

        let id = self.registry.register(&normalized, subject).await?;
        info!("Auto-registered schema for subject {subject} with id {id}");
        Ok(id)
    }

    pub fn binding(&self) -> Option<&SchemaBinding> {
        self.binding.as_ref()
    }

    pub fn invalidate(&mut self) {
        self.binding = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema_bridge_registry::RegistryError;
    use crate::testing::MockRegistry;

    const DOC: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#;

    #[tokio::test]
    async fn test_resolve_caches_binding() {
        let registry = Arc::new(MockRegistry::new());
        registry.add_subject("users-value", DOC).unwrap();
        let mut resolver = SchemaResolver::new(Arc::clone(&registry), false, None);

        let first = resolver.resolve("users-value").await.unwrap();
        let second = resolver.resolve("users-value").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.latest_calls(), 1);
        assert!(!resolver.binding().unwrap().registered);
    }

    #[tokio::test]
    async fn test_missing_subject_without_auto_register() {
        let registry = Arc::new(MockRegistry::new());
        let mut resolver = SchemaResolver::new(registry, false, Some(DOC.to_string()));
        let err = resolver.resolve("users-value").await.unwrap_err();
        assert!(matches!(err, Error::SchemaNotFound { .. }));
        assert!(resolver.binding().is_none());
    }

    #[tokio::test]
    async fn test_auto_register_default_document() {
        let registry = Arc::new(MockRegistry::new());
        let mut resolver =
            SchemaResolver::new(Arc::clone(&registry), true, Some(DOC.to_string()));

        let id = resolver.resolve("users-value").await.unwrap();
        assert_eq!(registry.register_calls(), 1);
        assert!(resolver.binding().unwrap().registered);
        assert_eq!(registry.latest_schema_id("users-value").await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_auto_register_rejects_invalid_json() {
        let registry = Arc::new(MockRegistry::new());
        let mut resolver =
            SchemaResolver::new(Arc::clone(&registry), true, Some("{not json".to_string()));
        let err = resolver.resolve("users-value").await.unwrap_err();
        assert!(matches!(err, Error::InvalidSchemaJson(_)));
        assert_eq!(registry.register_calls(), 0);
    }

    #[tokio::test]
    async fn test_registry_outage_propagates() {
        let registry = Arc::new(MockRegistry::new());
        registry.add_subject("users-value", DOC).unwrap();
        registry.set_unavailable(true);
        let mut resolver = SchemaResolver::new(registry, true, Some(DOC.to_string()));
        let err = resolver.resolve("users-value").await.unwrap_err();
        assert!(matches!(err, Error::Registry(RegistryError::Transport(_))));
    }

    #[tokio::test]
    async fn test_invalidate_forces_lookup() {
        let registry = Arc::new(MockRegistry::new());
        registry.add_subject("users-value", DOC).unwrap();
        let mut resolver = SchemaResolver::new(Arc::clone(&registry), false, None);
        resolver.resolve("users-value").await.unwrap();
        resolver.invalidate();
        resolver.resolve("users-value").await.unwrap();
        assert_eq!(registry.latest_calls(), 2);
    }
}
