//! Model identifier routing.
//!
//! A [`ProviderRegistry`] is an immutable, ordered list of providers plus a
//! flattened alias table. Resolution normalizes the identifier once and then
//! asks each provider in registration order whether it serves the model; the
//! first one that does wins, so more specific providers must be registered
//! ahead of catch-all ones.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::errors::GatewayError;
use crate::providers::base::{Provider, ProviderDescriptor};

/// Alias → canonical model identifier, resolved to a fixed point
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    entries: HashMap<String, String>,
}

impl AliasTable {
    pub fn new(raw: HashMap<String, String>) -> Result<Self, GatewayError> {
        let mut entries = HashMap::with_capacity(raw.len());

        for alias in raw.keys() {
            let mut seen = HashSet::new();
            let mut current = alias.as_str();
            seen.insert(current);
            while let Some(next) = raw.get(current) {
                if next == current {
                    break;
                }
                if !seen.insert(next.as_str()) {
                    return Err(GatewayError::configuration(format!(
                        "alias cycle involving `{}`",
                        alias
                    )));
                }
                current = next;
            }
            if current != alias {
                entries.insert(alias.clone(), current.to_string());
            }
        }

        Ok(Self { entries })
    }

    pub fn normalize<'a>(&'a self, model: &'a str) -> &'a str {
        self.entries.get(model).map(String::as_str).unwrap_or(model)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The provider selected for a model, with the identifier after alias normalization
#[derive(Clone)]
pub struct Route {
    pub provider: Arc<dyn Provider>,
    pub model: String,
}

pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
    aliases: AliasTable,
}

#[derive(Default)]
pub struct RegistryBuilder {
    providers: Vec<Arc<dyn Provider>>,
    aliases: HashMap<String, String>,
}

impl RegistryBuilder {
    /// Append a provider; earlier registrations take priority
    pub fn register(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn alias<A: Into<String>, T: Into<String>>(mut self, alias: A, target: T) -> Self {
        self.aliases.insert(alias.into(), target.into());
        self
    }

    pub fn aliases<I: IntoIterator<Item = (String, String)>>(mut self, aliases: I) -> Self {
        self.aliases.extend(aliases);
        self
    }

    pub fn build(self) -> Result<ProviderRegistry, GatewayError> {
        Ok(ProviderRegistry {
            providers: self.providers,
            aliases: AliasTable::new(self.aliases)?,
        })
    }
}

impl ProviderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn normalize<'a>(&'a self, model: &'a str) -> &'a str {
        self.aliases.normalize(model)
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn resolve(&self, model: &str) -> Result<Route, GatewayError> {
        let canonical = self.normalize(model);

        match self.providers.iter().find(|p| p.supports(canonical)) {
            Some(provider) => {
                tracing::debug!(
                    model = %model,
                    canonical = %canonical,
                    provider = %provider.descriptor().id,
                    "resolved model"
                );
                Ok(Route {
                    provider: Arc::clone(provider),
                    model: canonical.to_string(),
                })
            }
            None => Err(GatewayError::ModelUnavailable {
                model: model.to_string(),
                available: self.available_models(),
            }),
        }
    }

    /// Every advertised model, in priority order, without duplicates
    pub fn available_models(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.providers
            .iter()
            .flat_map(|p| p.supported_models())
            .filter(|m| seen.insert(m.clone()))
            .collect()
    }

    /// Models to suggest instead of `model`
    pub fn alternatives(&self, model: &str) -> Vec<String> {
        self.available_models()
            .into_iter()
            .filter(|m| m != model)
            .collect()
    }

    pub fn providers(&self) -> Vec<ProviderDescriptor> {
        self.providers.iter().map(|p| p.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::anthropic::AnthropicProvider;
    use crate::providers::base::ProviderId;
    use crate::providers::configs::{
        AnthropicProviderConfig, DatabricksAuth, DatabricksProviderConfig, OllamaProviderConfig,
        OpenAiProviderConfig, OpenRouterProviderConfig, ANTHROPIC_HOST, OLLAMA_HOST, OPENAI_HOST,
        OPENROUTER_HOST,
    };
    use crate::providers::databricks::DatabricksProvider;
    use crate::providers::mock::MockProvider;
    use crate::providers::ollama::OllamaProvider;
    use crate::providers::openai::OpenAiProvider;
    use crate::providers::openrouter::OpenRouterProvider;

    fn default_registry() -> RegistryBuilder {
        ProviderRegistry::builder()
            .register(Arc::new(
                OpenAiProvider::new(OpenAiProviderConfig::new(OPENAI_HOST, "k")).unwrap(),
            ))
            .register(Arc::new(
                AnthropicProvider::new(AnthropicProviderConfig::new(ANTHROPIC_HOST, "k")).unwrap(),
            ))
            .register(Arc::new(
                OpenRouterProvider::new(OpenRouterProviderConfig::new(OPENROUTER_HOST, "k"))
                    .unwrap(),
            ))
            .register(Arc::new(
                OllamaProvider::new(OllamaProviderConfig::new(OLLAMA_HOST)).unwrap(),
            ))
            .register(Arc::new(
                DatabricksProvider::new(DatabricksProviderConfig::new(
                    "https://example.cloud.databricks.com",
                    DatabricksAuth::token("t"),
                ))
                .unwrap(),
            ))
    }

    fn route_id(registry: &ProviderRegistry, model: &str) -> ProviderId {
        match registry.resolve(model) {
            Ok(route) => route.provider.descriptor().id,
            Err(e) => panic!("{} did not resolve: {}", model, e),
        }
    }

    #[test]
    fn test_literal_routing_cases() {
        let registry = default_registry().build().unwrap();

        assert_eq!(route_id(&registry, "cloud-a/model-x"), ProviderId::OpenRouter);
        assert_eq!(route_id(&registry, "local:runtime-7b"), ProviderId::Ollama);
        assert_eq!(route_id(&registry, "onprem-custom:20b"), ProviderId::Databricks);
        assert_eq!(route_id(&registry, "gpt-4o"), ProviderId::OpenAi);
        assert_eq!(route_id(&registry, "o1"), ProviderId::OpenAi);
        assert_eq!(
            route_id(&registry, "claude-3-5-sonnet-latest"),
            ProviderId::Anthropic
        );
    }

    #[test]
    fn test_each_literal_case_has_one_claimant() {
        let registry = default_registry().build().unwrap();
        for model in ["cloud-a/model-x", "local:runtime-7b", "onprem-custom:20b"] {
            // `local:` also contains the separator databricks claims; order breaks the tie
            let claimants: Vec<ProviderId> = registry
                .providers
                .iter()
                .filter(|p| p.supports(model))
                .map(|p| p.descriptor().id)
                .collect();
            assert_eq!(claimants[0], route_id(&registry, model));
        }
    }

    #[test]
    fn test_routing_is_deterministic() {
        let registry = default_registry().build().unwrap();
        for model in ["cloud-a/model-x", "local:runtime-7b", "onprem-custom:20b", "gpt-4o"] {
            let first = route_id(&registry, model);
            for _ in 0..10 {
                assert_eq!(route_id(&registry, model), first);
            }
        }
    }

    #[test]
    fn test_unknown_model_lists_available() {
        let registry = default_registry().build().unwrap();
        match registry.resolve("mystery-model") {
            Err(GatewayError::ModelUnavailable { model, available }) => {
                assert_eq!(model, "mystery-model");
                assert_eq!(available[0], "gpt-4o");
                assert!(available.contains(&"claude-3-5-sonnet-latest".to_string()));
                assert!(available.contains(&"local:qwen2.5".to_string()));
            }
            _ => panic!("expected ModelUnavailable"),
        }
    }

    #[test]
    fn test_empty_registry_fails_every_model() {
        let registry = ProviderRegistry::builder().build().unwrap();
        assert!(registry.is_empty());
        let err = registry.resolve("gpt-4o").err().unwrap();
        assert_eq!(err.hint().unwrap(), "No providers are configured");
    }

    #[test]
    fn test_aliases_resolve_before_routing() {
        let registry = default_registry()
            .alias("fast", "gpt-4o-mini")
            .alias("house", "onprem-custom:20b")
            .build()
            .unwrap();

        let route = registry.resolve("fast").unwrap();
        assert_eq!(route.model, "gpt-4o-mini");
        assert_eq!(route.provider.descriptor().id, ProviderId::OpenAi);
        assert_eq!(route_id(&registry, "house"), ProviderId::Databricks);
    }

    #[test]
    fn test_available_models_are_deduplicated_in_priority_order() {
        let first = MockProvider::new(vec![])
            .with_id(ProviderId::OpenAi)
            .with_models(&["shared", "only-first"]);
        let second = MockProvider::new(vec![])
            .with_id(ProviderId::Ollama)
            .with_models(&["only-second", "shared"]);
        let registry = ProviderRegistry::builder()
            .register(Arc::new(first))
            .register(Arc::new(second))
            .build()
            .unwrap();

        assert_eq!(
            registry.available_models(),
            vec!["shared", "only-first", "only-second"]
        );
        assert_eq!(route_id(&registry, "shared"), ProviderId::OpenAi);
        assert_eq!(route_id(&registry, "only-second"), ProviderId::Ollama);
        assert_eq!(
            registry.alternatives("shared"),
            vec!["only-first", "only-second"]
        );
    }

    #[test]
    fn test_alias_chains_are_flattened() {
        let table = AliasTable::new(HashMap::from([
            ("a".to_string(), "b".to_string()),
            ("b".to_string(), "c".to_string()),
            ("same".to_string(), "same".to_string()),
        ]))
        .unwrap();

        assert_eq!(table.normalize("a"), "c");
        assert_eq!(table.normalize("b"), "c");
        assert_eq!(table.normalize("same"), "same");
        assert_eq!(table.normalize("unlisted"), "unlisted");
    }

    #[test]
    fn test_alias_normalization_is_idempotent() {
        let table = AliasTable::new(HashMap::from([
            ("smart".to_string(), "best".to_string()),
            ("best".to_string(), "claude-3-5-sonnet-latest".to_string()),
            ("cheap".to_string(), "local:qwen2.5".to_string()),
        ]))
        .unwrap();

        for (alias, _) in table.iter() {
            let once = table.normalize(alias);
            assert_eq!(table.normalize(once), once);
        }
    }

    #[test]
    fn test_alias_cycle_is_configuration_error() {
        let result = AliasTable::new(HashMap::from([
            ("a".to_string(), "b".to_string()),
            ("b".to_string(), "a".to_string()),
        ]));
        assert!(matches!(result, Err(GatewayError::Configuration { .. })));
    }
}
