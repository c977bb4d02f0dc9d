//! Registries mapping names and URIs to handler capabilities.
//!
//! Reads during dispatch clone the handler `Arc` out under a read lock, so
//! registrations never contend with in-flight calls; a registration
//! completes before the next request observes the map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::protocol::{Prompt, Resource, Tool};
use crate::tools::{PromptHandler, ResourceHandler, ToolHandler};

/// Named callable procedures.
#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous handler of the same name.
    pub fn register(&self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name().to_string();
        self.entries.write().expect("registry lock poisoned").insert(name, handler);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.entries.write().expect("registry lock poisoned").remove(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.entries.read().expect("registry lock poisoned").get(name).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|h| h.descriptor())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Addressable read-only blobs, keyed by URI.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: RwLock<HashMap<String, Arc<dyn ResourceHandler>>>,
}

impl ResourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn ResourceHandler>) {
        let uri = handler.descriptor().uri;
        self.entries.write().expect("registry lock poisoned").insert(uri, handler);
    }

    pub fn unregister(&self, uri: &str) -> bool {
        self.entries.write().expect("registry lock poisoned").remove(uri).is_some()
    }

    #[must_use]
    pub fn get(&self, uri: &str) -> Option<Arc<dyn ResourceHandler>> {
        self.entries.read().expect("registry lock poisoned").get(uri).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|h| h.descriptor())
            .collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }
}

/// Parameterized message templates, keyed by name.
#[derive(Default)]
pub struct PromptRegistry {
    entries: RwLock<HashMap<String, Arc<dyn PromptHandler>>>,
}

impl PromptRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn PromptHandler>) {
        let name = handler.descriptor().name;
        self.entries.write().expect("registry lock poisoned").insert(name, handler);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.entries.write().expect("registry lock poisoned").remove(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn PromptHandler>> {
        self.entries.read().expect("registry lock poisoned").get(name).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|h| h.descriptor())
            .collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CounterTool, EchoTool, GreetingPrompt, GreetingResource};

    #[test]
    fn test_tool_registration_and_lookup() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(CounterTool));

        assert_eq!(registry.len(), 2);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());

        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["counter".to_string(), "echo".to_string()]);

        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
    }

    #[test]
    fn test_resource_registry_keyed_by_uri() {
        let registry = ResourceRegistry::new();
        registry.register(Arc::new(GreetingResource));
        assert!(registry.get("demo://greeting").is_some());
        assert_eq!(registry.list()[0].uri, "demo://greeting");
    }

    #[test]
    fn test_prompt_registry() {
        let registry = PromptRegistry::new();
        registry.register(Arc::new(GreetingPrompt));
        assert!(registry.get("greeting").is_some());
        assert_eq!(registry.list()[0].arguments.len(), 1);
    }
}
