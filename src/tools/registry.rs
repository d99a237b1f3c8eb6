// Aggregated tool registry
//
// Maps each tool name to its descriptor and the host that serves it. The
// host handle is resolved here at registration time so execution never has
// to look the host up by name again.

use crate::tools::hosts::ToolHost;
use crate::tools::types::ToolDescriptor;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub host: Arc<dyn ToolHost>,
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a host's tools. Existing entries with the same name are
    /// replaced: the most recently registered host wins.
    ///
    /// Returns the names that were taken over from another host.
    pub fn register_host(&mut self, host: Arc<dyn ToolHost>) -> Vec<String> {
        let mut overridden = Vec::new();
        for descriptor in host.tools() {
            let name = descriptor.name.clone();
            let entry = RegisteredTool {
                descriptor,
                host: Arc::clone(&host),
            };
            if let Some(previous) = self.tools.insert(name.clone(), entry) {
                if previous.host.id() != host.id() {
                    warn!(
                        tool = %name,
                        previous = previous.host.id(),
                        host = host.id(),
                        "Tool name collision, later host wins"
                    );
                    overridden.push(name);
                }
            }
        }
        overridden
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Tool descriptors sorted by name
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn clear(&mut self) {
        self.tools.clear();
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::hosts::StaticHost;

    fn host(id: &str, tools: &[&str]) -> Arc<dyn ToolHost> {
        Arc::new(StaticHost::new(id, tools))
    }

    #[test]
    fn test_last_registered_host_wins() {
        let mut registry = ToolRegistry::new();
        registry.register_host(host("a", &["search", "fetch"]));
        let overridden = registry.register_host(host("b", &["search"]));

        assert_eq!(overridden, vec!["search"]);
        assert_eq!(registry.get("search").unwrap().host.id(), "b");
        assert_eq!(registry.get("fetch").unwrap().host.id(), "a");
    }

    #[test]
    fn test_descriptors_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register_host(host("a", &["zeta", "alpha"]));
        let names: Vec<String> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
