use std::collections::BTreeMap;
use std::sync::Arc;

use conductor_core::tools::{Tool, ToolDefinition};

/// Where a tool came from. Later layers replace earlier ones on name
/// collision: project-local over custom over built-in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolSource {
    BuiltIn,
    Custom,
    Project,
}

struct Registered {
    tool: Arc<dyn Tool>,
    source: ToolSource,
}

/// The set of tools one session may call, resolved by exact name.
///
/// Keys live in a BTreeMap so every listing comes out in stable
/// alphabetical order without re-sorting.
pub struct ToolRegistry {
    tools: BTreeMap<String, Registered>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Assembles the registry from its three layers, weakest first, so a
    /// later insert shadows an earlier one.
    pub fn layered(
        built_in: &[Arc<dyn Tool>],
        custom: &[Arc<dyn Tool>],
        project: &[Arc<dyn Tool>],
    ) -> Self {
        let layers = [
            (built_in, ToolSource::BuiltIn),
            (custom, ToolSource::Custom),
            (project, ToolSource::Project),
        ];

        let mut registry = Self::new();
        for (tools, source) in layers {
            for tool in tools {
                registry.register(Arc::clone(tool), source.clone());
            }
        }
        registry
    }

    /// Inserts a tool, replacing any same-named entry.
    pub fn register(&mut self, tool: Arc<dyn Tool>, source: ToolSource) {
        self.tools
            .insert(tool.name().to_string(), Registered { tool, source });
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| Arc::clone(&r.tool))
    }

    pub fn source(&self, name: &str) -> Option<&ToolSource> {
        self.tools.get(name).map(|r| &r.source)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All registered names, alphabetical.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Names of the tools a given layer contributed, alphabetical.
    pub fn names_from(&self, source: &ToolSource) -> Vec<String> {
        self.tools
            .iter()
            .filter(|(_, r)| r.source == *source)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Definitions to advertise to the model, alphabetical by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|r| r.tool.to_definition()).collect()
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testkit::Scratch;
    use async_trait::async_trait;
    use conductor_core::tools::{ToolContext, ToolError, ToolOutput};

    struct CannedTool {
        name: &'static str,
        answer: &'static str,
    }

    fn canned(name: &'static str, answer: &'static str) -> Arc<dyn Tool> {
        Arc::new(CannedTool { name, answer })
    }

    #[async_trait]
    impl Tool for CannedTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "answers with a fixed string"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(self.answer))
        }
    }

    #[test]
    fn lookup_by_exact_name() {
        let mut registry = ToolRegistry::new();
        registry.register(canned("read_file", "ok"), ToolSource::BuiltIn);

        assert!(registry.contains("read_file"));
        assert!(registry.get("read_file").is_some());
        assert_eq!(registry.source("read_file"), Some(&ToolSource::BuiltIn));

        assert!(!registry.contains("read"));
        assert!(registry.get("READ_FILE").is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn listings_come_out_alphabetical() {
        let registry = ToolRegistry::layered(
            &[canned("shell", ""), canned("glob", ""), canned("grep", "")],
            &[],
            &[],
        );

        assert_eq!(registry.names(), vec!["glob", "grep", "shell"]);
        let defs = registry.definitions();
        let def_names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(def_names, vec!["glob", "grep", "shell"]);
    }

    #[tokio::test]
    async fn strongest_layer_wins_name_collisions() {
        let registry = ToolRegistry::layered(
            &[canned("lint", "builtin"), canned("grep", "builtin")],
            &[canned("lint", "custom"), canned("deploy", "custom")],
            &[canned("lint", "project")],
        );

        // Three distinct names survive out of five registrations.
        assert_eq!(registry.count(), 3);
        assert_eq!(registry.source("lint"), Some(&ToolSource::Project));
        assert_eq!(registry.source("deploy"), Some(&ToolSource::Custom));
        assert_eq!(registry.source("grep"), Some(&ToolSource::BuiltIn));

        let scratch = Scratch::new("registry");
        let output = registry
            .get("lint")
            .unwrap()
            .execute(serde_json::json!({}), &scratch.ctx())
            .await
            .unwrap();
        assert_eq!(output.content, "project");
    }

    #[test]
    fn middle_layer_shadows_the_bottom() {
        let registry =
            ToolRegistry::layered(&[canned("shell", "raw")], &[canned("shell", "sandboxed")], &[]);
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.source("shell"), Some(&ToolSource::Custom));
    }

    #[test]
    fn listing_filters_by_layer() {
        let registry = ToolRegistry::layered(
            &[canned("glob", ""), canned("grep", "")],
            &[canned("deploy", "")],
            &[],
        );

        assert_eq!(registry.names_from(&ToolSource::BuiltIn), vec!["glob", "grep"]);
        assert_eq!(registry.names_from(&ToolSource::Custom), vec!["deploy"]);
        assert!(registry.names_from(&ToolSource::Project).is_empty());
    }
}
