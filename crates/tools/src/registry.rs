//! Tool Registry: composes built-ins, workspace plugin tools, and (for the
//! coordinator only) `delegate_to_agent` into the toolset exposed to the
//! LLM for one task, then filters through the tool policy.

use std::collections::HashMap;

use rb_domain::tool::ToolDefinition;
use rb_policy::ToolPolicy;

pub const DELEGATE_TO_AGENT: &str = "delegate_to_agent";

/// A plugin-exposed tool, prior to name-collision resolution.
#[derive(Debug, Clone)]
pub struct PluginToolSpec {
    pub plugin_id: String,
    pub definition: ToolDefinition,
}

fn built_in_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "fs_read".into(),
            description: "Read a file within the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "offset": {"type": "integer"},
                    "limit": {"type": "integer"}
                },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "fs_write".into(),
            description: "Write a file within the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: "knowledge_search".into(),
            description: "Search the workspace knowledge base.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "web_search".into(),
            description: "Search the web via the gateway's search provider.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
        },
    ]
}

fn delegate_to_agent_definition() -> ToolDefinition {
    ToolDefinition {
        name: DELEGATE_TO_AGENT.into(),
        description: "Delegate a sub-task to another agent.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "agentId": {"type": "string"},
                "instruction": {"type": "string"}
            },
            "required": ["agentId", "instruction"]
        }),
    }
}

/// `BuildToolset(params) -> map<name, tool>` from the tool registry
/// contract: built-in names are reserved first, plugin tools colliding
/// with an already-reserved name get a deterministic `_2`, `_3`…  suffix,
/// then the whole map is filtered through the tool policy. An empty
/// resulting toolset is the caller's signal to omit the tools field
/// entirely from the chat request.
pub fn build_toolset(
    plugin_tools: Vec<PluginToolSpec>,
    policy: &ToolPolicy,
    include_delegate: bool,
) -> HashMap<String, ToolDefinition> {
    build_toolset_with_dispatch(plugin_tools, policy, include_delegate).0
}

/// Same resolution as `build_toolset`, but also returns the final tool
/// name -> owning plugin id map (post-suffixing, post-policy-filter) so a
/// caller dispatching a tool call knows which `PluginToolHost` to invoke.
/// Built-in and `delegate_to_agent` names never appear in the dispatch map
/// — the coordinator handles those directly.
pub fn build_toolset_with_dispatch(
    plugin_tools: Vec<PluginToolSpec>,
    policy: &ToolPolicy,
    include_delegate: bool,
) -> (HashMap<String, ToolDefinition>, HashMap<String, String>) {
    let mut toolset: HashMap<String, ToolDefinition> = HashMap::new();
    let mut dispatch: HashMap<String, String> = HashMap::new();

    for def in built_in_definitions() {
        toolset.insert(def.name.clone(), def);
    }

    if include_delegate {
        let def = delegate_to_agent_definition();
        toolset.insert(def.name.clone(), def);
    }

    for spec in plugin_tools {
        let mut name = spec.definition.name.clone();
        let mut suffix = 2;
        while toolset.contains_key(&name) {
            name = format!("{}_{suffix}", spec.definition.name);
            suffix += 1;
        }
        let mut def = spec.definition;
        def.name = name.clone();
        dispatch.insert(name.clone(), spec.plugin_id);
        toolset.insert(name, def);
    }

    toolset.retain(|name, _| policy.is_allowed(name));
    dispatch.retain(|name, _| toolset.contains_key(name));
    (toolset, dispatch)
}
