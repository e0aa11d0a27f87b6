use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "agent_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Healthy,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

impl Default for ResourceUsage {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            disk_percent: 0.0,
        }
    }
}

/// A remote host running the supervisor. Implicitly registered on first
/// heartbeat; the row is retained forever once created (no deletion path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub host_id: String,
    pub hostname: String,
    pub address: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub group: Option<String>,
    pub location: Option<String>,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub resource_usage: ResourceUsage,
    pub active_tasks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatRequest {
    pub status: AgentStatus,
    pub resource_usage: ResourceUsage,
    pub active_tasks: Vec<String>,
    pub agent_version: String,
    pub hostname: Option<String>,
    pub address: Option<String>,
    pub group: Option<String>,
    /// Free-form collector build/runtime metadata; accepted and currently
    /// discarded, no persisted column for it yet.
    pub collector_info: Option<serde_json::Value>,
}

/// Selector over the agent registry: a literal host id, a `group:<name>`, or
/// a raw label expression understood by the registry's resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSelector(pub String);

impl HostSelector {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn group_name(&self) -> Option<&str> {
        self.0.strip_prefix("group:")
    }

    pub fn is_literal_host(&self) -> bool {
        self.group_name().is_none() && !self.0.contains('=')
    }
}

/// Resolves a list of selectors against the full agent registry into a flat,
/// deduplicated set of host ids. `group:<name>` matches `Agent.group`; a
/// selector with no `group:` prefix and no `=` is taken as a literal host id
/// regardless of whether it currently exists in the registry.
pub fn resolve_selectors(selectors: &[HostSelector], agents: &[Agent]) -> Vec<String> {
    let mut resolved = Vec::new();
    for selector in selectors {
        if let Some(group) = selector.group_name() {
            for agent in agents {
                if agent.group.as_deref() == Some(group) && !resolved.contains(&agent.host_id) {
                    resolved.push(agent.host_id.clone());
                }
            }
        } else if selector.is_literal_host() {
            if !resolved.contains(&selector.0) {
                resolved.push(selector.0.clone());
            }
        }
    }
    resolved
}
