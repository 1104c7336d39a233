//! Agent configuration lookup.
//!
//! The telephony provider passes an `agentConfigRef` in the stream's start
//! message; the directory resolves it to the prompt, voice and greeting used
//! for the whole call. Lookup happens once per call.

use async_trait::async_trait;
use callbridge_types::AgentProfile;
use std::collections::HashMap;

/// Resolves agent references to profiles.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Returns the profile for `agent_ref`, or `None` if it is unknown.
    async fn lookup(&self, agent_ref: &str) -> Option<AgentProfile>;

    /// Profile used when the call names no agent or an unknown one.
    fn default_profile(&self) -> AgentProfile;

    /// Resolves an optional reference, falling back to the default profile.
    async fn resolve(&self, agent_ref: Option<&str>) -> AgentProfile {
        match agent_ref.map(str::trim).filter(|r| !r.is_empty()) {
            Some(reference) => match self.lookup(reference).await {
                Some(profile) => profile,
                None => {
                    tracing::warn!(agent_ref = %reference, "unknown agent reference, using default profile");
                    self.default_profile()
                }
            },
            None => self.default_profile(),
        }
    }
}

/// Directory backed by the `[[agents]]` table of the configuration file.
#[derive(Debug, Clone)]
pub struct StaticAgentDirectory {
    agents: HashMap<String, AgentProfile>,
    default_agent: AgentProfile,
}

impl StaticAgentDirectory {
    /// Builds a directory from configured profiles. If `default_id` names no
    /// configured profile, the built-in default profile is used instead.
    pub fn new(profiles: Vec<AgentProfile>, default_id: &str) -> Self {
        let agents: HashMap<String, AgentProfile> = profiles
            .into_iter()
            .map(|profile| (profile.id.clone(), profile))
            .collect();
        let default_agent = agents.get(default_id).cloned().unwrap_or_else(|| {
            tracing::warn!(
                default_agent = %default_id,
                "default agent is not configured, using built-in profile"
            );
            AgentProfile::default()
        });
        Self {
            agents,
            default_agent,
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[async_trait]
impl AgentDirectory for StaticAgentDirectory {
    async fn lookup(&self, agent_ref: &str) -> Option<AgentProfile> {
        self.agents.get(agent_ref).cloned()
    }

    fn default_profile(&self) -> AgentProfile {
        self.default_agent.clone()
    }
}
