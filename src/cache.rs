//! Read-through cache of the data assumed static for a connection's lifetime.
//!
//! The possible-agent list and every agent's observation and action spaces are fetched once,
//! right after connecting, and are never refreshed until the next connect. A server changing
//! its spaces between episodes is not supported: the cached values would silently be stale.

use std::collections::HashMap;

use tracing::debug;

use crate::client::RpcClient;
use crate::error::{BridgeError, Result};
use crate::protocol::AgentId;
use crate::spaces::Space;
use crate::transport::Transport;

/// Agent list and spaces captured during the connect phase.
#[derive(Debug, Clone, Default)]
pub struct SpaceCache {
    possible_agents: Vec<AgentId>,
    observation_spaces: HashMap<AgentId, Space>,
    action_spaces: HashMap<AgentId, Space>,
}

impl SpaceCache {
    /// Fetch the possible agents, then both spaces of every agent.
    ///
    /// The protocol has no bulk query, so this costs `1 + 2 * agents` round trips.
    pub fn populate<T: Transport>(client: &mut RpcClient<T>) -> Result<Self> {
        let possible_agents = client.possible_agents()?;
        let mut observation_spaces = HashMap::with_capacity(possible_agents.len());
        let mut action_spaces = HashMap::with_capacity(possible_agents.len());

        for agent in &possible_agents {
            let obs = Space::try_from(client.observation_space(agent)?)?;
            let act = Space::try_from(client.action_space(agent)?)?;
            observation_spaces.insert(agent.clone(), obs);
            action_spaces.insert(agent.clone(), act);
        }
        debug!(agents = ?possible_agents, "space cache populated");

        Ok(Self {
            possible_agents,
            observation_spaces,
            action_spaces,
        })
    }

    /// Every agent that may take part, in server order.
    pub fn possible_agents(&self) -> &[AgentId] {
        &self.possible_agents
    }

    /// Cached observation space of `agent`.
    pub fn observation_space(&self, agent: &str) -> Result<&Space> {
        self.observation_spaces
            .get(agent)
            .ok_or_else(|| BridgeError::UnknownAgent(agent.to_string()))
    }

    /// Cached action space of `agent`.
    pub fn action_space(&self, agent: &str) -> Result<&Space> {
        self.action_spaces
            .get(agent)
            .ok_or_else(|| BridgeError::UnknownAgent(agent.to_string()))
    }

    /// True if nothing was fetched yet.
    pub fn is_empty(&self) -> bool {
        self.possible_agents.is_empty()
    }
}
