//! "All agents act at once" emulation over the turn-sequenced adapter.
//!
//! The transport underneath is strictly sequential, so a parallel step is a bounded round of
//! AEC steps: whenever the server selects an agent that still owes its action for this round,
//! that agent's action is sent. **This is not simultaneous execution.** Agents acting later in
//! a round act on a state already changed by the agents acting before them.
//!
//! A round ends as soon as one of these holds:
//! - every live round-start agent has acted,
//! - the turn comes back to an agent that already acted in this round (an agent granted two
//!   turns in a row keeps its second turn for the next round),
//! - the selected agent owes nothing in this round (it finished, or it joined the active set
//!   after the round started).
//!
//! Every agent therefore receives at most one decision per call, and the per-agent
//! [`TurnStatus`] in the [`ParallelStep`] tells which ones actually acted.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::aec::AecEnv;
use crate::configuration::{Configuration, MaskPolicy};
use crate::error::{BridgeError, Result};
use crate::protocol::{Action, AgentId, Info};
use crate::spaces::Space;
use crate::transport::{Transport, WsTransport};

/// Where an agent stands in the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Alive and has not acted yet in this round.
    Pending,
    /// Acted exactly once in this round.
    Acted,
    /// Terminated or truncated at round start, owes no action.
    Inactive,
}

/// Per-agent results of one parallel step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParallelStep {
    /// Observations of the agents still active after the round
    pub observations: HashMap<AgentId, Vec<f32>>,
    /// Rewards of the round-start agents
    pub rewards: HashMap<AgentId, f32>,
    /// Termination flags of the round-start agents
    pub terminations: HashMap<AgentId, bool>,
    /// Truncation flags of the round-start agents
    pub truncations: HashMap<AgentId, bool>,
    /// Info mappings of the round-start agents
    pub infos: HashMap<AgentId, Info>,
    /// Status every round-start agent reached in this round
    pub statuses: HashMap<AgentId, TurnStatus>,
}

/// Parallel adapter. Never talks to the server except through its [`AecEnv`].
#[derive(Debug)]
pub struct ParallelEnv<T: Transport = WsTransport> {
    aec: AecEnv<T>,
}

impl ParallelEnv<WsTransport> {
    /// Create and connect a parallel adapter for the server described by `config`.
    pub fn open(config: Configuration) -> Result<Self> {
        Ok(Self::from_aec(AecEnv::open(config)?))
    }
}

impl<T: Transport> ParallelEnv<T> {
    /// Wrap an existing turn-sequenced adapter.
    pub fn from_aec(aec: AecEnv<T>) -> Self {
        Self { aec }
    }

    /// Underlying turn-sequenced adapter.
    pub fn aec(&self) -> &AecEnv<T> {
        &self.aec
    }

    /// Start a new episode and return the observations and infos of the active agents.
    #[instrument(skip(self, options))]
    pub fn reset(
        &mut self,
        seed: Option<u64>,
        options: Option<&Value>,
    ) -> Result<(HashMap<AgentId, Vec<f32>>, HashMap<AgentId, Info>)> {
        self.aec.reset(seed, options)?;
        let agents = self.aec.agents()?;
        let observations = self.observe_all(&agents)?;
        let mut infos = self.aec.infos()?;
        let infos = agents
            .iter()
            .map(|agent| (agent.clone(), infos.remove(agent).unwrap_or_default()))
            .collect();
        Ok((observations, infos))
    }

    /// Play one round, giving every live agent at most one action from `actions`.
    ///
    /// Every round-start agent that is neither terminated nor truncated must have an entry in
    /// `actions`; otherwise [`BridgeError::MissingAction`] is returned before anything is
    /// sent. Entries for other agents are ignored.
    ///
    /// Under [`MaskPolicy::Reject`] every pending agent's action is checked against its mask
    /// as it stands at round start, and [`BridgeError::IllegalAction`] is returned before the
    /// first step. Actions are not re-checked as the round goes on; the server still judges
    /// them. A server error in the middle of the round leaves the earlier steps of that round
    /// applied.
    #[instrument(skip_all)]
    pub fn step(&mut self, actions: &HashMap<AgentId, Action>) -> Result<ParallelStep> {
        let round_start = self.aec.agents()?;
        let terminations = self.aec.terminations()?;
        let truncations = self.aec.truncations()?;

        let mut statuses: HashMap<AgentId, TurnStatus> = round_start
            .iter()
            .map(|agent| {
                let done = terminations.get(agent).copied().unwrap_or(false)
                    || truncations.get(agent).copied().unwrap_or(false);
                let status = if done {
                    TurnStatus::Inactive
                } else {
                    TurnStatus::Pending
                };
                (agent.clone(), status)
            })
            .collect();

        if let Some(agent) = round_start
            .iter()
            .find(|a| statuses[*a] == TurnStatus::Pending && !actions.contains_key(*a))
        {
            return Err(BridgeError::MissingAction(agent.clone()));
        }

        if self.aec.config().mask_policy() == MaskPolicy::Reject {
            for agent in round_start
                .iter()
                .filter(|a| statuses[*a] == TurnStatus::Pending)
            {
                self.aec.check_mask(agent, actions[agent])?;
            }
        }

        while statuses.values().any(|s| *s == TurnStatus::Pending) {
            let selected = self.aec.agent_selection()?;
            match statuses.get_mut(&selected) {
                Some(status @ TurnStatus::Pending) => {
                    self.aec.send_step(actions[&selected])?;
                    *status = TurnStatus::Acted;
                }
                Some(TurnStatus::Acted) => {
                    debug!(agent = %selected, "turn came back to an agent that already acted");
                    break;
                }
                Some(TurnStatus::Inactive) | None => {
                    debug!(agent = %selected, "selected agent owes no action this round");
                    break;
                }
            }
        }

        let active = self.aec.agents()?;
        let observations = self.observe_all(&active)?;
        let mut rewards = self.aec.rewards()?;
        let mut terminations = self.aec.terminations()?;
        let mut truncations = self.aec.truncations()?;
        let mut infos = self.aec.infos()?;

        let mut result = ParallelStep {
            observations,
            ..ParallelStep::default()
        };
        for agent in round_start {
            result
                .rewards
                .insert(agent.clone(), rewards.remove(&agent).unwrap_or(0.0));
            result
                .terminations
                .insert(agent.clone(), terminations.remove(&agent).unwrap_or(false));
            result
                .truncations
                .insert(agent.clone(), truncations.remove(&agent).unwrap_or(false));
            result
                .infos
                .insert(agent.clone(), infos.remove(&agent).unwrap_or_default());
        }
        result.statuses = statuses;
        Ok(result)
    }

    fn observe_all(&mut self, agents: &[AgentId]) -> Result<HashMap<AgentId, Vec<f32>>> {
        agents
            .iter()
            .map(|agent| Ok((agent.clone(), self.aec.observe(agent)?)))
            .collect()
    }

    /// Observations of every active agent.
    pub fn state(&mut self) -> Result<HashMap<AgentId, Vec<f32>>> {
        let agents = self.aec.agents()?;
        self.observe_all(&agents)
    }

    /// Currently active agents.
    pub fn agents(&mut self) -> Result<Vec<AgentId>> {
        self.aec.agents()
    }

    /// Number of currently active agents.
    pub fn num_agents(&mut self) -> Result<usize> {
        self.aec.num_agents()
    }

    /// Every agent that may take part.
    pub fn possible_agents(&self) -> &[AgentId] {
        self.aec.possible_agents()
    }

    /// Cached observation space of `agent`.
    pub fn observation_space(&self, agent: &str) -> Result<&Space> {
        self.aec.observation_space(agent)
    }

    /// Cached action space of `agent`.
    pub fn action_space(&self, agent: &str) -> Result<&Space> {
        self.aec.action_space(agent)
    }

    /// Legal-action flags of `agent`.
    pub fn action_mask(&mut self, agent: &str) -> Result<Option<Vec<bool>>> {
        self.aec.action_mask(agent)
    }

    /// Ask the server to render its current state.
    pub fn render(&mut self) -> Result<()> {
        self.aec.render()
    }

    /// Close the session. Idempotent.
    pub fn close(&mut self) {
        self.aec.close();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::client::tests::ScriptedTransport;
    use crate::protocol::Command;

    fn env(replies: Vec<Value>) -> ParallelEnv<ScriptedTransport> {
        env_with(Configuration::new(), replies)
    }

    fn env_with(config: Configuration, replies: Vec<Value>) -> ParallelEnv<ScriptedTransport> {
        let mut script = vec![
            json!({"possible_agents": ["a", "b"]}),
            json!({"space": {"shape": [1]}}),
            json!({"space": {"n": 2}}),
            json!({"space": {"shape": [1]}}),
            json!({"space": {"n": 2}}),
        ];
        script.extend(replies);
        let mut transport = ScriptedTransport::with_replies(script);
        transport.connected = false;
        let mut aec = AecEnv::with_transport(transport, config);
        aec.connect().unwrap();
        ParallelEnv::from_aec(aec)
    }

    #[test]
    fn missing_action_fails_before_sending_steps() {
        let mut env = env(vec![
            json!({"agents": ["a", "b"]}),
            json!({"terminations": {}}),
            json!({"truncations": {"b": false}}),
        ]);
        let actions = HashMap::from([("a".to_string(), 0)]);
        match env.step(&actions) {
            Err(BridgeError::MissingAction(agent)) => assert_eq!(agent, "b"),
            other => panic!("expected MissingAction, got {other:?}"),
        }
        let sent = &env.aec().client().transport().sent;
        assert!(!sent.iter().any(|c| matches!(c, Command::Step { .. })));
    }

    #[test]
    fn masked_action_of_a_later_agent_fails_before_any_step() {
        let config = Configuration::new().with_mask_policy(MaskPolicy::Reject);
        let mut env = env_with(
            config,
            vec![
                json!({"agents": ["a", "b"]}),
                json!({"terminations": {}}),
                json!({"truncations": {}}),
                json!({"mask": [true, true]}),
                json!({"mask": [true, false]}),
            ],
        );
        let actions = HashMap::from([("a".to_string(), 1), ("b".to_string(), 1)]);
        match env.step(&actions) {
            Err(BridgeError::IllegalAction { agent, action }) => {
                assert_eq!(agent, "b");
                assert_eq!(action, 1);
            }
            other => panic!("expected IllegalAction, got {other:?}"),
        }
        let sent = &env.aec().client().transport().sent;
        assert!(!sent.iter().any(|c| matches!(c, Command::Step { .. })));
    }

    #[test]
    fn finished_agents_need_no_action() {
        let mut env = env(vec![
            json!({"agents": ["a", "b"]}),
            json!({"terminations": {"b": true}}),
            json!({"truncations": {}}),
            json!({"agent": "a"}),
            json!({}),
            json!({"agents": []}),
            json!({"rewards": {"a": 1.0}}),
            json!({"terminations": {"a": true, "b": true}}),
            json!({"truncations": {}}),
            json!({"infos": {}}),
        ]);
        let actions = HashMap::from([("a".to_string(), 1)]);
        let step = env.step(&actions).unwrap();

        assert!(step.observations.is_empty());
        assert_eq!(step.rewards, HashMap::from([("a".into(), 1.0), ("b".into(), 0.0)]));
        assert_eq!(step.statuses["a"], TurnStatus::Acted);
        assert_eq!(step.statuses["b"], TurnStatus::Inactive);
        assert!(step.terminations["a"]);
        assert!(!step.truncations["b"]);
        assert!(step.infos["a"].is_empty());
    }
}
