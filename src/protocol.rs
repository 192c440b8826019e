//! Wire format of the environment server protocol.
//!
//! Every message is one JSON object. Requests carry a `cmd` field naming the command plus its
//! parameters; replies carry the named result field, or an `error` string when the server
//! rejected the command.
//!
//! | Command | Request fields | Reply fields (success) |
//! |---|---|---|
//! | reset | `cmd, seed?` | (ack) |
//! | step | `cmd, action` | (ack) |
//! | observe | `cmd, agent` | `observation` |
//! | last | `cmd` | `reward, terminated, truncated, info` |
//! | agents | `cmd` | `agents` |
//! | possible_agents | `cmd` | `possible_agents` |
//! | agent_selection | `cmd` | `agent` |
//! | observation_space / action_space | `cmd, agent` | `space` |
//! | rewards / terminations / truncations / infos | `cmd` | field named after the command |
//! | action_mask | `cmd, agent` | `mask` (may be absent) |
//! | render / close / ping | `cmd` | (ack) |
//! | env_info | `cmd` | implementation defined |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque name of a participant, stable for the lifetime of an episode.
pub type AgentId = String;

/// Index of a discrete action.
pub type Action = u32;

/// Free-form per-agent diagnostic mapping.
pub type Info = Map<String, Value>;

/// One request sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Start a new episode, optionally seeded.
    Reset {
        /// Seed of the episode's random generator
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
    },
    /// Apply an action for the currently selected agent.
    Step {
        /// Index of the chosen action
        action: Action,
    },
    /// Observation vector of one agent.
    Observe {
        /// Observed agent
        agent: AgentId,
    },
    /// Step result of the currently selected agent.
    Last,
    /// Currently active agents.
    Agents,
    /// Every agent that may ever take part.
    PossibleAgents,
    /// Agent whose turn it is.
    AgentSelection,
    /// Observation space descriptor of one agent.
    ObservationSpace {
        /// Queried agent
        agent: AgentId,
    },
    /// Action space descriptor of one agent.
    ActionSpace {
        /// Queried agent
        agent: AgentId,
    },
    /// Rewards of the last step, per agent.
    Rewards,
    /// Termination flags, per agent.
    Terminations,
    /// Truncation flags, per agent.
    Truncations,
    /// Info mappings, per agent.
    Infos,
    /// Legal action flags of one agent.
    ActionMask {
        /// Queried agent
        agent: AgentId,
    },
    /// Server-side console rendering.
    Render,
    /// End the server session.
    Close,
    /// Empty round trip.
    Ping,
    /// Server-defined environment descriptor.
    EnvInfo,
}

impl Command {
    /// Wire name of the command, as sent in the `cmd` field.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Reset { .. } => "reset",
            Command::Step { .. } => "step",
            Command::Observe { .. } => "observe",
            Command::Last => "last",
            Command::Agents => "agents",
            Command::PossibleAgents => "possible_agents",
            Command::AgentSelection => "agent_selection",
            Command::ObservationSpace { .. } => "observation_space",
            Command::ActionSpace { .. } => "action_space",
            Command::Rewards => "rewards",
            Command::Terminations => "terminations",
            Command::Truncations => "truncations",
            Command::Infos => "infos",
            Command::ActionMask { .. } => "action_mask",
            Command::Render => "render",
            Command::Close => "close",
            Command::Ping => "ping",
            Command::EnvInfo => "env_info",
        }
    }
}

/// Wire description of an observation or action domain.
///
/// Either a discrete choice (`n`) or a bounded real vector (`shape` with optional `low` and
/// `high`). Missing bounds mean -inf / +inf elementwise. The invariants are checked when the
/// descriptor is turned into a [`Space`](crate::spaces::Space).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpaceDescriptor {
    /// Number of discrete choices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u64>,
    /// Dimension sizes of a bounded vector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    /// Flattened lower bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Vec<f32>>,
    /// Flattened upper bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Vec<f32>>,
}

impl SpaceDescriptor {
    /// Descriptor of a discrete space with `n` choices.
    pub fn discrete(n: u64) -> Self {
        Self {
            n: Some(n),
            ..Self::default()
        }
    }

    /// Descriptor of a bounded vector space.
    pub fn bounded(shape: Vec<usize>, low: Option<Vec<f32>>, high: Option<Vec<f32>>) -> Self {
        Self {
            n: None,
            shape: Some(shape),
            low,
            high,
        }
    }
}

/// Outcome attributed to the most recent action of the currently selected agent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepResult {
    /// Reward earned since the agent last acted
    #[serde(default)]
    pub reward: f32,
    /// The episode ended for this agent because of the game rules.
    #[serde(default)]
    pub terminated: bool,
    /// The episode ended for this agent because of an external limit.
    #[serde(default)]
    pub truncated: bool,
    /// Diagnostic mapping
    #[serde(default)]
    pub info: Info,
}

impl StepResult {
    /// True when the agent is terminated or truncated.
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Extract the `error` field of a reply, if any.
///
/// Non-string error payloads are rendered as JSON so that no server message is lost.
pub(crate) fn reply_error(reply: &Value) -> Option<String> {
    match reply.get("error")? {
        Value::Null => None,
        Value::String(msg) => Some(msg.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_are_tagged_by_cmd() {
        let reset = serde_json::to_value(Command::Reset { seed: Some(42) }).unwrap();
        assert_eq!(reset, json!({"cmd": "reset", "seed": 42}));

        let unseeded = serde_json::to_value(Command::Reset { seed: None }).unwrap();
        assert_eq!(unseeded, json!({"cmd": "reset"}));

        let observe = serde_json::to_value(Command::Observe {
            agent: "player_0".into(),
        })
        .unwrap();
        assert_eq!(observe, json!({"cmd": "observe", "agent": "player_0"}));

        let selection = serde_json::to_value(Command::AgentSelection).unwrap();
        assert_eq!(selection, json!({"cmd": "agent_selection"}));
    }

    #[test]
    fn command_name_matches_wire_tag() {
        let commands = [
            Command::Step { action: 1 },
            Command::PossibleAgents,
            Command::ActionMask {
                agent: "a".into(),
            },
            Command::EnvInfo,
        ];
        for command in commands {
            let value = serde_json::to_value(&command).unwrap();
            assert_eq!(value["cmd"], command.name());
        }
    }

    #[test]
    fn step_result_defaults_missing_fields() {
        let result: StepResult = serde_json::from_value(json!({"reward": 1.5})).unwrap();
        assert_eq!(result.reward, 1.5);
        assert!(!result.done());
        assert!(result.info.is_empty());
    }

    #[test]
    fn reply_error_handles_non_string_payloads() {
        assert_eq!(
            reply_error(&json!({"error": "invalid action"})).as_deref(),
            Some("invalid action")
        );
        assert_eq!(
            reply_error(&json!({"error": {"code": 3}})).as_deref(),
            Some("{\"code\":3}")
        );
        assert_eq!(reply_error(&json!({"error": null})), None);
        assert_eq!(reply_error(&json!({"ok": true})), None);
    }
}
