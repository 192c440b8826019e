//! Typed RPC client over a [`Transport`].
//!
//! One method per server command. Each call encodes one command, waits for exactly one reply,
//! turns an `error` field into [`BridgeError::Server`] and decodes the named result field.
//! Nothing is cached, retried or reordered here.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{trace, warn};

use crate::configuration::Configuration;
use crate::error::{BridgeError, Result};
use crate::protocol::{reply_error, Action, AgentId, Command, Info, SpaceDescriptor, StepResult};
use crate::transport::{Transport, WsTransport};

/// Low-level client speaking the environment server protocol.
#[derive(Debug)]
pub struct RpcClient<T: Transport = WsTransport> {
    transport: T,
}

impl RpcClient<WsTransport> {
    /// Create a disconnected client for the server described by `config`.
    pub fn from_config(config: &Configuration) -> Self {
        Self::new(WsTransport::new(config.address(), config.timeout()))
    }
}

impl<T: Transport> RpcClient<T> {
    /// Wrap an existing transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open the connection.
    pub fn connect(&mut self) -> Result<()> {
        self.transport.connect()
    }

    /// Close the connection without notifying the server.
    pub fn disconnect(&mut self) {
        self.transport.close();
    }

    /// True while the transport holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn call(&mut self, command: Command) -> Result<Value> {
        let reply = self.transport.send(&command)?;
        if let Some(msg) = reply_error(&reply) {
            trace!(cmd = command.name(), error = %msg, "server rejected command");
            return Err(BridgeError::Server(msg));
        }
        Ok(reply)
    }

    fn call_field<R: DeserializeOwned>(&mut self, command: Command, field: &str) -> Result<R> {
        let name = command.name();
        let mut reply = self.call(command)?;
        let value = reply
            .get_mut(field)
            .map(Value::take)
            .ok_or_else(|| BridgeError::protocol(format!("reply to '{name}' has no '{field}'")))?;
        serde_json::from_value(value)
            .map_err(|e| BridgeError::protocol(format!("bad '{field}' in reply to '{name}': {e}")))
    }

    /// Start a new episode.
    pub fn reset(&mut self, seed: Option<u64>) -> Result<()> {
        self.call(Command::Reset { seed }).map(drop)
    }

    /// Apply `action` for the currently selected agent.
    pub fn step(&mut self, action: Action) -> Result<()> {
        self.call(Command::Step { action }).map(drop)
    }

    /// Observation vector of `agent`.
    pub fn observe(&mut self, agent: &str) -> Result<Vec<f32>> {
        self.call_field(
            Command::Observe {
                agent: agent.to_string(),
            },
            "observation",
        )
    }

    /// Step result of the currently selected agent. Missing fields take their defaults.
    pub fn last(&mut self) -> Result<StepResult> {
        let reply = self.call(Command::Last)?;
        serde_json::from_value(reply)
            .map_err(|e| BridgeError::protocol(format!("bad reply to 'last': {e}")))
    }

    /// Currently active agents.
    pub fn agents(&mut self) -> Result<Vec<AgentId>> {
        self.call_field(Command::Agents, "agents")
    }

    /// Every agent that may take part in an episode.
    pub fn possible_agents(&mut self) -> Result<Vec<AgentId>> {
        self.call_field(Command::PossibleAgents, "possible_agents")
    }

    /// Agent whose turn it is.
    pub fn agent_selection(&mut self) -> Result<AgentId> {
        self.call_field(Command::AgentSelection, "agent")
    }

    /// Observation space descriptor of `agent`.
    pub fn observation_space(&mut self, agent: &str) -> Result<SpaceDescriptor> {
        self.call_field(
            Command::ObservationSpace {
                agent: agent.to_string(),
            },
            "space",
        )
    }

    /// Action space descriptor of `agent`.
    pub fn action_space(&mut self, agent: &str) -> Result<SpaceDescriptor> {
        self.call_field(
            Command::ActionSpace {
                agent: agent.to_string(),
            },
            "space",
        )
    }

    /// Rewards of the last step, per agent.
    pub fn rewards(&mut self) -> Result<HashMap<AgentId, f32>> {
        self.call_field(Command::Rewards, "rewards")
    }

    /// Termination flags, per agent.
    pub fn terminations(&mut self) -> Result<HashMap<AgentId, bool>> {
        self.call_field(Command::Terminations, "terminations")
    }

    /// Truncation flags, per agent.
    pub fn truncations(&mut self) -> Result<HashMap<AgentId, bool>> {
        self.call_field(Command::Truncations, "truncations")
    }

    /// Info mappings, per agent.
    pub fn infos(&mut self) -> Result<HashMap<AgentId, Info>> {
        self.call_field(Command::Infos, "infos")
    }

    /// Legal-action flags of `agent`, or `None` when the server has no masking information.
    pub fn action_mask(&mut self, agent: &str) -> Result<Option<Vec<bool>>> {
        let mask: Option<Vec<bool>> = match self.call(Command::ActionMask {
            agent: agent.to_string(),
        })? {
            Value::Object(mut reply) => match reply.remove("mask") {
                None | Some(Value::Null) => None,
                Some(value) => Some(serde_json::from_value(value).map_err(|e| {
                    BridgeError::protocol(format!("bad 'mask' in reply to 'action_mask': {e}"))
                })?),
            },
            _ => None,
        };
        Ok(mask.filter(|m| !m.is_empty()))
    }

    /// Ask the server to render its current state.
    pub fn render(&mut self) -> Result<()> {
        self.call(Command::Render).map(drop)
    }

    /// Round-trip latency of an empty command.
    pub fn ping(&mut self) -> Result<Duration> {
        let start = Instant::now();
        self.call(Command::Ping)?;
        Ok(start.elapsed())
    }

    /// Server-defined environment descriptor.
    pub fn env_info(&mut self) -> Result<Value> {
        self.call(Command::EnvInfo)
    }

    /// Send `close` to the server (best effort) and disconnect. Idempotent.
    pub fn close(&mut self) {
        if self.transport.is_connected() {
            if let Err(e) = self.call(Command::Close) {
                warn!("close command failed: {e}");
            }
        }
        self.transport.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use serde_json::json;

    use super::*;

    /// Transport answering from a fixed script and recording every command.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedTransport {
        pub connected: bool,
        pub replies: VecDeque<Value>,
        pub sent: Vec<Command>,
    }

    impl ScriptedTransport {
        pub fn with_replies(replies: Vec<Value>) -> Self {
            Self {
                connected: true,
                replies: replies.into(),
                sent: vec![],
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn connect(&mut self) -> Result<()> {
            self.connected = true;
            Ok(())
        }

        fn send(&mut self, command: &Command) -> Result<Value> {
            if !self.connected {
                return Err(BridgeError::NotConnected);
            }
            self.sent.push(command.clone());
            self.replies
                .pop_front()
                .ok_or_else(|| BridgeError::connection("script exhausted"))
        }

        fn close(&mut self) {
            self.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    fn client(replies: Vec<Value>) -> RpcClient<ScriptedTransport> {
        RpcClient::new(ScriptedTransport::with_replies(replies))
    }

    #[test]
    fn error_field_becomes_server_error() {
        let mut client = client(vec![json!({"error": "invalid action"})]);
        let err = client.step(1).unwrap_err();
        match err {
            BridgeError::Server(msg) => assert_eq!(msg, "invalid action"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(client.transport().sent, vec![Command::Step { action: 1 }]);
    }

    #[test]
    fn result_fields_are_decoded() {
        let mut client = client(vec![
            json!({"observation": [0.5, 1.0, 2.0]}),
            json!({"agents": ["player_0", "player_1"]}),
            json!({"agent": "player_1"}),
            json!({"space": {"n": 3}}),
            json!({"rewards": {"player_0": 1.0, "player_1": -1.0}}),
        ]);
        assert_eq!(client.observe("player_0").unwrap(), vec![0.5, 1.0, 2.0]);
        assert_eq!(client.agents().unwrap(), vec!["player_0", "player_1"]);
        assert_eq!(client.agent_selection().unwrap(), "player_1");
        assert_eq!(
            client.action_space("player_1").unwrap(),
            SpaceDescriptor::discrete(3)
        );
        let rewards = client.rewards().unwrap();
        assert_eq!(rewards["player_1"], -1.0);
    }

    #[test]
    fn missing_or_mistyped_field_is_a_protocol_error() {
        let mut client = client(vec![json!({"ok": true}), json!({"agents": "player_0"})]);
        assert!(matches!(
            client.agents().unwrap_err(),
            BridgeError::Protocol(_)
        ));
        assert!(matches!(
            client.agents().unwrap_err(),
            BridgeError::Protocol(_)
        ));
    }

    #[test]
    fn last_tolerates_missing_fields() {
        let mut client = client(vec![json!({"terminated": true})]);
        let last = client.last().unwrap();
        assert_eq!(last.reward, 0.0);
        assert!(last.terminated);
        assert!(!last.truncated);
        assert!(last.done());
    }

    #[test]
    fn absent_null_and_empty_masks_mean_no_information() {
        let mut client = client(vec![
            json!({}),
            json!({"mask": null}),
            json!({"mask": []}),
            json!({"mask": [true, false, true]}),
        ]);
        assert_eq!(client.action_mask("a").unwrap(), None);
        assert_eq!(client.action_mask("a").unwrap(), None);
        assert_eq!(client.action_mask("a").unwrap(), None);
        assert_eq!(
            client.action_mask("a").unwrap(),
            Some(vec![true, false, true])
        );
    }

    #[test]
    fn close_is_best_effort_and_idempotent() {
        let mut client = client(vec![json!({"error": "already closed"})]);
        client.close();
        assert!(!client.is_connected());
        client.close();
        assert_eq!(client.transport().sent, vec![Command::Close]);
    }

    #[test]
    fn reset_forwards_seed() {
        let mut client = client(vec![json!({}), json!({})]);
        client.reset(Some(42)).unwrap();
        client.reset(None).unwrap();
        assert_eq!(
            client.transport().sent,
            vec![
                Command::Reset { seed: Some(42) },
                Command::Reset { seed: None }
            ]
        );
    }
}
