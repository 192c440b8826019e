//! Turn-sequenced (agent-environment-cycle) adapter.
//!
//! Exactly one agent acts per [`AecEnv::step`], in the order decided by the server. The adapter
//! owns no game state: the active agents and the selected agent are fetched live on every
//! query. The only local data is the [`SpaceCache`] captured at connect time and the episode
//! counter binding an [`AgentIter`] to the episode it was created in.
//!
//! ```text
//! Disconnected --connect--> Idle --reset--> Running --(agents empty)--> Ended
//!                            ^                 |  ^                       |
//!                            |                 |  +--------reset----------+
//!                            +----reconnect----+
//! ```
//!
//! # Example
//! ```no_run
//! use hypertoken_bridge::prelude::*;
//!
//! # fn main() -> Result<(), BridgeError> {
//! let mut env = AecEnv::open(Configuration::from_env())?;
//! env.reset(Some(42), None)?;
//!
//! let mut iter = env.agent_iter(None);
//! while let Some(agent) = iter.next(&mut env)? {
//!     let last = env.last(true)?;
//!     let action = if last.done() { None } else { Some(0) };
//!     println!("{agent} plays {action:?}");
//!     env.step(action)?;
//! }
//! env.close();
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cache::SpaceCache;
use crate::client::RpcClient;
use crate::configuration::{Configuration, MaskPolicy, RenderMode};
use crate::error::{BridgeError, Result};
use crate::logger::init_logger;
use crate::protocol::{Action, AgentId, Info};
use crate::spaces::Space;
use crate::transport::{Transport, WsTransport};

/// Lifecycle of an [`AecEnv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No live connection.
    Disconnected,
    /// Connected, no episode started yet.
    Idle,
    /// An episode is in progress.
    Running,
    /// The last episode ran out of active agents.
    Ended,
}

/// Step result of the selected agent, paired with its observation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LastResult {
    /// Current observation of the selected agent, `None` when not requested
    pub observation: Option<Vec<f32>>,
    /// Reward earned since the agent last acted
    pub reward: f32,
    /// The agent's episode ended because of the game rules.
    pub terminated: bool,
    /// The agent's episode ended because of an external limit.
    pub truncated: bool,
    /// Diagnostic mapping
    pub info: Info,
}

impl LastResult {
    /// True when the agent is terminated or truncated.
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Agent-environment-cycle adapter over a remote environment server.
#[derive(Debug)]
pub struct AecEnv<T: Transport = WsTransport> {
    client: RpcClient<T>,
    cache: SpaceCache,
    config: Configuration,
    phase: Phase,
    episode: u64,
}

impl AecEnv<WsTransport> {
    /// Create a disconnected adapter for the server described by `config`.
    ///
    /// Installs the file logger when `config` enables it. A logger that cannot be installed
    /// (typically because another global subscriber exists) only produces a warning.
    pub fn new(config: Configuration) -> Self {
        if config.log {
            match init_logger(&config.log_dir) {
                Ok(path) => info!("logging to {}", path.display()),
                Err(e) => warn!("could not install file logger: {e:#}"),
            }
        }
        let client = RpcClient::from_config(&config);
        Self::with_client(client, config)
    }

    /// Create an adapter and connect it right away.
    pub fn open(config: Configuration) -> Result<Self> {
        let mut env = Self::new(config);
        env.connect()?;
        Ok(env)
    }
}

impl<T: Transport> AecEnv<T> {
    /// Create a disconnected adapter over an arbitrary transport.
    pub fn with_transport(transport: T, config: Configuration) -> Self {
        Self::with_client(RpcClient::new(transport), config)
    }

    fn with_client(client: RpcClient<T>, config: Configuration) -> Self {
        Self {
            client,
            cache: SpaceCache::default(),
            config,
            phase: Phase::Disconnected,
            episode: 0,
        }
    }

    /// Connect and capture the possible agents and their spaces.
    ///
    /// Connecting an already connected adapter reconnects and refreshes the cache. On failure
    /// the adapter is left disconnected.
    #[instrument(skip(self))]
    pub fn connect(&mut self) -> Result<()> {
        self.client.connect()?;
        match SpaceCache::populate(&mut self.client) {
            Ok(cache) => {
                self.cache = cache;
                self.phase = Phase::Idle;
                info!(agents = ?self.cache.possible_agents(), "connected");
                Ok(())
            }
            Err(e) => {
                self.client.disconnect();
                self.phase = Phase::Disconnected;
                Err(e)
            }
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        if self.client.is_connected() {
            self.phase
        } else {
            Phase::Disconnected
        }
    }

    /// True while a live connection is held.
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    #[cfg(test)]
    pub(crate) fn client(&self) -> &RpcClient<T> {
        &self.client
    }

    /// Configuration this adapter was built with.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Start a new episode, connecting first if needed.
    ///
    /// `options` is accepted for interface compatibility and is not sent to the server.
    /// Spaces are not fetched again.
    #[instrument(skip(self, options))]
    pub fn reset(&mut self, seed: Option<u64>, options: Option<&Value>) -> Result<()> {
        if !self.client.is_connected() {
            self.connect()?;
        }
        if options.is_some() {
            debug!("reset options are not forwarded");
        }
        self.client.reset(seed)?;
        self.episode += 1;
        self.phase = Phase::Running;
        self.render_if_human()
    }

    /// Act for the currently selected agent.
    ///
    /// `None` is the skip used for finished agents: no step is sent and the server is expected
    /// to move past finished agents on its own. Under [`MaskPolicy::Reject`] the selected
    /// agent's mask is fetched first and a masked-out action fails with
    /// [`BridgeError::IllegalAction`] before anything is stepped.
    pub fn step(&mut self, action: Option<Action>) -> Result<()> {
        let Some(action) = action else {
            if !self.client.is_connected() {
                return Err(BridgeError::NotConnected);
            }
            debug!("step(None): nothing sent");
            return self.render_if_human();
        };

        if self.config.mask_policy == MaskPolicy::Reject {
            let agent = self.client.agent_selection()?;
            self.check_mask(&agent, action)?;
        }
        self.send_step(action)
    }

    /// Step the selected agent without any mask check.
    pub(crate) fn send_step(&mut self, action: Action) -> Result<()> {
        self.client.step(action)?;
        self.render_if_human()
    }

    /// Fail with [`BridgeError::IllegalAction`] when `agent`'s current mask excludes `action`.
    /// An agent without mask accepts everything.
    pub(crate) fn check_mask(&mut self, agent: &str, action: Action) -> Result<()> {
        if let Some(mask) = self.client.action_mask(agent)? {
            if !mask.get(action as usize).copied().unwrap_or(false) {
                debug!(%agent, action, "action masked out");
                return Err(BridgeError::IllegalAction {
                    agent: agent.to_string(),
                    action,
                });
            }
        }
        Ok(())
    }

    fn render_if_human(&mut self) -> Result<()> {
        if self.config.render_mode == RenderMode::Human {
            self.client.render()?;
        }
        Ok(())
    }

    /// Observation vector of `agent`.
    pub fn observe(&mut self, agent: &str) -> Result<Vec<f32>> {
        self.client.observe(agent)
    }

    /// Step result of the selected agent, with its observation unless `observe` is false.
    pub fn last(&mut self, observe: bool) -> Result<LastResult> {
        let result = self.client.last()?;
        let observation = if observe {
            let agent = self.client.agent_selection()?;
            Some(self.client.observe(&agent)?)
        } else {
            None
        };
        Ok(LastResult {
            observation,
            reward: result.reward,
            terminated: result.terminated,
            truncated: result.truncated,
            info: result.info,
        })
    }

    /// Currently active agents. Always a live query.
    ///
    /// A running episode is marked [`Phase::Ended`] as soon as the server reports no active
    /// agent.
    pub fn agents(&mut self) -> Result<Vec<AgentId>> {
        let agents = self.client.agents()?;
        if agents.is_empty() && self.phase == Phase::Running {
            debug!("no active agent left, episode ended");
            self.phase = Phase::Ended;
        }
        Ok(agents)
    }

    /// Number of currently active agents.
    pub fn num_agents(&mut self) -> Result<usize> {
        Ok(self.agents()?.len())
    }

    /// Agent whose turn it is. Always a live query.
    pub fn agent_selection(&mut self) -> Result<AgentId> {
        self.client.agent_selection()
    }

    /// Every agent that may take part, as captured at connect time. Empty before the first
    /// connect.
    pub fn possible_agents(&self) -> &[AgentId] {
        self.cache.possible_agents()
    }

    /// Cached observation space of `agent`.
    pub fn observation_space(&self, agent: &str) -> Result<&Space> {
        self.cache.observation_space(agent)
    }

    /// Cached action space of `agent`.
    pub fn action_space(&self, agent: &str) -> Result<&Space> {
        self.cache.action_space(agent)
    }

    /// Rewards of the last step, per agent.
    pub fn rewards(&mut self) -> Result<HashMap<AgentId, f32>> {
        self.client.rewards()
    }

    /// Termination flags, per agent.
    pub fn terminations(&mut self) -> Result<HashMap<AgentId, bool>> {
        self.client.terminations()
    }

    /// Truncation flags, per agent.
    pub fn truncations(&mut self) -> Result<HashMap<AgentId, bool>> {
        self.client.truncations()
    }

    /// Info mappings, per agent.
    pub fn infos(&mut self) -> Result<HashMap<AgentId, Info>> {
        self.client.infos()
    }

    /// Legal-action flags of `agent`, `None` when the server has no masking information.
    pub fn action_mask(&mut self, agent: &str) -> Result<Option<Vec<bool>>> {
        self.client.action_mask(agent)
    }

    /// Ask the server to render its current state.
    pub fn render(&mut self) -> Result<()> {
        self.client.render()
    }

    /// Round-trip latency of an empty command.
    pub fn ping(&mut self) -> Result<std::time::Duration> {
        self.client.ping()
    }

    /// Server-defined environment descriptor.
    pub fn env_info(&mut self) -> Result<Value> {
        self.client.env_info()
    }

    /// Cursor over the selected agents of the current episode.
    ///
    /// Yields at most `max_iter` agents (unbounded when `None`).
    pub fn agent_iter(&self, max_iter: Option<u64>) -> AgentIter {
        AgentIter {
            remaining: max_iter.unwrap_or(u64::MAX),
            episode: self.episode,
        }
    }

    /// Close the session. Idempotent, also run on drop.
    pub fn close(&mut self) {
        if self.client.is_connected() {
            debug!("closing environment");
        }
        self.client.close();
        self.phase = Phase::Disconnected;
    }
}

impl<T: Transport> Drop for AecEnv<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Turn iteration over an [`AecEnv`].
///
/// Every call to [`AgentIter::next`] costs an `agents` and an `agent_selection` round trip. The
/// caller is expected to issue exactly one `last` + `step` pair between two calls; skipping it
/// desynchronizes the caller from the server's turn order. A cursor created before a `reset`
/// yields nothing afterwards.
#[derive(Debug, Clone)]
pub struct AgentIter {
    remaining: u64,
    episode: u64,
}

impl AgentIter {
    /// Next selected agent, or `None` once no agent is active or the cap is reached.
    pub fn next<T: Transport>(&mut self, env: &mut AecEnv<T>) -> Result<Option<AgentId>> {
        if self.remaining == 0 || self.episode != env.episode {
            return Ok(None);
        }
        if env.agents()?.is_empty() {
            self.remaining = 0;
            return Ok(None);
        }
        let agent = env.agent_selection()?;
        self.remaining -= 1;
        Ok(Some(agent))
    }
}
