//! # HyperToken Bridge
//!
//! Client-side bridge driving a turn-based, multi-agent game simulation hosted by a remote
//! environment server, through a small JSON-over-WebSocket RPC protocol.
//!
//! It provides:
//! - A strictly request/response [`Transport`](crate::transport::Transport) and a typed
//!   [`RpcClient`](crate::client::RpcClient) with one method per server command
//! - [`AecEnv`](crate::aec::AecEnv), a turn-sequenced adapter where one agent acts per step in
//!   the order chosen by the server
//! - [`ParallelEnv`](crate::parallel::ParallelEnv), an "all agents act at once" interface
//!   emulated by bounded rounds of sequential steps
//! - Native [`Space`](crate::spaces::Space)s converted from the server's space descriptors
//! - Helpers to start an environment server and wait for it in [`server`]
//!
//! The server is the only source of truth for the game state, the active agents and the turn
//! order. The adapters only cache the possible agents and their spaces, captured once per
//! connection.
//!
//! # Documentation Overview
//!
//! - For the wire format, see [`protocol`].
//! - For addresses, timeouts, rendering and action mask handling, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For the turn iteration protocol, see [`AgentIter`](crate::aec::AgentIter).
//! - For what "parallel" does and does not guarantee, see [`parallel`].
//!
//! # Usage Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use hypertoken_bridge::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = ServerSettings::new().with_agents(2).with_seed(7);
//!     let server = ServerProcess::start(&settings)?;
//!
//!     let config = Configuration::new().with_address(server.address());
//!     let mut env = ParallelEnv::open(config)?;
//!     let (mut observations, _infos) = env.reset(Some(42), None)?;
//!
//!     let mut rng = rand::thread_rng();
//!     while !observations.is_empty() {
//!         let mut actions = HashMap::new();
//!         for agent in observations.keys() {
//!             let action = env.action_space(agent)?.sample(&mut rng)[0] as u32;
//!             actions.insert(agent.clone(), action);
//!         }
//!         let step = env.step(&actions)?;
//!         println!("rewards: {:?}", step.rewards);
//!         observations = step.observations;
//!     }
//!     env.close();
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

pub mod aec;
pub mod cache;
pub mod client;
pub mod configuration;
pub mod error;
pub mod logger;
pub mod parallel;
pub mod protocol;
pub mod server;
pub mod spaces;
pub mod transport;

pub use anyhow;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use hypertoken_bridge::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration) and its policies
/// - both adapters and their result types
/// - [`BridgeError`](crate::error::BridgeError)
/// - the server lifecycle helpers
pub mod prelude {
    pub use crate::aec::{AecEnv, AgentIter, LastResult, Phase};
    pub use crate::configuration::{Configuration, MaskPolicy, RenderMode};
    pub use crate::error::BridgeError;
    pub use crate::parallel::{ParallelEnv, ParallelStep, TurnStatus};
    pub use crate::protocol::{Action, AgentId};
    pub use crate::server::{measure_latency, wait_for_server, ServerProcess, ServerSettings};
    pub use crate::spaces::Space;
}
